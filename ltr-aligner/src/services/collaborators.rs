//! Collaborator interfaces
//!
//! The orchestrator never computes alignments, detects conflicts or draws
//! images itself. Those jobs belong to the three traits below; the production
//! implementation is [`LingtrainBridge`](super::LingtrainBridge), tests plug in
//! in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Input for one batch alignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentTask {
    pub batch_id: u32,
    pub lines_from: Vec<String>,
    pub lines_to: Vec<String>,
    pub line_ids_from: Vec<i64>,
    pub line_ids_to: Vec<i64>,
    pub proxy_from: Option<Vec<String>>,
    pub proxy_to: Option<Vec<String>>,
    pub model_name: String,
    pub window: u32,
    pub embed_batch_size: usize,
    pub normalize_embeddings: bool,
}

/// Aligned groups produced by the engine (opaque to the orchestrator)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedGroups {
    pub aligned_from: Vec<Value>,
    pub aligned_to: Vec<Value>,
}

/// A chain of conflicting alignment groups
///
/// Opaque to the orchestrator except for its line ids, which come either as
/// `{"from": [..], "to": [..]}` or as a `[[..], [..]]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictChain(pub Value);

impl ConflictChain {
    /// Source and target line ids covered by the chain
    pub fn line_ids(&self) -> Option<(Vec<i64>, Vec<i64>)> {
        let (from, to) = match &self.0 {
            Value::Object(map) => (map.get("from")?, map.get("to")?),
            Value::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
            _ => return None,
        };
        Some((ids_of(from)?, ids_of(to)?))
    }

    /// `"<from count>:<to count>"`, used to group conflicts by form
    pub fn shape(&self) -> Option<String> {
        self.line_ids()
            .map(|(from, to)| format!("{}:{}", from.len(), to.len()))
    }
}

fn ids_of(value: &Value) -> Option<Vec<i64>> {
    value.as_array()?.iter().map(Value::as_i64).collect()
}

/// Parameters for conflict detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectParams {
    /// `-1` for the whole document
    pub batch_id: i64,
    pub min_chain_length: u32,
    pub max_conflicts_len: u32,
    pub handle_start: bool,
    pub handle_finish: bool,
}

/// Conflicts found by detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedConflicts {
    /// Chains within the requested length window
    pub conflicts: Vec<ConflictChain>,
    /// Everything else (only acted on by structural correction)
    pub rest_conflicts: Vec<ConflictChain>,
}

/// Structural correction uses the detection thresholds and edge flags
pub type CorrectParams = DetectParams;

/// Options for semantic resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    pub model_name: String,
    pub use_proxy_from: bool,
    pub use_proxy_to: bool,
}

/// Options for visualization rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub lang_name_from: String,
    pub lang_name_to: String,
    pub transparent_bg: bool,
    pub show_info: bool,
    pub show_regression: bool,
}

impl RenderOptions {
    pub fn for_languages(lang_from: &str, lang_to: &str) -> Self {
        Self {
            lang_name_from: lang_from.to_string(),
            lang_name_to: lang_to.to_string(),
            transparent_bg: true,
            show_info: true,
            show_regression: false,
        }
    }
}

/// Computes aligned groups for one batch
#[async_trait]
pub trait AlignmentEngine: Send + Sync {
    async fn compute_alignment(&self, task: AlignmentTask) -> anyhow::Result<AlignedGroups>;
}

/// Detects and repairs conflicts in a job's alignment store
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn detect_conflicts(
        &self,
        store: &Path,
        params: &DetectParams,
    ) -> anyhow::Result<DetectedConflicts>;

    /// Semantic resolution, mutates the store
    async fn resolve_conflicts(
        &self,
        store: &Path,
        chains: &[ConflictChain],
        options: &ResolveOptions,
    ) -> anyhow::Result<()>;

    /// Structural correction of the remaining chains, mutates the store
    async fn correct_conflicts(
        &self,
        store: &Path,
        chains: &[ConflictChain],
        params: &CorrectParams,
    ) -> anyhow::Result<()>;
}

/// Renders the alignment visualization image
#[async_trait]
pub trait Visualizer: Send + Sync {
    async fn render(
        &self,
        store: &Path,
        image: &Path,
        batch_ids: &[u32],
        options: &RenderOptions,
    ) -> anyhow::Result<()>;
}

/// The three collaborators a run needs
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn AlignmentEngine>,
    pub resolver: Arc<dyn ConflictResolver>,
    pub visualizer: Arc<dyn Visualizer>,
}

impl Collaborators {
    /// One object implementing all three roles
    pub fn from_single<T>(shared: Arc<T>) -> Self
    where
        T: AlignmentEngine + ConflictResolver + Visualizer + 'static,
    {
        Self {
            engine: shared.clone(),
            resolver: shared.clone(),
            visualizer: shared,
        }
    }
}
