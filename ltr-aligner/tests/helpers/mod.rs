//! Shared test helpers
//!
//! In-process fakes for the three collaborators, plus a temporary root folder
//! with a ready service database and batch processor.

#![allow(dead_code)]

use async_trait::async_trait;
use ltr_aligner::config::{AlignerSettings, StoragePaths};
use ltr_aligner::models::AlignmentJob;
use ltr_aligner::services::{
    AlignedGroups, AlignmentEngine, AlignmentTask, BatchProcessor, Collaborators, ConflictChain,
    ConflictResolver, CorrectParams, DetectParams, DetectedConflicts, NewAlignment, RenderOptions,
    ResolveOptions, Visualizer,
};
use ltr_common::events::EventBus;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Alignment engine returning one group per batch
#[derive(Default)]
pub struct FakeEngine {
    failing: HashSet<u32>,
    delays: HashMap<u32, Duration>,
    calls: Mutex<Vec<AlignmentTask>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise for these batches
    pub fn failing(mut self, batch_ids: &[u32]) -> Self {
        self.failing.extend(batch_ids.iter().copied());
        self
    }

    /// Sleep before answering for this batch
    pub fn delay(mut self, batch_id: u32, delay: Duration) -> Self {
        self.delays.insert(batch_id, delay);
        self
    }

    /// Same delay for every batch in `0..count`
    pub fn delay_all(mut self, count: u32, delay: Duration) -> Self {
        for batch_id in 0..count {
            self.delays.insert(batch_id, delay);
        }
        self
    }

    pub fn calls(&self) -> Vec<AlignmentTask> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_batches(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.calls().iter().map(|t| t.batch_id).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl AlignmentEngine for FakeEngine {
    async fn compute_alignment(&self, task: AlignmentTask) -> anyhow::Result<AlignedGroups> {
        if let Some(delay) = self.delays.get(&task.batch_id) {
            tokio::time::sleep(*delay).await;
        }
        self.calls.lock().unwrap().push(task.clone());

        if self.failing.contains(&task.batch_id) {
            anyhow::bail!("engine failed on batch {}", task.batch_id);
        }

        Ok(AlignedGroups {
            aligned_from: vec![json!({ "batch": task.batch_id, "ids": task.line_ids_from })],
            aligned_to: vec![json!({ "batch": task.batch_id, "ids": task.line_ids_to })],
        })
    }
}

/// Conflict resolver that only finds chains at one `min_chain_length`
///
/// `with_conflicts` replaces that with a fixed detection result.
pub struct FakeResolver {
    chains_at: u32,
    fixed: Option<DetectedConflicts>,
    detect_calls: Mutex<Vec<DetectParams>>,
    resolved: Mutex<Vec<usize>>,
    corrected: Mutex<Vec<usize>>,
}

impl FakeResolver {
    pub fn new(chains_at: u32) -> Self {
        Self {
            chains_at,
            fixed: None,
            detect_calls: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
            corrected: Mutex::new(Vec::new()),
        }
    }

    pub fn with_conflicts(mut self, found: DetectedConflicts) -> Self {
        self.fixed = Some(found);
        self
    }

    pub fn detect_calls(&self) -> Vec<DetectParams> {
        self.detect_calls.lock().unwrap().clone()
    }

    /// Chain counts passed to each resolve call
    pub fn resolved(&self) -> Vec<usize> {
        self.resolved.lock().unwrap().clone()
    }

    pub fn corrected(&self) -> Vec<usize> {
        self.corrected.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConflictResolver for FakeResolver {
    async fn detect_conflicts(
        &self,
        _store: &Path,
        params: &DetectParams,
    ) -> anyhow::Result<DetectedConflicts> {
        self.detect_calls.lock().unwrap().push(*params);
        if let Some(found) = &self.fixed {
            return Ok(found.clone());
        }

        let mut found = DetectedConflicts::default();
        if params.min_chain_length == self.chains_at {
            found.conflicts.push(ConflictChain(json!({ "batch": params.batch_id })));
        }
        if params.max_conflicts_len >= 26 {
            found.rest_conflicts.push(ConflictChain(json!({ "rest": params.batch_id })));
        }
        Ok(found)
    }

    async fn resolve_conflicts(
        &self,
        _store: &Path,
        chains: &[ConflictChain],
        _options: &ResolveOptions,
    ) -> anyhow::Result<()> {
        self.resolved.lock().unwrap().push(chains.len());
        Ok(())
    }

    async fn correct_conflicts(
        &self,
        _store: &Path,
        chains: &[ConflictChain],
        _params: &CorrectParams,
    ) -> anyhow::Result<()> {
        self.corrected.lock().unwrap().push(chains.len());
        Ok(())
    }
}

/// Visualizer recording every render request
#[derive(Default)]
pub struct RecordingVisualizer {
    renders: Mutex<Vec<(PathBuf, Vec<u32>)>>,
}

impl RecordingVisualizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch ids of each render, in call order
    pub fn renders(&self) -> Vec<Vec<u32>> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .map(|(_, ids)| ids.clone())
            .collect()
    }

    pub fn images(&self) -> Vec<PathBuf> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .map(|(image, _)| image.clone())
            .collect()
    }
}

#[async_trait]
impl Visualizer for RecordingVisualizer {
    async fn render(
        &self,
        _store: &Path,
        image: &Path,
        batch_ids: &[u32],
        _options: &RenderOptions,
    ) -> anyhow::Result<()> {
        self.renders
            .lock()
            .unwrap()
            .push((image.to_path_buf(), batch_ids.to_vec()));
        Ok(())
    }
}

/// Temporary root folder with a service database and a processor over fakes
pub struct TestEnv {
    pub dir: TempDir,
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub processor: BatchProcessor,
    pub engine: Arc<FakeEngine>,
    pub resolver: Arc<FakeResolver>,
    pub visualizer: Arc<RecordingVisualizer>,
}

/// Two workers, two source lines per batch
pub fn test_settings() -> AlignerSettings {
    AlignerSettings {
        processors: 2,
        batch_size: 2,
        ..AlignerSettings::default()
    }
}

pub async fn test_env(engine: FakeEngine) -> TestEnv {
    test_env_with(test_settings(), engine, FakeResolver::new(4)).await
}

pub async fn test_env_with(
    settings: AlignerSettings,
    engine: FakeEngine,
    resolver: FakeResolver,
) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = ltr_aligner::db::init_database_pool(&dir.path().join("lingtrain.db"))
        .await
        .expect("Failed to init database");
    let event_bus = EventBus::new(256);

    let engine = Arc::new(engine);
    let resolver = Arc::new(resolver);
    let visualizer = Arc::new(RecordingVisualizer::new());
    let collaborators = Collaborators {
        engine: engine.clone(),
        resolver: resolver.clone(),
        visualizer: visualizer.clone(),
    };

    let processor = BatchProcessor::new(
        db.clone(),
        settings,
        StoragePaths::new(dir.path()),
        collaborators,
        event_bus.clone(),
    );

    TestEnv {
        dir,
        db,
        event_bus,
        processor,
        engine,
        resolver,
        visualizer,
    }
}

/// `count` numbered lines
pub fn lines(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{} {}", prefix, i)).collect()
}

/// Job with `from_lines` source lines (3 batches for 6 lines at batch size 2)
pub fn new_alignment(from_lines: usize, to_lines: usize) -> NewAlignment {
    NewAlignment {
        name: "test alignment".to_string(),
        lang_from: "en".to_string(),
        lang_to: "ru".to_string(),
        lines_from: lines("from", from_lines),
        lines_to: lines("to", to_lines),
        proxy_from: None,
        proxy_to: None,
    }
}

impl TestEnv {
    pub async fn create_job(&self, from_lines: usize, to_lines: usize) -> AlignmentJob {
        self.processor
            .create_job(new_alignment(from_lines, to_lines))
            .await
            .expect("Failed to create job")
    }

    pub async fn reload(&self, job: &AlignmentJob) -> AlignmentJob {
        self.processor
            .get_job(&job.guid)
            .await
            .expect("Failed to reload job")
    }

    pub fn store_path(&self, job: &AlignmentJob) -> PathBuf {
        self.processor
            .paths()
            .alignment_db_path(&job.lang_from, &job.lang_to, &job.guid)
    }
}
