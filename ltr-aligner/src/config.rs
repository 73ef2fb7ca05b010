//! Configuration resolution for ltr-aligner
//!
//! Each setting is resolved with ENV → TOML → compiled default priority.
//! Invalid values are configuration errors, not silently replaced.

use ltr_common::config::TomlConfig;
use ltr_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub const PROCESSORS_ENV: &str = "LTR_ALIGNER_PROCESSORS";
pub const BATCH_SIZE_ENV: &str = "LTR_ALIGNER_BATCH_SIZE";
pub const MAX_BATCHES_ENV: &str = "LTR_ALIGNER_MAX_BATCHES";
pub const MODEL_ENV: &str = "LTR_ALIGNER_MODEL";
pub const EMBED_BATCH_SIZE_ENV: &str = "LTR_ALIGNER_EMBED_BATCH_SIZE";
pub const NORMALIZE_EMBEDDINGS_ENV: &str = "LTR_ALIGNER_NORMALIZE_EMBEDDINGS";
pub const BRIDGE_ENV: &str = "LTR_ALIGNER_BRIDGE";

pub const DEFAULT_PROCESSORS: usize = 2;
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_MODEL: &str = "sentence_transformer_multilingual";
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 10;
pub const DEFAULT_BRIDGE: &str = "lingtrain-bridge";

/// Resolved service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignerSettings {
    /// Worker parallelism P
    pub processors: usize,
    /// Source lines per batch
    pub batch_size: usize,
    /// Cap on total batches per job (0 = unlimited)
    pub max_batches: usize,
    pub model_name: String,
    pub embed_batch_size: usize,
    pub normalize_embeddings: bool,
    /// External alignment bridge command line (program and leading arguments)
    pub bridge_program: String,
}

impl Default for AlignerSettings {
    fn default() -> Self {
        Self {
            processors: DEFAULT_PROCESSORS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: 0,
            model_name: DEFAULT_MODEL.to_string(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            normalize_embeddings: true,
            bridge_program: DEFAULT_BRIDGE.to_string(),
        }
    }
}

impl AlignerSettings {
    /// Resolve from the process environment and the TOML config
    pub fn resolve(toml_config: &TomlConfig) -> Result<Self> {
        Self::resolve_with(toml_config, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(toml_config: &TomlConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let toml = &toml_config.aligner;
        let defaults = Self::default();

        let settings = Self {
            processors: pick(parse_env(&env, PROCESSORS_ENV)?, toml.processors, defaults.processors),
            batch_size: pick(parse_env(&env, BATCH_SIZE_ENV)?, toml.batch_size, defaults.batch_size),
            max_batches: pick(
                parse_env(&env, MAX_BATCHES_ENV)?,
                toml.max_batches,
                defaults.max_batches,
            ),
            model_name: pick(env(MODEL_ENV), toml.model_name.clone(), defaults.model_name),
            embed_batch_size: pick(
                parse_env(&env, EMBED_BATCH_SIZE_ENV)?,
                toml.embed_batch_size,
                defaults.embed_batch_size,
            ),
            normalize_embeddings: pick(
                parse_env(&env, NORMALIZE_EMBEDDINGS_ENV)?,
                toml.normalize_embeddings,
                defaults.normalize_embeddings,
            ),
            bridge_program: pick(
                env(BRIDGE_ENV),
                toml.bridge_program.clone(),
                defaults.bridge_program,
            ),
        };

        settings.validate()?;

        info!(
            processors = settings.processors,
            batch_size = settings.batch_size,
            max_batches = settings.max_batches,
            model = %settings.model_name,
            "Aligner settings resolved"
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processors == 0 {
            return Err(Error::Config("processors must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config("embed_batch_size must be at least 1".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(Error::Config("model_name must not be empty".to_string()));
        }
        if self.bridge_program.trim().is_empty() {
            return Err(Error::Config("bridge_program must not be empty".to_string()));
        }
        Ok(())
    }

    /// `ceil(lines_from / batch_size)`, capped by `max_batches` when set
    pub fn total_batches_for(&self, lines_from: usize) -> u32 {
        let total = lines_from.div_ceil(self.batch_size);
        let capped = if self.max_batches > 0 {
            total.min(self.max_batches)
        } else {
            total
        };
        capped as u32
    }
}

fn pick<T>(env: Option<T>, toml: Option<T>, default: T) -> T {
    env.or(toml).unwrap_or(default)
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", key, raw))),
    }
}

/// On-disk layout under the root folder
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-job alignment store: `<root>/db/<from>/<to>/<guid>.db`
    pub fn alignment_db_path(&self, lang_from: &str, lang_to: &str, guid: &str) -> PathBuf {
        self.root
            .join("db")
            .join(lang_from)
            .join(lang_to)
            .join(format!("{}.db", guid))
    }

    /// Rendered visualization: `<root>/img/<guid>.best.png`
    pub fn visualization_path(&self, guid: &str) -> PathBuf {
        self.root.join("img").join(format!("{}.best.png", guid))
    }
}
