//! Configuration module for the orthogonal vector index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `OVI_` and use double underscores
//! to separate nested levels:
//! - `OVI_ADMISSION__THRESHOLD=0.9` sets `admission.threshold`
//! - `OVI_INDEXING__EMBED_WORKERS=8` sets `indexing.embed_workers`
//! - `OVI_LOGGING__LEVEL=debug` sets `logging.level`
//!
//! `dimension` and `admission.threshold` only apply when a new index is
//! created; an existing index keeps the values it was created with.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IndexError, IndexResult};

/// Directory holding settings and, by default, the index.
pub const CONFIG_DIR: &str = ".orthovec";

/// Extra ignore file honored by the directory walker.
pub const IGNORE_FILE: &str = ".orthovecignore";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .orthovec is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Vector dimension for a new index
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdmissionConfig {
    /// Reject candidates too similar to existing content
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cosine similarity at or above which a candidate is a duplicate
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// Rebuild once excluded ids exceed this fraction of live ids
    #[serde(default = "default_rebuild_ratio")]
    pub rebuild_ratio: f32,

    /// Row count above which search runs in parallel
    #[serde(default = "default_parallel_search_threshold")]
    pub parallel_search_threshold: usize,

    /// L2-normalize vectors that are not already unit length
    #[serde(default = "default_true")]
    pub normalize: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// Compaction keeps tombstones younger than this many seconds
    #[serde(default = "default_tombstone_retention")]
    pub tombstone_retention_secs: u64,

    /// fsync every journal append
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Filtered searches fetch `k * overfetch_factor` candidates
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// How many times a filtered search widens its fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Size of the embedding worker pool
    #[serde(default = "default_embed_workers")]
    pub embed_workers: usize,

    /// Deadline for one embedding batch, unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_timeout_ms: Option<u64>,

    /// Lines per chunk for plain files
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    /// File extensions picked up by directory indexing
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Subscriber level: error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_dimension() -> usize {
    crate::vector::DEFAULT_VECTOR_DIMENSION
}
fn default_true() -> bool {
    true
}
fn default_threshold() -> f32 {
    crate::admission::DEFAULT_THRESHOLD
}
fn default_rebuild_ratio() -> f32 {
    0.2
}
fn default_parallel_search_threshold() -> usize {
    crate::vector::DEFAULT_PARALLEL_THRESHOLD
}
fn default_tombstone_retention() -> u64 {
    7 * 24 * 60 * 60
}
fn default_overfetch_factor() -> usize {
    4
}
fn default_max_retries() -> usize {
    3
}
fn default_embed_workers() -> usize {
    num_cpus::get()
}
fn default_chunk_lines() -> usize {
    crate::indexing::DEFAULT_CHUNK_LINES
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cs",
        "php", "rb", "swift", "sh", "md", "txt", "toml", "yaml", "yml", "json", "jsonl",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            dimension: default_dimension(),
            admission: AdmissionConfig::default(),
            index: IndexConfig::default(),
            store: StoreConfig::default(),
            query: QueryConfig::default(),
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            rebuild_ratio: default_rebuild_ratio(),
            parallel_search_threshold: default_parallel_search_threshold(),
            normalize: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tombstone_retention_secs: default_tombstone_retention(),
            sync_writes: true,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: default_overfetch_factor(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            embed_workers: default_embed_workers(),
            embed_timeout_ms: None,
            chunk_lines: default_chunk_lines(),
            extensions: default_extensions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IndexingConfig {
    pub fn embed_timeout(&self) -> Option<Duration> {
        self.embed_timeout_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .orthovec directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // If workspace_root is not set in config, detect it
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single stays in field names
            .merge(Env::prefixed("OVI_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for .orthovec directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .orthovec is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Index directory, resolved against the workspace root when relative
    pub fn resolved_index_path(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Cache directory for locally downloaded embedding models
    pub fn model_cache_dir(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_default()
            .join(CONFIG_DIR)
            .join("models")
    }

    /// Checks values that would otherwise fail deep inside the index
    pub fn validate(&self) -> IndexResult<()> {
        let fail = |reason: String| Err(IndexError::Config { reason });

        if self.dimension == 0 {
            return fail("dimension must be greater than zero".to_string());
        }
        if !(-1.0..=1.0).contains(&self.admission.threshold) {
            return fail(format!(
                "admission.threshold must be within [-1, 1], got {}",
                self.admission.threshold
            ));
        }
        if !self.index.rebuild_ratio.is_finite() || self.index.rebuild_ratio < 0.0 {
            return fail(format!(
                "index.rebuild_ratio must be a non-negative number, got {}",
                self.index.rebuild_ratio
            ));
        }
        if self.query.overfetch_factor == 0 {
            return fail("query.overfetch_factor must be at least 1".to_string());
        }
        if self.indexing.chunk_lines == 0 {
            return fail("indexing.chunk_lines must be at least 1".to_string());
        }
        if self.indexing.embed_workers == 0 {
            return fail("indexing.embed_workers must be at least 1".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# orthovec configuration file

# Version of the configuration schema
version = 1

# Path to the index directory (relative to workspace root)
index_path = ".orthovec/index"

# Vector dimension, fixed when the index is first created
dimension = {dimension}

[admission]
# Orthogonal mode: reject chunks too similar to already indexed content
enabled = true
# Cosine similarity at or above which a chunk counts as a duplicate.
# Fixed when the index is first created.
threshold = {threshold}

[index]
# Rebuild the index once removed ids exceed this fraction of live ids
rebuild_ratio = {rebuild_ratio}
# Row count above which search runs on all cores
parallel_search_threshold = {parallel}
# Normalize vectors that are not already unit length
normalize = true

[store]
# Compaction keeps tombstones younger than this (seconds)
tombstone_retention_secs = {retention}
# fsync every journal write
sync_writes = true

[query]
# Filtered searches fetch k * overfetch_factor candidates per attempt
overfetch_factor = {overfetch}
max_retries = {retries}

[indexing]
# Embedding worker pool size (defaults to CPU count)
# embed_workers = {workers}
# Deadline for one embedding batch in milliseconds
# embed_timeout_ms = 30000
# Lines per chunk for plain files
chunk_lines = {chunk_lines}

[logging]
# error, warn, info, debug or trace
level = "info"
"#,
            dimension = default_dimension(),
            threshold = default_threshold(),
            rebuild_ratio = default_rebuild_ratio(),
            parallel = default_parallel_search_threshold(),
            retention = default_tombstone_retention(),
            overfetch = default_overfetch_factor(),
            retries = default_max_retries(),
            workers = default_embed_workers(),
            chunk_lines = default_chunk_lines(),
        );

        std::fs::write(&config_path, template)?;
        Self::create_default_ignore_file(force)?;

        Ok(config_path)
    }

    /// Create a default .orthovecignore file with helpful patterns
    fn create_default_ignore_file(force: bool) -> Result<(), Box<dyn std::error::Error>> {
        let ignore_path = PathBuf::from(IGNORE_FILE);

        if !force && ignore_path.exists() {
            return Ok(());
        }

        let default_content = r#"# orthovec ignore patterns (gitignore syntax)

# Build artifacts
target/
build/
dist/

# Dependency directories
node_modules/
vendor/
.venv/
__pycache__/

# orthovec's own directory
.orthovec/

# Lock files rarely carry meaning worth embedding
*.lock
package-lock.json
"#;

        std::fs::write(&ignore_path, default_content)?;
        Ok(())
    }
}
