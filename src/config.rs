use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl StateConfig {
    pub fn policy_path(&self) -> PathBuf {
        self.dir.join("policy.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.join("registry.json")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join("vectors.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    5000
}
fn default_workers() -> usize {
    2
}
fn default_poll_interval_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service; requests go to `{url}/embeddings`.
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Name of an environment variable holding a bearer token, if the
    /// service requires one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    100
}
fn default_snippet_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Build a config in code, with every optional section at its default.
    pub fn with_root(root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>, embedding_url: &str) -> Self {
        Self {
            index: IndexConfig {
                root: root.into(),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                max_file_bytes: default_max_file_bytes(),
                follow_symlinks: false,
            },
            state: StateConfig {
                dir: state_dir.into(),
            },
            chunking: ChunkingConfig::default(),
            watcher: WatcherConfig::default(),
            embedding: EmbeddingConfig {
                url: embedding_url.to_string(),
                timeout_secs: default_timeout_secs(),
                batch_size: default_batch_size(),
                api_key_env: None,
            },
            store: StoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_chars == 0 {
            bail!("chunking.chunk_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.chunk_chars {
            bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
        }
        if self.watcher.workers == 0 {
            bail!("watcher.workers must be >= 1");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.retrieval.default_limit == 0 || self.retrieval.default_limit > self.retrieval.max_limit {
            bail!("retrieval.default_limit must be in 1..=retrieval.max_limit");
        }
        if !self.embedding.url.starts_with("http://") && !self.embedding.url.starts_with("https://") {
            bail!("embedding.url must be an http(s) URL, got '{}'", self.embedding.url);
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    if !config.index.root.is_dir() {
        bail!(
            "index.root does not exist or is not a directory: {}",
            config.index.root.display()
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("notegate.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        let body = format!(
            "[index]\nroot = \"{}\"\n\n[embedding]\nurl = \"http://localhost:8080\"\n",
            tmp.path().display()
        );
        let config = load_config(&write_config(tmp.path(), &body)).unwrap();

        assert_eq!(config.chunking.chunk_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.watcher.debounce_ms, 5000);
        assert_eq!(config.watcher.workers, 2);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.state.policy_path(), PathBuf::from("./data/policy.json"));
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let tmp = TempDir::new().unwrap();
        let body = format!(
            "[index]\nroot = \"{}\"\n\n[chunking]\nchunk_chars = 100\noverlap_chars = 100\n\n[embedding]\nurl = \"http://localhost:8080\"\n",
            tmp.path().display()
        );
        let err = load_config(&write_config(tmp.path(), &body)).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn missing_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let body = "[index]\nroot = \"/definitely/not/here\"\n\n[embedding]\nurl = \"http://localhost:8080\"\n";
        assert!(load_config(&write_config(tmp.path(), body)).is_err());
    }

    #[test]
    fn memory_backend_parses() {
        let tmp = TempDir::new().unwrap();
        let body = format!(
            "[index]\nroot = \"{}\"\n\n[store]\nbackend = \"memory\"\n\n[embedding]\nurl = \"http://localhost:8080\"\n",
            tmp.path().display()
        );
        let config = load_config(&write_config(tmp.path(), &body)).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }
}
