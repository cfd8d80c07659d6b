#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use notegate::app::Services;
use notegate::config::{Config, StoreBackend};
use notegate::embedding::Embedder;
use notegate::error::{Error, Result};

const DIMS: usize = 256;

/// Deterministic bag-of-words embedder: each lowercase word bumps one of
/// `DIMS` buckets chosen by an FNV-1a hash.
#[derive(Default)]
pub struct BagOfWords {
    calls: AtomicUsize,
    down: AtomicBool,
}

impl BagOfWords {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

#[async_trait]
impl Embedder for BagOfWords {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingServiceUnavailable("connection refused".into()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub config: Config,
    pub embedder: Arc<BagOfWords>,
}

impl TestEnv {
    pub fn new(backend: StoreBackend) -> Self {
        let tmp = TempDir::new().unwrap();
        let notes = tmp.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        let mut config = Config::with_root(&notes, tmp.path().join("state"), "http://127.0.0.1:9");
        config.store.backend = backend;
        Self {
            tmp,
            config,
            embedder: Arc::new(BagOfWords::default()),
        }
    }

    pub async fn services(&self) -> Services {
        Services::open_with_embedder(&self.config, self.embedder.clone())
            .await
            .unwrap()
    }
}

pub fn write_file(root: &Path, rel: &str, body: &str) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    path
}

/// `len` ASCII characters of prose starting with `lead`.
pub fn prose(lead: &str, len: usize) -> String {
    let mut body = format!("{lead} ");
    while body.len() < len {
        body.push_str("lorem ipsum dolor sit amet ");
    }
    body.truncate(len);
    body
}
