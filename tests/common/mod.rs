#![allow(dead_code)]

use orthovec::indexing::{ChunkSource, EmbedError, EmbeddingProvider};
use orthovec::{Chunk, ChunkId, IndexError, IndexResult, OrthoIndex, Settings, calculate_hash};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Embedder that answers from a text -> vector script.
///
/// Unscripted texts fail, so a test that forgets a vector notices.
pub struct ScriptedEmbedder {
    dimension: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    embedded: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            dimension,
            vectors: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            embedded: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().insert(text.to_string(), vector);
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().insert(text.to_string());
    }

    /// Makes embedding `text` take at least `delay`.
    pub fn delay_on(&self, text: &str, delay: Duration) {
        self.delays.lock().insert(text.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded so far, sorted.
    pub fn embedded_texts(&self) -> Vec<String> {
        let mut texts = self.embedded.lock().clone();
        texts.sort();
        texts
    }

    pub fn reset(&self) {
        self.embedded.lock().clear();
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for ScriptedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded.lock().push(text.to_string());

        let delay = self.delays.lock().get(text).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failing.lock().contains(text) {
            return Err(EmbedError::Provider(format!("scripted failure for {text:?}")));
        }
        self.vectors
            .lock()
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedError::Provider(format!("no vector scripted for {text:?}")))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> Option<String> {
        Some("scripted".to_string())
    }
}

/// Chunk source whose content is set directly by the test.
#[derive(Default)]
pub struct MemorySource {
    files: Mutex<HashMap<PathBuf, Vec<Chunk>>>,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the content of `path` with `(chunk_id, text)` pairs.
    pub fn set(&self, path: &str, chunks: &[(&str, &str)]) {
        let chunks = chunks
            .iter()
            .map(|(id, text)| chunk(path, id, text))
            .collect();
        self.files.lock().insert(PathBuf::from(path), chunks);
    }

    pub fn delete(&self, path: &str) {
        self.files.lock().remove(Path::new(path));
    }
}

impl ChunkSource for MemorySource {
    fn source_key(&self, path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn read_chunks(&self, path: &Path) -> IndexResult<Vec<Chunk>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| IndexError::SourceRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not in memory source"),
            })
    }
}

pub fn chunk(source_path: &str, id: &str, text: &str) -> Chunk {
    Chunk {
        chunk_id: ChunkId::new(id),
        content_hash: calculate_hash(text),
        source_path: source_path.to_string(),
        last_modified: 0,
        line_range: None,
        text: text.to_string(),
    }
}

/// Unit vector along `axis`.
pub fn axis(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[axis] = 1.0;
    v
}

/// Unit vector in the plane of axes 0 and 1 with cosine `cos` to axis 0.
pub fn at_cosine(dimension: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[0] = cos;
    v[1] = (1.0 - cos * cos).sqrt();
    v
}

pub fn test_settings(dir: &TempDir, dimension: usize) -> Settings {
    let mut settings = Settings::default();
    settings.index_path = dir.path().join("index");
    settings.workspace_root = Some(dir.path().to_path_buf());
    settings.dimension = dimension;
    settings.indexing.embed_workers = 2;
    settings
}

pub struct TestIndex {
    pub dir: TempDir,
    pub settings: Settings,
    pub embedder: Arc<ScriptedEmbedder>,
    pub source: Arc<MemorySource>,
    pub index: OrthoIndex,
}

impl TestIndex {
    pub fn new(dimension: usize) -> Self {
        Self::with_settings(dimension, |_| {})
    }

    pub fn with_settings(dimension: usize, configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut settings = test_settings(&dir, dimension);
        configure(&mut settings);

        let embedder = ScriptedEmbedder::new(dimension);
        let source = MemorySource::new();
        let index = OrthoIndex::open(&settings, embedder.clone(), source.clone())
            .expect("Failed to open index");

        Self {
            dir,
            settings,
            embedder,
            source,
            index,
        }
    }

    /// Drops the open index and opens the same directory again.
    pub fn reopen(self) -> Self {
        let Self {
            dir,
            settings,
            embedder,
            source,
            index,
        } = self;
        drop(index);
        let index = OrthoIndex::open(&settings, embedder.clone(), source.clone())
            .expect("Failed to reopen index");
        Self {
            dir,
            settings,
            embedder,
            source,
            index,
        }
    }

    pub fn assert_consistent(&self) {
        let report = self.index.verify();
        assert!(report.is_consistent(), "index and store disagree: {report:?}");
        assert_eq!(report.index_live, self.index.stats().live_count);
    }
}
