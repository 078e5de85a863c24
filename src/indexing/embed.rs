//! Embedding provider seam and the bounded embedding pool.
//!
//! The provider is external and latency bound, so batches are fanned out
//! over a fixed-size rayon pool. Results are collected over a channel
//! with an optional deadline; chunks still outstanding when it passes are
//! reported as timed out and simply not admitted.
//!
//! A timed-out batch is cancelled: its queued jobs return without calling
//! the provider, and the pool is replaced so the next batch does not wait
//! behind calls that are still running. The old pool's threads exit once
//! their current call returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};

/// Errors reported by an embedding provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Embedding provider failed: {0}")]
    Provider(String),

    #[error("Embedding did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Embedding worker stopped before returning a result")]
    WorkerLost,
}

/// Capability to turn text into a fixed-dimension vector.
///
/// Implementations must be thread-safe; the pool calls `embed` from
/// several workers at once. The index neither retries nor rate-limits.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Model name recorded in index metadata.
    fn model_name(&self) -> Option<String> {
        None
    }
}

/// Fixed-size worker pool for embedding calls.
pub struct EmbeddingPool {
    pool: Mutex<Arc<rayon::ThreadPool>>,
    workers: usize,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for EmbeddingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingPool")
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn build_pool(workers: usize) -> IndexResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("orthovec-embed-{i}"))
        .panic_handler(|_| warn!("Embedding worker panicked"))
        .build()
        .map_err(|e| IndexError::Config {
            reason: format!("Failed to start embedding pool: {e}"),
        })
}

impl EmbeddingPool {
    pub fn new(workers: usize, timeout: Option<Duration>) -> IndexResult<Self> {
        let workers = workers.max(1);
        Ok(Self {
            pool: Mutex::new(Arc::new(build_pool(workers)?)),
            workers,
            timeout,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Swaps in fresh workers, leaving `stale` to drain on its own.
    fn replace_pool(&self, stale: &Arc<rayon::ThreadPool>) {
        let mut current = self.pool.lock();
        // Another batch may already have replaced it
        if !Arc::ptr_eq(&current, stale) {
            return;
        }
        match build_pool(self.workers) {
            Ok(fresh) => *current = Arc::new(fresh),
            Err(e) => warn!("Keeping busy embedding pool: {e}"),
        }
    }

    /// Embeds every text, returning results in input order.
    pub fn embed_all(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        texts: Vec<String>,
    ) -> Vec<Result<Vec<f32>, EmbedError>> {
        let total = texts.len();
        if total == 0 {
            return Vec::new();
        }

        let pool = Arc::clone(&self.pool.lock());
        let cancelled = Arc::new(AtomicBool::new(false));

        let (tx, rx) = unbounded();
        for (slot, text) in texts.into_iter().enumerate() {
            let tx = tx.clone();
            let provider = Arc::clone(provider);
            let cancelled = Arc::clone(&cancelled);
            pool.spawn(move || {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let result = provider.embed(&text);
                // The receiver is gone once the deadline has passed
                let _ = tx.send((slot, result));
            });
        }
        drop(tx);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut results: Vec<Option<Result<Vec<f32>, EmbedError>>> = vec![None; total];
        let mut received = 0;
        let mut timed_out = false;

        while received < total {
            let next = match deadline {
                Some(at) => rx.recv_deadline(at),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok((slot, result)) => {
                    results[slot] = Some(result);
                    received += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Embedding batch timed out with {} of {} chunks outstanding",
                        total - received,
                        total
                    );
                    timed_out = true;
                    cancelled.store(true, Ordering::Release);
                    self.replace_pool(&pool);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Embedded {received} of {total} chunks");
        let timeout = self.timeout;
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| match timeout {
                    Some(t) if timed_out => Err(EmbedError::Timeout(t)),
                    _ => Err(EmbedError::WorkerLost),
                })
            })
            .collect()
    }
}

#[cfg(feature = "fastembed")]
pub use fast::FastEmbedProvider;

#[cfg(feature = "fastembed")]
mod fast {
    use super::{EmbedError, EmbeddingProvider};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;

    /// Local fastembed model, 768 dimensions (nomic-embed-text v1.5).
    pub struct FastEmbedProvider {
        model: Mutex<TextEmbedding>,
        dimension: usize,
    }

    impl FastEmbedProvider {
        /// Loads the model, downloading it into `cache_dir` on first use.
        pub fn new(cache_dir: std::path::PathBuf, show_progress: bool) -> Result<Self, EmbedError> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(show_progress),
            )
            .map_err(|e| {
                EmbedError::Provider(format!(
                    "Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download"
                ))
            })?;

            Ok(Self {
                model: Mutex::new(model),
                dimension: 768,
            })
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let mut embeddings = self
                .model
                .lock()
                .embed(vec![text.to_string()], None)
                .map_err(|e| EmbedError::Provider(format!("Failed to generate embedding: {e}")))?;
            embeddings
                .pop()
                .ok_or_else(|| EmbedError::Provider("Model returned no embedding".to_string()))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> Option<String> {
            Some("nomic-embed-text-v1.5".to_string())
        }
    }
}
