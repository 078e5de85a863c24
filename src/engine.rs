//! The orthogonal vector index: one store, one similarity index, one
//! mutation path.
//!
//! # Concurrency
//! All mutations (admission, tombstoning, rebuild, compaction) take the
//! mutation lock and therefore run one at a time. File indexing embeds
//! before taking it and re-plans under it, so a slow provider does not hold
//! up other mutations; chunks the re-plan adds are embedded under the lock.
//! Searches never take it:
//! they load the current index snapshot and read the store's state, both
//! of which are swapped rather than edited under readers. A rebuild is
//! built off to the side and published in one swap, so a search sees
//! either the old index or the new one in full.
//!
//! # Recovery
//! On open, the index is built from the settled live records, then every
//! record whose index insert was never confirmed is inserted and
//! confirmed before `open` returns.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::Settings;
use crate::admission::{AdmissionController, AdmissionDecision, Candidate};
use crate::analysis::{OrthogonalityReport, analyze};
use crate::error::{IndexError, IndexResult, store_io};
use crate::indexing::{
    ChunkSource, EmbedError, EmbeddingPool, EmbeddingProvider, FileWalker, FsChunkSource,
    IncrementalIndexer, IndexSummary, ReindexPlan,
};
use crate::query::{QueryService, SearchResult};
use crate::storage::{Chunk, IndexMetadata, RecordStore, SourceFilter, StoreOptions};
use crate::types::{ChunkId, RecordId};
use crate::vector::{FlatIndex, IndexSnapshot, VectorDimension};

/// Counts describing the current index state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub live_count: usize,
    pub tombstoned_count: usize,
    pub pending_count: usize,
    /// Removed ids still occupying index rows until the next rebuild
    pub excluded_count: usize,
    pub dimension: usize,
    pub threshold: f32,
    pub admission_enabled: bool,
}

/// Result of comparing the index against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub index_live: usize,
    pub store_live: usize,
    /// Live in the store but not searchable
    pub missing_from_index: Vec<RecordId>,
    /// Searchable but not live in the store
    pub missing_from_store: Vec<RecordId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.missing_from_store.is_empty()
    }
}

/// Embedding results by chunk text.
type EmbeddingCache = HashMap<String, Result<Vec<f32>, EmbedError>>;

/// Current chunks of one source, read before planning.
struct SourceSnapshot {
    path: PathBuf,
    key: String,
    chunks: Vec<Chunk>,
}

/// Outcome of indexing several files in one pass.
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub files: Vec<(PathBuf, IndexSummary)>,
    pub failed: Vec<(PathBuf, IndexError)>,
    pub total: IndexSummary,
}

pub struct OrthoIndex {
    dir: PathBuf,
    metadata: Mutex<IndexMetadata>,
    store: RecordStore,
    index: IndexSnapshot,
    controller: AdmissionController,
    query: QueryService,
    embedder: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn ChunkSource>,
    pool: EmbeddingPool,
    walker: FileWalker,
    rebuild_ratio: f32,
    parallel_threshold: usize,
    /// Serializes every mutation
    mutation: Mutex<()>,
}

impl std::fmt::Debug for OrthoIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrthoIndex")
            .field("dir", &self.dir)
            .field("store", &self.store)
            .field("controller", &self.controller)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl OrthoIndex {
    /// Opens or creates the index described by `settings`.
    pub fn open(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn ChunkSource>,
    ) -> IndexResult<Self> {
        settings.validate()?;
        let dir = settings.resolved_index_path();
        std::fs::create_dir_all(&dir).map_err(store_io("create index directory", &dir))?;

        let metadata = Self::load_or_create_metadata(&dir, settings, embedder.as_ref())?;
        let dimension = VectorDimension::new(metadata.dimension)?;
        if embedder.dimension() != dimension.get() {
            return Err(IndexError::DimensionMismatch {
                expected: dimension.get(),
                actual: embedder.dimension(),
            });
        }

        let store = RecordStore::open(
            &dir,
            dimension,
            StoreOptions {
                sync_writes: settings.store.sync_writes,
                tombstone_retention_secs: settings.store.tombstone_retention_secs,
            },
        )?;

        let parallel_threshold = settings.index.parallel_search_threshold;
        let index = Self::build_index(&store, dimension, parallel_threshold)?;

        let engine = Self {
            controller: AdmissionController::new(
                metadata.threshold,
                settings.admission.enabled,
                settings.index.normalize,
            ),
            query: QueryService::new(
                settings.query.overfetch_factor,
                settings.query.max_retries,
                settings.index.normalize,
            ),
            pool: EmbeddingPool::new(
                settings.indexing.embed_workers,
                settings.indexing.embed_timeout(),
            )?,
            walker: FileWalker::new(Arc::new(settings.clone())),
            metadata: Mutex::new(metadata),
            dir,
            store,
            index: IndexSnapshot::new(index),
            embedder,
            source,
            rebuild_ratio: settings.index.rebuild_ratio,
            parallel_threshold,
            mutation: Mutex::new(()),
        };

        Ok(engine)
    }

    /// Opens the index with the file system chunk source.
    pub fn open_with_fs_source(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> IndexResult<Self> {
        let mut source = FsChunkSource::new(settings.indexing.chunk_lines);
        if let Some(root) = &settings.workspace_root {
            source = source.with_root(root);
        }
        Self::open(settings, embedder, Arc::new(source))
    }

    fn load_or_create_metadata(
        dir: &Path,
        settings: &Settings,
        embedder: &dyn EmbeddingProvider,
    ) -> IndexResult<IndexMetadata> {
        if !IndexMetadata::exists(dir) {
            let metadata = IndexMetadata::new(
                settings.dimension,
                settings.admission.threshold,
                embedder.model_name(),
            );
            metadata.save(dir)?;
            info!(
                "Created index at {} (dimension {}, threshold {})",
                dir.display(),
                metadata.dimension,
                metadata.threshold
            );
            return Ok(metadata);
        }

        let metadata = IndexMetadata::load(dir)?;
        if metadata.dimension != settings.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: metadata.dimension,
                actual: settings.dimension,
            });
        }
        if (metadata.threshold - settings.admission.threshold).abs() > f32::EPSILON {
            warn!(
                "Configured threshold {} ignored, index was created with {}",
                settings.admission.threshold, metadata.threshold
            );
        }
        Ok(metadata)
    }

    /// Builds the index from settled records, then replays pending inserts.
    fn build_index(
        store: &RecordStore,
        dimension: VectorDimension,
        parallel_threshold: usize,
    ) -> IndexResult<FlatIndex> {
        let live = store.live_records();
        let settled = live
            .iter()
            .filter(|r| !store.is_pending(r.record_id))
            .map(|r| (r.record_id, r.vector.as_slice()));
        let mut index = FlatIndex::from_live(dimension, parallel_threshold, settled)?;

        let pending = store.pending_records();
        if !pending.is_empty() {
            for record in &pending {
                index.insert(record.record_id, &record.vector)?;
            }
            let ids: Vec<RecordId> = pending.iter().map(|r| r.record_id).collect();
            store.mark_indexed(&ids)?;
            info!("Recovered {} pending index inserts", ids.len());
        }

        Ok(index)
    }

    /// Re-chunks `path` and applies the minimal delta.
    pub fn index_file(&self, path: &Path) -> IndexResult<IndexSummary> {
        let snapshot = self.read_source(path)?;
        let mut cache = EmbeddingCache::new();
        self.embed_missing(&[&self.plan(&snapshot)], &mut cache);

        let _guard = self.mutation.lock();
        let plan = self.plan(&snapshot);
        self.embed_missing(&[&plan], &mut cache);
        let embeddings = Self::take_embeddings(&plan, &cache);
        let summary = IncrementalIndexer::apply(
            plan,
            embeddings,
            &self.controller,
            &self.store,
            &self.index,
        )?;
        self.rebuild_if_needed()?;
        Ok(summary)
    }

    /// Indexes many files, embedding all of their changed chunks on the
    /// pool in one batch. A failing file does not stop the others.
    pub fn index_files(&self, paths: &[PathBuf]) -> BulkSummary {
        let mut bulk = BulkSummary::default();

        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read_source(path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!("Failed to read {}: {e}", path.display());
                    bulk.failed.push((path.clone(), e));
                }
            }
        }

        let mut cache = EmbeddingCache::new();
        let drafts: Vec<ReindexPlan> = snapshots.iter().map(|s| self.plan(s)).collect();
        self.embed_missing(&drafts.iter().collect::<Vec<_>>(), &mut cache);

        let _guard = self.mutation.lock();
        let plans: Vec<ReindexPlan> = snapshots.iter().map(|s| self.plan(s)).collect();
        self.embed_missing(&plans.iter().collect::<Vec<_>>(), &mut cache);

        for (snapshot, plan) in snapshots.into_iter().zip(plans) {
            let embeddings = Self::take_embeddings(&plan, &cache);
            match IncrementalIndexer::apply(
                plan,
                embeddings,
                &self.controller,
                &self.store,
                &self.index,
            ) {
                Ok(summary) => {
                    bulk.total.merge(&summary);
                    bulk.files.push((snapshot.path, summary));
                }
                Err(e) => {
                    warn!("Failed to index {}: {e}", snapshot.path.display());
                    bulk.failed.push((snapshot.path, e));
                }
            }
        }

        if let Err(e) = self.rebuild_if_needed() {
            warn!("Rebuild after bulk indexing failed: {e}");
        }
        bulk
    }

    /// Indexes every matching file under `root`.
    pub fn index_directory(&self, root: &Path) -> BulkSummary {
        let paths: Vec<PathBuf> = self.walker.walk(root).collect();
        info!("Found {} files under {}", paths.len(), root.display());
        self.index_files(&paths)
    }

    fn read_source(&self, path: &Path) -> IndexResult<SourceSnapshot> {
        Ok(SourceSnapshot {
            path: path.to_path_buf(),
            key: self.source.source_key(path),
            chunks: self.source.read_chunks(path)?,
        })
    }

    fn plan(&self, snapshot: &SourceSnapshot) -> ReindexPlan {
        IncrementalIndexer::plan(&snapshot.key, snapshot.chunks.clone(), &self.store)
    }

    /// Embeds every planned chunk whose content is not cached yet.
    fn embed_missing(&self, plans: &[&ReindexPlan], cache: &mut EmbeddingCache) {
        let mut queued = HashSet::new();
        let texts: Vec<String> = plans
            .iter()
            .flat_map(|plan| &plan.work)
            .map(|planned| &planned.chunk.text)
            .filter(|text| !cache.contains_key(*text) && queued.insert(*text))
            .cloned()
            .collect();

        let results = self.pool.embed_all(&self.embedder, texts.clone());
        cache.extend(texts.into_iter().zip(results));
    }

    fn take_embeddings(
        plan: &ReindexPlan,
        cache: &EmbeddingCache,
    ) -> Vec<Result<Vec<f32>, EmbedError>> {
        plan.work
            .iter()
            .map(|planned| {
                cache
                    .get(&planned.chunk.text)
                    .cloned()
                    .unwrap_or(Err(EmbedError::WorkerLost))
            })
            .collect()
    }

    /// Tombstones every live record of `path`.
    pub fn remove_file(&self, path: &Path) -> IndexResult<usize> {
        let _guard = self.mutation.lock();
        let key = self.source.source_key(path);
        let removed = IncrementalIndexer::remove_source(&key, &self.store, &self.index)?;
        self.rebuild_if_needed()?;
        Ok(removed)
    }

    /// Routes one pre-embedded candidate through admission.
    pub fn admit(&self, candidate: Candidate) -> IndexResult<AdmissionDecision> {
        let _guard = self.mutation.lock();
        let decision = self.controller.admit(candidate, &self.store, &self.index)?;
        self.rebuild_if_needed()?;
        Ok(decision)
    }

    /// Tombstones one chunk; a no-op when it is not live.
    pub fn tombstone(&self, chunk_id: &ChunkId) -> IndexResult<bool> {
        let _guard = self.mutation.lock();
        let removed = match self.store.tombstone(chunk_id)? {
            Some(record_id) => {
                self.index.update(|idx| idx.remove(record_id));
                true
            }
            None => false,
        };
        self.rebuild_if_needed()?;
        Ok(removed)
    }

    /// Ranked search over live content; never waits on mutations.
    pub fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> IndexResult<Vec<SearchResult>> {
        self.query
            .search(&self.index, &self.store, query_vector, k, filter)
    }

    /// Embeds `text` with the configured provider and searches with it.
    pub fn search_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> IndexResult<Vec<SearchResult>> {
        let vector = self
            .embedder
            .embed(text)
            .map_err(|source| IndexError::Embed {
                chunk_id: ChunkId::new("query"),
                source,
            })?;
        self.search(&vector, k, filter)
    }

    pub fn stats(&self) -> IndexStats {
        let index = self.index.load();
        IndexStats {
            live_count: self.store.live_count(),
            tombstoned_count: self.store.tombstoned_count(),
            pending_count: self.store.pending_count(),
            excluded_count: index.excluded_len(),
            dimension: self.store.dimension().get(),
            threshold: self.controller.threshold(),
            admission_enabled: self.controller.is_enabled(),
        }
    }

    /// Drops expired tombstones from the store, then rebuilds the index.
    pub fn compact(&self) -> IndexResult<usize> {
        let _guard = self.mutation.lock();
        let removed = self.store.compact()?;
        if removed > 0 || self.index.load().excluded_len() > 0 {
            self.rebuild_locked()?;
        }
        self.touch_metadata();
        Ok(removed)
    }

    /// Replaces the index with one built from the store's live records.
    pub fn rebuild(&self) -> IndexResult<()> {
        let _guard = self.mutation.lock();
        self.rebuild_locked()?;
        self.touch_metadata();
        Ok(())
    }

    fn rebuild_if_needed(&self) -> IndexResult<()> {
        if self.index.load().needs_rebuild(self.rebuild_ratio) {
            self.rebuild_locked()?;
        }
        Ok(())
    }

    /// Caller must hold the mutation lock.
    fn rebuild_locked(&self) -> IndexResult<()> {
        let live = self.store.live_records();
        let rebuilt = FlatIndex::from_live(
            self.store.dimension(),
            self.parallel_threshold,
            live.iter().map(|r| (r.record_id, r.vector.as_slice())),
        )?;
        let old = self.index.swap(rebuilt);
        info!(
            "Rebuilt similarity index: {} rows reclaimed, {} live",
            old.physical_len().saturating_sub(live.len()),
            live.len()
        );
        Ok(())
    }

    fn touch_metadata(&self) {
        let mut metadata = self.metadata.lock();
        metadata.touch();
        if let Err(e) = metadata.save(&self.dir) {
            warn!("Failed to update index metadata: {e}");
        }
    }

    /// Compares live ids in the index against live records in the store.
    pub fn verify(&self) -> ConsistencyReport {
        let index = self.index.load();
        let indexed: BTreeSet<RecordId> = index.live_ids().collect();
        let stored: BTreeSet<RecordId> = self
            .store
            .live_records()
            .iter()
            .map(|r| r.record_id)
            .collect();

        ConsistencyReport {
            index_live: indexed.len(),
            store_live: stored.len(),
            missing_from_index: stored.difference(&indexed).copied().collect(),
            missing_from_store: indexed.difference(&stored).copied().collect(),
        }
    }

    /// Pairwise similarity report over live records.
    pub fn analyze(
        &self,
        filter: Option<&SourceFilter>,
        max_sample: usize,
    ) -> OrthogonalityReport {
        let records: Vec<_> = match filter {
            Some(filter) => self.store.scan_matching(filter.clone()).collect(),
            None => self.store.live_records(),
        };
        analyze(&records, self.controller.threshold(), max_sample)
    }

    pub fn metadata(&self) -> IndexMetadata {
        self.metadata.lock().clone()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
