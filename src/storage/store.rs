//! Durable vector record store.
//!
//! The journal is the source of truth; the in-memory state is rebuilt by
//! replaying it on open. Every mutation appends to the journal first and
//! only then applies the same entry to memory, so nothing is visible that
//! is not already durable.
//!
//! State is held behind an `Arc` so scans can iterate a consistent
//! point-in-time view without holding the lock.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::indexing::get_utc_timestamp;
use crate::storage::journal::{Journal, JournalEntry};
use crate::storage::record::{Chunk, SourceFilter, VectorRecord};
use crate::types::{ChunkId, RecordId};
use crate::vector::VectorDimension;

/// Journal file name inside the index directory.
pub const JOURNAL_FILE: &str = "records.log";

/// Durability and retention knobs for the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// fsync every journal append
    pub sync_writes: bool,
    /// Compaction keeps tombstones younger than this
    pub tombstone_retention_secs: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            tombstone_retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// What a successful `put` changed.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub record: Arc<VectorRecord>,
    /// Previously live record for the same chunk, now tombstoned
    pub superseded: Option<RecordId>,
}

#[derive(Debug, Clone)]
struct StoreState {
    /// Every retained record, live or tombstoned.
    records: HashMap<RecordId, Arc<VectorRecord>>,
    /// The single live record per chunk.
    live: HashMap<ChunkId, RecordId>,
    /// Live records ordered by source path.
    by_source: BTreeSet<(String, RecordId)>,
    /// Live records not yet confirmed in the similarity index.
    pending: BTreeSet<RecordId>,
    next_id: RecordId,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            live: HashMap::new(),
            by_source: BTreeSet::new(),
            pending: BTreeSet::new(),
            next_id: RecordId(1),
        }
    }
}

impl StoreState {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Put {
                record,
                supersedes,
                at,
            } => {
                if let Some(old) = supersedes {
                    self.tombstone_record(old, at);
                }
                if let Some(&other) = self.live.get(&record.chunk_id) {
                    self.tombstone_record(other, at);
                }

                let id = record.record_id;
                if id >= self.next_id {
                    self.next_id = id.next();
                }
                self.live.insert(record.chunk_id.clone(), id);
                self.by_source.insert((record.source_path.clone(), id));
                self.pending.insert(id);
                self.records.insert(id, Arc::new(record));
            }
            JournalEntry::Indexed { record_id } => {
                self.pending.remove(&record_id);
            }
            JournalEntry::Tombstone { record_id, at } => {
                self.tombstone_record(record_id, at);
            }
            JournalEntry::Revert { record_id, restore } => {
                self.drop_record(record_id);
                if let Some(old) = restore {
                    self.restore_record(old);
                }
            }
            JournalEntry::Sequence { next_record_id } => {
                if next_record_id > self.next_id {
                    self.next_id = next_record_id;
                }
            }
        }
    }

    fn tombstone_record(&mut self, id: RecordId, at: u64) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        if !record.is_live() {
            return;
        }
        let dead = record.tombstoned(at);
        if self.live.get(&dead.chunk_id) == Some(&id) {
            self.live.remove(&dead.chunk_id);
        }
        self.by_source.remove(&(dead.source_path.clone(), id));
        self.pending.remove(&id);
        self.records.insert(id, Arc::new(dead));
    }

    fn drop_record(&mut self, id: RecordId) {
        let Some(record) = self.records.remove(&id) else {
            return;
        };
        if self.live.get(&record.chunk_id) == Some(&id) {
            self.live.remove(&record.chunk_id);
        }
        self.by_source.remove(&(record.source_path.clone(), id));
        self.pending.remove(&id);
    }

    fn restore_record(&mut self, id: RecordId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        let alive = record.restored();
        self.live.insert(alive.chunk_id.clone(), id);
        self.by_source.insert((alive.source_path.clone(), id));
        self.records.insert(id, Arc::new(alive));
    }

    fn sorted_records<'a>(
        &'a self,
        ids: impl Iterator<Item = &'a RecordId>,
    ) -> Vec<Arc<VectorRecord>> {
        let mut out: Vec<Arc<VectorRecord>> = ids
            .filter_map(|id| self.records.get(id).cloned())
            .collect();
        out.sort_by_key(|r| r.record_id);
        out
    }
}

/// Lazy scan over live records matching a source filter.
///
/// The scan reads from the snapshot taken when it was created; later
/// mutations are not observed. Clone it or call [`LiveScan::restart`]
/// to iterate again.
#[derive(Debug, Clone)]
pub struct LiveScan {
    state: Arc<StoreState>,
    filter: SourceFilter,
    cursor: Option<(String, RecordId)>,
    done: bool,
}

impl LiveScan {
    fn new(state: Arc<StoreState>, filter: SourceFilter) -> Self {
        Self {
            state,
            filter,
            cursor: None,
            done: false,
        }
    }

    /// Rewinds to the first matching record.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }
}

impl Iterator for LiveScan {
    type Item = Arc<VectorRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let lower = match self.cursor.take() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Included((self.filter.lower_bound().to_string(), RecordId(0))),
            };
            let next = self
                .state
                .by_source
                .range((lower, Bound::Unbounded))
                .next()
                .cloned();

            // Matching paths are contiguous from the lower bound
            let Some(key) = next.filter(|(path, _)| self.filter.matches(path)) else {
                self.done = true;
                break;
            };

            let record = self.state.records.get(&key.1).cloned();
            self.cursor = Some(key);
            if record.is_some() {
                return record;
            }
        }
        None
    }
}

/// Durable mapping from chunk identity to its live vector record.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    dimension: VectorDimension,
    options: StoreOptions,
    state: RwLock<Arc<StoreState>>,
    journal: Mutex<Journal>,
}

impl RecordStore {
    /// Opens the store in `dir`, replaying its journal.
    pub fn open(
        dir: impl AsRef<Path>,
        dimension: VectorDimension,
        options: StoreOptions,
    ) -> IndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let journal_path = dir.join(JOURNAL_FILE);

        Journal::remove_stale_temp(&journal_path)?;
        let (journal, entries) = Journal::open(&journal_path, dimension.get(), options.sync_writes)?;

        let mut state = StoreState::default();
        for entry in entries {
            state.apply(entry);
        }

        info!(
            "Opened record store at {}: {} live, {} tombstoned, {} pending",
            dir.display(),
            state.live.len(),
            state.records.len() - state.live.len(),
            state.pending.len()
        );

        Ok(Self {
            dir,
            dimension,
            options,
            state: RwLock::new(Arc::new(state)),
            journal: Mutex::new(journal),
        })
    }

    fn snapshot(&self) -> Arc<StoreState> {
        Arc::clone(&self.state.read())
    }

    /// Appends `entries` durably, then applies them to memory.
    fn commit(&self, journal: &mut Journal, entries: Vec<JournalEntry>) -> IndexResult<()> {
        journal.append_all(&entries)?;
        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        for entry in entries {
            state.apply(entry);
        }
        Ok(())
    }

    /// Stores `chunk` as the live record for its chunk id.
    ///
    /// A previous live record for the same chunk is tombstoned in the same
    /// journal entry. The new record stays pending until [`mark_indexed`].
    ///
    /// [`mark_indexed`]: RecordStore::mark_indexed
    pub fn put(&self, chunk: Chunk, vector: Vec<f32>) -> IndexResult<PutOutcome> {
        self.dimension.validate_vector(&vector)?;

        let mut journal = self.journal.lock();
        let (record_id, superseded) = {
            let state = self.state.read();
            (state.next_id, state.live.get(&chunk.chunk_id).copied())
        };

        let record = VectorRecord::from_chunk(record_id, chunk, vector);
        debug!(
            "Put record {} for chunk {} (supersedes {:?})",
            record_id, record.chunk_id, superseded
        );
        self.commit(
            &mut journal,
            vec![JournalEntry::Put {
                record,
                supersedes: superseded,
                at: get_utc_timestamp(),
            }],
        )?;

        let record = self
            .state
            .read()
            .records
            .get(&record_id)
            .cloned()
            .ok_or_else(|| IndexError::Corrupted {
                path: self.journal_path(),
                reason: format!("Record {record_id} missing right after put"),
            })?;

        Ok(PutOutcome { record, superseded })
    }

    /// Undoes a `put` whose index insert failed.
    pub fn revert_put(&self, outcome: &PutOutcome) -> IndexResult<()> {
        let mut journal = self.journal.lock();
        self.commit(
            &mut journal,
            vec![JournalEntry::Revert {
                record_id: outcome.record.record_id,
                restore: outcome.superseded,
            }],
        )
    }

    /// Clears the pending marker of records now present in the index.
    pub fn mark_indexed(&self, ids: &[RecordId]) -> IndexResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut journal = self.journal.lock();
        let entries = ids
            .iter()
            .map(|&record_id| JournalEntry::Indexed { record_id })
            .collect();
        self.commit(&mut journal, entries)
    }

    /// Tombstones the live record for `chunk_id`.
    ///
    /// Idempotent: an absent or already deleted chunk returns `Ok(None)`
    /// without touching the journal.
    pub fn tombstone(&self, chunk_id: &ChunkId) -> IndexResult<Option<RecordId>> {
        let mut journal = self.journal.lock();
        let Some(record_id) = self.state.read().live.get(chunk_id).copied() else {
            return Ok(None);
        };

        debug!("Tombstone record {record_id} for chunk {chunk_id}");
        self.commit(
            &mut journal,
            vec![JournalEntry::Tombstone {
                record_id,
                at: get_utc_timestamp(),
            }],
        )?;
        Ok(Some(record_id))
    }

    /// The live record for `chunk_id`.
    pub fn get_by_chunk(&self, chunk_id: &ChunkId) -> Option<Arc<VectorRecord>> {
        let state = self.state.read();
        state
            .live
            .get(chunk_id)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    /// Any retained record, live or tombstoned.
    pub fn get_record(&self, record_id: RecordId) -> Option<Arc<VectorRecord>> {
        self.state.read().records.get(&record_id).cloned()
    }

    /// Live records whose source path starts with `prefix`.
    pub fn scan_live(&self, prefix: &str) -> LiveScan {
        self.scan_matching(SourceFilter::prefix(prefix))
    }

    /// Live records whose source path matches `filter`.
    pub fn scan_matching(&self, filter: SourceFilter) -> LiveScan {
        LiveScan::new(self.snapshot(), filter)
    }

    /// Every live record in ascending id order.
    pub fn live_records(&self) -> Vec<Arc<VectorRecord>> {
        let state = self.snapshot();
        state.sorted_records(state.live.values())
    }

    /// Live records still waiting for their index insert.
    pub fn pending_records(&self) -> Vec<Arc<VectorRecord>> {
        let state = self.snapshot();
        state.sorted_records(state.pending.iter())
    }

    pub fn is_pending(&self, record_id: RecordId) -> bool {
        self.state.read().pending.contains(&record_id)
    }

    /// Physically drops tombstones older than the retention window.
    pub fn compact(&self) -> IndexResult<usize> {
        let cutoff = get_utc_timestamp().saturating_sub(self.options.tombstone_retention_secs);
        self.compact_before(cutoff)
    }

    /// Physically drops tombstones deleted at or before `cutoff`.
    ///
    /// The journal is rewritten to hold only retained records. Live state
    /// is unchanged, and record ids keep increasing from where they were.
    pub fn compact_before(&self, cutoff: u64) -> IndexResult<usize> {
        let mut journal = self.journal.lock();
        let state = self.snapshot();

        let expired: Vec<RecordId> = state
            .records
            .values()
            .filter(|r| r.deleted && r.deleted_at.is_some_and(|at| at <= cutoff))
            .map(|r| r.record_id)
            .collect();
        if expired.is_empty() {
            debug!("Compaction found no expired tombstones");
            return Ok(0);
        }

        let mut retained: Vec<&Arc<VectorRecord>> = state
            .records
            .values()
            .filter(|r| !expired.contains(&r.record_id))
            .collect();
        retained.sort_by_key(|r| r.record_id);

        let mut entries = Vec::with_capacity(retained.len() * 2 + 1);
        entries.push(JournalEntry::Sequence {
            next_record_id: state.next_id,
        });
        for record in retained {
            let id = record.record_id;
            entries.push(JournalEntry::Put {
                record: record.restored(),
                supersedes: None,
                at: record.last_modified,
            });
            if !state.pending.contains(&id) {
                entries.push(JournalEntry::Indexed { record_id: id });
            }
            if let Some(at) = record.deleted_at {
                entries.push(JournalEntry::Tombstone { record_id: id, at });
            }
        }

        *journal = Journal::rewrite(
            journal.path(),
            self.dimension.get(),
            self.options.sync_writes,
            &entries,
        )?;

        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        for id in &expired {
            state.records.remove(id);
        }

        info!(
            "Compacted {} tombstones from {}",
            expired.len(),
            self.dir.display()
        );
        Ok(expired.len())
    }

    pub fn live_count(&self) -> usize {
        self.state.read().live.len()
    }

    pub fn tombstoned_count(&self) -> usize {
        let state = self.state.read();
        state.records.len() - state.live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }
}
