use crate::common::{MemorySource, ScriptedEmbedder, TestIndex, axis, chunk, test_settings};
use orthovec::storage::{JOURNAL_FILE, METADATA_FILE, StoreOptions};
use orthovec::{Candidate, ChunkId, IndexMetadata, OrthoIndex, RecordStore, VectorDimension};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_pending_inserts_are_recovered_on_open() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir, 4);
    let index_dir = settings.resolved_index_path();

    // A put whose index insert never happened
    std::fs::create_dir_all(&index_dir).unwrap();
    {
        let store = RecordStore::open(
            &index_dir,
            VectorDimension::new(4).unwrap(),
            StoreOptions::default(),
        )
        .unwrap();
        store.put(chunk("a.rs", "orphan", "orphan"), axis(4, 2)).unwrap();
        assert_eq!(store.pending_count(), 1);
    }

    let index = OrthoIndex::open(&settings, ScriptedEmbedder::new(4), MemorySource::new()).unwrap();
    let stats = index.stats();
    assert_eq!(stats.live_count, 1);
    assert_eq!(stats.pending_count, 0);
    assert!(index.verify().is_consistent());

    let results = index.search(&axis(4, 2), 1, None).unwrap();
    assert_eq!(results[0].chunk_id, ChunkId::new("orphan"));

    // Recovery is recorded, so a second open has nothing to replay
    drop(index);
    let store = RecordStore::open(
        &index_dir,
        VectorDimension::new(4).unwrap(),
        StoreOptions::default(),
    )
    .unwrap();
    assert_eq!(store.pending_count(), 0);
}

#[test]
fn test_reopen_restores_live_state() {
    let t = TestIndex::new(4);
    t.embedder.script("one", axis(4, 0));
    t.embedder.script("two", axis(4, 1));
    t.source.set("a.rs", &[("1", "one"), ("2", "two")]);
    t.index.index_file(Path::new("a.rs")).unwrap();
    t.index.tombstone(&ChunkId::new("1")).unwrap();

    let t = t.reopen();
    let stats = t.index.stats();
    assert_eq!(stats.live_count, 1);
    assert_eq!(stats.tombstoned_count, 1);
    assert_eq!(stats.threshold, 0.85);
    t.assert_consistent();

    // Unchanged content is still recognised after reopening
    t.embedder.reset();
    t.source.set("a.rs", &[("2", "two")]);
    assert!(t.index.index_file(Path::new("a.rs")).unwrap().is_noop());
    assert_eq!(t.embedder.calls(), 0);
}

#[test]
fn test_torn_journal_tail_is_truncated() {
    let t = TestIndex::new(4);
    t.index
        .admit(Candidate::new(chunk("a.rs", "kept", "kept"), axis(4, 0)))
        .unwrap();

    let journal = t.index.dir().join(JOURNAL_FILE);
    let len_before = std::fs::metadata(&journal).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        // A frame header promising more bytes than were written
        file.write_all(&[64, 0, 0, 0, 1, 2, 3, 4, 9, 9]).unwrap();
    }

    let t = t.reopen();
    assert_eq!(t.index.stats().live_count, 1);
    assert_eq!(std::fs::metadata(&journal).unwrap().len(), len_before);
    t.assert_consistent();
}

#[test]
fn test_corruption_before_the_tail_is_an_error() {
    let t = TestIndex::new(4);
    t.index
        .admit(Candidate::new(chunk("a.rs", "x", "x"), axis(4, 0)))
        .unwrap();
    t.index
        .admit(Candidate::new(chunk("a.rs", "y", "y"), axis(4, 1)))
        .unwrap();

    let journal = t.index.dir().join(JOURNAL_FILE);
    let settings = t.settings.clone();
    let TestIndex { dir, index, .. } = t;
    drop(index);

    let mut bytes = std::fs::read(&journal).unwrap();
    // First payload byte after the 16 byte header and 8 byte frame header
    bytes[16 + 8] ^= 0xFF;
    std::fs::write(&journal, bytes).unwrap();

    let err = OrthoIndex::open(&settings, ScriptedEmbedder::new(4), MemorySource::new())
        .unwrap_err();
    assert_eq!(err.status_code(), "INDEX_CORRUPTED");
    drop(dir);
}

#[test]
fn test_compaction_survives_reopen_and_keeps_ids_increasing() {
    let t = TestIndex::with_settings(4, |s| s.store.tombstone_retention_secs = 0);
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        t.index
            .admit(Candidate::new(chunk("a.rs", id, id), axis(4, i)))
            .unwrap();
    }
    let highest = t
        .index
        .store()
        .get_by_chunk(&ChunkId::new("c"))
        .unwrap()
        .record_id;
    t.index.tombstone(&ChunkId::new("a")).unwrap();
    t.index.tombstone(&ChunkId::new("c")).unwrap();

    assert_eq!(t.index.compact().unwrap(), 2);
    let stats = t.index.stats();
    assert_eq!(stats.tombstoned_count, 0);
    assert_eq!(stats.excluded_count, 0);

    let t = t.reopen();
    assert_eq!(t.index.stats().live_count, 1);
    assert_eq!(t.index.stats().tombstoned_count, 0);
    t.assert_consistent();

    let decision = t
        .index
        .admit(Candidate::new(chunk("a.rs", "d", "d"), axis(4, 3)))
        .unwrap();
    match decision {
        orthovec::AdmissionDecision::Admitted { record_id, .. } => assert!(record_id > highest),
        other => panic!("expected admission, got {other:?}"),
    }
}

#[test]
fn test_compaction_keeps_recent_tombstones() {
    let t = TestIndex::new(4);
    t.index
        .admit(Candidate::new(chunk("a.rs", "a", "a"), axis(4, 0)))
        .unwrap();
    t.index.tombstone(&ChunkId::new("a")).unwrap();

    assert_eq!(t.index.compact().unwrap(), 0);
    assert_eq!(t.index.stats().tombstoned_count, 1);
}

#[test]
fn test_rebuild_reclaims_excluded_rows() {
    // A high ratio keeps removals from triggering rebuilds on their own
    let t = TestIndex::with_settings(4, |s| s.index.rebuild_ratio = 10.0);
    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        t.index
            .admit(Candidate::new(chunk("a.rs", id, id), axis(4, i)))
            .unwrap();
    }
    t.index.tombstone(&ChunkId::new("a")).unwrap();
    t.index.tombstone(&ChunkId::new("b")).unwrap();
    assert_eq!(t.index.stats().excluded_count, 2);

    let before = t.index.search(&axis(4, 2), 4, None).unwrap();
    t.index.rebuild().unwrap();
    let after = t.index.search(&axis(4, 2), 4, None).unwrap();

    assert_eq!(t.index.stats().excluded_count, 0);
    assert_eq!(before, after);
    t.assert_consistent();
}

#[test]
fn test_metadata_is_persisted() {
    let t = TestIndex::new(4);
    assert!(t.index.dir().join(METADATA_FILE).exists());

    let metadata = IndexMetadata::load(t.index.dir()).unwrap();
    assert_eq!(metadata.dimension, 4);
    assert_eq!(metadata.threshold, 0.85);
    assert_eq!(metadata.embedding_model.as_deref(), Some("scripted"));
}
