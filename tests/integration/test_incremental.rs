use crate::common::{TestIndex, axis};
use orthovec::{ChunkId, IndexSummary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const DIM: usize = 8;

fn script_axes(t: &TestIndex, texts: &[&str]) {
    for (i, text) in texts.iter().enumerate() {
        t.embedder.script(text, axis(DIM, i));
    }
}

#[test]
fn test_reindex_unchanged_file_is_noop() {
    let t = TestIndex::new(DIM);
    script_axes(&t, &["alpha", "beta"]);
    t.source.set("a.rs", &[("a", "alpha"), ("b", "beta")]);

    let first = t.index.index_file(Path::new("a.rs")).unwrap();
    assert_eq!(first.inserted, 2);

    t.embedder.reset();
    let second = t.index.index_file(Path::new("a.rs")).unwrap();
    assert!(second.is_noop());
    assert_eq!(second.unchanged, 2);
    assert_eq!(t.embedder.calls(), 0);
    t.assert_consistent();
}

#[test]
fn test_only_changed_chunks_are_embedded() {
    let t = TestIndex::new(DIM);
    script_axes(&t, &["A", "B", "C", "D"]);

    t.source.set("doc.md", &[("a", "A"), ("b", "B"), ("c", "C")]);
    t.index.index_file(Path::new("doc.md")).unwrap();

    t.embedder.reset();
    t.source.set("doc.md", &[("a", "A"), ("c", "C"), ("d", "D")]);
    let summary = t.index.index_file(Path::new("doc.md")).unwrap();

    assert_eq!(
        summary,
        IndexSummary {
            inserted: 1,
            updated: 0,
            removed: 1,
            unchanged: 2,
            rejected_as_duplicate: 0,
            embed_failures: 0,
        }
    );
    assert_eq!(t.embedder.embedded_texts(), vec!["D".to_string()]);
    assert!(t.index.store().get_by_chunk(&ChunkId::new("b")).is_none());
    t.assert_consistent();
}

#[test]
fn test_embed_failure_skips_only_that_chunk() {
    let t = TestIndex::new(DIM);
    script_axes(&t, &["good", "bad", "fine"]);
    t.embedder.fail_on("bad");
    t.source.set("a.rs", &[("1", "good"), ("2", "bad"), ("3", "fine")]);

    let summary = t.index.index_file(Path::new("a.rs")).unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.embed_failures, 1);

    // The failed chunk is retried on the next pass
    t.embedder.reset();
    let retry = t.index.index_file(Path::new("a.rs")).unwrap();
    assert_eq!(t.embedder.embedded_texts(), vec!["bad".to_string()]);
    assert_eq!(retry.embed_failures, 1);
    assert_eq!(retry.unchanged, 2);
}

#[test]
fn test_wrong_dimension_from_provider_counts_as_failure() {
    let t = TestIndex::new(DIM);
    t.embedder.script("ok", axis(DIM, 0));
    t.embedder.script("short", vec![1.0, 0.0]);
    t.source.set("a.rs", &[("1", "ok"), ("2", "short")]);

    let summary = t.index.index_file(Path::new("a.rs")).unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.embed_failures, 1);
}

#[test]
fn test_changed_chunk_rejected_by_another_drops_stale_copy() {
    let t = TestIndex::new(DIM);
    t.embedder.script("original", axis(DIM, 1));
    t.embedder.script("elsewhere", axis(DIM, 0));
    t.embedder.script("rewritten", axis(DIM, 0));

    t.source.set("other.rs", &[("o", "elsewhere")]);
    t.index.index_file(Path::new("other.rs")).unwrap();
    t.source.set("a.rs", &[("a", "original")]);
    t.index.index_file(Path::new("a.rs")).unwrap();

    // "a" now says what "o" already says
    t.source.set("a.rs", &[("a", "rewritten")]);
    let summary = t.index.index_file(Path::new("a.rs")).unwrap();

    assert_eq!(summary.rejected_as_duplicate, 1);
    assert_eq!(summary.removed, 1);
    assert!(t.index.store().get_by_chunk(&ChunkId::new("a")).is_none());
    assert_eq!(t.index.stats().live_count, 1);
    t.assert_consistent();
}

#[test]
fn test_remove_file_matches_exact_path() {
    let t = TestIndex::new(DIM);
    script_axes(&t, &["one", "two"]);
    t.source.set("src/a.rs", &[("1", "one")]);
    t.source.set("src/a.rs.bak", &[("2", "two")]);
    t.index.index_file(Path::new("src/a.rs")).unwrap();
    t.index.index_file(Path::new("src/a.rs.bak")).unwrap();

    assert_eq!(t.index.remove_file(Path::new("src/a.rs")).unwrap(), 1);
    assert_eq!(t.index.remove_file(Path::new("src/a.rs")).unwrap(), 0);

    let stats = t.index.stats();
    assert_eq!(stats.live_count, 1);
    assert!(t.index.store().get_by_chunk(&ChunkId::new("2")).is_some());
    t.assert_consistent();
}

#[test]
fn test_bulk_indexing_reports_failed_files() {
    let t = TestIndex::new(DIM);
    script_axes(&t, &["x", "y", "z"]);
    t.source.set("a.rs", &[("1", "x"), ("2", "y")]);
    t.source.set("b.rs", &[("3", "z")]);

    let bulk = t.index.index_files(&[
        "a.rs".into(),
        "missing.rs".into(),
        "b.rs".into(),
    ]);

    assert_eq!(bulk.files.len(), 2);
    assert_eq!(bulk.failed.len(), 1);
    assert_eq!(bulk.failed[0].1.status_code(), "SOURCE_READ_ERROR");
    assert_eq!(bulk.total.inserted, 3);
    assert_eq!(t.embedder.calls(), 3);
    t.assert_consistent();
}

#[test]
fn test_random_operations_keep_index_and_store_consistent() {
    let t = TestIndex::with_settings(DIM, |s| s.index.rebuild_ratio = 0.5);
    let texts: Vec<String> = (0..DIM).map(|i| format!("text {i}")).collect();
    for (i, text) in texts.iter().enumerate() {
        t.embedder.script(text, axis(DIM, i));
    }

    let files = ["a.rs", "b.rs", "c.rs"];
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..60 {
        let file = files[rng.random_range(0..files.len())];
        if rng.random_bool(0.25) {
            t.index.remove_file(Path::new(file)).unwrap();
        } else {
            let count = rng.random_range(0..4);
            let chunks: Vec<(String, &str)> = (0..count)
                .map(|slot| {
                    let text = &texts[rng.random_range(0..texts.len())];
                    (format!("{file}#{slot}"), text.as_str())
                })
                .collect();
            let borrowed: Vec<(&str, &str)> =
                chunks.iter().map(|(id, text)| (id.as_str(), *text)).collect();
            t.source.set(file, &borrowed);
            t.index.index_file(Path::new(file)).unwrap();
        }
        t.assert_consistent();
    }
}
