use crate::common::{TestIndex, at_cosine, axis, chunk};
use orthovec::{Candidate, ChunkId, SourceFilter};

#[test]
fn test_search_on_empty_index_returns_nothing() {
    let t = TestIndex::new(4);
    assert!(t.index.search(&axis(4, 0), 5, None).unwrap().is_empty());
    assert!(t.index.search(&axis(4, 0), 0, None).unwrap().is_empty());
}

#[test]
fn test_ranking_is_deterministic_with_ties() {
    let t = TestIndex::with_settings(4, |s| s.admission.enabled = false);

    // Three records at the same angle to the query, one closer
    for id in ["t1", "t2", "t3"] {
        t.index
            .admit(Candidate::new(chunk("a.rs", id, id), at_cosine(4, 0.5)))
            .unwrap();
    }
    t.index
        .admit(Candidate::new(chunk("a.rs", "best", "best"), at_cosine(4, 0.9)))
        .unwrap();

    let first = t.index.search(&axis(4, 0), 4, None).unwrap();
    let second = t.index.search(&axis(4, 0), 4, None).unwrap();
    assert_eq!(first, second);

    let order: Vec<&str> = first.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(order, vec!["best", "t1", "t2", "t3"]);
    assert!(first[1].record_id < first[2].record_id);
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_search_skips_tombstoned_records() {
    let t = TestIndex::new(4);
    for (i, id) in ["x", "y", "z"].iter().enumerate() {
        t.index
            .admit(Candidate::new(chunk("a.rs", id, id), axis(4, i)))
            .unwrap();
    }
    assert!(t.index.tombstone(&ChunkId::new("x")).unwrap());
    assert!(!t.index.tombstone(&ChunkId::new("x")).unwrap());

    let results = t.index.search(&axis(4, 0), 3, None).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.chunk_id.as_str() != "x"));
}

#[test]
fn test_filters_restrict_sources() {
    let t = TestIndex::new(4);
    t.index
        .admit(Candidate::new(chunk("src/lib.rs", "lib", "lib"), axis(4, 0)))
        .unwrap();
    t.index
        .admit(Candidate::new(chunk("docs/guide.md", "guide", "guide"), at_cosine(4, 0.6)))
        .unwrap();
    t.index
        .admit(Candidate::new(chunk("docs/api.md", "api", "api"), axis(4, 2)))
        .unwrap();

    let docs = t
        .index
        .search(&axis(4, 0), 1, Some(&SourceFilter::prefix("docs/")))
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source_path, "docs/guide.md");

    let exact = t
        .index
        .search(&axis(4, 0), 5, Some(&SourceFilter::exact("docs/api.md")))
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].chunk_id, ChunkId::new("api"));

    let none = t
        .index
        .search(&axis(4, 0), 5, Some(&SourceFilter::prefix("tests/")))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_query_dimension_is_checked() {
    let t = TestIndex::new(4);
    let err = t.index.search(&[1.0, 0.0], 1, None).unwrap_err();
    assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
}

#[test]
fn test_results_resolve_record_content() {
    let t = TestIndex::new(4);
    let mut c = chunk("src/main.rs", "main", "fn main() {}");
    c.line_range = Some((1, 3));
    t.index.admit(Candidate::new(c, axis(4, 3))).unwrap();

    let results = t.index.search(&axis(4, 3), 1, None).unwrap();
    assert_eq!(results[0].content, "fn main() {}");
    assert_eq!(results[0].line_range, Some((1, 3)));
    assert_eq!(results[0].source_path, "src/main.rs");
}
