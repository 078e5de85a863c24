use crate::common::{ScriptedEmbedder, axis, test_settings};
use orthovec::{ChunkId, OrthoIndex, SourceFilter};
use std::fs;
use tempfile::TempDir;

const DIM: usize = 4;

fn turn(question: &str, answer: &str) -> String {
    format!("{{\"question\":\"{question}\",\"answer\":\"{answer}\"}}\n")
}

#[test]
fn test_transcript_turns_are_indexed_incrementally() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir, DIM);
    let embedder = ScriptedEmbedder::new(DIM);
    embedder.script("Q: What is a tombstone?\n\nA: A logical delete.", axis(DIM, 0));
    embedder.script("Q: When is it dropped?\n\nA: On compaction.", axis(DIM, 1));
    embedder.script("Q: Can ids repeat?\n\nA: Never.", axis(DIM, 2));

    let index = OrthoIndex::open_with_fs_source(&settings, embedder.clone()).unwrap();

    let transcript = dir.path().join("session-1.jsonl");
    let mut body = turn("What is a tombstone?", "A logical delete.");
    body.push_str(&turn("When is it dropped?", "On compaction."));
    fs::write(&transcript, &body).unwrap();

    let first = index.index_file(&transcript).unwrap();
    assert_eq!(first.inserted, 2);

    // Appending a turn embeds only the new one
    embedder.reset();
    body.push_str(&turn("Can ids repeat?", "Never."));
    fs::write(&transcript, &body).unwrap();

    let second = index.index_file(&transcript).unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(second.unchanged, 2);
    assert_eq!(embedder.calls(), 1);

    let results = index
        .search(&axis(DIM, 2), 1, Some(&SourceFilter::exact("conversation/session-1")))
        .unwrap();
    assert_eq!(results[0].chunk_id, ChunkId::for_turn("session-1", 2));
    assert_eq!(results[0].content, "Q: Can ids repeat?\n\nA: Never.");

    assert_eq!(index.remove_file(&transcript).unwrap(), 3);
    assert_eq!(index.stats().live_count, 0);
}

#[test]
fn test_directory_indexing_with_line_chunks() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(&dir, DIM);
    settings.indexing.chunk_lines = 2;
    settings.indexing.extensions = vec!["txt".to_string()];

    let embedder = ScriptedEmbedder::new(DIM);
    embedder.script("alpha\nbeta\n", axis(DIM, 0));
    embedder.script("gamma\n", axis(DIM, 1));
    embedder.script("delta\n", axis(DIM, 2));

    let project = dir.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("one.txt"), "alpha\nbeta\ngamma\n").unwrap();
    fs::write(project.join("two.txt"), "delta\n").unwrap();
    fs::write(project.join("skip.md"), "not picked up\n").unwrap();

    let index = OrthoIndex::open_with_fs_source(&settings, embedder.clone()).unwrap();
    let bulk = index.index_directory(&project);

    assert!(bulk.failed.is_empty());
    assert_eq!(bulk.files.len(), 2);
    assert_eq!(bulk.total.inserted, 3);

    let results = index.search(&axis(DIM, 1), 1, None).unwrap();
    assert_eq!(results[0].content, "gamma\n");
    assert_eq!(results[0].line_range, Some((3, 3)));

    let report = index.analyze(None, 100);
    assert_eq!(report.sample_size, 3);
    assert_eq!(report.above_threshold, 0);
    assert_eq!(report.orthogonality_score, 1.0);
}

#[test]
fn test_same_named_transcripts_stay_separate() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir, DIM);
    let embedder = ScriptedEmbedder::new(DIM);
    embedder.script("Q: first?\n\nA: one.", axis(DIM, 0));
    embedder.script("Q: second?\n\nA: two.", axis(DIM, 1));

    let a = dir.path().join("a").join("s1.jsonl");
    let b = dir.path().join("b").join("s1.jsonl");
    fs::create_dir_all(a.parent().unwrap()).unwrap();
    fs::create_dir_all(b.parent().unwrap()).unwrap();
    fs::write(&a, turn("first?", "one.")).unwrap();
    fs::write(&b, turn("second?", "two.")).unwrap();

    let index = OrthoIndex::open_with_fs_source(&settings, embedder).unwrap();
    assert_eq!(index.index_file(&a).unwrap().inserted, 1);
    let second = index.index_file(&b).unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(second.updated, 0);
    assert_eq!(index.stats().live_count, 2);

    assert_eq!(index.remove_file(&a).unwrap(), 1);
    let left = index
        .search(&axis(DIM, 1), 1, Some(&SourceFilter::exact("conversation/b/s1")))
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].chunk_id, ChunkId::for_turn("b/s1", 0));
    assert_eq!(index.stats().live_count, 1);
}

#[test]
fn test_any_spelling_of_a_path_removes_its_records() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir, DIM);
    let embedder = ScriptedEmbedder::new(DIM);
    embedder.script("only line\n", axis(DIM, 0));

    let notes = dir.path().join("notes");
    fs::create_dir_all(&notes).unwrap();
    let file = notes.join("x.txt");
    fs::write(&file, "only line\n").unwrap();

    let index = OrthoIndex::open_with_fs_source(&settings, embedder.clone()).unwrap();
    assert_eq!(index.index_file(&file).unwrap().inserted, 1);

    // Re-indexing under another spelling is the same source
    embedder.reset();
    let again = index.index_file(&notes.join("..").join("notes").join("x.txt")).unwrap();
    assert_eq!(again.unchanged, 1);
    assert_eq!(embedder.calls(), 0);

    let results = index.search(&axis(DIM, 0), 1, None).unwrap();
    assert_eq!(results[0].source_path, "notes/x.txt");

    assert_eq!(index.remove_file(&notes.join(".").join("x.txt")).unwrap(), 1);
    assert_eq!(index.stats().live_count, 0);
}
