//! Chunk sources: turning files and transcripts into embeddable chunks.
//!
//! A source maps a path to the key its records are stored under and to
//! the current set of chunks for that path. Chunk identity is positional
//! (byte range or turn index) while `content_hash` tracks the text, so a
//! chunk whose text changed in place keeps its id and gets re-embedded.
//!
//! Keys are workspace-relative, `/`-separated and lexically normalized, so
//! every spelling of one file (`a/./b.txt`, `a/../a/b.txt`, relative or
//! absolute) lands on the same source. Paths outside the workspace keep
//! their absolute form.
//!
//! Byte-range ids mean an edit that changes the length of one window moves
//! the offsets of every window after it, which are then re-embedded. Edits
//! that keep a window's length only re-embed that window.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::{IndexError, IndexResult};
use crate::indexing::{calculate_hash, modified_utc};
use crate::storage::Chunk;
use crate::types::ChunkId;

/// Default number of lines per file chunk.
pub const DEFAULT_CHUNK_LINES: usize = 50;

/// Extension that marks a conversation transcript.
const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// Provider of the current chunk set for a source path.
pub trait ChunkSource: Send + Sync {
    /// Key under which records of `path` are stored.
    fn source_key(&self, path: &Path) -> String;

    /// Re-chunks the current content of `path`.
    fn read_chunks(&self, path: &Path) -> IndexResult<Vec<Chunk>>;
}

/// Absolute form of `path` with `.` dropped and `..` applied.
///
/// Purely lexical, so it works for files that no longer exist.
fn clean_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Storage key of `path`: relative to `root` when inside it.
pub fn source_path_key(root: Option<&Path>, path: &Path) -> String {
    let cleaned = clean_path(path);
    let relative = root
        .map(clean_path)
        .and_then(|root| cleaned.strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|relative| !relative.as_os_str().is_empty());

    match relative {
        Some(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        None => cleaned.to_string_lossy().into_owned(),
    }
}

fn read_source(path: &Path) -> IndexResult<String> {
    std::fs::read_to_string(path).map_err(|source| IndexError::SourceRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Splits text files into fixed windows of lines.
#[derive(Debug, Clone)]
pub struct LineChunker {
    chunk_lines: usize,
    root: Option<PathBuf>,
}

impl LineChunker {
    pub fn new(chunk_lines: usize) -> Self {
        Self {
            chunk_lines: chunk_lines.max(1),
            root: None,
        }
    }

    /// Keys sources relative to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Chunks `content` as the text of `source_path`.
    ///
    /// Windows that contain only whitespace are skipped.
    pub fn chunk_text(&self, source_path: &str, content: &str, last_modified: u64) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let mut offset = 0usize;
        for (window_index, window) in lines.chunks(self.chunk_lines).enumerate() {
            let start = offset;
            let len: usize = window.iter().map(|l| l.len()).sum();
            offset += len;

            let text = &content[start..start + len];
            if text.trim().is_empty() {
                continue;
            }

            let first_line = window_index * self.chunk_lines + 1;
            let last_line = first_line + window.len() - 1;
            chunks.push(Chunk {
                chunk_id: ChunkId::for_range(source_path, start, start + len),
                content_hash: calculate_hash(text),
                source_path: source_path.to_string(),
                last_modified,
                line_range: Some((first_line as u32, last_line as u32)),
                text: text.to_string(),
            });
        }

        chunks
    }
}

impl Default for LineChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_LINES)
    }
}

impl ChunkSource for LineChunker {
    fn source_key(&self, path: &Path) -> String {
        source_path_key(self.root.as_deref(), path)
    }

    fn read_chunks(&self, path: &Path) -> IndexResult<Vec<Chunk>> {
        let content = read_source(path)?;
        Ok(self.chunk_text(&self.source_key(path), &content, modified_utc(path)))
    }
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// RFC 3339 time of the exchange
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ConversationTurn {
    /// Text embedded for this turn.
    pub fn to_text(&self) -> String {
        format!("Q: {}\n\nA: {}", self.question, self.answer)
    }

    fn timestamp_utc(&self) -> Option<u64> {
        let raw = self.timestamp.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.timestamp().max(0) as u64)
    }
}

/// Reads JSON-lines conversation transcripts, one turn per line.
///
/// The conversation id is the transcript's source key without its
/// extension (`chats/s1.jsonl` is `chats/s1`); records are stored under
/// `conversation/{id}`.
#[derive(Debug, Clone, Default)]
pub struct ConversationSource {
    root: Option<PathBuf>,
}

impl ConversationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives conversation ids relative to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn conversation_key(conversation_id: &str) -> String {
        format!("conversation/{conversation_id}")
    }

    pub fn conversation_id(&self, path: &Path) -> String {
        let key = source_path_key(self.root.as_deref(), path);
        Path::new(&key)
            .with_extension("")
            .to_string_lossy()
            .into_owned()
    }

    /// Chunks already parsed turns; `turn_index` is the position in `turns`.
    pub fn chunk_turns(
        conversation_id: &str,
        turns: &[ConversationTurn],
        default_time: u64,
    ) -> Vec<Chunk> {
        turns
            .iter()
            .enumerate()
            .map(|(index, turn)| Self::turn_chunk(conversation_id, index, turn, default_time))
            .collect()
    }

    fn turn_chunk(
        conversation_id: &str,
        turn_index: usize,
        turn: &ConversationTurn,
        default_time: u64,
    ) -> Chunk {
        let text = turn.to_text();
        let line = (turn_index + 1) as u32;
        Chunk {
            chunk_id: ChunkId::for_turn(conversation_id, turn_index),
            content_hash: calculate_hash(&text),
            source_path: Self::conversation_key(conversation_id),
            last_modified: turn.timestamp_utc().unwrap_or(default_time),
            line_range: Some((line, line)),
            text,
        }
    }

    /// Parses a transcript body.
    ///
    /// Blank lines are ignored. Malformed lines are skipped with a warning
    /// and still consume their turn index, so later turns keep their ids.
    pub fn parse_transcript(conversation_id: &str, body: &str, default_time: u64) -> Vec<Chunk> {
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .filter_map(|(index, line)| {
                match serde_json::from_str::<ConversationTurn>(line) {
                    Ok(turn) => Some(Self::turn_chunk(conversation_id, index, &turn, default_time)),
                    Err(e) => {
                        warn!("Skipping malformed turn {index} of conversation {conversation_id}: {e}");
                        None
                    }
                }
            })
            .collect()
    }
}

impl ChunkSource for ConversationSource {
    fn source_key(&self, path: &Path) -> String {
        Self::conversation_key(&self.conversation_id(path))
    }

    fn read_chunks(&self, path: &Path) -> IndexResult<Vec<Chunk>> {
        let body = read_source(path)?;
        Ok(Self::parse_transcript(
            &self.conversation_id(path),
            &body,
            modified_utc(path),
        ))
    }
}

/// File system source: transcripts by extension, everything else by lines.
#[derive(Debug, Clone, Default)]
pub struct FsChunkSource {
    lines: LineChunker,
    conversations: ConversationSource,
}

impl FsChunkSource {
    pub fn new(chunk_lines: usize) -> Self {
        Self {
            lines: LineChunker::new(chunk_lines),
            conversations: ConversationSource::new(),
        }
    }

    /// Keys every source relative to `root`.
    pub fn with_root(self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            lines: self.lines.with_root(root.clone()),
            conversations: self.conversations.with_root(root),
        }
    }

    fn is_transcript(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TRANSCRIPT_EXTENSION))
    }
}

impl ChunkSource for FsChunkSource {
    fn source_key(&self, path: &Path) -> String {
        if Self::is_transcript(path) {
            self.conversations.source_key(path)
        } else {
            self.lines.source_key(path)
        }
    }

    fn read_chunks(&self, path: &Path) -> IndexResult<Vec<Chunk>> {
        if Self::is_transcript(path) {
            self.conversations.read_chunks(path)
        } else {
            self.lines.read_chunks(path)
        }
    }
}
