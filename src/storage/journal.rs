//! Append-only record journal.
//!
//! # File Format
//!
//! - Header (16 bytes): magic `OVJL`, format version, vector dimension, reserved
//! - Frames: `[len: u32 LE][crc32: u32 LE][payload: len bytes]`
//!
//! Payloads are bincode-encoded [`JournalEntry`] values. Every append is
//! written in one `write_all` and, when durability is on, fsynced before
//! returning. An append that fails is cut back off the file before the
//! error is returned; if that is impossible the journal refuses further
//! appends until reopened. A frame that is cut short or fails its checksum at the end
//! of the file is a torn write from a crash and gets truncated on open;
//! the same damage anywhere earlier is reported as corruption.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{IndexError, IndexResult, store_io};
use crate::storage::record::VectorRecord;
use crate::types::RecordId;

/// Current journal format version.
const JOURNAL_VERSION: u32 = 1;

/// Size of the journal header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify journal files.
const MAGIC_BYTES: &[u8; 4] = b"OVJL";

/// Length and checksum prefix of every frame.
const FRAME_PREFIX: usize = 8;

/// Upper bound on a single payload, guards against garbage length fields.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One durable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A new live record, tombstoning `supersedes` at `at`. The record is
    /// pending until a matching `Indexed` follows.
    Put {
        record: VectorRecord,
        supersedes: Option<RecordId>,
        at: u64,
    },
    /// The record has been inserted into the similarity index.
    Indexed { record_id: RecordId },
    Tombstone { record_id: RecordId, at: u64 },
    /// Undo of a failed `Put`: drops the record and brings `restore` back to live.
    Revert {
        record_id: RecordId,
        restore: Option<RecordId>,
    },
    /// Lower bound for the next record id, written first by compaction.
    Sequence { next_record_id: RecordId },
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Encodes one entry as a complete frame.
fn encode_frame(entry: &JournalEntry, out: &mut Vec<u8>) -> IndexResult<()> {
    let payload = bincode::serde::encode_to_vec(entry, bincode_config())
        .map_err(|e| IndexError::Serialization(format!("Failed to encode journal entry: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| IndexError::Serialization("Journal entry too large".to_string()))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);

    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn encode_header(dimension: usize) -> IndexResult<[u8; HEADER_SIZE]> {
    let dim = u32::try_from(dimension).map_err(|_| IndexError::Config {
        reason: format!("Dimension {dimension} does not fit the journal header"),
    })?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(MAGIC_BYTES);
    header[4..8].copy_from_slice(&JOURNAL_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&dim.to_le_bytes());
    Ok(header)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

/// Result of scanning a journal image.
#[derive(Debug)]
struct Replay {
    entries: Vec<JournalEntry>,
    /// Byte length of the intact prefix.
    valid_len: usize,
}

/// Decodes frames from a complete journal image.
fn replay_bytes(bytes: &[u8], dimension: usize, path: &Path) -> IndexResult<Replay> {
    let corrupted = |reason: String| IndexError::Corrupted {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupted(format!(
            "File too small for header: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(corrupted("Invalid magic bytes".to_string()));
    }
    let version = read_u32(bytes, 4);
    if version != JOURNAL_VERSION {
        return Err(corrupted(format!(
            "Unsupported journal version {version}, expected {JOURNAL_VERSION}"
        )));
    }
    let stored_dim = read_u32(bytes, 8) as usize;
    if stored_dim != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: stored_dim,
            actual: dimension,
        });
    }

    let mut entries = Vec::new();
    let mut offset = HEADER_SIZE;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < FRAME_PREFIX {
            break;
        }

        let len = read_u32(bytes, offset) as usize;
        let crc = read_u32(bytes, offset + 4);
        let start = offset + FRAME_PREFIX;
        let end = start.saturating_add(len);

        if len > MAX_FRAME_LEN {
            return Err(corrupted(format!(
                "Frame length {len} at offset {offset} exceeds limit"
            )));
        }
        if end > bytes.len() {
            // A length pointing past EOF only happens on the last frame
            break;
        }

        let payload = &bytes[start..end];
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            if end == bytes.len() {
                break;
            }
            return Err(corrupted(format!("Checksum mismatch at offset {offset}")));
        }

        let (entry, _) = bincode::serde::decode_from_slice::<JournalEntry, _>(
            payload,
            bincode_config(),
        )
        .map_err(|e| corrupted(format!("Undecodable entry at offset {offset}: {e}")))?;

        entries.push(entry);
        offset = end;
    }

    Ok(Replay {
        entries,
        valid_len: offset,
    })
}

/// Writable handle to an open journal.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    sync_writes: bool,
    /// Length of the acknowledged content
    len: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl Journal {
    /// Opens the journal at `path`, creating it if absent, and returns
    /// every intact entry in write order.
    pub fn open(
        path: impl AsRef<Path>,
        dimension: usize,
        sync_writes: bool,
    ) -> IndexResult<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let journal = Self::create(&path, dimension, sync_writes)?;
            return Ok((journal, Vec::new()));
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .map_err(store_io("open journal", &path))?;
        let file_len = file
            .metadata()
            .map_err(store_io("stat journal", &path))?
            .len() as usize;

        let replay = if file_len == 0 {
            Replay {
                entries: Vec::new(),
                valid_len: 0,
            }
        } else {
            let mmap = unsafe { Mmap::map(&file) }.map_err(store_io("map journal", &path))?;
            replay_bytes(&mmap, dimension, &path)?
        };

        let mut journal = Self {
            path,
            file,
            sync_writes,
            len: replay.valid_len as u64,
            poisoned: false,
        };

        if file_len == 0 {
            // Crash between create and header write
            journal.write_bytes(&encode_header(dimension)?)?;
        } else if replay.valid_len < file_len {
            warn!(
                "Truncating torn journal tail at {}: {} of {} bytes intact",
                journal.path.display(),
                replay.valid_len,
                file_len
            );
            journal
                .file
                .set_len(replay.valid_len as u64)
                .map_err(store_io("truncate journal", &journal.path))?;
            journal
                .file
                .sync_all()
                .map_err(store_io("sync journal", &journal.path))?;
        }

        debug!(
            "Replayed {} journal entries from {}",
            replay.entries.len(),
            journal.path.display()
        );
        Ok((journal, replay.entries))
    }

    /// Creates a new journal containing only a header.
    fn create(path: &Path, dimension: usize, sync_writes: bool) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(store_io("create index directory", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(store_io("create journal", path))?;

        let mut journal = Self {
            path: path.to_path_buf(),
            file,
            sync_writes,
            len: 0,
            poisoned: false,
        };
        journal.write_bytes(&encode_header(dimension)?)?;
        sync_dir(path)?;
        Ok(journal)
    }

    /// Durably appends one entry.
    pub fn append(&mut self, entry: &JournalEntry) -> IndexResult<()> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Durably appends entries in one write.
    pub fn append_all(&mut self, entries: &[JournalEntry]) -> IndexResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in entries {
            encode_frame(entry, &mut buf)?;
        }
        self.write_bytes(&buf)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> IndexResult<()> {
        let sync_writes = self.sync_writes;
        self.write_with(bytes, |file, bytes| {
            file.write_all(bytes)?;
            if sync_writes {
                file.sync_data()?;
            }
            Ok(())
        })
    }

    /// Runs `write` for `bytes`, cutting the file back to its acknowledged
    /// length if it fails.
    fn write_with(
        &mut self,
        bytes: &[u8],
        write: impl FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    ) -> IndexResult<()> {
        if self.poisoned {
            return Err(store_io("append journal", &self.path)(std::io::Error::other(
                "journal holds an unremovable partial write, reopen the index",
            )));
        }

        match write(&mut self.file, bytes) {
            Ok(()) => {
                self.len += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(store_io("append journal", &self.path)(e))
            }
        }
    }

    fn roll_back(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = restored {
            error!(
                "Failed to roll back partial append to {}: {e}",
                self.path.display()
            );
            self.poisoned = true;
        }
    }

    /// Atomically replaces the journal at `path` with `entries`.
    ///
    /// The new content is written to a temp file, fsynced and renamed over
    /// the old journal. A crash at any point leaves either the old or the
    /// new journal in place.
    pub fn rewrite(
        path: impl AsRef<Path>,
        dimension: usize,
        sync_writes: bool,
        entries: &[JournalEntry],
    ) -> IndexResult<Self> {
        let path = path.as_ref();
        let temp_path = temp_path_for(path);

        let mut buf = Vec::from(encode_header(dimension)?);
        for entry in entries {
            encode_frame(entry, &mut buf)?;
        }

        let mut temp = File::create(&temp_path).map_err(store_io("create temp journal", &temp_path))?;
        temp.write_all(&buf)
            .map_err(store_io("write temp journal", &temp_path))?;
        temp.sync_all()
            .map_err(store_io("sync temp journal", &temp_path))?;
        drop(temp);

        std::fs::rename(&temp_path, path).map_err(store_io("rename temp journal", path))?;
        sync_dir(path)?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(store_io("reopen journal", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sync_writes,
            len: buf.len() as u64,
            poisoned: false,
        })
    }

    /// Deletes a temp file left behind by an interrupted rewrite.
    pub fn remove_stale_temp(path: impl AsRef<Path>) -> IndexResult<bool> {
        let temp_path = temp_path_for(path.as_ref());
        if !temp_path.exists() {
            return Ok(false);
        }
        warn!("Removing abandoned journal rewrite {}", temp_path.display());
        std::fs::remove_file(&temp_path).map_err(store_io("remove temp journal", &temp_path))?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension("log.tmp")
}

fn sync_dir(path: &Path) -> IndexResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    // Directory handles cannot be fsynced on every platform
    if let Ok(dir) = File::open(parent) {
        dir.sync_all().map_err(store_io("sync index directory", parent))?;
    }
    Ok(())
}
