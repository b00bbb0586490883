//! Commit log for durability.
//!
//! Every committed write transaction is appended as one [`CommitEntry`]
//! holding the after-image of each row it touched. Opening a store replays
//! the log from the start. [`CommitLog::rewrite`] replaces the whole log with
//! a single checkpoint entry.

use crate::error::{Result, StoreError};
use crate::snapshot::{ChangeSet, ReadView};
use crate::tables::{Row, Table};
use crate::types::{RowKey, TableId, Timestamp, Version};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the commit log.
const LOG_MAGIC: &[u8; 4] = b"LKC\0";

/// Current commit log format version.
const LOG_VERSION: u8 = 1;

const HEADER_LEN: usize = 5;

/// One row-level change, as an after-image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RowMutation {
    /// Row created or modified; holds its full new content.
    Put { table: TableId, key: RowKey, row: Row },
    /// Row deleted.
    Delete { table: TableId, key: RowKey },
    /// Table emptied and moved to `generation`.
    Clear { table: TableId, generation: u64 },
}

/// A committed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub version: Version,
    pub timestamp: Timestamp,
    /// Row key counter after the commit.
    pub next_key: u64,
    pub mutations: Vec<RowMutation>,
}

impl CommitEntry {
    /// Build the entry for a commit from its net changes and resulting view.
    ///
    /// Clears come first, then deletes, then puts, which is the order replay
    /// needs.
    pub fn from_changes(
        version: Version,
        changes: &ChangeSet,
        view: &dyn ReadView,
        next_key: u64,
    ) -> Result<Self> {
        let mut clears = Vec::new();
        let mut deletes = Vec::new();
        let mut puts = Vec::new();

        for (table, c) in changes.iter() {
            if c.cleared {
                let generation = view.table(table).map(|t| t.generation()).unwrap_or(0);
                clears.push(RowMutation::Clear { table, generation });
            }
            deletes.extend(c.deleted.iter().map(|&key| RowMutation::Delete { table, key }));
            for &key in c.inserted.iter().chain(c.modified.iter()) {
                let row = view.row(table, key)?.clone();
                puts.push(RowMutation::Put { table, key, row });
            }
        }

        clears.extend(deletes);
        clears.extend(puts);
        Ok(Self {
            version,
            timestamp: Timestamp::now(),
            next_key,
            mutations: clears,
        })
    }

    /// A single entry that recreates `view` from nothing.
    pub fn checkpoint(view: &dyn ReadView, next_key: u64) -> Self {
        let mut mutations = Vec::new();
        for table in view.tables() {
            mutations.push(RowMutation::Clear {
                table: table.id(),
                generation: table.generation(),
            });
            for (key, row) in table.rows() {
                mutations.push(RowMutation::Put {
                    table: table.id(),
                    key,
                    row: row.clone(),
                });
            }
        }
        Self {
            version: view.version(),
            timestamp: Timestamp::now(),
            next_key,
            mutations,
        }
    }

    /// Apply this entry to a set of tables during replay.
    pub fn apply(&self, tables: &mut [Table]) -> Result<()> {
        for mutation in &self.mutations {
            match mutation {
                RowMutation::Clear { table, generation } => {
                    let t = table_at(tables, *table)?;
                    t.clear();
                    t.set_generation(*generation);
                }
                RowMutation::Delete { table, key } => {
                    // Already gone is fine: a later checkpoint may have dropped it.
                    let _ = table_at(tables, *table)?.remove(*key);
                }
                RowMutation::Put { table, key, row } => {
                    let t = table_at(tables, *table)?;
                    if row.fields.len() != t.schema().properties.len() {
                        return Err(StoreError::Corruption(format!(
                            "row {} has {} fields, {} expects {}",
                            key,
                            row.fields.len(),
                            t.name(),
                            t.schema().properties.len()
                        )));
                    }
                    t.insert(*key, row.clone());
                }
            }
        }
        Ok(())
    }
}

fn table_at(tables: &mut [Table], id: TableId) -> Result<&mut Table> {
    tables
        .get_mut(id.index())
        .ok_or_else(|| StoreError::Corruption(format!("unknown table {:?} in commit log", id)))
}

/// Append-only file of commit entries.
pub struct CommitLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Create or open a log, returning every intact entry in it.
    ///
    /// A partially written entry at the end of the file (a crash during
    /// append) is cut off with a warning. A bad entry followed by more data
    /// is reported as corruption.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<CommitEntry>)> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            let (entries, valid_len) = Self::parse(&data)?;
            if valid_len < data.len() {
                warn!(
                    path = %path.display(),
                    dropped_bytes = data.len() - valid_len,
                    "truncating torn commit log tail"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len as u64)?;
                file.sync_all()?;
            }
            entries
        } else {
            Self::write_header(&path)?;
            Vec::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((
            Self {
                path,
                writer: Mutex::new(BufWriter::new(file)),
                sync_on_commit,
            },
            entries,
        ))
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    /// Parse a whole log image. Returns the entries and the length of the
    /// intact prefix.
    fn parse(data: &[u8]) -> Result<(Vec<CommitEntry>, usize)> {
        if data.len() < HEADER_LEN || &data[0..4] != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid commit log magic".into()));
        }
        if data[4] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported commit log version: {}",
                data[4]
            )));
        }

        let mut entries = Vec::new();
        let mut pos = HEADER_LEN;
        while pos < data.len() {
            match Self::parse_entry(&data[pos..]) {
                Ok((entry, used)) => {
                    entries.push(entry);
                    pos += used;
                }
                Err(EntryError::Truncated) => break,
                Err(EntryError::Bad(e)) => {
                    if Self::is_last_frame(&data[pos..]) {
                        break;
                    }
                    return Err(e);
                }
            }
        }

        Ok((entries, pos))
    }

    /// Whether the frame starting at `rest` runs to the end of the file.
    fn is_last_frame(rest: &[u8]) -> bool {
        if rest.len() < 4 {
            return true;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        4 + len + 4 >= rest.len()
    }

    fn parse_entry(rest: &[u8]) -> std::result::Result<(CommitEntry, usize), EntryError> {
        if rest.len() < 4 {
            return Err(EntryError::Truncated);
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len + 4 {
            return Err(EntryError::Truncated);
        }

        let encoded = &rest[4..4 + len];
        let stored = u32::from_le_bytes([
            rest[4 + len],
            rest[5 + len],
            rest[6 + len],
            rest[7 + len],
        ]);
        let computed = crc32fast::hash(encoded);
        if stored != computed {
            return Err(EntryError::Bad(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            }));
        }

        let entry = rmp_serde::from_slice(encoded).map_err(|e| EntryError::Bad(e.into()))?;
        Ok((entry, 4 + len + 4))
    }

    fn encode(entry: &CommitEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Append one entry and flush it.
    pub fn append(&self, entry: &CommitEntry) -> Result<()> {
        let frame = Self::encode(entry)?;
        let mut writer = self.writer.lock();
        writer.write_all(&frame)?;
        writer.flush()?;
        if self.sync_on_commit {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Atomically replace the log with `entries`.
    pub fn rewrite(&self, entries: &[CommitEntry]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let tmp_path = self.path.with_extension("log.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            tmp.write_all(LOG_MAGIC)?;
            tmp.write_all(&[LOG_VERSION])?;
            for entry in entries {
                tmp.write_all(&Self::encode(entry)?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Current size of the log file.
    pub fn size_bytes(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

enum EntryError {
    Truncated,
    Bad(StoreError),
}
