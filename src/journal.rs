//! Write-ahead journal and crash recovery.
//!
//! Frame format: a 4-byte little-endian length prefix followed by a
//! bincode-encoded [`JournalFrame`]. Files are named `wal-{sequence:016x}.log`
//! so lexical and numeric ordering agree. Replay consults the
//! `journal_applied` table in the database itself so a frame already durable
//! in the SQLite file is never re-applied.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::value::TypedValue;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("journal corruption detected at transaction {0}")]
    Corruption(u64),
}

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalOp {
    pub kind: OpKind,
    pub graph: Option<i64>,
    pub subject: i64,
    pub predicate: i64,
    pub object: TypedValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalFrame {
    pub transaction_id: u64,
    pub timestamp: i64,
    pub ops: Vec<JournalOp>,
    crc32: u32,
}

impl JournalFrame {
    pub fn new(transaction_id: u64, ops: Vec<JournalOp>) -> Self {
        let timestamp = chrono::Utc::now().timestamp();
        let mut frame = Self {
            transaction_id,
            timestamp,
            ops,
            crc32: 0,
        };
        frame.crc32 = frame.compute_crc32();
        frame
    }

    fn compute_crc32(&self) -> u32 {
        let payload = bincode::serialize(&(self.transaction_id, self.timestamp, &self.ops))
            .unwrap_or_default();
        crc32fast::hash(&payload)
    }

    fn verify(&self) -> bool {
        self.crc32 == self.compute_crc32()
    }
}

/// Write-ahead journal manager.
pub struct Journal {
    dir: PathBuf,
    current_file: Option<BufWriter<File>>,
    sequence: u64,
}

impl Journal {
    pub fn open(dir: impl AsRef<Path>) -> JournalResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let sequence = Self::find_latest_sequence(&dir)?;
        info!(?dir, sequence, "opened journal");
        Ok(Self {
            dir,
            current_file: None,
            sequence,
        })
    }

    /// Appends a transaction's operations as one frame and fsyncs before
    /// returning, matching the durability contract ("a committed
    /// transaction survives a crash") spec §4.3 requires.
    pub fn append(&mut self, transaction_id: u64, ops: Vec<JournalOp>) -> JournalResult<u64> {
        self.sequence += 1;
        let frame = JournalFrame::new(transaction_id, ops);
        let data = bincode::serialize(&frame)?;

        if self.current_file.is_none() {
            self.open_new_file()?;
        }
        if let Some(file) = self.current_file.as_mut() {
            file.write_all(&(data.len() as u32).to_le_bytes())?;
            file.write_all(&data)?;
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(self.sequence)
    }

    /// Replays every frame not yet marked applied in `conn`'s
    /// `journal_applied` table, calling `apply` for each and recording it
    /// as applied inside the same callback's transaction.
    pub fn replay<F>(&self, conn: &Connection, mut apply: F) -> JournalResult<u64>
    where
        F: FnMut(&Connection, &JournalFrame) -> JournalResult<()>,
    {
        let mut replayed = 0u64;
        for path in self.wal_files()? {
            let file = File::open(&path)?;
            let mut reader = BufReader::new(file);
            loop {
                let mut len_bytes = [0u8; 4];
                match reader.read_exact(&mut len_bytes) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e.into()),
                }
                let len = u32::from_le_bytes(len_bytes) as usize;
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf)?;
                let frame: JournalFrame = bincode::deserialize(&buf)?;
                if !frame.verify() {
                    warn!(transaction_id = frame.transaction_id, "journal corruption detected");
                    return Err(JournalError::Corruption(frame.transaction_id));
                }

                let already_applied: Option<i64> = conn
                    .query_row(
                        "SELECT transaction_id FROM journal_applied WHERE transaction_id = ?1",
                        params![frame.transaction_id as i64],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(|_| JournalError::Corruption(frame.transaction_id))?;
                if already_applied.is_some() {
                    continue;
                }

                apply(conn, &frame)?;
                conn.execute(
                    "INSERT OR IGNORE INTO journal_applied (transaction_id) VALUES (?1)",
                    params![frame.transaction_id as i64],
                )
                .ok();
                replayed += 1;
            }
        }
        info!(replayed, "journal replay complete");
        Ok(replayed)
    }

    fn open_new_file(&mut self) -> JournalResult<()> {
        let path = self.dir.join(format!("wal-{:016x}.log", self.sequence));
        debug!(?path, "opening new journal file");
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.current_file = Some(BufWriter::new(file));
        Ok(())
    }

    fn find_latest_sequence(dir: &Path) -> JournalResult<u64> {
        let mut max_sequence = 0u64;
        for entry in std::fs::read_dir(dir)?.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(hex) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
                    if let Ok(seq) = u64::from_str_radix(hex, 16) {
                        max_sequence = max_sequence.max(seq);
                    }
                }
            }
        }
        Ok(max_sequence)
    }

    fn wal_files(&self) -> JournalResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("wal-") && n.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_op() -> JournalOp {
        JournalOp {
            kind: OpKind::Insert,
            graph: None,
            subject: 1,
            predicate: 2,
            object: TypedValue::String("hello".to_string()),
        }
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let dir = TempDir::new().unwrap();
        let mut journal = Journal::open(dir.path()).unwrap();
        let s1 = journal.append(1, vec![sample_op()]).unwrap();
        let s2 = journal.append(2, vec![sample_op()]).unwrap();
        assert!(s2 > s1);
    }

    #[test]
    fn replay_skips_already_applied_transactions() {
        let dir = TempDir::new().unwrap();
        let mut journal = Journal::open(dir.path()).unwrap();
        journal.append(1, vec![sample_op()]).unwrap();
        journal.append(2, vec![sample_op()]).unwrap();

        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE journal_applied (transaction_id INTEGER PRIMARY KEY)", [])
            .unwrap();
        conn.execute("INSERT INTO journal_applied VALUES (1)", []).unwrap();

        let mut applied = Vec::new();
        journal
            .replay(&conn, |_conn, frame| {
                applied.push(frame.transaction_id);
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, vec![2]);
    }
}
