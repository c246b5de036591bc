//! Storage backend: one write connection, a bounded pool of read
//! connections, schema creation from the ontology, and the
//! begin/commit/rollback contract the scheduler drives transactions
//! through.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use rusqlite::{Connection, OpenFlags};

use crate::config::EngineConfig;
use crate::ontology::Ontology;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage busy: {0}")]
    Busy(String),

    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        classify(e)
    }
}

fn classify(e: rusqlite::Error) -> StorageError {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(err, ref msg) = e {
        return match err.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StorageError::Busy(msg.clone().unwrap_or_default())
            }
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                StorageError::Corrupt(msg.clone().unwrap_or_default())
            }
            ErrorCode::ConstraintViolation => {
                StorageError::ConstraintViolated(msg.clone().unwrap_or_default())
            }
            _ => StorageError::Sqlite(e),
        };
    }
    StorageError::Sqlite(e)
}

/// Owns the single write connection and creates fresh read-only connections
/// on demand. Transaction discipline (one writer, many concurrent readers)
/// is enforced by the scheduler, not by this type.
pub struct StorageBackend {
    db_path: PathBuf,
    write_conn: Connection,
}

impl StorageBackend {
    pub fn open(data_dir: &Path, config: &EngineConfig, ontology: &Ontology) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("db.sqlite3");
        info!(path = %db_path.display(), "opening storage backend");

        let write_conn = Connection::open(&db_path)?;
        write_conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;",
            config.busy_timeout_ms
        ))?;

        crate::mapper::create_schema(&write_conn, ontology)?;

        Ok(Self { db_path, write_conn })
    }

    /// Opens an additional connection for read-only query execution. Falls
    /// back to a plain read-write handle (issuing only `SELECT`s) on
    /// platforms where `SQLITE_OPEN_READONLY` cannot be honoured alongside
    /// WAL mode.
    pub fn open_reader(&self) -> StorageResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.db_path, flags)
            .or_else(|_| Connection::open(&self.db_path))?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(conn)
    }

    pub fn write_conn(&self) -> &Connection {
        &self.write_conn
    }

    pub fn write_conn_mut(&mut self) -> &mut Connection {
        &mut self.write_conn
    }

    pub fn begin(&self) -> StorageResult<()> {
        debug!("BEGIN IMMEDIATE");
        self.write_conn.execute_batch("BEGIN IMMEDIATE").map_err(Into::into)
    }

    pub fn commit(&self) -> StorageResult<()> {
        self.write_conn.execute_batch("COMMIT").map_err(Into::into)
    }

    pub fn rollback(&self) -> StorageResult<()> {
        self.write_conn.execute_batch("ROLLBACK").map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn ontology_with_one_class(dir: &Path) -> Ontology {
        let mut f = std::fs::File::create(dir.join("bundle.toml")).unwrap();
        f.write_all(
            br#"
            [[class]]
            iri = "http://example.org/Person"

            [[property]]
            iri = "http://example.org/name"
            domain = "http://example.org/Person"
            range = "string"
            cardinality = "single"
            "#,
        )
        .unwrap();
        Ontology::load(dir).unwrap()
    }

    #[test]
    fn opens_and_creates_schema() {
        let bundle_dir = TempDir::new().unwrap();
        let ontology = ontology_with_one_class(bundle_dir.path());
        let data_dir = TempDir::new().unwrap();
        let backend = StorageBackend::open(data_dir.path(), &EngineConfig::default(), &ontology).unwrap();

        let count: i64 = backend
            .write_conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name LIKE 'class_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 1);
    }

    #[test]
    fn reader_cannot_write() {
        let bundle_dir = TempDir::new().unwrap();
        let ontology = ontology_with_one_class(bundle_dir.path());
        let data_dir = TempDir::new().unwrap();
        let backend = StorageBackend::open(data_dir.path(), &EngineConfig::default(), &ontology).unwrap();
        let reader = backend.open_reader().unwrap();
        let result = reader.execute("INSERT INTO resources (iri, is_blank, refcount) VALUES ('x', 0, 0)", []);
        assert!(result.is_err());
    }
}
