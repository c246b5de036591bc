//! URI/resource interning table: stable 64-bit ids over IRIs and blank
//! nodes, refcounted so garbage collection can happen at transaction
//! boundaries instead of needing a separate sweep.

use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::{StorageError, StorageResult};

pub const CREATE_RESOURCES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY,
    iri TEXT UNIQUE NOT NULL,
    is_blank INTEGER NOT NULL,
    refcount INTEGER NOT NULL DEFAULT 0
)";

/// Interns an IRI or blank-node label, returning its stable resource id.
/// Interning does not itself bump the refcount; callers hold a reference
/// only once they write a triple using the id (see [`incref`]/[`decref`]).
pub fn intern(conn: &Connection, iri: &str, is_blank: bool) -> StorageResult<i64> {
    if let Some(id) = resolve_id(conn, iri)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO resources (iri, is_blank, refcount) VALUES (?1, ?2, 0)",
        params![iri, is_blank as i64],
    )
    .map_err(StorageError::Sqlite)?;
    Ok(conn.last_insert_rowid())
}

pub fn resolve_id(conn: &Connection, iri: &str) -> StorageResult<Option<i64>> {
    conn.query_row("SELECT id FROM resources WHERE iri = ?1", params![iri], |row| row.get(0))
        .optional()
        .map_err(StorageError::Sqlite)
}

pub fn resolve_iri(conn: &Connection, id: i64) -> StorageResult<Option<String>> {
    conn.query_row("SELECT iri FROM resources WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .map_err(StorageError::Sqlite)
}

pub fn is_blank(conn: &Connection, id: i64) -> StorageResult<bool> {
    let flag: i64 = conn
        .query_row("SELECT is_blank FROM resources WHERE id = ?1", params![id], |row| row.get(0))
        .map_err(StorageError::Sqlite)?;
    Ok(flag != 0)
}

pub fn incref(conn: &Connection, id: i64) -> StorageResult<()> {
    conn.execute("UPDATE resources SET refcount = refcount + 1 WHERE id = ?1", params![id])
        .map_err(StorageError::Sqlite)?;
    Ok(())
}

pub fn decref(conn: &Connection, id: i64) -> StorageResult<()> {
    conn.execute(
        "UPDATE resources SET refcount = refcount - 1 WHERE id = ?1 AND refcount > 0",
        params![id],
    )
    .map_err(StorageError::Sqlite)?;
    Ok(())
}

/// Deletes every interned resource with a zero refcount. Called once at the
/// end of a committed transaction, never mid-transaction, so a reader never
/// observes a resource id vanish while it is still referenced by a row it
/// can see.
pub fn collect_garbage(conn: &Connection) -> StorageResult<usize> {
    conn.execute("DELETE FROM resources WHERE refcount <= 0", [])
        .map_err(StorageError::Sqlite)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_RESOURCES_TABLE, []).unwrap();
        conn
    }

    #[test]
    fn intern_is_idempotent() {
        let conn = setup();
        let a = intern(&conn, "http://example.org/a", false).unwrap();
        let b = intern(&conn, "http://example.org/a", false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn refcount_gates_garbage_collection() {
        let conn = setup();
        let id = intern(&conn, "http://example.org/a", false).unwrap();
        incref(&conn, id).unwrap();
        assert_eq!(collect_garbage(&conn).unwrap(), 0);
        decref(&conn, id).unwrap();
        assert_eq!(collect_garbage(&conn).unwrap(), 1);
        assert!(resolve_id(&conn, "http://example.org/a").unwrap().is_none());
    }
}
