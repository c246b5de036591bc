//! Triple mapper: translates RDF triples into rows in the ontology-derived
//! relational schema, and back.
//!
//! Storage for a property is one of three shapes, matching spec §3/§4.2:
//! a column on its domain class's table (single-valued), a dedicated
//! two-column table (multi-valued), or membership in a class's type table
//! (`rdf:type` itself, handled separately by the storage backend).

use rusqlite::{params, Connection};

use crate::ontology::{Cardinality, ClassDecl, Ontology, PropertyDecl};
use crate::storage::{StorageError, StorageResult};
use crate::value::TypedValue;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Where a given property's values physically live.
#[derive(Debug, Clone)]
pub enum PropertyStorage<'a> {
    SingleColumn { table: &'a str, column: &'a str },
    MultiRow { table: &'a str },
}

pub fn storage_of<'a>(decl: &'a PropertyDecl, class: &'a ClassDecl) -> PropertyStorage<'a> {
    match decl.cardinality {
        Cardinality::Single => PropertyStorage::SingleColumn {
            table: &class.table_name,
            column: &decl.storage_name,
        },
        Cardinality::Multi => PropertyStorage::MultiRow {
            table: &decl.storage_name,
        },
    }
}

fn sql_type_for(decl: &PropertyDecl) -> &'static str {
    use crate::ontology::PropertyRange::*;
    match decl.range {
        String | LangString | DateTime => "TEXT",
        Integer => "INTEGER",
        Double => "REAL",
        Boolean => "INTEGER",
        Class(_) => "INTEGER",
    }
}

/// Creates the `resources` table, `journal_applied`, the `fts_index` FTS5
/// virtual table, and one table per ontology class (with one column per
/// single-valued property and one side table per multi-valued property).
pub fn create_schema(conn: &Connection, ontology: &Ontology) -> StorageResult<()> {
    conn.execute(crate::ident::CREATE_RESOURCES_TABLE, [])
        .map_err(StorageError::Sqlite)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS journal_applied (transaction_id INTEGER PRIMARY KEY)",
        [],
    )
    .map_err(StorageError::Sqlite)?;
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS fts_index USING fts5(subject UNINDEXED, property UNINDEXED, content)",
        [],
    )
    .map_err(StorageError::Sqlite)?;

    for class in ontology.classes_in_load_order() {
        let mut columns = vec!["id INTEGER PRIMARY KEY".to_string(), "graph INTEGER".to_string()];
        for prop in ontology.properties_of_class(&class.iri) {
            if let PropertyStorage::SingleColumn { column, .. } = storage_of(prop, class) {
                columns.push(format!("{} {}", column, sql_type_for(prop)));
            }
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            class.table_name,
            columns.join(", ")
        );
        conn.execute(&ddl, []).map_err(StorageError::Sqlite)?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}_type (subject INTEGER PRIMARY KEY, graph INTEGER)",
                class.table_name
            ),
            [],
        )
        .map_err(StorageError::Sqlite)?;

        for prop in ontology.properties_of_class(&class.iri) {
            if let PropertyStorage::MultiRow { table } = storage_of(prop, class) {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {} (subject INTEGER NOT NULL, graph INTEGER, value {}, PRIMARY KEY (subject, graph, value))",
                    table,
                    sql_type_for(prop),
                );
                conn.execute(&ddl, []).map_err(StorageError::Sqlite)?;
                if prop.indexed {
                    conn.execute(
                        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_subject ON {table}(subject)"),
                        [],
                    )
                    .map_err(StorageError::Sqlite)?;
                }
            }
        }
    }
    Ok(())
}

/// Inserts a (subject, predicate, object) triple for `class`'s domain.
/// `subject_id` and, for resource-valued objects, the object's interned id
/// must already exist in `resources`.
pub fn insert_triple(
    conn: &Connection,
    class: &ClassDecl,
    prop: &PropertyDecl,
    subject_id: i64,
    graph_id: Option<i64>,
    value: &TypedValue,
) -> StorageResult<()> {
    match storage_of(prop, class) {
        PropertyStorage::SingleColumn { table, column } => {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (id, graph, {column}) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET {column} = excluded.{column}, graph = excluded.graph"
                ),
                params![subject_id, graph_id, value],
            )
            .map_err(StorageError::Sqlite)?;
        }
        PropertyStorage::MultiRow { table } => {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {table} (subject, graph, value) VALUES (?1, ?2, ?3)"
                ),
                params![subject_id, graph_id, value],
            )
            .map_err(StorageError::Sqlite)?;
        }
    }

    if prop.fulltext {
        if let TypedValue::String(s) | TypedValue::LangString(s, _) = value {
            conn.execute(
                "INSERT INTO fts_index (subject, property, content) VALUES (?1, ?2, ?3)",
                params![subject_id, prop.iri, s],
            )
            .map_err(StorageError::Sqlite)?;
        }
    }
    Ok(())
}

pub fn delete_triple(
    conn: &Connection,
    class: &ClassDecl,
    prop: &PropertyDecl,
    subject_id: i64,
    value: Option<&TypedValue>,
) -> StorageResult<()> {
    match storage_of(prop, class) {
        PropertyStorage::SingleColumn { table, column } => {
            conn.execute(
                &format!("UPDATE {table} SET {column} = NULL WHERE id = ?1"),
                params![subject_id],
            )
            .map_err(StorageError::Sqlite)?;
        }
        PropertyStorage::MultiRow { table } => match value {
            Some(v) => {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE subject = ?1 AND value = ?2"),
                    params![subject_id, v],
                )
                .map_err(StorageError::Sqlite)?;
            }
            None => {
                conn.execute(&format!("DELETE FROM {table} WHERE subject = ?1"), params![subject_id])
                    .map_err(StorageError::Sqlite)?;
            }
        },
    }

    if prop.fulltext {
        conn.execute(
            "DELETE FROM fts_index WHERE subject = ?1 AND property = ?2",
            params![subject_id, prop.iri],
        )
        .map_err(StorageError::Sqlite)?;
    }
    Ok(())
}

/// Records (or clears) `subject`'s membership in `class`'s type table.
pub fn set_type(conn: &Connection, class: &ClassDecl, subject_id: i64, graph_id: Option<i64>) -> StorageResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {}_type (subject, graph) VALUES (?1, ?2)",
            class.table_name
        ),
        params![subject_id, graph_id],
    )
    .map_err(StorageError::Sqlite)?;
    Ok(())
}

pub fn unset_type(conn: &Connection, class: &ClassDecl, subject_id: i64) -> StorageResult<()> {
    conn.execute(
        &format!("DELETE FROM {}_type WHERE subject = ?1", class.table_name),
        params![subject_id],
    )
    .map_err(StorageError::Sqlite)?;
    Ok(())
}
