//! Integration tests for the engine's testable scenarios: insert/query
//! round trips, full-text search, single-valued overwrite semantics, and
//! change notification ordering.

use std::io::Write;

use rusqlite::OptionalExtension;
use semantic_store::{Connection, OpenFlags, RdfTerm};
use tempfile::TempDir;

const DOC: &str = "http://example.org/ontology#Doc";
const NIE_TITLE: &str = "http://tracker.api.gnome.org/ontology/v3/nie#title";
const NMM_TRACK_NUMBER: &str = "http://tracker.api.gnome.org/ontology/v3/nmm#trackNumber";
const NFO_FILE_DATA_OBJECT: &str = "http://tracker.api.gnome.org/ontology/v3/nfo#FileDataObject";
const FTS_MATCH: &str = "http://tracker.api.gnome.org/ontology/v3/fts#match";

fn write_ontology(dir: &std::path::Path) {
    let mut f = std::fs::File::create(dir.join("core.toml")).unwrap();
    write!(
        f,
        r#"
[[class]]
iri = "{DOC}"

[[class]]
iri = "{NFO_FILE_DATA_OBJECT}"
notify = true

[[property]]
iri = "{NIE_TITLE}"
domain = "{DOC}"
range = "string"
cardinality = "single"
fulltext = true

[[property]]
iri = "{NMM_TRACK_NUMBER}"
domain = "{DOC}"
range = "integer"
cardinality = "single"
"#
    )
    .unwrap();
}

async fn open_fixture() -> (TempDir, TempDir, Connection) {
    let data_dir = TempDir::new().unwrap();
    let ontology_dir = TempDir::new().unwrap();
    write_ontology(ontology_dir.path());
    let conn = Connection::open(OpenFlags::default(), data_dir.path(), ontology_dir.path())
        .await
        .unwrap();
    (data_dir, ontology_dir, conn)
}

/// Scenario A: insert a titled document, read it back, then find it again
/// through full-text search on a prefix query.
#[tokio::test]
async fn scenario_a_insert_query_and_fulltext_match() {
    let (_data_dir, _ontology_dir, conn) = open_fixture().await;

    conn.update(
        &format!(r#"INSERT DATA {{ <http://example.org/a> a <{DOC}> ; <{NIE_TITLE}> "hello" }}"#),
        &[],
    )
    .await
    .unwrap();

    let mut cursor = conn
        .query(&format!(r#"SELECT ?t {{ <http://example.org/a> <{NIE_TITLE}> ?t }}"#), &[])
        .await
        .unwrap();
    assert!(cursor.next());
    match cursor.value(0).unwrap() {
        RdfTerm::Literal(l) => assert_eq!(l.value(), "hello"),
        other => panic!("expected a literal, got {other:?}"),
    }
    assert!(!cursor.next());

    let mut cursor = conn
        .query(
            &format!(
                r#"SELECT ?s WHERE {{ ?s a <{DOC}> . FILTER(<{FTS_MATCH}>(?s, "hel*")) }}"#
            ),
            &[],
        )
        .await
        .unwrap();
    assert!(cursor.next());
    match cursor.value(0).unwrap() {
        RdfTerm::NamedNode(n) => assert_eq!(n.as_str(), "http://example.org/a"),
        other => panic!("expected a named node, got {other:?}"),
    }
    assert!(!cursor.next());
}

/// Scenario B: a single-valued property's second `INSERT DATA` overwrites
/// the first rather than conflicting, because the two inserts land in
/// separate transactions.
#[tokio::test]
async fn scenario_b_single_valued_overwrite_across_transactions() {
    let (_data_dir, _ontology_dir, conn) = open_fixture().await;

    conn.update(&format!("INSERT DATA {{ <http://example.org/a> <{NMM_TRACK_NUMBER}> 3 }}"), &[])
        .await
        .unwrap();
    conn.update(&format!("INSERT DATA {{ <http://example.org/a> <{NMM_TRACK_NUMBER}> 4 }}"), &[])
        .await
        .unwrap();

    let mut cursor = conn
        .query(&format!("SELECT ?n {{ <http://example.org/a> <{NMM_TRACK_NUMBER}> ?n }}"), &[])
        .await
        .unwrap();
    assert!(cursor.next());
    match cursor.value(0).unwrap() {
        RdfTerm::Literal(l) => assert_eq!(l.value(), "4"),
        other => panic!("expected a literal, got {other:?}"),
    }
    assert!(!cursor.next());
}

/// Scenario B (conflict half): two distinct values for the same
/// single-valued property in ONE transaction roll the whole transaction
/// back (property 4).
#[tokio::test]
async fn conflicting_single_valued_insert_in_one_transaction_rolls_back() {
    let (_data_dir, _ontology_dir, conn) = open_fixture().await;

    let result = conn
        .update(
            &format!(
                "INSERT DATA {{ <http://example.org/a> <{NMM_TRACK_NUMBER}> 3 . <http://example.org/a> <{NMM_TRACK_NUMBER}> 4 }}"
            ),
            &[],
        )
        .await;
    assert!(result.is_err());

    let mut cursor = conn
        .query(&format!("SELECT ?n {{ <http://example.org/a> <{NMM_TRACK_NUMBER}> ?n }}"), &[])
        .await
        .unwrap();
    assert!(!cursor.next(), "rolled-back transaction must leave no trace");
}

/// Scenario C: subscribers on a notify-flagged class see one event per
/// commit, in commit order.
#[tokio::test]
async fn scenario_c_subscriber_sees_add_then_delete_in_order() {
    let (_data_dir, _ontology_dir, conn) = open_fixture().await;
    let mut subscriber = conn.subscribe([NFO_FILE_DATA_OBJECT.to_string()]);

    conn.update(&format!("INSERT DATA {{ <http://example.org/f> a <{NFO_FILE_DATA_OBJECT}> }}"), &[])
        .await
        .unwrap();
    conn.update(&format!("DELETE DATA {{ <http://example.org/f> a <{NFO_FILE_DATA_OBJECT}> }}"), &[])
        .await
        .unwrap();

    let first = subscriber.recv().await.unwrap();
    let second = subscriber.recv().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].kind, semantic_store::ChangeKind::Create);
    assert_eq!(second[0].kind, semantic_store::ChangeKind::Delete);
}

/// Delete inverts insert (property 3): inserting then deleting the same
/// triple restores the pre-insert state, including the subject's resource
/// refcount.
#[tokio::test]
async fn delete_inverts_insert() {
    let (data_dir, _ontology_dir, conn) = open_fixture().await;

    conn.update(&format!(r#"INSERT DATA {{ <http://example.org/a> <{NIE_TITLE}> "hello" }}"#), &[])
        .await
        .unwrap();
    conn.update(&format!(r#"DELETE DATA {{ <http://example.org/a> <{NIE_TITLE}> "hello" }}"#), &[])
        .await
        .unwrap();

    let mut cursor = conn
        .query(&format!(r#"SELECT ?t {{ <http://example.org/a> <{NIE_TITLE}> ?t }}"#), &[])
        .await
        .unwrap();
    assert!(!cursor.next());

    let raw = rusqlite::Connection::open(data_dir.path().join("db.sqlite3")).unwrap();
    let row: Option<i64> = raw
        .query_row(
            "SELECT refcount FROM resources WHERE iri = ?1",
            rusqlite::params!["http://example.org/a"],
            |row| row.get(0),
        )
        .optional()
        .unwrap();
    assert_eq!(row, None, "subject resource must be garbage-collected once its refcount returns to 0");
}

/// DELETE/INSERT WHERE mints one blank node per solution and reports its
/// label-to-IRI mapping back to the caller.
#[tokio::test]
async fn update_blank_mints_one_blank_node_per_solution() {
    let (_data_dir, _ontology_dir, conn) = open_fixture().await;

    conn.update(
        &format!(r#"INSERT DATA {{ <http://example.org/a> a <{DOC}> ; <{NIE_TITLE}> "hello" }}"#),
        &[],
    )
    .await
    .unwrap();

    let mappings = conn
        .update_blank(
            &format!(
                r#"INSERT {{ _:note <{NIE_TITLE}> "derived" }} WHERE {{ ?s a <{DOC}> }}"#
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(mappings[0].contains_key("note"));
}
