//! The embedded engine's single entry point: owns the ontology, storage
//! backend, journal, scheduler and change notifier for one opened data
//! directory, and implements the SPARQL query/update surface spec §6 names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection as SqliteConnection, OptionalExtension};
use spargebra::algebra::GraphPattern;
use spargebra::term::{GraphNamePattern, GroundTerm, NamedNodePattern, Quad as SgQuad, TermPattern, Variable};
use spargebra::{GraphUpdateOperation, Query as SparqlQuery};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::ident;
use crate::journal::{JournalFrame, JournalOp, OpKind};
use crate::mapper::{self, PropertyStorage, RDF_TYPE};
use crate::notify::{ChangeEvent, ChangeKind, ChangeNotifier, Subscriber};
use crate::ontology::{ClassDecl, Ontology, PropertyDecl, PropertyRange};
use crate::rdf::{
    BlankNode, NamedNode, NamespaceManager, Quad, RdfFormat, RdfObject, RdfParser, RdfPredicate,
    RdfSerializer, RdfSubject, RdfTerm, Triple,
};
use crate::scheduler::{Scheduler, TaskKind};
use crate::sparql::{self, ParsedQuery, QuerySolution, ResultFormat, SparqlResults};
use crate::storage::StorageBackend;
use crate::value::TypedValue;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags controlling how [`Connection::open`] treats the data directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
}

/// A query/update parameter, bound by name the way spec §6's wire format
/// (`name:type:value`) encodes `i`/`d`/`b`/`s`.
#[derive(Debug, Clone)]
pub enum Param {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl Param {
    /// Parses one `name:type:value` wire entry.
    pub fn parse_wire(entry: &str) -> Option<(String, Param)> {
        let mut parts = entry.splitn(3, ':');
        let name = parts.next()?.to_string();
        let ty = parts.next()?;
        let value = parts.next()?;
        let param = match ty {
            "i" => Param::Int(value.parse().ok()?),
            "d" => Param::Double(value.parse().ok()?),
            "b" => Param::Bool(matches!(value.as_bytes().first(), Some(b't' | b'T' | b'1'))),
            "s" => Param::Str(value.to_string()),
            _ => return None,
        };
        Some((name, param))
    }

    fn to_ground_term(&self) -> GroundTerm {
        use spargebra::term::Literal as SgLiteral;
        let xsd = |local: &str| spargebra::term::NamedNode::new(format!("http://www.w3.org/2001/XMLSchema#{local}")).unwrap();
        match self {
            Param::Int(i) => GroundTerm::Literal(SgLiteral::new_typed_literal(i.to_string(), xsd("integer"))),
            Param::Double(d) => GroundTerm::Literal(SgLiteral::new_typed_literal(d.to_string(), xsd("double"))),
            Param::Bool(b) => GroundTerm::Literal(SgLiteral::new_typed_literal(b.to_string(), xsd("boolean"))),
            Param::Str(s) => GroundTerm::Literal(SgLiteral::new_simple_literal(s.clone())),
        }
    }
}

/// Thin wrapper exposing the library-surface namespace operations spec §6
/// names (`foreach`, `expand`, `compress`) over the internal
/// [`NamespaceManager`].
pub struct Namespaces(Arc<NamespaceManager>);

impl Namespaces {
    pub fn foreach(&self, mut cb: impl FnMut(&str, &str)) {
        for ns in self.0.prefixes() {
            cb(&ns.prefix, &ns.iri);
        }
    }

    pub fn expand(&self, prefixed: &str) -> Option<String> {
        self.0.expand(prefixed).ok()
    }

    pub fn compress(&self, iri: &str) -> Option<String> {
        self.0.compact(iri)
    }
}

/// A forward-only result cursor over a materialised SELECT result set.
/// Spec's "lazy forward-only cursor" semantics are honoured at the
/// scheduler layer: rows are already consistent with the snapshot the
/// reader connection opened under, and iterating this cursor never
/// observes a later commit (property 6, "snapshot isolation").
pub struct Cursor {
    variables: Vec<String>,
    solutions: Vec<QuerySolution>,
    position: usize,
}

impl Cursor {
    fn new(variables: Vec<String>, solutions: Vec<QuerySolution>) -> Self {
        Self { variables, solutions, position: 0 }
    }

    /// Advances to the next row, returning `false` once exhausted.
    pub fn next(&mut self) -> bool {
        if self.position < self.solutions.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    pub fn column_count(&self) -> usize {
        self.variables.len()
    }

    pub fn variable_name(&self, index: usize) -> Option<&str> {
        self.variables.get(index).map(|s| s.as_str())
    }

    /// Returns the bound term at `index` in the current row, or `None` if
    /// unbound. `requested_type` is advisory only: every term already
    /// carries its own RDF type, so callers that know they want a plain
    /// string can call [`RdfTerm`]'s `Display` impl on the result.
    pub fn value(&self, index: usize) -> Option<&RdfTerm> {
        if self.position == 0 {
            return None;
        }
        let variable = self.variables.get(index)?;
        self.solutions.get(self.position - 1)?.get(variable)
    }

    pub fn close(self) {}

    /// Builds the forward-only cursor spec §6 names from a finished query
    /// result. ASK collapses to a one-row, one-column boolean cursor;
    /// CONSTRUCT/DESCRIBE collapse to a `(subject, predicate, object)`
    /// triple cursor — both so every query form shares the one cursor type
    /// the library surface exposes.
    fn from_results(results: SparqlResults) -> Self {
        match results {
            SparqlResults::Select { variables, solutions } => Cursor::new(variables, solutions),
            SparqlResults::Ask(value) => {
                let xsd_boolean = NamedNode::new("http://www.w3.org/2001/XMLSchema#boolean").unwrap();
                let mut solution = QuerySolution::new();
                solution.bind("ASK", RdfTerm::Literal(crate::rdf::Literal::new_typed_literal(value.to_string(), xsd_boolean)));
                Cursor::new(vec!["ASK".to_string()], vec![solution])
            }
            SparqlResults::Construct(triples) | SparqlResults::Describe(triples) => {
                let variables = vec!["subject".to_string(), "predicate".to_string(), "object".to_string()];
                let solutions = triples
                    .into_iter()
                    .map(|t| {
                        let mut solution = QuerySolution::new();
                        solution.bind("subject", RdfTerm::from(t.subject));
                        solution.bind("predicate", RdfTerm::NamedNode(t.predicate.into()));
                        solution.bind("object", RdfTerm::from(t.object));
                        solution
                    })
                    .collect();
                Cursor::new(variables, solutions)
            }
        }
    }
}

struct ConnectionInner {
    ontology: Ontology,
    storage: Mutex<StorageBackend>,
    journal: Mutex<crate::journal::Journal>,
    notifier: ChangeNotifier,
    scheduler: Scheduler,
    namespaces: Arc<NamespaceManager>,
    config: crate::config::EngineConfig,
    tx_seq: AtomicU64,
    table_stats: Mutex<HashMap<String, i64>>,
    read_only: bool,
}

/// The embedded engine handle. Cheap to clone; clones share the same
/// storage backend, scheduler and journal (mirrors spec §9's "model each
/// [registry] as a long-lived owned object created at `Connection.open`").
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub async fn open(flags: OpenFlags, data_dir: impl AsRef<Path>, ontology_dir: impl AsRef<Path>) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let ontology = Ontology::load(ontology_dir.as_ref())?;
        let config = crate::config::EngineConfig::default();

        let storage = StorageBackend::open(&data_dir, &config, &ontology)?;
        let mut journal = crate::journal::Journal::open(data_dir.join("journal"))?;

        let version_marker = data_dir.join("ontology.version");
        let current_version = ontology.schema_version();
        let stored_version = std::fs::read_to_string(&version_marker).ok().and_then(|s| s.trim().parse::<u64>().ok());
        if stored_version.is_some_and(|v| v != current_version) {
            info!(stored_version, current_version, "ontology version changed, replaying journal");
        }
        journal.replay(storage.write_conn(), |conn, frame| apply_journal_frame(conn, &ontology, frame))?;
        std::fs::write(&version_marker, current_version.to_string())?;

        let inner = ConnectionInner {
            ontology,
            storage: Mutex::new(storage),
            journal: Mutex::new(journal),
            notifier: ChangeNotifier::new(),
            scheduler: Scheduler::new(config.max_concurrent_readers),
            namespaces: Arc::new(NamespaceManager::new()),
            config,
            tx_seq: AtomicU64::new(0),
            table_stats: Mutex::new(HashMap::new()),
            read_only: flags.read_only,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn namespaces(&self) -> Namespaces {
        Namespaces(Arc::clone(&self.inner.namespaces))
    }

    pub fn ontology(&self) -> &Ontology {
        &self.inner.ontology
    }

    /// Runs a SPARQL SELECT/ASK/CONSTRUCT/DESCRIBE query and returns a
    /// forward-only [`Cursor`] over its rows.
    pub async fn query(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<Cursor> {
        let results = self.query_raw(sparql_text, params).await?;
        Ok(Cursor::from_results(results))
    }

    /// Runs a query and returns the untyped [`SparqlResults`], for callers
    /// (the HTTP surface, `serialise`) that need to tell CONSTRUCT/DESCRIBE
    /// triples apart from a cursor's flattened rows.
    pub(crate) async fn query_raw(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<SparqlResults> {
        let sparql_text = sparql_text.to_string();
        let params = params.to_vec();
        let namespaces = Arc::clone(&self.inner.namespaces);

        let parsed = sparql::parse_query(&sparql_text, &namespaces, None)?;
        let results = self.run_query(parsed, params).await?;
        Ok(results)
    }

    async fn run_query(&self, parsed: ParsedQuery, params: Vec<(String, Param)>) -> EngineResult<SparqlResults> {
        let inner = Arc::clone(&self.inner);
        let query = parsed.query;
        let result = self
            .inner
            .scheduler
            .submit(TaskKind::QueryHigh, DEFAULT_TIMEOUT, move |_cancel| -> EngineResult<SparqlResults> {
                let conn = inner.storage.lock().unwrap().open_reader()?;
                run_query_blocking(&conn, &inner.ontology, query, params)
            })
            .await??;
        Ok(result)
    }

    /// Executes a SPARQL Update string (`INSERT DATA`/`DELETE DATA`/
    /// `DELETE ... INSERT ... WHERE`/`CLEAR`) as one transaction.
    pub async fn update(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<()> {
        self.update_blank(sparql_text, params).await?;
        Ok(())
    }

    /// Like [`Connection::update`], but returns one blank-node-label→IRI
    /// mapping per solution of the WHERE clause, for updates that mint new
    /// blank nodes (`INSERT { _:b ... } WHERE { ... }`). Spec's open
    /// decision: a WHERE clause with no bindings yields an empty list, not
    /// an error.
    pub async fn update_blank(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<Vec<HashMap<String, String>>> {
        if self.inner.read_only {
            return Err(EngineError::ConstraintViolated("connection is read-only".to_string()));
        }
        let namespaces = Arc::clone(&self.inner.namespaces);
        let parsed = sparql::parse_update(sparql_text, &namespaces, None)?;
        let inner = Arc::clone(&self.inner);
        let params = params.to_vec();

        let mappings = self
            .inner
            .scheduler
            .submit(TaskKind::UpdateHigh, DEFAULT_TIMEOUT, move |_cancel| -> EngineResult<Vec<HashMap<String, String>>> {
                apply_update_blocking(&inner, parsed.update, params)
            })
            .await??;
        Ok(mappings)
    }

    /// Streams `format`-encoded triples/quads into the store inside one
    /// transaction (spec: "Import is streaming").
    pub async fn deserialise(&self, data: &str, format: RdfFormat) -> EngineResult<usize> {
        if self.inner.read_only {
            return Err(EngineError::ConstraintViolated("connection is read-only".to_string()));
        }
        let quads = RdfParser::parse_quads(data, format).map_err(|e| EngineError::TypeError(e.to_string()))?;
        let inner = Arc::clone(&self.inner);
        let count = self
            .inner
            .scheduler
            .submit(TaskKind::Deserialise, DEFAULT_TIMEOUT, move |_cancel| -> EngineResult<usize> {
                insert_quads_blocking(&inner, &quads)
            })
            .await??;
        Ok(count)
    }

    /// Runs `query` as a DESCRIBE/CONSTRUCT and formats the resulting
    /// triples/quads per `format`.
    pub async fn serialise(&self, query: &str, format: RdfFormat) -> EngineResult<String> {
        let results = self.query_raw(query, &[]).await?;
        let triples = match results {
            SparqlResults::Construct(t) | SparqlResults::Describe(t) => t,
            _ => return Err(EngineError::TypeError("serialise requires a CONSTRUCT or DESCRIBE query".to_string())),
        };
        if format == RdfFormat::TriG {
            let quads: Vec<Quad> = triples.into_iter().map(Quad::from_triple).collect();
            RdfSerializer::serialize_quads(&quads, format).map_err(|e| EngineError::TypeError(e.to_string()))
        } else {
            RdfSerializer::serialize(&triples, format).map_err(|e| EngineError::TypeError(e.to_string()))
        }
    }

    pub fn statement(&self, sparql_text: &str) -> Statement {
        Statement { connection: self.clone(), sparql: sparql_text.to_string(), bindings: HashMap::new() }
    }

    pub fn subscribe(&self, classes: impl IntoIterator<Item = String>) -> Subscriber {
        self.inner.notifier.subscribe(classes)
    }
}

/// A prepared statement: a SPARQL string plus named bindings, built up via
/// `bind_*` before `execute`/`update`, matching spec §6's `Statement` type.
pub struct Statement {
    connection: Connection,
    sparql: String,
    bindings: HashMap<String, Param>,
}

impl Statement {
    pub fn bind_int(&mut self, name: &str, value: i64) {
        self.bindings.insert(name.to_string(), Param::Int(value));
    }
    pub fn bind_double(&mut self, name: &str, value: f64) {
        self.bindings.insert(name.to_string(), Param::Double(value));
    }
    pub fn bind_bool(&mut self, name: &str, value: bool) {
        self.bindings.insert(name.to_string(), Param::Bool(value));
    }
    pub fn bind_string(&mut self, name: &str, value: impl Into<String>) {
        self.bindings.insert(name.to_string(), Param::Str(value.into()));
    }

    fn params(&self) -> Vec<(String, Param)> {
        self.bindings.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub async fn execute(&self) -> EngineResult<Cursor> {
        self.connection.query(&self.sparql, &self.params()).await
    }

    pub async fn update(&self) -> EngineResult<()> {
        self.connection.update(&self.sparql, &self.params()).await
    }
}

fn run_query_blocking(
    conn: &SqliteConnection,
    ontology: &Ontology,
    query: SparqlQuery,
    params: Vec<(String, Param)>,
) -> EngineResult<SparqlResults> {
    match query {
        SparqlQuery::Select { pattern, .. } => {
            let pattern = bind_params(pattern, &params);
            let plan = sparql::lower(&pattern, ontology).map_err(sparql::SparqlError::from)?;
            let sql_plan = sparql::build_sql(&plan, ontology).map_err(sparql::SparqlError::from)?;
            sparql::execute_select(conn, &sql_plan).map_err(|e| EngineError::TypeError(e.to_string()))
        }
        SparqlQuery::Ask { pattern, .. } => {
            let pattern = bind_params(pattern, &params);
            let plan = sparql::lower(&pattern, ontology).map_err(sparql::SparqlError::from)?;
            let sql_plan = sparql::build_sql(&plan, ontology).map_err(sparql::SparqlError::from)?;
            sparql::execute_ask(conn, &sql_plan).map_err(|e| EngineError::TypeError(e.to_string()))
        }
        SparqlQuery::Construct { template, pattern, .. } => {
            let pattern = bind_params(pattern, &params);
            let plan = sparql::lower(&pattern, ontology).map_err(sparql::SparqlError::from)?;
            let sql_plan = sparql::build_sql(&plan, ontology).map_err(sparql::SparqlError::from)?;
            sparql::execute_construct(conn, &sql_plan, &template).map_err(|e| EngineError::TypeError(e.to_string()))
        }
        SparqlQuery::Describe { pattern, .. } => {
            let pattern = bind_params(pattern, &params);
            let plan = sparql::lower(&pattern, ontology).map_err(sparql::SparqlError::from)?;
            let sql_plan = sparql::build_sql(&plan, ontology).map_err(sparql::SparqlError::from)?;
            let select = sparql::execute_select(conn, &sql_plan).map_err(|e| EngineError::TypeError(e.to_string()))?;
            describe_from_select(conn, ontology, select)
        }
    }
}

fn bind_params(pattern: GraphPattern, params: &[(String, Param)]) -> GraphPattern {
    if params.is_empty() {
        return pattern;
    }
    let variables: Vec<Variable> = params.iter().map(|(n, _)| Variable::new_unchecked(n.clone())).collect();
    let row: Vec<Option<GroundTerm>> = params.iter().map(|(_, p)| Some(p.to_ground_term())).collect();
    GraphPattern::Join {
        left: Box::new(GraphPattern::Values { variables, bindings: vec![row] }),
        right: Box::new(pattern),
    }
}

/// DESCRIBE without an explicit CONSTRUCT template dumps every triple whose
/// subject is one of the resolved bindings' resource terms.
fn describe_from_select(conn: &SqliteConnection, ontology: &Ontology, select: SparqlResults) -> EngineResult<SparqlResults> {
    let solutions = match select {
        SparqlResults::Select { solutions, .. } => solutions,
        other => return Ok(other),
    };
    let mut subjects = Vec::new();
    for solution in &solutions {
        for term in solution.bindings.values() {
            if let RdfTerm::NamedNode(n) = term {
                subjects.push(n.as_str().to_string());
            }
        }
    }
    let mut triples = Vec::new();
    for iri in subjects {
        if let Some(id) = ident::resolve_id(conn, &iri)? {
            triples.extend(dump_subject_triples(conn, ontology, id)?);
        }
    }
    Ok(SparqlResults::Describe(triples))
}

/// Re-types a raw column read (whose storage class only distinguishes
/// SQLite's integer/real/text affinities) back into the value the ontology
/// says the column actually holds, undoing the encoding `ToSql for
/// TypedValue` applied on insert (e.g. `"text@lang"` for a language string,
/// an RFC 3339 string for a date-time, an interned id for a resource).
fn retype_column_value(raw: TypedValue, range: &PropertyRange) -> TypedValue {
    match (range, raw) {
        (PropertyRange::Class(_), TypedValue::Integer(id)) => TypedValue::Resource(id),
        (PropertyRange::Boolean, TypedValue::Integer(i)) => TypedValue::Boolean(i != 0),
        (PropertyRange::DateTime, TypedValue::String(s)) => chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| TypedValue::DateTime(dt.with_timezone(&chrono::Utc)))
            .unwrap_or(TypedValue::String(s)),
        (PropertyRange::LangString, TypedValue::String(s)) => match s.rsplit_once('@') {
            Some((text, lang)) => TypedValue::LangString(text.to_string(), lang.to_string()),
            None => TypedValue::String(s),
        },
        (_, raw) => raw,
    }
}

/// Resolves an interned resource id back into an `RdfObject`, for
/// `TypedValue::to_rdf_object`'s resolver callback.
fn resolve_object_resource(conn: &SqliteConnection, id: i64) -> Option<RdfObject> {
    let iri = ident::resolve_iri(conn, id).ok().flatten()?;
    if ident::is_blank(conn, id).unwrap_or(false) {
        BlankNode::from_str(&iri).ok().map(RdfObject::BlankNode)
    } else {
        NamedNode::new(&iri).ok().map(RdfObject::NamedNode)
    }
}

/// Walks every class table and property table a subject could appear in and
/// collects its triples: `rdf:type` membership from each class's `_type`
/// table, single-valued properties from the class table's own columns, and
/// multi-valued properties from their side tables. Used by DESCRIBE; not
/// performance-critical, so a full class scan per subject is acceptable.
fn dump_subject_triples(conn: &SqliteConnection, ontology: &Ontology, subject_id: i64) -> EngineResult<Vec<Triple>> {
    let Some(subject_iri) = ident::resolve_iri(conn, subject_id).map_err(EngineError::from)? else {
        return Ok(Vec::new());
    };
    let subject: RdfSubject = if ident::is_blank(conn, subject_id).map_err(EngineError::from)? {
        BlankNode::from_str(&subject_iri).map_err(|e| EngineError::TypeError(e.to_string()))?.into()
    } else {
        NamedNode::new(&subject_iri).map_err(|e| EngineError::TypeError(e.to_string()))?.into()
    };
    let rdf_type_predicate = RdfPredicate::new(RDF_TYPE).map_err(|e| EngineError::TypeError(e.to_string()))?;

    let mut triples = Vec::new();
    for class in ontology.classes_in_load_order() {
        let is_member: bool = conn
            .query_row(
                &format!("SELECT 1 FROM {}_type WHERE subject = ?1", class.table_name),
                params![subject_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(crate::storage::StorageError::Sqlite)
            .map_err(EngineError::from)?
            .is_some();
        if is_member {
            let class_node = NamedNode::new(&class.iri).map_err(|e| EngineError::TypeError(e.to_string()))?;
            triples.push(Triple::new(subject.clone(), rdf_type_predicate.clone(), RdfObject::NamedNode(class_node)));
        }

        for prop in ontology.properties_of_class(&class.iri) {
            let predicate = RdfPredicate::new(&prop.iri).map_err(|e| EngineError::TypeError(e.to_string()))?;
            match mapper::storage_of(prop, class) {
                PropertyStorage::SingleColumn { table, column } => {
                    let raw: Option<TypedValue> = conn
                        .query_row(&format!("SELECT {column} FROM {table} WHERE id = ?1"), params![subject_id], |row| {
                            if matches!(row.get_ref(0)?, rusqlite::types::ValueRef::Null) {
                                Ok(None)
                            } else {
                                row.get::<_, TypedValue>(0).map(Some)
                            }
                        })
                        .optional()
                        .map_err(crate::storage::StorageError::Sqlite)
                        .map_err(EngineError::from)?
                        .flatten();
                    if let Some(raw) = raw {
                        let value = retype_column_value(raw, &prop.range);
                        if let Some(object) = value.to_rdf_object(|id| resolve_object_resource(conn, id)) {
                            triples.push(Triple::new(subject.clone(), predicate.clone(), object));
                        }
                    }
                }
                PropertyStorage::MultiRow { table } => {
                    let mut stmt = conn
                        .prepare(&format!("SELECT value FROM {table} WHERE subject = ?1"))
                        .map_err(crate::storage::StorageError::Sqlite)
                        .map_err(EngineError::from)?;
                    let mut rows = stmt
                        .query(params![subject_id])
                        .map_err(crate::storage::StorageError::Sqlite)
                        .map_err(EngineError::from)?;
                    while let Some(row) = rows.next().map_err(crate::storage::StorageError::Sqlite).map_err(EngineError::from)? {
                        let raw: TypedValue = row.get(0).map_err(crate::storage::StorageError::Sqlite).map_err(EngineError::from)?;
                        let value = retype_column_value(raw, &prop.range);
                        if let Some(object) = value.to_rdf_object(|id| resolve_object_resource(conn, id)) {
                            triples.push(Triple::new(subject.clone(), predicate.clone(), object));
                        }
                    }
                }
            }
        }
    }
    Ok(triples)
}

fn apply_journal_frame(conn: &SqliteConnection, ontology: &Ontology, frame: &JournalFrame) -> crate::journal::JournalResult<()> {
    for op in &frame.ops {
        let Ok(Some(predicate_iri)) = ident::resolve_iri(conn, op.predicate) else { continue };
        if predicate_iri == RDF_TYPE {
            let TypedValue::Resource(class_id) = &op.object else { continue };
            let Ok(Some(class_iri)) = ident::resolve_iri(conn, *class_id) else { continue };
            let Some(class) = ontology.class_of(&class_iri) else { continue };
            match op.kind {
                OpKind::Insert => { let _ = mapper::set_type(conn, class, op.subject, op.graph); }
                OpKind::Delete => { let _ = mapper::unset_type(conn, class, op.subject); }
            }
            continue;
        }
        let Some(prop) = ontology.property_of(&predicate_iri) else { continue };
        let Some(class) = ontology.class_of(&prop.domain) else { continue };
        match op.kind {
            OpKind::Insert => { let _ = mapper::insert_triple(conn, class, prop, op.subject, op.graph, &op.object); }
            OpKind::Delete => { let _ = mapper::delete_triple(conn, class, prop, op.subject, Some(&op.object)); }
        }
    }
    Ok(())
}

/// Resolves `iri` to a resource id, interning (and incref-ing) it if new.
fn intern_term(conn: &SqliteConnection, iri: &str, is_blank: bool) -> EngineResult<i64> {
    let id = ident::intern(conn, iri, is_blank)?;
    ident::incref(conn, id)?;
    Ok(id)
}

/// Resolves a term for the delete path without interning: a resource object
/// that was never interned means the triple never existed, so this returns
/// `Ok(None)` instead of `ground_term_to_typed`'s create-and-incref. Literal
/// terms never intern anything, so they defer straight to `ground_term_to_typed`.
fn ground_term_to_typed_readonly(conn: &SqliteConnection, term: &spargebra::term::Term, prop: &PropertyDecl) -> EngineResult<Option<TypedValue>> {
    use spargebra::term::Term;
    Ok(match term {
        Term::NamedNode(n) => ident::resolve_id(conn, n.as_str())?.map(TypedValue::Resource),
        Term::BlankNode(b) => ident::resolve_id(conn, &format!("_:{}", b.as_str()))?.map(TypedValue::Resource),
        Term::Literal(_) => Some(ground_term_to_typed(conn, term, prop)?),
        Term::Triple(_) => return Err(EngineError::TypeError("RDF-star terms are not supported".to_string())),
    })
}

fn ground_term_to_typed(conn: &SqliteConnection, term: &spargebra::term::Term, prop: &PropertyDecl) -> EngineResult<TypedValue> {
    use spargebra::term::Term;
    Ok(match term {
        Term::NamedNode(n) => TypedValue::Resource(intern_term(conn, n.as_str(), false)?),
        Term::BlankNode(b) => TypedValue::Resource(intern_term(conn, &format!("_:{}", b.as_str()), true)?),
        Term::Literal(l) => {
            if let Some(lang) = l.language() {
                TypedValue::LangString(l.value().to_string(), lang.to_string())
            } else {
                match prop.range.canonical() {
                    "integer" => TypedValue::Integer(l.value().parse().unwrap_or_default()),
                    "double" => TypedValue::Double(l.value().parse().unwrap_or_default()),
                    "boolean" => TypedValue::Boolean(l.value() == "true" || l.value() == "1"),
                    "date_time" => TypedValue::DateTime(
                        chrono::DateTime::parse_from_rfc3339(l.value())
                            .map(|dt| dt.with_timezone(&chrono::Utc))
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    ),
                    _ => TypedValue::String(l.value().to_string()),
                }
            }
        }
        Term::Triple(_) => return Err(EngineError::TypeError("RDF-star terms are not supported".to_string())),
    })
}

struct TripleOp {
    class: ClassDecl,
    prop: Option<PropertyDecl>,
    subject_id: i64,
    graph_id: Option<i64>,
    value: TypedValue,
    is_type: bool,
}

fn resolve_quad_for_write(conn: &SqliteConnection, ontology: &Ontology, quad: &SgQuad) -> EngineResult<TripleOp> {
    use spargebra::term::{GraphName, Subject};

    let subject_iri = match &quad.subject {
        Subject::NamedNode(n) => n.as_str().to_string(),
        Subject::BlankNode(b) => format!("_:{}", b.as_str()),
        #[allow(unreachable_patterns)]
        _ => return Err(EngineError::TypeError("RDF-star subjects are not supported".to_string())),
    };
    let subject_id = intern_term(conn, &subject_iri, subject_iri.starts_with("_:"))?;
    let graph_id = match &quad.graph_name {
        GraphName::NamedNode(n) => Some(intern_term(conn, n.as_str(), false)?),
        GraphName::DefaultGraph => None,
    };

    if quad.predicate.as_str() == RDF_TYPE {
        let class_iri = match &quad.object {
            spargebra::term::Term::NamedNode(n) => n.as_str().to_string(),
            _ => return Err(EngineError::TypeError("rdf:type object must be a class IRI".to_string())),
        };
        let class = ontology.class_of(&class_iri).ok_or_else(|| EngineError::TypeError(format!("unknown class {class_iri}")))?;
        let class_id = intern_term(conn, &class_iri, false)?;
        return Ok(TripleOp {
            class: class.clone(),
            prop: None,
            subject_id,
            graph_id,
            value: TypedValue::Resource(class_id),
            is_type: true,
        });
    }

    let prop = ontology
        .property_of(quad.predicate.as_str())
        .ok_or_else(|| EngineError::TypeError(format!("unknown property {}", quad.predicate.as_str())))?
        .clone();
    let class = ontology.class_of(&prop.domain).ok_or_else(|| EngineError::TypeError(format!("unknown class {}", prop.domain)))?.clone();
    let value = ground_term_to_typed(conn, &quad.object, &prop)?;
    Ok(TripleOp { class, prop: Some(prop), subject_id, graph_id, value, is_type: false })
}

/// Property 4: two distinct non-deletion inserts of a single-valued
/// property on the same subject within one transaction must carry the same
/// value, or the whole transaction rolls back.
fn check_single_valued_conflicts(ontology: &Ontology, ops: &[TripleOp]) -> EngineResult<()> {
    let mut seen: HashMap<(i64, String), TypedValue> = HashMap::new();
    for op in ops {
        let Some(prop) = &op.prop else { continue };
        if !matches!(prop.cardinality, crate::ontology::Cardinality::Single) {
            continue;
        }
        let key = (op.subject_id, prop.iri.clone());
        if let Some(existing) = seen.get(&key) {
            if existing != &op.value {
                return Err(EngineError::ConstraintViolated(format!(
                    "conflicting values for single-valued property {} on subject {}",
                    prop.iri, op.subject_id
                )));
            }
        } else {
            seen.insert(key, op.value.clone());
        }
    }
    let _ = ontology;
    Ok(())
}

fn change_event_for(class: &ClassDecl, prop: Option<&PropertyDecl>, subject_id: i64, kind: ChangeKind) -> Option<ChangeEvent> {
    let notify = prop.map(|p| p.notify).unwrap_or(class.notify);
    if !notify {
        return None;
    }
    Some(ChangeEvent { class: class.iri.clone(), subject: subject_id, kind })
}

fn apply_update_blocking(
    inner: &Arc<ConnectionInner>,
    update: spargebra::Update,
    params: Vec<(String, Param)>,
) -> EngineResult<Vec<HashMap<String, String>>> {
    let storage = inner.storage.lock().unwrap();
    let mut journal = inner.journal.lock().unwrap();
    let conn = storage.write_conn();

    storage.begin()?;
    let tx_id = inner.tx_seq.fetch_add(1, Ordering::SeqCst);
    let mut journal_ops = Vec::new();
    let mut events = Vec::new();
    let mut blank_mappings = Vec::new();

    let result = (|| -> EngineResult<()> {
        for operation in update.operations {
            match operation {
                GraphUpdateOperation::InsertData { data } => {
                    let ops = data
                        .iter()
                        .map(|q| resolve_quad_for_write(conn, &inner.ontology, q))
                        .collect::<EngineResult<Vec<_>>>()?;
                    check_single_valued_conflicts(&inner.ontology, &ops)?;
                    for op in ops {
                        apply_insert(conn, &op, &mut journal_ops, &mut events)?;
                    }
                }
                GraphUpdateOperation::DeleteData { data } => {
                    for quad in &data {
                        if let Some(op) = resolve_delete_for_write(conn, &inner.ontology, quad)? {
                            apply_delete(conn, &op, &mut journal_ops, &mut events)?;
                        }
                    }
                }
                GraphUpdateOperation::DeleteInsert { delete, insert, pattern, .. } => {
                    let bound_pattern = bind_params(pattern, &params);
                    let plan = sparql::lower(&bound_pattern, &inner.ontology).map_err(sparql::SparqlError::from)?;
                    let sql_plan = sparql::build_sql(&plan, &inner.ontology).map_err(sparql::SparqlError::from)?;
                    let select = sparql::execute_select(conn, &sql_plan).map_err(|e| EngineError::TypeError(e.to_string()))?;
                    let solutions = match select {
                        SparqlResults::Select { solutions, .. } => solutions,
                        _ => unreachable!(),
                    };
                    if solutions.is_empty() {
                        blank_mappings.push(HashMap::new());
                    }
                    for solution in &solutions {
                        let mut blanks = HashMap::new();
                        for quad_pattern in &delete {
                            if let Some(quad) = instantiate_quad_pattern(quad_pattern, solution, &mut blanks)? {
                                if let Some(op) = resolve_delete_for_write(conn, &inner.ontology, &quad)? {
                                    apply_delete(conn, &op, &mut journal_ops, &mut events)?;
                                }
                            }
                        }
                        for quad_pattern in &insert {
                            if let Some(quad) = instantiate_quad_pattern(quad_pattern, solution, &mut blanks)? {
                                let op = resolve_quad_for_write(conn, &inner.ontology, &quad)?;
                                apply_insert(conn, &op, &mut journal_ops, &mut events)?;
                            }
                        }
                        blank_mappings.push(blanks);
                    }
                }
                GraphUpdateOperation::Clear { graph, .. } => {
                    clear_graph(conn, &inner.ontology, &graph)?;
                }
                other => {
                    warn!(?other, "unsupported SPARQL update operation, skipping");
                }
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            storage.commit()?;
            ident::collect_garbage(conn)?;
            journal.append(tx_id, journal_ops)?;
            inner.notifier.notify(events);
            Ok(blank_mappings)
        }
        Err(e) => {
            storage.rollback()?;
            Err(e)
        }
    }
}

fn apply_insert(conn: &SqliteConnection, op: &TripleOp, journal_ops: &mut Vec<JournalOp>, events: &mut Vec<ChangeEvent>) -> EngineResult<()> {
    if op.is_type {
        mapper::set_type(conn, &op.class, op.subject_id, op.graph_id)?;
    } else if let Some(prop) = &op.prop {
        mapper::insert_triple(conn, &op.class, prop, op.subject_id, op.graph_id, &op.value)?;
    }
    let predicate_iri = if op.is_type { RDF_TYPE.to_string() } else { op.prop.as_ref().unwrap().iri.clone() };
    let predicate_id = intern_term(conn, &predicate_iri, false)?;
    journal_ops.push(JournalOp { kind: OpKind::Insert, graph: op.graph_id, subject: op.subject_id, predicate: predicate_id, object: op.value.clone() });
    if let Some(event) = change_event_for(&op.class, op.prop.as_ref(), op.subject_id, ChangeKind::Create) {
        events.push(event);
    }
    Ok(())
}

fn apply_delete(conn: &SqliteConnection, op: &TripleOp, journal_ops: &mut Vec<JournalOp>, events: &mut Vec<ChangeEvent>) -> EngineResult<()> {
    if op.is_type {
        mapper::unset_type(conn, &op.class, op.subject_id)?;
    } else if let Some(prop) = &op.prop {
        mapper::delete_triple(conn, &op.class, prop, op.subject_id, Some(&op.value))?;
    }
    if let TypedValue::Resource(id) = op.value {
        ident::decref(conn, id)?;
    }
    ident::decref(conn, op.subject_id)?;
    if let Some(graph_id) = op.graph_id {
        ident::decref(conn, graph_id)?;
    }
    let predicate_iri = if op.is_type { RDF_TYPE.to_string() } else { op.prop.as_ref().unwrap().iri.clone() };
    let predicate_id = intern_term(conn, &predicate_iri, false)?;
    journal_ops.push(JournalOp { kind: OpKind::Delete, graph: op.graph_id, subject: op.subject_id, predicate: predicate_id, object: op.value.clone() });
    if let Some(event) = change_event_for(&op.class, op.prop.as_ref(), op.subject_id, ChangeKind::Delete) {
        events.push(event);
    }
    Ok(())
}

/// Resolves a quad targeted for deletion without interning anything: a
/// delete must never create a reference that insert never made. A subject,
/// graph, or type-class IRI that was never interned means the triple never
/// existed, so this returns `Ok(None)` and the delete becomes a no-op
/// rather than fabricating a resource row just to immediately decref it.
fn resolve_delete_for_write(conn: &SqliteConnection, ontology: &Ontology, quad: &SgQuad) -> EngineResult<Option<TripleOp>> {
    use spargebra::term::{GraphName, Subject};

    let subject_iri = match &quad.subject {
        Subject::NamedNode(n) => n.as_str().to_string(),
        Subject::BlankNode(b) => format!("_:{}", b.as_str()),
        #[allow(unreachable_patterns)]
        _ => return Err(EngineError::TypeError("RDF-star subjects are not supported".to_string())),
    };
    let Some(subject_id) = ident::resolve_id(conn, &subject_iri)? else {
        return Ok(None);
    };
    let graph_id = match &quad.graph_name {
        GraphName::NamedNode(n) => match ident::resolve_id(conn, n.as_str())? {
            Some(id) => Some(id),
            None => return Ok(None),
        },
        GraphName::DefaultGraph => None,
    };

    if quad.predicate.as_str() == RDF_TYPE {
        let class_iri = match &quad.object {
            spargebra::term::Term::NamedNode(n) => n.as_str().to_string(),
            _ => return Err(EngineError::TypeError("rdf:type object must be a class IRI".to_string())),
        };
        let class = ontology.class_of(&class_iri).ok_or_else(|| EngineError::TypeError(format!("unknown class {class_iri}")))?;
        let Some(class_id) = ident::resolve_id(conn, &class_iri)? else {
            return Ok(None);
        };
        return Ok(Some(TripleOp {
            class: class.clone(),
            prop: None,
            subject_id,
            graph_id,
            value: TypedValue::Resource(class_id),
            is_type: true,
        }));
    }

    let prop = ontology
        .property_of(quad.predicate.as_str())
        .ok_or_else(|| EngineError::TypeError(format!("unknown property {}", quad.predicate.as_str())))?
        .clone();
    let class = ontology.class_of(&prop.domain).ok_or_else(|| EngineError::TypeError(format!("unknown class {}", prop.domain)))?.clone();
    let Some(value) = ground_term_to_typed_readonly(conn, &quad.object, &prop)? else {
        return Ok(None);
    };
    Ok(Some(TripleOp { class, prop: Some(prop), subject_id, graph_id, value, is_type: false }))
}

fn instantiate_quad_pattern(
    pattern: &spargebra::term::QuadPattern,
    solution: &QuerySolution,
    blanks: &mut HashMap<String, String>,
) -> EngineResult<Option<SgQuad>> {
    use spargebra::term::{GraphName, Subject};

    let subject = match &pattern.subject {
        TermPattern::NamedNode(n) => Subject::NamedNode(n.clone()),
        TermPattern::BlankNode(b) => Subject::BlankNode(fresh_update_blank(b.as_str(), blanks)),
        TermPattern::Variable(v) => match solution.get(v.as_str()) {
            Some(RdfTerm::NamedNode(n)) => Subject::NamedNode(spargebra::term::NamedNode::new(n.as_str()).unwrap()),
            Some(RdfTerm::BlankNode(b)) => Subject::BlankNode(spargebra::term::BlankNode::new(b.as_str()).unwrap()),
            _ => return Ok(None),
        },
        TermPattern::Literal(_) | TermPattern::Triple(_) => return Ok(None),
    };
    let predicate = match &pattern.predicate {
        NamedNodePattern::NamedNode(n) => n.clone(),
        NamedNodePattern::Variable(v) => match solution.get(v.as_str()) {
            Some(RdfTerm::NamedNode(n)) => spargebra::term::NamedNode::new(n.as_str()).unwrap(),
            _ => return Ok(None),
        },
    };
    let object = match &pattern.object {
        TermPattern::NamedNode(n) => spargebra::term::Term::NamedNode(n.clone()),
        TermPattern::BlankNode(b) => spargebra::term::Term::BlankNode(fresh_update_blank(b.as_str(), blanks)),
        TermPattern::Literal(l) => spargebra::term::Term::Literal(l.clone()),
        TermPattern::Variable(v) => match solution.get(v.as_str()) {
            Some(RdfTerm::NamedNode(n)) => spargebra::term::Term::NamedNode(spargebra::term::NamedNode::new(n.as_str()).unwrap()),
            Some(RdfTerm::BlankNode(b)) => spargebra::term::Term::BlankNode(spargebra::term::BlankNode::new(b.as_str()).unwrap()),
            Some(RdfTerm::Literal(l)) => spargebra::term::Term::Literal(
                spargebra::term::Literal::new_simple_literal(l.value().to_string()),
            ),
            None => return Ok(None),
        },
        TermPattern::Triple(_) => return Ok(None),
    };
    let graph_name = match &pattern.graph_name {
        GraphNamePattern::NamedNode(n) => GraphName::NamedNode(n.clone()),
        GraphNamePattern::DefaultGraph => GraphName::DefaultGraph,
        GraphNamePattern::Variable(v) => match solution.get(v.as_str()) {
            Some(RdfTerm::NamedNode(n)) => GraphName::NamedNode(spargebra::term::NamedNode::new(n.as_str()).unwrap()),
            _ => GraphName::DefaultGraph,
        },
    };
    Ok(Some(SgQuad { subject, predicate, object, graph_name }))
}

fn fresh_update_blank(label: &str, blanks: &mut HashMap<String, String>) -> spargebra::term::BlankNode {
    if let Some(existing) = blanks.get(label) {
        return spargebra::term::BlankNode::new(existing.clone()).unwrap();
    }
    let fresh = crate::rdf::BlankNode::new();
    blanks.insert(label.to_string(), fresh.as_str().to_string());
    spargebra::term::BlankNode::new(fresh.as_str()).unwrap()
}

fn clear_graph(conn: &SqliteConnection, ontology: &Ontology, graph: &spargebra::algebra::GraphTarget) -> EngineResult<()> {
    use spargebra::algebra::GraphTarget;
    let graph_id = match graph {
        GraphTarget::NamedNode(n) => ident::resolve_id(conn, n.as_str())?,
        GraphTarget::DefaultGraph => None,
        GraphTarget::NamedNodes | GraphTarget::All => None,
    };
    for class in ontology.classes_in_load_order() {
        let sql = match graph_id {
            Some(id) => format!("DELETE FROM {}_type WHERE graph = {}", class.table_name, id),
            None => format!("DELETE FROM {}_type WHERE graph IS NULL", class.table_name),
        };
        conn.execute(&sql, []).map_err(crate::storage::StorageError::Sqlite)?;
    }
    Ok(())
}

fn insert_quads_blocking(inner: &Arc<ConnectionInner>, quads: &[Quad]) -> EngineResult<usize> {
    let storage = inner.storage.lock().unwrap();
    let mut journal = inner.journal.lock().unwrap();
    let conn = storage.write_conn();

    storage.begin()?;
    let tx_id = inner.tx_seq.fetch_add(1, Ordering::SeqCst);
    let mut journal_ops = Vec::new();
    let mut events = Vec::new();
    let mut inserted = 0usize;

    let result = (|| -> EngineResult<()> {
        for quad in quads {
            let sg_quad = rdf_quad_to_spargebra(quad)?;
            let op = resolve_quad_for_write(conn, &inner.ontology, &sg_quad)?;
            apply_insert(conn, &op, &mut journal_ops, &mut events)?;
            inserted += 1;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            storage.commit()?;
            journal.append(tx_id, journal_ops)?;
            inner.notifier.notify(events);
            Ok(inserted)
        }
        Err(e) => {
            storage.rollback()?;
            Err(e)
        }
    }
}

fn rdf_quad_to_spargebra(quad: &Quad) -> EngineResult<SgQuad> {
    use crate::rdf::{RdfObject, RdfSubject};
    use spargebra::term::{GraphName, Subject, Term};

    let subject = match &quad.subject {
        RdfSubject::NamedNode(n) => Subject::NamedNode(spargebra::term::NamedNode::new(n.as_str()).unwrap()),
        RdfSubject::BlankNode(b) => Subject::BlankNode(spargebra::term::BlankNode::new(b.as_str()).unwrap()),
    };
    let predicate = spargebra::term::NamedNode::new(quad.predicate.as_named_node().as_str()).unwrap();
    let object = match &quad.object {
        RdfObject::NamedNode(n) => Term::NamedNode(spargebra::term::NamedNode::new(n.as_str()).unwrap()),
        RdfObject::BlankNode(b) => Term::BlankNode(spargebra::term::BlankNode::new(b.as_str()).unwrap()),
        RdfObject::Literal(l) => Term::Literal(if let Some(lang) = l.language() {
            spargebra::term::Literal::new_language_tagged_literal(l.value(), lang).unwrap()
        } else {
            spargebra::term::Literal::new_typed_literal(l.value(), spargebra::term::NamedNode::new(l.datatype().as_str()).unwrap())
        }),
    };
    let graph_name = match &quad.graph {
        Some(g) => GraphName::NamedNode(spargebra::term::NamedNode::new(g.as_str()).unwrap()),
        None => GraphName::DefaultGraph,
    };
    Ok(SgQuad { subject, predicate, object, graph_name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_param_parses_each_type() {
        assert!(matches!(Param::parse_wire("n:i:42"), Some((_, Param::Int(42)))));
        assert!(matches!(Param::parse_wire("n:b:t"), Some((_, Param::Bool(true)))));
        assert!(matches!(Param::parse_wire("n:s:hi"), Some((_, Param::Str(s))) if s == "hi"));
        assert!(Param::parse_wire("garbage").is_none());
    }

    #[test]
    fn cursor_reports_unbound_as_none() {
        let mut solution = QuerySolution::new();
        solution.bind("s", RdfTerm::NamedNode(NamedNode::new("http://example.org/a").unwrap()));
        let mut cursor = Cursor::new(vec!["s".to_string(), "p".to_string()], vec![solution]);
        assert!(cursor.next());
        assert!(cursor.value(0).is_some());
        assert!(cursor.value(1).is_none());
        assert!(!cursor.next());
    }
}
