//! Runs a planned SQL statement against a connection and turns rows back
//! into [`QuerySolution`]s, a boolean (ASK), or constructed triples
//! (CONSTRUCT/DESCRIBE).

use std::collections::HashMap;

use rusqlite::{Connection, Row};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern as SgTriplePattern};
use thiserror::Error;

use super::planner::{SqlPlan, VarRange};
use super::results::{QuerySolution, SparqlResults};
use crate::ident;
use crate::rdf::{BlankNode, Literal as RdfLiteral, NamedNode, RdfObject, RdfPredicate, RdfSubject, RdfTerm, Triple};
use crate::value::{RangeKind, TypedValue};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unresolvable resource id {0}")]
    DanglingResource(i64),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

fn resolve_resource(conn: &Connection, id: i64) -> ExecutionResult<RdfTerm> {
    let iri = ident::resolve_iri(conn, id)?.ok_or(ExecutionError::DanglingResource(id))?;
    if ident::is_blank(conn, id)? {
        Ok(RdfTerm::BlankNode(BlankNode::from_str(&iri).unwrap_or_default()))
    } else {
        Ok(RdfTerm::NamedNode(NamedNode::new(&iri).map_err(|_| ExecutionError::DanglingResource(id))?))
    }
}

fn row_value(row: &Row, index: usize, range: VarRange) -> rusqlite::Result<Option<RawCell>> {
    let null = matches!(row.get_ref(index)?, rusqlite::types::ValueRef::Null);
    if null {
        return Ok(None);
    }
    Ok(Some(match range {
        VarRange::Resource => RawCell::Resource(row.get::<_, i64>(index)?),
        VarRange::Literal(kind) => RawCell::Literal(kind, row.get::<_, TypedValue>(index)?),
        VarRange::Computed => RawCell::Literal(RangeKind::String, row.get::<_, TypedValue>(index)?),
    }))
}

enum RawCell {
    Resource(i64),
    Literal(RangeKind, TypedValue),
}

fn cell_to_term(conn: &Connection, cell: RawCell) -> ExecutionResult<RdfTerm> {
    match cell {
        RawCell::Resource(id) => resolve_resource(conn, id),
        RawCell::Literal(_, value) => {
            let object = value.to_rdf_object(|_| None).unwrap_or_else(|| RdfObject::Literal(RdfLiteral::new_simple_literal("")));
            Ok(object.into())
        }
    }
}

/// Executes a planned SELECT and materializes every solution. Spec's
/// forward-only cursor semantics are honoured by the caller (the scheduler
/// submits this as one blocking job and streams rows out via a channel for
/// large result sets); for the common case of bounded result sets this
/// collects eagerly.
pub fn execute_select(conn: &Connection, plan: &SqlPlan) -> ExecutionResult<SparqlResults> {
    let mut stmt = conn.prepare(&plan.sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = plan.params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let variables: Vec<String> = plan.projected.iter().map(|p| p.variable.as_str().to_string()).collect();

    let mut solutions = Vec::new();
    let mut rows = stmt.query(params.as_slice())?;
    while let Some(row) = rows.next()? {
        let mut solution = QuerySolution::new();
        for projected in &plan.projected {
            if let Some(cell) = row_value(row, projected.index, projected.range)? {
                let term = cell_to_term(conn, cell)?;
                solution.bind(projected.variable.as_str().to_string(), term);
            }
        }
        solutions.push(solution);
    }

    Ok(SparqlResults::Select { variables, solutions })
}

pub fn execute_ask(conn: &Connection, plan: &SqlPlan) -> ExecutionResult<SparqlResults> {
    let sql = format!("SELECT EXISTS ({})", plan.sql);
    let params: Vec<&dyn rusqlite::ToSql> = plan.params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let exists: bool = conn.query_row(&sql, params.as_slice(), |r| r.get::<_, i64>(0))? != 0;
    Ok(SparqlResults::Ask(exists))
}

/// Executes the WHERE clause of a CONSTRUCT/DESCRIBE query, then
/// instantiates `template` once per solution, substituting bound variables
/// and minting a fresh blank node per solution for each template blank node
/// (the "blank node scope is one solution" rule §4.5 names), and dedups the
/// resulting triples.
pub fn execute_construct(conn: &Connection, plan: &SqlPlan, template: &[SgTriplePattern]) -> ExecutionResult<SparqlResults> {
    let select = execute_select(conn, plan)?;
    let solutions = match select {
        SparqlResults::Select { solutions, .. } => solutions,
        _ => unreachable!(),
    };

    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for solution in &solutions {
        let mut blank_scope: HashMap<String, BlankNode> = HashMap::new();
        for triple in template {
            if let Some(t) = instantiate(triple, solution, &mut blank_scope) {
                if seen.insert(format!("{t}")) {
                    out.push(t);
                }
            }
        }
    }
    Ok(SparqlResults::Construct(out))
}

fn term_pattern_to_subject(term: &TermPattern, solution: &QuerySolution, blank_scope: &mut HashMap<String, BlankNode>) -> Option<RdfSubject> {
    match term {
        TermPattern::NamedNode(n) => Some(RdfSubject::NamedNode(NamedNode::new(n.as_str()).ok()?)),
        TermPattern::BlankNode(b) => Some(RdfSubject::BlankNode(fresh_blank(b.as_str(), blank_scope))),
        TermPattern::Variable(v) => match solution.get(v.as_str())?.clone() {
            RdfTerm::NamedNode(n) => Some(RdfSubject::NamedNode(n)),
            RdfTerm::BlankNode(b) => Some(RdfSubject::BlankNode(b)),
            RdfTerm::Literal(_) => None,
        },
        TermPattern::Literal(_) | TermPattern::Triple(_) => None,
    }
}

fn named_node_pattern_to_predicate(pred: &NamedNodePattern, solution: &QuerySolution) -> Option<RdfPredicate> {
    match pred {
        NamedNodePattern::NamedNode(n) => RdfPredicate::new(n.as_str()).ok(),
        NamedNodePattern::Variable(v) => match solution.get(v.as_str())? {
            RdfTerm::NamedNode(n) => RdfPredicate::new(n.as_str()).ok(),
            _ => None,
        },
    }
}

fn term_pattern_to_object(term: &TermPattern, solution: &QuerySolution, blank_scope: &mut HashMap<String, BlankNode>) -> Option<RdfObject> {
    match term {
        TermPattern::NamedNode(n) => Some(RdfObject::NamedNode(NamedNode::new(n.as_str()).ok()?)),
        TermPattern::BlankNode(b) => Some(RdfObject::BlankNode(fresh_blank(b.as_str(), blank_scope))),
        TermPattern::Literal(l) => Some(RdfObject::Literal(spargebra_literal_to_rdf(l))),
        TermPattern::Variable(v) => Some(solution.get(v.as_str())?.clone().into()),
        TermPattern::Triple(_) => None,
    }
}

fn spargebra_literal_to_rdf(lit: &spargebra::term::Literal) -> RdfLiteral {
    if let Some(lang) = lit.language() {
        RdfLiteral::new_language_tagged_literal(lit.value(), lang).unwrap_or_else(|_| RdfLiteral::new_simple_literal(lit.value()))
    } else {
        RdfLiteral::new_typed_literal(lit.value(), NamedNode::new(lit.datatype().as_str()).unwrap())
    }
}

fn instantiate(triple: &SgTriplePattern, solution: &QuerySolution, blank_scope: &mut HashMap<String, BlankNode>) -> Option<Triple> {
    let subject = term_pattern_to_subject(&triple.subject, solution, blank_scope)?;
    let predicate = named_node_pattern_to_predicate(&triple.predicate, solution)?;
    let object = term_pattern_to_object(&triple.object, solution, blank_scope)?;
    Some(Triple::new(subject, predicate, object))
}

fn fresh_blank(label: &str, scope: &mut HashMap<String, BlankNode>) -> BlankNode {
    scope.entry(label.to_string()).or_insert_with(BlankNode::new).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::planner::{ProjectedVar, VarRange};
    use spargebra::term::Variable;

    #[test]
    fn ask_wraps_select_exists() {
        let conn = Connection::open_in_memory().unwrap();
        let plan = SqlPlan {
            sql: "SELECT 1 WHERE 1 = 0".to_string(),
            params: vec![],
            projected: vec![],
        };
        let result = execute_ask(&conn, &plan).unwrap();
        assert!(matches!(result, SparqlResults::Ask(false)));
    }

    #[test]
    fn select_materializes_literal_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let plan = SqlPlan {
            sql: "SELECT 'hello' AS s".to_string(),
            params: vec![],
            projected: vec![ProjectedVar {
                variable: Variable::new_unchecked("s".to_string()),
                index: 0,
                range: VarRange::Literal(RangeKind::String),
            }],
        };
        let result = execute_select(&conn, &plan).unwrap();
        match result {
            SparqlResults::Select { solutions, .. } => {
                assert_eq!(solutions.len(), 1);
                assert_eq!(solutions[0].get("s"), Some(&RdfTerm::Literal(RdfLiteral::new_simple_literal("hello"))));
            }
            _ => panic!("expected Select"),
        }
    }
}
