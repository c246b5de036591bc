//! SPARQL result sets and their JSON/XML/CSV/TSV serializations.

use std::collections::HashMap;
use std::io::Write;

use sparesults::{QueryResultsFormat, QueryResultsSerializer};
use spargebra::term::Variable;

use crate::rdf::{RdfTerm, Triple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    Xml,
    Csv,
    Tsv,
}

impl From<ResultFormat> for QueryResultsFormat {
    fn from(f: ResultFormat) -> Self {
        match f {
            ResultFormat::Json => QueryResultsFormat::Json,
            ResultFormat::Xml => QueryResultsFormat::Xml,
            ResultFormat::Csv => QueryResultsFormat::Csv,
            ResultFormat::Tsv => QueryResultsFormat::Tsv,
        }
    }
}

/// One row of a SELECT result: variable name to bound term. A variable
/// absent from the map is unbound in this solution.
#[derive(Debug, Clone, Default)]
pub struct QuerySolution {
    pub bindings: HashMap<String, RdfTerm>,
}

impl QuerySolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &str) -> Option<&RdfTerm> {
        self.bindings.get(variable)
    }

    pub fn bind(&mut self, variable: impl Into<String>, term: RdfTerm) {
        self.bindings.insert(variable.into(), term);
    }
}

#[derive(Debug, Clone)]
pub enum SparqlResults {
    Select { variables: Vec<String>, solutions: Vec<QuerySolution> },
    Ask(bool),
    Construct(Vec<Triple>),
    Describe(Vec<Triple>),
}

impl SparqlResults {
    pub fn empty() -> Self {
        SparqlResults::Select { variables: Vec::new(), solutions: Vec::new() }
    }

    /// Serializes SELECT/ASK results via `sparesults`; CONSTRUCT/DESCRIBE
    /// results are RDF graphs and must go through
    /// [`crate::rdf::RdfSerializer`] instead (a graph has no tabular form).
    pub fn serialize(&self, format: ResultFormat) -> Result<String, String> {
        match self {
            SparqlResults::Select { variables, solutions } => serialize_select(variables, solutions, format),
            SparqlResults::Ask(value) => serialize_ask(*value, format),
            SparqlResults::Construct(_) | SparqlResults::Describe(_) => {
                Err("CONSTRUCT/DESCRIBE results serialize as RDF, not SPARQL results".to_string())
            }
        }
    }
}

fn term_to_oxrdf(term: &RdfTerm) -> oxrdf::Term {
    match term {
        RdfTerm::NamedNode(n) => oxrdf::Term::NamedNode(n.inner().clone()),
        RdfTerm::BlankNode(b) => oxrdf::Term::BlankNode(b.inner().clone()),
        RdfTerm::Literal(l) => oxrdf::Term::Literal(l.inner().clone()),
    }
}

fn serialize_select(variables: &[String], solutions: &[QuerySolution], format: ResultFormat) -> Result<String, String> {
    let serializer = QueryResultsSerializer::from_format(format.into());
    let vars: Vec<Variable> = variables.iter().map(|v| Variable::new_unchecked(v.clone())).collect();
    let mut writer = serializer
        .solutions_writer(Vec::new(), vars)
        .map_err(|e| e.to_string())?;
    for solution in solutions {
        let row: Vec<(Variable, oxrdf::Term)> = variables
            .iter()
            .filter_map(|v| solution.get(v).map(|t| (Variable::new_unchecked(v.clone()), term_to_oxrdf(t))))
            .collect();
        writer.write(row).map_err(|e| e.to_string())?;
    }
    let buf = writer.finish().map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

fn serialize_ask(value: bool, format: ResultFormat) -> Result<String, String> {
    let serializer = QueryResultsSerializer::from_format(format.into());
    let mut buf = Vec::new();
    serializer
        .write_boolean_result(&mut buf, value)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::NamedNode;

    #[test]
    fn empty_results_has_no_solutions() {
        match SparqlResults::empty() {
            SparqlResults::Select { variables, solutions } => {
                assert!(variables.is_empty());
                assert!(solutions.is_empty());
            }
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn solution_roundtrips_a_binding() {
        let mut solution = QuerySolution::new();
        let node = NamedNode::new("http://example.org/a").unwrap();
        solution.bind("s", RdfTerm::NamedNode(node.clone()));
        assert_eq!(solution.get("s"), Some(&RdfTerm::NamedNode(node)));
    }
}
