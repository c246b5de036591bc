//! SPARQL 1.1 front end: parsing (`spargebra`), algebra lowering against the
//! ontology-derived schema, SQL planning/execution, and result formatting.

mod algebra;
mod executor;
mod parser;
mod planner;
mod results;

pub use algebra::{lower, Plan, PlanError};
pub use executor::{execute_ask, execute_construct, execute_select, ExecutionError};
pub use parser::{parse_query, parse_update, ParsedQuery, ParsedUpdate};
pub use planner::{build_sql, SqlPlan};
pub use results::{QuerySolution, ResultFormat, SparqlResults};

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SparqlError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    #[error("unsupported SPARQL feature: {0}")]
    UnsupportedFeature(String),
}

pub type SparqlResult<T> = Result<T, SparqlError>;

impl From<PlanError> for SparqlError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::UnknownProperty(p) => SparqlError::Type(format!("unknown property: {p}")),
            PlanError::UnknownClass(c) => SparqlError::Type(format!("unknown class: {c}")),
            PlanError::Unsupported(f) => SparqlError::UnsupportedFeature(f),
        }
    }
}
