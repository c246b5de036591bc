//! Crate-wide error type implementing the engine's error taxonomy.

use thiserror::Error;

use crate::ontology::OntologyError;
use crate::sparql::SparqlError;
use crate::storage::StorageError;
use crate::journal::JournalError;

/// Every failure mode an application using the engine can observe.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A SPARQL query or update string failed to parse.
    #[error("parse error at offset {offset}: {message}")]
    ParseError { offset: usize, message: String },

    /// A query referenced a class, property or prefix the ontology does not
    /// define, or bound a parameter to a value outside a property's range.
    #[error("type error: {0}")]
    TypeError(String),

    /// The write connection could not acquire the database within the
    /// configured busy timeout.
    #[error("storage busy: {0}")]
    StorageBusy(String),

    /// The on-disk database or journal failed an integrity check.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// A write would have violated a cardinality, range or uniqueness
    /// constraint derived from the ontology.
    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    /// Underlying I/O failure (disk, journal file, bundle directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ontology bundle itself was malformed or inconsistent.
    #[error("ontology error: {0}")]
    Ontology(#[from] OntologyError),

    /// A query or update timed out while waiting for a scheduler slot.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The operation was cancelled at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// A remote (bus/HTTP) connection failed.
    #[error("remote connection error: {0}")]
    Remote(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Busy(m) => EngineError::StorageBusy(m),
            StorageError::Corrupt(m) => EngineError::StorageCorrupt(m),
            StorageError::ConstraintViolated(m) => EngineError::ConstraintViolated(m),
            StorageError::Io(e) => EngineError::Io(e),
            StorageError::Sqlite(e) => EngineError::StorageCorrupt(e.to_string()),
        }
    }
}

impl From<JournalError> for EngineError {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Io(e) => EngineError::Io(e),
            JournalError::Serialization(e) => EngineError::StorageCorrupt(e.to_string()),
            JournalError::Corruption(seq) => {
                EngineError::StorageCorrupt(format!("journal corruption at sequence {seq}"))
            }
        }
    }
}

impl From<SparqlError> for EngineError {
    fn from(e: SparqlError) -> Self {
        match e {
            SparqlError::Parse { offset, message } => EngineError::ParseError { offset, message },
            SparqlError::Type(m) => EngineError::TypeError(m),
            SparqlError::Storage(e) => e.into(),
            SparqlError::UnboundVariable(v) => {
                EngineError::TypeError(format!("unbound variable: {v}"))
            }
            SparqlError::UnsupportedFeature(f) => {
                EngineError::TypeError(format!("unsupported SPARQL feature: {f}"))
            }
        }
    }
}

impl From<crate::sparql::ExecutionError> for EngineError {
    fn from(e: crate::sparql::ExecutionError) -> Self {
        match e {
            crate::sparql::ExecutionError::Storage(e) => e.into(),
            crate::sparql::ExecutionError::Sqlite(e) => EngineError::StorageCorrupt(e.to_string()),
            crate::sparql::ExecutionError::DanglingResource(id) => {
                EngineError::StorageCorrupt(format!("unresolvable resource id {id}"))
            }
        }
    }
}
