//! Local semantic metadata engine: ontology-driven RDF storage over SQLite,
//! queried and updated with SPARQL 1.1, with journal-backed durability,
//! full-text search and change notification.
//!
//! [`Connection`] is the library's single entry point: it owns the
//! ontology, the storage backend, the write-ahead journal, the scheduler
//! and the change notifier for one opened data directory.
//!
//! ```no_run
//! use semantic_store::{Connection, OpenFlags};
//!
//! # async fn run() -> semantic_store::EngineResult<()> {
//! let conn = Connection::open(OpenFlags::default(), "./data", "./ontology").await?;
//! conn.update("INSERT DATA { <http://example.org/a> a <http://example.org/Doc> }", &[]).await?;
//! let results = conn.query("SELECT ?s { ?s a <http://example.org/Doc> }", &[]).await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fts;
pub mod http;
pub mod ident;
pub mod journal;
pub mod mapper;
pub mod notify;
pub mod ontology;
pub mod rdf;
pub mod remote;
pub mod scheduler;
pub mod sparql;
pub mod storage;
pub mod value;

mod connection;

pub use config::EngineConfig;
pub use connection::{Connection, Cursor, Namespaces, OpenFlags, Param, Statement};
pub use error::{EngineError, EngineResult};
pub use notify::{ChangeEvent, ChangeKind, Subscriber};
pub use ontology::Ontology;
pub use rdf::{
    BlankNode, Literal, NamedNode, NamespaceManager, Quad, QuadPattern, RdfFormat, RdfObject,
    RdfParser, RdfPredicate, RdfSerializer, RdfSubject, RdfTerm, Triple, TriplePattern,
};
pub use sparql::{QuerySolution, ResultFormat, SparqlResults};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
