//! RDF term model and serialization.
//!
//! Wraps `oxrdf` primitives with the subject/predicate/object/term split the
//! rest of the engine works with, plus namespace handling and Turtle/TriG/
//! JSON-LD import and export.

mod types;
mod namespace;
mod serialization;

pub use types::{
    RdfTerm, RdfSubject, RdfPredicate, RdfObject, RdfError, RdfResult,
    NamedNode, BlankNode, Literal, Triple, Quad,
    TriplePattern, QuadPattern,
};

pub use namespace::{
    NamespaceManager, Namespace,
    PrefixError, PrefixResult,
};

pub use serialization::{
    RdfFormat, RdfParser, RdfSerializer,
    ParseError, ParseResult,
    SerializeError, SerializeResult,
};
