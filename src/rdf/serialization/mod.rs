//! RDF serialization formats: Turtle, TriG, N-Triples, RDF/XML, JSON-LD.

mod turtle;
mod xml;
mod jsonld;

use super::{Quad, Triple};
use thiserror::Error;

pub use turtle::{TriGParserWrapper, TriGSerializerWrapper, TurtleParserWrapper, TurtleSerializerWrapper};
pub use xml::RdfXmlParserWrapper;
pub use jsonld::{JsonLdParserWrapper, JsonLdSerializerWrapper};

/// RDF serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    /// Turtle format (.ttl)
    Turtle,
    /// TriG format (.trig), Turtle extended with named graphs
    TriG,
    /// N-Triples format (.nt)
    NTriples,
    /// RDF/XML format (.rdf)
    RdfXml,
    /// JSON-LD format (.jsonld), flat form only
    JsonLd,
}

/// Parse errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unsupported format
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(RdfFormat),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Serialization errors
#[derive(Error, Debug)]
pub enum SerializeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(RdfFormat),
}

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Streaming-style RDF import entry point. `Turtle`/`NTriples` parse into
/// triples (default graph); `TriG` parses into quads and triples carrying no
/// graph information are dropped into the default graph.
pub struct RdfParser;

impl RdfParser {
    pub fn parse(input: &str, format: RdfFormat) -> ParseResult<Vec<Triple>> {
        match format {
            RdfFormat::Turtle | RdfFormat::NTriples => TurtleParserWrapper::parse(input),
            RdfFormat::RdfXml => RdfXmlParserWrapper::parse(input),
            RdfFormat::JsonLd => JsonLdParserWrapper::parse(input),
            RdfFormat::TriG => Err(ParseError::Parse(
                "TriG parses to quads; use RdfParser::parse_quads".to_string(),
            )),
        }
    }

    /// Parse formats that may carry named-graph information.
    pub fn parse_quads(input: &str, format: RdfFormat) -> ParseResult<Vec<Quad>> {
        match format {
            RdfFormat::TriG => TriGParserWrapper::parse(input),
            other => Self::parse(input, other).map(|triples| {
                triples.into_iter().map(Quad::from_triple).collect()
            }),
        }
    }
}

/// RDF export entry point.
pub struct RdfSerializer;

impl RdfSerializer {
    pub fn serialize(triples: &[Triple], format: RdfFormat) -> SerializeResult<String> {
        match format {
            RdfFormat::Turtle | RdfFormat::NTriples => TurtleSerializerWrapper::serialize(triples),
            RdfFormat::JsonLd => JsonLdSerializerWrapper::serialize(triples),
            RdfFormat::TriG => {
                let quads: Vec<Quad> = triples.iter().cloned().map(Quad::from_triple).collect();
                TriGSerializerWrapper::serialize(&quads)
            }
            RdfFormat::RdfXml => Err(SerializeError::UnsupportedFormat(format)),
        }
    }

    pub fn serialize_quads(quads: &[Quad], format: RdfFormat) -> SerializeResult<String> {
        match format {
            RdfFormat::TriG => TriGSerializerWrapper::serialize(quads),
            other => {
                let triples: Vec<Triple> = quads.iter().map(Quad::as_triple).collect();
                Self::serialize(&triples, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turtle_roundtrip_via_dispatch() {
        let input = r#"<http://example.org/a> <http://example.org/b> "c" ."#;
        let triples = RdfParser::parse(input, RdfFormat::Turtle).unwrap();
        assert_eq!(triples.len(), 1);
        let output = RdfSerializer::serialize(&triples, RdfFormat::Turtle).unwrap();
        assert!(output.contains("http://example.org/a"));
    }

    #[test]
    fn test_jsonld_dispatch() {
        let input = r#"[{"@id":"http://example.org/a","http://example.org/b":[{"@value":"c"}]}]"#;
        let triples = RdfParser::parse(input, RdfFormat::JsonLd).unwrap();
        assert_eq!(triples.len(), 1);
    }
}
