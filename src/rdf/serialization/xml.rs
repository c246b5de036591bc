//! RDF/XML format implementation

use crate::rdf::{Triple, NamedNode, BlankNode, Literal, RdfSubject, RdfObject};
use super::{ParseError, ParseResult};
use rio_api::parser::TriplesParser;
use rio_xml::RdfXmlParser;
use std::io::{BufReader, Cursor};

pub struct RdfXmlParserWrapper;

impl RdfXmlParserWrapper {
    pub fn parse(input: &str) -> ParseResult<Vec<Triple>> {
        let cursor = Cursor::new(input);
        let mut reader = BufReader::new(cursor);
        let mut parser = RdfXmlParser::new(&mut reader, None);
        let mut triples = Vec::new();

        let res: Result<(), rio_xml::RdfXmlError> = parser.parse_all(&mut |t| {
            let subject = convert_subject(t.subject)?;
            let predicate = NamedNode::new(t.predicate.iri)
                .map_err(|e| to_io_err(e.to_string()))?;
            let object = convert_object(t.object)?;
            triples.push(Triple::new(subject, predicate.into(), object));
            Ok(())
        });

        res.map(|_| triples).map_err(|e| ParseError::Parse(e.to_string()))
    }
}

fn to_io_err(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn convert_subject(s: rio_api::model::Subject) -> Result<RdfSubject, std::io::Error> {
    match s {
        rio_api::model::Subject::NamedNode(n) => NamedNode::new(n.iri)
            .map(RdfSubject::NamedNode)
            .map_err(|e| to_io_err(e.to_string())),
        rio_api::model::Subject::BlankNode(b) => BlankNode::from_str(b.id)
            .map(RdfSubject::BlankNode)
            .map_err(|e| to_io_err(e.to_string())),
        _ => Err(to_io_err("unsupported subject".into())),
    }
}

fn convert_object(o: rio_api::model::Term) -> Result<RdfObject, std::io::Error> {
    match o {
        rio_api::model::Term::NamedNode(n) => NamedNode::new(n.iri)
            .map(RdfObject::NamedNode)
            .map_err(|e| to_io_err(e.to_string())),
        rio_api::model::Term::BlankNode(b) => BlankNode::from_str(b.id)
            .map(RdfObject::BlankNode)
            .map_err(|e| to_io_err(e.to_string())),
        rio_api::model::Term::Literal(l) => match l {
            rio_api::model::Literal::Simple { value } => {
                Ok(RdfObject::Literal(Literal::new_simple_literal(value)))
            }
            rio_api::model::Literal::LanguageTaggedString { value, language } => {
                Literal::new_language_tagged_literal(value, language)
                    .map(RdfObject::Literal)
                    .map_err(|e| to_io_err(e.to_string()))
            }
            rio_api::model::Literal::Typed { value, datatype } => {
                let dt = NamedNode::new(datatype.iri).map_err(|e| to_io_err(e.to_string()))?;
                Ok(RdfObject::Literal(Literal::new_typed_literal(value, dt)))
            }
        },
        _ => Err(to_io_err("unsupported object".into())),
    }
}
