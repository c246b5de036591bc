//! Turtle format implementation

use crate::rdf::{
    Triple, Quad, NamedNode, BlankNode, Literal, RdfSubject, RdfPredicate, RdfObject
};
use super::{ParseResult, SerializeResult, ParseError, SerializeError};
use rio_api::parser::{TriplesParser, QuadsParser};
use rio_api::formatter::TriplesFormatter;
use rio_turtle::{TurtleParser, TurtleFormatter, TriGParser};
use std::io::{BufReader, Cursor};

/// Turtle parser
pub struct TurtleParserWrapper;

impl TurtleParserWrapper {
    /// Parse Turtle string to Triples
    pub fn parse(input: &str) -> ParseResult<Vec<Triple>> {
        let cursor = Cursor::new(input);
        let mut reader = BufReader::new(cursor);
        let mut parser = TurtleParser::new(&mut reader, None);
        
        let mut triples = Vec::new();
        
        let res: Result<(), rio_turtle::TurtleError> = parser.parse_all(&mut |t| {
            let subject = convert_subject(t.subject).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let predicate = convert_predicate(t.predicate).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let object = convert_object(t.object).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            
            triples.push(Triple::new(subject, predicate, object));
            Ok(())
        });

        match res {
            Ok(_) => Ok(triples),
            Err(e) => Err(ParseError::Parse(e.to_string())),
        }
    }
}

/// TriG parser (Turtle extended with named graphs)
pub struct TriGParserWrapper;

impl TriGParserWrapper {
    /// Parse TriG string to Quads
    pub fn parse(input: &str) -> ParseResult<Vec<Quad>> {
        let cursor = Cursor::new(input);
        let mut reader = BufReader::new(cursor);
        let mut parser = TriGParser::new(&mut reader, None);

        let mut quads = Vec::new();
        let res: Result<(), rio_turtle::TurtleError> = parser.parse_all(&mut |q| {
            let subject = convert_subject(q.subject)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let predicate = convert_predicate(q.predicate)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let object = convert_object(q.object)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let graph = match q.graph_name {
                Some(rio_api::model::GraphName::NamedNode(n)) => Some(
                    NamedNode::new(n.iri)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?,
                ),
                Some(rio_api::model::GraphName::BlankNode(_)) | None => None,
                _ => None,
            };
            quads.push(Quad::new(subject, predicate, object, graph));
            Ok(())
        });

        match res {
            Ok(_) => Ok(quads),
            Err(e) => Err(ParseError::Parse(e.to_string())),
        }
    }
}

/// Turtle serializer
pub struct TurtleSerializerWrapper;

impl TurtleSerializerWrapper {
    /// Serialize Triples to Turtle string
    pub fn serialize(triples: &[Triple]) -> SerializeResult<String> {
        let mut output = Vec::new();
        let mut formatter = TurtleFormatter::new(&mut output);

        for triple in triples {
            let s_node;
            let s_blank;
            let subject = match &triple.subject {
                RdfSubject::NamedNode(n) => {
                    s_node = rio_api::model::NamedNode { iri: n.as_str() };
                    rio_api::model::Subject::NamedNode(s_node)
                }
                RdfSubject::BlankNode(b) => {
                    s_blank = rio_api::model::BlankNode { id: b.as_str() };
                    rio_api::model::Subject::BlankNode(s_blank)
                }
            };

            let p_node = rio_api::model::NamedNode { iri: triple.predicate.as_named_node().as_str() };
            
            let o_node;
            let o_blank;
            let o_dt_node;
            let object = match &triple.object {
                RdfObject::NamedNode(n) => {
                    o_node = rio_api::model::NamedNode { iri: n.as_str() };
                    rio_api::model::Term::NamedNode(o_node)
                },
                RdfObject::BlankNode(b) => {
                    o_blank = rio_api::model::BlankNode { id: b.as_str() };
                    rio_api::model::Term::BlankNode(o_blank)
                },
                RdfObject::Literal(l) => {
                    if let Some(lang) = l.language() {
                        rio_api::model::Term::Literal(rio_api::model::Literal::LanguageTaggedString { 
                            value: l.value(), 
                            language: lang 
                        })
                    } else {
                        let datatype_iri = l.datatype();
                        if datatype_iri.as_str() == "http://www.w3.org/2001/XMLSchema#string" {
                             rio_api::model::Term::Literal(rio_api::model::Literal::Simple { 
                                value: l.value()
                            })
                        } else {
                            o_dt_node = datatype_iri;
                            rio_api::model::Term::Literal(rio_api::model::Literal::Typed { 
                                value: l.value(), 
                                datatype: rio_api::model::NamedNode { iri: o_dt_node.as_str() } 
                            })
                        }
                    }
                },
            };
            
            let rio_triple = rio_api::model::Triple {
                subject,
                predicate: p_node,
                object,
            };
            
            formatter.format(&rio_triple)
                .map_err(|e| SerializeError::Serialize(e.to_string()))?;
        }
        
        formatter.finish()
            .map_err(|e| SerializeError::Serialize(e.to_string()))?;
            
        String::from_utf8(output)
            .map_err(|e| SerializeError::Serialize(e.to_string()))
    }
}

/// TriG serializer: groups quads by named graph, default graph first.
pub struct TriGSerializerWrapper;

impl TriGSerializerWrapper {
    pub fn serialize(quads: &[Quad]) -> SerializeResult<String> {
        let mut by_graph: std::collections::BTreeMap<Option<String>, Vec<Triple>> =
            std::collections::BTreeMap::new();
        for q in quads {
            by_graph
                .entry(q.graph.as_ref().map(|g| g.as_str().to_string()))
                .or_default()
                .push(q.as_triple());
        }

        let mut out = String::new();
        if let Some(triples) = by_graph.remove(&None) {
            out.push_str(&TurtleSerializerWrapper::serialize(&triples)?);
        }
        for (graph, triples) in by_graph {
            let graph = graph.expect("named graph key");
            out.push_str(&format!("GRAPH <{}> {{\n", graph));
            out.push_str(&TurtleSerializerWrapper::serialize(&triples)?);
            out.push_str("}\n");
        }
        Ok(out)
    }
}

fn convert_subject(s: rio_api::model::Subject) -> Result<RdfSubject, ParseError> {
    match s {
        rio_api::model::Subject::NamedNode(n) => {
            Ok(RdfSubject::NamedNode(NamedNode::new(n.iri).map_err(|e| ParseError::Parse(e.to_string()))?))
        },
        rio_api::model::Subject::BlankNode(b) => {
            Ok(RdfSubject::BlankNode(BlankNode::from_str(b.id).map_err(|e| ParseError::Parse(e.to_string()))?))
        },
        _ => Err(ParseError::Parse("Unsupported subject type".to_string())),
    }
}

fn convert_predicate(p: rio_api::model::NamedNode) -> Result<RdfPredicate, ParseError> {
    Ok(RdfPredicate::new(p.iri).map_err(|e| ParseError::Parse(e.to_string()))?)
}

fn convert_object(o: rio_api::model::Term) -> Result<RdfObject, ParseError> {
    match o {
        rio_api::model::Term::NamedNode(n) => {
            Ok(RdfObject::NamedNode(NamedNode::new(n.iri).map_err(|e| ParseError::Parse(e.to_string()))?))
        },
        rio_api::model::Term::BlankNode(b) => {
            Ok(RdfObject::BlankNode(BlankNode::from_str(b.id).map_err(|e| ParseError::Parse(e.to_string()))?))
        },
        rio_api::model::Term::Literal(l) => {
            match l {
                rio_api::model::Literal::Simple { value } => {
                    Ok(RdfObject::Literal(Literal::new_simple_literal(value)))
                },
                rio_api::model::Literal::LanguageTaggedString { value, language } => {
                    Ok(RdfObject::Literal(
                        Literal::new_language_tagged_literal(value, language)
                            .map_err(|e| ParseError::Parse(e.to_string()))?
                    ))
                },
                rio_api::model::Literal::Typed { value, datatype } => {
                    let dt = NamedNode::new(datatype.iri)
                        .map_err(|e| ParseError::Parse(e.to_string()))?;
                    Ok(RdfObject::Literal(Literal::new_typed_literal(value, dt)))
                }
            }
        },
        _ => Err(ParseError::Parse("Unsupported object type".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turtle_roundtrip() {
        let input = r#"<http://example.org/a> <http://example.org/b> "c" ."#;
        let triples = TurtleParserWrapper::parse(input).unwrap();
        assert_eq!(triples.len(), 1);
        let output = TurtleSerializerWrapper::serialize(&triples).unwrap();
        assert!(output.contains("http://example.org/a"));
    }
}