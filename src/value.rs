//! Typed literal values as they round-trip between RDF objects, SQLite
//! columns and journal frames.

use crate::rdf::{Literal, NamedNode, RdfObject};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// The datatype a property's range resolves to, drawn from the ontology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeKind {
    String,
    LangString,
    Integer,
    Double,
    Boolean,
    DateTime,
    Resource,
}

/// A value as stored in a class or property table: either a resource id
/// (interned IRI/blank node) or an inline literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Resource(i64),
    String(String),
    LangString(String, String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl TypedValue {
    pub fn range_kind(&self) -> RangeKind {
        match self {
            TypedValue::Resource(_) => RangeKind::Resource,
            TypedValue::String(_) => RangeKind::String,
            TypedValue::LangString(..) => RangeKind::LangString,
            TypedValue::Integer(_) => RangeKind::Integer,
            TypedValue::Double(_) => RangeKind::Double,
            TypedValue::Boolean(_) => RangeKind::Boolean,
            TypedValue::DateTime(_) => RangeKind::DateTime,
        }
    }

    /// Render as an `RdfObject`, resolving resource ids through the given
    /// lookup (used to turn interned ids back into IRIs/blank nodes).
    pub fn to_rdf_object(&self, resolve: impl FnOnce(i64) -> Option<RdfObject>) -> Option<RdfObject> {
        match self {
            TypedValue::Resource(id) => resolve(*id),
            TypedValue::String(s) => Some(RdfObject::Literal(Literal::new_simple_literal(s.clone()))),
            TypedValue::LangString(s, lang) => {
                Literal::new_language_tagged_literal(s.clone(), lang.clone())
                    .ok()
                    .map(RdfObject::Literal)
            }
            TypedValue::Integer(i) => Some(RdfObject::Literal(Literal::new_typed_literal(
                i.to_string(),
                NamedNode::new("http://www.w3.org/2001/XMLSchema#integer").unwrap(),
            ))),
            TypedValue::Double(d) => Some(RdfObject::Literal(Literal::new_typed_literal(
                d.to_string(),
                NamedNode::new("http://www.w3.org/2001/XMLSchema#double").unwrap(),
            ))),
            TypedValue::Boolean(b) => Some(RdfObject::Literal(Literal::new_typed_literal(
                b.to_string(),
                NamedNode::new("http://www.w3.org/2001/XMLSchema#boolean").unwrap(),
            ))),
            TypedValue::DateTime(dt) => Some(RdfObject::Literal(Literal::new_typed_literal(
                dt.to_rfc3339(),
                NamedNode::new("http://www.w3.org/2001/XMLSchema#dateTime").unwrap(),
            ))),
        }
    }
}

impl ToSql for TypedValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            TypedValue::Resource(id) => id.to_sql(),
            TypedValue::String(s) => s.to_sql(),
            TypedValue::LangString(s, lang) => {
                Ok(ToSqlOutput::from(format!("{s}@{lang}")))
            }
            TypedValue::Integer(i) => i.to_sql(),
            TypedValue::Double(d) => d.to_sql(),
            TypedValue::Boolean(b) => b.to_sql(),
            TypedValue::DateTime(dt) => dt.to_rfc3339().to_sql(),
        }
    }
}

impl FromSql for TypedValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(TypedValue::Integer(i)),
            ValueRef::Real(d) => Ok(TypedValue::Double(d)),
            ValueRef::Text(t) => {
                let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Ok(TypedValue::String(s.to_string()))
            }
            _ => Err(FromSqlError::InvalidType),
        }
    }
}
