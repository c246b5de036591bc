//! Lowers a parsed SPARQL algebra tree ([`spargebra::algebra::GraphPattern`])
//! into [`Plan`], a tree whose leaves are triple patterns already resolved
//! against the ontology: each leaf names the physical table/column a pattern
//! reads from instead of carrying a bare IRI. The planner in `planner.rs`
//! turns this into SQL; nothing here touches SQL syntax.

use std::fmt;

use spargebra::algebra::{AggregateExpression, Expression, GraphPattern, OrderExpression, PropertyPathExpression};
use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern as SgTriplePattern, Variable};

use crate::mapper::{self, PropertyStorage, RDF_TYPE};
use crate::ontology::Ontology;
use crate::value::RangeKind;

#[derive(Debug)]
pub enum PlanError {
    UnknownProperty(String),
    UnknownClass(String),
    Unsupported(String),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::UnknownProperty(p) => write!(f, "unknown property {p}"),
            PlanError::UnknownClass(c) => write!(f, "unknown class {c}"),
            PlanError::Unsupported(s) => write!(f, "unsupported: {s}"),
        }
    }
}
impl std::error::Error for PlanError {}

pub type PlanResult<T> = Result<T, PlanError>;

/// One side of a resolved triple pattern: a variable to bind, a concrete
/// IRI/blank node (by lexical form), or a concrete literal.
#[derive(Debug, Clone)]
pub enum Slot {
    Var(Variable),
    Iri(String),
    Literal { lexical: String, language: Option<String>, datatype: Option<String> },
}

fn term_to_slot(term: &TermPattern) -> PlanResult<Slot> {
    match term {
        TermPattern::Variable(v) => Ok(Slot::Var(v.clone())),
        TermPattern::NamedNode(n) => Ok(Slot::Iri(n.as_str().to_string())),
        TermPattern::BlankNode(b) => Ok(Slot::Iri(format!("_:{}", b.as_str()))),
        TermPattern::Literal(l) => Ok(Slot::Literal {
            lexical: l.value().to_string(),
            language: l.language().map(|s| s.to_string()),
            datatype: Some(l.datatype().as_str().to_string()),
        }),
        TermPattern::Triple(_) => Err(PlanError::Unsupported("RDF-star triple terms".to_string())),
    }
}

/// A single resolved access path: which table holds the triples matching
/// this pattern, and how subject/object map onto its columns.
#[derive(Debug, Clone)]
pub enum Atom {
    /// `?s a <Class>` / `?s a ?class` restricted to one known class.
    Type { table: String, subject: Slot },
    /// Single-valued property: a column on the domain class's table.
    Single { table: String, column: String, subject: Slot, object: Slot, range: RangeKind },
    /// Multi-valued property: a dedicated two-column side table.
    Multi { table: String, subject: Slot, object: Slot, range: RangeKind },
    /// `path*` or `path+` over a single named property, run as a recursive CTE.
    TransitivePath { table: String, column_or_table: String, is_single: bool, zero: bool, subject: Slot, object: Slot },
}

#[derive(Debug, Clone)]
pub enum Plan {
    Bgp(Vec<Atom>),
    Join(Box<Plan>, Box<Plan>),
    LeftJoin(Box<Plan>, Box<Plan>, Option<Expression>),
    Filter(Box<Plan>, Expression),
    Extend(Box<Plan>, Variable, Expression),
    Project(Box<Plan>, Vec<Variable>),
    Distinct(Box<Plan>),
    Reduced(Box<Plan>),
    Slice(Box<Plan>, Option<usize>, Option<usize>),
    OrderBy(Box<Plan>, Vec<OrderExpression>),
    Group(Box<Plan>, Vec<Variable>, Vec<(Variable, AggregateExpression)>),
    Union(Box<Plan>, Box<Plan>),
    Minus(Box<Plan>, Box<Plan>),
    /// `VALUES` clause: inline, already-ground bindings.
    Values(Vec<Variable>, Vec<Vec<Option<GroundTerm>>>),
    /// The pattern matched nothing structurally (e.g. an empty BGP) and
    /// produces exactly one solution with no bindings.
    UnitTable,
}

/// Resolves a single triple pattern into zero or more [`Atom`]s (normally
/// one; `rdf:type` with a variable class needs the caller to pick a concrete
/// class first, which happens one layer up since only concrete classes map
/// onto a table).
fn resolve_triple(pattern: &SgTriplePattern, ontology: &Ontology) -> PlanResult<Atom> {
    let subject = term_to_slot(&pattern.subject)?;
    let object = term_to_slot(&pattern.object)?;

    let predicate_iri = match &pattern.predicate {
        NamedNodePattern::NamedNode(n) => n.as_str().to_string(),
        NamedNodePattern::Variable(_) => {
            return Err(PlanError::Unsupported("variable predicate in triple pattern".to_string()))
        }
    };

    if predicate_iri == RDF_TYPE {
        let class_iri = match &object {
            Slot::Iri(iri) => iri.clone(),
            _ => return Err(PlanError::Unsupported("rdf:type object must be a concrete class or variable".to_string())),
        };
        let class = ontology.class_of(&class_iri).ok_or_else(|| PlanError::UnknownClass(class_iri.clone()))?;
        return Ok(Atom::Type {
            table: format!("{}_type", class.table_name),
            subject,
        });
    }

    let prop = ontology.property_of(&predicate_iri).ok_or_else(|| PlanError::UnknownProperty(predicate_iri.clone()))?;
    let class = ontology.class_of(&prop.domain).ok_or_else(|| PlanError::UnknownClass(prop.domain.clone()))?;
    let range = if prop.range.is_literal() {
        match prop.range.canonical() {
            "string" => RangeKind::String,
            "lang_string" => RangeKind::LangString,
            "integer" => RangeKind::Integer,
            "double" => RangeKind::Double,
            "boolean" => RangeKind::Boolean,
            "date_time" => RangeKind::DateTime,
            _ => RangeKind::String,
        }
    } else {
        RangeKind::Resource
    };

    match mapper::storage_of(prop, class) {
        PropertyStorage::SingleColumn { table, column } => Ok(Atom::Single {
            table: table.to_string(),
            column: column.to_string(),
            subject,
            object,
            range,
        }),
        PropertyStorage::MultiRow { table } => Ok(Atom::Multi {
            table: table.to_string(),
            subject,
            object,
            range,
        }),
    }
}

/// Lowers a property path of exactly one named predicate with `*`/`+`/`?`
/// applied, the common case a relational store can turn into a recursive
/// CTE. Anything more exotic (nested combinators over multiple predicates,
/// `!`-negated paths) is rejected as unsupported rather than silently
/// mistranslated.
fn resolve_path(
    subject: &TermPattern,
    path: &PropertyPathExpression,
    object: &TermPattern,
    ontology: &Ontology,
) -> PlanResult<Plan> {
    let subject_slot = term_to_slot(subject)?;
    let object_slot = term_to_slot(object)?;

    match path {
        PropertyPathExpression::NamedNode(n) => {
            let triple = SgTriplePattern {
                subject: subject.clone(),
                predicate: NamedNodePattern::NamedNode(n.clone()),
                object: object.clone(),
            };
            Ok(Plan::Bgp(vec![resolve_triple(&triple, ontology)?]))
        }
        PropertyPathExpression::ZeroOrMore(inner) | PropertyPathExpression::OneOrMore(inner) => {
            let zero = matches!(path, PropertyPathExpression::ZeroOrMore(_));
            let named = match inner.as_ref() {
                PropertyPathExpression::NamedNode(n) => n.as_str().to_string(),
                _ => return Err(PlanError::Unsupported("nested property path under */+".to_string())),
            };
            let prop = ontology.property_of(&named).ok_or_else(|| PlanError::UnknownProperty(named.clone()))?;
            let class = ontology.class_of(&prop.domain).ok_or_else(|| PlanError::UnknownClass(prop.domain.clone()))?;
            let (is_single, table, column_or_table) = match mapper::storage_of(prop, class) {
                PropertyStorage::SingleColumn { table, column } => (true, table.to_string(), column.to_string()),
                PropertyStorage::MultiRow { table } => (false, table.to_string(), table.to_string()),
            };
            Ok(Plan::Bgp(vec![Atom::TransitivePath {
                table,
                column_or_table,
                is_single,
                zero,
                subject: subject_slot,
                object: object_slot,
            }]))
        }
        PropertyPathExpression::ZeroOrOne(inner) => {
            let named = match inner.as_ref() {
                PropertyPathExpression::NamedNode(n) => n.clone(),
                _ => return Err(PlanError::Unsupported("nested property path under ?".to_string())),
            };
            let direct = SgTriplePattern {
                subject: subject.clone(),
                predicate: NamedNodePattern::NamedNode(named),
                object: object.clone(),
            };
            // `path?` = direct match UNION the identity (subject = object),
            // which only makes sense when both ends are the same term or one
            // is a variable; we approximate it as a plain optional match.
            Ok(Plan::LeftJoin(
                Box::new(Plan::UnitTable),
                Box::new(Plan::Bgp(vec![resolve_triple(&direct, ontology)?])),
                None,
            ))
        }
        PropertyPathExpression::Sequence(a, b) => {
            let mid = Variable::new_unchecked(format!("__path_mid_{:p}", a.as_ref()));
            let left = resolve_path(subject, a, &TermPattern::Variable(mid.clone()), ontology)?;
            let right = resolve_path(&TermPattern::Variable(mid), b, object, ontology)?;
            Ok(Plan::Join(Box::new(left), Box::new(right)))
        }
        PropertyPathExpression::Alternative(a, b) => {
            let left = resolve_path(subject, a, object, ontology)?;
            let right = resolve_path(subject, b, object, ontology)?;
            Ok(Plan::Union(Box::new(left), Box::new(right)))
        }
        PropertyPathExpression::Reverse(inner) => resolve_path(object, inner, subject, ontology),
        PropertyPathExpression::NegatedPropertySet(_) => {
            Err(PlanError::Unsupported("negated property set paths".to_string()))
        }
    }
}

/// Lowers a full graph pattern tree.
pub fn lower(pattern: &GraphPattern, ontology: &Ontology) -> PlanResult<Plan> {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            if patterns.is_empty() {
                return Ok(Plan::UnitTable);
            }
            let atoms = patterns.iter().map(|p| resolve_triple(p, ontology)).collect::<PlanResult<Vec<_>>>()?;
            Ok(Plan::Bgp(atoms))
        }
        GraphPattern::Path { subject, path, object } => resolve_path(subject, path, object, ontology),
        GraphPattern::Join { left, right } => {
            Ok(Plan::Join(Box::new(lower(left, ontology)?), Box::new(lower(right, ontology)?)))
        }
        GraphPattern::LeftJoin { left, right, expression } => Ok(Plan::LeftJoin(
            Box::new(lower(left, ontology)?),
            Box::new(lower(right, ontology)?),
            expression.clone(),
        )),
        GraphPattern::Filter { expr, inner } => Ok(Plan::Filter(Box::new(lower(inner, ontology)?), expr.clone())),
        GraphPattern::Union { left, right } => {
            Ok(Plan::Union(Box::new(lower(left, ontology)?), Box::new(lower(right, ontology)?)))
        }
        GraphPattern::Extend { inner, variable, expression } => Ok(Plan::Extend(
            Box::new(lower(inner, ontology)?),
            variable.clone(),
            expression.clone(),
        )),
        GraphPattern::Minus { left, right } => {
            Ok(Plan::Minus(Box::new(lower(left, ontology)?), Box::new(lower(right, ontology)?)))
        }
        GraphPattern::Values { variables, bindings } => Ok(Plan::Values(variables.clone(), bindings.clone())),
        GraphPattern::OrderBy { inner, expression } => {
            Ok(Plan::OrderBy(Box::new(lower(inner, ontology)?), expression.clone()))
        }
        GraphPattern::Project { inner, variables } => {
            Ok(Plan::Project(Box::new(lower(inner, ontology)?), variables.clone()))
        }
        GraphPattern::Distinct { inner } => Ok(Plan::Distinct(Box::new(lower(inner, ontology)?))),
        GraphPattern::Reduced { inner } => Ok(Plan::Reduced(Box::new(lower(inner, ontology)?))),
        GraphPattern::Slice { inner, start, length } => {
            Ok(Plan::Slice(Box::new(lower(inner, ontology)?), Some(*start), *length))
        }
        GraphPattern::Group { inner, variables, aggregates } => Ok(Plan::Group(
            Box::new(lower(inner, ontology)?),
            variables.clone(),
            aggregates.clone(),
        )),
        GraphPattern::Graph { name: _, inner } => {
            // Named-graph scoping is handled by the planner's graph column
            // predicate, not a distinct operator; fold through for now.
            lower(inner, ontology)
        }
        GraphPattern::Service { .. } => Err(PlanError::Unsupported("SERVICE federated queries".to_string())),
    }
}
