//! Ontology loader: reads a bundle of TOML documents describing classes and
//! properties, and answers the class/property lookups the storage and
//! SPARQL layers build on.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("I/O error reading ontology bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed ontology document {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("class {0} declares unknown parent {1}")]
    UnknownParent(String, String),

    #[error("property {0} declares unknown domain {1}")]
    UnknownDomain(String, String),

    #[error("duplicate class declaration: {0}")]
    DuplicateClass(String),

    #[error("duplicate property declaration: {0}")]
    DuplicateProperty(String),

    #[error("class hierarchy contains a cycle involving {0}")]
    CyclicHierarchy(String),

    #[error("table name hash collision between classes {0} and {1}")]
    TableHashCollision(String, String),
}

pub type OntologyResult<T> = Result<T, OntologyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRange {
    String,
    LangString,
    Integer,
    Double,
    Boolean,
    DateTime,
    Class(String),
}

impl PropertyRange {
    fn parse(s: &str) -> Self {
        match s {
            "string" => PropertyRange::String,
            "lang_string" => PropertyRange::LangString,
            "integer" => PropertyRange::Integer,
            "double" => PropertyRange::Double,
            "boolean" => PropertyRange::Boolean,
            "date_time" => PropertyRange::DateTime,
            other => PropertyRange::Class(other.to_string()),
        }
    }

    pub fn canonical(&self) -> &str {
        match self {
            PropertyRange::String => "string",
            PropertyRange::LangString => "lang_string",
            PropertyRange::Integer => "integer",
            PropertyRange::Double => "double",
            PropertyRange::Boolean => "boolean",
            PropertyRange::DateTime => "date_time",
            PropertyRange::Class(c) => c,
        }
    }

    pub fn is_literal(&self) -> bool {
        !matches!(self, PropertyRange::Class(_))
    }
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub iri: String,
    pub parents: Vec<String>,
    pub notify: bool,
    /// `class_<hash>` table name, stable for the lifetime of the bundle.
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub iri: String,
    pub domain: String,
    pub range: PropertyRange,
    pub cardinality: Cardinality,
    pub fulltext: bool,
    pub indexed: bool,
    pub notify: bool,
    /// Column name for single-valued properties, or `prop_<hash>` table name
    /// for multi-valued ones.
    pub storage_name: String,
}

#[derive(Debug, Deserialize)]
struct ClassEntry {
    iri: String,
    #[serde(default)]
    parent: Vec<String>,
    #[serde(default)]
    notify: bool,
}

#[derive(Debug, Deserialize)]
struct PropertyEntry {
    iri: String,
    domain: String,
    range: String,
    cardinality: String,
    #[serde(default)]
    fulltext: bool,
    #[serde(default)]
    indexed: bool,
    notify: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct BundleFile {
    #[serde(default, rename = "class")]
    classes: Vec<ClassEntry>,
    #[serde(default, rename = "property")]
    properties: Vec<PropertyEntry>,
}

/// FNV-1a, used both for table-name hashing and the overall schema version.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn table_hash(prefix: &str, iri: &str) -> String {
    format!("{prefix}_{:016x}", fnv1a(iri.as_bytes()))
}

/// The loaded, validated ontology bundle.
pub struct Ontology {
    classes: HashMap<String, ClassDecl>,
    properties: HashMap<String, PropertyDecl>,
    /// Classes in parent-before-child order, for table creation.
    class_order: Vec<String>,
    schema_version: u64,
}

impl Ontology {
    /// Load and validate every `*.toml` document directly inside `dir`.
    pub fn load(dir: &Path) -> OntologyResult<Self> {
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        files.sort();

        let mut raw_classes: Vec<ClassEntry> = Vec::new();
        let mut raw_properties: Vec<PropertyEntry> = Vec::new();
        let mut canonical_text = String::new();

        for path in &files {
            let text = std::fs::read_to_string(path)?;
            canonical_text.push_str(&text);
            let bundle: BundleFile = toml::from_str(&text).map_err(|source| OntologyError::Parse {
                file: path.display().to_string(),
                source,
            })?;
            raw_classes.extend(bundle.classes);
            raw_properties.extend(bundle.properties);
        }

        let mut classes = HashMap::new();
        let mut table_names: HashMap<String, String> = HashMap::new();
        for c in raw_classes {
            if classes.contains_key(&c.iri) {
                return Err(OntologyError::DuplicateClass(c.iri));
            }
            let table_name = table_hash("class", &c.iri);
            if let Some(existing) = table_names.insert(table_name.clone(), c.iri.clone()) {
                return Err(OntologyError::TableHashCollision(existing, c.iri));
            }
            classes.insert(
                c.iri.clone(),
                ClassDecl {
                    iri: c.iri,
                    parents: c.parent,
                    notify: c.notify,
                    table_name,
                },
            );
        }

        for decl in classes.values() {
            for parent in &decl.parents {
                if !classes.contains_key(parent) {
                    return Err(OntologyError::UnknownParent(decl.iri.clone(), parent.clone()));
                }
            }
        }

        let class_order = topological_order(&classes)?;

        let mut properties = HashMap::new();
        for p in raw_properties {
            if properties.contains_key(&p.iri) {
                return Err(OntologyError::DuplicateProperty(p.iri));
            }
            let domain_notify = classes
                .get(&p.domain)
                .ok_or_else(|| OntologyError::UnknownDomain(p.iri.clone(), p.domain.clone()))?
                .notify;
            let cardinality = if p.cardinality == "multi" {
                Cardinality::Multi
            } else {
                Cardinality::Single
            };
            let storage_name = match cardinality {
                Cardinality::Single => sanitize_column(&p.iri),
                Cardinality::Multi => table_hash("prop", &p.iri),
            };
            properties.insert(
                p.iri.clone(),
                PropertyDecl {
                    iri: p.iri,
                    domain: p.domain,
                    range: PropertyRange::parse(&p.range),
                    cardinality,
                    fulltext: p.fulltext,
                    indexed: p.indexed,
                    notify: p.notify.unwrap_or(domain_notify),
                    storage_name,
                },
            );
        }

        let schema_version = fnv1a(canonical_text.as_bytes());

        Ok(Self {
            classes,
            properties,
            class_order,
            schema_version,
        })
    }

    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    pub fn class_of(&self, iri: &str) -> Option<&ClassDecl> {
        self.classes.get(iri)
    }

    pub fn property_of(&self, iri: &str) -> Option<&PropertyDecl> {
        self.properties.get(iri)
    }

    pub fn classes_in_load_order(&self) -> impl Iterator<Item = &ClassDecl> {
        self.class_order.iter().map(move |iri| &self.classes[iri])
    }

    pub fn properties_of_class(&self, class_iri: &str) -> Vec<&PropertyDecl> {
        self.properties
            .values()
            .filter(|p| p.domain == class_iri)
            .collect()
    }

    /// Transitive superclasses of `iri`, `iri` itself included.
    pub fn superclasses(&self, iri: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![iri.to_string()];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(decl) = self.classes.get(&cur) {
                stack.extend(decl.parents.iter().cloned());
            }
        }
        seen
    }

    /// Transitive subclasses of `iri`, `iri` itself included. Used by the
    /// SPARQL planner to expand an `rdf:type` pattern over the hierarchy.
    pub fn subclasses(&self, iri: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        result.insert(iri.to_string());
        loop {
            let mut added = false;
            for decl in self.classes.values() {
                if decl.parents.iter().any(|p| result.contains(p)) && result.insert(decl.iri.clone()) {
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        result
    }
}

fn sanitize_column(iri: &str) -> String {
    format!("p_{:016x}", fnv1a(iri.as_bytes()))
}

fn topological_order(classes: &HashMap<String, ClassDecl>) -> OntologyResult<Vec<String>> {
    let mut order = Vec::new();
    let mut visited: HashMap<String, u8> = HashMap::new(); // 0 = visiting, 1 = done

    let sorted_keys: BTreeMap<&String, &ClassDecl> = classes.iter().collect();

    fn visit(
        iri: &str,
        classes: &HashMap<String, ClassDecl>,
        visited: &mut HashMap<String, u8>,
        order: &mut Vec<String>,
    ) -> OntologyResult<()> {
        match visited.get(iri) {
            Some(1) => return Ok(()),
            Some(0) => return Err(OntologyError::CyclicHierarchy(iri.to_string())),
            _ => {}
        }
        visited.insert(iri.to_string(), 0);
        if let Some(decl) = classes.get(iri) {
            for parent in &decl.parents {
                visit(parent, classes, visited, order)?;
            }
        }
        visited.insert(iri.to_string(), 1);
        order.push(iri.to_string());
        Ok(())
    }

    for iri in sorted_keys.keys() {
        visit(iri, classes, &mut visited, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_bundle(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_classes_and_properties_with_inherited_notify() {
        let dir = TempDir::new().unwrap();
        write_bundle(
            dir.path(),
            "core.toml",
            r#"
            [[class]]
            iri = "http://example.org/Person"
            notify = true

            [[class]]
            iri = "http://example.org/Employee"
            parent = ["http://example.org/Person"]

            [[property]]
            iri = "http://example.org/name"
            domain = "http://example.org/Person"
            range = "string"
            cardinality = "single"
            fulltext = true
            "#,
        );

        let ont = Ontology::load(dir.path()).unwrap();
        assert!(ont.class_of("http://example.org/Person").unwrap().notify);
        let name_prop = ont.property_of("http://example.org/name").unwrap();
        assert!(name_prop.notify, "property should inherit domain's notify flag");
        assert_eq!(name_prop.cardinality, Cardinality::Single);

        let order = ont.class_order.clone();
        let person_idx = order.iter().position(|c| c == "http://example.org/Person").unwrap();
        let employee_idx = order.iter().position(|c| c == "http://example.org/Employee").unwrap();
        assert!(person_idx < employee_idx, "parent must precede child");
    }

    #[test]
    fn rejects_unknown_parent() {
        let dir = TempDir::new().unwrap();
        write_bundle(
            dir.path(),
            "bad.toml",
            r#"
            [[class]]
            iri = "http://example.org/Employee"
            parent = ["http://example.org/Nonexistent"]
            "#,
        );
        assert!(matches!(
            Ontology::load(dir.path()),
            Err(OntologyError::UnknownParent(_, _))
        ));
    }

    #[test]
    fn subclasses_transitive_closure() {
        let dir = TempDir::new().unwrap();
        write_bundle(
            dir.path(),
            "hier.toml",
            r#"
            [[class]]
            iri = "http://example.org/A"

            [[class]]
            iri = "http://example.org/B"
            parent = ["http://example.org/A"]

            [[class]]
            iri = "http://example.org/C"
            parent = ["http://example.org/B"]
            "#,
        );
        let ont = Ontology::load(dir.path()).unwrap();
        let subs = ont.subclasses("http://example.org/A");
        assert!(subs.contains("http://example.org/B"));
        assert!(subs.contains("http://example.org/C"));
    }

    #[test]
    fn schema_version_stable_for_same_bundle() {
        let dir = TempDir::new().unwrap();
        write_bundle(dir.path(), "a.toml", "[[class]]\niri = \"http://example.org/X\"\n");
        let v1 = Ontology::load(dir.path()).unwrap().schema_version();
        let v2 = Ontology::load(dir.path()).unwrap().schema_version();
        assert_eq!(v1, v2);
    }
}
