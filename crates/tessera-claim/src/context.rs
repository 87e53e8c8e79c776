//! JSON-LD schema contexts.
//!
//! Only the context shape iden3 schemas are published in is understood: a
//! type term with an `@id` and a scoped `@context` holding prefixes, typed
//! field terms (optionally nested) and an `iden3_serialization` attribute
//! for schemas whose fields live in fixed claim slots.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{ClaimError, ClaimResult};

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema#";
const SERIALIZATION_TERM: &str = "iden3_serialization";
const SERIALIZATION_PREFIX: &str = "iden3:v1:";

// ---------------------------------------------------------------------------
// Datatypes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Boolean,
    Integer,
    Double,
    DateTime,
    String,
}

impl Datatype {
    /// Map an expanded datatype IRI; anything unrecognised hashes as a string.
    pub fn from_iri(iri: &str) -> Self {
        let local = iri.strip_prefix(XSD_NAMESPACE).unwrap_or(iri);
        match local {
            "boolean" => Datatype::Boolean,
            "integer" | "nonNegativeInteger" | "positiveInteger" | "negativeInteger"
            | "nonPositiveInteger" | "long" | "int" => Datatype::Integer,
            "double" | "decimal" | "float" => Datatype::Double,
            "dateTime" | "date" => Datatype::DateTime,
            _ => Datatype::String,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub iri: String,
    pub datatype: Datatype,
    /// Terms of a nested object field.
    pub fields: BTreeMap<String, FieldDefinition>,
}

/// Which subject fields fill the four claim data slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializationSpec {
    pub index_a: Option<String>,
    pub index_b: Option<String>,
    pub value_a: Option<String>,
    pub value_b: Option<String>,
}

/// Claim slot numbers as circuits count them (index 0-3, value 4-7).
pub const SLOT_INDEX_A: u32 = 2;
pub const SLOT_INDEX_B: u32 = 3;
pub const SLOT_VALUE_A: u32 = 6;
pub const SLOT_VALUE_B: u32 = 7;

impl SerializationSpec {
    pub fn parse(text: &str) -> ClaimResult<Self> {
        let body = text.strip_prefix(SERIALIZATION_PREFIX).ok_or_else(|| {
            ClaimError::InvalidContext(format!("unsupported serialization '{}'", text))
        })?;
        let mut spec = SerializationSpec::default();
        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, field) = pair.split_once('=').ok_or_else(|| {
                ClaimError::InvalidContext(format!("malformed serialization entry '{}'", pair))
            })?;
            let slot = match key {
                "slotIndexA" => &mut spec.index_a,
                "slotIndexB" => &mut spec.index_b,
                "slotValueA" => &mut spec.value_a,
                "slotValueB" => &mut spec.value_b,
                other => {
                    return Err(ClaimError::InvalidContext(format!(
                        "unknown serialization slot '{}'",
                        other
                    )))
                }
            };
            *slot = Some(field.to_string());
        }
        Ok(spec)
    }

    pub fn slot_index(&self, field: &str) -> Option<u32> {
        let f = Some(field);
        if self.index_a.as_deref() == f {
            Some(SLOT_INDEX_A)
        } else if self.index_b.as_deref() == f {
            Some(SLOT_INDEX_B)
        } else if self.value_a.as_deref() == f {
            Some(SLOT_VALUE_A)
        } else if self.value_b.as_deref() == f {
            Some(SLOT_VALUE_B)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub iri: String,
    pub serialization: Option<SerializationSpec>,
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl TypeDefinition {
    pub fn is_merklized(&self) -> bool {
        self.serialization.is_none()
    }

    /// Resolve a dotted field path (`address.city`) to its definitions, outermost first.
    pub fn field_chain(&self, path: &str) -> ClaimResult<Vec<&FieldDefinition>> {
        let mut chain = Vec::new();
        let mut scope = &self.fields;
        for segment in path.split('.') {
            let def = scope.get(segment).ok_or_else(|| {
                ClaimError::FieldNotFound(format!("{} in {}", path, self.name))
            })?;
            chain.push(def);
            scope = &def.fields;
        }
        if chain.is_empty() {
            return Err(ClaimError::FieldNotFound(path.to_string()));
        }
        Ok(chain)
    }

    pub fn field(&self, path: &str) -> ClaimResult<&FieldDefinition> {
        let chain = self.field_chain(path)?;
        chain
            .last()
            .copied()
            .ok_or_else(|| ClaimError::FieldNotFound(path.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SchemaContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaContext {
    types: BTreeMap<String, TypeDefinition>,
}

type Prefixes = HashMap<String, String>;

fn expand(term: &str, prefixes: &Prefixes) -> String {
    if let Some((prefix, local)) = term.split_once(':') {
        if let Some(ns) = prefixes.get(prefix) {
            return format!("{}{}", ns, local);
        }
    }
    term.to_string()
}

/// Collect plain string terms of a context object as prefixes.
fn collect_prefixes(ctx: &Map<String, Value>, inherited: &Prefixes) -> Prefixes {
    let mut prefixes = inherited.clone();
    for (key, value) in ctx {
        if key.starts_with('@') || key == SERIALIZATION_TERM {
            continue;
        }
        if let Value::String(ns) = value {
            prefixes.insert(key.clone(), ns.clone());
        }
    }
    prefixes
}

fn parse_fields(
    ctx: &Map<String, Value>,
    inherited: &Prefixes,
) -> ClaimResult<BTreeMap<String, FieldDefinition>> {
    let prefixes = collect_prefixes(ctx, inherited);
    let mut fields = BTreeMap::new();
    for (key, value) in ctx {
        let Value::Object(def) = value else { continue };
        if key.starts_with('@') {
            continue;
        }
        let id = def
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClaimError::InvalidContext(format!("term '{}' has no @id", key)))?;
        let datatype = def
            .get("@type")
            .and_then(Value::as_str)
            .map(|t| Datatype::from_iri(&expand(t, &prefixes)))
            .unwrap_or(Datatype::String);
        let nested = match def.get("@context") {
            Some(Value::Object(inner)) => parse_fields(inner, &prefixes)?,
            _ => BTreeMap::new(),
        };
        fields.insert(
            key.clone(),
            FieldDefinition {
                iri: expand(id, &prefixes),
                datatype,
                fields: nested,
            },
        );
    }
    Ok(fields)
}

impl SchemaContext {
    /// Parse a JSON-LD context document.
    pub fn parse(document: &Value) -> ClaimResult<Self> {
        let root = document
            .get("@context")
            .ok_or_else(|| ClaimError::InvalidContext("document has no @context".into()))?;
        let objects: Vec<&Map<String, Value>> = match root {
            Value::Object(obj) => vec![obj],
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            _ => return Err(ClaimError::InvalidContext("@context must be an object or array".into())),
        };

        let mut types = BTreeMap::new();
        for ctx in objects {
            let prefixes = collect_prefixes(ctx, &Prefixes::new());
            for (name, value) in ctx {
                let Value::Object(def) = value else { continue };
                let Some(Value::Object(scoped)) = def.get("@context") else {
                    continue;
                };
                let id = def.get("@id").and_then(Value::as_str).ok_or_else(|| {
                    ClaimError::InvalidContext(format!("type '{}' has no @id", name))
                })?;
                let serialization = match scoped.get(SERIALIZATION_TERM) {
                    Some(Value::String(s)) => Some(SerializationSpec::parse(s)?),
                    Some(_) => {
                        return Err(ClaimError::InvalidContext(
                            "iden3_serialization must be a string".into(),
                        ))
                    }
                    None => None,
                };
                types.insert(
                    name.clone(),
                    TypeDefinition {
                        name: name.clone(),
                        iri: expand(id, &prefixes),
                        serialization,
                        fields: parse_fields(scoped, &prefixes)?,
                    },
                );
            }
        }
        Ok(Self { types })
    }

    pub fn type_definition(&self, name: &str) -> ClaimResult<&TypeDefinition> {
        self.types
            .get(name)
            .ok_or_else(|| ClaimError::TypeNotFound(name.to_string()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// ContextLoader -- where context documents come from
// ---------------------------------------------------------------------------

pub trait ContextLoader: Send + Sync {
    fn load(&self, url: &str) -> ClaimResult<Value>;
}

/// Context documents registered up front.
#[derive(Default)]
pub struct InMemoryContextLoader {
    documents: RwLock<HashMap<String, Value>>,
}

impl InMemoryContextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, document: Value) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(url.into(), document);
        }
    }
}

impl ContextLoader for InMemoryContextLoader {
    fn load(&self, url: &str) -> ClaimResult<Value> {
        let docs = self
            .documents
            .read()
            .map_err(|e| ClaimError::ContextNotFound(format!("lock poisoned: {}", e)))?;
        docs.get(url)
            .cloned()
            .ok_or_else(|| ClaimError::ContextNotFound(url.to_string()))
    }
}

/// Find the definition of `type_name` in the first of `contexts` that defines it.
/// Contexts the loader does not know are skipped.
pub fn resolve_type(
    loader: &dyn ContextLoader,
    contexts: &[String],
    type_name: &str,
) -> ClaimResult<TypeDefinition> {
    for url in contexts {
        let document = match loader.load(url) {
            Ok(doc) => doc,
            Err(ClaimError::ContextNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let ctx = SchemaContext::parse(&document)?;
        if let Ok(def) = ctx.type_definition(type_name) {
            return Ok(def.clone());
        }
    }
    Err(ClaimError::TypeNotFound(type_name.to_string()))
}
