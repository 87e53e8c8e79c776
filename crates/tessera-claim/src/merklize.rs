//! Credential merklization.
//!
//! Every scalar reachable from the credential subject (plus the issuer and
//! the issuance/expiration dates) becomes one leaf of a depth-32 sparse
//! Merkle tree: the key is the Poseidon hash of the value's path of IRIs and
//! array indices, the value is the datatype-aware hash of the scalar.

use chrono::{DateTime, NaiveDate, Utc};
use num_bigint::BigUint;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tessera_core::field::{fr_from_biguint, fr_from_decimal, fr_from_i64};
use tessera_core::{hash_bytes, poseidon_hash, Fr};
use tessera_merkle::{Proof, SparseMerkleTree, CREDENTIAL_TREE_DEPTH};

use crate::context::{Datatype, FieldDefinition, TypeDefinition};
use crate::credential::W3CCredential;
use crate::error::{ClaimError, ClaimResult};

pub const CREDENTIALS_VOCAB: &str = "https://www.w3.org/2018/credentials#";

fn credentials_term(term: &str) -> String {
    format!("{}{}", CREDENTIALS_VOCAB, term)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathPart {
    Iri(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(pub Vec<PathPart>);

impl Path {
    /// Path of a credential-subject field given as a dotted name
    /// (`address.city`, `degrees.0.year`), resolved against the type.
    pub fn for_field(def: &TypeDefinition, field: &str) -> ClaimResult<(Path, Datatype)> {
        let mut parts = vec![PathPart::Iri(credentials_term("credentialSubject"))];
        let mut scope = &def.fields;
        let mut current: Option<&FieldDefinition> = None;
        for segment in field.split('.') {
            if let Ok(i) = segment.parse::<usize>() {
                if current.is_none() {
                    return Err(ClaimError::FieldNotFound(field.to_string()));
                }
                parts.push(PathPart::Index(i));
                continue;
            }
            let fd = scope
                .get(segment)
                .ok_or_else(|| ClaimError::FieldNotFound(format!("{} in {}", field, def.name)))?;
            parts.push(PathPart::Iri(fd.iri.clone()));
            scope = &fd.fields;
            current = Some(fd);
        }
        let datatype = current
            .map(|fd| fd.datatype)
            .ok_or_else(|| ClaimError::FieldNotFound(field.to_string()))?;
        Ok((Path(parts), datatype))
    }

    /// `Poseidon(parts)`, IRIs hashed as bytes and indices taken as integers.
    pub fn key(&self) -> ClaimResult<Fr> {
        let elements = self
            .0
            .iter()
            .map(|part| -> ClaimResult<Fr> {
                match part {
                    PathPart::Iri(iri) => Ok(hash_bytes(iri.as_bytes())?),
                    PathPart::Index(i) => Ok(Fr::from(*i as u64)),
                }
            })
            .collect::<ClaimResult<Vec<Fr>>>()?;
        Ok(poseidon_hash(&elements)?)
    }

    fn child(&self, part: PathPart) -> Path {
        let mut parts = self.0.clone();
        parts.push(part);
        Path(parts)
    }
}

// ---------------------------------------------------------------------------
// Value hashing
// ---------------------------------------------------------------------------

fn invalid(datatype: Datatype, value: &Value) -> ClaimError {
    ClaimError::InvalidValue(format!("{} is not a valid {:?}", value, datatype))
}

fn parse_integer(text: &str) -> ClaimResult<Fr> {
    match text.strip_prefix('-') {
        Some(magnitude) => {
            let big = BigUint::parse_bytes(magnitude.as_bytes(), 10)
                .ok_or_else(|| ClaimError::InvalidValue(format!("not an integer: {}", text)))?;
            Ok(-fr_from_biguint(&big)?)
        }
        None => fr_from_decimal(text)
            .map_err(|_| ClaimError::InvalidValue(format!("not an integer: {}", text))),
    }
}

fn datetime_to_fr(dt: &DateTime<Utc>) -> ClaimResult<Fr> {
    let nanos = dt
        .timestamp_nanos_opt()
        .ok_or_else(|| ClaimError::InvalidValue(format!("{} out of range", dt)))?;
    Ok(fr_from_i64(nanos))
}

fn parse_datetime(text: &str) -> ClaimResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ClaimError::InvalidValue(format!("not a dateTime: {}", text)))
}

/// Hash a JSON scalar the way its declared datatype requires.
pub fn hash_value(datatype: Datatype, value: &Value) -> ClaimResult<Fr> {
    match datatype {
        Datatype::Boolean => match value {
            Value::Bool(b) => Ok(Fr::from(*b as u64)),
            Value::String(s) if s == "true" => Ok(Fr::from(1u64)),
            Value::String(s) if s == "false" => Ok(Fr::from(0u64)),
            _ => Err(invalid(datatype, value)),
        },
        Datatype::Integer => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(fr_from_i64(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Fr::from(u))
                } else {
                    Err(invalid(datatype, value))
                }
            }
            Value::String(s) => parse_integer(s),
            _ => Err(invalid(datatype, value)),
        },
        Datatype::DateTime => match value {
            Value::String(s) => datetime_to_fr(&parse_datetime(s)?),
            _ => Err(invalid(datatype, value)),
        },
        Datatype::Double | Datatype::String => match value {
            Value::String(s) => Ok(hash_bytes(s.as_bytes())?),
            Value::Number(n) => Ok(hash_bytes(n.to_string().as_bytes())?),
            Value::Bool(b) => Ok(hash_bytes(b.to_string().as_bytes())?),
            _ => Err(invalid(datatype, value)),
        },
    }
}

// ---------------------------------------------------------------------------
// Merklizer
// ---------------------------------------------------------------------------

/// A merklized document: its leaves by path and the tree they form.
pub struct Merklizer {
    tree: SparseMerkleTree,
    entries: BTreeMap<Path, (Datatype, Fr)>,
}

impl Merklizer {
    /// Merklize a credential (proofs are ignored).
    pub fn merklize(credential: &W3CCredential, def: &TypeDefinition) -> ClaimResult<Self> {
        let mut entries = BTreeMap::new();
        let subject_root = Path(vec![PathPart::Iri(credentials_term("credentialSubject"))]);
        collect_object(&credential.credential_subject, &def.fields, &subject_root, &mut entries)?;

        entries.insert(
            Path(vec![PathPart::Iri(credentials_term("issuer"))]),
            (Datatype::String, hash_bytes(credential.issuer.as_bytes())?),
        );
        if let Some(dt) = &credential.issuance_date {
            entries.insert(
                Path(vec![PathPart::Iri(credentials_term("issuanceDate"))]),
                (Datatype::DateTime, datetime_to_fr(dt)?),
            );
        }
        if let Some(dt) = &credential.expiration_date {
            entries.insert(
                Path(vec![PathPart::Iri(credentials_term("expirationDate"))]),
                (Datatype::DateTime, datetime_to_fr(dt)?),
            );
        }
        Self::from_entries(entries)
    }

    /// Merklize a bare credential subject, as disclosed in a presentation.
    pub fn merklize_subject(subject: &Map<String, Value>, def: &TypeDefinition) -> ClaimResult<Self> {
        let mut entries = BTreeMap::new();
        let subject_root = Path(vec![PathPart::Iri(credentials_term("credentialSubject"))]);
        collect_object(subject, &def.fields, &subject_root, &mut entries)?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: BTreeMap<Path, (Datatype, Fr)>) -> ClaimResult<Self> {
        let tree = SparseMerkleTree::in_memory(CREDENTIAL_TREE_DEPTH)?;
        for (path, (_, value)) in &entries {
            tree.add(&path.key()?, value)?;
        }
        tracing::debug!(leaves = entries.len(), "merklized document");
        Ok(Self { tree, entries })
    }

    pub fn root(&self) -> ClaimResult<Fr> {
        Ok(self.tree.root()?)
    }

    pub fn value(&self, path: &Path) -> Option<Fr> {
        self.entries.get(path).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inclusion or exclusion proof for `path`, with the value when present.
    pub fn proof(&self, path: &Path) -> ClaimResult<(Proof, Option<Fr>)> {
        Ok(self.tree.generate_proof(&path.key()?, None)?)
    }
}

fn collect_object(
    object: &Map<String, Value>,
    fields: &BTreeMap<String, FieldDefinition>,
    path: &Path,
    entries: &mut BTreeMap<Path, (Datatype, Fr)>,
) -> ClaimResult<()> {
    for (name, value) in object {
        if name == "id" || name == "type" || name.starts_with('@') {
            continue;
        }
        let fd = fields
            .get(name)
            .ok_or_else(|| ClaimError::FieldNotFound(name.clone()))?;
        collect_value(value, fd, &path.child(PathPart::Iri(fd.iri.clone())), entries)?;
    }
    Ok(())
}

fn collect_value(
    value: &Value,
    fd: &FieldDefinition,
    path: &Path,
    entries: &mut BTreeMap<Path, (Datatype, Fr)>,
) -> ClaimResult<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(obj) => collect_object(obj, &fd.fields, path, entries),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_value(item, fd, &path.child(PathPart::Index(i)), entries)?;
            }
            Ok(())
        }
        scalar => {
            entries.insert(path.clone(), (fd.datatype, hash_value(fd.datatype, scalar)?));
            Ok(())
        }
    }
}
