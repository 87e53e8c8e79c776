use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_claim::{
    hash_value, resolve_type, ClaimError, ContextLoader, Datatype, Path, TypeDefinition,
};
use tessera_core::{CircuitId, Fr, ProofType};

use crate::error::{QueryError, QueryResult};
use crate::operator::Operator;
use crate::validator::{circuit_validator, validate_operators};

// ---------------------------------------------------------------------------
// ProofQuery
// ---------------------------------------------------------------------------

/// What a verifier asks a holder to prove about one credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofQuery {
    /// Issuer DIDs accepted; empty or `*` accepts any issuer.
    #[serde(default)]
    pub allowed_issuers: Vec<String>,
    pub context: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_subject: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_type: Option<ProofType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_claim_revocation_check: Option<bool>,
}

/// One `field: {$op: value}` entry of a query, not yet resolved against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldQuery {
    /// Dotted field name; empty for a bare "do you hold this credential" query.
    pub field: String,
    pub operator: Operator,
    pub values: Vec<Value>,
}

impl ProofQuery {
    pub fn new(context: impl Into<String>, credential_type: impl Into<String>) -> Self {
        Self {
            allowed_issuers: vec!["*".to_string()],
            context: context.into(),
            credential_type: credential_type.into(),
            credential_subject: None,
            group_id: None,
            proof_type: None,
            skip_claim_revocation_check: None,
        }
    }

    pub fn with_subject(mut self, subject: Value) -> QueryResult<Self> {
        match subject {
            Value::Object(map) => {
                self.credential_subject = Some(map);
                Ok(self)
            }
            other => Err(QueryError::InvalidQuery(format!(
                "credentialSubject must be an object, got {}",
                other
            ))),
        }
    }

    pub fn skip_revocation_check(&self) -> bool {
        self.skip_claim_revocation_check.unwrap_or(false)
    }

    pub fn allows_issuer(&self, issuer: &str) -> bool {
        self.allowed_issuers.is_empty()
            || self.allowed_issuers.iter().any(|i| i == "*" || i == issuer)
    }

    pub fn type_definition(&self, loader: &dyn ContextLoader) -> QueryResult<TypeDefinition> {
        Ok(resolve_type(
            loader,
            std::slice::from_ref(&self.context),
            &self.credential_type,
        )?)
    }

    /// Flatten `credentialSubject` into one entry per operator. An absent or
    /// empty subject is a single `NOOP`; an empty operator object is `SD`.
    pub fn field_queries(&self) -> QueryResult<Vec<FieldQuery>> {
        let subject = match &self.credential_subject {
            Some(s) if !s.is_empty() => s,
            _ => {
                return Ok(vec![FieldQuery {
                    field: String::new(),
                    operator: Operator::Noop,
                    values: Vec::new(),
                }])
            }
        };
        let mut out = Vec::new();
        for (field, spec) in subject {
            let ops = spec.as_object().ok_or_else(|| {
                QueryError::InvalidQuery(format!("query for '{}' must be an object", field))
            })?;
            if ops.is_empty() {
                out.push(FieldQuery {
                    field: field.clone(),
                    operator: Operator::Sd,
                    values: Vec::new(),
                });
                continue;
            }
            for (key, raw) in ops {
                let operator = Operator::from_key(key)?;
                let values = match (operator, raw) {
                    (Operator::Nullify, _) => Vec::new(),
                    (_, Value::Array(items)) => items.clone(),
                    (_, scalar) => vec![scalar.clone()],
                };
                out.push(FieldQuery {
                    field: field.clone(),
                    operator,
                    values,
                });
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// QueryMetadata
// ---------------------------------------------------------------------------

/// A field query resolved against a schema into circuit terms.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    pub field_name: String,
    pub operator: Operator,
    pub values: Vec<Fr>,
    pub datatype: Option<Datatype>,
    pub merklized: bool,
    /// Claim slot of the field (slot schemas), 0 otherwise.
    pub slot_index: u32,
    pub path: Option<Path>,
    /// Poseidon key of the field's path (merklized schemas), 0 otherwise.
    pub claim_path_key: Fr,
}

impl QueryMetadata {
    /// Values padded with zeros to the circuit's array width.
    pub fn circuit_values(&self, size: usize) -> QueryResult<Vec<Fr>> {
        if self.values.len() > size {
            return Err(QueryError::InvalidValuesArraySize {
                operator: self.operator.to_string(),
                count: self.values.len(),
                expected: format!("at most {}", size),
            });
        }
        let mut out = self.values.clone();
        out.resize(size, Fr::zero());
        Ok(out)
    }
}

fn field_not_found(e: ClaimError) -> QueryError {
    match e {
        ClaimError::FieldNotFound(f) => QueryError::FieldNotFound(f),
        other => QueryError::Claim(other),
    }
}

/// Resolve one field query against `def`, checking arity against `max_values`.
pub fn parse_query_metadata(
    query: &FieldQuery,
    def: &TypeDefinition,
    max_values: usize,
) -> QueryResult<QueryMetadata> {
    query.operator.check_values_len(query.values.len(), max_values)?;
    let merklized = def.is_merklized();

    if query.field.is_empty() {
        if query.operator != Operator::Noop {
            return Err(QueryError::InvalidQuery(format!(
                "operator {} needs a field",
                query.operator
            )));
        }
        return Ok(QueryMetadata {
            field_name: String::new(),
            operator: Operator::Noop,
            values: Vec::new(),
            datatype: None,
            merklized,
            slot_index: 0,
            path: None,
            claim_path_key: Fr::zero(),
        });
    }

    let (slot_index, path, claim_path_key, datatype) = if merklized {
        let (path, datatype) = Path::for_field(def, &query.field).map_err(field_not_found)?;
        let key = path.key()?;
        (0, Some(path), key, datatype)
    } else {
        if query.operator == Operator::Exists {
            return Err(QueryError::InvalidQuery(
                "$exists needs a merklized credential".into(),
            ));
        }
        let slot = def
            .serialization
            .as_ref()
            .and_then(|s| s.slot_index(&query.field))
            .ok_or_else(|| QueryError::FieldNotFound(format!("{} has no claim slot", query.field)))?;
        let datatype = def.field(&query.field).map_err(field_not_found)?.datatype;
        (slot, None, Fr::zero(), datatype)
    };

    let values = match query.operator {
        Operator::Exists => query
            .values
            .iter()
            .map(|v| match v {
                Value::Bool(b) => Ok(Fr::from(*b as u64)),
                other => Err(QueryError::InvalidQuery(format!(
                    "$exists takes a boolean, got {}",
                    other
                ))),
            })
            .collect::<QueryResult<Vec<Fr>>>()?,
        _ => query
            .values
            .iter()
            .map(|v| hash_value(datatype, v).map_err(QueryError::from))
            .collect::<QueryResult<Vec<Fr>>>()?,
    };

    Ok(QueryMetadata {
        field_name: query.field.clone(),
        operator: query.operator,
        values,
        datatype: Some(datatype),
        merklized,
        slot_index,
        path,
        claim_path_key,
    })
}

/// Resolve every field query of `query` for `circuit`.
pub fn parse_query(
    query: &ProofQuery,
    def: &TypeDefinition,
    circuit: CircuitId,
) -> QueryResult<Vec<QueryMetadata>> {
    let fields = query.field_queries()?;
    let operators: Vec<Operator> = fields.iter().map(|f| f.operator).collect();
    validate_operators(circuit, &operators)?;
    let max_values = circuit_validator(circuit).value_array_size;
    let parsed = fields
        .iter()
        .map(|f| parse_query_metadata(f, def, max_values))
        .collect::<QueryResult<Vec<_>>>()?;
    tracing::debug!(
        circuit = %circuit,
        credential_type = %query.credential_type,
        queries = parsed.len(),
        "parsed query metadata"
    );
    Ok(parsed)
}
