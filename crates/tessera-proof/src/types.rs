use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tessera_claim::W3CCredential;
use tessera_core::field::{fr_from_decimal, fr_to_decimal, serde_decimal, serde_decimal_vec};
use tessera_core::{CircuitId, Fr};
use tessera_merkle::{Proof, TreeState};

use crate::error::{ProofError, ProofResult};

/// `methodId` of generic state transitions published by ethereum-controlled identities.
pub const ETH_STATE_TRANSITION_METHOD_ID: u64 = 1;

// ---------------------------------------------------------------------------
// Circuit inputs
// ---------------------------------------------------------------------------

/// Named signal map handed to a prover. Values are decimal strings, arrays of
/// them, or arrays of arrays, as circom witness calculators take them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitInputs {
    pub circuit: CircuitId,
    pub signals: BTreeMap<String, Value>,
}

fn decimal(value: &Fr) -> Value {
    Value::String(fr_to_decimal(value))
}

impl CircuitInputs {
    pub fn new(circuit: CircuitId) -> Self {
        Self {
            circuit,
            signals: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: &Fr) {
        self.signals.insert(name.to_string(), decimal(value));
    }

    pub fn set_u64(&mut self, name: &str, value: u64) {
        self.set(name, &Fr::from(value));
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set_u64(name, value as u64);
    }

    pub fn set_all(&mut self, name: &str, values: &[Fr]) {
        self.signals.insert(
            name.to_string(),
            Value::Array(values.iter().map(decimal).collect()),
        );
    }

    pub fn set_nested(&mut self, name: &str, rows: &[Vec<Fr>]) {
        self.signals.insert(
            name.to_string(),
            Value::Array(
                rows.iter()
                    .map(|row| Value::Array(row.iter().map(decimal).collect()))
                    .collect(),
            ),
        );
    }

    fn raw(&self, name: &str) -> ProofResult<&Value> {
        self.signals
            .get(name)
            .ok_or_else(|| ProofError::InvalidRequest(format!("missing input signal {}", name)))
    }

    fn parse(name: &str, value: &Value) -> ProofResult<Fr> {
        value
            .as_str()
            .and_then(|s| fr_from_decimal(s).ok())
            .ok_or_else(|| ProofError::InvalidRequest(format!("input {} is not a field element", name)))
    }

    pub fn get(&self, name: &str) -> ProofResult<Fr> {
        Self::parse(name, self.raw(name)?)
    }

    pub fn get_all(&self, name: &str) -> ProofResult<Vec<Fr>> {
        match self.raw(name)? {
            Value::Array(items) => items.iter().map(|v| Self::parse(name, v)).collect(),
            _ => Err(ProofError::InvalidRequest(format!("input {} is not an array", name))),
        }
    }

    pub fn get_nested(&self, name: &str) -> ProofResult<Vec<Vec<Fr>>> {
        match self.raw(name)? {
            Value::Array(rows) => rows
                .iter()
                .map(|row| match row {
                    Value::Array(items) => items.iter().map(|v| Self::parse(name, v)).collect(),
                    _ => Err(ProofError::InvalidRequest(format!("input {} is not nested", name))),
                })
                .collect(),
            _ => Err(ProofError::InvalidRequest(format!("input {} is not an array", name))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    pub protocol: String,
    pub curve: String,
}

/// Proof plus its public signals, in circuit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    pub proof: Groth16Proof,
    #[serde(with = "serde_decimal_vec")]
    pub pub_signals: Vec<Fr>,
}

/// Answer to one proof request of an authorization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProofResponse {
    pub id: u32,
    pub circuit_id: CircuitId,
    #[serde(flatten)]
    pub zk_proof: ZkProof,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vp: Option<VerifiablePresentation>,
}

// ---------------------------------------------------------------------------
// Selective disclosure presentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub credential_subject: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiablePresentation {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub vp_type: String,
    pub verifiable_credential: PresentedCredential,
}

impl VerifiablePresentation {
    /// Presentation revealing one (possibly nested) subject field.
    pub fn disclose(credential: &W3CCredential, field: &str) -> ProofResult<Self> {
        let value = tessera_query::lookup_field(&credential.credential_subject, field)
            .ok_or_else(|| ProofError::InvalidRequest(format!("field {} not in credential", field)))?;

        let mut subject = Map::new();
        if let Some(t) = credential.credential_subject.get("type") {
            subject.insert("type".into(), t.clone());
        }
        let segments: Vec<&str> = field.split('.').collect();
        let mut nested = value.clone();
        for segment in segments.iter().skip(1).rev() {
            if segment.parse::<usize>().is_ok() {
                return Err(ProofError::InvalidRequest(format!(
                    "cannot disclose array element {}",
                    field
                )));
            }
            let mut obj = Map::new();
            obj.insert((*segment).to_string(), nested);
            nested = Value::Object(obj);
        }
        subject.insert(segments[0].to_string(), nested);

        Ok(Self {
            context: vec![tessera_claim::credential::W3C_CREDENTIALS_CONTEXT.to_string()],
            vp_type: "VerifiablePresentation".into(),
            verifiable_credential: PresentedCredential {
                context: credential.context.clone(),
                types: credential.types.clone(),
                credential_subject: subject,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

/// What the ledger knows about one state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInfo {
    #[serde(with = "serde_decimal")]
    pub id: Fr,
    #[serde(with = "serde_decimal")]
    pub state: Fr,
    #[serde(with = "serde_decimal")]
    pub replaced_by_state: Fr,
    pub created_at_timestamp: u64,
    /// 0 while this is the identity's latest state.
    pub replaced_at_timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GistRootInfo {
    #[serde(with = "serde_decimal")]
    pub root: Fr,
    #[serde(with = "serde_decimal")]
    pub replaced_by_root: Fr,
    pub created_at_timestamp: u64,
    pub replaced_at_timestamp: u64,
}

/// Inclusion or exclusion of an identity in the global identity state tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GistProof {
    #[serde(with = "serde_decimal")]
    pub root: Fr,
    pub proof: Proof,
}

/// Generic transition record published by ethereum-controlled identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionInfo {
    #[serde(with = "serde_decimal")]
    pub user_id: Fr,
    #[serde(with = "serde_decimal")]
    pub old_user_state: Fr,
    #[serde(with = "serde_decimal")]
    pub new_user_state: Fr,
    pub is_old_state_genesis: bool,
    pub method_id: u64,
}

/// Issuer tree state plus a proof for one revocation nonce against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationStatus {
    pub issuer: TreeState,
    pub mtp: Proof,
}

impl RevocationStatus {
    /// `true` when the nonce is in the revocation tree.
    pub fn is_revoked(&self) -> bool {
        self.mtp.existence
    }
}
