//! W3C verifiable credential model with iden3 proof and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_core::field::serde_decimal;
use tessera_core::{BjjSignature, Did, Fr, ProofType};
use tessera_merkle::{Proof, TreeState};

use crate::claim::CoreClaim;
use crate::error::{ClaimError, ClaimResult};

pub const W3C_CREDENTIALS_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
pub const VERIFIABLE_CREDENTIAL_TYPE: &str = "VerifiableCredential";
pub const JSON_SCHEMA_TYPE: &str = "JsonSchema2023";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialStatusType {
    SparseMerkleTreeProof,
    Iden3ReverseSparseMerkleTreeProof,
    #[serde(rename = "Iden3commRevocationStatusV1.0")]
    Iden3commRevocationStatusV1,
    Iden3OnchainSparseMerkleTreeProof2023,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub status_type: CredentialStatusType,
    pub revocation_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub schema_type: String,
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

/// Issuer identity state as recorded in a proof's `issuerData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerState {
    #[serde(with = "serde_decimal")]
    pub value: Fr,
    #[serde(with = "serde_decimal")]
    pub claims_tree_root: Fr,
    #[serde(with = "serde_decimal")]
    pub revocation_tree_root: Fr,
    #[serde(with = "serde_decimal")]
    pub root_of_roots: Fr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<u64>,
}

impl IssuerState {
    pub fn from_tree_state(ts: &TreeState) -> Self {
        Self {
            value: ts.state(),
            claims_tree_root: ts.claims_root(),
            revocation_tree_root: ts.revocation_root(),
            root_of_roots: ts.root_of_roots(),
            tx_id: None,
            block_timestamp: None,
        }
    }

    /// Rebuild the tree state, checking that `value` hashes the roots.
    pub fn tree_state(&self) -> ClaimResult<TreeState> {
        let ts = TreeState::new(
            self.claims_tree_root,
            self.revocation_tree_root,
            self.root_of_roots,
        )?;
        if ts.state() != self.value {
            return Err(ClaimError::InvalidCredential(
                "issuer state does not hash its roots".into(),
            ));
        }
        Ok(ts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerData {
    pub id: Did,
    pub state: IssuerState,
    /// Hex core claim of the issuer's auth key (signature proofs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_core_claim: Option<String>,
    /// Inclusion of the auth claim in the issuer's claims tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtp: Option<Proof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_status: Option<CredentialStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BjjSignatureProof {
    pub issuer_data: IssuerData,
    pub core_claim: String,
    pub signature: String,
}

impl BjjSignatureProof {
    pub fn signature(&self) -> ClaimResult<BjjSignature> {
        Ok(BjjSignature::from_hex(&self.signature)?)
    }

    pub fn auth_core_claim(&self) -> ClaimResult<CoreClaim> {
        let hex = self
            .issuer_data
            .auth_core_claim
            .as_deref()
            .ok_or_else(|| ClaimError::InvalidCredential("issuer auth claim missing".into()))?;
        CoreClaim::from_hex(hex)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iden3SparseMerkleTreeProof {
    pub issuer_data: IssuerData,
    pub core_claim: String,
    pub mtp: Proof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CredentialProof {
    #[serde(rename = "BJJSignature2021")]
    BjjSignature(BjjSignatureProof),
    #[serde(rename = "Iden3SparseMerkleTreeProof")]
    Iden3SparseMerkleTree(Iden3SparseMerkleTreeProof),
}

impl CredentialProof {
    pub fn proof_type(&self) -> ProofType {
        match self {
            CredentialProof::BjjSignature(_) => ProofType::BjjSignature,
            CredentialProof::Iden3SparseMerkleTree(_) => ProofType::Iden3SparseMerkleTreeProof,
        }
    }

    pub fn issuer_data(&self) -> &IssuerData {
        match self {
            CredentialProof::BjjSignature(p) => &p.issuer_data,
            CredentialProof::Iden3SparseMerkleTree(p) => &p.issuer_data,
        }
    }

    pub fn core_claim(&self) -> ClaimResult<CoreClaim> {
        match self {
            CredentialProof::BjjSignature(p) => CoreClaim::from_hex(&p.core_claim),
            CredentialProof::Iden3SparseMerkleTree(p) => CoreClaim::from_hex(&p.core_claim),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct W3CCredential {
    pub id: String,
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuance_date: Option<DateTime<Utc>>,
    pub credential_subject: Map<String, Value>,
    pub credential_status: CredentialStatus,
    pub issuer: String,
    pub credential_schema: CredentialSchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proof: Vec<CredentialProof>,
}

impl W3CCredential {
    /// The credential's own type: the last entry of `type` that is not
    /// `VerifiableCredential`.
    pub fn credential_type(&self) -> ClaimResult<&str> {
        self.types
            .iter()
            .rev()
            .find(|t| t.as_str() != VERIFIABLE_CREDENTIAL_TYPE)
            .map(|t| t.as_str())
            .ok_or_else(|| ClaimError::InvalidCredential("no credential type".into()))
    }

    /// Subject DID, `None` for claims about the issuer itself.
    pub fn subject_did(&self) -> ClaimResult<Option<Did>> {
        match self.credential_subject.get("id") {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.parse()?)),
            Some(other) => Err(ClaimError::InvalidCredential(format!(
                "credentialSubject.id must be a string, got {}",
                other
            ))),
        }
    }

    pub fn issuer_did(&self) -> ClaimResult<Did> {
        Ok(self.issuer.parse()?)
    }

    pub fn revocation_nonce(&self) -> u64 {
        self.credential_status.revocation_nonce
    }

    pub fn get_proof(&self, proof_type: ProofType) -> Option<&CredentialProof> {
        self.proof.iter().find(|p| p.proof_type() == proof_type)
    }

    pub fn has_proof(&self, proof_type: ProofType) -> bool {
        self.get_proof(proof_type).is_some()
    }

    /// The core claim carried by the proof of the given type.
    pub fn core_claim_from_proof(&self, proof_type: ProofType) -> ClaimResult<CoreClaim> {
        self.get_proof(proof_type)
            .ok_or_else(|| ClaimError::MissingProof(proof_type.to_string()))?
            .core_claim()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.map(|e| e <= now).unwrap_or(false)
    }

    /// Credential with its proofs stripped, as it is merklized and signed.
    pub fn without_proofs(&self) -> Self {
        Self {
            proof: Vec::new(),
            ..self.clone()
        }
    }
}
