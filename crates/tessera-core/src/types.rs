use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::keccak256;
use crate::error::{CoreError, CoreResult};
use crate::field::{fr_from_le_bytes, Fr};

// ---------------------------------------------------------------------------
// Timestamp -- unix seconds, the resolution every circuit signal uses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp().max(0) as u64)
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self(seconds)
    }

    pub fn seconds(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`, zero if `earlier` is in the future.
    pub fn seconds_since(&self, earlier: u64) -> u64 {
        self.0.saturating_sub(earlier)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SchemaHash -- last 16 bytes of keccak256(type IRI)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SchemaHash(pub [u8; 16]);

impl SchemaHash {
    pub fn from_type_iri(type_iri: &str) -> Self {
        let digest = keccak256(type_iri.as_bytes());
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[16..]);
        Self(out)
    }

    pub fn from_hex(text: &str) -> CoreResult<Self> {
        let bytes = hex::decode(text).map_err(|e| CoreError::InvalidEncoding(e.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidEncoding("schema hash must be 16 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The schema hash as the little-endian integer the circuits expose.
    pub fn to_fr(&self) -> Fr {
        // 16 bytes are always below the modulus
        fr_from_le_bytes(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaHash({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// CircuitId -- the closed set of supported circuits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CircuitId {
    AuthV2,
    StateTransition,
    AtomicQueryMtpV2,
    AtomicQueryMtpV2OnChain,
    AtomicQuerySigV2,
    AtomicQuerySigV2OnChain,
    AtomicQueryV3,
    AtomicQueryV3OnChain,
    LinkedMultiQuery10,
}

impl CircuitId {
    pub const ALL: [CircuitId; 9] = [
        CircuitId::AuthV2,
        CircuitId::StateTransition,
        CircuitId::AtomicQueryMtpV2,
        CircuitId::AtomicQueryMtpV2OnChain,
        CircuitId::AtomicQuerySigV2,
        CircuitId::AtomicQuerySigV2OnChain,
        CircuitId::AtomicQueryV3,
        CircuitId::AtomicQueryV3OnChain,
        CircuitId::LinkedMultiQuery10,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::AuthV2 => "authV2",
            CircuitId::StateTransition => "stateTransition",
            CircuitId::AtomicQueryMtpV2 => "credentialAtomicQueryMTPV2",
            CircuitId::AtomicQueryMtpV2OnChain => "credentialAtomicQueryMTPV2OnChain",
            CircuitId::AtomicQuerySigV2 => "credentialAtomicQuerySigV2",
            CircuitId::AtomicQuerySigV2OnChain => "credentialAtomicQuerySigV2OnChain",
            CircuitId::AtomicQueryV3 => "credentialAtomicQueryV3-beta.1",
            CircuitId::AtomicQueryV3OnChain => "credentialAtomicQueryV3OnChain-beta.1",
            CircuitId::LinkedMultiQuery10 => "linkedMultiQuery10-beta.1",
        }
    }

    pub fn is_on_chain(&self) -> bool {
        matches!(
            self,
            CircuitId::AtomicQueryMtpV2OnChain
                | CircuitId::AtomicQuerySigV2OnChain
                | CircuitId::AtomicQueryV3OnChain
        )
    }

    /// Circuits that prove a credential query.
    pub fn is_query_circuit(&self) -> bool {
        !matches!(self, CircuitId::AuthV2 | CircuitId::StateTransition)
    }

    /// The proof type a circuit is pinned to, `None` when both are accepted.
    pub fn fixed_proof_type(&self) -> Option<ProofType> {
        match self {
            CircuitId::AtomicQueryMtpV2 | CircuitId::AtomicQueryMtpV2OnChain => {
                Some(ProofType::Iden3SparseMerkleTreeProof)
            }
            CircuitId::AtomicQuerySigV2 | CircuitId::AtomicQuerySigV2OnChain => {
                Some(ProofType::BjjSignature)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitId {
    type Err = CoreError;

    /// Accepts the canonical id, with or without its version suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.split('-').next().unwrap_or(s);
        CircuitId::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().split('-').next() == Some(base))
            .ok_or_else(|| CoreError::UnknownCircuit(s.to_string()))
    }
}

impl Serialize for CircuitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CircuitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ProofType -- which issuer proof backs a credential in a query circuit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofType {
    #[serde(rename = "BJJSignature2021")]
    BjjSignature,
    #[serde(rename = "Iden3SparseMerkleTreeProof")]
    Iden3SparseMerkleTreeProof,
}

impl ProofType {
    /// Numeric code of the `proofType` signal in V3 circuits.
    pub fn circuit_code(&self) -> u64 {
        match self {
            ProofType::BjjSignature => 1,
            ProofType::Iden3SparseMerkleTreeProof => 2,
        }
    }

    pub fn from_circuit_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(ProofType::BjjSignature),
            2 => Some(ProofType::Iden3SparseMerkleTreeProof),
            _ => None,
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofType::BjjSignature => f.write_str("BJJSignature2021"),
            ProofType::Iden3SparseMerkleTreeProof => f.write_str("Iden3SparseMerkleTreeProof"),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorCategory -- coarse taxonomy shared by every crate's error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed query or request shape.
    Validation,
    /// Recomputed claim differs from the claim carried in a proof.
    BindingMismatch,
    /// State not genesis and not registered, outdated, or missing.
    State,
    /// Credential or signing key revoked.
    Revocation,
    /// Invalid proof, unsupported circuit or operator, signal-count mismatch.
    Proof,
    /// Nothing satisfies the request.
    NotFound,
    /// Storage, hashing or collaborator failures.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_hash_is_keccak_tail() {
        let iri = "https://example.com/schemas/kyc#KYCAgeCredential";
        let digest = keccak256(iri.as_bytes());
        let hash = SchemaHash::from_type_iri(iri);
        assert_eq!(&hash.0[..], &digest[16..]);
        assert_eq!(SchemaHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_schema_hash_differs_per_type() {
        assert_ne!(
            SchemaHash::from_type_iri("urn:a#T1"),
            SchemaHash::from_type_iri("urn:a#T2")
        );
    }

    #[test]
    fn test_schema_hash_bad_hex() {
        assert!(SchemaHash::from_hex("abcd").is_err());
        assert!(SchemaHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_circuit_id_roundtrip() {
        for circuit in CircuitId::ALL {
            let parsed: CircuitId = circuit.as_str().parse().unwrap();
            assert_eq!(parsed, circuit);
        }
    }

    #[test]
    fn test_circuit_id_without_suffix() {
        let parsed: CircuitId = "credentialAtomicQueryV3".parse().unwrap();
        assert_eq!(parsed, CircuitId::AtomicQueryV3);
        let parsed: CircuitId = "credentialAtomicQueryV3OnChain-beta.2".parse().unwrap();
        assert_eq!(parsed, CircuitId::AtomicQueryV3OnChain);
    }

    #[test]
    fn test_circuit_id_unknown() {
        assert!(matches!(
            "credentialAtomicQueryV9".parse::<CircuitId>(),
            Err(CoreError::UnknownCircuit(_))
        ));
    }

    #[test]
    fn test_circuit_id_serde() {
        let json = serde_json::to_string(&CircuitId::AtomicQuerySigV2).unwrap();
        assert_eq!(json, "\"credentialAtomicQuerySigV2\"");
        let back: CircuitId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CircuitId::AtomicQuerySigV2);
    }

    #[test]
    fn test_proof_type_codes() {
        assert_eq!(ProofType::BjjSignature.circuit_code(), 1);
        assert_eq!(
            ProofType::from_circuit_code(2),
            Some(ProofType::Iden3SparseMerkleTreeProof)
        );
        assert_eq!(ProofType::from_circuit_code(3), None);
    }

    #[test]
    fn test_timestamp_seconds_since() {
        let now = Timestamp::from_seconds(1_000);
        assert_eq!(now.seconds_since(400), 600);
        assert_eq!(now.seconds_since(2_000), 0);
    }
}
