//! Public signal layouts.
//!
//! The order of `pub_signals` is fixed by each deployed circuit and is the
//! contract with on-chain verifiers. Every layout lives in [`layout`]; both
//! parsing and encoding go through it, so there is exactly one place the
//! order is written down.

use ark_ff::Zero;
use std::collections::HashMap;
use tessera_core::field::{fr_to_decimal, fr_to_u64};
use tessera_core::{CircuitId, Fr, Id};
use tessera_query::VALUE_ARRAY_SIZE;

use crate::error::{ProofError, ProofResult};

/// Queries in one `linkedMultiQuery10` proof.
pub const LINKED_QUERY_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    One(&'static str),
    Many(&'static str, usize),
}

use Slot::{Many, One};

const AUTH_V2: &[Slot] = &[One("userID"), One("challenge"), One("gistRoot")];

const STATE_TRANSITION: &[Slot] = &[
    One("userID"),
    One("oldUserState"),
    One("newUserState"),
    One("isOldStateGenesis"),
];

const MTP_V2: &[Slot] = &[
    One("merklized"),
    One("userID"),
    One("requestID"),
    One("issuerID"),
    One("issuerClaimIdenState"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
    One("claimSchema"),
    One("claimPathNotExists"),
    One("claimPathKey"),
    One("slotIndex"),
    One("operator"),
    Many("value", VALUE_ARRAY_SIZE),
];

const SIG_V2: &[Slot] = &[
    One("merklized"),
    One("userID"),
    One("issuerAuthState"),
    One("requestID"),
    One("issuerID"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
    One("claimSchema"),
    One("claimPathNotExists"),
    One("claimPathKey"),
    One("slotIndex"),
    One("operator"),
    Many("value", VALUE_ARRAY_SIZE),
];

const MTP_V2_ON_CHAIN: &[Slot] = &[
    One("merklized"),
    One("userID"),
    One("circuitQueryHash"),
    One("requestID"),
    One("challenge"),
    One("gistRoot"),
    One("issuerID"),
    One("issuerClaimIdenState"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
];

const SIG_V2_ON_CHAIN: &[Slot] = &[
    One("merklized"),
    One("userID"),
    One("issuerAuthState"),
    One("circuitQueryHash"),
    One("requestID"),
    One("challenge"),
    One("gistRoot"),
    One("issuerID"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
];

const V3: &[Slot] = &[
    One("userID"),
    One("issuerState"),
    One("linkID"),
    One("nullifier"),
    One("operatorOutput"),
    One("proofType"),
    One("requestID"),
    One("issuerID"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
    One("claimSchema"),
    One("claimPathKey"),
    One("slotIndex"),
    One("operator"),
    Many("value", VALUE_ARRAY_SIZE),
    One("valueArraySize"),
    One("verifierID"),
    One("nullifierSessionID"),
];

const V3_ON_CHAIN: &[Slot] = &[
    One("userID"),
    One("circuitQueryHash"),
    One("issuerState"),
    One("linkID"),
    One("nullifier"),
    One("operatorOutput"),
    One("proofType"),
    One("requestID"),
    One("challenge"),
    One("gistRoot"),
    One("issuerID"),
    One("isRevocationChecked"),
    One("issuerClaimNonRevState"),
    One("timestamp"),
    One("isBJJAuthEnabled"),
];

const LINKED_MULTI_QUERY: &[Slot] = &[
    One("linkID"),
    One("merklized"),
    Many("operatorOutput", LINKED_QUERY_COUNT),
    Many("circuitQueryHash", LINKED_QUERY_COUNT),
];

pub fn layout(circuit: CircuitId) -> &'static [Slot] {
    match circuit {
        CircuitId::AuthV2 => AUTH_V2,
        CircuitId::StateTransition => STATE_TRANSITION,
        CircuitId::AtomicQueryMtpV2 => MTP_V2,
        CircuitId::AtomicQuerySigV2 => SIG_V2,
        CircuitId::AtomicQueryMtpV2OnChain => MTP_V2_ON_CHAIN,
        CircuitId::AtomicQuerySigV2OnChain => SIG_V2_ON_CHAIN,
        CircuitId::AtomicQueryV3 => V3,
        CircuitId::AtomicQueryV3OnChain => V3_ON_CHAIN,
        CircuitId::LinkedMultiQuery10 => LINKED_MULTI_QUERY,
    }
}

pub fn signal_count(circuit: CircuitId) -> usize {
    layout(circuit)
        .iter()
        .map(|s| match s {
            One(_) => 1,
            Many(_, n) => *n,
        })
        .sum()
}

// ---------------------------------------------------------------------------
// NamedSignals
// ---------------------------------------------------------------------------

/// Public signals keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedSignals {
    values: HashMap<&'static str, Vec<Fr>>,
}

impl NamedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split an ordered signal array along the circuit layout.
    pub fn from_ordered(circuit: CircuitId, signals: &[Fr]) -> ProofResult<Self> {
        let expected = signal_count(circuit);
        if signals.len() != expected {
            return Err(ProofError::SignalCountMismatch {
                circuit,
                expected,
                got: signals.len(),
            });
        }
        let mut values = HashMap::new();
        let mut pos = 0;
        for slot in layout(circuit) {
            let (name, n) = match slot {
                One(name) => (*name, 1),
                Many(name, n) => (*name, *n),
            };
            values.insert(name, signals[pos..pos + n].to_vec());
            pos += n;
        }
        Ok(Self { values })
    }

    /// Flatten along the circuit layout. Missing signals are an error.
    pub fn to_ordered(&self, circuit: CircuitId) -> ProofResult<Vec<Fr>> {
        let mut out = Vec::with_capacity(signal_count(circuit));
        for slot in layout(circuit) {
            let (name, n) = match slot {
                One(name) => (*name, 1),
                Many(name, n) => (*name, *n),
            };
            let v = self.values.get(name).ok_or(ProofError::InvalidSignal {
                name,
                reason: "missing".into(),
            })?;
            if v.len() != n {
                return Err(ProofError::InvalidSignal {
                    name,
                    reason: format!("expected {} elements, got {}", n, v.len()),
                });
            }
            out.extend_from_slice(v);
        }
        Ok(out)
    }

    pub fn set(&mut self, name: &'static str, value: Fr) {
        self.values.insert(name, vec![value]);
    }

    pub fn set_all(&mut self, name: &'static str, values: Vec<Fr>) {
        self.values.insert(name, values);
    }

    pub fn fr(&self, name: &'static str) -> ProofResult<Fr> {
        self.values
            .get(name)
            .and_then(|v| v.first().copied())
            .ok_or(ProofError::InvalidSignal {
                name,
                reason: "missing".into(),
            })
    }

    pub fn all(&self, name: &'static str) -> ProofResult<Vec<Fr>> {
        self.values.get(name).cloned().ok_or(ProofError::InvalidSignal {
            name,
            reason: "missing".into(),
        })
    }

    pub fn id(&self, name: &'static str) -> ProofResult<Id> {
        Id::from_fr(&self.fr(name)?).map_err(|e| ProofError::InvalidSignal {
            name,
            reason: e.to_string(),
        })
    }

    pub fn flag(&self, name: &'static str) -> ProofResult<bool> {
        let v = self.fr(name)?;
        if v.is_zero() {
            Ok(false)
        } else if v == Fr::from(1u64) {
            Ok(true)
        } else {
            Err(ProofError::InvalidSignal {
                name,
                reason: format!("{} is not a flag", fr_to_decimal(&v)),
            })
        }
    }

    pub fn u64(&self, name: &'static str) -> ProofResult<u64> {
        fr_to_u64(&self.fr(name)?).map_err(|e| ProofError::InvalidSignal {
            name,
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Typed records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthV2Signals {
    pub user_id: Id,
    pub challenge: Fr,
    pub gist_root: Fr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateTransitionSignals {
    pub user_id: Id,
    pub old_user_state: Fr,
    pub new_user_state: Fr,
    pub is_old_state_genesis: bool,
}

/// `credentialAtomicQueryMTPV2` / `credentialAtomicQuerySigV2`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryV2Signals {
    pub merklized: bool,
    pub user_id: Id,
    /// `issuerClaimIdenState` (MTP) or `issuerAuthState` (Sig).
    pub issuer_state: Fr,
    pub request_id: Fr,
    pub issuer_id: Id,
    pub is_revocation_checked: bool,
    pub issuer_claim_non_rev_state: Fr,
    pub timestamp: u64,
    pub claim_schema: Fr,
    pub claim_path_not_exists: bool,
    pub claim_path_key: Fr,
    pub slot_index: u64,
    pub operator: u64,
    pub values: Vec<Fr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryV2OnChainSignals {
    pub merklized: bool,
    pub user_id: Id,
    pub issuer_state: Fr,
    pub circuit_query_hash: Fr,
    pub request_id: Fr,
    pub challenge: Fr,
    pub gist_root: Fr,
    pub issuer_id: Id,
    pub is_revocation_checked: bool,
    pub issuer_claim_non_rev_state: Fr,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryV3Signals {
    pub user_id: Id,
    pub issuer_state: Fr,
    pub link_id: Fr,
    pub nullifier: Fr,
    pub operator_output: Fr,
    pub proof_type: u64,
    pub request_id: Fr,
    pub issuer_id: Id,
    pub is_revocation_checked: bool,
    pub issuer_claim_non_rev_state: Fr,
    pub timestamp: u64,
    pub claim_schema: Fr,
    pub claim_path_key: Fr,
    pub slot_index: u64,
    pub operator: u64,
    pub values: Vec<Fr>,
    pub value_array_size: u64,
    pub verifier_id: Fr,
    pub nullifier_session_id: Fr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryV3OnChainSignals {
    pub user_id: Id,
    pub circuit_query_hash: Fr,
    pub issuer_state: Fr,
    pub link_id: Fr,
    pub nullifier: Fr,
    pub operator_output: Fr,
    pub proof_type: u64,
    pub request_id: Fr,
    pub challenge: Fr,
    pub gist_root: Fr,
    pub issuer_id: Id,
    pub is_revocation_checked: bool,
    pub issuer_claim_non_rev_state: Fr,
    pub timestamp: u64,
    pub is_bjj_auth_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedMultiQuerySignals {
    pub link_id: Fr,
    pub merklized: bool,
    pub operator_outputs: Vec<Fr>,
    pub circuit_query_hashes: Vec<Fr>,
}

/// Public signals of any supported circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSignals {
    AuthV2(AuthV2Signals),
    StateTransition(StateTransitionSignals),
    QueryV2(QueryV2Signals),
    QueryV2OnChain(QueryV2OnChainSignals),
    QueryV3(QueryV3Signals),
    QueryV3OnChain(QueryV3OnChainSignals),
    LinkedMultiQuery(LinkedMultiQuerySignals),
}

fn issuer_state_name(circuit: CircuitId) -> &'static str {
    match circuit {
        CircuitId::AtomicQuerySigV2 | CircuitId::AtomicQuerySigV2OnChain => "issuerAuthState",
        _ => "issuerClaimIdenState",
    }
}

impl PubSignals {
    pub fn parse(circuit: CircuitId, signals: &[Fr]) -> ProofResult<Self> {
        let s = NamedSignals::from_ordered(circuit, signals)?;
        Ok(match circuit {
            CircuitId::AuthV2 => PubSignals::AuthV2(AuthV2Signals {
                user_id: s.id("userID")?,
                challenge: s.fr("challenge")?,
                gist_root: s.fr("gistRoot")?,
            }),
            CircuitId::StateTransition => PubSignals::StateTransition(StateTransitionSignals {
                user_id: s.id("userID")?,
                old_user_state: s.fr("oldUserState")?,
                new_user_state: s.fr("newUserState")?,
                is_old_state_genesis: s.flag("isOldStateGenesis")?,
            }),
            CircuitId::AtomicQueryMtpV2 | CircuitId::AtomicQuerySigV2 => {
                PubSignals::QueryV2(QueryV2Signals {
                    merklized: s.flag("merklized")?,
                    user_id: s.id("userID")?,
                    issuer_state: s.fr(issuer_state_name(circuit))?,
                    request_id: s.fr("requestID")?,
                    issuer_id: s.id("issuerID")?,
                    is_revocation_checked: s.flag("isRevocationChecked")?,
                    issuer_claim_non_rev_state: s.fr("issuerClaimNonRevState")?,
                    timestamp: s.u64("timestamp")?,
                    claim_schema: s.fr("claimSchema")?,
                    claim_path_not_exists: s.flag("claimPathNotExists")?,
                    claim_path_key: s.fr("claimPathKey")?,
                    slot_index: s.u64("slotIndex")?,
                    operator: s.u64("operator")?,
                    values: s.all("value")?,
                })
            }
            CircuitId::AtomicQueryMtpV2OnChain | CircuitId::AtomicQuerySigV2OnChain => {
                PubSignals::QueryV2OnChain(QueryV2OnChainSignals {
                    merklized: s.flag("merklized")?,
                    user_id: s.id("userID")?,
                    issuer_state: s.fr(issuer_state_name(circuit))?,
                    circuit_query_hash: s.fr("circuitQueryHash")?,
                    request_id: s.fr("requestID")?,
                    challenge: s.fr("challenge")?,
                    gist_root: s.fr("gistRoot")?,
                    issuer_id: s.id("issuerID")?,
                    is_revocation_checked: s.flag("isRevocationChecked")?,
                    issuer_claim_non_rev_state: s.fr("issuerClaimNonRevState")?,
                    timestamp: s.u64("timestamp")?,
                })
            }
            CircuitId::AtomicQueryV3 => PubSignals::QueryV3(QueryV3Signals {
                user_id: s.id("userID")?,
                issuer_state: s.fr("issuerState")?,
                link_id: s.fr("linkID")?,
                nullifier: s.fr("nullifier")?,
                operator_output: s.fr("operatorOutput")?,
                proof_type: s.u64("proofType")?,
                request_id: s.fr("requestID")?,
                issuer_id: s.id("issuerID")?,
                is_revocation_checked: s.flag("isRevocationChecked")?,
                issuer_claim_non_rev_state: s.fr("issuerClaimNonRevState")?,
                timestamp: s.u64("timestamp")?,
                claim_schema: s.fr("claimSchema")?,
                claim_path_key: s.fr("claimPathKey")?,
                slot_index: s.u64("slotIndex")?,
                operator: s.u64("operator")?,
                values: s.all("value")?,
                value_array_size: s.u64("valueArraySize")?,
                verifier_id: s.fr("verifierID")?,
                nullifier_session_id: s.fr("nullifierSessionID")?,
            }),
            CircuitId::AtomicQueryV3OnChain => PubSignals::QueryV3OnChain(QueryV3OnChainSignals {
                user_id: s.id("userID")?,
                circuit_query_hash: s.fr("circuitQueryHash")?,
                issuer_state: s.fr("issuerState")?,
                link_id: s.fr("linkID")?,
                nullifier: s.fr("nullifier")?,
                operator_output: s.fr("operatorOutput")?,
                proof_type: s.u64("proofType")?,
                request_id: s.fr("requestID")?,
                challenge: s.fr("challenge")?,
                gist_root: s.fr("gistRoot")?,
                issuer_id: s.id("issuerID")?,
                is_revocation_checked: s.flag("isRevocationChecked")?,
                issuer_claim_non_rev_state: s.fr("issuerClaimNonRevState")?,
                timestamp: s.u64("timestamp")?,
                is_bjj_auth_enabled: s.flag("isBJJAuthEnabled")?,
            }),
            CircuitId::LinkedMultiQuery10 => {
                PubSignals::LinkedMultiQuery(LinkedMultiQuerySignals {
                    link_id: s.fr("linkID")?,
                    merklized: s.flag("merklized")?,
                    operator_outputs: s.all("operatorOutput")?,
                    circuit_query_hashes: s.all("circuitQueryHash")?,
                })
            }
        })
    }

    /// Proving identity, when the circuit exposes one.
    pub fn user_id(&self) -> Option<Id> {
        match self {
            PubSignals::AuthV2(s) => Some(s.user_id),
            PubSignals::StateTransition(s) => Some(s.user_id),
            PubSignals::QueryV2(s) => Some(s.user_id),
            PubSignals::QueryV2OnChain(s) => Some(s.user_id),
            PubSignals::QueryV3(s) => Some(s.user_id),
            PubSignals::QueryV3OnChain(s) => Some(s.user_id),
            PubSignals::LinkedMultiQuery(_) => None,
        }
    }

    /// Link id of circuits that expose one; zero means unlinked.
    pub fn link_id(&self) -> Option<Fr> {
        match self {
            PubSignals::QueryV3(s) => Some(s.link_id),
            PubSignals::QueryV3OnChain(s) => Some(s.link_id),
            PubSignals::LinkedMultiQuery(s) => Some(s.link_id),
            _ => None,
        }
    }
}
