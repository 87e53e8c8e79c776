//! A query resolved against one concrete credential, ready to be marshaled
//! into circuit signals, and the query hashes on-chain circuits commit to.

use ark_ff::Zero;
use tessera_claim::{CoreClaim, Merklizer};
use tessera_core::{poseidon_hash, sponge_hash, Fr};
use tessera_merkle::Proof;
use tessera_query::{Operator, QueryMetadata, VALUE_ARRAY_SIZE};

use crate::error::{ProofError, ProofResult};

/// Merkle proof of one path inside a merklized credential.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueProof {
    pub path_key: Fr,
    /// `None` when the path is absent from the credential.
    pub value: Option<Fr>,
    pub mtp: Proof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitQuery {
    pub field_name: String,
    pub operator: Operator,
    pub slot_index: u32,
    /// Operand values, unpadded.
    pub values: Vec<Fr>,
    pub merklized: bool,
    pub claim_path_key: Fr,
    pub value_proof: Option<ValueProof>,
    /// The credential's own value for the field, 0 when it has none.
    pub field_value: Fr,
}

impl CircuitQuery {
    /// Bind query metadata to a credential's claim and, for merklized
    /// credentials, to its merklized form.
    pub fn from_metadata(
        meta: &QueryMetadata,
        claim: &CoreClaim,
        merklizer: Option<&Merklizer>,
    ) -> ProofResult<Self> {
        let (value_proof, field_value) = match (&meta.path, meta.merklized) {
            (Some(path), true) => {
                let m = merklizer.ok_or_else(|| {
                    ProofError::InvalidRequest("merklized query needs the merklized credential".into())
                })?;
                let (mtp, value) = m.proof(path)?;
                let field_value = value.unwrap_or_else(Fr::zero);
                (
                    Some(ValueProof {
                        path_key: meta.claim_path_key,
                        value,
                        mtp,
                    }),
                    field_value,
                )
            }
            (_, true) => (None, Fr::zero()),
            (_, false) if meta.field_name.is_empty() => (None, Fr::zero()),
            (_, false) => {
                let slot = claim
                    .slots()
                    .get(meta.slot_index as usize)
                    .copied()
                    .ok_or_else(|| {
                        ProofError::InvalidRequest(format!("slot {} out of range", meta.slot_index))
                    })?;
                (None, slot)
            }
        };

        if meta.operator == Operator::Sd {
            if let Some(vp) = &value_proof {
                if vp.value.is_none() {
                    return Err(ProofError::InvalidRequest(format!(
                        "cannot disclose absent field {}",
                        meta.field_name
                    )));
                }
            }
        }

        Ok(Self {
            field_name: meta.field_name.clone(),
            operator: meta.operator,
            slot_index: meta.slot_index,
            values: meta.values.clone(),
            merklized: meta.merklized,
            claim_path_key: meta.claim_path_key,
            value_proof,
            field_value,
        })
    }

    /// Query terms as a verifier sees them, bound to no credential.
    pub fn unbound(meta: &QueryMetadata) -> Self {
        Self {
            field_name: meta.field_name.clone(),
            operator: meta.operator,
            slot_index: meta.slot_index,
            values: meta.values.clone(),
            merklized: meta.merklized,
            claim_path_key: meta.claim_path_key,
            value_proof: None,
            field_value: Fr::zero(),
        }
    }

    /// V2 circuits have no `SD` or `NOOP` on a named field: both become an
    /// equality against the credential's own value.
    pub fn for_v2(&self) -> Self {
        let mut q = self.clone();
        if matches!(q.operator, Operator::Sd | Operator::Noop) && !q.field_name.is_empty() {
            q.operator = Operator::Eq;
            q.values = vec![q.field_value];
        }
        q
    }

    pub fn circuit_values(&self) -> ProofResult<Vec<Fr>> {
        if self.values.len() > VALUE_ARRAY_SIZE {
            return Err(ProofError::InvalidRequest(format!(
                "{} values exceed the circuit width {}",
                self.values.len(),
                VALUE_ARRAY_SIZE
            )));
        }
        let mut out = self.values.clone();
        out.resize(VALUE_ARRAY_SIZE, Fr::zero());
        Ok(out)
    }

    /// `claimPathNotExists`: 1 when a merklized path is absent.
    pub fn path_not_exists(&self) -> bool {
        self.value_proof
            .as_ref()
            .map(|vp| !vp.mtp.existence)
            .unwrap_or(false)
    }

    /// `operatorOutput` of V3 and linked circuits.
    pub fn operator_output(&self) -> Fr {
        if self.operator == Operator::Sd {
            self.field_value
        } else {
            Fr::zero()
        }
    }

    /// Placeholder for unused slots of a linked proof.
    pub fn noop(merklized: bool) -> Self {
        Self {
            field_name: String::new(),
            operator: Operator::Noop,
            slot_index: 0,
            values: Vec::new(),
            merklized,
            claim_path_key: Fr::zero(),
            value_proof: None,
            field_value: Fr::zero(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query hashes
// ---------------------------------------------------------------------------

fn flag(b: bool) -> Fr {
    Fr::from(b as u64)
}

fn padded(values: &[Fr]) -> Vec<Fr> {
    let mut out = values.to_vec();
    out.resize(VALUE_ARRAY_SIZE.max(values.len()), Fr::zero());
    out
}

/// `circuitQueryHash` of V2 on-chain circuits.
pub fn query_hash_v2(
    schema: &Fr,
    slot_index: u64,
    operator: u64,
    claim_path_key: &Fr,
    claim_path_not_exists: bool,
    values: &[Fr],
) -> ProofResult<Fr> {
    let values_hash = sponge_hash(&padded(values))?;
    Ok(poseidon_hash(&[
        *schema,
        Fr::from(slot_index),
        Fr::from(operator),
        *claim_path_key,
        flag(claim_path_not_exists),
        values_hash,
    ])?)
}

/// Everything a V3 or linked query hash commits to.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHashInput<'a> {
    pub schema: Fr,
    pub slot_index: u64,
    pub operator: u64,
    pub claim_path_key: Fr,
    pub merklized: bool,
    pub values: &'a [Fr],
    pub value_array_size: u64,
    pub is_revocation_checked: bool,
    pub verifier_id: Fr,
    pub nullifier_session_id: Fr,
}

/// `circuitQueryHash` of V3 on-chain and linked circuits.
pub fn query_hash_v3(input: &QueryHashInput<'_>) -> ProofResult<Fr> {
    let values_hash = sponge_hash(&padded(input.values))?;
    let first = poseidon_hash(&[
        input.schema,
        Fr::from(input.slot_index),
        Fr::from(input.operator),
        input.claim_path_key,
        flag(input.merklized),
        values_hash,
    ])?;
    Ok(poseidon_hash(&[
        first,
        Fr::from(input.value_array_size),
        flag(input.is_revocation_checked),
        input.verifier_id,
        input.nullifier_session_id,
        Fr::zero(),
    ])?)
}

/// Query hash of one slot of a linked proof. Linked circuits do not check
/// revocation and carry no verifier or session.
pub fn linked_query_hash(schema: &Fr, query: &CircuitQuery) -> ProofResult<Fr> {
    query_hash_v3(&QueryHashInput {
        schema: *schema,
        slot_index: query.slot_index as u64,
        operator: query.operator.code(),
        claim_path_key: query.claim_path_key,
        merklized: query.merklized,
        values: &query.values,
        value_array_size: query.values.len() as u64,
        is_revocation_checked: false,
        verifier_id: Fr::zero(),
        nullifier_session_id: Fr::zero(),
    })
}
