//! Simulated proving backend and in-memory ledger.
//!
//! [`SimulatedProver`] evaluates each circuit's constraints natively over the
//! named input map and derives the public signals the circuit would output.
//! Its "proof" only commits to those signals, so it proves nothing to a third
//! party; it exists so the whole request, prove, verify cycle runs without
//! witness calculators or proving keys.
//!
//! [`InMemoryStateOracle`] is a ledger holding identity state histories and
//! the global identity state tree (GIST).

use ark_ff::Zero;
use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tessera_claim::{auth_public_key, CoreClaim};
use tessera_core::field::{fr_to_biguint, fr_to_decimal, fr_to_le_bytes, fr_to_u64};
use tessera_core::{
    keccak256, poseidon_hash, sponge_hash, BjjPoint, BjjPublicKey, BjjSignature, CircuitId, Fr,
    Id, LedgerSigner, ProofType, Timestamp,
};
use tessera_merkle::{
    verify_proof, AuxSignals, MerkleError, Proof, SparseMerkleTree, TreeState, GIST_DEPTH,
};
use tessera_query::Operator;

use crate::circuit_query::{query_hash_v2, query_hash_v3, QueryHashInput};
use crate::error::{ProofError, ProofResult};
use crate::signals::{signal_count, NamedSignals, PubSignals, LINKED_QUERY_COUNT};
use crate::traits::{KeyLoader, Prover, StateOracle};
use crate::types::{
    CircuitInputs, GistProof, GistRootInfo, Groth16Proof, StateInfo, StateTransitionInfo, ZkProof,
    ETH_STATE_TRANSITION_METHOD_ID,
};

/// Verification key the simulated prover accepts for `circuit`.
pub fn simulated_key(circuit: CircuitId) -> Vec<u8> {
    format!("simulated:{}", circuit).into_bytes()
}

/// Key of an identity's leaf in the GIST.
pub fn gist_key(id: &Id) -> ProofResult<Fr> {
    Ok(poseidon_hash(&[id.to_fr()])?)
}

// ---------------------------------------------------------------------------
// Constraint helpers
// ---------------------------------------------------------------------------

fn constraint(ok: bool, what: &str) -> ProofResult<()> {
    if ok {
        Ok(())
    } else {
        Err(ProofError::ProofGenerationFailed(format!(
            "constraint not satisfied: {}",
            what
        )))
    }
}

/// Aux signals of an inclusion proof.
fn inclusion_aux() -> AuxSignals {
    AuxSignals {
        key: Fr::zero(),
        value: Fr::zero(),
        no_aux: Fr::zero(),
    }
}

fn flag_input(inputs: &CircuitInputs, name: &str) -> ProofResult<bool> {
    let v = inputs.get(name)?;
    if v.is_zero() {
        Ok(false)
    } else if v == Fr::from(1u64) {
        Ok(true)
    } else {
        Err(ProofError::InvalidRequest(format!("input {} is not a flag", name)))
    }
}

fn u64_input(inputs: &CircuitInputs, name: &str) -> ProofResult<u64> {
    Ok(fr_to_u64(&inputs.get(name)?)?)
}

fn claim_input(inputs: &CircuitInputs, name: &str) -> ProofResult<CoreClaim> {
    Ok(CoreClaim::from_slots(&inputs.get_all(name)?)?)
}

fn tree_state(inputs: &CircuitInputs, names: [&str; 3]) -> ProofResult<TreeState> {
    Ok(TreeState::new(
        inputs.get(names[0])?,
        inputs.get(names[1])?,
        inputs.get(names[2])?,
    )?)
}

fn aux_input(inputs: &CircuitInputs, prefix: &str) -> ProofResult<AuxSignals> {
    Ok(AuxSignals {
        key: inputs.get(&format!("{}AuxHi", prefix))?,
        value: inputs.get(&format!("{}AuxHv", prefix))?,
        no_aux: inputs.get(&format!("{}NoAux", prefix))?,
    })
}

fn signature_input(inputs: &CircuitInputs, prefix: &str) -> ProofResult<BjjSignature> {
    Ok(BjjSignature {
        r8: BjjPoint {
            x: inputs.get(&format!("{}R8x", prefix))?,
            y: inputs.get(&format!("{}R8y", prefix))?,
        },
        s: fr_to_biguint(&inputs.get(&format!("{}S", prefix))?),
    })
}

/// A proof that fails to fold is an unsatisfied constraint, not an error.
fn proof_holds(root: &Fr, proof: &Proof, key: &Fr, value: &Fr) -> ProofResult<bool> {
    match verify_proof(root, proof, key, value) {
        Ok(ok) => Ok(ok),
        Err(MerkleError::InvalidProof(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn included(inputs: &CircuitInputs, name: &str, root: &Fr, key: &Fr, value: &Fr) -> ProofResult<bool> {
    let proof = Proof::from_circuit(&inputs.get_all(name)?, &inclusion_aux(), true);
    proof_holds(root, &proof, key, value)
}

fn excluded(inputs: &CircuitInputs, name: &str, root: &Fr, key: &Fr) -> ProofResult<bool> {
    let aux = aux_input(inputs, name)?;
    let proof = Proof::from_circuit(&inputs.get_all(name)?, &aux, false);
    proof_holds(root, &proof, key, &Fr::zero())
}

fn profiled(genesis: &Id, nonce: &Fr) -> ProofResult<Id> {
    if nonce.is_zero() {
        Ok(*genesis)
    } else {
        Ok(genesis.profile(nonce)?)
    }
}

/// Auth claim included in and not revoked from `state`.
fn check_auth_claim(
    inputs: &CircuitInputs,
    names: [&str; 3],
    state: &TreeState,
) -> ProofResult<(CoreClaim, BjjPublicKey)> {
    let [claim_name, inclusion_name, non_rev_name] = names;
    let claim = claim_input(inputs, claim_name)?;
    let (hi, hv) = claim.hi_hv()?;
    constraint(
        included(inputs, inclusion_name, &state.claims_root(), &hi, &hv)?,
        "auth claim is in the claims tree",
    )?;
    constraint(
        excluded(
            inputs,
            non_rev_name,
            &state.revocation_root(),
            &Fr::from(claim.revocation_nonce()),
        )?,
        "auth claim is not revoked",
    )?;
    let key = auth_public_key(&claim)?;
    Ok((claim, key))
}

/// Holder authentication: auth claim, challenge signature and GIST
/// membership. Returns the GIST root.
fn check_user_auth(
    inputs: &CircuitInputs,
    genesis_id: &Id,
    roots: [&str; 3],
    state_name: &str,
) -> ProofResult<Fr> {
    let state = tree_state(inputs, roots)?;
    constraint(state.state() == inputs.get(state_name)?, "user state matches its roots")?;
    let (_, key) = check_auth_claim(
        inputs,
        ["authClaim", "authClaimIncMtp", "authClaimNonRevMtp"],
        &state,
    )?;
    let challenge = inputs.get("challenge")?;
    constraint(
        key.verify_poseidon(&challenge, &signature_input(inputs, "challengeSignature")?),
        "challenge signature",
    )?;

    let gist_root = inputs.get("gistRoot")?;
    let gist_leaf = gist_key(genesis_id)?;
    let aux = aux_input(inputs, "gistMtp")?;
    let siblings = inputs.get_all("gistMtp")?;
    let in_gist = aux == inclusion_aux()
        && proof_holds(
            &gist_root,
            &Proof::from_circuit(&siblings, &aux, true),
            &gist_leaf,
            &state.state(),
        )?;
    if !in_gist {
        constraint(
            proof_holds(
                &gist_root,
                &Proof::from_circuit(&siblings, &aux, false),
                &gist_leaf,
                &Fr::zero(),
            )?,
            "identity is absent from the GIST",
        )?;
        constraint(
            genesis_id.is_genesis_state(&state.state()),
            "state outside the GIST is the genesis state",
        )?;
    }
    Ok(gist_root)
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

struct PathWitness {
    siblings: Vec<Fr>,
    aux: AuxSignals,
    value: Fr,
}

/// Value a query applies to, and whether the field exists.
fn field_value(
    claim: &CoreClaim,
    merklized_root: Option<Fr>,
    key: &Fr,
    slot_index: u64,
    path: &PathWitness,
    not_exists: Option<bool>,
) -> ProofResult<(Fr, bool)> {
    match merklized_root {
        Some(root) => {
            if key.is_zero() {
                return Ok((Fr::zero(), false));
            }
            let existence = match not_exists {
                Some(ne) => !ne,
                None => path.aux == inclusion_aux(),
            };
            let proof = Proof::from_circuit(&path.siblings, &path.aux, existence);
            constraint(
                proof_holds(&root, &proof, key, &path.value)?,
                "claim path proof",
            )?;
            let value = if existence { path.value } else { Fr::zero() };
            Ok((value, existence))
        }
        None => {
            let slots = claim.slots();
            let value = slots.get(slot_index as usize).copied().ok_or_else(|| {
                ProofError::InvalidRequest(format!("slot index {} out of range", slot_index))
            })?;
            Ok((value, !value.is_zero()))
        }
    }
}

fn predicate(operator: Operator, field: &Fr, exists: bool, values: &[Fr]) -> ProofResult<bool> {
    let x = fr_to_biguint(field);
    let v = |i: usize| -> BigUint { values.get(i).map(fr_to_biguint).unwrap_or_default() };
    Ok(match operator {
        Operator::Noop | Operator::Sd => true,
        Operator::Eq => x == v(0),
        Operator::Ne => x != v(0),
        Operator::Lt => x < v(0),
        Operator::Gt => x > v(0),
        Operator::Lte => x <= v(0),
        Operator::Gte => x >= v(0),
        Operator::In => values.contains(field),
        Operator::Nin => !values.contains(field),
        Operator::Between => x >= v(0) && x <= v(1),
        Operator::NonBetween => x < v(0) || x > v(1),
        Operator::Exists => exists == (v(0) == BigUint::from(1u32)),
        Operator::Nullify => {
            return Err(ProofError::InvalidRequest(
                "nullify is not a credential predicate".into(),
            ))
        }
    })
}

/// Signals every single-credential query circuit derives the same way.
struct CommonQuery {
    claim: CoreClaim,
    genesis_id: Id,
    user_id: Id,
    merklized_root: Option<Fr>,
    schema: Fr,
    issuer_state: Fr,
    non_rev_state: Fr,
    is_revocation_checked: bool,
}

fn check_issuer_claim(
    inputs: &CircuitInputs,
    claim: &CoreClaim,
    proof_type: ProofType,
    non_rev: &TreeState,
) -> ProofResult<Fr> {
    match proof_type {
        ProofType::Iden3SparseMerkleTreeProof => {
            let state = tree_state(
                inputs,
                [
                    "issuerClaimClaimsTreeRoot",
                    "issuerClaimRevTreeRoot",
                    "issuerClaimRootsTreeRoot",
                ],
            )?;
            let iden_state = inputs.get("issuerClaimIdenState")?;
            constraint(state.state() == iden_state, "issuer state matches its roots")?;
            let (hi, hv) = claim.hi_hv()?;
            constraint(
                included(inputs, "issuerClaimMtp", &state.claims_root(), &hi, &hv)?,
                "issuer claim is in the issuer's claims tree",
            )?;
            Ok(iden_state)
        }
        ProofType::BjjSignature => {
            let state = tree_state(
                inputs,
                [
                    "issuerAuthClaimsTreeRoot",
                    "issuerAuthRevTreeRoot",
                    "issuerAuthRootsTreeRoot",
                ],
            )?;
            let auth_claim = claim_input(inputs, "issuerAuthClaim")?;
            let (hi, hv) = auth_claim.hi_hv()?;
            constraint(
                included(inputs, "issuerAuthClaimMtp", &state.claims_root(), &hi, &hv)?,
                "issuer auth claim is in the issuer's claims tree",
            )?;
            // the auth key must still be valid at the non-revocation state
            constraint(
                excluded(
                    inputs,
                    "issuerAuthClaimNonRevMtp",
                    &non_rev.revocation_root(),
                    &Fr::from(auth_claim.revocation_nonce()),
                )?,
                "issuer auth claim is not revoked",
            )?;
            let key = auth_public_key(&auth_claim)?;
            constraint(
                key.verify_poseidon(&claim.hash()?, &signature_input(inputs, "issuerClaimSignature")?),
                "issuer claim signature",
            )?;
            Ok(state.state())
        }
    }
}

fn common_query(inputs: &CircuitInputs, proof_type: ProofType) -> ProofResult<CommonQuery> {
    let claim = claim_input(inputs, "issuerClaim")?;
    let schema = inputs.get("claimSchema")?;
    constraint(schema == claim.schema_hash().to_fr(), "claim schema")?;

    let genesis_id = Id::from_fr(&inputs.get("userGenesisID")?)?;
    let user_id = profiled(&genesis_id, &inputs.get("profileNonce")?)?;
    if let Some(subject) = claim.subject_id()? {
        let expected = profiled(&genesis_id, &inputs.get("claimSubjectProfileNonce")?)?;
        constraint(subject == expected, "claim subject is the holder")?;
    }
    if let Some(expiration) = claim.expiration() {
        constraint(
            expiration >= u64_input(inputs, "timestamp")? as i64,
            "claim is not expired",
        )?;
    }

    let non_rev = tree_state(
        inputs,
        [
            "issuerClaimNonRevClaimsTreeRoot",
            "issuerClaimNonRevRevTreeRoot",
            "issuerClaimNonRevRootsTreeRoot",
        ],
    )?;
    let non_rev_state = inputs.get("issuerClaimNonRevState")?;
    constraint(non_rev.state() == non_rev_state, "non-revocation state matches its roots")?;
    let issuer_state = check_issuer_claim(inputs, &claim, proof_type, &non_rev)?;
    let is_revocation_checked = flag_input(inputs, "isRevocationChecked")?;
    if is_revocation_checked {
        constraint(
            excluded(
                inputs,
                "issuerClaimNonRevMtp",
                &non_rev.revocation_root(),
                &Fr::from(claim.revocation_nonce()),
            )?,
            "issuer claim is not revoked",
        )?;
    }

    let merklized_root = claim.merklized_root()?;
    Ok(CommonQuery {
        claim,
        genesis_id,
        user_id,
        merklized_root,
        schema,
        issuer_state,
        non_rev_state,
        is_revocation_checked,
    })
}

struct SingleQuery {
    operator: Operator,
    slot_index: u64,
    claim_path_key: Fr,
    values: Vec<Fr>,
    value_array_size: usize,
    path_not_exists: bool,
    field: Fr,
}

fn single_query(inputs: &CircuitInputs, common: &CommonQuery, v2: bool) -> ProofResult<SingleQuery> {
    let operator = Operator::from_code(u64_input(inputs, "operator")?)?;
    let slot_index = u64_input(inputs, "slotIndex")?;
    let claim_path_key = inputs.get("claimPathKey")?;
    let values = inputs.get_all("value")?;
    let path = PathWitness {
        siblings: inputs.get_all("claimPathMtp")?,
        aux: aux_input(inputs, "claimPathMtp")?,
        value: inputs.get("claimPathValue")?,
    };
    let not_exists = if v2 {
        Some(flag_input(inputs, "claimPathNotExists")?)
    } else {
        None
    };
    let (field, exists) = field_value(
        &common.claim,
        common.merklized_root,
        &claim_path_key,
        slot_index,
        &path,
        not_exists,
    )?;
    // V2 circuits compare against the whole padded array
    let value_array_size = if v2 {
        values.len()
    } else {
        u64_input(inputs, "valueArraySize")? as usize
    };
    constraint(value_array_size <= values.len(), "value array size")?;
    constraint(
        predicate(operator, &field, exists, &values[..value_array_size])?,
        "query predicate",
    )?;
    Ok(SingleQuery {
        operator,
        slot_index,
        claim_path_key,
        values,
        value_array_size,
        path_not_exists: !exists && common.merklized_root.is_some() && !claim_path_key.is_zero(),
        field,
    })
}

fn link_id(claim: &CoreClaim, link_nonce: &Fr) -> ProofResult<Fr> {
    if link_nonce.is_zero() {
        Ok(Fr::zero())
    } else {
        Ok(poseidon_hash(&[claim.hash()?, *link_nonce])?)
    }
}

fn v2_state_name(proof_type: ProofType) -> &'static str {
    match proof_type {
        ProofType::Iden3SparseMerkleTreeProof => "issuerClaimIdenState",
        ProofType::BjjSignature => "issuerAuthState",
    }
}

fn set_common_outputs(out: &mut NamedSignals, inputs: &CircuitInputs, c: &CommonQuery) -> ProofResult<()> {
    out.set("userID", c.user_id.to_fr());
    out.set("requestID", inputs.get("requestID")?);
    out.set("issuerID", inputs.get("issuerID")?);
    out.set("isRevocationChecked", Fr::from(c.is_revocation_checked as u64));
    out.set("issuerClaimNonRevState", c.non_rev_state);
    out.set("timestamp", inputs.get("timestamp")?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-circuit evaluation
// ---------------------------------------------------------------------------

fn auth_v2(inputs: &CircuitInputs) -> ProofResult<NamedSignals> {
    let genesis_id = Id::from_fr(&inputs.get("genesisID")?)?;
    let gist_root = check_user_auth(
        inputs,
        &genesis_id,
        ["claimsTreeRoot", "revTreeRoot", "rootsTreeRoot"],
        "state",
    )?;
    let mut out = NamedSignals::new();
    out.set("userID", profiled(&genesis_id, &inputs.get("profileNonce")?)?.to_fr());
    out.set("challenge", inputs.get("challenge")?);
    out.set("gistRoot", gist_root);
    Ok(out)
}

fn state_transition(inputs: &CircuitInputs) -> ProofResult<NamedSignals> {
    let id = Id::from_fr(&inputs.get("userID")?)?;
    let old = tree_state(inputs, ["claimsTreeRoot", "revTreeRoot", "rootsTreeRoot"])?;
    let new = tree_state(inputs, ["newClaimsTreeRoot", "newRevTreeRoot", "newRootsTreeRoot"])?;
    let old_state = inputs.get("oldUserState")?;
    let new_state = inputs.get("newUserState")?;
    constraint(old.state() == old_state, "old state matches its roots")?;
    constraint(new.state() == new_state, "new state matches its roots")?;
    constraint(old_state != new_state, "state changes")?;

    let is_old_state_genesis = flag_input(inputs, "isOldStateGenesis")?;
    if is_old_state_genesis {
        constraint(id.is_genesis_state(&old_state), "old state is the genesis state")?;
    }

    let (claim, key) = check_auth_claim(
        inputs,
        ["authClaim", "authClaimMtp", "authClaimNonRevMtp"],
        &old,
    )?;
    let (hi, hv) = claim.hi_hv()?;
    constraint(
        included(inputs, "authClaimNewStateIncMtp", &new.claims_root(), &hi, &hv)?,
        "auth claim is in the new claims tree",
    )?;
    let message = poseidon_hash(&[old_state, new_state])?;
    constraint(
        key.verify_poseidon(&message, &signature_input(inputs, "signature")?),
        "transition signature",
    )?;

    let mut out = NamedSignals::new();
    out.set("userID", id.to_fr());
    out.set("oldUserState", old_state);
    out.set("newUserState", new_state);
    out.set("isOldStateGenesis", Fr::from(is_old_state_genesis as u64));
    Ok(out)
}

fn query_v2(inputs: &CircuitInputs, circuit: CircuitId) -> ProofResult<NamedSignals> {
    let proof_type = circuit.fixed_proof_type().ok_or_else(|| {
        ProofError::InvalidRequest(format!("{} has no fixed proof type", circuit))
    })?;
    let common = common_query(inputs, proof_type)?;
    let q = single_query(inputs, &common, true)?;

    let mut out = NamedSignals::new();
    set_common_outputs(&mut out, inputs, &common)?;
    out.set("merklized", Fr::from(common.merklized_root.is_some() as u64));
    out.set(v2_state_name(proof_type), common.issuer_state);

    if circuit.is_on_chain() {
        let gist_root = check_user_auth(
            inputs,
            &common.genesis_id,
            ["userClaimsTreeRoot", "userRevTreeRoot", "userRootsTreeRoot"],
            "userState",
        )?;
        out.set("challenge", inputs.get("challenge")?);
        out.set("gistRoot", gist_root);
        out.set(
            "circuitQueryHash",
            query_hash_v2(
                &common.schema,
                q.slot_index,
                q.operator.code(),
                &q.claim_path_key,
                q.path_not_exists,
                &q.values,
            )?,
        );
    } else {
        out.set("claimSchema", common.schema);
        out.set("claimPathNotExists", Fr::from(q.path_not_exists as u64));
        out.set("claimPathKey", q.claim_path_key);
        out.set("slotIndex", Fr::from(q.slot_index));
        out.set("operator", Fr::from(q.operator.code()));
        out.set_all("value", q.values);
    }
    Ok(out)
}

fn query_v3(inputs: &CircuitInputs, circuit: CircuitId) -> ProofResult<NamedSignals> {
    let code = u64_input(inputs, "proofType")?;
    let proof_type = ProofType::from_circuit_code(code)
        .ok_or_else(|| ProofError::InvalidRequest(format!("unknown proof type {}", code)))?;
    let common = common_query(inputs, proof_type)?;
    let q = single_query(inputs, &common, false)?;

    let verifier_id = inputs.get("verifierID")?;
    let session_id = inputs.get("nullifierSessionID")?;
    let nullifier = if session_id.is_zero() {
        Fr::zero()
    } else {
        poseidon_hash(&[
            common.genesis_id.to_fr(),
            inputs.get("claimSubjectProfileNonce")?,
            common.schema,
            verifier_id,
            session_id,
        ])?
    };
    let operator_output = if q.operator == Operator::Sd {
        q.field
    } else {
        Fr::zero()
    };

    let mut out = NamedSignals::new();
    set_common_outputs(&mut out, inputs, &common)?;
    out.set("issuerState", common.issuer_state);
    out.set("linkID", link_id(&common.claim, &inputs.get("linkNonce")?)?);
    out.set("nullifier", nullifier);
    out.set("operatorOutput", operator_output);
    out.set("proofType", Fr::from(code));

    if circuit.is_on_chain() {
        let bjj_auth = flag_input(inputs, "isBJJAuthEnabled")?;
        let gist_root = if bjj_auth {
            check_user_auth(
                inputs,
                &common.genesis_id,
                ["userClaimsTreeRoot", "userRevTreeRoot", "userRootsTreeRoot"],
                "userState",
            )?
        } else {
            inputs.get("gistRoot")?
        };
        out.set("challenge", inputs.get("challenge")?);
        out.set("gistRoot", gist_root);
        out.set("isBJJAuthEnabled", Fr::from(bjj_auth as u64));
        out.set(
            "circuitQueryHash",
            query_hash_v3(&QueryHashInput {
                schema: common.schema,
                slot_index: q.slot_index,
                operator: q.operator.code(),
                claim_path_key: q.claim_path_key,
                merklized: common.merklized_root.is_some(),
                values: &q.values[..q.value_array_size],
                value_array_size: q.value_array_size as u64,
                is_revocation_checked: common.is_revocation_checked,
                verifier_id,
                nullifier_session_id: session_id,
            })?,
        );
    } else {
        out.set("claimSchema", common.schema);
        out.set("claimPathKey", q.claim_path_key);
        out.set("slotIndex", Fr::from(q.slot_index));
        out.set("operator", Fr::from(q.operator.code()));
        out.set_all("value", q.values);
        out.set("valueArraySize", Fr::from(q.value_array_size as u64));
        out.set("verifierID", verifier_id);
        out.set("nullifierSessionID", session_id);
    }
    Ok(out)
}

fn linked_multi_query(inputs: &CircuitInputs) -> ProofResult<NamedSignals> {
    let claim = claim_input(inputs, "issuerClaim")?;
    let schema = inputs.get("claimSchema")?;
    constraint(schema == claim.schema_hash().to_fr(), "claim schema")?;
    let merklized_root = claim.merklized_root()?;

    let not_exists = inputs.get_all("claimPathNotExists")?;
    let mtps = inputs.get_nested("claimPathMtp")?;
    let no_aux = inputs.get_all("claimPathMtpNoAux")?;
    let aux_hi = inputs.get_all("claimPathMtpAuxHi")?;
    let aux_hv = inputs.get_all("claimPathMtpAuxHv")?;
    let keys = inputs.get_all("claimPathKey")?;
    let path_values = inputs.get_all("claimPathValue")?;
    let slots = inputs.get_all("slotIndex")?;
    let operators = inputs.get_all("operator")?;
    let values = inputs.get_nested("value")?;
    let sizes = inputs.get_all("valueArraySize")?;
    let n = LINKED_QUERY_COUNT;
    constraint(
        [
            not_exists.len(),
            mtps.len(),
            no_aux.len(),
            aux_hi.len(),
            aux_hv.len(),
            keys.len(),
            path_values.len(),
            slots.len(),
            operators.len(),
            values.len(),
            sizes.len(),
        ]
        .iter()
        .all(|len| *len == n),
        "every query array has one entry per query",
    )?;

    let mut outputs = Vec::with_capacity(n);
    let mut hashes = Vec::with_capacity(n);
    for i in 0..n {
        let operator = Operator::from_code(fr_to_u64(&operators[i])?)?;
        let slot_index = fr_to_u64(&slots[i])?;
        let path = PathWitness {
            siblings: mtps[i].clone(),
            aux: AuxSignals {
                key: aux_hi[i],
                value: aux_hv[i],
                no_aux: no_aux[i],
            },
            value: path_values[i],
        };
        let (field, exists) = field_value(
            &claim,
            merklized_root,
            &keys[i],
            slot_index,
            &path,
            Some(!not_exists[i].is_zero()),
        )?;
        let size = fr_to_u64(&sizes[i])? as usize;
        constraint(size <= values[i].len(), "value array size")?;
        let operands = &values[i][..size];
        constraint(predicate(operator, &field, exists, operands)?, "query predicate")?;

        outputs.push(if operator == Operator::Sd { field } else { Fr::zero() });
        hashes.push(query_hash_v3(&QueryHashInput {
            schema,
            slot_index,
            operator: operator.code(),
            claim_path_key: keys[i],
            merklized: merklized_root.is_some(),
            values: operands,
            value_array_size: size as u64,
            is_revocation_checked: false,
            verifier_id: Fr::zero(),
            nullifier_session_id: Fr::zero(),
        })?);
    }

    let mut out = NamedSignals::new();
    out.set("linkID", link_id(&claim, &inputs.get("linkNonce")?)?);
    out.set("merklized", Fr::from(merklized_root.is_some() as u64));
    out.set_all("operatorOutput", outputs);
    out.set_all("circuitQueryHash", hashes);
    Ok(out)
}

/// Public signals `circuit` outputs for `inputs`, or the first unsatisfied
/// constraint.
pub fn evaluate_circuit(inputs: &CircuitInputs) -> ProofResult<Vec<Fr>> {
    let circuit = inputs.circuit;
    let named = match circuit {
        CircuitId::AuthV2 => auth_v2(inputs)?,
        CircuitId::StateTransition => state_transition(inputs)?,
        CircuitId::AtomicQueryMtpV2
        | CircuitId::AtomicQuerySigV2
        | CircuitId::AtomicQueryMtpV2OnChain
        | CircuitId::AtomicQuerySigV2OnChain => query_v2(inputs, circuit)?,
        CircuitId::AtomicQueryV3 | CircuitId::AtomicQueryV3OnChain => query_v3(inputs, circuit)?,
        CircuitId::LinkedMultiQuery10 => linked_multi_query(inputs)?,
    };
    named.to_ordered(circuit)
}

// ---------------------------------------------------------------------------
// SimulatedProver
// ---------------------------------------------------------------------------

fn commitment(pub_signals: &[Fr]) -> ProofResult<String> {
    Ok(fr_to_decimal(&sponge_hash(pub_signals)?))
}

fn commitment_holds(proof: &ZkProof) -> ProofResult<bool> {
    Ok(proof.proof.pi_a.first() == Some(&commitment(&proof.pub_signals)?))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedProver;

impl SimulatedProver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prover for SimulatedProver {
    async fn generate(&self, inputs: &CircuitInputs) -> ProofResult<ZkProof> {
        let pub_signals = evaluate_circuit(inputs)?;
        tracing::debug!(circuit = %inputs.circuit, signals = pub_signals.len(), "simulated proof");
        Ok(ZkProof {
            proof: Groth16Proof {
                pi_a: vec![commitment(&pub_signals)?, "1".into(), "1".into()],
                pi_b: vec![
                    vec!["0".into(), "0".into()],
                    vec!["0".into(), "0".into()],
                    vec!["1".into(), "0".into()],
                ],
                pi_c: vec!["0".into(), "0".into(), "1".into()],
                protocol: "groth16".into(),
                curve: "bn128".into(),
            },
            pub_signals,
        })
    }

    async fn verify(
        &self,
        proof: &ZkProof,
        circuit: CircuitId,
        verification_key: &[u8],
    ) -> ProofResult<bool> {
        if verification_key != simulated_key(circuit).as_slice() {
            return Ok(false);
        }
        if proof.pub_signals.len() != signal_count(circuit) {
            return Ok(false);
        }
        commitment_holds(proof)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedKeys;

impl KeyLoader for SimulatedKeys {
    fn verification_key(&self, circuit: CircuitId) -> ProofResult<Vec<u8>> {
        Ok(simulated_key(circuit))
    }
}

// ---------------------------------------------------------------------------
// InMemoryStateOracle
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Ledger {
    states: HashMap<Id, Vec<StateInfo>>,
    latest: HashMap<Id, Fr>,
    gist_roots: Vec<GistRootInfo>,
    transactions: u64,
}

/// Ledger of identity states and GIST roots, with a settable clock and
/// injectable write failures.
pub struct InMemoryStateOracle {
    ledger: Mutex<Ledger>,
    clock: Mutex<Option<u64>>,
    failures: AtomicUsize,
}

impl Default for InMemoryStateOracle {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> ProofResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| ProofError::Oracle(format!("lock poisoned: {}", e)))
}

fn build_gist(latest: &HashMap<Id, Fr>) -> ProofResult<SparseMerkleTree> {
    let tree = SparseMerkleTree::in_memory(GIST_DEPTH)?;
    for (id, state) in latest {
        tree.add(&gist_key(id)?, state)?;
    }
    Ok(tree)
}

impl InMemoryStateOracle {
    pub fn new() -> Self {
        let ledger = Ledger {
            gist_roots: vec![GistRootInfo {
                root: Fr::zero(),
                replaced_by_root: Fr::zero(),
                created_at_timestamp: 0,
                replaced_at_timestamp: 0,
            }],
            ..Ledger::default()
        };
        Self {
            ledger: Mutex::new(ledger),
            clock: Mutex::new(None),
            failures: AtomicUsize::new(0),
        }
    }

    /// Pin the ledger clock to `seconds`.
    pub fn set_time(&self, seconds: u64) -> ProofResult<()> {
        *lock(&self.clock)? = Some(seconds);
        Ok(())
    }

    pub fn now(&self) -> ProofResult<u64> {
        Ok(lock(&self.clock)?.unwrap_or_else(|| Timestamp::now().seconds()))
    }

    /// Make the next `count` writes fail as if the ledger were unreachable.
    pub fn fail_next_writes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn latest_state(&self, id: &Id) -> ProofResult<Option<Fr>> {
        Ok(lock(&self.ledger)?.latest.get(id).copied())
    }

    pub fn state_history(&self, id: &Id) -> ProofResult<Vec<StateInfo>> {
        Ok(lock(&self.ledger)?.states.get(id).cloned().unwrap_or_default())
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn transition(
        &self,
        id: &Id,
        old_state: Fr,
        new_state: Fr,
        is_old_state_genesis: bool,
    ) -> ProofResult<String> {
        if self.take_failure() {
            return Err(ProofError::Oracle("ledger unavailable".into()));
        }
        if old_state == new_state {
            return Err(ProofError::Oracle("new state equals the old state".into()));
        }
        let now = self.now()?;
        let mut ledger = lock(&self.ledger)?;

        let history = ledger.states.entry(*id).or_default();
        match history.last_mut() {
            None => {
                // ethereum-controlled identities start from the zero state
                let genesis = id.is_genesis_state(&old_state)
                    || (id.eth_address().is_some() && old_state.is_zero());
                if !is_old_state_genesis || !genesis {
                    return Err(ProofError::Oracle(format!(
                        "first transition of {} must start at its genesis state",
                        id
                    )));
                }
                history.push(StateInfo {
                    id: id.to_fr(),
                    state: old_state,
                    replaced_by_state: new_state,
                    created_at_timestamp: 0,
                    replaced_at_timestamp: now,
                });
            }
            Some(latest) => {
                if is_old_state_genesis {
                    return Err(ProofError::Oracle(format!("{} already left genesis", id)));
                }
                if latest.state != old_state {
                    return Err(ProofError::Oracle(format!(
                        "old state {} is not the latest state of {}",
                        fr_to_decimal(&old_state),
                        id
                    )));
                }
                latest.replaced_by_state = new_state;
                latest.replaced_at_timestamp = now;
            }
        }
        history.push(StateInfo {
            id: id.to_fr(),
            state: new_state,
            replaced_by_state: Fr::zero(),
            created_at_timestamp: now,
            replaced_at_timestamp: 0,
        });
        ledger.latest.insert(*id, new_state);

        let root = build_gist(&ledger.latest)?.root()?;
        if let Some(previous) = ledger.gist_roots.last_mut() {
            previous.replaced_by_root = root;
            previous.replaced_at_timestamp = now;
        }
        ledger.gist_roots.push(GistRootInfo {
            root,
            replaced_by_root: Fr::zero(),
            created_at_timestamp: now,
            replaced_at_timestamp: 0,
        });
        ledger.transactions += 1;

        let mut preimage = id.as_bytes().to_vec();
        preimage.extend_from_slice(&fr_to_le_bytes(&new_state));
        preimage.extend_from_slice(&ledger.transactions.to_le_bytes());
        let tx = format!("0x{}", hex::encode(keccak256(&preimage)));
        tracing::info!(id = %id, tx = %tx, "state published");
        Ok(tx)
    }
}

#[async_trait]
impl StateOracle for InMemoryStateOracle {
    async fn get_state_info_by_id_and_state(
        &self,
        id: &Id,
        state: &Fr,
    ) -> ProofResult<Option<StateInfo>> {
        Ok(lock(&self.ledger)?
            .states
            .get(id)
            .and_then(|history| history.iter().find(|info| info.state == *state))
            .copied())
    }

    async fn get_gist_root_info(&self, root: &Fr, _id: &Id) -> ProofResult<Option<GistRootInfo>> {
        Ok(lock(&self.ledger)?
            .gist_roots
            .iter()
            .rev()
            .find(|info| info.root == *root)
            .copied())
    }

    async fn get_gist_proof(&self, id: &Id) -> ProofResult<GistProof> {
        let tree = build_gist(&lock(&self.ledger)?.latest)?;
        let (proof, _) = tree.generate_proof(&gist_key(id)?, None)?;
        Ok(GistProof {
            root: tree.root()?,
            proof,
        })
    }

    async fn publish_state(
        &self,
        proof: &ZkProof,
        _signer: &dyn LedgerSigner,
    ) -> ProofResult<String> {
        if !commitment_holds(proof)? {
            return Err(ProofError::InvalidProof);
        }
        let s = match PubSignals::parse(CircuitId::StateTransition, &proof.pub_signals)? {
            PubSignals::StateTransition(s) => s,
            _ => return Err(ProofError::InvalidProof),
        };
        self.transition(&s.user_id, s.old_user_state, s.new_user_state, s.is_old_state_genesis)
    }

    async fn publish_state_generic(
        &self,
        signer: &dyn LedgerSigner,
        info: &StateTransitionInfo,
    ) -> ProofResult<String> {
        if info.method_id != ETH_STATE_TRANSITION_METHOD_ID {
            return Err(ProofError::InvalidRequest(format!(
                "unknown transition method {}",
                info.method_id
            )));
        }
        let id = Id::from_fr(&info.user_id)?;
        match id.eth_address() {
            Some(address) if address == signer.address() => {}
            Some(_) => {
                return Err(ProofError::IdOwnershipFailed(
                    "signer does not control the identity".into(),
                ))
            }
            None => return Err(ProofError::NotEthereumIdentity),
        }
        self.transition(
            &id,
            info.old_user_state,
            info.new_user_state,
            info.is_old_state_genesis,
        )
    }
}
