use ark_ff::Zero;
use tessera_core::{BjjPoint, BjjPublicKey, Fr, SchemaHash};

use crate::claim::{CoreClaim, MerklizedRootPosition, SubjectPosition};
use crate::context::{resolve_type, ContextLoader, TypeDefinition};
use crate::credential::{BjjSignatureProof, W3CCredential};
use crate::error::{ClaimError, ClaimResult};
use crate::merklize::{hash_value, Merklizer};

/// Schema hash of the BabyJubJub auth claim.
pub const AUTH_BJJ_SCHEMA_HASH: &str = "ca938857241db9451ea329256b9c06e5";

/// Knobs for turning a credential into a core claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreClaimOptions {
    /// Where a subject id goes; `None` means the index.
    pub subject_position: Option<SubjectPosition>,
    /// Where a merklized root goes; `None` lets the schema decide
    /// (index for merklized schemas, nowhere for slot schemas).
    pub merklized_root_position: Option<MerklizedRootPosition>,
    pub version: u32,
    pub updatable: bool,
}

impl CoreClaimOptions {
    /// The options a claim was built with, read back from its flags.
    pub fn from_claim(claim: &CoreClaim) -> ClaimResult<Self> {
        let subject_position = match claim.subject_position()? {
            SubjectPosition::None => None,
            p => Some(p),
        };
        Ok(Self {
            subject_position,
            merklized_root_position: Some(claim.merklized_position()?),
            version: claim.version(),
            updatable: claim.updatable(),
        })
    }
}

/// Resolve the credential's type through its contexts and build its core claim.
pub fn to_core_claim(
    credential: &W3CCredential,
    loader: &dyn ContextLoader,
    opts: &CoreClaimOptions,
) -> ClaimResult<CoreClaim> {
    let def = resolve_type(loader, &credential.context, credential.credential_type()?)?;
    core_claim_for_type(credential, &def, opts)
}

pub fn core_claim_for_type(
    credential: &W3CCredential,
    def: &TypeDefinition,
    opts: &CoreClaimOptions,
) -> ClaimResult<CoreClaim> {
    let mut claim = CoreClaim::new(SchemaHash::from_type_iri(&def.iri));
    claim.set_version(opts.version)?;
    claim.set_updatable(opts.updatable)?;
    claim.set_revocation_nonce(credential.revocation_nonce())?;
    claim.set_expiration(credential.expiration_date.map(|d| d.timestamp()))?;

    if let Some(subject) = credential.subject_did()? {
        claim.set_subject_id(
            &subject.id,
            opts.subject_position.unwrap_or(SubjectPosition::Index),
        )?;
    }

    match &def.serialization {
        Some(spec) => {
            if matches!(
                opts.merklized_root_position,
                Some(MerklizedRootPosition::Index | MerklizedRootPosition::Value)
            ) {
                return Err(ClaimError::InvalidConfiguration(format!(
                    "{} is not merklized but a merklized root position was requested",
                    def.name
                )));
            }
            let slot = |name: &Option<String>| -> ClaimResult<Fr> {
                let Some(name) = name else {
                    return Ok(Fr::zero());
                };
                let fd = def.fields.get(name).ok_or_else(|| {
                    ClaimError::InvalidContext(format!(
                        "serialization names '{}' which {} does not define",
                        name, def.name
                    ))
                })?;
                match credential.credential_subject.get(name) {
                    None | Some(serde_json::Value::Null) => Ok(Fr::zero()),
                    Some(v) => hash_value(fd.datatype, v),
                }
            };
            claim.set_index_data(slot(&spec.index_a)?, slot(&spec.index_b)?);
            claim.set_value_data(slot(&spec.value_a)?, slot(&spec.value_b)?);
        }
        None => {
            let position = opts
                .merklized_root_position
                .unwrap_or(MerklizedRootPosition::Index);
            if position == MerklizedRootPosition::None {
                return Err(ClaimError::InvalidConfiguration(format!(
                    "{} is merklized and needs a merklized root position",
                    def.name
                )));
            }
            let root = Merklizer::merklize(credential, def)?.root()?;
            claim.set_merklized_root(root, position)?;
        }
    }
    Ok(claim)
}

/// Recompute the core claim of `credential` with the options encoded in
/// `claim` and require byte equality.
pub fn verify_core_claim_match(
    claim: &CoreClaim,
    credential: &W3CCredential,
    loader: &dyn ContextLoader,
) -> ClaimResult<()> {
    let opts = CoreClaimOptions::from_claim(claim)?;
    let recomputed = match to_core_claim(credential, loader, &opts) {
        Ok(c) => c,
        Err(ClaimError::InvalidConfiguration(reason)) => {
            tracing::warn!(credential = %credential.id, %reason, "claim flags do not fit credential schema");
            return Err(ClaimError::ProofClaimMismatch);
        }
        Err(e) => return Err(e),
    };
    if recomputed.to_hex() != claim.to_hex() {
        tracing::warn!(credential = %credential.id, "core claim mismatch");
        return Err(ClaimError::ProofClaimMismatch);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Auth claims
// ---------------------------------------------------------------------------

pub fn auth_schema_hash() -> ClaimResult<SchemaHash> {
    Ok(SchemaHash::from_hex(AUTH_BJJ_SCHEMA_HASH)?)
}

/// Auth claim committing a BabyJubJub public key: `x` and `y` in the index data slots.
pub fn auth_claim(public_key: &BjjPublicKey, revocation_nonce: u64) -> ClaimResult<CoreClaim> {
    let mut claim = CoreClaim::new(auth_schema_hash()?);
    claim.set_index_data(public_key.x, public_key.y);
    claim.set_revocation_nonce(revocation_nonce)?;
    Ok(claim)
}

/// The public key an auth claim commits to.
pub fn auth_public_key(claim: &CoreClaim) -> ClaimResult<BjjPublicKey> {
    if claim.schema_hash() != auth_schema_hash()? {
        return Err(ClaimError::InvalidCredential("not an auth claim".into()));
    }
    let point = BjjPoint {
        x: claim.index_slots()[2],
        y: claim.index_slots()[3],
    };
    if !point.is_on_curve() {
        return Err(ClaimError::InvalidCredential("auth key not on curve".into()));
    }
    Ok(point)
}

/// Check the issuer signature of a `BJJSignature2021` proof over its core claim.
pub fn verify_signature_proof(proof: &BjjSignatureProof) -> ClaimResult<bool> {
    let claim = CoreClaim::from_hex(&proof.core_claim)?;
    let public_key = auth_public_key(&proof.auth_core_claim()?)?;
    Ok(public_key.verify_poseidon(&claim.hash()?, &proof.signature()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::*;
    use crate::context::InMemoryContextLoader;
    use crate::credential::{CredentialProof, IssuerData, IssuerState};
    use serde_json::json;
    use tessera_core::{
        Blockchain, BjjPrivateKey, Did, DidMethod, DidType, Network, ProofType,
    };
    use tessera_merkle::TreeState;

    const EMPLOYEE_CONTEXT_URL: &str = "https://example.com/employee.jsonld";

    fn loader() -> InMemoryContextLoader {
        let l = InMemoryContextLoader::new();
        l.insert(KYC_CONTEXT_URL, kyc_context());
        l.insert(EMPLOYEE_CONTEXT_URL, employee_context());
        l
    }

    fn did(seed: u64) -> Did {
        let t = DidType::new(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy).unwrap();
        Did::genesis_from_state(t, &Fr::from(seed)).unwrap()
    }

    fn kyc_credential(birthday: u64) -> W3CCredential {
        serde_json::from_value(json!({
            "id": "urn:uuid:00000000-0000-4000-8000-000000000010",
            "@context": ["https://www.w3.org/2018/credentials/v1", KYC_CONTEXT_URL],
            "type": ["VerifiableCredential", "KYCAgeCredential"],
            "credentialSubject": {
                "id": did(2).to_string(),
                "type": "KYCAgeCredential",
                "birthday": birthday,
                "documentType": 2
            },
            "credentialStatus": {
                "id": "https://issuer.example/status/42",
                "type": "SparseMerkleTreeProof",
                "revocationNonce": 42
            },
            "issuer": did(1).to_string(),
            "credentialSchema": {"id": "https://example.com/kyc.json", "type": "JsonSchema2023"}
        }))
        .unwrap()
    }

    fn employee_credential() -> W3CCredential {
        serde_json::from_value(json!({
            "id": "urn:uuid:00000000-0000-4000-8000-000000000011",
            "@context": ["https://www.w3.org/2018/credentials/v1", EMPLOYEE_CONTEXT_URL],
            "type": ["VerifiableCredential", "EmployeeCredential"],
            "credentialSubject": {
                "id": did(2).to_string(),
                "type": "EmployeeCredential",
                "val": 10
            },
            "credentialStatus": {
                "id": "https://issuer.example/status/7",
                "type": "SparseMerkleTreeProof",
                "revocationNonce": 7
            },
            "issuer": did(1).to_string(),
            "credentialSchema": {"id": "https://example.com/employee.json", "type": "JsonSchema2023"}
        }))
        .unwrap()
    }

    #[test]
    fn test_slot_schema_fills_index_slots() {
        let cred = kyc_credential(19960424);
        let claim = to_core_claim(&cred, &loader(), &CoreClaimOptions::default()).unwrap();
        assert_eq!(claim.schema_hash(), SchemaHash::from_type_iri(KYC_TYPE_IRI));
        assert_eq!(claim.index_slots()[2], Fr::from(19960424u64));
        assert_eq!(claim.index_slots()[3], Fr::from(2u64));
        assert_eq!(claim.revocation_nonce(), 42);
        assert_eq!(claim.subject_id().unwrap(), Some(did(2).id));
        assert_eq!(claim.merklized_root().unwrap(), None);
    }

    #[test]
    fn test_slot_schema_rejects_merklized_position() {
        let opts = CoreClaimOptions {
            merklized_root_position: Some(MerklizedRootPosition::Index),
            ..Default::default()
        };
        assert!(matches!(
            to_core_claim(&kyc_credential(1), &loader(), &opts),
            Err(ClaimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_merklized_schema_rejects_none_position() {
        let opts = CoreClaimOptions {
            merklized_root_position: Some(MerklizedRootPosition::None),
            ..Default::default()
        };
        assert!(matches!(
            to_core_claim(&employee_credential(), &loader(), &opts),
            Err(ClaimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_merklized_root_in_index_by_default() {
        let cred = employee_credential();
        let claim = to_core_claim(&cred, &loader(), &CoreClaimOptions::default()).unwrap();
        assert_eq!(claim.merklized_position().unwrap(), MerklizedRootPosition::Index);
        let def = resolve_type(&loader(), &cred.context, "EmployeeCredential").unwrap();
        let root = Merklizer::merklize(&cred, &def).unwrap().root().unwrap();
        assert_eq!(claim.merklized_root().unwrap(), Some(root));
    }

    #[test]
    fn test_subject_in_value() {
        let opts = CoreClaimOptions {
            subject_position: Some(SubjectPosition::Value),
            ..Default::default()
        };
        let claim = to_core_claim(&kyc_credential(1), &loader(), &opts).unwrap();
        assert_eq!(claim.subject_position().unwrap(), SubjectPosition::Value);
        assert_eq!(claim.value_slots()[1], did(2).id.to_fr());
    }

    #[test]
    fn test_verify_match_and_tamper() {
        let cred = kyc_credential(19960424);
        let claim = to_core_claim(&cred, &loader(), &CoreClaimOptions::default()).unwrap();
        verify_core_claim_match(&claim, &cred, &loader()).unwrap();

        let tampered = kyc_credential(19960425);
        assert_eq!(
            verify_core_claim_match(&claim, &tampered, &loader()),
            Err(ClaimError::ProofClaimMismatch)
        );
    }

    #[test]
    fn test_verify_match_merklized_tamper() {
        let cred = employee_credential();
        let claim = to_core_claim(&cred, &loader(), &CoreClaimOptions::default()).unwrap();
        verify_core_claim_match(&claim, &cred, &loader()).unwrap();

        let mut tampered = cred.clone();
        tampered.credential_subject.insert("val".into(), json!(11));
        assert_eq!(
            verify_core_claim_match(&claim, &tampered, &loader()),
            Err(ClaimError::ProofClaimMismatch)
        );
    }

    #[test]
    fn test_auth_claim_roundtrip() {
        let key = BjjPrivateKey::from_seed(b"auth");
        let claim = auth_claim(&key.public_key(), 0).unwrap();
        assert_eq!(claim.schema_hash().to_hex(), AUTH_BJJ_SCHEMA_HASH);
        assert_eq!(auth_public_key(&claim).unwrap(), key.public_key());
        let other = CoreClaim::new(SchemaHash::from_type_iri("urn:x#Y"));
        assert!(auth_public_key(&other).is_err());
    }

    #[test]
    fn test_signature_proof_verifies() {
        let key = BjjPrivateKey::from_seed(b"issuer");
        let auth = auth_claim(&key.public_key(), 0).unwrap();
        let cred = kyc_credential(1);
        let claim = to_core_claim(&cred, &loader(), &CoreClaimOptions::default()).unwrap();
        let sig = key.sign_poseidon(&claim.hash().unwrap()).unwrap();
        let ts = TreeState::new(Fr::from(1u64), Fr::zero(), Fr::zero()).unwrap();
        let proof = BjjSignatureProof {
            issuer_data: IssuerData {
                id: did(1),
                state: IssuerState::from_tree_state(&ts),
                auth_core_claim: Some(auth.to_hex()),
                mtp: None,
                credential_status: None,
            },
            core_claim: claim.to_hex(),
            signature: sig.to_hex(),
        };
        assert!(verify_signature_proof(&proof).unwrap());

        let mut wrapped = cred.clone();
        wrapped.proof.push(CredentialProof::BjjSignature(proof.clone()));
        let json = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(json["proof"][0]["type"], "BJJSignature2021");
        let back: W3CCredential = serde_json::from_value(json).unwrap();
        assert_eq!(back.core_claim_from_proof(ProofType::BjjSignature).unwrap(), claim);

        let mut forged = proof;
        forged.core_claim = to_core_claim(&kyc_credential(2), &loader(), &CoreClaimOptions::default())
            .unwrap()
            .to_hex();
        assert!(!verify_signature_proof(&forged).unwrap());
    }
}
