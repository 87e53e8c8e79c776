//! The fixed-width core claim.
//!
//! Eight 32-byte little-endian slots, four index and four value:
//!
//! ```text
//! index[0]  schema hash (0..16) | flags (16) | version u32 (20..24)
//! index[1]  subject id when the subject sits in the index
//! index[2]  data slot A, or the merklized root
//! index[3]  data slot B
//! value[0]  revocation nonce u64 (0..8) | expiration i64 (8..16)
//! value[1]  subject id when the subject sits in the value
//! value[2]  data slot A, or the merklized root
//! value[3]  data slot B
//! ```
//!
//! Flags: bits 0-2 subject (`000` self, `010` index, `011` value), bit 3
//! expiration, bit 4 updatable, bits 5-7 merklized root (`001` index,
//! `010` value).

use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::field::{fr_from_le_bytes, fr_to_le_bytes};
use tessera_core::{poseidon_hash, Fr, Id, SchemaHash};

use crate::error::{ClaimError, ClaimResult};

const FLAGS_BYTE: usize = 16;
const SUBJECT_MASK: u8 = 0b0000_0111;
const SUBJECT_SELF: u8 = 0b000;
const SUBJECT_INDEX: u8 = 0b010;
const SUBJECT_VALUE: u8 = 0b011;
const EXPIRATION_BIT: u8 = 1 << 3;
const UPDATABLE_BIT: u8 = 1 << 4;
const MERKLIZED_SHIFT: u8 = 5;
const MERKLIZED_MASK: u8 = 0b1110_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubjectPosition {
    /// The claim is about its issuer.
    #[default]
    None,
    Index,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MerklizedRootPosition {
    #[default]
    None,
    Index,
    Value,
}

fn slot_bytes(slot: &Fr) -> [u8; 32] {
    fr_to_le_bytes(slot)
}

fn slot_from_bytes(bytes: &[u8; 32]) -> ClaimResult<Fr> {
    fr_from_le_bytes(bytes).map_err(|e| ClaimError::InvalidSlot(e.to_string()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CoreClaim {
    index: [Fr; 4],
    value: [Fr; 4],
}

impl CoreClaim {
    pub fn new(schema: SchemaHash) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&schema.0);
        Self {
            // 16 bytes always fit
            index: [
                fr_from_le_bytes(&bytes).unwrap_or_default(),
                Fr::zero(),
                Fr::zero(),
                Fr::zero(),
            ],
            value: [Fr::zero(); 4],
        }
    }

    pub fn index_slots(&self) -> &[Fr; 4] {
        &self.index
    }

    pub fn value_slots(&self) -> &[Fr; 4] {
        &self.value
    }

    /// All eight slots, index first, the order circuits take them in.
    pub fn slots(&self) -> [Fr; 8] {
        let mut out = [Fr::zero(); 8];
        out[..4].copy_from_slice(&self.index);
        out[4..].copy_from_slice(&self.value);
        out
    }

    fn update_index0(&mut self, f: impl FnOnce(&mut [u8; 32])) -> ClaimResult<()> {
        let mut bytes = slot_bytes(&self.index[0]);
        f(&mut bytes);
        self.index[0] = slot_from_bytes(&bytes)?;
        Ok(())
    }

    fn update_value0(&mut self, f: impl FnOnce(&mut [u8; 32])) -> ClaimResult<()> {
        let mut bytes = slot_bytes(&self.value[0]);
        f(&mut bytes);
        self.value[0] = slot_from_bytes(&bytes)?;
        Ok(())
    }

    fn flags(&self) -> u8 {
        slot_bytes(&self.index[0])[FLAGS_BYTE]
    }

    pub fn schema_hash(&self) -> SchemaHash {
        let bytes = slot_bytes(&self.index[0]);
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes[..16]);
        SchemaHash(out)
    }

    // -- subject ------------------------------------------------------------

    pub fn set_subject_id(&mut self, id: &Id, position: SubjectPosition) -> ClaimResult<()> {
        let (bits, index_slot, value_slot) = match position {
            SubjectPosition::None => {
                return Err(ClaimError::InvalidConfiguration(
                    "subject id needs an index or value position".into(),
                ))
            }
            SubjectPosition::Index => (SUBJECT_INDEX, id.to_fr(), Fr::zero()),
            SubjectPosition::Value => (SUBJECT_VALUE, Fr::zero(), id.to_fr()),
        };
        self.update_index0(|b| b[FLAGS_BYTE] = (b[FLAGS_BYTE] & !SUBJECT_MASK) | bits)?;
        self.index[1] = index_slot;
        self.value[1] = value_slot;
        Ok(())
    }

    pub fn subject_position(&self) -> ClaimResult<SubjectPosition> {
        match self.flags() & SUBJECT_MASK {
            SUBJECT_SELF => Ok(SubjectPosition::None),
            SUBJECT_INDEX => Ok(SubjectPosition::Index),
            SUBJECT_VALUE => Ok(SubjectPosition::Value),
            other => Err(ClaimError::InvalidSlot(format!("subject flag {:03b}", other))),
        }
    }

    pub fn subject_id(&self) -> ClaimResult<Option<Id>> {
        match self.subject_position()? {
            SubjectPosition::None => Ok(None),
            SubjectPosition::Index => Ok(Some(Id::from_fr(&self.index[1])?)),
            SubjectPosition::Value => Ok(Some(Id::from_fr(&self.value[1])?)),
        }
    }

    // -- revocation / expiration / version / updatable ----------------------

    pub fn set_revocation_nonce(&mut self, nonce: u64) -> ClaimResult<()> {
        self.update_value0(|b| b[..8].copy_from_slice(&nonce.to_le_bytes()))
    }

    pub fn revocation_nonce(&self) -> u64 {
        let bytes = slot_bytes(&self.value[0]);
        let mut n = [0u8; 8];
        n.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(n)
    }

    /// Set or clear the expiration (unix seconds).
    pub fn set_expiration(&mut self, expiration: Option<i64>) -> ClaimResult<()> {
        let seconds = expiration.unwrap_or(0);
        self.update_value0(|b| b[8..16].copy_from_slice(&seconds.to_le_bytes()))?;
        self.update_index0(|b| {
            if expiration.is_some() {
                b[FLAGS_BYTE] |= EXPIRATION_BIT;
            } else {
                b[FLAGS_BYTE] &= !EXPIRATION_BIT;
            }
        })
    }

    pub fn expiration(&self) -> Option<i64> {
        if self.flags() & EXPIRATION_BIT == 0 {
            return None;
        }
        let bytes = slot_bytes(&self.value[0]);
        let mut e = [0u8; 8];
        e.copy_from_slice(&bytes[8..16]);
        Some(i64::from_le_bytes(e))
    }

    pub fn set_version(&mut self, version: u32) -> ClaimResult<()> {
        self.update_index0(|b| b[20..24].copy_from_slice(&version.to_le_bytes()))
    }

    pub fn version(&self) -> u32 {
        let bytes = slot_bytes(&self.index[0]);
        let mut v = [0u8; 4];
        v.copy_from_slice(&bytes[20..24]);
        u32::from_le_bytes(v)
    }

    pub fn set_updatable(&mut self, updatable: bool) -> ClaimResult<()> {
        self.update_index0(|b| {
            if updatable {
                b[FLAGS_BYTE] |= UPDATABLE_BIT;
            } else {
                b[FLAGS_BYTE] &= !UPDATABLE_BIT;
            }
        })
    }

    pub fn updatable(&self) -> bool {
        self.flags() & UPDATABLE_BIT != 0
    }

    // -- data slots ---------------------------------------------------------

    pub fn set_index_data(&mut self, slot_a: Fr, slot_b: Fr) {
        self.index[2] = slot_a;
        self.index[3] = slot_b;
    }

    pub fn set_value_data(&mut self, slot_a: Fr, slot_b: Fr) {
        self.value[2] = slot_a;
        self.value[3] = slot_b;
    }

    pub fn set_merklized_root(
        &mut self,
        root: Fr,
        position: MerklizedRootPosition,
    ) -> ClaimResult<()> {
        let bits = match position {
            MerklizedRootPosition::None => {
                return Err(ClaimError::InvalidConfiguration(
                    "merklized root needs an index or value position".into(),
                ))
            }
            MerklizedRootPosition::Index => {
                self.index[2] = root;
                1u8
            }
            MerklizedRootPosition::Value => {
                self.value[2] = root;
                2u8
            }
        };
        self.update_index0(|b| {
            b[FLAGS_BYTE] = (b[FLAGS_BYTE] & !MERKLIZED_MASK) | (bits << MERKLIZED_SHIFT)
        })
    }

    pub fn merklized_position(&self) -> ClaimResult<MerklizedRootPosition> {
        match (self.flags() & MERKLIZED_MASK) >> MERKLIZED_SHIFT {
            0 => Ok(MerklizedRootPosition::None),
            1 => Ok(MerklizedRootPosition::Index),
            2 => Ok(MerklizedRootPosition::Value),
            other => Err(ClaimError::InvalidSlot(format!("merklized flag {:03b}", other))),
        }
    }

    pub fn merklized_root(&self) -> ClaimResult<Option<Fr>> {
        Ok(match self.merklized_position()? {
            MerklizedRootPosition::None => None,
            MerklizedRootPosition::Index => Some(self.index[2]),
            MerklizedRootPosition::Value => Some(self.value[2]),
        })
    }

    // -- hashing / encoding -------------------------------------------------

    /// `(hi, hv)`: the key and value this claim occupies in a claims tree.
    pub fn hi_hv(&self) -> ClaimResult<(Fr, Fr)> {
        Ok((poseidon_hash(&self.index)?, poseidon_hash(&self.value)?))
    }

    /// `Poseidon(hi, hv)`, the message issuers sign.
    pub fn hash(&self) -> ClaimResult<Fr> {
        let (hi, hv) = self.hi_hv()?;
        Ok(poseidon_hash(&[hi, hv])?)
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(256);
        for slot in self.index.iter().chain(self.value.iter()) {
            bytes.extend_from_slice(&slot_bytes(slot));
        }
        hex::encode(bytes)
    }

    pub fn from_hex(text: &str) -> ClaimResult<Self> {
        let bytes = hex::decode(text).map_err(|e| ClaimError::InvalidSlot(e.to_string()))?;
        if bytes.len() != 256 {
            return Err(ClaimError::InvalidSlot(format!(
                "core claim must be 256 bytes, got {}",
                bytes.len()
            )));
        }
        let mut slots = [Fr::zero(); 8];
        for (i, chunk) in bytes.chunks(32).enumerate() {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(chunk);
            slots[i] = slot_from_bytes(&arr)?;
        }
        Self::from_slots(&slots)
    }

    /// Rebuild a claim from its eight slots, index first.
    pub fn from_slots(slots: &[Fr]) -> ClaimResult<Self> {
        if slots.len() != 8 {
            return Err(ClaimError::InvalidSlot(format!(
                "core claim has 8 slots, got {}",
                slots.len()
            )));
        }
        let mut index = [Fr::zero(); 4];
        let mut value = [Fr::zero(); 4];
        index.copy_from_slice(&slots[..4]);
        value.copy_from_slice(&slots[4..]);
        Ok(Self { index, value })
    }
}

impl fmt::Debug for CoreClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreClaim({})", self.to_hex())
    }
}

impl Serialize for CoreClaim {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CoreClaim {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CoreClaim::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Blockchain, Did, DidMethod, DidType, Network};

    fn schema() -> SchemaHash {
        SchemaHash::from_type_iri("urn:test#KYCAgeCredential")
    }

    fn subject() -> Id {
        let t = DidType::new(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy).unwrap();
        Did::genesis_from_state(t, &Fr::from(99u64)).unwrap().id
    }

    #[test]
    fn test_schema_hash_in_first_bytes() {
        let claim = CoreClaim::new(schema());
        assert_eq!(claim.schema_hash(), schema());
        assert_eq!(&claim.to_hex()[..32], schema().to_hex());
    }

    #[test]
    fn test_flags_layout() {
        let mut claim = CoreClaim::new(schema());
        claim.set_subject_id(&subject(), SubjectPosition::Value).unwrap();
        claim.set_expiration(Some(1_900_000_000)).unwrap();
        claim.set_updatable(true).unwrap();
        claim
            .set_merklized_root(Fr::from(5u64), MerklizedRootPosition::Index)
            .unwrap();
        let bytes = slot_bytes(&claim.index_slots()[0]);
        assert_eq!(bytes[FLAGS_BYTE], 0b0011_1011);
    }

    #[test]
    fn test_subject_positions() {
        let id = subject();
        let mut claim = CoreClaim::new(schema());
        assert_eq!(claim.subject_id().unwrap(), None);

        claim.set_subject_id(&id, SubjectPosition::Index).unwrap();
        assert_eq!(claim.subject_position().unwrap(), SubjectPosition::Index);
        assert_eq!(claim.index_slots()[1], id.to_fr());
        assert_eq!(claim.subject_id().unwrap(), Some(id));

        claim.set_subject_id(&id, SubjectPosition::Value).unwrap();
        assert_eq!(claim.index_slots()[1], Fr::zero());
        assert_eq!(claim.value_slots()[1], id.to_fr());
        assert!(claim.set_subject_id(&id, SubjectPosition::None).is_err());
    }

    #[test]
    fn test_nonce_and_expiration_share_value_zero() {
        let mut claim = CoreClaim::new(schema());
        claim.set_revocation_nonce(42).unwrap();
        claim.set_expiration(Some(-5)).unwrap();
        assert_eq!(claim.revocation_nonce(), 42);
        assert_eq!(claim.expiration(), Some(-5));
        claim.set_expiration(None).unwrap();
        assert_eq!(claim.expiration(), None);
        assert_eq!(claim.revocation_nonce(), 42);
        let bytes = slot_bytes(&claim.value_slots()[0]);
        assert_eq!(bytes[0], 42);
    }

    #[test]
    fn test_version() {
        let mut claim = CoreClaim::new(schema());
        claim.set_version(0x0102_0304).unwrap();
        assert_eq!(claim.version(), 0x0102_0304);
        assert_eq!(claim.schema_hash(), schema());
        let bytes = slot_bytes(&claim.index_slots()[0]);
        assert_eq!(&bytes[20..24], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_merklized_root_position() {
        let mut claim = CoreClaim::new(schema());
        assert_eq!(claim.merklized_root().unwrap(), None);
        claim
            .set_merklized_root(Fr::from(77u64), MerklizedRootPosition::Value)
            .unwrap();
        assert_eq!(claim.merklized_position().unwrap(), MerklizedRootPosition::Value);
        assert_eq!(claim.merklized_root().unwrap(), Some(Fr::from(77u64)));
        assert_eq!(claim.value_slots()[2], Fr::from(77u64));
    }

    #[test]
    fn test_hash_is_poseidon_of_hi_hv() {
        let mut claim = CoreClaim::new(schema());
        claim.set_index_data(Fr::from(1u64), Fr::from(2u64));
        let (hi, hv) = claim.hi_hv().unwrap();
        assert_eq!(hi, poseidon_hash(claim.index_slots()).unwrap());
        assert_eq!(hv, poseidon_hash(claim.value_slots()).unwrap());
        assert_eq!(claim.hash().unwrap(), poseidon_hash(&[hi, hv]).unwrap());
    }

    #[test]
    fn test_hex_roundtrip_and_serde() {
        let mut claim = CoreClaim::new(schema());
        claim.set_subject_id(&subject(), SubjectPosition::Index).unwrap();
        claim.set_value_data(Fr::from(10u64), Fr::from(20u64));
        claim.set_revocation_nonce(7).unwrap();
        let hex = claim.to_hex();
        assert_eq!(hex.len(), 512);
        assert_eq!(CoreClaim::from_hex(&hex).unwrap(), claim);
        let json = serde_json::to_string(&claim).unwrap();
        assert_eq!(json, format!("\"{}\"", hex));
    }

    #[test]
    fn test_from_hex_rejects_non_canonical_slot() {
        let mut bytes = vec![0u8; 256];
        for b in bytes[32..64].iter_mut() {
            *b = 0xff;
        }
        assert!(matches!(
            CoreClaim::from_hex(&hex::encode(bytes)),
            Err(ClaimError::InvalidSlot(_))
        ));
        assert!(CoreClaim::from_hex("00").is_err());
    }
}
