//! Identifiers and DIDs.
//!
//! An [`Id`] is 31 bytes: `type(2) || genesis(27) || checksum(2)`. The two
//! type bytes carry the DID method and the blockchain/network flag; the
//! checksum is the little-endian `u16` byte sum of the first 29 bytes. The DID
//! string is `did:<method>:<blockchain>:<network>:<base58(id)>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::poseidon_hash;
use crate::error::{CoreError, CoreResult};
use crate::field::{fr_from_le_bytes, fr_to_le_bytes, Fr};

pub const ID_LENGTH: usize = 31;
pub const GENESIS_LENGTH: usize = 27;

// ---------------------------------------------------------------------------
// DID method / blockchain / network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DidMethod {
    Iden3,
    PolygonId,
}

impl DidMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidMethod::Iden3 => "iden3",
            DidMethod::PolygonId => "polygonid",
        }
    }

    pub fn byte(&self) -> u8 {
        match self {
            DidMethod::Iden3 => 0x01,
            DidMethod::PolygonId => 0x02,
        }
    }

    fn from_byte(b: u8) -> CoreResult<Self> {
        match b {
            0x01 => Ok(DidMethod::Iden3),
            0x02 => Ok(DidMethod::PolygonId),
            other => Err(CoreError::UnsupportedDidType(format!("method byte {:#04x}", other))),
        }
    }

    fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "iden3" => Ok(DidMethod::Iden3),
            "polygonid" => Ok(DidMethod::PolygonId),
            other => Err(CoreError::UnsupportedDidType(format!("method '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blockchain {
    ReadOnly,
    Polygon,
    Ethereum,
}

impl Blockchain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::ReadOnly => "readonly",
            Blockchain::Polygon => "polygon",
            Blockchain::Ethereum => "eth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    None,
    Main,
    Mumbai,
    Amoy,
    Goerli,
    Sepolia,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::None => "",
            Network::Main => "main",
            Network::Mumbai => "mumbai",
            Network::Amoy => "amoy",
            Network::Goerli => "goerli",
            Network::Sepolia => "sepolia",
        }
    }
}

/// Supported `(blockchain, network)` pairs and their flag byte.
const NETWORK_FLAGS: &[(Blockchain, Network, u8)] = &[
    (Blockchain::ReadOnly, Network::None, 0x00),
    (Blockchain::Polygon, Network::Main, 0x11),
    (Blockchain::Polygon, Network::Mumbai, 0x12),
    (Blockchain::Polygon, Network::Amoy, 0x13),
    (Blockchain::Ethereum, Network::Main, 0x21),
    (Blockchain::Ethereum, Network::Goerli, 0x22),
    (Blockchain::Ethereum, Network::Sepolia, 0x23),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DidType {
    pub method: DidMethod,
    pub blockchain: Blockchain,
    pub network: Network,
}

impl DidType {
    pub fn new(method: DidMethod, blockchain: Blockchain, network: Network) -> CoreResult<Self> {
        let t = Self {
            method,
            blockchain,
            network,
        };
        t.network_flag()?;
        Ok(t)
    }

    pub fn read_only(method: DidMethod) -> Self {
        Self {
            method,
            blockchain: Blockchain::ReadOnly,
            network: Network::None,
        }
    }

    fn network_flag(&self) -> CoreResult<u8> {
        NETWORK_FLAGS
            .iter()
            .find(|(b, n, _)| *b == self.blockchain && *n == self.network)
            .map(|(_, _, flag)| *flag)
            .ok_or_else(|| {
                CoreError::UnsupportedDidType(format!(
                    "{}:{}",
                    self.blockchain.as_str(),
                    self.network.as_str()
                ))
            })
    }

    pub fn to_bytes(&self) -> CoreResult<[u8; 2]> {
        Ok([self.method.byte(), self.network_flag()?])
    }

    pub fn from_bytes(bytes: [u8; 2]) -> CoreResult<Self> {
        let method = DidMethod::from_byte(bytes[0])?;
        let (blockchain, network, _) = NETWORK_FLAGS
            .iter()
            .find(|(_, _, flag)| *flag == bytes[1])
            .ok_or_else(|| {
                CoreError::UnsupportedDidType(format!("network byte {:#04x}", bytes[1]))
            })?;
        Ok(Self {
            method,
            blockchain: *blockchain,
            network: *network,
        })
    }

    /// Identities on Ethereum-style chains may be controlled by an account
    /// instead of a BabyJubJub auth claim.
    pub fn is_ethereum(&self) -> bool {
        self.blockchain == Blockchain::Ethereum
    }
}

// ---------------------------------------------------------------------------
// Id
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; ID_LENGTH]);

fn checksum(type_and_genesis: &[u8]) -> [u8; 2] {
    let sum = type_and_genesis
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
    sum.to_le_bytes()
}

impl Id {
    pub fn new(id_type: [u8; 2], genesis: &[u8; GENESIS_LENGTH]) -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[..2].copy_from_slice(&id_type);
        bytes[2..29].copy_from_slice(genesis);
        let cs = checksum(&bytes[..29]);
        bytes[29..].copy_from_slice(&cs);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let arr: [u8; ID_LENGTH] = bytes.try_into().map_err(|_| {
            CoreError::InvalidId(format!("expected {} bytes, got {}", ID_LENGTH, bytes.len()))
        })?;
        if checksum(&arr[..29]) != arr[29..] {
            return Err(CoreError::InvalidId("checksum mismatch".into()));
        }
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn id_type(&self) -> [u8; 2] {
        [self.0[0], self.0[1]]
    }

    pub fn did_type(&self) -> CoreResult<DidType> {
        DidType::from_bytes(self.id_type())
    }

    pub fn genesis(&self) -> [u8; GENESIS_LENGTH] {
        let mut out = [0u8; GENESIS_LENGTH];
        out.copy_from_slice(&self.0[2..29]);
        out
    }

    /// The id as a little-endian integer, the form used in circuit signals.
    pub fn to_fr(&self) -> Fr {
        // 31 bytes are always below the modulus
        fr_from_le_bytes(&self.0).unwrap_or_default()
    }

    pub fn from_fr(value: &Fr) -> CoreResult<Self> {
        let le = fr_to_le_bytes(value);
        if le[31] != 0 {
            return Err(CoreError::InvalidId("value wider than 31 bytes".into()));
        }
        Self::from_bytes(&le[..ID_LENGTH])
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_base58(text: &str) -> CoreResult<Self> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|e| CoreError::InvalidId(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Derive the genesis id of an identity state: the last 27 bytes of
    /// `LE(state)` framed by the type and checksum.
    pub fn genesis_from_state(id_type: [u8; 2], state: &Fr) -> Self {
        let le = fr_to_le_bytes(state);
        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis.copy_from_slice(&le[32 - GENESIS_LENGTH..]);
        Self::new(id_type, &genesis)
    }

    /// `true` when `state` is the state this id was derived from.
    pub fn is_genesis_state(&self, state: &Fr) -> bool {
        Self::genesis_from_state(self.id_type(), state) == *self
    }

    /// Profile id for `nonce`: the first 27 bytes of `LE(Poseidon(id, nonce))`.
    pub fn profile(&self, nonce: &Fr) -> CoreResult<Self> {
        let hash = poseidon_hash(&[self.to_fr(), *nonce])?;
        let le = fr_to_le_bytes(&hash);
        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis.copy_from_slice(&le[..GENESIS_LENGTH]);
        Ok(Self::new(self.id_type(), &genesis))
    }

    /// Id controlled by an Ethereum account: seven zero bytes then the address.
    pub fn from_eth_address(id_type: [u8; 2], address: &[u8; 20]) -> Self {
        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis[7..].copy_from_slice(address);
        Self::new(id_type, &genesis)
    }

    pub fn eth_address(&self) -> Option<[u8; 20]> {
        let genesis = self.genesis();
        if genesis[..7].iter().any(|b| *b != 0) {
            return None;
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&genesis[7..]);
        Some(out)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_base58())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

// ---------------------------------------------------------------------------
// Did
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Did {
    pub id: Id,
    pub did_type: DidType,
}

impl Did {
    pub fn from_id(id: Id) -> CoreResult<Self> {
        Ok(Self {
            did_type: id.did_type()?,
            id,
        })
    }

    pub fn genesis_from_state(did_type: DidType, state: &Fr) -> CoreResult<Self> {
        let id = Id::genesis_from_state(did_type.to_bytes()?, state);
        Ok(Self { id, did_type })
    }

    pub fn profile(&self, nonce: &Fr) -> CoreResult<Self> {
        Ok(Self {
            id: self.id.profile(nonce)?,
            did_type: self.did_type,
        })
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.did_type.blockchain {
            Blockchain::ReadOnly => write!(
                f,
                "did:{}:readonly:{}",
                self.did_type.method.as_str(),
                self.id
            ),
            _ => write!(
                f,
                "did:{}:{}:{}:{}",
                self.did_type.method.as_str(),
                self.did_type.blockchain.as_str(),
                self.did_type.network.as_str(),
                self.id
            ),
        }
    }
}

impl FromStr for Did {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (method, id_part) = match parts.as_slice() {
            ["did", method, "readonly", id] => (*method, *id),
            ["did", method, _, _, id] => (*method, *id),
            _ => return Err(CoreError::InvalidDid(s.to_string())),
        };
        let method = DidMethod::parse(method)?;
        let id = Id::from_base58(id_part)?;
        let did = Did::from_id(id)?;
        if did.did_type.method != method || did.to_string() != s {
            return Err(CoreError::InvalidDid(format!(
                "{} does not match the type encoded in its id",
                s
            )));
        }
        Ok(did)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amoy() -> DidType {
        DidType::new(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy).unwrap()
    }

    #[test]
    fn test_checksum_layout() {
        let id = Id::new([0x01, 0x00], &[1u8; GENESIS_LENGTH]);
        let bytes = id.as_bytes();
        let sum: u16 = 1 + 27;
        assert_eq!(&bytes[29..], &sum.to_le_bytes());
    }

    #[test]
    fn test_from_bytes_rejects_bad_checksum() {
        let id = Id::new([0x01, 0x00], &[9u8; GENESIS_LENGTH]);
        let mut bytes = *id.as_bytes();
        bytes[5] ^= 0x01;
        assert!(matches!(Id::from_bytes(&bytes), Err(CoreError::InvalidId(_))));
        assert!(Id::from_bytes(&bytes[..30]).is_err());
    }

    #[test]
    fn test_genesis_derivation_is_idempotent() {
        let state = Fr::from(0xdead_beef_u64) * Fr::from(u64::MAX);
        let t = amoy().to_bytes().unwrap();
        let a = Id::genesis_from_state(t, &state);
        let b = Id::genesis_from_state(t, &state);
        assert_eq!(a, b);
        assert!(a.is_genesis_state(&state));
        assert!(!a.is_genesis_state(&(state + Fr::from(1u64))));
    }

    #[test]
    fn test_genesis_takes_high_bytes_of_state() {
        let state = Fr::from(0xff_u64);
        let id = Id::genesis_from_state([0x01, 0x00], &state);
        // the low five bytes of LE(state) are dropped
        assert_eq!(id.genesis(), [0u8; GENESIS_LENGTH]);
    }

    #[test]
    fn test_fr_roundtrip() {
        let id = Id::genesis_from_state([0x02, 0x13], &Fr::from(123456789u64));
        assert_eq!(Id::from_fr(&id.to_fr()).unwrap(), id);
    }

    #[test]
    fn test_did_string_roundtrip() {
        let did = Did::genesis_from_state(amoy(), &Fr::from(77u64)).unwrap();
        let s = did.to_string();
        assert!(s.starts_with("did:polygonid:polygon:amoy:"));
        let parsed: Did = s.parse().unwrap();
        assert_eq!(parsed, did);
    }

    #[test]
    fn test_readonly_did() {
        let did =
            Did::genesis_from_state(DidType::read_only(DidMethod::Iden3), &Fr::from(5u64)).unwrap();
        let s = did.to_string();
        assert!(s.starts_with("did:iden3:readonly:"));
        assert_eq!(s.parse::<Did>().unwrap(), did);
    }

    #[test]
    fn test_did_network_must_match_id() {
        let did = Did::genesis_from_state(amoy(), &Fr::from(77u64)).unwrap();
        let forged = format!("did:polygonid:polygon:main:{}", did.id);
        assert!(forged.parse::<Did>().is_err());
        assert!("did:polygonid:x".parse::<Did>().is_err());
    }

    #[test]
    fn test_unsupported_combination() {
        assert!(DidType::new(DidMethod::Iden3, Blockchain::Polygon, Network::Goerli).is_err());
    }

    #[test]
    fn test_profile_differs_and_is_deterministic() {
        let did = Did::genesis_from_state(amoy(), &Fr::from(77u64)).unwrap();
        let p1 = did.profile(&Fr::from(1u64)).unwrap();
        let p1_again = did.profile(&Fr::from(1u64)).unwrap();
        let p2 = did.profile(&Fr::from(2u64)).unwrap();
        assert_eq!(p1, p1_again);
        assert_ne!(p1, p2);
        assert_ne!(p1.id, did.id);
        assert_eq!(p1.id.id_type(), did.id.id_type());
    }

    #[test]
    fn test_eth_address_identity() {
        let t = DidType::new(DidMethod::Iden3, Blockchain::Ethereum, Network::Sepolia)
            .unwrap()
            .to_bytes()
            .unwrap();
        let addr = [0xab; 20];
        let id = Id::from_eth_address(t, &addr);
        assert_eq!(id.eth_address(), Some(addr));
        let other = Id::genesis_from_state(t, &(Fr::from(u64::MAX) * Fr::from(u64::MAX)));
        assert_eq!(other.eth_address(), None);
    }

    #[test]
    fn test_did_serde_as_string() {
        let did = Did::genesis_from_state(amoy(), &Fr::from(3u64)).unwrap();
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, format!("\"{}\"", did));
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
    }
}
