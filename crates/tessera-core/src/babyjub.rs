//! BabyJubJub: the twisted Edwards curve embedded in the BN254 scalar field.
//!
//! Issuer and holder keys live on this curve. Signatures are EdDSA over a
//! Poseidon digest, laid out the way circuits and on-chain verifiers read them:
//! a point compresses to `LE(y)` with the top bit carrying the sign of `x`, and
//! a signature is `compress(R8) || LE(S)`.

use ark_ff::{Field, MontFp, One, Zero};
use num_bigint::BigUint;
use std::fmt;
use std::sync::OnceLock;
use zeroize::Zeroizing;

use crate::crypto::{keccak256, poseidon_hash};
use crate::error::{CoreError, CoreResult};
use crate::field::{
    fr_from_biguint_reduced, fr_from_le_bytes, fr_to_biguint, fr_to_le_bytes, is_negative, Fr,
};
use crate::traits::BjjSigner;

const CURVE_A: u64 = 168700;
const CURVE_D: u64 = 168696;

const BASE8_X: Fr =
    MontFp!("5299619240641551281634865583518297030282874472190772894086521144482721001553");
const BASE8_Y: Fr =
    MontFp!("16950150798460657717958625567821834550301663161624707787222815936182638968203");

const SUBGROUP_ORDER: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

static ORDER: OnceLock<BigUint> = OnceLock::new();

/// Order of the prime subgroup generated by [`BjjPoint::base8`].
pub fn subgroup_order() -> &'static BigUint {
    ORDER.get_or_init(|| BigUint::parse_bytes(SUBGROUP_ORDER.as_bytes(), 10).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BjjPoint {
    pub x: Fr,
    pub y: Fr,
}

/// Public keys are plain curve points.
pub type BjjPublicKey = BjjPoint;

impl BjjPoint {
    pub fn identity() -> Self {
        Self {
            x: Fr::zero(),
            y: Fr::one(),
        }
    }

    pub fn base8() -> Self {
        Self {
            x: BASE8_X,
            y: BASE8_Y,
        }
    }

    pub fn is_on_curve(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        Fr::from(CURVE_A) * x2 + y2 == Fr::one() + Fr::from(CURVE_D) * x2 * y2
    }

    pub fn add(&self, other: &BjjPoint) -> BjjPoint {
        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let dxy = Fr::from(CURVE_D) * x1x2 * y1y2;
        // The addition law is complete on this curve, both denominators are non-zero.
        let x3 = (self.x * other.y + self.y * other.x) * (Fr::one() + dxy).inverse().unwrap_or_default();
        let y3 = (y1y2 - Fr::from(CURVE_A) * x1x2) * (Fr::one() - dxy).inverse().unwrap_or_default();
        BjjPoint { x: x3, y: y3 }
    }

    /// Double-and-add over the bits of `scalar`, most significant first.
    pub fn mul_scalar(&self, scalar: &BigUint) -> BjjPoint {
        let mut acc = BjjPoint::identity();
        for i in (0..scalar.bits()).rev() {
            acc = acc.add(&acc);
            if scalar.bit(i) {
                acc = acc.add(self);
            }
        }
        acc
    }

    pub fn compress(&self) -> [u8; 32] {
        let mut out = fr_to_le_bytes(&self.y);
        if is_negative(&self.x) {
            out[31] |= 0x80;
        }
        out
    }

    pub fn decompress(bytes: &[u8; 32]) -> CoreResult<Self> {
        let mut y_bytes = *bytes;
        let sign = y_bytes[31] & 0x80 != 0;
        y_bytes[31] &= 0x7f;
        let y = fr_from_le_bytes(&y_bytes).map_err(|_| CoreError::InvalidPoint)?;

        let y2 = y.square();
        let numerator = Fr::one() - y2;
        let denominator = Fr::from(CURVE_A) - Fr::from(CURVE_D) * y2;
        let inv = denominator.inverse().ok_or(CoreError::InvalidPoint)?;
        let mut x = (numerator * inv).sqrt().ok_or(CoreError::InvalidPoint)?;
        if sign != is_negative(&x) {
            x = -x;
        }
        let point = BjjPoint { x, y };
        if !point.is_on_curve() {
            return Err(CoreError::InvalidPoint);
        }
        Ok(point)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.compress())
    }

    pub fn from_hex(text: &str) -> CoreResult<Self> {
        let bytes = hex::decode(text).map_err(|e| CoreError::InvalidEncoding(e.to_string()))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPoint)?;
        Self::decompress(&arr)
    }

    /// Verify an EdDSA-Poseidon signature made by the key at this point.
    pub fn verify_poseidon(&self, message: &Fr, signature: &BjjSignature) -> bool {
        if &signature.s >= subgroup_order() || !signature.r8.is_on_curve() {
            return false;
        }
        let hm = match poseidon_hash(&[signature.r8.x, signature.r8.y, self.x, self.y, *message]) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let left = BjjPoint::base8().mul_scalar(&signature.s);
        let right = signature
            .r8
            .add(&self.mul_scalar(&(fr_to_biguint(&hm) * 8u32)));
        left == right
    }
}

impl fmt::Debug for BjjPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BjjPoint({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct BjjSignature {
    pub r8: BjjPoint,
    pub s: BigUint,
}

impl BjjSignature {
    pub fn compress(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r8.compress());
        let s = self.s.to_bytes_le();
        out[32..32 + s.len().min(32)].copy_from_slice(&s[..s.len().min(32)]);
        out
    }

    pub fn decompress(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != 64 {
            return Err(CoreError::InvalidEncoding(format!(
                "signature must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r8 = [0u8; 32];
        r8.copy_from_slice(&bytes[..32]);
        let s = BigUint::from_bytes_le(&bytes[32..]);
        if &s >= subgroup_order() {
            return Err(CoreError::InvalidEncoding("signature scalar out of range".into()));
        }
        Ok(Self {
            r8: BjjPoint::decompress(&r8)?,
            s,
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.compress())
    }

    pub fn from_hex(text: &str) -> CoreResult<Self> {
        let bytes = hex::decode(text).map_err(|e| CoreError::InvalidEncoding(e.to_string()))?;
        Self::decompress(&bytes)
    }

    /// `S` as a field element, the form the circuits take it in.
    pub fn s_as_fr(&self) -> Fr {
        fr_from_biguint_reduced(&self.s)
    }
}

impl fmt::Debug for BjjSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BjjSignature({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// A BabyJubJub secret scalar, little-endian, wiped on drop. Signing nonces
/// are derived deterministically from the scalar and the message.
#[derive(Clone)]
pub struct BjjPrivateKey {
    scalar: Zeroizing<[u8; 32]>,
}

impl BjjPrivateKey {
    pub fn from_seed(seed: &[u8]) -> Self {
        let digest = Zeroizing::new(keccak256(seed));
        let mut scalar = BigUint::from_bytes_le(&digest[..]) % subgroup_order();
        if scalar.bits() == 0 {
            scalar = BigUint::from(1u32);
        }
        let mut bytes = Zeroizing::new([0u8; 32]);
        let le = Zeroizing::new(scalar.to_bytes_le());
        bytes[..le.len()].copy_from_slice(&le);
        Self { scalar: bytes }
    }

    fn scalar(&self) -> BigUint {
        BigUint::from_bytes_le(&self.scalar[..])
    }

    pub fn public_key(&self) -> BjjPublicKey {
        BjjPoint::base8().mul_scalar(&self.scalar())
    }

    pub fn sign_poseidon(&self, message: &Fr) -> CoreResult<BjjSignature> {
        let order = subgroup_order();
        let scalar = self.scalar();
        let mut nonce_seed = Zeroizing::new(scalar.to_bytes_le());
        nonce_seed.extend_from_slice(&fr_to_le_bytes(message));
        let r = BigUint::from_bytes_le(&keccak256(&nonce_seed)) % order;

        let r8 = BjjPoint::base8().mul_scalar(&r);
        let a = self.public_key();
        let hm = poseidon_hash(&[r8.x, r8.y, a.x, a.y, *message])
            .map_err(|e| CoreError::Signing(e.to_string()))?;
        let s = (r + fr_to_biguint(&hm) * 8u32 * &scalar) % order;
        Ok(BjjSignature { r8, s })
    }
}

impl fmt::Debug for BjjPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BjjPrivateKey([REDACTED])")
    }
}

impl BjjSigner for BjjPrivateKey {
    fn public_key(&self) -> BjjPublicKey {
        BjjPrivateKey::public_key(self)
    }

    fn sign_poseidon(&self, message: &Fr) -> CoreResult<BjjSignature> {
        BjjPrivateKey::sign_poseidon(self, message)
    }
}
