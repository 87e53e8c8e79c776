//! BN254 scalar-field helpers.
//!
//! Every slot, hash and public signal in the engine is an element of the
//! BN254 scalar field. On the wire they travel as decimal strings (signals)
//! or 32-byte little-endian words (claim slots). Conversions here are strict:
//! a value at or above the modulus is rejected instead of silently reduced.

pub use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use std::sync::OnceLock;

use crate::error::{CoreError, CoreResult};

static MODULUS: OnceLock<BigUint> = OnceLock::new();

/// The field modulus as an arbitrary-precision integer.
pub fn modulus() -> &'static BigUint {
    MODULUS.get_or_init(|| BigUint::from_bytes_le(&Fr::MODULUS.to_bytes_le()))
}

pub fn fr_to_biguint(value: &Fr) -> BigUint {
    BigUint::from_bytes_le(&value.into_bigint().to_bytes_le())
}

/// Convert an integer into a field element, rejecting non-canonical values.
pub fn fr_from_biguint(value: &BigUint) -> CoreResult<Fr> {
    if value >= modulus() {
        return Err(CoreError::FieldOutOfRange(value.to_string()));
    }
    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Convert an integer into a field element, reducing modulo p.
pub fn fr_from_biguint_reduced(value: &BigUint) -> Fr {
    Fr::from_le_bytes_mod_order(&value.to_bytes_le())
}

pub fn fr_to_decimal(value: &Fr) -> String {
    fr_to_biguint(value).to_string()
}

pub fn fr_from_decimal(text: &str) -> CoreResult<Fr> {
    let parsed = BigUint::parse_bytes(text.trim().as_bytes(), 10)
        .ok_or_else(|| CoreError::InvalidEncoding(format!("not a decimal integer: '{}'", text)))?;
    fr_from_biguint(&parsed)
}

pub fn fr_to_le_bytes(value: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = value.into_bigint().to_bytes_le();
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Parse up to 32 little-endian bytes as a canonical field element.
pub fn fr_from_le_bytes(bytes: &[u8]) -> CoreResult<Fr> {
    if bytes.len() > 32 {
        return Err(CoreError::InvalidEncoding(format!(
            "field element longer than 32 bytes: {}",
            bytes.len()
        )));
    }
    fr_from_biguint(&BigUint::from_bytes_le(bytes))
}

/// Map a signed integer into the field; negatives wrap to `p - |v|`.
pub fn fr_from_i64(value: i64) -> Fr {
    if value < 0 {
        -Fr::from(value.unsigned_abs())
    } else {
        Fr::from(value as u64)
    }
}

pub fn fr_to_u64(value: &Fr) -> CoreResult<u64> {
    let big = fr_to_biguint(value);
    let digits = big.to_u64_digits();
    match digits.len() {
        0 => Ok(0),
        1 => Ok(digits[0]),
        _ => Err(CoreError::FieldOutOfRange(format!("{} does not fit in u64", big))),
    }
}

/// `true` when the element, read as an integer, is above `(p - 1) / 2`.
pub fn is_negative(value: &Fr) -> bool {
    let half: BigUint = (modulus().clone() - 1u32) >> 1usize;
    fr_to_biguint(value) > half
}

// ---------------------------------------------------------------------------
// serde adapters -- decimal-string encoding used by every iden3 JSON format
// ---------------------------------------------------------------------------

pub mod serde_decimal {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let text = String::deserialize(deserializer)?;
        fr_from_decimal(&text).map_err(serde::de::Error::custom)
    }
}

pub mod serde_decimal_vec {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(fr_to_decimal))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .map(|t| fr_from_decimal(t).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{One, Zero};

    #[test]
    fn test_decimal_roundtrip_small() {
        let v = Fr::from(123456789u64);
        assert_eq!(fr_to_decimal(&v), "123456789");
        assert_eq!(fr_from_decimal("123456789").unwrap(), v);
    }

    #[test]
    fn test_modulus_rejected() {
        let p = modulus().to_string();
        assert!(matches!(
            fr_from_decimal(&p),
            Err(CoreError::FieldOutOfRange(_))
        ));
        let p_minus_one = (modulus().clone() - 1u32).to_string();
        assert_eq!(fr_from_decimal(&p_minus_one).unwrap(), -Fr::one());
    }

    #[test]
    fn test_non_decimal_rejected() {
        assert!(fr_from_decimal("0x12").is_err());
        assert!(fr_from_decimal("").is_err());
    }

    #[test]
    fn test_le_bytes_roundtrip() {
        let v = Fr::from(0x0102_0304u64);
        let bytes = fr_to_le_bytes(&v);
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(fr_from_le_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_le_bytes_above_modulus_rejected() {
        assert!(fr_from_le_bytes(&[0xff; 32]).is_err());
        assert!(fr_from_le_bytes(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_negative_wraps() {
        let minus_five = fr_from_i64(-5);
        assert_eq!(minus_five + Fr::from(5u64), Fr::zero());
        assert!(is_negative(&minus_five));
        assert!(!is_negative(&Fr::from(5u64)));
    }

    #[test]
    fn test_to_u64() {
        assert_eq!(fr_to_u64(&Fr::from(u64::MAX)).unwrap(), u64::MAX);
        assert_eq!(fr_to_u64(&Fr::zero()).unwrap(), 0);
        assert!(fr_to_u64(&fr_from_i64(-1)).is_err());
    }

    #[test]
    fn test_serde_decimal_adapter() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "serde_decimal")]
            value: Fr,
            #[serde(with = "serde_decimal_vec")]
            values: Vec<Fr>,
        }
        let w = Wrapper {
            value: Fr::from(42u64),
            values: vec![Fr::from(1u64), Fr::from(2u64)],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"42","values":["1","2"]}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, w.value);
        assert_eq!(back.values, w.values);
    }
}
