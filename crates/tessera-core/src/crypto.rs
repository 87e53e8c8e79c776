use ark_ff::Zero;
use light_poseidon::{Poseidon, PoseidonHasher};
use sha3::{Digest, Keccak256};

use crate::error::{CoreError, CoreResult};
use crate::field::{fr_from_le_bytes, Fr};

/// Frame width of the Poseidon sponge used for long inputs.
pub const SPONGE_FRAME_SIZE: usize = 6;

/// Bytes packed into one field element by [`hash_bytes`].
const BYTES_PER_ELEMENT: usize = 31;

/// Circom-compatible Poseidon over BN254 for 1..=12 inputs.
pub fn poseidon_hash(inputs: &[Fr]) -> CoreResult<Fr> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| CoreError::Hash(format!("poseidon({}): {}", inputs.len(), e)))?;
    hasher
        .hash(inputs)
        .map_err(|e| CoreError::Hash(e.to_string()))
}

/// Poseidon sponge over an arbitrary number of elements.
///
/// The frame is filled left to right; when full it is hashed and the digest
/// becomes element 0 of the next frame. A partially filled final frame is
/// hashed with zero padding. Empty input is rejected.
pub fn sponge_hash(inputs: &[Fr]) -> CoreResult<Fr> {
    if inputs.is_empty() {
        return Err(CoreError::Hash("sponge over no inputs".into()));
    }
    let mut frame = [Fr::zero(); SPONGE_FRAME_SIZE];
    let mut full_hash = None;
    let mut dirty = false;
    let mut k = 0;

    for input in inputs {
        dirty = true;
        frame[k] = *input;
        if k == SPONGE_FRAME_SIZE - 1 {
            let digest = poseidon_hash(&frame)?;
            full_hash = Some(digest);
            dirty = false;
            frame = [Fr::zero(); SPONGE_FRAME_SIZE];
            frame[0] = digest;
            k = 1;
        } else {
            k += 1;
        }
    }

    match (dirty, full_hash) {
        (false, Some(digest)) => Ok(digest),
        _ => poseidon_hash(&frame),
    }
}

/// Hash an arbitrary byte string: 31-byte little-endian chunks fed to the sponge.
/// The empty string is hashed as a single zero chunk.
pub fn hash_bytes(bytes: &[u8]) -> CoreResult<Fr> {
    if bytes.is_empty() {
        return sponge_hash(&[Fr::zero()]);
    }
    let elements = bytes
        .chunks(BYTES_PER_ELEMENT)
        .map(fr_from_le_bytes)
        .collect::<CoreResult<Vec<Fr>>>()?;
    sponge_hash(&elements)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}
