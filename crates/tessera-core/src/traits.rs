use crate::babyjub::{BjjPublicKey, BjjSignature};
use crate::error::CoreResult;
use crate::field::Fr;

// ---------------------------------------------------------------------------
// BjjSigner -- BabyJubJub EdDSA-Poseidon signing capability
//
// Signs single field elements: claim hashes, state-transition challenges and
// on-chain proof challenges.
// ---------------------------------------------------------------------------

pub trait BjjSigner: Send + Sync {
    fn public_key(&self) -> BjjPublicKey;
    fn sign_poseidon(&self, message: &Fr) -> CoreResult<BjjSignature>;
}

// ---------------------------------------------------------------------------
// LedgerSigner -- account that pays for ledger writes
// ---------------------------------------------------------------------------

pub trait LedgerSigner: Send + Sync {
    /// 20-byte account address.
    fn address(&self) -> [u8; 20];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_bjj_signer_object_safe(_: &dyn BjjSigner) {}
    fn _assert_ledger_signer_object_safe(_: &dyn LedgerSigner) {}
}
