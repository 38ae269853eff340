//! Nullifier Hashes
//!
//! ```text
//! NullifierHash = H2(nullifier)
//! ```
//!
//! Revealed once, at withdrawal. A pool that has already seen a nullifier hash
//! refuses any further withdrawal carrying it.

use std::fmt;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};

use crate::poseidon::{DOMAIN_NULLIFIER, field_to_bytes, hash_scalars};

/// Public tag of a spent deposit (32-byte little-endian field element)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NullifierHash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl NullifierHash {
    pub fn derive(nullifier: &[u8]) -> Self {
        Self(field_to_bytes(hash_scalars(DOMAIN_NULLIFIER, &[nullifier])))
    }

    pub fn to_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for NullifierHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullifierHash({})", hex::encode(self.0))
    }
}
