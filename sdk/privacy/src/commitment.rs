//! Deposit Commitments
//!
//! ```text
//! Commitment = H2(nullifier || secret)
//! ```
//!
//! Published to a denomination pool when value is burned. It hides both
//! scalars while letting the withdrawer prove knowledge of them later.

use std::fmt;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};

use crate::poseidon::{DOMAIN_COMMITMENT, field_to_bytes, hash_scalars};

/// A deposit commitment (32-byte little-endian field element)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Commitment {
    /// Commit to a nullifier/secret pair
    pub fn derive(nullifier: &[u8], secret: &[u8]) -> Self {
        Self::from_field(hash_scalars(DOMAIN_COMMITMENT, &[nullifier, secret]))
    }

    /// Create commitment from field element
    pub fn from_field(f: Fr) -> Self {
        Self(field_to_bytes(f))
    }

    /// Convert to field element
    pub fn to_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(self.0))
    }
}
