//! Deposits
//!
//! A deposit is the secret half of one leg of a transfer:
//!
//! ```text
//! nullifier, secret  <- 31 random bytes each
//! preimage           =  nullifier || secret        (62 bytes)
//! commitment         =  H2(preimage)               (published at burn)
//! nullifier_hash     =  H2(nullifier)              (published at withdrawal)
//! ```
//!
//! Both public values are pure functions of the preimage. Nothing maps a
//! commitment back to its preimage.

use std::fmt;

use rand::{CryptoRng, RngCore, rngs::OsRng};

use crate::commitment::Commitment;
use crate::nullifier::NullifierHash;

/// Length of the nullifier and the secret
pub const SCALAR_BYTES: usize = 31;

/// Length of `nullifier || secret`
pub const PREIMAGE_BYTES: usize = 2 * SCALAR_BYTES;

#[derive(Clone, PartialEq, Eq)]
pub struct Deposit {
    nullifier: [u8; SCALAR_BYTES],
    secret: [u8; SCALAR_BYTES],
    commitment: Commitment,
    nullifier_hash: NullifierHash,
}

/// Draw a fresh deposit from the operating system RNG.
pub fn new_deposit() -> Deposit {
    Deposit::random(&mut OsRng)
}

impl Deposit {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut nullifier = [0u8; SCALAR_BYTES];
        let mut secret = [0u8; SCALAR_BYTES];
        rng.fill_bytes(&mut nullifier);
        rng.fill_bytes(&mut secret);
        Self::from_parts(nullifier, secret)
    }

    pub fn from_parts(nullifier: [u8; SCALAR_BYTES], secret: [u8; SCALAR_BYTES]) -> Self {
        let commitment = Commitment::derive(&nullifier, &secret);
        let nullifier_hash = NullifierHash::derive(&nullifier);
        Self {
            nullifier,
            secret,
            commitment,
            nullifier_hash,
        }
    }

    /// Rebuild a deposit from its 62-byte preimage
    pub fn from_preimage(preimage: &[u8; PREIMAGE_BYTES]) -> Self {
        let mut nullifier = [0u8; SCALAR_BYTES];
        let mut secret = [0u8; SCALAR_BYTES];
        nullifier.copy_from_slice(&preimage[..SCALAR_BYTES]);
        secret.copy_from_slice(&preimage[SCALAR_BYTES..]);
        Self::from_parts(nullifier, secret)
    }

    pub fn preimage(&self) -> [u8; PREIMAGE_BYTES] {
        let mut out = [0u8; PREIMAGE_BYTES];
        out[..SCALAR_BYTES].copy_from_slice(&self.nullifier);
        out[SCALAR_BYTES..].copy_from_slice(&self.secret);
        out
    }

    pub fn nullifier(&self) -> &[u8; SCALAR_BYTES] {
        &self.nullifier
    }

    pub fn secret(&self) -> &[u8; SCALAR_BYTES] {
        &self.secret
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    pub fn nullifier_hash(&self) -> NullifierHash {
        self.nullifier_hash
    }
}

// Secret scalars never reach logs.
impl fmt::Debug for Deposit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deposit")
            .field("commitment", &self.commitment)
            .field("nullifier_hash", &self.nullifier_hash)
            .finish_non_exhaustive()
    }
}
