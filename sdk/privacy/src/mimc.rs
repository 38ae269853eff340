//! MiMC two-to-one hash
//!
//! Node hash of the deposit Merkle trees. Round constants are
//! `RC[i] = (i+1)^3 + (i+1)` and each round computes `(x + k + c)^7`.
//! Byte encodings are little-endian, matching [`crate::Commitment`].

use ark_bn254::Fr;
use ark_ff::{Field, PrimeField};

use crate::poseidon::field_to_bytes;

/// Number of MiMC rounds
const MIMC_ROUNDS: usize = 91;

/// Domain tag absorbed ahead of a two-input hash
const DOMAIN_PAIR: u64 = 2;

#[derive(Debug, Clone)]
pub struct MiMC {
    round_constants: Vec<Fr>,
}

impl Default for MiMC {
    fn default() -> Self {
        Self::new()
    }
}

impl MiMC {
    pub fn new() -> Self {
        let round_constants = (0..MIMC_ROUNDS).map(Self::round_constant).collect();
        Self { round_constants }
    }

    fn round_constant(i: usize) -> Fr {
        let idx = Fr::from((i + 1) as u64);
        idx * idx * idx + idx
    }

    fn round(x: Fr, k: Fr, c: Fr) -> Fr {
        let t = x + k + c;
        let t2 = t.square();
        let t4 = t2.square();
        t4 * t2 * t
    }

    fn permute(&self, x: Fr, k: Fr) -> Fr {
        let mut state = x;
        for c in &self.round_constants {
            state = Self::round(state, k, *c);
        }
        state + k
    }

    fn absorb(&self, inputs: &[Fr]) -> Fr {
        let mut state = Fr::from(0u64);
        for input in inputs {
            state = self.permute(state + *input, Fr::from(0u64));
        }
        state
    }

    /// Hash two field elements
    pub fn hash_2(&self, left: Fr, right: Fr) -> Fr {
        self.absorb(&[Fr::from(DOMAIN_PAIR), left, right])
    }

    /// Hash two 32-byte little-endian encodings
    pub fn hash_2_bytes(&self, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let left_f = Fr::from_le_bytes_mod_order(left);
        let right_f = Fr::from_le_bytes_mod_order(right);
        field_to_bytes(self.hash_2(left_f, right_f))
    }
}
