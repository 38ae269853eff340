//! Poseidon sponge over BN254
//!
//! Backs the deposit hash `H2`. Inputs are 31-byte little-endian scalars, which
//! always fit below the field modulus, so absorbing them never reduces.

use std::sync::LazyLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use ark_ff::{BigInteger, PrimeField};

static CONFIG: LazyLock<PoseidonConfig<Fr>> = LazyLock::new(poseidon_config);

/// Domain tag for commitments
pub(crate) const DOMAIN_COMMITMENT: u64 = 1;
/// Domain tag for nullifier hashes
pub(crate) const DOMAIN_NULLIFIER: u64 = 2;

/// Hash a sequence of scalars into one field element under `domain`.
///
/// The sponge is unpadded, so absorbing `[n]` and `[n, 0]` would collide
/// without the leading tag.
pub(crate) fn hash_scalars(domain: u64, scalars: &[&[u8]]) -> Fr {
    let mut sponge = PoseidonSponge::new(&CONFIG);
    sponge.absorb(&Fr::from(domain));
    for scalar in scalars {
        sponge.absorb(&Fr::from_le_bytes_mod_order(scalar));
    }
    sponge.squeeze_field_elements(1)[0]
}

/// Encode a field element as 32 little-endian bytes.
pub(crate) fn field_to_bytes(f: Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    let len = bytes.len().min(32);
    arr[..len].copy_from_slice(&bytes[..len]);
    arr
}

/// Field: BN254 Fr (254 bits)
/// Rate: 2, Capacity: 1
/// Rounds: 8 full, 57 partial, alpha 5
fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits: u64 = 254;
    let rate: usize = 2;
    let capacity: usize = 1;
    let full_rounds: u64 = 8;
    let partial_rounds: u64 = 57;
    let alpha: u64 = 5;

    let (ark, mds) =
        find_poseidon_ark_and_mds::<Fr>(prime_bits, rate, full_rounds, partial_rounds, 0);

    PoseidonConfig::new(
        full_rounds as usize,
        partial_rounds as usize,
        alpha,
        mds,
        ark,
        rate,
        capacity,
    )
}
