//! Preimage Sealing
//!
//! Deposit preimages are kept only long enough to withdraw a leg, but a leg
//! may need an operator retry after a crash. They are therefore persisted
//! sealed to the operator's X25519 key with ChaCha20-Poly1305.
//!
//! ```text
//! Flow:
//! 1. Generate ephemeral keypair (epk, esk)
//! 2. Shared secret = ECDH(esk, operator_pk)
//! 3. Key = blake3_derive_key("mintbridge-preimage-v1", shared || epk)
//! 4. Ciphertext = ChaCha20-Poly1305(key, nonce, preimage, aad = commitment)
//! ```
//!
//! The commitment is the associated data, so a sealed blob cannot be moved
//! onto another leg without failing authentication.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::commitment::Commitment;
use crate::deposit::{Deposit, PREIMAGE_BYTES};

const KDF_CONTEXT: &str = "mintbridge-preimage-v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealError {
    #[error("sealing failed")]
    Seal,
    #[error("sealed preimage failed authentication")]
    Unseal,
    #[error("sealed preimage has {0} bytes, expected {PREIMAGE_BYTES}")]
    Length(usize),
    #[error("unsealed preimage does not open commitment {0}")]
    CommitmentMismatch(Commitment),
}

/// A deposit preimage encrypted to the operator key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPreimage {
    #[serde(with = "hex::serde")]
    pub ephemeral_pk: [u8; 32],
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 12],
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

impl SealedPreimage {
    /// epk + nonce + tag
    pub const OVERHEAD: usize = 32 + 12 + 16;
}

/// Operator key used to seal and unseal preimages
#[derive(Clone)]
pub struct SealingKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl SealingKey {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn seal(&self, deposit: &Deposit) -> Result<SealedPreimage, SealError> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pk = PublicKey::from(&ephemeral_secret);
        let shared = ephemeral_secret.diffie_hellman(&self.public);
        let key = derive_key(shared.as_bytes(), ephemeral_pk.as_bytes());

        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        let preimage = deposit.preimage();
        let commitment = deposit.commitment();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &preimage,
                    aad: commitment.as_bytes(),
                },
            )
            .map_err(|_| SealError::Seal)?;

        Ok(SealedPreimage {
            ephemeral_pk: *ephemeral_pk.as_bytes(),
            nonce,
            ciphertext,
        })
    }

    /// Recover the deposit behind `expected`
    pub fn unseal(
        &self,
        sealed: &SealedPreimage,
        expected: &Commitment,
    ) -> Result<Deposit, SealError> {
        let ephemeral_pk = PublicKey::from(sealed.ephemeral_pk);
        let shared = self.secret.diffie_hellman(&ephemeral_pk);
        let key = derive_key(shared.as_bytes(), &sealed.ephemeral_pk);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: expected.as_bytes(),
                },
            )
            .map_err(|_| SealError::Unseal)?;

        let preimage: [u8; PREIMAGE_BYTES] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| SealError::Length(plaintext.len()))?;

        let deposit = Deposit::from_preimage(&preimage);
        if deposit.commitment() != *expected {
            return Err(SealError::CommitmentMismatch(*expected));
        }
        Ok(deposit)
    }
}

fn derive_key(shared_secret: &[u8], ephemeral_pk: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(ephemeral_pk);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::new_deposit;

    #[test]
    fn test_seal_unseal_deposit() {
        let key = SealingKey::generate();
        let deposit = new_deposit();

        let sealed = key.seal(&deposit).unwrap();
        assert_eq!(
            sealed.ciphertext.len() + 32 + 12,
            PREIMAGE_BYTES + SealedPreimage::OVERHEAD
        );

        let opened = key.unseal(&sealed, &deposit.commitment()).unwrap();
        assert_eq!(opened, deposit);
    }

    #[test]
    fn test_wrong_key_fails() {
        let deposit = new_deposit();
        let sealed = SealingKey::generate().seal(&deposit).unwrap();

        let other = SealingKey::generate();
        assert_eq!(
            other.unseal(&sealed, &deposit.commitment()),
            Err(SealError::Unseal)
        );
    }

    #[test]
    fn test_sealed_blob_is_bound_to_commitment() {
        let key = SealingKey::generate();
        let a = new_deposit();
        let b = new_deposit();

        let sealed = key.seal(&a).unwrap();
        assert_eq!(key.unseal(&sealed, &b.commitment()), Err(SealError::Unseal));
    }

    #[test]
    fn test_key_from_bytes_is_stable() {
        let a = SealingKey::from_bytes([7u8; 32]);
        let b = SealingKey::from_bytes([7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());

        let deposit = new_deposit();
        let sealed = a.seal(&deposit).unwrap();
        assert!(b.unseal(&sealed, &deposit.commitment()).is_ok());
    }

    #[test]
    fn test_sealed_preimage_serde() {
        let key = SealingKey::generate();
        let deposit = new_deposit();
        let sealed = key.seal(&deposit).unwrap();

        let json = serde_json::to_string(&sealed).unwrap();
        let back: SealedPreimage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sealed);
    }
}
