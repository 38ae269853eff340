//! Withdrawal Prover Interface
//!
//! Provides the `Prover` trait and implementations:
//! - `MockProver`: checks the witness relation in the clear and returns a
//!   blake3 binding of the public inputs (development and tests)
//! - `RemoteProver`: HTTP client for an external prover coordinator
//!
//! `ProverBackend` picks one at startup.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::remote_prover::RemoteProver;
use super::witness::{CircuitArtifacts, PrivateInputs, PublicInputs};
use mintbridge_privacy::{Commitment, MerkleHasher, NullifierHash};

const MOCK_PROOF_CONTEXT: &str = "mintbridge-mock-withdraw-proof-v1";

/// Opaque proof bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(#[serde(with = "hex::serde")] pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProverError {
    #[error("prover rejected witness: {0}")]
    Rejected(String),
    #[error("prover unavailable: {0}")]
    Unavailable(String),
    #[error("proof generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Produces a withdrawal proof from assembled inputs
pub trait Prover: Send + Sync {
    fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        public: &PublicInputs,
        private: &PrivateInputs,
    ) -> impl Future<Output = Result<Proof, ProverError>> + Send;
}

// ============================================================================
// Mock Prover
// ============================================================================

/// Checks the statement a real circuit would constrain, without zero knowledge:
/// the commitment opens to `(nullifier, secret)`, the nullifier hashes to the
/// public nullifier hash, and the path reaches the public root.
#[derive(Debug, Clone, Default)]
pub struct MockProver;

impl MockProver {
    pub fn new() -> Self {
        Self
    }

    /// The proof `MockProver` emits for `public`
    pub fn proof_for(public: &PublicInputs) -> Proof {
        let mut hasher = blake3::Hasher::new_derive_key(MOCK_PROOF_CONTEXT);
        hasher.update(&public.to_bytes());
        Proof(hasher.finalize().as_bytes().to_vec())
    }

    fn check_witness(public: &PublicInputs, private: &PrivateInputs) -> Result<(), ProverError> {
        if private.path_elements.is_empty()
            || private.path_elements.len() != private.path_indices.len()
        {
            return Err(ProverError::Rejected(format!(
                "malformed merkle path ({} elements, {} indices)",
                private.path_elements.len(),
                private.path_indices.len()
            )));
        }

        if NullifierHash::derive(&private.nullifier) != public.nullifier_hash {
            return Err(ProverError::Rejected(
                "nullifier does not hash to the public nullifier hash".into(),
            ));
        }

        let commitment = Commitment::derive(&private.nullifier, &private.secret);
        let root = MerkleHasher::global().compute_root_from_path(
            &commitment.0,
            &private.path_elements,
            &private.path_indices,
        );
        if root != public.root {
            return Err(ProverError::Rejected(
                "merkle path does not reach the public root".into(),
            ));
        }
        Ok(())
    }
}

impl Prover for MockProver {
    async fn prove(
        &self,
        _artifacts: &CircuitArtifacts,
        public: &PublicInputs,
        private: &PrivateInputs,
    ) -> Result<Proof, ProverError> {
        Self::check_witness(public, private)?;
        Ok(Self::proof_for(public))
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

pub enum ProverBackend {
    Mock(MockProver),
    Remote(RemoteProver),
}

impl ProverBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            Self::Remote(_) => "remote",
        }
    }
}

impl Prover for ProverBackend {
    async fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        public: &PublicInputs,
        private: &PrivateInputs,
    ) -> Result<Proof, ProverError> {
        match self {
            Self::Mock(prover) => prover.prove(artifacts, public, private).await,
            Self::Remote(prover) => prover.prove(artifacts, public, private).await,
        }
    }
}
