//! Witness Assembly
//!
//! Packages a deposit and its inclusion path into the inputs of the
//! withdrawal circuit and hands them to the prover.
//!
//! ```text
//! public  = { root, nullifier_hash, recipient, relayer = 0, fee = 0, refund = 0 }
//! private = { nullifier, secret, path_elements, path_indices }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prover::{Proof, Prover, ProverError};
use crate::ledger::Address;
use mintbridge_privacy::{
    Deposit, Leaf, MerkleError, NullifierHash, SCALAR_BYTES, build_merkle_proof,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    #[serde(with = "hex::serde")]
    pub root: [u8; 32],
    pub nullifier_hash: NullifierHash,
    pub recipient: Address,
    pub relayer: Address,
    pub fee: u64,
    pub refund: u64,
}

impl PublicInputs {
    /// Fixed-layout encoding used for proof binding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 * 4 + 16);
        out.extend_from_slice(&self.root);
        out.extend_from_slice(self.nullifier_hash.as_bytes());
        out.extend_from_slice(&self.recipient.0);
        out.extend_from_slice(&self.relayer.0);
        out.extend_from_slice(&self.fee.to_le_bytes());
        out.extend_from_slice(&self.refund.to_le_bytes());
        out
    }
}

#[derive(Clone)]
pub struct PrivateInputs {
    pub nullifier: [u8; SCALAR_BYTES],
    pub secret: [u8; SCALAR_BYTES],
    pub path_elements: Vec<[u8; 32]>,
    pub path_indices: Vec<u8>,
}

impl fmt::Debug for PrivateInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateInputs")
            .field("path_len", &self.path_elements.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Witness {
    pub public: PublicInputs,
    pub private: PrivateInputs,
    pub leaf_index: u32,
}

/// Circuit definition and proving key, passed through to the prover untouched
#[derive(Debug, Clone, Default)]
pub struct CircuitArtifacts {
    pub circuit: Vec<u8>,
    pub proving_key: Vec<u8>,
}

impl CircuitArtifacts {
    pub fn new(circuit: Vec<u8>, proving_key: Vec<u8>) -> Self {
        Self {
            circuit,
            proving_key,
        }
    }

    pub fn load(circuit_path: &Path, proving_key_path: &Path) -> Result<Self> {
        let circuit = std::fs::read(circuit_path)
            .with_context(|| format!("Failed to read circuit: {}", circuit_path.display()))?;
        let proving_key = std::fs::read(proving_key_path).with_context(|| {
            format!("Failed to read proving key: {}", proving_key_path.display())
        })?;
        Ok(Self::new(circuit, proving_key))
    }

    /// Identifies the artifact pair to a remote prover
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.circuit.len() as u64).to_le_bytes());
        hasher.update(&self.circuit);
        hasher.update(&self.proving_key);
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    pub root: [u8; 32],
    pub proof: Proof,
    pub public: PublicInputs,
}

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    Prover(#[from] ProverError),
}

/// Build the circuit inputs for withdrawing `deposit` to `recipient`
pub fn assemble_witness(
    deposit: &Deposit,
    recipient: Address,
    height: usize,
    leaves: &[Leaf],
) -> Result<Witness, MerkleError> {
    let proof = build_merkle_proof(&deposit.commitment(), height, leaves)?;

    let public = PublicInputs {
        root: proof.root,
        nullifier_hash: deposit.nullifier_hash(),
        recipient,
        relayer: Address::ZERO,
        fee: 0,
        refund: 0,
    };
    let private = PrivateInputs {
        nullifier: *deposit.nullifier(),
        secret: *deposit.secret(),
        path_elements: proof.path_elements,
        path_indices: proof.path_indices,
    };

    Ok(Witness {
        public,
        private,
        leaf_index: proof.leaf_index,
    })
}

/// Binds a prover to the artifacts and tree height it proves against
pub struct WitnessAssembler<P> {
    prover: Arc<P>,
    artifacts: Arc<CircuitArtifacts>,
    height: usize,
}

impl<P: Prover> WitnessAssembler<P> {
    pub fn new(prover: Arc<P>, artifacts: Arc<CircuitArtifacts>, height: usize) -> Self {
        Self {
            prover,
            artifacts,
            height,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn assemble(
        &self,
        deposit: &Deposit,
        recipient: Address,
        leaves: &[Leaf],
    ) -> Result<Witness, MerkleError> {
        assemble_witness(deposit, recipient, self.height, leaves)
    }

    /// Prover errors surface unchanged; retrying is the caller's call.
    pub async fn prove(&self, witness: &Witness) -> Result<ProofBundle, ProverError> {
        let proof = self
            .prover
            .prove(&self.artifacts, &witness.public, &witness.private)
            .await?;
        Ok(ProofBundle {
            root: witness.public.root,
            proof,
            public: witness.public.clone(),
        })
    }

    /// Assemble and prove in one step
    pub async fn generate(
        &self,
        deposit: &Deposit,
        recipient: Address,
        leaves: &[Leaf],
    ) -> Result<ProofBundle, WitnessError> {
        let witness = self.assemble(deposit, recipient, leaves)?;
        Ok(self.prove(&witness).await?)
    }
}
