//! Ledger Interface
//!
//! The settlement network holding institution balances and the per
//! denomination deposit pools. The orchestrator only ever talks to it through
//! [`Ledger`]; [`LocalLedger`] is the in-process implementation used by the
//! development server and the tests.

pub mod local;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settlement::prover::Proof;
use crate::settlement::witness::PublicInputs;
use mintbridge_privacy::{Commitment, Leaf, NullifierHash};

pub use local::{LocalLedger, LocalLedgerConfig, MockProofVerifier, NonEmptyProofVerifier};

// ============================================================================
// Ledger Types
// ============================================================================

/// 32-byte settlement address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// One deposit pool: a fixed denomination at a receiving institution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId {
    pub institution: String,
    pub denomination: u64,
}

impl PoolId {
    pub fn new(institution: impl Into<String>, denomination: u64) -> Self {
        Self {
            institution: institution.into(),
            denomination,
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.institution, self.denomination)
    }
}

/// A commitment appended to a pool tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub leaf_index: u32,
    pub commitment: Commitment,
    pub block: u64,
}

impl From<&DepositEvent> for Leaf {
    fn from(event: &DepositEvent) -> Self {
        Leaf::new(event.leaf_index, event.commitment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnLeg {
    pub denomination: u64,
    pub commitment: Commitment,
}

/// Burn `total` at `source` and deposit one commitment per leg into the
/// `destination` pools, atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRequest {
    pub source: String,
    pub destination: String,
    pub total: u64,
    pub legs: Vec<BurnLeg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub proof: Proof,
    pub public: PublicInputs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: String,
    pub block: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("unknown institution {0}")]
    UnknownInstitution(String),
    #[error("institution {from} is not authorised to send to {to}")]
    NotConnected { from: String, to: String },
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u64, required: u64 },
    #[error("leg amounts sum to {sum} but burn total is {total}")]
    AmountMismatch { total: u64, sum: u64 },
    #[error("no deposit pool {0}")]
    UnknownPool(PoolId),
    #[error("deposit pool {0} is full")]
    PoolFull(PoolId),
    #[error("root is not among the known roots")]
    UnknownRoot,
    #[error("nullifier {0} has already been spent")]
    NullifierSpent(NullifierHash),
    #[error("invalid withdrawal proof")]
    InvalidProof,
    #[error("no account for recipient {0}")]
    UnknownRecipient(Address),
    #[error("withdrawal fee {fee} exceeds denomination {denomination}")]
    FeeTooHigh { fee: u64, denomination: u64 },
    #[error("institution {0} already exists")]
    DuplicateInstitution(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger rejected request: {0}")]
    Rejected(#[from] RejectReason),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Settlement network operations used by the orchestrator
pub trait Ledger: Send + Sync {
    fn burn_and_commit(
        &self,
        request: BurnRequest,
    ) -> impl Future<Output = Result<TxReceipt, LedgerError>> + Send;

    /// Deposit events of `pool` included at or after `since_block`
    fn query_deposit_events(
        &self,
        pool: &PoolId,
        since_block: u64,
    ) -> impl Future<Output = Result<Vec<DepositEvent>, LedgerError>> + Send;

    fn is_known_root(
        &self,
        pool: &PoolId,
        root: &[u8; 32],
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn withdraw(
        &self,
        pool: &PoolId,
        request: WithdrawRequest,
    ) -> impl Future<Output = Result<TxReceipt, LedgerError>> + Send;
}

/// On-ledger check of a withdrawal proof against its public inputs
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, public: &PublicInputs, proof: &Proof) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        let hex_str = "11".repeat(32);
        let addr: Address = hex_str.parse().unwrap();
        assert_eq!(addr, Address([0x11; 32]));
        assert_eq!(addr.to_string(), hex_str);

        let prefixed: Address = format!("0x{}", hex_str).parse().unwrap();
        assert_eq!(prefixed, addr);

        assert!("abcd".parse::<Address>().is_err());
    }

    #[test]
    fn test_pool_display() {
        assert_eq!(PoolId::new("acme", 500).to_string(), "acme/500");
    }
}
