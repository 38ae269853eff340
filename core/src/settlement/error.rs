use thiserror::Error;

use super::denomination::SplitError;
use super::prover::ProverError;
use super::state::{FailureKind, FailureReason, TransferId};
use crate::ledger::{LedgerError, RejectReason};
use crate::storage::{JournalError, RegistryError};
use mintbridge_privacy::{Commitment, MerkleError, SealError};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("commitment {0} is not in the observed leaf set")]
    NotFound(Commitment),

    #[error("deposit not visible after {attempts} attempts: {last}")]
    VisibilityTimeout { attempts: u32, last: String },

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(#[from] ProverError),

    #[error("ledger rejected transfer {transfer}: {reason}")]
    LedgerRejected {
        transfer: TransferId,
        reason: RejectReason,
    },

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("unknown institution {0}")]
    UnknownInstitution(String),

    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),

    #[error("leg {leg} of transfer {transfer} cannot be retried while {state}")]
    LegNotRetryable {
        transfer: TransferId,
        leg: usize,
        state: &'static str,
    },

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("sealed preimage error: {0}")]
    Sealing(#[from] SealError),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidAmount(_) => FailureKind::InvalidAmount,
            Self::NotFound(_) | Self::UnknownInstitution(_) | Self::TransferNotFound(_) => {
                FailureKind::NotFound
            }
            Self::VisibilityTimeout { .. } => FailureKind::VisibilityTimeout,
            Self::ProofGenerationFailed(_) => FailureKind::ProofGenerationFailed,
            Self::LedgerRejected { .. } => FailureKind::LedgerRejected,
            Self::LedgerUnavailable(_) => FailureKind::LedgerUnavailable,
            Self::ConfigurationError(_) => FailureKind::ConfigurationError,
            Self::LegNotRetryable { .. }
            | Self::Journal(_)
            | Self::Sealing(_)
            | Self::Registry(_)
            | Self::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        FailureReason::new(self.kind(), self.to_string())
    }

    /// Attach a ledger error to the transfer it happened in
    pub fn from_ledger(transfer: &TransferId, err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(reason) => Self::LedgerRejected {
                transfer: transfer.clone(),
                reason,
            },
            LedgerError::Unavailable(msg) => Self::LedgerUnavailable(msg),
        }
    }
}

impl From<SplitError> for SettlementError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            other => Self::ConfigurationError(other.to_string()),
        }
    }
}

impl From<MerkleError> for SettlementError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::NotFound(commitment) => Self::NotFound(commitment),
            other => Self::ConfigurationError(other.to_string()),
        }
    }
}

impl From<RegistryError> for SettlementError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::UnknownInstitution(id),
            RegistryError::Storage(msg) => Self::Registry(msg),
        }
    }
}
