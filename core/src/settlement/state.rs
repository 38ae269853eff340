//! Transfer and leg state
//!
//! A transfer moves `Split -> Committing -> AwaitingVisibility -> Proving ->
//! Withdrawing -> Settled`, or ends in `Failed`. After the burn, the transfer
//! state is derived from its legs: the least advanced running leg sets the
//! phase, and a finished transfer is `Settled` only if every leg settled.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ledger::{Address, TxReceipt};
use mintbridge_privacy::{Commitment, NullifierHash, SealedPreimage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InvalidAmount,
    NotFound,
    VisibilityTimeout,
    ProofGenerationFailed,
    LedgerRejected,
    LedgerUnavailable,
    ConfigurationError,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferState {
    Split,
    Committing,
    AwaitingVisibility,
    Proving,
    Withdrawing,
    Settled,
    Failed { reason: FailureReason },
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LegState {
    AwaitingVisibility,
    Proving,
    Withdrawing,
    /// `receipt` is `None` when the withdrawal's receipt was lost and the
    /// ledger later confirmed it through the leg's spent nullifier.
    Settled { receipt: Option<TxReceipt> },
    Failed { reason: FailureReason },
}

impl LegState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled { .. } | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingVisibility => "awaiting_visibility",
            Self::Proving => "proving",
            Self::Withdrawing => "withdrawing",
            Self::Settled { .. } => "settled",
            Self::Failed { .. } => "failed",
        }
    }

    fn phase(&self) -> Option<(u8, TransferState)> {
        match self {
            Self::AwaitingVisibility => Some((0, TransferState::AwaitingVisibility)),
            Self::Proving => Some((1, TransferState::Proving)),
            Self::Withdrawing => Some((2, TransferState::Withdrawing)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransferId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegRecord {
    pub index: usize,
    pub denomination: u64,
    pub commitment: Commitment,
    pub nullifier_hash: NullifierHash,
    pub sealed_preimage: SealedPreimage,
    pub state: LegState,
    pub attempts: u32,
    /// A withdrawal for this leg reached the ledger call at least once
    #[serde(default)]
    pub withdrawal_submitted: bool,
}

/// Journaled transfer. Preimages only ever appear sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub source: String,
    pub destination: String,
    pub recipient: Address,
    pub amount: u64,
    pub state: TransferState,
    pub legs: Vec<LegRecord>,
    pub commit_receipt: Option<TxReceipt>,
    /// The burn was submitted but its outcome never came back. Deposit
    /// events decide whether the commitments landed.
    #[serde(default)]
    pub commit_unconfirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// The burn is on the ledger, or may be
    pub fn is_committed(&self) -> bool {
        self.commit_receipt.is_some() || self.commit_unconfirmed
    }

    pub fn mark_commit_unconfirmed(&mut self) {
        self.commit_unconfirmed = true;
        self.refresh_state();
    }

    pub fn set_state(&mut self, state: TransferState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn set_leg_state(&mut self, index: usize, state: LegState) {
        if let Some(leg) = self.legs.get_mut(index) {
            leg.state = state;
        }
        self.refresh_state();
    }

    /// Recompute the transfer state from its legs once the burn is (or may
    /// be) on the ledger. Before that the state is whatever was set explicitly.
    pub fn refresh_state(&mut self) {
        if !self.is_committed() {
            return;
        }
        let state = Self::derive_state(&self.legs);
        self.set_state(state);
    }

    fn derive_state(legs: &[LegRecord]) -> TransferState {
        if let Some((_, phase)) = legs.iter().filter_map(|leg| leg.state.phase()).min_by_key(|(rank, _)| *rank) {
            return phase;
        }

        let first_failure = legs.iter().find_map(|leg| match &leg.state {
            LegState::Failed { reason } => Some(reason.clone()),
            _ => None,
        });
        match first_failure {
            Some(reason) => TransferState::Failed { reason },
            None => TransferState::Settled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegReport {
    pub index: usize,
    pub denomination: u64,
    pub commitment: Commitment,
    pub nullifier_hash: NullifierHash,
    #[serde(flatten)]
    pub state: LegState,
    pub attempts: u32,
}

impl From<&LegRecord> for LegReport {
    fn from(leg: &LegRecord) -> Self {
        Self {
            index: leg.index,
            denomination: leg.denomination,
            commitment: leg.commitment,
            nullifier_hash: leg.nullifier_hash,
            state: leg.state.clone(),
            attempts: leg.attempts,
        }
    }
}

/// Per-leg status returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub transfer_id: TransferId,
    pub source: String,
    pub destination: String,
    pub recipient: Address,
    pub amount: u64,
    #[serde(flatten)]
    pub state: TransferState,
    pub legs: Vec<LegReport>,
    pub commit_receipt: Option<TxReceipt>,
    #[serde(default)]
    pub commit_unconfirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementReport {
    pub fn is_settled(&self) -> bool {
        self.state == TransferState::Settled
    }
}

impl From<&TransferRecord> for SettlementReport {
    fn from(record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.id.clone(),
            source: record.source.clone(),
            destination: record.destination.clone(),
            recipient: record.recipient,
            amount: record.amount,
            state: record.state.clone(),
            legs: record.legs.iter().map(LegReport::from).collect(),
            commit_receipt: record.commit_receipt.clone(),
            commit_unconfirmed: record.commit_unconfirmed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
