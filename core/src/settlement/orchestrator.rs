//! Settlement Orchestrator
//!
//! Drives one transfer end to end:
//!
//! ```text
//! prepare   split amount, one fresh deposit per leg          (Split)
//! commit    journal sealed preimages, single burn-and-commit (Committing)
//! settle    per leg, concurrently:
//!             poll deposit events -> merkle path              (AwaitingVisibility)
//!             prove under timeout                             (Proving)
//!             check root is known, else re-poll
//!             withdraw under timeout                          (Withdrawing)
//! ```
//!
//! The burn is atomic for all legs; everything after it is per leg. A failed
//! leg never undoes a settled sibling and can be retried by an operator
//! without burning again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::denomination::{DenominationSet, MAX_LEGS};
use super::error::SettlementError;
use super::prover::{Prover, ProverError};
use super::retry::RetryPolicy;
use super::state::{
    LegRecord, LegReport, LegState, SettlementReport, TransferId, TransferRecord, TransferState,
};
use super::witness::{Witness, WitnessAssembler, assemble_witness};
use crate::ledger::{
    Address, BurnLeg, BurnRequest, Ledger, LedgerError, PoolId, RejectReason, TxReceipt,
    WithdrawRequest,
};
use crate::storage::{InstitutionRegistry, JournalError, TransferJournal};
use mintbridge_config::MintbridgeConfig;
use mintbridge_privacy::{Deposit, Leaf, MerkleError, SealError, SealingKey, new_deposit};

pub const DEFAULT_MAX_LEGS: u64 = MAX_LEGS;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub visibility: RetryPolicy,
    pub prove_timeout: Duration,
    pub ledger_timeout: Duration,
    pub max_legs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            visibility: RetryPolicy::default(),
            prove_timeout: Duration::from_secs(300),
            ledger_timeout: Duration::from_secs(30),
            max_legs: DEFAULT_MAX_LEGS,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &MintbridgeConfig) -> Self {
        Self {
            visibility: RetryPolicy::from_config(&config.settlement),
            prove_timeout: config.settlement.prove_timeout(),
            ledger_timeout: config.settlement.ledger_timeout(),
            max_legs: DEFAULT_MAX_LEGS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    pub amount: u64,
}

/// One denomination and the deposit that carries it
#[derive(Debug)]
pub struct Leg {
    pub index: usize,
    pub denomination: u64,
    pub deposit: Deposit,
}

/// A split transfer whose deposits exist only in memory.
/// Nothing has touched the ledger yet; dropping or cancelling it is free.
#[derive(Debug)]
#[must_use = "a prepared transfer does nothing until committed"]
pub struct PreparedTransfer {
    id: TransferId,
    request: TransferRequest,
    recipient: Address,
    legs: Vec<Leg>,
}

impl PreparedTransfer {
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn denominations(&self) -> Vec<u64> {
        self.legs.iter().map(|leg| leg.denomination).collect()
    }

    /// Discard the unused deposits
    pub fn cancel(self) {
        info!(
            "Cancelled transfer {} before commit ({} deposits discarded)",
            self.id,
            self.legs.len()
        );
    }
}

/// Removes a leg from the in-flight set when dropped
struct LegClaim {
    in_flight: Arc<DashSet<(TransferId, usize)>>,
    key: (TransferId, usize),
}

impl Drop for LegClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

struct Inner<L, P> {
    ledger: Arc<L>,
    assembler: WitnessAssembler<P>,
    registry: Arc<dyn InstitutionRegistry>,
    journal: Arc<dyn TransferJournal>,
    sealing_key: SealingKey,
    denominations: DenominationSet,
    config: OrchestratorConfig,
    records: DashMap<TransferId, Arc<Mutex<TransferRecord>>>,
    in_flight: Arc<DashSet<(TransferId, usize)>>,
}

pub struct Orchestrator<L, P> {
    inner: Arc<Inner<L, P>>,
}

impl<L, P> Clone for Orchestrator<L, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L, P> Orchestrator<L, P>
where
    L: Ledger + 'static,
    P: Prover + 'static,
{
    pub fn new(
        ledger: Arc<L>,
        assembler: WitnessAssembler<P>,
        registry: Arc<dyn InstitutionRegistry>,
        journal: Arc<dyn TransferJournal>,
        sealing_key: SealingKey,
        denominations: DenominationSet,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                assembler,
                registry,
                journal,
                sealing_key,
                denominations,
                config,
                records: DashMap::new(),
                in_flight: Arc::new(DashSet::new()),
            }),
        }
    }

    pub fn denominations(&self) -> &DenominationSet {
        &self.inner.denominations
    }

    // ========================================================================
    // Split
    // ========================================================================

    /// Leg denominations for `amount`, refused past `max_legs`
    pub fn split_preview(&self, amount: u64) -> Result<Vec<u64>, SettlementError> {
        Ok(self
            .inner
            .denominations
            .split_with_limit(amount, self.inner.config.max_legs)?)
    }

    pub fn prepare(&self, request: TransferRequest) -> Result<PreparedTransfer, SettlementError> {
        self.inner.registry.get(&request.source)?;
        let destination = self.inner.registry.get(&request.destination)?;

        let legs: Vec<Leg> = self
            .split_preview(request.amount)?
            .into_iter()
            .enumerate()
            .map(|(index, denomination)| Leg {
                index,
                denomination,
                deposit: new_deposit(),
            })
            .collect();

        let id = TransferId::generate();
        info!(
            "Prepared transfer {}: {} -> {} amount {} in {} legs",
            id,
            request.source,
            request.destination,
            request.amount,
            legs.len()
        );

        Ok(PreparedTransfer {
            id,
            request,
            recipient: destination.settlement_address,
            legs,
        })
    }

    // ========================================================================
    // Commit
    // ========================================================================

    pub async fn commit(&self, prepared: PreparedTransfer) -> Result<TransferId, SettlementError> {
        let PreparedTransfer {
            id,
            request,
            recipient,
            legs,
        } = prepared;

        let leg_records = legs
            .iter()
            .map(|leg| {
                Ok(LegRecord {
                    index: leg.index,
                    denomination: leg.denomination,
                    commitment: leg.deposit.commitment(),
                    nullifier_hash: leg.deposit.nullifier_hash(),
                    sealed_preimage: self.inner.sealing_key.seal(&leg.deposit)?,
                    state: LegState::AwaitingVisibility,
                    attempts: 0,
                    withdrawal_submitted: false,
                })
            })
            .collect::<Result<Vec<_>, SealError>>()?;

        let now = Utc::now();
        let mut record = TransferRecord {
            id: id.clone(),
            source: request.source.clone(),
            destination: request.destination.clone(),
            recipient,
            amount: request.amount,
            state: TransferState::Committing,
            legs: leg_records,
            commit_receipt: None,
            commit_unconfirmed: false,
            created_at: now,
            updated_at: now,
        };

        if legs.is_empty() {
            record.set_state(TransferState::Settled);
            self.inner.journal.save(&record)?;
            self.track(record);
            info!("Transfer {} has no legs, settled without touching the ledger", id);
            return Ok(id);
        }

        // Held across the burn so settle and status see its outcome
        let shared = Arc::new(Mutex::new(record));
        let mut record = shared.clone().lock_owned().await;
        self.inner.records.insert(id.clone(), shared);

        // The sealed preimages must be durable before anything is burned
        if let Err(e) = self.inner.journal.save(&record) {
            self.inner.records.remove(&id);
            return Err(e.into());
        }

        let burn = BurnRequest {
            source: request.source.clone(),
            destination: request.destination.clone(),
            total: request.amount,
            legs: legs
                .iter()
                .map(|leg| BurnLeg {
                    denomination: leg.denomination,
                    commitment: leg.deposit.commitment(),
                })
                .collect(),
        };
        drop(legs);

        match self.ledger_call(self.inner.ledger.burn_and_commit(burn)).await {
            Ok(receipt) => {
                info!(
                    "Transfer {} committed in tx {} (block {})",
                    id, receipt.tx_id, receipt.block
                );
                record.commit_receipt = Some(receipt);
                record.refresh_state();
                self.persist(&record);
                Ok(id)
            }
            Err(LedgerError::Unavailable(msg)) => {
                warn!(
                    "Transfer {} burn outcome unknown ({}), confirming through deposit events",
                    id, msg
                );
                record.mark_commit_unconfirmed();
                self.persist(&record);
                Ok(id)
            }
            Err(err) => {
                let err = SettlementError::from_ledger(&id, err);
                error!("Transfer {} burn failed: {}", id, err);
                let reason = err.failure_reason();
                for leg in &mut record.legs {
                    leg.state = LegState::Failed {
                        reason: reason.clone(),
                    };
                }
                record.set_state(TransferState::Failed { reason });
                self.persist(&record);
                Err(err)
            }
        }
    }

    // ========================================================================
    // Settle
    // ========================================================================

    /// Drive every unfinished leg to a terminal state and report
    pub async fn settle(&self, id: &TransferId) -> Result<SettlementReport, SettlementError> {
        let record = self.record(id)?;
        let (pending, destination, recipient) = {
            let rec = record.lock().await;
            if !rec.is_committed() {
                return Ok(SettlementReport::from(&*rec));
            }
            let pending: Vec<LegRecord> = rec
                .legs
                .iter()
                .filter(|leg| !leg.state.is_terminal())
                .cloned()
                .collect();
            (pending, rec.destination.clone(), rec.recipient)
        };

        let mut tasks = JoinSet::new();
        for leg in pending {
            let Some(claim) = self.claim_leg(id, leg.index) else {
                debug!("Leg {}#{} is already being driven", id, leg.index);
                continue;
            };
            let this = self.clone();
            let record = record.clone();
            let id = id.clone();
            let destination = destination.clone();
            tasks.spawn(async move {
                let _claim = claim;
                this.drive_leg(&id, &record, leg, &destination, recipient)
                    .await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Leg task for transfer {} aborted: {}", id, e);
            }
        }

        let rec = record.lock().await;
        info!("Transfer {} is {:?}", id, rec.state);
        Ok(SettlementReport::from(&*rec))
    }

    /// Prepare, commit and settle. A rejected burn is reported, not raised.
    pub async fn execute(&self, request: TransferRequest) -> Result<SettlementReport, SettlementError> {
        let prepared = self.prepare(request)?;
        let id = match self.commit(prepared).await {
            Ok(id) => id,
            Err(SettlementError::LedgerRejected { transfer, .. }) => {
                return self.status(&transfer).await;
            }
            Err(e) => return Err(e),
        };
        self.settle(&id).await
    }

    /// Operator retry of a failed leg. Unseals the journaled preimage and
    /// runs the leg again; the burn is never repeated.
    pub async fn retry_leg(
        &self,
        id: &TransferId,
        index: usize,
    ) -> Result<LegReport, SettlementError> {
        let record = self.record(id)?;
        let not_retryable = |state: &'static str| SettlementError::LegNotRetryable {
            transfer: id.clone(),
            leg: index,
            state,
        };

        let _claim = self
            .claim_leg(id, index)
            .ok_or_else(|| not_retryable("in_flight"))?;

        let (leg, destination, recipient) = {
            let rec = record.lock().await;
            let leg = rec.legs.get(index).ok_or_else(|| not_retryable("absent"))?;
            if !rec.is_committed() {
                return Err(not_retryable("uncommitted"));
            }
            if !matches!(leg.state, LegState::Failed { .. }) {
                return Err(not_retryable(leg.state.name()));
            }
            (leg.clone(), rec.destination.clone(), rec.recipient)
        };

        info!("Operator retry of leg {}#{}", id, index);
        self.drive_leg(id, &record, leg, &destination, recipient)
            .await;

        let rec = record.lock().await;
        rec.legs
            .get(index)
            .map(LegReport::from)
            .ok_or_else(|| not_retryable("absent"))
    }

    pub async fn status(&self, id: &TransferId) -> Result<SettlementReport, SettlementError> {
        let record = self.record(id)?;
        let rec = record.lock().await;
        Ok(SettlementReport::from(&*rec))
    }

    pub fn list(&self) -> Result<Vec<SettlementReport>, SettlementError> {
        Ok(self
            .inner
            .journal
            .list()?
            .iter()
            .map(SettlementReport::from)
            .collect())
    }

    /// Journaled transfers that are not terminal, e.g. after a restart.
    /// Includes transfers interrupted while `Committing`.
    pub fn unfinished(&self) -> Result<Vec<TransferId>, SettlementError> {
        Ok(self
            .inner
            .journal
            .list()?
            .into_iter()
            .filter(|rec| !rec.state.is_terminal())
            .map(|rec| rec.id)
            .collect())
    }

    // ========================================================================
    // Leg pipeline
    // ========================================================================

    async fn drive_leg(
        &self,
        id: &TransferId,
        record: &Mutex<TransferRecord>,
        leg: LegRecord,
        destination: &str,
        recipient: Address,
    ) {
        {
            let mut rec = record.lock().await;
            if let Some(entry) = rec.legs.get_mut(leg.index) {
                entry.attempts += 1;
            }
            rec.set_leg_state(leg.index, LegState::AwaitingVisibility);
            self.persist(&rec);
        }

        let state = match self.run_leg(id, record, &leg, destination, recipient).await {
            Ok(receipt) => {
                match &receipt {
                    Some(receipt) => info!(
                        "Leg {}#{} ({}) settled in tx {}",
                        id, leg.index, leg.denomination, receipt.tx_id
                    ),
                    None => info!(
                        "Leg {}#{} ({}) settled by an earlier withdrawal",
                        id, leg.index, leg.denomination
                    ),
                }
                LegState::Settled { receipt }
            }
            Err(err) => {
                error!("Leg {}#{} ({}) failed: {}", id, leg.index, leg.denomination, err);
                LegState::Failed {
                    reason: err.failure_reason(),
                }
            }
        };
        self.set_leg_state(record, leg.index, state).await;
    }

    async fn run_leg(
        &self,
        id: &TransferId,
        record: &Mutex<TransferRecord>,
        leg: &LegRecord,
        destination: &str,
        recipient: Address,
    ) -> Result<Option<TxReceipt>, SettlementError> {
        let deposit = self
            .inner
            .sealing_key
            .unseal(&leg.sealed_preimage, &leg.commitment)?;
        let pool = PoolId::new(destination, leg.denomination);
        let policy = &self.inner.config.visibility;
        let mut failures = 0u32;

        loop {
            let witness = self
                .await_visibility(id, leg.index, &deposit, &pool, recipient, &mut failures)
                .await?;

            self.set_leg_state(record, leg.index, LegState::Proving).await;
            let prove_timeout = self.inner.config.prove_timeout;
            let bundle = match timeout(prove_timeout, self.inner.assembler.prove(&witness)).await {
                Ok(result) => result?,
                Err(_) => return Err(ProverError::Timeout(prove_timeout).into()),
            };

            let known = self
                .ledger_call(self.inner.ledger.is_known_root(&pool, &bundle.root))
                .await;
            if !matches!(known, Ok(true)) {
                failures += 1;
                if failures >= policy.max_attempts {
                    return Err(SettlementError::VisibilityTimeout {
                        attempts: failures,
                        last: "proof root never became known".into(),
                    });
                }
                warn!(
                    "Leg {}#{}: root {} not known by {}, rebuilding path",
                    id,
                    leg.index,
                    hex::encode(bundle.root),
                    pool
                );
                tokio::time::sleep(policy.backoff(failures - 1)).await;
                self.set_leg_state(record, leg.index, LegState::AwaitingVisibility)
                    .await;
                continue;
            }

            self.mark_withdrawing(record, leg.index).await;
            let request = WithdrawRequest {
                proof: bundle.proof,
                public: bundle.public,
            };
            return match self
                .ledger_call(self.inner.ledger.withdraw(&pool, request))
                .await
            {
                Ok(receipt) => Ok(Some(receipt)),
                // Our own earlier withdrawal landed but its receipt was lost
                Err(LedgerError::Rejected(RejectReason::NullifierSpent(nullifier)))
                    if leg.withdrawal_submitted && nullifier == leg.nullifier_hash =>
                {
                    warn!(
                        "Leg {}#{}: nullifier {} already spent by an earlier withdrawal attempt",
                        id, leg.index, nullifier
                    );
                    Ok(None)
                }
                Err(err) => {
                    if let LedgerError::Rejected(RejectReason::NullifierSpent(nullifier)) = &err {
                        error!(
                            "SECURITY: withdrawal for leg {}#{} reused spent nullifier {} in {}",
                            id, leg.index, nullifier, pool
                        );
                    }
                    Err(SettlementError::from_ledger(id, err))
                }
            };
        }
    }

    /// Poll the pool until the deposit's path can be built from a fresh
    /// snapshot. Missing or out-of-order leaves and transport errors are
    /// retried under the visibility policy.
    async fn await_visibility(
        &self,
        id: &TransferId,
        index: usize,
        deposit: &Deposit,
        pool: &PoolId,
        recipient: Address,
        failures: &mut u32,
    ) -> Result<Witness, SettlementError> {
        let policy = &self.inner.config.visibility;
        loop {
            let last = match self
                .ledger_call(self.inner.ledger.query_deposit_events(pool, 0))
                .await
            {
                Ok(events) => {
                    let leaves: Vec<Leaf> = events.iter().map(Leaf::from).collect();
                    let deposit = deposit.clone();
                    let height = self.inner.assembler.height();
                    // Rebuilding the tree is CPU-bound
                    let assembled = tokio::task::spawn_blocking(move || {
                        assemble_witness(&deposit, recipient, height, &leaves)
                    })
                    .await
                    .map_err(|e| SettlementError::Internal(format!("merkle task failed: {e}")))?;
                    match assembled {
                        Ok(witness) => {
                            debug!(
                                "Leg {}#{} visible at leaf {} of {}",
                                id, index, witness.leaf_index, pool
                            );
                            return Ok(witness);
                        }
                        Err(e @ (MerkleError::NotFound(_) | MerkleError::NonContiguous { .. })) => {
                            e.to_string()
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(LedgerError::Unavailable(msg)) => msg,
                Err(err) => return Err(SettlementError::from_ledger(id, err)),
            };

            *failures += 1;
            if *failures >= policy.max_attempts {
                return Err(SettlementError::VisibilityTimeout {
                    attempts: *failures,
                    last,
                });
            }
            let delay = policy.backoff(*failures - 1);
            warn!(
                "Leg {}#{}: {} (attempt {}/{}, retrying in {:?})",
                id, index, last, failures, policy.max_attempts, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn ledger_call<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        let limit = self.inner.config.ledger_timeout;
        timeout(limit, call)
            .await
            .map_err(|_| LedgerError::Unavailable(format!("ledger call timed out after {:?}", limit)))?
    }

    fn record(&self, id: &TransferId) -> Result<Arc<Mutex<TransferRecord>>, SettlementError> {
        if let Some(entry) = self.inner.records.get(id) {
            return Ok(entry.value().clone());
        }
        let mut loaded = match self.inner.journal.load(id) {
            Ok(record) => record,
            Err(JournalError::NotFound(_)) => {
                return Err(SettlementError::TransferNotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if loaded.state == TransferState::Committing {
            warn!(
                "Transfer {} was interrupted while committing, confirming through deposit events",
                id
            );
            loaded.mark_commit_unconfirmed();
        }
        Ok(self
            .inner
            .records
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .value()
            .clone())
    }

    fn track(&self, record: TransferRecord) {
        self.inner
            .records
            .insert(record.id.clone(), Arc::new(Mutex::new(record)));
    }

    fn claim_leg(&self, id: &TransferId, index: usize) -> Option<LegClaim> {
        let key = (id.clone(), index);
        self.inner.in_flight.insert(key.clone()).then(|| LegClaim {
            in_flight: self.inner.in_flight.clone(),
            key,
        })
    }

    /// Persisted before the withdrawal is sent, so a lost receipt can be
    /// recognised on retry
    async fn mark_withdrawing(&self, record: &Mutex<TransferRecord>, index: usize) {
        let mut rec = record.lock().await;
        if let Some(leg) = rec.legs.get_mut(index) {
            leg.withdrawal_submitted = true;
        }
        rec.set_leg_state(index, LegState::Withdrawing);
        self.persist(&rec);
    }

    async fn set_leg_state(&self, record: &Mutex<TransferRecord>, index: usize, state: LegState) {
        let mut rec = record.lock().await;
        rec.set_leg_state(index, state);
        self.persist(&rec);
    }

    fn persist(&self, record: &TransferRecord) {
        if let Err(e) = self.inner.journal.save(record) {
            error!("Failed to journal transfer {}: {}", record.id, e);
        }
    }
}
