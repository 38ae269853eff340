mod recovery;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::ledger::{
    Address, BurnRequest, DepositEvent, Ledger, LedgerError, LocalLedger, LocalLedgerConfig,
    MockProofVerifier, PoolId, TxReceipt, WithdrawRequest,
};
use crate::settlement::{
    CircuitArtifacts, DenominationSet, Orchestrator, OrchestratorConfig, Prover, RetryPolicy,
    TransferId, TransferRecord, WitnessAssembler,
};
use crate::storage::{
    InstitutionRecord, InstitutionRegistry, MemoryJournal, MemoryRegistry, TransferJournal,
};
use mintbridge_privacy::{ROOT_HISTORY_SIZE, SealingKey};

pub(super) const HEIGHT: usize = 10;
pub(super) const ALPHA_SUPPLY: u64 = 100_000;

pub(super) struct Harness<P, L = LocalLedger> {
    pub orchestrator: Orchestrator<L, P>,
    /// The ledger the orchestrator talks to
    pub client: Arc<L>,
    /// The ledger state underneath `client`
    pub ledger: Arc<LocalLedger>,
    pub journal: Arc<MemoryJournal>,
    pub sealing_key: SealingKey,
}

/// Quick policy for tests: no jitter, short delays
pub(super) fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter: Duration::ZERO,
    }
}

pub(super) async fn harness<P: Prover + 'static>(
    prover: P,
    lag: Duration,
    visibility: RetryPolicy,
) -> Harness<P> {
    harness_with_set(prover, lag, visibility, DenominationSet::default()).await
}

pub(super) async fn harness_with_set<P: Prover + 'static>(
    prover: P,
    lag: Duration,
    visibility: RetryPolicy,
    denominations: DenominationSet,
) -> Harness<P> {
    harness_with_ledger(prover, lag, visibility, denominations, |ledger| ledger).await
}

pub(super) async fn flaky_harness<P: Prover + 'static>(
    prover: P,
    lag: Duration,
    visibility: RetryPolicy,
) -> Harness<P, FlakyLedger> {
    harness_with_ledger(
        prover,
        lag,
        visibility,
        DenominationSet::default(),
        |ledger| Arc::new(FlakyLedger::new(ledger)),
    )
    .await
}

/// Alpha and beta registered, alpha connected to beta. `wrap` decides what
/// the orchestrator sees of the ledger.
pub(super) async fn harness_with_ledger<P, L>(
    prover: P,
    lag: Duration,
    visibility: RetryPolicy,
    denominations: DenominationSet,
    wrap: impl FnOnce(Arc<LocalLedger>) -> Arc<L>,
) -> Harness<P, L>
where
    P: Prover + 'static,
    L: Ledger + 'static,
{
    let ledger = Arc::new(
        LocalLedger::new(
            LocalLedgerConfig {
                tree_height: HEIGHT,
                root_history_size: ROOT_HISTORY_SIZE,
                visibility_lag: lag,
            },
            Arc::new(MockProofVerifier),
        )
        .unwrap(),
    );

    let registry = Arc::new(MemoryRegistry::new());
    for (id, byte, supply) in [("alpha", 0xa1u8, ALPHA_SUPPLY), ("beta", 0xb2, 0)] {
        let address = Address([byte; 32]);
        ledger.register_institution(id, address, supply).await.unwrap();
        registry
            .put(id, InstitutionRecord::new(id, id.to_uppercase(), "USD", address))
            .unwrap();
    }
    ledger.connect("alpha", "beta").await.unwrap();

    let journal = Arc::new(MemoryJournal::new());
    let sealing_key = SealingKey::generate();
    let assembler = WitnessAssembler::new(
        Arc::new(prover),
        Arc::new(CircuitArtifacts::default()),
        HEIGHT,
    );

    let client = wrap(ledger.clone());
    let orchestrator = Orchestrator::new(
        client.clone(),
        assembler,
        registry,
        journal.clone(),
        sealing_key.clone(),
        denominations,
        OrchestratorConfig {
            visibility,
            prove_timeout: Duration::from_secs(5),
            ledger_timeout: Duration::from_secs(5),
            ..OrchestratorConfig::default()
        },
    );

    Harness {
        orchestrator,
        client,
        ledger,
        journal,
        sealing_key,
    }
}

impl<P, L> Harness<P, L> {
    pub fn journal_record(&self, id: &TransferId) -> TransferRecord {
        self.journal.load(id).unwrap()
    }
}

/// Applies every operation to the local ledger but can drop the reply the
/// way a reset connection would, and can report roots as unknown.
pub(super) struct FlakyLedger {
    inner: Arc<LocalLedger>,
    /// Burns applied whose receipt is replaced by a transport error
    pub lost_burn_receipts: AtomicU32,
    /// Withdrawals applied whose receipt is replaced by a transport error
    pub lost_withdraw_receipts: AtomicU32,
    /// Root checks answered `false` before deferring to the ledger
    pub unknown_roots: AtomicU32,
    pub root_checks: AtomicU32,
}

impl FlakyLedger {
    fn new(inner: Arc<LocalLedger>) -> Self {
        Self {
            inner,
            lost_burn_receipts: AtomicU32::new(0),
            lost_withdraw_receipts: AtomicU32::new(0),
            unknown_roots: AtomicU32::new(0),
            root_checks: AtomicU32::new(0),
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn reset() -> LedgerError {
        LedgerError::Unavailable("connection reset".into())
    }
}

impl Ledger for FlakyLedger {
    async fn burn_and_commit(&self, request: BurnRequest) -> Result<TxReceipt, LedgerError> {
        let receipt = self.inner.burn_and_commit(request).await?;
        if Self::take(&self.lost_burn_receipts) {
            return Err(Self::reset());
        }
        Ok(receipt)
    }

    async fn query_deposit_events(
        &self,
        pool: &PoolId,
        since_block: u64,
    ) -> Result<Vec<DepositEvent>, LedgerError> {
        self.inner.query_deposit_events(pool, since_block).await
    }

    async fn is_known_root(&self, pool: &PoolId, root: &[u8; 32]) -> Result<bool, LedgerError> {
        self.root_checks.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.unknown_roots) {
            return Ok(false);
        }
        self.inner.is_known_root(pool, root).await
    }

    async fn withdraw(
        &self,
        pool: &PoolId,
        request: WithdrawRequest,
    ) -> Result<TxReceipt, LedgerError> {
        let receipt = self.inner.withdraw(pool, request).await?;
        if Self::take(&self.lost_withdraw_receipts) {
            return Err(Self::reset());
        }
        Ok(receipt)
    }
}
