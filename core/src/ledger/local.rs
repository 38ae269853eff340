//! In-process settlement ledger
//!
//! Holds institution accounts and one incremental Merkle tree per
//! `(institution, denomination)` pool. Deposits become visible to
//! `query_deposit_events` only after `visibility_lag` has elapsed, which
//! mimics a node that lags behind the chain head.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{
    Address, BurnRequest, DepositEvent, Ledger, LedgerError, PoolId, ProofVerifier, RejectReason,
    TxReceipt, WithdrawRequest,
};
use crate::settlement::prover::{MockProver, Proof};
use crate::settlement::witness::PublicInputs;
use mintbridge_config::MintbridgeConfig;
use mintbridge_privacy::{
    MERKLE_TREE_HEIGHT, MerkleError, NullifierHash, ROOT_HISTORY_SIZE, RootHistory, TreeFrontier,
};

#[derive(Debug, Clone)]
pub struct LocalLedgerConfig {
    pub tree_height: usize,
    pub root_history_size: usize,
    pub visibility_lag: Duration,
}

impl Default for LocalLedgerConfig {
    fn default() -> Self {
        Self {
            tree_height: MERKLE_TREE_HEIGHT,
            root_history_size: ROOT_HISTORY_SIZE,
            visibility_lag: Duration::ZERO,
        }
    }
}

impl LocalLedgerConfig {
    pub fn from_config(config: &MintbridgeConfig) -> Self {
        Self {
            tree_height: config.settlement.tree_height,
            root_history_size: config.ledger.root_history_size,
            visibility_lag: config.ledger.visibility_lag(),
        }
    }
}

/// Accepts exactly the proofs `MockProver` produces
#[derive(Debug, Default)]
pub struct MockProofVerifier;

impl ProofVerifier for MockProofVerifier {
    fn verify(&self, public: &PublicInputs, proof: &Proof) -> bool {
        *proof == MockProver::proof_for(public)
    }
}

/// Used when proofs come from a remote prover whose verifying key the
/// local ledger does not hold.
#[derive(Debug, Default)]
pub struct NonEmptyProofVerifier;

impl ProofVerifier for NonEmptyProofVerifier {
    fn verify(&self, _public: &PublicInputs, proof: &Proof) -> bool {
        !proof.0.is_empty()
    }
}

struct Account {
    address: Address,
    balance: u64,
    connections: HashSet<String>,
}

struct Pool {
    frontier: TreeFrontier,
    roots: RootHistory,
    events: Vec<(DepositEvent, Instant)>,
    nullifiers: HashSet<NullifierHash>,
}

impl Pool {
    fn new(height: usize, history: usize) -> Result<Self, MerkleError> {
        let frontier = TreeFrontier::new(height)?;
        let mut roots = RootHistory::new(history);
        roots.push(frontier.root());
        Ok(Self {
            frontier,
            roots,
            events: Vec::new(),
            nullifiers: HashSet::new(),
        })
    }

    fn remaining(&self) -> u64 {
        (1u64 << self.frontier.height()) - self.frontier.next_index()
    }
}

#[derive(Default)]
struct LedgerState {
    block: u64,
    accounts: HashMap<String, Account>,
    addresses: HashMap<Address, String>,
    pools: HashMap<PoolId, Pool>,
}

pub struct LocalLedger {
    config: LocalLedgerConfig,
    verifier: Arc<dyn ProofVerifier>,
    state: Mutex<LedgerState>,
}

impl LocalLedger {
    pub fn new(
        config: LocalLedgerConfig,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Result<Self, MerkleError> {
        // Surface a bad height at startup instead of on the first burn
        TreeFrontier::new(config.tree_height)?;
        Ok(Self {
            config,
            verifier,
            state: Mutex::new(LedgerState::default()),
        })
    }

    pub fn tree_height(&self) -> usize {
        self.config.tree_height
    }

    pub async fn register_institution(
        &self,
        id: &str,
        address: Address,
        initial_balance: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(id) || state.addresses.contains_key(&address) {
            return Err(RejectReason::DuplicateInstitution(id.to_string()).into());
        }
        state.addresses.insert(address, id.to_string());
        state.accounts.insert(
            id.to_string(),
            Account {
                address,
                balance: initial_balance,
                connections: HashSet::new(),
            },
        );
        info!("Ledger account opened: {} ({})", id, address);
        Ok(())
    }

    /// Allow `from` to burn towards `to`. Connections are one-way.
    pub async fn connect(&self, from: &str, to: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(to) {
            return Err(RejectReason::UnknownInstitution(to.to_string()).into());
        }
        let account = state
            .accounts
            .get_mut(from)
            .ok_or_else(|| RejectReason::UnknownInstitution(from.to_string()))?;
        account.connections.insert(to.to_string());
        debug!("Connected {} -> {}", from, to);
        Ok(())
    }

    pub async fn mint(&self, id: &str, amount: u64) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(id)
            .ok_or_else(|| RejectReason::UnknownInstitution(id.to_string()))?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Unavailable("balance overflow".into()))?;
        Ok(account.balance)
    }

    pub async fn balance(&self, id: &str) -> Result<u64, LedgerError> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(id)
            .map(|account| account.balance)
            .ok_or_else(|| RejectReason::UnknownInstitution(id.to_string()).into())
    }

    /// Number of deposits ever made into `pool`, visible or not
    pub async fn deposit_count(&self, pool: &PoolId) -> u64 {
        let state = self.state.lock().await;
        state
            .pools
            .get(pool)
            .map(|p| p.frontier.next_index())
            .unwrap_or(0)
    }

    pub async fn current_root(&self, pool: &PoolId) -> Option<[u8; 32]> {
        let state = self.state.lock().await;
        state.pools.get(pool).map(|p| p.frontier.root())
    }

    fn receipt(kind: &str, block: u64, payload: &[u8]) -> TxReceipt {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_bytes());
        hasher.update(&block.to_le_bytes());
        hasher.update(payload);
        TxReceipt {
            tx_id: hex::encode(&hasher.finalize().as_bytes()[..16]),
            block,
        }
    }

    fn check_burn(&self, state: &LedgerState, request: &BurnRequest) -> Result<(), RejectReason> {
        let source = state
            .accounts
            .get(&request.source)
            .ok_or_else(|| RejectReason::UnknownInstitution(request.source.clone()))?;
        if !state.accounts.contains_key(&request.destination) {
            return Err(RejectReason::UnknownInstitution(
                request.destination.clone(),
            ));
        }
        if !source.connections.contains(&request.destination) {
            return Err(RejectReason::NotConnected {
                from: request.source.clone(),
                to: request.destination.clone(),
            });
        }

        let sum = request
            .legs
            .iter()
            .try_fold(0u64, |acc, leg| acc.checked_add(leg.denomination))
            .unwrap_or(u64::MAX);
        if sum != request.total {
            return Err(RejectReason::AmountMismatch {
                total: request.total,
                sum,
            });
        }
        if source.balance < request.total {
            return Err(RejectReason::InsufficientBalance {
                available: source.balance,
                required: request.total,
            });
        }

        let mut per_pool: HashMap<u64, u64> = HashMap::new();
        for leg in &request.legs {
            *per_pool.entry(leg.denomination).or_default() += 1;
        }
        for (denomination, count) in per_pool {
            let pool_id = PoolId::new(request.destination.clone(), denomination);
            let remaining = state
                .pools
                .get(&pool_id)
                .map(Pool::remaining)
                .unwrap_or(1u64 << self.config.tree_height);
            if count > remaining {
                return Err(RejectReason::PoolFull(pool_id));
            }
        }
        Ok(())
    }
}

impl Ledger for LocalLedger {
    async fn burn_and_commit(&self, request: BurnRequest) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock().await;
        self.check_burn(&state, &request)?;

        // Validation passed; nothing below may reject.
        state.block += 1;
        let block = state.block;
        let now = Instant::now();

        if let Some(source) = state.accounts.get_mut(&request.source) {
            source.balance -= request.total;
        }

        let mut payload = Vec::with_capacity(request.legs.len() * 32);
        for leg in &request.legs {
            let pool_id = PoolId::new(request.destination.clone(), leg.denomination);
            let pool = match state.pools.entry(pool_id.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => entry.insert(
                    Pool::new(self.config.tree_height, self.config.root_history_size)
                        .map_err(|e| LedgerError::Unavailable(e.to_string()))?,
                ),
            };
            let leaf_index = pool
                .frontier
                .insert(&leg.commitment)
                .map_err(|_| RejectReason::PoolFull(pool_id.clone()))?;
            pool.roots.push(pool.frontier.root());
            pool.events.push((
                DepositEvent {
                    leaf_index,
                    commitment: leg.commitment,
                    block,
                },
                now,
            ));
            payload.extend_from_slice(leg.commitment.as_bytes());
            debug!("Deposit {} into {} at index {}", leg.commitment, pool_id, leaf_index);
        }

        info!(
            "Burned {} at {} for {} ({} legs, block {})",
            request.total,
            request.source,
            request.destination,
            request.legs.len(),
            block
        );
        Ok(Self::receipt("burn", block, &payload))
    }

    async fn query_deposit_events(
        &self,
        pool: &PoolId,
        since_block: u64,
    ) -> Result<Vec<DepositEvent>, LedgerError> {
        let state = self.state.lock().await;
        let Some(pool) = state.pools.get(pool) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let lag = self.config.visibility_lag;
        Ok(pool
            .events
            .iter()
            .filter(|(event, included_at)| event.block >= since_block && *included_at + lag <= now)
            .map(|(event, _)| *event)
            .collect())
    }

    async fn is_known_root(&self, pool: &PoolId, root: &[u8; 32]) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .get(pool)
            .is_some_and(|p| p.roots.is_known(root)))
    }

    async fn withdraw(
        &self,
        pool_id: &PoolId,
        request: WithdrawRequest,
    ) -> Result<TxReceipt, LedgerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let public = &request.public;

        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| RejectReason::UnknownPool(pool_id.clone()))?;

        if public.fee > pool_id.denomination {
            return Err(RejectReason::FeeTooHigh {
                fee: public.fee,
                denomination: pool_id.denomination,
            }
            .into());
        }
        if pool.nullifiers.contains(&public.nullifier_hash) {
            warn!(
                "Rejected withdrawal from {}: nullifier {} already spent",
                pool_id, public.nullifier_hash
            );
            return Err(RejectReason::NullifierSpent(public.nullifier_hash).into());
        }
        if !pool.roots.is_known(&public.root) {
            return Err(RejectReason::UnknownRoot.into());
        }
        if !self.verifier.verify(public, &request.proof) {
            return Err(RejectReason::InvalidProof.into());
        }
        let recipient = state
            .addresses
            .get(&public.recipient)
            .cloned()
            .ok_or(RejectReason::UnknownRecipient(public.recipient))?;

        pool.nullifiers.insert(public.nullifier_hash);

        let payout = pool_id.denomination - public.fee;
        if let Some(account) = state.accounts.get_mut(&recipient) {
            account.balance = account.balance.saturating_add(payout);
        }
        if public.fee > 0 {
            let relayer = state.addresses.get(&public.relayer).cloned();
            if let Some(account) = relayer.and_then(|id| state.accounts.get_mut(&id)) {
                account.balance = account.balance.saturating_add(public.fee);
            }
        }

        state.block += 1;
        info!(
            "Withdrawal of {} from {} to {} (block {})",
            pool_id.denomination, pool_id, recipient, state.block
        );
        Ok(Self::receipt(
            "withdraw",
            state.block,
            public.nullifier_hash.as_bytes(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BurnLeg;
    use crate::settlement::witness::assemble_witness;
    use mintbridge_privacy::{Deposit, Leaf, new_deposit};

    const HEIGHT: usize = 8;

    async fn ledger_with(lag: Duration) -> LocalLedger {
        let ledger = LocalLedger::new(
            LocalLedgerConfig {
                tree_height: HEIGHT,
                root_history_size: ROOT_HISTORY_SIZE,
                visibility_lag: lag,
            },
            Arc::new(MockProofVerifier),
        )
        .unwrap();
        ledger
            .register_institution("alpha", Address([0xa1; 32]), 10_000)
            .await
            .unwrap();
        ledger
            .register_institution("beta", Address([0xb2; 32]), 0)
            .await
            .unwrap();
        ledger.connect("alpha", "beta").await.unwrap();
        ledger
    }

    fn burn(total: u64, legs: &[(u64, &Deposit)]) -> BurnRequest {
        BurnRequest {
            source: "alpha".into(),
            destination: "beta".into(),
            total,
            legs: legs
                .iter()
                .map(|(denomination, deposit)| BurnLeg {
                    denomination: *denomination,
                    commitment: deposit.commitment(),
                })
                .collect(),
        }
    }

    async fn withdraw_request(ledger: &LocalLedger, pool: &PoolId, deposit: &Deposit) -> WithdrawRequest {
        let leaves: Vec<Leaf> = ledger
            .query_deposit_events(pool, 0)
            .await
            .unwrap()
            .iter()
            .map(Leaf::from)
            .collect();
        let witness = assemble_witness(deposit, Address([0xb2; 32]), HEIGHT, &leaves).unwrap();
        WithdrawRequest {
            proof: MockProver::proof_for(&witness.public),
            public: witness.public,
        }
    }

    #[tokio::test]
    async fn test_burn_then_withdraw_credits_recipient() {
        let ledger = ledger_with(Duration::ZERO).await;
        let deposit = new_deposit();
        ledger.burn_and_commit(burn(100, &[(100, &deposit)])).await.unwrap();
        assert_eq!(ledger.balance("alpha").await.unwrap(), 9_900);

        let pool = PoolId::new("beta", 100);
        let request = withdraw_request(&ledger, &pool, &deposit).await;
        ledger.withdraw(&pool, request).await.unwrap();
        assert_eq!(ledger.balance("beta").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let ledger = ledger_with(Duration::ZERO).await;
        let deposit = new_deposit();
        ledger.burn_and_commit(burn(10, &[(10, &deposit)])).await.unwrap();

        let pool = PoolId::new("beta", 10);
        let request = withdraw_request(&ledger, &pool, &deposit).await;
        ledger.withdraw(&pool, request.clone()).await.unwrap();

        let second = ledger.withdraw(&pool, request).await;
        assert_eq!(
            second,
            Err(LedgerError::Rejected(RejectReason::NullifierSpent(
                deposit.nullifier_hash()
            )))
        );
        assert_eq!(ledger.balance("beta").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_burn_is_all_or_nothing() {
        let ledger = ledger_with(Duration::ZERO).await;
        let a = new_deposit();
        let b = new_deposit();

        let result = ledger
            .burn_and_commit(burn(20_000, &[(10_000, &a), (10_000, &b)]))
            .await;
        assert_eq!(
            result,
            Err(LedgerError::Rejected(RejectReason::InsufficientBalance {
                available: 10_000,
                required: 20_000
            }))
        );
        assert_eq!(ledger.balance("alpha").await.unwrap(), 10_000);
        assert_eq!(ledger.deposit_count(&PoolId::new("beta", 10_000)).await, 0);
    }

    #[tokio::test]
    async fn test_burn_rejects_amount_mismatch_and_missing_connection() {
        let ledger = ledger_with(Duration::ZERO).await;
        let deposit = new_deposit();

        let mismatch = ledger.burn_and_commit(burn(11, &[(10, &deposit)])).await;
        assert_eq!(
            mismatch,
            Err(LedgerError::Rejected(RejectReason::AmountMismatch { total: 11, sum: 10 }))
        );

        let mut reverse = burn(10, &[(10, &deposit)]);
        reverse.source = "beta".into();
        reverse.destination = "alpha".into();
        let result = ledger.burn_and_commit(reverse).await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(RejectReason::NotConnected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_root_history_window() {
        let ledger = ledger_with(Duration::ZERO).await;
        let pool = PoolId::new("beta", 1);

        ledger.burn_and_commit(burn(1, &[(1, &new_deposit())])).await.unwrap();
        let first_root = ledger.current_root(&pool).await.unwrap();

        for _ in 0..ROOT_HISTORY_SIZE - 1 {
            ledger.burn_and_commit(burn(1, &[(1, &new_deposit())])).await.unwrap();
        }
        assert!(ledger.is_known_root(&pool, &first_root).await.unwrap());

        ledger.burn_and_commit(burn(1, &[(1, &new_deposit())])).await.unwrap();
        assert!(!ledger.is_known_root(&pool, &first_root).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_root_withdrawal_rejected() {
        let ledger = ledger_with(Duration::ZERO).await;
        let pool = PoolId::new("beta", 1);
        let deposit = new_deposit();

        ledger.burn_and_commit(burn(1, &[(1, &deposit)])).await.unwrap();
        let request = withdraw_request(&ledger, &pool, &deposit).await;

        for _ in 0..ROOT_HISTORY_SIZE {
            ledger.burn_and_commit(burn(1, &[(1, &new_deposit())])).await.unwrap();
        }
        let result = ledger.withdraw(&pool, request).await;
        assert_eq!(result, Err(LedgerError::Rejected(RejectReason::UnknownRoot)));
    }

    #[tokio::test]
    async fn test_forged_proof_rejected() {
        let ledger = ledger_with(Duration::ZERO).await;
        let pool = PoolId::new("beta", 10);
        let deposit = new_deposit();
        ledger.burn_and_commit(burn(10, &[(10, &deposit)])).await.unwrap();

        let mut request = withdraw_request(&ledger, &pool, &deposit).await;
        request.proof = Proof(vec![0u8; 32]);
        let result = ledger.withdraw(&pool, request).await;
        assert_eq!(result, Err(LedgerError::Rejected(RejectReason::InvalidProof)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deposits_hidden_until_lag_elapses() {
        let ledger = ledger_with(Duration::from_secs(2)).await;
        let pool = PoolId::new("beta", 5);
        ledger.burn_and_commit(burn(5, &[(5, &new_deposit())])).await.unwrap();

        assert!(ledger.query_deposit_events(&pool, 0).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert!(ledger.query_deposit_events(&pool, 0).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(ledger.query_deposit_events(&pool, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_capacity_checked_before_burn() {
        let ledger = LocalLedger::new(
            LocalLedgerConfig {
                tree_height: 1,
                ..LocalLedgerConfig::default()
            },
            Arc::new(MockProofVerifier),
        )
        .unwrap();
        ledger.register_institution("alpha", Address([1; 32]), 100).await.unwrap();
        ledger.register_institution("beta", Address([2; 32]), 0).await.unwrap();
        ledger.connect("alpha", "beta").await.unwrap();

        let (a, b, c) = (new_deposit(), new_deposit(), new_deposit());
        let result = ledger
            .burn_and_commit(burn(3, &[(1, &a), (1, &b), (1, &c)]))
            .await;
        assert_eq!(
            result,
            Err(LedgerError::Rejected(RejectReason::PoolFull(PoolId::new("beta", 1))))
        );
        assert_eq!(ledger.balance("alpha").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_duplicate_institution_rejected() {
        let ledger = ledger_with(Duration::ZERO).await;
        let result = ledger
            .register_institution("alpha", Address([0xff; 32]), 0)
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(RejectReason::DuplicateInstitution(_)))
        ));
    }
}
