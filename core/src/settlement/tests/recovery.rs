use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{ALPHA_SUPPLY, Harness, flaky_harness, harness, policy};
use crate::ledger::LocalLedger;
use crate::settlement::{
    CircuitArtifacts, DenominationSet, FailureKind, LegState, MockProver, Orchestrator,
    OrchestratorConfig, SettlementError, TransferRequest, TransferState, WitnessAssembler,
};
use crate::storage::{MemoryRegistry, TransferJournal};

/// Helpers

fn request(amount: u64) -> TransferRequest {
    TransferRequest {
        source: "alpha".into(),
        destination: "beta".into(),
        amount,
    }
}

/// A new process over the same ledger, journal and operator key
fn restart<P, L>(h: &Harness<P, L>) -> Orchestrator<LocalLedger, MockProver> {
    Orchestrator::new(
        h.ledger.clone(),
        WitnessAssembler::new(
            Arc::new(MockProver::new()),
            Arc::new(CircuitArtifacts::default()),
            super::HEIGHT,
        ),
        Arc::new(MemoryRegistry::new()),
        h.journal.clone(),
        h.sealing_key.clone(),
        DenominationSet::default(),
        OrchestratorConfig {
            visibility: policy(5),
            ..OrchestratorConfig::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_visibility_timeout_settles_without_reburn() {
    let h = harness(MockProver::new(), Duration::from_secs(60), policy(3)).await;

    // --- First pass times out ---
    let report = h.orchestrator.execute(request(15)).await.unwrap();
    assert_eq!(report.legs.len(), 2);
    for leg in &report.legs {
        match &leg.state {
            LegState::Failed { reason } => assert_eq!(reason.kind, FailureKind::VisibilityTimeout),
            other => panic!("unexpected leg state {:?}", other),
        }
    }
    assert_eq!(h.ledger.balance("alpha").await.unwrap(), ALPHA_SUPPLY - 15);

    // --- Ledger catches up, operator retries ---
    tokio::time::advance(Duration::from_secs(60)).await;

    let first = h
        .orchestrator
        .retry_leg(&report.transfer_id, 0)
        .await
        .unwrap();
    assert!(matches!(first.state, LegState::Settled { .. }));
    assert_eq!(first.attempts, 2);

    // One leg settled, one still failed
    let status = h.orchestrator.status(&report.transfer_id).await.unwrap();
    assert!(matches!(status.state, TransferState::Failed { .. }));

    h.orchestrator
        .retry_leg(&report.transfer_id, 1)
        .await
        .unwrap();

    let status = h.orchestrator.status(&report.transfer_id).await.unwrap();
    assert!(status.is_settled());
    assert_eq!(h.ledger.balance("alpha").await.unwrap(), ALPHA_SUPPLY - 15);
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 15);
}

#[tokio::test]
async fn test_settled_leg_is_not_retryable() {
    let h = harness(MockProver::new(), Duration::ZERO, policy(5)).await;
    let report = h.orchestrator.execute(request(10)).await.unwrap();
    assert!(report.is_settled());

    let result = h.orchestrator.retry_leg(&report.transfer_id, 0).await;

    assert!(matches!(
        result,
        Err(SettlementError::LegNotRetryable { state: "settled", .. })
    ));
}

#[tokio::test]
async fn test_uncommitted_leg_is_not_retryable() {
    let h = harness(MockProver::new(), Duration::ZERO, policy(5)).await;
    let report = h
        .orchestrator
        .execute(request(ALPHA_SUPPLY + 5))
        .await
        .unwrap();

    let result = h.orchestrator.retry_leg(&report.transfer_id, 0).await;

    assert!(matches!(
        result,
        Err(SettlementError::LegNotRetryable { state: "uncommitted", .. })
    ));
}

#[tokio::test]
async fn test_journal_never_holds_plaintext_preimages() {
    let h = harness(MockProver::new(), Duration::ZERO, policy(5)).await;

    let prepared = h.orchestrator.prepare(request(3)).unwrap();
    let preimage_hex = hex::encode(prepared.legs()[0].deposit.preimage());
    let secret_hex = hex::encode(prepared.legs()[0].deposit.secret());

    let id = h.orchestrator.commit(prepared).await.unwrap();
    let json = serde_json::to_string(&h.journal_record(&id)).unwrap();

    assert!(!json.contains(&preimage_hex));
    assert!(!json.contains(&secret_hex));
}

#[tokio::test]
async fn test_restarted_orchestrator_finishes_committed_transfer() {
    let h = harness(MockProver::new(), Duration::ZERO, policy(5)).await;

    // --- Commit, then "crash" before settling ---
    let prepared = h.orchestrator.prepare(request(105)).unwrap();
    let id = h.orchestrator.commit(prepared).await.unwrap();
    let restarted = restart(&h);
    drop(h.orchestrator);

    assert_eq!(restarted.unfinished().unwrap(), vec![id.clone()]);
    let status = restarted.status(&id).await.unwrap();
    assert_eq!(status.state, TransferState::AwaitingVisibility);

    let report = restarted.settle(&id).await.unwrap();
    assert!(report.is_settled());
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 105);
    assert!(restarted.unfinished().unwrap().is_empty());
}

#[tokio::test]
async fn test_lost_burn_receipt_is_confirmed_by_settlement() {
    let h = flaky_harness(MockProver::new(), Duration::ZERO, policy(5)).await;
    h.client.lost_burn_receipts.store(1, Ordering::SeqCst);

    // --- Burn lands, its receipt does not ---
    let prepared = h.orchestrator.prepare(request(100)).unwrap();
    let id = h.orchestrator.commit(prepared).await.unwrap();
    assert_eq!(h.ledger.balance("alpha").await.unwrap(), ALPHA_SUPPLY - 100);

    let status = h.orchestrator.status(&id).await.unwrap();
    assert!(status.commit_receipt.is_none());
    assert!(status.commit_unconfirmed);
    assert_eq!(status.state, TransferState::AwaitingVisibility);
    assert_eq!(h.orchestrator.unfinished().unwrap(), vec![id.clone()]);

    // --- Deposit events confirm it ---
    let report = h.orchestrator.settle(&id).await.unwrap();
    assert!(report.is_settled());
    assert_eq!(h.ledger.balance("alpha").await.unwrap(), ALPHA_SUPPLY - 100);
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 100);
    assert!(h.orchestrator.unfinished().unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_confirms_transfer_left_committing() {
    let h = harness(MockProver::new(), Duration::ZERO, policy(5)).await;

    // --- Burn lands but the process dies before journaling the receipt ---
    let prepared = h.orchestrator.prepare(request(30)).unwrap();
    let id = h.orchestrator.commit(prepared).await.unwrap();
    let mut record = h.journal_record(&id);
    record.commit_receipt = None;
    record.state = TransferState::Committing;
    h.journal.save(&record).unwrap();
    let restarted = restart(&h);
    drop(h.orchestrator);

    assert_eq!(restarted.unfinished().unwrap(), vec![id.clone()]);
    assert_eq!(
        restarted.status(&id).await.unwrap().state,
        TransferState::AwaitingVisibility
    );

    let report = restarted.settle(&id).await.unwrap();
    assert!(report.is_settled());
    assert!(report.commit_unconfirmed);
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 30);
}

#[tokio::test]
async fn test_lost_withdraw_receipt_settles_on_retry() {
    let h = flaky_harness(MockProver::new(), Duration::ZERO, policy(5)).await;
    h.client.lost_withdraw_receipts.store(1, Ordering::SeqCst);

    // --- Withdrawal lands, its receipt does not ---
    let report = h.orchestrator.execute(request(1000)).await.unwrap();
    assert_eq!(report.legs.len(), 1);
    match &report.legs[0].state {
        LegState::Failed { reason } => assert_eq!(reason.kind, FailureKind::LedgerUnavailable),
        other => panic!("unexpected leg state {:?}", other),
    }
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 1000);
    assert!(h.journal_record(&report.transfer_id).legs[0].withdrawal_submitted);

    // --- Retry finds the leg's own nullifier spent ---
    let leg = h
        .orchestrator
        .retry_leg(&report.transfer_id, 0)
        .await
        .unwrap();
    assert_eq!(leg.state, LegState::Settled { receipt: None });
    assert_eq!(leg.attempts, 2);

    let status = h.orchestrator.status(&report.transfer_id).await.unwrap();
    assert!(status.is_settled());
    assert_eq!(h.ledger.balance("beta").await.unwrap(), 1000);
}
