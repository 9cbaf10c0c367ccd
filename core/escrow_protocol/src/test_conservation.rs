//! Conservation, split fidelity, idempotent release, and settlement
//! retry behaviour.

use std::sync::Arc;

use crate::errors::EscrowError;
use crate::invariants;
use crate::protocol::EscrowProtocol;
use crate::test_support::*;
use crate::types::{ApprovalPolicy, MilestoneState, ProjectStatus};

#[tokio::test]
async fn conservation_holds_after_every_operation() {
    let (protocol, gateway, _clock) = setup();
    gateway.set_yield_bps(1_200);
    let id = funded_project(
        &protocol,
        ApprovalPolicy::FunderOnly,
        &[2_500, 2_500, 5_000],
        1_000_000,
    )
    .await;
    invariants::assert_all(&protocol.project(id).await.unwrap());

    // A second deposit mid-flight accumulates into the running split.
    protocol.deposit(id, &funder(), 333_333).await.unwrap();
    invariants::assert_all(&protocol.project(id).await.unwrap());

    for index in 0..3 {
        protocol.submit(id, &worker(), index, "work".into()).await.unwrap();
        invariants::assert_all(&protocol.project(id).await.unwrap());
        protocol.approve(id, &funder(), index).await.unwrap();
        invariants::assert_all(&protocol.project(id).await.unwrap());
        protocol.release(id, &funder(), index).await.unwrap();
        invariants::assert_all(&protocol.project(id).await.unwrap());
    }

    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.status, ProjectStatus::Completed);
    assert_eq!(p.vault_balance, 0);
    assert_eq!(p.pool_balance, 0);
    // Every deposited unit ended up with the worker.
    assert_eq!(p.totals.released_to_worker, 1_333_333);
}

#[tokio::test]
async fn deposits_split_without_rounding_loss() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 1).await;

    for amount in [7i128, 99, 1_001, 123_457] {
        let receipt = protocol.deposit(id, &funder(), amount).await.unwrap();
        assert_eq!(receipt.vault_portion + receipt.pool_portion, amount);
    }
    assert_eq!(
        protocol.deposit(id, &funder(), 0).await,
        Err(EscrowError::InvalidAmount)
    );
    assert_eq!(
        protocol.deposit(id, &funder(), -10).await,
        Err(EscrowError::InvalidAmount)
    );

    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.total_deposited, 1 + 7 + 99 + 1_001 + 123_457);
    invariants::assert_all(&p);
}

#[tokio::test]
async fn release_is_idempotent_and_loud_on_replay() {
    let (protocol, gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    protocol.release(id, &funder(), 0).await.unwrap();

    let before = protocol.project(id).await.unwrap();
    assert_eq!(
        protocol.release(id, &funder(), 0).await,
        Err(EscrowError::AlreadyReleased)
    );
    let after = protocol.project(id).await.unwrap();
    assert_eq!(before, after, "a replayed release must not move money");
    assert_eq!(gateway.transfers().len(), 1);
}

#[tokio::test]
async fn timed_out_settlement_leaves_a_retryable_intent() {
    let (protocol, gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();

    gateway.fail_transfers(true);
    assert_eq!(
        protocol.release(id, &funder(), 0).await,
        Err(EscrowError::SettlementTimeout)
    );

    // Nothing was committed: balances untouched, intent parked.
    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.vault_balance, 450_000);
    assert!(matches!(
        p.milestones[0].state,
        MilestoneState::ReleasePending { .. }
    ));
    invariants::assert_all(&p);

    // Re-driving the same release resumes the parked intent and pays
    // exactly once.
    gateway.fail_transfers(false);
    let payout = protocol.release(id, &funder(), 0).await.unwrap();
    assert_eq!(payout.vault_share, 500_000);
    assert_eq!(gateway.transfers().len(), 1);

    let p = protocol.project(id).await.unwrap();
    assert!(p.milestones[0].is_released());
    invariants::assert_all(&p);
}

#[tokio::test]
async fn payout_is_frozen_when_the_release_intent_is_recorded() {
    let gateway = GatedGateway::default();
    let clock = ManualClock::at(START);
    let protocol = Arc::new(EscrowProtocol::new(gateway.clone(), clock, platform()));

    let id = protocol
        .create_project(funder(), ApprovalPolicy::FunderOnly, 0, schedule(&[10_000]))
        .await
        .unwrap();
    protocol.deposit(id, &funder(), 1_000_000).await.unwrap();
    protocol.assign_worker(id, &funder(), worker()).await.unwrap();
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();

    // The release records its intent, then parks inside the transfer.
    gateway.hold_transfers();
    let pending = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.release(id, &funder(), 0).await })
    };
    tokio::task::yield_now().await;

    // A top-up lands while the transfer is still in flight.
    protocol.deposit(id, &funder(), 500_000).await.unwrap();
    gateway.release_transfers();

    // The booked payout is the one promised at intent time, exactly what
    // the collaborator was instructed to move.
    let payout = pending.await.unwrap().unwrap();
    assert_eq!(payout.vault_share, 1_000_000);
    assert_eq!(gateway.inner.transfers(), vec![(id, worker(), 1_000_000)]);
    let balance = protocol.withdrawable_balance(&worker()).await;
    assert_eq!(balance.escrow_amount, 1_000_000);

    // The late deposit's split stays on the books, untouched.
    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.status, ProjectStatus::Completed);
    assert_eq!(p.vault_balance, 450_000);
    assert_eq!(p.pool_balance, 50_000);
    invariants::assert_all(&p);
}

#[tokio::test]
async fn duplicate_confirmations_are_absorbed() {
    let (protocol, gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    let payout = protocol.release(id, &funder(), 0).await.unwrap();

    let p = protocol.project(id).await.unwrap();
    let intent = match p.milestones[0].state {
        MilestoneState::Released { intent, .. } => intent,
        ref other => panic!("expected released, got {}", other.name()),
    };

    // The collaborator retries its confirmation: same payout, no new
    // money movement.
    let replay = protocol.confirm_release(id, intent, 0).await.unwrap();
    assert_eq!(replay, payout);
    let after = protocol.project(id).await.unwrap();
    assert_eq!(p, after);
    assert_eq!(gateway.transfers().len(), 1);

    // A confirmation nobody asked for is rejected loudly.
    assert_eq!(
        protocol
            .confirm_release(id, crate::types::IntentId(9_999), 0)
            .await,
        Err(EscrowError::UnknownIntent(9_999))
    );
}

#[tokio::test]
async fn terminal_yield_goes_entirely_to_the_worker() {
    let (protocol, gateway, _clock) = setup();
    gateway.set_yield_bps(800);
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 1_000_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    let payout = protocol.release(id, &funder(), 0).await.unwrap();

    // Pool principal is 100_000; 8% reported yield.
    assert_eq!(payout.worker_yield, 8_000);
    assert_eq!(payout.funder_yield, 0);

    let worker_balance = protocol.withdrawable_balance(&worker()).await;
    assert_eq!(worker_balance.yield_amount, 8_000);
    let funder_balance = protocol.withdrawable_balance(&funder()).await;
    assert_eq!(funder_balance.yield_amount, 0);

    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.totals.yield_credited, 8_000);
    invariants::assert_all(&p);
}

#[tokio::test]
async fn concurrent_dual_approvals_settle_into_one_acceptance() {
    let (protocol, _gateway, _clock) = setup();
    let protocol = Arc::new(protocol);
    let id = funded_project(&protocol, ApprovalPolicy::Dual, &[10_000], 100_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();

    let a = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.approve(id, &funder(), 0).await })
    };
    let b = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.approve(id, &worker(), 0).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let p = protocol.project(id).await.unwrap();
    assert!(matches!(p.milestones[0].state, MilestoneState::Accepted { .. }));
    invariants::assert_all(&p);
}

#[tokio::test]
async fn operations_on_independent_projects_do_not_interfere() {
    let (protocol, _gateway, _clock) = setup();
    let protocol = Arc::new(protocol);
    let first = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 100_000).await;
    let second = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 200_000).await;

    let tasks: Vec<_> = [first, second]
        .into_iter()
        .map(|id| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                protocol.submit(id, &worker(), 0, "w".into()).await.unwrap();
                protocol.approve(id, &funder(), 0).await.unwrap();
                protocol.release(id, &funder(), 0).await.unwrap();
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    for id in [first, second] {
        let p = protocol.project(id).await.unwrap();
        assert_eq!(p.status, ProjectStatus::Completed);
        invariants::assert_all(&p);
    }
}
