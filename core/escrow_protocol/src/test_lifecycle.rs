//! End-to-end milestone lifecycle tests: submission, approval policies,
//! rejection loops, penalties, and authorization guards.

use crate::errors::EscrowError;
use crate::invariants;
use crate::test_support::*;
use crate::types::{
    AccountId, ApprovalPolicy, MilestoneState, ProjectStatus, BPS_DENOMINATOR, MAX_NOTE_LEN,
    SECONDS_PER_DAY,
};

#[tokio::test]
async fn full_funder_only_lifecycle_pays_both_milestones() {
    let (protocol, gateway, _clock) = setup();
    gateway.set_yield_bps(800);
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[2_000, 8_000], 1_000_000).await;

    protocol.submit(id, &worker(), 0, "sprint report".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    let first = protocol.release(id, &funder(), 0).await.unwrap();
    assert_eq!(first.vault_share, 200_000);
    assert_eq!(first.worker_yield, 0);

    protocol.submit(id, &worker(), 1, "final delivery".into()).await.unwrap();
    protocol.approve(id, &funder(), 1).await.unwrap();
    let last = protocol.release(id, &funder(), 1).await.unwrap();
    // Remaining vault 700_000 plus the full 100_000 pool principal.
    assert_eq!(last.vault_share, 800_000);
    // 8% of the pool principal, all of it to the worker.
    assert_eq!(last.worker_yield, 8_000);
    assert_eq!(last.funder_yield, 0);

    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.status, ProjectStatus::Completed);
    invariants::assert_all(&p);

    let balance = protocol.withdrawable_balance(&worker()).await;
    assert_eq!(balance.escrow_amount, 1_000_000);
    assert_eq!(balance.yield_amount, 8_000);
    assert_eq!(balance.total, 1_008_000);

    // The collaborator was instructed to pay exactly twice.
    let transfers = gateway.transfers();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].2, 200_000);
    assert_eq!(transfers[1].2, 808_000);
}

#[tokio::test]
async fn dual_approval_requires_both_parties_in_any_order() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::Dual, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();

    // Funder alone is not enough.
    protocol.approve(id, &funder(), 0).await.unwrap();
    assert_eq!(
        protocol.release(id, &funder(), 0).await,
        Err(EscrowError::illegal_state("accepted", "submitted"))
    );

    // Worker's acknowledgement completes the set.
    protocol.approve(id, &worker(), 0).await.unwrap();
    let p = protocol.project(id).await.unwrap();
    assert!(matches!(p.milestones[0].state, MilestoneState::Accepted { .. }));
    protocol.release(id, &funder(), 0).await.unwrap();
}

#[tokio::test]
async fn dual_approval_worker_first_also_gates_correctly() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::Dual, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();

    protocol.approve(id, &worker(), 0).await.unwrap();
    assert!(matches!(
        protocol.release(id, &funder(), 0).await,
        Err(EscrowError::IllegalState { .. })
    ));
    protocol.approve(id, &funder(), 0).await.unwrap();
    protocol.release(id, &funder(), 0).await.unwrap();
}

#[tokio::test]
async fn repeated_approvals_are_noops() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::Dual, &[10_000], 500_000).await;
    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();

    protocol.approve(id, &funder(), 0).await.unwrap();
    // A retried call from the same party must not error or double-record.
    protocol.approve(id, &funder(), 0).await.unwrap();
    let p = protocol.project(id).await.unwrap();
    match &p.milestones[0].state {
        MilestoneState::Submitted { approvals, .. } => assert_eq!(approvals.len(), 1),
        other => panic!("expected submitted, got {}", other.name()),
    }

    protocol.approve(id, &worker(), 0).await.unwrap();
    // Acknowledgements arriving after acceptance are also no-ops.
    protocol.approve(id, &worker(), 0).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
}

#[tokio::test]
async fn rejection_requires_reason_and_allows_resubmission() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 100_000).await;
    protocol.submit(id, &worker(), 0, "v1".into()).await.unwrap();

    assert_eq!(
        protocol.reject(id, &funder(), 0, "  ".into()).await,
        Err(EscrowError::MissingReason)
    );
    protocol.reject(id, &funder(), 0, "missing tests".into()).await.unwrap();

    let p = protocol.project(id).await.unwrap();
    match &p.milestones[0].state {
        MilestoneState::Rejected { reason, .. } => assert_eq!(reason, "missing tests"),
        other => panic!("expected rejected, got {}", other.name()),
    }

    // The worker may resubmit and the flow continues normally.
    protocol.submit(id, &worker(), 0, "v2".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    protocol.release(id, &funder(), 0).await.unwrap();
}

#[tokio::test]
async fn late_submission_applies_the_per_milestone_curve() {
    let (protocol, _gateway, clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[2_000, 8_000], 1_000_000).await;

    // Three days past the deadline with a 5%/day curve capped at 15%.
    clock.set(DEADLINE + 3 * SECONDS_PER_DAY);
    protocol.submit(id, &worker(), 0, "late work".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    let payout = protocol.release(id, &funder(), 0).await.unwrap();

    assert_eq!(payout.vault_share, 170_000);
    let p = protocol.project(id).await.unwrap();
    // The 30_000 deduction is retained by the platform: not refunded to
    // the funder, not paid to the worker.
    assert_eq!(p.totals.platform_retained, 30_000);
    assert_eq!(p.totals.released_to_worker, 170_000);
    invariants::assert_all(&p);

    let platform_balance = protocol.withdrawable_balance(&platform()).await;
    assert_eq!(platform_balance.escrow_amount, 30_000);
}

#[tokio::test]
async fn schedule_must_sum_to_one_hundred_percent() {
    let (protocol, _gateway, _clock) = setup();
    let err = protocol
        .create_project(funder(), ApprovalPolicy::FunderOnly, 0, schedule(&[2_000, 7_500]))
        .await
        .unwrap_err();
    assert_eq!(err, EscrowError::PercentageMismatch { sum_bps: 9_500 });
}

#[tokio::test]
async fn authorization_guards_hold() {
    let (protocol, _gateway, _clock) = setup();
    let stranger = AccountId::new("stranger");
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 100_000).await;

    assert_eq!(
        protocol.submit(id, &funder(), 0, "nope".into()).await,
        Err(EscrowError::NotAssignedWorker)
    );
    protocol.submit(id, &worker(), 0, "ok".into()).await.unwrap();
    assert_eq!(
        protocol.approve(id, &stranger, 0).await,
        Err(EscrowError::NotFunder)
    );
    // Under funder-only policy the worker cannot self-approve.
    assert_eq!(
        protocol.approve(id, &worker(), 0).await,
        Err(EscrowError::NotFunder)
    );
    assert_eq!(
        protocol.reject(id, &worker(), 0, "no".into()).await,
        Err(EscrowError::NotFunder)
    );
    assert_eq!(
        protocol.deposit(id, &stranger, 1_000).await,
        Err(EscrowError::NotFunder)
    );
}

#[tokio::test]
async fn illegal_transitions_are_rejected_without_mutation() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 100_000).await;

    // Approve before submission.
    assert!(matches!(
        protocol.approve(id, &funder(), 0).await,
        Err(EscrowError::IllegalState { .. })
    ));
    // Release before acceptance.
    assert!(matches!(
        protocol.release(id, &funder(), 0).await,
        Err(EscrowError::IllegalState { .. })
    ));

    protocol.submit(id, &worker(), 0, "w".into()).await.unwrap();
    // Double submission.
    assert!(matches!(
        protocol.submit(id, &worker(), 0, "again".into()).await,
        Err(EscrowError::IllegalState { .. })
    ));

    let p = protocol.project(id).await.unwrap();
    invariants::assert_all(&p);
}

#[tokio::test]
async fn releases_follow_the_schedule_order() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[5_000, 5_000], 1_000_000).await;

    protocol.submit(id, &worker(), 1, "second first".into()).await.unwrap();
    protocol.approve(id, &funder(), 1).await.unwrap();
    assert!(matches!(
        protocol.release(id, &funder(), 1).await,
        Err(EscrowError::IllegalState { .. })
    ));

    protocol.submit(id, &worker(), 0, "first".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    protocol.release(id, &funder(), 0).await.unwrap();
    protocol.release(id, &funder(), 1).await.unwrap();

    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn platform_fee_is_withheld_from_the_payable() {
    let (protocol, _gateway, _clock) = setup();
    // 1% platform fee.
    let id = protocol
        .create_project(funder(), ApprovalPolicy::FunderOnly, 100, schedule(&[10_000]))
        .await
        .unwrap();
    protocol.deposit(id, &funder(), 1_000_000).await.unwrap();
    protocol.assign_worker(id, &funder(), worker()).await.unwrap();

    protocol.submit(id, &worker(), 0, "done".into()).await.unwrap();
    protocol.approve(id, &funder(), 0).await.unwrap();
    let payout = protocol.release(id, &funder(), 0).await.unwrap();

    assert_eq!(payout.platform_fee, 10_000);
    assert_eq!(payout.vault_share, 990_000);
    let p = protocol.project(id).await.unwrap();
    assert_eq!(p.totals.platform_retained, 10_000);
    invariants::assert_all(&p);
}

#[tokio::test]
async fn fee_cannot_exceed_one_hundred_percent() {
    let (protocol, _gateway, _clock) = setup();
    assert_eq!(
        protocol
            .create_project(
                funder(),
                ApprovalPolicy::FunderOnly,
                BPS_DENOMINATOR + 1,
                schedule(&[10_000]),
            )
            .await,
        Err(EscrowError::InvalidFee)
    );
}

#[tokio::test]
async fn oversized_notes_are_rejected() {
    let (protocol, _gateway, _clock) = setup();
    let id = funded_project(&protocol, ApprovalPolicy::FunderOnly, &[10_000], 100_000).await;
    let long = "x".repeat(MAX_NOTE_LEN + 1);

    assert_eq!(
        protocol.submit(id, &worker(), 0, long.clone()).await,
        Err(EscrowError::NoteTooLong(MAX_NOTE_LEN))
    );
    protocol.submit(id, &worker(), 0, "ok".into()).await.unwrap();
    assert_eq!(
        protocol.reject(id, &funder(), 0, long).await,
        Err(EscrowError::NoteTooLong(MAX_NOTE_LEN))
    );
}
