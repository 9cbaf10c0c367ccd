//! Public operations of the escrow core.
//!
//! This module contains only guards, state transitions, and journal
//! writes — the arithmetic lives in [`crate::split`], [`crate::penalty`],
//! and [`crate::settlement`], and all records are owned by the
//! [`LedgerStore`].
//!
//! Every mutating operation follows the same discipline:
//!
//! 1. take the project's mutex,
//! 2. check the cancellation guard before anything else,
//! 3. validate caller and state (a failed validation mutates nothing),
//! 4. mutate and journal,
//! 5. release the lock *before* any settlement-gateway call.
//!
//! Two-phase operations (`deposit`, `release`) record their intent under
//! the lock and apply the external confirmation idempotently, so a retry
//! or an out-of-order confirmation can never double-spend.

use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{EscrowError, Result};
use crate::events::JournalKind;
use crate::ledger::{conservation_holds, LedgerStore};
use crate::settlement::{plan_payout, Clock, SettlementGateway};
use crate::split::split;
use crate::types::{
    AccountId, Approval, ApprovalPolicy, Deposit, DepositReceipt, IntentId, Milestone,
    MilestoneSpec, MilestoneState, Party, Project, ProjectId, ProjectStatus,
    WithdrawalBreakdown, BPS_DENOMINATOR, MAX_NOTE_LEN,
};

/// Default patience for a single settlement-collaborator call.
const DEFAULT_SETTLEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// The escrow and settlement core.
///
/// Generic over the settlement collaborator and the time source so the
/// backend can plug in its HTTP client and tests can script both.
pub struct EscrowProtocol<G, C> {
    ledger: LedgerStore,
    gateway: G,
    clock: C,
    settlement_timeout: Duration,
}

impl<G: SettlementGateway, C: Clock> EscrowProtocol<G, C> {
    pub fn new(gateway: G, clock: C, platform: AccountId) -> Self {
        Self {
            ledger: LedgerStore::new(platform),
            gateway,
            clock,
            settlement_timeout: DEFAULT_SETTLEMENT_TIMEOUT,
        }
    }

    pub fn with_settlement_timeout(mut self, timeout: Duration) -> Self {
        self.settlement_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    // ── Project setup ────────────────────────────────────────────────

    /// Create a project with its full milestone schedule fixed up front.
    ///
    /// The schedule must sum to exactly 100 % (`PercentageMismatch`
    /// otherwise) and is immutable once the first deposit lands.
    pub async fn create_project(
        &self,
        funder: AccountId,
        policy: ApprovalPolicy,
        platform_fee_bps: u32,
        schedule: Vec<MilestoneSpec>,
    ) -> Result<ProjectId> {
        if platform_fee_bps > BPS_DENOMINATOR {
            return Err(EscrowError::InvalidFee);
        }
        let sum_bps: u32 = schedule.iter().map(|m| m.percentage_bps).sum();
        if sum_bps != BPS_DENOMINATOR || schedule.is_empty() {
            return Err(EscrowError::PercentageMismatch { sum_bps });
        }
        for spec in &schedule {
            if spec.percentage_bps == 0 {
                return Err(EscrowError::InvalidAmount);
            }
            if spec.penalty.cap_bps > BPS_DENOMINATOR {
                return Err(EscrowError::InvalidFee);
            }
        }

        let id = self.ledger.next_project_id();
        let now = self.clock.now();
        let milestones = schedule
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Milestone {
                index: i as u32,
                percentage_bps: spec.percentage_bps,
                deadline: spec.deadline,
                penalty: spec.penalty,
                state: MilestoneState::Pending,
            })
            .collect();

        let project = Project {
            id,
            funder: funder.clone(),
            worker: None,
            policy,
            platform_fee_bps,
            status: ProjectStatus::Open,
            total_deposited: 0,
            vault_balance: 0,
            pool_balance: 0,
            totals: Default::default(),
            cancelled_at: None,
            milestones,
            deposits: Vec::new(),
        };
        self.ledger.insert(project).await;
        self.ledger
            .record(id, JournalKind::ProjectCreated, Some(funder), None, None, None, now)
            .await;
        info!(project = %id, "project created");
        Ok(id)
    }

    /// Assign the worker who will perform the milestones. Funder only.
    pub async fn assign_worker(
        &self,
        id: ProjectId,
        caller: &AccountId,
        worker: AccountId,
    ) -> Result<()> {
        let cell = self.ledger.cell(id).await?;
        let mut p = cell.lock().await;
        require_live(&p)?;
        require_funder(&p, caller)?;
        if p.status != ProjectStatus::Open {
            return Err(EscrowError::illegal_state("open", format!("{:?}", p.status)));
        }
        p.worker = Some(worker.clone());
        p.status = ProjectStatus::Assigned;
        let now = self.clock.now();
        self.ledger
            .record(id, JournalKind::WorkerAssigned, Some(worker), None, None, None, now)
            .await;
        Ok(())
    }

    // ── Funding ──────────────────────────────────────────────────────

    /// Deposit funds into the project.
    ///
    /// The external collaborator custodies the money; the core only
    /// records the resulting 90/10 split. A confirmation that arrives
    /// after the project reached a terminal status is booked straight
    /// back to the funder rather than silently dropped.
    pub async fn deposit(
        &self,
        id: ProjectId,
        caller: &AccountId,
        amount: i128,
    ) -> Result<DepositReceipt> {
        let cell = self.ledger.cell(id).await?;
        {
            let p = cell.lock().await;
            require_live(&p)?;
            require_funder(&p, caller)?;
            if amount <= 0 {
                return Err(EscrowError::InvalidAmount);
            }
        }

        // Intent is validated; hand the money to the collaborator with
        // no lock held.
        let settlement_ref = self
            .with_timeout(self.gateway.deposit_funds(id, caller, amount))
            .await?;

        let mut p = cell.lock().await;
        let now = self.clock.now();
        if p.status.is_terminal() {
            // Cancellation (or completion) won the race: record the
            // deposit and refund it in the same breath.
            p.total_deposited += amount;
            p.totals.refunded_to_funder += amount;
            let funder = p.funder.clone();
            self.ledger.credit_escrow(&funder, amount).await;
            self.ledger
                .record(
                    id,
                    JournalKind::DepositRefunded,
                    Some(funder.clone()),
                    None,
                    Some(amount),
                    Some(settlement_ref.clone()),
                    now,
                )
                .await;
            debug_assert!(conservation_holds(&p));
            drop(p);

            // The collaborator just took custody of this money; tell it
            // to send it back, the same way `cancel` does. A failure is
            // logged and retried out of band.
            if let Err(e) = self
                .with_timeout(self.gateway.refund_to_funder(id, &funder, amount))
                .await
            {
                warn!(project = %id, error = %e, "refund transfer not confirmed");
            }
            return Ok(DepositReceipt {
                project_id: id,
                amount,
                vault_portion: 0,
                pool_portion: 0,
                settlement_ref,
            });
        }

        let parts = split(amount)?;
        p.total_deposited += amount;
        p.vault_balance += parts.vault;
        p.pool_balance += parts.pool;
        p.deposits.push(Deposit {
            amount,
            vault_portion: parts.vault,
            pool_portion: parts.pool,
            at: now,
        });
        debug_assert!(conservation_holds(&p));
        self.ledger
            .record(
                id,
                JournalKind::DepositRecorded,
                Some(caller.clone()),
                None,
                Some(amount),
                Some(settlement_ref.clone()),
                now,
            )
            .await;
        info!(project = %id, amount, vault = parts.vault, pool = parts.pool, "deposit recorded");

        Ok(DepositReceipt {
            project_id: id,
            amount,
            vault_portion: parts.vault,
            pool_portion: parts.pool,
            settlement_ref,
        })
    }

    // ── Milestone lifecycle ──────────────────────────────────────────

    /// Submit evidence for a milestone. Assigned worker only; legal from
    /// `Pending` or `Rejected`. Lateness is measured here and fixes the
    /// penalty percentage for the eventual payout.
    pub async fn submit(
        &self,
        id: ProjectId,
        caller: &AccountId,
        index: u32,
        evidence: String,
    ) -> Result<()> {
        let cell = self.ledger.cell(id).await?;
        let mut p = cell.lock().await;
        require_live(&p)?;
        require_worker(&p, caller)?;
        if evidence.len() > MAX_NOTE_LEN {
            return Err(EscrowError::NoteTooLong(MAX_NOTE_LEN));
        }

        let now = self.clock.now();
        let penalty_bps;
        {
            let m = milestone_mut(&mut p, id, index)?;
            match m.state {
                MilestoneState::Pending | MilestoneState::Rejected { .. } => {}
                ref other => {
                    return Err(EscrowError::illegal_state("pending or rejected", other.name()))
                }
            }
            let lateness = now.saturating_sub(m.deadline);
            penalty_bps = m.penalty.penalty_bps(lateness);
            m.state = MilestoneState::Submitted {
                submitted_at: now,
                evidence,
                penalty_bps,
                approvals: Vec::new(),
            };
        }
        if p.status == ProjectStatus::Assigned {
            p.status = ProjectStatus::InProgress;
        }
        if penalty_bps > 0 {
            warn!(project = %id, milestone = index, penalty_bps, "late submission");
        }
        self.ledger
            .record(
                id,
                JournalKind::MilestoneSubmitted,
                Some(caller.clone()),
                Some(index),
                None,
                None,
                now,
            )
            .await;
        Ok(())
    }

    /// Record an acknowledgement on a submitted milestone.
    ///
    /// Under [`ApprovalPolicy::FunderOnly`] the funder's approval marks
    /// the milestone accepted; under [`ApprovalPolicy::Dual`] both the
    /// funder and the worker must approve, in either order. A repeated
    /// approval from the same party — including one arriving after the
    /// milestone already moved on — is a success no-op, so retried calls
    /// cannot corrupt state.
    pub async fn approve(&self, id: ProjectId, caller: &AccountId, index: u32) -> Result<()> {
        let cell = self.ledger.cell(id).await?;
        let mut p = cell.lock().await;
        require_live(&p)?;
        let party = resolve_party(&p, caller)?;
        if p.policy == ApprovalPolicy::FunderOnly && party == Party::Worker {
            return Err(EscrowError::NotFunder);
        }

        let now = self.clock.now();
        let policy = p.policy;
        let accepted;
        {
            let m = milestone_mut(&mut p, id, index)?;
            match &mut m.state {
                MilestoneState::Submitted {
                    submitted_at,
                    penalty_bps,
                    approvals,
                    ..
                } => {
                    if approvals.iter().any(|a| a.party == party) {
                        return Ok(());
                    }
                    approvals.push(Approval { party, at: now });
                    let complete = match policy {
                        ApprovalPolicy::FunderOnly => {
                            approvals.iter().any(|a| a.party == Party::Funder)
                        }
                        ApprovalPolicy::Dual => {
                            approvals.iter().any(|a| a.party == Party::Funder)
                                && approvals.iter().any(|a| a.party == Party::Worker)
                        }
                    };
                    if complete {
                        m.state = MilestoneState::Accepted {
                            submitted_at: *submitted_at,
                            penalty_bps: *penalty_bps,
                            accepted_at: now,
                        };
                    }
                    accepted = complete;
                }
                // The party's acknowledgement was already consumed on the
                // way to these states; a retry is not an error.
                MilestoneState::Accepted { .. }
                | MilestoneState::ReleasePending { .. }
                | MilestoneState::Released { .. } => return Ok(()),
                ref other => {
                    return Err(EscrowError::illegal_state("submitted", other.name()))
                }
            }
        }
        self.ledger
            .record(
                id,
                JournalKind::MilestoneApproved,
                Some(caller.clone()),
                Some(index),
                None,
                None,
                now,
            )
            .await;
        if accepted {
            self.ledger
                .record(id, JournalKind::MilestoneAccepted, None, Some(index), None, None, now)
                .await;
        }
        Ok(())
    }

    /// Send a submitted milestone back to the worker with a mandatory
    /// reason. Funder only. The submission timestamp is discarded; a
    /// resubmission is stamped (and penalised) afresh.
    pub async fn reject(
        &self,
        id: ProjectId,
        caller: &AccountId,
        index: u32,
        reason: String,
    ) -> Result<()> {
        let cell = self.ledger.cell(id).await?;
        let mut p = cell.lock().await;
        require_live(&p)?;
        require_funder(&p, caller)?;
        if reason.trim().is_empty() {
            return Err(EscrowError::MissingReason);
        }
        if reason.len() > MAX_NOTE_LEN {
            return Err(EscrowError::NoteTooLong(MAX_NOTE_LEN));
        }

        let now = self.clock.now();
        {
            let m = milestone_mut(&mut p, id, index)?;
            match m.state {
                MilestoneState::Submitted { .. } => {}
                ref other => return Err(EscrowError::illegal_state("submitted", other.name())),
            }
            m.state = MilestoneState::Rejected {
                reason: reason.clone(),
                rejected_at: now,
            };
        }
        self.ledger
            .record(
                id,
                JournalKind::MilestoneRejected,
                Some(caller.clone()),
                Some(index),
                None,
                Some(reason),
                now,
            )
            .await;
        Ok(())
    }

    // ── Release (two-phase) ──────────────────────────────────────────

    /// Release a fully accepted milestone.
    ///
    /// Phase one records a `ReleasePending` intent under the lock; phase
    /// two queries the pool yield (terminal milestone only) and instructs
    /// the collaborator to pay, with no lock held; phase three applies
    /// the confirmation exactly once. A `SettlementTimeout` leaves the
    /// milestone re-drivable: calling `release` again resumes the same
    /// intent. A second call after success returns `AlreadyReleased`
    /// without touching any balance.
    pub async fn release(
        &self,
        id: ProjectId,
        caller: &AccountId,
        index: u32,
    ) -> Result<WithdrawalBreakdown> {
        let cell = self.ledger.cell(id).await?;

        // Phase 1: validate and record (or resume) the intent. The plan
        // is computed here, under the lock, and frozen into the intent;
        // later phases only ever apply it.
        let (intent, worker, plan) = {
            let mut p = cell.lock().await;
            require_live(&p)?;
            require_funder(&p, caller)?;
            let worker = p.worker.clone().ok_or(EscrowError::NotAssignedWorker)?;
            if index as usize >= p.milestones.len() {
                return Err(EscrowError::MilestoneNotFound { project: id, index });
            }

            let now = self.clock.now();
            let (intent, plan, fresh) = match p.milestones[index as usize].state {
                MilestoneState::Released { .. } => return Err(EscrowError::AlreadyReleased),
                MilestoneState::ReleasePending { intent, plan, .. } => (intent, plan, false),
                MilestoneState::Accepted {
                    submitted_at,
                    penalty_bps,
                    accepted_at,
                } => {
                    if !p.milestones[..index as usize].iter().all(Milestone::is_released) {
                        return Err(EscrowError::illegal_state(
                            "all prior milestones released",
                            "unreleased predecessor",
                        ));
                    }
                    let intent = self.ledger.next_intent_id();
                    let plan = plan_payout(&p, index, penalty_bps);
                    p.milestones[index as usize].state = MilestoneState::ReleasePending {
                        submitted_at,
                        penalty_bps,
                        accepted_at,
                        intent,
                        plan,
                    };
                    (intent, plan, true)
                }
                ref other => return Err(EscrowError::illegal_state("accepted", other.name())),
            };
            if fresh {
                self.ledger
                    .record(
                        id,
                        JournalKind::ReleaseIntent,
                        Some(caller.clone()),
                        Some(index),
                        Some(plan.gross),
                        None,
                        now,
                    )
                    .await;
            }
            (intent, worker, plan)
        };

        // Phase 2: external collaborator, lock-free. Failures leave the
        // intent pending and this call re-drivable.
        let yield_bps = if plan.terminal {
            self.with_timeout(self.gateway.query_pool_yield_bps(id)).await?
        } else {
            0
        };
        self.with_timeout(self.gateway.transfer_to_worker(
            id,
            &worker,
            plan.vault_share + plan.worker_yield(yield_bps),
        ))
        .await?;

        // Phase 3: commit.
        self.confirm_release(id, intent, yield_bps).await
    }

    /// Apply a settlement confirmation for a pending release.
    ///
    /// Idempotent: confirming an already released intent returns the
    /// recorded payout; an unknown intent is rejected; a confirmation
    /// against a cancelled project is refused — cancellation wins unless
    /// the release was already committed.
    pub async fn confirm_release(
        &self,
        id: ProjectId,
        intent: IntentId,
        yield_bps: u32,
    ) -> Result<WithdrawalBreakdown> {
        let cell = self.ledger.cell(id).await?;
        let mut p = cell.lock().await;

        // Duplicate confirmation of a committed release: report success.
        for m in &p.milestones {
            if let MilestoneState::Released {
                intent: done, payout, ..
            } = m.state
            {
                if done == intent {
                    return Ok(payout);
                }
            }
        }

        if p.status == ProjectStatus::Cancelled {
            return Err(EscrowError::illegal_state("active project", "cancelled"));
        }

        let index = p
            .milestones
            .iter()
            .position(|m| {
                matches!(m.state, MilestoneState::ReleasePending { intent: i, .. } if i == intent)
            })
            .ok_or(EscrowError::UnknownIntent(intent.0))? as u32;

        let now = self.clock.now();
        let (penalty_bps, submitted_at, accepted_at, plan) =
            match p.milestones[index as usize].state {
                MilestoneState::ReleasePending {
                    submitted_at,
                    penalty_bps,
                    accepted_at,
                    plan,
                    ..
                } => (penalty_bps, submitted_at, accepted_at, plan),
                _ => unreachable!("position() matched ReleasePending"),
            };

        // Apply the plan frozen at intent time. Balances can only have
        // grown since then (deposits; release order blocks other draws),
        // so the draws recorded in the plan are still covered.
        let worker_yield = plan.worker_yield(yield_bps);
        let payout = WithdrawalBreakdown {
            vault_share: plan.vault_share,
            worker_yield,
            platform_fee: plan.platform_fee,
            funder_yield: 0,
        };

        p.vault_balance -= plan.vault_draw;
        p.pool_balance -= plan.pool_draw;
        p.totals.released_to_worker += plan.vault_share;
        p.totals.platform_retained += plan.penalty + plan.platform_fee;
        p.totals.yield_credited += worker_yield;
        p.milestones[index as usize].state = MilestoneState::Released {
            submitted_at,
            penalty_bps,
            accepted_at,
            released_at: now,
            intent,
            payout,
        };
        debug_assert!(conservation_holds(&p));

        let worker = p.worker.clone().ok_or(EscrowError::NotAssignedWorker)?;
        let platform = self.ledger.platform_account().clone();
        self.ledger.credit_escrow(&worker, plan.vault_share).await;
        self.ledger.credit_yield(&worker, worker_yield).await;
        self.ledger
            .credit_escrow(&platform, plan.penalty + plan.platform_fee)
            .await;
        self.ledger
            .record(
                id,
                JournalKind::MilestoneReleased,
                Some(worker),
                Some(index),
                Some(plan.vault_share + worker_yield),
                None,
                now,
            )
            .await;
        info!(
            project = %id,
            milestone = index,
            vault_share = plan.vault_share,
            worker_yield,
            "milestone released"
        );

        if plan.terminal {
            p.status = ProjectStatus::Completed;
            self.ledger
                .record(id, JournalKind::ProjectCompleted, None, None, None, None, now)
                .await;
        }
        Ok(payout)
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Terminate the project early. Funder only; mandatory reason.
    ///
    /// Refunds the current vault balance to the funder; the pool balance
    /// is forfeited to the platform — deliberately asymmetric, per the
    /// stated policy. Every milestone not yet released becomes
    /// permanently unpayable.
    pub async fn cancel(&self, id: ProjectId, caller: &AccountId, reason: String) -> Result<()> {
        let cell = self.ledger.cell(id).await?;
        let (funder, refund) = {
            let mut p = cell.lock().await;
            require_funder(&p, caller)?;
            if reason.trim().is_empty() {
                return Err(EscrowError::MissingReason);
            }
            if p.status.is_terminal() {
                return Err(EscrowError::illegal_state(
                    "active project",
                    format!("{:?}", p.status),
                ));
            }

            let now = self.clock.now();
            let refund = p.vault_balance;
            let forfeit = p.pool_balance;
            p.vault_balance = 0;
            p.pool_balance = 0;
            p.totals.refunded_to_funder += refund;
            p.totals.forfeited_to_platform += forfeit;
            p.status = ProjectStatus::Cancelled;
            p.cancelled_at = Some(now);
            debug_assert!(conservation_holds(&p));

            let funder = p.funder.clone();
            let platform = self.ledger.platform_account().clone();
            self.ledger.credit_escrow(&funder, refund).await;
            self.ledger.credit_escrow(&platform, forfeit).await;
            self.ledger
                .record(
                    id,
                    JournalKind::ProjectCancelled,
                    Some(funder.clone()),
                    None,
                    Some(refund),
                    Some(reason),
                    now,
                )
                .await;
            info!(project = %id, refund, forfeit, "project cancelled");
            (funder, refund)
        };

        // Ledger state is committed; the physical refund is the
        // collaborator's job and a failure here is retried out of band.
        if refund > 0 {
            if let Err(e) = self
                .with_timeout(self.gateway.refund_to_funder(id, &funder, refund))
                .await
            {
                warn!(project = %id, error = %e, "refund transfer not confirmed");
            }
        }
        Ok(())
    }

    // ── Read projections ─────────────────────────────────────────────

    pub async fn project(&self, id: ProjectId) -> Result<Project> {
        self.ledger.project(id).await
    }

    pub async fn withdrawable_balance(&self, account: &AccountId) -> crate::types::WithdrawableBalance {
        self.ledger.withdrawable(account).await
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.settlement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EscrowError::SettlementTimeout),
        }
    }
}

// ── Guards ───────────────────────────────────────────────────────────

/// Cancellation (and completion) guard, checked before everything else
/// so a cancellation racing an in-flight call is observed consistently.
fn require_live(p: &Project) -> Result<()> {
    if p.status.is_terminal() {
        return Err(EscrowError::illegal_state(
            "active project",
            format!("{:?}", p.status),
        ));
    }
    Ok(())
}

fn require_funder(p: &Project, caller: &AccountId) -> Result<()> {
    if *caller != p.funder {
        return Err(EscrowError::NotFunder);
    }
    Ok(())
}

fn require_worker(p: &Project, caller: &AccountId) -> Result<()> {
    match &p.worker {
        Some(w) if w == caller => Ok(()),
        _ => Err(EscrowError::NotAssignedWorker),
    }
}

fn resolve_party(p: &Project, caller: &AccountId) -> Result<Party> {
    if *caller == p.funder {
        Ok(Party::Funder)
    } else if p.worker.as_ref() == Some(caller) {
        Ok(Party::Worker)
    } else {
        Err(EscrowError::NotFunder)
    }
}

fn milestone_mut<'a>(p: &'a mut Project, id: ProjectId, index: u32) -> Result<&'a mut Milestone> {
    p.milestones
        .get_mut(index as usize)
        .ok_or(EscrowError::MilestoneNotFound { project: id, index })
}
