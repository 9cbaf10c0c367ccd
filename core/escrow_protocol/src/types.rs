//! # Types
//!
//! Shared data structures used across all modules of the escrow core.
//!
//! ## Design decisions
//!
//! ### Milestone state as a closed tagged union
//!
//! A milestone is **not** a record of optional fields and boolean flags.
//! Every lifecycle stage carries exactly the data that is valid in that
//! stage, so "released but never accepted" is unrepresentable:
//!
//! ```text
//! Pending ──► Submitted ──► Accepted ──► ReleasePending ──► Released
//!     ▲           │
//!     └─ Rejected ◄┘   (resubmission loops back through Pending)
//! ```
//!
//! `ReleasePending` is the lock-free confirmation window: the payout has
//! been computed and an intent recorded, but the external settlement
//! collaborator has not yet confirmed. Confirmations are idempotent.
//!
//! ### Dual approval as a record set
//!
//! Under [`ApprovalPolicy::Dual`] a submitted milestone collects
//! [`Approval`] records keyed by [`Party`]. "Both sides have agreed" is a
//! first-class predicate over that set, not two unrelated booleans.

use serde::{Deserialize, Serialize};

use crate::settlement::PayoutPlan;

/// Basis-point denominator used for every percentage in the protocol.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Seconds in a day, for the per-day late-penalty schedule.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Upper bound on evidence / reason payloads stored against a milestone.
pub const MAX_NOTE_LEN: usize = 512;

/// Unique identifier of a funding project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of an external account (funder, worker, platform).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a pending settlement confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub u64);

/// The two parties whose acknowledgement can gate a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Funder,
    Worker,
}

/// How many acknowledgements a milestone needs before release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// The funder's acceptance alone marks the milestone accepted.
    FunderOnly,
    /// Both funder and worker must record an explicit approval (the
    /// "KPI" variant). The worker's acknowledgement gates the release of
    /// money to themselves and must be an auditable act of its own.
    Dual,
}

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created; accepting deposits; no worker yet.
    Open,
    /// Worker assigned; work not started.
    Assigned,
    /// At least one milestone submission received.
    InProgress,
    /// Terminal milestone released; nothing left to pay.
    Completed,
    /// Terminated early by the funder; unreleased milestones are
    /// permanently unpayable.
    Cancelled,
}

impl ProjectStatus {
    /// Terminal statuses admit no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }
}

/// A single acknowledgement on a submitted milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub party: Party,
    pub at: u64,
}

/// Per-milestone late-submission penalty schedule.
///
/// The deduction grows linearly with every *started* day past the
/// deadline and is capped. Zero lateness always means zero penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyCurve {
    /// Deduction accrued per started day of lateness, in basis points.
    pub rate_bps_per_day: u32,
    /// Upper bound on the total deduction, in basis points.
    pub cap_bps: u32,
}

/// One entry of the milestone schedule as supplied at project creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    /// Share of the total project value, in basis points.
    pub percentage_bps: u32,
    /// Unix deadline for submission.
    pub deadline: u64,
    pub penalty: PenaltyCurve,
}

/// Lifecycle state of a milestone, with stage-specific payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum MilestoneState {
    /// Awaiting the worker's first (or re-) submission.
    Pending,
    /// Evidence submitted; collecting approvals.
    Submitted {
        submitted_at: u64,
        evidence: String,
        /// Late-submission deduction fixed at submission time.
        penalty_bps: u32,
        approvals: Vec<Approval>,
    },
    /// Required approvals complete; awaiting release.
    Accepted {
        submitted_at: u64,
        penalty_bps: u32,
        accepted_at: u64,
    },
    /// Release intent recorded; waiting for the settlement collaborator
    /// to confirm. Safe to re-drive. The payout is frozen here: a
    /// confirmation always applies this plan, never a recomputation, so
    /// the booked amount cannot drift from the instructed transfer.
    ReleasePending {
        submitted_at: u64,
        penalty_bps: u32,
        accepted_at: u64,
        intent: IntentId,
        plan: PayoutPlan,
    },
    /// Paid out. Frozen forever. The intent is kept so that late or
    /// duplicate confirmations can be recognised and ignored.
    Released {
        submitted_at: u64,
        penalty_bps: u32,
        accepted_at: u64,
        released_at: u64,
        intent: IntentId,
        payout: WithdrawalBreakdown,
    },
    /// Sent back by the funder; the worker may resubmit.
    Rejected { reason: String, rejected_at: u64 },
}

impl MilestoneState {
    pub fn name(&self) -> &'static str {
        match self {
            MilestoneState::Pending => "pending",
            MilestoneState::Submitted { .. } => "submitted",
            MilestoneState::Accepted { .. } => "accepted",
            MilestoneState::ReleasePending { .. } => "release_pending",
            MilestoneState::Released { .. } => "released",
            MilestoneState::Rejected { .. } => "rejected",
        }
    }
}

/// A schedulable, independently payable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Position in the schedule; the highest index is the terminal one.
    pub index: u32,
    /// Share of the total project value, immutable once funding begins.
    pub percentage_bps: u32,
    pub deadline: u64,
    pub penalty: PenaltyCurve,
    pub state: MilestoneState,
}

impl Milestone {
    pub fn is_released(&self) -> bool {
        matches!(self.state, MilestoneState::Released { .. })
    }
}

/// One recorded deposit and its vault/pool split. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: i128,
    pub vault_portion: i128,
    pub pool_portion: i128,
    pub at: u64,
}

/// Receipt handed back to the caller once a deposit is confirmed and
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub project_id: ProjectId,
    pub amount: i128,
    pub vault_portion: i128,
    pub pool_portion: i128,
    /// Reference issued by the external settlement collaborator.
    pub settlement_ref: String,
}

/// Final breakdown of a single milestone release.
///
/// `vault_share + platform_fee` plus the penalty retained by the platform
/// equals the amount removed from the project's balances; `worker_yield`
/// is external yield credited on top and is non-zero only on the terminal
/// milestone. `funder_yield` is always zero under the 100 %-to-worker
/// distribution rule but is kept explicit so tests can assert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalBreakdown {
    pub vault_share: i128,
    pub worker_yield: i128,
    pub platform_fee: i128,
    pub funder_yield: i128,
}

/// Read-only projection of what an account can withdraw right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawableBalance {
    pub escrow_amount: i128,
    pub yield_amount: i128,
    pub total: i128,
}

/// Running money totals for a project. Together with the live balances
/// these must always reconcile against `total_deposited`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTotals {
    pub released_to_worker: i128,
    /// Penalties and platform fees withheld from payouts.
    pub platform_retained: i128,
    pub refunded_to_funder: i128,
    /// Pool balance kept by the platform on cancellation.
    pub forfeited_to_platform: i128,
    /// External yield credited to the worker; not part of deposits.
    pub yield_credited: i128,
}

/// A funding container: one unit of contracted work with its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub funder: AccountId,
    pub worker: Option<AccountId>,
    pub policy: ApprovalPolicy,
    /// Platform cut taken from each payable amount, in basis points.
    pub platform_fee_bps: u32,
    pub status: ProjectStatus,
    pub total_deposited: i128,
    pub vault_balance: i128,
    pub pool_balance: i128,
    pub totals: ProjectTotals,
    pub cancelled_at: Option<u64>,
    pub milestones: Vec<Milestone>,
    pub deposits: Vec<Deposit>,
}

impl Project {
    /// Index of the terminal (last) milestone.
    pub fn terminal_index(&self) -> u32 {
        (self.milestones.len() as u32).saturating_sub(1)
    }

    /// True once any deposit has been recorded; the schedule is frozen
    /// from this point on.
    pub fn is_funded(&self) -> bool {
        !self.deposits.is_empty()
    }
}
