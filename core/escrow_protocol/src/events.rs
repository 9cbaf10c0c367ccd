//! Append-only journal event types.
//!
//! Every ledger mutation appends exactly one [`JournalEvent`]. The
//! in-memory journal is the audit history required of the core; the
//! backend drains a copy of the stream into SQLite for querying.

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ProjectId};

/// All recognised journal entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    ProjectCreated,
    WorkerAssigned,
    /// A confirmed deposit was split and added to the balances.
    DepositRecorded,
    /// A deposit confirmation arrived after cancellation and was booked
    /// straight back to the funder.
    DepositRefunded,
    MilestoneSubmitted,
    /// One party's acknowledgement was recorded.
    MilestoneApproved,
    /// The required approval set became complete.
    MilestoneAccepted,
    MilestoneRejected,
    /// A release intent was recorded; awaiting settlement confirmation.
    ReleaseIntent,
    MilestoneReleased,
    ProjectCompleted,
    ProjectCancelled,
}

impl JournalKind {
    /// Short identifier suitable for storage in a database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::WorkerAssigned => "worker_assigned",
            Self::DepositRecorded => "deposit_recorded",
            Self::DepositRefunded => "deposit_refunded",
            Self::MilestoneSubmitted => "milestone_submitted",
            Self::MilestoneApproved => "milestone_approved",
            Self::MilestoneAccepted => "milestone_accepted",
            Self::MilestoneRejected => "milestone_rejected",
            Self::ReleaseIntent => "release_intent",
            Self::MilestoneReleased => "milestone_released",
            Self::ProjectCompleted => "project_completed",
            Self::ProjectCancelled => "project_cancelled",
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Global, strictly increasing sequence number.
    pub seq: u64,
    pub project_id: ProjectId,
    pub kind: JournalKind,
    /// Account that triggered the mutation, when attributable.
    pub actor: Option<AccountId>,
    pub milestone: Option<u32>,
    pub amount: Option<i128>,
    /// Free-form context: rejection/cancellation reason, settlement ref.
    pub note: Option<String>,
    pub at: u64,
}
