//! # Escrow Settlement Core
//!
//! The ledger that underlies a milestone-based freelance payment flow:
//! deposits are split between an escrow vault and a yield pool, each
//! milestone advances through a submission-and-approval protocol, and the
//! final payout includes accrued yield and late-penalty deductions.
//!
//! | Phase        | Entry point(s)                                      |
//! |--------------|-----------------------------------------------------|
//! | Setup        | [`EscrowProtocol::create_project`], [`EscrowProtocol::assign_worker`] |
//! | Funding      | [`EscrowProtocol::deposit`]                         |
//! | Milestones   | [`EscrowProtocol::submit`], [`EscrowProtocol::approve`], [`EscrowProtocol::reject`] |
//! | Settlement   | [`EscrowProtocol::release`], [`EscrowProtocol::confirm_release`] |
//! | Termination  | [`EscrowProtocol::cancel`]                          |
//! | Queries      | [`EscrowProtocol::project`], [`EscrowProtocol::withdrawable_balance`] |
//!
//! ## Architecture
//!
//! All records are owned by the [`ledger::LedgerStore`]; every mutation
//! goes through it so the conservation invariant is checked centrally.
//! [`protocol`] contains only guards and transitions; the arithmetic
//! lives in [`split`], [`penalty`], and [`settlement`]. The external
//! system that physically moves funds is reached through the
//! [`settlement::SettlementGateway`] trait and never called while a
//! project lock is held.

pub mod errors;
pub mod events;
pub mod ledger;
pub mod penalty;
pub mod protocol;
pub mod settlement;
pub mod split;
pub mod types;


#[cfg(test)]
mod test_conservation;
#[cfg(test)]
mod test_lifecycle;

pub use errors::{EscrowError, Result};
pub use events::{JournalEvent, JournalKind};
pub use protocol::EscrowProtocol;
pub use settlement::{Clock, SettlementGateway, SystemClock};
pub use types::{
    AccountId, ApprovalPolicy, DepositReceipt, IntentId, Milestone, MilestoneSpec, MilestoneState,
    Party, PenaltyCurve, Project, ProjectId, ProjectStatus, WithdrawableBalance,
    WithdrawalBreakdown, BPS_DENOMINATOR,
};
