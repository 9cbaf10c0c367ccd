//! Yield & Settlement Engine.
//!
//! Two concerns live here:
//!
//! * [`SettlementGateway`] — the boundary to the external system of
//!   record that actually moves funds and reports pool yield. The core
//!   treats it as an opaque, asynchronous collaborator: it is never
//!   called while a project lock is held, its yield figure is
//!   authoritative and never recomputed, and its confirmations are
//!   applied idempotently.
//! * Payout planning — pure arithmetic that turns an accepted milestone
//!   into a [`WithdrawalBreakdown`], drawing the gross amount vault-first
//!   and recalling the pool principal on the terminal milestone.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::penalty::{payable_after_penalty, penalty_amount};
use crate::types::{AccountId, Project, ProjectId, BPS_DENOMINATOR};

/// Boundary contract with the external settlement collaborator.
///
/// Implementations live outside the core (an HTTP client in the backend,
/// a scripted mock in tests). Every method may be slow or fail; callers
/// wrap each call in a timeout and surface expiry as
/// [`crate::EscrowError::SettlementTimeout`].
pub trait SettlementGateway: Send + Sync {
    /// Custody `amount` for `project`. Returns an external reference.
    fn deposit_funds(
        &self,
        project: ProjectId,
        funder: &AccountId,
        amount: i128,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Move a released payout (escrow share plus any yield) to the worker.
    fn transfer_to_worker(
        &self,
        project: ProjectId,
        worker: &AccountId,
        amount: i128,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Return the un-released vault balance to the funder on cancellation.
    fn refund_to_funder(
        &self,
        project: ProjectId,
        funder: &AccountId,
        amount: i128,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Realized yield on the project's pooled portion, in basis points.
    /// Opaque input; the core never recomputes or caches it.
    fn query_pool_yield_bps(
        &self,
        project: ProjectId,
    ) -> impl std::future::Future<Output = Result<u32>> + Send;
}

/// Time source for submission stamps and deadlines.
///
/// Kept as a trait so tests can drive lateness deterministically.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Fully computed consequences of releasing one milestone.
///
/// Frozen into the milestone's `ReleasePending` intent at planning time,
/// so the amount the collaborator is instructed to move and the amount
/// the ledger later books are the same figure by construction — a
/// deposit landing between the two phases cannot change a payout that
/// was already promised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    /// Scheduled share of the total deposits, before deductions.
    pub gross: i128,
    /// Late-submission deduction withheld by the platform.
    pub penalty: i128,
    /// Platform fee withheld from the post-penalty payable.
    pub platform_fee: i128,
    /// Escrow amount credited to the worker.
    pub vault_share: i128,
    /// Portion of `gross` drawn from the vault balance.
    pub vault_draw: i128,
    /// Portion of `gross` drawn from the pool principal.
    pub pool_draw: i128,
    pub terminal: bool,
}

impl PayoutPlan {
    /// External yield credited to the worker on top of the escrow share.
    /// Non-zero only on the terminal milestone, which recalls the whole
    /// pool principal; the worker receives 100 % of the yield on it.
    pub fn worker_yield(&self, yield_bps: u32) -> i128 {
        if self.terminal {
            self.pool_draw * yield_bps as i128 / BPS_DENOMINATOR as i128
        } else {
            0
        }
    }
}

/// Plan the payout for milestone `index` of `project`.
///
/// Non-terminal milestones take `percentage_bps` of the total deposits,
/// vault-first. The terminal milestone takes whatever is left in both
/// balances — this absorbs integer-division remainders and recalls the
/// pool principal.
pub fn plan_payout(project: &Project, index: u32, penalty_bps: u32) -> PayoutPlan {
    let terminal = index == project.terminal_index();

    let gross = if terminal {
        project.vault_balance + project.pool_balance
    } else {
        let pct = project.milestones[index as usize].percentage_bps;
        project.total_deposited * pct as i128 / BPS_DENOMINATOR as i128
    };

    let vault_draw = gross.min(project.vault_balance);
    let pool_draw = gross - vault_draw;

    let payable = payable_after_penalty(gross, penalty_bps);
    let penalty = penalty_amount(gross, penalty_bps);
    let platform_fee = payable * project.platform_fee_bps as i128 / BPS_DENOMINATOR as i128;
    let vault_share = payable - platform_fee;

    PayoutPlan {
        gross,
        penalty,
        platform_fee,
        vault_share,
        vault_draw,
        pool_draw,
        terminal,
    }
}
