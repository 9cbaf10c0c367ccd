//! Penalty Engine — late-submission deductions.
//!
//! Each milestone carries its own [`PenaltyCurve`]; there is no global
//! constant. The curve is linear in started days of lateness and capped.
//! The deducted amount is retained by the platform: it is never refunded
//! to the funder and never paid to the worker, so conservation tests can
//! account for it explicitly.

use crate::types::{PenaltyCurve, BPS_DENOMINATOR, SECONDS_PER_DAY};

impl PenaltyCurve {
    /// Deduction for a submission `lateness_secs` past the deadline, in
    /// basis points. Zero lateness is always zero; otherwise
    /// monotonically non-decreasing up to `cap_bps`.
    pub fn penalty_bps(&self, lateness_secs: u64) -> u32 {
        if lateness_secs == 0 {
            return 0;
        }
        let started_days = lateness_secs.div_ceil(SECONDS_PER_DAY);
        let accrued = (started_days as u128) * (self.rate_bps_per_day as u128);
        accrued.min(self.cap_bps as u128) as u32
    }
}

/// Amount payable after applying a penalty to a scheduled gross amount.
pub fn payable_after_penalty(gross: i128, penalty_bps: u32) -> i128 {
    gross * (BPS_DENOMINATOR - penalty_bps) as i128 / BPS_DENOMINATOR as i128
}

/// Portion of a scheduled gross amount withheld by the platform.
pub fn penalty_amount(gross: i128, penalty_bps: u32) -> i128 {
    gross - payable_after_penalty(gross, penalty_bps)
}
