//! Split Calculator — divides a deposit between the escrow vault and the
//! yield pool under a fixed 90/10 ratio.
//!
//! The vault portion is floored; the remainder goes to the pool, so the
//! two portions always sum to the deposited amount exactly. No rounding
//! leakage, ever.

use serde::{Deserialize, Serialize};

use crate::errors::{EscrowError, Result};
use crate::types::BPS_DENOMINATOR;

/// Vault share of every deposit, in basis points.
pub const VAULT_SHARE_BPS: u32 = 9_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub vault: i128,
    pub pool: i128,
}

/// Split `amount` into vault and pool portions.
///
/// Rejects non-positive amounts with [`EscrowError::InvalidAmount`];
/// otherwise total and pure.
pub fn split(amount: i128) -> Result<Split> {
    if amount <= 0 {
        return Err(EscrowError::InvalidAmount);
    }
    let vault = amount * VAULT_SHARE_BPS as i128 / BPS_DENOMINATOR as i128;
    Ok(Split {
        vault,
        pool: amount - vault,
    })
}
