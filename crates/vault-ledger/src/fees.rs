//! Fee extension point.
//!
//! Vaults carry `performance_fee` and `management_fee` fractions, but the
//! ledger applies no fee unless a [`FeePolicy`] says so.

use crate::model::Vault;

pub trait FeePolicy: Send + Sync {
    /// Portion of `yield_amount` withheld at harvest. Must lie in
    /// `[0, yield_amount]`.
    fn harvest_fee(&self, vault: &Vault, yield_amount: f64) -> f64;
}

/// Default policy: all yield reaches depositors.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFees;

impl FeePolicy for NoFees {
    fn harvest_fee(&self, _vault: &Vault, _yield_amount: f64) -> f64 {
        0.0
    }
}
