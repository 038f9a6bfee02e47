//! Asset/share conversion.
//!
//! Every conversion prices against the vault totals as they stood *before*
//! the operation is applied:
//!
//! * empty vault (`total_shares == 0`): price is [`INITIAL_SHARE_PRICE`], so
//!   the first depositor mints 1:1
//! * otherwise: `price = total_assets / total_shares`
//! * `shares = assets / price`, `assets = shares * price`

/// Price of one share in an empty vault.
pub const INITIAL_SHARE_PRICE: f64 = 1.0;

pub fn share_price(total_assets: f64, total_shares: f64) -> f64 {
    if total_shares > 0.0 {
        total_assets / total_shares
    } else {
        INITIAL_SHARE_PRICE
    }
}

/// Shares minted for a deposit of `assets`, or `None` when outstanding
/// shares are backed by no assets and the price is zero.
pub fn shares_for_assets(assets: f64, total_assets: f64, total_shares: f64) -> Option<f64> {
    let price = share_price(total_assets, total_shares);
    if price > 0.0 {
        Some(assets / price)
    } else {
        None
    }
}

/// Assets paid out when redeeming `shares`.
pub fn assets_for_shares(shares: f64, total_assets: f64, total_shares: f64) -> f64 {
    if total_shares <= 0.0 {
        return 0.0;
    }
    shares * share_price(total_assets, total_shares)
}

/// Subtracts `amount` from `value`, snapping results within `epsilon` of zero
/// to exactly zero. Returns `None` when the result is negative beyond
/// `epsilon`.
pub fn checked_sub_clamped(value: f64, amount: f64, epsilon: f64) -> Option<f64> {
    let next = value - amount;
    if next.abs() <= epsilon {
        Some(0.0)
    } else if next < 0.0 {
        None
    } else {
        Some(next)
    }
}

/// Equality within an absolute tolerance.
pub fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon
}
