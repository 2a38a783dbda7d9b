//! Wei conversions for display and metrics.

use alloy::primitives::U256;

/// Wei per ether.
const WEI_PER_ETHER: f64 = 1e18;

/// Converts a wei amount to ether as a float. Precision loss is acceptable for gauges.
pub fn wei_to_eth(wei: U256) -> f64 {
    let wei: f64 = wei.to_string().parse().unwrap_or(f64::MAX);
    wei / WEI_PER_ETHER
}

/// Converts a `U256` count to a float, saturating at `f64::MAX`.
pub fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}
