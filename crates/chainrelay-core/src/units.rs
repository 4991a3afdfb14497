//! Conversion between the ledger's smallest unit (wei) and ether decimals.
//!
//! 1 ether = 10^18 wei. Formatting is exact: no floating point is involved,
//! the fractional part is right-trimmed of zeros and never leaves a trailing
//! dot, so `1e18` formats as `"1"` and `5e17` as `"0.5"`.

use alloy_primitives::U256;

use crate::error::UnitsError;

/// Number of decimal places in one ether.
pub const ETHER_DECIMALS: usize = 18;

/// `10^18`: wei per ether.
pub const WEI_PER_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Format a wei amount as an ether decimal string.
pub fn format_ether(wei: U256) -> String {
    let (whole, frac) = wei.div_rem(WEI_PER_ETHER);
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = ETHER_DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Parse an ether decimal string (e.g. `"0.25"`) into wei.
pub fn parse_ether(input: &str) -> Result<U256, UnitsError> {
    let invalid = || UnitsError::InvalidDecimal {
        input: input.to_string(),
    };
    let overflow = || UnitsError::Overflow {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > ETHER_DECIMALS {
        return Err(UnitsError::TooPrecise {
            input: input.to_string(),
        });
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10).map_err(|_| overflow())?
    };
    let frac = if frac.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{frac:0<width$}", width = ETHER_DECIMALS);
        U256::from_str_radix(&padded, 10).map_err(|_| invalid())?
    };

    whole
        .checked_mul(WEI_PER_ETHER)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(overflow)
}
