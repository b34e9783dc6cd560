//! Exact decimal amounts: parsing user input and converting to and from
//! provider base units.

use crate::error::{OrchestratorError, OrchestratorResult, ValidationError};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a user-typed amount. Accepts `,` as decimal separator.
pub fn parse_amount(raw: &str) -> Result<Decimal, ValidationError> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return Err(ValidationError::InvalidAmount);
    }

    let amount = Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|_| ValidationError::InvalidAmount)?;

    if amount <= Decimal::ZERO {
        return Err(ValidationError::InvalidAmount);
    }
    Ok(amount.normalize())
}

/// Largest token precision a base-unit scale can represent
pub const MAX_DECIMALS: u32 = 18;

fn unit_scale(decimals: u32) -> Option<Decimal> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    10u64.checked_pow(decimals).map(Decimal::from)
}

/// `amount * 10^decimals` as an integer. Sub-unit dust is truncated.
pub fn to_base_units(amount: Decimal, decimals: u32) -> OrchestratorResult<u128> {
    unit_scale(decimals)
        .and_then(|scale| amount.checked_mul(scale))
        .and_then(|v| v.trunc().to_u128())
        .ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "amount {} cannot be expressed in base units with {} decimals",
                amount, decimals
            ))
        })
}

/// Provider base-unit string back to an exact decimal.
pub fn from_base_units(raw: &str, decimals: u32) -> Option<Decimal> {
    let units = Decimal::from_str(raw.trim()).ok()?;
    if units.fract() != Decimal::ZERO {
        return None;
    }
    units
        .checked_div(unit_scale(decimals)?)
        .map(|d| d.normalize())
}
