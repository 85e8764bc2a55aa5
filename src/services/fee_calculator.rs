//! Integer fee arithmetic. Rates are basis points (100bp = 1%), amounts
//! are minor units, results are rounded half up so `net = gross - fee` holds exactly.

use crate::error::{AppError, AppResult};

pub const BASIS_POINTS_SCALE: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross: i64,
    pub fee: i64,
    pub net: i64,
}

/// `round_half_up(amount * bp / 10000)`, computed in i128 to avoid overflow
pub fn fee_for(amount: i64, bp: i32) -> i64 {
    let scale = i128::from(BASIS_POINTS_SCALE);
    let raw = i128::from(amount) * i128::from(bp);
    ((raw + scale / 2) / scale) as i64
}

pub fn split(amount: i64, bp: i32) -> FeeBreakdown {
    let fee = fee_for(amount, bp);
    FeeBreakdown {
        gross: amount,
        fee,
        net: amount - fee,
    }
}

/// Share of an already charged fee attributable to `part` of `whole`.
/// Used when only part of an order could be fulfilled.
pub fn prorate(fee: i64, part: i64, whole: i64) -> i64 {
    if whole <= 0 || part <= 0 {
        return 0;
    }
    if part >= whole {
        return fee;
    }
    let raw = i128::from(fee) * i128::from(part);
    let whole = i128::from(whole);
    ((raw + whole / 2) / whole) as i64
}

/// Admin input in percent (e.g. 2.5) to basis points, 0..=100%
pub fn percent_to_bp(percent: f64) -> AppResult<i32> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(AppError::ValidationError(format!(
            "percentage must be between 0 and 100, got {percent}"
        )));
    }
    Ok((percent * 100.0).round() as i32)
}
