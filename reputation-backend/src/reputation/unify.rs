//! Feedback-count-weighted average over a linked group's per-chain summaries.
//!
//! Every value is normalized to the group's largest decimal precision and the
//! weighted sum is divided with truncation toward zero, in 256-bit signed
//! integers. The result must match the on-chain fixed-point computation
//! exactly, so no floating point appears here.

use ethers::types::{I256, U256};
use reputation_types::ReputationLatest;

/// Largest power of ten representable in a U256
const MAX_EXP10: u32 = 77;

/// One chain's summary in exact arithmetic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    pub value: I256,
    pub decimals: u32,
    pub feedback_count: U256,
}

impl ChainSummary {
    pub fn new(value: i128, decimals: u32, feedback_count: u64) -> Self {
        Self {
            value: I256::from(value),
            decimals,
            feedback_count: U256::from(feedback_count),
        }
    }

    /// Parse the decimal-string columns of a `reputation_latest` row
    pub fn from_row(row: &ReputationLatest) -> Result<Self, String> {
        let value = I256::from_dec_str(&row.summary_value).map_err(|e| {
            format!("Invalid summary_value '{}' for {}/{}: {}", row.summary_value, row.master_agent_id, row.chain_id, e)
        })?;
        let feedback_count = U256::from_dec_str(&row.feedback_count).map_err(|e| {
            format!("Invalid feedback_count '{}' for {}/{}: {}", row.feedback_count, row.master_agent_id, row.chain_id, e)
        })?;
        Ok(Self {
            value,
            decimals: row.summary_value_decimals,
            feedback_count,
        })
    }
}

/// Unified reputation of a linked group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unified {
    pub value: I256,
    pub decimals: u32,
    pub feedback_count: U256,
}

impl Unified {
    pub fn zero(decimals: u32) -> Self {
        Self {
            value: I256::zero(),
            decimals,
            feedback_count: U256::zero(),
        }
    }

    pub fn value_string(&self) -> String {
        self.value.to_string()
    }

    pub fn feedback_count_string(&self) -> String {
        self.feedback_count.to_string()
    }
}

/// Weighted average of `summaries`:
/// `sum(value_i * 10^(max - d_i) * count_i) / sum(count_i)` at `max` decimals.
pub fn weighted_average(summaries: &[ChainSummary]) -> Result<Unified, String> {
    if summaries.is_empty() {
        return Ok(Unified::zero(0));
    }

    let max_decimals = summaries.iter().map(|s| s.decimals).max().unwrap_or(0);

    let mut total_count = U256::zero();
    for summary in summaries {
        total_count = total_count
            .checked_add(summary.feedback_count)
            .ok_or("Total feedback count overflows 256 bits")?;
    }

    if total_count.is_zero() {
        return Ok(Unified::zero(max_decimals));
    }

    let mut weighted_sum = I256::zero();
    for summary in summaries.iter().filter(|s| !s.feedback_count.is_zero()) {
        let scale = pow10(max_decimals - summary.decimals)?;
        let count = to_signed(summary.feedback_count)?;
        let term = summary
            .value
            .checked_mul(scale)
            .and_then(|normalized| normalized.checked_mul(count))
            .ok_or_else(|| {
                format!(
                    "Weighted term overflows 256 bits (value {}, decimals {}, count {})",
                    summary.value, summary.decimals, summary.feedback_count
                )
            })?;
        weighted_sum = weighted_sum
            .checked_add(term)
            .ok_or("Weighted sum overflows 256 bits")?;
    }

    // I256 division truncates toward zero
    let value = weighted_sum
        .checked_div(to_signed(total_count)?)
        .ok_or("Weighted average division failed")?;

    Ok(Unified {
        value,
        decimals: max_decimals,
        feedback_count: total_count,
    })
}

fn pow10(exponent: u32) -> Result<I256, String> {
    if exponent > MAX_EXP10 {
        return Err(format!("Decimal spread {} too large", exponent));
    }
    to_signed(U256::exp10(exponent as usize))
}

fn to_signed(value: U256) -> Result<I256, String> {
    I256::try_from(value).map_err(|_| format!("{} does not fit a signed 256-bit integer", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_decimals_weighted_average() {
        // 80 (x10) and 5.0 (x5): (800*10 + 50*5) / 15 = 550 -> 55.0
        let unified = weighted_average(&[
            ChainSummary::new(80, 0, 10),
            ChainSummary::new(50, 1, 5),
        ])
        .unwrap();
        assert_eq!(unified.value, I256::from(550));
        assert_eq!(unified.decimals, 1);
        assert_eq!(unified.feedback_count, U256::from(15));
        assert_eq!(unified.value_string(), "550");
    }

    #[test]
    fn test_empty_set_is_zero_at_zero_decimals() {
        assert_eq!(weighted_average(&[]).unwrap(), Unified::zero(0));
    }

    #[test]
    fn test_all_zero_feedback_keeps_max_decimals() {
        let unified = weighted_average(&[
            ChainSummary::new(10, 2, 0),
            ChainSummary::new(-3, 4, 0),
        ])
        .unwrap();
        assert_eq!(unified, Unified::zero(4));
    }

    #[test]
    fn test_zero_count_rows_still_set_precision() {
        // the 3-decimal row has no feedback but raises the precision
        let unified = weighted_average(&[
            ChainSummary::new(7, 0, 2),
            ChainSummary::new(999, 3, 0),
        ])
        .unwrap();
        assert_eq!(unified.value, I256::from(7000));
        assert_eq!(unified.decimals, 3);
        assert_eq!(unified.feedback_count, U256::from(2));
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let positive = weighted_average(&[
            ChainSummary::new(1, 0, 1),
            ChainSummary::new(2, 0, 2),
        ])
        .unwrap();
        // 5 / 3
        assert_eq!(positive.value, I256::from(1));

        let negative = weighted_average(&[
            ChainSummary::new(-7, 0, 1),
            ChainSummary::new(0, 0, 1),
        ])
        .unwrap();
        // -7 / 2
        assert_eq!(negative.value, I256::from(-3));
        assert_eq!(negative.value_string(), "-3");
    }

    #[test]
    fn test_wide_decimal_spread_beyond_i128() {
        // i128::MAX scaled by 10^24 overflows 128 bits but not 256
        let unified = weighted_average(&[
            ChainSummary::new(i128::MAX, 0, 3),
            ChainSummary::new(0, 24, 0),
        ])
        .unwrap();
        let expected = I256::from(i128::MAX) * I256::try_from(U256::exp10(24)).unwrap();
        assert_eq!(unified.value, expected);
        assert_eq!(unified.decimals, 24);
    }

    #[test]
    fn test_overflow_is_an_error_not_a_panic() {
        let huge = ChainSummary {
            value: I256::MAX,
            decimals: 0,
            feedback_count: U256::from(2),
        };
        assert!(weighted_average(&[huge, ChainSummary::new(1, 1, 1)]).is_err());
    }

    #[test]
    fn test_from_row_parses_decimal_strings() {
        let row = ReputationLatest {
            master_agent_id: "0xm1".to_string(),
            chain_id: "8453".to_string(),
            summary_value: "-1234567890123456789012345678901234567890".to_string(),
            summary_value_decimals: 18,
            feedback_count: "12".to_string(),
            updated_at: String::new(),
        };
        let summary = ChainSummary::from_row(&row).unwrap();
        assert_eq!(summary.value.to_string(), row.summary_value);
        assert_eq!(summary.feedback_count, U256::from(12));

        let bad = ReputationLatest { summary_value: "abc".to_string(), ..row };
        assert!(ChainSummary::from_row(&bad).is_err());
    }
}
