//! Fixed-point money helpers
//!
//! CRITICAL: All money values are i64 minor units (cents). Rates are integer
//! basis points (1 bps = 1/10,000) or whole percentages. Products are formed in
//! i128 and truncated toward zero, so no floating point enters a balance.

/// Basis points in 100%
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Apply a basis-point rate to an amount
///
/// # Example
/// ```
/// use mlm_commission_core::core::money::apply_bps;
///
/// assert_eq!(apply_bps(1_000_000, 300), 30_000); // 3%
/// assert_eq!(apply_bps(1_000_000, 15), 1_500);   // 0.15%
/// ```
pub fn apply_bps(amount: i64, bps: u32) -> i64 {
    let product = i128::from(amount) * i128::from(bps) / i128::from(BPS_DENOMINATOR);
    clamp_i128(product)
}

/// Apply a basis-point rate `times` times as one product
///
/// `apply_bps_times(a, r, n)` is `a * r * n / 10_000` computed once, which
/// avoids accumulating truncation from `n` separate [`apply_bps`] calls.
pub fn apply_bps_times(amount: i64, bps: u32, times: u32) -> i64 {
    let product = i128::from(amount) * i128::from(bps) * i128::from(times)
        / i128::from(BPS_DENOMINATOR);
    clamp_i128(product)
}

/// Whether `value >= base * percent / 100`, compared exactly (no truncation)
pub fn meets_percent(value: i64, base: i64, percent: u32) -> bool {
    i128::from(value) * 100 >= i128::from(base) * i128::from(percent)
}

/// Split `total` into `parts` installments that sum exactly to `total`
///
/// Every installment gets `total / parts`; the remainder is added to the last.
/// Returns an empty vector when `parts == 0`.
///
/// # Example
/// ```
/// use mlm_commission_core::core::money::split_installments;
///
/// assert_eq!(split_installments(1_000, 3), vec![333, 333, 334]);
/// ```
pub fn split_installments(total: i64, parts: u32) -> Vec<i64> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_i64 = i64::from(parts);
    let base = total / parts_i64;
    let remainder = total - base * parts_i64;

    let mut amounts = vec![base; parts as usize];
    if let Some(last) = amounts.last_mut() {
        *last += remainder;
    }
    amounts
}

fn clamp_i128(value: i128) -> i64 {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bps_truncates_toward_zero() {
        assert_eq!(apply_bps(999, 15), 1);
        assert_eq!(apply_bps(666, 15), 0);
    }

    #[test]
    fn test_apply_bps_times_single_product() {
        // 27 separate shares of 0.15% on 1,001 cents would truncate to 27 * 1 = 27
        assert_eq!(apply_bps_times(1_001, 15, 27), 40);
    }

    #[test]
    fn test_meets_percent_is_exact() {
        assert!(meets_percent(40, 100, 40));
        assert!(!meets_percent(39, 100, 40));
        // 10% of 33 is 3.3: 3 falls short, 4 clears it
        assert!(!meets_percent(3, 33, 10));
        assert!(meets_percent(4, 33, 10));
    }

    #[test]
    fn test_split_installments_conserves_total() {
        let parts = split_installments(100_001, 12);
        assert_eq!(parts.len(), 12);
        assert_eq!(parts.iter().sum::<i64>(), 100_001);
    }

    #[test]
    fn test_split_installments_zero_parts() {
        assert!(split_installments(500, 0).is_empty());
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        assert_eq!(apply_bps(i64::MAX, 10_000), i64::MAX);
    }
}
