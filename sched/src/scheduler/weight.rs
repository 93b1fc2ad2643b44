//! Niceness to weight mapping
//!
//! Fixed CFS table: every niceness step changes the CPU share of a task by
//! roughly 10% relative to its neighbours. Niceness 0 maps to
//! [`BASE_WEIGHT`], the unit used to normalize virtual runtime.

/// Lowest niceness (highest priority)
pub const NICE_MIN: i32 = -20;

/// Highest niceness (lowest priority)
pub const NICE_MAX: i32 = 19;

/// Weight of a niceness-0 task
pub const BASE_WEIGHT: u64 = 1024;

const NICE_TO_WEIGHT: [u64; 40] = [
    /* -20 */ 88761, 71755, 56483, 46273, 36291,
    /* -15 */ 29154, 23254, 18705, 14949, 11916,
    /* -10 */ 9548, 7620, 6100, 4904, 3906,
    /*  -5 */ 3121, 2501, 1991, 1586, 1277,
    /*   0 */ 1024, 820, 655, 526, 423,
    /*   5 */ 335, 272, 215, 172, 137,
    /*  10 */ 110, 87, 70, 56, 45,
    /*  15 */ 36, 29, 23, 18, 15,
];

/// Clamp a niceness into `[NICE_MIN, NICE_MAX]`
#[inline]
pub const fn clamp_niceness(niceness: i32) -> i32 {
    if niceness < NICE_MIN {
        NICE_MIN
    } else if niceness > NICE_MAX {
        NICE_MAX
    } else {
        niceness
    }
}

#[inline]
pub const fn is_valid_niceness(niceness: i32) -> bool {
    niceness >= NICE_MIN && niceness <= NICE_MAX
}

/// Weight of a niceness value (clamped, never fails)
#[inline]
pub const fn weight_of(niceness: i32) -> u64 {
    NICE_TO_WEIGHT[(clamp_niceness(niceness) - NICE_MIN) as usize]
}

/// Scale a real execution delta into virtual runtime for `weight`.
///
/// Heavier tasks accumulate virtual runtime more slowly. The product is
/// computed in 128 bits so long deltas cannot overflow.
#[inline]
pub fn scale_vruntime(delta_ns: u64, weight: u64) -> u64 {
    let weight = weight.max(1) as u128;
    let scaled = (delta_ns as u128 * BASE_WEIGHT as u128) / weight;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(NICE_TO_WEIGHT.len(), (NICE_MAX - NICE_MIN + 1) as usize);
    const_assert_eq!(weight_of(0), BASE_WEIGHT);

    #[test]
    fn test_table_endpoints() {
        assert_eq!(weight_of(NICE_MIN), 88761);
        assert_eq!(weight_of(NICE_MAX), 15);
        assert_eq!(weight_of(5), 335);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(weight_of(-100), weight_of(NICE_MIN));
        assert_eq!(weight_of(i32::MAX), weight_of(NICE_MAX));
        assert!(!is_valid_niceness(20));
        assert!(is_valid_niceness(-20));
    }

    #[test]
    fn test_base_weight_is_identity() {
        assert_eq!(scale_vruntime(1_000_000, BASE_WEIGHT), 1_000_000);
        assert_eq!(scale_vruntime(1_000, 2 * BASE_WEIGHT), 500);
    }

    #[test]
    fn test_scale_does_not_overflow() {
        assert_eq!(scale_vruntime(u64::MAX, weight_of(NICE_MAX)), u64::MAX);
        assert_eq!(scale_vruntime(u64::MAX, weight_of(NICE_MIN)), ((u64::MAX as u128 * 1024) / 88761) as u64);
    }

    proptest! {
        #[test]
        fn weight_is_monotonically_decreasing(a in -40i32..40, b in -40i32..40) {
            if a < b {
                prop_assert!(weight_of(a) >= weight_of(b));
            }
            if is_valid_niceness(a) && is_valid_niceness(b) && a < b {
                prop_assert!(weight_of(a) > weight_of(b));
            }
        }

        #[test]
        fn heavier_weight_accrues_less_vruntime(delta in 0u64..10_000_000_000, nice in -20i32..19) {
            let heavier = scale_vruntime(delta, weight_of(nice));
            let lighter = scale_vruntime(delta, weight_of(nice + 1));
            prop_assert!(heavier <= lighter);
        }
    }
}
