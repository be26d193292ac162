//! Bit-sizing helpers used when shaping the bucket table.
//!
//! Contracts follow the classic ffs/fls conventions:
//! - `find_first_set(x)`: 1-based index of the least significant set
//!   bit; 0 when `x == 0`.
//! - `find_last_set(x)`: 1-based index of the most significant set
//!   bit; 0 when `x == 0`. For `x > 0`,
//!   `find_last_set(x) == 1 + floor(log2(x))`.
//! - `next_pow_two(x)`: smallest power of two >= `x`; `1` for `x == 0`.
//!   The result overflows (debug: panics) when `x > 1 << 63`.

/// 1-based index of the least significant set bit, or 0 if `v == 0`.
#[inline]
pub const fn find_first_set(v: u64) -> u32 {
    if v == 0 {
        0
    } else {
        v.trailing_zeros() + 1
    }
}

/// 1-based index of the most significant set bit, or 0 if `v == 0`.
///
/// For `v > 0`, equals `1 + floor(log2(v))`.
#[inline]
pub const fn find_last_set(v: u64) -> u32 {
    64 - v.leading_zeros()
}

/// Smallest power of two greater than or equal to `v`; 1 for `v == 0`.
#[inline]
pub const fn next_pow_two(v: u64) -> u64 {
    if v <= 1 {
        1
    } else {
        1u64 << find_last_set(v - 1)
    }
}

/// Number of set bits in `v`.
#[inline]
pub const fn pop_count(v: u64) -> u32 {
    v.count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_first_set_contract() {
        assert_eq!(find_first_set(0), 0);
        assert_eq!(find_first_set(1), 1);
        assert_eq!(find_first_set(2), 2);
        assert_eq!(find_first_set(12), 3);
        assert_eq!(find_first_set(1 << 63), 64);
    }

    #[test]
    fn find_last_set_contract() {
        assert_eq!(find_last_set(0), 0);
        assert_eq!(find_last_set(1), 1);
        assert_eq!(find_last_set(2), 2);
        assert_eq!(find_last_set(3), 2);
        assert_eq!(find_last_set(u64::MAX), 64);
        // 1 + floor(log2(x)) identity on a spread of values
        for shift in 0..64u32 {
            let x = 1u64 << shift;
            assert_eq!(find_last_set(x), shift + 1);
            if x > 1 {
                assert_eq!(find_last_set(x - 1), shift);
            }
        }
    }

    #[test]
    fn next_pow_two_contract() {
        assert_eq!(next_pow_two(0), 1);
        assert_eq!(next_pow_two(1), 1);
        assert_eq!(next_pow_two(2), 2);
        assert_eq!(next_pow_two(3), 4);
        assert_eq!(next_pow_two(4), 4);
        assert_eq!(next_pow_two(5000), 8192);
        assert_eq!(next_pow_two(10_000), 16_384);
        assert_eq!(next_pow_two(1 << 40), 1 << 40);
        assert_eq!(next_pow_two((1 << 40) + 1), 1 << 41);
    }

    #[test]
    fn pop_count_contract() {
        assert_eq!(pop_count(0), 0);
        assert_eq!(pop_count(0b1011), 3);
        assert_eq!(pop_count(u64::MAX), 64);
    }
}
