//! Size-class index.
//!
//! Maps a payload size to one of [`BIN_COUNT`] free-list bins. Classes are
//! fixed at build time: a hand-tuned table of inclusive upper bounds, dense
//! for the small sizes that dominate real workloads, followed by a final
//! overflow class for everything above the largest bound.

/// Inclusive upper bound of every finite size class, in bytes.
pub const CLASS_BOUNDS: [usize; 12] = [8, 16, 24, 32, 48, 64, 96, 128, 256, 512, 1024, 2048];

/// Number of bins, including the overflow class.
pub const BIN_COUNT: usize = CLASS_BOUNDS.len() + 1;

/// Index of the overflow class (`size > 2048`).
pub const OVERFLOW_BIN: usize = BIN_COUNT - 1;

const CLASS_LABELS: [&str; BIN_COUNT] = [
    "8", "16", "24", "32", "48", "64", "96", "128", "256", "512", "1K", "2K", ">2K",
];

/// Returns the bin that holds blocks of `size` payload bytes.
///
/// Monotonic: a larger size never maps to a smaller bin.
#[inline]
#[must_use]
pub fn bin_of(size: usize) -> usize {
    CLASS_BOUNDS.partition_point(|&bound| bound < size)
}

/// Inclusive upper bound of `bin`, or `None` for the overflow class.
#[must_use]
pub fn bin_upper_bound(bin: usize) -> Option<usize> {
    CLASS_BOUNDS.get(bin).copied()
}

/// Short human label for `bin` (`"96"`, `"1K"`, `">2K"`).
#[must_use]
pub fn bin_label(bin: usize) -> &'static str {
    CLASS_LABELS.get(bin).copied().unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(bin_of(1), 0);
        assert_eq!(bin_of(8), 0);
        assert_eq!(bin_of(9), 1);
        assert_eq!(bin_of(64), 5);
        assert_eq!(bin_of(65), 6);
        assert_eq!(bin_of(96), 6);
        assert_eq!(bin_of(2048), 11);
    }

    #[test]
    fn everything_above_largest_bound_overflows() {
        assert_eq!(bin_of(2049), OVERFLOW_BIN);
        assert_eq!(bin_of(4080), OVERFLOW_BIN);
        assert_eq!(bin_of(usize::MAX), OVERFLOW_BIN);
    }

    #[test]
    fn classification_is_monotonic() {
        let mut last = 0;
        for size in 1..=8192 {
            let bin = bin_of(size);
            assert!(bin >= last, "bin_of({size}) = {bin} dropped below {last}");
            assert!(bin < BIN_COUNT);
            last = bin;
        }
        assert_eq!(last, OVERFLOW_BIN);
    }

    #[test]
    fn every_bound_lands_in_its_own_bin() {
        for (bin, &bound) in CLASS_BOUNDS.iter().enumerate() {
            assert_eq!(bin_of(bound), bin);
            assert_eq!(bin_upper_bound(bin), Some(bound));
        }
        assert_eq!(bin_upper_bound(OVERFLOW_BIN), None);
    }

    #[test]
    fn labels_cover_all_bins() {
        assert_eq!(bin_label(0), "8");
        assert_eq!(bin_label(10), "1K");
        assert_eq!(bin_label(OVERFLOW_BIN), ">2K");
        assert_eq!(bin_label(BIN_COUNT), "?");
    }
}
