//! Debug assertion macros for the ring index protocol.
//!
//! Only active in debug builds, so there is zero overhead on the release
//! record path. The checked relations use wrap-around-safe signed deltas,
//! matching the arithmetic in `ring.rs`.

/// Assert `reader ≤ commit ≤ writer` on signed deltas.
macro_rules! debug_assert_index_order {
    ($reader:expr, $commit:expr, $writer:expr) => {
        debug_assert!(
            $commit.wrapping_sub($reader) as i64 >= 0 && $writer.wrapping_sub($commit) as i64 >= 0,
            "index order violated: reader {} commit {} writer {}",
            $reader,
            $commit,
            $writer
        )
    };
}

/// Assert a count stays within the ring capacity.
macro_rules! debug_assert_bounded {
    ($count:expr, $size:expr) => {
        debug_assert!(
            $count <= $size,
            "count {} exceeds ring size {}",
            $count,
            $size
        )
    };
}

/// Assert a sequence number only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new.wrapping_sub($old) as i64 >= 0,
            "{} moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use debug_assert_bounded;
pub(crate) use debug_assert_index_order;
pub(crate) use debug_assert_monotonic;
