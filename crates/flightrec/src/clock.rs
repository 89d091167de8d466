//! Monotonic tick source, zero-rebased at first call.
//!
//! Ticks are microseconds on 64-bit hosts and milliseconds on 32-bit hosts,
//! so the counter never wraps within the lifetime of a typical program.
//! Wall-clock realtime is used because the absolute epoch is subtracted on
//! first use and only deltas are reported. `clock_gettime(2)` is
//! async-signal-safe, so timestamps can be taken inside signal handlers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ticks per second: 1e6 on 64-bit hosts, 1e3 on 32-bit hosts.
#[cfg(target_pointer_width = "64")]
pub const TICKS_PER_SEC: u64 = 1_000_000;
#[cfg(not(target_pointer_width = "64"))]
pub const TICKS_PER_SEC: u64 = 1_000;

/// Fractional digits implied by the tick unit (used by the dump renderer).
#[cfg(target_pointer_width = "64")]
pub const FRACTION_DIGITS: usize = 6;
#[cfg(not(target_pointer_width = "64"))]
pub const FRACTION_DIGITS: usize = 3;

static EPOCH: AtomicU64 = AtomicU64::new(0);

/// Ticks elapsed since the first call in this process. The first caller
/// establishes the epoch with a compare-exchange so all threads agree.
pub fn ticks() -> u64 {
    let now = raw_ticks();
    let mut epoch = EPOCH.load(Ordering::Relaxed);
    if epoch == 0 {
        // realtime is never zero, so zero doubles as "not yet rebased"
        match EPOCH.compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => epoch = now,
            Err(prior) => epoch = prior,
        }
    }
    now.wrapping_sub(epoch)
}

#[cfg(unix)]
fn raw_ticks() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer; CLOCK_REALTIME is always supported.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    if TICKS_PER_SEC == 1_000_000 {
        ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
    } else {
        ts.tv_sec as u64 * 1_000 + ts.tv_nsec as u64 / 1_000_000
    }
}

#[cfg(not(unix))]
fn raw_ticks() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    if TICKS_PER_SEC == 1_000_000 {
        now.as_micros() as u64
    } else {
        now.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_monotonic_and_rebased() {
        let a = ticks();
        let b = ticks();
        assert!(b >= a);
        // rebased: well under an hour since the first call in this process
        assert!(a < 3_600 * TICKS_PER_SEC);
    }

    #[test]
    fn unit_matches_pointer_width() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!((TICKS_PER_SEC, FRACTION_DIGITS), (1_000_000, 6));
        #[cfg(not(target_pointer_width = "64"))]
        assert_eq!((TICKS_PER_SEC, FRACTION_DIGITS), (1_000, 3));
    }
}
