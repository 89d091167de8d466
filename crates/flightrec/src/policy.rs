//! Built-in block policies for the ring's write, read and commit paths.
//!
//! A block policy is a plain function consulted when a ring operation would
//! stall (see [`crate::ring`]). Returning `true` means "proceed — conditions
//! are now satisfied (or will be: re-snapshot and retry)"; returning `false`
//! tells the caller to truncate or skip. Policies may sleep; the spinning
//! ones here back off adaptively (spin with PAUSE, then yield to the OS)
//! while they wait.

use crate::ring::Ring;
use crossbeam_utils::Backoff;

/// Never wait: truncate the write or skip the stalled commit immediately.
pub fn refuse(_ring: &Ring, _from: u64, _to: u64) -> bool {
    false
}

/// Writer policy: wait until the range `[from, to)` fits without lapping
/// the reader. The write then proceeds untruncated, so batches stay whole.
pub fn spin_write(ring: &Ring, _from: u64, to: u64) -> bool {
    let backoff = Backoff::new();
    while to.wrapping_sub(ring.reader()) as i64 > ring.size() as i64 {
        backoff.snooze();
    }
    true
}

/// Reader policy: wait until `commit` reaches `to`, so the read is
/// delivered in full rather than truncated to what happened to be
/// committed.
pub fn spin_read(ring: &Ring, _from: u64, to: u64) -> bool {
    let backoff = Backoff::new();
    while (ring.commit().wrapping_sub(to) as i64) < 0 {
        backoff.snooze();
    }
    true
}

/// Commit policy: wait for the earlier producer to advance `commit` to
/// `from`, however long that takes. Commits then become visible in
/// reservation order, at the price of a potential live-lock if the earlier
/// producer is preempted mid-copy.
pub fn spin_commit(ring: &Ring, from: u64, _to: u64) -> bool {
    let backoff = Backoff::new();
    while ring.commit() != from {
        backoff.snooze();
    }
    true
}

/// The record path's commit policy: spin briefly for the earlier producer,
/// then give up and skip forward. Bounded waiting keeps per-recorder
/// ordering tight without risking live-lock inside a signal handler.
pub(crate) fn spin_commit_briefly(ring: &Ring, from: u64, _to: u64) -> bool {
    let backoff = Backoff::new();
    while !backoff.is_completed() {
        if ring.commit() == from {
            return true;
        }
        backoff.snooze();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuse_never_waits() {
        let ring = Ring::new(8);
        assert!(!refuse(&ring, 0, 1));
    }

    #[test]
    fn spin_policies_return_once_satisfied() {
        let ring = Ring::new(8);
        // nothing reserved: a one-slot write fits, commit position 0 is
        // already reached, and nothing is demanded beyond it
        assert!(spin_write(&ring, 0, 1));
        assert!(spin_commit(&ring, 0, 1));
        assert!(spin_read(&ring, 0, 0));
    }

    #[test]
    fn brief_commit_spin_gives_up_on_a_stalled_predecessor() {
        let ring = Ring::new(8);
        assert!(spin_commit_briefly(&ring, 0, 1));
        // a position nobody will ever commit to
        assert!(!spin_commit_briefly(&ring, 5, 6));
    }
}
