//! Process-wide recorder registry and global counters.
//!
//! Three zero-initialized atomics form the shared spine of the system: the
//! registry head, the order counter handing out one token per record call,
//! and the block counter hinting to producers that a dump is in progress.
//! The registry is an intrusive lock-free singly-linked list rather than a
//! keyed map: the only operations are append-once and full traversal, both
//! of which must work from a signal handler where rehashing is off the
//! table. Recorders are never unregistered.

use crate::recorder::Recorder;
use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

static HEAD: AtomicPtr<Recorder> = AtomicPtr::new(ptr::null_mut());
static ORDER: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static BLOCKED: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));

/// Takes the next process-global order token. Strictly monotonic across all
/// recorders and threads.
#[inline]
pub(crate) fn next_order() -> u64 {
    ORDER.fetch_add(1, Ordering::AcqRel)
}

/// Number of outstanding dumpers. Purely a quiesce hint: producers may check
/// it to skip recording while a dump walks the rings, but nothing enforces
/// that.
#[inline]
pub fn blocked_hint() -> u64 {
    BLOCKED.load(Ordering::Acquire)
}

/// RAII increment of the block counter for the duration of a dump.
pub(crate) struct DumpGuard;

impl DumpGuard {
    pub(crate) fn new() -> Self {
        BLOCKED.fetch_add(1, Ordering::AcqRel);
        DumpGuard
    }
}

impl Drop for DumpGuard {
    fn drop(&mut self) {
        BLOCKED.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pushes a recorder onto the registry head. Called exactly once per
/// recorder, by the producer that wins slot zero of its ring.
pub(crate) fn register(rec: &'static Recorder) {
    let node = rec as *const Recorder as *mut Recorder;
    let mut head = HEAD.load(Ordering::Acquire);
    loop {
        rec.set_next(head);
        match HEAD.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(cur) => head = cur,
        }
    }
}

/// Iterator over all registered recorders, newest first.
pub(crate) struct Iter {
    cur: *mut Recorder,
}

impl Iterator for Iter {
    type Item = &'static Recorder;

    fn next(&mut self) -> Option<&'static Recorder> {
        if self.cur.is_null() {
            return None;
        }
        // SAFETY: registered recorders are statics and are never destroyed.
        let rec = unsafe { &*self.cur };
        self.cur = rec.next_ptr();
        Some(rec)
    }
}

pub(crate) fn iter() -> Iter {
    Iter {
        cur: HEAD.load(Ordering::Acquire),
    }
}

/// Finds a recorder by exact name, by linear scan. Safe to call from a
/// signal handler.
pub fn find(name: &str) -> Option<&'static Recorder> {
    iter().find(|rec| rec.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_tokens_are_strictly_increasing() {
        let a = next_order();
        let b = next_order();
        assert!(b > a);
    }

    #[test]
    fn dump_guard_raises_and_lowers_the_hint() {
        let before = blocked_hint();
        {
            let _guard = DumpGuard::new();
            assert!(blocked_hint() > before);
        }
        assert_eq!(blocked_hint(), before);
    }

    #[test]
    fn find_misses_unregistered_names() {
        assert!(find("no-such-recorder").is_none());
    }
}
