//! Loom-based concurrency tests.
//!
//! Run with: `cargo test --features loom --test loom --release`
//!
//! Loom exhaustively explores thread interleavings. The full ring is too
//! large a state space, so the core commit protocol is modeled in isolation
//! with a small slot count: concurrent producers reserve via compare-exchange
//! on `writer`, store, then publish through `commit` in reservation order.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

struct LoomRing {
    writer: AtomicU64,
    commit: AtomicU64,
    slots: UnsafeCell<[u64; 4]>,
}

// Safety: slot writes are confined to reserved indexes; reads happen after
// both producers joined.
unsafe impl Send for LoomRing {}
unsafe impl Sync for LoomRing {}

impl LoomRing {
    fn new() -> Self {
        Self {
            writer: AtomicU64::new(0),
            commit: AtomicU64::new(0),
            slots: UnsafeCell::new([0; 4]),
        }
    }

    /// Reserve one slot, store `value`, publish in reservation order.
    fn produce(&self, value: u64) {
        let mut seq = self.writer.load(Ordering::Relaxed);
        loop {
            match self.writer.compare_exchange_weak(
                seq,
                seq + 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(cur) => seq = cur,
            }
        }
        // SAFETY: seq is exclusively ours until commit passes it.
        unsafe {
            (*self.slots.get())[seq as usize % 4] = value;
        }
        // wait for earlier producers, then publish
        while self
            .commit
            .compare_exchange(seq, seq + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            loom::thread::yield_now();
        }
    }
}

#[test]
fn commit_advances_only_over_fully_stored_slots() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());

        let handles: Vec<_> = (0..2u64)
            .map(|i| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || ring.produce(100 + i))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ring.writer.load(Ordering::Acquire), 2);
        assert_eq!(ring.commit.load(Ordering::Acquire), 2);
        // SAFETY: producers joined; no concurrent access remains.
        let slots = unsafe { *ring.slots.get() };
        let mut seen: Vec<u64> = slots[..2].to_vec();
        seen.sort_unstable();
        assert_eq!(seen, vec![100, 101]);
    });
}

#[test]
fn interleaved_reservation_never_loses_a_slot() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());

        let a = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                ring.produce(1);
                ring.produce(2);
            })
        };
        ring.produce(3);
        a.join().unwrap();

        assert_eq!(ring.commit.load(Ordering::Acquire), 3);
        // SAFETY: the other producer joined.
        let slots = unsafe { *ring.slots.get() };
        let mut seen: Vec<u64> = slots[..3].to_vec();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    });
}
