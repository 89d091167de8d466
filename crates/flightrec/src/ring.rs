//! Multi-producer ring with variable-length atomic batches and overflow
//! accounting.
//!
//! # Index protocol
//!
//! Four unbounded u64 sequence numbers describe a ring of `size` slots:
//!
//! ```text
//!   reader ≤ commit ≤ writer        (compared on signed deltas)
//! ```
//!
//! - `[reader, commit)` — stable, readable payload
//! - `[commit, writer)` — reservations in flight, payload not yet stable
//! - `writer − reader ≥ size` — the writer lapped the reader; readers catch
//!   up to `writer − size + 1` and add the skip to `overflow`
//!
//! Slot storage is indexed `seq % size`; sequence numbers never wrap in
//! practice (2^64 events), so ABA on the compare-exchanges is a non-issue.
//!
//! # Memory ordering
//!
//! - Producers load `reader` with Acquire and reserve via compare-exchange on
//!   `writer` (Release on success, Relaxed on failure). The reservation
//!   publishes nothing by itself.
//! - Payload becomes visible through the `commit` compare-exchange (Release),
//!   which a reader pairs with an Acquire load of `commit`.
//! - Readers advance `reader` via compare-exchange (Release on success,
//!   Relaxed on failure) and bump `overflow` with AcqRel so the accounting is
//!   not reordered past the reader advance.
//!
//! # Commit protocol
//!
//! A producer that reserved `[first, first+count)` copies its payload and then
//! tries to move `commit` from `first` to `first+count`. If an earlier
//! producer has not caught up, the compare-exchange fails and the optional
//! commit policy decides: wait (re-read and retry) or skip forward via
//! `fetch_add`. The skip keeps the counters consistent but can expose the
//! stalled producer's slots with stale payload; readers validate and
//! tolerate this (the documented per-ring out-of-order window).

use crate::invariants::{debug_assert_bounded, debug_assert_index_order, debug_assert_monotonic};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

/// A block policy consulted when an operation would stall. Receives the ring
/// header and the affected sequence range `[from, to)`. See [`crate::policy`].
pub type BlockHook = fn(&Ring, u64, u64) -> bool;

/// Result of a write: the first reserved sequence number and how many
/// elements were actually written (possibly truncated by a refusing policy).
#[derive(Debug, Clone, Copy)]
pub struct Written {
    pub first: u64,
    pub count: usize,
}

/// One ring slot. `repr(transparent)` over the payload so a contiguous slot
/// array can be copied to and from as a plain `T` array.
#[repr(transparent)]
pub struct Slot<T>(UnsafeCell<T>);

impl<T> Slot<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Raw pointer to the payload. Writers store through it between
    /// reservation and commit; readers copy out and re-validate the indexes.
    #[inline]
    pub fn get(&self) -> *mut T {
        self.0.get()
    }
}

// Safety: access to the payload is mediated by the ring index protocol;
// concurrent overwrites are tolerated because readers copy then validate.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

#[inline]
fn delta(a: u64, b: u64) -> i64 {
    a.wrapping_sub(b) as i64
}

/// Ring header: capacity plus the four index counters. Owns the whole index
/// protocol; storage lives next to it in [`RingBuffer`] or in a recorder's
/// static slot array.
pub struct Ring {
    size: usize,
    reader: CachePadded<AtomicU64>,
    writer: CachePadded<AtomicU64>,
    commit: CachePadded<AtomicU64>,
    overflow: CachePadded<AtomicU64>,
}

impl Ring {
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            reader: CachePadded::new(AtomicU64::new(0)),
            writer: CachePadded::new(AtomicU64::new(0)),
            commit: CachePadded::new(AtomicU64::new(0)),
            overflow: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Capacity in elements, fixed at creation.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn reader(&self) -> u64 {
        self.reader.load(Ordering::Acquire)
    }

    #[inline]
    pub fn writer(&self) -> u64 {
        self.writer.load(Ordering::Acquire)
    }

    #[inline]
    pub fn commit(&self) -> u64 {
        self.commit.load(Ordering::Acquire)
    }

    /// Entries skipped over by lapped readers since creation.
    #[inline]
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Acquire)
    }

    /// Committed entries readable from an external cursor position.
    #[inline]
    pub fn readable_from(&self, reader_hint: u64) -> usize {
        let avail = delta(self.commit(), reader_hint);
        avail.clamp(0, self.size as i64) as usize
    }

    /// Committed entries readable from the ring's own reader.
    #[inline]
    pub fn readable(&self) -> usize {
        self.readable_from(self.reader())
    }

    /// Slots writable without lapping the reader, keeping one slot free so
    /// full and empty are distinguishable.
    #[inline]
    pub fn writable(&self) -> usize {
        let used = delta(self.writer(), self.reader());
        (self.size as i64 - used - 1).max(0) as usize
    }

    #[inline]
    pub(crate) fn reader_cell(&self) -> &AtomicU64 {
        &self.reader
    }

    /// Reserves up to `want` slots. Without a policy the reservation always
    /// succeeds, overwriting the oldest entries (the flight-recorder
    /// default); a refusing policy truncates to the space left before the
    /// reader.
    pub(crate) fn reserve(&self, want: usize, block: Option<BlockHook>) -> Written {
        let mut count = want.min(self.size);
        loop {
            let w = self.writer.load(Ordering::Relaxed);
            let r = self.reader.load(Ordering::Acquire);
            if count == 0 {
                return Written { first: w, count: 0 };
            }
            let end = w.wrapping_add(count as u64);
            if delta(end, r) > self.size as i64 {
                if let Some(hook) = block {
                    if hook(self, w, end) {
                        continue;
                    }
                    let room = (self.size as i64).saturating_add(delta(r, w)).max(0);
                    count = count.min(room as usize);
                    if count == 0 {
                        return Written { first: w, count: 0 };
                    }
                }
            }
            let end = w.wrapping_add(count as u64);
            debug_assert_bounded!(count, self.size);
            if self
                .writer
                .compare_exchange_weak(w, end, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Written { first: w, count };
            }
        }
    }

    /// Publishes `[first, first+count)` after the payload copy. See the
    /// module docs for the stall-vs-skip policy contract.
    pub(crate) fn commit_range(&self, first: u64, count: usize, commit_block: Option<BlockHook>) {
        if count == 0 {
            return;
        }
        let end = first.wrapping_add(count as u64);
        loop {
            match self
                .commit
                .compare_exchange(first, end, Ordering::Release, Ordering::Relaxed)
            {
                Ok(prev) => {
                    debug_assert_monotonic!("commit", prev, end);
                    return;
                }
                Err(cur) => {
                    if delta(cur, first) > 0 {
                        // A later producer already skipped past our region;
                        // account our slots so commit still converges on writer.
                        self.commit.fetch_add(count as u64, Ordering::AcqRel);
                        return;
                    }
                    match commit_block {
                        Some(hook) if hook(self, first, end) => continue,
                        _ => {
                            self.commit.fetch_add(count as u64, Ordering::AcqRel);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Advances a lapped reader to `commit − size + 1`, accounting the skip.
    /// Returns the current reader position.
    pub(crate) fn catch_up(&self) -> u64 {
        loop {
            let r = self.reader.load(Ordering::Acquire);
            let c = self.commit.load(Ordering::Acquire);
            debug_assert_index_order!(r, c, self.writer.load(Ordering::Relaxed));
            if delta(c, r) < self.size as i64 {
                return r;
            }
            let target = c.wrapping_sub(self.size as u64).wrapping_add(1);
            if self
                .reader
                .compare_exchange(r, target, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.overflow
                    .fetch_add(target.wrapping_sub(r), Ordering::AcqRel);
                return target;
            }
        }
    }

    #[inline]
    pub(crate) fn reader_advance(&self, from: u64, to: u64) -> bool {
        self.reader
            .compare_exchange(from, to, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn add_overflow(&self, n: u64) {
        self.overflow.fetch_add(n, Ordering::AcqRel);
    }
}

/// A ring header plus heap-allocated slot storage: the generic standalone
/// ring. Recorders use the same header over static storage instead.
pub struct RingBuffer<T> {
    ring: Ring,
    slots: Box<[Slot<T>]>,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocates a ring of `capacity` elements. A power of two keeps the
    /// modulo cheap but is not required.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "ring capacity must be at least 2");
        let slots: Box<[Slot<T>]> = (0..capacity).map(|_| Slot::new(T::default())).collect();
        Self {
            ring: Ring::new(capacity),
            slots,
        }
    }

    #[inline]
    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    #[inline]
    pub fn readable(&self) -> usize {
        self.ring.readable()
    }

    #[inline]
    pub fn writable(&self) -> usize {
        self.ring.writable()
    }

    /// Writes `src` as one atomic batch: a single reservation, a payload copy
    /// in up to two contiguous segments, one commit. Returns the first
    /// reserved sequence number and the (possibly truncated) count.
    pub fn write(
        &self,
        src: &[T],
        block: Option<BlockHook>,
        commit_block: Option<BlockHook>,
    ) -> Written {
        let reserved = self.ring.reserve(src.len(), block);
        if reserved.count == 0 {
            return reserved;
        }
        let size = self.ring.size();
        let start = (reserved.first % size as u64) as usize;
        let head = reserved.count.min(size - start);
        // SAFETY: [first, first+count) is exclusively reserved to this
        // producer; the slot array is contiguous and repr(transparent), so
        // writing `head` elements from the slot pointer stays in bounds.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.slots[start].get(), head);
            if head < reserved.count {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(head),
                    self.slots[0].get(),
                    reserved.count - head,
                );
            }
        }
        self.ring.commit_range(reserved.first, reserved.count, commit_block);
        reserved
    }

    /// Reads up to `dst.len()` elements, advancing `reader_slot` (an external
    /// per-consumer cursor) or the ring's own reader.
    ///
    /// When demand exceeds what is committed, `block` may wait for more (true
    /// re-snapshots) or truncate (false). When the writer has lapped the
    /// cursor, `overflow_cb` is consulted: false (or absent) catches the
    /// cursor up to `writer − size + 1`, accounting the skip; true
    /// re-snapshots, letting the callback handle the lap itself.
    pub fn read(
        &self,
        dst: &mut [T],
        reader_slot: Option<&AtomicU64>,
        block: Option<BlockHook>,
        overflow_cb: Option<BlockHook>,
    ) -> usize {
        if dst.is_empty() {
            return 0;
        }
        let cursor = reader_slot.unwrap_or_else(|| self.ring.reader_cell());
        let size = self.ring.size() as u64;
        loop {
            let r = cursor.load(Ordering::Acquire);
            let c = self.ring.commit();
            let w = self.ring.writer();
            let want = dst.len() as u64;
            if (want as i64) > delta(c, r) {
                if let Some(hook) = block {
                    if hook(&self.ring, r, r.wrapping_add(want)) {
                        continue;
                    }
                }
            }
            if delta(w, r) >= size as i64 {
                if let Some(hook) = overflow_cb {
                    if hook(&self.ring, r, w) {
                        continue;
                    }
                }
                let target = w.wrapping_sub(size).wrapping_add(1);
                if cursor
                    .compare_exchange(r, target, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    self.ring.add_overflow(target.wrapping_sub(r));
                }
                continue;
            }
            let avail = delta(c, r).max(0) as u64;
            let n = want.min(avail).min(size) as usize;
            if n == 0 {
                return 0;
            }
            let start = (r % size) as usize;
            let head = n.min(self.ring.size() - start);
            // SAFETY: the copied range sits below `commit`; the validation
            // below discards the copy if a producer lapped it mid-copy.
            unsafe {
                ptr::copy_nonoverlapping(self.slots[start].get(), dst.as_mut_ptr(), head);
                if head < n {
                    ptr::copy_nonoverlapping(
                        self.slots[0].get(),
                        dst.as_mut_ptr().add(head),
                        n - head,
                    );
                }
            }
            let w2 = self.ring.writer();
            if delta(w2, r) > size as i64 {
                continue;
            }
            if cursor
                .compare_exchange(
                    r,
                    r.wrapping_add(n as u64),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return n;
            }
        }
    }

    /// Copies out the element at the reader without advancing it, catching a
    /// lapped reader up first. Returns a copy rather than a reference: a
    /// producer may overwrite the slot at any time, so the copy is validated
    /// against the writer index and retried on conflict.
    pub fn peek(&self) -> Option<T> {
        let size = self.ring.size() as u64;
        loop {
            let r = self.ring.catch_up();
            let c = self.ring.commit();
            if delta(c, r) <= 0 {
                return None;
            }
            let idx = (r % size) as usize;
            // SAFETY: racy copy of a committed slot, validated below.
            let value = unsafe { ptr::read_volatile(self.slots[idx].get()) };
            if delta(self.ring.writer(), r) > size as i64 {
                continue;
            }
            return Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy;

    #[test]
    fn write_then_read_roundtrip() {
        let rb = RingBuffer::<u64>::new(16);
        let w = rb.write(&[10, 20, 30], None, None);
        assert_eq!(w.first, 0);
        assert_eq!(w.count, 3);
        assert_eq!(rb.readable(), 3);

        let mut out = [0u64; 8];
        let n = rb.read(&mut out, None, None, None);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[10, 20, 30]);
        assert_eq!(rb.readable(), 0);
    }

    #[test]
    fn wraps_across_the_boundary() {
        let rb = RingBuffer::<u32>::new(8);
        let mut out = [0u32; 8];

        // push the indexes near the wrap point
        rb.write(&[0, 1, 2, 3, 4, 5], None, None);
        assert_eq!(rb.read(&mut out[..6], None, None, None), 6);

        // this batch straddles slot 7 -> slot 0
        let data = [100, 101, 102, 103];
        let w = rb.write(&data, None, None);
        assert_eq!(w.first, 6);
        let n = rb.read(&mut out[..4], None, None, None);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &data);
    }

    #[test]
    fn readable_writable_arithmetic() {
        let rb = RingBuffer::<u8>::new(8);
        assert_eq!(rb.readable(), 0);
        assert_eq!(rb.writable(), 7); // one slot reserved

        rb.write(&[1, 2, 3], None, None);
        assert_eq!(rb.readable(), 3);
        assert_eq!(rb.writable(), 4);
        assert!(rb.readable() + rb.writable() + 1 <= rb.ring().size());
    }

    #[test]
    fn overwrite_is_the_default_and_overflow_is_accounted() {
        // single producer writes 4x the capacity with no reader
        let size = 32usize;
        let n = 4 * size;
        let rb = RingBuffer::<u64>::new(size);
        for i in 0..n {
            rb.write(&[i as u64], None, None);
        }
        assert_eq!(rb.ring().writer(), n as u64);
        assert_eq!(rb.ring().commit(), n as u64);
        assert_eq!(rb.ring().reader(), 0);

        // the reader catches up to writer - size + 1 and accounts the skip
        let mut out = vec![0u64; size];
        let got = rb.read(&mut out, None, None, None);
        assert_eq!(got, size - 1);
        assert_eq!(out[0], (n - size + 1) as u64);
        assert_eq!(out[got - 1], (n - 1) as u64);
        assert_eq!(rb.ring().reader(), n as u64);
        assert_eq!(rb.ring().overflow(), (n - size + 1) as u64);
    }

    #[test]
    fn refusing_write_policy_truncates_instead_of_overwriting() {
        let rb = RingBuffer::<u8>::new(8);
        let w = rb.write(&[1, 2, 3, 4, 5, 6], None, None);
        assert_eq!(w.count, 6);

        // 6 in flight, room for 2 more before lapping the reader
        let w = rb.write(&[7, 8, 9, 10], Some(policy::refuse), None);
        assert_eq!(w.count, 2);
        assert_eq!(rb.ring().writer(), 8);

        // completely full: truncates to zero, nothing reserved
        let w = rb.write(&[11], Some(policy::refuse), None);
        assert_eq!(w.count, 0);
        assert_eq!(rb.ring().writer(), 8);
    }

    #[test]
    fn external_reader_cursor_leaves_ring_reader_alone() {
        let rb = RingBuffer::<u16>::new(16);
        rb.write(&[5, 6, 7], None, None);

        let cursor = AtomicU64::new(0);
        let mut out = [0u16; 4];
        let n = rb.read(&mut out, Some(&cursor), None, None);
        assert_eq!(n, 3);
        assert_eq!(cursor.load(Ordering::Relaxed), 3);
        assert_eq!(rb.ring().reader(), 0);
        assert_eq!(rb.readable(), 3);
    }

    #[test]
    fn peek_does_not_consume() {
        let rb = RingBuffer::<u64>::new(8);
        assert_eq!(rb.peek(), None);
        rb.write(&[42], None, None);
        assert_eq!(rb.peek(), Some(42));
        assert_eq!(rb.peek(), Some(42));
        assert_eq!(rb.readable(), 1);
    }

    #[test]
    fn peek_catches_up_after_overflow() {
        let rb = RingBuffer::<u64>::new(8);
        for i in 0..20u64 {
            rb.write(&[i], None, None);
        }
        // commit = 20, reader catches up to 20 - 8 + 1 = 13
        assert_eq!(rb.peek(), Some(13));
        assert_eq!(rb.ring().reader(), 13);
        assert_eq!(rb.ring().overflow(), 13);
    }
}
