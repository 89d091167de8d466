//! Named recorders: a ring of event entries plus registry linkage.
//!
//! The record path is the hot path of the whole crate. It takes one global
//! order token, stamps the clock, reserves one to three slots with a single
//! compare-exchange, stores the entries and commits. No locks, no heap, no
//! formatting. The first successful write (the one that wins slot zero)
//! additionally links the recorder into the global registry.

use crate::clock;
use crate::entry::{Arg, Entry, EntryKind};
use crate::policy;
use crate::registry;
use crate::ring::{Ring, Slot};
use core::panic::Location;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};

/// Up to four arguments ride in the head entry; each continuation entry
/// carries four more, to the overall cap of twelve.
const ARGS_PER_SLOT: usize = 4;
const MAX_ARGS: usize = 12;

/// A named, fixed-capacity circular buffer of event entries.
///
/// Declared as a `static` through the [`crate::recorder!`] macro, which also
/// provides the slot storage. Recorders are never destroyed.
pub struct Recorder {
    name: &'static str,
    description: &'static str,
    /// Enablement knob shared with live-trace layers outside the core;
    /// atomically settable from any thread. The record path itself does not
    /// consult it.
    trace: AtomicI64,
    next: AtomicPtr<Recorder>,
    ring: Ring,
    slots: &'static [Slot<Entry>],
    /// Opaque export-channel handles for a visualization collaborator; see
    /// [`crate::export`].
    exports: [AtomicPtr<()>; 4],
}

impl Recorder {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        slots: &'static [Slot<Entry>],
    ) -> Self {
        Self {
            name,
            description,
            trace: AtomicI64::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
            ring: Ring::new(slots.len()),
            slots,
            exports: [const { AtomicPtr::new(ptr::null_mut()) }; 4],
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn description(&self) -> &'static str {
        self.description
    }

    #[inline]
    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Current value of the trace-enablement knob.
    #[inline]
    pub fn trace(&self) -> i64 {
        self.trace.load(Ordering::Acquire)
    }

    /// Sets the trace-enablement knob.
    #[inline]
    pub fn set_trace(&self, value: i64) {
        self.trace.store(value, Ordering::Release);
    }

    pub(crate) fn set_next(&self, next: *mut Recorder) {
        self.next.store(next, Ordering::Relaxed);
    }

    pub(crate) fn next_ptr(&self) -> *mut Recorder {
        self.next.load(Ordering::Acquire)
    }

    /// Records one event. Use through [`crate::record!`], which packs the
    /// arguments.
    #[track_caller]
    pub fn record(&'static self, format: &'static str, args: &[Arg]) {
        self.emit(format, args, clock::ticks(), Location::caller());
    }

    /// Records one event without stamping the clock, shaving a few
    /// nanoseconds. The order token is still taken, so the event sorts
    /// correctly in a dump; only its rendered time reads zero.
    #[track_caller]
    pub fn record_fast(&'static self, format: &'static str, args: &[Arg]) {
        self.emit(format, args, 0, Location::caller());
    }

    fn emit(
        &'static self,
        format: &'static str,
        args: &[Arg],
        timestamp: u64,
        location: &'static Location<'static>,
    ) {
        let order = registry::next_order();
        let nargs = args.len().min(MAX_ARGS);
        let nslots = 1 + nargs.saturating_sub(ARGS_PER_SLOT).div_ceil(ARGS_PER_SLOT);

        let mut entries = [Entry::EMPTY; 3];
        for (slot, chunk) in entries.iter_mut().zip(args[..nargs].chunks(ARGS_PER_SLOT)) {
            for (dst, src) in slot.args.iter_mut().zip(chunk) {
                *dst = *src;
            }
        }
        entries[0].kind = EntryKind::Message;
        entries[0].format = Some(format);
        entries[0].location = Some(location);
        for entry in &mut entries[..nslots] {
            entry.order = order;
            entry.timestamp = timestamp;
            if entry.kind == EntryKind::Empty {
                entry.kind = EntryKind::Continuation;
            }
        }

        let first = self.store(&entries[..nslots]);
        if first == 0 {
            registry::register(self);
        }
    }

    /// Reserves, stores and commits a batch of entries; returns the first
    /// reserved sequence number.
    fn store(&self, entries: &[Entry]) -> u64 {
        // No write policy: the recorder overwrites its oldest entries.
        let reserved = self.ring.reserve(entries.len(), None);
        let size = self.ring.size() as u64;
        for (i, entry) in entries[..reserved.count].iter().enumerate() {
            let idx = (reserved.first.wrapping_add(i as u64) % size) as usize;
            // SAFETY: the slot range is exclusively reserved to this producer
            // until commit; dump readers copy out and validate.
            unsafe {
                ptr::write_volatile(self.slots[idx].get(), *entry);
            }
        }
        // Spin briefly for an earlier stalled producer, then skip: bounded
        // waiting keeps per-recorder ordering tight without risking live-lock
        // when a producer is preempted mid-copy.
        self.ring.commit_range(
            reserved.first,
            reserved.count,
            Some(policy::spin_commit_briefly),
        );
        reserved.first
    }

    /// Copies out the next readable entry without consuming it, catching a
    /// lapped reader up first (accounted in the ring's overflow counter).
    pub fn peek(&self) -> Option<Entry> {
        let size = self.ring.size() as u64;
        loop {
            let r = self.ring.catch_up();
            let c = self.ring.commit();
            if c.wrapping_sub(r) as i64 <= 0 {
                return None;
            }
            let idx = (r % size) as usize;
            // SAFETY: racy copy of a committed slot, validated below.
            let entry = unsafe { ptr::read_volatile(self.slots[idx].get()) };
            if self.ring.writer().wrapping_sub(r) as i64 > size as i64 {
                continue; // lapped mid-copy, the slot was reused
            }
            return Some(entry);
        }
    }

    /// Consumes and returns the next readable entry of any kind.
    fn take(&self) -> Option<Entry> {
        let size = self.ring.size() as u64;
        loop {
            let r = self.ring.catch_up();
            let c = self.ring.commit();
            if c.wrapping_sub(r) as i64 <= 0 {
                return None;
            }
            let idx = (r % size) as usize;
            // SAFETY: racy copy of a committed slot, validated below.
            let entry = unsafe { ptr::read_volatile(self.slots[idx].get()) };
            if self.ring.writer().wrapping_sub(r) as i64 > size as i64 {
                continue;
            }
            if self.ring.reader_advance(r, r.wrapping_add(1)) {
                return Some(entry);
            }
        }
    }

    /// Like [`Recorder::peek`], but discards non-message heads (orphaned
    /// continuations whose head entry fell to an overflow, empty slots
    /// exposed by a commit skip) so the returned entry is always a message.
    pub fn peek_message(&self) -> Option<Entry> {
        loop {
            let entry = self.peek()?;
            if entry.kind == EntryKind::Message {
                return Some(entry);
            }
            let _ = self.take();
        }
    }

    /// Consumes the next message together with its continuation entries.
    ///
    /// Orphaned continuations (their head entry fell to an overflow) and
    /// empty slots exposed by a commit skip are discarded. A lap racing the
    /// gather can cost one trailing event; the lap itself is already in the
    /// overflow accounting.
    pub fn take_message(&self) -> Option<Message> {
        loop {
            let entry = self.take()?;
            if entry.kind != EntryKind::Message {
                continue;
            }
            let mut extra = [Arg::EMPTY; 8];
            let mut extra_len = 0;
            while extra_len < extra.len() {
                match self.peek() {
                    Some(c) if c.kind == EntryKind::Continuation && c.order == entry.order => {
                        match self.take() {
                            Some(c)
                                if c.kind == EntryKind::Continuation && c.order == entry.order =>
                            {
                                extra[extra_len..extra_len + ARGS_PER_SLOT]
                                    .copy_from_slice(&c.args);
                                extra_len += ARGS_PER_SLOT;
                            }
                            _ => break,
                        }
                    }
                    _ => break,
                }
            }
            return Some(Message {
                entry,
                extra,
                extra_len,
            });
        }
    }

    /// Attaches an opaque export-channel handle (see [`crate::export`]).
    pub fn attach_export(&self, slot: usize, handle: *mut ()) {
        self.exports[slot].store(handle, Ordering::Release);
    }

    pub fn export(&self, slot: usize) -> *mut () {
        self.exports[slot].load(Ordering::Acquire)
    }
}

/// A consumed message: the head entry plus any continuation arguments.
pub struct Message {
    pub entry: Entry,
    extra: [Arg; 8],
    extra_len: usize,
}

impl Message {
    #[cfg(test)]
    pub(crate) fn for_tests(entry: Entry) -> Self {
        Message {
            entry,
            extra: [Arg::EMPTY; 8],
            extra_len: 0,
        }
    }

    /// The i-th captured argument; [`Arg::EMPTY`] past the captured count
    /// (a format string over-consuming renders zeros and `<NULL>`, never
    /// garbage).
    pub fn arg(&self, i: usize) -> Arg {
        if i < ARGS_PER_SLOT {
            self.entry.args[i]
        } else if i - ARGS_PER_SLOT < self.extra_len {
            self.extra[i - ARGS_PER_SLOT]
        } else {
            Arg::EMPTY
        }
    }
}
