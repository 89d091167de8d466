//! flightrec — always-on, lock-free in-process flight recorder.
//!
//! Applications declare named recorders (fixed-capacity circular buffers of
//! event entries) and emit `printf`-style events into them from any number of
//! threads. Recording never blocks, never allocates, and never formats: an
//! event captures a format-string pointer, a process-global order token, a
//! timestamp, the caller location, and up to twelve pre-widened argument
//! words. On demand — typically from a fatal-signal handler or a debugger —
//! [`dump`] merges every recorder into one globally ordered, formatted stream.
//!
//! # Example
//!
//! ```
//! use flightrec::{recorder, record};
//!
//! recorder!(MOVES, 256, "Disk moves");
//!
//! record!(MOVES, "moving disk %d from %s to %s", 3, "left", "right");
//! flightrec::dump_for("MOVES");
//! ```
//!
//! # Key properties
//!
//! - Multi-producer rings with variable-length atomic batches and accurate
//!   overflow accounting; a lapped reader catches up instead of stalling a
//!   writer.
//! - One process-global order token per record call, merged across recorders
//!   at dump time.
//! - The dump path is async-signal-safe: atomics, `write(2)` and fixed stack
//!   scratch buffers only. [`dump_on_common_signals`] wires it to the usual
//!   fatal signals.
//! - Formatting is deferred: floats are bit-packed into argument words at
//!   capture and reconstituted when the format string is scanned at dump
//!   time.

mod clock;
mod dump;
mod entry;
mod export;
mod format;
mod invariants;
mod policy;
mod recorder;
mod registry;
mod ring;
#[cfg(unix)]
mod signal;

pub use clock::{ticks, FRACTION_DIGITS, TICKS_PER_SEC};
pub use dump::{
    configure_format, configure_output, configure_show, configure_type, dump, dump_for, FormatFn,
    Out, ShowFn, TypeFormatFn,
};
pub use entry::{Arg, Entry, EntryKind, EntrySlots};
pub use export::{
    Configurator, ExportInfo, ExportKind, Subscriber, EXPORT_MAGIC, EXPORT_SIZE, EXPORT_VERSION,
};
pub use policy::{refuse, spin_commit, spin_read, spin_write};
pub use recorder::{Message, Recorder};
pub use registry::{blocked_hint, find};
pub use ring::{BlockHook, Ring, RingBuffer, Slot, Written};
#[cfg(unix)]
pub use signal::{dump_on_common_signals, dump_on_signal, SignalError};

/// Declares a static recorder with its ring storage.
///
/// The capacity is a number of entries and should be a power of two. The
/// recorder registers itself in the global registry on its first record.
///
/// ```
/// flightrec::recorder!(TIMING, 32, "Phase timings");
/// ```
#[macro_export]
macro_rules! recorder {
    ($vis:vis $name:ident, $size:expr, $desc:expr) => {
        $vis static $name: $crate::Recorder = {
            static SLOTS: $crate::EntrySlots<{ $size }> = $crate::EntrySlots::new();
            $crate::Recorder::new(::core::stringify!($name), $desc, SLOTS.as_slice())
        };
    };
}

/// Emits one event into a recorder. Accepts 0 to 12 arguments; events with
/// more than four arguments occupy two or three consecutive ring slots
/// sharing one order token and timestamp.
///
/// Arguments are captured by value through [`Arg::from`]: integers are
/// widened with their sign, floats are bit-packed, `&'static str` keeps its
/// pointer and length. Nothing is formatted at the call site.
#[macro_export]
macro_rules! record {
    ($rec:path, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $rec.record($fmt, &[$($crate::Arg::from($arg)),*])
    };
}

/// Like [`record!`] but skips the timestamp stamp, shaving a few nanoseconds
/// off the capture. The order token is still taken, so global ordering holds.
#[macro_export]
macro_rules! record_fast {
    ($rec:path, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $rec.record_fast($fmt, &[$($crate::Arg::from($arg)),*])
    };
}
