//! On-demand dump: cross-recorder merge by order token through a
//! configurable byte sink.
//!
//! The dump path must be callable from a signal handler, so it restricts
//! itself to atomic loads and compare-exchanges, `write(2)`-style sinks and
//! stack scratch buffers. The traversal walks the intrusive registry; no
//! auxiliary structures are built. Reading an entry consumes it, so
//! repeated dumps show only what was recorded since the previous one.

use crate::format;
use crate::recorder::{Message, Recorder};
use crate::registry;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Byte sink: receives a buffer and the configured output context, returns
/// the number of bytes taken (a short count reports a sink error; the engine
/// does not retry).
pub type ShowFn = fn(&[u8], *mut c_void) -> isize;

/// Per-entry renderer, replaceable with [`configure_format`].
pub type FormatFn = fn(&mut Out, &Recorder, &Message);

pub use crate::format::{configure_type, TypeFormatFn};

static SHOW: AtomicUsize = AtomicUsize::new(0);
static OUTPUT: AtomicUsize = AtomicUsize::new(0);
static FORMAT: AtomicUsize = AtomicUsize::new(0);

/// The default sink: `write(2)` to standard error, or to the file
/// descriptor smuggled through [`configure_output`].
#[cfg(unix)]
fn default_show(buf: &[u8], output: *mut c_void) -> isize {
    let fd = if output.is_null() {
        libc::STDERR_FILENO
    } else {
        output as isize as libc::c_int
    };
    // SAFETY: plain write(2) on a caller-supplied descriptor.
    unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) as isize }
}

#[cfg(not(unix))]
fn default_show(buf: &[u8], _output: *mut c_void) -> isize {
    use std::io::Write as _;
    let mut err = std::io::stderr().lock();
    err.write_all(buf).map_or(-1, |()| buf.len() as isize)
}

/// Replaces the byte sink, returning the previous one.
pub fn configure_show(show: ShowFn) -> ShowFn {
    let prev = SHOW.swap(show as usize, Ordering::AcqRel);
    decode_show(prev)
}

/// Replaces the sink context pointer (the default sink reads it as a file
/// descriptor), returning the previous one.
pub fn configure_output(output: *mut c_void) -> *mut c_void {
    OUTPUT.swap(output as usize, Ordering::AcqRel) as *mut c_void
}

/// Replaces the per-entry renderer, returning the previous one.
pub fn configure_format(render: FormatFn) -> FormatFn {
    let prev = FORMAT.swap(render as usize, Ordering::AcqRel);
    decode_format(prev)
}

fn decode_show(raw: usize) -> ShowFn {
    if raw == 0 {
        default_show
    } else {
        // SAFETY: only ShowFn values are ever stored.
        unsafe { std::mem::transmute::<usize, ShowFn>(raw) }
    }
}

fn decode_format(raw: usize) -> FormatFn {
    if raw == 0 {
        format::render
    } else {
        // SAFETY: only FormatFn values are ever stored.
        unsafe { std::mem::transmute::<usize, FormatFn>(raw) }
    }
}

/// Line-buffered writer over the configured sink. Lives on the stack of the
/// dumper; rendering goes through `core::fmt` into its fixed buffer, so no
/// heap is touched on the way out.
pub struct Out {
    show: ShowFn,
    output: *mut c_void,
    buf: [u8; 512],
    len: usize,
    short_write: bool,
}

impl Out {
    pub(crate) fn new(show: ShowFn, output: *mut c_void) -> Self {
        Out {
            show,
            output,
            buf: [0; 512],
            len: 0,
            short_write: false,
        }
    }

    /// Appends bytes, flushing to the sink whenever the buffer fills.
    pub fn put(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let room = self.buf.len() - self.len;
            if room == 0 {
                self.flush();
                continue;
            }
            let n = bytes.len().min(room);
            self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
            self.len += n;
            bytes = &bytes[n..];
        }
    }

    /// Pushes buffered bytes to the sink. A short count from the sink is
    /// remembered but not retried.
    pub fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        let taken = (self.show)(&self.buf[..self.len], self.output);
        if taken < self.len as isize {
            self.short_write = true;
        }
        self.len = 0;
    }

    /// Whether any sink write came up short during this dump.
    pub fn short_write(&self) -> bool {
        self.short_write
    }
}

impl core::fmt::Write for Out {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.put(s.as_bytes());
        Ok(())
    }
}

/// Renders every recorder to the configured sink, globally ordered by order
/// token.
pub fn dump() {
    dump_for("");
}

/// Like [`dump`] but renders only recorders whose name contains `pattern`.
///
/// The merge repeatedly asks each matching recorder for its next readable
/// entry: entries carrying the expected token stream out directly, and when
/// nobody holds the expected token the lowest pending one is consumed and
/// the expectation resynchronized past it. Entries read during the dump are
/// consumed; the block-counter hint advises producers for the duration.
pub fn dump_for(pattern: &str) {
    let _guard = registry::DumpGuard::new();
    let show = decode_show(SHOW.load(Ordering::Acquire));
    let output = OUTPUT.load(Ordering::Acquire) as *mut c_void;
    let render_fn = decode_format(FORMAT.load(Ordering::Acquire));
    let mut out = Out::new(show, output);

    let mut next_order = 0u64;
    loop {
        let mut emitted = false;
        let mut lowest: Option<(&'static Recorder, u64)> = None;
        for rec in registry::iter() {
            if !pattern.is_empty() && !rec.name().contains(pattern) {
                continue;
            }
            loop {
                let Some(head) = rec.peek_message() else { break };
                if head.order <= next_order {
                    // the expected token, or one from the documented
                    // per-recorder out-of-order window: emit it now
                    if let Some(msg) = rec.take_message() {
                        render_fn(&mut out, rec, &msg);
                        next_order = next_order.max(msg.entry.order + 1);
                        emitted = true;
                    }
                    // a failed take means an overflow intervened; re-peek
                } else {
                    if lowest.map_or(true, |(_, order)| head.order < order) {
                        lowest = Some((rec, head.order));
                    }
                    break;
                }
            }
        }
        if !emitted {
            let Some((rec, _)) = lowest else { break };
            if let Some(msg) = rec.take_message() {
                render_fn(&mut out, rec, &msg);
                next_order = next_order.max(msg.entry.order + 1);
            }
        }
    }
    out.flush();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{record, recorder};
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that swap the process-global sink configuration.
    fn config_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn collect_show(buf: &[u8], output: *mut c_void) -> isize {
        // SAFETY: tests pass a pointer to a live Vec<u8>.
        let sink = unsafe { &mut *output.cast::<Vec<u8>>() };
        sink.extend_from_slice(buf);
        buf.len() as isize
    }

    /// Renders through a fresh capture sink and returns the bytes as text.
    pub(crate) fn render_to_string(f: impl FnOnce(&mut Out)) -> String {
        let mut sink: Vec<u8> = Vec::new();
        let mut out = Out::new(collect_show, std::ptr::addr_of_mut!(sink).cast());
        f(&mut out);
        out.flush();
        String::from_utf8(sink).expect("rendered output is UTF-8")
    }

    #[test]
    fn out_buffers_and_flushes_in_order() {
        let text = render_to_string(|out| {
            // more than one buffer's worth, in odd-sized chunks
            for i in 0..200 {
                let b = [b'a' + (i % 26) as u8; 7];
                out.put(&b);
            }
        });
        assert_eq!(text.len(), 1400);
        assert!(text.starts_with("aaaaaaabbbbbbb"));
    }

    #[test]
    fn configure_show_returns_previous() {
        let _guard = config_lock();
        let prev = configure_show(collect_show);
        let replaced = configure_show(prev);
        assert_eq!(replaced as usize, collect_show as usize);
    }

    #[test]
    fn dump_renders_pattern_matches_in_token_order() {
        let _guard = config_lock();
        recorder!(DUMP_MERGE_A, 8, "merge a");
        recorder!(DUMP_MERGE_B, 8, "merge b");
        record!(DUMP_MERGE_A, "a one");
        record!(DUMP_MERGE_B, "b one");
        record!(DUMP_MERGE_A, "a two");

        let mut sink: Vec<u8> = Vec::new();
        let prev_show = configure_show(collect_show);
        let prev_out = configure_output(std::ptr::addr_of_mut!(sink).cast());
        dump_for("DUMP_MERGE_");
        configure_show(prev_show);
        configure_output(prev_out);

        let text = String::from_utf8(sink).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("DUMP_MERGE_A: a one"));
        assert!(lines[1].contains("DUMP_MERGE_B: b one"));
        assert!(lines[2].contains("DUMP_MERGE_A: a two"));

        let orders: Vec<u64> = lines
            .iter()
            .map(|l| l.split(' ').next().unwrap().parse().unwrap())
            .collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));

        // a second dump has nothing left to show
        let mut sink2: Vec<u8> = Vec::new();
        let prev_show = configure_show(collect_show);
        let prev_out = configure_output(std::ptr::addr_of_mut!(sink2).cast());
        dump_for("DUMP_MERGE_");
        configure_show(prev_show);
        configure_output(prev_out);
        assert!(sink2.is_empty());
    }
}
