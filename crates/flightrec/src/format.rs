//! Deferred `printf`-style rendering of captured entries.
//!
//! The format string is scanned at dump time, long after the arguments were
//! captured. Plain characters pass through; a `%` introduces a conversion
//! whose flags, width and precision are parsed into a scratch spec. When the
//! conversion letter denotes a floating-point conversion, the argument word
//! is reconstituted with `f64::from_bits` — the inverse of the capture-time
//! re-pack — and formatted as a float; every other conversion reads the word
//! as an integer or pointer.
//!
//! Everything here renders into fixed stack scratch buffers through
//! `core::fmt`, so the whole path is heap-free and callable from a signal
//! handler. Unsupported conversions (`%n`, `*`) truncate the line; the dump
//! engine appends the newline.

use crate::clock;
use crate::dump::Out;
use crate::entry::Arg;
use crate::recorder::{Message, Recorder};
use core::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A custom single-letter conversion, registered with
/// [`configure_type`]. Receives the captured word and the recorder's
/// trace-enabled flag, so formatters that dereference pointers can refuse to
/// do so on the crash path.
pub type TypeFormatFn = fn(&mut Out, Arg, bool);

struct CustomTable([AtomicUsize; 128]);

static CUSTOM: CustomTable = CustomTable([const { AtomicUsize::new(0) }; 128]);

/// Registers a custom conversion for an ASCII letter, returning any previous
/// registration. Standard conversions are not overridable; custom letters are
/// consulted only when the scanner meets a letter it does not know.
pub fn configure_type(letter: char, f: TypeFormatFn) -> Option<TypeFormatFn> {
    let idx = letter as usize;
    assert!(letter.is_ascii_alphabetic(), "conversion must be a letter");
    let prev = CUSTOM.0[idx].swap(f as usize, Ordering::AcqRel);
    // SAFETY: only TypeFormatFn values are ever stored in the table.
    (prev != 0).then(|| unsafe { std::mem::transmute::<usize, TypeFormatFn>(prev) })
}

fn custom_type(letter: u8) -> Option<TypeFormatFn> {
    if !letter.is_ascii() {
        return None;
    }
    let v = CUSTOM.0[letter as usize].load(Ordering::Acquire);
    // SAFETY: only TypeFormatFn values are ever stored in the table.
    (v != 0).then(|| unsafe { std::mem::transmute::<usize, TypeFormatFn>(v) })
}

/// The default per-entry renderer: order token, bracketed
/// `seconds.fraction:file:line`, recorder name, colon, message. Installed
/// unless [`crate::configure_format`] replaced it.
pub(crate) fn render(out: &mut Out, rec: &Recorder, msg: &Message) {
    let entry = &msg.entry;
    let sec = entry.timestamp / clock::TICKS_PER_SEC;
    let frac = entry.timestamp % clock::TICKS_PER_SEC;
    let _ = write!(out, "{} [{}.{:0>width$}:", entry.order, sec, frac, width = clock::FRACTION_DIGITS);
    if let Some(loc) = entry.location {
        let _ = write!(out, "{}:{}", loc.file(), loc.line());
    }
    let _ = write!(out, "] {}: ", rec.name());
    render_format(out, msg, rec.trace());
    if !msg.entry.format.is_some_and(|f| f.ends_with('\n')) {
        out.put(b"\n");
    }
}

/// Renders the message body by scanning its format string against the
/// captured argument words.
pub(crate) fn render_format(out: &mut Out, msg: &Message, trace: i64) {
    let bytes = msg.entry.format.unwrap_or("").as_bytes();
    let mut i = 0;
    let mut argi = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] != b'%' {
            i += 1;
        }
        out.put(&bytes[start..i]);
        if i >= bytes.len() {
            return;
        }
        i += 1; // past '%'
        if bytes.get(i) == Some(&b'%') {
            out.put(b"%");
            i += 1;
            continue;
        }
        let Some((spec, conv)) = parse_spec(bytes, &mut i) else {
            return; // malformed or unsupported: emit the line truncated
        };
        let arg = msg.arg(argi);
        argi += 1;
        match conv {
            b'd' | b'i' => put_signed(out, &spec, arg.as_i64()),
            b'u' => put_unsigned(out, &spec, arg.as_u64(), 10, false),
            b'x' => put_unsigned(out, &spec, arg.as_u64(), 16, false),
            b'X' => put_unsigned(out, &spec, arg.as_u64(), 16, true),
            b'o' => put_unsigned(out, &spec, arg.as_u64(), 8, false),
            b'c' => put_char(out, &spec, arg),
            b's' | b'S' => put_str(out, &spec, arg),
            b'p' => put_pointer(out, &spec, arg.as_u64()),
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => {
                put_float(out, &spec, conv, arg.as_f64());
            }
            other => match custom_type(other) {
                Some(custom) => custom(out, arg, trace != 0),
                None => return, // %n and friends: truncate
            },
        }
    }
}

#[derive(Default)]
struct Spec {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

/// Parses flags, width, precision and length modifiers after a `%`, leaving
/// `i` past the conversion letter. `None` for `*` or a dangling spec.
fn parse_spec(bytes: &[u8], i: &mut usize) -> Option<(Spec, u8)> {
    let mut spec = Spec::default();
    loop {
        match bytes.get(*i)? {
            b'-' => spec.minus = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'0' => spec.zero = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        *i += 1;
    }
    if bytes.get(*i)? == &b'*' {
        return None;
    }
    while let Some(d) = bytes.get(*i).filter(|b| b.is_ascii_digit()) {
        spec.width = spec.width * 10 + usize::from(d - b'0');
        *i += 1;
    }
    if bytes.get(*i) == Some(&b'.') {
        *i += 1;
        if bytes.get(*i)? == &b'*' {
            return None;
        }
        let mut p = 0usize;
        while let Some(d) = bytes.get(*i).filter(|b| b.is_ascii_digit()) {
            p = p * 10 + usize::from(d - b'0');
            *i += 1;
        }
        spec.precision = Some(p);
    }
    // length modifiers carry no information here: argument words were
    // already widened at capture
    while matches!(
        bytes.get(*i),
        Some(b'h' | b'l' | b'z' | b't' | b'L' | b'j' | b'q')
    ) {
        *i += 1;
    }
    let conv = *bytes.get(*i)?;
    *i += 1;
    Some((spec, conv))
}

/// Fixed-size scratch rendered into through `core::fmt`; silently truncates
/// when full (a 300-digit `%f` still terminates).
struct Scratch<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Scratch<N> {
    fn new() -> Self {
        Scratch {
            buf: [0; N],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn as_str(&self) -> &str {
        // scratch content is produced by core::fmt from valid UTF-8
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }
}

impl<const N: usize> core::fmt::Write for Scratch<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = N - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

fn fill(out: &mut Out, byte: u8, mut n: usize) {
    let chunk = [byte; 16];
    while n > 0 {
        let k = n.min(chunk.len());
        out.put(&chunk[..k]);
        n -= k;
    }
}

/// Emits `prefix` (sign or radix prefix) and `body` honoring width, left
/// justification, and — where the conversion allows it — zero padding
/// between the prefix and the body.
fn pad_out(out: &mut Out, spec: &Spec, prefix: &[u8], body: &[u8], zero_ok: bool) {
    let total = prefix.len() + body.len();
    if spec.width <= total {
        out.put(prefix);
        out.put(body);
        return;
    }
    let filler = spec.width - total;
    if spec.minus {
        out.put(prefix);
        out.put(body);
        fill(out, b' ', filler);
    } else if spec.zero && zero_ok {
        out.put(prefix);
        fill(out, b'0', filler);
        out.put(body);
    } else {
        fill(out, b' ', filler);
        out.put(prefix);
        out.put(body);
    }
}

fn put_signed(out: &mut Out, spec: &Spec, v: i64) {
    let mut digits = Scratch::<24>::new();
    let _ = write!(digits, "{}", v.unsigned_abs());
    let sign: &[u8] = if v < 0 {
        b"-"
    } else if spec.plus {
        b"+"
    } else if spec.space {
        b" "
    } else {
        b""
    };
    put_int_body(out, spec, sign, digits.as_bytes());
}

fn put_unsigned(out: &mut Out, spec: &Spec, v: u64, radix: u32, upper: bool) {
    let mut digits = Scratch::<24>::new();
    let _ = match (radix, upper) {
        (16, false) => write!(digits, "{:x}", v),
        (16, true) => write!(digits, "{:X}", v),
        (8, _) => write!(digits, "{:o}", v),
        _ => write!(digits, "{}", v),
    };
    let prefix: &[u8] = if spec.alt && v != 0 {
        match (radix, upper) {
            (16, false) => b"0x",
            (16, true) => b"0X",
            (8, _) => b"0",
            _ => b"",
        }
    } else {
        b""
    };
    put_int_body(out, spec, prefix, digits.as_bytes());
}

fn put_int_body(out: &mut Out, spec: &Spec, prefix: &[u8], digits: &[u8]) {
    // integer precision means "at least this many digits"; it disables the
    // zero flag, as the C formatter does
    let min_digits = spec.precision.map_or(0, |p| p.saturating_sub(digits.len()));
    let mut body = Scratch::<48>::new();
    for _ in 0..min_digits {
        let _ = body.write_str("0");
    }
    let _ = body.write_str(core::str::from_utf8(digits).unwrap_or(""));
    pad_out(out, spec, prefix, body.as_bytes(), spec.precision.is_none());
}

fn put_char(out: &mut Out, spec: &Spec, arg: Arg) {
    let mut body = Scratch::<8>::new();
    let _ = write!(body, "{}", arg.as_char());
    pad_out(out, spec, b"", body.as_bytes(), false);
}

fn put_str(out: &mut Out, spec: &Spec, arg: Arg) {
    let s = match arg.as_str() {
        Some(s) => s,
        None => "<NULL>",
    };
    let truncated = match spec.precision {
        Some(p) if p < s.len() => {
            // cut at a character boundary at or below the byte precision
            let mut end = p;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            &s[..end]
        }
        _ => s,
    };
    pad_out(out, spec, b"", truncated.as_bytes(), false);
}

fn put_pointer(out: &mut Out, spec: &Spec, v: u64) {
    if v == 0 {
        pad_out(out, spec, b"", b"(nil)", false);
        return;
    }
    let mut body = Scratch::<24>::new();
    let _ = write!(body, "{:x}", v);
    pad_out(out, spec, b"0x", body.as_bytes(), false);
}

fn put_float(out: &mut Out, spec: &Spec, conv: u8, v: f64) {
    let upper = conv.is_ascii_uppercase();
    let sign: &[u8] = if v.is_sign_negative() {
        b"-"
    } else if spec.plus {
        b"+"
    } else if spec.space {
        b" "
    } else {
        b""
    };
    if v.is_nan() {
        pad_out(out, spec, b"", if upper { b"NAN" } else { b"nan" }, false);
        return;
    }
    if v.is_infinite() {
        pad_out(out, spec, sign, if upper { b"INF" } else { b"inf" }, false);
        return;
    }
    let v = v.abs();
    let mut body = Scratch::<352>::new();
    match conv.to_ascii_lowercase() {
        b'f' => {
            let prec = spec.precision.unwrap_or(6);
            let _ = write!(body, "{:.*}", prec, v);
            if spec.alt && prec == 0 {
                let _ = body.write_str(".");
            }
        }
        b'e' => {
            let prec = spec.precision.unwrap_or(6);
            exp_body(&mut body, v, prec, upper);
        }
        b'g' => {
            general_body(&mut body, v, spec, upper);
        }
        b'a' => {
            hex_body(&mut body, v, upper);
        }
        _ => unreachable!(),
    }
    pad_out(out, spec, sign, body.as_bytes(), true);
}

/// `d.ddde±XX` with a signed, at-least-two-digit exponent, built from Rust's
/// exponent formatting.
fn exp_body<const N: usize>(body: &mut Scratch<N>, v: f64, prec: usize, upper: bool) {
    let mut raw = Scratch::<352>::new();
    let _ = write!(raw, "{:.*e}", prec, v);
    let raw = raw.as_str();
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let _ = body.write_str(mantissa);
    let _ = write!(
        body,
        "{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exp < 0 { '-' } else { '+' },
        exp.unsigned_abs()
    );
}

/// C `%g`: pick fixed or exponent style from the decimal exponent of the
/// value rounded to the significant precision, then drop trailing zeros
/// (unless `#` keeps them).
fn general_body<const N: usize>(body: &mut Scratch<N>, v: f64, spec: &Spec, upper: bool) {
    let prec = spec.precision.unwrap_or(6).max(1);
    let exp = if v == 0.0 {
        0
    } else {
        let mut probe = Scratch::<352>::new();
        let _ = write!(probe, "{:.*e}", prec - 1, v);
        probe
            .as_str()
            .split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let mut styled = Scratch::<352>::new();
    if exp >= -4 && (exp as i64) < prec as i64 {
        let fixed_prec = (prec as i64 - 1 - exp as i64) as usize;
        let _ = write!(styled, "{:.*}", fixed_prec, v);
        if spec.alt {
            let _ = body.write_str(styled.as_str());
            return;
        }
        let _ = body.write_str(strip_zeros(styled.as_str()));
    } else {
        exp_body(&mut styled, v, prec - 1, upper);
        if spec.alt {
            let _ = body.write_str(styled.as_str());
            return;
        }
        let s = styled.as_str();
        let (mantissa, exp_part) = s.split_once(if upper { 'E' } else { 'e' }).unwrap_or((s, ""));
        let _ = body.write_str(strip_zeros(mantissa));
        if !exp_part.is_empty() {
            let _ = write!(body, "{}{}", if upper { 'E' } else { 'e' }, exp_part);
        }
    }
}

/// Drops trailing zeros after a decimal point, and the point itself when
/// nothing remains behind it.
fn strip_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    let s = s.trim_end_matches('0');
    s.strip_suffix('.').unwrap_or(s)
}

/// C `%a`: normalized hexadecimal float from the raw bits.
fn hex_body<const N: usize>(body: &mut Scratch<N>, v: f64, upper: bool) {
    let bits = v.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    let (lead, exp) = if raw_exp == 0 {
        (0, if frac == 0 { 0 } else { -1022 })
    } else {
        (1, raw_exp - 1023)
    };
    let mut digits = Scratch::<16>::new();
    let _ = write!(digits, "{:013x}", frac);
    let trimmed = digits.as_str().trim_end_matches('0');
    let _ = body.write_str(if upper { "0X" } else { "0x" });
    let _ = write!(body, "{}", lead);
    if !trimmed.is_empty() {
        let _ = write!(body, ".{}", trimmed);
    }
    let _ = write!(
        body,
        "{}{}{}",
        if upper { 'P' } else { 'p' },
        if exp < 0 { '-' } else { '+' },
        exp.unsigned_abs()
    );
    if upper {
        // mantissa digits uppercase as well
        for b in &mut body.buf[..body.len] {
            *b = b.to_ascii_uppercase();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::tests::render_to_string;
    use crate::entry::{Entry, EntryKind};
    use crate::recorder::Message;

    fn message(format: &'static str, args: &[Arg]) -> Message {
        let mut entry = Entry::EMPTY;
        entry.kind = EntryKind::Message;
        entry.format = Some(format);
        for (dst, src) in entry.args.iter_mut().zip(args) {
            *dst = *src;
        }
        Message::for_tests(entry)
    }

    fn rendered(format: &'static str, args: &[Arg]) -> String {
        let msg = message(format, args);
        render_to_string(|out| render_format(out, &msg, 0))
    }

    #[test]
    fn integers_match_printf() {
        assert_eq!(rendered("%d", &[Arg::from(42)]), "42");
        assert_eq!(rendered("%d", &[Arg::from(-1)]), "-1");
        assert_eq!(rendered("%5d", &[Arg::from(42)]), "   42");
        assert_eq!(rendered("%-5d|", &[Arg::from(42)]), "42   |");
        assert_eq!(rendered("%05d", &[Arg::from(-1)]), "-0001");
        assert_eq!(rendered("%+d", &[Arg::from(42)]), "+42");
        assert_eq!(rendered("% d", &[Arg::from(42)]), " 42");
        assert_eq!(rendered("%.4d", &[Arg::from(42)]), "0042");
        assert_eq!(rendered("%u", &[Arg::from(7u32)]), "7");
        assert_eq!(rendered("%ld", &[Arg::from(-5i64)]), "-5");
    }

    #[test]
    fn radix_conversions_match_printf() {
        assert_eq!(rendered("%x", &[Arg::from(255u32)]), "ff");
        assert_eq!(rendered("%X", &[Arg::from(255u32)]), "FF");
        assert_eq!(rendered("%#x", &[Arg::from(255u32)]), "0xff");
        assert_eq!(rendered("%#X", &[Arg::from(255u32)]), "0XFF");
        assert_eq!(rendered("%o", &[Arg::from(8u32)]), "10");
        assert_eq!(rendered("%#o", &[Arg::from(8u32)]), "010");
        assert_eq!(rendered("%#x", &[Arg::from(0u32)]), "0");
    }

    #[test]
    fn strings_and_chars() {
        assert_eq!(rendered("%s", &[Arg::from("hello")]), "hello");
        assert_eq!(rendered("%.3s", &[Arg::from("hello")]), "hel");
        assert_eq!(rendered("%8s", &[Arg::from("hi")]), "      hi");
        assert_eq!(rendered("%-8s|", &[Arg::from("hi")]), "hi      |");
        assert_eq!(rendered("%s", &[Arg::from(None::<&'static str>)]), "<NULL>");
        assert_eq!(rendered("%S", &[Arg::EMPTY]), "<NULL>");
        assert_eq!(rendered("%c", &[Arg::from('A')]), "A");
    }

    #[test]
    fn pointers() {
        assert_eq!(rendered("%p", &[Arg::from(0x7fff_1234usize as *const u8)]), "0x7fff1234");
        assert_eq!(rendered("%p", &[Arg::from(core::ptr::null::<u8>())]), "(nil)");
    }

    #[test]
    fn fixed_floats_match_printf() {
        assert_eq!(rendered("%f", &[Arg::from(3.1415f64)]), "3.141500");
        assert_eq!(rendered("%f", &[Arg::from(3.1415f32)]), "3.141500");
        assert_eq!(rendered("%.2f", &[Arg::from(2.5f64)]), "2.50");
        assert_eq!(rendered("%10.3f", &[Arg::from(3.14159f64)]), "     3.142");
        assert_eq!(rendered("%010.3f", &[Arg::from(3.14159f64)]), "000003.142");
        assert_eq!(rendered("%f", &[Arg::from(-0.5f64)]), "-0.500000");
        assert_eq!(rendered("%F", &[Arg::from(f64::NAN)]), "NAN");
    }

    #[test]
    fn exponent_floats_match_printf() {
        assert_eq!(rendered("%e", &[Arg::from(2.71828f64)]), "2.718280e+00");
        assert_eq!(rendered("%E", &[Arg::from(2.71828f64)]), "2.718280E+00");
        assert_eq!(rendered("%e", &[Arg::from(0.001f64)]), "1.000000e-03");
        assert_eq!(rendered("%.2e", &[Arg::from(12345.0f64)]), "1.23e+04");
    }

    #[test]
    fn general_floats_match_printf() {
        assert_eq!(rendered("%g", &[Arg::from(2.71828f64)]), "2.71828");
        assert_eq!(rendered("%g", &[Arg::from(100000.0f64)]), "100000");
        assert_eq!(rendered("%g", &[Arg::from(1000000.0f64)]), "1e+06");
        assert_eq!(rendered("%g", &[Arg::from(0.0001f64)]), "0.0001");
        assert_eq!(rendered("%g", &[Arg::from(0.00001f64)]), "1e-05");
        assert_eq!(rendered("%g", &[Arg::from(0.0f64)]), "0");
        assert_eq!(rendered("%.3g", &[Arg::from(3.14159f64)]), "3.14");
    }

    #[test]
    fn hex_floats() {
        assert_eq!(rendered("%a", &[Arg::from(1.0f64)]), "0x1p+0");
        assert_eq!(rendered("%a", &[Arg::from(0.0f64)]), "0x0p+0");
        assert_eq!(rendered("%a", &[Arg::from(2.0f64)]), "0x1p+1");
        assert_eq!(rendered("%a", &[Arg::from(1.5f64)]), "0x1.8p+0");
    }

    #[test]
    fn percent_escape_and_unsupported() {
        assert_eq!(rendered("100%%", &[]), "100%");
        // %n terminates rendering; the line is emitted truncated
        assert_eq!(rendered("before %n after", &[Arg::from(0)]), "before ");
        assert_eq!(rendered("w %*d t", &[Arg::from(1)]), "w ");
        // dangling % at the end is dropped
        assert_eq!(rendered("x%", &[]), "x");
    }

    #[test]
    fn missing_arguments_render_as_zero_values() {
        assert_eq!(rendered("%d %s", &[]), "0 <NULL>");
    }

    #[test]
    fn custom_conversion_sees_the_trace_flag() {
        fn upper_tag(out: &mut Out, arg: Arg, tracing: bool) {
            let _ = write!(out, "<{}:{}>", arg.as_u64(), tracing);
        }
        assert!(configure_type('k', upper_tag).is_none());
        let msg = message("%k", &[Arg::from(9u32)]);
        let text = render_to_string(|out| render_format(out, &msg, 1));
        assert_eq!(text, "<9:true>");
        let text = render_to_string(|out| render_format(out, &msg, 0));
        assert_eq!(text, "<9:false>");
    }
}
