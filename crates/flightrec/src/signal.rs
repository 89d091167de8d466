//! Dump-on-signal: fatal and informational signals trigger a full dump.
//!
//! The installed handler records a marker entry into the well-known
//! `SIGNALS` recorder, restores the previous disposition for the signal,
//! dumps every recorder, and finally chains to the previous handler when it
//! was a real one. Restoring before dumping matters: a second fault while
//! dumping terminates the process instead of recursing.

use crate::dump;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use libc::c_int;

crate::recorder!(SIGNALS, 16, "Signals received while the process ran");

/// Signals a handler can be installed for: the classic range. Realtime
/// signals are accepted up to this bound as well.
const MAX_SIGNAL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal {0} out of range")]
    OutOfRange(c_int),
    #[error("sigaction({signal}) failed: errno {errno}")]
    Install { signal: c_int, errno: c_int },
}

/// Previous dispositions, indexed by signal number. Written once under
/// installation, read by the handler.
struct PrevTable {
    installed: [AtomicBool; MAX_SIGNAL],
    actions: [UnsafeCell<MaybeUninit<libc::sigaction>>; MAX_SIGNAL],
}

// Safety: each slot is published through its `installed` flag (Release on
// store, Acquire on load) and only ever written before that flag is raised.
unsafe impl Sync for PrevTable {}

static PREV: PrevTable = PrevTable {
    installed: [const { AtomicBool::new(false) }; MAX_SIGNAL],
    actions: [const { UnsafeCell::new(MaybeUninit::uninit()) }; MAX_SIGNAL],
};

/// Installs a dump-on-signal handler for one signal, remembering the
/// previous disposition so the handler can restore and chain to it.
pub fn dump_on_signal(signal: c_int) -> Result<(), SignalError> {
    if signal < 1 || signal as usize >= MAX_SIGNAL {
        return Err(SignalError::OutOfRange(signal));
    }
    // SAFETY: sigaction with a zero-initialized action we fully populate.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);

        let mut previous: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal, &action, &mut previous) != 0 {
            return Err(SignalError::Install {
                signal,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            });
        }
        (*PREV.actions[signal as usize].get()).write(previous);
    }
    PREV.installed[signal as usize].store(true, Ordering::Release);
    Ok(())
}

/// Installs handlers for the curated signal set, modified by the two
/// bitmasks (bit `n` stands for signal `n`): `add` extends the set,
/// `remove` prunes it.
pub fn dump_on_common_signals(add: u64, remove: u64) -> Result<(), SignalError> {
    let mask = (common_mask() | add) & !remove;
    for signal in 1..MAX_SIGNAL as c_int {
        if mask & (1u64 << signal) != 0 {
            dump_on_signal(signal)?;
        }
    }
    Ok(())
}

fn common_mask() -> u64 {
    let bit = |sig: c_int| 1u64 << sig;
    #[allow(unused_mut)]
    let mut mask = bit(libc::SIGILL)
        | bit(libc::SIGABRT)
        | bit(libc::SIGBUS)
        | bit(libc::SIGSEGV)
        | bit(libc::SIGSYS)
        | bit(libc::SIGXCPU)
        | bit(libc::SIGXFSZ)
        | bit(libc::SIGUSR1)
        | bit(libc::SIGUSR2);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        mask |= bit(libc::SIGSTKFLT) | bit(libc::SIGPWR);
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    {
        mask |= bit(libc::SIGINFO);
    }
    mask
}

extern "C" fn on_signal(signal: c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let addr = fault_address(info);
    crate::record!(
        SIGNALS,
        "Received signal %s (%d) si_addr=%p, dumping recorder",
        signal_name(signal),
        signal,
        addr
    );

    let previous = take_previous(signal);
    if let Some(prev) = previous {
        // SAFETY: restoring a disposition we saved at installation.
        unsafe {
            libc::sigaction(signal, &prev, std::ptr::null_mut());
        }
    }

    dump::dump();

    if let Some(prev) = previous {
        chain(&prev, signal, info, context);
    }
}

fn take_previous(signal: c_int) -> Option<libc::sigaction> {
    let idx = signal as usize;
    if idx >= MAX_SIGNAL || !PREV.installed[idx].swap(false, Ordering::AcqRel) {
        return None;
    }
    // SAFETY: the slot was initialized before `installed` was raised.
    Some(unsafe { (*PREV.actions[idx].get()).assume_init() })
}

/// Invokes the previous handler when it was neither default nor ignore.
fn chain(prev: &libc::sigaction, signal: c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let handler = prev.sa_sigaction;
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        return;
    }
    // SAFETY: SA_SIGINFO selects which of the two handler signatures the
    // stored pointer actually has.
    unsafe {
        if prev.sa_flags & libc::SA_SIGINFO != 0 {
            let f: extern "C" fn(c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                std::mem::transmute(handler);
            f(signal, info, context);
        } else {
            let f: extern "C" fn(c_int) = std::mem::transmute(handler);
            f(signal);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn fault_address(info: *mut libc::siginfo_t) -> *mut libc::c_void {
    if info.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: the kernel hands the handler a valid siginfo under SA_SIGINFO.
    unsafe { (*info).si_addr() }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn fault_address(info: *mut libc::siginfo_t) -> *mut libc::c_void {
    if info.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: the kernel hands the handler a valid siginfo under SA_SIGINFO.
    unsafe { (*info).si_addr }
}

fn signal_name(signal: c_int) -> &'static str {
    match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGCONT => "SIGCONT",
        libc::SIGSTOP => "SIGSTOP",
        libc::SIGTSTP => "SIGTSTP",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGSYS => "SIGSYS",
        _ => "SIG?",
    }
}
