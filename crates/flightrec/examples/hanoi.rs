//! Tower of Hanoi with a recorder on every disk move.
//!
//! Run with `cargo run --example hanoi`, then inspect the timing dump it
//! prints, or send the process SIGUSR1 mid-run for a live dump.

use flightrec::{record, record_fast, recorder};

recorder!(MOVE, 1024, "Disk moves");
recorder!(TIMING, 32, "Phase timings");

fn hanoi(disks: u32, from: u32, to: u32, via: u32) {
    if disks == 0 {
        return;
    }
    hanoi(disks - 1, from, via, to);
    record!(MOVE, "move disk %u from %u to %u", disks, from, to);
    hanoi(disks - 1, to, from, via);
}

fn hanoi_fast(disks: u32, from: u32, to: u32, via: u32) {
    if disks == 0 {
        return;
    }
    hanoi_fast(disks - 1, from, via, to);
    record_fast!(MOVE, "fast move disk %u from %u to %u", disks, from, to);
    hanoi_fast(disks - 1, to, from, via);
}

fn main() {
    #[cfg(unix)]
    flightrec::dump_on_common_signals(0, 0).expect("install signal handlers");

    record!(TIMING, "begin record phase");
    hanoi(20, 0, 2, 1);
    record!(TIMING, "end record phase");

    record!(TIMING, "begin fast-record phase");
    hanoi_fast(20, 0, 2, 1);
    record!(TIMING, "end fast-record phase");

    // only the timing recorder; the move recorder kept just its last 1024
    flightrec::dump_for("TIMING");
}
