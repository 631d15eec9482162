//! Platform services for the soup VM.
//!
//! The object memory and the analyzer consume the operating system through
//! this crate only: a monotonic clock, sleeping, printing, process control
//! and the processor count. Everything is expressed over `std`; the clock
//! is anchored at the first query so timestamps are small and monotone.

#![warn(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

/// Microseconds per millisecond.
pub const MICROS_PER_MILLI: u64 = 1000;
/// Microseconds per second.
pub const MICROS_PER_SECOND: u64 = 1_000_000;

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Monotonic time since the first clock query, in microseconds.
pub fn current_monotonic_micros() -> u64 {
    anchor().elapsed().as_micros() as u64
}

/// Monotonic time since the first clock query, in milliseconds.
pub fn current_monotonic_millis() -> u64 {
    current_monotonic_micros() / MICROS_PER_MILLI
}

/// Suspend the calling thread for at least `micros` microseconds.
pub fn sleep_micros(micros: u64) {
    std::thread::sleep(std::time::Duration::from_micros(micros));
}

/// Number of logical processors available to this process.
///
/// Reports 1 when the platform cannot tell.
pub fn number_of_available_processors() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Write a line to stdout and flush it.
pub fn print(message: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{message}");
    let _ = out.flush();
}

/// Write a line to stderr and flush it.
pub fn print_err(message: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{message}");
    let _ = err.flush();
}

/// Terminate the process abnormally.
pub fn abort() -> ! {
    std::process::abort();
}

/// Terminate the process with the given status code.
pub fn exit(code: i32) -> ! {
    std::process::exit(code);
}
