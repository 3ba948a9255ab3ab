//! Per-thread CPU clocks.
//!
//! The execution profiler needs to read the CPU time consumed by *another*
//! thread, which the standard library does not expose. POSIX does, through
//! `pthread_getcpuclockid`: a thread captures its own CPU clock id once at
//! startup and hands it to the profiler, which can then sample it from the
//! sweeper thread at any time.

use std::io;
use std::time::Duration;

/// Handle to the CPU-time clock of a single thread.
///
/// Must be created on the thread it measures; sampling via [`elapsed`]
/// may happen from any thread.
///
/// [`elapsed`]: ThreadCpuClock::elapsed
#[derive(Clone, Copy, Debug)]
pub struct ThreadCpuClock {
    clock_id: libc::clockid_t,
}

impl ThreadCpuClock {
    /// Captures the CPU clock of the calling thread.
    pub fn for_current_thread() -> io::Result<Self> {
        let mut clock_id: libc::clockid_t = 0;
        // SAFETY: pthread_self() is always a valid thread handle and
        // clock_id is a plain out-parameter.
        let rc = unsafe { libc::pthread_getcpuclockid(libc::pthread_self(), &mut clock_id) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(Self { clock_id })
    }

    /// CPU time consumed so far by the measured thread.
    pub fn elapsed(&self) -> Duration {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: clock_id was obtained from pthread_getcpuclockid and ts
        // is a plain out-parameter.
        let rc = unsafe { libc::clock_gettime(self.clock_id, &mut ts) };
        if rc != 0 {
            // The measured thread has exited and its clock is gone; report
            // no further progress rather than failing the sweep.
            return Duration::ZERO;
        }
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }
}
