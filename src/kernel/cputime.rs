/// Clocks that supervisors charge work against
use std::time::{Duration, Instant};

/// Monotonic time source. `now` is measured from an arbitrary fixed origin.
pub trait CpuClock: Send + Sync {
    fn now(&self) -> Duration;
    fn name(&self) -> &'static str;
}

/// CPU time consumed by every thread of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCpuClock;

impl CpuClock for ProcessCpuClock {
    fn now(&self) -> Duration {
        process_cpu_time()
    }

    fn name(&self) -> &'static str {
        "process-cpu"
    }
}

/// Wall-clock time, for I/O-bound work that a CPU clock would never charge
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuClock for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn name(&self) -> &'static str {
        "wall"
    }
}

/// Read CLOCK_PROCESS_CPUTIME_ID. Returns zero if the clock is unavailable.
pub fn process_cpu_time() -> Duration {
    read_clock(libc::CLOCK_PROCESS_CPUTIME_ID)
}

/// Read CLOCK_THREAD_CPUTIME_ID for the calling thread
pub fn thread_cpu_time() -> Duration {
    read_clock(libc::CLOCK_THREAD_CPUTIME_ID)
}

fn read_clock(clock: libc::clockid_t) -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.clamp(0, 999_999_999) as u32)
}
