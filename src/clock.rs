//! Per-operation clocks and their resolution checks
//!
//! The timing detector is only meaningful when the clock used to time each
//! signature resolves differences well below the cost of one signing
//! operation. A clock that cannot is reported as unavailable and the timing
//! check is skipped.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityUnavailable {
    #[error("per-thread CPU time is not available on this platform")]
    CpuTimeUnsupported,
    #[error("clock never advanced between consecutive reads")]
    ClockStalled,
    #[error("clock resolution {resolution_ns:.1} ns is coarser than {max_ns:.1} ns")]
    CoarseClock { resolution_ns: f64, max_ns: f64 },
    #[error("{missing} of {total} samples carry no elapsed time")]
    MissingTimings { missing: usize, total: usize },
    #[error("only {unique} distinct timing values across {total} samples")]
    QuantizedTimings { unique: usize, total: usize },
}

/// A monotonic source of nanosecond timestamps.
pub trait Clock {
    fn name(&self) -> &'static str;
    fn now_ns(&self) -> u64;
}

/// Wall clock backed by [`Instant`], relative to its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn name(&self) -> &'static str {
        "monotonic"
    }

    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// CPU time consumed by the calling thread (`CLOCK_THREAD_CPUTIME_ID`).
///
/// Time spent descheduled is not counted, so other load on the machine does
/// not show up as signing cost. Only meaningful on the thread that created
/// it, hence not `Send`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadCpuClock {
    _thread: PhantomData<*const ()>,
}

impl ThreadCpuClock {
    pub fn new() -> Result<Self, CapabilityUnavailable> {
        thread_cpu_ns().ok_or(CapabilityUnavailable::CpuTimeUnsupported)?;
        Ok(Self {
            _thread: PhantomData,
        })
    }
}

impl Clock for ThreadCpuClock {
    fn name(&self) -> &'static str {
        "thread-cpu"
    }

    fn now_ns(&self) -> u64 {
        thread_cpu_ns().unwrap_or(0)
    }
}

#[cfg(unix)]
fn thread_cpu_ns() -> Option<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let result = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if result != 0 {
        return None;
    }
    Some(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(not(unix))]
fn thread_cpu_ns() -> Option<u64> {
    None
}

const PROBE_ROUNDS: usize = 1000;

/// Smallest positive difference seen between back to back reads.
///
/// Returns `None` if the clock never advanced.
pub fn probe_resolution<C: Clock + ?Sized>(clock: &C) -> Option<f64> {
    let mut min_diff = u64::MAX;

    for _ in 0..PROBE_ROUNDS {
        let t1 = clock.now_ns();
        let mut t2 = clock.now_ns();
        // Spin until the clock ticks so coarse clocks report their tick size.
        let mut spins = 0;
        while t2 == t1 && spins < 10_000 {
            t2 = clock.now_ns();
            spins += 1;
        }
        let diff = t2.saturating_sub(t1);
        if diff > 0 && diff < min_diff {
            min_diff = diff;
        }
    }

    (min_diff != u64::MAX).then_some(min_diff as f64)
}

/// Fails unless `clock` resolves at least `max_ns` nanoseconds.
pub fn ensure_resolution<C: Clock + ?Sized>(
    clock: &C,
    max_ns: f64,
) -> Result<f64, CapabilityUnavailable> {
    let resolution_ns = probe_resolution(clock).ok_or(CapabilityUnavailable::ClockStalled)?;
    if resolution_ns > max_ns {
        return Err(CapabilityUnavailable::CoarseClock {
            resolution_ns,
            max_ns,
        });
    }
    tracing::debug!(clock = clock.name(), resolution_ns, "clock resolution probed");
    Ok(resolution_ns)
}

/// Checks already collected timings for missing or heavily quantized values.
pub fn check_timings(
    timings: &[Option<u64>],
    min_distinct: usize,
) -> Result<Vec<u64>, CapabilityUnavailable> {
    let missing = timings.iter().filter(|t| t.is_none()).count();
    if missing > 0 {
        return Err(CapabilityUnavailable::MissingTimings {
            missing,
            total: timings.len(),
        });
    }
    let values: Vec<u64> = timings.iter().flatten().copied().collect();

    let unique = values.iter().collect::<HashSet<_>>().len();
    if unique < min_distinct.min(values.len()).max(2) {
        return Err(CapabilityUnavailable::QuantizedTimings {
            unique,
            total: values.len(),
        });
    }
    Ok(values)
}
