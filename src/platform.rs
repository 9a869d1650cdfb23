//! Hooks the loop needs from its host: a monotonic clock, memory and CPU figures and, on `std`
//! hosts, a lock for state shared with the operator console.

use core::cell::Cell;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;

/// Monotonic time source in milliseconds.  Never goes backwards, unrelated to wall clock time.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed point.
    fn now_ms(&self) -> u64;

    /// Give the host scheduler a chance to run something else between loop iterations.
    fn idle(&self, _period: Duration) -> impl Future<Output = ()> {
        yield_now()
    }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Return to the executor once.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Memory figures in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryInfo {
    #[allow(missing_docs)]
    pub total: u32,
    #[allow(missing_docs)]
    pub used: u32,
    /// Highest `used` seen so far
    pub max_used: u32,
}

/// CPU usage in percent as a whole part and hundredths.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CpuUsage {
    #[allow(missing_docs)]
    pub major: u8,
    #[allow(missing_docs)]
    pub minor: u8,
}

impl CpuUsage {
    /// `major + minor / 100`
    pub fn as_f32(&self) -> f32 {
        self.major as f32 + self.minor as f32 / 100.0
    }
}

/// System metrics the demos report.
pub trait SystemInfo {
    #[allow(missing_docs)]
    fn memory(&self) -> MemoryInfo;
    #[allow(missing_docs)]
    fn cpu_usage(&self) -> CpuUsage;
}

/// Fixed figures, for hosts without a way to measure and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedInfo {
    #[allow(missing_docs)]
    pub memory: MemoryInfo,
    #[allow(missing_docs)]
    pub cpu: CpuUsage,
}

impl SystemInfo for FixedInfo {
    fn memory(&self) -> MemoryInfo {
        self.memory
    }

    fn cpu_usage(&self) -> CpuUsage {
        self.cpu
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// A clock reading `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(feature = "std")]
pub use self::host::{HostInfo, ManagerLock, TokioClock};

#[cfg(feature = "std")]
mod host {
    use core::sync::atomic::{AtomicU32, Ordering};
    use core::time::Duration;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};

    use super::{Clock, CpuUsage, MemoryInfo, SystemInfo};

    /// Clock backed by `tokio::time::Instant`, so paused test time applies.
    #[derive(Debug, Clone, Copy)]
    pub struct TokioClock {
        start: tokio::time::Instant,
    }

    impl Default for TokioClock {
        fn default() -> Self {
            Self {
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now_ms(&self) -> u64 {
            self.start.elapsed().as_millis() as u64
        }

        async fn idle(&self, period: Duration) {
            if period.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(period).await;
            }
        }
    }

    /// Figures read from `/proc` where available, zero elsewhere.
    #[derive(Debug, Default)]
    pub struct HostInfo {
        max_used: AtomicU32,
    }

    impl HostInfo {
        fn meminfo_kb(text: &str, key: &str) -> Option<u64> {
            text.lines()
                .find_map(|line| line.strip_prefix(key))
                .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
                .and_then(|n| n.parse().ok())
        }
    }

    impl SystemInfo for HostInfo {
        fn memory(&self) -> MemoryInfo {
            let Ok(text) = fs::read_to_string("/proc/meminfo") else {
                return MemoryInfo::default();
            };

            let total = Self::meminfo_kb(&text, "MemTotal").unwrap_or(0) * 1024;
            let available = Self::meminfo_kb(&text, "MemAvailable").unwrap_or(0) * 1024;
            let total = u32::try_from(total).unwrap_or(u32::MAX);
            let used = u32::try_from(available)
                .map(|a| total.saturating_sub(a))
                .unwrap_or(0);

            let max_used = self.max_used.fetch_max(used, Ordering::Relaxed).max(used);

            MemoryInfo {
                total,
                used,
                max_used,
            }
        }

        fn cpu_usage(&self) -> CpuUsage {
            // one minute load average scaled to percent of one core
            let load = fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|s| s.split_whitespace().next().map(str::to_owned))
                .and_then(|s| s.parse::<f32>().ok())
                .unwrap_or(0.0);

            let hundredths = (load * 10_000.0).clamp(0.0, 25_599.0) as u32;
            CpuUsage {
                major: (hundredths / 100).min(u8::MAX as u32) as u8,
                minor: (hundredths % 100) as u8,
            }
        }
    }

    /// Lock serialising access to state shared between a running loop's owner and the operator
    /// console.  `lock` waits as long as it takes, a poisoned lock is taken over.
    #[derive(Debug, Default)]
    pub struct ManagerLock<T> {
        inner: Mutex<T>,
    }

    impl<T> ManagerLock<T> {
        #[allow(missing_docs)]
        pub const fn new(value: T) -> Self {
            Self {
                inner: Mutex::new(value),
            }
        }

        /// Acquire the lock, blocking the calling thread.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("manager lock poisoned, recovering");
                    poisoned.into_inner()
                }
            }
        }
    }

}
