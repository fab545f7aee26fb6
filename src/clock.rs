use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in milliseconds.
/// Implemented by the live system clock, the cached clock, and test doubles.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Live system clock; one syscall per read.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        system_now_ms()
    }
}

/// Deterministic clock driven by the caller. Used in tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Background-refreshed snapshot of the system clock.
///
/// A refresher thread overwrites a shared atomic every `refresh_period`, so
/// readers pay one atomic load instead of a syscall. Staleness is bounded by
/// one refresh period. Each instance owns its refresher thread; dropping the
/// instance (or calling [`CachedClock::shutdown`]) stops and joins it.
pub struct CachedClock {
    shared: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    refresher: Option<thread::JoinHandle<()>>,
}

impl CachedClock {
    /// Start a cached clock with the default 1 ms refresh period.
    pub fn start() -> Self {
        Self::with_refresh_period(Duration::from_millis(1))
    }

    pub fn with_refresh_period(refresh_period: Duration) -> Self {
        let shared = Arc::new(AtomicU64::new(system_now_ms()));
        let stop = Arc::new(AtomicBool::new(false));

        let refresher = Self::start_refresher(shared.clone(), stop.clone(), refresh_period);
        log::debug!(
            "[CACHED_CLOCK] Refresher started, period {:?}",
            refresh_period
        );

        Self {
            shared,
            stop,
            refresher: Some(refresher),
        }
    }

    /// Background thread overwriting the shared time value.
    fn start_refresher(
        shared: Arc<AtomicU64>,
        stop: Arc<AtomicBool>,
        refresh_period: Duration,
    ) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("cached-clock-refresher".into())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    shared.store(system_now_ms(), Ordering::SeqCst);
                    thread::sleep(refresh_period);
                }
            })
            .expect("Failed to spawn cached clock refresher thread")
    }

    /// A cheap handle reading the cached value. Handles stay valid after the
    /// owning `CachedClock` shuts down, but the value stops advancing.
    pub fn reader(&self) -> CachedClockReader {
        CachedClockReader {
            shared: self.shared.clone(),
        }
    }

    /// Stop and join the refresher thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
            log::debug!("[CACHED_CLOCK] Refresher stopped");
        }
    }
}

impl Drop for CachedClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TimeSource for CachedClock {
    fn now_ms(&self) -> u64 {
        self.shared.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct CachedClockReader {
    shared: Arc<AtomicU64>,
}

impl TimeSource for CachedClockReader {
    fn now_ms(&self) -> u64 {
        self.shared.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_ms();
        thread::sleep(Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 1005);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_cached_clock_tracks_system_time() {
        let cache = CachedClock::start();
        thread::sleep(Duration::from_millis(20));

        let cached = cache.now_ms();
        let real = SystemClock.now_ms();
        // Staleness is bounded by the refresh period plus scheduling jitter
        assert!(real >= cached);
        assert!(real - cached < 1000, "cached time too stale: {} vs {}", cached, real);

        // Readers see the same shared value
        let reader = cache.reader();
        assert!(reader.now_ms() >= cached);
    }

    #[test]
    fn test_cached_clock_shutdown_freezes_value() {
        let mut cache = CachedClock::start();
        let reader = cache.reader();
        cache.shutdown();

        let frozen = reader.now_ms();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reader.now_ms(), frozen);

        // Shutdown is idempotent
        cache.shutdown();
    }
}
