/// Clock & Random — the two trivial external collaborators
///
/// The monotonic millisecond clock and the uniform random source are
/// modeled as small traits so the retry cache and formatter can be driven
/// deterministically in tests, and wired to `std::time`/`rand` by default
/// in production.
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Current time, in milliseconds, relative to an arbitrary epoch that is
    /// stable for the lifetime of the clock.
    fn now_ms(&self) -> u64;
}

/// The real wall clock, backed by `std::time::SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A uniform random source, used for msgid generation and retry jitter.
pub trait Rng: Send + Sync {
    /// A uniformly distributed value in `0..bound` (`bound` must be nonzero).
    fn uniform(&self, bound: u32) -> u32;
}

/// The real random source, backed by the `rand` crate's thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRng;

impl Rng for ThreadRng {
    fn uniform(&self, bound: u32) -> u32 {
        use rand::Rng as _;
        rand::thread_rng().gen_range(0..bound.max(1))
    }
}

/// Deterministic `Clock`/`Rng` doubles for tests, exported for downstream
/// integration tests the way `loopback` exports a `Transport` double.
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock whose value is advanced manually, for deterministic tests.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: AtomicU64,
    }

    impl ManualClock {
        pub fn new(start_ms: u64) -> Self {
            Self {
                now: AtomicU64::new(start_ms),
            }
        }

        pub fn advance(&self, delta_ms: u64) {
            self.now.fetch_add(delta_ms, Ordering::SeqCst);
        }

        pub fn set(&self, ms: u64) {
            self.now.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// A deterministic "random" source that always returns the low end of
    /// the range, for reproducible tests of jitter/backoff bounds.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ZeroRng;

    impl Rng for ZeroRng {
        fn uniform(&self, _bound: u32) -> u32 {
            0
        }
    }
}
