//! Simulation context implementing MoodMapContext for deterministic testing.

use async_trait::async_trait;
use moodmap_env::MoodMapContext;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `MoodMapContext` using:
/// - Tokio's clock, which the runner pauses so that time only advances when
///   every task is idle
/// - A skip offset for jumping the clock forward without waiting
/// - A seeded ChaCha8 RNG for jitter and scenario decisions
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Tokio instant that maps to virtual time zero
    start: tokio::time::Instant,

    /// Time skipped with `advance_time`
    skipped: Arc<Mutex<Duration>>,

    /// Deterministic RNG
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    ///
    /// Must be created inside the runtime whose clock it follows.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: tokio::time::Instant::now(),
            skipped: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1_704_067_200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Jumps virtual time forward without running any timers in between.
    ///
    /// Models the device sleeping: pending sleeps still see tokio's clock.
    pub fn advance_time(&self, duration: Duration) {
        *lock(&self.skipped) += duration;
    }

    /// Runs `f` with the shared RNG.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        f(&mut lock(&self.rng))
    }

    /// Uniform integer in `[low, high)`.
    pub fn gen_range(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        self.with_rng(|rng| rng.gen_range(low..high))
    }

    /// True with probability `p`.
    pub fn chance(&self, p: f64) -> bool {
        self.random_unit() < p
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            start: self.start,
            skipped: Arc::clone(&self.skipped),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl MoodMapContext for SimContext {
    fn now(&self) -> Duration {
        tokio::time::Instant::now().saturating_duration_since(self.start) + *lock(&self.skipped)
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // With a paused clock this resolves as soon as all tasks are idle
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning sim task");
        tokio::spawn(future);
    }

    fn random_unit(&self) -> f64 {
        self.with_rng(|rng| rng.gen::<f64>())
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
