//! Core environment context trait for MoodMap sync agents.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the sync engines can run
/// on a device (tokio) and inside the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, thread RNG
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every method that would normally introduce non-determinism
/// (time, randomness) is controlled by the implementation.
#[async_trait]
pub trait MoodMapContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for debounce windows and backoff measurements.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Record timestamps and staleness are compared against this clock.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as Unix milliseconds, the unit every record carries.
    fn unix_millis(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns a uniformly distributed value in `[0.0, 1.0)`.
    ///
    /// Used for backoff jitter. Seeded in simulation.
    fn random_unit(&self) -> f64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
