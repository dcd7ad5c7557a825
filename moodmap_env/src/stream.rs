//! Producer abstractions: the remote document listener and the device
//! location feed.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{DocumentChange, LocationProfile, PositionSample, QueryKey, SubscriptionId};

/// A live registration on a remote document query.
///
/// Dropping the subscription deregisters the listener. Implementations must
/// release their remote resources in `Drop` so that every exit path of the
/// caller (including `?` and task cancellation) cleans up.
///
/// # Event Flow
///
/// ```text
/// Cloud collection           Subscription                 Reconciler
///   |                           |                            |
///   |-- doc added ------------->|                            |
///   |                           |-- next() -> Added -------->|
///   |-- doc deleted ----------->|                            |
///   |                           |-- next() -> Removed ------>|
///   |-- connection lost ------->|                            |
///   |                           |-- next() -> Err / None --->|  (resubscribe)
/// ```
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next document change.
    ///
    /// # Returns
    /// * `Some(Ok(change))` - A change was delivered
    /// * `Some(Err(e))` - The listener reported an error; the subscription is dead
    /// * `None` - The listener ended (disconnect or remote shutdown)
    async fn next(&mut self) -> Option<Result<DocumentChange, EnvError>>;

    /// Identity of this registration (for logging).
    fn id(&self) -> SubscriptionId;
}

/// Source of remote document snapshots keyed by collection/query identity.
///
/// # Implementations
///
/// - **Production**: wraps the cloud document database's snapshot listener
/// - **Simulation**: `SimRecordStream`, an in-memory collection with fault injection
///
/// Resubscribing replays the current state of the query as `Added` events.
/// Consumers must apply them idempotently.
#[async_trait]
pub trait RecordStream: Send + Sync + 'static {
    /// Registers a listener for the given query.
    async fn subscribe(&self, query: &QueryKey) -> Result<Box<dyn Subscription>, EnvError>;
}

/// A live registration on the device's position provider.
///
/// Dropping stops the updates.
#[async_trait]
pub trait LocationUpdates: Send {
    /// Waits for the next position sample.
    async fn next(&mut self) -> Option<Result<PositionSample, EnvError>>;
}

/// Push source of device position samples.
///
/// Samples are untrusted input: the reconciler validates them exactly like
/// remote payloads.
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
    /// Starts position updates at the requested interval/accuracy profile.
    async fn request_updates(
        &self,
        profile: &LocationProfile,
    ) -> Result<Box<dyn LocationUpdates>, EnvError>;
}

/// Marker trait for fault controllers in simulation.
///
/// Allows injecting listener failures.
pub trait FaultController: Send + Sync {
    /// Terminates every live subscription.
    fn disconnect_all(&self);

    /// Makes new subscriptions fail (`false`) or succeed (`true`).
    fn set_available(&self, available: bool);

    /// Number of subscriptions that are currently registered.
    fn active_subscriptions(&self) -> usize;
}
