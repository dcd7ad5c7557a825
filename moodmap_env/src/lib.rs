//! MoodMap Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the MoodMap sync engines
//! run against the **device/cloud** collaborators (tokio, a live document
//! listener, the fused location provider) or against a **simulation**.
//!
//! # Core Concept: Intercept every producer
//!
//! The reconciler never talks to the outside world directly. Everything
//! that can introduce non-determinism goes through a trait:
//! - Time (`now()`, `sleep()`, `unix_millis()`)
//! - Remote documents (`RecordStream::subscribe()`)
//! - Device position (`LocationProvider::request_updates()`)
//! - Randomness (`random_unit()` for backoff jitter)
//!
//! # Example
//!
//! ```ignore
//! use moodmap_env::{MoodMapContext, RecordStream, QueryKey};
//!
//! async fn pump<Ctx: MoodMapContext, S: RecordStream>(ctx: &Ctx, stream: &S) {
//!     let mut sub = stream.subscribe(&QueryKey::new("moods")).await?;
//!     while let Some(change) = sub.next().await {
//!         handle_change(change?);
//!     }
//!     ctx.sleep(Duration::from_millis(500)).await;
//! }
//! ```

mod context;
mod stream;
mod types;
mod error;
mod tokio_impl;

pub use context::MoodMapContext;
pub use stream::{
    FaultController, LocationProvider, LocationUpdates, RecordStream, Subscription,
};
pub use types::{
    ChangeKind, DocumentChange, LocationPriority, LocationProfile, PositionSample, QueryKey,
    SubscriptionId,
};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
