//! MoodMap Deterministic Simulation Testing (DST) Harness
//!
//! Runs the real sync agent against simulated collaborators on a paused
//! tokio clock, so a 25 hour outage scenario finishes in milliseconds and a
//! seed reproduces the run exactly.
//!
//! # Sources of non-determinism
//!
//! - **Time**: `start_paused` runtime; the clock jumps only when every task
//!   is waiting on a timer
//! - **Remote stream**: [`SimCollection`] fans out diffs in call order and
//!   exposes fault injection through [`SimStreamController`]
//! - **Location**: [`SimLocationSource`] replays a script or a seeded walk
//! - **Randomness**: everything draws from the [`SimContext`] ChaCha8 stream
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌───────────────┐                  ┌─────────────────┐  │
//! │  │ SimCollection │──diffs──┐   ┌────│ SimLocationSrc  │  │
//! │  └───────────────┘         ▼   ▼    └─────────────────┘  │
//! │                      ┌─────────────┐                     │
//! │                      │  SyncAgent  │──snapshots──► checks│
//! │                      └─────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use moodmap_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::ReconnectStorm);
//! assert!(result.passed, "{:?}", result.failure_reason);
//! ```

mod context;
mod location;
mod stream;
mod world;
pub mod exporter;
pub mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{ClusterFrame, SimExport, SimFrame};
pub use location::{SimLocationSource, SimLocationUpdates};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use stream::{SimCollection, SimRecordStream, SimStreamController, SimSubscription};
pub use world::{check, mirrors, ScenarioMetrics, SimError, SimWorld, HOME, MOODS};
