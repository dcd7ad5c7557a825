//! MoodMap Core - realtime, location-aware sync for the mood map
//!
//! This library keeps one authoritative view of "where is everyone right now":
//! 1. **Two producers, one writer**: device location and remote snapshot diffs
//!    are merged by a single-writer reconciler with last-writer-wins per record
//! 2. **Stale-but-present**: a dropped connection never clears the map; records
//!    age out on a TTL instead
//! 3. **Readable maps**: a deterministic grid clusterer turns the index into
//!    markers for the current viewport and zoom

pub mod error;
pub mod record;
pub mod spatial;
pub mod reconciler;
pub mod filter;
pub mod cluster;
pub mod backoff;
pub mod agent_runtime;

// Re-export key types for convenience
pub use error::{Result, SyncError, ValidationError};
pub use record::{PositionedRecord, RecordAttributes, RecordId, RemoteChange, SourceOrigin, SELF_RECORD_ID};
pub use reconciler::{ApplyOutcome, IndexSnapshot, Reconciler, ReconcilerConfig, ReconcilerStats};
pub use filter::RecordFilter;
pub use cluster::{compute_clusters, Cluster, ClusterPresenter, MarkerStyle, MoodTint, PresenterConfig, Viewport};
pub use backoff::{Backoff, BackoffConfig};
pub use agent_runtime::{LinkState, Producer, SyncAgent, SyncConfig, SyncEvent, SyncHandle, SyncStatus};
