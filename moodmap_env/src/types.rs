//! Common types for the MoodMap environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one listener registration.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random SubscriptionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SubscriptionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identity of a remote query: the collection plus an optional owner scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    /// Collection name, e.g. `"moods"`
    pub collection: String,

    /// Restricts the query to documents owned by these users (empty = all)
    #[serde(default)]
    pub owners: Vec<String>,
}

impl QueryKey {
    /// Query over a whole collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            owners: Vec::new(),
        }
    }

    /// Restricts the query to the given owners.
    pub fn with_owners(mut self, owners: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.owners = owners.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for QueryKey {
    fn default() -> Self {
        Self::new("moods")
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.owners.is_empty() {
            write!(f, "{}", self.collection)
        } else {
            write!(f, "{}[{} owners]", self.collection, self.owners.len())
        }
    }
}

/// Kind of change carried by a snapshot diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One incremental change to a document in a remote collection.
///
/// The payload is the raw document body; it is only interpreted by the
/// reconciler's boundary parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    /// Document identity as reported by the remote store (may be empty if
    /// the store delivered garbage)
    pub document_id: String,

    /// Added, modified or removed
    pub kind: ChangeKind,

    /// Document body (`None` for removals)
    pub payload: Option<serde_json::Value>,
}

impl DocumentChange {
    /// An `added` change.
    pub fn added(document_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            document_id: document_id.into(),
            kind: ChangeKind::Added,
            payload: Some(payload),
        }
    }

    /// A `modified` change.
    pub fn modified(document_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            document_id: document_id.into(),
            kind: ChangeKind::Modified,
            payload: Some(payload),
        }
    }

    /// A `removed` change.
    pub fn removed(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            kind: ChangeKind::Removed,
            payload: None,
        }
    }
}

/// A single device position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Horizontal accuracy radius in meters (68% confidence)
    pub accuracy_meters: f64,

    /// Fix time (Unix milliseconds)
    pub timestamp_ms: i64,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            timestamp_ms,
        }
    }
}

/// Power/accuracy trade-off requested from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPriority {
    HighAccuracy,
    Balanced,
    LowPower,
}

/// Interval/accuracy profile for location updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationProfile {
    /// Desired interval between fixes in milliseconds
    pub interval_ms: u64,

    /// Requested priority
    pub priority: LocationPriority,
}

impl Default for LocationProfile {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            priority: LocationPriority::HighAccuracy,
        }
    }
}
