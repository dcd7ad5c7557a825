//! The "RECONCILER" - single authoritative index of positioned records.
//!
//! Merges two independently arriving, independently failing producers:
//! - the device's own location stream (stored under the reserved self id)
//! - the remote snapshot diff stream (one record per document id)
//!
//! Policies:
//! 1. Last-writer-wins by timestamp, ties prefer the incoming event
//! 2. Removal is unconditional and terminal until a new `added`
//! 3. Staleness eviction touches remote records only
//! 4. A capacity cap evicts the oldest remote records first
//!
//! Every operation is total: malformed input is rejected per event and
//! never disturbs other records.

use h3o::Resolution;
use moodmap_env::{ChangeKind, DocumentChange, PositionSample};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{SyncError, ValidationError};
use crate::record::{parse_change, PositionedRecord, RecordId, RemoteChange, SourceOrigin};
use crate::spatial::{Candidates, ProximityIndex, SpatialIndexStats};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the Reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Self samples with a worse accuracy radius are dropped (default: 100 m)
    pub max_accuracy_meters: f64,

    /// Remote records older than this are evicted (default: 24 h)
    pub stale_ttl_ms: i64,

    /// Maximum number of remote records kept (default: 5000)
    pub max_records: usize,

    /// H3 resolution of the proximity index (default: 7, ~1.4 km edges)
    pub h3_resolution: u8,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_accuracy_meters: 100.0,
            stale_ttl_ms: 24 * 60 * 60 * 1000,
            max_records: 5_000,
            h3_resolution: 7,
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// What a single apply call did to the index.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new id entered the index
    Inserted,
    /// An existing entry was replaced
    Updated,
    /// An entry was deleted
    Removed,
    /// The event matched the stored state exactly (duplicate delivery)
    Unchanged,
    /// A newer entry is already stored; the event was ignored
    Superseded { stored_ms: i64 },
    /// Removal of an id that is not in the index
    Absent,
    /// A `modified` arrived after a `removed` for the same id
    Tombstoned,
    /// The record was accepted and immediately evicted by the capacity cap
    CapacityRejected,
    /// The event failed validation
    Rejected(ValidationError),
}

impl ApplyOutcome {
    /// True if the index changed.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable point-in-time copy of the index, handed to the presenter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexSnapshot {
    generation: u64,
    /// Sorted by record id
    records: Vec<PositionedRecord>,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PositionedRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PositionedRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: &RecordId) -> Option<&PositionedRecord> {
        self.records
            .binary_search_by(|r| r.record_id.cmp(id))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn self_record(&self) -> Option<&PositionedRecord> {
        self.get(&RecordId::self_id())
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Counters since construction plus the current population.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilerStats {
    pub total_records: usize,
    pub remote_records: usize,
    pub has_self: bool,
    pub accepted: u64,
    pub rejected: u64,
    pub superseded: u64,
    pub evicted_stale: u64,
    pub evicted_capacity: u64,
    pub generation: u64,
}

// ============================================================================
// RECONCILER (The Engine)
// ============================================================================

/// Owner of the live `RecordId -> PositionedRecord` mapping.
///
/// Not internally synchronized: exactly one writer (the sync loop) holds it.
/// Readers receive [`IndexSnapshot`]s.
pub struct Reconciler {
    /// All live records keyed by id
    records: HashMap<RecordId, PositionedRecord>,

    /// H3 buckets for radius queries
    spatial: ProximityIndex,

    /// Ids removed since their last `added`, oldest first (bounded)
    tombstones: HashSet<RecordId>,
    tombstone_order: VecDeque<RecordId>,

    config: ReconcilerConfig,

    /// Bumped on every state change
    generation: u64,

    stats: ReconcilerStats,
}

impl Reconciler {
    /// Create a new Reconciler with the given configuration.
    pub fn new(config: ReconcilerConfig) -> Self {
        let resolution = Resolution::try_from(config.h3_resolution).unwrap_or(Resolution::Seven);
        Self {
            records: HashMap::new(),
            spatial: ProximityIndex::new(resolution),
            tombstones: HashSet::new(),
            tombstone_order: VecDeque::new(),
            config,
            generation: 0,
            stats: ReconcilerStats::default(),
        }
    }

    /// Create a new Reconciler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ReconcilerConfig::default())
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&PositionedRecord> {
        self.records.get(id)
    }

    // ========================================================================
    // SELF POSITION
    // ========================================================================

    /// Upserts the device's own record from a location sample.
    ///
    /// Drops samples that are malformed, less accurate than
    /// `max_accuracy_meters`, or older than the stored self sample.
    pub fn apply_self_position(&mut self, sample: &PositionSample) -> ApplyOutcome {
        let record = match PositionedRecord::from_sample(sample) {
            Ok(record) => record,
            Err(e) => return self.reject("self", e),
        };

        if record.accuracy_meters > self.config.max_accuracy_meters {
            return self.reject(
                "self",
                ValidationError::InaccurateSample {
                    accuracy_meters: record.accuracy_meters,
                    limit_meters: self.config.max_accuracy_meters,
                },
            );
        }

        if let Some(stored) = self.records.get(&record.record_id) {
            if record.last_updated_at < stored.last_updated_at {
                let stored_ms = stored.last_updated_at;
                return self.reject(
                    "self",
                    ValidationError::OutOfOrder {
                        incoming_ms: record.last_updated_at,
                        stored_ms,
                    },
                );
            }
        }

        self.store(record)
    }

    // ========================================================================
    // REMOTE DIFFS
    // ========================================================================

    /// Applies one snapshot diff from the remote stream.
    pub fn apply_remote_diff(&mut self, change: &DocumentChange) -> ApplyOutcome {
        let parsed = match parse_change(change) {
            Ok(parsed) => parsed,
            Err(e) => return self.reject(&change.document_id, e),
        };

        match parsed {
            RemoteChange::Remove(id) => self.remove(id),
            RemoteChange::Upsert(record) => {
                if change.kind == ChangeKind::Modified && self.tombstones.contains(&record.record_id) {
                    debug!(id = %record.record_id, "ignoring modification of removed record");
                    return ApplyOutcome::Tombstoned;
                }
                self.upsert_remote(record)
            }
        }
    }

    /// Applies a batch of diffs in order.
    pub fn apply_remote_diffs(&mut self, changes: &[DocumentChange]) -> Vec<ApplyOutcome> {
        changes.iter().map(|c| self.apply_remote_diff(c)).collect()
    }

    fn upsert_remote(&mut self, record: PositionedRecord) -> ApplyOutcome {
        if let Some(stored) = self.records.get(&record.record_id) {
            // Ties go to the incoming event so retries always make progress
            if record.last_updated_at < stored.last_updated_at {
                let stored_ms = stored.last_updated_at;
                debug!(
                    id = %record.record_id,
                    incoming = record.last_updated_at,
                    stored = stored_ms,
                    "superseded remote update"
                );
                self.stats.superseded += 1;
                return ApplyOutcome::Superseded { stored_ms };
            }
        }

        self.clear_tombstone(&record.record_id);
        let id = record.record_id.clone();
        let outcome = self.store(record);

        if outcome == ApplyOutcome::Inserted {
            let evicted = self.enforce_capacity();
            if evicted.contains(&id) {
                return ApplyOutcome::CapacityRejected;
            }
        }
        outcome
    }

    fn remove(&mut self, id: RecordId) -> ApplyOutcome {
        self.add_tombstone(id.clone());
        match self.records.remove(&id) {
            Some(_) => {
                self.spatial.remove(&id);
                self.bump();
                self.stats.accepted += 1;
                debug!(%id, "removed record");
                ApplyOutcome::Removed
            }
            None => ApplyOutcome::Absent,
        }
    }

    /// Insert-or-replace without policy checks. Keeps the spatial index in
    /// step with `records`.
    fn store(&mut self, record: PositionedRecord) -> ApplyOutcome {
        if self.records.get(&record.record_id) == Some(&record) {
            return ApplyOutcome::Unchanged;
        }

        if let Err(e) = self
            .spatial
            .upsert(&record.record_id, record.latitude, record.longitude)
        {
            let id = record.record_id.to_string();
            return self.reject(&id, e);
        }

        self.stats.accepted += 1;
        self.bump();
        match self.records.insert(record.record_id.clone(), record) {
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Inserted,
        }
    }

    fn reject(&mut self, source: &str, error: ValidationError) -> ApplyOutcome {
        let rejection = SyncError::Validation(error.clone());
        warn!(source, %rejection, "rejected event");
        self.stats.rejected += 1;
        ApplyOutcome::Rejected(error)
    }

    fn bump(&mut self) {
        self.generation += 1;
    }

    // ========================================================================
    // TOMBSTONES
    // ========================================================================

    fn add_tombstone(&mut self, id: RecordId) {
        if self.tombstones.insert(id.clone()) {
            self.tombstone_order.push_back(id);
        }
        while self.tombstone_order.len() > self.config.max_records.max(1) {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    fn clear_tombstone(&mut self, id: &RecordId) {
        if self.tombstones.remove(id) {
            self.tombstone_order.retain(|t| t != id);
        }
    }

    // ========================================================================
    // EVICTION
    // ========================================================================

    /// Removes remote records whose `last_updated_at` is older than the TTL.
    ///
    /// The self record is exempt: its age means the location stream
    /// stopped, not that the device vanished. Returns the evicted ids in
    /// sorted order.
    pub fn evict_stale(&mut self, now_ms: i64) -> Vec<RecordId> {
        let ttl = self.config.stale_ttl_ms;
        let mut stale: Vec<RecordId> = self
            .records
            .values()
            .filter(|r| r.origin == SourceOrigin::Remote)
            .filter(|r| now_ms.saturating_sub(r.last_updated_at) > ttl)
            .map(|r| r.record_id.clone())
            .collect();
        stale.sort();

        for id in &stale {
            self.records.remove(id);
            self.spatial.remove(id);
        }

        if !stale.is_empty() {
            debug!(count = stale.len(), "evicted stale records");
            self.stats.evicted_stale += stale.len() as u64;
            self.bump();
        }
        stale
    }

    /// Evicts the oldest remote records until the cap holds.
    fn enforce_capacity(&mut self) -> Vec<RecordId> {
        let remote = self.remote_count();
        let cap = self.config.max_records;
        if remote <= cap {
            return Vec::new();
        }

        let mut by_age: Vec<(i64, RecordId)> = self
            .records
            .values()
            .filter(|r| r.is_remote())
            .map(|r| (r.last_updated_at, r.record_id.clone()))
            .collect();
        by_age.sort();

        let evicted: Vec<RecordId> = by_age
            .into_iter()
            .take(remote - cap)
            .map(|(_, id)| id)
            .collect();

        for id in &evicted {
            self.records.remove(id);
            self.spatial.remove(id);
        }

        let exhaustion = SyncError::ResourceExhaustion {
            capacity: cap,
            evicted: evicted.len(),
        };
        warn!(%exhaustion, "evicted oldest remote records");
        self.stats.evicted_capacity += evicted.len() as u64;
        self.bump();
        evicted
    }

    /// Drops every remote record. Only for explicit session teardown; a
    /// disconnect must never call this.
    pub fn clear_remote(&mut self) {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_remote());
        self.spatial.clear();
        for record in self.records.values() {
            // Only the self record survives; its coordinates were validated
            let _ = self
                .spatial
                .upsert(&record.record_id, record.latitude, record.longitude);
        }
        self.tombstones.clear();
        self.tombstone_order.clear();
        if self.records.len() != before {
            self.bump();
        }
    }

    fn remote_count(&self) -> usize {
        self.records.values().filter(|r| r.is_remote()).count()
    }

    // ========================================================================
    // READ VIEWS
    // ========================================================================

    /// Immutable copy of the current index, sorted by id.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let mut records: Vec<PositionedRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        Arc::new(IndexSnapshot {
            generation: self.generation,
            records,
        })
    }

    /// Records within `radius_m` meters of a point, nearest first.
    pub fn within_radius(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(PositionedRecord, f64)> {
        let candidates = match self.spatial.candidates(lat, lon, radius_m) {
            Ok(c) => c,
            Err(e) => {
                warn!(%e, "invalid radius query center");
                return Vec::new();
            }
        };

        let mut hits: Vec<(PositionedRecord, f64)> = match candidates {
            Candidates::All => self.records.values().collect::<Vec<_>>(),
            Candidates::Subset(ids) => ids
                .iter()
                .filter_map(|id| self.records.get(id))
                .collect::<Vec<_>>(),
        }
        .into_iter()
        .map(|r| (r, r.distance_to(lat, lon)))
        .filter(|(_, d)| *d <= radius_m)
        .map(|(r, d)| (r.clone(), d))
        .collect();

        hits.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| a.0.record_id.cmp(&b.0.record_id))
        });
        hits
    }

    /// Remote records within `radius_m` of the device. Empty without a fix.
    pub fn within_radius_of_self(&self, radius_m: f64) -> Vec<(PositionedRecord, f64)> {
        let Some(me) = self.records.get(&RecordId::self_id()) else {
            return Vec::new();
        };
        self.within_radius(me.latitude, me.longitude, radius_m)
            .into_iter()
            .filter(|(r, _)| r.is_remote())
            .collect()
    }

    pub fn stats(&self) -> ReconcilerStats {
        let remote = self.remote_count();
        ReconcilerStats {
            total_records: self.records.len(),
            remote_records: remote,
            has_self: self.records.contains_key(&RecordId::self_id()),
            generation: self.generation,
            ..self.stats.clone()
        }
    }

    pub fn spatial_stats(&self) -> SpatialIndexStats {
        self.spatial.stats()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn mood(lat: f64, lon: f64, time: i64) -> serde_json::Value {
        json!({ "latitude": lat, "longitude": lon, "time": time, "mood": "Happiness" })
    }

    fn rid(s: &str) -> RecordId {
        RecordId::parse(s).unwrap()
    }

    #[test]
    fn test_reconciler_creation() {
        let reconciler = Reconciler::with_defaults();
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.generation(), 0);
    }

    #[test]
    fn test_added_twice_is_idempotent() {
        let mut reconciler = Reconciler::with_defaults();
        let change = DocumentChange::added("r1", mood(37.0, -122.0, 100));

        assert_eq!(reconciler.apply_remote_diff(&change), ApplyOutcome::Inserted);
        let first = reconciler.snapshot();

        assert_eq!(reconciler.apply_remote_diff(&change), ApplyOutcome::Unchanged);
        let second = reconciler.snapshot();

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_ids_differing_by_whitespace_stay_distinct() {
        let mut reconciler = Reconciler::with_defaults();

        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::added("R1", mood(10.0, 10.0, 100))),
            ApplyOutcome::Inserted
        );
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::added(" R1", mood(11.0, 11.0, 100))),
            ApplyOutcome::Inserted
        );
        assert_eq!(reconciler.len(), 2);

        // Removing a third spelling touches neither
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::removed("R1 ")),
            ApplyOutcome::Absent
        );
        assert_eq!(reconciler.len(), 2);
        assert_eq!(reconciler.get(&rid(" R1")).unwrap().latitude, 11.0);
        assert_eq!(reconciler.get(&rid("R1")).unwrap().latitude, 10.0);
    }

    #[test]
    fn test_last_writer_wins_either_order() {
        let older = DocumentChange::modified("r1", mood(10.0, 10.0, 100));
        let newer = DocumentChange::modified("r1", mood(20.0, 20.0, 200));

        let mut forward = Reconciler::with_defaults();
        forward.apply_remote_diff(&older);
        forward.apply_remote_diff(&newer);

        let mut backward = Reconciler::with_defaults();
        backward.apply_remote_diff(&newer);
        assert_eq!(
            backward.apply_remote_diff(&older),
            ApplyOutcome::Superseded { stored_ms: 200 }
        );

        for r in [&forward, &backward] {
            let record = r.get(&rid("r1")).unwrap();
            assert_eq!(record.last_updated_at, 200);
            assert_eq!(record.latitude, 20.0);
        }
    }

    #[test]
    fn test_tie_prefers_incoming() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(10.0, 10.0, 100)));
        let outcome = reconciler.apply_remote_diff(&DocumentChange::modified("r1", mood(11.0, 11.0, 100)));

        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(reconciler.get(&rid("r1")).unwrap().latitude, 11.0);
    }

    #[test]
    fn test_removal_is_terminal_until_readded() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(10.0, 10.0, 100)));
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::removed("r1")),
            ApplyOutcome::Removed
        );
        assert!(!reconciler.snapshot().contains(&rid("r1")));

        // A straggling modification does not resurrect it
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::modified("r1", mood(10.0, 10.0, 300))),
            ApplyOutcome::Tombstoned
        );
        assert!(!reconciler.snapshot().contains(&rid("r1")));

        // A fresh add does
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(10.0, 10.0, 400))),
            ApplyOutcome::Inserted
        );
        assert!(reconciler.snapshot().contains(&rid("r1")));
    }

    #[test]
    fn test_remove_is_unconditional() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(10.0, 10.0, i64::MAX)));
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::removed("r1")),
            ApplyOutcome::Removed
        );
        assert_eq!(
            reconciler.apply_remote_diff(&DocumentChange::removed("r1")),
            ApplyOutcome::Absent
        );
    }

    #[test]
    fn test_eviction_respects_origin() {
        let mut reconciler = Reconciler::new(ReconcilerConfig {
            stale_ttl_ms: 1_000,
            ..Default::default()
        });
        reconciler.apply_self_position(&PositionSample::new(37.0, -122.0, 5.0, 100));
        reconciler.apply_remote_diff(&DocumentChange::added("old", mood(37.0, -122.0, 100)));
        reconciler.apply_remote_diff(&DocumentChange::added("fresh", mood(37.0, -122.0, 4_500)));

        let evicted = reconciler.evict_stale(5_000);

        assert_eq!(evicted, vec![rid("old")]);
        let snapshot = reconciler.snapshot();
        assert!(snapshot.self_record().is_some());
        assert!(snapshot.contains(&rid("fresh")));
        assert_eq!(reconciler.stats().evicted_stale, 1);
    }

    #[test]
    fn test_validation_isolation() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_remote_diff(&DocumentChange::added("good", mood(37.0, -122.0, 100)));
        let before = reconciler.snapshot();

        let mut poison = mood(0.0, 0.0, 200);
        poison["latitude"] = json!("NaN");
        let outcome = reconciler.apply_remote_diff(&DocumentChange::modified("good", poison));
        assert!(matches!(outcome, ApplyOutcome::Rejected(_)));

        let outcome = reconciler.apply_remote_diff(&DocumentChange::added("", mood(1.0, 1.0, 1)));
        assert_eq!(outcome, ApplyOutcome::Rejected(ValidationError::MissingRecordId));

        assert_eq!(reconciler.snapshot(), before);
        assert_eq!(reconciler.stats().rejected, 2);
    }

    #[test]
    fn test_typed_nan_record_rejected() {
        let record = PositionedRecord {
            record_id: rid("x"),
            latitude: f64::NAN,
            longitude: 0.0,
            accuracy_meters: 0.0,
            last_updated_at: 0,
            origin: SourceOrigin::Remote,
            attributes: Default::default(),
        };
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_remote_cannot_target_self() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_self_position(&PositionSample::new(37.0, -122.0, 5.0, 100));
        let outcome = reconciler.apply_remote_diff(&DocumentChange::removed("@self"));
        assert!(matches!(
            outcome,
            ApplyOutcome::Rejected(ValidationError::ReservedRecordId(_))
        ));
        assert!(reconciler.snapshot().self_record().is_some());
    }

    #[test]
    fn test_self_monotonicity_and_accuracy_guards() {
        let mut reconciler = Reconciler::new(ReconcilerConfig {
            max_accuracy_meters: 50.0,
            ..Default::default()
        });

        assert_eq!(
            reconciler.apply_self_position(&PositionSample::new(37.0, -122.0, 5.0, 200)),
            ApplyOutcome::Inserted
        );
        // Older sample
        assert!(matches!(
            reconciler.apply_self_position(&PositionSample::new(38.0, -122.0, 5.0, 150)),
            ApplyOutcome::Rejected(ValidationError::OutOfOrder { .. })
        ));
        // Inaccurate sample
        assert!(matches!(
            reconciler.apply_self_position(&PositionSample::new(38.0, -122.0, 500.0, 300)),
            ApplyOutcome::Rejected(ValidationError::InaccurateSample { .. })
        ));
        // Same timestamp, new position is accepted
        assert_eq!(
            reconciler.apply_self_position(&PositionSample::new(37.5, -122.0, 5.0, 200)),
            ApplyOutcome::Updated
        );

        let me = reconciler.snapshot().self_record().cloned().unwrap();
        assert_eq!(me.latitude, 37.5);
        assert_eq!(me.last_updated_at, 200);
    }

    #[test]
    fn test_capacity_evicts_oldest_remote_first() {
        let mut reconciler = Reconciler::new(ReconcilerConfig {
            max_records: 2,
            ..Default::default()
        });
        reconciler.apply_self_position(&PositionSample::new(0.0, 0.0, 1.0, 1));
        reconciler.apply_remote_diff(&DocumentChange::added("a", mood(1.0, 1.0, 100)));
        reconciler.apply_remote_diff(&DocumentChange::added("b", mood(1.0, 1.0, 200)));
        reconciler.apply_remote_diff(&DocumentChange::added("c", mood(1.0, 1.0, 300)));

        let snapshot = reconciler.snapshot();
        assert!(!snapshot.contains(&rid("a")));
        assert!(snapshot.contains(&rid("b")));
        assert!(snapshot.contains(&rid("c")));
        assert!(snapshot.self_record().is_some());

        // An incoming record older than everything is dropped on arrival
        let outcome = reconciler.apply_remote_diff(&DocumentChange::added("z", mood(1.0, 1.0, 5)));
        assert_eq!(outcome, ApplyOutcome::CapacityRejected);
        assert_eq!(reconciler.stats().evicted_capacity, 2);
    }

    #[test]
    fn test_within_radius_of_self() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_self_position(&PositionSample::new(53.5461, -113.4938, 5.0, 1));
        reconciler.apply_remote_diff(&DocumentChange::added("near", mood(53.5561, -113.4938, 1)));
        reconciler.apply_remote_diff(&DocumentChange::added("nearer", mood(53.5471, -113.4938, 1)));
        reconciler.apply_remote_diff(&DocumentChange::added("far", mood(51.0447, -114.0719, 1)));

        let hits = reconciler.within_radius_of_self(5_000.0);
        let ids: Vec<&str> = hits.iter().map(|(r, _)| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["nearer", "near"]);
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn test_disconnect_does_not_clear() {
        // Nothing but evict_stale or an explicit removal can shrink the index
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(1.0, 1.0, 100)));
        let evicted = reconciler.evict_stale(200);
        assert!(evicted.is_empty());
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_clear_remote_keeps_self() {
        let mut reconciler = Reconciler::with_defaults();
        reconciler.apply_self_position(&PositionSample::new(1.0, 1.0, 1.0, 1));
        reconciler.apply_remote_diff(&DocumentChange::added("r1", mood(1.0, 1.0, 100)));
        reconciler.clear_remote();
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.spatial_stats().total_entries, 1);
    }

    #[test]
    fn test_generation_only_moves_on_change() {
        let mut reconciler = Reconciler::with_defaults();
        let change = DocumentChange::added("r1", mood(1.0, 1.0, 100));
        reconciler.apply_remote_diff(&change);
        let g = reconciler.generation();
        reconciler.apply_remote_diff(&change);
        reconciler.apply_remote_diff(&DocumentChange::removed("zzz"));
        assert_eq!(reconciler.generation(), g);
    }

    proptest! {
        #[test]
        fn prop_lww_converges_regardless_of_order(
            times in proptest::collection::vec(0i64..1_000, 1..12),
            seed in any::<u64>(),
        ) {
            let changes: Vec<DocumentChange> = times
                .iter()
                .map(|t| DocumentChange::modified("r", mood((*t as f64) / 100.0, 0.0, *t)))
                .collect();

            let mut shuffled = changes.clone();
            // Deterministic permutation from the seed
            let n = shuffled.len();
            for i in 0..n {
                let j = (seed.wrapping_mul(i as u64 + 1).wrapping_add(7) % n as u64) as usize;
                shuffled.swap(i, j);
            }

            let mut a = Reconciler::with_defaults();
            a.apply_remote_diffs(&changes);
            let mut b = Reconciler::with_defaults();
            b.apply_remote_diffs(&shuffled);

            let max_t = *times.iter().max().unwrap();
            prop_assert_eq!(a.get(&rid("r")).unwrap().last_updated_at, max_t);
            prop_assert_eq!(b.get(&rid("r")).unwrap().last_updated_at, max_t);
            prop_assert_eq!(
                a.get(&rid("r")).unwrap().latitude,
                b.get(&rid("r")).unwrap().latitude
            );
        }

        #[test]
        fn prop_replaying_adds_is_idempotent(
            points in proptest::collection::vec((-89.0f64..89.0, -179.0f64..179.0, 0i64..10_000), 1..20),
        ) {
            let changes: Vec<DocumentChange> = points
                .iter()
                .enumerate()
                .map(|(i, (lat, lon, t))| DocumentChange::added(format!("r{i}"), mood(*lat, *lon, *t)))
                .collect();

            let mut once = Reconciler::with_defaults();
            once.apply_remote_diffs(&changes);
            let mut twice = Reconciler::with_defaults();
            twice.apply_remote_diffs(&changes);
            twice.apply_remote_diffs(&changes);

            let once_snap = once.snapshot();
            let twice_snap = twice.snapshot();
            prop_assert_eq!(once_snap.records(), twice_snap.records());
        }
    }
}
