//! SimWorld - one sync agent wired to simulated collaborators.
//!
//! Owns the context, the collection, the location source and the running
//! agent, and offers the waits and invariant checks the scenarios share.

use moodmap_core::{
    ClusterPresenter, IndexSnapshot, PositionedRecord, RecordFilter, ReconcilerStats, SyncAgent,
    SyncConfig, SyncError, SyncHandle, SyncStatus, Viewport,
};
use moodmap_env::{FaultController, MoodMapContext};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::context::SimContext;
use crate::exporter::{SimExport, SimFrame};
use crate::location::SimLocationSource;
use crate::stream::{SimCollection, SimStreamController};

/// Where the simulated device starts.
pub const HOME: (f64, f64) = (37.0, -122.0);

/// Moods the writers pick from.
pub const MOODS: &[&str] = &[
    "Happiness",
    "Sadness",
    "Anger",
    "Fear",
    "Surprise",
    "Disgust",
    "Shame",
    "Confusion",
];

/// Why a scenario run failed.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Agent not started")]
    NotStarted,
}

/// Fails with `SimError::Invariant` unless `condition` holds.
pub fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Invariant(message()))
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ScenarioMetrics {
    pub documents_written: u64,
    pub subscriptions_opened: u64,
    pub disruptions: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub evicted_stale: u64,
    pub evicted_capacity: u64,
    pub location_fixes: u64,
    pub renders: u64,
}

/// Simulated deployment of one device.
pub struct SimWorld {
    pub ctx: Arc<SimContext>,
    pub collection: SimCollection,
    pub controller: SimStreamController,
    pub location: SimLocationSource,
    pub config: SyncConfig,
    pub viewport: Viewport,
    pub export: SimExport,
    pub metrics: ScenarioMetrics,
    handle: Option<SyncHandle>,
}

impl SimWorld {
    /// Creates a world with a random-walk device at [`HOME`].
    ///
    /// Must be called inside the simulation runtime.
    pub fn new(seed: u64, scenario: &str, config: SyncConfig) -> Self {
        let ctx = SimContext::shared(seed);
        let collection = SimCollection::new(config.query.collection.clone());
        let controller = collection.controller();
        let location = SimLocationSource::random_walk(Arc::clone(&ctx), HOME.0, HOME.1, 15.0);
        Self {
            ctx,
            collection,
            controller,
            location,
            config,
            viewport: Viewport::world(4),
            export: SimExport::new(scenario, seed),
            metrics: ScenarioMetrics::default(),
            handle: None,
        }
    }

    /// Replaces the location source. Only before `start`.
    pub fn with_location(mut self, location: SimLocationSource) -> Self {
        self.location = location;
        self
    }

    pub fn start(&mut self) -> Result<(), SimError> {
        let agent = SyncAgent::new(
            Arc::clone(&self.ctx),
            Arc::new(self.collection.stream()),
            Arc::new(self.location.clone()),
            self.config.clone(),
        )?;
        self.handle = Some(agent.start());
        Ok(())
    }

    pub fn handle(&self) -> Result<&SyncHandle, SimError> {
        self.handle.as_ref().ok_or(SimError::NotStarted)
    }

    pub fn now_ms(&self) -> u64 {
        self.ctx.now().as_millis() as u64
    }

    pub async fn sleep(&self, duration: Duration) {
        self.ctx.sleep(duration).await;
    }

    // ------------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------------

    /// A mood event document.
    pub fn mood_doc(lat: f64, lon: f64, time: i64, mood: &str) -> Value {
        json!({
            "latitude": lat,
            "longitude": lon,
            "hasLocation": true,
            "time": time,
            "mood": mood,
            "reason": "sim",
            "publicStatus": true,
        })
    }

    pub fn write(&mut self, id: &str, payload: Value) {
        self.collection.put(id, payload);
        self.metrics.documents_written += 1;
    }

    /// Writes a document with a random mood near `center`, stamped now.
    pub fn write_near(&mut self, id: &str, center: (f64, f64), radius_m: f64) {
        let (lat, lon) = self.random_point_near(center, radius_m);
        let mood = self.random_mood();
        let doc = Self::mood_doc(lat, lon, self.ctx.unix_millis(), mood);
        self.write(id, doc);
    }

    /// Writes a document anywhere on the populated globe, stamped now.
    pub fn write_anywhere(&mut self, id: &str) {
        let (lat, lon) = self
            .ctx
            .with_rng(|rng| (rng.gen_range(-60.0..60.0), rng.gen_range(-170.0..170.0)));
        let mood = self.random_mood();
        let doc = Self::mood_doc(lat, lon, self.ctx.unix_millis(), mood);
        self.write(id, doc);
    }

    pub fn random_mood(&self) -> &'static str {
        MOODS[self.ctx.gen_range(0, MOODS.len() as u64) as usize]
    }

    /// Uniform point in a square of half-width `radius_m` around `center`.
    pub fn random_point_near(&self, center: (f64, f64), radius_m: f64) -> (f64, f64) {
        let (dx, dy) = self.ctx.with_rng(|rng| {
            (
                rng.gen_range(-radius_m..=radius_m),
                rng.gen_range(-radius_m..=radius_m),
            )
        });
        let lat = center.0 + dy / 111_320.0;
        let lon = center.1 + dx / (111_320.0 * center.0.to_radians().cos());
        (lat, lon)
    }

    // ------------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------------

    /// Waits (on the virtual clock) until the published index satisfies `pred`.
    pub async fn wait_until<F>(&self, what: &str, timeout: Duration, mut pred: F) -> Result<Arc<IndexSnapshot>, SimError>
    where
        F: FnMut(&IndexSnapshot) -> bool,
    {
        let mut snapshots = self.handle()?.subscribe_snapshots();
        let waited = tokio::time::timeout(timeout, async {
            snapshots.wait_for(|s| pred(&**s)).await.map(|s| Arc::clone(&*s))
        })
        .await;
        match waited {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(SimError::Invariant(format!("agent stopped while waiting for {what}"))),
            Err(_) => Err(SimError::Timeout(timeout, what.to_string())),
        }
    }

    pub async fn wait_status<F>(&self, what: &str, timeout: Duration, mut pred: F) -> Result<SyncStatus, SimError>
    where
        F: FnMut(&SyncStatus) -> bool,
    {
        let mut status = self.handle()?.subscribe_status();
        let waited = tokio::time::timeout(timeout, async {
            status.wait_for(|s| pred(s)).await.map(|s| s.clone())
        })
        .await;
        match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(SimError::Invariant(format!("agent stopped while waiting for {what}"))),
            Err(_) => Err(SimError::Timeout(timeout, what.to_string())),
        }
    }

    /// Waits until the remote part of the index mirrors the collection.
    pub async fn wait_mirrored(&self, timeout: Duration) -> Result<Arc<IndexSnapshot>, SimError> {
        let documents = self.collection.documents();
        self.wait_until("index to mirror the collection", timeout, |snapshot| {
            mirrors(snapshot, &documents)
        })
        .await
    }

    /// Lets every queued event drain.
    pub async fn settle(&self) {
        self.ctx.sleep(Duration::from_millis(100)).await;
    }

    // ------------------------------------------------------------------------
    // Checks & capture
    // ------------------------------------------------------------------------

    pub fn remote_records(snapshot: &IndexSnapshot) -> Vec<&PositionedRecord> {
        snapshot.iter().filter(|r| r.is_remote()).collect()
    }

    /// Clusters partition the visible records and are reproducible.
    pub fn check_clusters(&self, snapshot: &IndexSnapshot) -> Result<(), SimError> {
        let presenter = self.handle()?.presenter();
        let first = presenter.compute_clusters(snapshot, &self.viewport);
        let second = presenter.compute_clusters(snapshot, &self.viewport);
        check(first == second, || "clustering is not deterministic".into())?;

        let filter = RecordFilter::default();
        let visible = snapshot
            .iter()
            .filter(|r| self.viewport.contains(r.latitude, r.longitude) && filter.matches(r))
            .count();
        let clustered: usize = first.iter().map(|c| c.len()).sum();
        check(clustered == visible, || {
            format!("clusters hold {clustered} members, {visible} records visible")
        })?;
        check(first.iter().all(|c| !c.is_empty()), || "empty cluster".into())
    }

    /// Records a frame of what the map would show now.
    pub fn capture(&mut self, label: &str) -> Result<(), SimError> {
        let handle = self.handle()?;
        let snapshot = handle.snapshot();
        let status = handle.status();
        let clusters = handle.presenter().compute_clusters(&snapshot, &self.viewport);
        let frame = SimFrame::new(
            self.now_ms(),
            label,
            snapshot.generation(),
            snapshot.len(),
            &status,
            &clusters,
        );
        debug!(label, clusters = clusters.len(), records = snapshot.len(), "captured frame");
        self.export.add_frame(frame);
        Ok(())
    }

    pub fn capture_clusters(&mut self, label: &str, presenter: &ClusterPresenter) -> Result<(), SimError> {
        let handle = self.handle()?;
        let snapshot = handle.snapshot();
        let status = handle.status();
        let frame = SimFrame::new(
            self.now_ms(),
            label,
            snapshot.generation(),
            snapshot.len(),
            &status,
            presenter.last_clusters(),
        );
        self.export.add_frame(frame);
        Ok(())
    }

    pub async fn stats(&self) -> Result<ReconcilerStats, SimError> {
        Ok(self.handle()?.stats().await?)
    }

    /// Stops the agent and fills in the final metrics.
    pub async fn finish(&mut self) -> usize {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        let final_count = handle.snapshot().len();
        if let Ok(stats) = handle.stats().await {
            self.metrics.accepted = stats.accepted;
            self.metrics.rejected = stats.rejected;
            self.metrics.evicted_stale = stats.evicted_stale;
            self.metrics.evicted_capacity = stats.evicted_capacity;
        }
        self.metrics.disruptions = handle.status().disruptions;
        self.metrics.subscriptions_opened = self.collection.subscriptions_opened();
        self.metrics.location_fixes = self.location.delivered();

        handle.join().await;
        if self.controller.active_subscriptions() != 0 {
            tracing::warn!("listener still registered after shutdown");
        }
        final_count
    }
}

/// True if the remote records are exactly the collection's valid documents at
/// their current versions.
pub fn mirrors(snapshot: &IndexSnapshot, documents: &[(String, Value)]) -> bool {
    let expected: BTreeMap<&str, i64> = documents
        .iter()
        .filter_map(|(id, doc)| doc.get("time").and_then(Value::as_i64).map(|t| (id.as_str(), t)))
        .collect();
    let actual: BTreeMap<&str, i64> = snapshot
        .iter()
        .filter(|r| r.is_remote())
        .map(|r| (r.record_id.as_str(), r.last_updated_at))
        .collect();
    expected == actual
}
