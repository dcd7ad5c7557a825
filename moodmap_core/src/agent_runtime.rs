//! Agent Runtime - wires the producers, the reconciler and the snapshot
//! publication together on top of the environment context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────┐
//! │ RecordStream │   │LocationProvider│   │ evict ticker │
//! │  (producer)  │   │   (producer)   │   │  (periodic)  │
//! └──────┬───────┘   └───────┬────────┘   └──────┬───────┘
//!        │    SyncEvent      │                   │
//!        └──────────────┐    │    ┌──────────────┘
//!                       ▼    ▼    ▼
//!                 ┌──────────────────────┐
//!                 │  bounded mpsc queue  │
//!                 └──────────┬───────────┘
//!                            ▼
//!                 ┌──────────────────────┐
//!                 │   reconciler loop    │  (only writer)
//!                 └──────────┬───────────┘
//!                            │ watch<Arc<IndexSnapshot>>
//!                            ▼
//!                     SyncHandle / UI
//! ```
//!
//! Producers never touch the index; they only enqueue events. A lost
//! connection marks the link stale and keeps the last-known records on the
//! map until they age out.
//!
//! # Usage
//!
//! ```ignore
//! use moodmap_core::agent_runtime::{SyncAgent, SyncConfig};
//! use moodmap_env::TokioContext;
//!
//! let agent = SyncAgent::new(TokioContext::shared(), stream, location, SyncConfig::default())?;
//! let handle = agent.start();
//! let snapshot = handle.snapshot();
//! handle.shutdown();
//! ```

use moodmap_env::{
    DocumentChange, EnvError, LocationProfile, LocationProvider, MoodMapContext, PositionSample,
    QueryKey, RecordStream,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::cluster::{ClusterPresenter, PresenterConfig};
use crate::error::{Result, SyncError};
use crate::reconciler::{ApplyOutcome, IndexSnapshot, Reconciler, ReconcilerConfig, ReconcilerStats};
use crate::record::PositionedRecord;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for a sync agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub reconciler: ReconcilerConfig,
    pub presenter: PresenterConfig,
    pub backoff: BackoffConfig,

    /// Period of the staleness sweep (default: 60 s)
    pub evict_interval_ms: u64,

    /// Capacity of the event queue (default: 1024)
    pub channel_capacity: usize,

    /// Remote query to follow (default: the "moods" collection)
    pub query: QueryKey,

    /// Interval/accuracy profile requested from the location provider
    pub location: LocationProfile,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            presenter: PresenterConfig::default(),
            backoff: BackoffConfig::default(),
            evict_interval_ms: 60_000,
            channel_capacity: 1024,
            query: QueryKey::default(),
            location: LocationProfile::default(),
        }
    }
}

/// Finest zoom the grid supports
const MAX_ZOOM: u8 = 30;

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(SyncError::Config("channel_capacity must be positive".into()));
        }
        if self.evict_interval_ms == 0 {
            return Err(SyncError::Config("evict_interval_ms must be positive".into()));
        }
        if self.reconciler.stale_ttl_ms <= 0 {
            return Err(SyncError::Config("stale_ttl_ms must be positive".into()));
        }
        if self.reconciler.max_accuracy_meters.is_nan() || self.reconciler.max_accuracy_meters <= 0.0 {
            return Err(SyncError::Config("max_accuracy_meters must be positive".into()));
        }
        if !self.presenter.base_cell_degrees.is_finite() || self.presenter.base_cell_degrees <= 0.0 {
            return Err(SyncError::Config("base_cell_degrees must be positive".into()));
        }
        if self.presenter.max_zoom > MAX_ZOOM {
            return Err(SyncError::Config(format!("max_zoom must be at most {MAX_ZOOM}")));
        }
        if self.backoff.max_delay_ms < self.backoff.initial_delay_ms {
            return Err(SyncError::Config("max_delay_ms is below initial_delay_ms".into()));
        }
        Ok(())
    }
}

// ============================================================================
// EVENTS & STATUS
// ============================================================================

/// Which producer an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    Remote,
    Location,
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Location => write!(f, "location"),
        }
    }
}

/// Everything the reconciler loop reacts to, in arrival order.
#[derive(Debug)]
pub enum SyncEvent {
    Remote(DocumentChange),
    SelfPosition(PositionSample),
    EvictTick,
    StreamDisrupted { source: Producer, reason: String },
    StreamRestored { source: Producer },
    /// Remote records near the device, answered from inside the loop
    Nearby {
        radius_m: f64,
        reply: oneshot::Sender<Vec<(PositionedRecord, f64)>>,
    },
    Stats {
        reply: oneshot::Sender<ReconcilerStats>,
    },
    /// Explicit session teardown (sign-out); never sent on disconnect
    ClearRemote,
}

/// Health of one producer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Not yet subscribed
    Connecting,
    /// Subscribed and delivering
    Live,
    /// Disconnected; last-known data is still shown
    Stale,
}

/// What the UI shows about the sync layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub remote: LinkState,
    pub location: LinkState,
    /// Unix ms of the last remote change received
    pub last_remote_event_at: Option<i64>,
    /// Number of producer disruptions seen so far
    pub disruptions: u64,
    pub generation: u64,
    /// Number of snapshots handed to readers
    pub snapshots_published: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            remote: LinkState::Connecting,
            location: LinkState::Connecting,
            last_remote_event_at: None,
            disruptions: 0,
            generation: 0,
            snapshots_published: 0,
        }
    }
}

impl SyncStatus {
    pub fn is_stale(&self) -> bool {
        self.remote == LinkState::Stale || self.location == LinkState::Stale
    }
}

// ============================================================================
// AGENT
// ============================================================================

/// A sync agent owning the reconciler and its producers.
///
/// Generic over the context and collaborator implementations, so the same
/// agent runs on the device (tokio) or in the simulator.
pub struct SyncAgent<Ctx, S, L>
where
    Ctx: MoodMapContext,
    S: RecordStream,
    L: LocationProvider,
{
    context: Arc<Ctx>,
    stream: Arc<S>,
    location: Arc<L>,
    config: SyncConfig,
}

impl<Ctx, S, L> SyncAgent<Ctx, S, L>
where
    Ctx: MoodMapContext,
    S: RecordStream,
    L: LocationProvider,
{
    pub fn new(context: Arc<Ctx>, stream: Arc<S>, location: Arc<L>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            context,
            stream,
            location,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Spawns the producers, the eviction ticker and the reconciler loop.
    pub fn start(self) -> SyncHandle {
        let reconciler = Reconciler::new(self.config.reconciler.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        // Every task holds a clone; the receiver closes when all have exited
        let (done_tx, done_rx) = mpsc::channel::<()>(1);

        info!(
            query = %self.config.query,
            seed = self.context.seed(),
            "starting sync agent"
        );

        {
            let ctx = Arc::clone(&self.context);
            let stream = Arc::clone(&self.stream);
            let query = self.config.query.clone();
            let backoff = self.config.backoff.clone();
            let tx = event_tx.clone();
            let shutdown = shutdown_rx.clone();
            let guard = done_tx.clone();
            self.context.spawn("moodmap-remote", async move {
                run_remote_producer(ctx, stream, query, backoff, tx, shutdown).await;
                drop(guard);
            });
        }

        {
            let ctx = Arc::clone(&self.context);
            let location = Arc::clone(&self.location);
            let profile = self.config.location;
            let backoff = self.config.backoff.clone();
            let tx = event_tx.clone();
            let shutdown = shutdown_rx.clone();
            let guard = done_tx.clone();
            self.context.spawn("moodmap-location", async move {
                run_location_producer(ctx, location, profile, backoff, tx, shutdown).await;
                drop(guard);
            });
        }

        {
            let ctx = Arc::clone(&self.context);
            let period = Duration::from_millis(self.config.evict_interval_ms);
            let tx = event_tx.clone();
            let shutdown = shutdown_rx.clone();
            let guard = done_tx.clone();
            self.context.spawn("moodmap-evict", async move {
                run_evict_ticker(ctx, period, tx, shutdown).await;
                drop(guard);
            });
        }

        {
            let sync_loop = SyncLoop {
                context: Arc::clone(&self.context),
                reconciler,
                snapshots: snapshot_tx,
                status: status_tx,
            };
            let shutdown = shutdown_rx;
            let guard = done_tx;
            self.context.spawn("moodmap-reconciler", async move {
                sync_loop.run(event_rx, shutdown).await;
                drop(guard);
            });
        }

        SyncHandle {
            snapshots: snapshot_rx,
            status: status_rx,
            commands: event_tx,
            shutdown: shutdown_tx,
            done: done_rx,
            presenter: self.config.presenter,
        }
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Caller-side view of a running agent.
///
/// Dropping the handle stops the agent like [`SyncHandle::shutdown`].
pub struct SyncHandle {
    snapshots: watch::Receiver<Arc<IndexSnapshot>>,
    status: watch::Receiver<SyncStatus>,
    commands: mpsc::Sender<SyncEvent>,
    shutdown: watch::Sender<bool>,
    done: mpsc::Receiver<()>,
    presenter: PresenterConfig,
}

impl SyncHandle {
    /// Latest published snapshot. Never blocks.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<IndexSnapshot>> {
        self.snapshots.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// A presenter configured for this agent, for the render loop.
    pub fn presenter(&self) -> ClusterPresenter {
        ClusterPresenter::new(self.presenter.clone())
    }

    /// Remote records within `radius_m` of the device, nearest first.
    pub async fn nearby(&self, radius_m: f64) -> Result<Vec<(PositionedRecord, f64)>> {
        let (reply, answer) = oneshot::channel();
        self.send(SyncEvent::Nearby { radius_m, reply }).await?;
        answer.await.map_err(|_| stopped())
    }

    pub async fn stats(&self) -> Result<ReconcilerStats> {
        let (reply, answer) = oneshot::channel();
        self.send(SyncEvent::Stats { reply }).await?;
        answer.await.map_err(|_| stopped())
    }

    /// Drops every remote record. For sign-out only.
    pub async fn clear_remote(&self) -> Result<()> {
        self.send(SyncEvent::ClearRemote).await
    }

    async fn send(&self, event: SyncEvent) -> Result<()> {
        self.commands.send(event).await.map_err(|_| stopped())
    }

    /// Signals every task to stop and returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signals shutdown and waits until every task has exited.
    pub async fn join(mut self) {
        self.shutdown();
        while self.done.recv().await.is_some() {}
    }
}

fn stopped() -> SyncError {
    SyncError::Env(EnvError::closed("sync agent stopped"))
}

// ============================================================================
// RECONCILER LOOP
// ============================================================================

/// Most events applied between two snapshot publications.
const MAX_BATCH: usize = 256;

/// The single writer of the index.
struct SyncLoop<Ctx: MoodMapContext> {
    context: Arc<Ctx>,
    reconciler: Reconciler,
    snapshots: watch::Sender<Arc<IndexSnapshot>>,
    status: watch::Sender<SyncStatus>,
}

impl<Ctx: MoodMapContext> SyncLoop<Ctx> {
    async fn run(mut self, mut events: mpsc::Receiver<SyncEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            // Drain what is already queued so a replay publishes once per batch
            let mut changed = self.handle(event);
            for _ in 1..MAX_BATCH {
                match events.try_recv() {
                    Ok(event) => changed |= self.handle(event),
                    Err(_) => break,
                }
            }

            if changed {
                self.publish();
            }
        }
        info!(generation = self.reconciler.generation(), "sync loop stopped");
    }

    /// Applies one event. Returns true if the index changed.
    fn handle(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::Remote(change) => {
                let at = self.context.unix_millis();
                self.status.send_modify(|s| {
                    s.last_remote_event_at = Some(at);
                    s.remote = LinkState::Live;
                });
                let outcome = self.reconciler.apply_remote_diff(&change);
                if !matches!(outcome, ApplyOutcome::Rejected(_)) {
                    debug!(id = %change.document_id, ?outcome, "remote change");
                }
                outcome.changed()
            }
            SyncEvent::SelfPosition(sample) => {
                let outcome = self.reconciler.apply_self_position(&sample);
                outcome.changed()
            }
            SyncEvent::EvictTick => {
                let evicted = self.reconciler.evict_stale(self.context.unix_millis());
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "evicted stale records");
                }
                !evicted.is_empty()
            }
            SyncEvent::StreamDisrupted { source, reason } => {
                let disruption = SyncError::StreamDisruption(reason);
                warn!(%source, %disruption, "producer disrupted, keeping last-known records");
                self.status.send_modify(|s| {
                    s.disruptions += 1;
                    match source {
                        Producer::Remote => s.remote = LinkState::Stale,
                        Producer::Location => s.location = LinkState::Stale,
                    }
                });
                false
            }
            SyncEvent::StreamRestored { source } => {
                self.status.send_modify(|s| match source {
                    Producer::Remote => s.remote = LinkState::Live,
                    Producer::Location => s.location = LinkState::Live,
                });
                false
            }
            SyncEvent::Nearby { radius_m, reply } => {
                let _ = reply.send(self.reconciler.within_radius_of_self(radius_m));
                false
            }
            SyncEvent::Stats { reply } => {
                let _ = reply.send(self.reconciler.stats());
                false
            }
            SyncEvent::ClearRemote => {
                let before = self.reconciler.generation();
                self.reconciler.clear_remote();
                info!("cleared remote records");
                self.reconciler.generation() != before
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.reconciler.snapshot();
        let generation = snapshot.generation();
        self.snapshots.send_replace(snapshot);
        self.status.send_modify(|s| {
            s.generation = generation;
            s.snapshots_published += 1;
        });
    }
}

// ============================================================================
// PRODUCERS
// ============================================================================

/// Keeps exactly one remote subscription alive, resubscribing with backoff.
async fn run_remote_producer<Ctx: MoodMapContext, S: RecordStream>(
    ctx: Arc<Ctx>,
    stream: Arc<S>,
    query: QueryKey,
    backoff: BackoffConfig,
    events: mpsc::Sender<SyncEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(backoff);

    while !*shutdown.borrow() {
        let subscribed = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = stream.subscribe(&query) => result,
        };

        let reason = match subscribed {
            Ok(mut subscription) => {
                backoff.reset();
                info!(subscription = %subscription.id(), %query, "remote subscription established");
                let restored = SyncEvent::StreamRestored {
                    source: Producer::Remote,
                };
                if events.send(restored).await.is_err() {
                    return;
                }

                loop {
                    let next = tokio::select! {
                        biased;
                        // Returning drops the subscription, which deregisters it
                        _ = shutdown.changed() => return,
                        next = subscription.next() => next,
                    };
                    match next {
                        Some(Ok(change)) => {
                            if events.send(SyncEvent::Remote(change)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "remote stream ended".to_string(),
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        let disrupted = SyncEvent::StreamDisrupted {
            source: Producer::Remote,
            reason,
        };
        if events.send(disrupted).await.is_err() {
            return;
        }

        let delay = backoff.next_delay(ctx.random_unit());
        debug!(attempt = backoff.attempt(), ?delay, "resubscribing after backoff");
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ctx.sleep(delay) => {}
        }
    }
}

/// Keeps the location feed running with the same restart policy.
async fn run_location_producer<Ctx: MoodMapContext, L: LocationProvider>(
    ctx: Arc<Ctx>,
    location: Arc<L>,
    profile: LocationProfile,
    backoff: BackoffConfig,
    events: mpsc::Sender<SyncEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(backoff);

    while !*shutdown.borrow() {
        let requested = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = location.request_updates(&profile) => result,
        };

        let reason = match requested {
            Ok(mut updates) => {
                backoff.reset();
                info!(interval_ms = profile.interval_ms, "location updates started");
                let restored = SyncEvent::StreamRestored {
                    source: Producer::Location,
                };
                if events.send(restored).await.is_err() {
                    return;
                }

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = shutdown.changed() => return,
                        next = updates.next() => next,
                    };
                    match next {
                        Some(Ok(sample)) => {
                            if events.send(SyncEvent::SelfPosition(sample)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "location updates ended".to_string(),
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        let disrupted = SyncEvent::StreamDisrupted {
            source: Producer::Location,
            reason,
        };
        if events.send(disrupted).await.is_err() {
            return;
        }

        let delay = backoff.next_delay(ctx.random_unit());
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ctx.sleep(delay) => {}
        }
    }
}

/// Fixed-period staleness sweep, independent of stream activity.
async fn run_evict_ticker<Ctx: MoodMapContext>(
    ctx: Arc<Ctx>,
    period: Duration,
    events: mpsc::Sender<SyncEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ctx.sleep(period) => {}
        }
        if events.send(SyncEvent::EvictTick).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use moodmap_env::{LocationUpdates, Subscription, SubscriptionId, TokioContext};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------------
    // Scripted collaborators
    // ------------------------------------------------------------------------

    /// One subscription's worth of changes; `hang` keeps it open afterwards.
    struct Session {
        changes: Vec<DocumentChange>,
        hang: bool,
    }

    #[derive(Default)]
    struct ScriptedStream {
        sessions: Mutex<VecDeque<Session>>,
        unavailable_after_scripts: AtomicBool,
        active: Arc<AtomicUsize>,
        subscribes: AtomicUsize,
    }

    impl ScriptedStream {
        fn new(sessions: Vec<Session>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                ..Default::default()
            }
        }
    }

    struct ScriptedSubscription {
        changes: VecDeque<DocumentChange>,
        hang: bool,
        active: Arc<AtomicUsize>,
        id: SubscriptionId,
    }

    impl Drop for ScriptedSubscription {
        fn drop(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next(&mut self) -> Option<std::result::Result<DocumentChange, EnvError>> {
            if let Some(change) = self.changes.pop_front() {
                return Some(Ok(change));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            None
        }

        fn id(&self) -> SubscriptionId {
            self.id
        }
    }

    #[async_trait]
    impl RecordStream for ScriptedStream {
        async fn subscribe(
            &self,
            _query: &QueryKey,
        ) -> std::result::Result<Box<dyn Subscription>, EnvError> {
            let n = self.subscribes.fetch_add(1, Ordering::SeqCst);
            let session = self.sessions.lock().unwrap().pop_front();
            let session = match session {
                Some(s) => s,
                None if self.unavailable_after_scripts.load(Ordering::SeqCst) => {
                    return Err(EnvError::subscription("offline"));
                }
                None => Session {
                    changes: Vec::new(),
                    hang: true,
                },
            };
            self.active.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSubscription {
                changes: session.changes.into(),
                hang: session.hang,
                active: Arc::clone(&self.active),
                id: SubscriptionId::from_seed(n as u64),
            }))
        }
    }

    struct ScriptedLocation {
        samples: Vec<PositionSample>,
    }

    struct ScriptedUpdates {
        samples: VecDeque<PositionSample>,
    }

    #[async_trait]
    impl LocationUpdates for ScriptedUpdates {
        async fn next(&mut self) -> Option<std::result::Result<PositionSample, EnvError>> {
            match self.samples.pop_front() {
                Some(s) => Some(Ok(s)),
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedLocation {
        async fn request_updates(
            &self,
            _profile: &LocationProfile,
        ) -> std::result::Result<Box<dyn LocationUpdates>, EnvError> {
            Ok(Box::new(ScriptedUpdates {
                samples: self.samples.clone().into(),
            }))
        }
    }

    fn doc(id: &str, lat: f64, lon: f64, time: i64) -> DocumentChange {
        DocumentChange::added(id, json!({ "latitude": lat, "longitude": lon, "time": time, "mood": "Fear" }))
    }

    fn here() -> ScriptedLocation {
        ScriptedLocation {
            samples: vec![PositionSample::new(37.0, -122.0, 5.0, 1_000)],
        }
    }

    fn now_ms() -> i64 {
        TokioContext::new().unix_millis()
    }

    fn start(stream: Arc<ScriptedStream>, location: ScriptedLocation, config: SyncConfig) -> SyncHandle {
        SyncAgent::new(TokioContext::shared(), stream, Arc::new(location), config)
            .unwrap()
            .start()
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.evict_interval_ms, 60_000);
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.query, QueryKey::new("moods"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_rejects_zero_capacity() {
        let config = SyncConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_sync_config_rejects_excessive_zoom() {
        let mut config = SyncConfig::default();
        config.presenter.max_zoom = 40;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        config.presenter.max_zoom = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_from_partial_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "evict_interval_ms": 5000, "reconciler": { "max_records": 10 } }"#).unwrap();
        assert_eq!(config.evict_interval_ms, 5_000);
        assert_eq!(config.reconciler.max_records, 10);
        assert_eq!(config.channel_capacity, 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_merges_both_producers() {
        let t = now_ms();
        let stream = Arc::new(ScriptedStream::new(vec![Session {
            changes: vec![doc("R1", 37.001, -122.001, t), doc("R2", 40.0, -100.0, t)],
            hang: true,
        }]));
        let handle = start(stream, here(), SyncConfig::default());

        let mut snapshots = handle.subscribe_snapshots();
        snapshots.wait_for(|s| s.len() == 3).await.unwrap();

        let snapshot = handle.snapshot();
        assert!(snapshot.self_record().is_some());
        let status = handle.status();
        assert_eq!(status.remote, LinkState::Live);
        assert_eq!(status.location, LinkState::Live);
        assert!(status.last_remote_event_at.is_some());

        let nearby = handle.nearby(5_000.0).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].0.record_id.as_str(), "R1");

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscription_does_not_duplicate_state() {
        let t = now_ms();
        let stream = Arc::new(ScriptedStream::new(vec![
            Session {
                changes: vec![doc("R1", 10.0, 10.0, t), doc("R2", 11.0, 11.0, t)],
                hang: false,
            },
            // Replay after reconnect plus one new record
            Session {
                changes: vec![
                    doc("R1", 10.0, 10.0, t),
                    doc("R2", 11.0, 11.0, t),
                    doc("R3", 12.0, 12.0, t),
                ],
                hang: true,
            },
        ]));
        let handle = start(Arc::clone(&stream), here(), SyncConfig::default());

        let mut snapshots = handle.subscribe_snapshots();
        snapshots.wait_for(|s| s.len() == 4).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.remote_records, 3);
        assert_eq!(stream.subscribes.load(Ordering::SeqCst), 2);

        let status = handle.status();
        assert_eq!(status.disruptions, 1);
        assert_eq!(status.remote, LinkState::Live);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_replay_publishes_in_batches() {
        let t = now_ms();
        let replay: Vec<DocumentChange> = (0..2_000)
            .map(|i| doc(&format!("R{i:04}"), 10.0 + f64::from(i) * 0.001, 10.0, t))
            .collect();
        let stream = Arc::new(ScriptedStream::new(vec![Session {
            changes: replay,
            hang: true,
        }]));
        let handle = start(stream, here(), SyncConfig::default());

        let mut snapshots = handle.subscribe_snapshots();
        snapshots.wait_for(|s| s.len() == 2_001).await.unwrap();

        let status = handle.status();
        assert_eq!(status.generation, handle.snapshot().generation());
        assert!(status.snapshots_published >= 1);
        assert!(
            status.snapshots_published < 200,
            "{} snapshots for 2000 changes",
            status.snapshots_published
        );

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_records_and_marks_stale() {
        let t = now_ms();
        let stream = ScriptedStream::new(vec![Session {
            changes: vec![doc("R1", 10.0, 10.0, t)],
            hang: false,
        }]);
        stream.unavailable_after_scripts.store(true, Ordering::SeqCst);
        let stream = Arc::new(stream);
        let handle = start(Arc::clone(&stream), here(), SyncConfig::default());

        let mut status = handle.subscribe_status();
        status.wait_for(|s| s.disruptions >= 3).await.unwrap();

        assert_eq!(handle.status().remote, LinkState::Stale);
        assert!(handle.status().is_stale());
        assert!(handle.snapshot().len() >= 1);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.remote_records, 1);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deregisters_subscription() {
        let stream = Arc::new(ScriptedStream::new(Vec::new()));
        let handle = start(Arc::clone(&stream), here(), SyncConfig::default());

        let mut status = handle.subscribe_status();
        status.wait_for(|s| s.remote == LinkState::Live).await.unwrap();
        assert_eq!(stream.active.load(Ordering::SeqCst), 1);

        handle.join().await;
        assert_eq!(stream.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_ticker_spares_self() {
        let ancient = now_ms() - 10 * 24 * 60 * 60 * 1000;
        let stream = Arc::new(ScriptedStream::new(vec![Session {
            changes: vec![doc("old", 10.0, 10.0, ancient)],
            hang: true,
        }]));
        let location = ScriptedLocation {
            samples: vec![PositionSample::new(37.0, -122.0, 5.0, ancient)],
        };
        let config = SyncConfig {
            evict_interval_ms: 1_000,
            ..Default::default()
        };
        let handle = start(stream, location, config);

        let mut snapshots = handle.subscribe_snapshots();
        snapshots.wait_for(|s| s.generation() >= 3).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.self_record().is_some());
        assert_eq!(handle.stats().await.unwrap().evicted_stale, 1);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_remote_on_sign_out() {
        let t = now_ms();
        let stream = Arc::new(ScriptedStream::new(vec![Session {
            changes: vec![doc("R1", 10.0, 10.0, t)],
            hang: true,
        }]));
        let handle = start(stream, here(), SyncConfig::default());

        let mut snapshots = handle.subscribe_snapshots();
        snapshots.wait_for(|s| s.len() == 2).await.unwrap();

        handle.clear_remote().await.unwrap();
        snapshots.wait_for(|s| s.len() == 1).await.unwrap();
        assert!(handle.snapshot().self_record().is_some());

        handle.join().await;
    }
}
