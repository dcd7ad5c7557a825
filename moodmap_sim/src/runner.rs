//! Scenario runner - executes chaos engineering test scenarios.
//!
//! Each run gets its own current-thread runtime with a paused clock, so
//! virtual time only moves when every task is waiting and a seed fully
//! determines the run.

use moodmap_core::{
    ClusterPresenter, LinkState, RecordId, SyncConfig, Viewport,
};
use moodmap_env::{DocumentChange, FaultController, MoodMapContext, PositionSample};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::exporter::SimExport;
use crate::location::SimLocationSource;
use crate::scenarios::ScenarioId;
use crate::world::{check, mirrors, ScenarioMetrics, SimError, SimWorld, HOME};

const HOUR: Duration = Duration::from_secs(3600);

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final virtual time in milliseconds
    pub final_time_ms: u64,

    /// Records in the index when the agent stopped
    pub final_record_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Frames captured during the run
    pub export: SimExport,
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Base agent configuration; scenarios may override parts of it
    config: SyncConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SyncConfig::default(),
        }
    }

    /// Sets the base agent configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return self.aborted(scenario, SimError::Runtime(e)),
        };

        runtime.block_on(async {
            let mut world = SimWorld::new(self.seed, scenario.name(), self.scenario_config(scenario));
            if let Some(location) = self.scenario_location(scenario, &world) {
                world = world.with_location(location);
            }

            let outcome = match scenario {
                ScenarioId::HappyPath => self.run_happy_path(&mut world).await,
                ScenarioId::ReconnectStorm => self.run_reconnect_storm(&mut world).await,
                ScenarioId::StaleEviction => self.run_stale_eviction(&mut world).await,
                ScenarioId::PoisonPill => self.run_poison_pill(&mut world).await,
                ScenarioId::CapacityFlood => self.run_capacity_flood(&mut world).await,
                ScenarioId::BurstDebounce => self.run_burst_debounce(&mut world).await,
            };

            let final_record_count = world.finish().await;
            let failure_reason = outcome.err().map(|e| e.to_string());
            let passed = failure_reason.is_none();
            world.export.finalize(passed, failure_reason.clone());

            ScenarioResult {
                scenario,
                seed: self.seed,
                passed,
                final_time_ms: world.now_ms(),
                final_record_count,
                failure_reason,
                metrics: world.metrics.clone(),
                export: world.export.clone(),
            }
        })
    }

    fn aborted(&self, scenario: ScenarioId, error: SimError) -> ScenarioResult {
        let mut export = SimExport::new(scenario.name(), self.seed);
        export.finalize(false, Some(error.to_string()));
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            final_time_ms: 0,
            final_record_count: 0,
            failure_reason: Some(error.to_string()),
            metrics: ScenarioMetrics::default(),
            export,
        }
    }

    fn scenario_config(&self, scenario: ScenarioId) -> SyncConfig {
        let mut config = self.config.clone();
        match scenario {
            ScenarioId::StaleEviction => {
                // A day of fixes every 5 s is noise; one a minute is plenty
                config.location.interval_ms = 60_000;
            }
            ScenarioId::PoisonPill => {
                config.location.interval_ms = 1_000;
            }
            ScenarioId::CapacityFlood => {
                config.reconciler.max_records = 50;
            }
            _ => {}
        }
        config
    }

    fn scenario_location(&self, scenario: ScenarioId, world: &SimWorld) -> Option<SimLocationSource> {
        match scenario {
            ScenarioId::PoisonPill => {
                let t = world.ctx.unix_millis();
                Some(SimLocationSource::scripted(
                    Arc::clone(&world.ctx),
                    vec![
                        PositionSample::new(HOME.0, HOME.1, 5.0, t),
                        PositionSample::new(f64::NAN, HOME.1, 5.0, t + 1),
                        PositionSample::new(HOME.0, HOME.1, 500.0, t + 2),
                        PositionSample::new(95.0, HOME.1, 5.0, t + 3),
                        PositionSample::new(HOME.0, HOME.1, 5.0, t - 60_000),
                        PositionSample::new(HOME.0 + 0.01, HOME.1 + 0.01, 8.0, t + 5),
                    ],
                ))
            }
            _ => None,
        }
    }

    /// DST-001: HappyPath - live stream, wandering device.
    ///
    /// **Assertion**: Index mirrors the collection through inserts, edits and
    /// deletes; clusters partition the visible records; the nearby query
    /// agrees with a brute-force scan.
    async fn run_happy_path(&self, world: &mut SimWorld) -> Result<(), SimError> {
        info!("DST-001: HappyPath - steady state sync");
        world.start()?;

        let local = 20 + world.ctx.gen_range(0, 20);
        for i in 0..local {
            world.write_near(&format!("mood-{i:03}"), HOME, 8_000.0);
            if i % 5 == 0 {
                world.sleep(Duration::from_millis(200)).await;
            }
        }
        for i in 0..5 {
            world.write_anywhere(&format!("far-{i}"));
        }

        let snapshot = world.wait_until("initial sync", Duration::from_secs(60), |s| {
            s.self_record().is_some() && s.len() as u64 == local + 6
        })
        .await?;
        check(mirrors(&snapshot, &world.collection.documents()), || {
            "index does not mirror the collection".into()
        })?;
        world.check_clusters(&snapshot)?;
        world.capture("synced")?;

        // Nearby agrees with a scan
        let me = snapshot
            .self_record()
            .ok_or_else(|| SimError::Invariant("self record missing".into()))?;
        let expected = snapshot
            .iter()
            .filter(|r| r.is_remote() && r.distance_to(me.latitude, me.longitude) <= 5_000.0)
            .count();
        let nearby = world.handle()?.nearby(5_000.0).await?;
        check(nearby.len() == expected, || {
            format!("nearby returned {}, scan found {expected}", nearby.len())
        })?;
        check(nearby.windows(2).all(|w| w[0].1 <= w[1].1), || {
            "nearby results not sorted by distance".into()
        })?;

        // Edits and deletes while connected
        world.sleep(Duration::from_secs(1)).await;
        for _ in 0..5 {
            let i = world.ctx.gen_range(0, local);
            world.write_near(&format!("mood-{i:03}"), HOME, 8_000.0);
        }
        let mut deleted = Vec::new();
        for _ in 0..3 {
            let i = world.ctx.gen_range(0, local);
            let id = format!("mood-{i:03}");
            if world.collection.delete(&id) {
                deleted.push(id);
            }
        }

        let snapshot = world.wait_mirrored(Duration::from_secs(30)).await?;
        for id in &deleted {
            let gone = RecordId::parse(id).map(|id| !snapshot.contains(&id)).unwrap_or(false);
            check(gone, || format!("deleted record {id} still indexed"))?;
        }
        world.check_clusters(&snapshot)?;
        world.capture("edited")?;

        info!("✓ HappyPath complete: {} records, {} deleted", snapshot.len(), deleted.len());
        Ok(())
    }

    /// DST-002: ReconnectStorm - disconnects, listener errors and outages.
    ///
    /// **Assertion**: Records never disappear because of a disconnect; after
    /// the storm there is exactly one listener and the index mirrors the
    /// collection with no duplicates.
    async fn run_reconnect_storm(&self, world: &mut SimWorld) -> Result<(), SimError> {
        info!("DST-002: ReconnectStorm - listener chaos");
        world.start()?;

        let mut next_id = 0u64;
        for _ in 0..30 {
            world.write_near(&format!("mood-{next_id:03}"), HOME, 20_000.0);
            next_id += 1;
        }
        world.wait_mirrored(Duration::from_secs(60)).await?;
        world.capture("synced")?;

        let rounds = 5 + world.ctx.gen_range(0, 5);
        for round in 0..rounds {
            let before = world.handle()?.status().disruptions;
            let remote_before = SimWorld::remote_records(&world.handle()?.snapshot()).len();

            match world.ctx.gen_range(0, 3) {
                0 => world.controller.disconnect_all(),
                1 => world.controller.fail_all("listener error"),
                _ => {
                    world.controller.set_available(false);
                    world.controller.disconnect_all();
                }
            }
            if world.ctx.chance(0.3) {
                world.location.interrupt();
            }

            // Edits while offline; replayed on resubscribe
            for _ in 0..world.ctx.gen_range(1, 5) {
                if world.ctx.chance(0.5) && next_id > 0 {
                    let i = world.ctx.gen_range(0, next_id);
                    world.write_near(&format!("mood-{i:03}"), HOME, 20_000.0);
                } else {
                    world.write_near(&format!("mood-{next_id:03}"), HOME, 20_000.0);
                    next_id += 1;
                }
            }

            world.sleep(Duration::from_millis(world.ctx.gen_range(100, 5_000))).await;

            let status = world.handle()?.status();
            let remote_now = SimWorld::remote_records(&world.handle()?.snapshot()).len();
            check(remote_now >= remote_before, || {
                format!("round {round}: {remote_before} remote records shrank to {remote_now}")
            })?;
            debug!(round, remote = ?status.remote, disruptions = status.disruptions, "mid-outage");
            world.capture("outage")?;

            world.controller.set_available(true);
            world
                .wait_status("link to recover", Duration::from_secs(120), |s| {
                    s.disruptions > before && s.remote == LinkState::Live
                })
                .await?;
        }

        let snapshot = world.wait_mirrored(Duration::from_secs(120)).await?;
        world.settle().await;
        let status = world.handle()?.status();
        check(world.controller.active_subscriptions() == 1, || {
            format!("{} listeners registered", world.controller.active_subscriptions())
        })?;
        check(status.disruptions >= rounds, || {
            format!("{} disruptions seen for {rounds} faults", status.disruptions)
        })?;
        check(snapshot.len() == world.collection.len() + 1, || {
            format!("{} records for {} documents", snapshot.len(), world.collection.len())
        })?;
        world.check_clusters(&snapshot)?;
        world.capture("recovered")?;

        info!(
            "✓ ReconnectStorm complete: {} rounds, {} disruptions, {} listeners opened",
            rounds,
            status.disruptions,
            world.collection.subscriptions_opened()
        );
        Ok(())
    }

    /// DST-003: StaleEviction - a day of silence from some writers.
    ///
    /// **Assertion**: Silent records age out after the TTL, refreshed ones
    /// stay, the self record survives though its fix is a day old, and a
    /// two-hour outage removes nothing.
    async fn run_stale_eviction(&self, world: &mut SimWorld) -> Result<(), SimError> {
        info!("DST-003: StaleEviction - 25 hours of virtual time");
        world.start()?;

        for i in 0..10 {
            world.write_near(&format!("silent-{i}"), HOME, 5_000.0);
            world.write_near(&format!("active-{i}"), HOME, 5_000.0);
        }
        world
            .wait_until("initial sync", Duration::from_secs(120), |s| {
                s.self_record().is_some() && s.len() == 21
            })
            .await?;
        world.capture("synced")?;

        // Location goes dark; the self fix will be a day old
        world.location.set_available(false);
        world.location.interrupt();

        for hour in 1..=25u32 {
            world.sleep(HOUR).await;
            for i in 0..10 {
                world.write_near(&format!("active-{i}"), HOME, 5_000.0);
            }

            if hour == 10 {
                world.controller.set_available(false);
                world.controller.disconnect_all();
            }
            if hour == 12 {
                let snapshot = world.handle()?.snapshot();
                check(snapshot.len() == 21, || {
                    format!("{} records after a 2 h outage, expected 21", snapshot.len())
                })?;
                world.capture("outage")?;
                world.controller.set_available(true);
            }
        }

        let ttl_ms = world.config.reconciler.stale_ttl_ms;
        let snapshot = world
            .wait_until("silent writers to age out", Duration::from_secs(600), |s| {
                !s.iter().any(|r| r.record_id.as_str().starts_with("silent-"))
            })
            .await?;

        let active = snapshot
            .iter()
            .filter(|r| r.record_id.as_str().starts_with("active-"))
            .count();
        check(active == 10, || format!("{active} active records survived, expected 10"))?;

        let me = snapshot
            .self_record()
            .ok_or_else(|| SimError::Invariant("self record evicted".into()))?;
        let self_age = world.ctx.unix_millis() - me.last_updated_at;
        check(self_age > ttl_ms, || format!("self fix is only {self_age} ms old"))?;

        let stats = world.stats().await?;
        check(stats.evicted_stale >= 10, || {
            format!("{} stale evictions, expected at least 10", stats.evicted_stale)
        })?;
        world.capture("aged")?;

        info!("✓ StaleEviction complete: {} stale evictions", stats.evicted_stale);
        Ok(())
    }

    /// DST-004: PoisonPill - malformed input among valid input.
    ///
    /// **Assertion**: Exactly the valid documents are indexed, a malformed
    /// update leaves the stored version alone, and the self record ends at
    /// the last good fix.
    async fn run_poison_pill(&self, world: &mut SimWorld) -> Result<(), SimError> {
        info!("DST-004: PoisonPill - malformed payloads");
        world.start()?;

        for i in 0..10 {
            world.write_near(&format!("mood-{i:03}"), HOME, 3_000.0);
        }
        world.wait_mirrored(Duration::from_secs(60)).await?;
        let original = world
            .handle()?
            .snapshot()
            .records()
            .iter()
            .find(|r| r.record_id.as_str() == "mood-003")
            .cloned()
            .ok_or_else(|| SimError::Invariant("mood-003 missing".into()))?;

        let t = world.ctx.unix_millis();
        let valid = SimWorld::mood_doc(HOME.0, HOME.1, t, "Fear");
        let poison = vec![
            DocumentChange::added("", valid.clone()),
            DocumentChange::added("@self", valid.clone()),
            DocumentChange::added("p-nolat", json!({ "longitude": 1.0, "time": t })),
            DocumentChange::added("p-nan", json!({ "latitude": "NaN", "longitude": 1.0, "time": t })),
            DocumentChange::added("p-range", json!({ "latitude": 91.0, "longitude": 1.0, "time": t })),
            DocumentChange::added("p-array", json!([1, 2, 3])),
            DocumentChange::added("p-unplaced", json!({ "hasLocation": false, "time": t })),
            DocumentChange::modified(
                "mood-003",
                json!({ "latitude": "abc", "longitude": 1.0, "time": t + 10_000 }),
            ),
        ];
        let poison_count = poison.len() as u64;
        for change in poison {
            world.collection.inject(change);
        }
        // Duplicate delivery is harmless
        for _ in 0..3 {
            world.collection.redeliver("mood-001");
        }

        let target = (HOME.0 + 0.01, HOME.1 + 0.01);
        let snapshot = world
            .wait_until("last good fix", Duration::from_secs(60), |s| {
                s.self_record()
                    .map(|me| me.latitude == target.0 && me.longitude == target.1)
                    .unwrap_or(false)
            })
            .await?;
        world.settle().await;
        let snapshot = {
            let latest = world.handle()?.snapshot();
            if latest.generation() >= snapshot.generation() { latest } else { snapshot }
        };

        check(mirrors(&snapshot, &world.collection.documents()), || {
            "poison leaked into the index".into()
        })?;
        let stored = snapshot
            .records()
            .iter()
            .find(|r| r.record_id.as_str() == "mood-003")
            .ok_or_else(|| SimError::Invariant("mood-003 lost to a malformed update".into()))?;
        check(*stored == original, || "malformed update altered mood-003".into())?;

        let stats = world.stats().await?;
        // Four bad fixes plus every poisoned document
        check(stats.rejected >= poison_count + 4, || {
            format!("{} rejections, expected at least {}", stats.rejected, poison_count + 4)
        })?;
        world.check_clusters(&snapshot)?;
        world.capture("cleaned")?;

        info!("✓ PoisonPill complete: {} rejected", stats.rejected);
        Ok(())
    }

    /// DST-005: CapacityFlood - unbounded collection, bounded index.
    ///
    /// **Assertion**: The index keeps exactly the newest `max_records`
    /// remote records and an older latecomer is rejected on arrival.
    async fn run_capacity_flood(&self, world: &mut SimWorld) -> Result<(), SimError> {
        let cap = world.config.reconciler.max_records;
        info!("DST-005: CapacityFlood - cap {}", cap);
        world.start()?;

        let base = world.ctx.unix_millis();
        let total = cap * 4;
        for i in 0..total {
            let (lat, lon) = world.random_point_near(HOME, 10_000.0);
            let doc = SimWorld::mood_doc(lat, lon, base + i as i64, world.random_mood());
            world.write(&format!("flood-{i:03}"), doc);
            if i % 25 == 0 {
                world.sleep(Duration::from_millis(50)).await;
            }
        }

        let newest = format!("flood-{:03}", total - 1);
        let snapshot = world
            .wait_until("flood to drain", Duration::from_secs(60), |s| {
                RecordId::parse(&newest).map(|id| s.contains(&id)).unwrap_or(false)
            })
            .await?;
        world.settle().await;
        let snapshot = {
            let latest = world.handle()?.snapshot();
            if latest.generation() >= snapshot.generation() { latest } else { snapshot }
        };

        let remote = SimWorld::remote_records(&snapshot);
        check(remote.len() == cap, || format!("{} remote records, cap {cap}", remote.len()))?;
        let oldest_kept = total - cap;
        for record in &remote {
            let ok = record
                .record_id
                .as_str()
                .strip_prefix("flood-")
                .and_then(|n| n.parse::<usize>().ok())
                .map(|n| n >= oldest_kept)
                .unwrap_or(false);
            check(ok, || format!("{} should have been evicted", record.record_id))?;
        }

        // Older than everything kept: evicted on arrival
        let (lat, lon) = world.random_point_near(HOME, 10_000.0);
        world.write("late-old", SimWorld::mood_doc(lat, lon, base - 1, "Shame"));
        world.settle().await;

        let snapshot = world.handle()?.snapshot();
        check(snapshot.self_record().is_some(), || "self record capacity-evicted".into())?;
        let late = RecordId::parse("late-old").map(|id| snapshot.contains(&id)).unwrap_or(true);
        check(!late, || "late-old record displaced a newer one".into())?;

        let stats = world.stats().await?;
        let expected = (total - cap + 1) as u64;
        check(stats.evicted_capacity == expected, || {
            format!("{} capacity evictions, expected {expected}", stats.evicted_capacity)
        })?;
        world.check_clusters(&snapshot)?;
        world.capture("capped")?;

        info!("✓ CapacityFlood complete: {} evicted", stats.evicted_capacity);
        Ok(())
    }

    /// DST-006: BurstDebounce - a 3 s write burst against a 60 fps render loop.
    ///
    /// **Assertion**: The presenter renders at most about once per
    /// `max_wait` during the burst, never goes longer than `max_wait`
    /// between frames, and catches up once the burst ends.
    async fn run_burst_debounce(&self, world: &mut SimWorld) -> Result<(), SimError> {
        info!("DST-006: BurstDebounce - render throttling");
        world.start()?;
        world
            .wait_until("first fix", Duration::from_secs(60), |s| s.self_record().is_some())
            .await?;

        let mut presenter: ClusterPresenter = world.handle()?.presenter();
        let viewport = Viewport::world(4);
        let debounce_ms = presenter.config().debounce_ms;
        let max_wait_ms = presenter.config().max_wait_ms;

        const FRAME: Duration = Duration::from_millis(16);
        const BURST_MS: u64 = 3_000;
        const RUN_MS: u64 = 4_500;
        const WRITE_EVERY_MS: u64 = 50;

        let start = world.ctx.now();
        let mut next_write = 0u64;
        let mut written = 0u64;
        let mut renders: Vec<u64> = Vec::new();

        loop {
            let t = world.ctx.now().saturating_sub(start).as_millis() as u64;
            if t > RUN_MS {
                break;
            }
            while t < BURST_MS && next_write <= t {
                world.write_near(&format!("burst-{written:04}"), HOME, 2_000.0);
                written += 1;
                next_write += WRITE_EVERY_MS;
            }

            let snapshot = world.handle()?.snapshot();
            if presenter.poll(world.ctx.now(), &viewport, &snapshot).is_some() {
                renders.push(t);
                world.metrics.renders += 1;
                world.capture_clusters("render", &presenter)?;
            }
            world.sleep(FRAME).await;
        }

        let during: Vec<u64> = renders.iter().copied().filter(|t| *t > 0 && *t <= BURST_MS).collect();
        let limit = BURST_MS / max_wait_ms + 2;
        check(during.len() as u64 <= limit, || {
            format!("{} renders during the burst, limit {limit}", during.len())
        })?;
        check(!during.is_empty(), || "no render during the burst".into())?;

        let slack = 2 * FRAME.as_millis() as u64 + WRITE_EVERY_MS + 20;
        let within_burst: Vec<u64> = renders.iter().copied().filter(|t| *t <= BURST_MS).collect();
        let longest_gap = within_burst.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0);
        check(longest_gap <= max_wait_ms + slack, || {
            format!("{longest_gap} ms between renders during the burst")
        })?;

        let caught_up = renders.iter().any(|t| *t >= BURST_MS && *t <= BURST_MS + debounce_ms + slack + 100);
        check(caught_up, || "no render after the burst settled".into())?;

        let snapshot = world.handle()?.snapshot();
        let drawn: usize = presenter.last_clusters().iter().map(|c| c.len()).sum();
        check(drawn == snapshot.len(), || {
            format!("last frame shows {drawn} records, index has {}", snapshot.len())
        })?;

        info!(
            "✓ BurstDebounce complete: {} writes, {} renders ({} during burst)",
            written,
            renders.len(),
            during.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_configs() {
        let runner = ScenarioRunner::new(1);
        assert_eq!(runner.scenario_config(ScenarioId::CapacityFlood).reconciler.max_records, 50);
        assert_eq!(runner.scenario_config(ScenarioId::StaleEviction).location.interval_ms, 60_000);
        assert_eq!(runner.scenario_config(ScenarioId::HappyPath), SyncConfig::default());
    }

    #[test]
    fn test_invalid_config_fails_cleanly() {
        let config = SyncConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        let result = ScenarioRunner::new(7).with_config(config).run(ScenarioId::HappyPath);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("channel_capacity"));
    }

    #[test]
    fn test_happy_path_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::HappyPath);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.documents_written >= 25);
        assert!(result.metrics.location_fixes > 0);
        assert_eq!(result.metrics.disruptions, 0);
    }

    #[test]
    fn test_reconnect_storm_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ReconnectStorm);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.subscriptions_opened >= 2);
        assert!(result.metrics.disruptions >= 5);
    }

    #[test]
    fn test_stale_eviction_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::StaleEviction);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.final_time_ms >= 25 * 3_600_000);
        assert_eq!(result.metrics.evicted_stale, 10);
        // 20 writers' worth of records minus the silent half, plus self
        assert_eq!(result.final_record_count, 11);
    }

    #[test]
    fn test_poison_pill_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::PoisonPill);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.rejected >= 12);
        assert_eq!(result.final_record_count, 11);
    }

    #[test]
    fn test_capacity_flood_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::CapacityFlood);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.evicted_capacity, 151);
        assert_eq!(result.final_record_count, 51);
    }

    #[test]
    fn test_burst_debounce_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::BurstDebounce);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.renders >= 3);
        assert_eq!(result.export.frames.len() as u64, result.metrics.renders);
    }

    #[test]
    fn test_reconnect_storm_deterministic() {
        // Same seed, same run, frame for frame
        let first = ScenarioRunner::new(7).run(ScenarioId::ReconnectStorm);
        let second = ScenarioRunner::new(7).run(ScenarioId::ReconnectStorm);

        assert_eq!(first.passed, second.passed);
        assert_eq!(first.final_time_ms, second.final_time_ms);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.export, second.export);
    }

    #[test]
    fn test_all_scenarios_multiple_seeds() {
        for seed in [1u64, 2, 3] {
            let runner = ScenarioRunner::new(seed);
            for scenario in ScenarioId::all() {
                let result = runner.run(scenario);
                assert!(result.passed, "{} seed={}: {:?}", scenario, seed, result.failure_reason);
            }
        }
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(8))]

        #[test]
        fn prop_poison_pill_passes_for_any_seed(seed in proptest::prelude::any::<u64>()) {
            let result = ScenarioRunner::new(seed).run(ScenarioId::PoisonPill);
            proptest::prop_assert!(result.passed, "{:?}", result.failure_reason);
        }
    }
}
