//! Simulated device location provider.

use async_trait::async_trait;
use moodmap_env::{
    EnvError, LocationPriority, LocationProfile, LocationProvider, LocationUpdates, MoodMapContext,
    PositionSample,
};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::context::{lock, SimContext};

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Where samples come from.
enum Plan {
    /// Fixed samples, delivered in order, then silence
    Scripted(VecDeque<PositionSample>),
    /// Random walk from the current position
    RandomWalk {
        latitude: f64,
        longitude: f64,
        /// Largest step per fix, meters
        max_step_m: f64,
    },
}

struct LocationState {
    plan: Plan,
    available: bool,
    delivered: u64,
}

/// Scripted or random-walk position source.
///
/// Every fix waits one profile interval on the simulation clock.
/// `interrupt` ends the current update stream; `set_available(false)` makes
/// new requests fail, like a revoked location permission.
#[derive(Clone)]
pub struct SimLocationSource {
    ctx: Arc<SimContext>,
    state: Arc<Mutex<LocationState>>,
    /// Bumped to end every open update stream
    epoch: Arc<watch::Sender<u64>>,
}

impl SimLocationSource {
    fn with_plan(ctx: Arc<SimContext>, plan: Plan) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            ctx,
            state: Arc::new(Mutex::new(LocationState {
                plan,
                available: true,
                delivered: 0,
            })),
            epoch: Arc::new(epoch),
        }
    }

    pub fn scripted(ctx: Arc<SimContext>, samples: Vec<PositionSample>) -> Self {
        Self::with_plan(ctx, Plan::Scripted(samples.into()))
    }

    pub fn random_walk(ctx: Arc<SimContext>, latitude: f64, longitude: f64, max_step_m: f64) -> Self {
        Self::with_plan(
            ctx,
            Plan::RandomWalk {
                latitude,
                longitude,
                max_step_m,
            },
        )
    }

    /// Appends samples to a scripted source.
    pub fn push(&self, sample: PositionSample) {
        if let Plan::Scripted(queue) = &mut lock(&self.state).plan {
            queue.push_back(sample);
        }
    }

    /// Ends every open update stream.
    pub fn interrupt(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }

    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Samples handed out so far.
    pub fn delivered(&self) -> u64 {
        lock(&self.state).delivered
    }

    /// Next sample of the plan, or `None` once a script is exhausted.
    fn next_sample(&self, priority: LocationPriority) -> Option<PositionSample> {
        let mut state = lock(&self.state);
        let sample = match &mut state.plan {
            Plan::Scripted(queue) => queue.pop_front()?,
            Plan::RandomWalk {
                latitude,
                longitude,
                max_step_m,
            } => {
                let (bearing, distance, accuracy) = self.ctx.with_rng(|rng| {
                    (
                        rng.gen_range(0.0..std::f64::consts::TAU),
                        rng.gen_range(0.0..=*max_step_m),
                        rng.gen_range(accuracy_range(priority)),
                    )
                });
                let dlat = distance * bearing.cos() / METERS_PER_DEGREE;
                let dlon = distance * bearing.sin()
                    / (METERS_PER_DEGREE * latitude.to_radians().cos().max(0.01));
                *latitude = (*latitude + dlat).clamp(-89.0, 89.0);
                *longitude = wrap_longitude(*longitude + dlon);
                PositionSample::new(*latitude, *longitude, accuracy, self.ctx.unix_millis())
            }
        };
        state.delivered += 1;
        Some(sample)
    }
}

/// Walk fix accuracy in meters for a requested priority.
fn accuracy_range(priority: LocationPriority) -> std::ops::Range<f64> {
    match priority {
        LocationPriority::HighAccuracy => 3.0..30.0,
        LocationPriority::Balanced => 20.0..100.0,
        LocationPriority::LowPower => 100.0..1_000.0,
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[async_trait]
impl LocationProvider for SimLocationSource {
    async fn request_updates(
        &self,
        profile: &LocationProfile,
    ) -> Result<Box<dyn LocationUpdates>, EnvError> {
        if !lock(&self.state).available {
            return Err(EnvError::location("location permission revoked"));
        }
        Ok(Box::new(SimLocationUpdates {
            source: self.clone(),
            interval: Duration::from_millis(profile.interval_ms.max(1)),
            priority: profile.priority,
            epoch: self.epoch.subscribe(),
        }))
    }
}

/// One open update stream.
pub struct SimLocationUpdates {
    source: SimLocationSource,
    interval: Duration,
    priority: LocationPriority,
    epoch: watch::Receiver<u64>,
}

#[async_trait]
impl LocationUpdates for SimLocationUpdates {
    async fn next(&mut self) -> Option<Result<PositionSample, EnvError>> {
        tokio::select! {
            biased;
            _ = self.epoch.changed() => return None,
            _ = self.source.ctx.sleep(self.interval) => {}
        }
        match self.source.next_sample(self.priority) {
            Some(sample) => Some(Ok(sample)),
            None => {
                // Script exhausted: stay silent until interrupted
                let _ = self.epoch.changed().await;
                None
            }
        }
    }
}
