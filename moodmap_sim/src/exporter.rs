//! JSON exporter for cluster frames.
//!
//! Exports what the map would have drawn at each checkpoint, so a run can be
//! replayed or diffed against another seed.

use moodmap_core::{Cluster, LinkState, MarkerStyle, SyncStatus};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimFrame {
    /// Virtual time in milliseconds
    pub time_ms: u64,

    /// Why the frame was captured
    pub label: String,

    /// Index generation the clusters were computed from
    pub generation: u64,

    pub record_count: usize,

    pub remote_link: String,
    pub location_link: String,

    pub clusters: Vec<ClusterFrame>,
}

/// One cluster as drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFrame {
    pub cluster_id: String,
    pub lat: f64,
    pub lon: f64,
    pub count: usize,
    pub bounding_radius_m: f64,
    pub marker: String,
}

impl From<&Cluster> for ClusterFrame {
    fn from(cluster: &Cluster) -> Self {
        let marker = match cluster.style {
            MarkerStyle::SelfMarker => "self".to_string(),
            MarkerStyle::Single { tint } => format!("single:{tint:?}"),
            MarkerStyle::Group { tint: Some(tint), .. } => format!("group:{tint:?}"),
            MarkerStyle::Group { tint: None, .. } => "group".to_string(),
        };
        Self {
            cluster_id: cluster.cluster_id.clone(),
            lat: cluster.centroid_lat,
            lon: cluster.centroid_lon,
            count: cluster.len(),
            bounding_radius_m: cluster.bounding_radius_m,
            marker,
        }
    }
}

fn link_name(state: LinkState) -> String {
    match state {
        LinkState::Connecting => "connecting",
        LinkState::Live => "live",
        LinkState::Stale => "stale",
    }
    .to_string()
}

impl SimFrame {
    pub fn new(
        time_ms: u64,
        label: impl Into<String>,
        generation: u64,
        record_count: usize,
        status: &SyncStatus,
        clusters: &[Cluster],
    ) -> Self {
        Self {
            time_ms,
            label: label.into(),
            generation,
            record_count,
            remote_link: link_name(status.remote),
            location_link: link_name(status.location),
            clusters: clusters.iter().map(ClusterFrame::from).collect(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Virtual duration in milliseconds
    pub duration_ms: u64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_ms: 0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_ms = frame.time_ms;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
