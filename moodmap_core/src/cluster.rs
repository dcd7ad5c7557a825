//! The "CLUSTER" presenter - grid-based greedy marker clustering.
//!
//! Turns the reconciler's flat index into a handful of visual clusters for
//! the current viewport and zoom:
//! 1. Grid: cell size = `base_cell_degrees / 2^zoom`, anchored at (-90, -180)
//! 2. Assign: `floor` of the offset from the anchor, so identical input
//!    always lands in identical cells
//! 3. Merge: one cluster per occupied cell, centroid = arithmetic mean
//! 4. Render: single-member clusters are plain markers
//!
//! The grid is anchored globally rather than at the viewport corner so that
//! panning does not reshuffle cluster membership between frames.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::filter::RecordFilter;
use crate::reconciler::IndexSnapshot;
use crate::record::{PositionedRecord, RecordId, SourceOrigin};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the ClusterPresenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    /// Cell edge in degrees at zoom 0 (default: 60.0)
    pub base_cell_degrees: f64,

    /// Quiet period after an index change before recomputing (default: 250 ms)
    pub debounce_ms: u64,

    /// Upper bound on render latency during continuous bursts (default: 1 s)
    pub max_wait_ms: u64,

    /// Zoom levels above this are clamped (default: 21, at most 30)
    pub max_zoom: u8,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            base_cell_degrees: 60.0,
            debounce_ms: 250,
            max_wait_ms: 1_000,
            max_zoom: 21,
        }
    }
}

impl PresenterConfig {
    /// Grid cell edge in degrees at the given zoom.
    pub fn cell_degrees(&self, zoom: u8) -> f64 {
        let zoom = zoom.min(self.max_zoom);
        self.base_cell_degrees / 2f64.powi(i32::from(zoom))
    }
}

// ============================================================================
// VIEWPORT
// ============================================================================

/// Visible map region. `west > east` means the view crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(south: f64, west: f64, north: f64, east: f64, zoom: u8) -> Self {
        Self {
            south,
            west,
            north,
            east,
            zoom,
        }
    }

    /// The whole globe at the given zoom.
    pub fn world(zoom: u8) -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0, zoom)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if lat < self.south || lat > self.north {
            return false;
        }
        if self.west <= self.east {
            lon >= self.west && lon <= self.east
        } else {
            lon >= self.west || lon <= self.east
        }
    }
}

// ============================================================================
// CLUSTER
// ============================================================================

/// Marker tint derived from the mood text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodTint {
    Red,
    Orange,
    Green,
    Blue,
    BabyBlue,
    Gray,
    Yellow,
    Pink,
    Default,
}

impl MoodTint {
    /// Later keywords win when a mood mentions several.
    pub fn for_mood(mood: Option<&str>) -> Self {
        const TABLE: &[(&str, MoodTint)] = &[
            ("anger", MoodTint::Red),
            ("confusion", MoodTint::Orange),
            ("disgust", MoodTint::Green),
            ("fear", MoodTint::Blue),
            ("happiness", MoodTint::BabyBlue),
            ("sadness", MoodTint::Gray),
            ("shame", MoodTint::Yellow),
            ("surprise", MoodTint::Pink),
        ];

        let Some(mood) = mood else {
            return MoodTint::Default;
        };
        let lower = mood.to_lowercase();
        TABLE
            .iter()
            .filter(|(keyword, _)| lower.contains(keyword))
            .last()
            .map(|(_, tint)| *tint)
            .unwrap_or(MoodTint::Default)
    }
}

/// How the map surface should draw a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerStyle {
    /// The device's own position
    SelfMarker,
    /// One record, drawn as an individual marker
    Single { tint: MoodTint },
    /// Several records, drawn as a cluster glyph; tinted when all agree
    Group { count: usize, tint: Option<MoodTint> },
}

/// A group of records sharing one grid cell.
///
/// Lives for one presentation cycle; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// `"{zoom}/{row}/{col}"` of the grid cell
    pub cluster_id: String,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    /// Sorted, never empty
    pub member_ids: Vec<RecordId>,
    /// Farthest member from the centroid, meters
    pub bounding_radius_m: f64,
    pub style: MarkerStyle,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    /// Never true; clusters always have members.
    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.member_ids.len() == 1
    }
}

// ============================================================================
// CLUSTERING
// ============================================================================

/// Grid cell address: (row from the south pole, column from the antimeridian).
type CellKey = (i64, i64);

fn cell_key(lat: f64, lon: f64, cell: f64) -> CellKey {
    (
        ((lat + 90.0) / cell).floor() as i64,
        ((lon + 180.0) / cell).floor() as i64,
    )
}

/// Clusters the records of `snapshot` that are visible in `viewport` and pass
/// `filter`.
///
/// Pure: identical input yields bit-identical output. Clusters are ordered by
/// (row, column), members by id.
pub fn compute_clusters(
    snapshot: &IndexSnapshot,
    viewport: &Viewport,
    config: &PresenterConfig,
    filter: &RecordFilter,
) -> Vec<Cluster> {
    let cell = config.cell_degrees(viewport.zoom);
    let zoom = viewport.zoom.min(config.max_zoom);

    // Snapshot records are sorted by id, so each bucket is too
    let mut buckets: BTreeMap<CellKey, Vec<&PositionedRecord>> = BTreeMap::new();
    for record in snapshot.iter() {
        if !viewport.contains(record.latitude, record.longitude) || !filter.matches(record) {
            continue;
        }
        buckets
            .entry(cell_key(record.latitude, record.longitude, cell))
            .or_default()
            .push(record);
    }

    buckets
        .into_iter()
        .map(|((row, col), members)| build_cluster(zoom, row, col, &members))
        .collect()
}

fn build_cluster(zoom: u8, row: i64, col: i64, members: &[&PositionedRecord]) -> Cluster {
    let n = members.len() as f64;
    let centroid_lat = members.iter().map(|r| r.latitude).sum::<f64>() / n;
    let centroid_lon = members.iter().map(|r| r.longitude).sum::<f64>() / n;

    let center = Point::new(centroid_lon, centroid_lat);
    let bounding_radius_m = members
        .iter()
        .map(|r| center.haversine_distance(&r.point()))
        .fold(0.0, f64::max);

    let style = match members {
        [only] if only.origin == SourceOrigin::SelfDevice => MarkerStyle::SelfMarker,
        [only] => MarkerStyle::Single {
            tint: MoodTint::for_mood(only.attributes.mood.as_deref()),
        },
        _ => {
            let mut tints = members
                .iter()
                .filter(|r| r.origin == SourceOrigin::Remote)
                .map(|r| MoodTint::for_mood(r.attributes.mood.as_deref()));
            let first = tints.next();
            let shared = match first {
                Some(t) if tints.all(|other| other == t) => Some(t),
                _ => None,
            };
            MarkerStyle::Group {
                count: members.len(),
                tint: shared,
            }
        }
    };

    Cluster {
        cluster_id: format!("{zoom}/{row}/{col}"),
        centroid_lat,
        centroid_lon,
        member_ids: members.iter().map(|r| r.record_id.clone()).collect(),
        bounding_radius_m,
        style,
    }
}

// ============================================================================
// PRESENTER (stateful render loop)
// ============================================================================

/// Decides when to recompute clusters and remembers the last frame.
///
/// Viewport and filter changes recompute immediately. Index changes wait
/// for `debounce_ms` of quiet, or at most `max_wait_ms` since the first
/// unrendered change.
pub struct ClusterPresenter {
    config: PresenterConfig,
    filter: RecordFilter,
    filter_dirty: bool,

    /// Viewport and generation of the last rendered frame
    rendered: Option<(Viewport, u64)>,
    clusters: Vec<Cluster>,

    /// Most recent generation seen and when it was first seen
    seen_generation: Option<u64>,
    last_change_at: Duration,
    /// When the oldest unrendered change was first seen
    pending_since: Option<Duration>,
}

impl ClusterPresenter {
    pub fn new(config: PresenterConfig) -> Self {
        Self {
            config,
            filter: RecordFilter::default(),
            filter_dirty: false,
            rendered: None,
            clusters: Vec::new(),
            seen_generation: None,
            last_change_at: Duration::ZERO,
            pending_since: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PresenterConfig::default())
    }

    pub fn config(&self) -> &PresenterConfig {
        &self.config
    }

    pub fn filter(&self) -> &RecordFilter {
        &self.filter
    }

    /// Replaces the filter; the next poll recomputes.
    pub fn set_filter(&mut self, filter: RecordFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.filter_dirty = true;
        }
    }

    /// Clusters for `viewport` from `snapshot`, without touching render state.
    pub fn compute_clusters(&self, snapshot: &IndexSnapshot, viewport: &Viewport) -> Vec<Cluster> {
        compute_clusters(snapshot, viewport, &self.config, &self.filter)
    }

    /// The last rendered frame (stale-but-present while producers are down).
    pub fn last_clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Called once per render cycle. Returns a new frame when one of the
    /// recompute triggers fired, `None` when the last frame is still current.
    pub fn poll(
        &mut self,
        now: Duration,
        viewport: &Viewport,
        snapshot: &IndexSnapshot,
    ) -> Option<Vec<Cluster>> {
        let generation = snapshot.generation();

        if self.seen_generation != Some(generation) {
            self.seen_generation = Some(generation);
            self.last_change_at = now;
            if self.pending_since.is_none() {
                self.pending_since = Some(now);
            }
        }

        let due = match self.rendered {
            None => true,
            Some((rendered_view, _)) if rendered_view != *viewport || self.filter_dirty => true,
            Some((_, rendered_gen)) if rendered_gen == generation => {
                self.pending_since = None;
                false
            }
            Some(_) => {
                let quiet = now.saturating_sub(self.last_change_at)
                    >= Duration::from_millis(self.config.debounce_ms);
                let overdue = self
                    .pending_since
                    .map(|since| {
                        now.saturating_sub(since) >= Duration::from_millis(self.config.max_wait_ms)
                    })
                    .unwrap_or(false);
                quiet || overdue
            }
        };

        if !due {
            return None;
        }

        self.clusters = self.compute_clusters(snapshot, viewport);
        self.rendered = Some((*viewport, generation));
        self.pending_since = None;
        self.filter_dirty = false;
        Some(self.clusters.clone())
    }
}

impl Default for ClusterPresenter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
