//! The "SPACE" index - H3 cell buckets for proximity queries.
//!
//! Records are bucketed by the H3 cell containing their position. A radius
//! query prunes with a k-ring around the center cell, then filters the
//! candidates by exact haversine distance in the caller.

use h3o::{CellIndex, LatLng, Resolution};
use std::collections::{BTreeSet, HashMap};

use crate::error::ValidationError;
use crate::record::RecordId;

/// Past this many rings a k-ring costs more than scanning every record.
const MAX_RING: u32 = 64;

/// H3 cell → record ids.
#[derive(Debug, Clone)]
pub struct ProximityIndex {
    cells: HashMap<CellIndex, BTreeSet<RecordId>>,
    /// Reverse map so moves and removals don't need the old position
    placement: HashMap<RecordId, CellIndex>,
    resolution: Resolution,
}

/// Candidate set returned by [`ProximityIndex::candidates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Only these ids can be within the radius
    Subset(BTreeSet<RecordId>),
    /// The radius is too large to prune; check everything
    All,
}

impl ProximityIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            cells: HashMap::new(),
            placement: HashMap::new(),
            resolution,
        }
    }

    /// Convert WGS84 coordinates to an H3 cell index.
    pub fn cell_for(&self, lat: f64, lon: f64) -> Result<CellIndex, ValidationError> {
        let latlng = LatLng::new(lat, lon)
            .map_err(|_| ValidationError::OutOfBounds { lat, lon })?;
        Ok(latlng.to_cell(self.resolution))
    }

    /// Places (or moves) a record.
    pub fn upsert(&mut self, id: &RecordId, lat: f64, lon: f64) -> Result<CellIndex, ValidationError> {
        let cell = self.cell_for(lat, lon)?;
        match self.placement.get(id).copied() {
            Some(old) if old == cell => return Ok(cell),
            Some(old) => self.remove_from_cell(old, id),
            None => {}
        }
        self.cells.entry(cell).or_default().insert(id.clone());
        self.placement.insert(id.clone(), cell);
        Ok(cell)
    }

    pub fn remove(&mut self, id: &RecordId) {
        if let Some(cell) = self.placement.remove(id) {
            self.remove_from_cell(cell, id);
        }
    }

    fn remove_from_cell(&mut self, cell: CellIndex, id: &RecordId) {
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(id);
            // Clean up empty cells
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.placement.clear();
    }

    /// Ids that may lie within `radius_m` of the given point.
    pub fn candidates(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Candidates, ValidationError> {
        let center = self.cell_for(lat, lon)?;

        // Each ring adds roughly 1.5 edge lengths of reach; stay conservative
        let edge = self.resolution.edge_length_m();
        let k = (radius_m / edge).ceil().max(0.0) as u32 + 1;
        if k > MAX_RING {
            return Ok(Candidates::All);
        }

        let mut result = BTreeSet::new();
        for cell in center.grid_disk_safe(k) {
            if let Some(ids) = self.cells.get(&cell) {
                result.extend(ids.iter().cloned());
            }
        }
        Ok(Candidates::Subset(result))
    }

    pub fn stats(&self) -> SpatialIndexStats {
        let total_entries = self.placement.len();
        let total_cells = self.cells.len();
        SpatialIndexStats {
            total_cells,
            total_entries,
            avg_per_cell: if total_cells > 0 {
                total_entries as f64 / total_cells as f64
            } else {
                0.0
            },
        }
    }
}

/// Statistics about the spatial index.
#[derive(Debug, Clone)]
pub struct SpatialIndexStats {
    pub total_cells: usize,
    pub total_entries: usize,
    pub avg_per_cell: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RecordId {
        RecordId::parse(s).unwrap()
    }

    #[test]
    fn test_upsert_and_move() {
        let mut index = ProximityIndex::new(Resolution::Seven);
        let a = id("a");

        let c1 = index.upsert(&a, 37.7749, -122.4194).unwrap();
        assert_eq!(index.stats().total_entries, 1);

        // Same cell: no-op
        assert_eq!(index.upsert(&a, 37.7749, -122.4194).unwrap(), c1);
        assert_eq!(index.stats().total_cells, 1);

        // Move far away: old cell cleaned up
        let c2 = index.upsert(&a, 40.7128, -74.0060).unwrap();
        assert_ne!(c1, c2);
        assert_eq!(index.stats().total_cells, 1);
        assert_eq!(index.stats().total_entries, 1);
    }

    #[test]
    fn test_candidates_prune_far_records() {
        let mut index = ProximityIndex::new(Resolution::Seven);
        index.upsert(&id("near"), 37.7750, -122.4195).unwrap();
        index.upsert(&id("far"), 40.7128, -74.0060).unwrap();

        match index.candidates(37.7749, -122.4194, 5_000.0).unwrap() {
            Candidates::Subset(ids) => {
                assert!(ids.contains(&id("near")));
                assert!(!ids.contains(&id("far")));
            }
            Candidates::All => panic!("5km should be prunable"),
        }
    }

    #[test]
    fn test_huge_radius_falls_back_to_scan() {
        let index = ProximityIndex::new(Resolution::Seven);
        assert_eq!(
            index.candidates(0.0, 0.0, 10_000_000.0).unwrap(),
            Candidates::All
        );
    }

    #[test]
    fn test_remove_cleans_cells() {
        let mut index = ProximityIndex::new(Resolution::Seven);
        let a = id("a");
        index.upsert(&a, 10.0, 10.0).unwrap();
        index.remove(&a);
        index.remove(&a);
        assert_eq!(index.stats().total_cells, 0);
        assert_eq!(index.stats().total_entries, 0);
    }
}
