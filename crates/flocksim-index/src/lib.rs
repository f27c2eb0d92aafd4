//! Spatial indexing for toroidal neighborhood queries.
//!
//! The index is ephemeral: callers rebuild it from the current agent
//! positions each tick and query it as a broad-phase filter. Membership in a
//! query result is always decided by exact wrapped distance, never by cell
//! adjacency alone.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Shortest signed difference `a - b` on a wrapped axis of the given extent.
#[inline]
#[must_use]
pub fn wrapped_delta(a: f32, b: f32, extent: f32) -> f32 {
    let mut delta = a - b;
    if delta > extent * 0.5 {
        delta -= extent;
    } else if delta < -extent * 0.5 {
        delta += extent;
    }
    delta
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from agent positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit every indexed agent within `radius` of `point` (inclusive),
    /// passing its index and squared wrapped distance.
    fn neighbors_within(
        &self,
        point: (f32, f32),
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );

    /// Exact nearest indexed agent to `point`, with its squared wrapped
    /// distance. `None` only when the index is empty.
    fn nearest(&self, point: (f32, f32)) -> Option<(usize, OrderedFloat<f32>)>;
}

/// Uniform grid over a toroidal world.
///
/// The grid dimensions are `floor(extent / cell_size)` per axis and cells are
/// keyed by the resulting *effective* cell sizes (`extent / cells`, never
/// smaller than the configured size), so every wrapped cell covers the same
/// physical span and stepping whole cells from a query cell never
/// under-reaches across the seam. Queries near a boundary examine the
/// opposite-edge cells. Buckets are retained across rebuilds to avoid
/// per-tick reallocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    cell_size: f32,
    cell_width: f32,
    cell_height: f32,
    width: f32,
    height: f32,
    cols: usize,
    rows: usize,
    #[serde(skip)]
    buckets: Vec<Vec<usize>>,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
}

impl UniformGridIndex {
    /// Create a grid covering a `width` by `height` torus with the given cell size.
    pub fn new(cell_size: f32, width: f32, height: f32) -> Result<Self, IndexError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "cell_size must be positive and finite",
            ));
        }
        if !width.is_finite() || width <= 0.0 || !height.is_finite() || height <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "world extents must be positive and finite",
            ));
        }
        let cols = ((width / cell_size).floor() as usize).max(1);
        let rows = ((height / cell_size).floor() as usize).max(1);
        Ok(Self {
            cell_size,
            cell_width: width / cols as f32,
            cell_height: height / rows as f32,
            width,
            height,
            cols,
            rows,
            buckets: vec![Vec::new(); cols * rows],
            positions: Vec::new(),
        })
    }

    /// Edge length of each grid cell.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of positions captured by the last rebuild.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when no positions are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    fn cell_coord(value: f32, cell_size: f32, cells: usize) -> isize {
        let cell = (value / cell_size).floor() as isize;
        cell.rem_euclid(cells as isize)
    }

    #[inline]
    fn dist_sq(&self, a: (f32, f32), b: (f32, f32)) -> f32 {
        let dx = wrapped_delta(a.0, b.0, self.width);
        let dy = wrapped_delta(a.1, b.1, self.height);
        dx * dx + dy * dy
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if self.cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        let wanted = self.cols * self.rows;
        if self.buckets.len() != wanted {
            self.buckets.resize_with(wanted, Vec::new);
        }
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for (idx, &(x, y)) in positions.iter().enumerate() {
            let col = Self::cell_coord(x, self.cell_width, self.cols) as usize;
            let row = Self::cell_coord(y, self.cell_height, self.rows) as usize;
            self.buckets[row * self.cols + col].push(idx);
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        point: (f32, f32),
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if radius <= 0.0 || self.positions.is_empty() {
            return;
        }
        let radius_sq = radius * radius;
        let reach_cols = (radius / self.cell_width).ceil() as isize;
        let reach_rows = (radius / self.cell_height).ceil() as isize;
        let col0 = Self::cell_coord(point.0, self.cell_width, self.cols);
        let row0 = Self::cell_coord(point.1, self.cell_height, self.rows);
        // A span wider than the grid would visit the same wrapped cell twice.
        let col_span = (2 * reach_cols + 1).min(self.cols as isize);
        let row_span = (2 * reach_rows + 1).min(self.rows as isize);
        for dy in 0..row_span {
            let row = (row0 - reach_rows + dy).rem_euclid(self.rows as isize) as usize;
            for dx in 0..col_span {
                let col = (col0 - reach_cols + dx).rem_euclid(self.cols as isize) as usize;
                for &idx in &self.buckets[row * self.cols + col] {
                    let dist_sq = self.dist_sq(point, self.positions[idx]);
                    if dist_sq <= radius_sq {
                        visitor(idx, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }

    fn nearest(&self, point: (f32, f32)) -> Option<(usize, OrderedFloat<f32>)> {
        if self.positions.is_empty() {
            return None;
        }
        // Maximum possible wrapped distance on the torus.
        let max_radius = 0.5 * self.width.hypot(self.height);
        let mut radius = self.cell_width.max(self.cell_height);
        loop {
            let mut best: Option<(usize, OrderedFloat<f32>)> = None;
            self.neighbors_within(point, radius, &mut |idx, dist_sq| {
                if best.is_none_or(|(_, d)| dist_sq < d) {
                    best = Some((idx, dist_sq));
                }
            });
            // Everything within `radius` was checked exactly, so a hit here
            // is the global minimum: any unexamined agent is farther away.
            if let Some(found) = best {
                return Some(found);
            }
            if radius >= max_radius {
                return None;
            }
            radius = (radius * 2.0).min(max_radius);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn collect_within(index: &UniformGridIndex, point: (f32, f32), radius: f32) -> Vec<usize> {
        let mut found = Vec::new();
        index.neighbors_within(point, radius, &mut |idx, _| found.push(idx));
        found.sort_unstable();
        found
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(UniformGridIndex::new(0.0, 100.0, 100.0).is_err());
        assert!(UniformGridIndex::new(-5.0, 100.0, 100.0).is_err());
        assert!(UniformGridIndex::new(10.0, 0.0, 100.0).is_err());
        assert!(UniformGridIndex::new(10.0, 100.0, f32::NAN).is_err());
    }

    #[test]
    fn query_membership_is_exact_distance() {
        let mut index = UniformGridIndex::new(50.0, 400.0, 400.0).expect("index");
        // One agent inside the radius, one in an adjacent cell but outside it.
        index
            .rebuild(&[(100.0, 100.0), (100.0, 148.0)])
            .expect("rebuild");
        assert_eq!(collect_within(&index, (100.0, 110.0), 20.0), vec![0]);
        assert_eq!(collect_within(&index, (100.0, 110.0), 40.0), vec![0, 1]);
        // Inclusive boundary.
        assert_eq!(collect_within(&index, (100.0, 110.0), 38.0), vec![0, 1]);
    }

    #[test]
    fn query_wraps_across_world_edges() {
        let mut index = UniformGridIndex::new(50.0, 400.0, 300.0).expect("index");
        index
            .rebuild(&[(398.0, 150.0), (2.0, 150.0), (200.0, 298.0)])
            .expect("rebuild");
        // A query hugging the left edge sees the agent hugging the right edge.
        assert_eq!(collect_within(&index, (1.0, 150.0), 10.0), vec![0, 1]);
        // And vertically across the top/bottom seam.
        assert_eq!(collect_within(&index, (200.0, 1.0), 10.0), vec![2]);
    }

    #[test]
    fn radius_larger_than_world_visits_each_agent_once() {
        let mut index = UniformGridIndex::new(50.0, 200.0, 200.0).expect("index");
        let positions: Vec<(f32, f32)> = (0..16)
            .map(|i| ((i % 4) as f32 * 50.0, (i / 4) as f32 * 50.0))
            .collect();
        index.rebuild(&positions).expect("rebuild");
        let found = collect_within(&index, (100.0, 100.0), 500.0);
        assert_eq!(found, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn seam_queries_stay_exact_when_extent_is_not_a_cell_multiple() {
        // 410 / 50 leaves a fractional cell; the wrapped column next to the
        // seam must still be reached within one physical cell step.
        let mut index = UniformGridIndex::new(50.0, 410.0, 410.0).expect("index");
        index
            .rebuild(&[(375.0, 5.0), (48.0, 5.0)])
            .expect("rebuild");
        // Wrapped distances from (5, 5): 40 across the seam, 43 directly.
        assert_eq!(collect_within(&index, (5.0, 5.0), 45.0), vec![0, 1]);
        assert_eq!(collect_within(&index, (5.0, 5.0), 41.0), vec![0]);
        let (idx, dist_sq) = index.nearest((5.0, 5.0)).expect("nearest");
        assert_eq!(idx, 0);
        assert!((dist_sq.into_inner().sqrt() - 40.0).abs() < 1e-3);
    }

    #[test]
    fn radius_queries_match_linear_scan_on_uneven_extents() {
        let mut rng = SmallRng::seed_from_u64(0xA5A5);
        let width = 410.0_f32;
        let height = 370.0_f32;
        let positions: Vec<(f32, f32)> = (0..150)
            .map(|_| (rng.random_range(0.0..width), rng.random_range(0.0..height)))
            .collect();
        let mut index = UniformGridIndex::new(50.0, width, height).expect("index");
        index.rebuild(&positions).expect("rebuild");

        for _ in 0..40 {
            let point = (rng.random_range(0.0..width), rng.random_range(0.0..height));
            let radius = rng.random_range(5.0..120.0);
            let found = collect_within(&index, point, radius);
            let brute: Vec<usize> = positions
                .iter()
                .enumerate()
                .filter(|&(_, &(x, y))| {
                    let dx = wrapped_delta(point.0, x, width);
                    let dy = wrapped_delta(point.1, y, height);
                    dx * dx + dy * dy <= radius * radius
                })
                .map(|(idx, _)| idx)
                .collect();
            assert_eq!(found, brute, "query at {point:?} radius {radius}");
        }
    }

    #[test]
    fn nearest_matches_linear_scan() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let width = 640.0_f32;
        let height = 480.0_f32;
        let positions: Vec<(f32, f32)> = (0..200)
            .map(|_| (rng.random_range(0.0..width), rng.random_range(0.0..height)))
            .collect();
        let mut index = UniformGridIndex::new(40.0, width, height).expect("index");
        index.rebuild(&positions).expect("rebuild");

        for _ in 0..50 {
            let point = (rng.random_range(0.0..width), rng.random_range(0.0..height));
            let (found_idx, found_dist_sq) = index.nearest(point).expect("nearest");
            let brute = positions
                .iter()
                .enumerate()
                .map(|(idx, &(x, y))| {
                    let dx = wrapped_delta(point.0, x, width);
                    let dy = wrapped_delta(point.1, y, height);
                    (idx, dx * dx + dy * dy)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .expect("non-empty");
            assert!(
                (found_dist_sq.into_inner() - brute.1).abs() < 1e-4,
                "grid nearest {found_idx} ({found_dist_sq}) disagrees with scan {} ({})",
                brute.0,
                brute.1
            );
        }
    }

    #[test]
    fn nearest_reaches_across_an_empty_neighborhood() {
        let mut index = UniformGridIndex::new(10.0, 1000.0, 1000.0).expect("index");
        index.rebuild(&[(900.0, 900.0)]).expect("rebuild");
        let (idx, dist_sq) = index.nearest((100.0, 100.0)).expect("nearest");
        assert_eq!(idx, 0);
        // Wrapped distance: 200 on each axis, not 800.
        assert!((dist_sq.into_inner().sqrt() - (200.0_f32.hypot(200.0))).abs() < 1e-2);
    }

    #[test]
    fn nearest_on_empty_index_is_none() {
        let mut index = UniformGridIndex::new(10.0, 100.0, 100.0).expect("index");
        index.rebuild(&[]).expect("rebuild");
        assert!(index.nearest((50.0, 50.0)).is_none());
    }

    #[test]
    fn rebuild_replaces_previous_contents() {
        let mut index = UniformGridIndex::new(25.0, 100.0, 100.0).expect("index");
        index.rebuild(&[(10.0, 10.0)]).expect("rebuild");
        index.rebuild(&[(80.0, 80.0)]).expect("rebuild");
        assert!(collect_within(&index, (10.0, 10.0), 5.0).is_empty());
        assert_eq!(collect_within(&index, (80.0, 80.0), 5.0), vec![0]);
    }
}
