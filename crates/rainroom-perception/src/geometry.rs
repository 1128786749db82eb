//! Grid rectangle, point binning and per-rotation count matrices.
//!
//! The grid is laid out on a pitch of `cell_size + 1` millimetres starting at
//! the origin `(x0, y0)`.  The far corner is always derived:
//!
//! ```text
//! x1 = x0 + width  · (cell_size + 1)
//! y1 = y0 + height · (cell_size + 1)
//! ```
//!
//! Two membership tests exist on purpose.  Occupancy counting accepts points
//! on the rectangle's edges ([`GridGeometry::bin_inclusive`]); operator
//! pointer toggles only accept points strictly inside
//! ([`GridGeometry::bin_strict`]).

use std::sync::Arc;

use arc_swap::ArcSwap;
use rainroom_types::{Point2, RainError};

// ────────────────────────────────────────────────────────────────────────────
// GridGeometry
// ────────────────────────────────────────────────────────────────────────────

/// Placement and size of the grid in the installation plane.
///
/// Fields are private so the derived corner can never go stale: every
/// constructor and `with_*` method recomputes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    x0: i32,
    y0: i32,
    cell_size: i32,
    height: usize,
    width: usize,
    x1: i32,
    y1: i32,
}

impl GridGeometry {
    /// Corners that would not fit in `i32` saturate; use
    /// [`GridGeometry::checked`] to reject such placements instead.
    pub fn new(x0: i32, y0: i32, cell_size: i32, height: usize, width: usize) -> Self {
        let pitch = cell_size.saturating_add(1);
        let span = |n: usize| i32::try_from(n).unwrap_or(i32::MAX).saturating_mul(pitch);
        Self {
            x0,
            y0,
            cell_size,
            height,
            width,
            x1: x0.saturating_add(span(width)),
            y1: y0.saturating_add(span(height)),
        }
    }

    /// `None` when the far corner is not representable.
    pub fn checked(x0: i32, y0: i32, cell_size: i32, height: usize, width: usize) -> Option<Self> {
        let pitch = cell_size.checked_add(1)?;
        let x1 = x0.checked_add(i32::try_from(width).ok()?.checked_mul(pitch)?)?;
        let y1 = y0.checked_add(i32::try_from(height).ok()?.checked_mul(pitch)?)?;
        Some(Self {
            x0,
            y0,
            cell_size,
            height,
            width,
            x1,
            y1,
        })
    }

    pub fn with_origin(&self, x0: i32, y0: i32) -> Self {
        Self::new(x0, y0, self.cell_size, self.height, self.width)
    }

    pub fn with_cell_size(&self, cell_size: i32) -> Self {
        Self::new(self.x0, self.y0, cell_size, self.height, self.width)
    }

    pub fn origin(&self) -> (i32, i32) {
        (self.x0, self.y0)
    }

    pub fn corner(&self) -> (i32, i32) {
        (self.x1, self.y1)
    }

    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    /// `(height, width)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn pitch(&self) -> f64 {
        f64::from(self.cell_size) + 1.0
    }

    fn index(&self, p: Point2) -> (usize, usize) {
        let col = ((p.x - f64::from(self.x0)) / self.pitch()).floor() as usize;
        let row = ((p.y - f64::from(self.y0)) / self.pitch()).floor() as usize;
        (row, col)
    }

    pub fn contains_inclusive(&self, p: Point2) -> bool {
        f64::from(self.x0) <= p.x
            && p.x <= f64::from(self.x1)
            && f64::from(self.y0) <= p.y
            && p.y <= f64::from(self.y1)
    }

    pub fn contains_strict(&self, p: Point2) -> bool {
        f64::from(self.x0) < p.x
            && p.x < f64::from(self.x1)
            && f64::from(self.y0) < p.y
            && p.y < f64::from(self.y1)
    }

    /// `(row, col)` of the cell counting `p`, edges included.  A point on the
    /// far edge is counted in the last row/column.
    pub fn bin_inclusive(&self, p: Point2) -> Option<(usize, usize)> {
        if !self.contains_inclusive(p) {
            return None;
        }
        let (row, col) = self.index(p);
        Some((
            row.min(self.height.saturating_sub(1)),
            col.min(self.width.saturating_sub(1)),
        ))
    }

    /// `(row, col)` of the cell under `p`, edges excluded.
    pub fn bin_strict(&self, p: Point2) -> Option<(usize, usize)> {
        if !self.contains_strict(p) {
            return None;
        }
        Some(self.index(p))
    }

    /// Lower-left and upper-right corners of cell `(row, col)`.
    pub fn cell_bounds(&self, row: usize, col: usize) -> (Point2, Point2) {
        let pitch = self.pitch();
        let left = f64::from(self.x0) + col as f64 * pitch;
        let bottom = f64::from(self.y0) + row as f64 * pitch;
        (
            Point2::new(left, bottom),
            Point2::new(left + pitch, bottom + pitch),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SharedGeometry
// ────────────────────────────────────────────────────────────────────────────

/// Geometry shared between the grid and every sensor worker.
///
/// Readers always see a whole [`GridGeometry`]: origin and corner are swapped
/// together, never field by field.
#[derive(Debug, Clone)]
pub struct SharedGeometry(Arc<ArcSwap<GridGeometry>>);

impl SharedGeometry {
    pub fn new(geometry: GridGeometry) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(geometry)))
    }

    pub fn load(&self) -> GridGeometry {
        **self.0.load()
    }

    /// Move the grid, keeping its size.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::Placement`] when the far corner would overflow;
    /// the current geometry is kept.
    pub fn set_origin(&self, x0: i32, y0: i32) -> Result<(), RainError> {
        let current = self.load();
        let (height, width) = current.dimensions();
        let next = GridGeometry::checked(x0, y0, current.cell_size(), height, width).ok_or_else(
            || RainError::Placement(format!("origin ({x0}, {y0}) puts the far corner out of range")),
        )?;
        self.0.store(Arc::new(next));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CountGrid
// ────────────────────────────────────────────────────────────────────────────

/// Row-major matrix of sample counts, one entry per grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountGrid {
    height: usize,
    width: usize,
    counts: Vec<u32>,
}

impl CountGrid {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            counts: vec![0; height * width],
        }
    }

    /// `(height, width)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.counts[row * self.width + col]
    }

    pub fn increment(&mut self, row: usize, col: usize) {
        self.counts[row * self.width + col] += 1;
    }

    pub fn set(&mut self, row: usize, col: usize, count: u32) {
        self.counts[row * self.width + col] = count;
    }

    /// Add `other` element-wise.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::DimensionMismatch`] when the shapes differ; `self`
    /// is left untouched.
    pub fn add(&mut self, other: &CountGrid) -> Result<(), RainError> {
        if self.dimensions() != other.dimensions() {
            return Err(RainError::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installation() -> GridGeometry {
        GridGeometry::new(0, 0, 600, 4, 5)
    }

    #[test]
    fn corner_is_derived_from_origin_and_pitch() {
        let g = installation();
        assert_eq!(g.corner(), (5 * 601, 4 * 601));

        let moved = g.with_origin(-100, 250);
        assert_eq!(moved.corner(), (-100 + 5 * 601, 250 + 4 * 601));

        let resized = moved.with_cell_size(99);
        assert_eq!(resized.corner(), (-100 + 500, 250 + 400));
    }

    #[test]
    fn inclusive_and_strict_bounds_differ_on_edges() {
        let g = installation();
        let on_origin = Point2::new(0.0, 0.0);
        assert_eq!(g.bin_inclusive(on_origin), Some((0, 0)));
        assert_eq!(g.bin_strict(on_origin), None);

        let on_corner = Point2::new(3005.0, 2404.0);
        assert_eq!(g.bin_inclusive(on_corner), Some((3, 4)));
        assert_eq!(g.bin_strict(on_corner), None);
    }

    #[test]
    fn outside_points_are_not_binned() {
        let g = installation();
        assert_eq!(g.bin_inclusive(Point2::new(-0.5, 10.0)), None);
        assert_eq!(g.bin_inclusive(Point2::new(10.0, 2404.5)), None);
    }

    #[test]
    fn interior_points_round_trip_to_their_cell() {
        let g = GridGeometry::new(-1200, 300, 600, 4, 5);
        for row in 0..4 {
            for col in 0..5 {
                let (lo, hi) = g.cell_bounds(row, col);
                for (fx, fy) in [(0.01, 0.01), (0.5, 0.5), (0.99, 0.2), (0.3, 0.99)] {
                    let p = Point2::new(lo.x + (hi.x - lo.x) * fx, lo.y + (hi.y - lo.y) * fy);
                    assert_eq!(g.bin_inclusive(p), Some((row, col)), "inclusive {p:?}");
                    assert_eq!(g.bin_strict(p), Some((row, col)), "strict {p:?}");
                }
            }
        }
    }

    #[test]
    fn huge_origin_never_overflows() {
        let g = GridGeometry::new(2_147_483_000, 0, 600, 4, 5);
        assert_eq!(g.corner(), (i32::MAX, 2404));
        assert_eq!(GridGeometry::checked(2_147_483_000, 0, 600, 4, 5), None);
        assert_eq!(GridGeometry::checked(0, 0, 600, 4, 5), Some(installation()));

        let shared = SharedGeometry::new(installation());
        let err = shared.set_origin(2_147_483_000, 0).unwrap_err();
        assert!(matches!(err, RainError::Placement(_)));
        assert_eq!(shared.load(), installation());
    }

    #[test]
    fn shared_geometry_swaps_whole_values() {
        let shared = SharedGeometry::new(installation());
        let reader = shared.clone();
        shared.set_origin(1000, -2000).unwrap();
        let g = reader.load();
        assert_eq!(g.origin(), (1000, -2000));
        assert_eq!(g.corner(), (1000 + 3005, -2000 + 2404));
        assert_eq!(g.dimensions(), (4, 5));
    }

    #[test]
    fn count_grid_addition_is_order_independent() {
        let mut a = CountGrid::new(2, 3);
        a.set(0, 1, 4);
        let mut b = CountGrid::new(2, 3);
        b.set(0, 1, 1);
        b.set(1, 2, 7);

        let mut ab = CountGrid::new(2, 3);
        ab.add(&a).unwrap();
        ab.add(&b).unwrap();
        let mut ba = CountGrid::new(2, 3);
        ba.add(&b).unwrap();
        ba.add(&a).unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab.get(0, 1), 5);
        assert_eq!(ab.total(), 12);
    }

    #[test]
    fn count_grid_rejects_mismatched_shapes() {
        let mut a = CountGrid::new(4, 5);
        a.increment(0, 0);
        let b = CountGrid::new(5, 4);
        let err = a.add(&b).unwrap_err();
        assert_eq!(
            err,
            RainError::DimensionMismatch {
                expected: (4, 5),
                actual: (5, 4)
            }
        );
        assert_eq!(a.total(), 1);
    }

    #[test]
    fn clear_zeroes_every_entry() {
        let mut a = CountGrid::new(3, 3);
        a.increment(1, 1);
        a.increment(2, 0);
        assert!(!a.is_empty());
        a.clear();
        assert!(a.is_empty());
    }
}
