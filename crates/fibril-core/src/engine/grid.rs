use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::core::models::ids::FiberId;
use crate::core::models::world::World;
use crate::core::space::Space;

/// A uniform cell list over simulation space, optionally periodic per
/// axis.
///
/// Items are bucketed by position at `rebuild` time and queried by cell
/// neighborhood. With the cell width at least the interaction cutoff, the
/// 3^D neighborhood of the query cell is guaranteed to contain every item
/// within the cutoff; callers re-filter candidates by exact distance.
/// Nothing mutates the grid outside `clear`/`insert`, so it is safely
/// read-shared across a kinetics pass.
#[derive(Debug, Clone)]
pub struct CellGrid<T> {
    origin: Point3<f64>,
    width: Vector3<f64>,
    counts: [usize; 3],
    periodic: [bool; 3],
    cells: Vec<Vec<T>>,
}

impl<T> CellGrid<T> {
    /// Builds an empty grid covering `[lo, hi]` with cells of width at
    /// least `min_cell` on every axis.
    pub fn new(lo: Point3<f64>, hi: Point3<f64>, min_cell: f64, periodic: [bool; 3]) -> Self {
        assert!(min_cell > 0.0, "cell size must be positive");
        let mut counts = [1usize; 3];
        let mut width = Vector3::zeros();
        for axis in 0..3 {
            let extent = (hi[axis] - lo[axis]).max(min_cell);
            counts[axis] = ((extent / min_cell).floor() as usize).max(1);
            width[axis] = extent / counts[axis] as f64;
        }
        let n = counts[0] * counts[1] * counts[2];
        debug!(cells = n, ?counts, "allocated cell grid");
        Self {
            origin: lo,
            width,
            counts,
            periodic,
            cells: (0..n).map(|_| Vec::new()).collect(),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn coord(&self, axis: usize, x: f64) -> isize {
        ((x - self.origin[axis]) / self.width[axis]).floor() as isize
    }

    fn wrap(&self, axis: usize, i: isize) -> Option<usize> {
        let n = self.counts[axis] as isize;
        if self.periodic[axis] {
            Some(i.rem_euclid(n) as usize)
        } else if i < 0 || i >= n {
            None
        } else {
            Some(i as usize)
        }
    }

    fn flat(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (iz * self.counts[1] + iy) * self.counts[0] + ix
    }

    /// Index of the cell containing `p`. On bounded axes out-of-range
    /// positions are clamped into the border cells.
    fn cell_of(&self, p: &Point3<f64>) -> usize {
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let i = self.coord(axis, p[axis]);
            idx[axis] = self
                .wrap(axis, i)
                .unwrap_or_else(|| i.clamp(0, self.counts[axis] as isize - 1) as usize);
        }
        self.flat(idx[0], idx[1], idx[2])
    }

    pub fn insert(&mut self, p: &Point3<f64>, item: T) {
        let cell = self.cell_of(p);
        self.cells[cell].push(item);
    }

    /// The distinct cell indices of the 3^D neighborhood around `p`.
    ///
    /// Periodic axes wrap with modular arithmetic; on bounded axes the
    /// out-of-range neighbor cells simply contribute nothing.
    fn neighborhood(&self, p: &Point3<f64>) -> impl Iterator<Item = usize> {
        let mut per_axis: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for axis in 0..3 {
            let center = self.coord(axis, p[axis]);
            for offset in -1..=1 {
                if let Some(i) = self.wrap(axis, center + offset) {
                    if !per_axis[axis].contains(&i) {
                        per_axis[axis].push(i);
                    }
                }
            }
            // a clamped border query must still see the border cells
            if per_axis[axis].is_empty() {
                let i = center.clamp(0, self.counts[axis] as isize - 1) as usize;
                per_axis[axis].push(i);
            }
        }
        let [xs, ys, zs] = per_axis;
        let counts = self.counts;
        xs.into_iter()
            .cartesian_product(ys)
            .cartesian_product(zs)
            .map(move |((ix, iy), iz)| (iz * counts[1] + iy) * counts[0] + ix)
    }

    /// All items bucketed in the neighborhood of `p`: a superset of the
    /// items within one cell width of `p`.
    pub fn neighbors(&self, p: &Point3<f64>) -> impl Iterator<Item = &T> {
        self.neighborhood(p).flat_map(|cell| self.cells[cell].iter())
    }

    /// Contents of every cell, for equality checks in tests.
    #[cfg(test)]
    fn buckets(&self) -> &[Vec<T>] {
        &self.cells
    }
}

/// A fiber segment reference held by the attachment grid.
///
/// The grid holds no ownership: references are rebuilt from the arena
/// every step and never persisted across steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    pub fiber: FiberId,
    pub segment: usize,
}

/// The divide-and-conquer structure answering "which fiber segments lie
/// near this point" for the binding machinery.
///
/// Segments are bucketed by midpoint. The cell width is at least
/// `capture_radius + 0.75 * segmentation`: re-discretization keeps every
/// segment no longer than 1.5 times the target segmentation, so any
/// segment within the capture radius of a query point has its midpoint in
/// the query's 3^D cell neighborhood. Queries are therefore supersets of
/// the true neighbor set and callers re-filter by exact distance.
#[derive(Debug, Clone)]
pub struct FiberGrid {
    grid: CellGrid<SegmentRef>,
    capture_radius: f64,
}

impl FiberGrid {
    /// Sizes the grid for a space and the largest capture radius of any
    /// hand class; done once at setup.
    pub fn new(space: &dyn Space, capture_radius: f64, segmentation: f64) -> Self {
        let (lo, hi) = space.bounds();
        let periodic = space.periodicity().map(|p| p.is_some());
        let min_cell = capture_radius + 0.75 * segmentation;
        Self {
            grid: CellGrid::new(lo, hi, min_cell, periodic),
            capture_radius,
        }
    }

    pub fn capture_radius(&self) -> f64 {
        self.capture_radius
    }

    /// Clears and re-buckets every fiber segment; O(P) in the number of
    /// points.
    pub fn rebuild(&mut self, world: &World) {
        self.grid.clear();
        for id in world.fibers_ordered() {
            let fiber = &world.fibers[id];
            for segment in 0..fiber.n_segments() {
                let (a, b) = fiber.segment(segment);
                let midpoint = Point3::from((a.coords + b.coords) * 0.5);
                self.grid.insert(&midpoint, SegmentRef { fiber: id, segment });
            }
        }
    }

    /// Candidate segments near `p`; a superset of all segments within the
    /// capture radius.
    pub fn candidates(&self, p: &Point3<f64>) -> impl Iterator<Item = &SegmentRef> {
        self.grid.neighbors(p)
    }
}
