pub mod matrix;
pub mod solver;

use nalgebra::{Matrix3, Point3, Vector3};
use slotmap::SecondaryMap;
use tracing::{debug, trace};

use crate::core::models::couple::HandSide;
use crate::core::models::fiber::FiberEnd;
use crate::core::models::ids::{FiberId, SolidId};
use crate::core::models::single::Anchor;
use crate::core::models::world::World;
use crate::core::params::ParamSet;
use crate::core::random::SimRng;
use crate::core::space::Space;
use crate::engine::error::SimulationError;
use matrix::BlockSparseSym;
use solver::{LinearOperator, SolverFailure, SolverReport, conjugate_gradient};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A location in the solver's point space: either one point, or a
/// position interpolated between two consecutive points of a fiber.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MecaPoint {
    Exact(usize),
    Interpolated { p0: usize, p1: usize, coef: f64 },
}

impl MecaPoint {
    /// Point indices with their interpolation weights.
    fn weights(&self) -> ([(usize, f64); 2], usize) {
        match *self {
            MecaPoint::Exact(index) => ([(index, 1.0), (0, 0.0)], 1),
            MecaPoint::Interpolated { p0, p1, coef } => ([(p0, 1.0 - coef), (p1, coef)], 2),
        }
    }

    fn position(&self, pos: &[Vector3<f64>]) -> Vector3<f64> {
        match *self {
            MecaPoint::Exact(index) => pos[index],
            MecaPoint::Interpolated { p0, p1, coef } => pos[p0] * (1.0 - coef) + pos[p1] * coef,
        }
    }

    fn shares_point(&self, other: &MecaPoint) -> bool {
        let (wa, na) = self.weights();
        let (wb, nb) = other.weights();
        wa[..na]
            .iter()
            .any(|(i, _)| wb[..nb].iter().any(|(j, _)| i == j))
    }
}

/// The per-step implicit operator `M = D + K`, where `D` carries the
/// drag-over-dt diagonal and `K` the assembled (negated) force Jacobian.
struct ImplicitOperator<'a> {
    matrix: &'a BlockSparseSym,
    drag_over_dt: &'a [f64],
    preconditioner: &'a [Matrix3<f64>],
}

impl LinearOperator for ImplicitOperator<'_> {
    fn len(&self) -> usize {
        self.matrix.size()
    }

    fn multiply(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
        self.matrix.multiply(x, y);
        for i in 0..x.len() {
            y[i] += x[i] * self.drag_over_dt[i];
        }
    }

    fn precondition(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
        for i in 0..x.len() {
            y[i] = self.preconditioner[i] * x[i];
        }
    }
}

/// The mechanical solver.
///
/// Each step, `assemble` registers every mobile point, accumulates the
/// linearized interactions into a sparse symmetric system, and `solve`
/// advances all positions by one implicit-Euler update:
///
/// ```text
/// (drag/dt - A) dx = f(x) + sqrt(2 kT drag / dt) xi
/// ```
///
/// with `A` the force Jacobian (elastic links, bending rigidity,
/// confinement clamps) and `xi` standard normal deviates. The operator is
/// symmetric positive definite by construction, so the system is solved
/// with a Jacobi-block preconditioned conjugate gradient. New positions
/// are written back atomically by `commit`; a failed solve leaves the
/// world untouched.
#[derive(Debug, Default)]
pub struct Meca {
    fiber_start: SecondaryMap<FiberId, usize>,
    solid_start: SecondaryMap<SolidId, usize>,
    n_points: usize,
    dt: f64,

    positions: Vec<Vector3<f64>>,
    solution: Vec<Vector3<f64>>,
    base: Vec<Vector3<f64>>,
    drag_over_dt: Vec<f64>,
    matrix: BlockSparseSym,
    preconditioner: Vec<Matrix3<f64>>,

    /// Forces at the committed positions of the last solve, kept for the
    /// load-dependent kinetics of the following step.
    forces: Vec<Vector3<f64>>,
    force_map: SecondaryMap<FiberId, usize>,
}

impl Meca {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Global index of a fiber vertex.
    pub fn fiber_point(&self, fiber: FiberId, vertex: usize) -> Option<usize> {
        self.fiber_start.get(fiber).map(|start| start + vertex)
    }

    /// Global index of a solid point.
    pub fn solid_point(&self, solid: SolidId, vertex: usize) -> Option<usize> {
        self.solid_start.get(solid).map(|start| start + vertex)
    }

    /// Interpolated solver location of an attachment abscissa.
    pub fn fiber_site(&self, world: &World, fiber: FiberId, abscissa: f64) -> Option<MecaPoint> {
        let start = *self.fiber_start.get(fiber)?;
        let (segment, coef) = world.fibers.get(fiber)?.interpolate(abscissa);
        Some(MecaPoint::Interpolated {
            p0: start + segment,
            p1: start + segment + 1,
            coef,
        })
    }

    /// Registers every mobile point and accumulates all interactions of
    /// the current topology.
    pub fn assemble(
        &mut self,
        world: &World,
        params: &ParamSet,
        space: &dyn Space,
        rng: &mut SimRng,
    ) {
        self.begin(world, params);
        self.add_fiber_internals(world, params);
        self.add_solid_internals(world, params);
        self.add_hand_links(world, params);
        self.add_confinement(world, params, space);
        self.add_brownian(params, rng);
        debug!(
            points = self.n_points,
            blocks = self.matrix.n_blocks(),
            "assembled mechanical system"
        );
    }

    fn begin(&mut self, world: &World, params: &ParamSet) {
        self.dt = params.simul.time_step;
        self.fiber_start.clear();
        self.solid_start.clear();

        self.n_points = world.n_points();
        self.positions.clear();
        self.base.clear();
        self.drag_over_dt.clear();
        self.base.resize(self.n_points, Vector3::zeros());
        self.matrix.reset(self.n_points);

        // fibers first, then solids, in identity order
        for id in world.fibers_ordered() {
            let fiber = &world.fibers[id];
            self.fiber_start.insert(id, self.positions.len());
            let segment_len = fiber.length() / fiber.n_segments() as f64;
            let point_drag =
                params.simul.viscosity * params.fiber.drag_per_length * segment_len.max(1e-9);
            for p in fiber.points() {
                self.positions.push(p.coords);
                self.drag_over_dt.push(point_drag / self.dt);
            }
        }
        for (id, solid) in &world.solids {
            self.solid_start.insert(id, self.positions.len());
            // Stokes drag of a bead of the solid's radius
            let point_drag =
                6.0 * std::f64::consts::PI * params.simul.viscosity * solid.radius;
            for p in solid.points() {
                self.positions.push(p.coords);
                self.drag_over_dt.push(point_drag / self.dt);
            }
        }
        debug_assert_eq!(self.positions.len(), self.n_points);
    }

    /// Adds `weight * c c^T` over the weighted points of an interaction.
    fn add_quadratic(&mut self, points: &[(usize, f64)], weight: f64) {
        for (a, &(i, ci)) in points.iter().enumerate() {
            for &(j, cj) in &points[a..] {
                self.matrix.add_scalar(i, j, weight * ci * cj);
            }
        }
    }

    /// Hookean link of zero resting length between two locations.
    pub fn add_link(&mut self, a: MecaPoint, b: MecaPoint, weight: f64) {
        if a.shares_point(&b) {
            return;
        }
        let (wa, na) = a.weights();
        let (wb, nb) = b.weights();
        let mut combined: Vec<(usize, f64)> = Vec::with_capacity(4);
        combined.extend(wa[..na].iter().map(|&(i, w)| (i, -w)));
        combined.extend(wb[..nb].iter().copied());
        self.add_quadratic(&combined, weight);
    }

    /// Hookean link with a resting length, linearized along the current
    /// separation of the two locations.
    pub fn add_long_link(&mut self, a: MecaPoint, b: MecaPoint, rest: f64, weight: f64) {
        if a.shares_point(&b) {
            return;
        }
        let d = b.position(&self.positions) - a.position(&self.positions);
        let n = d.norm();
        if n < 1e-9 {
            return;
        }
        let dir = d / n;
        self.add_link(a, b, weight);
        let offset = dir * (weight * rest);
        let (wa, na) = a.weights();
        for &(i, w) in &wa[..na] {
            self.base[i] -= offset * w;
        }
        let (wb, nb) = b.weights();
        for &(i, w) in &wb[..nb] {
            self.base[i] += offset * w;
        }
    }

    /// Clamp to a fixed position `g` with the given stiffness.
    pub fn add_clamp(&mut self, a: MecaPoint, g: &Point3<f64>, weight: f64) {
        let (wa, na) = a.weights();
        self.add_quadratic(&wa[..na], weight);
        for &(i, w) in &wa[..na] {
            self.base[i] += g.coords * (weight * w);
        }
    }

    /// One-sided restoring force toward the plane through `g` with normal
    /// `normal`.
    pub fn add_plane(&mut self, a: MecaPoint, normal: &Vector3<f64>, g: &Point3<f64>, weight: f64) {
        let block = normal * normal.transpose() * weight;
        let (wa, na) = a.weights();
        for (k, &(i, ci)) in wa[..na].iter().enumerate() {
            for &(j, cj) in &wa[k..na] {
                self.matrix.add_block(i, j, &(block * (ci * cj)));
            }
            self.base[i] += normal * (weight * ci * (g.coords.dot(normal)));
        }
    }

    /// Bending rigidity of one fiber: the discrete curvature stencil
    /// `[1, -2, 1]` applied along the chain, scaled by
    /// `rigidity / ds^3`.
    fn add_rigidity(&mut self, start: usize, n_points: usize, rigidity: f64, ds: f64) {
        if n_points < 3 || rigidity <= 0.0 {
            return;
        }
        let weight = rigidity / (ds * ds * ds);
        for p in start + 1..start + n_points - 1 {
            let stencil = [(p - 1, 1.0), (p, -2.0), (p + 1, 1.0)];
            self.add_quadratic(&stencil, weight);
        }
    }

    fn add_fiber_internals(&mut self, world: &World, params: &ParamSet) {
        for id in world.fibers_ordered() {
            let fiber = &world.fibers[id];
            let start = self.fiber_start[id];
            let n = fiber.n_points();
            let rest = fiber.length() / fiber.n_segments() as f64;
            for s in 0..fiber.n_segments() {
                self.add_long_link(
                    MecaPoint::Exact(start + s),
                    MecaPoint::Exact(start + s + 1),
                    rest,
                    params.fiber.stretch_stiffness,
                );
            }
            self.add_rigidity(start, n, params.fiber.rigidity, rest);
        }
    }

    fn add_solid_internals(&mut self, world: &World, params: &ParamSet) {
        for (id, solid) in &world.solids {
            let start = self.solid_start[id];
            for (s, rest) in solid.rest_lengths().iter().enumerate() {
                self.add_long_link(
                    MecaPoint::Exact(start + s),
                    MecaPoint::Exact(start + s + 1),
                    *rest,
                    params.simul.rigid_stiffness,
                );
            }
        }
    }

    /// Spring terms of bound singles and bridging couples.
    fn add_hand_links(&mut self, world: &World, params: &ParamSet) {
        for (_, single) in &world.singles {
            let Some((fiber, abscissa)) = single.hand.attachment() else {
                continue;
            };
            let Some(site) = self.fiber_site(world, fiber, abscissa) else {
                continue;
            };
            let class = &params.singles[single.params];
            if class.stiffness <= 0.0 {
                continue;
            }
            if let Anchor::Fixed(g) = &single.anchor {
                self.add_clamp(site, g, class.stiffness);
            }
        }

        for (_, couple) in &world.couples {
            if !couple.is_bridging() {
                continue;
            }
            let class = &params.couples[couple.params];
            let mut sites = [None, None];
            for (k, side) in HandSide::BOTH.iter().enumerate() {
                if let Some((fiber, abscissa)) = couple.hand(*side).attachment() {
                    sites[k] = self.fiber_site(world, fiber, abscissa);
                }
            }
            if let (Some(a), Some(b)) = (sites[0], sites[1]) {
                if class.is_short() {
                    self.add_link(a, b, class.stiffness);
                } else {
                    self.add_long_link(a, b, class.length, class.stiffness);
                }
            }
        }
    }

    /// Confinement: every point outside the space is pulled back toward
    /// its boundary projection.
    fn add_confinement(&mut self, world: &World, params: &ParamSet, space: &dyn Space) {
        let stiffness = params
            .fiber
            .confine_stiffness
            .unwrap_or(params.simul.confine_stiffness);
        if stiffness <= 0.0 {
            return;
        }
        for id in world.fibers_ordered() {
            let fiber = &world.fibers[id];
            let start = self.fiber_start[id];
            for (v, p) in fiber.points().iter().enumerate() {
                if !space.inside(p) {
                    let g = space.project(p);
                    self.add_clamp(MecaPoint::Exact(start + v), &g, stiffness);
                }
            }
        }
        let stiffness = params.simul.confine_stiffness;
        for (id, solid) in &world.solids {
            let start = self.solid_start[id];
            for (v, p) in solid.points().iter().enumerate() {
                if !space.inside(p) {
                    let g = space.project(p);
                    self.add_clamp(MecaPoint::Exact(start + v), &g, stiffness);
                }
            }
        }
    }

    /// Calibrated random forces simulating Brownian motion.
    fn add_brownian(&mut self, params: &ParamSet, rng: &mut SimRng) {
        let kt = params.simul.kt;
        if kt <= 0.0 {
            return;
        }
        for i in 0..self.n_points {
            let sigma = (2.0 * kt * self.drag_over_dt[i]).sqrt();
            self.base[i] += Vector3::new(
                sigma * rng.gauss(),
                sigma * rng.gauss(),
                sigma * rng.gauss(),
            );
        }
    }

    /// Elastic energy of the assembled quadratic model at the current
    /// positions, `E(x) = x K x / 2 - base . x`, up to a constant. Used by
    /// stability diagnostics and tests.
    pub fn elastic_energy(&self) -> f64 {
        self.energy_at(&self.positions)
    }

    fn energy_at(&self, x: &[Vector3<f64>]) -> f64 {
        let mut kx = vec![Vector3::zeros(); self.n_points];
        self.matrix.multiply(x, &mut kx);
        let quad: f64 = x.iter().zip(&kx).map(|(a, b)| a.dot(b)).sum();
        let linear: f64 = x.iter().zip(&self.base).map(|(a, b)| a.dot(b)).sum();
        0.5 * quad - linear
    }

    /// Elastic energy the committed solution would have; only meaningful
    /// after a successful `solve`.
    pub fn solution_energy(&self) -> f64 {
        self.energy_at(&self.solution)
    }

    /// Solves the implicit system. On success the new positions are staged
    /// in the solver; nothing is visible in the world until `commit`.
    pub fn solve(&mut self, params: &ParamSet) -> Result<SolverReport, SimulationError> {
        // rhs = f(x) = base - K x
        let mut rhs = vec![Vector3::zeros(); self.n_points];
        self.matrix.multiply(&self.positions, &mut rhs);
        for i in 0..self.n_points {
            rhs[i] = self.base[i] - rhs[i];
        }

        // Jacobi preconditioner on the 3x3 diagonal blocks of D + K
        let invert_block = |i: usize| {
            let block =
                self.matrix.diagonal_block(i) + Matrix3::identity() * self.drag_over_dt[i];
            block.try_inverse().unwrap_or_else(Matrix3::identity)
        };
        #[cfg(not(feature = "parallel"))]
        let blocks: Vec<Matrix3<f64>> = (0..self.n_points).map(invert_block).collect();
        #[cfg(feature = "parallel")]
        let blocks: Vec<Matrix3<f64>> = (0..self.n_points).into_par_iter().map(invert_block).collect();
        self.preconditioner = blocks;

        let operator = ImplicitOperator {
            matrix: &self.matrix,
            drag_over_dt: &self.drag_over_dt,
            preconditioner: &self.preconditioner,
        };

        let mut dx = vec![Vector3::zeros(); self.n_points];
        let report = conjugate_gradient(
            &operator,
            &rhs,
            &mut dx,
            params.simul.tolerance,
            params.simul.max_iterations,
        )
        .map_err(|failure| match failure {
            SolverFailure::NotConverged {
                iterations,
                residual,
            } => SimulationError::Convergence {
                iterations,
                residual,
            },
            SolverFailure::NonFinite => SimulationError::NumericInstability { phase: "solve" },
        })?;

        self.solution.clear();
        self.solution
            .extend(self.positions.iter().zip(&dx).map(|(x, d)| x + d));
        if self.solution.iter().any(|v| !v.x.is_finite() || !v.y.is_finite() || !v.z.is_finite()) {
            return Err(SimulationError::NumericInstability { phase: "integration" });
        }

        // forces at the committed positions, for next-step kinetics
        self.forces.clear();
        self.forces.resize(self.n_points, Vector3::zeros());
        let mut kx = vec![Vector3::zeros(); self.n_points];
        self.matrix.multiply(&self.solution, &mut kx);
        for i in 0..self.n_points {
            self.forces[i] = self.base[i] - kx[i];
        }
        self.force_map = self.fiber_start.clone();

        trace!(
            iterations = report.iterations,
            residual = report.residual,
            "solved mechanical system"
        );
        Ok(report)
    }

    /// Writes the staged positions back into the world. Positions commit
    /// atomically per step: a partial update is never observable.
    pub fn commit(&self, world: &mut World) {
        debug_assert_eq!(self.solution.len(), self.n_points);
        for (id, &start) in &self.fiber_start {
            if let Some(fiber) = world.fibers.get_mut(id) {
                for (v, p) in fiber.points_mut().iter_mut().enumerate() {
                    *p = Point3::from(self.solution[start + v]);
                }
            }
        }
        for (id, &start) in &self.solid_start {
            if let Some(solid) = world.solids.get_mut(id) {
                for (v, p) in solid.points_mut().iter_mut().enumerate() {
                    *p = Point3::from(self.solution[start + v]);
                }
            }
        }
    }

    /// The force that acted on a fiber end in the last committed solve,
    /// projected on the outward end direction. Negative values oppose
    /// growth. Zero when the fiber was not part of that solve.
    pub fn projected_end_force(&self, world: &World, fiber: FiberId, end: FiberEnd) -> f64 {
        let Some(&start) = self.force_map.get(fiber) else {
            return 0.0;
        };
        let Some(f) = world.fibers.get(fiber) else {
            return 0.0;
        };
        let index = match end {
            FiberEnd::Minus => start,
            FiberEnd::Plus => start + f.n_points() - 1,
        };
        match self.forces.get(index) {
            Some(force) => force.dot(&f.end_dir(end)),
            None => 0.0,
        }
    }
}
