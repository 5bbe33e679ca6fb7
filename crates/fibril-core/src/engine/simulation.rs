use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::models::world::World;
use crate::core::params::ParamSet;
use crate::core::random::SimRng;
use crate::core::space::Space;
use crate::engine::checkpoint::Checkpoint;
use crate::engine::error::SimulationError;
use crate::engine::events::{EventSink, SimEvent};
use crate::engine::grid::FiberGrid;
use crate::engine::kinetics::binding::{binding_pass, diffusion_pass, reconcile_pass};
use crate::engine::kinetics::instability::instability_pass;
use crate::engine::meca::Meca;
use crate::engine::snapshot::{Frame, SnapshotBuffer};

/// The simulation worker: owns the world, the solver, the spatial grid and
/// the random source, and advances them one step at a time.
///
/// Within a step the phases are strictly sequential: the grid is rebuilt
/// from committed positions, the kinetics fix the step's topology, and the
/// mechanical solve advances all positions under that topology. A step
/// either commits completely or not at all: on any error the pre-step
/// state is reinstated and nothing is published.
pub struct Simulation<'a> {
    params: ParamSet,
    space: Arc<dyn Space>,
    world: World,
    grid: FiberGrid,
    meca: Meca,
    rng: SimRng,
    events: EventSink<'a>,
    snapshots: Arc<SnapshotBuffer>,
    generation: u64,
}

impl std::fmt::Debug for Simulation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("n_points", &self.world.n_points())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<'a> Simulation<'a> {
    /// Validates the parameters and builds a worker around the given
    /// initial world.
    pub fn new(params: ParamSet, world: World) -> Result<Self, SimulationError> {
        params.validate()?;
        let space = params.space.build();
        let range = params.max_binding_range().max(params.fiber.segmentation);
        let grid = FiberGrid::new(space.as_ref(), range, params.fiber.segmentation);
        let rng = SimRng::seeded(params.simul.seed);
        info!(
            seed = params.simul.seed,
            points = world.n_points(),
            "simulation initialized"
        );
        Ok(Self {
            params,
            space,
            world,
            grid,
            meca: Meca::new(),
            rng,
            events: EventSink::new(),
            snapshots: Arc::new(SnapshotBuffer::new()),
            generation: 0,
        })
    }

    /// Installs the event callback receiving attach/detach/sever/destroy
    /// notifications.
    pub fn set_event_sink(&mut self, events: EventSink<'a>) {
        self.events = events;
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn space(&self) -> &dyn Space {
        self.space.as_ref()
    }

    pub fn rng_mut(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    /// Handle for outside consumers; readers only ever observe committed
    /// generations.
    pub fn snapshots(&self) -> Arc<SnapshotBuffer> {
        self.snapshots.clone()
    }

    /// Advances the simulation by one step.
    ///
    /// Control flow: grid rebuild, diffusion, binding/unbinding, dynamic
    /// instability (with destruction), attachment reconciliation, then the
    /// implicit mechanical solve. A failed solve reinstates the pre-step
    /// state before returning the error, so partial updates are never
    /// observable.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        let backup = Checkpoint {
            world: self.world.clone(),
            rng: self.rng.clone(),
        };
        match self.advance() {
            Ok(()) => {
                self.generation += 1;
                self.snapshots
                    .publish(Frame::capture(&self.world, self.generation));
                Ok(())
            }
            Err(error) => {
                self.world = backup.world;
                self.rng = backup.rng;
                warn!(%error, "step discarded");
                Err(error)
            }
        }
    }

    fn advance(&mut self) -> Result<(), SimulationError> {
        self.grid.rebuild(&self.world);

        diffusion_pass(
            &mut self.world,
            &self.params,
            self.space.as_ref(),
            &mut self.rng,
        );
        binding_pass(
            &mut self.world,
            &self.grid,
            &self.params,
            &mut self.rng,
            &mut self.events,
        );

        let doomed = instability_pass(
            &mut self.world,
            &self.params,
            &mut self.rng,
            &mut self.events,
        );
        for id in doomed {
            let identity = self.world.inventory.of_fiber(id).unwrap_or(u64::MAX);
            let orphans = self.world.remove_fiber(id);
            self.events.report(SimEvent::Destroyed { fiber: identity });
            for hand in orphans {
                self.events.report(SimEvent::Detached {
                    hand,
                    fiber: identity,
                    reason: crate::core::models::hand::DetachReason::FiberLost,
                });
            }
            debug!(identity, "fiber destroyed");
        }

        // assembly dynamics may have pushed attachments off an end; this
        // must be resolved within the same step
        reconcile_pass(&mut self.world, &self.params, &mut self.events);

        self.meca.assemble(
            &self.world,
            &self.params,
            self.space.as_ref(),
            &mut self.rng,
        );
        self.meca.solve(&self.params)?;
        self.meca.commit(&mut self.world);

        // deposit the projected end loads on the tips; next step's
        // dynamic instability (and a restored checkpoint) reads them from
        // the world, not from solver internals
        for id in self.world.fibers_ordered() {
            for end in crate::core::models::fiber::FiberEnd::BOTH {
                let force = self.meca.projected_end_force(&self.world, id, end);
                self.world.fibers[id].tip_mut(end).force = force;
            }
        }

        self.world.step_count += 1;
        self.world.time += self.params.simul.time_step;
        Ok(())
    }

    /// Advances one step, halving the timestep and retrying on a
    /// convergence failure, up to `max_retries` times. The configured
    /// timestep is restored afterwards; any other error aborts
    /// immediately.
    pub fn step_with_retry(&mut self, max_retries: usize) -> Result<(), SimulationError> {
        let configured_dt = self.params.simul.time_step;
        let mut result = self.step();
        let mut retries = 0;
        while let Err(error) = &result {
            if !error.is_recoverable() || retries >= max_retries {
                break;
            }
            retries += 1;
            self.params.simul.time_step /= 2.0;
            warn!(
                retry = retries,
                time_step = self.params.simul.time_step,
                "convergence failure, retrying with reduced timestep"
            );
            result = self.step();
        }
        self.params.simul.time_step = configured_dt;
        result
    }

    /// Runs `n` steps, stopping at the first error.
    pub fn run(&mut self, n: u64) -> Result<(), SimulationError> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Cuts a fiber at `abscissa`, transferring the binders of the distal
    /// side to the newly created fiber and reporting a `Severed` event.
    /// Refuses cuts leaving a piece shorter than the minimal fiber length.
    pub fn sever(
        &mut self,
        fiber: crate::core::models::ids::FiberId,
        abscissa: f64,
    ) -> Option<crate::core::models::ids::FiberId> {
        let identity = self.world.inventory.of_fiber(fiber)?;
        let min_piece = self.params.fiber.min_length;
        let new_id = self.world.sever_fiber(fiber, abscissa, min_piece)?;
        let new_identity = self.world.inventory.of_fiber(new_id).unwrap_or(u64::MAX);
        self.events.report(SimEvent::Severed {
            fiber: identity,
            new_fiber: new_identity,
            abscissa,
        });
        Some(new_id)
    }

    /// Captures the full mutable state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            world: self.world.clone(),
            rng: self.rng.clone(),
        }
    }

    /// Reinstates a previously captured state. Replay from here reproduces
    /// the trajectory the original run took.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.world = checkpoint.world;
        self.rng = checkpoint.rng;
        self.generation += 1;
        self.snapshots
            .publish(Frame::capture(&self.world, self.generation));
    }
}
