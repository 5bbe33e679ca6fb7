//! The highest-level, user-facing layer: complete simulation procedures
//! built on top of the engine.

use tracing::{info, instrument};

use crate::core::models::world::World;
use crate::core::params::ParamSet;
use crate::engine::error::SimulationError;
use crate::engine::events::EventSink;
use crate::engine::simulation::Simulation;

/// Outcome summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub steps_completed: u64,
    pub final_time: f64,
    /// Steps that needed a reduced-timestep retry to converge.
    pub retried_steps: u64,
}

/// Number of timestep-halving retries granted per step before a
/// convergence failure becomes fatal.
const MAX_STEP_RETRIES: usize = 4;

/// Runs a simulation for `n_steps`, delivering events to `events` and
/// retrying individual steps with a reduced timestep on convergence
/// failures.
#[instrument(skip(params, world, events))]
pub fn run<'a>(
    params: ParamSet,
    world: World,
    events: EventSink<'a>,
    n_steps: u64,
) -> Result<(Simulation<'a>, RunReport), SimulationError> {
    let mut simulation = Simulation::new(params, world)?;
    simulation.set_event_sink(events);
    let report = run_steps(&mut simulation, n_steps)?;
    Ok((simulation, report))
}

/// Advances an existing simulation by `n_steps` with the standard retry
/// policy.
pub fn run_steps(
    simulation: &mut Simulation,
    n_steps: u64,
) -> Result<RunReport, SimulationError> {
    let mut retried_steps = 0;
    for _ in 0..n_steps {
        match simulation.step() {
            Ok(()) => {}
            Err(error) if error.is_recoverable() => {
                retried_steps += 1;
                simulation.step_with_retry(MAX_STEP_RETRIES)?;
            }
            Err(error) => return Err(error),
        }
    }
    let report = RunReport {
        steps_completed: n_steps,
        final_time: simulation.world().time,
        retried_steps,
    };
    info!(
        steps = report.steps_completed,
        time = report.final_time,
        retried = report.retried_steps,
        "run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fiber::{DynamicState, Fiber};
    use crate::core::params::{FiberParams, SimulParams, SpaceSpec};
    use nalgebra::{Point3, Vector3};

    fn minimal_params() -> ParamSet {
        ParamSet {
            simul: SimulParams {
                time_step: 0.01,
                kt: 0.0,
                viscosity: 1.0,
                tolerance: 1e-8,
                max_iterations: 200,
                seed: 17,
                confine_stiffness: 100.0,
                rigid_stiffness: 1000.0,
            },
            space: SpaceSpec::Sphere { radius: 5.0 },
            fiber: FiberParams {
                segmentation: 0.5,
                rigidity: 0.05,
                stretch_stiffness: 200.0,
                drag_per_length: 1.0,
                growing_speed: 0.1,
                shrinking_speed: 0.3,
                fast_shrinking_speed: 0.6,
                growing_force: f64::INFINITY,
                catastrophe_rate: 0.1,
                catastrophe_coef: 0.0,
                rescue_rate: 0.1,
                pause_rate: 0.0,
                unpause_rate: 0.0,
                fast_catastrophe_force: f64::INFINITY,
                min_length: 0.05,
                fate: crate::core::params::Fate::Rescue,
                binding_key: u64::MAX,
                confine_stiffness: None,
            },
            hands: Vec::new(),
            singles: Vec::new(),
            couples: Vec::new(),
        }
    }

    #[test]
    fn run_completes_and_reports_progress() {
        let mut world = World::new();
        let id = world.add_fiber(Fiber::new(Point3::origin(), Vector3::x(), 1.0, 0.5));
        world.fibers[id].tip_plus.state = DynamicState::Growing;

        let (simulation, report) =
            run(minimal_params(), world, EventSink::new(), 50).unwrap();
        assert_eq!(report.steps_completed, 50);
        assert!((report.final_time - 0.5).abs() < 1e-12);
        assert_eq!(simulation.world().step_count, 50);
    }

    #[test]
    fn invalid_parameters_fail_before_any_step() {
        let mut params = minimal_params();
        params.simul.viscosity = 0.0;
        let err = run(params, World::new(), EventSink::new(), 10).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(_)
        ));
    }
}
