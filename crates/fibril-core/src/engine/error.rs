use thiserror::Error;

use crate::core::params::ParamError;

/// Errors reported by the step driver and its subsystems.
///
/// `Configuration` is fatal before the simulation starts. `Convergence` is
/// recoverable: the caller may retry the step with a reduced timestep or
/// abort the run, but an unconverged solution is never silently accepted.
/// `NumericInstability` aborts the step without committing partial state.
/// `InvalidTopology` indicates a logic fault; it is fatal in debug builds
/// and auto-corrected (by forced detachment) in production.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("configuration rejected: {0}")]
    Configuration(#[from] ParamError),

    #[error("solver failed to converge within {iterations} iterations (residual {residual:.3e})")]
    Convergence { iterations: usize, residual: f64 },

    #[error("inconsistent topology: {0}")]
    InvalidTopology(String),

    #[error("non-finite value produced during {phase}; step aborted")]
    NumericInstability { phase: &'static str },
}

impl SimulationError {
    /// True if the caller may retry the step (typically with a smaller
    /// timestep).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SimulationError::Convergence { .. })
    }
}
