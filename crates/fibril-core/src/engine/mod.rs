pub mod checkpoint;
pub mod error;
pub mod events;
pub mod grid;
pub mod kinetics;
pub mod meca;
pub mod simulation;
pub mod snapshot;
