//! # Fibril Core Library
//!
//! A discrete-time simulation core for cytoskeletal filaments
//! (semi-flexible polymers) and the motor and crosslinking proteins that
//! bind, walk on, and mechanically couple them, confined inside geometric
//! boundaries.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure
//! a clear separation of concerns, making it modular, testable, and
//! extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models (fibers,
//!   hands, couples, the `World` arena with its identity inventory), the
//!   geometric `Space` capability, validated parameter sets, and the
//!   seeded random source every stochastic decision draws from.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer advances the
//!   simulation: the spatial `FiberGrid` answering proximity queries in
//!   near-constant time, the mechanical solver `Meca` assembling and
//!   solving the implicit per-step linear system, the binding/unbinding
//!   and dynamic-instability state machines, and the step driver with its
//!   snapshot and checkpoint plumbing.
//!
//! - **[`workflows`]: The Public API.** This is the highest-level,
//!   user-facing layer. It ties the `engine` and `core` together to run
//!   complete simulations with event delivery and a per-step retry policy.

pub mod core;
pub mod engine;
pub mod workflows;
