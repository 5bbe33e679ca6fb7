use nalgebra::Point3;
use std::sync::{Arc, Mutex};

use crate::core::models::world::{HandOwner, World};

/// Read-only copy of one committed simulation step.
///
/// Frames are immutable once published; a consumer holding an `Arc<Frame>`
/// can keep reading it while the worker advances further steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Monotonic publication counter; one per committed step.
    pub generation: u64,
    pub time: f64,
    pub step_count: u64,
    pub fibers: Vec<FiberFrame>,
    pub bindings: Vec<BindingFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiberFrame {
    pub identity: u64,
    pub points: Vec<Point3<f64>>,
    /// Assembly ordinals of (minus, plus) ends.
    pub end_states: (u8, u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingFrame {
    pub hand: HandOwner,
    /// Fiber identity and abscissa while bound.
    pub attachment: Option<(u64, f64)>,
}

impl Frame {
    /// Captures the committed state of a world.
    pub fn capture(world: &World, generation: u64) -> Self {
        let fibers = world
            .fibers_ordered()
            .into_iter()
            .map(|id| {
                let fiber = &world.fibers[id];
                FiberFrame {
                    identity: world.inventory.of_fiber(id).unwrap_or(u64::MAX),
                    points: fiber.points().to_vec(),
                    end_states: (
                        fiber.tip_minus.state.ordinal(),
                        fiber.tip_plus.state.ordinal(),
                    ),
                }
            })
            .collect();
        let bindings = world
            .hands_ordered()
            .into_iter()
            .map(|owner| {
                let attachment = match owner {
                    HandOwner::Single(id) => world.singles[id].hand.attachment(),
                    HandOwner::Couple(id, side) => world.couples[id].hand(side).attachment(),
                };
                BindingFrame {
                    hand: owner,
                    attachment: attachment
                        .and_then(|(f, a)| world.inventory.of_fiber(f).map(|id| (id, a))),
                }
            })
            .collect();
        Frame {
            generation,
            time: world.time,
            step_count: world.step_count,
            fibers,
            bindings,
        }
    }
}

/// Publication point between the simulation worker and outside readers.
///
/// The worker publishes a complete frame after each committed step; readers
/// snapshot the latest complete generation and never observe a step in
/// progress. `try_latest` never blocks: a reader that loses the race simply
/// skips one refresh cycle.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    latest: Mutex<Arc<Frame>>,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the published frame.
    pub fn publish(&self, frame: Frame) {
        let mut guard = self.latest.lock().expect("snapshot lock poisoned");
        *guard = Arc::new(frame);
    }

    /// The latest committed frame, waiting for the worker if it is
    /// publishing right now.
    pub fn latest(&self) -> Arc<Frame> {
        self.latest.lock().expect("snapshot lock poisoned").clone()
    }

    /// Non-blocking variant: `None` when the worker holds the lock.
    pub fn try_latest(&self) -> Option<Arc<Frame>> {
        self.latest.try_lock().ok().map(|guard| guard.clone())
    }
}
