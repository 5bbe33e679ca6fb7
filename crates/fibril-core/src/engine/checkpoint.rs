use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::models::world::World;
use crate::core::random::SimRng;

/// The full mutable state of a simulation: every position, binding,
/// dynamic-instability state, the identity registry, the clock, and the
/// random generator.
///
/// Restoring a checkpoint and replaying with the same parameters
/// reproduces the trajectory of an uninterrupted run, because the random
/// generator state travels with the rest of the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub world: World,
    pub rng: SimRng,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to encode simulation state: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode simulation state: {0}")]
    Decode(#[source] bincode::Error),
}

impl Checkpoint {
    /// Serializes the state to an opaque byte sequence.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(CheckpointError::Encode)
    }

    /// Restores a state previously produced by [`Checkpoint::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        bincode::deserialize(bytes).map_err(CheckpointError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fiber::{DynamicState, Fiber};
    use crate::core::models::single::{Anchor, Single};
    use nalgebra::{Point3, Vector3};

    fn populated_state() -> Checkpoint {
        let mut rng = SimRng::seeded(42);
        let mut world = World::new();
        let fiber = world.add_fiber(Fiber::new(Point3::origin(), Vector3::x(), 2.0, 0.5));
        world.fibers[fiber].tip_plus.state = DynamicState::Growing;
        let single = world.add_single(Single::new(
            0,
            0,
            Anchor::Fixed(Point3::new(1.0, 0.1, 0.0)),
            &mut rng,
        ));
        world.singles[single].hand.attach(fiber, 1.25, &mut rng);
        world.time = 3.25;
        world.step_count = 325;
        Checkpoint { world, rng }
    }

    #[test]
    fn round_trip_preserves_the_whole_state() {
        let checkpoint = populated_state();
        let bytes = checkpoint.to_bytes().unwrap();
        let restored = Checkpoint::from_bytes(&bytes).unwrap();

        assert_eq!(restored.world.step_count, 325);
        assert_eq!(restored.world.time, 3.25);
        assert_eq!(restored.world.fibers.len(), 1);
        let fiber = restored.world.fibers.values().next().unwrap();
        assert_eq!(fiber.tip_plus.state, DynamicState::Growing);
        assert_eq!(fiber.points(), checkpoint.world.fibers.values().next().unwrap().points());
    }

    #[test]
    fn restored_rng_continues_the_same_sequence() {
        let mut checkpoint = populated_state();
        let bytes = checkpoint.to_bytes().unwrap();
        let mut restored = Checkpoint::from_bytes(&bytes).unwrap();

        for _ in 0..100 {
            assert_eq!(checkpoint.rng.uniform(), restored.rng.uniform());
        }
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let checkpoint = populated_state();
        let bytes = checkpoint.to_bytes().unwrap();
        assert!(matches!(
            Checkpoint::from_bytes(&bytes[..bytes.len() / 2]),
            Err(CheckpointError::Decode(_))
        ));
    }
}
