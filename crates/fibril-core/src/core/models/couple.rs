use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use super::hand::Hand;
use crate::core::random::SimRng;

/// Which of the two hands of a couple is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandSide {
    A,
    B,
}

impl HandSide {
    pub const BOTH: [HandSide; 2] = [HandSide::A, HandSide::B];
}

/// A composite object owning two hands, crosslinking two attachment
/// points on the same or different fibers.
///
/// While both hands are bound, the bridge contributes a spring term to the
/// solver: a rigid zero-length link for "short" couples, an elastic link of
/// resting length `CoupleParams::length` for "long" ones. With at most one
/// hand bound the couple follows that attachment point; fully unbound it
/// diffuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Couple {
    pub hand_a: Hand,
    pub hand_b: Hand,
    /// Position of the free complex; meaningful while not fully bound.
    pub position: Point3<f64>,
    /// Index of this couple's class in `ParamSet::couples`.
    pub params: usize,
}

impl Couple {
    pub fn new(
        params: usize,
        hand_a_params: usize,
        hand_b_params: usize,
        position: Point3<f64>,
        rng: &mut SimRng,
    ) -> Self {
        Self {
            hand_a: Hand::new(hand_a_params, rng),
            hand_b: Hand::new(hand_b_params, rng),
            position,
            params,
        }
    }

    pub fn hand(&self, side: HandSide) -> &Hand {
        match side {
            HandSide::A => &self.hand_a,
            HandSide::B => &self.hand_b,
        }
    }

    pub fn hand_mut(&mut self, side: HandSide) -> &mut Hand {
        match side {
            HandSide::A => &mut self.hand_a,
            HandSide::B => &mut self.hand_b,
        }
    }

    /// Number of bound hands: 0 (free), 1 (attached), or 2 (bridging).
    pub fn n_attached(&self) -> usize {
        self.hand_a.attached() as usize + self.hand_b.attached() as usize
    }

    pub fn is_bridging(&self) -> bool {
        self.n_attached() == 2
    }

    /// Brownian displacement of a fully free couple over `dt`.
    pub fn diffuse(&mut self, diffusion: f64, dt: f64, rng: &mut SimRng) {
        debug_assert_eq!(self.n_attached(), 0);
        let sigma = (2.0 * diffusion * dt).sqrt();
        self.position.x += sigma * rng.gauss();
        self.position.y += sigma * rng.gauss();
        self.position.z += sigma * rng.gauss();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::FiberId;
    use slotmap::SlotMap;

    fn fiber_key() -> FiberId {
        let mut map: SlotMap<FiberId, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn attachment_count_tracks_both_hands() {
        let mut rng = SimRng::seeded(1);
        let mut couple = Couple::new(0, 0, 0, Point3::origin(), &mut rng);
        assert_eq!(couple.n_attached(), 0);
        assert!(!couple.is_bridging());

        let id = fiber_key();
        couple.hand_a.attach(id, 0.3, &mut rng);
        assert_eq!(couple.n_attached(), 1);

        couple.hand_b.attach(id, 0.8, &mut rng);
        assert!(couple.is_bridging());

        couple.hand_a.detach();
        assert_eq!(couple.n_attached(), 1);
    }

    #[test]
    fn hand_accessors_address_the_right_side() {
        let mut rng = SimRng::seeded(2);
        let mut couple = Couple::new(0, 3, 4, Point3::origin(), &mut rng);
        assert_eq!(couple.hand(HandSide::A).params, 3);
        assert_eq!(couple.hand(HandSide::B).params, 4);
        couple.hand_mut(HandSide::B).params = 5;
        assert_eq!(couple.hand_b.params, 5);
    }
}
