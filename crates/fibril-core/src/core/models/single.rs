use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use super::hand::Hand;
use crate::core::random::SimRng;

/// How the free extremity of a single is held in space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Anchor {
    /// Grafted at a fixed position.
    Fixed(Point3<f64>),
    /// Diffusing freely; the position is advanced by a random walk while
    /// the hand is unbound.
    Diffusing(Point3<f64>),
}

impl Anchor {
    pub fn position(&self) -> Point3<f64> {
        match self {
            Anchor::Fixed(p) | Anchor::Diffusing(p) => *p,
        }
    }
}

/// A composite object owning one hand, with the other extremity anchored
/// or diffusing.
///
/// When the hand is bound, the anchor spring contributes a Hookean link
/// between the anchor point and the attachment site to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Single {
    pub hand: Hand,
    pub anchor: Anchor,
    /// Index of this single's class in `ParamSet::singles`.
    pub params: usize,
}

impl Single {
    pub fn new(params: usize, hand_params: usize, anchor: Anchor, rng: &mut SimRng) -> Self {
        Self {
            hand: Hand::new(hand_params, rng),
            anchor,
            params,
        }
    }

    /// Location used for attachment searches: the anchor point while the
    /// hand is free.
    pub fn search_position(&self) -> Point3<f64> {
        self.anchor.position()
    }

    /// Brownian displacement of a free, diffusing single over `dt`.
    pub fn diffuse(&mut self, diffusion: f64, dt: f64, rng: &mut SimRng) {
        if let Anchor::Diffusing(p) = &mut self.anchor {
            let sigma = (2.0 * diffusion * dt).sqrt();
            p.x += sigma * rng.gauss();
            p.y += sigma * rng.gauss();
            p.z += sigma * rng.gauss();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_anchor_does_not_diffuse() {
        let mut rng = SimRng::seeded(1);
        let origin = Point3::new(1.0, 0.0, 0.0);
        let mut single = Single::new(0, 0, Anchor::Fixed(origin), &mut rng);
        single.diffuse(1.0, 0.1, &mut rng);
        assert_eq!(single.search_position(), origin);
    }

    #[test]
    fn diffusing_anchor_spreads_as_sqrt_of_time() {
        let mut rng = SimRng::seeded(2);
        let diffusion = 0.5;
        let dt = 0.01;
        let steps = 100;
        let trials = 2_000;

        let mut msd = 0.0;
        for _ in 0..trials {
            let mut single = Single::new(0, 0, Anchor::Diffusing(Point3::origin()), &mut rng);
            for _ in 0..steps {
                single.diffuse(diffusion, dt, &mut rng);
            }
            msd += single.search_position().coords.norm_squared();
        }
        msd /= trials as f64;

        // <r^2> = 6 D t in three dimensions
        let expected = 6.0 * diffusion * dt * steps as f64;
        assert_relative_eq!(msd, expected, max_relative = 0.1);
    }
}
