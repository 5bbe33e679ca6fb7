use serde::{Deserialize, Serialize};

use super::fiber::{Fiber, FiberEnd};
use super::ids::FiberId;
use crate::core::params::HandParams;
use crate::core::random::SimRng;

/// Binding state of a hand.
///
/// An attached hand references its fiber by arena key plus an arclength
/// coordinate, never by an index into the point array: fiber points are
/// re-discretized freely between steps and only the abscissa is stable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HandState {
    Free,
    Attached { fiber: FiberId, abscissa: f64 },
}

/// Why a hand let go of its fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetachReason {
    /// The basal-rate countdown fired.
    Spontaneous,
    /// The Kramers/Bell loaded countdown fired.
    ForceInduced,
    /// The attachment coordinate was pushed outside the fiber; this path
    /// is unconditional, not probabilistic.
    OffEnd,
    /// The fiber itself was destroyed.
    FiberLost,
}

/// Outcome of one kinetic step of a bound hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandOutcome {
    Hold,
    Detach(DetachReason),
}

/// A binding site of a motor or crosslink arm.
///
/// Attachment and detachment both run on Gillespie countdowns: an
/// exponential deviate is armed on every (re)binding and decremented by
/// `rate * dt` each step, which reproduces the per-step transition
/// probability `1 - exp(-rate * dt)` while spending one random draw per
/// transition instead of one per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub state: HandState,
    /// Index of this hand's class in `ParamSet::hands`.
    pub params: usize,
    next_attach: f64,
    next_detach: f64,
}

impl Hand {
    pub fn new(params: usize, rng: &mut SimRng) -> Self {
        Self {
            state: HandState::Free,
            params,
            next_attach: rng.exponential(),
            next_detach: rng.exponential(),
        }
    }

    pub fn attached(&self) -> bool {
        matches!(self.state, HandState::Attached { .. })
    }

    pub fn attachment(&self) -> Option<(FiberId, f64)> {
        match self.state {
            HandState::Free => None,
            HandState::Attached { fiber, abscissa } => Some((fiber, abscissa)),
        }
    }

    /// Binds to `fiber` at `abscissa` and re-arms the detachment countdown.
    pub fn attach(&mut self, fiber: FiberId, abscissa: f64, rng: &mut SimRng) {
        debug_assert!(!self.attached());
        self.state = HandState::Attached { fiber, abscissa };
        self.next_detach = rng.exponential();
    }

    pub fn detach(&mut self) {
        debug_assert!(self.attached());
        self.state = HandState::Free;
    }

    /// Moves the attachment coordinate; the caller is responsible for
    /// range handling via [`Hand::reconcile`].
    pub fn move_to(&mut self, new_abscissa: f64) {
        if let HandState::Attached { abscissa, .. } = &mut self.state {
            *abscissa = new_abscissa;
        }
    }

    /// Re-points the attachment at another fiber, keeping the abscissa.
    /// Used when a severed fiber transfers its distal binders to the new
    /// piece, whose coordinate range continues the old one.
    pub fn transfer_to(&mut self, new_fiber: FiberId) {
        if let HandState::Attached { fiber, .. } = &mut self.state {
            *fiber = new_fiber;
        }
    }

    /// Advances the attachment countdown of a free hand. Returns true when
    /// the countdown fired and an attachment attempt should be made; the
    /// countdown is re-armed either way.
    pub fn step_free(&mut self, params: &HandParams, dt: f64, rng: &mut SimRng) -> bool {
        debug_assert!(!self.attached());
        self.next_attach -= params.binding_rate * dt;
        if self.next_attach <= 0.0 {
            self.next_attach = rng.exponential();
            true
        } else {
            false
        }
    }

    /// Kinetic step of a bound, unloaded hand: constant-rate detachment.
    pub fn step_unloaded(&mut self, params: &HandParams, dt: f64, rng: &mut SimRng) -> HandOutcome {
        debug_assert!(self.attached());
        self.next_detach -= params.unbinding_rate * dt;
        if self.next_detach <= 0.0 {
            self.next_detach = rng.exponential();
            self.detach();
            HandOutcome::Detach(DetachReason::Spontaneous)
        } else {
            HandOutcome::Hold
        }
    }

    /// Kinetic step of a bound hand under load `force`, following the
    /// Kramers/Bell law `k_off(F) = k0 * exp(F / F0)`.
    pub fn step_loaded(
        &mut self,
        params: &HandParams,
        force: f64,
        dt: f64,
        rng: &mut SimRng,
    ) -> HandOutcome {
        debug_assert!(self.attached());
        let rate = params.unbinding_rate * dt;
        // the exponential can overflow to infinity; avoid 0 * inf
        if rate > 0.0 {
            self.next_detach -= rate * (force / params.unbinding_force).exp();
            if self.next_detach <= 0.0 {
                self.next_detach = rng.exponential();
                self.detach();
                return HandOutcome::Detach(DetachReason::ForceInduced);
            }
        }
        HandOutcome::Hold
    }

    /// Enforces the attachment-range invariant after fiber assembly or
    /// motor stepping: a coordinate outside `[abscissa_m, abscissa_p]`
    /// either clamps to the end (hold policy) or detaches unconditionally.
    pub fn reconcile(&mut self, fiber: &Fiber, params: &HandParams) -> HandOutcome {
        let Some((_, abscissa)) = self.attachment() else {
            return HandOutcome::Hold;
        };
        if fiber.covers(abscissa) {
            return HandOutcome::Hold;
        }
        let end = if abscissa < fiber.abscissa_m() {
            FiberEnd::Minus
        } else {
            FiberEnd::Plus
        };
        let hold = if fiber.tip(end).state.is_shrinking() {
            params.hold_shrinking_end
        } else {
            params.hold_growing_end
        };
        if hold {
            self.move_to(fiber.abscissa_of_end(end));
            HandOutcome::Hold
        } else {
            self.detach();
            HandOutcome::Detach(DetachReason::OffEnd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fiber::DynamicState;
    use nalgebra::{Point3, Vector3};
    use slotmap::SlotMap;

    fn test_params() -> HandParams {
        HandParams {
            binding_rate: 10.0,
            binding_range: 0.1,
            binding_key: u64::MAX,
            unbinding_rate: 1.0,
            unbinding_force: 1.0,
            bind_also_ends: false,
            hold_growing_end: false,
            hold_shrinking_end: false,
            bind_policy: Default::default(),
            motor: None,
        }
    }

    fn fiber_key() -> FiberId {
        let mut map: SlotMap<FiberId, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn attach_and_detach_round_trip() {
        let mut rng = SimRng::seeded(1);
        let mut hand = Hand::new(0, &mut rng);
        assert!(!hand.attached());

        let id = fiber_key();
        hand.attach(id, 0.5, &mut rng);
        assert_eq!(hand.attachment(), Some((id, 0.5)));

        hand.detach();
        assert!(hand.attachment().is_none());
    }

    #[test]
    fn free_hand_fires_at_the_configured_rate() {
        let mut rng = SimRng::seeded(2);
        let params = test_params();
        let dt = 0.01;
        let n = 100_000;

        // independent trials: a fresh countdown per hand, one step each
        let fired = (0..n)
            .filter(|_| Hand::new(0, &mut rng).step_free(&params, dt, &mut rng))
            .count();

        // expected per-step probability 1 - exp(-k dt)
        let p = 1.0 - (-params.binding_rate * dt).exp();
        let sigma = (p * (1.0 - p) / n as f64).sqrt();
        let p_hat = fired as f64 / n as f64;
        assert!(
            (p_hat - p).abs() < 3.5 * sigma,
            "observed {p_hat}, expected {p} +- {sigma}"
        );
    }

    #[test]
    fn loaded_detachment_follows_the_bell_law() {
        // with k0 = 1 and F0 = 1, a load of 2 must detach with per-step
        // probability 1 - exp(-exp(2) dt)
        let mut rng = SimRng::seeded(3);
        let params = test_params();
        let dt = 0.001;
        let force = 2.0;
        let trials = 10_000;
        let id = fiber_key();

        let mut detached = 0usize;
        for _ in 0..trials {
            let mut hand = Hand::new(0, &mut rng);
            hand.attach(id, 0.5, &mut rng);
            if hand.step_loaded(&params, force, dt, &mut rng) != HandOutcome::Hold {
                detached += 1;
            }
        }

        let p = 1.0 - (-(force).exp() * dt).exp();
        let sigma = (p * (1.0 - p) / trials as f64).sqrt();
        let p_hat = detached as f64 / trials as f64;
        assert!(
            (p_hat - p).abs() < 3.5 * sigma,
            "observed {p_hat}, expected {p} +- {sigma}"
        );
    }

    #[test]
    fn unloaded_detachment_matches_the_basal_rate() {
        let mut rng = SimRng::seeded(4);
        let params = test_params();
        let dt = 0.01;
        let trials = 50_000;
        let id = fiber_key();

        let mut detached = 0usize;
        for _ in 0..trials {
            let mut hand = Hand::new(0, &mut rng);
            hand.attach(id, 0.5, &mut rng);
            if hand.step_unloaded(&params, dt, &mut rng) != HandOutcome::Hold {
                detached += 1;
            }
        }

        let p = 1.0 - (-params.unbinding_rate * dt).exp();
        let sigma = (p * (1.0 - p) / trials as f64).sqrt();
        let p_hat = detached as f64 / trials as f64;
        assert!((p_hat - p).abs() < 3.5 * sigma);
    }

    #[test]
    fn off_end_coordinate_forces_detachment() {
        let mut rng = SimRng::seeded(5);
        let params = test_params();
        let fiber = Fiber::new(Point3::origin(), Vector3::x(), 2.0, 0.5);
        let id = fiber_key();

        let mut hand = Hand::new(0, &mut rng);
        hand.attach(id, 2.5, &mut rng);
        let outcome = hand.reconcile(&fiber, &params);
        assert_eq!(outcome, HandOutcome::Detach(DetachReason::OffEnd));
        assert!(!hand.attached());
    }

    #[test]
    fn hold_policy_clamps_to_the_end_instead() {
        let mut rng = SimRng::seeded(6);
        let mut params = test_params();
        params.hold_shrinking_end = true;
        let mut fiber = Fiber::new(Point3::origin(), Vector3::x(), 2.0, 0.5);
        fiber.tip_plus.state = DynamicState::Shrinking;
        let id = fiber_key();

        let mut hand = Hand::new(0, &mut rng);
        hand.attach(id, 2.5, &mut rng);
        assert_eq!(hand.reconcile(&fiber, &params), HandOutcome::Hold);
        assert_eq!(hand.attachment(), Some((id, 2.0)));
    }

    #[test]
    fn in_range_coordinate_is_left_alone() {
        let mut rng = SimRng::seeded(7);
        let params = test_params();
        let fiber = Fiber::new(Point3::origin(), Vector3::x(), 2.0, 0.5);
        let id = fiber_key();

        let mut hand = Hand::new(0, &mut rng);
        hand.attach(id, 1.0, &mut rng);
        assert_eq!(hand.reconcile(&fiber, &params), HandOutcome::Hold);
        assert_eq!(hand.attachment(), Some((id, 1.0)));
    }
}
