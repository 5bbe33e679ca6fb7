use crate::core::space::{BoxSpace, PeriodicSpace, Space, SphereSpace};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while validating or loading parameters.
///
/// All of these are fatal before the simulation starts; nothing is ever
/// constructed from an invalid parameter set.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("parameter `{name}` is out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    #[error("object `{kind}[{index}]` references unknown `{target}` index {value}")]
    BadReference {
        kind: &'static str,
        index: usize,
        target: &'static str,
        value: usize,
    },

    #[error("failed to parse parameter file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ParamError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("expected a positive finite value, got {value}"),
        })
    }
}

fn require_non_negative(name: &'static str, value: f64) -> Result<(), ParamError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("expected a non-negative finite value, got {value}"),
        })
    }
}

/// Global simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulParams {
    /// Integration timestep.
    pub time_step: f64,
    /// Thermal energy scale; zero disables Brownian forcing.
    #[serde(default)]
    pub kt: f64,
    /// Viscosity of the medium, entering every drag coefficient.
    pub viscosity: f64,
    /// Relative residual tolerance of the iterative solver.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Iteration cap of the iterative solver; exceeding it is a
    /// recoverable `Convergence` error, never a silently accepted state.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Seed of the process-wide random source.
    #[serde(default)]
    pub seed: u64,
    /// Confinement stiffness applied to points pushed outside the space.
    #[serde(default = "default_confine_stiffness")]
    pub confine_stiffness: f64,
    /// Stiffness of the springs maintaining rigid-aggregate geometry.
    #[serde(default = "default_rigid_stiffness")]
    pub rigid_stiffness: f64,
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_max_iterations() -> usize {
    500
}

fn default_confine_stiffness() -> f64 {
    100.0
}

fn default_rigid_stiffness() -> f64 {
    1000.0
}

impl SimulParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        require_positive("simul.time_step", self.time_step)?;
        require_non_negative("simul.kt", self.kt)?;
        require_positive("simul.viscosity", self.viscosity)?;
        require_positive("simul.tolerance", self.tolerance)?;
        if self.max_iterations == 0 {
            return Err(ParamError::OutOfRange {
                name: "simul.max_iterations",
                reason: "iteration cap must be at least 1".into(),
            });
        }
        require_non_negative("simul.confine_stiffness", self.confine_stiffness)?;
        require_non_negative("simul.rigid_stiffness", self.rigid_stiffness)
    }
}

/// What happens to a fiber whose length reaches `min_length` while
/// shrinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fate {
    /// Hold at minimal length.
    None,
    /// Remove the fiber from the simulation.
    Destroy,
    /// Switch the end back to growth.
    Rescue,
}

/// Parameters shared by all fibers of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiberParams {
    /// Target distance between consecutive model points.
    pub segmentation: f64,
    /// Bending rigidity (elastic modulus for curvature).
    pub rigidity: f64,
    /// Stiffness of the stretching springs along each segment.
    #[serde(default = "default_stretch_stiffness")]
    pub stretch_stiffness: f64,
    /// Drag coefficient per unit length.
    pub drag_per_length: f64,
    /// Polymerization speed of a growing end, before force modulation.
    #[serde(default)]
    pub growing_speed: f64,
    /// Depolymerization speed of a shrinking end (positive number).
    #[serde(default)]
    pub shrinking_speed: f64,
    /// Depolymerization speed of a fast-shrinking end (positive number).
    #[serde(default)]
    pub fast_shrinking_speed: f64,
    /// Characteristic force reducing growth, `speed * exp(f / growing_force)`
    /// for antagonistic `f < 0`.
    #[serde(default = "default_growing_force")]
    pub growing_force: f64,
    /// Spontaneous catastrophe rate of an unloaded growing end.
    #[serde(default)]
    pub catastrophe_rate: f64,
    /// Growth-coupling of the catastrophe rate: the effective rate is
    /// `catastrophe_rate / (1 + coef * growth_per_step)`.
    #[serde(default)]
    pub catastrophe_coef: f64,
    /// Rate at which a shrinking end is rescued back to growth.
    #[serde(default)]
    pub rescue_rate: f64,
    /// Rate at which a growing end pauses.
    #[serde(default)]
    pub pause_rate: f64,
    /// Rate at which a paused end resumes growth.
    #[serde(default)]
    pub unpause_rate: f64,
    /// Antagonistic end load (in force units) beyond which a catastrophe
    /// enters the fast-shrinking state.
    #[serde(default = "default_fast_catastrophe_force")]
    pub fast_catastrophe_force: f64,
    /// Length below which `fate` applies.
    #[serde(default = "default_min_length")]
    pub min_length: f64,
    /// Terminal behavior at `min_length`.
    #[serde(default = "default_fate")]
    pub fate: Fate,
    /// Bitmask matched against `HandParams::binding_key`; a hand may bind
    /// only if the bitwise AND is non-zero.
    #[serde(default = "default_binding_key")]
    pub binding_key: u64,
    /// Stiffness of the confinement clamp, overriding the global value
    /// when set.
    #[serde(default)]
    pub confine_stiffness: Option<f64>,
}

fn default_stretch_stiffness() -> f64 {
    500.0
}

fn default_growing_force() -> f64 {
    f64::INFINITY
}

fn default_fast_catastrophe_force() -> f64 {
    f64::INFINITY
}

fn default_min_length() -> f64 {
    0.01
}

fn default_fate() -> Fate {
    Fate::Destroy
}

fn default_binding_key() -> u64 {
    u64::MAX
}

impl FiberParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        require_positive("fiber.segmentation", self.segmentation)?;
        require_non_negative("fiber.rigidity", self.rigidity)?;
        require_positive("fiber.stretch_stiffness", self.stretch_stiffness)?;
        require_positive("fiber.drag_per_length", self.drag_per_length)?;
        require_non_negative("fiber.growing_speed", self.growing_speed)?;
        require_non_negative("fiber.shrinking_speed", self.shrinking_speed)?;
        require_non_negative("fiber.fast_shrinking_speed", self.fast_shrinking_speed)?;
        require_non_negative("fiber.catastrophe_rate", self.catastrophe_rate)?;
        require_non_negative("fiber.catastrophe_coef", self.catastrophe_coef)?;
        require_non_negative("fiber.rescue_rate", self.rescue_rate)?;
        require_non_negative("fiber.pause_rate", self.pause_rate)?;
        require_non_negative("fiber.unpause_rate", self.unpause_rate)?;
        require_positive("fiber.min_length", self.min_length)?;
        if !(self.growing_force > 0.0) {
            return Err(ParamError::OutOfRange {
                name: "fiber.growing_force",
                reason: "characteristic force must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Tie-break policy used to select among simultaneous binding candidates
/// within the capture radius.
///
/// The default picks the candidate at the smallest exact distance, breaking
/// ties by the lowest inventory identity. Candidate ordering never depends
/// on container iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindPolicy {
    #[default]
    NearestThenIdentity,
    FirstByIdentity,
}

/// Motor behavior of a bound hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorParams {
    /// Walking speed along the fiber without load. Negative speeds walk
    /// toward the minus end.
    pub unloaded_speed: f64,
    /// Antagonistic load at which the motor stalls.
    pub stall_force: f64,
}

impl MotorParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if !self.unloaded_speed.is_finite() {
            return Err(ParamError::OutOfRange {
                name: "hand.motor.unloaded_speed",
                reason: "speed must be finite".into(),
            });
        }
        require_positive("hand.motor.stall_force", self.stall_force)
    }
}

/// Parameters of one hand class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandParams {
    /// Attachment rate of a free hand.
    pub binding_rate: f64,
    /// Capture radius of the attachment search.
    pub binding_range: f64,
    /// Bitmask matched against `FiberParams::binding_key`.
    #[serde(default = "default_binding_key")]
    pub binding_key: u64,
    /// Basal detachment rate `k0`.
    pub unbinding_rate: f64,
    /// Characteristic detachment force `F0` of the Kramers/Bell law
    /// `k_off(F) = k0 * exp(F / F0)`; infinite disables the force
    /// dependence.
    #[serde(default = "default_unbinding_force")]
    pub unbinding_force: f64,
    /// Whether a hand may bind directly at a fiber end when the projected
    /// attachment point falls outside the fiber.
    #[serde(default)]
    pub bind_also_ends: bool,
    /// Keep holding a growing end instead of detaching when pushed past it.
    #[serde(default)]
    pub hold_growing_end: bool,
    /// Keep holding a shrinking end instead of detaching when the end
    /// depolymerizes past the attachment point.
    #[serde(default)]
    pub hold_shrinking_end: bool,
    /// Candidate selection policy.
    #[serde(default)]
    pub bind_policy: BindPolicy,
    /// Motor activity, if any.
    #[serde(default)]
    pub motor: Option<MotorParams>,
}

fn default_unbinding_force() -> f64 {
    f64::INFINITY
}

impl HandParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        require_non_negative("hand.binding_rate", self.binding_rate)?;
        require_positive("hand.binding_range", self.binding_range)?;
        require_non_negative("hand.unbinding_rate", self.unbinding_rate)?;
        if !(self.unbinding_force > 0.0) {
            return Err(ParamError::OutOfRange {
                name: "hand.unbinding_force",
                reason: "characteristic force must be positive".into(),
            });
        }
        if let Some(motor) = &self.motor {
            motor.validate()?;
        }
        Ok(())
    }
}

/// Parameters of one single class (one hand, one anchor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleParams {
    /// Index into `ParamSet::hands`.
    pub hand: usize,
    /// Stiffness of the anchor spring.
    pub stiffness: f64,
    /// Diffusion coefficient of the free, unanchored state.
    #[serde(default)]
    pub diffusion: f64,
}

impl SingleParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        require_non_negative("single.stiffness", self.stiffness)?;
        require_non_negative("single.diffusion", self.diffusion)
    }
}

/// Parameters of one couple class (two hands bridged by a spring).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoupleParams {
    /// Index into `ParamSet::hands` for the first hand.
    pub hand_a: usize,
    /// Index into `ParamSet::hands` for the second hand.
    pub hand_b: usize,
    /// Stiffness of the bridging spring.
    pub stiffness: f64,
    /// Resting length of the bridge; zero makes the couple "short"
    /// (both heads colocated, treated as a rigid link).
    #[serde(default)]
    pub length: f64,
    /// Diffusion coefficient of the free state.
    #[serde(default)]
    pub diffusion: f64,
}

impl CoupleParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        require_non_negative("couple.stiffness", self.stiffness)?;
        require_non_negative("couple.length", self.length)?;
        require_non_negative("couple.diffusion", self.diffusion)
    }

    /// True if both heads are colocated and the link is rigid.
    pub fn is_short(&self) -> bool {
        self.length <= 0.0
    }
}

/// Description of the confinement geometry, resolved into a [`Space`]
/// capability at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SpaceSpec {
    Box { half: [f64; 3] },
    Periodic { half: [f64; 3] },
    Sphere { radius: f64 },
}

impl SpaceSpec {
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            SpaceSpec::Box { half } | SpaceSpec::Periodic { half } => {
                for v in half {
                    require_positive("space.half", *v)?;
                }
                Ok(())
            }
            SpaceSpec::Sphere { radius } => require_positive("space.radius", *radius),
        }
    }

    /// Builds the geometric capability object.
    pub fn build(&self) -> Arc<dyn Space> {
        match self {
            SpaceSpec::Box { half } => Arc::new(BoxSpace::new(Vector3::from(*half))),
            SpaceSpec::Periodic { half } => Arc::new(PeriodicSpace::new(Vector3::from(*half))),
            SpaceSpec::Sphere { radius } => Arc::new(SphereSpace::new(*radius)),
        }
    }
}

/// The complete, validated parameter vocabulary of one simulation.
///
/// Objects reference their class by dense index (`Single::params`,
/// `Couple::params`, ...), so the set must stay immutable for the lifetime
/// of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    pub simul: SimulParams,
    pub space: SpaceSpec,
    pub fiber: FiberParams,
    #[serde(default)]
    pub hands: Vec<HandParams>,
    #[serde(default)]
    pub singles: Vec<SingleParams>,
    #[serde(default)]
    pub couples: Vec<CoupleParams>,
}

impl ParamSet {
    /// Parses a parameter set from TOML text and validates it.
    pub fn from_toml(text: &str) -> Result<Self, ParamError> {
        let set: ParamSet = toml::from_str(text)?;
        set.validate()?;
        Ok(set)
    }

    /// Checks every scalar range and every cross-reference.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.simul.validate()?;
        self.space.validate()?;
        self.fiber.validate()?;
        for hand in &self.hands {
            hand.validate()?;
        }
        for (index, single) in self.singles.iter().enumerate() {
            single.validate()?;
            if single.hand >= self.hands.len() {
                return Err(ParamError::BadReference {
                    kind: "single",
                    index,
                    target: "hand",
                    value: single.hand,
                });
            }
        }
        for (index, couple) in self.couples.iter().enumerate() {
            couple.validate()?;
            for hand in [couple.hand_a, couple.hand_b] {
                if hand >= self.hands.len() {
                    return Err(ParamError::BadReference {
                        kind: "couple",
                        index,
                        target: "hand",
                        value: hand,
                    });
                }
            }
        }
        Ok(())
    }

    /// The largest capture radius over all hand classes, used to size the
    /// attachment grid once at setup.
    pub fn max_binding_range(&self) -> f64 {
        self.hands
            .iter()
            .map(|h| h.binding_range)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> &'static str {
        r#"
        [simul]
        time_step = 0.01
        kt = 0.0042
        viscosity = 1.0
        seed = 1

        [space]
        shape = "box"
        half = [5.0, 5.0, 5.0]

        [fiber]
        segmentation = 0.5
        rigidity = 0.075
        drag_per_length = 1.0
        growing_speed = 0.2
        shrinking_speed = 0.5
        catastrophe_rate = 0.05
        rescue_rate = 0.01

        [[hands]]
        binding_rate = 5.0
        binding_range = 0.1
        unbinding_rate = 1.0
        unbinding_force = 3.0

        [[singles]]
        hand = 0
        stiffness = 100.0
        diffusion = 0.1

        [[couples]]
        hand_a = 0
        hand_b = 0
        stiffness = 100.0
        length = 0.05
        "#
    }

    #[test]
    fn well_formed_toml_parses_and_validates() {
        let set = ParamSet::from_toml(base_toml()).unwrap();
        assert_eq!(set.hands.len(), 1);
        assert_eq!(set.singles.len(), 1);
        assert_eq!(set.couples.len(), 1);
        assert_eq!(set.max_binding_range(), 0.1);
        assert!(!set.couples[0].is_short());
    }

    #[test]
    fn negative_time_step_is_rejected() {
        let text = base_toml().replace("time_step = 0.01", "time_step = -0.01");
        let err = ParamSet::from_toml(&text).unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { name, .. } if name == "simul.time_step"));
    }

    #[test]
    fn dangling_hand_reference_is_rejected() {
        let text = base_toml().replace("hand = 0", "hand = 7");
        let err = ParamSet::from_toml(&text).unwrap_err();
        assert!(matches!(
            err,
            ParamError::BadReference { kind: "single", target: "hand", value: 7, .. }
        ));
    }

    #[test]
    fn zero_length_couple_is_short() {
        let params = CoupleParams {
            hand_a: 0,
            hand_b: 0,
            stiffness: 10.0,
            length: 0.0,
            diffusion: 0.0,
        };
        assert!(params.is_short());
    }

    #[test]
    fn defaults_fill_optional_kinetic_fields() {
        let set = ParamSet::from_toml(base_toml()).unwrap();
        assert_eq!(set.fiber.fate, Fate::Destroy);
        assert_eq!(set.fiber.binding_key, u64::MAX);
        assert!(set.fiber.growing_force.is_infinite());
        assert_eq!(set.hands[0].bind_policy, BindPolicy::NearestThenIdentity);
        assert!(set.hands[0].motor.is_none());
    }

    #[test]
    fn loading_from_a_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.toml");
        std::fs::write(&path, base_toml()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let set = ParamSet::from_toml(&text).unwrap();
        assert_eq!(set.simul.seed, 1);
    }
}
