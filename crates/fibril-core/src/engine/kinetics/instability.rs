use tracing::trace;

use crate::core::models::fiber::{DynamicState, FiberEnd};
use crate::core::models::ids::FiberId;
use crate::core::models::world::World;
use crate::core::params::{Fate, ParamSet};
use crate::core::random::SimRng;
use crate::engine::events::{EventSink, SimEvent};

/// Advances the dynamic-instability state machine of every fiber end.
///
/// Ends are visited in fiber inventory-identity order, plus end before
/// minus end, so the transition draws are reproducible for a fixed seed.
/// The end load is the projected force the last solve deposited on the
/// tip ([`crate::core::models::fiber::FiberTip::force`]). Transition
/// rates follow the loaded-growth model: antagonistic force reduces the
/// assembly speed exponentially, and since the catastrophe rate grows as
/// assembly slows, load promotes catastrophes.
///
/// Returns the fibers whose fate is destruction; the caller removes them
/// (and cleans up their attachments) within the same step.
pub fn instability_pass(
    world: &mut World,
    params: &ParamSet,
    rng: &mut SimRng,
    events: &mut EventSink,
) -> Vec<FiberId> {
    let dt = params.simul.time_step;
    let fp = &params.fiber;
    let mut doomed = Vec::new();

    for id in world.fibers_ordered() {
        let identity = world.inventory.of_fiber(id).unwrap_or(u64::MAX);
        let mut destroy = false;

        for end in FiberEnd::BOTH {
            let state = world.fibers[id].tip(end).state;
            if state == DynamicState::Inactive || destroy {
                continue;
            }
            let fiber = &mut world.fibers[id];
            let force = fiber.tip(end).force;

            match state {
                DynamicState::Inactive => {}

                DynamicState::Growing => {
                    // antagonistic force reduces assembly exponentially
                    let mut speed = fp.growing_speed;
                    if force < 0.0 && fp.growing_force.is_finite() {
                        speed *= (force / fp.growing_force).exp();
                    }
                    let growth = speed * dt;
                    if growth > 0.0 {
                        fiber.grow(end, growth);
                    }
                    fiber.tip_mut(end).fresh = growth;

                    // 1/catastrophe_rate depends linearly on assembly speed
                    let cata = fp.catastrophe_rate * dt / (1.0 + fp.catastrophe_coef * growth);
                    if rng.test(cata) {
                        let next = if force < -fp.fast_catastrophe_force {
                            DynamicState::ShrinkingFast
                        } else {
                            DynamicState::Shrinking
                        };
                        fiber.tip_mut(end).state = next;
                        events.report(SimEvent::Catastrophe {
                            fiber: identity,
                            end,
                        });
                        trace!(identity, ?end, "catastrophe");
                    } else if rng.test(fp.pause_rate * dt) {
                        fiber.tip_mut(end).state = DynamicState::Paused;
                    }
                }

                DynamicState::Paused => {
                    fiber.tip_mut(end).fresh = 0.0;
                    if rng.test(fp.unpause_rate * dt) {
                        fiber.tip_mut(end).state = DynamicState::Growing;
                        events.report(SimEvent::Rescued {
                            fiber: identity,
                            end,
                        });
                    } else if rng.test(fp.catastrophe_rate * dt) {
                        fiber.tip_mut(end).state = DynamicState::Shrinking;
                        events.report(SimEvent::Catastrophe {
                            fiber: identity,
                            end,
                        });
                    }
                }

                DynamicState::Shrinking | DynamicState::ShrinkingFast => {
                    let speed = if state == DynamicState::ShrinkingFast {
                        fp.fast_shrinking_speed.max(fp.shrinking_speed)
                    } else {
                        fp.shrinking_speed
                    };
                    let delta = -speed * dt;
                    if fiber.length() + delta <= fp.min_length {
                        match fp.fate {
                            Fate::None => {
                                fiber.tip_mut(end).fresh = 0.0;
                            }
                            Fate::Destroy => {
                                destroy = true;
                            }
                            Fate::Rescue => {
                                fiber.tip_mut(end).state = DynamicState::Growing;
                                events.report(SimEvent::Rescued {
                                    fiber: identity,
                                    end,
                                });
                            }
                        }
                    } else {
                        fiber.grow(end, delta);
                        fiber.tip_mut(end).fresh = delta;
                        if rng.test(fp.rescue_rate * dt) {
                            fiber.tip_mut(end).state = DynamicState::Growing;
                            events.report(SimEvent::Rescued {
                                fiber: identity,
                                end,
                            });
                        }
                    }
                }
            }
        }

        if destroy {
            doomed.push(id);
        } else {
            world.fibers[id].adjust_segmentation();
        }
    }
    doomed
}
