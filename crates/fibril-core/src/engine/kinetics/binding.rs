use nalgebra::Point3;
use tracing::warn;

use crate::core::models::couple::HandSide;
use crate::core::models::hand::{Hand, HandOutcome};
use crate::core::models::ids::FiberId;
use crate::core::models::single::Anchor;
use crate::core::models::world::{HandOwner, World};
use crate::core::params::{BindPolicy, HandParams, ParamSet};
use crate::core::random::SimRng;
use crate::core::space::Space;
use crate::core::utils::geometry::project_on_segment;
use crate::engine::events::{EventSink, SimEvent};
use crate::engine::grid::FiberGrid;

/// A binding candidate after exact-distance filtering.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    fiber: FiberId,
    identity: u64,
    abscissa: f64,
    distance_sq: f64,
}

/// Selects the winning candidate under the configured policy.
///
/// Ties are always broken by the stable inventory identity (then by
/// abscissa), never by container iteration order.
fn select_candidate(candidates: &[Candidate], policy: BindPolicy) -> Option<Candidate> {
    candidates
        .iter()
        .min_by(|a, b| match policy {
            BindPolicy::NearestThenIdentity => a
                .distance_sq
                .total_cmp(&b.distance_sq)
                .then(a.identity.cmp(&b.identity))
                .then(a.abscissa.total_cmp(&b.abscissa)),
            BindPolicy::FirstByIdentity => a
                .identity
                .cmp(&b.identity)
                .then(a.distance_sq.total_cmp(&b.distance_sq))
                .then(a.abscissa.total_cmp(&b.abscissa)),
        })
        .copied()
}

/// Searches the grid around `position` and returns the selected attachment
/// site, if any candidate passes the exact-distance and compatibility
/// filters.
fn find_attachment(
    world: &World,
    grid: &FiberGrid,
    position: &Point3<f64>,
    hand_params: &HandParams,
    fiber_key_mask: u64,
    exclude: Option<FiberId>,
) -> Option<Candidate> {
    let range_sq = hand_params.binding_range * hand_params.binding_range;
    if hand_params.binding_key & fiber_key_mask == 0 {
        return None;
    }
    let mut candidates = Vec::new();
    for segment_ref in grid.candidates(position) {
        if exclude == Some(segment_ref.fiber) {
            continue;
        }
        let Some(fiber) = world.fibers.get(segment_ref.fiber) else {
            continue;
        };
        let (a, b) = fiber.segment(segment_ref.segment);
        let (t, closest) = project_on_segment(position, &a, &b);
        let distance_sq = (position - closest).norm_squared();
        if distance_sq > range_sq {
            continue;
        }
        // a candidate clamped onto a fiber extremity is an end binding
        let at_end = (segment_ref.segment == 0 && t <= 0.0)
            || (segment_ref.segment == fiber.n_segments() - 1 && t >= 1.0);
        if at_end && !hand_params.bind_also_ends {
            continue;
        }
        let Some(identity) = world.inventory.of_fiber(segment_ref.fiber) else {
            continue;
        };
        candidates.push(Candidate {
            fiber: segment_ref.fiber,
            identity,
            abscissa: fiber.abscissa_at(segment_ref.segment, t),
            distance_sq,
        });
    }
    select_candidate(&candidates, hand_params.bind_policy)
}

/// Load on a bound hand, from the geometry of its own link; used by the
/// Kramers/Bell detachment law and by motor stepping.
fn spring_force(anchor: &Point3<f64>, site: &Point3<f64>, stiffness: f64, rest: f64) -> f64 {
    let d = (site - anchor).norm();
    if rest <= 0.0 {
        stiffness * d
    } else {
        stiffness * (d - rest).abs()
    }
}

/// Advances the diffusion of every fully free single and couple, folding
/// positions back into the space.
pub fn diffusion_pass(world: &mut World, params: &ParamSet, space: &dyn Space, rng: &mut SimRng) {
    let dt = params.simul.time_step;
    for owner in world.hands_ordered() {
        match owner {
            HandOwner::Single(id) => {
                let single = &mut world.singles[id];
                if !single.hand.attached() {
                    let class = &params.singles[single.params];
                    if class.diffusion > 0.0 {
                        single.diffuse(class.diffusion, dt, rng);
                        if let Anchor::Diffusing(p) = &mut single.anchor {
                            *p = space.fold(p);
                        }
                    }
                }
            }
            // the couple diffuses once, on its first hand
            HandOwner::Couple(id, HandSide::A) => {
                let couple = &mut world.couples[id];
                if couple.n_attached() == 0 {
                    let class = &params.couples[couple.params];
                    if class.diffusion > 0.0 {
                        couple.diffuse(class.diffusion, dt, rng);
                        couple.position = space.fold(&couple.position);
                    }
                }
            }
            HandOwner::Couple(_, HandSide::B) => {}
        }
    }
}

/// One attachment/detachment sweep over every hand, in inventory-identity
/// order (couples step hand A before hand B), so the sequence of random
/// draws is reproducible for a fixed seed.
pub fn binding_pass(
    world: &mut World,
    grid: &FiberGrid,
    params: &ParamSet,
    rng: &mut SimRng,
    events: &mut EventSink,
) {
    let dt = params.simul.time_step;
    for owner in world.hands_ordered() {
        match owner {
            HandOwner::Single(id) => {
                step_single_hand(world, grid, params, rng, events, owner, id, dt);
            }
            HandOwner::Couple(id, side) => {
                step_couple_hand(world, grid, params, rng, events, owner, id, side, dt);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step_single_hand(
    world: &mut World,
    grid: &FiberGrid,
    params: &ParamSet,
    rng: &mut SimRng,
    events: &mut EventSink,
    owner: HandOwner,
    id: crate::core::models::ids::SingleId,
    dt: f64,
) {
    let single = &world.singles[id];
    let class = &params.singles[single.params];
    let hand_params = &params.hands[single.hand.params];
    let stiffness = class.stiffness;

    match single.hand.attachment() {
        None => {
            let position = single.search_position();
            let single = &mut world.singles[id];
            if single.hand.step_free(hand_params, dt, rng) {
                if let Some(candidate) = find_attachment(
                    world,
                    grid,
                    &position,
                    hand_params,
                    params.fiber.binding_key,
                    None,
                ) {
                    let single = &mut world.singles[id];
                    single.hand.attach(candidate.fiber, candidate.abscissa, rng);
                    events.report(SimEvent::Attached {
                        hand: owner,
                        fiber: candidate.identity,
                        abscissa: candidate.abscissa,
                    });
                }
            }
        }
        Some((fiber_id, abscissa)) => {
            let Some(fiber) = world.fibers.get(fiber_id) else {
                // a dangling attachment is a topology fault; recover by
                // forced detachment
                debug_assert!(false, "hand attached to a missing fiber");
                warn!("detaching hand from missing fiber");
                world.singles[id].hand.detach();
                return;
            };
            let site = fiber.pos_at(abscissa);
            let (load, anchored) = match single.anchor {
                Anchor::Fixed(g) => (spring_force(&g, &site, stiffness, 0.0), true),
                Anchor::Diffusing(_) => (0.0, false),
            };
            let fiber_identity = world.inventory.of_fiber(fiber_id).unwrap_or(u64::MAX);

            let single = &mut world.singles[id];
            if !anchored {
                // a diffusing single rides its attachment point
                single.anchor = Anchor::Diffusing(site);
            }
            let outcome = if load > 0.0 {
                single.hand.step_loaded(hand_params, load, dt, rng)
            } else {
                single.hand.step_unloaded(hand_params, dt, rng)
            };
            if let HandOutcome::Detach(reason) = outcome {
                events.report(SimEvent::Detached {
                    hand: owner,
                    fiber: fiber_identity,
                    reason,
                });
                return;
            }
            walk_motor(&mut world.singles[id].hand, hand_params, load, dt);
            let outcome = world.singles[id]
                .hand
                .reconcile(&world.fibers[fiber_id], hand_params);
            if let HandOutcome::Detach(reason) = outcome {
                events.report(SimEvent::Detached {
                    hand: owner,
                    fiber: fiber_identity,
                    reason,
                });
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step_couple_hand(
    world: &mut World,
    grid: &FiberGrid,
    params: &ParamSet,
    rng: &mut SimRng,
    events: &mut EventSink,
    owner: HandOwner,
    id: crate::core::models::ids::CoupleId,
    side: HandSide,
    dt: f64,
) {
    let couple = &world.couples[id];
    let class = &params.couples[couple.params];
    let hand_params = &params.hands[couple.hand(side).params];
    let other = match side {
        HandSide::A => HandSide::B,
        HandSide::B => HandSide::A,
    };
    let other_attachment = couple.hand(other).attachment();

    match couple.hand(side).attachment() {
        None => {
            // a free hand of a partially bound couple searches from the
            // bound hand's position; a free couple searches from its own
            let (position, exclude) = match other_attachment {
                Some((other_fiber, other_abscissa)) => {
                    let Some(fiber) = world.fibers.get(other_fiber) else {
                        return;
                    };
                    (fiber.pos_at(other_abscissa), Some(other_fiber))
                }
                None => (couple.position, None),
            };
            let couple = &mut world.couples[id];
            if couple.hand_mut(side).step_free(hand_params, dt, rng) {
                if let Some(candidate) = find_attachment(
                    world,
                    grid,
                    &position,
                    hand_params,
                    params.fiber.binding_key,
                    exclude,
                ) {
                    let couple = &mut world.couples[id];
                    couple
                        .hand_mut(side)
                        .attach(candidate.fiber, candidate.abscissa, rng);
                    couple.position = world.fibers[candidate.fiber].pos_at(candidate.abscissa);
                    events.report(SimEvent::Attached {
                        hand: owner,
                        fiber: candidate.identity,
                        abscissa: candidate.abscissa,
                    });
                }
            }
        }
        Some((fiber_id, abscissa)) => {
            let Some(fiber) = world.fibers.get(fiber_id) else {
                debug_assert!(false, "hand attached to a missing fiber");
                warn!("detaching couple hand from missing fiber");
                world.couples[id].hand_mut(side).detach();
                return;
            };
            let site = fiber.pos_at(abscissa);
            let fiber_identity = world.inventory.of_fiber(fiber_id).unwrap_or(u64::MAX);

            // load exists only while the couple bridges two fibers
            let load = match other_attachment {
                Some((other_fiber, other_abscissa)) => world
                    .fibers
                    .get(other_fiber)
                    .map(|f| {
                        spring_force(
                            &f.pos_at(other_abscissa),
                            &site,
                            class.stiffness,
                            class.length,
                        )
                    })
                    .unwrap_or(0.0),
                None => 0.0,
            };

            let couple = &mut world.couples[id];
            if other_attachment.is_none() {
                couple.position = site;
            }
            let outcome = if load > 0.0 {
                couple.hand_mut(side).step_loaded(hand_params, load, dt, rng)
            } else {
                couple.hand_mut(side).step_unloaded(hand_params, dt, rng)
            };
            if let HandOutcome::Detach(reason) = outcome {
                world.couples[id].position = site;
                events.report(SimEvent::Detached {
                    hand: owner,
                    fiber: fiber_identity,
                    reason,
                });
                return;
            }
            walk_motor(world.couples[id].hand_mut(side), hand_params, load, dt);
            let outcome = world.couples[id]
                .hand_mut(side)
                .reconcile(&world.fibers[fiber_id], hand_params);
            if let HandOutcome::Detach(reason) = outcome {
                events.report(SimEvent::Detached {
                    hand: owner,
                    fiber: fiber_identity,
                    reason,
                });
            }
        }
    }
}

/// Advances a bound motor hand along its fiber, slowed linearly by
/// antagonistic load up to the stall force.
fn walk_motor(hand: &mut Hand, hand_params: &HandParams, load: f64, dt: f64) {
    let Some(motor) = &hand_params.motor else {
        return;
    };
    let Some((_, abscissa)) = hand.attachment() else {
        return;
    };
    let factor = (1.0 - load / motor.stall_force).clamp(0.0, 1.0);
    hand.move_to(abscissa + motor.unloaded_speed * factor * dt);
}

/// Re-checks every attachment coordinate against the current fiber ranges,
/// applying the hold-or-detach end policies. Called after assembly
/// dynamics so that depolymerization past an attachment point is resolved
/// within the same step.
pub fn reconcile_pass(world: &mut World, params: &ParamSet, events: &mut EventSink) {
    for owner in world.hands_ordered() {
        let (hand_params_index, attachment) = match owner {
            HandOwner::Single(id) => {
                let single = &world.singles[id];
                (single.hand.params, single.hand.attachment())
            }
            HandOwner::Couple(id, side) => {
                let couple = &world.couples[id];
                (couple.hand(side).params, couple.hand(side).attachment())
            }
        };
        let Some((fiber_id, _)) = attachment else {
            continue;
        };
        let hand_params = &params.hands[hand_params_index];
        let Some(fiber) = world.fibers.get(fiber_id) else {
            continue;
        };
        let fiber_identity = world.inventory.of_fiber(fiber_id).unwrap_or(u64::MAX);
        let outcome = match owner {
            HandOwner::Single(id) => world.singles[id].hand.reconcile(fiber, hand_params),
            HandOwner::Couple(id, side) => {
                world.couples[id].hand_mut(side).reconcile(fiber, hand_params)
            }
        };
        if let HandOutcome::Detach(reason) = outcome {
            events.report(SimEvent::Detached {
                hand: owner,
                fiber: fiber_identity,
                reason,
            });
        }
    }
}
