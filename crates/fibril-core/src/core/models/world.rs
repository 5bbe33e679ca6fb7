use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::BTreeMap;
use tracing::trace;

use super::couple::{Couple, HandSide};
use super::fiber::Fiber;
use super::ids::{CoupleId, FiberId, SingleId, SolidId};
use super::single::Single;
use super::solid::Solid;

/// A reference to any simulable object, by arena key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectRef {
    Fiber(FiberId),
    Solid(SolidId),
    Single(SingleId),
    Couple(CoupleId),
}

/// Identifies one hand by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandOwner {
    Single(SingleId),
    Couple(CoupleId, HandSide),
}

/// The process-wide identity registry.
///
/// Every object receives a dense `u64` identity at creation. Identities are
/// strictly increasing and never reused within a session, so a saved
/// attachment or a recorded event can always be resolved (or recognized as
/// stale) later. The ordered map doubles as the canonical, deterministic
/// iteration order of the kinetics passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    next_identity: u64,
    by_identity: BTreeMap<u64, ObjectRef>,
    fibers: SecondaryMap<FiberId, u64>,
    solids: SecondaryMap<SolidId, u64>,
    singles: SecondaryMap<SingleId, u64>,
    couples: SecondaryMap<CoupleId, u64>,
}

impl Inventory {
    fn issue(&mut self, object: ObjectRef) -> u64 {
        let identity = self.next_identity;
        self.next_identity += 1;
        self.by_identity.insert(identity, object);
        match object {
            ObjectRef::Fiber(id) => {
                self.fibers.insert(id, identity);
            }
            ObjectRef::Solid(id) => {
                self.solids.insert(id, identity);
            }
            ObjectRef::Single(id) => {
                self.singles.insert(id, identity);
            }
            ObjectRef::Couple(id) => {
                self.couples.insert(id, identity);
            }
        }
        identity
    }

    fn release(&mut self, object: ObjectRef) -> Option<u64> {
        let identity = match object {
            ObjectRef::Fiber(id) => self.fibers.remove(id),
            ObjectRef::Solid(id) => self.solids.remove(id),
            ObjectRef::Single(id) => self.singles.remove(id),
            ObjectRef::Couple(id) => self.couples.remove(id),
        }?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    pub fn resolve(&self, identity: u64) -> Option<ObjectRef> {
        self.by_identity.get(&identity).copied()
    }

    pub fn of_fiber(&self, id: FiberId) -> Option<u64> {
        self.fibers.get(id).copied()
    }

    pub fn of_solid(&self, id: SolidId) -> Option<u64> {
        self.solids.get(id).copied()
    }

    pub fn of_single(&self, id: SingleId) -> Option<u64> {
        self.singles.get(id).copied()
    }

    pub fn of_couple(&self, id: CoupleId) -> Option<u64> {
        self.couples.get(id).copied()
    }

    /// All registered objects in increasing identity order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, ObjectRef)> + '_ {
        self.by_identity.iter().map(|(&id, &obj)| (id, obj))
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

/// The complete mutable state of one simulation: arenas for every object
/// kind, the identity registry, and the simulation clock.
///
/// Back-references between objects (a hand's fiber, a couple's hands) are
/// arena keys, never aliasing pointers; destroying an object removes its
/// arena entry, releases its identity, and detaches any hand still
/// referencing it within the same step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    pub fibers: SlotMap<FiberId, Fiber>,
    pub solids: SlotMap<SolidId, Solid>,
    pub singles: SlotMap<SingleId, Single>,
    pub couples: SlotMap<CoupleId, Couple>,
    pub inventory: Inventory,
    /// Simulated time.
    pub time: f64,
    /// Completed steps.
    pub step_count: u64,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fiber(&mut self, fiber: Fiber) -> FiberId {
        let id = self.fibers.insert(fiber);
        let identity = self.inventory.issue(ObjectRef::Fiber(id));
        trace!(identity, "registered fiber");
        id
    }

    pub fn add_solid(&mut self, solid: Solid) -> SolidId {
        let id = self.solids.insert(solid);
        self.inventory.issue(ObjectRef::Solid(id));
        id
    }

    pub fn add_single(&mut self, single: Single) -> SingleId {
        let id = self.singles.insert(single);
        self.inventory.issue(ObjectRef::Single(id));
        id
    }

    pub fn add_couple(&mut self, couple: Couple) -> CoupleId {
        let id = self.couples.insert(couple);
        self.inventory.issue(ObjectRef::Couple(id));
        id
    }

    /// Removes a fiber, releasing its identity and detaching every hand
    /// still bound to it. Returns the owners of the hands that were
    /// detached, so the caller can emit the corresponding events.
    pub fn remove_fiber(&mut self, id: FiberId) -> Vec<HandOwner> {
        let orphans = self.detach_hands_of(id);
        self.inventory.release(ObjectRef::Fiber(id));
        self.fibers.remove(id);
        orphans
    }

    pub fn remove_single(&mut self, id: SingleId) {
        self.inventory.release(ObjectRef::Single(id));
        self.singles.remove(id);
    }

    pub fn remove_couple(&mut self, id: CoupleId) {
        self.inventory.release(ObjectRef::Couple(id));
        self.couples.remove(id);
    }

    /// Cuts a fiber at `abscissa`. The distal (plus-end) side becomes a
    /// new fiber inheriting the cut coordinate as its minus-end abscissa,
    /// so hands attached beyond the cut transfer to it without changing
    /// their attachment coordinate. Returns the new fiber's key, or `None`
    /// if the cut would leave a piece shorter than `min_piece`.
    pub fn sever_fiber(
        &mut self,
        id: FiberId,
        abscissa: f64,
        min_piece: f64,
    ) -> Option<FiberId> {
        let new_fiber = self.fibers.get_mut(id)?.sever(abscissa, min_piece)?;
        let new_id = self.add_fiber(new_fiber);
        for (_, single) in &mut self.singles {
            if let Some((f, a)) = single.hand.attachment() {
                if f == id && a > abscissa {
                    single.hand.transfer_to(new_id);
                }
            }
        }
        for (_, couple) in &mut self.couples {
            for side in HandSide::BOTH {
                let hand = couple.hand_mut(side);
                if let Some((f, a)) = hand.attachment() {
                    if f == id && a > abscissa {
                        hand.transfer_to(new_id);
                    }
                }
            }
        }
        Some(new_id)
    }

    fn detach_hands_of(&mut self, fiber: FiberId) -> Vec<HandOwner> {
        let mut orphans = Vec::new();
        for (single_id, single) in &mut self.singles {
            if single.hand.attachment().is_some_and(|(f, _)| f == fiber) {
                single.hand.detach();
                orphans.push(HandOwner::Single(single_id));
            }
        }
        for (couple_id, couple) in &mut self.couples {
            for side in HandSide::BOTH {
                let hand = couple.hand_mut(side);
                if hand.attachment().is_some_and(|(f, _)| f == fiber) {
                    hand.detach();
                    orphans.push(HandOwner::Couple(couple_id, side));
                }
            }
        }
        orphans
    }

    /// Fibers in increasing identity order; the deterministic iteration
    /// order of every kinetics pass.
    pub fn fibers_ordered(&self) -> Vec<FiberId> {
        self.inventory
            .iter()
            .filter_map(|(_, obj)| match obj {
                ObjectRef::Fiber(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Every hand in the system, ordered by owner identity (couples yield
    /// hand A before hand B).
    pub fn hands_ordered(&self) -> Vec<HandOwner> {
        let mut out = Vec::new();
        for (_, obj) in self.inventory.iter() {
            match obj {
                ObjectRef::Single(id) => out.push(HandOwner::Single(id)),
                ObjectRef::Couple(id) => {
                    out.push(HandOwner::Couple(id, HandSide::A));
                    out.push(HandOwner::Couple(id, HandSide::B));
                }
                _ => {}
            }
        }
        out
    }

    /// Total number of solver points (fiber vertices plus solid points).
    pub fn n_points(&self) -> usize {
        let fiber_points: usize = self.fibers.values().map(|f| f.n_points()).sum();
        let solid_points: usize = self.solids.values().map(|s| s.n_points()).sum();
        fiber_points + solid_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fiber::Fiber;
    use crate::core::models::single::{Anchor, Single};
    use crate::core::random::SimRng;
    use nalgebra::{Point3, Vector3};

    fn test_fiber() -> Fiber {
        Fiber::new(Point3::origin(), Vector3::x(), 2.0, 0.5)
    }

    #[test]
    fn identities_are_dense_and_ordered() {
        let mut world = World::new();
        let f1 = world.add_fiber(test_fiber());
        let f2 = world.add_fiber(test_fiber());
        assert_eq!(world.inventory.of_fiber(f1), Some(0));
        assert_eq!(world.inventory.of_fiber(f2), Some(1));
        assert_eq!(world.inventory.resolve(0), Some(ObjectRef::Fiber(f1)));
    }

    #[test]
    fn identities_are_never_reused() {
        let mut world = World::new();
        let f1 = world.add_fiber(test_fiber());
        world.remove_fiber(f1);
        let f2 = world.add_fiber(test_fiber());
        assert_eq!(world.inventory.of_fiber(f2), Some(1));
        assert_eq!(world.inventory.resolve(0), None);
    }

    #[test]
    fn removing_a_fiber_detaches_bound_hands() {
        let mut world = World::new();
        let mut rng = SimRng::seeded(1);
        let fiber = world.add_fiber(test_fiber());
        let single = world.add_single(Single::new(
            0,
            0,
            Anchor::Fixed(Point3::origin()),
            &mut rng,
        ));
        world.singles[single].hand.attach(fiber, 1.0, &mut rng);

        let orphans = world.remove_fiber(fiber);
        assert_eq!(orphans, vec![HandOwner::Single(single)]);
        assert!(!world.singles[single].hand.attached());
        assert!(world.fibers.get(fiber).is_none());
    }

    #[test]
    fn ordered_iteration_follows_creation_order() {
        let mut world = World::new();
        let mut rng = SimRng::seeded(2);
        let s1 = world.add_single(Single::new(0, 0, Anchor::Fixed(Point3::origin()), &mut rng));
        let f1 = world.add_fiber(test_fiber());
        let s2 = world.add_single(Single::new(0, 0, Anchor::Fixed(Point3::origin()), &mut rng));

        assert_eq!(world.fibers_ordered(), vec![f1]);
        assert_eq!(
            world.hands_ordered(),
            vec![HandOwner::Single(s1), HandOwner::Single(s2)]
        );
    }

    #[test]
    fn severing_transfers_distal_hands_to_the_new_fiber() {
        let mut world = World::new();
        let mut rng = SimRng::seeded(4);
        let fiber = world.add_fiber(test_fiber());
        let near = world.add_single(Single::new(0, 0, Anchor::Fixed(Point3::origin()), &mut rng));
        let far = world.add_single(Single::new(0, 0, Anchor::Fixed(Point3::origin()), &mut rng));
        world.singles[near].hand.attach(fiber, 0.5, &mut rng);
        world.singles[far].hand.attach(fiber, 1.5, &mut rng);

        let new_id = world.sever_fiber(fiber, 1.0, 0.1).unwrap();

        // the proximal hand stays put, the distal one moved with its piece
        assert_eq!(world.singles[near].hand.attachment(), Some((fiber, 0.5)));
        assert_eq!(world.singles[far].hand.attachment(), Some((new_id, 1.5)));
        // the transferred coordinate resolves to the same material point
        let p = world.fibers[new_id].pos_at(1.5);
        assert!((p.x - 1.5).abs() < 1e-9);
        // the new fiber carries a fresh identity
        assert_eq!(world.inventory.of_fiber(new_id), Some(3));
    }

    #[test]
    fn sever_rejecting_a_cut_leaves_the_world_unchanged() {
        let mut world = World::new();
        let fiber = world.add_fiber(test_fiber());
        assert!(world.sever_fiber(fiber, 0.01, 0.1).is_none());
        assert_eq!(world.fibers.len(), 1);
        assert_eq!(world.inventory.len(), 1);
    }

    #[test]
    fn point_count_sums_fibers_and_solids() {
        let mut world = World::new();
        world.add_fiber(test_fiber()); // 5 points
        world.add_solid(Solid::bead(Point3::origin(), 0.1)); // 1 point
        assert_eq!(world.n_points(), 6);
    }

    #[test]
    fn world_state_survives_serde_round_trip() {
        let mut world = World::new();
        let mut rng = SimRng::seeded(3);
        let fiber = world.add_fiber(test_fiber());
        let single = world.add_single(Single::new(
            0,
            0,
            Anchor::Diffusing(Point3::new(0.5, 0.0, 0.0)),
            &mut rng,
        ));
        world.singles[single].hand.attach(fiber, 0.75, &mut rng);
        world.time = 1.5;
        world.step_count = 150;

        let bytes = bincode::serialize(&world).unwrap();
        let restored: World = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.step_count, 150);
        assert_eq!(restored.fibers.len(), 1);
        assert_eq!(
            restored.singles[single].hand.attachment(),
            Some((fiber, 0.75))
        );
        assert_eq!(restored.inventory.of_fiber(fiber), Some(0));
    }
}
