use std::collections::HashMap;

use rayon::prelude::*;
use tracing::warn;

use crate::math::Vec2;

use super::body::{BodyId, ParentLink, RigidBody};
use super::query::CollisionQuery;
use super::settings::PhysicsSettings;

/// Owns every rigid body and runs the fixed step.
///
/// A step is a serial pre-pass (forces, buoyancy, velocity snapshot), a wave
/// for unparented bodies, then a wave for bodies riding a platform so they
/// see their parent's movement of the same step. Waves run on the rayon pool
/// once the body count reaches `parallel_threshold`.
#[derive(Debug)]
pub struct PhysicsWorld {
    settings: PhysicsSettings,
    bodies: Vec<(BodyId, RigidBody)>,
    index: HashMap<BodyId, usize>,
    next_id: u64,
}

impl PhysicsWorld {
    pub fn new(settings: PhysicsSettings) -> Self {
        Self {
            settings,
            bodies: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    pub fn add_body(&mut self, mut body: RigidBody) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        body.on_added(&self.settings);
        self.index.insert(id, self.bodies.len());
        self.bodies.push((id, body));
        id
    }

    pub fn remove_body(&mut self, id: BodyId) -> Option<RigidBody> {
        let slot = self.index.remove(&id)?;
        let (_, body) = self.bodies.swap_remove(slot);
        if let Some((moved, _)) = self.bodies.get(slot) {
            self.index.insert(*moved, slot);
        }
        for (_, other) in &mut self.bodies {
            other.clear_parent_links_to(id);
        }
        Some(body)
    }

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        let slot = *self.index.get(&id)?;
        self.bodies.get(slot).map(|(_, body)| body)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        let slot = *self.index.get(&id)?;
        self.bodies.get_mut(slot).map(|(_, body)| body)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &RigidBody)> {
        self.bodies.iter().map(|(id, body)| (*id, body))
    }

    /// Makes `parent` carry `child` for the next step. Only bodies flagged
    /// `can_be_parent_platform` that are not riding a platform themselves
    /// qualify.
    pub fn set_parent_platform(&mut self, child: BodyId, parent: BodyId) -> bool {
        if child == parent {
            return false;
        }
        let eligible = self
            .body(parent)
            .is_some_and(|p| p.can_be_parent_platform && !p.is_parented());
        if !eligible {
            warn!(child = child.raw(), parent = parent.raw(), "parent_platform_rejected");
            return false;
        }
        match self.body_mut(child) {
            Some(body) => {
                body.set_parent(parent);
                true
            }
            None => false,
        }
    }

    pub fn step(&mut self, query: &dyn CollisionQuery) {
        let dt = self.settings.fixed_dt;
        for (_, body) in &mut self.bodies {
            body.apply_forces(dt);
            body.apply_buoyancy(&self.settings);
        }
        let velocities: HashMap<BodyId, Vec2> = self
            .bodies
            .iter()
            .map(|(id, body)| (*id, body.velocity))
            .collect();

        let mut links: HashMap<BodyId, ParentLink> = HashMap::new();
        for (id, body) in &self.bodies {
            if body.is_parented() {
                continue;
            }
            if let Some(velocity) = body.previous_parent().and_then(|p| velocities.get(&p)) {
                links.insert(
                    *id,
                    ParentLink {
                        movement_delta: None,
                        lost_parent_velocity: Some(*velocity),
                    },
                );
            }
        }
        self.run_wave(query, false, &links);

        links.clear();
        for (id, body) in &self.bodies {
            let Some(parent) = body.parent() else {
                continue;
            };
            let movement_delta = self.body(parent).map(RigidBody::movement_delta);
            links.insert(
                *id,
                ParentLink {
                    movement_delta,
                    lost_parent_velocity: None,
                },
            );
        }
        self.run_wave(query, true, &links);
    }

    fn run_wave(
        &mut self,
        query: &dyn CollisionQuery,
        parented: bool,
        links: &HashMap<BodyId, ParentLink>,
    ) {
        let settings = &self.settings;
        let simulate = |(id, body): &mut (BodyId, RigidBody)| {
            if body.is_parented() != parented {
                return;
            }
            let link = links.get(&*id).copied().unwrap_or_default();
            body.simulate(query, settings, link);
        };
        if self.bodies.len() >= settings.parallel_threshold {
            self.bodies.par_iter_mut().for_each(&simulate);
        } else {
            self.bodies.iter_mut().for_each(&simulate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Bounds2D;
    use crate::physics::query::tests::BoxWorld;
    use crate::physics::ForceGenerator;

    #[test]
    fn child_rides_parent_platform() {
        let world = BoxWorld::new(Vec::new());
        let mut physics = PhysicsWorld::new(PhysicsSettings::default());
        let mut platform = RigidBody::boxed(Vec2::ZERO, Vec2::new(4.0, 1.0));
        platform.velocity = Vec2::new(5.0, 0.0);
        let platform = physics.add_body(platform);
        let rider = physics.add_body(RigidBody::boxed(Vec2::new(0.0, 1.0), Vec2::ONE));

        assert!(physics.set_parent_platform(rider, platform));
        physics.step(&world);

        let moved = physics.body(platform).expect("platform").movement_delta();
        let rider_body = physics.body(rider).expect("rider");
        assert!((moved.x - 0.1).abs() < 1e-2);
        assert!((rider_body.position.x - moved.x).abs() < 1e-3);
        assert!(!rider_body.is_parented());

        // Leaving the platform hands over its velocity once.
        physics.step(&world);
        let rider_body = physics.body(rider).expect("rider");
        assert!((rider_body.velocity.x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn non_platform_bodies_cannot_carry() {
        let mut physics = PhysicsWorld::new(PhysicsSettings::default());
        let mut crate_body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
        crate_body.can_be_parent_platform = false;
        let carrier = physics.add_body(crate_body);
        let rider = physics.add_body(RigidBody::boxed(Vec2::new(0.0, 1.0), Vec2::ONE));
        assert!(!physics.set_parent_platform(rider, carrier));
        assert!(!physics.set_parent_platform(rider, rider));
    }

    #[test]
    fn removal_keeps_index_consistent() {
        let mut physics = PhysicsWorld::new(PhysicsSettings::default());
        let a = physics.add_body(RigidBody::boxed(Vec2::new(1.0, 0.0), Vec2::ONE));
        let b = physics.add_body(RigidBody::boxed(Vec2::new(2.0, 0.0), Vec2::ONE));
        let c = physics.add_body(RigidBody::boxed(Vec2::new(3.0, 0.0), Vec2::ONE));
        assert!(physics.remove_body(a).is_some());
        assert!(physics.remove_body(a).is_none());
        assert_eq!(physics.body(c).expect("c").position.x, 3.0);
        assert_eq!(physics.body(b).expect("b").position.x, 2.0);
        assert_eq!(physics.len(), 2);
    }

    #[test]
    fn parallel_and_serial_waves_agree() {
        let world = BoxWorld::floor(0.0);
        let run = |threshold: usize| {
            let settings = PhysicsSettings {
                parallel_threshold: threshold,
                ..PhysicsSettings::default()
            };
            let gravity = settings.gravity;
            let mut physics = PhysicsWorld::new(settings);
            let ids: Vec<BodyId> = (0..80)
                .map(|i| {
                    let position = Vec2::new(i as f32 * 0.5 - 20.0, 3.0 + i as f32 * 0.1);
                    let mut body = RigidBody::boxed(position, Vec2::ONE)
                        .with_force(ForceGenerator::new(gravity));
                    body.velocity = Vec2::new((i % 7) as f32 - 3.0, 0.0);
                    physics.add_body(body)
                })
                .collect();
            for _ in 0..30 {
                physics.step(&world);
            }
            ids.iter()
                .map(|id| physics.body(*id).expect("body").position)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(1), run(usize::MAX));
    }

    #[test]
    fn floor_stops_every_body() {
        let world = BoxWorld::new(vec![Bounds2D::new(
            Vec2::new(-100.0, -1.0),
            Vec2::new(100.0, 0.0),
        )]);
        let settings = PhysicsSettings::default();
        let gravity = settings.gravity;
        let mut physics = PhysicsWorld::new(settings);
        let id = physics.add_body(
            RigidBody::boxed(Vec2::new(0.0, 4.0), Vec2::ONE).with_force(ForceGenerator::new(gravity)),
        );
        for _ in 0..120 {
            physics.step(&world);
        }
        let body = physics.body(id).expect("body");
        assert!(body.contacts().down);
        assert_eq!(body.velocity.y, 0.0);
    }
}
