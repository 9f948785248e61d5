use crate::coords::TileCoord;
use crate::math::{approximately, lerp, ranges_overlap, Bounds2D, Vec2};

use super::query::{Axis, CollisionQuery};
use super::settings::PhysicsSettings;

/// Offset used to sample just past an edge when testing for step-ups.
const CLIP_NUDGE: f32 = 1.0 / 32.0;
/// Upward speed above which blocked heads are nudged around ceiling corners.
const CORNER_NUDGE_MIN_SPEED: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub(crate) u64);

impl BodyId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyShape {
    /// Box centred on `position + offset`.
    Box { size: Vec2, offset: Vec2 },
    /// Rectangle anchored at its lower-left corner, used by mobile chunks.
    Complex { size: Vec2 },
}

impl BodyShape {
    pub fn bounds_at(&self, position: Vec2) -> Bounds2D {
        match *self {
            BodyShape::Box { size, offset } => Bounds2D::from_center_size(position + offset, size),
            BodyShape::Complex { size } => Bounds2D::new(position, position + size),
        }
    }

    pub fn size(&self) -> Vec2 {
        match *self {
            BodyShape::Box { size, .. } | BodyShape::Complex { size } => size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceGenerator {
    pub force: Vec2,
    /// Velocity damping per second while the force is enabled.
    pub friction: f32,
    pub enabled: bool,
}

impl ForceGenerator {
    pub fn new(force: Vec2) -> Self {
        Self {
            force,
            friction: 0.0,
            enabled: true,
        }
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactFlags {
    pub down: bool,
    pub up: bool,
    pub left: bool,
    pub right: bool,
}

impl ContactFlags {
    pub fn any(&self) -> bool {
        self.down || self.up || self.left || self.right
    }
}

/// Per-step input a body cannot compute on its own.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ParentLink {
    /// Movement of the parent platform during this step.
    pub movement_delta: Option<Vec2>,
    /// Velocity of the platform this body left at the end of last step.
    pub lost_parent_velocity: Option<Vec2>,
}

/// Axis-aligned body resolved against static tile collision.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub position: Vec2,
    pub velocity: Vec2,
    /// 0 makes the body kinematic: no forces, no buoyancy.
    pub mass: f32,
    pub shape: BodyShape,
    pub terrain_bounciness: f32,
    pub floor_friction: f32,
    pub wall_friction: f32,
    pub can_be_parent_platform: bool,
    pub clip_permission: bool,
    pub clip_amount: f32,
    pub buoyancy_enabled: bool,
    pub apply_generic_gravity_on_load: bool,
    pub forces: Vec<ForceGenerator>,
    /// One-shot displacement consumed by the next step.
    pub discharge: Vec2,
    /// Contacts reported by other systems, folded into the next step's flags.
    pub had_collision: ContactFlags,
    contacts: ContactFlags,
    wall_contacts: ContactFlags,
    movement_delta: Vec2,
    inverse_mass: f32,
    submerged: f32,
    volume: f32,
    last_motion_dir: Vec2,
    last_velocity: Vec2,
    parent: Option<BodyId>,
    previous_parent: Option<BodyId>,
}

impl RigidBody {
    pub fn new(position: Vec2, shape: BodyShape) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            mass: 1.0,
            shape,
            terrain_bounciness: 0.0,
            floor_friction: 0.0,
            wall_friction: 0.0,
            can_be_parent_platform: true,
            clip_permission: false,
            clip_amount: 0.25,
            buoyancy_enabled: true,
            apply_generic_gravity_on_load: false,
            forces: Vec::new(),
            discharge: Vec2::ZERO,
            had_collision: ContactFlags::default(),
            contacts: ContactFlags::default(),
            wall_contacts: ContactFlags::default(),
            movement_delta: Vec2::ZERO,
            inverse_mass: 1.0,
            submerged: 0.0,
            volume: 0.0,
            last_motion_dir: Vec2::ZERO,
            last_velocity: Vec2::ZERO,
            parent: None,
            previous_parent: None,
        }
    }

    pub fn boxed(position: Vec2, size: Vec2) -> Self {
        Self::new(
            position,
            BodyShape::Box {
                size,
                offset: Vec2::ZERO,
            },
        )
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_force(mut self, force: ForceGenerator) -> Self {
        self.forces.push(force);
        self
    }

    pub fn bounds(&self) -> Bounds2D {
        self.shape.bounds_at(self.position)
    }

    /// Contacts of the last step, including external hints.
    pub fn contacts(&self) -> ContactFlags {
        self.contacts
    }

    /// Contacts of the last step against terrain only.
    pub fn wall_contacts(&self) -> ContactFlags {
        self.wall_contacts
    }

    pub fn movement_delta(&self) -> Vec2 {
        self.movement_delta
    }

    pub fn inverse_mass(&self) -> f32 {
        self.inverse_mass
    }

    pub fn submerged(&self) -> f32 {
        self.submerged
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn last_velocity(&self) -> Vec2 {
        self.last_velocity
    }

    pub fn parent(&self) -> Option<BodyId> {
        self.parent
    }

    pub fn previous_parent(&self) -> Option<BodyId> {
        self.previous_parent
    }

    pub fn is_parented(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn set_parent(&mut self, parent: BodyId) {
        self.parent = Some(parent);
    }

    pub(crate) fn clear_parent_links_to(&mut self, removed: BodyId) {
        if self.parent == Some(removed) {
            self.parent = None;
        }
        if self.previous_parent == Some(removed) {
            self.previous_parent = None;
        }
    }

    /// Gives the first force generator the world gravity, adding one if the
    /// body has none.
    pub(crate) fn on_added(&mut self, settings: &PhysicsSettings) {
        if !self.apply_generic_gravity_on_load {
            return;
        }
        match self.forces.first_mut() {
            Some(first) => first.force = settings.gravity,
            None => self.forces.push(ForceGenerator::new(settings.gravity)),
        }
    }

    fn refresh_inverse_mass(&mut self) {
        self.inverse_mass = if self.mass != 0.0 { 1.0 / self.mass } else { 0.0 };
    }

    pub fn apply_forces(&mut self, dt: f32) {
        if self.mass == 0.0 {
            return;
        }
        for force in self.forces.iter().filter(|force| force.enabled) {
            self.velocity += force.force * dt;
            self.velocity *= 1.0 - dt * force.friction;
        }
    }

    pub fn apply_buoyancy(&mut self, settings: &PhysicsSettings) {
        if !self.buoyancy_enabled || self.mass == 0.0 {
            return;
        }
        self.refresh_inverse_mass();
        let dt = settings.fixed_dt;
        let lift = self.submerged * self.volume * settings.fluid_density * self.inverse_mass * dt;
        self.velocity += -settings.gravity * lift;
        self.velocity *= lerp(1.0, 1.0 - dt * settings.fluid_drag, self.submerged);
    }

    /// One fixed step of collision-resolved motion.
    pub(crate) fn simulate(
        &mut self,
        query: &dyn CollisionQuery,
        settings: &PhysicsSettings,
        link: ParentLink,
    ) {
        if self.parent.is_none() {
            if let Some(velocity) = link.lost_parent_velocity {
                self.velocity += velocity;
            }
        }
        self.refresh_inverse_mass();

        self.contacts = ContactFlags::default();
        self.wall_contacts = ContactFlags::default();
        self.movement_delta = Vec2::ZERO;
        self.last_velocity = self.velocity;
        self.fold_collision_hints();

        self.apply_velocity(query, settings, link.movement_delta);
        if self.clip_permission {
            self.check_for_clipping(query, settings);
        }

        self.previous_parent = self.parent.take();
    }

    fn fold_collision_hints(&mut self) {
        let hints = std::mem::take(&mut self.had_collision);
        self.contacts.down |= hints.down;
        self.contacts.up |= hints.up;
        self.contacts.left |= hints.left;
        self.contacts.right |= hints.right;
    }

    fn apply_velocity(
        &mut self,
        query: &dyn CollisionQuery,
        settings: &PhysicsSettings,
        parent_delta: Option<Vec2>,
    ) {
        let dt = settings.fixed_dt;
        let mut delta = self.velocity * dt;
        if delta.x != 0.0 {
            self.last_motion_dir.x = delta.x.signum();
        }
        if delta.y != 0.0 {
            self.last_motion_dir.y = delta.y.signum();
        }
        let bias = self.last_motion_dir * settings.error_handler;
        delta += bias;
        delta += std::mem::replace(&mut self.discharge, Vec2::ZERO);
        if let Some(parent_delta) = parent_delta {
            delta += parent_delta;
        }

        self.resolve_move(query, settings, delta, true);
        self.position -= bias;
    }

    /// Moves by `delta` with collision but without touching velocity.
    pub fn move_by_delta(&mut self, query: &dyn CollisionQuery, settings: &PhysicsSettings, delta: Vec2) {
        self.resolve_move(query, settings, delta, false);
    }

    pub fn move_position(&mut self, query: &dyn CollisionQuery, settings: &PhysicsSettings, target: Vec2) {
        let delta = target - self.position;
        self.move_by_delta(query, settings, delta);
    }

    fn resolve_move(
        &mut self,
        query: &dyn CollisionQuery,
        settings: &PhysicsSettings,
        delta: Vec2,
        limit_velocity: bool,
    ) {
        let bounds = self.bounds();
        let margin = Vec2::new(settings.query_margin, settings.query_margin);
        let query_bounds = bounds.swept(delta).inflated(margin);
        let (min_x, min_y) = query_bounds.min.floor_to_i32();
        let (max_x, max_y) = query_bounds.max.floor_to_i32();

        let size = self.shape.size();
        let total_volume = size.x * size.y;
        self.volume = total_volume;

        let mut boxes = Vec::new();
        let fluid_overlap = query.sample_collisions(
            TileCoord::new(min_x, min_y),
            TileCoord::new(max_x, max_y),
            &bounds,
            &mut boxes,
        );

        let mut resolved = delta;
        for b in &boxes {
            resolved.y = minimize_delta_y(resolved.y, b, &bounds);
        }
        self.position.y += resolved.y;
        let bounds = self.bounds();
        for b in &boxes {
            resolved.x = minimize_delta_x(resolved.x, b, &bounds);
        }
        self.position.x += resolved.x;
        self.movement_delta += resolved;

        let hit_down = resolved.y > delta.y;
        let hit_up = resolved.y < delta.y;
        let hit_left = resolved.x > delta.x;
        let hit_right = resolved.x < delta.x;
        self.contacts.down |= hit_down;
        self.contacts.up |= hit_up;
        self.contacts.left |= hit_left;
        self.contacts.right |= hit_right;
        self.wall_contacts.down |= hit_down;
        self.wall_contacts.up |= hit_up;
        self.wall_contacts.left |= hit_left;
        self.wall_contacts.right |= hit_right;

        let dt = settings.fixed_dt;
        if self.contacts.down {
            self.velocity.x *= 1.0 - dt * self.floor_friction;
        }
        if self.contacts.left || self.contacts.right {
            self.velocity.x *= 1.0 - dt * self.wall_friction;
        }
        if limit_velocity && !approximately(resolved.y, delta.y) {
            self.velocity.y = -self.velocity.y * self.terrain_bounciness;
        }
        if limit_velocity && !approximately(resolved.x, delta.x) {
            self.velocity.x = -self.velocity.x * self.terrain_bounciness;
        }

        self.submerged = if total_volume > 0.0 {
            (fluid_overlap / total_volume).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Step-up over low ledges while walking and corner nudging while
    /// jumping into a ceiling edge.
    fn check_for_clipping(&mut self, query: &dyn CollisionQuery, settings: &PhysicsSettings) {
        let e = settings.error_handler;
        let clip = self.clip_amount;
        let size = self.shape.size();
        let last = self.last_velocity;

        if last.x < 0.0 && self.contacts.left {
            let b = self.bounds();
            let x = b.min.x - CLIP_NUDGE;
            self.try_step_up(query, e, Vec2::new(x, b.min.y + e), Vec2::new(x, b.min.y + clip), size);
        }
        if last.x > 0.0 && self.contacts.right {
            let b = self.bounds();
            let x = b.max.x + CLIP_NUDGE;
            self.try_step_up(query, e, Vec2::new(x, b.min.y + e), Vec2::new(x, b.min.y + clip), size);
        }

        if last.y > CORNER_NUDGE_MIN_SPEED && self.contacts.up {
            let b = self.bounds();
            let p0 = Vec2::new(b.max.x, b.max.y);
            let p1 = Vec2::new(b.max.x - clip, b.max.y + CLIP_NUDGE);
            if query.bounds_cast(&Bounds2D::new(p0, p1))
                && !query.is_point_solid(p1 + Vec2::LEFT * e)
            {
                if let Some(hit) = query.axis_aligned_raycast(p1, Axis::Right, clip) {
                    let offset = clip - (hit.x - p1.x);
                    let shifted = Bounds2D::new(
                        p0 + Vec2::LEFT * offset,
                        p1 + Vec2::LEFT * (offset + size.x - e),
                    );
                    if !query.bounds_cast(&shifted) {
                        self.position.x -= offset;
                        self.velocity = last;
                    }
                }
            }

            let b = self.bounds();
            let p0 = Vec2::new(b.min.x, b.max.y);
            let p1 = Vec2::new(b.min.x + clip, b.max.y + CLIP_NUDGE);
            if query.bounds_cast(&Bounds2D::new(p0, p1))
                && !query.is_point_solid(p1 + Vec2::RIGHT * e)
            {
                if let Some(hit) = query.axis_aligned_raycast(p1, Axis::Left, clip) {
                    let offset = clip - (p1.x - hit.x);
                    let shifted = Bounds2D::new(
                        p0 + Vec2::RIGHT * offset,
                        p1 + Vec2::RIGHT * (offset + size.x - e),
                    );
                    if !query.bounds_cast(&shifted) {
                        self.position.x += offset;
                        self.velocity = last;
                    }
                }
            }
        }
    }

    fn try_step_up(&mut self, query: &dyn CollisionQuery, e: f32, p0: Vec2, p1: Vec2, size: Vec2) {
        let solid_clip = query.bounds_cast(&Bounds2D::new(p0, p1));
        if !solid_clip || query.is_point_solid(p1 + Vec2::UP * e) {
            return;
        }
        let Some(hit) = query.axis_aligned_raycast(p1, Axis::Down, self.clip_amount) else {
            return;
        };
        let offset = self.clip_amount - (p1.y - hit.y) + CLIP_NUDGE;
        let lifted = Bounds2D::new(p0 + Vec2::UP * offset, p1 + Vec2::UP * (offset + size.y - e));
        if !query.bounds_cast(&lifted) {
            self.position.y += offset;
            self.velocity = self.last_velocity;
        }
    }
}

/// Clamps a vertical move so `body` stops at the near face of `b`.
fn minimize_delta_y(delta: f32, b: &Bounds2D, body: &Bounds2D) -> f32 {
    if !ranges_overlap(b.min.x, b.max.x, body.min.x, body.max.x) {
        return delta;
    }
    if delta < 0.0 && b.max.y <= body.min.y {
        delta.max(b.max.y - body.min.y)
    } else if delta > 0.0 && b.min.y >= body.max.y {
        delta.min(b.min.y - body.max.y)
    } else {
        delta
    }
}

fn minimize_delta_x(delta: f32, b: &Bounds2D, body: &Bounds2D) -> f32 {
    if !ranges_overlap(b.min.y, b.max.y, body.min.y, body.max.y) {
        return delta;
    }
    if delta < 0.0 && b.max.x <= body.min.x {
        delta.max(b.max.x - body.min.x)
    } else if delta > 0.0 && b.min.x >= body.max.x {
        delta.min(b.min.x - body.max.x)
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::query::tests::BoxWorld;

    fn step(body: &mut RigidBody, world: &BoxWorld, settings: &PhysicsSettings) {
        body.apply_forces(settings.fixed_dt);
        body.apply_buoyancy(settings);
        body.simulate(world, settings, ParentLink::default());
    }

    #[test]
    fn zero_mass_ignores_forces() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::new(Vec::new());
        let mut body = RigidBody::boxed(Vec2::new(0.0, 5.0), Vec2::ONE)
            .with_mass(0.0)
            .with_force(ForceGenerator::new(settings.gravity));
        for _ in 0..10 {
            step(&mut body, &world, &settings);
        }
        assert_eq!(body.velocity, Vec2::ZERO);
        assert!((body.position.y - 5.0).abs() < 1e-5);
        assert_eq!(body.inverse_mass(), 0.0);
    }

    #[test]
    fn falling_body_rests_on_floor() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::floor(0.0);
        let mut body = RigidBody::boxed(Vec2::new(0.0, 2.0), Vec2::ONE)
            .with_force(ForceGenerator::new(settings.gravity));
        for _ in 0..100 {
            step(&mut body, &world, &settings);
        }
        assert!(body.contacts().down);
        assert!(body.wall_contacts().down);
        assert_eq!(body.velocity.y, 0.0);
        assert!(body.bounds().min.y >= -1e-4);
        assert!(body.bounds().min.y < 0.01);
    }

    #[test]
    fn bouncy_body_reverses_on_impact() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::floor(0.0);
        let mut body = RigidBody::boxed(Vec2::new(0.0, 0.6), Vec2::ONE);
        body.terrain_bounciness = 1.0;
        body.velocity = Vec2::new(0.0, -10.0);
        step(&mut body, &world, &settings);
        assert!(body.contacts().down);
        assert!((body.velocity.y - 10.0).abs() < 1e-4);
    }

    #[test]
    fn wall_blocks_lateral_motion() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::new(vec![Bounds2D::new(Vec2::new(1.0, -5.0), Vec2::new(2.0, 5.0))]);
        let mut body = RigidBody::boxed(Vec2::new(0.45, 0.0), Vec2::ONE);
        body.velocity = Vec2::new(10.0, 0.0);
        step(&mut body, &world, &settings);
        assert!(body.contacts().right);
        assert_eq!(body.velocity.x, 0.0);
        assert!(body.bounds().max.x <= 1.0 + 1e-5);
    }

    #[test]
    fn collision_hints_are_folded_once() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::new(Vec::new());
        let mut body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
        body.had_collision.left = true;
        step(&mut body, &world, &settings);
        assert!(body.contacts().left);
        assert!(!body.wall_contacts().left);
        step(&mut body, &world, &settings);
        assert!(!body.contacts().left);
    }

    #[test]
    fn lost_parent_velocity_is_inherited() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::new(Vec::new());
        let mut body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
        body.set_parent(BodyId(7));
        body.simulate(
            &world,
            &settings,
            ParentLink {
                movement_delta: Some(Vec2::new(0.5, 0.0)),
                lost_parent_velocity: None,
            },
        );
        assert!((body.position.x - 0.5).abs() < 1e-5);
        assert_eq!(body.previous_parent(), Some(BodyId(7)));
        assert!(!body.is_parented());

        body.simulate(
            &world,
            &settings,
            ParentLink {
                movement_delta: None,
                lost_parent_velocity: Some(Vec2::new(3.0, 0.0)),
            },
        );
        assert_eq!(body.velocity, Vec2::new(3.0, 0.0));
    }

    #[test]
    fn walking_into_low_ledge_steps_up() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::new(vec![
            Bounds2D::new(Vec2::new(-50.0, -1.0), Vec2::new(50.0, 0.0)),
            Bounds2D::new(Vec2::new(-10.0, 0.0), Vec2::new(-1.0, 0.2)),
        ]);
        let mut body = RigidBody::boxed(Vec2::new(-0.49, 0.501), Vec2::ONE);
        body.clip_permission = true;
        body.velocity = Vec2::new(-5.0, 0.0);
        step(&mut body, &world, &settings);
        assert!(body.contacts().left);
        assert!(body.bounds().min.y > 0.2);
        assert_eq!(body.velocity.x, -5.0);
    }

    #[test]
    fn submersion_drives_buoyancy() {
        let settings = PhysicsSettings::default();
        let mut world = BoxWorld::new(Vec::new());
        world.fluid = vec![Bounds2D::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0))];
        let mut body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
        step(&mut body, &world, &settings);
        assert!((body.submerged() - 1.0).abs() < 1e-5);
        assert!((body.volume() - 1.0).abs() < 1e-5);
        step(&mut body, &world, &settings);
        assert!(body.velocity.y > 0.5);
    }

    #[test]
    fn gravity_on_load_fills_first_force() {
        let settings = PhysicsSettings::default();
        let mut body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
        body.apply_generic_gravity_on_load = true;
        body.on_added(&settings);
        assert_eq!(body.forces, vec![ForceGenerator::new(settings.gravity)]);
    }

    #[test]
    fn move_by_delta_keeps_velocity() {
        let settings = PhysicsSettings::default();
        let world = BoxWorld::floor(0.0);
        let mut body = RigidBody::boxed(Vec2::new(0.0, 1.0), Vec2::ONE);
        body.velocity = Vec2::new(1.0, -1.0);
        body.move_position(&world, &settings, Vec2::new(0.0, -3.0));
        assert!((body.position.y - 0.5).abs() < 1e-5);
        assert_eq!(body.velocity, Vec2::new(1.0, -1.0));
    }
}
