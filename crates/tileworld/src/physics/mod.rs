//! Axis-aligned rigid bodies resolved against the static tile grid.

mod body;
mod query;
mod settings;
mod simulation;

pub use body::{BodyId, BodyShape, ContactFlags, ForceGenerator, RigidBody};
pub use query::{Axis, CollisionQuery};
pub use settings::PhysicsSettings;
pub use simulation::PhysicsWorld;
