//! Kinematic character controllers for Rapier scenes.
//!
//! A [`ControllerManager`] owns a [`PhysicsScene`], any number of capsule or box
//! [`Controller`]s and the obstacle contexts they collide with. Moves are swept
//! in three passes (up, side, down) so characters climb steps, slide along
//! walls and stand on slopes; see [`collision`] for the geometric core.

pub mod bitmask_flags;
pub mod callbacks;
pub mod collision;
pub mod controller;
pub mod error;
pub mod locking;
pub mod manager;
pub mod obstacles;
pub mod rapier;
pub mod rapier_world;
pub mod scene;

pub use callbacks::{
    BehaviorCallback, BehaviorFlag, BehaviorFlags, ControllerFilterCallback, ControllerFilters,
    ControllerHitBase, ControllersHit, HitReport, ObstacleHit, QueryFilterCallback, ShapeHit,
};
pub use collision::{
    ClimbingMode, CollisionFlag, CollisionFlags, ExtVec3, NonWalkableMode, Quat, SweepStats, Vec3,
};
pub use controller::{
    Controller, ControllerDesc, ControllerHandle, ControllerMut, ControllerShapeDesc,
    ControllerState,
};
pub use error::CctError;
pub use manager::{ControllerManager, ManagerConfig};
pub use obstacles::{
    BoxObstacle, CapsuleObstacle, Obstacle, ObstacleContext, ObstacleContextHandle, ObstacleHandle,
};
pub use rapier::{ColliderShapeDef, WorldStaticDef, collider_from_def};
pub use rapier_world::RapierScene;
pub use scene::{ActorHandle, ActorKind, PhysicsScene, QueryFlag, QueryFlags};
