//! Boundary between the controllers and the physics world they move through.
//!
//! Controllers never talk to a concrete engine. They need overlap queries,
//! a static-geometry timestamp, a kinematic proxy actor per controller and a
//! deletion notification; [`PhysicsScene`] is that contract.
//! [`crate::rapier_world::RapierScene`] implements it over Rapier collider sets.

use std::sync::Arc;

use rapier3d::parry::{bounding_volume::Aabb, shape::Triangle};

use crate::{
    bitmask_flags::BitmaskFlags,
    collision::types::{Iso, Point3, Vec3},
};

/// Opaque identifier of a scene actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorHandle(pub u64);

/// How an actor moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActorKind {
    /// Never moves. Contributes to the timestamp.
    Static,
    /// Moved by the simulation or the application.
    Dynamic,
    /// Moved programmatically by kinematic targets (controller proxies).
    Kinematic,
}

crate::define_bitmask_flags!(
    /// Shape categories and callbacks enabled for a query.
    QueryFlag,
    u8,
    {
        Static,
        Dynamic,
        PreFilter,
        PostFilter,
    }
);

pub type QueryFlags = BitmaskFlags<u8>;

/// Static and dynamic shapes, no filter callbacks.
pub fn default_query_flags() -> QueryFlags {
    QueryFlags::from_tags(&[QueryFlag::Static, QueryFlag::Dynamic])
}

/// World-space geometry of one scene shape, clipped to the query bounds where relevant.
#[derive(Clone, Debug)]
pub enum SceneGeometry {
    Box { half_extents: Vec3, pose: Iso },
    Sphere { center: Point3, radius: f32 },
    Capsule { p0: Point3, p1: Point3, radius: f32 },
    /// Mesh triangles, tessellated round shapes and plane quads.
    Triangles(Vec<IndexedTriangle>),
}

/// A world-space triangle and its index in the source mesh.
#[derive(Clone, Copy, Debug)]
pub struct IndexedTriangle {
    pub index: u32,
    pub triangle: Triangle,
}

/// One result of an overlap query.
#[derive(Clone, Debug)]
pub struct SceneShape {
    pub actor: ActorHandle,
    /// Index of the shape within its actor.
    pub shape: u32,
    pub kind: ActorKind,
    pub geometry: SceneGeometry,
}

/// Geometry of a controller's kinematic proxy, expressed along the proxy's local +X axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProxyGeometry {
    /// `half_height` is half the length of the cylindrical part.
    Capsule { radius: f32, half_height: f32 },
    Box { half_extents: Vec3 },
}

/// Identifier returned by [`PhysicsScene::register_deletion_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Observer of actor removal.
///
/// Invoked synchronously, before the actor disappears. May be called from
/// whichever thread removes the actor.
pub trait DeletionListener: Send + Sync {
    fn on_release(&self, actor: ActorHandle);
}

/// Physics world seen by the controllers.
///
/// Queries fail open: an engine that cannot answer returns nothing and the
/// controller simply finds nothing to collide with.
pub trait PhysicsScene {
    /// Changes whenever static geometry is added, removed or moved.
    fn timestamp(&self) -> u64;

    /// Append every shape whose bounds intersect `bounds` and whose kind is enabled by `flags`
    /// (`QueryFlag::Static` selects static actors, `QueryFlag::Dynamic` everything else).
    fn overlap(&self, bounds: &Aabb, flags: QueryFlags, out: &mut Vec<SceneShape>);

    fn actor_pose(&self, actor: ActorHandle) -> Option<Iso>;

    fn actor_kind(&self, actor: ActorHandle) -> Option<ActorKind>;

    fn create_kinematic_proxy(&mut self, geometry: ProxyGeometry, pose: Iso, density: f32)
    -> ActorHandle;

    fn set_kinematic_target(&mut self, actor: ActorHandle, pose: Iso);

    fn update_proxy_geometry(&mut self, actor: ActorHandle, geometry: ProxyGeometry);

    /// Remove an actor, notifying deletion listeners first.
    fn release_actor(&mut self, actor: ActorHandle);

    fn register_deletion_listener(&mut self, listener: Arc<dyn DeletionListener>) -> ListenerId;

    fn unregister_deletion_listener(&mut self, id: ListenerId);
}
