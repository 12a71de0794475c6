//! User hooks consulted while a controller moves: hit reports, behavior
//! overrides and query filters.

use crate::{
    bitmask_flags::BitmaskFlags,
    collision::types::{ExtVec3, Vec3},
    controller::ControllerHandle,
    obstacles::ObstacleHandle,
    scene::{ActorHandle, ActorKind, QueryFlags, SceneShape, default_query_flags},
};

crate::define_bitmask_flags!(
    /// Per-contact behavior requested by the application.
    BehaviorFlag,
    u8,
    {
        /// Follow the touched object when it moves horizontally.
        CanRideOnObject,
        /// Slide off the touched controller or obstacle instead of resting on it.
        Slide,
        /// The application moves the controller along with the object itself.
        UserDefinedRide,
    }
);

pub type BehaviorFlags = BitmaskFlags<u8>;

/// Data common to every hit report.
#[derive(Clone, Copy, Debug)]
pub struct ControllerHitBase {
    /// Controller that moved.
    pub controller: ControllerHandle,
    pub world_pos: ExtVec3,
    pub world_normal: Vec3,
    /// Unit direction of the sweep that produced the hit.
    pub dir: Vec3,
    /// Length of the sweep that produced the hit.
    pub length: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct ShapeHit {
    pub base: ControllerHitBase,
    pub actor: ActorHandle,
    pub shape: u32,
    /// Index of the touched triangle in its source mesh.
    pub triangle_index: Option<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct ControllersHit {
    pub base: ControllerHitBase,
    pub other: ControllerHandle,
}

#[derive(Clone, Copy, Debug)]
pub struct ObstacleHit {
    pub base: ControllerHitBase,
    pub obstacle: ObstacleHandle,
    pub user_data: u64,
}

/// Notified of every contact resolved during a move. Sensor sweeps are not reported.
pub trait HitReport: Send + Sync {
    fn on_shape_hit(&self, _hit: &ShapeHit) {}
    fn on_controller_hit(&self, _hit: &ControllersHit) {}
    fn on_obstacle_hit(&self, _hit: &ObstacleHit) {}
}

/// Decides how a controller reacts to what it touches.
///
/// Without a callback, controllers ride on scene shapes and obstacles and do not
/// slide off other controllers.
pub trait BehaviorCallback: Send + Sync {
    fn shape_behavior(&self, _actor: ActorHandle, _shape: u32) -> BehaviorFlags {
        BehaviorFlags::from_tags(&[BehaviorFlag::CanRideOnObject])
    }

    fn controller_behavior(&self, _other: ControllerHandle) -> BehaviorFlags {
        BehaviorFlags::empty()
    }

    fn obstacle_behavior(&self, _obstacle: ObstacleHandle, _user_data: u64) -> BehaviorFlags {
        BehaviorFlags::from_tags(&[BehaviorFlag::CanRideOnObject])
    }
}

/// Scene shape filtering, enabled by `QueryFlag::PreFilter` and `QueryFlag::PostFilter`.
pub trait QueryFilterCallback {
    /// Called before the shape geometry is collected. Return `false` to ignore the shape.
    fn pre_filter(&self, _actor: ActorHandle, _shape: u32, _kind: ActorKind) -> bool {
        true
    }

    /// Called with the collected geometry. Return `false` to ignore the shape.
    fn post_filter(&self, _shape: &SceneShape) -> bool {
        true
    }
}

/// Decides whether two controllers interact.
pub trait ControllerFilterCallback {
    fn filter(&self, a: ControllerHandle, b: ControllerHandle) -> bool;
}

impl<F> ControllerFilterCallback for F
where
    F: Fn(ControllerHandle, ControllerHandle) -> bool,
{
    fn filter(&self, a: ControllerHandle, b: ControllerHandle) -> bool {
        self(a, b)
    }
}

/// Filtering applied to one move.
#[derive(Clone, Copy)]
pub struct ControllerFilters<'a> {
    pub flags: QueryFlags,
    pub filter_callback: Option<&'a dyn QueryFilterCallback>,
    /// Filters the other controllers this one can collide with.
    pub cct_filter_callback: Option<&'a dyn ControllerFilterCallback>,
}

impl Default for ControllerFilters<'_> {
    fn default() -> Self {
        Self {
            flags: default_query_flags(),
            filter_callback: None,
            cct_filter_callback: None,
        }
    }
}

/// Callbacks of the controller currently moving.
#[derive(Clone, Copy)]
pub(crate) struct HitContext<'a> {
    pub controller: ControllerHandle,
    pub report: Option<&'a dyn HitReport>,
    pub behavior: Option<&'a dyn BehaviorCallback>,
}

impl HitContext<'_> {
    fn base(
        &self,
        world_pos: ExtVec3,
        world_normal: Vec3,
        dir: Vec3,
        length: f32,
    ) -> ControllerHitBase {
        ControllerHitBase {
            controller: self.controller,
            world_pos,
            world_normal,
            dir,
            length,
        }
    }

    pub fn shape_hit(
        &self,
        actor: ActorHandle,
        shape: u32,
        triangle_index: Option<u32>,
        contact: (ExtVec3, Vec3),
        dir: Vec3,
        length: f32,
    ) {
        if let Some(report) = self.report {
            report.on_shape_hit(&ShapeHit {
                base: self.base(contact.0, contact.1, dir, length),
                actor,
                shape,
                triangle_index,
            });
        }
    }

    /// Report a hit against another controller and return the behavior to apply.
    pub fn controller_hit(
        &self,
        other: ControllerHandle,
        contact: (ExtVec3, Vec3),
        dir: Vec3,
        length: f32,
    ) -> BehaviorFlags {
        if let Some(report) = self.report {
            report.on_controller_hit(&ControllersHit {
                base: self.base(contact.0, contact.1, dir, length),
                other,
            });
        }
        match self.behavior {
            Some(cb) => cb.controller_behavior(other),
            None => BehaviorFlags::empty(),
        }
    }

    /// Report a hit against an obstacle and return the behavior to apply.
    pub fn obstacle_hit(
        &self,
        obstacle: ObstacleHandle,
        user_data: u64,
        contact: (ExtVec3, Vec3),
        dir: Vec3,
        length: f32,
    ) -> BehaviorFlags {
        if let Some(report) = self.report {
            report.on_obstacle_hit(&ObstacleHit {
                base: self.base(contact.0, contact.1, dir, length),
                obstacle,
                user_data,
            });
        }
        self.obstacle_behavior(obstacle, user_data)
    }

    pub fn shape_behavior(&self, actor: ActorHandle, shape: u32) -> BehaviorFlags {
        match self.behavior {
            Some(cb) => cb.shape_behavior(actor, shape),
            None => BehaviorFlags::from_tags(&[BehaviorFlag::CanRideOnObject]),
        }
    }

    pub fn obstacle_behavior(&self, obstacle: ObstacleHandle, user_data: u64) -> BehaviorFlags {
        match self.behavior {
            Some(cb) => cb.obstacle_behavior(obstacle, user_data),
            None => BehaviorFlags::from_tags(&[BehaviorFlag::CanRideOnObject]),
        }
    }
}
