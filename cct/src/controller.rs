//! Box and capsule character controllers.
//!
//! A controller owns its collision state ([`SweepTest`]), the kinematic proxy
//! actor mirroring it in the scene, and the deletion listener that keeps its
//! cache honest. Controllers are created, moved and released through the
//! [`crate::manager::ControllerManager`].

use std::{f32::consts::FRAC_PI_2, fmt, sync::Arc};

use nalgebra as na;
use slotmap::new_key_type;

use crate::{
    callbacks::{BehaviorCallback, BehaviorFlag, ControllerFilters, HitContext, HitReport},
    collision::{
        settings::{
            DEFAULT_CONTACT_OFFSET, DEFAULT_PROXY_DENSITY, DEFAULT_SCALE_COEFF,
            DEFAULT_SLOPE_LIMIT, DEFAULT_STEP_OFFSET, DEFAULT_VOLUME_GROWTH, OBSTACLE_RAY_SCALE,
        },
        sweep_test::{
            CctParams, ClimbingMode, CollisionFlags, NonWalkableMode, SweepEnv, SweepStats,
            SweepTest, SweepTestFlag, TouchedObstacle, TouchedShape,
        },
        swept_volume::{SweptVolume, VolumeShape},
        touched::{UserBox, UserCapsule, UserObject, UserObstacles},
        types::{
            ExtBounds, ExtVec3, Iso, Vec3, decompose_vector, diff, is_almost_zero,
            offset_by, shortest_rotation, to_ext, to_vec3,
        },
    },
    error::{CctError, check_dimension},
    locking::TouchedState,
    manager::ManagerConfig,
    obstacles::{ObstacleContext, ObstacleContextHandle, ObstacleHandle},
    scene::{ActorHandle, ActorKind, ListenerId, PhysicsScene, ProxyGeometry},
};

new_key_type! {
    /// Stable identifier of a controller owned by the manager.
    pub struct ControllerHandle;
}

/// Shape-specific part of a [`ControllerDesc`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControllerShapeDesc {
    /// Upright capsule. `height` is the length of the cylindrical part.
    Capsule {
        radius: f32,
        height: f32,
        climbing_mode: ClimbingMode,
    },
    /// Box with `half_height` along up.
    Box {
        half_height: f32,
        half_side_extent: f32,
        half_forward_extent: f32,
    },
}

/// Construction parameters of a controller.
#[derive(Clone)]
pub struct ControllerDesc {
    pub shape: ControllerShapeDesc,
    /// Initial center position.
    pub position: ExtVec3,
    pub up_direction: Vec3,
    /// Maximum walkable slope in radians. Zero disables slope handling.
    pub slope_limit: f32,
    pub contact_offset: f32,
    pub step_offset: f32,
    /// Lets the touched-geometry query see the ground while jumping.
    pub max_jump_height: f32,
    pub non_walkable_mode: NonWalkableMode,
    /// Growth of the cached touched-geometry bounds, at least 1.
    pub volume_growth: f32,
    /// Density of the kinematic proxy.
    pub density: f32,
    /// Scale of the kinematic proxy relative to the controller, in `[0, 1]`.
    pub scale_coeff: f32,
    pub report_callback: Option<Arc<dyn HitReport>>,
    pub behavior_callback: Option<Arc<dyn BehaviorCallback>>,
    pub user_data: u64,
}

impl fmt::Debug for ControllerDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDesc")
            .field("shape", &self.shape)
            .field("position", &self.position)
            .field("up_direction", &self.up_direction)
            .field("slope_limit", &self.slope_limit)
            .field("contact_offset", &self.contact_offset)
            .field("step_offset", &self.step_offset)
            .field("max_jump_height", &self.max_jump_height)
            .field("non_walkable_mode", &self.non_walkable_mode)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

impl Default for ControllerDesc {
    fn default() -> Self {
        Self {
            shape: ControllerShapeDesc::Capsule {
                radius: 0.5,
                height: 1.0,
                climbing_mode: ClimbingMode::default(),
            },
            position: ExtVec3::zeros(),
            up_direction: Vec3::y(),
            slope_limit: DEFAULT_SLOPE_LIMIT,
            contact_offset: DEFAULT_CONTACT_OFFSET,
            step_offset: DEFAULT_STEP_OFFSET,
            max_jump_height: 0.0,
            non_walkable_mode: NonWalkableMode::default(),
            volume_growth: DEFAULT_VOLUME_GROWTH,
            density: DEFAULT_PROXY_DENSITY,
            scale_coeff: DEFAULT_SCALE_COEFF,
            report_callback: None,
            behavior_callback: None,
            user_data: 0,
        }
    }
}

impl ControllerDesc {
    pub fn capsule(radius: f32, height: f32) -> Self {
        Self {
            shape: ControllerShapeDesc::Capsule {
                radius,
                height,
                climbing_mode: ClimbingMode::default(),
            },
            ..Self::default()
        }
    }

    pub fn boxed(half_height: f32, half_side_extent: f32, half_forward_extent: f32) -> Self {
        Self {
            shape: ControllerShapeDesc::Box {
                half_height,
                half_side_extent,
                half_forward_extent,
            },
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: ExtVec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_up_direction(mut self, up: Vec3) -> Self {
        self.up_direction = up;
        self
    }

    pub fn with_slope_limit(mut self, radians: f32) -> Self {
        self.slope_limit = radians;
        self
    }

    pub fn with_step_offset(mut self, step_offset: f32) -> Self {
        self.step_offset = step_offset;
        self
    }

    pub fn with_contact_offset(mut self, contact_offset: f32) -> Self {
        self.contact_offset = contact_offset;
        self
    }

    pub fn with_non_walkable_mode(mut self, mode: NonWalkableMode) -> Self {
        self.non_walkable_mode = mode;
        self
    }

    pub fn with_report_callback(mut self, report: Arc<dyn HitReport>) -> Self {
        self.report_callback = Some(report);
        self
    }

    pub fn with_behavior_callback(mut self, behavior: Arc<dyn BehaviorCallback>) -> Self {
        self.behavior_callback = Some(behavior);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check every field. Returns the first problem found.
    pub fn validate(&self) -> Result<(), CctError> {
        let full_height = match self.shape {
            ControllerShapeDesc::Capsule { radius, height, .. } => {
                check_dimension("radius", radius)?;
                check_dimension("height", height)?;
                height + radius * 2.0
            }
            ControllerShapeDesc::Box {
                half_height,
                half_side_extent,
                half_forward_extent,
            } => {
                check_dimension("half_height", half_height)?;
                check_dimension("half_side_extent", half_side_extent)?;
                check_dimension("half_forward_extent", half_forward_extent)?;
                half_height * 2.0
            }
        };
        check_dimension("contact_offset", self.contact_offset)?;

        if !(self.step_offset >= 0.0 && self.step_offset <= full_height) {
            return Err(CctError::InvalidDescriptor(
                "step offset must lie between zero and the controller height",
            ));
        }
        if !(0.0..=FRAC_PI_2).contains(&self.slope_limit) {
            return Err(CctError::InvalidDescriptor("slope limit out of [0, pi/2]"));
        }
        if !(self.max_jump_height >= 0.0 && self.max_jump_height.is_finite()) {
            return Err(CctError::InvalidDescriptor("negative max jump height"));
        }
        if !(self.volume_growth >= 1.0 && self.volume_growth.is_finite()) {
            return Err(CctError::InvalidDescriptor("volume growth below 1"));
        }
        if !(self.density >= 0.0 && self.density.is_finite()) {
            return Err(CctError::InvalidDescriptor("negative proxy density"));
        }
        if !(0.0..=1.0).contains(&self.scale_coeff) {
            return Err(CctError::InvalidDescriptor("scale coefficient out of [0, 1]"));
        }
        if !self.position.iter().all(|c| c.is_finite()) {
            return Err(CctError::InvalidDescriptor("non-finite position"));
        }
        unit_up(&self.up_direction)?;
        Ok(())
    }
}

fn unit_up(up: &Vec3) -> Result<Vec3, CctError> {
    if !up.iter().all(|c| c.is_finite()) {
        return Err(CctError::InvalidDescriptor("non-finite up direction"));
    }
    up.try_normalize(1.0e-6)
        .ok_or(CctError::InvalidDescriptor("zero up direction"))
}

/// Snapshot of what a controller touched during its last move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerState {
    /// Displacement inherited from the object the controller rides on.
    pub delta_xp: Vec3,
    pub touched_shape: Option<TouchedShape>,
    pub touched_obstacle: Option<TouchedObstacle>,
    pub collision_flags: CollisionFlags,
    pub standing_on_another_controller: bool,
    pub standing_on_obstacle: bool,
    pub is_moving_up: bool,
}

/// World inputs of one move, assembled by the manager.
pub(crate) struct MoveContext<'a> {
    pub config: &'a ManagerConfig,
    pub obstacles: &'a UserObstacles,
    pub obstacle_context: Option<(ObstacleContextHandle, &'a ObstacleContext)>,
    pub filters: &'a ControllerFilters<'a>,
    pub is_controller_actor: &'a dyn Fn(ActorHandle) -> bool,
}

/// A kinematic box or capsule character.
pub struct Controller {
    handle: ControllerHandle,
    shape: VolumeShape,
    position: ExtVec3,
    params: CctParams,
    slope_angle: f32,
    scale_coeff: f32,
    sweep: SweepTest,
    proxy: ActorHandle,
    listener: ListenerId,
    touched: Arc<TouchedState>,
    overlap_recover: Vec3,
    delta_xp: Vec3,
    collision_flags: CollisionFlags,
    obstacle_context: Option<ObstacleContextHandle>,
    global_time: f64,
    report: Option<Arc<dyn HitReport>>,
    behavior: Option<Arc<dyn BehaviorCallback>>,
    user_data: u64,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("handle", &self.handle)
            .field("shape", &self.shape)
            .field("position", &self.position)
            .field("proxy", &self.proxy)
            .field("collision_flags", &self.collision_flags)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub(crate) fn new(
        handle: ControllerHandle,
        desc: &ControllerDesc,
        scene: &mut dyn PhysicsScene,
        locking_enabled: bool,
    ) -> Result<Self, CctError> {
        desc.validate()?;

        let up = unit_up(&desc.up_direction)?;
        let (shape, climbing_mode) = match desc.shape {
            ControllerShapeDesc::Capsule {
                radius,
                height,
                climbing_mode,
            } => (VolumeShape::Capsule { radius, height }, climbing_mode),
            ControllerShapeDesc::Box {
                half_height,
                half_side_extent,
                half_forward_extent,
            } => (
                VolumeShape::Box {
                    half_height,
                    half_side: half_side_extent,
                    half_forward: half_forward_extent,
                },
                ClimbingMode::Easy,
            ),
        };

        let params = CctParams {
            up_direction: up,
            quat_from_up: shortest_rotation(&Vec3::x(), &up),
            slope_limit: desc.slope_limit.cos(),
            handle_slope: desc.slope_limit > 0.0,
            contact_offset: desc.contact_offset,
            step_offset: desc.step_offset,
            max_jump_height: desc.max_jump_height,
            non_walkable_mode: desc.non_walkable_mode,
            climbing_mode,
            volume_growth: desc.volume_growth,
            ..CctParams::default()
        };

        let mut controller = Self {
            handle,
            shape,
            position: desc.position,
            params,
            slope_angle: desc.slope_limit,
            scale_coeff: desc.scale_coeff,
            sweep: SweepTest::new(params),
            proxy: ActorHandle(0),
            listener: ListenerId(0),
            touched: Arc::new(TouchedState::new(locking_enabled)),
            overlap_recover: Vec3::zeros(),
            delta_xp: Vec3::zeros(),
            collision_flags: CollisionFlags::empty(),
            obstacle_context: None,
            global_time: 0.0,
            report: desc.report_callback.clone(),
            behavior: desc.behavior_callback.clone(),
            user_data: desc.user_data,
        };

        controller.proxy = scene.create_kinematic_proxy(
            controller.proxy_geometry(),
            controller.proxy_pose(),
            desc.density,
        );
        controller.listener = scene.register_deletion_listener(controller.touched.clone());
        Ok(controller)
    }

    /// Detach from the scene: stop listening, then drop the proxy.
    pub(crate) fn release(self, scene: &mut dyn PhysicsScene) {
        scene.unregister_deletion_listener(self.listener);
        scene.release_actor(self.proxy);
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle
    }

    pub fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// Kinematic actor mirroring the controller in the scene.
    pub fn actor(&self) -> ActorHandle {
        self.proxy
    }

    pub fn position(&self) -> ExtVec3 {
        self.position
    }

    /// Bottom of the contact skin.
    pub fn foot_position(&self) -> ExtVec3 {
        let drop = self.half_height() + self.params.contact_offset;
        offset_by(&self.position, &(self.params.up_direction * -drop))
    }

    /// Distance from the center to the bottom of the volume.
    pub fn half_height(&self) -> f32 {
        SweptVolume::new(self.position, self.shape).half_height()
    }

    pub fn up_direction(&self) -> Vec3 {
        self.params.up_direction
    }

    pub fn step_offset(&self) -> f32 {
        self.params.step_offset
    }

    pub fn set_step_offset(&mut self, offset: f32) -> Result<(), CctError> {
        if !(offset >= 0.0 && offset.is_finite()) {
            log::warn!("rejected step offset {offset}");
            return Err(CctError::InvalidDimension {
                name: "step_offset",
                value: offset,
            });
        }
        self.params.step_offset = offset;
        Ok(())
    }

    pub fn contact_offset(&self) -> f32 {
        self.params.contact_offset
    }

    pub fn set_contact_offset(&mut self, offset: f32) -> Result<(), CctError> {
        self.params.contact_offset = check_dimension("contact_offset", offset)?;
        Ok(())
    }

    /// Slope limit in radians; zero when slope handling is off.
    pub fn slope_limit(&self) -> f32 {
        self.slope_angle
    }

    pub fn set_slope_limit(&mut self, radians: f32) -> Result<(), CctError> {
        if !(0.0..=FRAC_PI_2).contains(&radians) {
            log::warn!("rejected slope limit {radians}");
            return Err(CctError::InvalidDimension {
                name: "slope_limit",
                value: radians,
            });
        }
        self.slope_angle = radians;
        self.params.slope_limit = radians.cos();
        self.params.handle_slope = radians > 0.0;
        Ok(())
    }

    pub fn non_walkable_mode(&self) -> NonWalkableMode {
        self.params.non_walkable_mode
    }

    pub fn set_non_walkable_mode(&mut self, mode: NonWalkableMode) {
        self.params.non_walkable_mode = mode;
    }

    pub fn climbing_mode(&self) -> ClimbingMode {
        self.params.climbing_mode
    }

    /// Capsules only.
    pub fn set_climbing_mode(&mut self, mode: ClimbingMode) -> Result<(), CctError> {
        match self.shape {
            VolumeShape::Capsule { .. } => {
                self.params.climbing_mode = mode;
                Ok(())
            }
            VolumeShape::Box { .. } => Err(CctError::InvalidDescriptor(
                "climbing mode applies to capsule controllers",
            )),
        }
    }

    pub fn max_jump_height(&self) -> f32 {
        self.params.max_jump_height
    }

    pub fn set_max_jump_height(&mut self, height: f32) -> Result<(), CctError> {
        if !(height >= 0.0 && height.is_finite()) {
            return Err(CctError::InvalidDimension {
                name: "max_jump_height",
                value: height,
            });
        }
        self.params.max_jump_height = height;
        Ok(())
    }

    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    pub fn set_report_callback(&mut self, report: Option<Arc<dyn HitReport>>) {
        self.report = report;
    }

    pub fn set_behavior_callback(&mut self, behavior: Option<Arc<dyn BehaviorCallback>>) {
        self.behavior = behavior;
    }

    /// Force a full touched-geometry rebuild on the next move.
    pub fn invalidate_cache(&mut self) {
        self.sweep.invalidate_cache();
    }

    /// Collision flags of the last move.
    pub fn collision_flags(&self) -> CollisionFlags {
        self.collision_flags
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            delta_xp: self.delta_xp,
            touched_shape: self.sweep.touched_shape().copied(),
            touched_obstacle: self.sweep.touched_obstacle().copied(),
            collision_flags: self.collision_flags,
            standing_on_another_controller: self.sweep.flags.has(SweepTestFlag::TouchOtherCct),
            standing_on_obstacle: self.sweep.flags.has(SweepTestFlag::TouchObstacle),
            is_moving_up: self.sweep.flags.has(SweepTestFlag::IsMovingUp),
        }
    }

    /// Sum of the elapsed times passed to every move.
    pub fn global_time(&self) -> f64 {
        self.global_time
    }

    pub fn stats(&self) -> SweepStats {
        self.sweep.stats
    }

    /// Pending separation from other controllers, applied by the next move.
    pub fn overlap_recover(&self) -> Vec3 {
        self.overlap_recover
    }

    /// World bounds of the volume, without the contact offset.
    pub fn world_box(&self) -> ExtBounds {
        SweptVolume::new(self.position, self.shape)
            .world_box(&self.params.up_direction, &self.params.quat_from_up)
    }

    /// World capsule of a capsule controller.
    pub fn capsule(&self) -> Option<UserCapsule> {
        let VolumeShape::Capsule { radius, height } = self.shape else {
            return None;
        };
        let axis = self.params.up_direction * (height * 0.5);
        Some(UserCapsule {
            p0: offset_by(&self.position, &-axis),
            p1: offset_by(&self.position, &axis),
            radius,
            owner: UserObject::Controller(self.handle),
        })
    }

    /// World oriented box of a box controller.
    pub fn obb(&self) -> Option<UserBox> {
        let VolumeShape::Box {
            half_height,
            half_side,
            half_forward,
        } = self.shape
        else {
            return None;
        };
        Some(UserBox {
            center: self.position,
            rotation: self.params.quat_from_up,
            half_extents: Vec3::new(half_height, half_side, half_forward),
            owner: UserObject::Controller(self.handle),
        })
    }

    /// Append this controller's volume to `out`.
    pub(crate) fn push_user_volume(&self, out: &mut UserObstacles) {
        if let Some(c) = self.capsule() {
            out.capsules.push(c);
        } else if let Some(b) = self.obb() {
            out.boxes.push(b);
        }
    }

    pub(crate) fn add_overlap_recover(&mut self, delta: &Vec3) {
        self.overlap_recover += delta;
    }

    fn proxy_pose(&self) -> Iso {
        Iso::from_parts(
            na::Translation3::from(to_vec3(&self.position)),
            self.params.quat_from_up,
        )
    }

    fn proxy_geometry(&self) -> ProxyGeometry {
        let k = self.scale_coeff;
        match self.shape {
            VolumeShape::Capsule { radius, height } => ProxyGeometry::Capsule {
                radius: radius * k,
                half_height: height * 0.5 * k,
            },
            VolumeShape::Box {
                half_height,
                half_side,
                half_forward,
            } => ProxyGeometry::Box {
                half_extents: Vec3::new(half_height, half_side, half_forward) * k,
            },
        }
    }

    fn sync_proxy_pose(&self, scene: &mut dyn PhysicsScene) {
        scene.set_kinematic_target(self.proxy, self.proxy_pose());
    }

    pub(crate) fn set_position(&mut self, scene: &mut dyn PhysicsScene, position: ExtVec3) {
        self.position = position;
        self.sync_proxy_pose(scene);
    }

    pub(crate) fn set_up_direction(
        &mut self,
        scene: &mut dyn PhysicsScene,
        up: &Vec3,
    ) -> Result<(), CctError> {
        let up = unit_up(up)?;
        self.params.up_direction = up;
        self.params.quat_from_up = shortest_rotation(&Vec3::x(), &up);
        self.sweep.invalidate_cache();
        self.sync_proxy_pose(scene);
        Ok(())
    }

    /// Replace the volume, keeping the foot position when `keep_foot` is set.
    pub(crate) fn set_shape(
        &mut self,
        scene: &mut dyn PhysicsScene,
        shape: VolumeShape,
        keep_foot: bool,
    ) -> Result<(), CctError> {
        match shape {
            VolumeShape::Capsule { radius, height } => {
                check_dimension("radius", radius)?;
                check_dimension("height", height)?;
            }
            VolumeShape::Box {
                half_height,
                half_side,
                half_forward,
            } => {
                check_dimension("half_height", half_height)?;
                check_dimension("half_side_extent", half_side)?;
                check_dimension("half_forward_extent", half_forward)?;
            }
        }
        let old_half_height = self.half_height();
        self.shape = shape;
        if keep_foot {
            let rise = self.half_height() - old_half_height;
            self.position = offset_by(&self.position, &(self.params.up_direction * rise));
        }
        scene.update_proxy_geometry(self.proxy, self.proxy_geometry());
        self.sync_proxy_pose(scene);
        self.sweep.invalidate_cache();
        Ok(())
    }

    /// Downward ray used by obstacle notifications: `(origin, dir, max_dist)`.
    pub(crate) fn obstacle_ray(&self) -> (ExtVec3, Vec3, f32) {
        let reach = (self.half_height() + self.params.contact_offset) * OBSTACLE_RAY_SCALE;
        (self.position, -self.params.up_direction, reach)
    }

    pub(crate) fn on_obstacle_added(
        &mut self,
        ctx: ObstacleContextHandle,
        context: &ObstacleContext,
        handle: ObstacleHandle,
    ) {
        let touched = Arc::clone(&self.touched);
        let _guard = touched.lock();
        if self.obstacle_context.is_some_and(|c| c != ctx) {
            return;
        }
        let (origin, dir, reach) = self.obstacle_ray();
        self.sweep.on_obstacle_added(handle, context, &origin, &dir, reach);
        if self.sweep.touched_obstacle().is_some() {
            self.obstacle_context = Some(ctx);
        }
    }

    pub(crate) fn on_obstacle_updated(
        &mut self,
        ctx: ObstacleContextHandle,
        context: &ObstacleContext,
        handle: ObstacleHandle,
    ) {
        let touched = Arc::clone(&self.touched);
        let _guard = touched.lock();
        if self.obstacle_context.is_some_and(|c| c != ctx) {
            return;
        }
        let (origin, dir, reach) = self.obstacle_ray();
        self.sweep.on_obstacle_updated(handle, context, &origin, &dir, reach);
        if self.sweep.touched_obstacle().is_some() {
            self.obstacle_context = Some(ctx);
        }
    }

    pub(crate) fn on_obstacle_removed(
        &mut self,
        ctx: ObstacleContextHandle,
        handle: ObstacleHandle,
    ) {
        let touched = Arc::clone(&self.touched);
        let _guard = touched.lock();
        if self.obstacle_context == Some(ctx) {
            self.sweep.on_obstacle_removed(handle);
        }
    }

    pub(crate) fn on_obstacle_context_released(&mut self, ctx: ObstacleContextHandle) {
        if self.obstacle_context == Some(ctx) {
            self.sweep.forget_touched_obstacle();
            self.obstacle_context = None;
        }
    }

    pub(crate) fn shift_origin(&mut self, scene: &mut dyn PhysicsScene, shift: &ExtVec3) {
        self.position -= shift;
        self.sweep.on_origin_shift(shift);
        self.sync_proxy_pose(scene);
    }

    /// Displacement carried by the object stood on last frame, and whether it moved.
    fn ride(
        &self,
        scene: &dyn PhysicsScene,
        context: Option<&ObstacleContext>,
        hits: &HitContext<'_>,
    ) -> (Vec3, bool) {
        let none = (Vec3::zeros(), false);
        let (delta, behavior) = if let Some(t) = self.sweep.touched_shape() {
            if scene
                .actor_kind(t.actor)
                .is_none_or(|k| k == ActorKind::Static)
            {
                return none;
            }
            let Some(pose) = scene.actor_pose(t.actor) else {
                return none;
            };
            let now = offset_by(&to_ext(&pose.translation.vector), &(pose.rotation * t.pos_local));
            (diff(&now, &t.pos_world), hits.shape_behavior(t.actor, t.shape))
        } else if let Some(t) = self.sweep.touched_obstacle() {
            let Some(obstacle) = context.and_then(|c| c.get(t.handle)) else {
                return none;
            };
            let now = obstacle.to_world(&t.pos_local);
            (
                diff(&now, &t.pos_world),
                hits.obstacle_behavior(t.handle, obstacle.user_data()),
            )
        } else {
            return none;
        };

        let moving = !is_almost_zero(&delta);
        if behavior.has(BehaviorFlag::UserDefinedRide) {
            return (Vec3::zeros(), moving);
        }
        if behavior.has(BehaviorFlag::CanRideOnObject) {
            return (delta, moving);
        }
        // Not riding: only a rising support carries the controller.
        let up = self.params.up_direction;
        let (vertical, _) = decompose_vector(&delta, &up);
        if vertical.dot(&up) > 0.0 {
            (vertical, moving)
        } else {
            (Vec3::zeros(), moving)
        }
    }

    /// Move by `disp`, resolving collisions. The proxy follows the result.
    pub(crate) fn move_by(
        &mut self,
        scene: &mut dyn PhysicsScene,
        ctx: &MoveContext<'_>,
        disp: &Vec3,
        min_dist: f32,
        elapsed_time: f32,
    ) -> CollisionFlags {
        let touched = Arc::clone(&self.touched);
        let _guard = touched.lock();
        self.global_time += elapsed_time as f64;

        if touched.take_cache_invalidated() {
            self.sweep.invalidate_cache();
        }
        if touched.take_touched_released() {
            if let Some(actor) = self.sweep.touched_shape().map(|t| t.actor) {
                self.sweep.on_actor_released(actor);
            }
        }

        let context_handle = ctx.obstacle_context.map(|(h, _)| h);
        if context_handle != self.obstacle_context {
            self.sweep.forget_touched_obstacle();
            self.obstacle_context = context_handle;
        }
        let context = ctx.obstacle_context.map(|(_, c)| c);

        self.sweep.params = ctx.config.apply(&self.params);
        self.sweep.stats = SweepStats::default();

        let hits = HitContext {
            controller: self.handle,
            report: self.report.as_deref(),
            behavior: self.behavior.as_deref(),
        };

        let mut disp = disp + self.overlap_recover;
        self.overlap_recover = Vec3::zeros();

        let (ride, standing_on_moving) = self.ride(&*scene, context, &hits);
        disp += ride;
        self.delta_xp = ride;

        let env = SweepEnv {
            scene: &*scene,
            obstacles: ctx.obstacles,
            obstacle_context: context,
            filters: ctx.filters,
            hits,
            is_controller_actor: ctx.is_controller_actor,
        };

        let mut volume = SweptVolume::new(self.position, self.shape);
        let initial = volume.center;

        self.sweep
            .flags
            .remove_many(&[SweepTestFlag::WalkExperiment, SweepTestFlag::NormalizeResponse]);
        self.sweep.flags.add(SweepTestFlag::FirstUpdate);
        let mut flags = self
            .sweep
            .move_character(&env, &mut volume, &disp, min_dist, standing_on_moving);

        if self.sweep.flags.has(SweepTestFlag::HitNonWalkable) {
            // Replay from the start without climbing.
            self.sweep.flags.add(SweepTestFlag::WalkExperiment);
            volume.center = initial;

            let mut replay = disp;
            if self.params.non_walkable_mode == NonWalkableMode::PreventClimbingAndForceSliding {
                let (vertical, _) = decompose_vector(&disp, &self.params.up_direction);
                replay = vertical;
                self.sweep.flags.add(SweepTestFlag::NormalizeResponse);
            }

            self.sweep.flags.add(SweepTestFlag::FirstUpdate);
            flags = self
                .sweep
                .move_character(&env, &mut volume, &replay, min_dist, standing_on_moving);
            self.sweep.flags.remove_many(&[
                SweepTestFlag::WalkExperiment,
                SweepTestFlag::NormalizeResponse,
            ]);
        }

        self.position = volume.center;
        self.collision_flags = flags;
        self.sync_proxy_pose(scene);
        touched.publish_touched(self.sweep.touched_shape().map(|t| t.actor));
        flags
    }
}

/// Mutable access to a controller together with the scene holding its proxy.
///
/// Setters that move or reshape the controller go through this view so the
/// proxy stays in lockstep.
pub struct ControllerMut<'a> {
    pub(crate) controller: &'a mut Controller,
    pub(crate) scene: &'a mut dyn PhysicsScene,
}

impl std::ops::Deref for ControllerMut<'_> {
    type Target = Controller;

    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl std::ops::DerefMut for ControllerMut<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

impl ControllerMut<'_> {
    /// Teleport the center. No collision is resolved.
    pub fn set_position(&mut self, position: ExtVec3) {
        self.controller.set_position(self.scene, position);
    }

    pub fn set_foot_position(&mut self, foot: ExtVec3) {
        let c = &*self.controller;
        let rise = c.half_height() + c.params.contact_offset;
        let position = offset_by(&foot, &(c.params.up_direction * rise));
        self.controller.set_position(self.scene, position);
    }

    pub fn set_up_direction(&mut self, up: &Vec3) -> Result<(), CctError> {
        self.controller.set_up_direction(self.scene, up)
    }

    /// Change the height, keeping the foot in place.
    ///
    /// Capsules take the length of the cylindrical part, boxes their full height.
    pub fn resize(&mut self, height: f32) -> Result<(), CctError> {
        let shape = match self.controller.shape {
            VolumeShape::Capsule { radius, .. } => VolumeShape::Capsule { radius, height },
            VolumeShape::Box {
                half_side,
                half_forward,
                ..
            } => VolumeShape::Box {
                half_height: height * 0.5,
                half_side,
                half_forward,
            },
        };
        self.controller.set_shape(self.scene, shape, true)
    }

    /// Capsules only. The center stays put.
    pub fn set_radius(&mut self, radius: f32) -> Result<(), CctError> {
        let VolumeShape::Capsule { height, .. } = self.controller.shape else {
            return Err(CctError::InvalidDescriptor("not a capsule controller"));
        };
        self.controller
            .set_shape(self.scene, VolumeShape::Capsule { radius, height }, false)
    }

    /// Capsules only. The center stays put.
    pub fn set_height(&mut self, height: f32) -> Result<(), CctError> {
        let VolumeShape::Capsule { radius, .. } = self.controller.shape else {
            return Err(CctError::InvalidDescriptor("not a capsule controller"));
        };
        self.controller
            .set_shape(self.scene, VolumeShape::Capsule { radius, height }, false)
    }

    /// Boxes only.
    pub fn set_half_extents(
        &mut self,
        half_height: f32,
        half_side: f32,
        half_forward: f32,
    ) -> Result<(), CctError> {
        if !matches!(self.controller.shape, VolumeShape::Box { .. }) {
            return Err(CctError::InvalidDescriptor("not a box controller"));
        }
        let shape = VolumeShape::Box {
            half_height,
            half_side,
            half_forward,
        };
        self.controller.set_shape(self.scene, shape, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::sweep_test::tests::ListScene;
    use approx::assert_relative_eq;

    fn spawn(scene: &mut ListScene, desc: &ControllerDesc) -> Controller {
        Controller::new(ControllerHandle::default(), desc, scene, false).unwrap()
    }

    #[test]
    fn descriptor_validation_rejects_bad_dimensions() {
        assert!(ControllerDesc::default().is_valid());
        assert!(ControllerDesc::boxed(1.0, 0.5, 0.5).is_valid());

        assert!(matches!(
            ControllerDesc::capsule(0.0, 1.0).validate(),
            Err(CctError::InvalidDimension { name: "radius", .. })
        ));
        assert!(!ControllerDesc::boxed(1.0, -0.5, 0.5).is_valid());
        assert!(!ControllerDesc::default().with_contact_offset(0.0).is_valid());
        assert!(!ControllerDesc::default().with_step_offset(5.0).is_valid());
        assert!(!ControllerDesc::default().with_up_direction(Vec3::zeros()).is_valid());
        assert!(!ControllerDesc::default().with_slope_limit(-0.1).is_valid());
    }

    #[test]
    fn invalid_setters_leave_state_untouched() {
        let mut scene = ListScene::default();
        let mut c = spawn(&mut scene, &ControllerDesc::default());

        assert!(c.set_contact_offset(-1.0).is_err());
        assert_relative_eq!(c.contact_offset(), DEFAULT_CONTACT_OFFSET);
        assert!(c.set_step_offset(f32::NAN).is_err());
        assert_relative_eq!(c.step_offset(), DEFAULT_STEP_OFFSET);
        assert!(c.set_slope_limit(2.0).is_err());
        assert_relative_eq!(c.slope_limit(), DEFAULT_SLOPE_LIMIT);

        let mut view = ControllerMut {
            controller: &mut c,
            scene: &mut scene,
        };
        assert!(view.set_radius(0.0).is_err());
        assert!(view.set_half_extents(1.0, 1.0, 1.0).is_err());
        assert_eq!(
            view.shape(),
            VolumeShape::Capsule {
                radius: 0.5,
                height: 1.0
            }
        );
    }

    #[test]
    fn resize_keeps_the_foot_in_place() {
        let mut scene = ListScene::default();
        let desc = ControllerDesc::capsule(0.5, 2.0).with_position(ExtVec3::new(1.0, 1.6, 0.0));
        let mut c = spawn(&mut scene, &desc);
        let foot = c.foot_position();
        assert_relative_eq!(foot.y, 0.0, epsilon = 1.0e-6);

        let mut view = ControllerMut {
            controller: &mut c,
            scene: &mut scene,
        };
        view.resize(1.0).unwrap();
        assert_relative_eq!(view.foot_position().y, foot.y, epsilon = 1.0e-6);
        assert_relative_eq!(view.position().y, 1.1, epsilon = 1.0e-6);
        assert_relative_eq!(view.position().x, 1.0);
    }

    #[test]
    fn foot_position_round_trips() {
        let mut scene = ListScene::default();
        let desc = ControllerDesc::boxed(1.0, 0.4, 0.3).with_up_direction(Vec3::z());
        let mut c = spawn(&mut scene, &desc);
        let mut view = ControllerMut {
            controller: &mut c,
            scene: &mut scene,
        };
        view.set_foot_position(ExtVec3::new(3.0, 4.0, 5.0));
        assert_relative_eq!(view.position().z, 6.1, epsilon = 1.0e-6);
        assert_relative_eq!(view.foot_position().z, 5.0, epsilon = 1.0e-6);
    }

    #[test]
    fn user_volumes_follow_the_shape() {
        let mut scene = ListScene::default();
        let cap = spawn(&mut scene, &ControllerDesc::capsule(0.5, 2.0));
        let b = spawn(&mut scene, &ControllerDesc::boxed(1.0, 0.5, 0.5));

        let segment = cap.capsule().unwrap();
        assert_relative_eq!(segment.p0.y, -1.0);
        assert_relative_eq!(segment.p1.y, 1.0);
        assert!(cap.obb().is_none());

        let obb = b.obb().unwrap();
        // Local +X maps onto up.
        let up = obb.rotation * Vec3::x();
        assert_relative_eq!(up, Vec3::y(), epsilon = 1.0e-6);

        let mut out = UserObstacles::default();
        cap.push_user_volume(&mut out);
        b.push_user_volume(&mut out);
        assert_eq!(out.capsules.len(), 1);
        assert_eq!(out.boxes.len(), 1);
    }

    #[test]
    fn climbing_mode_is_capsule_only() {
        let mut scene = ListScene::default();
        let mut b = spawn(&mut scene, &ControllerDesc::boxed(1.0, 0.5, 0.5));
        assert!(b.set_climbing_mode(ClimbingMode::Constrained).is_err());
        let mut c = spawn(&mut scene, &ControllerDesc::default());
        assert!(c.set_climbing_mode(ClimbingMode::Constrained).is_ok());
        assert_eq!(c.climbing_mode(), ClimbingMode::Constrained);
    }
}
