//! Controller manager: owns the scene, the controllers and the obstacle contexts.
//!
//! Frame flow
//! - `move_controller` for every controller; each move sees the other controllers
//!   and the selected obstacle context as user volumes.
//! - `compute_interactions` once, after every move. Overlapping controllers get a
//!   clamped, symmetric separation applied at the start of their next move.
//!
//! Obstacle mutations go through the manager so every controller can drop
//! stale cached state.

use rapier3d::parry::{bounding_volume::Aabb, utils::hashmap::HashMap};
use slotmap::SlotMap;

use crate::{
    callbacks::{ControllerFilterCallback, ControllerFilters},
    collision::{
        broad::{PruningAxes, complete_box_pruning},
        distance::{SatAxes, box_box_mtd, fix_dir, segment_box, segment_segment},
        settings::{DEFAULT_MAX_EDGE_LENGTH, MAX_OVERLAP_RECOVER},
        sweep_test::{CctParams, CollisionFlags},
        swept_volume::VolumeShape,
        touched::{UserBox, UserCapsule, UserObject, UserObstacles, reset_or_clear},
        types::{ExtVec3, Vec3, diff},
    },
    controller::{Controller, ControllerDesc, ControllerHandle, ControllerMut, MoveContext},
    error::{CctError, check_dimension},
    obstacles::{Obstacle, ObstacleContext, ObstacleContextHandle, ObstacleHandle},
    scene::{ActorHandle, PhysicsScene},
};

/// Manager-wide switches, applied to every controller on each move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ManagerConfig {
    /// Split long mesh triangles before sweeping against them.
    pub tessellation: bool,
    pub max_edge_length: f32,
    /// Push controllers out of scene geometry they start a sweep in.
    pub overlap_recovery: bool,
    pub precise_sweeps: bool,
    pub prevent_vertical_sliding_against_ceiling: bool,
    /// Serialize moves with deletion callbacks. Applies to controllers created afterwards.
    pub locking_enabled: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tessellation: false,
            max_edge_length: DEFAULT_MAX_EDGE_LENGTH,
            overlap_recovery: true,
            precise_sweeps: true,
            prevent_vertical_sliding_against_ceiling: false,
            locking_enabled: false,
        }
    }
}

impl ManagerConfig {
    /// Controller parameters with the manager switches applied.
    pub(crate) fn apply(&self, params: &CctParams) -> CctParams {
        CctParams {
            tessellation: self.tessellation,
            max_edge_length2: self.max_edge_length * self.max_edge_length,
            overlap_recovery: self.overlap_recovery,
            precise_sweeps: self.precise_sweeps,
            prevent_vertical_sliding_against_ceiling: self
                .prevent_vertical_sliding_against_ceiling,
            ..*params
        }
    }
}

/// Owner of every controller moving through one scene.
pub struct ControllerManager<S: PhysicsScene> {
    scene: S,
    config: ManagerConfig,
    controllers: SlotMap<ControllerHandle, Controller>,
    proxies: HashMap<ActorHandle, ControllerHandle>,
    contexts: SlotMap<ObstacleContextHandle, ObstacleContext>,
    user_volumes: UserObstacles,
    boxes: Vec<Aabb>,
    order: Vec<ControllerHandle>,
}

impl<S: PhysicsScene> ControllerManager<S> {
    pub fn new(scene: S) -> Self {
        Self::with_config(scene, ManagerConfig::default())
    }

    pub fn with_config(scene: S, config: ManagerConfig) -> Self {
        log::info!("controller manager created ({config:?})");
        Self {
            scene,
            config,
            controllers: SlotMap::with_key(),
            proxies: HashMap::default(),
            contexts: SlotMap::with_key(),
            user_volumes: UserObstacles::default(),
            boxes: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// The scene, for adding, moving or releasing actors.
    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn set_tessellation(
        &mut self,
        enabled: bool,
        max_edge_length: f32,
    ) -> Result<(), CctError> {
        check_dimension("max_edge_length", max_edge_length)?;
        self.config.tessellation = enabled;
        self.config.max_edge_length = max_edge_length;
        self.invalidate_caches();
        Ok(())
    }

    pub fn set_overlap_recovery_module(&mut self, enabled: bool) {
        self.config.overlap_recovery = enabled;
    }

    pub fn set_precise_sweeps(&mut self, enabled: bool) {
        self.config.precise_sweeps = enabled;
    }

    pub fn set_prevent_vertical_sliding_against_ceiling(&mut self, enabled: bool) {
        self.config.prevent_vertical_sliding_against_ceiling = enabled;
    }

    /// Takes effect for controllers created afterwards.
    pub fn set_locking_enabled(&mut self, enabled: bool) {
        self.config.locking_enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn controller(&self, handle: ControllerHandle) -> Option<&Controller> {
        self.controllers.get(handle)
    }

    pub fn controller_mut(&mut self, handle: ControllerHandle) -> Option<ControllerMut<'_>> {
        let controller = self.controllers.get_mut(handle)?;
        Some(ControllerMut {
            controller,
            scene: &mut self.scene,
        })
    }

    pub fn controllers(&self) -> impl Iterator<Item = (ControllerHandle, &Controller)> {
        self.controllers.iter()
    }

    /// Controller owning a kinematic proxy actor.
    pub fn controller_of_actor(&self, actor: ActorHandle) -> Option<ControllerHandle> {
        self.proxies.get(&actor).copied()
    }

    pub fn create_controller(
        &mut self,
        desc: &ControllerDesc,
    ) -> Result<ControllerHandle, CctError> {
        let Self {
            scene,
            config,
            controllers,
            proxies,
            ..
        } = self;
        let handle = controllers.try_insert_with_key(|handle| {
            Controller::new(handle, desc, scene, config.locking_enabled)
        })?;
        if let Some(controller) = controllers.get(handle) {
            proxies.insert(controller.actor(), handle);
        }
        log::info!("created controller {handle:?}");
        Ok(handle)
    }

    pub fn release_controller(&mut self, handle: ControllerHandle) -> Result<(), CctError> {
        let controller = self
            .controllers
            .remove(handle)
            .ok_or(CctError::UnknownController)?;
        self.proxies.remove(&controller.actor());
        controller.release(&mut self.scene);
        log::info!("released controller {handle:?}");
        Ok(())
    }

    /// Release every controller.
    pub fn purge_controllers(&mut self) {
        let handles: Vec<_> = self.controllers.keys().collect();
        for handle in handles {
            if let Some(controller) = self.controllers.remove(handle) {
                controller.release(&mut self.scene);
            }
        }
        self.proxies.clear();
    }

    /// Release everything and hand the scene back.
    pub fn release(mut self) -> S {
        self.purge_controllers();
        self.contexts.clear();
        self.scene
    }

    /// Move a controller by `disp`, sliding along whatever blocks it.
    ///
    /// Remaining motion shorter than `min_dist` is dropped. The other controllers and
    /// the obstacles of `obstacles` are collided against as well as the scene.
    pub fn move_controller(
        &mut self,
        handle: ControllerHandle,
        disp: &Vec3,
        min_dist: f32,
        elapsed_time: f32,
        filters: &ControllerFilters<'_>,
        obstacles: Option<ObstacleContextHandle>,
    ) -> Result<CollisionFlags, CctError> {
        let Self {
            scene,
            config,
            controllers,
            proxies,
            contexts,
            user_volumes,
            ..
        } = self;

        if !controllers.contains_key(handle) {
            return Err(CctError::UnknownController);
        }
        let context = match obstacles {
            Some(h) => Some((h, contexts.get(h).ok_or(CctError::UnknownObstacleContext)?)),
            None => None,
        };

        user_volumes.reset_or_clear();
        if let Some((_, ctx)) = context {
            push_obstacles(ctx, user_volumes);
        }
        for (other, controller) in controllers.iter() {
            if other == handle {
                continue;
            }
            if let Some(cb) = filters.cct_filter_callback {
                if !cb.filter(handle, other) {
                    continue;
                }
            }
            controller.push_user_volume(user_volumes);
        }

        let is_controller_actor = |actor: ActorHandle| proxies.contains_key(&actor);
        let move_ctx = MoveContext {
            config,
            obstacles: user_volumes,
            obstacle_context: context,
            filters,
            is_controller_actor: &is_controller_actor,
        };

        let controller = controllers
            .get_mut(handle)
            .ok_or(CctError::UnknownController)?;
        Ok(controller.move_by(scene, &move_ctx, disp, min_dist, elapsed_time))
    }

    /// Push overlapping controllers apart.
    ///
    /// Each overlapping pair receives equal and opposite separations, together at most
    /// `MAX_OVERLAP_RECOVER * elapsed_time`, applied by the controllers' next moves.
    pub fn compute_interactions(
        &mut self,
        elapsed_time: f32,
        filter: Option<&dyn ControllerFilterCallback>,
    ) {
        reset_or_clear(&mut self.order);
        self.order.extend(self.controllers.keys());
        if self.order.len() < 2 {
            return;
        }

        let Some(origin) = self.controllers.get(self.order[0]).map(|c| c.position()) else {
            return;
        };

        reset_or_clear(&mut self.boxes);
        for handle in &self.order {
            if let Some(c) = self.controllers.get(*handle) {
                self.boxes.push(c.world_box().to_local_aabb(&origin));
            }
        }

        let max_recover = MAX_OVERLAP_RECOVER * elapsed_time;
        for (i, j) in complete_box_pruning(&self.boxes, PruningAxes::XZY) {
            let (h0, h1) = (self.order[i], self.order[j]);
            if filter.is_some_and(|f| !f.filter(h0, h1)) {
                continue;
            }
            let (Some(c0), Some(c1)) = (self.controllers.get(h0), self.controllers.get(h1)) else {
                continue;
            };
            let Some((dir, depth)) = controller_overlap(c0, c1, &origin) else {
                continue;
            };

            let separation = dir * (depth.min(max_recover) * 0.5);
            if let Some(c0) = self.controllers.get_mut(h0) {
                c0.add_overlap_recover(&separation);
            }
            if let Some(c1) = self.controllers.get_mut(h1) {
                c1.add_overlap_recover(&-separation);
            }
        }
    }

    /// Move the world origin by `shift`: controllers and obstacles are translated by `-shift`.
    pub fn shift_origin(&mut self, shift: &ExtVec3) {
        for (_, controller) in self.controllers.iter_mut() {
            controller.shift_origin(&mut self.scene, shift);
        }
        for (_, context) in self.contexts.iter_mut() {
            context.shift_origin(shift);
        }
    }

    fn invalidate_caches(&mut self) {
        for (_, controller) in self.controllers.iter_mut() {
            controller.invalidate_cache();
        }
    }

    pub fn create_obstacle_context(&mut self) -> ObstacleContextHandle {
        self.contexts.insert(ObstacleContext::new())
    }

    pub fn release_obstacle_context(&mut self, ctx: ObstacleContextHandle) -> Result<(), CctError> {
        self.contexts
            .remove(ctx)
            .ok_or(CctError::UnknownObstacleContext)?;
        for (_, controller) in self.controllers.iter_mut() {
            controller.on_obstacle_context_released(ctx);
        }
        Ok(())
    }

    pub fn obstacle_context(&self, ctx: ObstacleContextHandle) -> Option<&ObstacleContext> {
        self.contexts.get(ctx)
    }

    pub fn add_obstacle(
        &mut self,
        ctx: ObstacleContextHandle,
        obstacle: Obstacle,
    ) -> Result<ObstacleHandle, CctError> {
        let context = self
            .contexts
            .get_mut(ctx)
            .ok_or(CctError::UnknownObstacleContext)?;
        let handle = context.add(obstacle)?;
        for (_, controller) in self.controllers.iter_mut() {
            controller.on_obstacle_added(ctx, context, handle);
        }
        Ok(handle)
    }

    pub fn update_obstacle(
        &mut self,
        ctx: ObstacleContextHandle,
        handle: ObstacleHandle,
        obstacle: Obstacle,
    ) -> Result<(), CctError> {
        let context = self
            .contexts
            .get_mut(ctx)
            .ok_or(CctError::UnknownObstacleContext)?;
        context.update(handle, obstacle)?;
        for (_, controller) in self.controllers.iter_mut() {
            controller.on_obstacle_updated(ctx, context, handle);
        }
        Ok(())
    }

    pub fn remove_obstacle(
        &mut self,
        ctx: ObstacleContextHandle,
        handle: ObstacleHandle,
    ) -> Result<Obstacle, CctError> {
        let context = self
            .contexts
            .get_mut(ctx)
            .ok_or(CctError::UnknownObstacleContext)?;
        let removed = context.remove(handle)?;
        for (_, controller) in self.controllers.iter_mut() {
            controller.on_obstacle_removed(ctx, handle);
        }
        Ok(removed)
    }
}

fn push_obstacles(context: &ObstacleContext, out: &mut UserObstacles) {
    for (handle, obstacle) in context.iter() {
        let owner = UserObject::Obstacle {
            handle,
            user_data: obstacle.user_data(),
        };
        match obstacle {
            Obstacle::Box(b) => out.boxes.push(UserBox {
                center: b.position,
                rotation: b.rotation,
                half_extents: b.half_extents,
                owner,
            }),
            Obstacle::Capsule(c) => {
                let (p0, p1) = Obstacle::capsule_segment(c);
                out.capsules.push(UserCapsule {
                    p0,
                    p1,
                    radius: c.radius,
                    owner,
                });
            }
        }
    }
}

/// Horizontal separation direction (from `c1` towards `c0`) and penetration depth.
fn controller_overlap(c0: &Controller, c1: &Controller, origin: &ExtVec3) -> Option<(Vec3, f32)> {
    let up = c0.up_direction();
    let centers = diff(&c0.position(), &c1.position());

    let (axis, depth) = match (c0.shape(), c1.shape()) {
        (VolumeShape::Capsule { .. }, VolumeShape::Capsule { .. }) => {
            let (a, b) = (c0.capsule()?, c1.capsule()?);
            let (a0, a1) = (diff(&a.p0, origin), diff(&a.p1, origin));
            let (b0, b1) = (diff(&b.p0, origin), diff(&b.p1, origin));
            let (d2, s, t) = segment_segment(&a0, &(a1 - a0), &b0, &(b1 - b0));
            let r = a.radius + b.radius;
            if d2 >= r * r {
                return None;
            }
            let closest = (a0 + (a1 - a0) * s) - (b0 + (b1 - b0) * t);
            (closest, r - d2.sqrt())
        }
        (VolumeShape::Box { .. }, VolumeShape::Capsule { .. }) => {
            let (b, c) = (c0.obb()?, c1.capsule()?);
            (centers, box_capsule_depth(&b, &c, origin)?)
        }
        (VolumeShape::Capsule { .. }, VolumeShape::Box { .. }) => {
            let (c, b) = (c0.capsule()?, c1.obb()?);
            (centers, box_capsule_depth(&b, &c, origin)?)
        }
        (VolumeShape::Box { .. }, VolumeShape::Box { .. }) => {
            let (a, b) = (c0.obb()?, c1.obb()?);
            let (axis, depth) = box_box_mtd(
                &a.half_extents,
                &diff(&a.center, origin),
                &a.rotation,
                &b.half_extents,
                &diff(&b.center, origin),
                &b.rotation,
                SatAxes::Faces,
            )?;
            let axis = if axis.dot(&centers) < 0.0 { -axis } else { axis };
            (axis, depth)
        }
    };

    let mut dir = fix_dir(&axis, &up);
    if dir == Vec3::zeros() {
        dir = fix_dir(&centers, &up);
    }
    (dir != Vec3::zeros() && depth > 0.0).then_some((dir, depth))
}

fn box_capsule_depth(b: &UserBox, c: &UserCapsule, origin: &ExtVec3) -> Option<f32> {
    let d = segment_box(
        &diff(&c.p0, origin),
        &diff(&c.p1, origin),
        &diff(&b.center, origin),
        &b.half_extents,
        &b.rotation,
    );
    (d < c.radius).then(|| c.radius - d)
}
