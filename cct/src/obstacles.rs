//! User obstacles: boxes and capsules the controllers collide with, kept
//! outside the physics scene.
//!
//! Contexts are owned by the [`crate::manager::ControllerManager`]; every
//! mutation goes through the manager so controllers can drop cached state.

use nalgebra as na;
use rapier3d::parry::{
    query::{Ray, RayCast},
    shape::{Capsule, Cuboid},
};
use slotmap::{SlotMap, new_key_type};

use crate::{
    collision::types::{ExtBounds, ExtVec3, Iso, Point3, Quat, Vec3, diff, offset_by, to_ext},
    error::{CctError, check_dimension},
};

new_key_type! {
    /// Stable identifier of an obstacle within its context.
    pub struct ObstacleHandle;
    /// Identifier of an obstacle context owned by the manager.
    pub struct ObstacleContextHandle;
}

/// Oriented box obstacle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxObstacle {
    pub position: ExtVec3,
    pub rotation: Quat,
    pub half_extents: Vec3,
    pub user_data: u64,
}

/// Capsule obstacle. The segment runs along the local +X axis, `half_height` on each side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapsuleObstacle {
    pub position: ExtVec3,
    pub rotation: Quat,
    pub half_height: f32,
    pub radius: f32,
    pub user_data: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Obstacle {
    Box(BoxObstacle),
    Capsule(CapsuleObstacle),
}

impl Obstacle {
    pub fn position(&self) -> ExtVec3 {
        match self {
            Obstacle::Box(b) => b.position,
            Obstacle::Capsule(c) => c.position,
        }
    }

    pub fn rotation(&self) -> Quat {
        match self {
            Obstacle::Box(b) => b.rotation,
            Obstacle::Capsule(c) => c.rotation,
        }
    }

    pub fn user_data(&self) -> u64 {
        match self {
            Obstacle::Box(b) => b.user_data,
            Obstacle::Capsule(c) => c.user_data,
        }
    }

    fn validate(&self) -> Result<(), CctError> {
        match self {
            Obstacle::Box(b) => {
                check_dimension("half_extents.x", b.half_extents.x)?;
                check_dimension("half_extents.y", b.half_extents.y)?;
                check_dimension("half_extents.z", b.half_extents.z)?;
            }
            Obstacle::Capsule(c) => {
                check_dimension("radius", c.radius)?;
                if !(c.half_height.is_finite() && c.half_height >= 0.0) {
                    return Err(CctError::InvalidDimension {
                        name: "half_height",
                        value: c.half_height,
                    });
                }
            }
        }
        Ok(())
    }

    /// World-space bounds.
    pub fn world_bounds(&self) -> ExtBounds {
        let extents = match self {
            Obstacle::Box(b) => {
                let abs = b.rotation.to_rotation_matrix().matrix().abs();
                abs * b.half_extents
            }
            Obstacle::Capsule(c) => {
                let axis = c.rotation * Vec3::new(c.half_height, 0.0, 0.0);
                axis.abs() + Vec3::repeat(c.radius)
            }
        };
        ExtBounds::from_center_extents(&self.position(), &extents)
    }

    /// Capsule segment end points in world space.
    pub fn capsule_segment(c: &CapsuleObstacle) -> (ExtVec3, ExtVec3) {
        let axis = c.rotation * Vec3::new(c.half_height, 0.0, 0.0);
        (offset_by(&c.position, &-axis), offset_by(&c.position, &axis))
    }

    /// Express a world point in the obstacle's local frame.
    pub fn to_local(&self, world: &ExtVec3) -> Vec3 {
        self.rotation().inverse() * diff(world, &self.position())
    }

    /// Bring a local point back to world space.
    pub fn to_world(&self, local: &Vec3) -> ExtVec3 {
        offset_by(&self.position(), &(self.rotation() * local))
    }

    /// Ray cast against the obstacle. Returns `(distance, normal)`.
    pub fn raycast(&self, origin: &ExtVec3, dir: &Vec3, max_dist: f32) -> Option<(f32, Vec3)> {
        let pose = Iso::from_parts(
            na::Translation3::from(diff(&self.position(), origin)),
            self.rotation(),
        );
        let ray = Ray::new(Point3::origin(), *dir);
        let hit = match self {
            Obstacle::Box(b) => {
                Cuboid::new(b.half_extents).cast_ray_and_get_normal(&pose, &ray, max_dist, true)
            }
            Obstacle::Capsule(c) => Capsule::new_x(c.half_height, c.radius)
                .cast_ray_and_get_normal(&pose, &ray, max_dist, true),
        }?;
        Some((hit.time_of_impact, hit.normal))
    }

    fn shift(&mut self, shift: &ExtVec3) {
        match self {
            Obstacle::Box(b) => b.position -= shift,
            Obstacle::Capsule(c) => c.position -= shift,
        }
    }
}

/// Result of [`ObstacleContext::raycast_single`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObstacleRaycastHit {
    pub handle: ObstacleHandle,
    pub distance: f32,
    pub position: ExtVec3,
    pub normal: Vec3,
}

/// A set of obstacles with stable handles and dense storage.
#[derive(Default)]
pub struct ObstacleContext {
    entries: Vec<(ObstacleHandle, Obstacle)>,
    slots: SlotMap<ObstacleHandle, usize>,
}

impl ObstacleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, handle: ObstacleHandle) -> Option<&Obstacle> {
        let index = *self.slots.get(handle)?;
        self.entries.get(index).map(|(_, o)| o)
    }

    /// Obstacle at a dense index. Indices change when obstacles are removed.
    pub fn get_by_index(&self, index: usize) -> Option<(ObstacleHandle, &Obstacle)> {
        self.entries.get(index).map(|(h, o)| (*h, o))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObstacleHandle, &Obstacle)> {
        self.entries.iter().map(|(h, o)| (*h, o))
    }

    pub(crate) fn add(&mut self, obstacle: Obstacle) -> Result<ObstacleHandle, CctError> {
        obstacle.validate()?;
        let index = self.entries.len();
        let handle = self.slots.insert(index);
        self.entries.push((handle, obstacle));
        Ok(handle)
    }

    pub(crate) fn remove(&mut self, handle: ObstacleHandle) -> Result<Obstacle, CctError> {
        let index = self.slots.remove(handle).ok_or(CctError::UnknownObstacle)?;
        let (_, removed) = self.entries.swap_remove(index);
        if let Some((moved, _)) = self.entries.get(index) {
            if let Some(slot) = self.slots.get_mut(*moved) {
                *slot = index;
            }
        }
        Ok(removed)
    }

    pub(crate) fn update(
        &mut self,
        handle: ObstacleHandle,
        obstacle: Obstacle,
    ) -> Result<(), CctError> {
        let index = *self.slots.get(handle).ok_or(CctError::UnknownObstacle)?;
        obstacle.validate()?;
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(CctError::UnknownObstacle)?;
        entry.1 = obstacle;
        Ok(())
    }

    pub(crate) fn shift_origin(&mut self, shift: &ExtVec3) {
        for (_, obstacle) in &mut self.entries {
            obstacle.shift(shift);
        }
    }

    /// Closest obstacle hit by a ray, if any. `dir` must be unit length.
    pub fn raycast_single(
        &self,
        origin: &ExtVec3,
        dir: &Vec3,
        max_dist: f32,
    ) -> Option<ObstacleRaycastHit> {
        let mut best: Option<ObstacleRaycastHit> = None;
        for (handle, obstacle) in &self.entries {
            let limit = best.map_or(max_dist, |b| b.distance);
            if let Some((distance, normal)) = obstacle.raycast(origin, dir, limit) {
                if best.is_none_or(|b| distance < b.distance) {
                    best = Some(ObstacleRaycastHit {
                        handle: *handle,
                        distance,
                        position: origin + to_ext(&(dir * distance)),
                        normal,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box(x: f64, y: f64, z: f64) -> Obstacle {
        Obstacle::Box(BoxObstacle {
            position: ExtVec3::new(x, y, z),
            rotation: Quat::identity(),
            half_extents: Vec3::repeat(0.5),
            user_data: 7,
        })
    }

    #[test]
    fn handles_survive_removal_of_other_obstacles() {
        let mut ctx = ObstacleContext::new();
        let a = ctx.add(unit_box(0.0, 0.0, 0.0)).unwrap();
        let b = ctx.add(unit_box(5.0, 0.0, 0.0)).unwrap();
        let c = ctx.add(unit_box(9.0, 0.0, 0.0)).unwrap();

        ctx.remove(a).unwrap();
        assert_eq!(ctx.len(), 2);
        assert!(ctx.get(a).is_none());
        assert_relative_eq!(ctx.get(c).unwrap().position().x, 9.0);
        assert_relative_eq!(ctx.get(b).unwrap().position().x, 5.0);
        assert_eq!(ctx.remove(a), Err(CctError::UnknownObstacle));
    }

    #[test]
    fn invalid_obstacles_are_rejected_without_mutation() {
        let mut ctx = ObstacleContext::new();
        let bad = Obstacle::Capsule(CapsuleObstacle {
            position: ExtVec3::zeros(),
            rotation: Quat::identity(),
            half_height: 1.0,
            radius: 0.0,
            user_data: 0,
        });
        assert!(ctx.add(bad).is_err());
        assert!(ctx.is_empty());

        let h = ctx.add(unit_box(0.0, 0.0, 0.0)).unwrap();
        assert!(ctx.update(h, bad).is_err());
        assert_eq!(ctx.get(h), Some(&unit_box(0.0, 0.0, 0.0)));
    }

    #[test]
    fn raycast_single_returns_closest_obstacle() {
        let mut ctx = ObstacleContext::new();
        let _far = ctx.add(unit_box(0.0, 0.0, -10.0)).unwrap();
        let near = ctx.add(unit_box(0.0, 0.0, -3.0)).unwrap();

        let hit = ctx
            .raycast_single(&ExtVec3::zeros(), &-Vec3::z(), 100.0)
            .expect("ray hits");
        assert_eq!(hit.handle, near);
        assert_relative_eq!(hit.distance, 2.5, epsilon = 1.0e-5);
        assert_relative_eq!(hit.position.z, -2.5, epsilon = 1.0e-5);
        assert_relative_eq!(hit.normal, Vec3::z(), epsilon = 1.0e-5);

        assert!(ctx.raycast_single(&ExtVec3::zeros(), &-Vec3::z(), 1.0).is_none());
    }

    #[test]
    fn local_round_trip_through_obstacle_frame() {
        let obstacle = Obstacle::Capsule(CapsuleObstacle {
            position: ExtVec3::new(1.0e6, 2.0, 3.0),
            rotation: Quat::from_axis_angle(&Vec3::z_axis(), 0.7),
            half_height: 1.0,
            radius: 0.25,
            user_data: 0,
        });
        let world = ExtVec3::new(1.0e6 + 0.5, 2.25, 3.0);
        let back = obstacle.to_world(&obstacle.to_local(&world));
        assert_relative_eq!(back.x, world.x, epsilon = 1.0e-4);
        assert_relative_eq!(back.y, world.y, epsilon = 1.0e-4);
    }

    #[test]
    fn shifting_origin_moves_every_obstacle() {
        let mut ctx = ObstacleContext::new();
        let h = ctx.add(unit_box(10.0, 0.0, 0.0)).unwrap();
        ctx.shift_origin(&ExtVec3::new(4.0, 0.0, 0.0));
        assert_relative_eq!(ctx.get(h).unwrap().position().x, 6.0);
    }
}
