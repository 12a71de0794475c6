use nalgebra as na;
use rapier3d::parry::shape::{self as pshape, Shape};

use super::{
    sweep_test::CctParams,
    types::{ExtBounds, ExtVec3, Iso, Quat, Vec3, to_ext},
};

/// Dimensions of a controller volume.
///
/// Capsules are aligned with the up direction; `height` is the length of the
/// cylindrical part, so the full height is `height + 2 * radius`.
/// Boxes use `half_height` along up, `half_side` and `half_forward` on the
/// two remaining local axes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VolumeShape {
    Capsule {
        radius: f32,
        height: f32,
    },
    Box {
        half_height: f32,
        half_side: f32,
        half_forward: f32,
    },
}

/// The volume swept by a controller during one move.
///
/// Owned by its controller and rebuilt from the controller state on every move.
#[derive(Clone, Copy, Debug)]
pub struct SweptVolume {
    /// Center of the volume in world space (extended precision).
    pub center: ExtVec3,
    pub shape: VolumeShape,
}

/// A parry shape matching a swept volume, expressed around the local origin.
pub enum VolumeGeom {
    Capsule(pshape::Capsule),
    Cuboid(pshape::Cuboid),
}

impl VolumeGeom {
    pub fn as_shape(&self) -> &dyn Shape {
        match self {
            VolumeGeom::Capsule(c) => c as &dyn Shape,
            VolumeGeom::Cuboid(c) => c as &dyn Shape,
        }
    }
}

impl SweptVolume {
    pub fn new(center: ExtVec3, shape: VolumeShape) -> Self {
        Self { center, shape }
    }

    /// Distance from the center to the bottom of the volume along up.
    pub fn half_height(&self) -> f32 {
        match self.shape {
            VolumeShape::Capsule { radius, height } => radius + height * 0.5,
            VolumeShape::Box { half_height, .. } => half_height,
        }
    }

    /// World-axis half extents of the volume (no contact offset).
    pub fn extents(&self, up: &Vec3, quat_from_up: &Quat) -> Vec3 {
        match self.shape {
            VolumeShape::Capsule { radius, height } => {
                Vec3::repeat(radius) + up.abs() * (height * 0.5)
            }
            VolumeShape::Box {
                half_height,
                half_side,
                half_forward,
            } => {
                let rot = quat_from_up.to_rotation_matrix();
                let abs = rot.matrix().abs();
                abs * Vec3::new(half_height, half_side, half_forward)
            }
        }
    }

    /// World bounds of the volume at its current center.
    pub fn world_box(&self, up: &Vec3, quat_from_up: &Quat) -> ExtBounds {
        ExtBounds::from_center_extents(&self.center, &self.extents(up, quat_from_up))
    }

    /// Conservative bounds of the path followed when moving by `direction` from `center`.
    ///
    /// The box covers the volume inflated by the contact offset at the start and end
    /// positions, and at `center - up * max_jump_height` when a jump height is configured.
    pub fn compute_temporal_box(
        &self,
        params: &CctParams,
        center: &ExtVec3,
        direction: &Vec3,
    ) -> ExtBounds {
        let extents = self.extents(&params.up_direction, &params.quat_from_up)
            + Vec3::repeat(params.contact_offset);

        let start = ExtBounds::from_center_extents(center, &extents);
        let mut temporal = start;
        temporal.add(&start.translated(&to_ext(direction)));

        if params.max_jump_height != 0.0 {
            let jump = params.up_direction * params.max_jump_height;
            temporal.add(&start.translated(&to_ext(&-jump)));
        }

        temporal
    }

    /// Parry shape and its orientation, centered on the local origin.
    pub fn geometry(&self, params: &CctParams) -> (VolumeGeom, Quat) {
        match self.shape {
            VolumeShape::Capsule { radius, height } => {
                let axis = params.up_direction * (height * 0.5);
                let capsule =
                    pshape::Capsule::new(na::Point3::from(-axis), na::Point3::from(axis), radius);
                (VolumeGeom::Capsule(capsule), Quat::identity())
            }
            VolumeShape::Box {
                half_height,
                half_side,
                half_forward,
            } => (
                VolumeGeom::Cuboid(pshape::Cuboid::new(Vec3::new(
                    half_height,
                    half_side,
                    half_forward,
                ))),
                params.quat_from_up,
            ),
        }
    }

    /// Pose of the volume at local position `local_center`.
    #[inline]
    pub fn pose(local_center: &Vec3, rotation: Quat) -> Iso {
        Iso::from_parts(na::Translation3::from(*local_center), rotation)
    }
}
