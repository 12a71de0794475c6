use rapier3d::{na::UnitQuaternion, prelude::*};

use crate::error::CctError;

/// Canonical, schema-agnostic definition of a world collider.
#[derive(Clone, Debug)]
pub struct WorldStaticDef {
    pub id: u32,
    /// World-space translation.
    pub translation: Vector<f32>,
    /// World-space rotation (unit quaternion).
    pub rotation: UnitQuaternion<f32>,
    /// Collider shape parameters.
    pub shape: ColliderShapeDef,
}

/// Supported world collider shapes.
#[derive(Clone, Debug)]
pub enum ColliderShapeDef {
    /// Infinite plane (half-space).
    ///
    /// This is represented by an offset along the plane normal.
    /// The plane normal is derived from the pose as `rotation * +Y`.
    Plane {
        /// Offset along the plane normal (meters).
        offset_along_normal: f32,
    },

    /// Oriented cuboid with given half-extents (meters).
    Cuboid { half_extents: Vector<f32> },

    /// Sphere/ball (meters).
    Sphere { radius: f32 },

    /// Y-aligned capsule (meters).
    CapsuleY { radius: f32, half_height: f32 },

    /// Y-aligned cylinder (meters). Controllers see it tessellated.
    CylinderY { radius: f32, half_height: f32 },

    /// Y-aligned cone (meters). Controllers see it tessellated.
    ConeY { radius: f32, half_height: f32 },

    /// Triangle mesh in the collider's local frame.
    TriMesh {
        vertices: Vec<Point<f32>>,
        indices: Vec<[u32; 3]>,
    },
}

/// Build a posed Rapier collider from a `WorldStaticDef`.
///
/// The collider has no parent body; its world pose is set directly.
pub fn collider_from_def(def: &WorldStaticDef) -> Result<Collider, CctError> {
    let pose = Isometry::from_parts(def.translation.into(), def.rotation);

    let collider = match &def.shape {
        ColliderShapeDef::Plane {
            offset_along_normal,
        } => {
            // n ⋅ x = dist, with dist = n ⋅ t + offset. The half-space normal is already in
            // world space, so the collider only needs a translation.
            let n = def.rotation * Vector::y();
            let dist = n.dot(&def.translation) + *offset_along_normal;
            let unit_n = UnitVector::new_normalize(n);

            let mut collider =
                ColliderBuilder::new(SharedShape::new(HalfSpace::new(unit_n))).build();
            collider.set_position(Isometry::translation(
                unit_n.x * dist,
                unit_n.y * dist,
                unit_n.z * dist,
            ));
            return Ok(collider);
        }

        ColliderShapeDef::Cuboid { half_extents } => {
            ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
        }

        ColliderShapeDef::Sphere { radius } => ColliderBuilder::ball(*radius),

        ColliderShapeDef::CapsuleY {
            radius,
            half_height,
        } => ColliderBuilder::capsule_y(*half_height, *radius),

        ColliderShapeDef::CylinderY {
            radius,
            half_height,
        } => ColliderBuilder::cylinder(*half_height, *radius),

        ColliderShapeDef::ConeY {
            radius,
            half_height,
        } => ColliderBuilder::cone(*half_height, *radius),

        ColliderShapeDef::TriMesh { vertices, indices } => {
            if vertices.is_empty() || indices.is_empty() {
                return Err(CctError::InvalidMesh("empty mesh".into()));
            }
            if let Some(bad) = indices.iter().flatten().find(|&&i| i as usize >= vertices.len()) {
                return Err(CctError::InvalidMesh(format!("vertex index {bad} out of range")));
            }
            ColliderBuilder::trimesh(vertices.clone(), indices.clone())
                .map_err(|e| CctError::InvalidMesh(format!("{e:?}")))?
        }
    };

    let mut collider = collider.build();
    collider.set_position(pose);
    Ok(collider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn def(shape: ColliderShapeDef) -> WorldStaticDef {
        WorldStaticDef {
            id: 1,
            translation: vector![1.0, 2.0, 3.0],
            rotation: UnitQuaternion::identity(),
            shape,
        }
    }

    #[test]
    fn plane_is_placed_along_its_normal() {
        let collider = collider_from_def(&def(ColliderShapeDef::Plane {
            offset_along_normal: 0.5,
        }))
        .unwrap();
        assert!(collider.shape().as_halfspace().is_some());
        assert_relative_eq!(collider.position().translation.vector.y, 2.5, epsilon = 1.0e-6);
        assert_relative_eq!(collider.position().translation.vector.x, 0.0, epsilon = 1.0e-6);
    }

    #[test]
    fn solids_carry_the_def_pose() {
        let collider = collider_from_def(&def(ColliderShapeDef::Cuboid {
            half_extents: vector![1.0, 0.5, 1.0],
        }))
        .unwrap();
        assert_relative_eq!(collider.position().translation.vector, vector![1.0, 2.0, 3.0]);
    }

    #[test]
    fn malformed_meshes_are_rejected() {
        let err = collider_from_def(&def(ColliderShapeDef::TriMesh {
            vertices: vec![point![0.0, 0.0, 0.0], point![1.0, 0.0, 0.0]],
            indices: vec![[0, 1, 2]],
        }));
        assert!(matches!(err, Err(CctError::InvalidMesh(_))));

        let err = collider_from_def(&def(ColliderShapeDef::TriMesh {
            vertices: vec![],
            indices: vec![],
        }));
        assert!(err.is_err());
    }
}
