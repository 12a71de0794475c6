/*!
Core collision types and math aliases shared by the collision submodules.

This module intentionally contains no algorithms beyond small vector helpers.
It defines the data exchanged between:
- the swept volume (temporal boxes)
- the touched-geometry collector (cache bounds, local offsets)
- the narrow phase (parry sweeps, penetration)
- the sweep test and the manager's interaction pass

Precision
- World positions of controllers and obstacles are stored in extended precision
  (`ExtVec3`, f64) so large worlds do not lose accuracy.
- Narrow-phase math runs in single precision on coordinates re-based against a
  local origin (see `touched::TouchedGeom::offset`).
*/

use nalgebra as na;
use rapier3d::parry::bounding_volume::Aabb;

use super::settings::ALMOST_ZERO_SQ;

/// Common math aliases for clarity and consistency.
pub type Vec3 = na::Vector3<f32>;
pub type Point3 = na::Point3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;

/// Extended-precision world vector.
pub type ExtVec3 = na::Vector3<f64>;

/// Narrow a world position to single precision.
#[inline]
pub fn to_vec3(v: &ExtVec3) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}

/// Widen a single-precision vector.
#[inline]
pub fn to_ext(v: &Vec3) -> ExtVec3 {
    ExtVec3::new(v.x as f64, v.y as f64, v.z as f64)
}

/// `a - b` computed in extended precision, returned in single precision.
#[inline]
pub fn diff(a: &ExtVec3, b: &ExtVec3) -> Vec3 {
    to_vec3(&(a - b))
}

/// Translate an extended position by a single-precision displacement.
#[inline]
pub fn offset_by(p: &ExtVec3, d: &Vec3) -> ExtVec3 {
    p + to_ext(d)
}

/// Split `v` into its component along `axis` and the tangential remainder.
///
/// `axis` must be unit length. Returns `(normal, tangent)` with `normal + tangent == v`.
#[inline]
pub fn decompose_vector(v: &Vec3, axis: &Vec3) -> (Vec3, Vec3) {
    let normal = axis * v.dot(axis);
    (normal, v - normal)
}

/// Zero test that tolerates arbitrary (non axis-aligned) up directions.
#[inline]
pub fn is_almost_zero(v: &Vec3) -> bool {
    v.norm_squared() <= ALMOST_ZERO_SQ
}

/// Normalize or return zero for degenerate input.
#[inline]
pub fn safe_normalize(v: &Vec3) -> Vec3 {
    let n2 = v.norm_squared();
    if n2 > 1.0e-12 { v / n2.sqrt() } else { Vec3::zeros() }
}

/// Shortest rotation taking unit vector `from` onto unit vector `to`.
///
/// Antiparallel inputs rotate half a turn around any axis orthogonal to `from`.
pub fn shortest_rotation(from: &Vec3, to: &Vec3) -> Quat {
    if let Some(q) = Quat::rotation_between(from, to) {
        return q;
    }
    let ortho = if from.x.abs() < 0.9 {
        from.cross(&Vec3::x())
    } else {
        from.cross(&Vec3::y())
    };
    Quat::from_axis_angle(&na::Unit::new_normalize(ortho), std::f32::consts::PI)
}

/// Extended-precision axis-aligned bounds.
///
/// The empty bounds have `min > max`; they contain nothing and are never "inside" anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtBounds {
    pub min: ExtVec3,
    pub max: ExtVec3,
}

impl Default for ExtBounds {
    fn default() -> Self {
        Self::empty()
    }
}

impl ExtBounds {
    pub fn empty() -> Self {
        Self {
            min: ExtVec3::repeat(f64::MAX),
            max: ExtVec3::repeat(-f64::MAX),
        }
    }

    pub fn from_center_extents(center: &ExtVec3, extents: &Vec3) -> Self {
        let e = to_ext(extents);
        Self {
            min: center - e,
            max: center + e,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> ExtVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        to_vec3(&((self.max - self.min) * 0.5))
    }

    /// Grow to include `other`.
    pub fn add(&mut self, other: &ExtBounds) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Grow to include a point.
    pub fn include(&mut self, p: &ExtVec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn contains_point(&self, p: &ExtVec3) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// True when `self` lies entirely within `other`.
    pub fn is_inside(&self, other: &ExtBounds) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..3).all(|i| self.min[i] >= other.min[i] && self.max[i] <= other.max[i])
    }

    pub fn intersects(&self, other: &ExtBounds) -> bool {
        !(self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y
            || self.max.z < other.min.z
            || self.min.z > other.max.z)
    }

    /// Scale the extents around the center.
    pub fn scaled(&self, factor: f32) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::from_center_extents(&self.center(), &(self.extents() * factor))
    }

    pub fn translated(&self, shift: &ExtVec3) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            min: self.min + shift,
            max: self.max + shift,
        }
    }

    /// Single-precision copy of the bounds in world space. Loses accuracy far from the origin.
    pub fn to_aabb(&self) -> Aabb {
        Aabb::new(to_vec3(&self.min).into(), to_vec3(&self.max).into())
    }

    /// Single-precision copy relative to `origin`.
    pub fn to_local_aabb(&self, origin: &ExtVec3) -> Aabb {
        Aabb::new(
            diff(&self.min, origin).into(),
            diff(&self.max, origin).into(),
        )
    }
}
