use nalgebra as na;
use rapier3d::parry::{
    query::{self, ShapeCastHit, ShapeCastOptions},
    shape::{self as pshape, Shape},
};

use super::{
    settings::MTD_EPSILON,
    touched::{GeomShape, GeomSource, TouchedGeom, TouchedGeomCache},
    types::{ExtVec3, Iso, Quat, Vec3, diff, offset_by, safe_normalize},
};

/// Earliest contact found by [`collide_geoms`].
#[derive(Clone, Copy, Debug)]
pub struct SweptContact {
    pub world_pos: ExtVec3,
    /// Surface normal at the contact, facing the moving volume.
    pub world_normal: Vec3,
    /// Distance travelled along the sweep direction. Zero when initially overlapping.
    pub distance: f32,
    /// Index in the cache triangle array when a mesh was hit.
    pub triangle: Option<usize>,
    /// Index in the cache geometry list.
    pub geom: usize,
}

/// Controller volume being swept.
pub struct MovingVolume<'a> {
    pub shape: &'a dyn Shape,
    pub rotation: Quat,
    pub center: ExtVec3,
}

#[derive(Clone, Copy, Debug)]
pub struct SweepOptions {
    pub contact_offset: f32,
    /// Exact sweeps. Otherwise the cast stops `contact_offset` short of the surface.
    pub precise: bool,
    /// Report initial overlaps as zero-distance hits, even when moving apart.
    /// User volumes never do: other controllers separate through the interaction pass.
    pub recovery: bool,
}

enum Solid {
    Cuboid(pshape::Cuboid),
    Ball(pshape::Ball),
    Capsule(pshape::Capsule),
}

impl Solid {
    fn as_shape(&self) -> &dyn Shape {
        match self {
            Solid::Cuboid(s) => s as &dyn Shape,
            Solid::Ball(s) => s as &dyn Shape,
            Solid::Capsule(s) => s as &dyn Shape,
        }
    }
}

/// Parry shape and local pose of a non-mesh record.
fn solid(shape: &GeomShape) -> Option<(Iso, Solid)> {
    let at = |p: &Vec3| Iso::from_parts(na::Translation3::from(*p), Quat::identity());
    match *shape {
        GeomShape::UserBox {
            center,
            rotation,
            half_extents,
        } => Some((
            Iso::from_parts(na::Translation3::from(center), rotation),
            Solid::Cuboid(pshape::Cuboid::new(half_extents)),
        )),
        GeomShape::Box { pose, half_extents } => {
            Some((pose, Solid::Cuboid(pshape::Cuboid::new(half_extents))))
        }
        GeomShape::Sphere { center, radius } => {
            Some((at(&center), Solid::Ball(pshape::Ball::new(radius))))
        }
        GeomShape::UserCapsule { p0, p1, radius } | GeomShape::Capsule { p0, p1, radius } => {
            Some((
                Iso::identity(),
                Solid::Capsule(pshape::Capsule::new(p0.into(), p1.into(), radius)),
            ))
        }
        GeomShape::Mesh { .. } => None,
    }
}

struct Caster<'a> {
    pose1: Iso,
    shape1: &'a dyn Shape,
    dir: Vec3,
    opts: SweepOptions,
}

impl Caster<'_> {
    /// Distance removed from the cast length by the target distance.
    fn skin(&self) -> f32 {
        if self.opts.precise {
            0.0
        } else {
            self.opts.contact_offset
        }
    }

    fn cast(&self, pose2: &Iso, shape2: &dyn Shape, max_dist: f32) -> Option<(f32, ShapeCastHit)> {
        let skin = self.skin();
        let mut options = ShapeCastOptions::with_max_time_of_impact((max_dist - skin).max(0.0));
        options.stop_at_penetration = self.opts.recovery;
        options.target_distance = skin;

        let hit = query::cast_shapes(
            &self.pose1,
            &self.dir,
            self.shape1,
            pose2,
            &Vec3::zeros(),
            shape2,
            options,
        )
        .ok()
        .flatten()?;

        let distance = if hit.time_of_impact <= 0.0 {
            let overlapping = skin == 0.0
                || query::intersection_test(&self.pose1, self.shape1, pose2, shape2)
                    .unwrap_or(false);
            if overlapping { 0.0 } else { skin }
        } else {
            hit.time_of_impact + skin
        };
        Some((distance, hit))
    }

    fn contact(&self, offset: &ExtVec3, pose2: &Iso, hit: &ShapeCastHit) -> (ExtVec3, Vec3) {
        let mut normal = pose2.rotation * hit.normal2.into_inner();
        if normal.dot(&self.dir) > 0.0 {
            normal = -normal;
        }
        let normal = safe_normalize(&normal);
        let normal = if normal == Vec3::zeros() { -self.dir } else { normal };

        let witness = pose2 * hit.witness2;
        (offset_by(offset, &witness.coords), normal)
    }
}

/// Sweep `volume` along unit `dir` over at most `max_dist` against every cached record.
///
/// `hint` is the triangle hit by the previous sweep of the same pass. It is tested first
/// and replaced by the triangle of the returned contact.
pub fn collide_geoms(
    cache: &TouchedGeomCache,
    volume: &MovingVolume<'_>,
    dir: &Vec3,
    max_dist: f32,
    opts: SweepOptions,
    hint: &mut Option<usize>,
) -> Option<SweptContact> {
    let mut best: Option<SweptContact> = None;
    let mut limit = max_dist;

    for (index, geom) in cache.geoms.iter().enumerate() {
        let local_center = diff(&volume.center, &geom.offset);
        let user = matches!(geom.source, GeomSource::User(_));
        let caster = Caster {
            pose1: Iso::from_parts(na::Translation3::from(local_center), volume.rotation),
            shape1: volume.shape,
            dir: *dir,
            opts: SweepOptions {
                recovery: opts.recovery && !user,
                ..opts
            },
        };

        match geom.shape {
            GeomShape::Mesh { first, count } => {
                let range = first..first + count;
                let hinted = hint.filter(|h| range.contains(h));
                let order = hinted
                    .into_iter()
                    .chain(range.filter(|i| Some(*i) != hinted));

                for tri_index in order {
                    let Some(tri) = cache.triangles.get(tri_index) else {
                        continue;
                    };
                    let pose2 = Iso::identity();
                    let Some((distance, hit)) = caster.cast(&pose2, tri, limit) else {
                        continue;
                    };
                    if best.is_some_and(|b| distance >= b.distance) {
                        continue;
                    }
                    let (world_pos, world_normal) = caster.contact(&geom.offset, &pose2, &hit);
                    best = Some(SweptContact {
                        world_pos,
                        world_normal,
                        distance,
                        triangle: Some(tri_index),
                        geom: index,
                    });
                    limit = distance;
                }
            }
            ref shape => {
                let Some((pose2, solid)) = solid(shape) else {
                    continue;
                };
                let Some((distance, hit)) = caster.cast(&pose2, solid.as_shape(), limit) else {
                    continue;
                };
                if best.is_some_and(|b| distance >= b.distance) {
                    continue;
                }
                let (world_pos, world_normal) = caster.contact(&geom.offset, &pose2, &hit);
                best = Some(SweptContact {
                    world_pos,
                    world_normal,
                    distance,
                    triangle: None,
                    geom: index,
                });
                limit = distance;
            }
        }
    }

    if let Some(contact) = &best {
        if contact.triangle.is_some() {
            *hint = contact.triangle;
        }
    }
    best
}

/// Translation that pushes `volume` out of every scene record it penetrates.
///
/// Penetrations are resolved one after the other, each against the volume already
/// moved by the previous ones. User volumes are left alone. Returns `None` when
/// nothing penetrates.
pub fn compute_mtd(cache: &TouchedGeomCache, volume: &MovingVolume<'_>) -> Option<Vec3> {
    let mut push = Vec3::zeros();
    let mut found = false;

    let mut resolve = |geom: &TouchedGeom, pose2: &Iso, shape2: &dyn Shape| {
        let local_center = diff(&volume.center, &geom.offset) + push;
        let pose1 = Iso::from_parts(na::Translation3::from(local_center), volume.rotation);
        let Some(contact) = query::contact(&pose1, volume.shape, pose2, shape2, 0.0)
            .ok()
            .flatten()
        else {
            return;
        };
        if contact.dist < 0.0 {
            push -= contact.normal1.into_inner() * (-contact.dist + MTD_EPSILON);
            found = true;
        }
    };

    for geom in &cache.geoms {
        if matches!(geom.source, GeomSource::User(_)) {
            continue;
        }
        match geom.shape {
            GeomShape::Mesh { first, count } => {
                for tri in cache.triangles.iter().skip(first).take(count) {
                    resolve(geom, &Iso::identity(), tri);
                }
            }
            ref shape => {
                if let Some((pose2, solid)) = solid(shape) {
                    resolve(geom, &pose2, solid.as_shape());
                }
            }
        }
    }

    found.then_some(push)
}
