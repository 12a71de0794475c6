/*!
Touched-geometry collection and caching.

For each sweep, a controller needs every piece of geometry its temporal box
overlaps: scene shapes (boxes, spheres, capsules, triangles) plus user
volumes (obstacles and the other controllers). The collector flattens them
into a list of [`TouchedGeom`] records and a triangle array.

Precision
- Every record carries an extended-precision `offset` (the center of the
  query bounds). Its single-precision geometry is expressed relative to it.

Caching
- Query bounds are grown by the volume growth factor.
- Static shapes are reused across moves while the scene timestamp is stable and
  the temporal box stays inside the cached bounds.
- Dynamic shapes and user volumes are re-collected on the first query of every move.
*/

use rapier3d::parry::shape::Triangle;

use crate::{
    callbacks::ControllerFilters,
    collision::{
        settings::MAX_TESSELLATION_DEPTH,
        sweep_test::{CctParams, SweepStats},
        types::{ExtBounds, ExtVec3, Iso, Point3, Quat, Vec3, diff, to_ext},
    },
    controller::ControllerHandle,
    obstacles::ObstacleHandle,
    scene::{
        ActorHandle, ActorKind, PhysicsScene, QueryFlag, QueryFlags, SceneGeometry, SceneShape,
    },
};

/// Owner of a user volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserObject {
    Obstacle { handle: ObstacleHandle, user_data: u64 },
    Controller(ControllerHandle),
}

/// Oriented box supplied by the application or by another controller.
#[derive(Clone, Copy, Debug)]
pub struct UserBox {
    pub center: ExtVec3,
    pub rotation: Quat,
    pub half_extents: Vec3,
    pub owner: UserObject,
}

/// Capsule supplied by the application or by another controller.
#[derive(Clone, Copy, Debug)]
pub struct UserCapsule {
    pub p0: ExtVec3,
    pub p1: ExtVec3,
    pub radius: f32,
    pub owner: UserObject,
}

impl UserBox {
    fn bounds(&self) -> ExtBounds {
        let abs = self.rotation.to_rotation_matrix().matrix().abs();
        ExtBounds::from_center_extents(&self.center, &(abs * self.half_extents))
    }
}

impl UserCapsule {
    fn bounds(&self) -> ExtBounds {
        let r = to_ext(&Vec3::repeat(self.radius));
        ExtBounds {
            min: self.p0.inf(&self.p1) - r,
            max: self.p0.sup(&self.p1) + r,
        }
    }
}

/// User volumes considered by one move. Scratch storage reused across moves.
#[derive(Default)]
pub struct UserObstacles {
    pub boxes: Vec<UserBox>,
    pub capsules: Vec<UserCapsule>,
}

impl UserObstacles {
    /// Drop the content. Keeps the allocation when it was more than half used.
    pub fn reset_or_clear(&mut self) {
        reset_or_clear(&mut self.boxes);
        reset_or_clear(&mut self.capsules);
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.capsules.is_empty()
    }
}

/// Capacity-aware clear: well-used buffers keep their memory, oversized ones release it.
pub fn reset_or_clear<T>(v: &mut Vec<T>) {
    let capacity = v.capacity();
    if capacity == 0 {
        return;
    }
    let used = v.len();
    v.clear();
    if used <= capacity / 2 {
        v.shrink_to_fit();
    }
}

/// Geometry of one touched record, relative to its offset.
#[derive(Clone, Copy, Debug)]
pub enum GeomShape {
    UserBox {
        center: Vec3,
        rotation: Quat,
        half_extents: Vec3,
    },
    UserCapsule {
        p0: Vec3,
        p1: Vec3,
        radius: f32,
    },
    /// Range in the cache triangle array.
    Mesh {
        first: usize,
        count: usize,
    },
    Box {
        pose: Iso,
        half_extents: Vec3,
    },
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Capsule {
        p0: Vec3,
        p1: Vec3,
        radius: f32,
    },
}

/// What a touched record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeomSource {
    Scene {
        actor: ActorHandle,
        shape: u32,
        kind: ActorKind,
    },
    User(UserObject),
}

/// One candidate blocker.
#[derive(Clone, Copy, Debug)]
pub struct TouchedGeom {
    pub shape: GeomShape,
    pub source: GeomSource,
    /// World origin the local geometry is expressed against.
    pub offset: ExtVec3,
}

/// Inputs of a touched-geometry query.
pub(crate) struct CollectContext<'a> {
    pub scene: &'a dyn PhysicsScene,
    pub filters: &'a ControllerFilters<'a>,
    pub obstacles: &'a UserObstacles,
    /// Actors owned by controllers. Controllers are collected as user volumes instead.
    pub is_controller_actor: &'a dyn Fn(ActorHandle) -> bool,
}

/// Touched geometry of one controller.
#[derive(Default)]
pub struct TouchedGeomCache {
    pub geoms: Vec<TouchedGeom>,
    /// Local triangles of every `GeomShape::Mesh` record.
    pub triangles: Vec<Triangle>,
    /// Source mesh index of each entry of `triangles`.
    pub triangle_indices: Vec<u32>,
    /// Bounds the cached content is valid for.
    pub bounds: ExtBounds,
    timestamp: Option<u64>,
    static_geoms: usize,
    static_triangles: usize,
    scratch: Vec<SceneShape>,
}

impl TouchedGeomCache {
    /// Force the next query to rebuild everything.
    pub fn invalidate(&mut self) {
        self.bounds = ExtBounds::empty();
    }

    pub fn clear(&mut self) {
        self.geoms.clear();
        self.triangles.clear();
        self.triangle_indices.clear();
        self.static_geoms = 0;
        self.static_triangles = 0;
    }

    /// Bring the cache up to date for `temporal`.
    ///
    /// `first_update` is set at the start of every move and consumed here.
    /// Returns `true` when the whole cache was rebuilt.
    pub(crate) fn update(
        &mut self,
        ctx: &CollectContext<'_>,
        params: &CctParams,
        temporal: &ExtBounds,
        first_update: &mut bool,
        stats: &mut SweepStats,
    ) -> bool {
        let timestamp = ctx.scene.timestamp();
        let scene_changed = self.timestamp != Some(timestamp);
        self.timestamp = Some(timestamp);

        let dynamic_flags = query_flags(ctx.filters.flags, QueryFlag::Dynamic);

        if !scene_changed && temporal.is_inside(&self.bounds) {
            if *first_update {
                *first_update = false;

                self.geoms.truncate(self.static_geoms);
                self.triangles.truncate(self.static_triangles);
                self.triangle_indices.truncate(self.static_triangles);

                let bounds = self.bounds;
                if let Some(flags) = dynamic_flags {
                    self.collect_scene(ctx, params, &bounds, flags, stats);
                }
                self.collect_user(ctx.obstacles, &bounds);

                stats.partial_updates += 1;
            }
            return false;
        }

        self.bounds = temporal.scaled(params.volume_growth.max(1.0));
        self.clear();

        let bounds = self.bounds;
        if let Some(flags) = query_flags(ctx.filters.flags, QueryFlag::Static) {
            self.collect_scene(ctx, params, &bounds, flags, stats);
        }
        self.static_geoms = self.geoms.len();
        self.static_triangles = self.triangles.len();

        if let Some(flags) = dynamic_flags {
            self.collect_scene(ctx, params, &bounds, flags, stats);
        }
        self.collect_user(ctx.obstacles, &bounds);

        *first_update = false;
        stats.full_updates += 1;
        log::debug!(
            "touched geometry rebuilt: {} geoms, {} triangles",
            self.geoms.len(),
            self.triangles.len()
        );
        true
    }

    fn collect_scene(
        &mut self,
        ctx: &CollectContext<'_>,
        params: &CctParams,
        bounds: &ExtBounds,
        flags: QueryFlags,
        stats: &mut SweepStats,
    ) {
        let offset = bounds.center();
        let local_bounds = bounds.to_local_aabb(&offset);

        let mut shapes = std::mem::take(&mut self.scratch);
        shapes.clear();
        ctx.scene.overlap(&bounds.to_aabb(), flags, &mut shapes);

        let callback = ctx.filters.filter_callback;
        let pre = flags.has(QueryFlag::PreFilter);
        let post = flags.has(QueryFlag::PostFilter);

        for shape in &shapes {
            if (ctx.is_controller_actor)(shape.actor) {
                continue;
            }
            if let Some(cb) = callback {
                if pre && !cb.pre_filter(shape.actor, shape.shape, shape.kind) {
                    continue;
                }
                if post && !cb.post_filter(shape) {
                    continue;
                }
            }

            let local = |p: &Point3| diff(&to_ext(&p.coords), &offset);
            let geom = match &shape.geometry {
                SceneGeometry::Box { half_extents, pose } => GeomShape::Box {
                    pose: Iso::from_parts(
                        diff(&to_ext(&pose.translation.vector), &offset).into(),
                        pose.rotation,
                    ),
                    half_extents: *half_extents,
                },
                SceneGeometry::Sphere { center, radius } => GeomShape::Sphere {
                    center: local(center),
                    radius: *radius,
                },
                SceneGeometry::Capsule { p0, p1, radius } => GeomShape::Capsule {
                    p0: local(p0),
                    p1: local(p1),
                    radius: *radius,
                },
                SceneGeometry::Triangles(tris) => {
                    let first = self.triangles.len();
                    for tri in tris {
                        let t = Triangle::new(
                            local(&tri.triangle.a).into(),
                            local(&tri.triangle.b).into(),
                            local(&tri.triangle.c).into(),
                        );
                        if params.tessellation {
                            let before = self.triangles.len();
                            tessellate(
                                &t,
                                &local_bounds,
                                params.max_edge_length2,
                                0,
                                &mut self.triangles,
                            );
                            let added = self.triangles.len() - before;
                            if added > 1 {
                                stats.tessellation += (added - 1) as u32;
                            }
                            self.triangle_indices
                                .extend(std::iter::repeat_n(tri.index, added));
                        } else {
                            self.triangles.push(t);
                            self.triangle_indices.push(tri.index);
                        }
                    }
                    let count = self.triangles.len() - first;
                    if count == 0 {
                        continue;
                    }
                    GeomShape::Mesh { first, count }
                }
            };

            self.geoms.push(TouchedGeom {
                shape: geom,
                source: GeomSource::Scene {
                    actor: shape.actor,
                    shape: shape.shape,
                    kind: shape.kind,
                },
                offset,
            });
        }

        self.scratch = shapes;
    }

    fn collect_user(&mut self, obstacles: &UserObstacles, bounds: &ExtBounds) {
        let offset = bounds.center();

        for b in &obstacles.boxes {
            if !b.bounds().intersects(bounds) {
                continue;
            }
            self.geoms.push(TouchedGeom {
                shape: GeomShape::UserBox {
                    center: diff(&b.center, &offset),
                    rotation: b.rotation,
                    half_extents: b.half_extents,
                },
                source: GeomSource::User(b.owner),
                offset,
            });
        }

        for c in &obstacles.capsules {
            if !c.bounds().intersects(bounds) {
                continue;
            }
            self.geoms.push(TouchedGeom {
                shape: GeomShape::UserCapsule {
                    p0: diff(&c.p0, &offset),
                    p1: diff(&c.p1, &offset),
                    radius: c.radius,
                },
                source: GeomSource::User(c.owner),
                offset,
            });
        }
    }
}

/// `Some(flags)` restricted to `category` when the filters enable it.
fn query_flags(filters: QueryFlags, category: QueryFlag) -> Option<QueryFlags> {
    if !filters.has(category) {
        return None;
    }
    let mut flags = filters;
    flags.remove_many(&[QueryFlag::Static, QueryFlag::Dynamic]);
    flags.add(category);
    Some(flags)
}

/// Split `tri` until its edges are shorter than `sqrt(max_edge_length2)`,
/// keeping only pieces whose bounds touch `culling`.
fn tessellate(
    tri: &Triangle,
    culling: &rapier3d::parry::bounding_volume::Aabb,
    max_edge_length2: f32,
    depth: u32,
    out: &mut Vec<Triangle>,
) {
    let aabb = tri.local_aabb();
    if !super::broad::aabb_intersects(&aabb, culling) {
        return;
    }

    let e0 = (tri.b - tri.a).norm_squared();
    let e1 = (tri.c - tri.b).norm_squared();
    let e2 = (tri.a - tri.c).norm_squared();
    if depth >= MAX_TESSELLATION_DEPTH || e0.max(e1).max(e2) <= max_edge_length2 {
        out.push(*tri);
        return;
    }

    let ab = na_mid(&tri.a, &tri.b);
    let bc = na_mid(&tri.b, &tri.c);
    let ca = na_mid(&tri.c, &tri.a);
    for t in [
        Triangle::new(tri.a, ab, ca),
        Triangle::new(ab, tri.b, bc),
        Triangle::new(ca, bc, tri.c),
        Triangle::new(ab, bc, ca),
    ] {
        tessellate(&t, culling, max_edge_length2, depth + 1, out);
    }
}

#[inline]
fn na_mid(a: &Point3, b: &Point3) -> Point3 {
    Point3::from((a.coords + b.coords) * 0.5)
}
