//! Rapier-backed [`PhysicsScene`].
//!
//! Holds a Rapier collider set and answers the controllers' overlap queries.
//!
//! Design goals
//! - Deterministic: given the same inputs (sorted by `id`), build identical in-memory sets.
//! - Query-focused: no simulation step runs here. Dynamic colliders are moved by the
//!   application, controller proxies by their controllers.
//! - Static geometry lives in a BVH rebuilt on change; every change bumps the timestamp
//!   controllers use to invalidate their caches.

use std::sync::Arc;

use rapier3d::{
    parry::{bounding_volume::Aabb, shape::Triangle, utils::hashmap::HashMap},
    prelude::*,
};

use crate::{
    collision::{
        broad::{BoundedIndex, aabb_intersects},
        settings::ROUND_SHAPE_SUBDIVISIONS,
        types::{Iso, Point3, Vec3},
    },
    error::CctError,
    rapier::{WorldStaticDef, collider_from_def},
    scene::{
        ActorHandle, ActorKind, DeletionListener, IndexedTriangle, ListenerId, PhysicsScene,
        ProxyGeometry, QueryFlag, QueryFlags, SceneGeometry, SceneShape,
    },
};

fn actor_of(handle: ColliderHandle) -> ActorHandle {
    let (index, generation) = handle.into_raw_parts();
    ActorHandle(((generation as u64) << 32) | index as u64)
}

fn collider_of(actor: ActorHandle) -> ColliderHandle {
    ColliderHandle::from_raw_parts(actor.0 as u32, (actor.0 >> 32) as u32)
}

fn proxy_shape(geometry: ProxyGeometry) -> SharedShape {
    match geometry {
        ProxyGeometry::Capsule {
            radius,
            half_height,
        } => SharedShape::capsule_x(half_height, radius),
        ProxyGeometry::Box { half_extents } => {
            SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
        }
    }
}

/// In-memory Rapier collider set seen by the controllers.
pub struct RapierScene {
    bodies: RigidBodySet,
    islands: IslandManager,
    colliders: ColliderSet,
    kinds: HashMap<ColliderHandle, ActorKind>,
    statics: BoundedIndex<ColliderHandle>,
    timestamp: u64,
    listeners: Vec<(ListenerId, Arc<dyn DeletionListener>)>,
    next_listener: u64,
}

impl Default for RapierScene {
    fn default() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            islands: IslandManager::new(),
            colliders: ColliderSet::new(),
            kinds: HashMap::default(),
            statics: BoundedIndex::empty(),
            timestamp: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }
}

impl RapierScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scene from a list of static collider definitions.
    ///
    /// The input is sorted by `id` before insertion.
    pub fn from_statics(mut defs: Vec<WorldStaticDef>) -> Result<Self, CctError> {
        defs.sort_by_key(|d| d.id);

        let mut scene = Self::new();
        for def in &defs {
            let collider = collider_from_def(def)?;
            let handle = scene.colliders.insert(collider);
            scene.kinds.insert(handle, ActorKind::Static);
        }
        scene.rebuild_statics();
        log::info!("built scene with {} static colliders", defs.len());
        Ok(scene)
    }

    pub fn add_static(&mut self, def: &WorldStaticDef) -> Result<ActorHandle, CctError> {
        let handle = self.colliders.insert(collider_from_def(def)?);
        self.kinds.insert(handle, ActorKind::Static);
        self.rebuild_statics();
        Ok(actor_of(handle))
    }

    /// Add a collider the application moves with [`RapierScene::set_actor_pose`].
    pub fn add_dynamic(&mut self, def: &WorldStaticDef) -> Result<ActorHandle, CctError> {
        let handle = self.colliders.insert(collider_from_def(def)?);
        self.kinds.insert(handle, ActorKind::Dynamic);
        Ok(actor_of(handle))
    }

    /// Move an actor. Moving a static actor bumps the timestamp.
    pub fn set_actor_pose(&mut self, actor: ActorHandle, pose: Iso) -> bool {
        let handle = collider_of(actor);
        let Some(collider) = self.colliders.get_mut(handle) else {
            return false;
        };
        collider.set_position(pose);
        if self.kinds.get(&handle) == Some(&ActorKind::Static) {
            self.rebuild_statics();
        }
        true
    }

    pub fn collider(&self, actor: ActorHandle) -> Option<&Collider> {
        self.colliders.get(collider_of(actor))
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    fn rebuild_statics(&mut self) {
        let colliders = &self.colliders;
        self.statics = BoundedIndex::build(
            self.kinds
                .iter()
                .filter(|(_, kind)| **kind == ActorKind::Static)
                .filter_map(|(handle, _)| {
                    let collider = colliders.get(*handle)?;
                    let aabb = if collider.shape().as_halfspace().is_some() {
                        None
                    } else {
                        Some(collider.compute_aabb())
                    };
                    Some((aabb, *handle))
                }),
        );
        self.timestamp += 1;
    }

    fn shape_for(&self, handle: ColliderHandle, bounds: &Aabb) -> Option<SceneShape> {
        let collider = self.colliders.get(handle)?;
        let kind = *self.kinds.get(&handle)?;
        let geometry = scene_geometry(collider, bounds)?;
        Some(SceneShape {
            actor: actor_of(handle),
            shape: 0,
            kind,
            geometry,
        })
    }
}

/// World-space geometry of `collider`, clipped to `bounds` for meshes and planes.
fn scene_geometry(collider: &Collider, bounds: &Aabb) -> Option<SceneGeometry> {
    let pose = collider.position();
    let shape = collider.shape();

    if let Some(cuboid) = shape.as_cuboid() {
        return Some(SceneGeometry::Box {
            half_extents: cuboid.half_extents,
            pose: *pose,
        });
    }
    if let Some(ball) = shape.as_ball() {
        return Some(SceneGeometry::Sphere {
            center: Point3::from(pose.translation.vector),
            radius: ball.radius,
        });
    }
    if let Some(capsule) = shape.as_capsule() {
        return Some(SceneGeometry::Capsule {
            p0: pose * capsule.segment.a,
            p1: pose * capsule.segment.b,
            radius: capsule.radius,
        });
    }
    if let Some(mesh) = shape.as_trimesh() {
        let local = bounds.transform_by(&pose.inverse());
        let triangles = mesh
            .bvh()
            .intersect_aabb(&local)
            .filter_map(|index| {
                let triangle = mesh.triangle(index).transformed(pose);
                aabb_intersects(&triangle.local_aabb(), bounds).then_some(IndexedTriangle {
                    index,
                    triangle,
                })
            })
            .collect();
        return Some(SceneGeometry::Triangles(triangles));
    }
    if let Some(halfspace) = shape.as_halfspace() {
        return Some(SceneGeometry::Triangles(plane_quad(
            &(pose.rotation * halfspace.normal.into_inner()),
            &Point3::from(pose.translation.vector),
            bounds,
        )));
    }
    if let Some(cylinder) = shape.as_cylinder() {
        let (vertices, indices) = cylinder.to_trimesh(ROUND_SHAPE_SUBDIVISIONS);
        return Some(SceneGeometry::Triangles(posed_triangles(
            &vertices, &indices, pose, bounds,
        )));
    }
    if let Some(cone) = shape.as_cone() {
        let (vertices, indices) = cone.to_trimesh(ROUND_SHAPE_SUBDIVISIONS);
        return Some(SceneGeometry::Triangles(posed_triangles(
            &vertices, &indices, pose, bounds,
        )));
    }

    log::debug!("skipping unsupported collider shape {:?}", shape.shape_type());
    None
}

fn posed_triangles(
    vertices: &[Point3],
    indices: &[[u32; 3]],
    pose: &Iso,
    bounds: &Aabb,
) -> Vec<IndexedTriangle> {
    indices
        .iter()
        .enumerate()
        .filter_map(|(index, tri)| {
            let [a, b, c] = tri.map(|i| pose * vertices[i as usize]);
            let triangle = Triangle::new(a, b, c);
            aabb_intersects(&triangle.local_aabb(), bounds).then_some(IndexedTriangle {
                index: index as u32,
                triangle,
            })
        })
        .collect()
}

/// Two triangles covering the part of the plane under `bounds`.
fn plane_quad(normal: &Vec3, point: &Point3, bounds: &Aabb) -> Vec<IndexedTriangle> {
    let center = bounds.center();
    let projected = center - normal * (center - point).dot(normal);
    let half_size = bounds.half_extents().norm();

    let tangent = if normal.x.abs() < 0.9 {
        normal.cross(&Vec3::x())
    } else {
        normal.cross(&Vec3::y())
    }
    .normalize()
        * half_size;
    let bitangent = normal.cross(&tangent);

    let p0 = projected - tangent - bitangent;
    let p1 = projected + tangent - bitangent;
    let p2 = projected + tangent + bitangent;
    let p3 = projected - tangent + bitangent;
    vec![
        IndexedTriangle {
            index: 0,
            triangle: Triangle::new(p0, p1, p2),
        },
        IndexedTriangle {
            index: 1,
            triangle: Triangle::new(p0, p2, p3),
        },
    ]
}

impl PhysicsScene for RapierScene {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn overlap(&self, bounds: &Aabb, flags: QueryFlags, out: &mut Vec<SceneShape>) {
        if flags.has(QueryFlag::Static) {
            let mut handles = Vec::new();
            self.statics.query(bounds, &mut handles);
            out.extend(handles.into_iter().filter_map(|h| self.shape_for(h, bounds)));
        }

        if flags.has(QueryFlag::Dynamic) {
            for (handle, collider) in self.colliders.iter() {
                if self.kinds.get(&handle).is_none_or(|k| *k == ActorKind::Static) {
                    continue;
                }
                if !aabb_intersects(&collider.compute_aabb(), bounds) {
                    continue;
                }
                if let Some(shape) = self.shape_for(handle, bounds) {
                    out.push(shape);
                }
            }
        }
    }

    fn actor_pose(&self, actor: ActorHandle) -> Option<Iso> {
        self.colliders.get(collider_of(actor)).map(|c| *c.position())
    }

    fn actor_kind(&self, actor: ActorHandle) -> Option<ActorKind> {
        self.kinds.get(&collider_of(actor)).copied()
    }

    fn create_kinematic_proxy(
        &mut self,
        geometry: ProxyGeometry,
        pose: Iso,
        density: f32,
    ) -> ActorHandle {
        let mut collider = ColliderBuilder::new(proxy_shape(geometry))
            .density(density)
            .build();
        collider.set_position(pose);
        let handle = self.colliders.insert(collider);
        self.kinds.insert(handle, ActorKind::Kinematic);
        actor_of(handle)
    }

    fn set_kinematic_target(&mut self, actor: ActorHandle, pose: Iso) {
        if let Some(collider) = self.colliders.get_mut(collider_of(actor)) {
            collider.set_position(pose);
        }
    }

    fn update_proxy_geometry(&mut self, actor: ActorHandle, geometry: ProxyGeometry) {
        if let Some(collider) = self.colliders.get_mut(collider_of(actor)) {
            collider.set_shape(proxy_shape(geometry));
        }
    }

    fn release_actor(&mut self, actor: ActorHandle) {
        let handle = collider_of(actor);
        if !self.colliders.contains(handle) {
            return;
        }
        for (_, listener) in &self.listeners {
            listener.on_release(actor);
        }
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, false);
        if self.kinds.remove(&handle) == Some(ActorKind::Static) {
            self.rebuild_statics();
        }
    }

    fn register_deletion_listener(&mut self, listener: Arc<dyn DeletionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    fn unregister_deletion_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rapier::ColliderShapeDef, scene::default_query_flags};
    use approx::assert_relative_eq;
    use rapier3d::na::UnitQuaternion;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn def(id: u32, translation: Vector<f32>, shape: ColliderShapeDef) -> WorldStaticDef {
        WorldStaticDef {
            id,
            translation,
            rotation: UnitQuaternion::identity(),
            shape,
        }
    }

    fn query(scene: &RapierScene, center: Vec3, half: f32, flags: QueryFlags) -> Vec<SceneShape> {
        let bounds = Aabb::from_half_extents(center.into(), Vec3::repeat(half));
        let mut out = Vec::new();
        scene.overlap(&bounds, flags, &mut out);
        out
    }

    #[test]
    fn overlap_returns_only_nearby_statics() {
        let scene = RapierScene::from_statics(vec![
            def(2, vector![10.0, 0.0, 0.0], ColliderShapeDef::Sphere { radius: 0.5 }),
            def(
                1,
                vector![0.0, 0.0, 0.0],
                ColliderShapeDef::Cuboid {
                    half_extents: vector![1.0, 1.0, 1.0],
                },
            ),
        ])
        .unwrap();

        let hits = query(&scene, Vec3::new(0.0, 1.5, 0.0), 1.0, default_query_flags());
        assert_eq!(hits.len(), 1);
        assert!(matches!(hits[0].geometry, SceneGeometry::Box { .. }));
        assert_eq!(hits[0].kind, ActorKind::Static);

        let dynamic_only = QueryFlags::from_tags(&[QueryFlag::Dynamic]);
        assert!(query(&scene, Vec3::new(0.0, 1.5, 0.0), 1.0, dynamic_only).is_empty());
    }

    #[test]
    fn planes_become_local_quads() {
        let scene = RapierScene::from_statics(vec![def(
            1,
            vector![0.0, 0.0, 0.0],
            ColliderShapeDef::Plane {
                offset_along_normal: 0.0,
            },
        )])
        .unwrap();

        let center = Vec3::new(1.0e3, 2.0, -5.0);
        let hits = query(&scene, center, 3.0, default_query_flags());
        let [shape] = hits.as_slice() else {
            panic!("expected one plane, got {}", hits.len());
        };
        let SceneGeometry::Triangles(tris) = &shape.geometry else {
            panic!("plane must be triangulated");
        };
        assert_eq!(tris.len(), 2);
        for t in tris {
            for p in [t.triangle.a, t.triangle.b, t.triangle.c] {
                assert_relative_eq!(p.y, 0.0, epsilon = 1.0e-3);
            }
            assert!(t.triangle.local_aabb().maxs.x >= center.x + 3.0);
        }
    }

    #[test]
    fn meshes_are_clipped_to_query_bounds() {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for i in 0..20u32 {
            let x = i as f32 * 2.0;
            let base = vertices.len() as u32;
            vertices.extend([
                point![x, 0.0, 0.0],
                point![x + 1.0, 0.0, 0.0],
                point![x, 0.0, 1.0],
            ]);
            indices.push([base, base + 1, base + 2]);
        }
        let scene = RapierScene::from_statics(vec![def(
            1,
            vector![0.0, 0.0, 0.0],
            ColliderShapeDef::TriMesh { vertices, indices },
        )])
        .unwrap();

        let hits = query(&scene, Vec3::new(4.5, 0.0, 0.5), 0.6, default_query_flags());
        let SceneGeometry::Triangles(tris) = &hits[0].geometry else {
            panic!("mesh must yield triangles");
        };
        assert_eq!(tris.len(), 1);
        assert_eq!(tris[0].index, 2);
    }

    #[test]
    fn static_changes_bump_the_timestamp() {
        let mut scene = RapierScene::new();
        let t0 = scene.timestamp();
        let actor = scene
            .add_static(&def(
                1,
                vector![0.0, 0.0, 0.0],
                ColliderShapeDef::Sphere { radius: 1.0 },
            ))
            .unwrap();
        let t1 = scene.timestamp();
        assert_ne!(t0, t1);

        let dynamic = scene
            .add_dynamic(&def(
                2,
                vector![5.0, 0.0, 0.0],
                ColliderShapeDef::Sphere { radius: 1.0 },
            ))
            .unwrap();
        scene.set_actor_pose(dynamic, Iso::translation(6.0, 0.0, 0.0));
        assert_eq!(scene.timestamp(), t1);

        scene.release_actor(actor);
        assert_ne!(scene.timestamp(), t1);
        assert!(scene.actor_kind(actor).is_none());
    }

    #[test]
    fn proxies_are_kinematic_and_follow_targets() {
        let mut scene = RapierScene::new();
        let proxy = scene.create_kinematic_proxy(
            ProxyGeometry::Capsule {
                radius: 0.5,
                half_height: 1.0,
            },
            Iso::identity(),
            10.0,
        );
        assert_eq!(scene.actor_kind(proxy), Some(ActorKind::Kinematic));

        scene.set_kinematic_target(proxy, Iso::translation(0.0, 3.0, 0.0));
        assert_relative_eq!(scene.actor_pose(proxy).unwrap().translation.vector.y, 3.0);

        let hits = query(&scene, Vec3::new(0.0, 3.0, 0.0), 0.5, default_query_flags());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].actor, proxy);
    }

    struct CountingListener(AtomicU64);

    impl DeletionListener for CountingListener {
        fn on_release(&self, _actor: ActorHandle) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn deletion_listeners_are_notified_until_unregistered() {
        let mut scene = RapierScene::new();
        let listener = Arc::new(CountingListener(AtomicU64::new(0)));
        let id = scene.register_deletion_listener(listener.clone());

        let a = scene
            .add_dynamic(&def(1, vector![0.0, 0.0, 0.0], ColliderShapeDef::Sphere { radius: 1.0 }))
            .unwrap();
        let b = scene
            .add_dynamic(&def(2, vector![3.0, 0.0, 0.0], ColliderShapeDef::Sphere { radius: 1.0 }))
            .unwrap();

        scene.release_actor(a);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        scene.unregister_deletion_listener(id);
        scene.release_actor(b);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }
}
