use nalgebra as na;
use rapier3d::parry::{
    query,
    shape::{Cuboid, Segment},
};

use super::types::{Iso, Point3, Quat, Vec3, decompose_vector, safe_normalize};

/// Closest points between segments `p0 + s * d0` and `p1 + t * d1`, with `s, t` in `[0, 1]`.
///
/// Returns `(squared distance, s, t)`. Degenerate segments are treated as points.
pub fn segment_segment(p0: &Vec3, d0: &Vec3, p1: &Vec3, d1: &Vec3) -> (f32, f32, f32) {
    const EPS: f32 = 1.0e-12;

    let r = p0 - p1;
    let a = d0.norm_squared();
    let e = d1.norm_squared();
    let f = d1.dot(&r);

    let (s, t) = if a <= EPS && e <= EPS {
        (0.0, 0.0)
    } else if a <= EPS {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d0.dot(&r);
        if e <= EPS {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d0.dot(d1);
            let denom = a * e - b * b;
            let mut s = if denom > EPS {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    let c0 = p0 + d0 * s;
    let c1 = p1 + d1 * t;
    ((c0 - c1).norm_squared(), s, t)
}

/// Distance between segment `[p0, p1]` and an oriented box.
///
/// Fails open: returns `f32::MAX` when the query is unsupported.
pub fn segment_box(p0: &Vec3, p1: &Vec3, center: &Vec3, extents: &Vec3, rot: &Quat) -> f32 {
    let segment = Segment::new(Point3::from(*p0), Point3::from(*p1));
    let cuboid = Cuboid::new(*extents);
    let box_pose = Iso::from_parts(na::Translation3::from(*center), *rot);
    query::distance(&Iso::identity(), &segment, &box_pose, &cuboid).unwrap_or(f32::MAX)
}

/// Separating axes considered by [`box_box_mtd`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatAxes {
    /// The six face normals. Edge-edge axes are evaluated but never selected.
    Faces,
    /// All fifteen axes of the separating-axis test.
    FacesAndEdges,
}

/// Minimum translation between two overlapping oriented boxes.
///
/// Returns `(axis, depth)` with a unit `axis` in world space, or `None` when a
/// separating axis exists among the selected ones. The axis sign is arbitrary;
/// callers orient it with a witness vector.
pub fn box_box_mtd(
    e0: &Vec3,
    c0: &Vec3,
    r0: &Quat,
    e1: &Vec3,
    c1: &Vec3,
    r1: &Quat,
    axes: SatAxes,
) -> Option<(Vec3, f32)> {
    let m0 = r0.to_rotation_matrix();
    let m1 = r1.to_rotation_matrix();
    let a: [Vec3; 3] = [
        m0.matrix().column(0).into_owned(),
        m0.matrix().column(1).into_owned(),
        m0.matrix().column(2).into_owned(),
    ];
    let b: [Vec3; 3] = [
        m1.matrix().column(0).into_owned(),
        m1.matrix().column(1).into_owned(),
        m1.matrix().column(2).into_owned(),
    ];

    let v = c1 - c0;
    let t = Vec3::new(v.dot(&a[0]), v.dot(&a[1]), v.dot(&a[2]));

    let mut r = [[0.0f32; 3]; 3];
    let mut fr = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for k in 0..3 {
            r[i][k] = a[i].dot(&b[k]);
            fr[i][k] = 1.0e-6 + r[i][k].abs();
        }
    }

    let mut overlap = [f32::MAX; 15];

    for i in 0..3 {
        let ra = e0[i];
        let rb = e1[0] * fr[i][0] + e1[1] * fr[i][1] + e1[2] * fr[i][2];
        let d = ra + rb - t[i].abs();
        if d < 0.0 {
            return None;
        }
        overlap[i] = d;
    }

    for k in 0..3 {
        let ra = e0[0] * fr[0][k] + e0[1] * fr[1][k] + e0[2] * fr[2][k];
        let rb = e1[k];
        let proj = t[0] * r[0][k] + t[1] * r[1][k] + t[2] * r[2][k];
        let d = ra + rb - proj.abs();
        if d < 0.0 {
            return None;
        }
        overlap[k + 3] = d;
    }

    // Edge-edge axes A_i x B_k.
    let edge_overlaps = {
        let mut out = [0.0f32; 9];
        for i in 0..3 {
            let (i1, i2) = ((i + 1) % 3, (i + 2) % 3);
            for k in 0..3 {
                let (k1, k2) = ((k + 1) % 3, (k + 2) % 3);
                let ra = e0[i1] * fr[i2][k] + e0[i2] * fr[i1][k];
                let rb = e1[k1] * fr[i][k2] + e1[k2] * fr[i][k1];
                let proj = t[i2] * r[i1][k] - t[i1] * r[i2][k];
                out[i * 3 + k] = ra + rb - proj.abs();
            }
        }
        out
    };

    let candidates = match axes {
        SatAxes::Faces => 6,
        SatAxes::FacesAndEdges => {
            if edge_overlaps.iter().any(|&d| d < 0.0) {
                return None;
            }
            overlap[6..].copy_from_slice(&edge_overlaps);
            15
        }
    };

    let mut min_index = 0;
    for i in 1..candidates {
        if overlap[i] < overlap[min_index] {
            min_index = i;
        }
    }

    let axis = match min_index {
        0..=2 => a[min_index],
        3..=5 => b[min_index - 3],
        _ => {
            let e = min_index - 6;
            let n = safe_normalize(&a[e / 3].cross(&b[e % 3]));
            if n == Vec3::zeros() {
                // Parallel edges produce no usable axis.
                return None;
            }
            n
        }
    };

    Some((axis, overlap[min_index]))
}

/// Horizontal part of `dir` relative to `up`, normalized. Zero when `dir` is parallel to `up`.
pub fn fix_dir(dir: &Vec3, up: &Vec3) -> Vec3 {
    let (_, tangent) = decompose_vector(dir, up);
    safe_normalize(&tangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parallel_segments_distance() {
        let (d2, _, _) = segment_segment(
            &Vec3::new(0.0, 0.0, 0.0),
            &Vec3::new(0.0, 0.0, 2.0),
            &Vec3::new(0.8, 0.0, 0.0),
            &Vec3::new(0.0, 0.0, 2.0),
        );
        assert_relative_eq!(d2.sqrt(), 0.8, epsilon = 1.0e-6);
    }

    #[test]
    fn crossing_segments_report_parameters() {
        let (d2, s, t) = segment_segment(
            &Vec3::new(-1.0, 0.0, 0.0),
            &Vec3::new(2.0, 0.0, 0.0),
            &Vec3::new(0.0, -1.0, 1.0),
            &Vec3::new(0.0, 2.0, 0.0),
        );
        assert_relative_eq!(d2, 1.0, epsilon = 1.0e-6);
        assert_relative_eq!(s, 0.5, epsilon = 1.0e-6);
        assert_relative_eq!(t, 0.5, epsilon = 1.0e-6);
    }

    #[test]
    fn degenerate_segments_are_points() {
        let (d2, s, t) = segment_segment(
            &Vec3::new(0.0, 0.0, 0.0),
            &Vec3::zeros(),
            &Vec3::new(3.0, 4.0, 0.0),
            &Vec3::zeros(),
        );
        assert_relative_eq!(d2, 25.0);
        assert_eq!((s, t), (0.0, 0.0));
    }

    #[test]
    fn segment_box_distance_above_box() {
        let d = segment_box(
            &Vec3::new(-1.0, 0.0, 3.0),
            &Vec3::new(1.0, 0.0, 3.0),
            &Vec3::zeros(),
            &Vec3::new(1.0, 1.0, 1.0),
            &Quat::identity(),
        );
        assert_relative_eq!(d, 2.0, epsilon = 1.0e-5);
    }

    #[test]
    fn mtd_of_axis_aligned_boxes() {
        let e = Vec3::new(1.0, 1.0, 1.0);
        let (axis, depth) = box_box_mtd(
            &e,
            &Vec3::zeros(),
            &Quat::identity(),
            &e,
            &Vec3::new(1.5, 0.2, 0.0),
            &Quat::identity(),
            SatAxes::Faces,
        )
        .expect("boxes overlap");
        assert_relative_eq!(depth, 0.5, epsilon = 1.0e-4);
        assert_relative_eq!(axis.x.abs(), 1.0, epsilon = 1.0e-6);
    }

    #[test]
    fn mtd_reports_separated_boxes() {
        let e = Vec3::new(1.0, 1.0, 1.0);
        let res = box_box_mtd(
            &e,
            &Vec3::zeros(),
            &Quat::identity(),
            &e,
            &Vec3::new(3.0, 0.0, 0.0),
            &Quat::identity(),
            SatAxes::Faces,
        );
        assert!(res.is_none());
    }

    #[test]
    fn edge_axes_never_deepen_the_mtd() {
        let e = Vec3::new(1.0, 1.0, 1.0);
        let r0 = Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_4);
        let r1 = Quat::from_axis_angle(&Vec3::x_axis(), std::f32::consts::FRAC_PI_4);
        for step in 0..8 {
            let c1 = Vec3::new(1.6 + step as f32 * 0.1, 0.3, 0.2);
            let faces = box_box_mtd(&e, &Vec3::zeros(), &r0, &e, &c1, &r1, SatAxes::Faces);
            let full =
                box_box_mtd(&e, &Vec3::zeros(), &r0, &e, &c1, &r1, SatAxes::FacesAndEdges);
            match (faces, full) {
                (Some((_, df)), Some((axis, d))) => {
                    assert!(d <= df + 1.0e-6);
                    assert_relative_eq!(axis.norm(), 1.0, epsilon = 1.0e-5);
                }
                (None, full) => assert!(full.is_none()),
                (Some(_), None) => {}
            }
        }
    }

    #[test]
    fn fix_dir_drops_vertical_part() {
        let d = fix_dir(&Vec3::new(3.0, 4.0, 10.0), &Vec3::z());
        assert_relative_eq!(d, Vec3::new(0.6, 0.8, 0.0), epsilon = 1.0e-6);
        assert_eq!(fix_dir(&Vec3::new(0.0, 0.0, 2.0), &Vec3::z()), Vec3::zeros());
    }
}
