use rapier3d::parry::{
    bounding_volume::Aabb,
    partitioning::{Bvh, BvhBuildStrategy},
};

/// BVH over bounded entries plus a separate list of unbounded ones.
///
/// Notes:
/// - Bounded entries (boxes, balls, capsules, meshes) are indexed by their world-space AABB.
/// - Unbounded entries (half-spaces) cannot live in the tree; they are returned by every query.
/// - `payloads` maps each BVH leaf back to the caller's identifier.
pub struct BoundedIndex<T> {
    bvh: Bvh,
    payloads: Vec<T>,
    unbounded: Vec<T>,
}

impl<T: Copy> BoundedIndex<T> {
    /// Build from `(aabb, payload)` pairs. `None` bounds go to the unbounded list.
    pub fn build(entries: impl IntoIterator<Item = (Option<Aabb>, T)>) -> Self {
        let mut aabbs: Vec<Aabb> = Vec::new();
        let mut payloads = Vec::new();
        let mut unbounded = Vec::new();

        for (aabb, payload) in entries {
            match aabb {
                Some(aabb) => {
                    aabbs.push(aabb);
                    payloads.push(payload);
                }
                None => unbounded.push(payload),
            }
        }

        Self {
            bvh: Bvh::from_leaves(BvhBuildStrategy::Binned, &aabbs),
            payloads,
            unbounded,
        }
    }

    pub fn empty() -> Self {
        Self::build(std::iter::empty())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty() && self.unbounded.is_empty()
    }

    /// Number of entries, bounded and unbounded.
    #[inline]
    pub fn len(&self) -> usize {
        self.payloads.len() + self.unbounded.len()
    }

    /// Append every payload whose bounds intersect `bounds`, then every unbounded payload.
    pub fn query(&self, bounds: &Aabb, out: &mut Vec<T>) {
        if !self.payloads.is_empty() {
            out.extend(
                self.bvh
                    .intersect_aabb(bounds)
                    .map(|leaf| self.payloads[leaf as usize]),
            );
        }
        out.extend_from_slice(&self.unbounded);
    }
}

/// Test two AABBs for intersection. Touching boxes intersect.
#[inline]
pub fn aabb_intersects(a: &Aabb, b: &Aabb) -> bool {
    !(a.maxs.x < b.mins.x
        || a.mins.x > b.maxs.x
        || a.maxs.y < b.mins.y
        || a.mins.y > b.maxs.y
        || a.maxs.z < b.mins.z
        || a.mins.z > b.maxs.z)
}

/// Axis order used by box pruning: the sweep runs on the first axis,
/// the two others are tested per candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruningAxes(pub [usize; 3]);

impl PruningAxes {
    pub const XYZ: Self = Self([0, 1, 2]);
    pub const XZY: Self = Self([0, 2, 1]);
    pub const YXZ: Self = Self([1, 0, 2]);
    pub const ZXY: Self = Self([2, 0, 1]);
}

/// Complete box pruning: every pair `(i, j)` with `i < j` whose boxes overlap.
///
/// Boxes are sorted on the primary axis and swept once; candidates still open on
/// that axis are tested on the two remaining ones.
pub fn complete_box_pruning(boxes: &[Aabb], axes: PruningAxes) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    if boxes.len() < 2 {
        return pairs;
    }

    let [a0, a1, a2] = axes.0;

    let mut sorted: Vec<usize> = (0..boxes.len()).collect();
    sorted.sort_by(|&i, &j| boxes[i].mins[a0].total_cmp(&boxes[j].mins[a0]));

    for (rank, &i) in sorted.iter().enumerate() {
        let bi = &boxes[i];
        for &j in &sorted[rank + 1..] {
            let bj = &boxes[j];
            if bj.mins[a0] > bi.maxs[a0] {
                break;
            }
            let overlaps = bj.mins[a1] <= bi.maxs[a1]
                && bj.maxs[a1] >= bi.mins[a1]
                && bj.mins[a2] <= bi.maxs[a2]
                && bj.maxs[a2] >= bi.mins[a2];
            if overlaps {
                pairs.push((i.min(j), i.max(j)));
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(min: [f32; 3], max: [f32; 3]) -> Aabb {
        Aabb::new(min.into(), max.into())
    }

    fn brute_force(boxes: &[Aabb]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for i in 0..boxes.len() {
            for j in i + 1..boxes.len() {
                if aabb_intersects(&boxes[i], &boxes[j]) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    #[test]
    fn pruning_finds_single_overlap() {
        let boxes = [
            aabb([0.0, 0.0, 0.0], [1.5, 1.0, 1.0]),
            aabb([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]),
            aabb([5.0, 0.0, 0.0], [6.0, 1.0, 1.0]),
        ];
        assert_eq!(complete_box_pruning(&boxes, PruningAxes::XZY), vec![(0, 1)]);
    }

    #[test]
    fn pruning_rejects_overlap_on_sweep_axis_only() {
        let boxes = [
            aabb([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            aabb([0.5, 3.0, 0.0], [1.5, 4.0, 1.0]),
        ];
        assert!(complete_box_pruning(&boxes, PruningAxes::XZY).is_empty());
    }

    #[test]
    fn pruning_matches_brute_force() {
        let mut boxes = Vec::new();
        for i in 0..12 {
            let f = i as f32;
            let min = [(f * 0.7) % 3.0, (f * 1.3) % 2.0, (f * 0.4) % 1.5];
            boxes.push(aabb(min, [min[0] + 0.8, min[1] + 0.6, min[2] + 0.5]));
        }
        let mut got = complete_box_pruning(&boxes, PruningAxes::XZY);
        got.sort();
        assert_eq!(got, brute_force(&boxes));

        let mut got = complete_box_pruning(&boxes, PruningAxes::YXZ);
        got.sort();
        assert_eq!(got, brute_force(&boxes));
    }

    #[test]
    fn bounded_index_returns_unbounded_entries_for_any_query() {
        let index = BoundedIndex::build([
            (Some(aabb([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])), 10u32),
            (Some(aabb([10.0, 0.0, 0.0], [11.0, 1.0, 1.0])), 11u32),
            (None, 99u32),
        ]);
        assert_eq!(index.len(), 3);

        let mut out = Vec::new();
        index.query(&aabb([0.5, 0.5, 0.5], [2.0, 2.0, 2.0]), &mut out);
        out.sort();
        assert_eq!(out, vec![10, 99]);

        out.clear();
        index.query(&aabb([50.0, 0.0, 0.0], [51.0, 1.0, 1.0]), &mut out);
        assert_eq!(out, vec![99]);
    }
}
