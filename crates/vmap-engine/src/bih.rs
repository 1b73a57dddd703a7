// bih.rs — Bounding interval hierarchy over primitive bounds
//
// Node layout (three u32 words per node):
//   word 0: bits 30-31 axis (3 = leaf), bit 29 BVH2 flag, bits 0-28 child offset
//   leaf:     word 0 low bits = first object slot, word 1 = object count
//   interior: words 1 and 2 = left/right clip planes as raw f32 bits,
//             children at `offset` and `offset + 3`
//   BVH2:     words 1 and 2 = empty-space cut planes, single child at `offset`

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use vmap_common::common::VmapError;
use vmap_common::v_shared::{AaBox, Ray, Vec3};
use vmap_common::vfiles::{read_aabox, read_u32_array};

const LEAF_AXIS: u32 = 3;
const BVH2_BIT: u32 = 1 << 29;
const OFFSET_MASK: u32 = !(7 << 29);

/// Deepest recursion the builder allows before forcing a leaf.
const MAX_BUILD_DEPTH: usize = 64;

/// Direction components this close to zero skip the slab test.
const DIR_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Bih {
    bounds: AaBox,
    tree: Vec<u32>,
    objects: Vec<u32>,
}

impl Default for Bih {
    fn default() -> Self {
        Self {
            bounds: AaBox::zero(),
            tree: vec![LEAF_AXIS << 30, 0, 0],
            objects: Vec::new(),
        }
    }
}

#[inline]
fn node_axis(tn: u32) -> u32 {
    (tn >> 30) & 3
}

#[inline]
fn node_is_bvh2(tn: u32) -> bool {
    tn & BVH2_BIT != 0
}

#[inline]
fn node_offset(tn: u32) -> usize {
    (tn & OFFSET_MASK) as usize
}

impl Bih {
    // ============================================================
    // Loading
    // ============================================================

    /// `vec3 low, vec3 high, u32 treeSize, u32[treeSize], u32 count, u32[count]`
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let bounds = read_aabox(reader)?;

        let tree_size = reader.read_u32::<LittleEndian>()? as usize;
        let tree = read_u32_array(reader, tree_size)?;

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let objects = read_u32_array(reader, count)?;

        if tree.is_empty() {
            if !objects.is_empty() {
                return Err(VmapError::MalformedTree("objects without nodes"));
            }
            return Ok(Self { bounds, ..Self::default() });
        }
        if tree.len() < 3 {
            return Err(VmapError::MalformedTree("truncated root node"));
        }

        Ok(Self { bounds, tree, objects })
    }

    // ============================================================
    // Building
    // ============================================================

    /// Build a hierarchy over `prim_bounds`; leaves hold at most `leaf_size`
    /// primitives unless the split stalls.
    pub fn build(prim_bounds: &[AaBox], leaf_size: usize) -> Self {
        if prim_bounds.is_empty() {
            return Self::default();
        }

        let mut bounds = prim_bounds[0];
        for pb in &prim_bounds[1..] {
            bounds.merge(pb);
        }

        let mut builder = BihBuilder {
            tree: vec![LEAF_AXIS << 30, 0, 0],
            indices: (0..prim_bounds.len() as u32).collect(),
            prim_bounds,
            max_prims: leaf_size.max(1) as i64,
        };

        let grid = [bounds.low, bounds.high];
        builder.subdivide(0, prim_bounds.len() as i64 - 1, grid, grid, 0, 1);

        Self {
            bounds,
            tree: builder.tree,
            objects: builder.indices,
        }
    }

    pub fn bounds(&self) -> &AaBox {
        &self.bounds
    }

    /// Number of primitive slots; objects index into arrays of this size.
    pub fn prim_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn tree(&self) -> &[u32] {
        &self.tree
    }

    pub(crate) fn objects(&self) -> &[u32] {
        &self.objects
    }

    // ============================================================
    // Traversal
    // ============================================================

    /// Walk every leaf the ray segment `[0, max_dist]` can touch, nearest
    /// first. The callback receives the object index and may shorten
    /// `max_dist`; it returns whether it hit. With `stop_at_first` the walk
    /// ends on the first hit.
    pub fn intersect_ray<F>(&self, ray: &Ray, max_dist: &mut f32, stop_at_first: bool, mut callback: F)
    where
        F: FnMut(&Ray, u32, &mut f32, bool) -> bool,
    {
        let org = ray.origin;
        let dir = ray.direction;

        let mut interval_min = -1.0f32;
        let mut interval_max = -1.0f32;
        let mut inv_dir: Vec3 = [0.0; 3];

        for i in 0..3 {
            inv_dir[i] = 1.0 / dir[i];
            if dir[i].abs() > DIR_EPSILON {
                let mut t1 = (self.bounds.low[i] - org[i]) * inv_dir[i];
                let mut t2 = (self.bounds.high[i] - org[i]) * inv_dir[i];
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                if t1 > interval_min {
                    interval_min = t1;
                }
                if t2 < interval_max || interval_max < 0.0 {
                    interval_max = t2;
                }
                // max only shrinks and min only grows on later axes
                if interval_max <= 0.0 || interval_min >= *max_dist {
                    return;
                }
            }
        }

        if interval_min > interval_max {
            return;
        }
        interval_min = interval_min.max(0.0);
        interval_max = interval_max.min(*max_dist);

        let mut offset_front = [0usize; 3];
        let mut offset_back = [0usize; 3];
        let mut offset_front3 = [0usize; 3];
        let mut offset_back3 = [0usize; 3];
        for i in 0..3 {
            let front = (dir[i].to_bits() >> 31) as usize;
            let back = front ^ 1;
            offset_front3[i] = front * 3;
            offset_back3[i] = back * 3;
            offset_front[i] = front + 1;
            offset_back[i] = back + 1;
        }

        let clip = |idx: usize| -> Option<f32> { self.tree.get(idx).map(|b| f32::from_bits(*b)) };

        // (node, tnear, tfar)
        let mut stack: Vec<(usize, f32, f32)> = Vec::with_capacity(32);
        let mut node = 0usize;

        loop {
            loop {
                let Some(&tn) = self.tree.get(node) else {
                    return;
                };
                let axis = node_axis(tn);
                let offset = node_offset(tn);

                if !node_is_bvh2(tn) {
                    if axis < 3 {
                        let a = axis as usize;
                        let (Some(front_clip), Some(back_clip)) =
                            (clip(node + offset_front[a]), clip(node + offset_back[a]))
                        else {
                            return;
                        };
                        let tf = (front_clip - org[a]) * inv_dir[a];
                        let tb = (back_clip - org[a]) * inv_dir[a];

                        // between the clip zones
                        if tf < interval_min && tb > interval_max {
                            break;
                        }
                        let back = offset + offset_back3[a];
                        node = back;
                        // far node only
                        if tf < interval_min {
                            interval_min = if tb >= interval_min { tb } else { interval_min };
                            continue;
                        }
                        node = offset + offset_front3[a];
                        // near node only
                        if tb > interval_max {
                            interval_max = if tf <= interval_max { tf } else { interval_max };
                            continue;
                        }
                        // both: visit front now, back later
                        stack.push((back, if tb >= interval_min { tb } else { interval_min }, interval_max));
                        interval_max = if tf <= interval_max { tf } else { interval_max };
                        continue;
                    }

                    let count = self.tree.get(node + 1).copied().unwrap_or(0) as usize;
                    for slot in offset..offset + count {
                        let Some(&obj) = self.objects.get(slot) else {
                            break;
                        };
                        let hit = callback(ray, obj, max_dist, stop_at_first);
                        if stop_at_first && hit {
                            return;
                        }
                    }
                    break;
                }

                if axis > 2 {
                    return;
                }
                let a = axis as usize;
                let (Some(front_clip), Some(back_clip)) =
                    (clip(node + offset_front[a]), clip(node + offset_back[a]))
                else {
                    return;
                };
                let tf = (front_clip - org[a]) * inv_dir[a];
                let tb = (back_clip - org[a]) * inv_dir[a];
                node = offset;
                interval_min = if tf >= interval_min { tf } else { interval_min };
                interval_max = if tb <= interval_max { tb } else { interval_max };
                if interval_min > interval_max {
                    break;
                }
            }

            loop {
                let Some((next, tnear, tfar)) = stack.pop() else {
                    return;
                };
                if *max_dist < tnear {
                    continue;
                }
                interval_min = tnear;
                interval_max = tfar;
                node = next;
                break;
            }
        }
    }

    /// Call `callback` for every object whose leaf region contains `p`.
    pub fn intersect_point<F>(&self, p: &Vec3, mut callback: F)
    where
        F: FnMut(&Vec3, u32),
    {
        if !self.bounds.contains(p) {
            return;
        }

        let mut stack: Vec<usize> = Vec::with_capacity(32);
        let mut node = 0usize;

        loop {
            loop {
                let Some(&tn) = self.tree.get(node) else {
                    return;
                };
                let axis = node_axis(tn);
                let offset = node_offset(tn);

                let (tl, tr) = match (self.tree.get(node + 1), self.tree.get(node + 2)) {
                    (Some(l), Some(r)) => (f32::from_bits(*l), f32::from_bits(*r)),
                    _ if axis == LEAF_AXIS => (0.0, 0.0),
                    _ => return,
                };

                if !node_is_bvh2(tn) {
                    if axis < 3 {
                        let pa = p[axis as usize];
                        // between the clip zones
                        if tl < pa && tr > pa {
                            break;
                        }
                        let right = offset + 3;
                        node = right;
                        if tl < pa {
                            continue;
                        }
                        node = offset;
                        if tr > pa {
                            continue;
                        }
                        stack.push(right);
                        continue;
                    }

                    let count = self.tree.get(node + 1).copied().unwrap_or(0) as usize;
                    for slot in offset..offset + count {
                        let Some(&obj) = self.objects.get(slot) else {
                            break;
                        };
                        callback(p, obj);
                    }
                    break;
                }

                if axis > 2 {
                    return;
                }
                let pa = p[axis as usize];
                node = offset;
                if tl > pa || tr < pa {
                    break;
                }
            }

            let Some(next) = stack.pop() else {
                return;
            };
            node = next;
        }
    }
}

// ============================================================
// Builder
// ============================================================

struct BihBuilder<'a> {
    tree: Vec<u32>,
    indices: Vec<u32>,
    prim_bounds: &'a [AaBox],
    max_prims: i64,
}

impl BihBuilder<'_> {
    fn alloc_node(&mut self) -> usize {
        let index = self.tree.len();
        self.tree.extend_from_slice(&[0, 0, 0]);
        index
    }

    fn make_leaf(&mut self, node_index: usize, left: i64, right: i64) {
        self.tree[node_index] = (LEAF_AXIS << 30) | left as u32;
        self.tree[node_index + 1] = (right - left + 1) as u32;
    }

    fn prim_range(&self, slot: i64, axis: usize) -> (f32, f32) {
        let b = &self.prim_bounds[self.indices[slot as usize] as usize];
        (b.low[axis], b.high[axis])
    }

    fn subdivide(
        &mut self,
        left: i64,
        mut right: i64,
        mut grid_box: [Vec3; 2],
        mut node_box: [Vec3; 2],
        mut node_index: usize,
        depth: usize,
    ) {
        if right - left + 1 <= self.max_prims || depth >= MAX_BUILD_DEPTH {
            self.make_leaf(node_index, left, right);
            return;
        }

        let right_orig = right;
        let mut axis: usize = 0;
        let mut cur_axis: Option<usize> = None;
        let mut last_axis: Option<usize>;
        let mut split = f32::NAN;
        let mut prev_clip = f32::NAN;
        let mut was_left = true;
        let mut clip_l;
        let mut clip_r;

        loop {
            last_axis = cur_axis;
            let last_split = split;

            let d = [
                grid_box[1][0] - grid_box[0][0],
                grid_box[1][1] - grid_box[0][1],
                grid_box[1][2] - grid_box[0][2],
            ];
            axis = if d[0] >= d[1] && d[0] >= d[2] {
                0
            } else if d[1] >= d[2] {
                1
            } else {
                2
            };
            split = 0.5 * (grid_box[0][axis] + grid_box[1][axis]);
            cur_axis = Some(axis);

            clip_l = f32::NEG_INFINITY;
            clip_r = f32::INFINITY;
            let mut node_l = f32::INFINITY;
            let mut node_r = f32::NEG_INFINITY;

            let mut i = left;
            while i <= right {
                let (minb, maxb) = self.prim_range(i, axis);
                let center = (minb + maxb) * 0.5;
                if center <= split {
                    i += 1;
                    if clip_l < maxb {
                        clip_l = maxb;
                    }
                } else {
                    self.indices.swap(i as usize, right as usize);
                    right -= 1;
                    if clip_r > minb {
                        clip_r = minb;
                    }
                }
                node_l = node_l.min(minb);
                node_r = node_r.max(maxb);
            }

            // cut off empty space with a BVH2 node
            if node_l > node_box[0][axis] && node_r < node_box[1][axis] {
                let node_box_w = node_box[1][axis] - node_box[0][axis];
                let node_new_w = node_r - node_l;
                if 1.3 * node_new_w < node_box_w {
                    let next_index = self.alloc_node();
                    self.tree[node_index] = ((axis as u32) << 30) | BVH2_BIT | next_index as u32;
                    self.tree[node_index + 1] = node_l.to_bits();
                    self.tree[node_index + 2] = node_r.to_bits();
                    node_box[0][axis] = node_l;
                    node_box[1][axis] = node_r;
                    self.subdivide(left, right_orig, grid_box, node_box, next_index, depth + 1);
                    return;
                }
            }

            let stalled = last_axis == Some(axis) && !last_split.is_nan() && (last_split - split).abs() < 1e-6;

            if right == right_orig {
                // all left
                if stalled {
                    self.make_leaf(node_index, left, right);
                    return;
                }
                grid_box[1][axis] = split;
                if clip_l <= split {
                    prev_clip = clip_l;
                    was_left = true;
                } else {
                    prev_clip = f32::NAN;
                }
                continue;
            } else if left > right {
                // all right
                right = right_orig;
                if stalled {
                    self.make_leaf(node_index, left, right);
                    return;
                }
                grid_box[0][axis] = split;
                if clip_r >= split {
                    prev_clip = clip_r;
                    was_left = false;
                } else {
                    prev_clip = f32::NAN;
                }
                continue;
            }

            // real split; emit the pending one-sided node first
            if let Some(pa) = last_axis {
                if !prev_clip.is_nan() {
                    let next_index = self.alloc_node();
                    if was_left {
                        self.tree[node_index] = ((pa as u32) << 30) | next_index as u32;
                        self.tree[node_index + 1] = prev_clip.to_bits();
                        self.tree[node_index + 2] = f32::INFINITY.to_bits();
                    } else {
                        self.tree[node_index] = ((pa as u32) << 30) | (next_index as u32).wrapping_sub(3);
                        self.tree[node_index + 1] = f32::NEG_INFINITY.to_bits();
                        self.tree[node_index + 2] = prev_clip.to_bits();
                    }
                    node_index = next_index;
                }
            }
            break;
        }

        let nl = right - left + 1;
        let nr = right_orig - right;

        let mut next_index = self.tree.len();
        if nl > 0 {
            self.alloc_node();
        } else {
            next_index -= 3;
        }
        if nr > 0 {
            self.alloc_node();
        }

        self.tree[node_index] = ((axis as u32) << 30) | next_index as u32;
        self.tree[node_index + 1] = clip_l.to_bits();
        self.tree[node_index + 2] = clip_r.to_bits();

        let mut grid_box_l = grid_box;
        let mut grid_box_r = grid_box;
        let mut node_box_l = node_box;
        let mut node_box_r = node_box;
        grid_box_l[1][axis] = split;
        grid_box_r[0][axis] = split;
        node_box_l[1][axis] = clip_l;
        node_box_r[0][axis] = clip_r;

        if nl > 0 {
            self.subdivide(left, right, grid_box_l, node_box_l, next_index, depth + 1);
        }
        if nr > 0 {
            self.subdivide(right + 1, right_orig, grid_box_r, node_box_r, next_index + 3, depth + 1);
        }
    }
}
