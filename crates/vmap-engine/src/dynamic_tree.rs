// dynamic_tree.rs — Index of game object models for one map
//
// Models move with their owners, so the hierarchy over their world bounds is
// rebuilt on demand by `balance()`. Until then queries test every model.
// Everything here works in world coordinates.

use std::collections::HashMap;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::debug;
use vmap_common::v_shared::{vector_length, vector_ma, vector_scale, vector_subtract, AaBox, ModelIgnoreFlags, Ray, Vec3};

use crate::bih::Bih;
use crate::game_object_model::GameObjectModel;
use crate::placement::{LiquidLevel, LocationInfo};
use crate::world_model::AreaInfo;

/// Models per leaf of the dynamic hierarchy.
const DYNAMIC_LEAF_SIZE: usize = 2;

const MIN_RAY_LENGTH: f32 = 1e-10;

/// Handle returned by `insert`, used to update or remove the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicModelId(u32);

#[derive(Default)]
struct DynamicTreeInner {
    models: HashMap<DynamicModelId, GameObjectModel>,
    next_id: u32,
    tree: Bih,
    /// Leaf object index → model, in the order the tree was built from.
    tree_ids: Vec<DynamicModelId>,
    dirty: bool,
}

impl DynamicTreeInner {
    fn tree_model(&self, entry: u32) -> Option<&GameObjectModel> {
        self.tree_ids.get(entry as usize).and_then(|id| self.models.get(id))
    }

    fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32, stop_at_first: bool, ignore_flags: ModelIgnoreFlags) -> bool {
        let mut distance = *max_dist;
        let mut hit = false;

        if self.dirty {
            for model in self.models.values() {
                if model.intersect_ray(ray, &mut distance, stop_at_first, ignore_flags) {
                    hit = true;
                    if stop_at_first {
                        break;
                    }
                }
            }
        } else {
            self.tree.intersect_ray(ray, &mut distance, stop_at_first, |r, entry, dist, stop| {
                if let Some(model) = self.tree_model(entry) {
                    if model.intersect_ray(r, dist, stop, ignore_flags) {
                        hit = true;
                    }
                }
                hit
            });
        }

        if hit {
            *max_dist = distance;
        }
        hit
    }

    fn for_each_containing<'a>(&'a self, p: &Vec3, mut f: impl FnMut(&'a GameObjectModel)) {
        if self.dirty {
            self.models.values().filter(|m| m.bound().contains(p)).for_each(f);
        } else {
            self.tree.intersect_point(p, |_, entry| {
                if let Some(model) = self.tree_model(entry) {
                    f(model);
                }
            });
        }
    }
}

#[derive(Default)]
pub struct DynamicMapTree {
    inner: RwLock<DynamicTreeInner>,
}

impl DynamicMapTree {
    /// Above this many models, position refreshes run on the rayon pool.
    const PARALLEL_UPDATE_THRESHOLD: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    // ============================================================
    // Membership
    // ============================================================

    pub fn insert(&self, model: GameObjectModel) -> DynamicModelId {
        let mut inner = self.inner.write();
        let id = DynamicModelId(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.models.insert(id, model);
        inner.dirty = true;
        id
    }

    pub fn remove(&self, id: DynamicModelId) -> Option<GameObjectModel> {
        let mut inner = self.inner.write();
        let removed = inner.models.remove(&id);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    pub fn contains(&self, id: DynamicModelId) -> bool {
        self.inner.read().models.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().models.is_empty()
    }

    pub fn enable_collision(&self, id: DynamicModelId, enable: bool) -> bool {
        match self.inner.read().models.get(&id) {
            Some(model) => {
                model.enable_collision(enable);
                true
            }
            None => false,
        }
    }

    /// Re-read one model's owner transform.
    pub fn update(&self, id: DynamicModelId) {
        let mut inner = self.inner.write();
        if let Some(model) = inner.models.get_mut(&id) {
            model.update_position();
            inner.dirty = true;
        }
    }

    /// Re-read every owner transform.
    pub fn update_all(&self) {
        let mut inner = self.inner.write();
        let count = inner.models.len();
        if count == 0 {
            return;
        }

        if count >= Self::PARALLEL_UPDATE_THRESHOLD {
            inner.models.par_iter_mut().for_each(|(_, model)| model.update_position());
        } else {
            for model in inner.models.values_mut() {
                model.update_position();
            }
        }
        inner.dirty = true;
    }

    /// Rebuild the hierarchy over current world bounds.
    pub fn balance(&self) {
        let mut inner = self.inner.write();
        if !inner.dirty {
            return;
        }

        let ids: Vec<DynamicModelId> = inner.models.keys().copied().collect();
        let bounds: Vec<AaBox> = ids.iter().map(|id| *inner.models[id].bound()).collect();
        inner.tree = Bih::build(&bounds, DYNAMIC_LEAF_SIZE);
        inner.tree_ids = ids;
        inner.dirty = false;
        debug!("rebalanced dynamic tree over {} models", inner.tree_ids.len());
    }

    pub fn is_balanced(&self) -> bool {
        !self.inner.read().dirty
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn get_intersection_time(
        &self,
        ray: &Ray,
        max_dist: &mut f32,
        stop_at_first: bool,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        self.inner.read().intersect_ray(ray, max_dist, stop_at_first, ignore_flags)
    }

    pub fn is_in_line_of_sight(&self, p1: &Vec3, p2: &Vec3, ignore_flags: ModelIgnoreFlags) -> bool {
        let delta = vector_subtract(p2, p1);
        let mut max_dist = vector_length(&delta);
        if !max_dist.is_finite() {
            return false;
        }
        if max_dist < MIN_RAY_LENGTH {
            return true;
        }
        let ray = Ray::new(*p1, vector_scale(&delta, 1.0 / max_dist));
        !self.get_intersection_time(&ray, &mut max_dist, true, ignore_flags)
    }

    /// Same contract as the static tree: `p2` when nothing is in the way.
    pub fn get_object_hit_pos(&self, p1: &Vec3, p2: &Vec3, modify_dist: f32) -> (bool, Vec3) {
        let delta = vector_subtract(p2, p1);
        let max_dist = vector_length(&delta);
        if !max_dist.is_finite() || max_dist < MIN_RAY_LENGTH {
            return (false, *p2);
        }

        let dir = vector_scale(&delta, 1.0 / max_dist);
        let mut dist = max_dist;
        if !self.get_intersection_time(&Ray::new(*p1, dir), &mut dist, false, ModelIgnoreFlags::empty()) {
            return (false, *p2);
        }

        let hit_pos = vector_ma(p1, dist, &dir);
        if modify_dist < 0.0 && vector_length(&vector_subtract(&hit_pos, p1)) <= -modify_dist {
            return (true, *p1);
        }
        (true, vector_ma(&hit_pos, modify_dist, &dir))
    }

    /// Z of the first model surface below `p`, or negative infinity.
    pub fn get_height(&self, p: &Vec3, max_search_dist: f32) -> f32 {
        let ray = Ray::new(*p, [0.0, 0.0, -1.0]);
        let mut max_dist = max_search_dist;
        if self.get_intersection_time(&ray, &mut max_dist, false, ModelIgnoreFlags::empty()) {
            p[2] - max_dist
        } else {
            f32::NEG_INFINITY
        }
    }

    pub fn get_area_info(&self, p: &Vec3) -> Option<AreaInfo> {
        let inner = self.inner.read();
        let mut info = None;
        inner.for_each_containing(p, |model| model.intersect_point(p, &mut info));
        info
    }

    /// Liquid over the highest model floor below `p`, with that floor.
    pub fn get_liquid_level(&self, p: &Vec3) -> Option<LiquidLevel> {
        let inner = self.inner.read();
        let mut info: Option<LocationInfo<'_>> = None;
        inner.for_each_containing(p, |model| {
            model.get_location_info(p, &mut info);
        });
        info?.liquid_level(p)
    }
}

impl std::fmt::Debug for DynamicMapTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DynamicMapTree")
            .field("models", &inner.models.len())
            .field("balanced", &!inner.dirty)
            .finish()
    }
}
