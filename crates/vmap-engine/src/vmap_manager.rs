// vmap_manager.rs — Entry point for collision, height, area and liquid queries
//
// Callers speak world coordinates. Static trees are stored in the internal
// frame, where X and Y are mirrored around the map midpoint; the remap is
// applied once on the way in and once on the way out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};
use vmap_common::common::{LoadResult, VmapError};
use vmap_common::config::VmapConfig;
use vmap_common::v_shared::{DisableFlags, ModelFlags, ModelIgnoreFlags, Vec3, MAP_MID, VMAP_INVALID_HEIGHT, VMAP_INVALID_HEIGHT_VALUE};

use crate::game_object_model::{GameObjectModel, ModelList, ModelOwner};
use crate::map_tree::StaticMapTree;
use crate::model_cache::ModelCache;
use crate::placement::LiquidLevel;
use crate::world_model::{AreaInfo, WorldModel};

/// Answers whether a feature is switched off for one map.
pub type IsVmapDisabledForFn = Box<dyn Fn(u32, DisableFlags) -> bool + Send + Sync>;
/// Maps a liquid type id to the flag bits requests are matched against.
pub type GetLiquidFlagsFn = Box<dyn Fn(u32) -> u32 + Send + Sync>;

/// Default search depth for height probes.
pub const DEFAULT_HEIGHT_SEARCH_DIST: f32 = 100.0;

/// Mirror world X/Y around the map midpoint. Self-inverse.
#[inline]
pub fn convert_position(p: &Vec3) -> Vec3 {
    [MAP_MID - p[0], MAP_MID - p[1], p[2]]
}

/// Area part of a combined probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaData {
    pub adt_id: u32,
    pub root_id: u32,
    pub group_id: u32,
    pub mogp_flags: u32,
}

/// Liquid part of a combined probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidData {
    pub liquid_type: u32,
    pub level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaAndLiquidData {
    pub floor_z: f32,
    pub area: Option<AreaData>,
    pub liquid: Option<LiquidData>,
}

impl Default for AreaAndLiquidData {
    fn default() -> Self {
        Self {
            floor_z: VMAP_INVALID_HEIGHT,
            area: None,
            liquid: None,
        }
    }
}

type SharedTree = Arc<RwLock<StaticMapTree>>;

pub struct VMapManager {
    base_path: PathBuf,
    cache: Arc<ModelCache>,
    trees: RwLock<HashMap<u32, SharedTree>>,
    /// Serializes tree creation, tile loads and unloads.
    load_lock: Mutex<()>,
    model_list: RwLock<ModelList>,
    enable_line_of_sight_calc: AtomicBool,
    enable_height_calc: AtomicBool,
    is_vmap_disabled_for: IsVmapDisabledForFn,
    get_liquid_flags: GetLiquidFlagsFn,
}

impl VMapManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            cache: Arc::new(ModelCache::new(base_path.clone())),
            base_path,
            trees: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
            model_list: RwLock::new(ModelList::new()),
            enable_line_of_sight_calc: AtomicBool::new(true),
            enable_height_calc: AtomicBool::new(true),
            is_vmap_disabled_for: Box::new(|_, _| false),
            // liquid type ids double as bit positions unless told otherwise
            get_liquid_flags: Box::new(|liquid_type| 1u32.checked_shl(liquid_type).unwrap_or(0)),
        }
    }

    /// Manager with paths, toggles and per-map overrides taken from `config`.
    pub fn from_config(config: &VmapConfig) -> Self {
        let mut manager = Self::new(config.base_path.clone());
        manager.set_enable_line_of_sight_calc(config.enable_line_of_sight_calc);
        manager.set_enable_height_calc(config.enable_height_calc);

        let overrides = config.clone();
        manager.set_is_vmap_disabled_for_fn(Box::new(move |map_id, flags| {
            overrides.disable_flags_for(map_id).intersects(flags)
        }));
        manager
    }

    pub fn set_is_vmap_disabled_for_fn(&mut self, f: IsVmapDisabledForFn) {
        self.is_vmap_disabled_for = f;
    }

    pub fn set_get_liquid_flags_fn(&mut self, f: GetLiquidFlagsFn) {
        self.get_liquid_flags = f;
    }

    pub fn set_enable_line_of_sight_calc(&self, enable: bool) {
        self.enable_line_of_sight_calc.store(enable, Ordering::Relaxed);
    }

    pub fn set_enable_height_calc(&self, enable: bool) {
        self.enable_height_calc.store(enable, Ordering::Relaxed);
    }

    pub fn is_line_of_sight_calc_enabled(&self) -> bool {
        self.enable_line_of_sight_calc.load(Ordering::Relaxed)
    }

    pub fn is_height_calc_enabled(&self) -> bool {
        self.enable_height_calc.load(Ordering::Relaxed)
    }

    pub fn is_map_loading_enabled(&self) -> bool {
        self.is_line_of_sight_calc_enabled() || self.is_height_calc_enabled()
    }

    fn is_disabled(&self, map_id: u32, flag: DisableFlags) -> bool {
        (self.is_vmap_disabled_for)(map_id, flag)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn model_cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    fn tree(&self, map_id: u32) -> Option<SharedTree> {
        self.trees.read().get(&map_id).cloned()
    }

    // ============================================================
    // Map and tile lifetime
    // ============================================================

    /// Make tile `(x, y)` of `map_id` visible to queries, creating the map's
    /// tree on first use.
    pub fn load_map(&self, map_id: u32, tile_x: u32, tile_y: u32) -> LoadResult {
        if !self.is_map_loading_enabled() {
            return LoadResult::DisabledInConfig;
        }

        let _admin = self.load_lock.lock();

        let existing = self.tree(map_id);
        let (tree, created) = match existing {
            Some(tree) => (tree, false),
            None => match StaticMapTree::init_map(&self.base_path, map_id, &self.cache) {
                Ok(tree) => {
                    let tree = Arc::new(RwLock::new(tree));
                    self.trees.write().insert(map_id, Arc::clone(&tree));
                    info!("loaded map tree for map {}", map_id);
                    (tree, true)
                }
                Err(e) => {
                    let result = LoadResult::from(&e);
                    if result != LoadResult::FileNotFound {
                        error!("could not initialize map {}: {}", map_id, e);
                    }
                    return result;
                }
            },
        };

        if tree.read().has_tile(tile_x, tile_y) {
            return LoadResult::Success;
        }

        // parse under the read lock so queries keep running, then publish
        let prepared = tree.read().prepare_tile(tile_x, tile_y, &self.cache);
        let result = tree.write().finish_tile_load(tile_x, tile_y, prepared);
        debug!("load tile [{}, {}] of map {}: {:?}", tile_x, tile_y, map_id, result);

        if created && tree.read().num_loaded_tiles() == 0 {
            self.trees.write().remove(&map_id);
        }
        result
    }

    pub fn unload_map_tile(&self, map_id: u32, tile_x: u32, tile_y: u32) {
        let _admin = self.load_lock.lock();

        let tree = self.tree(map_id);
        let Some(tree) = tree else {
            return;
        };

        let empty = {
            let mut tree = tree.write();
            tree.unload_map_tile(tile_x, tile_y);
            tree.num_loaded_tiles() == 0
        };
        if empty {
            self.trees.write().remove(&map_id);
            info!("unloaded map tree for map {}", map_id);
        }
    }

    pub fn unload_map(&self, map_id: u32) {
        let _admin = self.load_lock.lock();

        let removed = self.trees.write().remove(&map_id);
        if let Some(tree) = removed {
            tree.write().unload_map();
            info!("unloaded map tree for map {}", map_id);
        }
    }

    /// Check the map's files without loading anything.
    pub fn exists_map(&self, map_id: u32, tile_x: u32, tile_y: u32) -> LoadResult {
        StaticMapTree::exists_map(&self.base_path, map_id, tile_x, tile_y)
    }

    pub fn loaded_map_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.trees.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn num_loaded_tiles(&self, map_id: u32) -> usize {
        self.tree(map_id).as_deref().map_or(0, |t| t.read().num_loaded_tiles())
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Fails open: disabled features, unknown maps and degenerate segments
    /// all report a clear line. A segment of non-finite length on a loaded
    /// map is blocked.
    pub fn is_in_line_of_sight(&self, map_id: u32, p1: &Vec3, p2: &Vec3, ignore_flags: ModelIgnoreFlags) -> bool {
        if !self.is_line_of_sight_calc_enabled() || self.is_disabled(map_id, DisableFlags::LOS) {
            return true;
        }
        let Some(tree) = self.tree(map_id) else {
            return true;
        };

        let pos1 = convert_position(p1);
        let pos2 = convert_position(p2);
        if pos1 == pos2 {
            return true;
        }
        let clear = tree.read().is_in_line_of_sight(&pos1, &pos2, ignore_flags);
        clear
    }

    /// First obstruction from `p1` toward `p2`, adjusted by `modify_dist`.
    /// `(false, p2)` when nothing was hit or the query does not apply.
    pub fn get_object_hit_pos(&self, map_id: u32, p1: &Vec3, p2: &Vec3, modify_dist: f32) -> (bool, Vec3) {
        if !self.is_line_of_sight_calc_enabled() || self.is_disabled(map_id, DisableFlags::LOS) {
            return (false, *p2);
        }
        let Some(tree) = self.tree(map_id) else {
            return (false, *p2);
        };

        let pos1 = convert_position(p1);
        let pos2 = convert_position(p2);
        let (hit, result) = tree.read().get_object_hit_pos(&pos1, &pos2, modify_dist);
        if hit {
            (true, convert_position(&result))
        } else {
            (false, *p2)
        }
    }

    /// Ground height below the point, or `VMAP_INVALID_HEIGHT_VALUE`.
    pub fn get_height(&self, map_id: u32, x: f32, y: f32, z: f32, max_search_dist: f32) -> f32 {
        if !self.is_height_calc_enabled() || self.is_disabled(map_id, DisableFlags::HEIGHT) {
            return VMAP_INVALID_HEIGHT_VALUE;
        }
        let Some(tree) = self.tree(map_id) else {
            return VMAP_INVALID_HEIGHT_VALUE;
        };

        let pos = convert_position(&[x, y, z]);
        let height = tree.read().get_height(&pos, max_search_dist);
        if height.is_finite() {
            height
        } else {
            VMAP_INVALID_HEIGHT_VALUE
        }
    }

    /// Area of the highest model floor below the point; `ground_z` is that
    /// floor.
    pub fn get_area_info(&self, map_id: u32, x: f32, y: f32, z: f32) -> Option<AreaInfo> {
        if self.is_disabled(map_id, DisableFlags::AREAFLAG) {
            return None;
        }
        let tree = self.tree(map_id)?;
        let pos = convert_position(&[x, y, z]);
        let area = tree.read().get_area_info(&pos);
        area
    }

    /// Liquid over the highest model floor below the point. A non-zero
    /// `req_liquid_type` must share a bit with the liquid's flags.
    pub fn get_liquid_level(&self, map_id: u32, x: f32, y: f32, z: f32, req_liquid_type: u32) -> Option<LiquidLevel> {
        if self.is_disabled(map_id, DisableFlags::LIQUIDSTATUS) {
            return None;
        }
        let tree = self.tree(map_id)?;
        let pos = convert_position(&[x, y, z]);

        let guard = tree.read();
        let info = guard.get_location_info(&pos)?;
        let liquid_type = info.hit_model.liquid_type();
        if req_liquid_type != 0 && (self.get_liquid_flags)(liquid_type) & req_liquid_type == 0 {
            return None;
        }
        debug_assert!(info.ground_z < f32::MAX, "accepted floor without a surface");
        info.liquid_level(&pos)
    }

    /// Floor, area and liquid from one probe. Each part honours its own
    /// per-map override.
    pub fn get_area_and_liquid_data(
        &self,
        map_id: u32,
        x: f32,
        y: f32,
        z: f32,
        req_liquid_type: Option<u32>,
    ) -> AreaAndLiquidData {
        let mut data = AreaAndLiquidData::default();

        if self.is_disabled(map_id, DisableFlags::LIQUIDSTATUS) {
            data.floor_z = z;
            if let Some(area) = self.get_area_info(map_id, x, y, z) {
                data.floor_z = area.ground_z;
                data.area = Some(AreaData {
                    adt_id: area.adt_id,
                    root_id: area.root_id,
                    group_id: area.group_id,
                    mogp_flags: area.flags,
                });
            }
            return data;
        }

        let Some(tree) = self.tree(map_id) else {
            return data;
        };
        let pos = convert_position(&[x, y, z]);
        let guard = tree.read();
        let Some(info) = guard.get_location_info(&pos) else {
            return data;
        };

        debug_assert!(info.ground_z < f32::MAX, "accepted floor without a surface");
        data.floor_z = info.ground_z;
        let liquid_type = info.hit_model.liquid_type();
        let wanted = req_liquid_type.map_or(true, |req| (self.get_liquid_flags)(liquid_type) & req != 0);
        if wanted {
            if let Some(level) = info.hit_placement.get_liquid_level(&pos, info.hit_model) {
                data.liquid = Some(LiquidData { liquid_type, level });
            }
        }

        if !self.is_disabled(map_id, DisableFlags::AREAFLAG) {
            data.area = Some(AreaData {
                adt_id: info.adt_id,
                root_id: info.root_id,
                group_id: info.hit_model.wmo_id(),
                mogp_flags: info.hit_model.mogp_flags(),
            });
        }
        data
    }

    // ============================================================
    // Models
    // ============================================================

    pub fn acquire_model_instance(&self, name: &str, flags: ModelFlags) -> Option<Arc<WorldModel>> {
        self.cache.acquire(name, flags)
    }

    pub fn release_model_instance(&self, name: &str) {
        self.cache.release(name);
    }

    /// Read the display id → model registry from the base directory.
    pub fn load_game_object_model_list(&self) -> Result<usize, VmapError> {
        let list = ModelList::load_file(&self.base_path)?;
        let count = list.len();
        *self.model_list.write() = list;
        Ok(count)
    }

    pub fn clear_game_object_model_list(&self) {
        self.model_list.write().clear();
    }

    /// Collision model for `owner`, or `None` when its display id has no
    /// usable model.
    pub fn create_game_object_model(&self, owner: Arc<dyn ModelOwner>) -> Option<GameObjectModel> {
        let list = self.model_list.read();
        GameObjectModel::create(owner, &list, &self.cache)
    }
}

impl std::fmt::Debug for VMapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VMapManager")
            .field("base_path", &self.base_path)
            .field("maps", &self.loaded_map_ids())
            .field("models", &self.cache.loaded_models())
            .finish()
    }
}
