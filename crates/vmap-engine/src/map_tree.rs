// map_tree.rs — Per-map index of static model placements, streamed by tile
//
// All positions are in the internal coordinate frame. Tile loads parse the
// whole tile file and resolve its models before the tree is touched, so a
// tile is either absent or fully present to queries.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, error, warn};
use vmap_common::common::{file_checksum, LoadResult, VmapError};
use vmap_common::v_shared::{vector_length, vector_ma, vector_scale, vector_subtract, ModelIgnoreFlags, Ray, Vec3};
use vmap_common::vfiles::{
    map_file_name, pack_tile_id, read_chunk, read_magic, tile_file_name, ModelSpawn, CHUNK_GOBJ,
    CHUNK_NODE,
};

use crate::bih::Bih;
use crate::model_cache::{ModelCache, ModelHandle};
use crate::model_instance::ModelInstance;
use crate::placement::LocationInfo;
use crate::world_model::AreaInfo;

/// Segments shorter than this are treated as a single point.
const MIN_RAY_LENGTH: f32 = 1e-10;

/// References one loaded tile holds on tree values and models.
#[derive(Debug, Default)]
struct TileRecord {
    spawns: Vec<(u32, Option<ModelHandle>)>,
}

/// A parsed tile whose models are resolved but not yet visible.
#[derive(Debug)]
pub struct PendingTile {
    tile_id: u32,
    spawns: Vec<(u32, ModelSpawn, Option<ModelHandle>)>,
}

impl PendingTile {
    pub fn len(&self) -> usize {
        self.spawns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty()
    }
}

pub struct StaticMapTree {
    map_id: u32,
    base_path: PathBuf,
    is_tiled: bool,
    tree: Bih,
    tree_values: Vec<Option<ModelInstance>>,
    /// Tree node → number of tiles that reference it.
    loaded_spawns: HashMap<u32, u32>,
    loaded_tiles: HashMap<u32, TileRecord>,
    /// Model of the single spawn of a non-tiled map.
    global_model: Option<ModelHandle>,
}

impl StaticMapTree {
    // ============================================================
    // Loading
    // ============================================================

    /// Read `<base>/MMM.vmtree`. Non-tiled maps also load their global model.
    pub fn init_map(base_path: &Path, map_id: u32, cache: &Arc<ModelCache>) -> Result<Self, VmapError> {
        let path = base_path.join(map_file_name(map_id));
        let data = std::fs::read(&path)?;
        let mut reader = Cursor::new(data.as_slice());

        let parsed = (|| -> Result<_, VmapError> {
            read_magic(&mut reader)?;
            let is_tiled = reader.read_u8()? != 0;
            read_chunk(&mut reader, CHUNK_NODE)?;
            let tree = Bih::read_from(&mut reader)?;
            read_chunk(&mut reader, CHUNK_GOBJ)?;

            let global = if is_tiled {
                None
            } else {
                match ModelSpawn::read_from(&mut reader)? {
                    Some(spawn) => Some((spawn, reader.read_u32::<LittleEndian>()?)),
                    None => None,
                }
            };
            Ok((is_tiled, tree, global))
        })();

        let (is_tiled, tree, global) = parsed.inspect_err(|e| {
            error!("cannot read map tree '{}': {}", path.display(), e);
        })?;

        let mut map_tree = Self {
            map_id,
            base_path: base_path.to_path_buf(),
            is_tiled,
            tree_values: vec![None; tree.prim_count()],
            tree,
            loaded_spawns: HashMap::new(),
            loaded_tiles: HashMap::new(),
            global_model: None,
        };

        if let Some((spawn, node)) = global {
            let Some(slot) = map_tree.tree_values.get_mut(node as usize) else {
                error!("global spawn of map {} references invalid node {}", map_id, node);
                return Err(VmapError::MalformedTree("global spawn node out of range"));
            };
            let handle = cache.acquire_handle(&spawn.name, spawn.flags);
            if handle.is_none() {
                error!("could not acquire global model '{}' for map {}", spawn.name, map_id);
            }
            *slot = Some(ModelInstance::new(&spawn, handle.as_ref().map(|h| Arc::clone(h.model()))));
            map_tree.loaded_spawns.insert(node, 1);
            map_tree.global_model = handle;
        }

        debug!(
            "initialized map {} ({} tree values, tiled: {}, crc {:08x})",
            map_id,
            map_tree.tree_values.len(),
            is_tiled,
            file_checksum(&data)
        );
        Ok(map_tree)
    }

    /// Whether the tree file and, for tiled maps, the tile file exist and
    /// carry the expected header.
    pub fn exists_map(base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> LoadResult {
        let check = || -> Result<(), VmapError> {
            let tree_path = base_path.join(map_file_name(map_id));
            let mut file = std::fs::File::open(&tree_path)?;
            read_magic(&mut file)?;
            let is_tiled = file.read_u8()? != 0;
            if is_tiled {
                let tile_path = base_path.join(tile_file_name(map_id, tile_x, tile_y));
                let mut tile = std::fs::File::open(&tile_path)?;
                read_magic(&mut tile)?;
            }
            Ok(())
        };
        match check() {
            Ok(()) => LoadResult::Success,
            Err(e) => LoadResult::from(&e),
        }
    }

    /// Parse tile `(x, y)` and acquire its models without changing the tree.
    pub fn prepare_tile(&self, tile_x: u32, tile_y: u32, cache: &Arc<ModelCache>) -> Result<PendingTile, VmapError> {
        let tile_id = pack_tile_id(tile_x, tile_y);
        if !self.is_tiled {
            return Ok(PendingTile { tile_id, spawns: Vec::new() });
        }

        let path = self.base_path.join(tile_file_name(self.map_id, tile_x, tile_y));
        let data = std::fs::read(&path)?;
        let mut reader = Cursor::new(data.as_slice());

        let mut records = Vec::new();
        let parsed = (|| -> Result<(), VmapError> {
            read_magic(&mut reader)?;
            let count = reader.read_u32::<LittleEndian>()?;
            for _ in 0..count {
                let spawn = ModelSpawn::read_from(&mut reader)?.ok_or_else(|| {
                    VmapError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "missing spawn record"))
                })?;
                let node = reader.read_u32::<LittleEndian>()?;
                records.push((spawn, node));
            }
            Ok(())
        })();
        if let Err(e) = parsed {
            error!("cannot read tile '{}': {}", path.display(), e);
            return Err(e);
        }

        let mut spawns = Vec::with_capacity(records.len());
        for (spawn, node) in records {
            if node as usize >= self.tree_values.len() {
                error!(
                    "invalid tree element ({}/{}) referenced in tile '{}'",
                    node,
                    self.tree_values.len(),
                    path.display()
                );
                continue;
            }
            let handle = cache.acquire_handle(&spawn.name, spawn.flags);
            if handle.is_none() {
                warn!("could not acquire model '{}' for tile [{}, {}]", spawn.name, tile_x, tile_y);
            }
            spawns.push((node, spawn, handle));
        }

        debug!(
            "read tile [{}, {}] of map {}: {} spawns, crc {:08x}",
            tile_x,
            tile_y,
            self.map_id,
            spawns.len(),
            file_checksum(&data)
        );
        Ok(PendingTile { tile_id, spawns })
    }

    /// Make a prepared tile visible. A tile already present is left as is.
    pub fn commit_tile(&mut self, pending: PendingTile) {
        if self.loaded_tiles.contains_key(&pending.tile_id) {
            return;
        }

        let mut record = TileRecord::default();
        for (node, spawn, handle) in pending.spawns {
            match self.loaded_spawns.get_mut(&node) {
                Some(count) => *count += 1,
                None => {
                    let model = handle.as_ref().map(|h| Arc::clone(h.model()));
                    self.tree_values[node as usize] = Some(ModelInstance::new(&spawn, model));
                    self.loaded_spawns.insert(node, 1);
                }
            }
            record.spawns.push((node, handle));
        }
        self.loaded_tiles.insert(pending.tile_id, record);
    }

    /// Record the outcome of a tile read. A missing tile file still counts
    /// as a loaded, empty tile so the map's lifetime follows its grids.
    pub fn finish_tile_load(&mut self, tile_x: u32, tile_y: u32, prepared: Result<PendingTile, VmapError>) -> LoadResult {
        match prepared {
            Ok(pending) => {
                self.commit_tile(pending);
                LoadResult::Success
            }
            Err(e) => {
                let result = LoadResult::from(&e);
                if result == LoadResult::FileNotFound {
                    self.loaded_tiles.entry(pack_tile_id(tile_x, tile_y)).or_default();
                }
                result
            }
        }
    }

    pub fn load_map_tile(&mut self, tile_x: u32, tile_y: u32, cache: &Arc<ModelCache>) -> LoadResult {
        if self.has_tile(tile_x, tile_y) {
            return LoadResult::Success;
        }
        let prepared = self.prepare_tile(tile_x, tile_y, cache);
        self.finish_tile_load(tile_x, tile_y, prepared)
    }

    pub fn unload_map_tile(&mut self, tile_x: u32, tile_y: u32) {
        let Some(record) = self.loaded_tiles.remove(&pack_tile_id(tile_x, tile_y)) else {
            error!("trying to unload non-loaded tile - map {} x {} y {}", self.map_id, tile_x, tile_y);
            return;
        };
        self.release_tile(record);
    }

    pub fn unload_map(&mut self) {
        let tiles: Vec<TileRecord> = self.loaded_tiles.drain().map(|(_, r)| r).collect();
        for record in tiles {
            self.release_tile(record);
        }
    }

    fn release_tile(&mut self, record: TileRecord) {
        for (node, handle) in record.spawns {
            drop(handle);
            let Some(count) = self.loaded_spawns.get_mut(&node) else {
                error!("tile references node {} that is not loaded", node);
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.loaded_spawns.remove(&node);
                self.tree_values[node as usize] = None;
            }
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn is_tiled(&self) -> bool {
        self.is_tiled
    }

    pub fn num_loaded_tiles(&self) -> usize {
        self.loaded_tiles.len()
    }

    pub fn has_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.loaded_tiles.contains_key(&pack_tile_id(tile_x, tile_y))
    }

    /// Instances currently visible to queries.
    pub fn loaded_instances(&self) -> impl Iterator<Item = &ModelInstance> {
        self.tree_values.iter().flatten()
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Nearest hit along `ray` within `max_dist`; on a hit `max_dist` is
    /// shortened to it.
    pub fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32, stop_at_first: bool, ignore_flags: ModelIgnoreFlags) -> bool {
        let mut distance = *max_dist;
        let mut hit = false;
        self.tree.intersect_ray(ray, &mut distance, stop_at_first, |r, entry, dist, stop| {
            if let Some(Some(instance)) = self.tree_values.get(entry as usize) {
                if instance.intersect_ray(r, dist, stop, ignore_flags) {
                    hit = true;
                }
            }
            hit
        });
        if hit {
            *max_dist = distance;
        }
        hit
    }

    pub fn is_in_line_of_sight(&self, p1: &Vec3, p2: &Vec3, ignore_flags: ModelIgnoreFlags) -> bool {
        let delta = vector_subtract(p2, p1);
        let mut max_dist = vector_length(&delta);
        // points at the end of the universe see nothing
        if !max_dist.is_finite() {
            return false;
        }
        if max_dist < MIN_RAY_LENGTH {
            return true;
        }

        let ray = Ray::new(*p1, vector_scale(&delta, 1.0 / max_dist));
        !self.intersect_ray(&ray, &mut max_dist, true, ignore_flags)
    }

    /// First obstruction between `p1` and `p2`, moved along the segment by
    /// `modify_dist` (negative pulls back toward `p1`, never past it).
    /// Without a hit the result is `p2`.
    pub fn get_object_hit_pos(&self, p1: &Vec3, p2: &Vec3, modify_dist: f32) -> (bool, Vec3) {
        let delta = vector_subtract(p2, p1);
        let max_dist = vector_length(&delta);
        if !max_dist.is_finite() || max_dist < MIN_RAY_LENGTH {
            return (false, *p2);
        }

        let dir = vector_scale(&delta, 1.0 / max_dist);
        let ray = Ray::new(*p1, dir);
        let mut dist = max_dist;
        if !self.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()) {
            return (false, *p2);
        }

        let hit_pos = vector_ma(p1, dist, &dir);
        if modify_dist < 0.0 && vector_length(&vector_subtract(&hit_pos, p1)) <= -modify_dist {
            return (true, *p1);
        }
        (true, vector_ma(&hit_pos, modify_dist, &dir))
    }

    /// Z of the first surface straight below `p` within `max_search_dist`,
    /// or infinity.
    pub fn get_height(&self, p: &Vec3, max_search_dist: f32) -> f32 {
        let ray = Ray::new(*p, [0.0, 0.0, -1.0]);
        let mut max_dist = max_search_dist;
        if self.intersect_ray(&ray, &mut max_dist, false, ModelIgnoreFlags::empty()) {
            p[2] - max_dist
        } else {
            f32::INFINITY
        }
    }

    /// Area data of the highest floor below `p`.
    pub fn get_area_info(&self, p: &Vec3) -> Option<AreaInfo> {
        let mut info = None;
        self.tree.intersect_point(p, |point, entry| {
            if let Some(Some(instance)) = self.tree_values.get(entry as usize) {
                instance.intersect_point(point, &mut info);
            }
        });
        info
    }

    pub fn get_location_info(&self, p: &Vec3) -> Option<LocationInfo<'_>> {
        let mut info = None;
        self.tree.intersect_point(p, |point, entry| {
            if let Some(Some(instance)) = self.tree_values.get(entry as usize) {
                instance.get_location_info(point, &mut info);
            }
        });
        info
    }
}

impl std::fmt::Debug for StaticMapTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticMapTree")
            .field("map_id", &self.map_id)
            .field("is_tiled", &self.is_tiled)
            .field("tree_values", &self.tree_values.len())
            .field("loaded_tiles", &self.loaded_tiles.len())
            .field("global_model", &self.global_model.as_ref().map(|h| h.name()))
            .finish()
    }
}
