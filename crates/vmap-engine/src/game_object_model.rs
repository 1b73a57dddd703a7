// game_object_model.rs — Dynamic placements bound to live, movable objects
//
// Positions are world coordinates as the owner reports them; no internal
// remap is applied on this path.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use vmap_common::common::VmapError;
use vmap_common::v_shared::{matrix_from_yaw, vector_is_nan, AaBox, ModelFlags, ModelIgnoreFlags, Ray, Vec3};
use vmap_common::vfiles::{read_name, read_u32_or_eof, read_vec3, GAMEOBJECT_MODELS};

use crate::model_cache::{ModelCache, ModelHandle};
use crate::placement::{LocationInfo, Placement};
use crate::world_model::AreaInfo;

/// What the engine needs to know about the object a model is attached to.
pub trait ModelOwner: Send + Sync {
    fn display_id(&self) -> u32;
    fn is_spawned(&self) -> bool;
    fn position(&self) -> Vec3;
    /// Yaw in radians.
    fn orientation(&self) -> f32;
    fn scale(&self) -> f32;
}

// ============================================================
// Display id → model registry
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GameObjectModelData {
    pub name: String,
    /// Model-space bound.
    pub bound: AaBox,
}

#[derive(Debug, Default)]
pub struct ModelList {
    models: HashMap<u32, GameObjectModelData>,
}

impl ModelList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `<base>/temp_gameobject_models`.
    pub fn load_file(base_path: &Path) -> Result<Self, VmapError> {
        let path = base_path.join(GAMEOBJECT_MODELS);
        let file = File::open(&path)?;
        let list = Self::read_from(&mut BufReader::new(file))?;
        info!("loaded {} gameobject models from '{}'", list.len(), path.display());
        Ok(list)
    }

    /// Records until end of file. A malformed record stops the read and
    /// keeps what came before it.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let mut list = Self::new();

        loop {
            let Some(display_id) = read_u32_or_eof(reader)? else {
                break;
            };

            let record = read_name(reader).and_then(|name| {
                let low = read_vec3(reader)?;
                let high = read_vec3(reader)?;
                Ok((name, low, high))
            });
            let (name, low, high) = match record {
                Ok(r) => r,
                Err(e) => {
                    error!("gameobject model list is corrupt at display id {}: {}", display_id, e);
                    break;
                }
            };
            if vector_is_nan(&low) || vector_is_nan(&high) {
                error!("gameobject model '{}' has invalid bounds", name);
                break;
            }

            list.models.insert(display_id, GameObjectModelData { name, bound: AaBox { low, high } });
        }

        Ok(list)
    }

    pub fn insert(&mut self, display_id: u32, data: GameObjectModelData) {
        self.models.insert(display_id, data);
    }

    pub fn get(&self, display_id: u32) -> Option<&GameObjectModelData> {
        self.models.get(&display_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }
}

// ============================================================
// Game object model
// ============================================================

/// A dynamic placement. The model is resolved once, from the display id the
/// owner reports at creation.
pub struct GameObjectModel {
    owner: Arc<dyn ModelOwner>,
    display_id: u32,
    handle: ModelHandle,
    model_bound: AaBox,
    placement: Placement,
    collision_enabled: AtomicBool,
}

impl GameObjectModel {
    /// Bind `owner` to the model its display id names. `None` for unknown
    /// display ids, zero bounds and models that fail to load.
    pub fn create(owner: Arc<dyn ModelOwner>, models: &ModelList, cache: &Arc<ModelCache>) -> Option<Self> {
        let display_id = owner.display_id();
        let data = models.get(display_id)?;

        if data.bound.is_zero() {
            error!("gameobject model '{}' has zero bounds, loading skipped", data.name);
            return None;
        }

        let handle = cache.acquire_handle(&data.name, ModelFlags::empty())?;
        let placement = Self::compute_placement(owner.as_ref(), owner.scale(), &data.bound);

        Some(Self {
            owner,
            display_id,
            handle,
            model_bound: data.bound,
            placement,
            collision_enabled: AtomicBool::new(true),
        })
    }

    fn compute_placement(owner: &dyn ModelOwner, scale: f32, model_bound: &AaBox) -> Placement {
        let rotation = matrix_from_yaw(owner.orientation());
        Placement::from_model_bound(owner.position(), &rotation, scale, model_bound)
    }

    /// Re-derive the transform and world bound from the owner's position,
    /// orientation and scale. The model and its bound stay those of the
    /// creation display id; an owner that changes display id needs a new
    /// model from `create`.
    pub fn update_position(&mut self) {
        self.placement = Self::compute_placement(self.owner.as_ref(), self.owner.scale(), &self.model_bound);
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Display id the model was resolved from.
    pub fn display_id(&self) -> u32 {
        self.display_id
    }

    pub fn owner(&self) -> &Arc<dyn ModelOwner> {
        &self.owner
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn bound(&self) -> &AaBox {
        &self.placement.bound
    }

    pub fn position(&self) -> Vec3 {
        self.placement.pos
    }

    pub fn enable_collision(&self, enable: bool) {
        self.collision_enabled.store(enable, Ordering::Relaxed);
    }

    pub fn is_collision_enabled(&self) -> bool {
        self.collision_enabled.load(Ordering::Relaxed)
    }

    fn is_active(&self) -> bool {
        self.is_collision_enabled() && self.owner.is_spawned()
    }

    pub fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32, stop_at_first: bool, ignore_flags: ModelIgnoreFlags) -> bool {
        if !self.is_active() {
            return false;
        }
        self.placement.intersect_ray(self.handle.model(), ray, max_dist, stop_at_first, ignore_flags)
    }

    pub fn intersect_point(&self, p: &Vec3, info: &mut Option<AreaInfo>) {
        if !self.is_active() {
            return;
        }
        let min_z = info.map_or(f32::NEG_INFINITY, |i| i.ground_z);
        if let Some(mut area) = self.placement.intersect_point(self.handle.model(), p, min_z) {
            area.adt_id = 0;
            *info = Some(area);
        }
    }

    pub fn get_location_info<'a>(&'a self, p: &Vec3, info: &mut Option<LocationInfo<'a>>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.placement.get_location_info(self.handle.model(), p, 0, info)
    }
}

impl std::fmt::Debug for GameObjectModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameObjectModel")
            .field("name", &self.name())
            .field("display_id", &self.display_id)
            .field("bound", &self.placement.bound)
            .finish()
    }
}
