// test_fixtures.rs — Geometry builders and resource file writers for tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;
use vmap_common::v_shared::{AaBox, ModelFlags, Vec3};
use vmap_common::vfiles::{
    map_file_name, model_file_path, tile_file_name, ModelSpawn, CHUNK_GBIH, CHUNK_GMOD, CHUNK_GOBJ, CHUNK_LIQU,
    CHUNK_MBIH, CHUNK_NODE, CHUNK_TRIM, CHUNK_VERT, CHUNK_WMOD, VMAP_MAGIC,
};

use crate::bih::Bih;
use crate::game_object_model::ModelOwner;
use crate::group_model::{GroupModel, MeshTriangle};
use crate::liquid::WmoLiquid;
use crate::model_instance::ModelInstance;
use crate::world_model::WorldModel;

// ============================================================
// Geometry
// ============================================================

/// Closed axis aligned box of 12 triangles.
pub fn box_group(low: Vec3, high: Vec3, mogp_flags: u32, wmo_id: u32) -> GroupModel {
    let (vertices, triangles) = box_mesh(low, high);
    GroupModel::from_mesh(mogp_flags, wmo_id, vertices, triangles, None).unwrap()
}

fn box_mesh(low: Vec3, high: Vec3) -> (Vec<Vec3>, Vec<MeshTriangle>) {
    let vertices: Vec<Vec3> = (0..8)
        .map(|i| {
            [
                if i & 1 != 0 { high[0] } else { low[0] },
                if i & 2 != 0 { high[1] } else { low[1] },
                if i & 4 != 0 { high[2] } else { low[2] },
            ]
        })
        .collect();
    let faces = [
        [0, 1, 3],
        [0, 3, 2],
        [4, 5, 7],
        [4, 7, 6],
        [0, 1, 5],
        [0, 5, 4],
        [2, 3, 7],
        [2, 7, 6],
        [0, 2, 6],
        [0, 6, 4],
        [1, 3, 7],
        [1, 7, 5],
    ];
    let triangles = faces.iter().map(|f| MeshTriangle::new(f[0], f[1], f[2])).collect();
    (vertices, triangles)
}

/// Horizontal square at height `z` spanning `0..size` on x and y.
pub fn quad_group(z: f32, size: f32) -> GroupModel {
    let vertices = vec![[0.0, 0.0, z], [size, 0.0, z], [size, size, z], [0.0, size, z]];
    let triangles = vec![MeshTriangle::new(0, 1, 2), MeshTriangle::new(0, 2, 3)];
    GroupModel::from_mesh(0, 0, vertices, triangles, None).unwrap()
}

pub fn quad_model(z: f32, size: f32) -> WorldModel {
    WorldModel::from_groups(1, vec![quad_group(z, size)], ModelFlags::empty())
}

/// Root 77: a 10x10x30 hall (group 1) with an upper room from z = 20
/// (group 2, flags 0x2008).
pub fn hall_model() -> WorldModel {
    WorldModel::from_groups(
        77,
        vec![
            box_group([0.0, 0.0, 0.0], [10.0, 10.0, 30.0], 0x8, 1),
            box_group([0.0, 0.0, 20.0], [10.0, 10.0, 30.0], 0x2008, 2),
        ],
        ModelFlags::empty(),
    )
}

/// Root 5: a 10x10x10 basin (group 3, flags 0x1) holding liquid type 2
/// whose surface sits at z = 4.
pub fn pool_model() -> WorldModel {
    let (vertices, triangles) = box_mesh([0.0; 3], [10.0; 3]);
    let group = GroupModel::from_mesh(0x1, 3, vertices, triangles, Some(WmoLiquid::flat(2, 4.0))).unwrap();
    WorldModel::from_groups(5, vec![group], ModelFlags::empty())
}

/// Unrotated, unscaled spawn without explicit bounds.
pub fn spawn(id: u32, name: &str, pos: Vec3, flags: ModelFlags) -> ModelSpawn {
    ModelSpawn {
        flags,
        adt_id: 0,
        id,
        pos,
        rot: [0.0; 3],
        scale: 1.0,
        bound: None,
        name: name.to_string(),
    }
}

// ============================================================
// Byte writers
// ============================================================

fn put_vec3(buf: &mut Vec<u8>, v: &Vec3) {
    for c in v {
        buf.write_f32::<LittleEndian>(*c).unwrap();
    }
}

fn put_aabox(buf: &mut Vec<u8>, b: &AaBox) {
    put_vec3(buf, &b.low);
    put_vec3(buf, &b.high);
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.write_u32::<LittleEndian>(name.len() as u32).unwrap();
    buf.extend_from_slice(name.as_bytes());
}

pub fn bih_bytes(bih: &Bih) -> Vec<u8> {
    let mut buf = Vec::new();
    put_aabox(&mut buf, bih.bounds());
    buf.write_u32::<LittleEndian>(bih.tree().len() as u32).unwrap();
    for w in bih.tree() {
        buf.write_u32::<LittleEndian>(*w).unwrap();
    }
    buf.write_u32::<LittleEndian>(bih.objects().len() as u32).unwrap();
    for o in bih.objects() {
        buf.write_u32::<LittleEndian>(*o).unwrap();
    }
    buf
}

pub fn liquid_bytes(liquid: &WmoLiquid) -> Vec<u8> {
    let mut buf = Vec::new();
    let (tiles_x, tiles_y) = liquid.tiles();
    buf.write_u32::<LittleEndian>(tiles_x).unwrap();
    buf.write_u32::<LittleEndian>(tiles_y).unwrap();
    put_vec3(&mut buf, liquid.corner());
    buf.write_u32::<LittleEndian>(liquid.liquid_type()).unwrap();
    if tiles_x == 0 || tiles_y == 0 {
        buf.write_f32::<LittleEndian>(liquid.heights()[0]).unwrap();
        return buf;
    }
    for h in liquid.heights() {
        buf.write_f32::<LittleEndian>(*h).unwrap();
    }
    buf.extend_from_slice(liquid.flags());
    buf
}

pub fn group_bytes(group: &GroupModel) -> Vec<u8> {
    let mut buf = Vec::new();
    put_aabox(&mut buf, group.bound());
    buf.write_u32::<LittleEndian>(group.mogp_flags()).unwrap();
    buf.write_u32::<LittleEndian>(group.wmo_id()).unwrap();

    buf.extend_from_slice(CHUNK_VERT);
    buf.write_u32::<LittleEndian>(4 + 12 * group.vertices().len() as u32).unwrap();
    buf.write_u32::<LittleEndian>(group.vertices().len() as u32).unwrap();
    if group.vertices().is_empty() {
        return buf;
    }
    for v in group.vertices() {
        put_vec3(&mut buf, v);
    }

    buf.extend_from_slice(CHUNK_TRIM);
    buf.write_u32::<LittleEndian>(4 + 12 * group.triangles().len() as u32).unwrap();
    buf.write_u32::<LittleEndian>(group.triangles().len() as u32).unwrap();
    for t in group.triangles() {
        for i in [t.idx0, t.idx1, t.idx2] {
            buf.write_u32::<LittleEndian>(i).unwrap();
        }
    }

    buf.extend_from_slice(CHUNK_MBIH);
    buf.extend_from_slice(&bih_bytes(group.mesh_tree()));

    buf.extend_from_slice(CHUNK_LIQU);
    match group.liquid() {
        Some(liquid) => {
            let bytes = liquid_bytes(liquid);
            buf.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
            buf.extend_from_slice(&bytes);
        }
        None => buf.write_u32::<LittleEndian>(0).unwrap(),
    }
    buf
}

pub fn vmo_bytes(model: &WorldModel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(VMAP_MAGIC);
    buf.extend_from_slice(CHUNK_WMOD);
    buf.write_u32::<LittleEndian>(4).unwrap();
    buf.write_u32::<LittleEndian>(model.root_wmo_id()).unwrap();

    buf.extend_from_slice(CHUNK_GMOD);
    buf.write_u32::<LittleEndian>(model.groups().len() as u32).unwrap();
    for g in model.groups() {
        buf.extend_from_slice(&group_bytes(g));
    }
    buf.extend_from_slice(CHUNK_GBIH);
    buf.extend_from_slice(&bih_bytes(model.group_tree()));
    buf
}

pub fn spawn_bytes(spawn: &ModelSpawn) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(spawn.flags.bits()).unwrap();
    buf.write_u16::<LittleEndian>(spawn.adt_id).unwrap();
    buf.write_u32::<LittleEndian>(spawn.id).unwrap();
    put_vec3(&mut buf, &spawn.pos);
    put_vec3(&mut buf, &spawn.rot);
    buf.write_f32::<LittleEndian>(spawn.scale).unwrap();
    if spawn.flags.contains(ModelFlags::HAS_BOUND) {
        put_aabox(&mut buf, &spawn.bound.unwrap_or_else(AaBox::zero));
    }
    put_name(&mut buf, &spawn.name);
    buf
}

pub fn model_list_bytes(entries: &[(u32, String, AaBox)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (display_id, name, bound) in entries {
        buf.write_u32::<LittleEndian>(*display_id).unwrap();
        put_name(&mut buf, name);
        put_aabox(&mut buf, bound);
    }
    buf
}

// ============================================================
// Resource files
// ============================================================

/// Scratch directory under the system temp dir, removed on drop.
pub struct FixtureDir {
    path: PathBuf,
}

impl FixtureDir {
    pub fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!("vmap_test_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FixtureDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn write_vmo(dir: &Path, name: &str, model: &WorldModel) {
    std::fs::write(model_file_path(dir, name), vmo_bytes(model)).unwrap();
}

/// Tree node `i` holds `spawns[i]`, bounded as it would be once placed.
fn spawn_tree(spawns: &[ModelSpawn], model: &WorldModel) -> Bih {
    let model = Arc::new(model.clone());
    let bounds: Vec<AaBox> = spawns
        .iter()
        .map(|s| *ModelInstance::new(s, Some(Arc::clone(&model))).bound())
        .collect();
    Bih::build(&bounds, 1)
}

pub fn write_tiled_tree(dir: &Path, map_id: u32, spawns: &[ModelSpawn], model: &WorldModel) {
    let mut buf = Vec::new();
    buf.extend_from_slice(VMAP_MAGIC);
    buf.push(1);
    buf.extend_from_slice(CHUNK_NODE);
    buf.extend_from_slice(&bih_bytes(&spawn_tree(spawns, model)));
    buf.extend_from_slice(CHUNK_GOBJ);
    std::fs::write(dir.join(map_file_name(map_id)), buf).unwrap();
}

pub fn write_global_tree(dir: &Path, map_id: u32, spawn: &ModelSpawn, model: &WorldModel) {
    let mut buf = Vec::new();
    buf.extend_from_slice(VMAP_MAGIC);
    buf.push(0);
    buf.extend_from_slice(CHUNK_NODE);
    buf.extend_from_slice(&bih_bytes(&spawn_tree(std::slice::from_ref(spawn), model)));
    buf.extend_from_slice(CHUNK_GOBJ);
    buf.extend_from_slice(&spawn_bytes(spawn));
    buf.write_u32::<LittleEndian>(0).unwrap();
    std::fs::write(dir.join(map_file_name(map_id)), buf).unwrap();
}

pub fn write_tile(dir: &Path, map_id: u32, tile_x: u32, tile_y: u32, entries: &[(ModelSpawn, u32)]) {
    let mut buf = Vec::new();
    buf.extend_from_slice(VMAP_MAGIC);
    buf.write_u32::<LittleEndian>(entries.len() as u32).unwrap();
    for (spawn, node) in entries {
        buf.extend_from_slice(&spawn_bytes(spawn));
        buf.write_u32::<LittleEndian>(*node).unwrap();
    }
    std::fs::write(dir.join(tile_file_name(map_id, tile_x, tile_y)), buf).unwrap();
}

// ============================================================
// Owners
// ============================================================

pub struct TestOwner {
    display_id: AtomicU32,
    position: Mutex<Vec3>,
    orientation: Mutex<f32>,
    spawned: AtomicBool,
}

impl TestOwner {
    pub fn new(display_id: u32, position: Vec3) -> Self {
        Self {
            display_id: AtomicU32::new(display_id),
            position: Mutex::new(position),
            orientation: Mutex::new(0.0),
            spawned: AtomicBool::new(true),
        }
    }

    pub fn set_display_id(&self, display_id: u32) {
        self.display_id.store(display_id, Ordering::Relaxed);
    }

    pub fn set_position(&self, position: Vec3) {
        *self.position.lock() = position;
    }

    pub fn set_orientation(&self, yaw: f32) {
        *self.orientation.lock() = yaw;
    }

    pub fn set_spawned(&self, spawned: bool) {
        self.spawned.store(spawned, Ordering::Relaxed);
    }
}

impl ModelOwner for TestOwner {
    fn display_id(&self) -> u32 {
        self.display_id.load(Ordering::Relaxed)
    }

    fn is_spawned(&self) -> bool {
        self.spawned.load(Ordering::Relaxed)
    }

    fn position(&self) -> Vec3 {
        *self.position.lock()
    }

    fn orientation(&self) -> f32 {
        *self.orientation.lock()
    }

    fn scale(&self) -> f32 {
        1.0
    }
}
