// group_model.rs — One rigid sub-mesh of a world model

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use vmap_common::common::VmapError;
use vmap_common::v_shared::{
    cross_product, dot_product, vector_ma, vector_subtract, AaBox, Ray, Vec3,
};
use vmap_common::vfiles::{
    read_aabox, read_chunk, read_u32_array, read_vec3_array, CHUNK_LIQU, CHUNK_MBIH, CHUNK_TRIM,
    CHUNK_VERT,
};

use crate::bih::Bih;
use crate::liquid::WmoLiquid;

/// Triangles in one mesh BIH leaf.
const MESH_LEAF_SIZE: usize = 3;

/// Start offset of the containment probe, against the probe direction.
const INSIDE_PROBE_OFFSET: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshTriangle {
    pub idx0: u32,
    pub idx1: u32,
    pub idx2: u32,
}

impl MeshTriangle {
    pub fn new(idx0: u32, idx1: u32, idx2: u32) -> Self {
        Self { idx0, idx1, idx2 }
    }
}

/// Ray/triangle test without back-face culling. Shortens `distance` and
/// returns true on a hit in `(0, distance)`.
pub fn intersect_triangle(tri: &MeshTriangle, points: &[Vec3], ray: &Ray, distance: &mut f32) -> bool {
    const EPS: f32 = 1e-5;

    let (Some(p0), Some(p1), Some(p2)) = (
        points.get(tri.idx0 as usize),
        points.get(tri.idx1 as usize),
        points.get(tri.idx2 as usize),
    ) else {
        return false;
    };

    let e1 = vector_subtract(p1, p0);
    let e2 = vector_subtract(p2, p0);
    let p = cross_product(&ray.direction, &e2);
    let a = dot_product(&e1, &p);

    if a.abs() < EPS {
        // parallel to the plane
        return false;
    }

    let f = 1.0 / a;
    let s = vector_subtract(&ray.origin, p0);
    let u = f * dot_product(&s, &p);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }

    let q = cross_product(&s, &e1);
    let v = f * dot_product(&ray.direction, &q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }

    let t = f * dot_product(&e2, &q);
    if t > 0.0 && t < *distance {
        *distance = t;
        return true;
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct GroupModel {
    bound: AaBox,
    mogp_flags: u32,
    group_wmo_id: u32,
    vertices: Vec<Vec3>,
    triangles: Vec<MeshTriangle>,
    mesh_tree: Bih,
    liquid: Option<WmoLiquid>,
}

impl GroupModel {
    /// Build a group from raw geometry; the mesh tree is computed here.
    pub fn from_mesh(
        mogp_flags: u32,
        group_wmo_id: u32,
        vertices: Vec<Vec3>,
        triangles: Vec<MeshTriangle>,
        liquid: Option<WmoLiquid>,
    ) -> Result<Self, VmapError> {
        validate_triangles(&triangles, vertices.len())?;

        let mut bound = AaBox::empty();
        for v in &vertices {
            bound.merge_point(v);
        }
        if vertices.is_empty() {
            bound = AaBox::zero();
        }

        let prim_bounds: Vec<AaBox> = triangles
            .iter()
            .map(|t| {
                let mut b = AaBox::from_point(vertices[t.idx0 as usize]);
                b.merge_point(&vertices[t.idx1 as usize]);
                b.merge_point(&vertices[t.idx2 as usize]);
                b
            })
            .collect();
        let mesh_tree = Bih::build(&prim_bounds, MESH_LEAF_SIZE);

        Ok(Self {
            bound,
            mogp_flags,
            group_wmo_id,
            vertices,
            triangles,
            mesh_tree,
            liquid,
        })
    }

    /// Group record of a `.vmo` file. Groups without vertices end after the
    /// vertex count.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let bound = read_aabox(reader)?;
        let mogp_flags = reader.read_u32::<LittleEndian>()?;
        let group_wmo_id = reader.read_u32::<LittleEndian>()?;

        read_chunk(reader, CHUNK_VERT)?;
        let _chunk_size = reader.read_u32::<LittleEndian>()?;
        let vert_count = reader.read_u32::<LittleEndian>()? as usize;
        if vert_count == 0 {
            return Ok(Self {
                bound,
                mogp_flags,
                group_wmo_id,
                ..Self::default()
            });
        }
        let vertices = read_vec3_array(reader, vert_count)?;

        read_chunk(reader, CHUNK_TRIM)?;
        let _chunk_size = reader.read_u32::<LittleEndian>()?;
        let tri_count = reader.read_u32::<LittleEndian>()? as usize;
        let index_count = tri_count
            .checked_mul(3)
            .ok_or(VmapError::CountOutOfRange { what: "triangle", count: tri_count as u64 })?;
        let raw = read_u32_array(reader, index_count)?;
        let triangles: Vec<MeshTriangle> = raw
            .chunks_exact(3)
            .map(|c| MeshTriangle::new(c[0], c[1], c[2]))
            .collect();
        validate_triangles(&triangles, vertices.len())?;

        read_chunk(reader, CHUNK_MBIH)?;
        let mesh_tree = Bih::read_from(reader)?;

        read_chunk(reader, CHUNK_LIQU)?;
        let liquid_size = reader.read_u32::<LittleEndian>()?;
        let liquid = if liquid_size > 0 {
            Some(WmoLiquid::read_from(reader)?)
        } else {
            None
        };

        Ok(Self {
            bound,
            mogp_flags,
            group_wmo_id,
            vertices,
            triangles,
            mesh_tree,
            liquid,
        })
    }

    pub fn bound(&self) -> &AaBox {
        &self.bound
    }

    pub fn mogp_flags(&self) -> u32 {
        self.mogp_flags
    }

    pub fn wmo_id(&self) -> u32 {
        self.group_wmo_id
    }

    pub fn liquid(&self) -> Option<&WmoLiquid> {
        self.liquid.as_ref()
    }

    /// Liquid type of the attached grid, 0 without one.
    pub fn liquid_type(&self) -> u32 {
        self.liquid.as_ref().map_or(0, WmoLiquid::liquid_type)
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[MeshTriangle] {
        &self.triangles
    }

    pub(crate) fn mesh_tree(&self) -> &Bih {
        &self.mesh_tree
    }

    pub fn intersect_ray(&self, ray: &Ray, distance: &mut f32, stop_at_first: bool) -> bool {
        if self.triangles.is_empty() {
            return false;
        }

        let mut hit = false;
        self.mesh_tree.intersect_ray(ray, distance, stop_at_first, |r, entry, dist, _| {
            if let Some(tri) = self.triangles.get(entry as usize) {
                if intersect_triangle(tri, &self.vertices, r, dist) {
                    hit = true;
                }
            }
            hit
        });
        hit
    }

    /// Distance along `down` from `pos` to the mesh surface, when `pos` lies
    /// in this group's bound and the mesh is below it.
    pub fn is_inside_object(&self, pos: &Vec3, down: &Vec3) -> Option<f32> {
        if self.triangles.is_empty() || !self.bound.contains(pos) {
            return None;
        }

        let start = vector_ma(pos, -INSIDE_PROBE_OFFSET, down);
        let ray = Ray::new(start, *down);
        let mut dist = f32::INFINITY;
        if self.intersect_ray(&ray, &mut dist, false) {
            Some(dist - INSIDE_PROBE_OFFSET)
        } else {
            None
        }
    }

    pub fn get_liquid_level(&self, pos: &Vec3) -> Option<f32> {
        self.liquid.as_ref()?.get_liquid_height(pos)
    }
}

fn validate_triangles(triangles: &[MeshTriangle], vertices: usize) -> Result<(), VmapError> {
    for tri in triangles {
        for index in [tri.idx0, tri.idx1, tri.idx2] {
            if index as usize >= vertices {
                return Err(VmapError::TriangleIndexOutOfRange { index, vertices });
            }
        }
    }
    Ok(())
}
