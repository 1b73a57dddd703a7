// world_model.rs — A loaded model file: groups plus a tree over them

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use vmap_common::common::VmapError;
use vmap_common::v_shared::{AaBox, ModelFlags, ModelIgnoreFlags, Ray, Vec3};
use vmap_common::vfiles::{read_chunk, read_magic, CHUNK_GBIH, CHUNK_GMOD, CHUNK_WMOD};

use crate::bih::Bih;
use crate::group_model::GroupModel;

/// Groups in one group BIH leaf.
const GROUP_LEAF_SIZE: usize = 1;

/// Result of an area probe, in world space once a placement has lifted it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaInfo {
    pub ground_z: f32,
    pub flags: u32,
    pub adt_id: u32,
    pub root_id: u32,
    pub group_id: u32,
}

/// Group hit by a downward probe, in model space.
#[derive(Debug, Clone, Copy)]
pub struct GroupLocationInfo<'a> {
    pub root_id: u32,
    pub hit_model: &'a GroupModel,
    /// Distance along the probe direction to the surface.
    pub z_dist: f32,
}

#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    root_wmo_id: u32,
    groups: Vec<GroupModel>,
    group_tree: Bih,
    flags: ModelFlags,
}

impl WorldModel {
    pub fn from_groups(root_wmo_id: u32, groups: Vec<GroupModel>, flags: ModelFlags) -> Self {
        let bounds: Vec<AaBox> = groups.iter().map(|g| *g.bound()).collect();
        let group_tree = Bih::build(&bounds, GROUP_LEAF_SIZE);
        Self {
            root_wmo_id,
            groups,
            group_tree,
            flags,
        }
    }

    pub fn read_file(path: &Path, flags: ModelFlags) -> Result<Self, VmapError> {
        let file = File::open(path)?;
        Self::read_from(&mut BufReader::new(file), flags)
    }

    /// `magic, "WMOD", u32 size, u32 root id, ["GMOD", u32 count, groups, "GBIH", tree]`
    pub fn read_from<R: Read>(reader: &mut R, flags: ModelFlags) -> Result<Self, VmapError> {
        read_magic(reader)?;
        read_chunk(reader, CHUNK_WMOD)?;
        let _chunk_size = reader.read_u32::<LittleEndian>()?;
        let root_wmo_id = reader.read_u32::<LittleEndian>()?;

        let mut model = Self {
            root_wmo_id,
            flags,
            ..Self::default()
        };

        // a model without group data ends after the root id
        let mut tag = [0u8; 4];
        match reader.read_exact(&mut tag) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(model),
            Err(e) => return Err(e.into()),
        }
        if &tag != CHUNK_GMOD {
            return Err(VmapError::chunk_mismatch(CHUNK_GMOD, &tag));
        }

        let count = reader.read_u32::<LittleEndian>()? as usize;
        model.groups.reserve(count);
        for _ in 0..count {
            model.groups.push(GroupModel::read_from(reader)?);
        }

        read_chunk(reader, CHUNK_GBIH)?;
        model.group_tree = Bih::read_from(reader)?;

        Ok(model)
    }

    pub fn root_wmo_id(&self) -> u32 {
        self.root_wmo_id
    }

    pub fn flags(&self) -> ModelFlags {
        self.flags
    }

    pub fn groups(&self) -> &[GroupModel] {
        &self.groups
    }

    pub(crate) fn group_tree(&self) -> &Bih {
        &self.group_tree
    }

    /// Union of the group bounds, or `None` for a model without groups.
    pub fn bound(&self) -> Option<AaBox> {
        let mut groups = self.groups.iter();
        let mut bound = *groups.next()?.bound();
        for g in groups {
            bound.merge(g.bound());
        }
        Some(bound)
    }

    pub fn intersect_ray(&self, ray: &Ray, distance: &mut f32, stop_at_first: bool, ignore_flags: ModelIgnoreFlags) -> bool {
        if ignore_flags.contains(ModelIgnoreFlags::M2) && self.flags.contains(ModelFlags::M2) {
            return false;
        }

        // no tree needed for a single group
        if let [group] = self.groups.as_slice() {
            return group.intersect_ray(ray, distance, stop_at_first);
        }

        let mut hit = false;
        self.group_tree.intersect_ray(ray, distance, stop_at_first, |r, entry, dist, stop| {
            if let Some(group) = self.groups.get(entry as usize) {
                if group.intersect_ray(r, dist, stop) {
                    hit = true;
                }
            }
            hit
        });
        hit
    }

    /// Highest surface below `p` along `down` among the groups whose bound
    /// contains `p`.
    pub fn get_location_info(&self, p: &Vec3, down: &Vec3) -> Option<GroupLocationInfo<'_>> {
        if self.groups.is_empty() {
            return None;
        }

        let mut best: Option<(f32, &GroupModel)> = None;
        self.group_tree.intersect_point(p, |point, entry| {
            let Some(group) = self.groups.get(entry as usize) else {
                return;
            };
            if let Some(z_dist) = group.is_inside_object(point, down) {
                if best.map_or(true, |(d, _)| z_dist < d) {
                    best = Some((z_dist, group));
                }
            }
        });

        best.map(|(z_dist, hit_model)| GroupLocationInfo {
            root_id: self.root_wmo_id,
            hit_model,
            z_dist,
        })
    }

    /// Area probe in model space. `ground_z` holds the downward distance;
    /// `adt_id` is left for the placement to fill.
    pub fn intersect_point(&self, p: &Vec3, down: &Vec3) -> Option<AreaInfo> {
        let hit = self.get_location_info(p, down)?;
        Some(AreaInfo {
            ground_z: hit.z_dist,
            flags: hit.hit_model.mogp_flags(),
            adt_id: 0,
            root_id: hit.root_id,
            group_id: hit.hit_model.wmo_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{box_group, hall_model, quad_group, vmo_bytes};
    use std::io::Cursor;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    const DOWN: Vec3 = [0.0, 0.0, -1.0];

    #[test]
    fn test_single_group_ray() {
        let m = WorldModel::from_groups(1, vec![quad_group(100.0, 10.0)], ModelFlags::empty());
        let ray = Ray::new([5.0, 5.0, 200.0], DOWN);
        let mut dist = 500.0;
        assert!(m.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
        assert!(approx(dist, 100.0));
    }

    #[test]
    fn test_multi_group_nearest() {
        let m = WorldModel::from_groups(
            1,
            vec![
                box_group([0.0, 0.0, 0.0], [10.0, 10.0, 10.0], 0, 1),
                box_group([0.0, 0.0, 50.0], [10.0, 10.0, 60.0], 0, 2),
                box_group([100.0, 0.0, 0.0], [110.0, 10.0, 10.0], 0, 3),
            ],
            ModelFlags::empty(),
        );
        let ray = Ray::new([5.0, 5.0, 100.0], DOWN);
        let mut dist = f32::INFINITY;
        assert!(m.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
        assert!(approx(dist, 40.0));

        let mut dist = f32::INFINITY;
        let away = Ray::new([50.0, 5.0, 100.0], DOWN);
        assert!(!m.intersect_ray(&away, &mut dist, false, ModelIgnoreFlags::empty()));
    }

    #[test]
    fn test_m2_ignored_on_request() {
        let m = WorldModel::from_groups(1, vec![quad_group(100.0, 10.0)], ModelFlags::M2);
        let ray = Ray::new([5.0, 5.0, 200.0], DOWN);
        let mut dist = 500.0;
        assert!(!m.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::M2));
        assert!(m.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
    }

    #[test]
    fn test_location_prefers_highest_surface() {
        let m = hall_model();
        // inside the upper room: its floor at z = 20 wins over the ground floor
        let info = m.get_location_info(&[5.0, 5.0, 25.0], &DOWN).unwrap();
        assert_eq!(info.hit_model.wmo_id(), 2);
        assert!(approx(info.z_dist, 5.0));

        let info = m.get_location_info(&[5.0, 5.0, 5.0], &DOWN).unwrap();
        assert_eq!(info.hit_model.wmo_id(), 1);
        assert!(approx(info.z_dist, 5.0));
        assert_eq!(info.root_id, 77);

        assert!(m.get_location_info(&[50.0, 5.0, 5.0], &DOWN).is_none());
    }

    #[test]
    fn test_intersect_point_area_fields() {
        let m = hall_model();
        let area = m.intersect_point(&[5.0, 5.0, 25.0], &DOWN).unwrap();
        assert_eq!(area.root_id, 77);
        assert_eq!(area.group_id, 2);
        assert_eq!(area.flags, 0x2008);
    }

    #[test]
    fn test_bound() {
        assert!(WorldModel::default().bound().is_none());
        let b = hall_model().bound().unwrap();
        assert_eq!(b.low, [0.0, 0.0, 0.0]);
        assert_eq!(b.high, [10.0, 10.0, 30.0]);
    }

    #[test]
    fn test_read_model_bytes() {
        let src = hall_model();
        let read = WorldModel::read_from(&mut Cursor::new(vmo_bytes(&src)), ModelFlags::WORLDSPAWN).unwrap();
        assert_eq!(read.root_wmo_id(), 77);
        assert_eq!(read.groups().len(), 2);
        assert_eq!(read.flags(), ModelFlags::WORLDSPAWN);
        let info = read.get_location_info(&[5.0, 5.0, 25.0], &DOWN).unwrap();
        assert_eq!(info.hit_model.wmo_id(), 2);
    }

    #[test]
    fn test_read_model_without_groups() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"VMAP_7.0WMOD");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&9u32.to_le_bytes());
        let m = WorldModel::read_from(&mut Cursor::new(bytes), ModelFlags::empty()).unwrap();
        assert_eq!(m.root_wmo_id(), 9);
        assert!(m.groups().is_empty());
    }

    #[test]
    fn test_read_model_bad_magic() {
        let mut bytes = vmo_bytes(&hall_model());
        bytes[5] = b'6';
        let err = WorldModel::read_from(&mut Cursor::new(bytes), ModelFlags::empty()).unwrap_err();
        assert!(matches!(err, VmapError::BadMagic { .. }));
    }
}
