// vfiles.rs — vmap file format structures and readers
//
// All resource files are little endian and open with the 8-byte VMAP_MAGIC.
//
//   MMM.vmtree          magic, u8 tiled, "NODE" tree, "GOBJ" [global spawn, u32 node]
//   MMM_XX_YY.vmtile    magic, u32 count, count * (spawn, u32 node)
//   <name>.vmo          magic, "WMOD" u32 size u32 root, "GMOD" u32 count groups, "GBIH" tree
//   temp_gameobject_models   (u32 display id, u32 len, name, vec3 low, vec3 high)*

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::VmapError;
use crate::v_shared::{AaBox, ModelFlags, Vec3};

// ============================================================
// Magic and chunk tags
// ============================================================

pub const VMAP_MAGIC: &[u8; 8] = b"VMAP_7.0";
pub const VMAP_MAGIC_STR: &str = "VMAP_7.0";

pub const CHUNK_NODE: &[u8; 4] = b"NODE";
pub const CHUNK_GOBJ: &[u8; 4] = b"GOBJ";
pub const CHUNK_WMOD: &[u8; 4] = b"WMOD";
pub const CHUNK_GMOD: &[u8; 4] = b"GMOD";
pub const CHUNK_GBIH: &[u8; 4] = b"GBIH";
pub const CHUNK_VERT: &[u8; 4] = b"VERT";
pub const CHUNK_TRIM: &[u8; 4] = b"TRIM";
pub const CHUNK_MBIH: &[u8; 4] = b"MBIH";
pub const CHUNK_LIQU: &[u8; 4] = b"LIQU";

pub const GAMEOBJECT_MODELS: &str = "temp_gameobject_models";

/// Longest name a spawn or model list record may carry.
pub const MAX_SPAWN_NAME_LEN: u32 = 500;

// ============================================================
// File names
// ============================================================

pub fn map_file_name(map_id: u32) -> String {
    format!("{:03}.vmtree", map_id)
}

pub fn tile_file_name(map_id: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{:03}_{:02}_{:02}.vmtile", map_id, tile_x, tile_y)
}

pub fn model_file_path(base_path: &Path, name: &str) -> PathBuf {
    base_path.join(format!("{}.vmo", name))
}

#[inline]
pub fn pack_tile_id(tile_x: u32, tile_y: u32) -> u32 {
    (tile_x << 16) | (tile_y & 0xFFFF)
}


// ============================================================
// Primitive readers
// ============================================================

pub fn read_magic<R: Read>(reader: &mut R) -> Result<(), VmapError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != VMAP_MAGIC {
        return Err(VmapError::BadMagic { expected: VMAP_MAGIC_STR });
    }
    Ok(())
}

pub fn read_chunk<R: Read>(reader: &mut R, expected: &[u8; 4]) -> Result<(), VmapError> {
    let mut chunk = [0u8; 4];
    reader.read_exact(&mut chunk)?;
    if &chunk != expected {
        return Err(VmapError::chunk_mismatch(expected, &chunk));
    }
    Ok(())
}

pub fn read_vec3<R: Read>(reader: &mut R) -> io::Result<Vec3> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    Ok([x, y, z])
}

/// Two vec3 (low, high). Not validated: stored bounds may be degenerate.
pub fn read_aabox<R: Read>(reader: &mut R) -> io::Result<AaBox> {
    let low = read_vec3(reader)?;
    let high = read_vec3(reader)?;
    Ok(AaBox { low, high })
}

/// u32 length followed by that many bytes of name.
pub fn read_name<R: Read>(reader: &mut R) -> Result<String, VmapError> {
    let name_len = reader.read_u32::<LittleEndian>()?;
    if name_len > MAX_SPAWN_NAME_LEN {
        return Err(VmapError::NameTooLong(name_len));
    }
    let mut buf = vec![0u8; name_len as usize];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ============================================================
// Counted arrays
// ============================================================

/// Elements reserved up front for an array whose length comes from the
/// file. Longer arrays grow as they are read, so a corrupt count ends in a
/// short read rather than a huge allocation.
const MAX_RESERVE: usize = 4096;

pub fn read_u32_array<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count.min(MAX_RESERVE));
    for _ in 0..count {
        out.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(out)
}

pub fn read_f32_array<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count.min(MAX_RESERVE));
    for _ in 0..count {
        out.push(reader.read_f32::<LittleEndian>()?);
    }
    Ok(out)
}

pub fn read_vec3_array<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<Vec3>> {
    let mut out = Vec::with_capacity(count.min(MAX_RESERVE));
    for _ in 0..count {
        out.push(read_vec3(reader)?);
    }
    Ok(out)
}

pub fn read_byte_array<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(count.min(MAX_RESERVE));
    reader.by_ref().take(count as u64).read_to_end(&mut out)?;
    if out.len() != count {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "byte array cut short"));
    }
    Ok(out)
}

/// Read a u32, mapping a clean end of file to `None`.
pub fn read_u32_or_eof<R: Read>(reader: &mut R) -> io::Result<Option<u32>> {
    match reader.read_u32::<LittleEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

// ============================================================
// Model spawn record
// ============================================================

/// One placement record as stored in tree and tile files.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpawn {
    pub flags: ModelFlags,
    pub adt_id: u16,
    pub id: u32,
    pub pos: Vec3,
    /// Euler angles in degrees.
    pub rot: Vec3,
    pub scale: f32,
    /// World-space bound, present when `flags` has HAS_BOUND.
    pub bound: Option<AaBox>,
    pub name: String,
}

impl ModelSpawn {
    /// Reads one record. `Ok(None)` on a clean end of file before the record.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, VmapError> {
        let Some(raw_flags) = read_u32_or_eof(reader)? else {
            return Ok(None);
        };
        let flags = ModelFlags::from_bits_retain(raw_flags);

        let adt_id = reader.read_u16::<LittleEndian>()?;
        let id = reader.read_u32::<LittleEndian>()?;
        let pos = read_vec3(reader)?;
        let rot = read_vec3(reader)?;
        let scale = reader.read_f32::<LittleEndian>()?;

        let bound = if flags.contains(ModelFlags::HAS_BOUND) {
            Some(read_aabox(reader)?)
        } else {
            None
        };

        let name = read_name(reader)?;

        Ok(Some(Self {
            flags,
            adt_id,
            id,
            pos,
            rot,
            scale,
            bound,
            name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    fn spawn_bytes(flags: u32, with_bound: bool, name: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(flags).unwrap();
        buf.write_u16::<LittleEndian>(7).unwrap();
        buf.write_u32::<LittleEndian>(42).unwrap();
        for v in [1.0f32, 2.0, 3.0, 0.0, 90.0, 0.0, 1.5] {
            buf.write_f32::<LittleEndian>(v).unwrap();
        }
        if with_bound {
            for v in [0.0f32, 0.0, 0.0, 4.0, 4.0, 4.0] {
                buf.write_f32::<LittleEndian>(v).unwrap();
            }
        }
        buf.write_u32::<LittleEndian>(name.len() as u32).unwrap();
        buf.write_all(name.as_bytes()).unwrap();
        buf
    }

    #[test]
    fn test_file_names() {
        assert_eq!(map_file_name(1), "001.vmtree");
        assert_eq!(tile_file_name(530, 3, 14), "530_03_14.vmtile");
        assert_eq!(
            model_file_path(Path::new("vmaps"), "wall.mesh"),
            Path::new("vmaps").join("wall.mesh.vmo")
        );
    }

    #[test]
    fn test_tile_id_packing() {
        assert_eq!(pack_tile_id(31, 47), (31 << 16) | 47);
        assert_ne!(pack_tile_id(3, 4), pack_tile_id(4, 3));
    }

    #[test]
    fn test_read_magic() {
        assert!(read_magic(&mut Cursor::new(b"VMAP_7.0rest".to_vec())).is_ok());
        let err = read_magic(&mut Cursor::new(b"VMAP_6.0".to_vec())).unwrap_err();
        assert!(matches!(err, VmapError::BadMagic { .. }));
    }

    #[test]
    fn test_read_chunk_mismatch() {
        let err = read_chunk(&mut Cursor::new(b"TRIM".to_vec()), CHUNK_VERT).unwrap_err();
        assert!(matches!(err, VmapError::ChunkMismatch { .. }));
    }

    #[test]
    fn test_spawn_without_bound() {
        let data = spawn_bytes(ModelFlags::M2.bits(), false, "tree.m2");
        let spawn = ModelSpawn::read_from(&mut Cursor::new(data)).unwrap().unwrap();
        assert_eq!(spawn.flags, ModelFlags::M2);
        assert_eq!(spawn.adt_id, 7);
        assert_eq!(spawn.id, 42);
        assert_eq!(spawn.pos, [1.0, 2.0, 3.0]);
        assert_eq!(spawn.rot, [0.0, 90.0, 0.0]);
        assert_eq!(spawn.scale, 1.5);
        assert!(spawn.bound.is_none());
        assert_eq!(spawn.name, "tree.m2");
    }

    #[test]
    fn test_spawn_with_bound() {
        let flags = (ModelFlags::WORLDSPAWN | ModelFlags::HAS_BOUND).bits();
        let data = spawn_bytes(flags, true, "keep.wmo");
        let spawn = ModelSpawn::read_from(&mut Cursor::new(data)).unwrap().unwrap();
        assert_eq!(spawn.bound, Some(AaBox::new([0.0; 3], [4.0; 3])));
    }

    #[test]
    fn test_counted_arrays() {
        let mut data = Vec::new();
        for v in [1u32, 2, 3] {
            data.write_u32::<LittleEndian>(v).unwrap();
        }
        assert_eq!(read_u32_array(&mut Cursor::new(data.clone()), 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(read_byte_array(&mut Cursor::new(data.clone()), 5).unwrap().len(), 5);

        // a count far past the data fails on the read, not the allocation
        let err = read_u32_array(&mut Cursor::new(data.clone()), u32::MAX as usize).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let err = read_vec3_array(&mut Cursor::new(data.clone()), u32::MAX as usize).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let err = read_byte_array(&mut Cursor::new(data), u32::MAX as usize).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_spawn_clean_eof() {
        assert!(ModelSpawn::read_from(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_spawn_truncated_is_error() {
        let mut data = spawn_bytes(0, false, "wall");
        data.truncate(10);
        assert!(ModelSpawn::read_from(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_spawn_name_too_long() {
        let mut data = spawn_bytes(0, false, "");
        let len_at = data.len() - 4;
        data[len_at..].copy_from_slice(&600u32.to_le_bytes());
        let err = ModelSpawn::read_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, VmapError::NameTooLong(600)));
    }
}
