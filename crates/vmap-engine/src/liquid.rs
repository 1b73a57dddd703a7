// liquid.rs — Liquid height grid attached to a group model

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use vmap_common::common::VmapError;
use vmap_common::v_shared::{Vec3, LIQUID_TILE_SIZE};
use vmap_common::vfiles::{read_byte_array, read_f32_array, read_vec3};

/// Tiles with all four low flag bits set carry no liquid.
const LIQUID_TILE_DISABLED: u8 = 0x0F;

#[derive(Debug, Clone, PartialEq)]
pub struct WmoLiquid {
    tiles_x: u32,
    tiles_y: u32,
    corner: Vec3,
    liquid_type: u32,
    /// `(tiles_x + 1) * (tiles_y + 1)` samples, or one constant height.
    heights: Vec<f32>,
    /// `tiles_x * tiles_y` bytes; empty for the constant form.
    flags: Vec<u8>,
}

impl WmoLiquid {
    pub fn new(tiles_x: u32, tiles_y: u32, corner: Vec3, liquid_type: u32, heights: Vec<f32>, flags: Vec<u8>) -> Self {
        debug_assert_eq!(heights.len(), ((tiles_x + 1) * (tiles_y + 1)) as usize);
        debug_assert_eq!(flags.len(), (tiles_x * tiles_y) as usize);
        Self { tiles_x, tiles_y, corner, liquid_type, heights, flags }
    }

    /// Liquid with one height everywhere.
    pub fn flat(liquid_type: u32, height: f32) -> Self {
        Self {
            tiles_x: 0,
            tiles_y: 0,
            corner: [0.0; 3],
            liquid_type,
            heights: vec![height],
            flags: Vec::new(),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let tiles_x = reader.read_u32::<LittleEndian>()?;
        let tiles_y = reader.read_u32::<LittleEndian>()?;
        let corner = read_vec3(reader)?;
        let liquid_type = reader.read_u32::<LittleEndian>()?;

        if tiles_x == 0 || tiles_y == 0 {
            let height = reader.read_f32::<LittleEndian>()?;
            return Ok(Self {
                tiles_x: 0,
                tiles_y: 0,
                corner,
                liquid_type,
                heights: vec![height],
                flags: Vec::new(),
            });
        }

        let height_count = (tiles_x as usize + 1)
            .checked_mul(tiles_y as usize + 1)
            .ok_or(VmapError::CountOutOfRange { what: "liquid height", count: u64::from(tiles_x) * u64::from(tiles_y) })?;
        let heights = read_f32_array(reader, height_count)?;

        let flag_count = (tiles_x as usize)
            .checked_mul(tiles_y as usize)
            .ok_or(VmapError::CountOutOfRange { what: "liquid flag", count: u64::from(tiles_x) * u64::from(tiles_y) })?;
        let flags = read_byte_array(reader, flag_count)?;

        Ok(Self { tiles_x, tiles_y, corner, liquid_type, heights, flags })
    }

    pub fn liquid_type(&self) -> u32 {
        self.liquid_type
    }

    pub fn tiles(&self) -> (u32, u32) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn corner(&self) -> &Vec3 {
        &self.corner
    }

    pub(crate) fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub(crate) fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// Surface height above `pos` (model space), or `None` outside the grid
    /// or over a disabled tile.
    pub fn get_liquid_height(&self, pos: &Vec3) -> Option<f32> {
        if self.flags.is_empty() {
            return self.heights.first().copied();
        }

        let tx_f = (pos[0] - self.corner[0]) / LIQUID_TILE_SIZE;
        if !(tx_f >= 0.0) {
            return None;
        }
        let tx = tx_f as u32;
        if tx >= self.tiles_x {
            return None;
        }

        let ty_f = (pos[1] - self.corner[1]) / LIQUID_TILE_SIZE;
        if !(ty_f >= 0.0) {
            return None;
        }
        let ty = ty_f as u32;
        if ty >= self.tiles_y {
            return None;
        }

        let tile_flags = *self.flags.get((tx + ty * self.tiles_x) as usize)?;
        if tile_flags & LIQUID_TILE_DISABLED == LIQUID_TILE_DISABLED {
            return None;
        }

        // position inside the tile, in [0, 1)^2
        let dx = tx_f - tx as f32;
        let dy = ty_f - ty as f32;

        // Two triangles per tile, split along the (0,0)-(1,1) diagonal:
        //
        //   1 x---------x (1,1)
        //     | (b)   / |
        //     |     /   |
        //     |   /  (a)|
        //   0 x---------x
        //     0         1
        let row = (self.tiles_x + 1) as usize;
        let (tx, ty) = (tx as usize, ty as usize);
        let h = |x: usize, y: usize| self.heights.get(x + y * row).copied();

        let base = h(tx, ty)?;
        let (sx, sy) = if dx > dy {
            (h(tx + 1, ty)? - base, h(tx + 1, ty + 1)? - h(tx + 1, ty)?)
        } else {
            (h(tx + 1, ty + 1)? - h(tx, ty + 1)?, h(tx, ty + 1)? - base)
        };

        Some(base + dx * sx + dy * sy)
    }
}
