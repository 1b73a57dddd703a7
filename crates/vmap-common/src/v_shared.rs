// v_shared.rs — math library and flag types shared by every vmap crate
//
// Vectors are plain `[f32; 3]` arrays driven by free functions, matrices are
// row-major `[[f32; 3]; 3]`.

pub type Vec3 = [f32; 3];
pub type Mat3 = [[f32; 3]; 3];

// ============================================================
// World constants
// ============================================================

/// Edge length of one map grid (terrain tile).
pub const SIZE_OF_GRIDS: f32 = 533.333_33;
pub const MAX_NUMBER_OF_GRIDS: u32 = 64;

/// Midpoint of a map in both X and Y. The internal representation mirrors
/// world X/Y around this value.
pub const MAP_MID: f32 = 0.5 * MAX_NUMBER_OF_GRIDS as f32 * SIZE_OF_GRIDS;

/// Edge length of one liquid grid tile.
pub const LIQUID_TILE_SIZE: f32 = 533.333 / 128.0;

/// Returned by the manager for "no height found" and disabled height queries.
pub const VMAP_INVALID_HEIGHT: f32 = -100_000.0;
pub const VMAP_INVALID_HEIGHT_VALUE: f32 = -200_000.0;

// ============================================================
// Flags
// ============================================================

bitflags::bitflags! {
    /// Per-spawn model flags as stored in the spawn records.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModelFlags: u32 {
        /// Decorative doodad: never carries area data, optionally ignored for LOS.
        const M2           = 0x0000_0001;
        const WORLDSPAWN   = 0x0000_0002;
        const HAS_BOUND    = 0x0000_0004;
        const PARENT_SPAWN = 0x0000_0008;
    }
}

bitflags::bitflags! {
    /// Model kinds a ray query should skip.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModelIgnoreFlags: u32 {
        const M2 = 0x0000_0001;
    }
}

bitflags::bitflags! {
    /// Per-map feature disable categories.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DisableFlags: u32 {
        const AREAFLAG     = 0x01;
        const HEIGHT       = 0x02;
        const LOS          = 0x04;
        const LIQUIDSTATUS = 0x08;
    }
}

// ============================================================
// Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[inline]
pub fn vector_min(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

#[inline]
pub fn vector_max(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

pub fn vector_is_nan(v: &Vec3) -> bool {
    v[0].is_nan() || v[1].is_nan() || v[2].is_nan()
}

// ============================================================
// Matrix operations
// ============================================================

pub const MAT3_IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Rotation `Rz(z) * Ry(y) * Rx(x)`, angles in radians.
pub fn matrix_from_euler_zyx(z: f32, y: f32, x: f32) -> Mat3 {
    let (sz, cz) = z.sin_cos();
    let (sy, cy) = y.sin_cos();
    let (sx, cx) = x.sin_cos();

    [
        [cy * cz, cz * sx * sy - cx * sz, cx * cz * sy + sx * sz],
        [cy * sz, cx * cz + sx * sy * sz, -cz * sx + cx * sy * sz],
        [-sy, cy * sx, cx * cy],
    ]
}

/// Rotation matrix for a spawn's stored Euler angles (degrees). Stored `y`
/// drives the Z rotation, `x` the Y rotation and `z` the X rotation.
pub fn matrix_from_spawn_rotation(rot: &Vec3) -> Mat3 {
    matrix_from_euler_zyx(rot[1].to_radians(), rot[0].to_radians(), rot[2].to_radians())
}

/// Rotation about the vertical axis only.
pub fn matrix_from_yaw(yaw: f32) -> Mat3 {
    matrix_from_euler_zyx(yaw, 0.0, 0.0)
}

pub fn matrix_transpose(m: &Mat3) -> Mat3 {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// `m * v`
#[inline]
pub fn mat3_mul_vec3(m: &Mat3, v: &Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// `v * m`, i.e. `transpose(m) * v`.
#[inline]
pub fn vec3_mul_mat3(v: &Vec3, m: &Mat3) -> Vec3 {
    [
        v[0] * m[0][0] + v[1] * m[1][0] + v[2] * m[2][0],
        v[0] * m[0][1] + v[1] * m[1][1] + v[2] * m[2][1],
        v[0] * m[0][2] + v[1] * m[1][2] + v[2] * m[2][2],
    ]
}

// ============================================================
// Ray
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t` along the ray.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        vector_ma(&self.origin, t, &self.direction)
    }
}

// ============================================================
// Axis-aligned bounding box
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AaBox {
    pub low: Vec3,
    pub high: Vec3,
}

impl AaBox {
    pub fn new(low: Vec3, high: Vec3) -> Self {
        debug_assert!(low[0] <= high[0] && low[1] <= high[1] && low[2] <= high[2]);
        Self { low, high }
    }

    pub fn from_point(p: Vec3) -> Self {
        Self { low: p, high: p }
    }

    /// Inverted box that any merge will overwrite.
    pub fn empty() -> Self {
        Self {
            low: [f32::INFINITY; 3],
            high: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    pub fn is_empty(&self) -> bool {
        self.low[0] > self.high[0] || self.low[1] > self.high[1] || self.low[2] > self.high[2]
    }

    pub fn merge_point(&mut self, p: &Vec3) {
        self.low = vector_min(&self.low, p);
        self.high = vector_max(&self.high, p);
    }

    pub fn merge(&mut self, other: &AaBox) {
        self.low = vector_min(&self.low, &other.low);
        self.high = vector_max(&self.high, &other.high);
    }

    /// Translated copy.
    pub fn offset(&self, v: &Vec3) -> AaBox {
        AaBox {
            low: vector_add(&self.low, v),
            high: vector_add(&self.high, v),
        }
    }

    /// Corner `i` in 0..8; bit 0 selects X, bit 1 Y, bit 2 Z.
    pub fn corner(&self, i: usize) -> Vec3 {
        [
            if i & 1 != 0 { self.high[0] } else { self.low[0] },
            if i & 2 != 0 { self.high[1] } else { self.low[1] },
            if i & 4 != 0 { self.high[2] } else { self.low[2] },
        ]
    }

    /// Inclusive containment.
    pub fn contains(&self, p: &Vec3) -> bool {
        p[0] >= self.low[0]
            && p[1] >= self.low[1]
            && p[2] >= self.low[2]
            && p[0] <= self.high[0]
            && p[1] <= self.high[1]
            && p[2] <= self.high[2]
    }

    /// Scaled, rotated and translated bound of this box: every corner is
    /// transformed and merged.
    pub fn transformed(&self, rotation: &Mat3, scale: f32, position: &Vec3) -> AaBox {
        let scaled = AaBox {
            low: vector_scale(&self.low, scale),
            high: vector_scale(&self.high, scale),
        };
        let mut out = AaBox::empty();
        for i in 0..8 {
            out.merge_point(&mat3_mul_vec3(rotation, &scaled.corner(i)));
        }
        out.offset(position)
    }

    /// Distance along `ray` to the first point inside the box. A ray starting
    /// inside returns 0; a miss returns `None`. Unlimited length.
    pub fn intersection_time(&self, ray: &Ray) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;

        for i in 0..3 {
            let o = ray.origin[i];
            let d = ray.direction[i];
            if d == 0.0 {
                if o < self.low[i] || o > self.high[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (self.low[i] - o) * inv;
            let mut t2 = (self.high[i] - o) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

// ============================================================
// Tests
// ============================================================
