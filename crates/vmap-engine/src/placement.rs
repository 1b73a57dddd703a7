// placement.rs — World transform shared by static and dynamic model placements
//
// Model space is reached with `invRot * (p - pos) * invScale`; the way back
// is `(p_model * invRot) * scale + pos`, using that the inverse of a
// rotation is its transpose.

use vmap_common::v_shared::{
    mat3_mul_vec3, matrix_transpose, vec3_mul_mat3, vector_add, vector_ma, vector_scale,
    vector_subtract, AaBox, Mat3, ModelIgnoreFlags, Ray, Vec3,
};

use crate::group_model::GroupModel;
use crate::world_model::{AreaInfo, WorldModel};

const WORLD_DOWN: Vec3 = [0.0, 0.0, -1.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub pos: Vec3,
    pub inv_rot: Mat3,
    pub scale: f32,
    pub inv_scale: f32,
    /// World-space bound used to reject queries early.
    pub bound: AaBox,
}

/// Highest surface found so far by a location probe across placements.
#[derive(Debug, Clone, Copy)]
pub struct LocationInfo<'a> {
    pub root_id: u32,
    pub hit_placement: &'a Placement,
    pub hit_model: &'a GroupModel,
    pub ground_z: f32,
    pub adt_id: u32,
}

/// Liquid surface above a probed point, in world Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidLevel {
    pub level: f32,
    pub floor: f32,
    pub liquid_type: u32,
    pub mogp_flags: u32,
}

impl LocationInfo<'_> {
    /// Liquid of the hit group over `p`, if the group has any there.
    pub fn liquid_level(&self, p: &Vec3) -> Option<LiquidLevel> {
        let level = self.hit_placement.get_liquid_level(p, self.hit_model)?;
        Some(LiquidLevel {
            level,
            floor: self.ground_z,
            liquid_type: self.hit_model.liquid_type(),
            mogp_flags: self.hit_model.mogp_flags(),
        })
    }
}

impl Placement {
    /// `rotation` maps model space to world space.
    pub fn new(pos: Vec3, rotation: &Mat3, scale: f32, bound: AaBox) -> Self {
        debug_assert!(scale > 0.0);
        Self {
            pos,
            inv_rot: matrix_transpose(rotation),
            scale,
            inv_scale: 1.0 / scale,
            bound,
        }
    }

    /// Placement whose bound is `model_bound` scaled, rotated and moved into
    /// world space.
    pub fn from_model_bound(pos: Vec3, rotation: &Mat3, scale: f32, model_bound: &AaBox) -> Self {
        Self::new(pos, rotation, scale, model_bound.transformed(rotation, scale, &pos))
    }

    pub fn to_model_space(&self, p: &Vec3) -> Vec3 {
        vector_scale(&mat3_mul_vec3(&self.inv_rot, &vector_subtract(p, &self.pos)), self.inv_scale)
    }

    pub fn to_world_space(&self, p: &Vec3) -> Vec3 {
        vector_add(&vector_scale(&vec3_mul_mat3(p, &self.inv_rot), self.scale), &self.pos)
    }

    pub fn direction_to_model_space(&self, d: &Vec3) -> Vec3 {
        mat3_mul_vec3(&self.inv_rot, d)
    }

    /// World-space ray test against `model`. On a hit `max_dist` holds the
    /// world distance.
    pub fn intersect_ray(
        &self,
        model: &WorldModel,
        ray: &Ray,
        max_dist: &mut f32,
        stop_at_first: bool,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        if self.bound.intersection_time(ray).is_none() {
            return false;
        }

        let model_ray = Ray::new(self.to_model_space(&ray.origin), self.direction_to_model_space(&ray.direction));
        let mut distance = *max_dist * self.inv_scale;
        let hit = model.intersect_ray(&model_ray, &mut distance, stop_at_first, ignore_flags);
        if hit {
            *max_dist = distance * self.scale;
        }
        hit
    }

    /// World Z of the model surface reached by probing down from model-space
    /// point `p_model` over `z_dist`.
    fn ground_z(&self, p_model: &Vec3, down_model: &Vec3, z_dist: f32) -> f32 {
        let model_ground = vector_ma(p_model, z_dist, down_model);
        self.to_world_space(&model_ground)[2]
    }

    /// Area probe below world point `p`. Returns the area data with a world
    /// `ground_z` when it lies above `min_z`; `adt_id` is left to the caller.
    pub fn intersect_point(&self, model: &WorldModel, p: &Vec3, min_z: f32) -> Option<AreaInfo> {
        if !self.bound.contains(p) {
            return None;
        }

        let p_model = self.to_model_space(p);
        let down_model = self.direction_to_model_space(&WORLD_DOWN);
        let mut area = model.intersect_point(&p_model, &down_model)?;

        let world_z = self.ground_z(&p_model, &down_model, area.ground_z);
        if min_z < world_z {
            area.ground_z = world_z;
            Some(area)
        } else {
            None
        }
    }

    /// Location probe below world point `p`; replaces `info` when this
    /// placement's surface is higher.
    pub fn get_location_info<'a>(
        &'a self,
        model: &'a WorldModel,
        p: &Vec3,
        adt_id: u32,
        info: &mut Option<LocationInfo<'a>>,
    ) -> bool {
        if !self.bound.contains(p) {
            return false;
        }

        let p_model = self.to_model_space(p);
        let down_model = self.direction_to_model_space(&WORLD_DOWN);
        let Some(hit) = model.get_location_info(&p_model, &down_model) else {
            return false;
        };

        let world_z = self.ground_z(&p_model, &down_model, hit.z_dist);
        if info.as_ref().map_or(true, |i| i.ground_z < world_z) {
            *info = Some(LocationInfo {
                root_id: hit.root_id,
                hit_placement: self,
                hit_model: hit.hit_model,
                ground_z: world_z,
                adt_id,
            });
            return true;
        }
        false
    }

    /// Liquid surface height in world Z above `p`, assuming no tilt.
    pub fn get_liquid_level(&self, p: &Vec3, group: &GroupModel) -> Option<f32> {
        let p_model = self.to_model_space(p);
        let z_dist = group.get_liquid_level(&p_model)?;
        Some(z_dist * self.scale + self.pos[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{hall_model, quad_group};
    use rand::{Rng, SeedableRng};
    use vmap_common::v_shared::{matrix_from_spawn_rotation, matrix_from_yaw, ModelFlags};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-2
    }

    #[test]
    fn test_round_trip_random_transforms() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let rot = [rng.gen_range(-180.0..180.0), rng.gen_range(-180.0..180.0), rng.gen_range(-180.0..180.0)];
            let pos = [rng.gen_range(-1e3..1e3), rng.gen_range(-1e3..1e3), rng.gen_range(-500.0..500.0)];
            let scale = rng.gen_range(0.5..4.0);
            let pl = Placement::new(pos, &matrix_from_spawn_rotation(&rot), scale, AaBox::zero());

            let p = [rng.gen_range(-1e3..1e3), rng.gen_range(-1e3..1e3), rng.gen_range(-500.0..500.0)];
            let back = pl.to_world_space(&pl.to_model_space(&p));
            for i in 0..3 {
                assert!(approx(back[i], p[i]), "axis {}: {} vs {}", i, back[i], p[i]);
            }
        }
    }

    #[test]
    fn test_bound_from_model() {
        let model_bound = AaBox::new([0.0, 0.0, 0.0], [10.0, 2.0, 1.0]);
        let pl = Placement::from_model_bound(
            [100.0, 0.0, 0.0],
            &matrix_from_yaw(std::f32::consts::FRAC_PI_2),
            2.0,
            &model_bound,
        );
        assert!(approx(pl.bound.low[0], 96.0) && approx(pl.bound.high[0], 100.0));
        assert!(approx(pl.bound.low[1], 0.0) && approx(pl.bound.high[1], 20.0));
    }

    #[test]
    fn test_scaled_ray_distance() {
        let model = WorldModel::from_groups(1, vec![quad_group(10.0, 10.0)], ModelFlags::empty());
        let model_bound = model.bound().unwrap();
        // quad lands at world z = 5 + 10 * 3 = 35
        let pl = Placement::from_model_bound([0.0, 0.0, 5.0], &matrix_from_yaw(0.0), 3.0, &model_bound);

        let ray = Ray::new([6.0, 6.0, 100.0], WORLD_DOWN);
        let mut dist = 1000.0;
        assert!(pl.intersect_ray(&model, &ray, &mut dist, false, ModelIgnoreFlags::empty()));
        assert!(approx(dist, 65.0));

        let miss = Ray::new([60.0, 6.0, 100.0], WORLD_DOWN);
        let mut dist = 1000.0;
        assert!(!pl.intersect_ray(&model, &miss, &mut dist, false, ModelIgnoreFlags::empty()));
        assert_eq!(dist, 1000.0);
    }

    #[test]
    fn test_rotated_area_probe() {
        let model = hall_model();
        let model_bound = model.bound().unwrap();
        // quarter turn: model x maps to world y
        let pl = Placement::from_model_bound(
            [1000.0, 1000.0, 50.0],
            &matrix_from_yaw(std::f32::consts::FRAC_PI_2),
            1.0,
            &model_bound,
        );

        let p = [995.0, 1005.0, 75.0];
        let area = pl.intersect_point(&model, &p, f32::NEG_INFINITY).unwrap();
        assert_eq!(area.group_id, 2);
        assert!(approx(area.ground_z, 70.0));

        // a higher surface already known suppresses this one
        assert!(pl.intersect_point(&model, &p, 80.0).is_none());
        // outside the world bound
        assert!(pl.intersect_point(&model, &[1005.0, 1005.0, 75.0], f32::NEG_INFINITY).is_none());
    }

    #[test]
    fn test_location_info_keeps_highest() {
        let model = hall_model();
        let b = model.bound().unwrap();
        let low = Placement::from_model_bound([0.0, 0.0, 0.0], &matrix_from_yaw(0.0), 1.0, &b);
        let high = Placement::from_model_bound([0.0, 0.0, 4.0], &matrix_from_yaw(0.0), 1.0, &b);

        let p = [5.0, 5.0, 8.0];
        let mut info = None;
        assert!(low.get_location_info(&model, &p, 1, &mut info));
        assert!(high.get_location_info(&model, &p, 2, &mut info));
        assert!(!low.get_location_info(&model, &p, 1, &mut info));

        let info = info.unwrap();
        assert_eq!(info.adt_id, 2);
        assert!(approx(info.ground_z, 4.0));
        assert!(std::ptr::eq(info.hit_placement, &high));
    }
}
