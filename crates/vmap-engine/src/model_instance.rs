// model_instance.rs — Static model placement loaded from map tiles

use std::sync::Arc;

use vmap_common::v_shared::{matrix_from_spawn_rotation, AaBox, ModelFlags, ModelIgnoreFlags, Ray, Vec3};
use vmap_common::vfiles::ModelSpawn;

use crate::group_model::GroupModel;
use crate::placement::{LocationInfo, Placement};
use crate::world_model::{AreaInfo, WorldModel};

#[derive(Debug, Clone)]
pub struct ModelInstance {
    pub id: u32,
    pub flags: ModelFlags,
    pub adt_id: u16,
    pub name: String,
    placement: Placement,
    /// `None` when the model file failed to load; the instance is inert.
    model: Option<Arc<WorldModel>>,
}

impl ModelInstance {
    pub fn new(spawn: &ModelSpawn, model: Option<Arc<WorldModel>>) -> Self {
        let rotation = matrix_from_spawn_rotation(&spawn.rot);

        let placement = match (spawn.bound, model.as_deref().and_then(WorldModel::bound)) {
            (Some(bound), _) => Placement::new(spawn.pos, &rotation, spawn.scale, bound),
            (None, Some(model_bound)) => Placement::from_model_bound(spawn.pos, &rotation, spawn.scale, &model_bound),
            (None, None) => Placement::new(spawn.pos, &rotation, spawn.scale, AaBox::from_point(spawn.pos)),
        };

        Self {
            id: spawn.id,
            flags: spawn.flags,
            adt_id: spawn.adt_id,
            name: spawn.name.clone(),
            placement,
            model,
        }
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn model(&self) -> Option<&Arc<WorldModel>> {
        self.model.as_ref()
    }

    pub fn bound(&self) -> &AaBox {
        &self.placement.bound
    }

    pub fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32, stop_at_first: bool, ignore_flags: ModelIgnoreFlags) -> bool {
        let Some(model) = &self.model else {
            return false;
        };
        self.placement.intersect_ray(model, ray, max_dist, stop_at_first, ignore_flags)
    }

    /// Raise `info` to this instance's floor below `p` when it is higher.
    pub fn intersect_point(&self, p: &Vec3, info: &mut Option<AreaInfo>) {
        let Some(model) = &self.model else {
            return;
        };
        // M2 models carry no area data
        if self.flags.contains(ModelFlags::M2) {
            return;
        }

        let min_z = info.map_or(f32::NEG_INFINITY, |i| i.ground_z);
        if let Some(mut area) = self.placement.intersect_point(model, p, min_z) {
            area.adt_id = self.adt_id as u32;
            *info = Some(area);
        }
    }

    pub fn get_location_info<'a>(&'a self, p: &Vec3, info: &mut Option<LocationInfo<'a>>) -> bool {
        let Some(model) = &self.model else {
            return false;
        };
        if self.flags.contains(ModelFlags::M2) {
            return false;
        }
        self.placement.get_location_info(model, p, self.adt_id as u32, info)
    }

    pub fn get_liquid_level(&self, p: &Vec3, group: &GroupModel) -> Option<f32> {
        self.placement.get_liquid_level(p, group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{hall_model, quad_group, spawn};
    use vmap_common::v_shared::ModelFlags;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-2
    }

    #[test]
    fn test_bound_from_model_when_spawn_has_none() {
        let model = Arc::new(hall_model());
        let s = spawn(1, "hall", [100.0, 200.0, 10.0], ModelFlags::empty());
        let inst = ModelInstance::new(&s, Some(model));
        assert!(approx(inst.bound().low[0], 100.0) && approx(inst.bound().high[0], 110.0));
        assert!(approx(inst.bound().low[2], 10.0) && approx(inst.bound().high[2], 40.0));
    }

    #[test]
    fn test_explicit_spawn_bound_wins() {
        let mut s = spawn(1, "hall", [0.0; 3], ModelFlags::HAS_BOUND);
        let explicit = AaBox::new([-1.0; 3], [1.0; 3]);
        s.bound = Some(explicit);
        let inst = ModelInstance::new(&s, Some(Arc::new(hall_model())));
        assert_eq!(*inst.bound(), explicit);
    }

    #[test]
    fn test_inert_without_model() {
        let s = spawn(1, "gone", [0.0; 3], ModelFlags::empty());
        let inst = ModelInstance::new(&s, None);
        let mut dist = 100.0;
        let ray = Ray::new([0.0, 0.0, 50.0], [0.0, 0.0, -1.0]);
        assert!(!inst.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
        let mut info = None;
        inst.intersect_point(&[0.0; 3], &mut info);
        assert!(info.is_none());
    }

    #[test]
    fn test_area_probe_sets_adt() {
        let mut s = spawn(1, "hall", [0.0, 0.0, 0.0], ModelFlags::empty());
        s.adt_id = 12;
        let inst = ModelInstance::new(&s, Some(Arc::new(hall_model())));
        let mut info = None;
        inst.intersect_point(&[5.0, 5.0, 25.0], &mut info);
        let info = info.unwrap();
        assert_eq!(info.adt_id, 12);
        assert_eq!(info.group_id, 2);
        assert!(approx(info.ground_z, 20.0));
    }

    #[test]
    fn test_m2_has_no_area() {
        let model = Arc::new(WorldModel::from_groups(1, vec![quad_group(0.0, 10.0)], ModelFlags::M2));
        let inst = ModelInstance::new(&spawn(1, "tree", [0.0; 3], ModelFlags::M2), Some(model));
        let mut info = None;
        inst.intersect_point(&[5.0, 5.0, 5.0], &mut info);
        assert!(info.is_none());
        let mut loc = None;
        assert!(!inst.get_location_info(&[5.0, 5.0, 5.0], &mut loc));
    }
}
