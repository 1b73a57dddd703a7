#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::needless_range_loop,
         clippy::type_complexity, clippy::len_without_is_empty)]

pub mod bih;
pub mod liquid;
pub mod group_model;
pub mod world_model;
pub mod model_cache;
pub mod placement;
pub mod model_instance;
pub mod game_object_model;
pub mod map_tree;
pub mod dynamic_tree;
pub mod vmap_manager;

#[cfg(test)]
mod test_fixtures;

pub use vmap_manager::VMapManager;
