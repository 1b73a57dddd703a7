#![allow(clippy::too_many_arguments, clippy::needless_range_loop, clippy::float_cmp)]

pub mod v_shared;
pub mod vfiles;
pub mod common;
pub mod config;
