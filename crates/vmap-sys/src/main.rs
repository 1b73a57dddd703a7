// main.rs — vmap-query: load the tiles around a query and print the answer
//
// Positions are world coordinates given as `x,y,z`. The tiles holding every
// position of a query are loaded first and the map is unloaded on exit.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use vmap_common::common::{init_logging, LoadResult};
use vmap_common::config::VmapConfig;
use vmap_common::v_shared::{ModelIgnoreFlags, Vec3, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS, VMAP_INVALID_HEIGHT_VALUE};
use vmap_engine::vmap_manager::DEFAULT_HEIGHT_SEARCH_DIST;
use vmap_engine::VMapManager;

#[derive(Parser, Debug)]
#[command(name = "vmap-query")]
#[command(about = "Run collision, height, area and liquid queries against extracted vmaps")]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Overrides the configured vmaps directory
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Map id
    #[arg(long, short = 'm')]
    map: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ground height below a position
    Height {
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        pos: Vec3,
        #[arg(long, default_value_t = DEFAULT_HEIGHT_SEARCH_DIST)]
        search: f32,
    },
    /// Line of sight between two positions
    Los {
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        from: Vec3,
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        to: Vec3,
        /// Let decorative props through
        #[arg(long)]
        ignore_m2: bool,
    },
    /// First obstruction between two positions
    HitPos {
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        from: Vec3,
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        to: Vec3,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        modify: f32,
    },
    /// Area data of the floor below a position
    Area {
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        pos: Vec3,
    },
    /// Liquid above the floor below a position
    Liquid {
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        pos: Vec3,
        /// Required liquid flag bits, 0 for any
        #[arg(long, default_value_t = 0)]
        req_type: u32,
    },
    /// Check the map and tile files without loading them
    Exists { tile_x: u32, tile_y: u32 },
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z, got '{}'", s));
    }
    let mut v = [0.0f32; 3];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|e| format!("bad coordinate '{}': {}", part, e))?;
    }
    Ok(v)
}

/// Grid tile holding a world position.
fn grid_coords(p: &Vec3) -> (u32, u32) {
    let half = (MAX_NUMBER_OF_GRIDS / 2) as f32;
    let max = (MAX_NUMBER_OF_GRIDS - 1) as f32;
    let gx = (half - p[0] / SIZE_OF_GRIDS).floor().clamp(0.0, max) as u32;
    let gy = (half - p[1] / SIZE_OF_GRIDS).floor().clamp(0.0, max) as u32;
    (gx, gy)
}

fn load_tiles_for(vm: &VMapManager, map_id: u32, positions: &[Vec3]) -> bool {
    for p in positions {
        let (x, y) = grid_coords(p);
        match vm.load_map(map_id, x, y) {
            LoadResult::Success => info!("map {} tile [{}, {}] loaded", map_id, x, y),
            LoadResult::FileNotFound => warn!("map {} tile [{}, {}] has no vmap data", map_id, x, y),
            other => {
                error!("map {} tile [{}, {}] failed to load: {:?}", map_id, x, y, other);
                return false;
            }
        }
    }
    true
}

fn run(vm: &VMapManager, map_id: u32, command: &Command) -> bool {
    match command {
        Command::Height { pos, search } => {
            if !load_tiles_for(vm, map_id, &[*pos]) {
                return false;
            }
            let height = vm.get_height(map_id, pos[0], pos[1], pos[2], *search);
            if height == VMAP_INVALID_HEIGHT_VALUE {
                println!("height: none");
            } else {
                println!("height: {:.3}", height);
            }
        }
        Command::Los { from, to, ignore_m2 } => {
            if !load_tiles_for(vm, map_id, &[*from, *to]) {
                return false;
            }
            let ignore = if *ignore_m2 { ModelIgnoreFlags::M2 } else { ModelIgnoreFlags::empty() };
            println!("line of sight: {}", vm.is_in_line_of_sight(map_id, from, to, ignore));
        }
        Command::HitPos { from, to, modify } => {
            if !load_tiles_for(vm, map_id, &[*from, *to]) {
                return false;
            }
            let (hit, pos) = vm.get_object_hit_pos(map_id, from, to, *modify);
            println!("hit: {} at {:.3},{:.3},{:.3}", hit, pos[0], pos[1], pos[2]);
        }
        Command::Area { pos } => {
            if !load_tiles_for(vm, map_id, &[*pos]) {
                return false;
            }
            match vm.get_area_info(map_id, pos[0], pos[1], pos[2]) {
                Some(area) => println!(
                    "floor: {:.3} flags: {:#x} adt: {} root: {} group: {}",
                    area.ground_z, area.flags, area.adt_id, area.root_id, area.group_id
                ),
                None => println!("area: none"),
            }
        }
        Command::Liquid { pos, req_type } => {
            if !load_tiles_for(vm, map_id, &[*pos]) {
                return false;
            }
            match vm.get_liquid_level(map_id, pos[0], pos[1], pos[2], *req_type) {
                Some(liquid) => println!(
                    "liquid type: {} level: {:.3} floor: {:.3} mogp flags: {:#x}",
                    liquid.liquid_type, liquid.level, liquid.floor, liquid.mogp_flags
                ),
                None => println!("liquid: none"),
            }
        }
        Command::Exists { tile_x, tile_y } => {
            let result = vm.exists_map(map_id, *tile_x, *tile_y);
            println!("exists: {:?}", result);
            return result.is_success();
        }
    }
    true
}

fn main() -> ExitCode {
    init_logging("info");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match VmapConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("could not read config '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => VmapConfig::default(),
    };
    if let Some(base) = args.base_path {
        config.base_path = base;
    }

    let vm = VMapManager::from_config(&config);
    let ok = run(&vm, args.map, &args.command);
    vm.unload_map(args.map);

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vec3() {
        assert_eq!(parse_vec3("1.5, -2,3").unwrap(), [1.5, -2.0, 3.0]);
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("1,two,3").is_err());
    }

    #[test]
    fn test_grid_coords() {
        assert_eq!(grid_coords(&[0.0, 0.0, 0.0]), (32, 32));
        assert_eq!(grid_coords(&[1.0, -1.0, 0.0]), (31, 32));
        assert_eq!(grid_coords(&[1e9, -1e9, 0.0]), (0, 63));
    }

    #[test]
    fn test_command_line() {
        let args = Args::try_parse_from(["vmap-query", "-m", "530", "los", "1,2,3", "-4,5,6", "--ignore-m2"]).unwrap();
        assert_eq!(args.map, 530);
        match args.command {
            Command::Los { from, to, ignore_m2 } => {
                assert_eq!(from, [1.0, 2.0, 3.0]);
                assert_eq!(to, [-4.0, 5.0, 6.0]);
                assert!(ignore_m2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
