//! Headless soak run of the geometry engine
//!
//! Walks a camera across a generated world while editing blocks and switching
//! dimensions, then checks that no GPU object leaked.
//!
//! Usage: geometry_soak [config.toml]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use level_geometry::{
    Block, BlockData, BlockPos, DimensionId, HeadlessBackend, LevelGeometry, LevelGeometryConfig,
    LevelGeometryOptions, MemoryWorld, ResourcePack, ResourcePackHandle, VerticalBounds,
};

const WORLD_RADIUS: i64 = 24;
const STEPS: usize = 200;

fn generate_world() -> MemoryWorld {
    let world = MemoryWorld::new(VerticalBounds::new(0, 64));
    let stone = Block::parse("stone");
    let grass = Block::parse("grass_block");
    let netherrack = Block::parse("netherrack");

    for cx in -WORLD_RADIUS..=WORLD_RADIUS {
        for cz in -WORLD_RADIUS..=WORLD_RADIUS {
            let mut overworld = BlockData::new();
            let mut nether = BlockData::new();
            for x in 0..16 {
                for z in 0..16 {
                    // Gentle terraces so chunks have differing surfaces
                    let height = 4 + ((cx * 16 + x as i64).rem_euclid(7) + (cz * 16 + z as i64).rem_euclid(5)) / 3;
                    for y in 0..height {
                        overworld.set_block(x, y, z, &stone);
                        nether.set_block(x, y, z, &netherrack);
                    }
                    overworld.set_block(x, height, z, &grass);
                }
            }
            world.insert_chunk(&DimensionId::new("minecraft:overworld"), cx, cz, overworld);
            world.insert_chunk(&DimensionId::new("minecraft:the_nether"), cx, cz, nether);
        }
    }
    world
}

fn load_pack(config: &LevelGeometryConfig) -> Result<ResourcePack> {
    match &config.resource_pack_dir {
        Some(dir) => ResourcePack::load_dir(dir, config.atlas_cache_dir.as_deref())
            .with_context(|| format!("loading resource pack {}", dir.display())),
        None => Ok(ResourcePack::builtin()?),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => LevelGeometryConfig::load(&path).with_context(|| format!("reading {}", path))?,
        None => LevelGeometryConfig::default(),
    };
    log::info!("[geometry_soak] {:?}", config);

    let started = Instant::now();
    let world = Arc::new(generate_world());
    log::info!(
        "[geometry_soak] Generated {} chunks per dimension in {:?}",
        (2 * WORLD_RADIUS + 1).pow(2),
        started.elapsed()
    );

    let pack = ResourcePackHandle::with_pack(load_pack(&config)?);
    let options = LevelGeometryOptions::from_config(world.clone(), pack, &config);
    let mut geometry = LevelGeometry::new(HeadlessBackend::new(), options)?;

    geometry.init_gl()?;
    geometry.set_dimension("minecraft:overworld")?;
    geometry.start()?;

    let overworld = DimensionId::new("minecraft:overworld");
    let glass = Block::parse("glass");
    let limit = (WORLD_RADIUS - i64::from(config.render_settings().unload_distance()) - 1).max(0);
    let mut location = (0i64, 0i64);

    for step in 0..STEPS {
        // Walk a square path, turning every 25 steps
        let (dx, dz) = match (step / 25) % 4 {
            0 => (1, 0),
            1 => (0, 1),
            2 => (-1, 0),
            _ => (0, -1),
        };
        if step % 3 == 0 {
            location = (
                (location.0 + dx).clamp(-limit, limit),
                (location.1 + dz).clamp(-limit, limit),
            );
            geometry.set_location(location.0, location.1)?;
        }

        let x = location.0 * 16 + (step as i64 * 5) % 16;
        let z = location.1 * 16 + (step as i64 * 11) % 16;
        world.set_block(&overworld, BlockPos::new(x, 12, z), &glass);

        if step == STEPS / 2 {
            geometry.set_dimension("minecraft:the_nether")?;
        }
        if step == STEPS / 2 + 20 {
            geometry.set_dimension("minecraft:overworld")?;
        }

        geometry.process_pending()?;
        std::thread::sleep(Duration::from_millis(5));
    }

    geometry.stop()?;
    let stats = geometry.stats();
    log::info!("[geometry_soak] Final stats {:?}", stats);
    println!(
        "{} resident, {} dispatches, {} installs, {} discards, {} failures in {:?}",
        stats.resident,
        stats.dispatches,
        stats.installs,
        stats.discards,
        stats.failures,
        started.elapsed()
    );

    geometry.destroy_gl()?;
    let counters = geometry.backend().counters();
    println!("{:?}", counters);
    if counters.double_frees > 0 {
        bail!("{} GPU objects were destroyed twice", counters.double_frees);
    }
    if counters.geometry_created != counters.geometry_destroyed {
        bail!(
            "leaked {} geometry objects",
            counters.geometry_created - counters.geometry_destroyed
        );
    }
    if world.subscription_count() != 0 {
        bail!("{} chunk subscriptions left behind", world.subscription_count());
    }
    Ok(())
}
