mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cgmath::{Matrix4, SquareMatrix};
use common::*;
use level_geometry::{Block, BlockPos, FacadeState, RenderSettings};

#[test]
fn test_camera_at_origin_meshes_25_chunks() {
    let world = Arc::new(flat_world(4));
    let mut geometry = running_engine(world, 4, RenderSettings::new(2, 4));
    let repaints = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&repaints);
    geometry.subscribe_geometry_changed(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    settle_with(&mut geometry, 25);

    // Nothing else gets scheduled once the square is done
    thread::sleep(Duration::from_millis(50));
    geometry.process_pending().unwrap();

    let stats = geometry.stats();
    assert_eq!(stats.resident, 25);
    assert_eq!(stats.with_geometry, 25);
    assert_eq!(stats.dispatches, 25);
    assert_eq!(stats.installs, 25);
    assert_eq!(stats.discards, 0);
    assert!(geometry
        .resident_keys()
        .iter()
        .all(|key| key.chebyshev_distance(0, 0) <= 2));
    assert_eq!(geometry.backend().counters().geometry_created, 25);
    assert!(repaints.load(Ordering::SeqCst) > 0);

    geometry.stop().unwrap();
}

#[test]
fn test_paint_draws_nearest_first() {
    let world = Arc::new(flat_world(3));
    let mut geometry = running_engine(world, 2, RenderSettings::new(1, 3));
    settle_with(&mut geometry, 9);

    geometry
        .paint(Matrix4::identity(), Matrix4::identity())
        .unwrap();
    let frame = geometry.backend().last_frame();
    assert_eq!(frame.len(), 9);
    // The camera chunk sits at the origin
    assert_eq!(frame[0].transform, Matrix4::identity());
    let origin = geometry.geometry(&key(0, 0)).unwrap();
    assert_eq!(frame[0].geometry_id, origin.id());
}

#[test]
fn test_changed_chunk_is_remeshed() {
    let world = Arc::new(flat_world(4));
    let mut geometry = running_engine(world.clone(), 4, RenderSettings::new(2, 4));
    settle_with(&mut geometry, 25);
    let before = geometry.geometry(&key(1, 1)).unwrap().id();

    world.set_block(&overworld(), BlockPos::new(20, 5, 20), &Block::parse("glass"));
    assert_eq!(geometry.chunk_status(&key(1, 1)).unwrap().chunk_version, 1);

    assert!(pump_until(&mut geometry, |g| g
        .chunk_status(&key(1, 1))
        .map_or(false, |status| status.mesh_version == Some(1))));
    assert_ne!(geometry.geometry(&key(1, 1)).unwrap().id(), before);

    settle_with(&mut geometry, 25);
    let stats = geometry.stats();
    assert_eq!(stats.dispatches, 26);
    assert_eq!(stats.installs, 26);
    // The replaced geometry was released
    assert_eq!(geometry.backend().live_geometry(), 25);
    assert_eq!(geometry.backend().counters().geometry_destroyed, 1);
}

#[test]
fn test_stop_waits_for_jobs_in_flight() {
    let world = Arc::new(InstrumentedWorld::new(flat_world(4)));
    world.gauge.set_delay(Duration::from_millis(20));
    let mut geometry = running_engine(world.clone(), 2, RenderSettings::new(3, 5));

    assert!(pump_until(&mut geometry, |g| g.stats().processing == 2));
    geometry.stop().unwrap();
    assert_eq!(geometry.state(), FacadeState::Stopped);

    let stats = geometry.stats();
    assert_eq!(stats.processing, 0);
    // Every dispatched job was installed during stop
    assert_eq!(stats.installs + stats.discards, stats.dispatches);
    assert!(geometry
        .resident_keys()
        .iter()
        .all(|key| geometry.chunk_status(key).unwrap().pending_version.is_none()));

    // No dispatch after stop returned
    thread::sleep(Duration::from_millis(60));
    assert_eq!(geometry.process_pending().unwrap(), 0);
    assert_eq!(geometry.stats().dispatches, stats.dispatches);

    // And the engine picks up where it left off
    world.gauge.set_delay(Duration::ZERO);
    geometry.start().unwrap();
    settle_with(&mut geometry, 49);
}

#[test]
fn test_dimension_change_releases_everything_once() {
    let world = Arc::new(flat_world(4));
    let mut geometry = running_engine(world.clone(), 4, RenderSettings::new(2, 4));
    settle_with(&mut geometry, 25);

    geometry.set_dimension(nether()).unwrap();
    // The manager may already be admitting nether chunks, but nothing of the
    // overworld is left and nothing is installed until the next pump
    assert!(geometry
        .resident_keys()
        .iter()
        .all(|key| key.dimension == nether()));
    assert_eq!(geometry.stats().with_geometry, 0);
    let counters = geometry.backend().counters();
    assert_eq!(counters.geometry_destroyed, 25);
    assert_eq!(counters.double_frees, 0);
    for cx in -2..=2 {
        for cz in -2..=2 {
            assert_eq!(world.chunk_subscription_count(&overworld(), cx, cz), 0);
        }
    }

    settle_with(&mut geometry, 25);
    assert!(geometry
        .resident_keys()
        .iter()
        .all(|key| key.dimension == nether()));

    // Setting the same dimension again changes nothing
    geometry.set_dimension(nether()).unwrap();
    assert_eq!(geometry.stats().resident, 25);

    geometry.destroy_gl().unwrap();
    let backend = geometry.backend();
    assert_eq!(backend.live_geometry(), 0);
    assert_eq!(backend.counters().geometry_created, backend.counters().geometry_destroyed);
    assert_eq!(backend.counters().double_frees, 0);
    assert_eq!(world.subscription_count(), 0);
}

#[test]
fn test_dimension_change_with_jobs_in_flight() {
    let world = Arc::new(InstrumentedWorld::new(flat_world(4)));
    world.gauge.set_delay(Duration::from_millis(10));
    let mut geometry = running_engine(world.clone(), 4, RenderSettings::new(2, 4));

    assert!(pump_until(&mut geometry, |g| g.stats().with_geometry >= 4
        && g.stats().processing > 0));
    geometry.set_dimension(nether()).unwrap();
    assert_eq!(geometry.backend().live_geometry(), 0);

    world.gauge.set_delay(Duration::ZERO);
    settle_with(&mut geometry, 25);
    assert!(geometry
        .resident_keys()
        .iter()
        .all(|key| key.dimension == nether()));

    drop(geometry);
    assert_eq!(world.inner.subscription_count(), 0);
}
