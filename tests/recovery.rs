mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use level_geometry::{
    CollectingDiagnosticSink, HeadlessBackend, LevelGeometry, LevelGeometryOptions, MemoryWorld,
    RenderSettings, RenderSettingsHandle, ResourcePack, ResourcePackHandle, VerticalBounds, WorldStore,
};

fn engine_with_sink(
    world: Arc<dyn WorldStore>,
    sink: Arc<CollectingDiagnosticSink>,
    settings: RenderSettings,
) -> LevelGeometry<HeadlessBackend> {
    let options = LevelGeometryOptions::new(world, builtin_pack())
        .with_worker_count(2)
        .with_settings(RenderSettingsHandle::new(settings))
        .with_diagnostics(sink);
    let mut geometry = LevelGeometry::new(HeadlessBackend::new(), options).unwrap();
    geometry.init_gl().unwrap();
    geometry.set_dimension(overworld()).unwrap();
    geometry.start().unwrap();
    geometry
}

#[test]
fn test_panicking_job_is_reported_and_retried() {
    let world = Arc::new(InstrumentedWorld::new(flat_world(3)));
    world.gauge.panic_once(0, 0);
    let sink = Arc::new(CollectingDiagnosticSink::new());
    let mut geometry = engine_with_sink(world.clone(), sink.clone(), RenderSettings::new(1, 3));

    settle_with(&mut geometry, 9);

    let reports = sink.take();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].title, "Chunk meshing failed");
    assert!(reports[0].message.contains("corrupt chunk 0, 0"));
    assert_eq!(geometry.stats().failures, 1);
    assert_eq!(geometry.stats().with_geometry, 9);

    // The engine keeps going after the failure
    world.inner.mark_changed(&overworld(), 1, 1);
    assert!(pump_until(&mut geometry, |g| g
        .chunk_status(&key(1, 1))
        .map_or(false, |status| status.mesh_version == Some(1))));
    assert!(sink.is_empty());
}

#[test]
fn test_failed_upload_is_meshed_again() {
    let world = Arc::new(flat_world(2));
    let mut geometry = engine(world, builtin_pack(), 2, RenderSettings::new(1, 3));
    geometry.init_gl().unwrap();
    geometry.backend_mut().fail_next_upload();
    geometry.set_dimension(overworld()).unwrap();
    geometry.start().unwrap();

    let started = Instant::now();
    let mut errors = 0;
    while errors == 0 && started.elapsed() < TIMEOUT {
        if geometry.process_pending().is_err() {
            errors += 1;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(errors, 1);

    settle_with(&mut geometry, 9);
    assert_eq!(geometry.stats().dispatches, 10);
    assert_eq!(geometry.backend().live_geometry(), 9);
}

#[test]
fn test_nothing_is_meshed_until_a_pack_is_loaded() {
    let world = Arc::new(flat_world(2));
    let pack = ResourcePackHandle::new();
    let mut geometry = engine(world, pack.clone(), 2, RenderSettings::new(1, 3));
    geometry.init_gl().unwrap();
    geometry.set_dimension(overworld()).unwrap();
    geometry.start().unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(geometry.process_pending().unwrap(), 0);
    assert_eq!(geometry.stats().dispatches, 0);
    assert_eq!(geometry.stats().resident, 0);
    assert_eq!(geometry.backend().live_textures(), 0);

    pack.set(ResourcePack::builtin().unwrap());
    settle_with(&mut geometry, 9);
    assert_eq!(geometry.backend().counters().textures_created, 1);
    assert_eq!(geometry.stats().dispatches, 9);
}

#[test]
fn test_pack_swap_remeshes_everything() {
    let world = Arc::new(flat_world(2));
    let pack = builtin_pack();
    let mut geometry = engine(world, pack.clone(), 4, RenderSettings::new(1, 3));
    geometry.init_gl().unwrap();
    geometry.set_dimension(overworld()).unwrap();
    geometry.start().unwrap();
    settle_with(&mut geometry, 9);

    let repaints = Arc::new(AtomicUsize::new(0));
    let counter = repaints.clone();
    let subscription = geometry.subscribe_geometry_changed(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(pack.set(ResourcePack::builtin().unwrap()), 2);
    settle_with(&mut geometry, 9);

    for key in geometry.resident_keys() {
        assert_eq!(geometry.chunk_status(&key).unwrap().mesh_version, Some(1));
    }
    assert_eq!(geometry.stats().dispatches, 18);
    let counters = geometry.backend().counters();
    assert_eq!(counters.textures_created, 2);
    assert_eq!(counters.textures_destroyed, 1);
    assert_eq!(geometry.backend().live_textures(), 1);
    assert!(repaints.load(Ordering::SeqCst) > 0);

    // Unsubscribed listeners hear nothing more
    geometry.unsubscribe_geometry_changed(subscription);
    let heard = repaints.load(Ordering::SeqCst);
    pack.set(ResourcePack::builtin().unwrap());
    settle_with(&mut geometry, 9);
    assert_eq!(repaints.load(Ordering::SeqCst), heard);
}

#[test]
fn test_missing_and_broken_chunks_get_placeholders() {
    let world = Arc::new(MemoryWorld::new(VerticalBounds::new(0, 64)));
    world.fail_chunk(&overworld(), 1, 0, "truncated region file");
    world.insert_empty_chunk(&overworld(), -1, 0);
    let mut geometry = running_engine(world, 2, RenderSettings::new(1, 3));

    settle_with(&mut geometry, 9);

    // Empty chunks still get an (empty) geometry object
    assert_eq!(geometry.geometry(&key(-1, 0)).unwrap().vertex_count, 0);
    assert_eq!(geometry.geometry(&key(1, 0)).unwrap().vertex_count, 24);
    for key in geometry.resident_keys() {
        if key.cx != -1 || key.cz != 0 {
            assert_eq!(geometry.geometry(&key).unwrap().vertex_count, 24, "{}", key);
        }
    }

    // Both placeholders differ in texture, so their bytes differ
    let backend = geometry.backend();
    let missing = backend.geometry_bytes(geometry.geometry(&key(0, 1)).unwrap()).unwrap();
    let broken = backend.geometry_bytes(geometry.geometry(&key(1, 0)).unwrap()).unwrap();
    assert_ne!(missing, broken);
}

#[test]
fn test_dropping_the_engine_releases_everything() {
    let world = Arc::new(flat_world(3));
    let pack = builtin_pack();
    {
        let mut geometry = engine(world.clone(), pack.clone(), 2, RenderSettings::new(2, 4));
        geometry.init_gl().unwrap();
        geometry.set_dimension(overworld()).unwrap();
        geometry.start().unwrap();
        settle_with(&mut geometry, 25);
        assert_eq!(world.subscription_count(), 25);
    }
    assert_eq!(world.subscription_count(), 0);

    // The pack outlives the engine and setting it reaches nobody
    pack.set(ResourcePack::builtin().unwrap());
}

#[test]
fn test_results_for_evicted_chunks_are_never_uploaded() {
    let world = Arc::new(flat_world(1));
    let mut geometry = running_engine(world, 1, RenderSettings::new(0, 2));

    // Let the centre mesh reach the queue without installing it
    let started = Instant::now();
    while geometry
        .chunk_status(&key(0, 0))
        .map_or(true, |status| status.pending_version.is_none())
    {
        assert!(started.elapsed() < TIMEOUT, "centre chunk was never meshed");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(geometry.backend().counters().geometry_created, 0);

    geometry.set_dimension(nether()).unwrap();
    settle_with(&mut geometry, 1);

    let stats = geometry.stats();
    assert!(stats.discards >= 1);
    let counters = geometry.backend().counters();
    // Only installed meshes were ever uploaded
    assert_eq!(counters.geometry_created, stats.installs);
    assert_eq!(counters.geometry_destroyed, 0);
    assert!(geometry.has_geometry(&level_geometry::ChunkKey::new(nether(), 0, 0)));
}
