#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use level_geometry::world::{ChangeCallback, SubscriptionId};
use level_geometry::{
    Block, BlockData, ChunkError, ChunkHandle, ChunkKey, DimensionId, GpuBackend, HeadlessBackend,
    LevelGeometry, LevelGeometryOptions, MemoryWorld, RenderSettings, RenderSettingsHandle, ResourcePack,
    ResourcePackHandle, VerticalBounds, WorldStore,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

pub const TIMEOUT: Duration = Duration::from_secs(20);

pub fn overworld() -> DimensionId {
    DimensionId::new("minecraft:overworld")
}

pub fn nether() -> DimensionId {
    DimensionId::new("minecraft:the_nether")
}

pub fn key(cx: i64, cz: i64) -> ChunkKey {
    ChunkKey::new(overworld(), cx, cz)
}

/// A world with a stone floor at y = 0 in every chunk within `radius` of the origin
pub fn flat_world(radius: i64) -> MemoryWorld {
    let world = MemoryWorld::new(VerticalBounds::new(0, 64));
    let stone = Block::parse("stone");
    for dimension in [overworld(), nether()] {
        for cx in -radius..=radius {
            for cz in -radius..=radius {
                let mut data = BlockData::new();
                for x in 0..16 {
                    for z in 0..16 {
                        data.set_block(x, 0, z, &stone);
                    }
                }
                world.insert_chunk(&dimension, cx, cz, data);
            }
        }
    }
    world
}

pub fn builtin_pack() -> ResourcePackHandle {
    ResourcePackHandle::with_pack(ResourcePack::builtin().unwrap())
}

pub fn engine(
    world: Arc<dyn WorldStore>,
    pack: ResourcePackHandle,
    workers: usize,
    settings: RenderSettings,
) -> LevelGeometry<HeadlessBackend> {
    let options = LevelGeometryOptions::new(world, pack)
        .with_worker_count(workers)
        .with_settings(RenderSettingsHandle::new(settings));
    LevelGeometry::new(HeadlessBackend::new(), options).unwrap()
}

/// Engine over `world` that is initialised and running in the overworld
pub fn running_engine(world: Arc<dyn WorldStore>, workers: usize, settings: RenderSettings) -> LevelGeometry<HeadlessBackend> {
    let mut geometry = engine(world, builtin_pack(), workers, settings);
    geometry.init_gl().unwrap();
    geometry.set_dimension(overworld()).unwrap();
    geometry.start().unwrap();
    geometry
}

/// Call `process_pending` until `done` holds. Returns false on timeout.
pub fn pump_until<G: GpuBackend>(
    geometry: &mut LevelGeometry<G>,
    mut done: impl FnMut(&LevelGeometry<G>) -> bool,
) -> bool {
    let started = Instant::now();
    loop {
        geometry.process_pending().unwrap();
        if done(geometry) {
            return true;
        }
        if started.elapsed() > TIMEOUT {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// No work in flight and every resident chunk shows its latest version
pub fn is_settled<G: GpuBackend>(geometry: &LevelGeometry<G>) -> bool {
    let stats = geometry.stats();
    stats.processing == 0
        && stats.changed == 0
        && geometry.resident_keys().iter().all(|key| {
            geometry.has_geometry(key)
                && geometry
                    .chunk_status(key)
                    .map_or(false, |status| status.mesh_version == Some(status.chunk_version))
        })
}

pub fn settle_with<G: GpuBackend>(geometry: &mut LevelGeometry<G>, resident: usize) {
    assert!(
        pump_until(geometry, |g| g.stats().resident == resident && is_settled(g)),
        "engine did not settle: {:?}",
        geometry.stats()
    );
}

/// Tracks reads of chunk data through an [`InstrumentedWorld`]
#[derive(Default)]
pub struct ReadGauge {
    delay: Mutex<Duration>,
    panic_once: Mutex<FxHashSet<(i64, i64)>>,
    active: Mutex<FxHashMap<(i64, i64), usize>>,
    max_active: Mutex<FxHashMap<(i64, i64), usize>>,
    pub reads: AtomicUsize,
}

impl ReadGauge {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// The next read of this chunk panics
    pub fn panic_once(&self, cx: i64, cz: i64) {
        self.panic_once.lock().insert((cx, cz));
    }

    /// Most reads of one chunk that were ever running at the same time
    pub fn max_active(&self, cx: i64, cz: i64) -> usize {
        self.max_active.lock().get(&(cx, cz)).copied().unwrap_or(0)
    }
}

struct ActiveRead<'a> {
    gauge: &'a ReadGauge,
    coords: (i64, i64),
}

impl Drop for ActiveRead<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.gauge.active.lock().get_mut(&self.coords) {
            *count -= 1;
        }
    }
}

/// Wraps a [`MemoryWorld`] to slow down, count or break chunk reads
pub struct InstrumentedWorld {
    pub inner: MemoryWorld,
    pub gauge: Arc<ReadGauge>,
}

impl InstrumentedWorld {
    pub fn new(inner: MemoryWorld) -> Self {
        Self {
            inner,
            gauge: Arc::new(ReadGauge::default()),
        }
    }
}

struct InstrumentedHandle {
    inner: Arc<dyn ChunkHandle>,
    gauge: Arc<ReadGauge>,
    coords: (i64, i64),
}

impl ChunkHandle for InstrumentedHandle {
    fn subscribe_changed(&self, callback: ChangeCallback) -> SubscriptionId {
        self.inner.subscribe_changed(callback)
    }

    fn unsubscribe_changed(&self, id: SubscriptionId) {
        self.inner.unsubscribe_changed(id);
    }

    fn block_data(&self) -> Result<Option<Arc<BlockData>>, ChunkError> {
        self.gauge.reads.fetch_add(1, Ordering::SeqCst);
        let _active = {
            let mut active = self.gauge.active.lock();
            let count = active.entry(self.coords).or_insert(0);
            *count += 1;
            let mut max_active = self.gauge.max_active.lock();
            let max = max_active.entry(self.coords).or_insert(0);
            *max = (*max).max(*count);
            ActiveRead {
                gauge: &self.gauge,
                coords: self.coords,
            }
        };

        let delay = *self.gauge.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.gauge.panic_once.lock().remove(&self.coords) {
            panic!("corrupt chunk {}, {}", self.coords.0, self.coords.1);
        }
        self.inner.block_data()
    }
}

impl WorldStore for InstrumentedWorld {
    fn chunk_handle(&self, dimension: &DimensionId, cx: i64, cz: i64) -> Arc<dyn ChunkHandle> {
        Arc::new(InstrumentedHandle {
            inner: self.inner.chunk_handle(dimension, cx, cz),
            gauge: Arc::clone(&self.gauge),
            coords: (cx, cz),
        })
    }

    fn bounds(&self, dimension: &DimensionId) -> VerticalBounds {
        self.inner.bounds(dimension)
    }
}
