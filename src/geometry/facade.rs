use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use cgmath::Matrix4;
use crossbeam_channel::Receiver;
use rustc_hash::FxHashMap;

use super::backend::{ChunkDraw, GpuBackend};
use super::cache::ChunkEntry;
use super::scheduler::{ChunkStatus, GeometryChangedCallback, GeometryStats, MeshResult, Scheduler};
use crate::config::{
    LevelGeometryConfig, RenderSettings, RenderSettingsEvent, RenderSettingsHandle, DEFAULT_WORKER_COUNT,
};
use crate::diagnostics::{DiagnosticSink, LogDiagnosticSink};
use crate::error::{gpu_operation_error, GeometryError, GeometryResult};
use crate::resource_pack::ResourcePackHandle;
use crate::world::{ChunkKey, DimensionId, WorldStore};

/// Proof of running on the thread that owns the GPU context.
///
/// Records the thread it was created on and is neither `Send` nor `Sync`, so
/// anything holding one stays on that thread.
#[derive(Debug)]
pub struct GpuThread {
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl GpuThread {
    /// Claim the calling thread as the GPU thread
    pub fn current() -> Self {
        Self {
            owner: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn check(&self, operation: &'static str) -> GeometryResult<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(GeometryError::WrongThread { operation })
        }
    }
}

/// Lifecycle of a [`LevelGeometry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    Uninitialized,
    GlReady,
    Running,
    Stopped,
    GlDestroyed,
}

impl FacadeState {
    fn has_gl(self) -> bool {
        matches!(self, Self::GlReady | Self::Running | Self::Stopped)
    }
}

impl fmt::Display for FacadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::GlReady => "GL ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::GlDestroyed => "GL destroyed",
        };
        f.write_str(name)
    }
}

/// Collaborators a [`LevelGeometry`] is built from
pub struct LevelGeometryOptions {
    pub world: Arc<dyn WorldStore>,
    pub resource_pack: ResourcePackHandle,
    pub settings: RenderSettingsHandle,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub worker_count: usize,
}

impl LevelGeometryOptions {
    pub fn new(world: Arc<dyn WorldStore>, resource_pack: ResourcePackHandle) -> Self {
        Self {
            world,
            resource_pack,
            settings: RenderSettingsHandle::default(),
            diagnostics: Arc::new(LogDiagnosticSink),
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }

    /// Render distances and worker count taken from a config
    pub fn from_config(
        world: Arc<dyn WorldStore>,
        resource_pack: ResourcePackHandle,
        config: &LevelGeometryConfig,
    ) -> Self {
        Self {
            settings: RenderSettingsHandle::new(config.render_settings()),
            worker_count: config.worker_threads(),
            ..Self::new(world, resource_pack)
        }
    }

    pub fn with_settings(mut self, settings: RenderSettingsHandle) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}

/// Streams chunk geometry around a camera and draws it.
///
/// Owns the GPU objects of every resident chunk. Meshing happens on worker
/// threads; finished meshes are uploaded by [`process_pending`], which
/// [`paint`] calls once per frame. All methods that touch the GPU must be
/// called on the thread that created the facade.
///
/// [`process_pending`]: LevelGeometry::process_pending
/// [`paint`]: LevelGeometry::paint
pub struct LevelGeometry<G: GpuBackend> {
    backend: G,
    gpu_thread: GpuThread,
    state: FacadeState,
    scheduler: Arc<Scheduler>,
    results: Receiver<MeshResult>,
    settings: RenderSettingsHandle,
    settings_events: Receiver<RenderSettingsEvent>,
    pack_subscription: u64,
    manager: Option<JoinHandle<()>>,
    program: Option<G::Program>,
    /// Uploaded atlas and the resource pack generation it came from
    atlas: Option<(u64, G::Texture)>,
    geometry: FxHashMap<ChunkKey, G::Geometry>,
}

impl<G: GpuBackend> LevelGeometry<G> {
    /// Create the facade on the GPU thread
    pub fn new(backend: G, options: LevelGeometryOptions) -> GeometryResult<Self> {
        let LevelGeometryOptions {
            world,
            resource_pack,
            settings,
            diagnostics,
            worker_count,
        } = options;

        let (scheduler, results) = Scheduler::new(
            world,
            resource_pack.clone(),
            diagnostics,
            settings.get(),
            worker_count,
        )?;

        let weak = Arc::downgrade(&scheduler);
        let pack_subscription = resource_pack.subscribe_changed(Box::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.resource_pack_changed();
            }
        }));
        let settings_events = settings.subscribe();

        Ok(Self {
            backend,
            gpu_thread: GpuThread::current(),
            state: FacadeState::Uninitialized,
            scheduler,
            results,
            settings,
            settings_events,
            pack_subscription,
            manager: None,
            program: None,
            atlas: None,
            geometry: FxHashMap::default(),
        })
    }

    pub fn state(&self) -> FacadeState {
        self.state
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut G {
        &mut self.backend
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    fn invalid_state(&self, operation: &'static str) -> GeometryError {
        GeometryError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Create the shared shader program. Fails if GPU state already exists.
    pub fn init_gl(&mut self) -> GeometryResult<()> {
        self.gpu_thread.check("init_gl")?;
        if self.state.has_gl() {
            return Err(GeometryError::AlreadyInitialized);
        }

        let program = self.backend.create_program()?;
        self.program = Some(program);
        self.state = FacadeState::GlReady;
        self.sync_atlas()?;

        log::info!("[LevelGeometry::init_gl] GPU state initialised");
        Ok(())
    }

    /// Spawn the manager thread. Does nothing if already running.
    pub fn start(&mut self) -> GeometryResult<()> {
        self.gpu_thread.check("start")?;
        match self.state {
            FacadeState::Running => return Ok(()),
            FacadeState::GlReady | FacadeState::Stopped => {}
            FacadeState::Uninitialized | FacadeState::GlDestroyed => {
                return Err(self.invalid_state("start"));
            }
        }

        self.manager = Some(self.scheduler.start()?);
        self.state = FacadeState::Running;
        log::info!(
            "[LevelGeometry::start] Started with {} workers",
            self.scheduler.worker_count()
        );
        Ok(())
    }

    /// Stop the manager and wait for in-flight jobs.
    ///
    /// When this returns the manager has exited and every job has finished,
    /// its result installed or discarded. Does nothing unless running.
    pub fn stop(&mut self) -> GeometryResult<()> {
        self.gpu_thread.check("stop")?;
        if self.state != FacadeState::Running {
            return Ok(());
        }

        self.scheduler.request_stop();
        if let Some(manager) = self.manager.take() {
            if manager.join().is_err() {
                log::error!("[LevelGeometry::stop] Manager thread panicked");
            }
        }
        self.scheduler.wait_idle();
        self.state = FacadeState::Stopped;
        let installed = self.process_pending()?;

        log::info!("[LevelGeometry::stop] Stopped, {} meshes installed while draining", installed);
        Ok(())
    }

    /// Switch dimension. Every resident chunk is evicted.
    pub fn set_dimension(&mut self, dimension: impl Into<DimensionId>) -> GeometryResult<()> {
        self.gpu_thread.check("set_dimension")?;
        let dimension = dimension.into();
        log::debug!("[LevelGeometry::set_dimension] {}", dimension);
        if let Some(evicted) = self.scheduler.set_dimension(dimension) {
            self.release(evicted);
        }
        Ok(())
    }

    /// Move the camera to a chunk. Chunks beyond the unload distance are evicted.
    pub fn set_location(&mut self, cx: i64, cz: i64) -> GeometryResult<()> {
        self.gpu_thread.check("set_location")?;
        if let Some(evicted) = self.scheduler.set_location(cx, cz) {
            if !evicted.is_empty() {
                log::debug!(
                    "[LevelGeometry::set_location] Evicted {} chunks around {}, {}",
                    evicted.len(),
                    cx,
                    cz
                );
            }
            self.release(evicted);
        }
        Ok(())
    }

    /// Change the render distance through the settings handle and apply it now
    pub fn set_render_distance(&mut self, load_distance: u32, unload_distance: u32) -> GeometryResult<RenderSettings> {
        self.gpu_thread.check("set_render_distance")?;
        let settings = self.settings.set_render_distance(load_distance, unload_distance);
        self.apply_settings_events();
        Ok(settings)
    }

    /// Apply settings changes, swap the atlas and install finished meshes.
    ///
    /// Returns the number of meshes installed.
    pub fn process_pending(&mut self) -> GeometryResult<usize> {
        self.gpu_thread.check("process_pending")?;
        self.apply_settings_events();
        if !self.state.has_gl() {
            return Ok(0);
        }
        self.sync_atlas()?;

        let mut installed = 0;
        while let Ok(result) = self.results.try_recv() {
            if self.install(result)? {
                installed += 1;
            }
        }
        if installed > 0 {
            self.scheduler.notify_geometry_changed();
        }
        Ok(installed)
    }

    /// Draw every resident chunk with installed geometry, nearest first
    pub fn paint(&mut self, projection: Matrix4<f32>, view: Matrix4<f32>) -> GeometryResult<()> {
        self.gpu_thread.check("paint")?;
        if !self.state.has_gl() {
            return Err(GeometryError::NotInitialized);
        }
        self.process_pending()?;

        let (Some(program), Some((_, texture))) = (&self.program, &self.atlas) else {
            return Ok(());
        };
        let view_projection = projection * view;
        let order = self.scheduler.draw_order();
        let draws: Vec<ChunkDraw<'_, G::Geometry>> = order
            .iter()
            .filter_map(|(key, model)| {
                self.geometry.get(key).map(|geometry| ChunkDraw {
                    geometry,
                    transform: view_projection * *model,
                })
            })
            .collect();

        self.backend.draw_chunks(program, texture, &draws)
    }

    /// Stop, destroy every GPU object and the program.
    ///
    /// The cache is empty afterwards; [`init_gl`](Self::init_gl) may be called again.
    pub fn destroy_gl(&mut self) -> GeometryResult<()> {
        self.gpu_thread.check("destroy_gl")?;
        match self.state {
            FacadeState::Uninitialized => return Err(GeometryError::NotInitialized),
            FacadeState::GlDestroyed => return Ok(()),
            FacadeState::Running => self.stop()?,
            FacadeState::GlReady | FacadeState::Stopped => {}
        }

        let evicted = self.scheduler.clear();
        self.release(evicted);
        for (_, geometry) in self.geometry.drain() {
            self.backend.destroy_geometry(geometry);
        }
        let discarded = self.results.try_iter().count();
        if discarded > 0 {
            log::debug!("[LevelGeometry::destroy_gl] Discarded {} queued meshes", discarded);
        }
        if let Some((_, texture)) = self.atlas.take() {
            self.backend.destroy_texture(texture);
        }
        if let Some(program) = self.program.take() {
            self.backend.destroy_program(program);
        }
        self.state = FacadeState::GlDestroyed;

        log::info!("[LevelGeometry::destroy_gl] GPU state destroyed");
        Ok(())
    }

    pub fn subscribe_geometry_changed(&self, callback: GeometryChangedCallback) -> u64 {
        self.scheduler.subscribe_geometry_changed(callback)
    }

    pub fn unsubscribe_geometry_changed(&self, id: u64) {
        self.scheduler.unsubscribe_geometry_changed(id);
    }

    pub fn stats(&self) -> GeometryStats {
        GeometryStats {
            with_geometry: self.geometry.len(),
            ..self.scheduler.stats()
        }
    }

    pub fn chunk_status(&self, key: &ChunkKey) -> Option<ChunkStatus> {
        self.scheduler.chunk_status(key)
    }

    pub fn has_geometry(&self, key: &ChunkKey) -> bool {
        self.geometry.contains_key(key)
    }

    pub fn geometry(&self, key: &ChunkKey) -> Option<&G::Geometry> {
        self.geometry.get(key)
    }

    /// Resident keys, nearest first
    pub fn resident_keys(&self) -> Vec<ChunkKey> {
        self.scheduler.resident_keys()
    }

    pub fn camera_chunk(&self) -> (i64, i64) {
        self.scheduler.camera_chunk()
    }

    pub fn dimension(&self) -> Option<DimensionId> {
        self.scheduler.dimension()
    }

    /// Settings the cache is currently pruned to
    pub fn render_settings(&self) -> RenderSettings {
        self.scheduler.settings()
    }

    fn apply_settings_events(&mut self) {
        let Some(event) = self.settings_events.try_iter().last() else {
            return;
        };
        log::debug!(
            "[LevelGeometry::apply_settings_events] Render distance {} (unload {})",
            event.current.load_distance(),
            event.current.unload_distance()
        );
        let evicted = self.scheduler.apply_settings(event.current);
        self.release(evicted);
    }

    /// Upload the current resource pack atlas if it is newer than the one on the GPU
    fn sync_atlas(&mut self) -> GeometryResult<()> {
        let Some((generation, pack)) = self.scheduler.resource_pack().current_with_generation() else {
            return Ok(());
        };
        if self.atlas.as_ref().map(|(uploaded, _)| *uploaded) == Some(generation) {
            return Ok(());
        }

        let texture = self.backend.create_texture(pack.atlas())?;
        if let Some((_, previous)) = self.atlas.replace((generation, texture)) {
            self.backend.destroy_texture(previous);
        }
        log::info!(
            "[LevelGeometry::sync_atlas] Uploaded atlas for '{}' (generation {})",
            pack.name(),
            generation
        );
        Ok(())
    }

    /// Upload one result. Returns whether it replaced the chunk's geometry.
    fn install(&mut self, result: MeshResult) -> GeometryResult<bool> {
        if !self.scheduler.accepts(&result) {
            log::debug!(
                "[LevelGeometry::install] Discarding mesh {} of chunk {}",
                result.version,
                result.key
            );
            return Ok(false);
        }

        let vertex_count = u32::try_from(result.mesh.vertex_count())
            .map_err(|e| gpu_operation_error("create_geometry", e))?;
        let geometry = match self.backend.create_geometry(result.mesh.as_bytes(), vertex_count) {
            Ok(geometry) => geometry,
            Err(e) => {
                log::error!(
                    "[LevelGeometry::install] Upload for chunk {} failed: {}",
                    result.key,
                    e
                );
                self.scheduler.upload_failed(&result);
                return Err(e);
            }
        };

        if !self.scheduler.commit(&result) {
            self.backend.destroy_geometry(geometry);
            return Ok(false);
        }

        if let Some(previous) = self.geometry.insert(result.key, geometry) {
            self.backend.destroy_geometry(previous);
        }
        Ok(true)
    }

    /// Destroy the geometry of evicted entries, then drop them to unsubscribe
    fn release(&mut self, evicted: Vec<(ChunkKey, ChunkEntry)>) {
        for (key, entry) in evicted {
            if let Some(geometry) = self.geometry.remove(&key) {
                self.backend.destroy_geometry(geometry);
            }
            drop(entry);
        }
    }
}

impl<G: GpuBackend> Drop for LevelGeometry<G> {
    fn drop(&mut self) {
        if self.state.has_gl() {
            if let Err(e) = self.destroy_gl() {
                log::error!("[LevelGeometry::drop] Failed to release GPU state: {}", e);
            }
        } else {
            let evicted = self.scheduler.clear();
            self.release(evicted);
        }
        self.scheduler
            .resource_pack()
            .unsubscribe_changed(self.pack_subscription);
    }
}

impl<G: GpuBackend> fmt::Debug for LevelGeometry<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelGeometry")
            .field("state", &self.state)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::HeadlessBackend;
    use crate::world::{MemoryWorld, VerticalBounds};

    fn facade() -> LevelGeometry<HeadlessBackend> {
        let world = Arc::new(MemoryWorld::new(VerticalBounds::default()));
        let options = LevelGeometryOptions::new(world, ResourcePackHandle::new()).with_worker_count(1);
        LevelGeometry::new(HeadlessBackend::new(), options).unwrap()
    }

    #[test]
    fn test_gpu_thread_token() {
        let token = GpuThread::current();
        assert!(token.check("paint").is_ok());

        let owner = thread::current().id();
        let other = thread::spawn(move || {
            let foreign = GpuThread {
                owner,
                _not_send: PhantomData,
            };
            foreign.check("paint").is_err()
        });
        assert!(other.join().unwrap());
    }

    #[test]
    fn test_init_twice_fails() {
        let mut geometry = facade();
        geometry.init_gl().unwrap();
        assert!(matches!(geometry.init_gl(), Err(GeometryError::AlreadyInitialized)));
        assert_eq!(geometry.state(), FacadeState::GlReady);
    }

    #[test]
    fn test_start_requires_gl() {
        let mut geometry = facade();
        assert!(matches!(
            geometry.start(),
            Err(GeometryError::InvalidState { operation: "start", .. })
        ));
        let identity = Matrix4::from_scale(1.0);
        assert!(matches!(
            geometry.paint(identity, identity),
            Err(GeometryError::NotInitialized)
        ));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut geometry = facade();
        geometry.init_gl().unwrap();
        geometry.start().unwrap();
        geometry.start().unwrap();
        assert_eq!(geometry.state(), FacadeState::Running);

        geometry.stop().unwrap();
        geometry.stop().unwrap();
        assert_eq!(geometry.state(), FacadeState::Stopped);

        geometry.start().unwrap();
        geometry.destroy_gl().unwrap();
        assert_eq!(geometry.state(), FacadeState::GlDestroyed);
        assert!(geometry.start().is_err());

        geometry.init_gl().unwrap();
        assert_eq!(geometry.state(), FacadeState::GlReady);
        assert_eq!(geometry.backend().counters().programs_created, 2);
        assert_eq!(geometry.backend().live_programs(), 1);
    }

    #[test]
    fn test_destroy_before_init_fails() {
        let mut geometry = facade();
        assert!(matches!(geometry.destroy_gl(), Err(GeometryError::NotInitialized)));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(FacadeState::GlReady.to_string(), "GL ready");
        assert_eq!(FacadeState::GlDestroyed.to_string(), "GL destroyed");
    }
}
