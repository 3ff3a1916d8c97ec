//! Manager thread and meshing workers
//!
//! Everything the manager, the workers and the render thread share lives in
//! one [`SchedulerState`] behind a single mutex, paired with a condition
//! variable the manager sleeps on. Workers never touch GPU objects: a finished
//! mesh is sent to the render thread as an immutable [`MeshResult`].
//!
//! World store calls (handle lookup, subscribe, unsubscribe) are never made
//! while the lock is held. Evicted entries are handed back to the caller so
//! their subscriptions are dropped after unlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use cgmath::Matrix4;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::{FxHashMap, FxHashSet};

use super::cache::{ChunkCache, ChunkEntry};
use super::spiral::GridSpiral;
use crate::config::RenderSettings;
use crate::diagnostics::{panic_message, DiagnosticReport, DiagnosticSink};
use crate::error::{GeometryError, GeometryResult};
use crate::mesher::{mesh_chunk, ChunkMesh};
use crate::resource_pack::{ResourcePack, ResourcePackHandle};
use crate::world::{ChunkKey, DimensionId, Subscription, WorldStore};

/// Name given to the manager thread
pub const MANAGER_THREAD_NAME: &str = "level-geometry-manager";

/// Callback fired when geometry is ready to be installed or was installed
pub type GeometryChangedCallback = Box<dyn Fn() + Send + Sync>;

/// A finished mesh on its way to the render thread
#[derive(Debug)]
pub struct MeshResult {
    pub key: ChunkKey,
    pub entry_id: u64,
    /// Chunk version the mesh was built from
    pub version: u64,
    pub mesh: ChunkMesh,
}

/// Versions tracked for one resident chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStatus {
    pub chunk_version: u64,
    pub mesh_version: Option<u64>,
    pub pending_version: Option<u64>,
}

/// Counters and set sizes. `with_geometry` is filled in by the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryStats {
    pub resident: usize,
    pub with_geometry: usize,
    pub processing: usize,
    pub changed: usize,
    pub dispatches: u64,
    pub installs: u64,
    pub discards: u64,
    pub failures: u64,
}

enum Candidate {
    /// Resident and stale
    Resident(ChunkKey),
    /// Not resident yet
    New(ChunkKey),
}

struct MeshJob {
    key: ChunkKey,
    entry_id: u64,
    version: u64,
    resource_pack: Arc<ResourcePack>,
}

pub(crate) struct SchedulerState {
    cache: ChunkCache<ChunkEntry>,
    /// Keys with a job in flight, or reserved while their entry is created
    processing: FxHashSet<ChunkKey>,
    /// Resident keys whose chunk changed since they were last dispatched
    changed: FxHashSet<ChunkKey>,
    spiral: Option<GridSpiral>,
    dimension: Option<DimensionId>,
    settings: RenderSettings,
    stop_requested: bool,
    dispatched_since_restart: usize,
    next_entry_id: u64,
    dispatches: u64,
    installs: u64,
    discards: u64,
    failures: u64,
}

impl SchedulerState {
    fn new(settings: RenderSettings) -> Self {
        Self {
            cache: ChunkCache::new(),
            processing: FxHashSet::default(),
            changed: FxHashSet::default(),
            spiral: None,
            dimension: None,
            settings,
            stop_requested: false,
            dispatched_since_restart: 0,
            next_entry_id: 0,
            dispatches: 0,
            installs: 0,
            discards: 0,
            failures: 0,
        }
    }

    /// Build a new spiral around the camera
    fn restart_spiral(&mut self) {
        let (cx, cz) = self.cache.camera_chunk();
        let radius = self.settings.load_distance();
        self.spiral = self
            .dimension
            .clone()
            .map(|dimension| GridSpiral::new(dimension, cx, cz, radius));
        self.dispatched_since_restart = 0;
    }

    /// Changed chunks first, then the spiral
    fn next_candidate(&mut self) -> Option<Candidate> {
        let mut found = None;
        let mut serviced = Vec::new();
        for key in &self.changed {
            if self.processing.contains(key) {
                continue;
            }
            match self.cache.get(key) {
                Some(entry) if entry.needs_mesh() => {
                    found = Some(key.clone());
                    break;
                }
                _ => serviced.push(key.clone()),
            }
        }
        for key in &serviced {
            self.changed.remove(key);
        }
        if let Some(key) = found {
            self.changed.remove(&key);
            return Some(Candidate::Resident(key));
        }

        while let Some(key) = self.spiral.as_mut().and_then(Iterator::next) {
            if self.processing.contains(&key) {
                continue;
            }
            match self.cache.get(&key) {
                Some(entry) if !entry.needs_mesh() => continue,
                Some(_) => return Some(Candidate::Resident(key)),
                None => return Some(Candidate::New(key)),
            }
        }
        None
    }

    fn is_wanted(&self, key: &ChunkKey) -> bool {
        let (cx, cz) = self.cache.camera_chunk();
        !self.stop_requested
            && self.dimension.as_ref() == Some(&key.dimension)
            && key.chebyshev_distance(cx, cz) <= u64::from(self.settings.unload_distance())
    }

    fn prune_changed(&mut self) {
        let cache = &self.cache;
        self.changed.retain(|key| cache.contains(key));
    }
}

#[derive(Default)]
struct GeometryListeners {
    next_id: AtomicU64,
    callbacks: Mutex<FxHashMap<u64, Arc<dyn Fn() + Send + Sync>>>,
}

impl GeometryListeners {
    fn subscribe(&self, callback: GeometryChangedCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().insert(id, Arc::from(callback));
        id
    }

    fn unsubscribe(&self, id: u64) {
        self.callbacks.lock().remove(&id);
    }

    fn notify(&self) {
        let callbacks: Vec<_> = self.callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// Shared by the facade, the manager thread and every worker job
pub(crate) struct Scheduler {
    state: Mutex<SchedulerState>,
    wake: Condvar,
    world: Arc<dyn WorldStore>,
    resource_pack: ResourcePackHandle,
    diagnostics: Arc<dyn DiagnosticSink>,
    results: Sender<MeshResult>,
    listeners: GeometryListeners,
    worker_count: usize,
    pool: rayon::ThreadPool,
}

impl Scheduler {
    pub(crate) fn new(
        world: Arc<dyn WorldStore>,
        resource_pack: ResourcePackHandle,
        diagnostics: Arc<dyn DiagnosticSink>,
        settings: RenderSettings,
        worker_count: usize,
    ) -> GeometryResult<(Arc<Self>, Receiver<MeshResult>)> {
        let worker_count = worker_count.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|idx| format!("chunk-mesher-{}", idx))
            .build()
            .map_err(|e| GeometryError::WorkerPool {
                message: e.to_string(),
            })?;
        let (results, receiver) = unbounded();

        log::debug!("[Scheduler::new] Created worker pool with {} threads", worker_count);

        let scheduler = Arc::new(Self {
            state: Mutex::new(SchedulerState::new(settings)),
            wake: Condvar::new(),
            world,
            resource_pack,
            diagnostics,
            results,
            listeners: GeometryListeners::default(),
            worker_count,
            pool,
        });
        Ok((scheduler, receiver))
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub(crate) fn resource_pack(&self) -> &ResourcePackHandle {
        &self.resource_pack
    }

    /// Spawn the manager thread
    pub(crate) fn start(self: &Arc<Self>) -> GeometryResult<JoinHandle<()>> {
        {
            let mut state = self.state.lock();
            state.stop_requested = false;
            state.restart_spiral();
        }
        let scheduler = Arc::clone(self);
        let name = MANAGER_THREAD_NAME.to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || scheduler.run_manager())
            .map_err(|source| GeometryError::ThreadSpawn { name, source })
    }

    /// Ask the manager to exit at its next check point
    pub(crate) fn request_stop(&self) {
        self.state.lock().stop_requested = true;
        self.wake.notify_all();
    }

    /// Block until no job is in flight
    pub(crate) fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.processing.is_empty() {
            self.wake.wait(&mut state);
        }
    }

    fn run_manager(self: Arc<Self>) {
        log::info!(
            "[Scheduler::run_manager] Manager started with {} workers",
            self.worker_count
        );

        let mut state = self.state.lock();
        while !state.stop_requested && !self.resource_pack.is_loaded() {
            log::debug!("[Scheduler::run_manager] Waiting for resource pack");
            self.wake.wait(&mut state);
        }

        while !state.stop_requested {
            if state.processing.len() >= self.worker_count {
                self.wake.wait(&mut state);
                continue;
            }
            match state.next_candidate() {
                Some(Candidate::Resident(key)) => self.dispatch(&mut state, key),
                Some(Candidate::New(key)) => self.admit(&mut state, key),
                None => self.wake.wait(&mut state),
            }
        }
        drop(state);

        log::info!("[Scheduler::run_manager] Manager stopped");
    }

    /// Create the entry for a key seen for the first time, then dispatch it
    fn admit(self: &Arc<Self>, state: &mut MutexGuard<'_, SchedulerState>, key: ChunkKey) {
        let entry_id = state.next_entry_id;
        state.next_entry_id += 1;
        state.processing.insert(key.clone());

        let subscription = MutexGuard::unlocked(state, || self.subscribe_chunk(&key, entry_id));

        if !state.is_wanted(&key) {
            state.processing.remove(&key);
            self.wake.notify_all();
            MutexGuard::unlocked(state, move || drop(subscription));
            return;
        }

        let entry = ChunkEntry::new(entry_id, &key, subscription);
        if let Some(replaced) = state.cache.upsert(key.clone(), entry) {
            MutexGuard::unlocked(state, move || drop(replaced));
        }
        self.dispatch(state, key);
    }

    fn subscribe_chunk(self: &Arc<Self>, key: &ChunkKey, entry_id: u64) -> Subscription {
        let handle = self.world.chunk_handle(&key.dimension, key.cx, key.cz);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let changed_key = key.clone();
        Subscription::new(
            handle,
            Box::new(move || {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.chunk_changed(&changed_key, entry_id);
                }
            }),
        )
    }

    fn chunk_changed(&self, key: &ChunkKey, entry_id: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.cache.get_mut(key) {
            Some(entry) if entry.entry_id == entry_id => {
                entry.chunk_version += 1;
                state.changed.insert(key.clone());
            }
            _ => return,
        }
        drop(guard);
        self.wake.notify_all();
    }

    /// Queue a meshing job for a resident key. Caller holds the lock.
    fn dispatch(self: &Arc<Self>, state: &mut SchedulerState, key: ChunkKey) {
        let (entry_id, version) = match state.cache.get(&key) {
            Some(entry) => (entry.entry_id, entry.chunk_version),
            None => {
                state.processing.remove(&key);
                return;
            }
        };
        let Some(resource_pack) = self.resource_pack.current() else {
            state.processing.remove(&key);
            return;
        };

        state.processing.insert(key.clone());
        state.dispatches += 1;
        state.dispatched_since_restart += 1;
        if state.dispatched_since_restart >= self.worker_count {
            state.restart_spiral();
        }

        log::trace!("[Scheduler::dispatch] Meshing {} at version {}", key, version);

        let job = MeshJob {
            key,
            entry_id,
            version,
            resource_pack,
        };
        let scheduler = Arc::clone(self);
        self.pool.spawn(move || scheduler.run_job(job));
    }

    fn run_job(&self, job: MeshJob) {
        let MeshJob {
            key,
            entry_id,
            version,
            resource_pack,
        } = job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            mesh_chunk(self.world.as_ref(), &resource_pack, &key)
        }));
        drop(resource_pack);

        let mut queued = false;
        let mut orphaned = false;
        let mut failure = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .cache
                .get_mut(&key)
                .filter(|entry| entry.entry_id == entry_id);

            match (outcome, entry) {
                (Ok(mesh), Some(entry)) => {
                    entry.pending_version = entry.pending_version.max(Some(version));
                    entry.failed_version = None;
                    queued = self
                        .results
                        .send(MeshResult {
                            key: key.clone(),
                            entry_id,
                            version,
                            mesh,
                        })
                        .is_ok();
                }
                (Ok(_), None) => {
                    state.discards += 1;
                    orphaned = true;
                    log::debug!("[Scheduler::run_job] Discarding mesh for evicted chunk {}", key);
                }
                (Err(payload), Some(entry)) => {
                    state.failures += 1;
                    // One immediate retry per chunk version
                    if entry.failed_version != Some(version) {
                        entry.failed_version = Some(version);
                        state.changed.insert(key.clone());
                    }
                    failure = Some(payload);
                }
                (Err(payload), None) => {
                    state.failures += 1;
                    orphaned = true;
                    failure = Some(payload);
                }
            }

            state.processing.remove(&key);
            // The spiral skipped this key while it was in flight. If the camera
            // came back for it, walk the spiral again so it is admitted anew.
            if orphaned && !state.cache.contains(&key) && state.is_wanted(&key) {
                log::debug!("[Scheduler::run_job] Chunk {} is wanted again, restarting spiral", key);
                state.restart_spiral();
            }
        }
        self.wake.notify_all();

        if let Some(payload) = failure {
            log::error!(
                "[Scheduler::run_job] Meshing chunk {} panicked: {}",
                key,
                panic_message(payload.as_ref())
            );
            self.diagnostics.report(DiagnosticReport::from_panic(
                "Chunk meshing failed",
                &format!("Chunk {}", key),
                payload.as_ref(),
            ));
        }
        if queued {
            self.listeners.notify();
        }
    }

    /// Mark every resident chunk changed so it is meshed against the new pack
    pub(crate) fn resource_pack_changed(&self) {
        let count = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for (key, entry) in state.cache.iter_mut() {
                entry.chunk_version += 1;
                state.changed.insert(key.clone());
            }
            state.cache.len()
        };
        log::debug!(
            "[Scheduler::resource_pack_changed] Re-meshing {} chunks for new resource pack",
            count
        );
        self.wake.notify_all();
        self.listeners.notify();
    }

    /// Switch dimension. Returns every evicted entry, or `None` when unchanged.
    pub(crate) fn set_dimension(&self, dimension: DimensionId) -> Option<Vec<(ChunkKey, ChunkEntry)>> {
        let evicted = {
            let mut state = self.state.lock();
            if state.dimension.as_ref() == Some(&dimension) {
                return None;
            }
            state.dimension = Some(dimension);
            state.changed.clear();
            let evicted = state.cache.drain();
            state.restart_spiral();
            evicted
        };
        self.wake.notify_all();
        Some(evicted)
    }

    /// Move the camera. Returns the entries beyond the unload distance, or
    /// `None` when the camera did not move.
    pub(crate) fn set_location(&self, cx: i64, cz: i64) -> Option<Vec<(ChunkKey, ChunkEntry)>> {
        let evicted = {
            let mut state = self.state.lock();
            if state.cache.camera_chunk() == (cx, cz) {
                return None;
            }
            state.cache.set_camera_chunk(cx, cz);
            let unload = state.settings.unload_distance();
            let evicted = state.cache.remove_beyond(unload);
            state.prune_changed();
            state.restart_spiral();
            evicted
        };
        self.wake.notify_all();
        Some(evicted)
    }

    /// Apply new render distances. Returns the entries beyond the new unload distance.
    pub(crate) fn apply_settings(&self, settings: RenderSettings) -> Vec<(ChunkKey, ChunkEntry)> {
        let evicted = {
            let mut state = self.state.lock();
            state.settings = settings;
            let evicted = state.cache.remove_beyond(settings.unload_distance());
            state.prune_changed();
            state.restart_spiral();
            evicted
        };
        self.wake.notify_all();
        evicted
    }

    /// Remove every entry
    pub(crate) fn clear(&self) -> Vec<(ChunkKey, ChunkEntry)> {
        let mut state = self.state.lock();
        state.changed.clear();
        let evicted = state.cache.drain();
        state.restart_spiral();
        evicted
    }

    /// Whether a result may replace the installed geometry. Counts a discard if not.
    ///
    /// Nothing is recorded; call [`commit`](Self::commit) once the result is uploaded.
    pub(crate) fn accepts(&self, result: &MeshResult) -> bool {
        let mut state = self.state.lock();
        let wanted = state
            .cache
            .get(&result.key)
            .map_or(false, |entry| entry.accepts(result.entry_id, result.version));
        if !wanted {
            state.discards += 1;
        }
        wanted
    }

    /// Record an uploaded result as installed. Returns false if it was
    /// superseded since [`accepts`](Self::accepts).
    pub(crate) fn commit(&self, result: &MeshResult) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.cache.get_mut(&result.key) {
            Some(entry) if entry.accepts(result.entry_id, result.version) => {
                entry.mesh_version = Some(result.version);
                if entry.pending_version <= Some(result.version) {
                    entry.pending_version = None;
                }
                state.installs += 1;
                true
            }
            _ => {
                state.discards += 1;
                false
            }
        }
    }

    /// The render thread could not upload a result. Mesh the chunk again.
    pub(crate) fn upload_failed(&self, result: &MeshResult) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.cache.get_mut(&result.key) {
                Some(entry) if entry.entry_id == result.entry_id => {
                    if entry.pending_version == Some(result.version) {
                        entry.pending_version = None;
                    }
                    state.changed.insert(result.key.clone());
                }
                _ => return,
            }
        }
        self.wake.notify_all();
    }

    /// Model transforms of every resident chunk, nearest first
    pub(crate) fn draw_order(&self) -> Vec<(ChunkKey, Matrix4<f32>)> {
        self.state
            .lock()
            .cache
            .iter()
            .map(|(key, entry)| (key.clone(), entry.model_transform))
            .collect()
    }

    pub(crate) fn chunk_status(&self, key: &ChunkKey) -> Option<ChunkStatus> {
        self.state.lock().cache.get(key).map(|entry| ChunkStatus {
            chunk_version: entry.chunk_version,
            mesh_version: entry.mesh_version,
            pending_version: entry.pending_version,
        })
    }

    pub(crate) fn resident_keys(&self) -> Vec<ChunkKey> {
        self.state.lock().cache.keys().cloned().collect()
    }

    pub(crate) fn camera_chunk(&self) -> (i64, i64) {
        self.state.lock().cache.camera_chunk()
    }

    pub(crate) fn dimension(&self) -> Option<DimensionId> {
        self.state.lock().dimension.clone()
    }

    pub(crate) fn settings(&self) -> RenderSettings {
        self.state.lock().settings
    }

    pub(crate) fn stats(&self) -> GeometryStats {
        let state = self.state.lock();
        GeometryStats {
            resident: state.cache.len(),
            with_geometry: 0,
            processing: state.processing.len(),
            changed: state.changed.len(),
            dispatches: state.dispatches,
            installs: state.installs,
            discards: state.discards,
            failures: state.failures,
        }
    }

    pub(crate) fn subscribe_geometry_changed(&self, callback: GeometryChangedCallback) -> u64 {
        self.listeners.subscribe(callback)
    }

    pub(crate) fn unsubscribe_geometry_changed(&self, id: u64) {
        self.listeners.unsubscribe(id);
    }

    /// Fire the geometry changed callbacks
    pub(crate) fn notify_geometry_changed(&self) {
        self.listeners.notify();
    }
}
