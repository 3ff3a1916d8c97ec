use std::cmp::Ordering;

use cgmath::Matrix4;
use rustc_hash::FxHashMap;

use crate::world::{ChunkKey, Subscription};

/// Per chunk bookkeeping held by the scheduler.
///
/// GPU objects are not stored here; they belong to the render thread.
#[derive(Debug)]
pub struct ChunkEntry {
    /// Unique per entry, so results meshed for an evicted entry are never
    /// installed into a later entry for the same key
    pub entry_id: u64,
    /// Kept for the lifetime of the entry; unsubscribes when dropped
    pub subscription: Subscription,
    pub model_transform: Matrix4<f32>,
    /// Incremented every time the world reports the chunk changed
    pub chunk_version: u64,
    /// Version meshed into the installed geometry
    pub mesh_version: Option<u64>,
    /// Version meshed and queued for the render thread but not yet installed
    pub pending_version: Option<u64>,
    /// Version whose meshing job last panicked, retried once straight away
    pub failed_version: Option<u64>,
}

impl ChunkEntry {
    pub fn new(entry_id: u64, key: &ChunkKey, subscription: Subscription) -> Self {
        Self {
            entry_id,
            subscription,
            model_transform: key.model_transform(),
            chunk_version: 0,
            mesh_version: None,
            pending_version: None,
            failed_version: None,
        }
    }

    /// Newest version that is installed or on its way to being installed
    pub fn latest_meshed(&self) -> Option<u64> {
        self.mesh_version.max(self.pending_version)
    }

    /// Whether the current chunk version still has to be meshed
    pub fn needs_mesh(&self) -> bool {
        self.latest_meshed() != Some(self.chunk_version)
    }

    /// Whether a mesh of `version` built for entry `entry_id` is newer than
    /// the installed one
    pub fn accepts(&self, entry_id: u64, version: u64) -> bool {
        self.entry_id == entry_id && self.mesh_version.map_or(true, |installed| version > installed)
    }
}

/// Map of resident chunks that also keeps its keys ordered nearest first to
/// the camera chunk by Manhattan distance, ties broken by key.
#[derive(Debug)]
pub struct ChunkCache<V> {
    entries: FxHashMap<ChunkKey, V>,
    order: Vec<ChunkKey>,
    camera: (i64, i64),
}

impl<V> ChunkCache<V> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            order: Vec::new(),
            camera: (0, 0),
        }
    }

    fn compare(camera: (i64, i64), a: &ChunkKey, b: &ChunkKey) -> Ordering {
        a.manhattan_distance(camera.0, camera.1)
            .cmp(&b.manhattan_distance(camera.0, camera.1))
            .then_with(|| a.cmp(b))
    }

    pub fn camera_chunk(&self) -> (i64, i64) {
        self.camera
    }

    /// Move the camera and reorder every key
    pub fn set_camera_chunk(&mut self, cx: i64, cz: i64) {
        self.camera = (cx, cz);
        let camera = self.camera;
        self.order.sort_by(|a, b| Self::compare(camera, a, b));
    }

    /// Insert or replace. Returns the previous value for the key.
    pub fn upsert(&mut self, key: ChunkKey, value: V) -> Option<V> {
        if let Some(existing) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(existing, value));
        }
        let camera = self.camera;
        let index = self
            .order
            .partition_point(|other| Self::compare(camera, other, &key) == Ordering::Less);
        self.order.insert(index, key.clone());
        self.entries.insert(key, value);
        None
    }

    pub fn remove(&mut self, key: &ChunkKey) -> Option<V> {
        let value = self.entries.remove(key)?;
        let camera = self.camera;
        match self
            .order
            .binary_search_by(|other| Self::compare(camera, other, key))
        {
            Ok(index) => {
                self.order.remove(index);
            }
            Err(_) => self.order.retain(|other| other != key),
        }
        Some(value)
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ChunkKey) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys nearest first
    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.order.iter()
    }

    /// Entries nearest first
    pub fn iter(&self) -> impl Iterator<Item = (&ChunkKey, &V)> {
        self.order
            .iter()
            .filter_map(move |key| self.entries.get(key).map(|value| (key, value)))
    }

    /// Entries in no particular order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ChunkKey, &mut V)> {
        self.entries.iter_mut()
    }

    /// Remove every entry whose Chebyshev distance to the camera is greater
    /// than `distance`
    pub fn remove_beyond(&mut self, distance: u32) -> Vec<(ChunkKey, V)> {
        let (cx, cz) = self.camera;
        let far: Vec<ChunkKey> = self
            .order
            .iter()
            .filter(|key| key.chebyshev_distance(cx, cz) > u64::from(distance))
            .cloned()
            .collect();
        if far.is_empty() {
            return Vec::new();
        }
        self.order
            .retain(|key| key.chebyshev_distance(cx, cz) <= u64::from(distance));
        far.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Remove everything
    pub fn drain(&mut self) -> Vec<(ChunkKey, V)> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|value| (key, value)))
            .collect()
    }
}

impl<V> Default for ChunkCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
