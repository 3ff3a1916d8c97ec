//! Resource packs
//!
//! A [`ResourcePack`] is an immutable bundle of a [`TextureAtlas`] and the
//! block models that reference it. It is read concurrently by every meshing
//! worker. Reloading builds a new pack and swaps it into the
//! [`ResourcePackHandle`]; jobs already holding the old `Arc` finish against it.

mod atlas;
mod block_mesh;

pub use atlas::{
    builtin_textures, TextureAtlas, TextureBounds, CHUNK_GRID_ERROR, CHUNK_GRID_NULL,
    MAX_ATLAS_SIZE, MISSING_TEXTURE,
};
pub use block_mesh::{
    BlockMesh, BlockMeshPart, BlockModelDef, CubeTextures, CullDirection, MeshTriangle,
    MeshVertex, ModelShape, Transparency,
};

use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::UNIX_EPOCH;

use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};
use serde::Deserialize;

use crate::error::{resource_pack_error, GeometryError, GeometryResult};
use crate::world::Block;

/// Name of the block model file at the root of a pack directory
pub const BLOCK_MODELS_FILE: &str = "blocks.toml";
/// Directory under the pack root holding the PNG textures
pub const TEXTURES_DIR: &str = "textures";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PackManifest {
    name: Option<String>,
    blocks: BTreeMap<String, BlockModelDef>,
}

/// Textures and block models used to mesh chunks
pub struct ResourcePack {
    name: String,
    atlas: TextureAtlas,
    definitions: FxHashMap<String, BlockModelDef>,
    /// Models resolved so far, filled on first use
    models: RwLock<FxHashMap<Block, Arc<BlockMesh>>>,
    missing_model: Arc<BlockMesh>,
    air_model: Arc<BlockMesh>,
}

impl ResourcePack {
    pub fn new(
        name: impl Into<String>,
        atlas: TextureAtlas,
        definitions: impl IntoIterator<Item = (String, BlockModelDef)>,
    ) -> Self {
        Self {
            name: name.into(),
            atlas,
            definitions: definitions.into_iter().collect(),
            models: RwLock::new(FxHashMap::default()),
            missing_model: Arc::new(BlockMesh::cube(
                CubeTextures::all(MISSING_TEXTURE),
                Transparency::FullOpaque,
            )),
            air_model: Arc::new(BlockMesh::air()),
        }
    }

    /// Pack the given textures and use the given block definitions
    pub fn from_textures(
        name: impl Into<String>,
        textures: Vec<(String, RgbaImage)>,
        definitions: impl IntoIterator<Item = (String, BlockModelDef)>,
    ) -> GeometryResult<Self> {
        Ok(Self::new(name, TextureAtlas::pack(textures)?, definitions))
    }

    /// A pack with only the built in textures. Every solid block draws as missing.
    pub fn builtin() -> GeometryResult<Self> {
        Ok(Self::new("builtin", TextureAtlas::builtin()?, Vec::new()))
    }

    /// Load a pack directory.
    ///
    /// Textures are every PNG under `textures/`, addressed by their relative
    /// path without extension. Block models come from `blocks.toml` if present.
    /// With a `cache_dir` the packed atlas is reused while no file in the pack
    /// is newer than the cached one.
    pub fn load_dir(dir: &Path, cache_dir: Option<&Path>) -> GeometryResult<Self> {
        if !dir.is_dir() {
            return Err(resource_pack_error(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let manifest_path = dir.join(BLOCK_MODELS_FILE);
        let manifest: PackManifest = if manifest_path.exists() {
            toml::from_str(&fs::read_to_string(&manifest_path)?)?
        } else {
            PackManifest::default()
        };
        let name = manifest.name.clone().unwrap_or_else(|| {
            dir.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "resource_pack".to_string())
        });

        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        let mod_time = newest_mod_time(&files)?;

        let cached = match cache_dir {
            Some(cache_dir) => {
                TextureAtlas::load_cache(cache_dir, &cache_id(dir), mod_time).unwrap_or_else(|e| {
                    log::warn!(
                        "[ResourcePack::load_dir] Ignoring unreadable atlas cache: {}",
                        e
                    );
                    None
                })
            }
            None => None,
        };

        let atlas = match cached {
            Some(atlas) => {
                log::info!("[ResourcePack::load_dir] Using cached atlas for {}", name);
                atlas
            }
            None => {
                let atlas = TextureAtlas::pack(read_textures(&dir.join(TEXTURES_DIR), &files)?)?;
                if let Some(cache_dir) = cache_dir {
                    if let Err(e) = atlas.save_cache(cache_dir, &cache_id(dir), mod_time) {
                        log::warn!("[ResourcePack::load_dir] Could not cache atlas: {}", e);
                    }
                }
                atlas
            }
        };

        log::info!(
            "[ResourcePack::load_dir] Loaded {} with {} textures and {} block models",
            name,
            atlas.len(),
            manifest.blocks.len()
        );
        Ok(Self::new(name, atlas, manifest.blocks))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn atlas(&self) -> &TextureAtlas {
        &self.atlas
    }

    /// UV bounds of a texture in the atlas. Unknown textures map to `missing`.
    pub fn texture_bounds(&self, texture_path: &str) -> TextureBounds {
        self.atlas.texture_bounds(texture_path)
    }

    /// Model for a block.
    ///
    /// Resolution order: air, an explicit definition, a cube of
    /// `block/<base_name>` if that texture exists, the missing block.
    pub fn block_model(&self, block: &Block) -> Arc<BlockMesh> {
        if let Some(model) = self.models.read().get(block) {
            return model.clone();
        }

        let model = self.resolve_model(block);
        self.models
            .write()
            .entry(block.clone())
            .or_insert(model)
            .clone()
    }

    /// Model drawn for blocks that cannot be resolved
    pub fn missing_model(&self) -> Arc<BlockMesh> {
        self.missing_model.clone()
    }

    fn resolve_model(&self, block: &Block) -> Arc<BlockMesh> {
        if block.is_air() {
            return self.air_model.clone();
        }
        if let Some(definition) = self.definitions.get(&block.id()) {
            return Arc::new(definition.to_mesh(MISSING_TEXTURE));
        }
        let texture = format!("block/{}", block.base_name);
        if self.atlas.contains(&texture) {
            return Arc::new(BlockMesh::cube(
                CubeTextures::all(texture),
                Transparency::FullOpaque,
            ));
        }
        log::debug!("[ResourcePack::block_model] No model for {}", block);
        self.missing_model.clone()
    }
}

impl std::fmt::Debug for ResourcePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePack")
            .field("name", &self.name)
            .field("atlas", &self.atlas)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> GeometryResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Newest modification time of any file, in nanoseconds since the epoch
fn newest_mod_time(files: &[PathBuf]) -> GeometryResult<u64> {
    let mut newest = 0;
    for path in files {
        let modified = fs::metadata(path)?.modified()?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        newest = newest.max(nanos);
    }
    Ok(newest)
}

fn cache_id(dir: &Path) -> String {
    let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let mut hasher = FxHasher::default();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn read_textures(textures_dir: &Path, files: &[PathBuf]) -> GeometryResult<Vec<(String, RgbaImage)>> {
    let mut textures = Vec::new();
    for path in files {
        let Ok(relative) = path.strip_prefix(textures_dir) else {
            continue;
        };
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let texture_path = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let image = image::open(path)
            .map_err(|e| resource_pack_error(format!("Failed to load {}: {}", path.display(), e)))?
            .to_rgba8();
        textures.push((texture_path, image));
    }
    Ok(textures)
}

/// Callback fired after the current pack is replaced
pub type PackChangedCallback = Box<dyn Fn() + Send + Sync>;

struct PackState {
    pack: Option<Arc<ResourcePack>>,
    generation: u64,
}

struct HandleShared {
    state: RwLock<PackState>,
    load_requests: AtomicU64,
    next_subscription: AtomicU64,
    subscribers: Mutex<FxHashMap<u64, Arc<dyn Fn() + Send + Sync>>>,
}

/// Shared, cloneable access to the current resource pack
///
/// The generation starts at 0 and increases every time a pack is set.
#[derive(Clone)]
pub struct ResourcePackHandle {
    shared: Arc<HandleShared>,
}

impl ResourcePackHandle {
    /// A handle with no pack loaded
    pub fn new() -> Self {
        Self {
            shared: Arc::new(HandleShared {
                state: RwLock::new(PackState {
                    pack: None,
                    generation: 0,
                }),
                load_requests: AtomicU64::new(0),
                next_subscription: AtomicU64::new(0),
                subscribers: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn with_pack(pack: ResourcePack) -> Self {
        let handle = Self::new();
        handle.set(pack);
        handle
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.state.read().pack.is_some()
    }

    pub fn current(&self) -> Option<Arc<ResourcePack>> {
        self.shared.state.read().pack.clone()
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.read().generation
    }

    /// Current pack together with its generation, read atomically
    pub fn current_with_generation(&self) -> Option<(u64, Arc<ResourcePack>)> {
        let state = self.shared.state.read();
        state.pack.clone().map(|pack| (state.generation, pack))
    }

    /// Swap in a new pack and notify subscribers. Returns the new generation.
    pub fn set(&self, pack: ResourcePack) -> u64 {
        let generation = {
            let mut state = self.shared.state.write();
            state.pack = Some(Arc::new(pack));
            state.generation += 1;
            state.generation
        };
        log::info!("[ResourcePackHandle::set] Resource pack generation {}", generation);

        let callbacks: Vec<_> = self.shared.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
        generation
    }

    pub fn subscribe_changed(&self, callback: PackChangedCallback) -> u64 {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().insert(id, Arc::from(callback));
        id
    }

    pub fn unsubscribe_changed(&self, id: u64) {
        self.shared.subscribers.lock().remove(&id);
    }

    /// Load a pack directory on a background thread and set it when done.
    ///
    /// If another load is requested before this one finishes, this result is
    /// dropped so the most recent request wins.
    pub fn load_async(
        &self,
        dir: impl Into<PathBuf>,
        cache_dir: Option<PathBuf>,
    ) -> GeometryResult<JoinHandle<GeometryResult<u64>>> {
        let dir = dir.into();
        let request = self.shared.load_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = self.clone();
        let name = "resource-pack-loader".to_string();

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                log::debug!("[ResourcePackHandle::load_async] Loading {}", dir.display());
                let pack = ResourcePack::load_dir(&dir, cache_dir.as_deref()).map_err(|e| {
                    log::error!(
                        "[ResourcePackHandle::load_async] Failed to load {}: {}",
                        dir.display(),
                        e
                    );
                    e
                })?;
                if handle.shared.load_requests.load(Ordering::SeqCst) != request {
                    log::debug!(
                        "[ResourcePackHandle::load_async] Discarding superseded load of {}",
                        dir.display()
                    );
                    return Ok(handle.generation());
                }
                Ok(handle.set(pack))
            })
            .map_err(|source| GeometryError::ThreadSpawn { name, source })
    }
}

impl Default for ResourcePackHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourcePackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ResourcePackHandle")
            .field("loaded", &state.pack.is_some())
            .field("generation", &state.generation)
            .finish()
    }
}
