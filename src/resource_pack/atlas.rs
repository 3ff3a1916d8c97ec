//! Texture atlas packing
//!
//! Every texture of a pack is packed into one square power of two image so a
//! single draw call can sample any of them. Each texture is addressed by its
//! UV bounds `[u0, v0, u1, v1]` in the atlas.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{resource_pack_error, GeometryResult};

/// Texture used wherever a requested texture does not exist
pub const MISSING_TEXTURE: &str = "missing";
/// Placeholder texture drawn for chunks that do not exist
pub const CHUNK_GRID_NULL: &str = "ui/chunk_grid_null";
/// Placeholder texture drawn for chunks that failed to load
pub const CHUNK_GRID_ERROR: &str = "ui/chunk_grid_error";

/// Largest atlas edge that will be attempted
pub const MAX_ATLAS_SIZE: u32 = 16384;

const BUILTIN_TILE: u32 = 16;

/// `[u0, v0, u1, v1]` in normalised atlas coordinates
pub type TextureBounds = [f32; 4];

/// Region of the atlas that is either free or split around one placed tile
struct PackRegion {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    occupied: bool,
    children: Option<(usize, usize)>,
}

/// Guillotine packer. Placing a tile splits its region into the strip below
/// it and the strip to its right.
struct Packer {
    regions: Vec<PackRegion>,
}

impl Packer {
    fn new(size: u32) -> Self {
        Self {
            regions: vec![PackRegion {
                x: 0,
                y: 0,
                width: size,
                height: size,
                occupied: false,
                children: None,
            }],
        }
    }

    fn pack(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            let region = &self.regions[index];
            if region.occupied {
                if let Some((below, right)) = region.children {
                    // Search the strip below first
                    stack.push(right);
                    stack.push(below);
                }
                continue;
            }
            if width > region.width || height > region.height {
                continue;
            }

            let (x, y, region_width, region_height) =
                (region.x, region.y, region.width, region.height);
            let below = self.regions.len();
            self.regions.push(PackRegion {
                x,
                y: y + height,
                width,
                height: region_height - height,
                occupied: false,
                children: None,
            });
            self.regions.push(PackRegion {
                x: x + width,
                y,
                width: region_width - width,
                height: region_height,
                occupied: false,
                children: None,
            });
            let region = &mut self.regions[index];
            region.occupied = true;
            region.children = Some((below, below + 1));
            return Some((x, y));
        }
        None
    }
}

/// A packed atlas image plus the bounds of every texture in it
#[derive(Clone)]
pub struct TextureAtlas {
    image: RgbaImage,
    bounds: FxHashMap<String, TextureBounds>,
}

#[derive(Serialize, Deserialize)]
struct AtlasCacheFile {
    mod_time: u64,
    bounds: BTreeMap<String, TextureBounds>,
}

impl TextureAtlas {
    /// Pack `textures` together with the built in textures.
    ///
    /// A texture taller than it is wide is treated as a vertical strip of
    /// animation frames and only its first square frame is addressed.
    pub fn pack(textures: Vec<(String, RgbaImage)>) -> GeometryResult<Self> {
        let builtins: Vec<(String, RgbaImage)> = builtin_textures()
            .into_iter()
            .filter(|(path, _)| !textures.iter().any(|(other, _)| other == path))
            .collect();
        let mut textures: Vec<(String, RgbaImage)> = builtins.into_iter().chain(textures).collect();

        // Largest perimeter first, path as tie break so packing is deterministic
        textures.sort_by(|(a_path, a), (b_path, b)| {
            (b.width() + b.height())
                .cmp(&(a.width() + a.height()))
                .then_with(|| a_path.cmp(b_path))
        });

        let max_edge = textures
            .iter()
            .map(|(_, image)| image.width().max(image.height()))
            .max()
            .unwrap_or(1);
        let pixels: u64 = textures
            .iter()
            .map(|(_, image)| u64::from(image.width()) * u64::from(image.height()))
            .sum();
        let mut size = ((pixels as f64).sqrt().ceil() as u32)
            .next_power_of_two()
            .max(max_edge.next_power_of_two());

        let placements = loop {
            if size > MAX_ATLAS_SIZE {
                return Err(resource_pack_error(format!(
                    "{} textures do not fit in a {}x{} atlas",
                    textures.len(),
                    MAX_ATLAS_SIZE,
                    MAX_ATLAS_SIZE
                )));
            }
            log::debug!("[TextureAtlas::pack] Trying {}x{}", size, size);
            let mut packer = Packer::new(size);
            let placements: Option<Vec<(u32, u32)>> = textures
                .iter()
                .map(|(_, image)| packer.pack(image.width(), image.height()))
                .collect();
            match placements {
                Some(placements) => break placements,
                None => size *= 2,
            }
        };

        let mut image = RgbaImage::new(size, size);
        let mut bounds = FxHashMap::default();
        let scale = size as f32;
        for ((path, texture), (x, y)) in textures.into_iter().zip(placements) {
            image::imageops::replace(&mut image, &texture, i64::from(x), i64::from(y));
            let frame_height = texture.height().min(texture.width());
            bounds.insert(
                path,
                [
                    x as f32 / scale,
                    y as f32 / scale,
                    (x + texture.width()) as f32 / scale,
                    (y + frame_height) as f32 / scale,
                ],
            );
        }

        log::info!(
            "[TextureAtlas::pack] Packed {} textures into {}x{}",
            bounds.len(),
            size,
            size
        );
        Ok(Self { image, bounds })
    }

    /// An atlas holding only the built in textures
    pub fn builtin() -> GeometryResult<Self> {
        Self::pack(Vec::new())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn contains(&self, texture_path: &str) -> bool {
        self.bounds.contains_key(texture_path)
    }

    /// Bounds of a texture, or of the missing texture if it is not in the atlas
    pub fn texture_bounds(&self, texture_path: &str) -> TextureBounds {
        self.bounds
            .get(texture_path)
            .or_else(|| self.bounds.get(MISSING_TEXTURE))
            .copied()
            .unwrap_or([0.0, 0.0, 1.0, 1.0])
    }

    fn cache_paths(cache_dir: &Path, cache_id: &str) -> (PathBuf, PathBuf) {
        (
            cache_dir.join(format!("{}.png", cache_id)),
            cache_dir.join(format!("{}.json", cache_id)),
        )
    }

    /// Write `<cache_id>.png` and `<cache_id>.json` into `cache_dir`
    pub fn save_cache(&self, cache_dir: &Path, cache_id: &str, mod_time: u64) -> GeometryResult<()> {
        fs::create_dir_all(cache_dir)?;
        let (image_path, bounds_path) = Self::cache_paths(cache_dir, cache_id);
        self.image.save(&image_path)?;
        let file = AtlasCacheFile {
            mod_time,
            bounds: self
                .bounds
                .iter()
                .map(|(path, bounds)| (path.clone(), *bounds))
                .collect(),
        };
        fs::write(&bounds_path, serde_json::to_string(&file)?)?;
        log::debug!(
            "[TextureAtlas::save_cache] Cached atlas at {}",
            image_path.display()
        );
        Ok(())
    }

    /// Load a cached atlas. Returns `Ok(None)` if there is no cache entry or it
    /// was built from textures with a different modification time.
    pub fn load_cache(cache_dir: &Path, cache_id: &str, mod_time: u64) -> GeometryResult<Option<Self>> {
        let (image_path, bounds_path) = Self::cache_paths(cache_dir, cache_id);
        if !bounds_path.exists() || !image_path.exists() {
            return Ok(None);
        }

        let file: AtlasCacheFile = serde_json::from_str(&fs::read_to_string(&bounds_path)?)?;
        if file.mod_time != mod_time {
            log::debug!(
                "[TextureAtlas::load_cache] Textures changed since {} was cached",
                bounds_path.display()
            );
            return Ok(None);
        }

        let image = image::open(&image_path)?.to_rgba8();
        Ok(Some(Self {
            image,
            bounds: file.bounds.into_iter().collect(),
        }))
    }
}

impl std::fmt::Debug for TextureAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureAtlas")
            .field("size", &self.size())
            .field("textures", &self.bounds.len())
            .finish()
    }
}

/// Procedural textures every atlas contains
pub fn builtin_textures() -> Vec<(String, RgbaImage)> {
    let missing = RgbaImage::from_fn(BUILTIN_TILE, BUILTIN_TILE, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgba([248, 0, 248, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    vec![
        (MISSING_TEXTURE.to_string(), missing),
        (
            CHUNK_GRID_NULL.to_string(),
            grid_texture(Rgba([96, 96, 96, 255]), Rgba([160, 160, 160, 96])),
        ),
        (
            CHUNK_GRID_ERROR.to_string(),
            grid_texture(Rgba([160, 24, 24, 255]), Rgba([220, 64, 64, 128])),
        ),
    ]
}

/// One block cell with a solid border line
fn grid_texture(line: Rgba<u8>, fill: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_fn(BUILTIN_TILE, BUILTIN_TILE, |x, y| {
        if x == 0 || y == 0 || x == BUILTIN_TILE - 1 || y == BUILTIN_TILE - 1 {
            line
        } else {
            fill
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    fn overlaps(a: TextureBounds, b: TextureBounds) -> bool {
        a[0] < b[2] && b[0] < a[2] && a[1] < b[3] && b[1] < a[3]
    }

    #[test]
    fn test_builtin_textures_always_present() {
        let atlas = TextureAtlas::builtin().unwrap();
        assert!(atlas.contains(MISSING_TEXTURE));
        assert!(atlas.contains(CHUNK_GRID_NULL));
        assert!(atlas.contains(CHUNK_GRID_ERROR));
        assert_eq!(atlas.size(), 32);
    }

    #[test]
    fn test_unknown_texture_uses_missing_bounds() {
        let atlas = TextureAtlas::builtin().unwrap();
        assert_eq!(
            atlas.texture_bounds("block/does_not_exist"),
            atlas.texture_bounds(MISSING_TEXTURE)
        );
    }

    #[test]
    fn test_packed_textures_do_not_overlap() {
        let textures = (0..20)
            .map(|i| (format!("block/{}", i), solid(16, 16, i as u8)))
            .chain(std::iter::once(("block/big".to_string(), solid(32, 32, 200))))
            .collect();
        let atlas = TextureAtlas::pack(textures).unwrap();
        assert!(atlas.size().is_power_of_two());
        assert_eq!(atlas.len(), 24);

        let all: Vec<_> = atlas.bounds.values().copied().collect();
        for (i, a) in all.iter().enumerate() {
            assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
            for b in &all[i + 1..] {
                assert!(!overlaps(*a, *b), "{:?} overlaps {:?}", a, b);
            }
        }

        // Pixels were copied to where the bounds say
        let [u0, v0, _, _] = atlas.texture_bounds("block/big");
        let (x, y) = ((u0 * atlas.size() as f32) as u32, (v0 * atlas.size() as f32) as u32);
        assert_eq!(atlas.image().get_pixel(x + 5, y + 5), &Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn test_pack_texture_replaces_builtin() {
        let atlas = TextureAtlas::pack(vec![(MISSING_TEXTURE.to_string(), solid(32, 32, 9))]).unwrap();
        assert_eq!(atlas.len(), 3);
        let [u0, _, u1, _] = atlas.texture_bounds(MISSING_TEXTURE);
        assert_eq!((u1 - u0) * atlas.size() as f32, 32.0);
        assert!(atlas.contains(CHUNK_GRID_NULL));
    }

    #[test]
    fn test_animation_strip_addresses_first_frame() {
        let atlas = TextureAtlas::pack(vec![("block/water".to_string(), solid(16, 64, 1))]).unwrap();
        let [u0, v0, u1, v1] = atlas.texture_bounds("block/water");
        assert_eq!((u1 - u0) * atlas.size() as f32, 16.0);
        assert_eq!((v1 - v0) * atlas.size() as f32, 16.0);
    }

    #[test]
    fn test_cache_round_trip_and_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let atlas = TextureAtlas::pack(vec![("block/stone".to_string(), solid(16, 16, 7))]).unwrap();
        atlas.save_cache(dir.path(), "abc", 42).unwrap();

        let cached = TextureAtlas::load_cache(dir.path(), "abc", 42).unwrap().unwrap();
        assert_eq!(cached.texture_bounds("block/stone"), atlas.texture_bounds("block/stone"));
        assert_eq!(cached.image(), atlas.image());

        assert!(TextureAtlas::load_cache(dir.path(), "abc", 43).unwrap().is_none());
        assert!(TextureAtlas::load_cache(dir.path(), "other", 42).unwrap().is_none());
    }
}
