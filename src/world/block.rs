use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of blocks in one 16x16x16 section
pub const SECTION_VOLUME: usize = 16 * 16 * 16;

/// A block state identified by namespace and base name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Block {
    pub namespace: String,
    pub base_name: String,
}

impl Block {
    pub fn new(namespace: impl Into<String>, base_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            base_name: base_name.into(),
        }
    }

    /// Parse `namespace:name`. A bare name gets the `minecraft` namespace.
    pub fn parse(id: &str) -> Self {
        match id.split_once(':') {
            Some((namespace, base_name)) => Self::new(namespace, base_name),
            None => Self::new("minecraft", id),
        }
    }

    pub fn air() -> Self {
        Self::new("minecraft", "air")
    }

    pub fn is_air(&self) -> bool {
        self.namespace == "minecraft" && self.base_name == "air"
    }

    /// `namespace:base_name`, the key used by resource pack lookups
    pub fn id(&self) -> String {
        format!("{}:{}", self.namespace, self.base_name)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.base_name)
    }
}

/// 16x16x16 palette indices stored x-major, then y, then z
#[derive(Clone, PartialEq, Eq)]
pub struct Section {
    indices: Box<[u32; SECTION_VOLUME]>,
}

impl Section {
    /// Section filled with palette index 0
    pub fn new() -> Self {
        Self::filled(0)
    }

    pub fn filled(index: u32) -> Self {
        Self {
            indices: Box::new([index; SECTION_VOLUME]),
        }
    }

    #[inline]
    fn offset(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < 16 && y < 16 && z < 16);
        (x * 16 + y) * 16 + z
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> u32 {
        self.indices[Self::offset(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, index: u32) {
        self.indices[Self::offset(x, y, z)] = index;
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.indices[..]
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let non_zero = self.indices.iter().filter(|&&index| index != 0).count();
        f.debug_struct("Section").field("non_zero", &non_zero).finish()
    }
}

/// Block contents of one chunk column
///
/// Sections are keyed by their vertical index (`y.div_euclid(16)`). Palette
/// index 0 is always air so that missing sections read as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub palette: Vec<Block>,
    pub sections: BTreeMap<i64, Section>,
}

impl BlockData {
    pub fn new() -> Self {
        Self {
            palette: vec![Block::air()],
            sections: BTreeMap::new(),
        }
    }

    /// Palette index of `block`, adding it if it is not yet present
    pub fn palette_index(&mut self, block: &Block) -> u32 {
        if let Some(index) = self.palette.iter().position(|b| b == block) {
            return index as u32;
        }
        self.palette.push(block.clone());
        (self.palette.len() - 1) as u32
    }

    /// Look up a palette entry. Out of range indices read as `None`.
    pub fn palette_block(&self, index: u32) -> Option<&Block> {
        self.palette.get(index as usize)
    }

    /// Set a block at chunk local `x`/`z` and absolute `y`
    pub fn set_block(&mut self, x: usize, y: i64, z: usize, block: &Block) {
        let index = self.palette_index(block);
        let section = self.sections.entry(y.div_euclid(16)).or_default();
        section.set(x, y.rem_euclid(16) as usize, z, index);
    }

    pub fn block(&self, x: usize, y: i64, z: usize) -> Option<&Block> {
        let section = self.sections.get(&y.div_euclid(16))?;
        self.palette_block(section.get(x, y.rem_euclid(16) as usize, z))
    }

    pub fn section(&self, cy: i64) -> Option<&Section> {
        self.sections.get(&cy)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_parse() {
        assert_eq!(Block::parse("minecraft:stone"), Block::new("minecraft", "stone"));
        assert_eq!(Block::parse("glass"), Block::new("minecraft", "glass"));
        assert!(Block::parse("air").is_air());
        assert_eq!(Block::new("mod", "thing").id(), "mod:thing");
    }

    #[test]
    fn test_section_layout_is_x_major() {
        let mut section = Section::new();
        section.set(1, 0, 0, 7);
        assert_eq!(section.as_slice()[256], 7);
        section.set(0, 1, 0, 8);
        assert_eq!(section.as_slice()[16], 8);
        section.set(0, 0, 1, 9);
        assert_eq!(section.as_slice()[1], 9);
    }

    #[test]
    fn test_set_block_creates_sections() {
        let mut data = BlockData::new();
        let stone = Block::parse("stone");
        data.set_block(3, -1, 4, &stone);
        data.set_block(3, 20, 4, &stone);

        assert_eq!(data.sections.keys().copied().collect::<Vec<_>>(), vec![-1, 1]);
        assert_eq!(data.palette.len(), 2);
        assert_eq!(data.block(3, -1, 4), Some(&stone));
        assert_eq!(data.block(3, 0, 4), None);
        assert!(data.block(0, -1, 0).is_some_and(Block::is_air));
    }
}
