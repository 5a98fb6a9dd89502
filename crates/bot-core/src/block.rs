//! Block classification ids and the immutable `BlockSet` membership mask.

use std::fmt;

use contracts::Pos;

/// A block classification id. The domain is bounded by [`MAX_BLOCK_IDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u16);

/// Capacity of the classification domain. `BlockSet::invert` complements
/// within this domain, which keeps double-invert an identity.
pub const MAX_BLOCK_IDS: usize = 256;

const WORDS: usize = MAX_BLOCK_IDS / 64;

/// Anything that can answer a block classification query for a position.
pub trait BlockLookup {
    fn block_at(&self, pos: Pos) -> BlockId;
}

/// Well-known classification ids.
pub mod blocks {
    use super::BlockId;

    pub const AIR: BlockId = BlockId(0);
    pub const STONE: BlockId = BlockId(1);
    pub const DIRT: BlockId = BlockId(2);
    pub const GRASS: BlockId = BlockId(3);
    pub const SAND: BlockId = BlockId(4);
    pub const GRAVEL: BlockId = BlockId(5);
    pub const LOG: BlockId = BlockId(6);
    pub const LEAVES: BlockId = BlockId(7);
    pub const PLANKS: BlockId = BlockId(8);
    pub const TORCH: BlockId = BlockId(9);
    pub const WATER: BlockId = BlockId(10);
    pub const LAVA: BlockId = BlockId(11);
    pub const FIRE: BlockId = BlockId(12);
    pub const BEDROCK: BlockId = BlockId(13);
    pub const COAL_ORE: BlockId = BlockId(14);
    pub const IRON_ORE: BlockId = BlockId(15);
    pub const SUGAR_CANE: BlockId = BlockId(16);
    pub const FENCE: BlockId = BlockId(17);
    pub const GLASS: BlockId = BlockId(18);
}

/// An immutable set of block classifications.
///
/// Construction happens once (via [`BlockSetBuilder`] or the composition
/// operators); membership queries are pure and allocation-free, so sets are
/// safe to share across threads without synchronization.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSet {
    words: [u64; WORDS],
}

impl BlockSet {
    pub const EMPTY: BlockSet = BlockSet { words: [0; WORDS] };

    pub fn builder() -> BlockSetBuilder {
        BlockSetBuilder {
            words: [0; WORDS],
        }
    }

    pub fn of(ids: &[BlockId]) -> BlockSet {
        let mut builder = Self::builder();
        for id in ids {
            builder = builder.add(*id);
        }
        builder.build()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        let index = id.0 as usize;
        if index >= MAX_BLOCK_IDS {
            return false;
        }
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Whether the block at `pos` in `world` belongs to this set.
    pub fn is_at(&self, world: &impl BlockLookup, pos: Pos) -> bool {
        self.contains(world.block_at(pos))
    }

    pub fn union(&self, other: &BlockSet) -> BlockSet {
        let mut words = self.words;
        for (word, other_word) in words.iter_mut().zip(other.words.iter()) {
            *word |= other_word;
        }
        BlockSet { words }
    }

    pub fn intersect(&self, other: &BlockSet) -> BlockSet {
        let mut words = self.words;
        for (word, other_word) in words.iter_mut().zip(other.words.iter()) {
            *word &= other_word;
        }
        BlockSet { words }
    }

    pub fn invert(&self) -> BlockSet {
        let mut words = self.words;
        for word in &mut words {
            *word = !*word;
        }
        BlockSet { words }
    }

    pub fn minus(&self, other: &BlockSet) -> BlockSet {
        self.intersect(&other.invert())
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..MAX_BLOCK_IDS as u16)
            .map(BlockId)
            .filter(|id| self.contains(*id))
    }
}

impl fmt::Debug for BlockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids().map(|id| id.0)).finish()
    }
}

#[derive(Debug, Clone)]
pub struct BlockSetBuilder {
    words: [u64; WORDS],
}

impl BlockSetBuilder {
    pub fn add(mut self, id: BlockId) -> Self {
        let index = id.0 as usize;
        debug_assert!(index < MAX_BLOCK_IDS);
        self.words[index / 64] |= 1 << (index % 64);
        self
    }

    pub fn add_set(mut self, set: &BlockSet) -> Self {
        let merged = BlockSet { words: self.words }.union(set);
        self.words = merged.words;
        self
    }

    pub fn remove(mut self, id: BlockId) -> Self {
        let index = id.0 as usize;
        debug_assert!(index < MAX_BLOCK_IDS);
        self.words[index / 64] &= !(1 << (index % 64));
        self
    }

    pub fn build(self) -> BlockSet {
        BlockSet { words: self.words }
    }
}

/// Prebuilt sets used by walkability checks and the bundled strategies.
pub mod sets {
    use super::{blocks, BlockSet};
    use std::sync::LazyLock;

    pub static AIR: LazyLock<BlockSet> = LazyLock::new(|| BlockSet::of(&[blocks::AIR]));

    /// Full, stable cubes: safe to stand on and to place against.
    pub static SIMPLE_CUBE: LazyLock<BlockSet> = LazyLock::new(|| {
        BlockSet::of(&[
            blocks::STONE,
            blocks::DIRT,
            blocks::GRASS,
            blocks::SAND,
            blocks::GRAVEL,
            blocks::LOG,
            blocks::PLANKS,
            blocks::BEDROCK,
            blocks::COAL_ORE,
            blocks::IRON_ORE,
        ])
    });

    pub static LEAVES: LazyLock<BlockSet> = LazyLock::new(|| BlockSet::of(&[blocks::LEAVES]));

    pub static TORCH: LazyLock<BlockSet> = LazyLock::new(|| BlockSet::of(&[blocks::TORCH]));

    pub static HAZARD: LazyLock<BlockSet> =
        LazyLock::new(|| BlockSet::of(&[blocks::LAVA, blocks::FIRE]));

    pub static WATER: LazyLock<BlockSet> = LazyLock::new(|| BlockSet::of(&[blocks::WATER]));

    /// Ground the agent may stand on.
    pub static SAFE_GROUND: LazyLock<BlockSet> = LazyLock::new(|| SIMPLE_CUBE.minus(&HAZARD));

    /// Blocks the agent's body may occupy.
    pub static FEET_CLEAR: LazyLock<BlockSet> = LazyLock::new(|| AIR.union(&TORCH));

    /// Cannot place a torch on leaves.
    pub static TORCH_BASE: LazyLock<BlockSet> = LazyLock::new(|| SIMPLE_CUBE.minus(&LEAVES));

    /// A tunnel section counts as dug when both its blocks are in this set.
    pub static TUNNEL_FREE: LazyLock<BlockSet> = LazyLock::new(|| AIR.union(&TORCH));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> (BlockSet, BlockSet) {
        let a = BlockSet::of(&[blocks::STONE, blocks::DIRT, blocks::TORCH]);
        let b = BlockSet::of(&[blocks::DIRT, blocks::WATER]);
        (a, b)
    }

    #[test]
    fn union_contains_members_of_both() {
        let (a, b) = abc();
        let u = a.union(&b);
        assert!(u.contains(blocks::STONE));
        assert!(u.contains(blocks::WATER));
        assert!(!u.contains(blocks::LAVA));
    }

    #[test]
    fn intersect_keeps_only_shared_members() {
        let (a, b) = abc();
        let i = a.intersect(&b);
        assert!(i.contains(blocks::DIRT));
        assert!(!i.contains(blocks::STONE));
        assert!(!i.contains(blocks::WATER));
    }

    #[test]
    fn double_invert_is_identity() {
        let (a, _) = abc();
        assert_eq!(a.invert().invert(), a);
    }

    #[test]
    fn de_morgan_union() {
        let (a, b) = abc();
        assert_eq!(a.union(&b).invert(), a.invert().intersect(&b.invert()));
    }

    #[test]
    fn de_morgan_intersect() {
        let (a, b) = abc();
        assert_eq!(a.intersect(&b).invert(), a.invert().union(&b.invert()));
    }

    #[test]
    fn minus_removes_members() {
        let (a, b) = abc();
        let m = a.minus(&b);
        assert!(m.contains(blocks::STONE));
        assert!(!m.contains(blocks::DIRT));
    }

    #[test]
    fn out_of_domain_id_is_never_contained() {
        let (a, _) = abc();
        assert!(!a.invert().contains(BlockId(MAX_BLOCK_IDS as u16)));
    }

    #[test]
    fn torch_base_excludes_leaves() {
        assert!(!sets::TORCH_BASE.contains(blocks::LEAVES));
        assert!(sets::TORCH_BASE.contains(blocks::STONE));
    }
}
