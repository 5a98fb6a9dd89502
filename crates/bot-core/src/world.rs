//! World state: immutable snapshots and the speculative overlay view.

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::Pos;

use crate::block::{blocks, BlockId, BlockLookup, BlockSet};

/// Daylight, the light level assumed where the provider recorded nothing.
pub const FULL_LIGHT: u8 = 15;

// ---------------------------------------------------------------------------
// WorldSnapshot
// ---------------------------------------------------------------------------

/// Authoritative block state captured at a point in time.
///
/// Owned by the external world provider; the core only ever reads it. A
/// pathfinder run or a task step holds one `Arc` clone for its whole
/// duration, so a concurrent snapshot refresh can never change the answers
/// within a single pass (copy-on-reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    blocks: BTreeMap<Pos, BlockId>,
    light: BTreeMap<Pos, u8>,
    player_pos: Pos,
    tick: u64,
}

impl WorldSnapshot {
    pub fn new(
        blocks: BTreeMap<Pos, BlockId>,
        light: BTreeMap<Pos, u8>,
        player_pos: Pos,
        tick: u64,
    ) -> Self {
        Self {
            blocks,
            light,
            player_pos,
            tick,
        }
    }

    pub fn empty(player_pos: Pos) -> Self {
        Self::new(BTreeMap::new(), BTreeMap::new(), player_pos, 0)
    }

    pub fn player_position(&self) -> Pos {
        self.player_pos
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn light_level_at(&self, pos: Pos) -> u8 {
        self.light.get(&pos).copied().unwrap_or(FULL_LIGHT)
    }
}

impl BlockLookup for WorldSnapshot {
    fn block_at(&self, pos: Pos) -> BlockId {
        self.blocks.get(&pos).copied().unwrap_or(blocks::AIR)
    }
}

// ---------------------------------------------------------------------------
// WorldView
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeltaEntry {
    pos: Pos,
    block: BlockId,
}

/// A snapshot plus an ordered overlay of predicted mutations.
///
/// Tasks that have committed but whose real-world effect has not yet been
/// observed contribute entries via [`WorldView::apply_delta`]. The overlay
/// is an append-only log: a later entry for the same position shadows an
/// earlier one, and history is never rewritten.
#[derive(Debug, Clone)]
pub struct WorldView {
    snapshot: Arc<WorldSnapshot>,
    overlay: Vec<DeltaEntry>,
    latest: BTreeMap<Pos, BlockId>,
    player_override: Option<Pos>,
}

impl WorldView {
    pub fn new(snapshot: Arc<WorldSnapshot>) -> Self {
        Self {
            snapshot,
            overlay: Vec::new(),
            latest: BTreeMap::new(),
            player_override: None,
        }
    }

    /// Rebase the overlay onto a fresh snapshot, keeping predicted
    /// mutations that the new snapshot has not yet confirmed.
    pub fn rebase(&mut self, snapshot: Arc<WorldSnapshot>) {
        self.latest
            .retain(|pos, block| snapshot.block_at(*pos) != *block);
        let latest = &self.latest;
        self.overlay.retain(|entry| latest.contains_key(&entry.pos));
        self.snapshot = snapshot;
        self.player_override = None;
    }

    pub fn snapshot(&self) -> &Arc<WorldSnapshot> {
        &self.snapshot
    }

    /// Record a predicted mutation. Called only once a task's effect is
    /// considered committed.
    pub fn apply_delta(&mut self, pos: Pos, block: BlockId) {
        self.overlay.push(DeltaEntry { pos, block });
        self.latest.insert(pos, block);
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    pub fn player_position(&self) -> Pos {
        self.player_override
            .unwrap_or_else(|| self.snapshot.player_position())
    }

    /// Predict the agent standing at `pos` (used when simulating queued
    /// move tasks ahead of execution).
    pub fn set_player_position(&mut self, pos: Pos) {
        self.player_override = Some(pos);
    }

    pub fn light_level_at(&self, pos: Pos) -> u8 {
        self.snapshot.light_level_at(pos)
    }

    /// Count positions in `region` whose block belongs to `set`.
    pub fn get_volume(&self, region: &Cuboid, set: &BlockSet) -> u32 {
        region
            .positions()
            .filter(|pos| set.contains(self.block_at(*pos)))
            .count() as u32
    }
}

impl BlockLookup for WorldView {
    fn block_at(&self, pos: Pos) -> BlockId {
        self.latest
            .get(&pos)
            .copied()
            .unwrap_or_else(|| self.snapshot.block_at(pos))
    }
}

// ---------------------------------------------------------------------------
// Cuboid
// ---------------------------------------------------------------------------

/// An inclusive axis-aligned box of grid positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cuboid {
    pub min: Pos,
    pub max: Pos,
}

impl Cuboid {
    /// Build from any two corners; the corners are normalized per axis.
    pub fn new(a: Pos, b: Pos) -> Self {
        Self {
            min: Pos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Pos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn single(pos: Pos) -> Self {
        Self { min: pos, max: pos }
    }

    pub fn contains(&self, pos: Pos) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }

    pub fn volume(&self) -> u64 {
        let dx = (self.max.x - self.min.x) as u64 + 1;
        let dy = (self.max.y - self.min.y) as u64 + 1;
        let dz = (self.max.z - self.min.z) as u64 + 1;
        dx * dy * dz
    }

    /// Positions in deterministic (x, y, z) order.
    pub fn positions(&self) -> impl Iterator<Item = Pos> + '_ {
        let min = self.min;
        let max = self.max;
        (min.x..=max.x).flat_map(move |x| {
            (min.y..=max.y).flat_map(move |y| (min.z..=max.z).map(move |z| Pos::new(x, y, z)))
        })
    }
}
