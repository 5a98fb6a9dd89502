//! In-process world and actor used by tests and the CLI simulator.
//!
//! The rig approximates the real game loosely but deterministically: facing
//! aligns one call after it is requested, walking covers one block per
//! tick, and break/place requests commit at the end of the tick.

use std::collections::BTreeMap;

use contracts::{Direction, Pos};

use crate::block::{blocks, sets, BlockId, BlockLookup, BlockSet};
use crate::ops::{ActorOps, EntityRef, MovementInput, RayHit};
use crate::world::{WorldSnapshot, FULL_LIGHT};

/// Light emitted by a torch at its own position.
const TORCH_LIGHT: u8 = 14;

// ---------------------------------------------------------------------------
// SimWorld
// ---------------------------------------------------------------------------

/// Mutable block grid backing the simulation.
#[derive(Debug, Clone)]
pub struct SimWorld {
    blocks: BTreeMap<Pos, BlockId>,
    entities: Vec<EntityRef>,
    player_pos: Pos,
    tick: u64,
    /// Ambient light where no torch reaches. 15 models daylight, 0 a mine.
    pub base_light: u8,
}

impl SimWorld {
    pub fn new(player_pos: Pos) -> Self {
        Self {
            blocks: BTreeMap::new(),
            entities: Vec::new(),
            player_pos,
            tick: 0,
            base_light: FULL_LIGHT,
        }
    }

    /// A `size` by `size` stone floor at y = 0 with the player on top.
    pub fn flat_plane(size: i32, player_pos: Pos) -> Self {
        let mut world = Self::new(player_pos);
        for x in 0..size {
            for z in 0..size {
                world.set_block(Pos::new(x, 0, z), blocks::STONE);
            }
        }
        world
    }

    /// A solid stone box with a one-block-wide corridor already implied by
    /// whatever the caller digs out of it.
    pub fn solid_box(min: Pos, max: Pos, player_pos: Pos) -> Self {
        let mut world = Self::new(player_pos);
        world.base_light = 0;
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    world.set_block(Pos::new(x, y, z), blocks::STONE);
                }
            }
        }
        world
    }

    pub fn set_block(&mut self, pos: Pos, block: BlockId) {
        if block == blocks::AIR {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, block);
        }
    }

    pub fn add_entity(&mut self, entity: EntityRef) {
        self.entities.push(entity);
    }

    /// All non-air blocks, in deterministic position order.
    pub fn blocks(&self) -> impl Iterator<Item = (Pos, BlockId)> + '_ {
        self.blocks.iter().map(|(pos, block)| (*pos, *block))
    }

    pub fn player_position(&self) -> Pos {
        self.player_pos
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Capture the current state, deriving light from torches.
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut light = BTreeMap::new();
        if self.base_light < FULL_LIGHT {
            let torches: Vec<Pos> = self
                .blocks
                .iter()
                .filter(|(_, block)| **block == blocks::TORCH)
                .map(|(pos, _)| *pos)
                .collect();
            for pos in self.light_domain() {
                let from_torches = torches
                    .iter()
                    .map(|torch| {
                        TORCH_LIGHT.saturating_sub(torch.manhattan_distance(pos).min(255) as u8)
                    })
                    .max()
                    .unwrap_or(0);
                light.insert(pos, from_torches.max(self.base_light));
            }
        }
        WorldSnapshot::new(self.blocks.clone(), light, self.player_pos, self.tick)
    }

    fn light_domain(&self) -> Vec<Pos> {
        let mut domain: std::collections::BTreeSet<Pos> = std::collections::BTreeSet::new();
        for pos in self.blocks.keys() {
            domain.insert(*pos);
            for direction in Direction::ALL {
                domain.insert(pos.step(direction));
            }
        }
        domain.insert(self.player_pos);
        domain.into_iter().collect()
    }
}

impl BlockLookup for SimWorld {
    fn block_at(&self, pos: Pos) -> BlockId {
        self.blocks.get(&pos).copied().unwrap_or(blocks::AIR)
    }
}

// ---------------------------------------------------------------------------
// SimRig
// ---------------------------------------------------------------------------

/// The simulated agent body: implements [`ActorOps`] against a [`SimWorld`]
/// and commits the tick's requested effects in [`SimRig::apply_tick`].
#[derive(Debug)]
pub struct SimRig {
    world: SimWorld,
    inventory: BTreeMap<BlockId, u32>,
    selected: Option<BlockId>,
    facing: Option<(Pos, Direction)>,
    aligned: bool,
    walk_target: Option<Pos>,
    movement: MovementInput,
    pending_break: Option<Pos>,
    pending_place: Option<(Pos, Direction, BlockId)>,
}

impl SimRig {
    pub fn new(world: SimWorld) -> Self {
        Self {
            world,
            inventory: BTreeMap::new(),
            selected: None,
            facing: None,
            aligned: false,
            walk_target: None,
            movement: MovementInput::default(),
            pending_break: None,
            pending_place: None,
        }
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut SimWorld {
        &mut self.world
    }

    pub fn give(&mut self, item: BlockId, count: u32) {
        *self.inventory.entry(item).or_insert(0) += count;
    }

    pub fn count_of(&self, item: BlockId) -> u32 {
        self.inventory.get(&item).copied().unwrap_or(0)
    }

    /// Clear per-tick intent. Called at the start of each game tick, before
    /// the controller runs.
    pub fn begin_tick(&mut self) {
        self.movement = MovementInput::default();
        self.walk_target = None;
    }

    /// Commit this tick's requested effects and advance time.
    pub fn apply_tick(&mut self) {
        if let Some(pos) = self.pending_break.take() {
            let block = self.world.block_at(pos);
            if block != blocks::AIR && block != blocks::BEDROCK {
                self.world.set_block(pos, blocks::AIR);
                *self.inventory.entry(block).or_insert(0) += 1;
            }
        }
        if let Some((place_on, side, item)) = self.pending_place.take() {
            let target = place_on.step(side);
            let base_solid = sets::SIMPLE_CUBE.contains(self.world.block_at(place_on));
            let target_free = self.world.block_at(target) == blocks::AIR;
            let available = self.count_of(item) > 0 && self.selected == Some(item);
            if base_solid && target_free && available {
                self.world.set_block(target, item);
                if let Some(count) = self.inventory.get_mut(&item) {
                    *count -= 1;
                }
            }
        }
        if self.movement.forward {
            if let Some(target) = self.walk_target {
                self.walk_step(target);
            }
        }
        self.settle();
        self.world.tick += 1;
    }

    fn walk_step(&mut self, target: Pos) {
        let here = self.world.player_pos;
        let next = if target.x != here.x {
            here.offset((target.x - here.x).signum(), 0, 0)
        } else if target.z != here.z {
            here.offset(0, 0, (target.z - here.z).signum())
        } else if target.y != here.y {
            here.offset(0, (target.y - here.y).signum(), 0)
        } else {
            return;
        };
        let candidate = if next.y > here.y && !self.movement.jump {
            // Cannot climb without jumping.
            return;
        } else {
            next
        };
        let body_clear = sets::FEET_CLEAR.contains(self.world.block_at(candidate))
            && sets::FEET_CLEAR.contains(self.world.block_at(candidate.above()));
        if body_clear {
            self.world.player_pos = candidate;
        } else if self.movement.jump {
            // Try hopping onto the blocking block.
            let up = candidate.above();
            if sets::FEET_CLEAR.contains(self.world.block_at(up))
                && sets::FEET_CLEAR.contains(self.world.block_at(up.above()))
            {
                self.world.player_pos = up;
            }
        }
    }

    fn settle(&mut self) {
        // Fall until standing on something, bounded to keep ticks cheap.
        for _ in 0..8 {
            let feet = self.world.player_pos;
            let below = self.world.block_at(feet.below());
            if below == blocks::AIR {
                self.world.player_pos = feet.below();
            } else {
                break;
            }
        }
    }
}

impl ActorOps for SimRig {
    fn position(&self) -> Pos {
        self.world.player_pos
    }

    fn has_item(&self, set: &BlockSet) -> bool {
        self.inventory
            .iter()
            .any(|(item, count)| set.contains(*item) && *count > 0)
    }

    fn select_item(&mut self, set: &BlockSet) -> bool {
        if let Some(selected) = self.selected {
            if set.contains(selected) && self.count_of(selected) > 0 {
                return true;
            }
        }
        let found = self
            .inventory
            .iter()
            .find(|(item, count)| set.contains(**item) && **count > 0)
            .map(|(item, _)| *item);
        match found {
            Some(item) => {
                self.selected = Some(item);
                true
            }
            None => false,
        }
    }

    fn face_block(&mut self, pos: Pos, side: Direction) -> bool {
        if self.facing == Some((pos, side)) {
            self.aligned = true;
        } else {
            // Turning takes a beat; alignment lands on the next call.
            self.facing = Some((pos, side));
            self.aligned = false;
        }
        self.aligned
    }

    fn is_facing(&self, pos: Pos, side: Direction) -> bool {
        self.aligned && self.facing == Some((pos, side))
    }

    fn face_towards(&mut self, pos: Pos) {
        self.walk_target = Some(pos);
    }

    fn request_break(&mut self, pos: Pos) {
        self.pending_break = Some(pos);
    }

    fn request_place(&mut self, pos: Pos, side: Direction, item: BlockId) {
        self.pending_place = Some((pos, side, item));
    }

    fn request_use_item(&mut self) {
        if let Some(RayHit { pos, side }) = self.current_look_target() {
            if let Some(item) = self.selected {
                self.pending_place = Some((pos, side, item));
            }
        }
    }

    fn override_movement(&mut self, input: MovementInput) {
        self.movement = input;
    }

    fn closest_entity(
        &self,
        max_distance: u32,
        predicate: &dyn Fn(&EntityRef) -> bool,
    ) -> Option<EntityRef> {
        self.world
            .entities
            .iter()
            .filter(|entity| {
                entity.pos.manhattan_distance(self.world.player_pos) <= max_distance
                    && predicate(entity)
            })
            .min_by_key(|entity| entity.pos.manhattan_distance(self.world.player_pos))
            .copied()
    }

    fn current_look_target(&self) -> Option<RayHit> {
        match self.facing {
            Some((pos, side)) if self.aligned => Some(RayHit { pos, side }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_covers_one_block_per_tick() {
        let world = SimWorld::flat_plane(8, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let target = Pos::new(3, 1, 0);
        for _ in 0..3 {
            rig.begin_tick();
            rig.face_towards(target);
            rig.override_movement(MovementInput::forward());
            rig.apply_tick();
        }
        assert_eq!(rig.position(), target);
    }

    #[test]
    fn break_commits_at_end_of_tick() {
        let mut world = SimWorld::flat_plane(4, Pos::new(0, 1, 0));
        world.set_block(Pos::new(1, 1, 0), blocks::DIRT);
        let mut rig = SimRig::new(world);
        rig.begin_tick();
        rig.request_break(Pos::new(1, 1, 0));
        assert_eq!(rig.world().block_at(Pos::new(1, 1, 0)), blocks::DIRT);
        rig.apply_tick();
        assert_eq!(rig.world().block_at(Pos::new(1, 1, 0)), blocks::AIR);
        assert_eq!(rig.count_of(blocks::DIRT), 1);
    }

    #[test]
    fn place_needs_a_solid_base_and_a_selected_item() {
        let world = SimWorld::flat_plane(4, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        rig.give(blocks::TORCH, 1);
        assert!(rig.select_item(&sets::TORCH));

        rig.begin_tick();
        rig.request_place(Pos::new(2, 0, 2), Direction::Up, blocks::TORCH);
        rig.apply_tick();
        assert_eq!(rig.world().block_at(Pos::new(2, 1, 2)), blocks::TORCH);
        assert_eq!(rig.count_of(blocks::TORCH), 0);

        // No more torches, so a second placement cannot commit.
        rig.begin_tick();
        rig.request_place(Pos::new(3, 0, 3), Direction::Up, blocks::TORCH);
        rig.apply_tick();
        assert_eq!(rig.world().block_at(Pos::new(3, 1, 3)), blocks::AIR);
    }

    #[test]
    fn facing_aligns_on_the_second_call() {
        let world = SimWorld::flat_plane(4, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        assert!(!rig.face_block(Pos::new(1, 0, 0), Direction::Up));
        assert!(rig.face_block(Pos::new(1, 0, 0), Direction::Up));
        assert!(rig.is_facing(Pos::new(1, 0, 0), Direction::Up));
        assert!(!rig.face_block(Pos::new(2, 0, 0), Direction::Up));
    }

    #[test]
    fn snapshot_light_radiates_from_torches() {
        let mut world = SimWorld::solid_box(
            Pos::new(0, 0, 0),
            Pos::new(6, 3, 0),
            Pos::new(1, 1, 0),
        );
        world.set_block(Pos::new(1, 1, 0), blocks::AIR);
        world.set_block(Pos::new(1, 2, 0), blocks::AIR);
        world.set_block(Pos::new(1, 1, 0), blocks::TORCH);
        let snapshot = world.snapshot();
        assert_eq!(snapshot.light_level_at(Pos::new(1, 1, 0)), TORCH_LIGHT);
        assert_eq!(snapshot.light_level_at(Pos::new(1, 2, 0)), TORCH_LIGHT - 1);
    }

    #[test]
    fn dark_box_reports_base_light() {
        let mut world = SimWorld::solid_box(
            Pos::new(0, 0, 0),
            Pos::new(4, 3, 0),
            Pos::new(1, 1, 0),
        );
        world.set_block(Pos::new(1, 1, 0), blocks::AIR);
        let snapshot = world.snapshot();
        assert_eq!(snapshot.light_level_at(Pos::new(1, 1, 0)), 0);
    }

    #[test]
    fn falling_settles_onto_the_floor() {
        let world = SimWorld::flat_plane(4, Pos::new(0, 4, 0));
        let mut rig = SimRig::new(world);
        rig.begin_tick();
        rig.apply_tick();
        assert_eq!(rig.position(), Pos::new(0, 1, 0));
    }
}
