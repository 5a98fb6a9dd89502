//! Capability interfaces provided by the embedding game layer.
//!
//! The core never talks to the game directly; every outward action goes
//! through [`ActorOps`]. The `sim` module ships an in-process
//! implementation for tests and the CLI.

use contracts::{Direction, Pos};

use crate::block::{BlockId, BlockSet};

/// One tick's worth of movement intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementInput {
    pub forward: bool,
    pub jump: bool,
    pub sneak: bool,
}

impl MovementInput {
    pub fn forward() -> Self {
        Self {
            forward: true,
            ..Self::default()
        }
    }

    pub fn jumping() -> Self {
        Self {
            forward: true,
            jump: true,
            sneak: false,
        }
    }

    pub fn sneaking() -> Self {
        Self {
            forward: true,
            jump: false,
            sneak: true,
        }
    }
}

/// A nearby entity as reported by the entity query capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    pub id: u64,
    pub pos: Pos,
}

/// What the agent's crosshair currently rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayHit {
    pub pos: Pos,
    pub side: Direction,
}

/// Actions and queries the agent can perform against the live game.
///
/// All methods are non-blocking; waiting is expressed by calling again on a
/// later tick.
pub trait ActorOps {
    /// The block position the agent currently stands in.
    fn position(&self) -> Pos;

    /// Whether the inventory holds any item matching `set`.
    fn has_item(&self, set: &BlockSet) -> bool;

    /// Select an inventory item matching `set`. Returns false when none is
    /// available.
    fn select_item(&mut self, set: &BlockSet) -> bool;

    /// Turn towards the `side` face of the block at `pos`. Returns true
    /// once the crosshair is aligned with that face.
    fn face_block(&mut self, pos: Pos, side: Direction) -> bool;

    /// Whether the crosshair currently rests on the `side` face of `pos`.
    fn is_facing(&self, pos: Pos, side: Direction) -> bool;

    /// Turn towards `pos` for walking.
    fn face_towards(&mut self, pos: Pos);

    /// Ask the game to break the block at `pos`.
    fn request_break(&mut self, pos: Pos);

    /// Ask the game to place `item` against the `side` face of `pos`.
    fn request_place(&mut self, pos: Pos, side: Direction, item: BlockId);

    /// Use the selected item on whatever the crosshair rests on.
    fn request_use_item(&mut self);

    /// Override this tick's movement.
    fn override_movement(&mut self, input: MovementInput);

    /// The closest entity within `max_distance` satisfying `predicate`.
    fn closest_entity(
        &self,
        max_distance: u32,
        predicate: &dyn Fn(&EntityRef) -> bool,
    ) -> Option<EntityRef>;

    /// The current crosshair target, if any.
    fn current_look_target(&self) -> Option<RayHit>;
}
