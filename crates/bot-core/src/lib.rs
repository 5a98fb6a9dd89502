//! Deterministic voxel-grid agent core.
//!
//! The crate is layered bottom-up: `block` and `world` model observed
//! state, `task` and `path` turn goals into executable plans, `strategy`
//! and `strategies` run those plans as tick state machines, and
//! `controller` arbitrates between strategies once per game tick. The
//! `sim` module provides the in-process world used by tests and the CLI
//! simulator; a real game embedding only has to implement [`ActorOps`]
//! and feed snapshots.

pub mod block;
pub mod controller;
pub mod ops;
pub mod path;
pub mod sim;
pub mod strategies;
pub mod strategy;
pub mod task;
pub mod world;

pub use block::{blocks, sets, BlockId, BlockLookup, BlockSet, BlockSetBuilder};
pub use controller::Controller;
pub use ops::{ActorOps, EntityRef, MovementInput, RayHit};
pub use path::{FoundPath, PathFinder, PathGoal, SearchExhausted, SearchMode, WalkPolicy};
pub use sim::{SimRig, SimWorld};
pub use strategies::{build_strategy, MoveToStrategy, PlaceTorchStrategy, TunnelStrategy};
pub use strategy::{ExecOutcome, SearchExecutor, Strategy, TickCtx};
pub use task::{
    Condition, DesyncError, PlaceFlags, ProgressNote, ReservationTable, Task, TaskOps, TaskQueue,
};
pub use world::{Cuboid, WorldSnapshot, WorldView, FULL_LIGHT};
