//! Atomic, tickable, cancelable actions and the strict FIFO queue that
//! executes them.
//!
//! A task is created by a pathfinder or strategy, enqueued, ticked until
//! finished or canceled, then discarded. Tasks are never reused. The
//! capability set is fixed (`is_finished`, `run_tick`, `on_canceled`,
//! `applies_to_delta`, `commits_effect`) and dispatch is by match.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use contracts::{Direction, Pos};

use crate::block::{blocks, BlockId, BlockLookup, BlockSet};
use crate::ops::{ActorOps, MovementInput};
use crate::world::WorldView;

// ---------------------------------------------------------------------------
// Errors and notes
// ---------------------------------------------------------------------------

/// A task's runtime precondition silently broke. Recovered by the owning
/// strategy: the remaining queue is aborted and planning restarts from
/// freshly observed state. Never propagates past the strategy boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncError {
    pub reason: String,
}

impl DesyncError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DesyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task desync: {}", self.reason)
    }
}

/// Progress bookkeeping emitted by `RunOnce` tasks and interpreted by the
/// owning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressNote {
    SectionReached(u32),
    SectionDone(u32),
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// Externally visible position reservations (e.g. "reserved for a pending
/// dig"). Cancellation must release these before returning.
#[derive(Debug, Default, Clone)]
pub struct ReservationTable {
    reserved: BTreeSet<Pos>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `pos`. Returns false when already held.
    pub fn reserve(&mut self, pos: Pos) -> bool {
        self.reserved.insert(pos)
    }

    pub fn release(&mut self, pos: Pos) {
        self.reserved.remove(&pos);
    }

    pub fn is_reserved(&self, pos: Pos) -> bool {
        self.reserved.contains(&pos)
    }

    pub fn len(&self) -> usize {
        self.reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TaskOps
// ---------------------------------------------------------------------------

/// Per-step outbox handed to `run_tick`: desync signaling, same-tick retry
/// requests, progress notes, and the reservation table.
#[derive(Debug)]
pub struct TaskOps<'a> {
    pub reservations: &'a mut ReservationTable,
    desync: Option<DesyncError>,
    tick_again: bool,
    notes: Vec<ProgressNote>,
}

impl<'a> TaskOps<'a> {
    pub fn new(reservations: &'a mut ReservationTable) -> Self {
        Self {
            reservations,
            desync: None,
            tick_again: false,
            notes: Vec::new(),
        }
    }

    pub fn desync(&mut self, error: DesyncError) {
        if self.desync.is_none() {
            self.desync = Some(error);
        }
    }

    /// Ask to be ticked again within the same game tick (bounded by the
    /// controller's iteration ceiling).
    pub fn tick_again(&mut self) {
        self.tick_again = true;
    }

    pub fn note(&mut self, note: ProgressNote) {
        self.notes.push(note);
    }

    pub fn has_desync(&self) -> bool {
        self.desync.is_some()
    }

    pub fn take_desync(&mut self) -> Option<DesyncError> {
        self.desync.take()
    }

    pub fn wants_tick_again(&self) -> bool {
        self.tick_again
    }

    pub fn take_notes(&mut self) -> Vec<ProgressNote> {
        std::mem::take(&mut self.notes)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Orthogonal placement behavior flags (replacing a subclass chain of
/// jumping/sneaking placement variants).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceFlags {
    pub requires_jump: bool,
    pub requires_sneak: bool,
}

/// A pure world predicate guarding a conditional task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    BlockIs { pos: Pos, set: BlockSet },
    LightAtOrBelow { pos: Pos, level: u8 },
}

impl Condition {
    pub fn holds(&self, world: &WorldView) -> bool {
        match self {
            Condition::BlockIs { pos, set } => set.is_at(world, *pos),
            Condition::LightAtOrBelow { pos, level } => world.light_level_at(*pos) <= *level,
        }
    }
}

/// One atomic action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Walk onto the adjacent position `target`.
    Move {
        target: Pos,
        ticks_waited: u32,
        timeout_ticks: u32,
    },
    /// Break the block at `pos`, reserving it while the dig is pending.
    Destroy { pos: Pos, reserved: bool },
    /// Place `item` against the `side` face of `place_on`. The attempt
    /// budget makes exhaustion an ordinary completion, never an error.
    PlaceAt {
        place_on: Pos,
        side: Direction,
        item: BlockId,
        flags: PlaceFlags,
        attempts_left: u32,
    },
    /// Do nothing for a number of ticks.
    Wait { ticks_left: u32 },
    /// Run the inner task only while the condition holds.
    Conditional { condition: Condition, task: Box<Task> },
    /// Emit a progress note exactly once. Commits strategy state, so it is
    /// skipped by prefetch searches.
    RunOnce { note: ProgressNote, done: bool },
    /// A fixed ordered group executed front to back.
    Composite { tasks: Vec<Task> },
}

impl Task {
    pub fn walk_to(target: Pos, timeout_ticks: u32) -> Task {
        Task::Move {
            target,
            ticks_waited: 0,
            timeout_ticks,
        }
    }

    pub fn destroy(pos: Pos) -> Task {
        Task::Destroy {
            pos,
            reserved: false,
        }
    }

    pub fn place(place_on: Pos, side: Direction, item: BlockId, attempts: u32) -> Task {
        Task::PlaceAt {
            place_on,
            side,
            item,
            flags: PlaceFlags::default(),
            attempts_left: attempts,
        }
    }

    pub fn mark_section_reached(section: u32) -> Task {
        Task::RunOnce {
            note: ProgressNote::SectionReached(section),
            done: false,
        }
    }

    pub fn mark_section_done(section: u32) -> Task {
        Task::RunOnce {
            note: ProgressNote::SectionDone(section),
            done: false,
        }
    }

    /// Pure completion check, queried before and after each tick.
    pub fn is_finished(&self, world: &WorldView, actor: &dyn ActorOps) -> bool {
        match self {
            Task::Move { target, .. } => actor.position() == *target,
            Task::Destroy { pos, .. } => world.block_at(*pos) == blocks::AIR,
            Task::PlaceAt {
                place_on,
                side,
                attempts_left,
                ..
            } => *attempts_left == 0 || world.block_at(place_on.step(*side)) != blocks::AIR,
            Task::Wait { ticks_left } => *ticks_left == 0,
            Task::Conditional { condition, task } => {
                !condition.holds(world) || task.is_finished(world, actor)
            }
            Task::RunOnce { done, .. } => *done,
            Task::Composite { tasks } => tasks.iter().all(|task| task.is_finished(world, actor)),
        }
    }

    /// Perform one step. May request movement overrides or item use through
    /// `actor`, and raise a desync or a same-tick retry through `ops`.
    pub fn run_tick(&mut self, world: &WorldView, actor: &mut dyn ActorOps, ops: &mut TaskOps<'_>) {
        match self {
            Task::Move {
                target,
                ticks_waited,
                timeout_ticks,
            } => {
                *ticks_waited += 1;
                if *ticks_waited > *timeout_ticks {
                    ops.desync(DesyncError::new(format!(
                        "move to {target} timed out after {timeout_ticks} ticks"
                    )));
                    return;
                }
                actor.face_towards(*target);
                let input = if target.y > actor.position().y {
                    MovementInput::jumping()
                } else {
                    MovementInput::forward()
                };
                actor.override_movement(input);
            }
            Task::Destroy { pos, reserved } => {
                if !*reserved {
                    if ops.reservations.reserve(*pos) {
                        *reserved = true;
                    } else {
                        ops.desync(DesyncError::new(format!("{pos} is reserved elsewhere")));
                        return;
                    }
                }
                let side = approach_side(*pos, actor.position());
                if actor.face_block(*pos, side) {
                    actor.request_break(*pos);
                } else {
                    // Re-check facing within the same game tick.
                    ops.tick_again();
                }
            }
            Task::PlaceAt {
                place_on,
                side,
                item,
                flags,
                attempts_left,
            } => {
                if *attempts_left == 0 {
                    return;
                }
                *attempts_left -= 1;
                if !actor.select_item(&BlockSet::of(&[*item])) {
                    ops.desync(DesyncError::new(format!(
                        "no item {:?} available to place",
                        item
                    )));
                    return;
                }
                if flags.requires_sneak {
                    actor.override_movement(MovementInput::sneaking());
                }
                if flags.requires_jump {
                    actor.override_movement(MovementInput::jumping());
                }
                if actor.face_block(*place_on, *side) {
                    actor.request_place(*place_on, *side, *item);
                } else {
                    ops.tick_again();
                }
            }
            Task::Wait { ticks_left } => {
                *ticks_left = ticks_left.saturating_sub(1);
            }
            Task::Conditional { condition, task } => {
                if condition.holds(world) {
                    task.run_tick(world, actor, ops);
                }
            }
            Task::RunOnce { note, done } => {
                if !*done {
                    ops.note(*note);
                    *done = true;
                }
            }
            Task::Composite { tasks } => {
                if let Some(task) = tasks
                    .iter_mut()
                    .find(|task| !task.is_finished(world, actor))
                {
                    task.run_tick(world, actor, ops);
                }
            }
        }
    }

    /// Release externally visible resources when the queue is abandoned.
    pub fn on_canceled(&mut self, reservations: &mut ReservationTable) {
        self.release_reservations(reservations);
    }

    fn release_reservations(&mut self, reservations: &mut ReservationTable) {
        match self {
            Task::Destroy { pos, reserved } => {
                if *reserved {
                    reservations.release(*pos);
                    *reserved = false;
                }
            }
            Task::Conditional { task, .. } => task.release_reservations(reservations),
            Task::Composite { tasks } => {
                for task in tasks {
                    task.release_reservations(reservations);
                }
            }
            _ => {}
        }
    }

    /// Whether this task's effect is folded into the overlay once committed.
    pub fn applies_to_delta(&self) -> bool {
        match self {
            Task::Move { .. } | Task::Destroy { .. } | Task::PlaceAt { .. } => true,
            Task::Wait { .. } | Task::RunOnce { .. } => false,
            Task::Conditional { task, .. } => task.applies_to_delta(),
            Task::Composite { tasks } => tasks.iter().any(Task::applies_to_delta),
        }
    }

    /// Fold the predicted effect into `view`.
    pub fn apply_to_delta(&self, view: &mut WorldView) {
        match self {
            Task::Move { target, .. } => view.set_player_position(*target),
            Task::Destroy { pos, .. } => view.apply_delta(*pos, blocks::AIR),
            Task::PlaceAt {
                place_on,
                side,
                item,
                ..
            } => view.apply_delta(place_on.step(*side), *item),
            Task::Wait { .. } | Task::RunOnce { .. } => {}
            Task::Conditional { condition, task } => {
                if condition.holds(view) {
                    task.apply_to_delta(view);
                }
            }
            Task::Composite { tasks } => {
                for task in tasks {
                    task.apply_to_delta(view);
                }
            }
        }
    }

    /// Whether this task commits strategy state, making it unsafe to emit
    /// from a speculative prefetch search.
    pub fn commits_effect(&self) -> bool {
        match self {
            Task::RunOnce { .. } => true,
            Task::Conditional { task, .. } => task.commits_effect(),
            Task::Composite { tasks } => tasks.iter().any(Task::commits_effect),
            _ => false,
        }
    }
}

fn approach_side(of: Pos, toward: Pos) -> Direction {
    let dx = toward.x - of.x;
    let dy = toward.y - of.y;
    let dz = toward.z - of.z;
    if dx.abs() >= dy.abs() && dx.abs() >= dz.abs() && dx != 0 {
        if dx > 0 {
            Direction::East
        } else {
            Direction::West
        }
    } else if dz.abs() >= dy.abs() && dz != 0 {
        if dz > 0 {
            Direction::South
        } else {
            Direction::North
        }
    } else if dy < 0 {
        Direction::Down
    } else {
        Direction::Up
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Strictly ordered task sequence for one goal attempt. FIFO consumption;
/// bulk cancellation invokes each remaining task's cancellation hook
/// exactly once before discarding it.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub fn extend(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.extend(tasks);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn front(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Execute at most one task step. Completion is checked both before
    /// and after the step; the task completed by this step, if any, is
    /// returned so the caller can fold its delta into the overlay.
    pub fn step(
        &mut self,
        world: &WorldView,
        actor: &mut dyn ActorOps,
        ops: &mut TaskOps<'_>,
    ) -> Option<Task> {
        let front = self.tasks.front_mut()?;
        if !front.is_finished(world, actor) {
            front.run_tick(world, actor, ops);
            if ops.has_desync() {
                return None;
            }
        }
        match self.tasks.front() {
            Some(front) if front.is_finished(world, actor) => {
                let mut done = self.tasks.pop_front();
                if let Some(task) = done.as_mut() {
                    task.release_reservations(ops.reservations);
                }
                done
            }
            _ => None,
        }
    }

    /// Cancel every remaining task, invoking its cancellation hook, then
    /// discard the queue contents.
    pub fn cancel_all(&mut self, reservations: &mut ReservationTable) {
        for task in &mut self.tasks {
            task.on_canceled(reservations);
        }
        self.tasks.clear();
    }
}
