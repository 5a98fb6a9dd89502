//! Dig a straight 1x2 tunnel section by section, lighting it as it grows.
//!
//! A section is one feet-and-head column along the tunnel axis. Sections
//! are dug strictly in order; every `torch_spacing`-th section gets torch
//! placements guarded by a light check so already-lit stretches are left
//! alone. Progress is committed through run-once marker tasks, which keeps
//! speculative searches from advancing the section bookkeeping.

use std::collections::BTreeSet;

use contracts::{
    BotConfig, Direction, JournalEntry, JournalEntryKind, Pos, ProgressReport, TickResult,
    TorchSide,
};
use serde_json::json;

use crate::block::{blocks, sets, BlockLookup};
use crate::ops::ActorOps;
use crate::path::PathGoal;
use crate::strategy::{SearchExecutor, Strategy, TickCtx};
use crate::task::{Condition, ProgressNote, Task};
use crate::world::{Cuboid, WorldSnapshot, WorldView};

/// The direction 90 degrees counterclockwise (seen from above).
fn left_of(direction: Direction) -> Direction {
    match direction {
        Direction::East => Direction::North,
        Direction::North => Direction::West,
        Direction::West => Direction::South,
        Direction::South => Direction::East,
        other => other,
    }
}

fn section_feet(origin: Pos, direction: Direction, section: u32) -> Pos {
    let (dx, _, dz) = direction.offset();
    origin.offset(dx * section as i32, 0, dz * section as i32)
}

fn section_is_free(world: &impl BlockLookup, origin: Pos, direction: Direction, section: u32) -> bool {
    let feet = section_feet(origin, direction, section);
    sets::TUNNEL_FREE.contains(world.block_at(feet))
        && sets::TUNNEL_FREE.contains(world.block_at(feet.above()))
}

pub struct TunnelStrategy {
    origin: Pos,
    direction: Option<Direction>,
    length: u32,
    torches: TorchSide,
    torch_spacing: u32,
    torch_light_level: u8,
    place_attempt_cap: u32,
    move_timeout_ticks: u32,
    done_sections: BTreeSet<u32>,
    current_section: Option<u32>,
    executor: SearchExecutor,
    done: bool,
    aborted: bool,
}

impl TunnelStrategy {
    pub fn new(
        origin: Pos,
        dx: i32,
        dz: i32,
        length: u32,
        torches: TorchSide,
        config: &BotConfig,
    ) -> Self {
        Self {
            origin,
            direction: Direction::for_xz(dx, dz),
            length,
            torches,
            torch_spacing: config.torch_spacing,
            torch_light_level: config.torch_light_level,
            place_attempt_cap: config.place_attempt_cap,
            move_timeout_ticks: config.move_timeout_ticks,
            done_sections: BTreeSet::new(),
            current_section: None,
            executor: SearchExecutor::new(config),
            done: false,
            aborted: false,
        }
    }

    fn all_sections_free(&self, world: &impl BlockLookup, direction: Direction) -> bool {
        (0..self.length).all(|n| section_is_free(world, self.origin, direction, n))
    }
}

impl Strategy for TunnelStrategy {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    fn check_should_take_over(&mut self, _snapshot: &WorldSnapshot, _actor: &dyn ActorOps) -> bool {
        !self.done && !self.aborted
    }

    fn on_deactivate(&mut self) {
        self.executor.abandon();
    }

    fn on_tick(&mut self, ctx: &mut TickCtx<'_>) -> TickResult {
        let Some(direction) = self.direction else {
            // A tunnel needs exactly one horizontal axis.
            self.aborted = true;
            return TickResult::Abort;
        };
        if self.length == 0 {
            self.aborted = true;
            return TickResult::Abort;
        }
        if self.all_sections_free(ctx.snapshot.as_ref(), direction) {
            self.done = true;
            return TickResult::NoMoreWork;
        }

        let mut goal = TunnelGoal {
            origin: self.origin,
            direction,
            length: self.length,
            torches: self.torches,
            torch_spacing: self.torch_spacing,
            torch_light_level: self.torch_light_level,
            place_attempt_cap: self.place_attempt_cap,
            move_timeout_ticks: self.move_timeout_ticks,
        };
        let outcome = self.executor.tick(ctx.snapshot, ctx.actor, &mut goal);

        for note in &outcome.notes {
            match note {
                ProgressNote::SectionReached(section) => {
                    self.current_section = Some(*section);
                }
                ProgressNote::SectionDone(section) => {
                    self.done_sections.insert(*section);
                }
            }
        }
        if let Some(desync) = &outcome.desync {
            ctx.journal.push(JournalEntry::new(
                ctx.tick,
                JournalEntryKind::TaskDesync,
                json!({ "strategy": self.name(), "reason": desync.reason }),
            ));
        }
        if let Some(exhausted) = &outcome.exhausted {
            ctx.journal.push(JournalEntry::new(
                ctx.tick,
                JournalEntryKind::SearchExhausted,
                json!({
                    "strategy": self.name(),
                    "visited": exhausted.visited,
                    "budget_hit": exhausted.budget_hit,
                }),
            ));
        }
        if outcome.result == TickResult::NoMoreWork {
            self.done = true;
        }
        outcome.result
    }

    fn description(&self) -> String {
        match self.current_section {
            Some(section) => format!(
                "tunneling section {} of {} ({:?})",
                section + 1,
                self.length,
                self.direction
            ),
            None => format!("tunneling {} sections", self.length),
        }
    }

    fn progress(&self) -> Option<ProgressReport> {
        Some(ProgressReport {
            strategy: self.name().to_string(),
            completed: self.done_sections.len() as u32,
            total: self.length,
        })
    }

    fn queue_depth(&self) -> usize {
        self.executor.queue_depth()
    }
}

// ---------------------------------------------------------------------------
// Goal
// ---------------------------------------------------------------------------

struct TunnelGoal {
    origin: Pos,
    direction: Direction,
    length: u32,
    torches: TorchSide,
    torch_spacing: u32,
    torch_light_level: u8,
    place_attempt_cap: u32,
    move_timeout_ticks: u32,
}

impl TunnelGoal {
    /// The first section still containing tunnel material.
    fn next_section(&self, world: &WorldView) -> Option<u32> {
        (0..self.length).find(|n| !section_is_free(world, self.origin, self.direction, *n))
    }

    /// Where the agent stands to dig `section`: one step behind its feet
    /// column.
    fn stand_position(&self, section: u32) -> Pos {
        section_feet(self.origin, self.direction, section).step(self.direction.opposite())
    }

    fn guarded_place(&self, place_on: Pos, side: Direction, lit_cell: Pos) -> Task {
        Task::Conditional {
            condition: Condition::LightAtOrBelow {
                pos: lit_cell,
                level: self.torch_light_level,
            },
            task: Box::new(Task::place(
                place_on,
                side,
                blocks::TORCH,
                self.place_attempt_cap,
            )),
        }
    }

    fn torch_tasks(&self, feet: Pos, head: Pos, tasks: &mut Vec<Task>) {
        if self.torches.floor() {
            tasks.push(self.guarded_place(feet.below(), Direction::Up, feet));
        }
        let left = left_of(self.direction);
        if self.torches.left() {
            tasks.push(self.guarded_place(head.step(left), left.opposite(), head));
        }
        if self.torches.right() {
            let right = left.opposite();
            tasks.push(self.guarded_place(head.step(right), right.opposite(), head));
        }
    }
}

impl PathGoal for TunnelGoal {
    fn rate_destination(&self, world: &WorldView, distance: u32, pos: Pos) -> i64 {
        let Some(section) = self.next_section(world) else {
            return -1;
        };
        if pos == self.stand_position(section) {
            distance as i64 + 1
        } else {
            -1
        }
    }

    fn add_tasks_for_target(&mut self, world: &WorldView, _target: Pos, tasks: &mut Vec<Task>) {
        let Some(section) = self.next_section(world) else {
            return;
        };
        let feet = section_feet(self.origin, self.direction, section);
        let head = feet.above();

        tasks.push(Task::mark_section_reached(section));
        for cell in [feet, head] {
            if !sets::TUNNEL_FREE.is_at(world, cell) {
                tasks.push(Task::destroy(cell));
            }
        }
        if self.torches != TorchSide::None && section % self.torch_spacing == 0 {
            let region = Cuboid::new(feet, head);
            if world.get_volume(&region, &sets::TORCH) == 0 {
                self.torch_tasks(feet, head, tasks);
            }
        }
        tasks.push(Task::walk_to(feet, self.move_timeout_ticks));
        tasks.push(Task::mark_section_done(section));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_of_cycles_counterclockwise() {
        let mut direction = Direction::East;
        for _ in 0..4 {
            direction = left_of(direction);
        }
        assert_eq!(direction, Direction::East);
    }

    #[test]
    fn section_feet_walks_the_axis() {
        let origin = Pos::new(10, 5, -3);
        assert_eq!(section_feet(origin, Direction::South, 0), origin);
        assert_eq!(
            section_feet(origin, Direction::South, 4),
            Pos::new(10, 5, 1)
        );
        assert_eq!(
            section_feet(origin, Direction::West, 2),
            Pos::new(8, 5, -3)
        );
    }

    #[test]
    fn invalid_axis_aborts() {
        let config = BotConfig::default();
        let mut strategy = TunnelStrategy::new(Pos::new(0, 1, 0), 1, 1, 8, TorchSide::None, &config);
        assert!(strategy.direction.is_none());
        assert!(strategy.check_should_take_over(&WorldSnapshot::empty(Pos::default()), &NullActor));
        // Abort is reported through on_tick; covered by the controller tests.
    }

    struct NullActor;

    impl ActorOps for NullActor {
        fn position(&self) -> Pos {
            Pos::default()
        }
        fn has_item(&self, _set: &crate::block::BlockSet) -> bool {
            false
        }
        fn select_item(&mut self, _set: &crate::block::BlockSet) -> bool {
            false
        }
        fn face_block(&mut self, _pos: Pos, _side: Direction) -> bool {
            false
        }
        fn is_facing(&self, _pos: Pos, _side: Direction) -> bool {
            false
        }
        fn face_towards(&mut self, _pos: Pos) {}
        fn request_break(&mut self, _pos: Pos) {}
        fn request_place(&mut self, _pos: Pos, _side: Direction, _item: crate::block::BlockId) {}
        fn request_use_item(&mut self) {}
        fn override_movement(&mut self, _input: crate::ops::MovementInput) {}
        fn closest_entity(
            &self,
            _max_distance: u32,
            _predicate: &dyn Fn(&crate::ops::EntityRef) -> bool,
        ) -> Option<crate::ops::EntityRef> {
            None
        }
        fn current_look_target(&self) -> Option<crate::ops::RayHit> {
            None
        }
    }
}
