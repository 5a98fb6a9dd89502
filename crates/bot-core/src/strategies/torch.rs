//! Interrupter that lights up dark ground near the agent.
//!
//! Takes over whenever the agent stands in the dark with a torch in the
//! inventory, places torches on the darkest reachable floor spots, then
//! yields. Spots that were already tried are skipped so a failed placement
//! cannot wedge the agent in a takeover loop.

use std::collections::BTreeSet;

use contracts::{BotConfig, JournalEntry, JournalEntryKind, Pos, TickResult};
use serde_json::json;

use crate::block::{blocks, sets};
use crate::ops::ActorOps;
use crate::path::PathGoal;
use crate::strategy::{SearchExecutor, Strategy, TickCtx};
use crate::task::{Condition, Task};
use crate::world::{WorldSnapshot, WorldView};

/// Torches go near where the agent already is; lighting far-away ground is
/// somebody else's goal.
const NEAR_RADIUS: u32 = 4;

pub struct PlaceTorchStrategy {
    executor: SearchExecutor,
    attempted: BTreeSet<Pos>,
    torch_light_level: u8,
    place_attempt_cap: u32,
}

impl PlaceTorchStrategy {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            executor: SearchExecutor::new(config),
            attempted: BTreeSet::new(),
            torch_light_level: config.torch_light_level,
            place_attempt_cap: config.place_attempt_cap,
        }
    }
}

struct TorchSpotGoal<'a> {
    attempted: &'a mut BTreeSet<Pos>,
    torch_light_level: u8,
    place_attempt_cap: u32,
}

impl PathGoal for TorchSpotGoal<'_> {
    fn rate_destination(&self, world: &WorldView, distance: u32, pos: Pos) -> i64 {
        if distance > NEAR_RADIUS || self.attempted.contains(&pos) {
            return -1;
        }
        let light = world.light_level_at(pos);
        if light <= self.torch_light_level && sets::TORCH_BASE.is_at(world, pos.below()) {
            // Darker spots score higher; ties go to the nearer spot.
            (self.torch_light_level - light) as i64
        } else {
            -1
        }
    }

    fn add_tasks_for_target(&mut self, _world: &WorldView, target: Pos, tasks: &mut Vec<Task>) {
        self.attempted.insert(target);
        tasks.push(Task::Conditional {
            condition: Condition::LightAtOrBelow {
                pos: target,
                level: self.torch_light_level,
            },
            task: Box::new(Task::place(
                target.below(),
                contracts::Direction::Up,
                blocks::TORCH,
                self.place_attempt_cap,
            )),
        });
    }
}

impl Strategy for PlaceTorchStrategy {
    fn name(&self) -> &'static str {
        "place_torches"
    }

    fn check_should_take_over(&mut self, snapshot: &WorldSnapshot, actor: &dyn ActorOps) -> bool {
        let feet = actor.position();
        snapshot.light_level_at(feet) <= self.torch_light_level
            && actor.has_item(&sets::TORCH)
            && !self.attempted.contains(&feet)
    }

    fn on_deactivate(&mut self) {
        self.executor.abandon();
    }

    fn on_tick(&mut self, ctx: &mut TickCtx<'_>) -> TickResult {
        if !ctx.actor.has_item(&sets::TORCH) {
            return TickResult::NoMoreWork;
        }
        let mut goal = TorchSpotGoal {
            attempted: &mut self.attempted,
            torch_light_level: self.torch_light_level,
            place_attempt_cap: self.place_attempt_cap,
        };
        let outcome = self.executor.tick(ctx.snapshot, ctx.actor, &mut goal);
        if let Some(desync) = &outcome.desync {
            ctx.journal.push(JournalEntry::new(
                ctx.tick,
                JournalEntryKind::TaskDesync,
                json!({ "strategy": self.name(), "reason": desync.reason }),
            ));
        }
        outcome.result
    }

    fn description(&self) -> String {
        format!("placing torches ({} spots tried)", self.attempted.len())
    }

    fn queue_depth(&self) -> usize {
        self.executor.queue_depth()
    }
}
