//! Walk to a single position and stop.

use contracts::{
    BotConfig, JournalEntry, JournalEntryKind, Pos, ProgressReport, TickResult,
};
use serde_json::json;

use crate::ops::ActorOps;
use crate::path::PathGoal;
use crate::strategy::{SearchExecutor, Strategy, TickCtx};
use crate::task::Task;
use crate::world::{WorldSnapshot, WorldView};

pub struct MoveToStrategy {
    target: Pos,
    executor: SearchExecutor,
    done: bool,
}

struct ReachGoal {
    target: Pos,
}

impl PathGoal for ReachGoal {
    fn rate_destination(&self, _world: &WorldView, _distance: u32, pos: Pos) -> i64 {
        if pos == self.target {
            0
        } else {
            -1
        }
    }

    fn add_tasks_for_target(&mut self, _world: &WorldView, _target: Pos, _tasks: &mut Vec<Task>) {}
}

impl MoveToStrategy {
    pub fn new(target: Pos, config: &BotConfig) -> Self {
        Self {
            target,
            executor: SearchExecutor::new(config),
            done: false,
        }
    }
}

impl Strategy for MoveToStrategy {
    fn name(&self) -> &'static str {
        "move_to"
    }

    fn check_should_take_over(&mut self, _snapshot: &WorldSnapshot, _actor: &dyn ActorOps) -> bool {
        !self.done
    }

    fn on_deactivate(&mut self) {
        self.executor.abandon();
    }

    fn on_tick(&mut self, ctx: &mut TickCtx<'_>) -> TickResult {
        if ctx.actor.position() == self.target {
            self.done = true;
            return TickResult::NoMoreWork;
        }
        let mut goal = ReachGoal {
            target: self.target,
        };
        let outcome = self.executor.tick(ctx.snapshot, ctx.actor, &mut goal);
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
                json!({ "strategy": self.name(), "visited": exhausted.visited }),
            ));
        }
        if outcome.result == TickResult::NoMoreWork {
            self.done = true;
        }
        outcome.result
    }

    fn description(&self) -> String {
        format!("walking to {}", self.target)
    }

    fn progress(&self) -> Option<ProgressReport> {
        None
    }

    fn queue_depth(&self) -> usize {
        self.executor.queue_depth()
    }
}
