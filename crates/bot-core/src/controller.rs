//! The per-tick arbiter: owns the registered strategies, decides which one
//! controls the agent, and drives it through the tick protocol.
//!
//! Only the tick thread touches strategies and world state. The one piece
//! of shared state is the operator-facing description string, kept behind
//! its own narrow mutex so status queries never contend with planning.

use std::sync::{Arc, Mutex};

use contracts::{
    BotConfig, JournalEntry, JournalEntryKind, ProgressReport, StrategyRequest, TickResult,
};
use serde_json::json;

use crate::ops::ActorOps;
use crate::strategies::build_strategy;
use crate::strategy::{Strategy, TickCtx};
use crate::world::WorldSnapshot;

struct RegisteredStrategy {
    strategy: Box<dyn Strategy>,
    /// Interrupters stay registered after reporting NoMoreWork; requested
    /// goal strategies are removed once finished.
    persistent: bool,
    ever_active: bool,
    dead: bool,
}

pub struct Controller {
    config: BotConfig,
    strategies: Vec<RegisteredStrategy>,
    active: Option<usize>,
    pending_request: Option<StrategyRequest>,
    halted: bool,
    tick: u64,
    journal: Vec<JournalEntry>,
    description: Arc<Mutex<String>>,
}

impl Controller {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            strategies: Vec::new(),
            active: None,
            pending_request: None,
            halted: false,
            tick: 0,
            journal: Vec::new(),
            description: Arc::new(Mutex::new(String::from("idle"))),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Register a long-lived interrupter ahead of any requested goal
    /// strategy. Registration order is priority order.
    pub fn register_interrupter(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(RegisteredStrategy {
            strategy,
            persistent: true,
            ever_active: false,
            dead: false,
        });
    }

    /// Queue a goal strategy for activation on the next tick. A pending
    /// request that has not been picked up yet is replaced.
    pub fn request_strategy(&mut self, request: StrategyRequest) {
        self.pending_request = Some(request);
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn active_strategy_name(&self) -> Option<String> {
        self.active
            .map(|index| self.strategies[index].strategy.name().to_string())
    }

    pub fn active_progress(&self) -> Option<ProgressReport> {
        self.active
            .and_then(|index| self.strategies[index].strategy.progress())
    }

    pub fn active_queue_depth(&self) -> usize {
        self.active
            .map(|index| self.strategies[index].strategy.queue_depth())
            .unwrap_or(0)
    }

    /// Cloneable handle to the operator description. Readers lock it for
    /// one string clone at most.
    pub fn description_handle(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.description)
    }

    pub fn current_description(&self) -> String {
        self.description
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Run one game tick: arbitration, then up to `tick_again_limit` bounded
    /// re-invocations of the winning strategy.
    pub fn on_game_tick(&mut self, snapshot: &Arc<WorldSnapshot>, actor: &mut dyn ActorOps) {
        if self.halted {
            self.deactivate_active(JournalEntryKind::StrategySuspended);
            self.set_description("halted".to_string());
            self.tick += 1;
            return;
        }

        self.intake_request();
        self.arbitrate(snapshot, actor);

        if let Some(index) = self.active {
            let mut iterations = 0u32;
            loop {
                let result = {
                    let entry = &mut self.strategies[index];
                    let mut ctx = TickCtx {
                        tick: self.tick,
                        snapshot,
                        actor,
                        config: &self.config,
                        journal: &mut self.journal,
                    };
                    entry.strategy.on_tick(&mut ctx)
                };
                match result {
                    TickResult::TickAgain => {
                        iterations += 1;
                        if iterations >= self.config.tick_again_limit {
                            break;
                        }
                    }
                    TickResult::TickHandled => break,
                    TickResult::NoMoreWork => {
                        self.finish_active(JournalEntryKind::StrategyFinished);
                        break;
                    }
                    TickResult::Abort => {
                        self.strategies[index].dead = true;
                        self.finish_active(JournalEntryKind::StrategyAborted);
                        break;
                    }
                }
            }
        }

        let description = match self.active {
            Some(index) => self.strategies[index].strategy.description(),
            None => "idle".to_string(),
        };
        self.set_description(description);

        let cadence = self.config.snapshot_every_ticks.max(1);
        if self.tick % cadence == 0 {
            self.journal.push(JournalEntry::new(
                self.tick,
                JournalEntryKind::TickSummary,
                json!({
                    "active": self.active_strategy_name(),
                    "queue_depth": self.active_queue_depth(),
                    "player": actor.position(),
                }),
            ));
        }
        self.tick += 1;
    }

    /// Materialize a pending request. An explicit request preempts: the
    /// active strategy is deactivated and any earlier requested goal is
    /// discarded, so the new strategy wins the arbitration that follows.
    fn intake_request(&mut self) {
        if let Some(request) = self.pending_request.take() {
            self.deactivate_active(JournalEntryKind::StrategySuspended);
            self.strategies.retain(|entry| entry.persistent);
            let strategy = build_strategy(&request, &self.config);
            self.strategies.push(RegisteredStrategy {
                strategy,
                persistent: false,
                ever_active: false,
                dead: false,
            });
        }
    }

    /// Hand control to the highest-priority strategy that wants it.
    fn arbitrate(&mut self, snapshot: &Arc<WorldSnapshot>, actor: &mut dyn ActorOps) {
        let desired = self.strategies.iter_mut().position(|entry| {
            !entry.dead && entry.strategy.check_should_take_over(snapshot.as_ref(), actor)
        });

        if desired == self.active {
            return;
        }
        self.deactivate_active(JournalEntryKind::StrategySuspended);
        if let Some(index) = desired {
            let entry = &mut self.strategies[index];
            let kind = if entry.ever_active {
                JournalEntryKind::StrategyResumed
            } else {
                JournalEntryKind::StrategyActivated
            };
            entry.strategy.on_activate();
            entry.ever_active = true;
            self.journal.push(JournalEntry::new(
                self.tick,
                kind,
                json!({ "strategy": entry.strategy.name() }),
            ));
        }
        self.active = desired;
    }

    fn deactivate_active(&mut self, kind: JournalEntryKind) {
        if let Some(index) = self.active.take() {
            let entry = &mut self.strategies[index];
            entry.strategy.on_deactivate();
            // A strategy that cannot be resumed never reactivates.
            if !entry.strategy.resumable() {
                entry.dead = true;
            }
            self.journal.push(JournalEntry::new(
                self.tick,
                kind,
                json!({ "strategy": entry.strategy.name() }),
            ));
        }
    }

    /// Deactivate the active strategy because it reported completion, and
    /// drop it from the registry unless it is a persistent interrupter.
    fn finish_active(&mut self, kind: JournalEntryKind) {
        if let Some(index) = self.active.take() {
            let entry = &mut self.strategies[index];
            entry.strategy.on_deactivate();
            self.journal.push(JournalEntry::new(
                self.tick,
                kind,
                json!({ "strategy": entry.strategy.name() }),
            ));
            if !self.strategies[index].persistent {
                self.strategies.remove(index);
            }
        }
    }

    fn set_description(&self, description: String) {
        if let Ok(mut guard) = self.description.lock() {
            *guard = description;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{blocks, BlockLookup};
    use crate::sim::{SimRig, SimWorld};
    use contracts::{Pos, TorchSide};

    fn run_ticks(controller: &mut Controller, rig: &mut SimRig, ticks: u32) {
        for _ in 0..ticks {
            rig.begin_tick();
            let snapshot = Arc::new(rig.world().snapshot());
            controller.on_game_tick(&snapshot, rig);
            rig.apply_tick();
        }
    }

    #[test]
    fn move_request_walks_the_agent_and_retires() {
        let world = SimWorld::flat_plane(10, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.request_strategy(StrategyRequest::MoveTo {
            target: Pos::new(3, 1, 4),
        });

        run_ticks(&mut controller, &mut rig, 12);
        assert_eq!(rig.position(), Pos::new(3, 1, 4));
        assert!(controller.active_strategy_name().is_none());
        assert!(controller
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategyFinished));
        assert_eq!(controller.current_description(), "idle");
    }

    #[test]
    fn halt_suspends_and_resume_reactivates() {
        let world = SimWorld::flat_plane(10, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.request_strategy(StrategyRequest::MoveTo {
            target: Pos::new(6, 1, 0),
        });

        run_ticks(&mut controller, &mut rig, 2);
        let paused_at = rig.position();
        controller.set_halted(true);
        run_ticks(&mut controller, &mut rig, 5);
        assert_eq!(rig.position(), paused_at);
        assert_eq!(controller.current_description(), "halted");

        controller.set_halted(false);
        run_ticks(&mut controller, &mut rig, 12);
        assert_eq!(rig.position(), Pos::new(6, 1, 0));
        assert!(controller
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategyResumed));
    }

    #[test]
    fn new_request_preempts_the_active_strategy() {
        let mut world = SimWorld::flat_plane(20, Pos::new(0, 1, 0));
        // A wall so the tunnel has real work and stays active.
        for x in 1..=3 {
            world.set_block(Pos::new(x, 1, 5), blocks::STONE);
            world.set_block(Pos::new(x, 2, 5), blocks::STONE);
        }
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.request_strategy(StrategyRequest::MoveTo {
            target: Pos::new(15, 1, 15),
        });
        run_ticks(&mut controller, &mut rig, 3);
        assert_eq!(controller.active_strategy_name().as_deref(), Some("move_to"));

        controller.request_strategy(StrategyRequest::Tunnel {
            origin: Pos::new(1, 1, 5),
            dx: 1,
            dz: 0,
            length: 3,
            torches: TorchSide::None,
        });
        run_ticks(&mut controller, &mut rig, 2);
        assert_eq!(controller.active_strategy_name().as_deref(), Some("tunnel"));
        assert!(controller
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategySuspended));
    }

    #[test]
    fn new_request_discards_the_stale_resumable_goal() {
        let world = SimWorld::flat_plane(10, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.request_strategy(StrategyRequest::MoveTo {
            target: Pos::new(6, 1, 0),
        });
        run_ticks(&mut controller, &mut rig, 2);

        controller.set_halted(true);
        run_ticks(&mut controller, &mut rig, 1);
        controller.request_strategy(StrategyRequest::MoveTo {
            target: Pos::new(0, 1, 5),
        });
        controller.set_halted(false);
        run_ticks(&mut controller, &mut rig, 20);

        // The replaced goal is gone for good; only the new target is walked.
        assert_eq!(rig.position(), Pos::new(0, 1, 5));
        assert!(controller
            .journal()
            .iter()
            .all(|entry| entry.kind != JournalEntryKind::StrategyResumed));
    }

    #[test]
    fn invalid_tunnel_request_aborts() {
        let world = SimWorld::flat_plane(6, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        // Diagonal axis is not a tunnel.
        controller.request_strategy(StrategyRequest::Tunnel {
            origin: Pos::new(1, 1, 0),
            dx: 1,
            dz: 1,
            length: 4,
            torches: TorchSide::None,
        });

        run_ticks(&mut controller, &mut rig, 3);
        assert!(controller
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategyAborted));
        assert!(controller.active_strategy_name().is_none());
    }

    #[test]
    fn tunnel_digs_sections_in_order() {
        let mut world = SimWorld::flat_plane(8, Pos::new(0, 1, 0));
        // A short wall to dig through.
        for x in 1..=3 {
            world.set_block(Pos::new(x, 1, 0), blocks::STONE);
            world.set_block(Pos::new(x, 2, 0), blocks::STONE);
        }
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.request_strategy(StrategyRequest::Tunnel {
            origin: Pos::new(1, 1, 0),
            dx: 1,
            dz: 0,
            length: 3,
            torches: TorchSide::None,
        });

        run_ticks(&mut controller, &mut rig, 80);
        for x in 1..=3 {
            assert_eq!(rig.world().block_at(Pos::new(x, 1, 0)), blocks::AIR);
            assert_eq!(rig.world().block_at(Pos::new(x, 2, 0)), blocks::AIR);
        }
        assert!(controller
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategyFinished));
    }

    #[test]
    fn tick_again_loop_is_bounded() {
        struct GreedyStrategy;
        impl Strategy for GreedyStrategy {
            fn name(&self) -> &'static str {
                "greedy"
            }
            fn check_should_take_over(
                &mut self,
                _snapshot: &WorldSnapshot,
                _actor: &dyn ActorOps,
            ) -> bool {
                true
            }
            fn on_tick(&mut self, _ctx: &mut TickCtx<'_>) -> TickResult {
                TickResult::TickAgain
            }
            fn description(&self) -> String {
                "spinning".to_string()
            }
        }

        let world = SimWorld::flat_plane(4, Pos::new(0, 1, 0));
        let mut rig = SimRig::new(world);
        let mut controller = Controller::new(BotConfig::default());
        controller.register_interrupter(Box::new(GreedyStrategy));
        // Terminates despite the strategy never yielding.
        run_ticks(&mut controller, &mut rig, 3);
        assert_eq!(controller.current_tick(), 3);
    }
}
