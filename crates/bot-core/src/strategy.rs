//! The strategy tick protocol and the shared search-driven executor.
//!
//! A strategy is a long-lived state machine driven one tick at a time by
//! the controller. Most bundled strategies delegate the mechanical part
//! (plan a path, run the queue, recover from desyncs) to [`SearchExecutor`]
//! and keep only goal rating and progress bookkeeping for themselves.

use std::sync::Arc;

use contracts::{BotConfig, JournalEntry, ProgressReport, TickResult};

use crate::ops::ActorOps;
use crate::path::{FoundPath, PathFinder, PathGoal, SearchExhausted, SearchMode};
use crate::task::{DesyncError, ProgressNote, ReservationTable, TaskOps, TaskQueue};
use crate::world::{WorldSnapshot, WorldView};

/// Queue length at or below which the executor starts a speculative search
/// for the next destination.
const PREFETCH_THRESHOLD: usize = 4;

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Everything a strategy sees during one tick invocation.
pub struct TickCtx<'a> {
    pub tick: u64,
    pub snapshot: &'a Arc<WorldSnapshot>,
    pub actor: &'a mut dyn ActorOps,
    pub config: &'a BotConfig,
    pub journal: &'a mut Vec<JournalEntry>,
}

/// A tickable goal-seeking state machine.
///
/// Lifecycle: `check_should_take_over` is polled while inactive;
/// `on_activate` fires on every (re)activation, `on_deactivate` on every
/// suspension, and both may fire many times over a strategy's life.
/// `Send` so a controller can live behind an async server mutex.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Whether this strategy wants control right now. Polled every tick
    /// for inactive strategies; the controller activates the
    /// highest-priority one that answers true.
    fn check_should_take_over(&mut self, snapshot: &WorldSnapshot, actor: &dyn ActorOps) -> bool;

    fn on_activate(&mut self) {}

    /// Release reservations and abandon the in-flight queue. Internal
    /// progress must survive so a later reactivation resumes, not
    /// restarts.
    fn on_deactivate(&mut self) {}

    fn on_tick(&mut self, ctx: &mut TickCtx<'_>) -> TickResult;

    /// One line for operators, shown in status output.
    fn description(&self) -> String;

    fn progress(&self) -> Option<ProgressReport> {
        None
    }

    /// In-flight tasks, for status reporting.
    fn queue_depth(&self) -> usize {
        0
    }

    /// Whether the controller may suspend and later resume this strategy.
    fn resumable(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// SearchExecutor
// ---------------------------------------------------------------------------

/// What one executor tick produced, for the owning strategy to interpret.
#[derive(Debug)]
pub struct ExecOutcome {
    pub result: TickResult,
    pub notes: Vec<ProgressNote>,
    pub desync: Option<DesyncError>,
    pub exhausted: Option<SearchExhausted>,
}

impl ExecOutcome {
    fn handled() -> Self {
        Self {
            result: TickResult::TickHandled,
            notes: Vec::new(),
            desync: None,
            exhausted: None,
        }
    }
}

/// Plans against a goal, runs the resulting queue one step per tick, folds
/// committed effects into its world view, and recovers from desyncs by
/// aborting the queue and replanning from freshly observed state.
pub struct SearchExecutor {
    finder: PathFinder,
    queue: TaskQueue,
    reservations: ReservationTable,
    view: WorldView,
    prefetched: Option<FoundPath>,
}

impl SearchExecutor {
    pub fn new(config: &BotConfig) -> Self {
        let finder = PathFinder::new(
            config.max_search_distance,
            config.search_node_budget,
            config.move_timeout_ticks,
        );
        Self {
            finder,
            queue: TaskQueue::new(),
            reservations: ReservationTable::new(),
            view: WorldView::new(Arc::new(WorldSnapshot::empty(Default::default()))),
            prefetched: None,
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn view(&self) -> &WorldView {
        &self.view
    }

    /// Abandon all in-flight work, releasing reservations. Called from
    /// `on_deactivate`.
    pub fn abandon(&mut self) {
        self.queue.cancel_all(&mut self.reservations);
        self.prefetched = None;
    }

    /// Advance by at most one task step.
    pub fn tick(
        &mut self,
        snapshot: &Arc<WorldSnapshot>,
        actor: &mut dyn ActorOps,
        goal: &mut dyn PathGoal,
    ) -> ExecOutcome {
        self.view.rebase(Arc::clone(snapshot));
        let mut outcome = ExecOutcome::handled();

        // After a desync the queue is empty, so the next tick replans from
        // the freshly rebased view.
        if self.queue.is_empty() {
            if let Err(exhausted) = self.replan(goal) {
                outcome.exhausted = Some(exhausted);
                outcome.result = TickResult::NoMoreWork;
                return outcome;
            }
            if self.queue.is_empty() {
                outcome.result = TickResult::NoMoreWork;
                return outcome;
            }
        }

        let mut ops = TaskOps::new(&mut self.reservations);
        let completed = self.queue.step(&self.view, actor, &mut ops);
        outcome.notes = ops.take_notes();
        let desync = ops.take_desync();
        let wants_tick_again = ops.wants_tick_again();
        drop(ops);

        if let Some(desync) = desync {
            self.queue.cancel_all(&mut self.reservations);
            self.prefetched = None;
            outcome.desync = Some(desync);
            return outcome;
        }

        if let Some(task) = completed {
            if task.applies_to_delta() {
                task.apply_to_delta(&mut self.view);
            }
            // Pops are free; consume the next task within the same tick.
            outcome.result = TickResult::TickAgain;
        } else if wants_tick_again {
            outcome.result = TickResult::TickAgain;
        }

        if self.prefetched.is_none()
            && !self.queue.is_empty()
            && self.queue.len() <= PREFETCH_THRESHOLD
        {
            self.prefetch(goal);
        }

        outcome
    }

    /// Speculatively search from the state the remaining queue will leave
    /// behind. Committing tasks are filtered out of the cached plan.
    fn prefetch(&mut self, goal: &mut dyn PathGoal) {
        let mut predicted = self.view.clone();
        for task in self.queue.iter() {
            if task.applies_to_delta() {
                task.apply_to_delta(&mut predicted);
            }
        }
        if let Ok(found) = self.finder.find_best(&predicted, goal, SearchMode::Prefetch) {
            self.prefetched = Some(found);
        }
    }

    fn replan(&mut self, goal: &mut dyn PathGoal) -> Result<(), SearchExhausted> {
        // A cached prefetch is only adopted after re-validation against the
        // current view: the target must still rate and still be reachable.
        if let Some(found) = self.prefetched.take() {
            if goal.rate_destination(&self.view, found.distance, found.target) >= 0 {
                if let Ok(walk) = self.finder.find_path_to(&self.view, found.target) {
                    let mut tasks = walk.tasks;
                    goal.add_tasks_for_target(&self.view, found.target, &mut tasks);
                    self.queue.extend(tasks);
                    return Ok(());
                }
            }
        }
        let found = self.finder.find_best(&self.view, goal, SearchMode::Normal)?;
        self.queue.extend(found.tasks);
        Ok(())
    }
}
