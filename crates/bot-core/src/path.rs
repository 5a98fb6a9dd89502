//! Destination search: a bounded flood fill over standable positions that
//! picks the best-rated reachable destination and emits the task plan to
//! get there.
//!
//! The search is separated from goal rating. A [`PathGoal`] only answers
//! "how good is this position as a destination" and "which tasks finish the
//! job once the agent stands there"; the walk itself, its bounds, and its
//! tie-breaking live here.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use contracts::{Direction, Pos};

use crate::block::{sets, BlockSet};
use crate::task::Task;
use crate::world::WorldView;

// ---------------------------------------------------------------------------
// Walk policy
// ---------------------------------------------------------------------------

/// What the agent may stand on and walk through.
#[derive(Debug, Clone)]
pub struct WalkPolicy {
    /// Blocks the agent may stand on top of.
    pub ground: BlockSet,
    /// Blocks the agent's body (feet and head) may occupy.
    pub clear: BlockSet,
    /// Blocks that disqualify a position outright.
    pub hazard: BlockSet,
}

impl Default for WalkPolicy {
    fn default() -> Self {
        Self {
            ground: *sets::SAFE_GROUND,
            clear: *sets::FEET_CLEAR,
            hazard: *sets::HAZARD,
        }
    }
}

impl WalkPolicy {
    /// Whether the agent can stand with its feet at `pos`: solid safe
    /// ground below, two blocks of clearance, no hazard in either.
    pub fn is_standable(&self, world: &WorldView, pos: Pos) -> bool {
        self.ground.is_at(world, pos.below())
            && self.clear.is_at(world, pos)
            && self.clear.is_at(world, pos.above())
            && !self.hazard.is_at(world, pos)
            && !self.hazard.is_at(world, pos.above())
    }
}

// ---------------------------------------------------------------------------
// Goals
// ---------------------------------------------------------------------------

/// A destination-rating goal driving one search pass.
pub trait PathGoal {
    /// Score `pos` as a destination, given its walk distance from the
    /// start. Negative means "not a destination".
    fn rate_destination(&self, world: &WorldView, distance: u32, pos: Pos) -> i64;

    /// Append the tasks that finish the job once the agent stands at
    /// `target` (digs, placements, progress marks). Walking tasks are
    /// prepended by the search itself.
    fn add_tasks_for_target(&mut self, world: &WorldView, target: Pos, tasks: &mut Vec<Task>);
}

/// Reach a single position, nothing more.
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

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// A speculative search may not emit tasks that commit strategy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Normal,
    Prefetch,
}

/// The search ran out of candidates or budget without a usable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchExhausted {
    pub visited: u32,
    pub budget_hit: bool,
}

impl fmt::Display for SearchExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.budget_hit {
            write!(f, "search exhausted its node budget ({} visited)", self.visited)
        } else {
            write!(f, "no viable destination within range ({} visited)", self.visited)
        }
    }
}

/// A chosen destination and the plan to reach and finish it.
#[derive(Debug)]
pub struct FoundPath {
    pub target: Pos,
    pub score: i64,
    pub distance: u32,
    pub tasks: Vec<Task>,
}

/// Bounded best-destination flood fill.
#[derive(Debug, Clone)]
pub struct PathFinder {
    pub policy: WalkPolicy,
    pub max_distance: u32,
    pub node_budget: u32,
    pub move_timeout_ticks: u32,
}

impl PathFinder {
    pub fn new(max_distance: u32, node_budget: u32, move_timeout_ticks: u32) -> Self {
        Self {
            policy: WalkPolicy::default(),
            max_distance,
            node_budget,
            move_timeout_ticks,
        }
    }

    /// Explore outward from the agent's position and return the plan for
    /// the best-rated reachable destination.
    ///
    /// Candidates are expanded in breadth-first order, so among equally
    /// scored destinations the nearest wins, and among equally near ones
    /// the first discovered wins. Strictly better scores displace earlier
    /// picks regardless of distance.
    pub fn find_best(
        &self,
        world: &WorldView,
        goal: &mut dyn PathGoal,
        mode: SearchMode,
    ) -> Result<FoundPath, SearchExhausted> {
        let start = world.player_position();
        let mut frontier: VecDeque<(Pos, u32)> = VecDeque::new();
        let mut visited: BTreeSet<Pos> = BTreeSet::new();
        let mut parent: BTreeMap<Pos, Pos> = BTreeMap::new();
        let mut best: Option<(i64, Pos, u32)> = None;
        let mut budget_hit = false;

        frontier.push_back((start, 0));
        visited.insert(start);

        while let Some((pos, distance)) = frontier.pop_front() {
            if visited.len() as u32 > self.node_budget {
                budget_hit = true;
                break;
            }

            let score = goal.rate_destination(world, distance, pos);
            if score >= 0 && best.map_or(true, |(best_score, _, _)| score > best_score) {
                best = Some((score, pos, distance));
            }

            if distance >= self.max_distance {
                continue;
            }
            for next in self.neighbors(world, pos) {
                if visited.insert(next) {
                    parent.insert(next, pos);
                    frontier.push_back((next, distance + 1));
                }
            }
        }

        let Some((score, target, distance)) = best else {
            return Err(SearchExhausted {
                visited: visited.len() as u32,
                budget_hit,
            });
        };

        let mut tasks = self.walk_tasks(&parent, start, target);
        goal.add_tasks_for_target(world, target, &mut tasks);
        if mode == SearchMode::Prefetch {
            tasks.retain(|task| !task.commits_effect());
        }

        Ok(FoundPath {
            target,
            score,
            distance,
            tasks,
        })
    }

    /// Plan a walk to one exact position.
    pub fn find_path_to(&self, world: &WorldView, target: Pos) -> Result<FoundPath, SearchExhausted> {
        let mut goal = ReachGoal { target };
        self.find_best(world, &mut goal, SearchMode::Normal)
    }

    fn neighbors<'a>(&'a self, world: &'a WorldView, pos: Pos) -> impl Iterator<Item = Pos> + 'a {
        Direction::HORIZONTAL.into_iter().flat_map(move |direction| {
            let level = pos.step(direction);
            // Same level first, then a one-block step up or down.
            [level, level.above(), level.below()]
                .into_iter()
                .filter(move |candidate| self.policy.is_standable(world, *candidate))
                // Climbing requires headroom above the current position.
                .filter(move |candidate| {
                    candidate.y <= pos.y || self.policy.clear.is_at(world, pos.offset(0, 2, 0))
                })
                .take(1)
        })
    }

    fn walk_tasks(&self, parent: &BTreeMap<Pos, Pos>, start: Pos, target: Pos) -> Vec<Task> {
        let mut chain = vec![target];
        let mut cursor = target;
        while cursor != start {
            match parent.get(&cursor) {
                Some(previous) => {
                    chain.push(*previous);
                    cursor = *previous;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
            .into_iter()
            .skip(1)
            .map(|step| Task::walk_to(step, self.move_timeout_ticks))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{blocks, BlockId, BlockLookup};
    use crate::world::WorldSnapshot;
    use std::sync::Arc;

    fn flat_plane(size: i32, player: Pos) -> WorldView {
        let mut blocks_map = BTreeMap::new();
        for x in 0..size {
            for z in 0..size {
                blocks_map.insert(Pos::new(x, 0, z), blocks::STONE);
            }
        }
        WorldView::new(Arc::new(WorldSnapshot::new(
            blocks_map,
            BTreeMap::new(),
            player,
            0,
        )))
    }

    fn finder() -> PathFinder {
        PathFinder::new(150, 10_000, 40)
    }

    struct ScoreMap {
        scores: BTreeMap<Pos, i64>,
    }

    impl PathGoal for ScoreMap {
        fn rate_destination(&self, _world: &WorldView, _distance: u32, pos: Pos) -> i64 {
            self.scores.get(&pos).copied().unwrap_or(-1)
        }

        fn add_tasks_for_target(
            &mut self,
            _world: &WorldView,
            target: Pos,
            tasks: &mut Vec<Task>,
        ) {
            tasks.push(Task::destroy(target.below()));
        }
    }

    #[test]
    fn walk_plan_has_one_move_per_step() {
        let world = flat_plane(10, Pos::new(0, 1, 0));
        let found = finder()
            .find_path_to(&world, Pos::new(3, 1, 4))
            .expect("reachable");
        assert_eq!(found.target, Pos::new(3, 1, 4));
        assert_eq!(found.distance, 7);
        assert_eq!(found.tasks.len(), 7);
        assert!(found
            .tasks
            .iter()
            .all(|task| matches!(task, Task::Move { .. })));
    }

    #[test]
    fn standing_on_the_target_yields_an_empty_walk() {
        let world = flat_plane(4, Pos::new(1, 1, 1));
        let found = finder()
            .find_path_to(&world, Pos::new(1, 1, 1))
            .expect("trivially reachable");
        assert_eq!(found.distance, 0);
        assert!(found.tasks.is_empty());
    }

    #[test]
    fn higher_score_wins_over_closer_candidate() {
        let world = flat_plane(10, Pos::new(0, 1, 0));
        let mut goal = ScoreMap {
            scores: [(Pos::new(1, 1, 0), 1), (Pos::new(6, 1, 0), 9)]
                .into_iter()
                .collect(),
        };
        let found = finder()
            .find_best(&world, &mut goal, SearchMode::Normal)
            .expect("found");
        assert_eq!(found.target, Pos::new(6, 1, 0));
        assert_eq!(found.score, 9);
    }

    #[test]
    fn equal_scores_break_ties_by_distance() {
        let world = flat_plane(12, Pos::new(0, 1, 0));
        let mut goal = ScoreMap {
            scores: [(Pos::new(5, 1, 0), 4), (Pos::new(3, 1, 0), 4)]
                .into_iter()
                .collect(),
        };
        let found = finder()
            .find_best(&world, &mut goal, SearchMode::Normal)
            .expect("found");
        assert_eq!(found.target, Pos::new(3, 1, 0));
        assert_eq!(found.distance, 3);
    }

    #[test]
    fn all_negative_ratings_exhaust_the_search() {
        let world = flat_plane(4, Pos::new(0, 1, 0));
        let mut goal = ScoreMap {
            scores: BTreeMap::new(),
        };
        let error = finder()
            .find_best(&world, &mut goal, SearchMode::Normal)
            .expect_err("no destination");
        assert!(!error.budget_hit);
        assert!(error.visited >= 16);
    }

    #[test]
    fn node_budget_bounds_the_walk() {
        let world = flat_plane(50, Pos::new(0, 1, 0));
        let mut bounded = finder();
        bounded.node_budget = 5;
        let mut goal = ScoreMap {
            scores: [(Pos::new(40, 1, 40), 1)].into_iter().collect(),
        };
        let error = bounded
            .find_best(&world, &mut goal, SearchMode::Normal)
            .expect_err("budget too small");
        assert!(error.budget_hit);
    }

    #[test]
    fn hazards_are_not_standable() {
        let mut world = flat_plane(6, Pos::new(0, 1, 0));
        world.apply_delta(Pos::new(2, 1, 0), blocks::LAVA);
        assert!(!WalkPolicy::default().is_standable(&world, Pos::new(2, 1, 0)));
        assert_eq!(world.block_at(Pos::new(2, 1, 0)), BlockId(11));
    }

    #[test]
    fn prefetch_drops_committing_tasks() {
        struct MarkingGoal;
        impl PathGoal for MarkingGoal {
            fn rate_destination(&self, _world: &WorldView, _distance: u32, pos: Pos) -> i64 {
                if pos == Pos::new(2, 1, 0) {
                    1
                } else {
                    -1
                }
            }

            fn add_tasks_for_target(
                &mut self,
                _world: &WorldView,
                _target: Pos,
                tasks: &mut Vec<Task>,
            ) {
                tasks.push(Task::destroy(Pos::new(3, 1, 0)));
                tasks.push(Task::mark_section_done(0));
            }
        }

        let world = flat_plane(6, Pos::new(0, 1, 0));
        let found = finder()
            .find_best(&world, &mut MarkingGoal, SearchMode::Prefetch)
            .expect("found");
        assert!(found.tasks.iter().all(|task| !task.commits_effect()));
        assert!(found
            .tasks
            .iter()
            .any(|task| matches!(task, Task::Destroy { .. })));
    }
}
