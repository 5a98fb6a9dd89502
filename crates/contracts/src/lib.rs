//! v1 cross-boundary contracts shared by the bot core, API, and CLI.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// An axis direction on the voxel grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Horizontal directions in the deterministic neighbor-expansion order.
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub const ALL: [Direction; 6] = [
        Direction::Up,
        Direction::Down,
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::Up => (0, 1, 0),
            Direction::Down => (0, -1, 0),
            Direction::North => (0, 0, -1),
            Direction::South => (0, 0, 1),
            Direction::East => (1, 0, 0),
            Direction::West => (-1, 0, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    pub fn is_horizontal(self) -> bool {
        !matches!(self, Direction::Up | Direction::Down)
    }

    /// The horizontal direction matching a (dx, dz) track, if any.
    pub fn for_xz(dx: i32, dz: i32) -> Option<Direction> {
        match (dx.signum(), dz.signum()) {
            (1, 0) => Some(Direction::East),
            (-1, 0) => Some(Direction::West),
            (0, 1) => Some(Direction::South),
            (0, -1) => Some(Direction::North),
            _ => None,
        }
    }
}

/// An integer grid position.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Pos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy, dz) = direction.offset();
        self.offset(dx, dy, dz)
    }

    pub fn above(self) -> Self {
        self.offset(0, 1, 0)
    }

    pub fn below(self) -> Self {
        self.offset(0, -1, 0)
    }

    pub fn manhattan_distance(self, other: Pos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Run configuration and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotConfig {
    pub schema_version: String,
    pub run_id: String,
    pub seed: u64,
    /// Maximum walk distance the pathfinder explores from the start.
    pub max_search_distance: u32,
    /// Hard cap on visited nodes per search pass.
    pub search_node_budget: u32,
    /// Bound on same-tick TickAgain re-invocations of a strategy.
    pub tick_again_limit: u32,
    /// Placement attempts before a place task completes without success.
    pub place_attempt_cap: u32,
    /// Ticks a move task waits before declaring a desync.
    pub move_timeout_ticks: u32,
    /// Place a torch when the light level is at or below this.
    pub torch_light_level: u8,
    /// Tunnel sections between torches.
    pub torch_spacing: u32,
    pub snapshot_every_ticks: u64,
    pub max_ticks: u64,
    pub notes: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            seed: 1337,
            max_search_distance: 150,
            search_node_budget: 10_000,
            tick_again_limit: 100,
            place_attempt_cap: 20,
            move_timeout_ticks: 40,
            torch_light_level: 7,
            torch_spacing: 8,
            snapshot_every_ticks: 24,
            max_ticks: 720,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Running,
    Halted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotStatus {
    pub schema_version: String,
    pub run_id: String,
    pub current_tick: u64,
    pub max_ticks: u64,
    pub mode: RunMode,
    pub active_strategy: Option<String>,
    pub queue_depth: usize,
}

impl BotStatus {
    pub fn is_complete(&self) -> bool {
        self.current_tick >= self.max_ticks
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} tick={}/{} mode={:?} strategy={} queue_depth={}",
            self.run_id,
            self.current_tick,
            self.max_ticks,
            self.mode,
            self.active_strategy.as_deref().unwrap_or("-"),
            self.queue_depth
        )
    }
}

// ---------------------------------------------------------------------------
// Strategy tick protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickResult {
    /// Re-invoke the strategy within the same game tick (bounded).
    TickAgain,
    /// The tick was consumed normally.
    TickHandled,
    /// The goal is complete or unreachable; deactivate.
    NoMoreWork,
    /// Unrecoverable strategy failure; deactivate permanently.
    Abort,
}

/// The side of a tunnel at which torches are placed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorchSide {
    None,
    Left,
    Right,
    Both,
    Floor,
}

impl TorchSide {
    pub fn left(self) -> bool {
        matches!(self, TorchSide::Left | TorchSide::Both)
    }

    pub fn right(self) -> bool {
        matches!(self, TorchSide::Right | TorchSide::Both)
    }

    pub fn floor(self) -> bool {
        matches!(self, TorchSide::Floor)
    }
}

/// Request to activate a strategy on the next game tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyRequest {
    Tunnel {
        origin: Pos,
        dx: i32,
        dz: i32,
        length: u32,
        torches: TorchSide,
    },
    PlaceTorches,
    MoveTo {
        target: Pos,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressReport {
    pub strategy: String,
    pub completed: u32,
    pub total: u32,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryKind {
    StrategyActivated,
    StrategySuspended,
    StrategyResumed,
    StrategyFinished,
    StrategyAborted,
    TaskDesync,
    SearchExhausted,
    TickSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub tick: u64,
    pub kind: JournalEntryKind,
    pub detail: Value,
}

impl JournalEntry {
    pub fn new(tick: u64, kind: JournalEntryKind, detail: Value) -> Self {
        Self { tick, kind, detail }
    }
}

// ---------------------------------------------------------------------------
// API error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RunNotFound,
    RunStateConflict,
    InvalidQuery,
    InvalidCommand,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            code,
            message: message.into(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_are_unit_steps() {
        for direction in Direction::ALL {
            let (dx, dy, dz) = direction.offset();
            assert_eq!(dx.abs() + dy.abs() + dz.abs(), 1);
        }
    }

    #[test]
    fn direction_opposite_round_trips() {
        for direction in Direction::ALL {
            assert_eq!(direction.opposite().opposite(), direction);
        }
    }

    #[test]
    fn pos_step_matches_manhattan() {
        let origin = Pos::new(0, 64, 0);
        let stepped = origin.step(Direction::East).step(Direction::South);
        assert_eq!(origin.manhattan_distance(stepped), 2);
    }

    #[test]
    fn strategy_request_round_trip() {
        let request = StrategyRequest::Tunnel {
            origin: Pos::new(10, 12, -4),
            dx: 1,
            dz: 0,
            length: 64,
            torches: TorchSide::Both,
        };
        let serialized = serde_json::to_string(&request).expect("serialize");
        let decoded: StrategyRequest = serde_json::from_str(&serialized).expect("deserialize");
        assert_eq!(request, decoded);
    }

    #[test]
    fn default_config_is_complete() {
        let config = BotConfig::default();
        assert!(config.max_search_distance > 0);
        assert!(config.search_node_budget > 0);
        assert!(config.tick_again_limit > 0);
        assert!(config.place_attempt_cap > 0);
        assert!(config.move_timeout_ticks > 0);
        assert!(config.torch_spacing > 0);
        assert!(config.max_ticks > 0);
    }

    #[test]
    fn status_display_names_the_strategy() {
        let status = BotStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_a".to_string(),
            current_tick: 3,
            max_ticks: 10,
            mode: RunMode::Running,
            active_strategy: Some("tunnel".to_string()),
            queue_depth: 2,
        };
        let rendered = status.to_string();
        assert!(rendered.contains("tick=3/10"));
        assert!(rendered.contains("strategy=tunnel"));
    }
}
