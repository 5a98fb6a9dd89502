//! In-process control facade over a simulated bot run, with SQLite
//! persistence and an HTTP server on top.
//!
//! [`BotApi`] owns the controller, the simulated rig, and the persistence
//! state. Persistence failures never fail the run; they are recorded in
//! `last_persistence_error` and surfaced through status queries.

mod persistence;
mod server;

use std::path::Path;
use std::sync::Arc;

use bot_core::{Controller, PlaceTorchStrategy, SimRig, SimWorld};
use contracts::{
    ApiError, BotConfig, BotStatus, Direction, ErrorCode, JournalEntry, ProgressReport, RunMode,
    StrategyRequest,
};
use serde_json::json;

use persistence::SqliteRunStore;
pub use persistence::{PersistenceError, SnapshotRecord};
pub use server::{serve, ServerError};

#[derive(Debug)]
struct PersistenceState {
    store: SqliteRunStore,
    persisted_journal_count: usize,
    last_snapshot_tick: Option<u64>,
}

pub struct BotApi {
    rig: SimRig,
    controller: Controller,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl BotApi {
    /// Build a run over a caller-supplied world.
    pub fn new(config: BotConfig, world: SimWorld) -> Self {
        let mut controller = Controller::new(config.clone());
        controller.register_interrupter(Box::new(PlaceTorchStrategy::new(&config)));
        Self {
            rig: SimRig::new(world),
            controller,
            persistence: None,
            last_persistence_error: None,
        }
    }

    /// Build a run over the default flat test plane.
    pub fn from_config(config: BotConfig) -> Self {
        let world = SimWorld::flat_plane(32, contracts::Pos::new(0, 1, 0));
        Self::new(config, world)
    }

    pub fn run_id(&self) -> &str {
        &self.controller.config().run_id
    }

    pub fn config(&self) -> &BotConfig {
        self.controller.config()
    }

    pub fn rig_mut(&mut self) -> &mut SimRig {
        &mut self.rig
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteRunStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_journal_count: 0,
            last_snapshot_tick: None,
        });
        Ok(())
    }

    pub fn initialize_run_storage(
        &mut self,
        replace_existing_run: bool,
    ) -> Result<(), PersistenceError> {
        let run_id = self.run_id().to_string();
        let bootstrap = self.snapshot_record();
        let config = self.config().clone();
        let status = self.status();

        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };
        if state.store.run_exists(&run_id)? {
            if replace_existing_run {
                state.store.delete_run(&run_id)?;
                state.persisted_journal_count = 0;
                state.last_snapshot_tick = None;
            } else {
                return Err(PersistenceError::RunAlreadyExists(run_id));
            }
        }

        state
            .store
            .persist_delta(&config, &status, 0, &[], Some(&bootstrap))?;
        state.last_snapshot_tick = Some(bootstrap.tick);
        self.last_persistence_error = None;
        Ok(())
    }

    pub fn flush_persistence_checked(&mut self) -> Result<(), PersistenceError> {
        if self.persistence.is_none() {
            return Err(PersistenceError::NotAttached);
        }

        let config = self.config().clone();
        let status = self.status();
        let current_tick = status.current_tick;
        let cadence = config.snapshot_every_ticks.max(1);
        let complete = status.is_complete();

        let state = match self.persistence.as_mut() {
            Some(state) => state,
            None => return Err(PersistenceError::NotAttached),
        };
        let journal = self.controller.journal();
        let first_seq = state.persisted_journal_count;
        let new_entries = &journal[first_seq.min(journal.len())..];

        let snapshot_due = (current_tick % cadence == 0 || complete)
            && state.last_snapshot_tick != Some(current_tick);
        let snapshot = if snapshot_due {
            let mut blocks = Vec::new();
            for (pos, block) in self.rig.world().blocks() {
                blocks.push(json!([pos.x, pos.y, pos.z, block.0]));
            }
            Some(SnapshotRecord {
                run_id: config.run_id.clone(),
                tick: current_tick,
                payload: json!({
                    "player": self.rig.world().player_position(),
                    "tick": current_tick,
                    "blocks": blocks,
                }),
            })
        } else {
            None
        };

        state
            .store
            .persist_delta(&config, &status, first_seq, new_entries, snapshot.as_ref())?;
        state.persisted_journal_count = journal.len();
        if let Some(record) = snapshot {
            state.last_snapshot_tick = Some(record.tick);
        }
        self.last_persistence_error = None;
        Ok(())
    }

    pub fn load_journal_range(
        &self,
        run_id: &str,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<JournalEntry>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.load_journal_range(run_id, from_tick, to_tick)
    }

    pub fn load_latest_snapshot_at_or_before(
        &self,
        run_id: &str,
        tick: u64,
    ) -> Result<Option<SnapshotRecord>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.load_latest_snapshot_at_or_before(run_id, tick)
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    fn snapshot_record(&self) -> SnapshotRecord {
        let mut blocks = Vec::new();
        for (pos, block) in self.rig.world().blocks() {
            blocks.push(json!([pos.x, pos.y, pos.z, block.0]));
        }
        SnapshotRecord {
            run_id: self.run_id().to_string(),
            tick: self.controller.current_tick(),
            payload: json!({
                "player": self.rig.world().player_position(),
                "tick": self.controller.current_tick(),
                "blocks": blocks,
            }),
        }
    }

    fn flush_persistence_if_enabled(&mut self) {
        if self.persistence.is_none() {
            return;
        }
        if let Err(err) = self.flush_persistence_checked() {
            self.last_persistence_error = Some(err.to_string());
        }
    }

    // -----------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------

    pub fn halt(&mut self) -> BotStatus {
        self.controller.set_halted(true);
        self.flush_persistence_if_enabled();
        self.status()
    }

    pub fn resume(&mut self) -> BotStatus {
        self.controller.set_halted(false);
        self.flush_persistence_if_enabled();
        self.status()
    }

    /// Advance by the requested number of game ticks, bounded by the run's
    /// tick ceiling. Auto-resumes a halted run so explicit step requests
    /// always advance.
    pub fn step(&mut self, ticks: u64) -> (BotStatus, u64) {
        self.controller.set_halted(false);
        let max_ticks = self.config().max_ticks;
        let mut committed = 0;
        for _ in 0..ticks.max(1) {
            if self.controller.current_tick() >= max_ticks {
                break;
            }
            self.tick_once();
            committed += 1;
        }
        self.flush_persistence_if_enabled();
        (self.status(), committed)
    }

    pub fn run_to_tick(&mut self, tick: u64) -> (BotStatus, u64) {
        let current = self.controller.current_tick();
        if tick <= current {
            return (self.status(), 0);
        }
        self.step(tick - current)
    }

    /// Validate and enqueue a strategy request for the next tick.
    pub fn request(&mut self, request: StrategyRequest) -> Result<BotStatus, ApiError> {
        if self.status().is_complete() {
            return Err(ApiError::new(
                ErrorCode::RunStateConflict,
                "run has reached its tick ceiling",
                Some(format!("max_ticks={}", self.config().max_ticks)),
            ));
        }
        if let StrategyRequest::Tunnel {
            dx, dz, length, ..
        } = &request
        {
            if *length == 0 {
                return Err(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "tunnel length must be >= 1",
                    None,
                ));
            }
            if Direction::for_xz(*dx, *dz).is_none() {
                return Err(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "tunnel axis must be a single horizontal direction",
                    Some(format!("dx={dx} dz={dz}")),
                ));
            }
        }
        self.controller.request_strategy(request);
        self.flush_persistence_if_enabled();
        Ok(self.status())
    }

    fn tick_once(&mut self) {
        self.rig.begin_tick();
        let snapshot = Arc::new(self.rig.world().snapshot());
        self.controller.on_game_tick(&snapshot, &mut self.rig);
        self.rig.apply_tick();
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn status(&self) -> BotStatus {
        let config = self.controller.config();
        BotStatus {
            schema_version: config.schema_version.clone(),
            run_id: config.run_id.clone(),
            current_tick: self.controller.current_tick(),
            max_ticks: config.max_ticks,
            mode: if self.controller.is_halted() {
                RunMode::Halted
            } else {
                RunMode::Running
            },
            active_strategy: self.controller.active_strategy_name(),
            queue_depth: self.controller.active_queue_depth(),
        }
    }

    pub fn journal(&self) -> &[JournalEntry] {
        self.controller.journal()
    }

    pub fn description(&self) -> String {
        self.controller.current_description()
    }

    pub fn progress(&self) -> Option<ProgressReport> {
        self.controller.active_progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{JournalEntryKind, Pos};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("gridbot_{name}_{nanos}.sqlite"))
    }

    #[test]
    fn step_commits_the_requested_ticks() {
        let mut api = BotApi::from_config(BotConfig::default());
        let (status, committed) = api.step(5);
        assert_eq!(committed, 5);
        assert_eq!(status.current_tick, 5);
    }

    #[test]
    fn step_stops_at_the_tick_ceiling() {
        let mut config = BotConfig::default();
        config.max_ticks = 3;
        let mut api = BotApi::from_config(config);
        let (status, committed) = api.step(10);
        assert_eq!(committed, 3);
        assert!(status.is_complete());
    }

    #[test]
    fn rejects_zero_length_tunnel() {
        let mut api = BotApi::from_config(BotConfig::default());
        let error = api
            .request(StrategyRequest::Tunnel {
                origin: Pos::new(1, 1, 0),
                dx: 1,
                dz: 0,
                length: 0,
                torches: contracts::TorchSide::None,
            })
            .expect_err("zero length is invalid");
        assert_eq!(error.code, ErrorCode::InvalidCommand);
    }

    #[test]
    fn request_after_completion_conflicts() {
        let mut config = BotConfig::default();
        config.max_ticks = 1;
        let mut api = BotApi::from_config(config);
        api.step(1);
        let error = api
            .request(StrategyRequest::PlaceTorches)
            .expect_err("run is complete");
        assert_eq!(error.code, ErrorCode::RunStateConflict);
    }

    #[test]
    fn walk_request_round_trips_through_the_facade() {
        let mut api = BotApi::from_config(BotConfig::default());
        api.request(StrategyRequest::MoveTo {
            target: Pos::new(3, 1, 4),
        })
        .expect("valid request");
        api.step(10);
        assert_eq!(api.rig_mut().world().player_position(), Pos::new(3, 1, 4));
        assert!(api
            .journal()
            .iter()
            .any(|entry| entry.kind == JournalEntryKind::StrategyFinished));
    }

    #[test]
    fn persists_journal_and_snapshots() {
        let mut config = BotConfig::default();
        config.snapshot_every_ticks = 4;
        let run_id = config.run_id.clone();
        let mut api = BotApi::from_config(config);
        let db_path = temp_db_path("journal");

        api.attach_sqlite_store(&db_path).expect("attach");
        api.initialize_run_storage(true).expect("initialize");
        api.request(StrategyRequest::MoveTo {
            target: Pos::new(2, 1, 2),
        })
        .expect("valid request");
        api.step(8);
        api.flush_persistence_checked().expect("flush");

        let entries = api.load_journal_range(&run_id, 0, 100).expect("journal");
        assert!(!entries.is_empty());
        let snapshot = api
            .load_latest_snapshot_at_or_before(&run_id, 8)
            .expect("snapshot query")
            .expect("snapshot present");
        assert!(snapshot.tick <= 8);
        assert!(api.last_persistence_error().is_none());

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }

    #[test]
    fn second_initialize_without_replace_conflicts() {
        let mut api = BotApi::from_config(BotConfig::default());
        let db_path = temp_db_path("conflict");
        api.attach_sqlite_store(&db_path).expect("attach");
        api.initialize_run_storage(false).expect("first initialize");
        let error = api
            .initialize_run_storage(false)
            .expect_err("run already exists");
        assert!(matches!(error, PersistenceError::RunAlreadyExists(_)));

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }
}
