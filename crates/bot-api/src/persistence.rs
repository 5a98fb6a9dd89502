use std::fmt;
use std::path::Path;

use contracts::{BotConfig, BotStatus, JournalEntry, JournalEntryKind};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// A persisted world capture: the full block grid plus agent state, stored
/// as one JSON payload per cadence tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub run_id: String,
    pub tick: u64,
    pub payload: Value,
}

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotAttached,
    RunAlreadyExists(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::NotAttached => write!(f, "sqlite store is not attached"),
            Self::RunAlreadyExists(run_id) => write!(f, "run already exists: {run_id}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_run(&mut self, run_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM journal WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM snapshots WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Write the new journal tail and an optional snapshot in one
    /// transaction. `first_seq` is the global index of `entries[0]` so
    /// re-flushing after a partial failure stays idempotent.
    pub fn persist_delta(
        &mut self,
        config: &BotConfig,
        status: &BotStatus,
        first_seq: usize,
        entries: &[JournalEntry],
        snapshot: Option<&SnapshotRecord>,
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;

        upsert_run(&tx, config, status)?;

        for (offset, entry) in entries.iter().enumerate() {
            let detail_json = serde_json::to_string(&entry.detail)?;
            tx.execute(
                "INSERT OR IGNORE INTO journal (
                    run_id,
                    seq,
                    tick,
                    kind,
                    detail_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    config.run_id.as_str(),
                    i64::try_from(first_seq + offset).unwrap_or(i64::MAX),
                    i64::try_from(entry.tick).unwrap_or(i64::MAX),
                    kind_label(entry.kind),
                    detail_json,
                    tick_stamp(entry.tick),
                ],
            )?;
        }

        if let Some(record) = snapshot {
            let payload_json = serde_json::to_string(&record.payload)?;
            tx.execute(
                "INSERT OR IGNORE INTO snapshots (
                    run_id,
                    tick,
                    payload_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.run_id.as_str(),
                    i64::try_from(record.tick).unwrap_or(i64::MAX),
                    payload_json,
                    tick_stamp(record.tick),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_journal_range(
        &self,
        run_id: &str,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<JournalEntry>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT tick, kind, detail_json
             FROM journal
             WHERE run_id = ?1 AND tick >= ?2 AND tick <= ?3
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(
            params![
                run_id,
                i64::try_from(from_tick).unwrap_or(i64::MAX),
                i64::try_from(to_tick).unwrap_or(i64::MAX)
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut entries = Vec::new();
        for row in rows {
            let (tick, kind, detail_json) = row?;
            let Some(kind) = kind_from_label(&kind) else {
                continue;
            };
            entries.push(JournalEntry::new(
                u64::try_from(tick).unwrap_or(0),
                kind,
                serde_json::from_str(&detail_json)?,
            ));
        }

        Ok(entries)
    }

    pub fn load_latest_snapshot_at_or_before(
        &self,
        run_id: &str,
        tick: u64,
    ) -> Result<Option<SnapshotRecord>, PersistenceError> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT tick, payload_json
                 FROM snapshots
                 WHERE run_id = ?1 AND tick <= ?2
                 ORDER BY tick DESC
                 LIMIT 1",
                params![run_id, i64::try_from(tick).unwrap_or(i64::MAX)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((snapshot_tick, payload_json)) => Ok(Some(SnapshotRecord {
                run_id: run_id.to_string(),
                tick: u64::try_from(snapshot_tick).unwrap_or(0),
                payload: serde_json::from_str(&payload_json)?,
            })),
            None => Ok(None),
        }
    }

    pub fn load_status(&self, run_id: &str) -> Result<Option<BotStatus>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT status_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                status_json TEXT NOT NULL,
                seed TEXT NOT NULL,
                max_ticks INTEGER NOT NULL,
                snapshot_every_ticks INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journal (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                tick INTEGER NOT NULL,
                kind TEXT NOT NULL,
                detail_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                run_id TEXT NOT NULL,
                tick INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, tick)
            );

            CREATE INDEX IF NOT EXISTS idx_journal_run_tick ON journal(run_id, tick);
            CREATE INDEX IF NOT EXISTS idx_journal_run_kind_tick ON journal(run_id, kind, tick);
            CREATE INDEX IF NOT EXISTS idx_snapshots_run_tick ON snapshots(run_id, tick);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'tick-000000')",
            [],
        )?;

        Ok(())
    }
}

fn upsert_run(
    tx: &rusqlite::Transaction<'_>,
    config: &BotConfig,
    status: &BotStatus,
) -> Result<(), PersistenceError> {
    let config_json = serde_json::to_string(config)?;
    let status_json = serde_json::to_string(status)?;

    tx.execute(
        "INSERT INTO runs (
            run_id,
            schema_version,
            config_json,
            status_json,
            seed,
            max_ticks,
            snapshot_every_ticks,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(run_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            config_json = excluded.config_json,
            status_json = excluded.status_json,
            seed = excluded.seed,
            max_ticks = excluded.max_ticks,
            snapshot_every_ticks = excluded.snapshot_every_ticks,
            updated_at = excluded.updated_at",
        params![
            config.run_id.as_str(),
            config.schema_version.as_str(),
            config_json,
            status_json,
            config.seed.to_string(),
            i64::try_from(config.max_ticks).unwrap_or(i64::MAX),
            i64::try_from(config.snapshot_every_ticks).unwrap_or(i64::MAX),
            "tick-000000",
            tick_stamp(status.current_tick),
        ],
    )?;

    Ok(())
}

fn kind_label(kind: JournalEntryKind) -> &'static str {
    match kind {
        JournalEntryKind::StrategyActivated => "strategy_activated",
        JournalEntryKind::StrategySuspended => "strategy_suspended",
        JournalEntryKind::StrategyResumed => "strategy_resumed",
        JournalEntryKind::StrategyFinished => "strategy_finished",
        JournalEntryKind::StrategyAborted => "strategy_aborted",
        JournalEntryKind::TaskDesync => "task_desync",
        JournalEntryKind::SearchExhausted => "search_exhausted",
        JournalEntryKind::TickSummary => "tick_summary",
    }
}

fn kind_from_label(label: &str) -> Option<JournalEntryKind> {
    match label {
        "strategy_activated" => Some(JournalEntryKind::StrategyActivated),
        "strategy_suspended" => Some(JournalEntryKind::StrategySuspended),
        "strategy_resumed" => Some(JournalEntryKind::StrategyResumed),
        "strategy_finished" => Some(JournalEntryKind::StrategyFinished),
        "strategy_aborted" => Some(JournalEntryKind::StrategyAborted),
        "task_desync" => Some(JournalEntryKind::TaskDesync),
        "search_exhausted" => Some(JournalEntryKind::SearchExhausted),
        "tick_summary" => Some(JournalEntryKind::TickSummary),
        _ => None,
    }
}

fn tick_stamp(tick: u64) -> String {
    format!("tick-{tick:06}")
}
