//! Decision memory: a bounded in-process ring and an append-only SQLite log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use shared_types::{DecisionOutcomeRecord, EmotionLabel, RoutingDecisionRecord};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::info;

use crate::collaborators::{DecisionFilter, DecisionMemory};
use crate::errors::{CollaboratorError, CoreResult};

/// Keeps the newest `capacity` decisions, and as many outcomes, in memory.
pub struct InMemoryDecisionLog {
    records: Mutex<VecDeque<RoutingDecisionRecord>>,
    outcomes: Mutex<VecDeque<DecisionOutcomeRecord>>,
    capacity: usize,
}

fn poisoned<T>(_: T) -> CollaboratorError {
    CollaboratorError::Failed("decision log lock poisoned".to_string())
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

impl InMemoryDecisionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            outcomes: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionMemory for InMemoryDecisionLog {
    async fn query_recent(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<RoutingDecisionRecord>, CollaboratorError> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append(&self, record: RoutingDecisionRecord) -> Result<(), CollaboratorError> {
        let mut records = self.records.lock().map_err(poisoned)?;
        push_bounded(&mut records, record, self.capacity);
        Ok(())
    }

    async fn record_outcome(&self, outcome: DecisionOutcomeRecord) -> Result<(), CollaboratorError> {
        let mut outcomes = self.outcomes.lock().map_err(poisoned)?;
        push_bounded(&mut outcomes, outcome, self.capacity);
        Ok(())
    }

    async fn query_outcomes(
        &self,
        backend: &str,
        limit: usize,
    ) -> Result<Vec<DecisionOutcomeRecord>, CollaboratorError> {
        let outcomes = self.outcomes.lock().map_err(poisoned)?;
        Ok(outcomes
            .iter()
            .rev()
            .filter(|o| o.backend == backend)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Decisions persisted to a SQLite table. Rows are only ever inserted.
#[derive(Clone)]
pub struct SqliteDecisionLog {
    conn: Arc<Mutex<Connection>>,
}

fn sqlite_err(e: rusqlite::Error) -> CollaboratorError {
    CollaboratorError::Failed(format!("sqlite: {e}"))
}

fn join_err(e: task::JoinError) -> CollaboratorError {
    CollaboratorError::Failed(format!("blocking task failed: {e}"))
}

impl SqliteDecisionLog {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS routing_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                input_text TEXT NOT NULL,
                chosen_backend TEXT NOT NULL,
                emotion TEXT NOT NULL,
                task_category TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_routing_decisions_emotion
                ON routing_decisions (emotion, id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS routing_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                backend TEXT NOT NULL,
                task_category TEXT NOT NULL,
                emotion TEXT NOT NULL,
                success INTEGER NOT NULL,
                reward REAL NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_routing_outcomes_backend
                ON routing_outcomes (backend, id)",
            [],
        )?;
        info!("decision log tables ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DecisionMemory for SqliteDecisionLog {
    async fn query_recent(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<RoutingDecisionRecord>, CollaboratorError> {
        let conn = self.conn.clone();
        let emotion = filter.emotion.as_ref().map(|e| e.as_str().to_string());
        let backend = filter.backend.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(poisoned)?;
            let mut stmt = conn
                .prepare(
                    "SELECT input_text, chosen_backend, emotion, task_category, timestamp
                     FROM routing_decisions
                     WHERE (?1 IS NULL OR emotion = ?1)
                       AND (?2 IS NULL OR chosen_backend = ?2)
                     ORDER BY id DESC
                     LIMIT ?3",
                )
                .map_err(sqlite_err)?;

            let rows = stmt
                .query_map(params![emotion, backend, limit], |row| {
                    let emotion: String = row.get(2)?;
                    let timestamp: String = row.get(4)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        emotion,
                        row.get::<_, String>(3)?,
                        timestamp,
                    ))
                })
                .map_err(sqlite_err)?;

            let mut records = Vec::new();
            for row in rows {
                let (input_text, chosen_backend, emotion, task_category, timestamp) =
                    row.map_err(sqlite_err)?;
                let timestamp = parse_timestamp(&timestamp)?;
                records.push(RoutingDecisionRecord {
                    input_text,
                    chosen_backend,
                    emotion: EmotionLabel::new(emotion),
                    task_category,
                    timestamp,
                });
            }
            Ok::<Vec<RoutingDecisionRecord>, CollaboratorError>(records)
        })
        .await
        .map_err(join_err)?
    }

    async fn append(&self, record: RoutingDecisionRecord) -> Result<(), CollaboratorError> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(poisoned)?;
            conn.execute(
                "INSERT INTO routing_decisions
                    (input_text, chosen_backend, emotion, task_category, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.input_text,
                    record.chosen_backend,
                    record.emotion.as_str(),
                    record.task_category,
                    record.timestamp.to_rfc3339(),
                ],
            )
            .map_err(sqlite_err)?;
            Ok::<(), CollaboratorError>(())
        })
        .await
        .map_err(join_err)?
    }

    async fn record_outcome(&self, outcome: DecisionOutcomeRecord) -> Result<(), CollaboratorError> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;
            conn.execute(
                "INSERT INTO routing_outcomes
                    (backend, task_category, emotion, success, reward, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    outcome.backend,
                    outcome.task_category,
                    outcome.emotion.as_str(),
                    outcome.success,
                    outcome.reward,
                    outcome.timestamp.to_rfc3339(),
                ],
            )
            .map_err(sqlite_err)?;
            Ok::<(), CollaboratorError>(())
        })
        .await
        .map_err(join_err)?
    }

    async fn query_outcomes(
        &self,
        backend: &str,
        limit: usize,
    ) -> Result<Vec<DecisionOutcomeRecord>, CollaboratorError> {
        let conn = self.conn.clone();
        let backend = backend.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;
            let mut stmt = conn
                .prepare(
                    "SELECT backend, task_category, emotion, success, reward, timestamp
                     FROM routing_outcomes
                     WHERE backend = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )
                .map_err(sqlite_err)?;

            let rows = stmt
                .query_map(params![backend, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(sqlite_err)?;

            let mut outcomes = Vec::new();
            for row in rows {
                let (backend, task_category, emotion, success, reward, timestamp) =
                    row.map_err(sqlite_err)?;
                outcomes.push(DecisionOutcomeRecord {
                    backend,
                    task_category,
                    emotion: EmotionLabel::new(emotion),
                    success,
                    reward,
                    timestamp: parse_timestamp(&timestamp)?,
                });
            }
            Ok::<Vec<DecisionOutcomeRecord>, CollaboratorError>(outcomes)
        })
        .await
        .map_err(join_err)?
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CollaboratorError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CollaboratorError::Failed(format!("bad timestamp: {e}")))
}
