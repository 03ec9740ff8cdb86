//! Durable storage for expectations, observations, trials, and violations,
//! backed by `SQLite`.
//!
//! # Schema
//!
//! Four tables: `expectations`, `observations` (append-only),
//! `alert_trials`, and `violations`, with the indices rule evaluation
//! depends on: `(expectation_id, observed_at DESC)` on observations,
//! `(expectation_id, code, is_open)` on violations, and
//! `(expectation_id, status)` on trials.
//!
//! # Contracts
//!
//! - Every operation commits before returning; there is no write buffering.
//! - `append_observation` stamps `observed_at` from the injected clock inside
//!   the insert itself, clamped to the expectation's newest stamp, so the log
//!   stays non-decreasing even if the wall clock steps backwards.
//! - `ack_trial` is a conditional update; the row count is the CAS outcome,
//!   so concurrent acks agree on a single winner.
//! - Observations are never updated or deleted; violations only ever flip
//!   `is_open` from 1 to 0.
//!
//! WAL journal mode keeps readers non-blocking while the checker writes.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use rewire_core::{
    AlertTrial, Clock, Expectation, ExpectationKind, Observation, ObservationKind, TrialStatus,
    Violation, ViolationCode, MAX_META_BYTES,
};


const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS expectations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN ('schedule', 'alert_path')),
    name TEXT NOT NULL,
    owner_contact TEXT NOT NULL,
    expected_interval_s INTEGER NOT NULL CHECK(expected_interval_s >= 60),
    tolerance_s INTEGER NOT NULL DEFAULT 0 CHECK(tolerance_s >= 0),
    params_json TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1 CHECK(is_enabled IN (0, 1)),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS observations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    expectation_id TEXT NOT NULL REFERENCES expectations(id),
    kind TEXT NOT NULL CHECK(kind IN ('start', 'end', 'ping', 'ack')),
    observed_at INTEGER NOT NULL,
    meta TEXT
);

CREATE INDEX IF NOT EXISTS idx_observations_exp_time
    ON observations(expectation_id, observed_at DESC);

CREATE TABLE IF NOT EXISTS alert_trials (
    id TEXT PRIMARY KEY,
    expectation_id TEXT NOT NULL REFERENCES expectations(id),
    sent_at INTEGER NOT NULL,
    acked_at INTEGER,
    status TEXT NOT NULL CHECK(status IN ('pending', 'acked', 'expired'))
);

CREATE INDEX IF NOT EXISTS idx_trials_exp_status
    ON alert_trials(expectation_id, status);

CREATE TABLE IF NOT EXISTS violations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    expectation_id TEXT NOT NULL REFERENCES expectations(id),
    code TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    message TEXT NOT NULL,
    evidence_json TEXT NOT NULL,
    is_open INTEGER NOT NULL DEFAULT 1 CHECK(is_open IN (0, 1)),
    last_notified_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_violations_exp_code_open
    ON violations(expectation_id, code, is_open);
";

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("observation meta exceeds {MAX_META_BYTES} bytes (got {0})")]
    MetaTooLarge(usize),
}

/// Fields needed to create an expectation; timestamps are stamped by the
/// store.
#[derive(Debug, Clone)]
pub struct NewExpectation {
    pub id: String,
    pub kind: ExpectationKind,
    pub name: String,
    pub owner_contact: String,
    pub expected_interval_s: i64,
    pub tolerance_s: i64,
    pub params_json: String,
}

/// SQLite-backed store shared by the HTTP surface and the checker.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, clock)
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when schema setup fails.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // === Expectations ===

    /// Insert a new expectation; `created_at`/`updated_at` come from the
    /// clock.
    pub fn create_expectation(&self, new: &NewExpectation) -> Result<Expectation, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO expectations
                 (id, kind, name, owner_contact, expected_interval_s, tolerance_s,
                  params_json, is_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
            params![
                new.id,
                new.kind.as_str(),
                new.name,
                new.owner_contact,
                new.expected_interval_s,
                new.tolerance_s,
                new.params_json,
                now
            ],
        )?;
        debug!(expectation_id = %new.id, kind = %new.kind, "expectation created");
        Ok(Expectation {
            id: new.id.clone(),
            kind: new.kind,
            name: new.name.clone(),
            owner_contact: new.owner_contact.clone(),
            expected_interval_s: new.expected_interval_s,
            tolerance_s: new.tolerance_s,
            params_json: new.params_json.clone(),
            enabled: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch one expectation by id.
    pub fn get_expectation(&self, id: &str) -> Result<Option<Expectation>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, kind, name, owner_contact, expected_interval_s, tolerance_s,
                        params_json, is_enabled, created_at, updated_at
                 FROM expectations WHERE id = ?1",
                params![id],
                expectation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All expectations with the enable flag set, in creation order.
    pub fn list_enabled(&self) -> Result<Vec<Expectation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, owner_contact, expected_interval_s, tolerance_s,
                    params_json, is_enabled, created_at, updated_at
             FROM expectations WHERE is_enabled = 1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], expectation_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Flip the enable flag. Returns false when the id is unknown.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE expectations SET is_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![i64::from(enabled), now, id],
        )?;
        Ok(changed > 0)
    }

    // === Observations ===

    /// Append one observation and return its sequence number.
    ///
    /// The stamp is `max(now, newest stamp for this expectation)` computed
    /// inside the insert, so the per-expectation log is non-decreasing even
    /// across a wall-clock step backwards.
    ///
    /// # Errors
    ///
    /// [`StoreError::MetaTooLarge`] when `meta` exceeds the 4 KiB cap;
    /// [`StoreError::Sqlite`] for constraint failures (e.g. unknown
    /// expectation id).
    pub fn append_observation(
        &self,
        expectation_id: &str,
        kind: ObservationKind,
        meta: Option<&str>,
    ) -> Result<i64, StoreError> {
        if let Some(meta) = meta {
            if meta.len() > MAX_META_BYTES {
                return Err(StoreError::MetaTooLarge(meta.len()));
            }
        }

        let now = self.clock.now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO observations (expectation_id, kind, observed_at, meta)
             VALUES (?1, ?2,
                     MAX(?3, COALESCE((SELECT MAX(observed_at) FROM observations
                                       WHERE expectation_id = ?1), 0)),
                     ?4)",
            params![expectation_id, kind.as_str(), now, meta],
        )?;
        let seq = conn.last_insert_rowid();
        debug!(expectation_id, kind = %kind, seq, "observation appended");
        Ok(seq)
    }

    /// Newest observations first, at most `limit` rows.
    pub fn recent_observations(
        &self,
        expectation_id: &str,
        limit: usize,
    ) -> Result<Vec<Observation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT seq, expectation_id, kind, observed_at, meta
             FROM observations WHERE expectation_id = ?1
             ORDER BY observed_at DESC, seq DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![expectation_id, limit as i64], observation_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Stamp of the newest observation, optionally restricted to one kind.
    pub fn last_observation_at(
        &self,
        expectation_id: &str,
        kind: Option<ObservationKind>,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let stamp = match kind {
            Some(kind) => conn
                .query_row(
                    "SELECT observed_at FROM observations
                     WHERE expectation_id = ?1 AND kind = ?2
                     ORDER BY observed_at DESC, seq DESC LIMIT 1",
                    params![expectation_id, kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT observed_at FROM observations
                     WHERE expectation_id = ?1
                     ORDER BY observed_at DESC, seq DESC LIMIT 1",
                    params![expectation_id],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(stamp)
    }

    // === Alert trials ===

    /// Insert a pending trial; `sent_at` comes from the clock.
    pub fn create_trial(
        &self,
        trial_id: &str,
        expectation_id: &str,
    ) -> Result<AlertTrial, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alert_trials (id, expectation_id, sent_at, acked_at, status)
             VALUES (?1, ?2, ?3, NULL, 'pending')",
            params![trial_id, expectation_id, now],
        )?;
        debug!(expectation_id, trial_id, "trial created");
        Ok(AlertTrial {
            id: trial_id.to_string(),
            expectation_id: expectation_id.to_string(),
            sent_at: now,
            acked_at: None,
            status: TrialStatus::Pending,
        })
    }

    /// Acknowledge a trial. Returns true iff the prior status was `pending`;
    /// the conditional update makes concurrent acks agree on one winner.
    pub fn ack_trial(&self, trial_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE alert_trials SET status = 'acked', acked_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, trial_id],
        )?;
        Ok(changed > 0)
    }

    /// Expire a trial; a no-op unless it is still pending.
    pub fn expire_trial(&self, trial_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE alert_trials SET status = 'expired'
             WHERE id = ?1 AND status = 'pending'",
            params![trial_id],
        )?;
        Ok(())
    }

    /// Pending trials for one expectation, newest first.
    pub fn pending_trials(&self, expectation_id: &str) -> Result<Vec<AlertTrial>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, expectation_id, sent_at, acked_at, status
             FROM alert_trials WHERE expectation_id = ?1 AND status = 'pending'
             ORDER BY sent_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![expectation_id], trial_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Recent trials of any status for one expectation, newest first.
    pub fn recent_trials(
        &self,
        expectation_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertTrial>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, expectation_id, sent_at, acked_at, status
             FROM alert_trials WHERE expectation_id = ?1
             ORDER BY sent_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![expectation_id, limit as i64], trial_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every trial in the store; used by the invariant audit.
    pub fn all_trials(&self) -> Result<Vec<AlertTrial>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, expectation_id, sent_at, acked_at, status
             FROM alert_trials ORDER BY sent_at, rowid",
        )?;
        let rows = stmt.query_map([], trial_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // === Violations ===

    /// The open violation for `(expectation_id, code)`, if one exists.
    pub fn open_violation(
        &self,
        expectation_id: &str,
        code: ViolationCode,
    ) -> Result<Option<Violation>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, expectation_id, code, detected_at, message, evidence_json,
                        is_open, last_notified_at
                 FROM violations
                 WHERE expectation_id = ?1 AND code = ?2 AND is_open = 1
                 ORDER BY detected_at DESC, id DESC LIMIT 1",
                params![expectation_id, code.as_str()],
                violation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a new open violation; `detected_at` comes from the clock.
    pub fn create_violation(
        &self,
        expectation_id: &str,
        code: ViolationCode,
        message: &str,
        evidence: &serde_json::Value,
    ) -> Result<Violation, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO violations
                 (expectation_id, code, detected_at, message, evidence_json,
                  is_open, last_notified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, NULL)",
            params![
                expectation_id,
                code.as_str(),
                now,
                message,
                evidence.to_string()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(expectation_id, code = %code, violation_id = id, "violation opened");
        Ok(Violation {
            id,
            expectation_id: expectation_id.to_string(),
            code,
            detected_at: now,
            message: message.to_string(),
            evidence: evidence.clone(),
            is_open: true,
            last_notified_at: None,
        })
    }

    /// Close every open violation matching any of `codes`. Idempotent;
    /// returns how many rows flipped.
    pub fn close_violations(
        &self,
        expectation_id: &str,
        codes: &[ViolationCode],
    ) -> Result<usize, StoreError> {
        if codes.is_empty() {
            return Ok(0);
        }
        let placeholders = codes
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE violations SET is_open = 0
             WHERE expectation_id = ?1 AND is_open = 1 AND code IN ({placeholders})"
        );

        let conn = self.lock()?;
        let mut values: Vec<&str> = Vec::with_capacity(codes.len() + 1);
        values.push(expectation_id);
        values.extend(codes.iter().map(|c| c.as_str()));
        let closed = conn.execute(&sql, params_from_iter(values))?;
        if closed > 0 {
            debug!(expectation_id, closed, "violations closed");
        }
        Ok(closed)
    }

    /// Recent violations for one expectation, open or closed, newest first.
    pub fn recent_violations(
        &self,
        expectation_id: &str,
        limit: usize,
    ) -> Result<Vec<Violation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, expectation_id, code, detected_at, message, evidence_json,
                    is_open, last_notified_at
             FROM violations WHERE expectation_id = ?1
             ORDER BY detected_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![expectation_id, limit as i64], violation_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Record a successful notification for one violation.
    pub fn mark_notified(&self, violation_id: i64) -> Result<(), StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE violations SET last_notified_at = ?1 WHERE id = ?2",
            params![now, violation_id],
        )?;
        Ok(())
    }

    /// Count open violations, optionally for one expectation.
    pub fn open_violations_count(&self, expectation_id: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count = match expectation_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM violations WHERE expectation_id = ?1 AND is_open = 1",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM violations WHERE is_open = 1",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    /// `(expectation_id, code, open_count)` tuples where more than one row is
    /// open - always empty unless the single-open-per-code invariant broke.
    pub fn duplicate_open_violations(&self) -> Result<Vec<(String, String, i64)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT expectation_id, code, COUNT(*) AS open_count
             FROM violations WHERE is_open = 1
             GROUP BY expectation_id, code HAVING open_count > 1",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

// === Row mappers ===

/// Turn a stored enum string into its type, reporting mismatches as
/// conversion failures instead of panicking on corrupt rows.
fn parse_column<T>(idx: usize, value: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn expectation_from_row(row: &rusqlite::Row<'_>) -> Result<Expectation, rusqlite::Error> {
    let kind: String = row.get(1)?;
    Ok(Expectation {
        id: row.get(0)?,
        kind: parse_column::<ExpectationKind>(1, &kind)?,
        name: row.get(2)?,
        owner_contact: row.get(3)?,
        expected_interval_s: row.get(4)?,
        tolerance_s: row.get(5)?,
        params_json: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn observation_from_row(row: &rusqlite::Row<'_>) -> Result<Observation, rusqlite::Error> {
    let kind: String = row.get(2)?;
    Ok(Observation {
        seq: row.get(0)?,
        expectation_id: row.get(1)?,
        kind: parse_column::<ObservationKind>(2, &kind)?,
        observed_at: row.get(3)?,
        meta: row.get(4)?,
    })
}

fn trial_from_row(row: &rusqlite::Row<'_>) -> Result<AlertTrial, rusqlite::Error> {
    let status: String = row.get(4)?;
    Ok(AlertTrial {
        id: row.get(0)?,
        expectation_id: row.get(1)?,
        sent_at: row.get(2)?,
        acked_at: row.get(3)?,
        status: parse_column::<TrialStatus>(4, &status)?,
    })
}

fn violation_from_row(row: &rusqlite::Row<'_>) -> Result<Violation, rusqlite::Error> {
    let code: String = row.get(2)?;
    let evidence_json: String = row.get(5)?;
    let evidence = serde_json::from_str(&evidence_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Violation {
        id: row.get(0)?,
        expectation_id: row.get(1)?,
        code: parse_column::<ViolationCode>(2, &code)?,
        detected_at: row.get(3)?,
        message: row.get(4)?,
        evidence,
        is_open: row.get::<_, i64>(6)? != 0,
        last_notified_at: row.get(7)?,
    })
}
