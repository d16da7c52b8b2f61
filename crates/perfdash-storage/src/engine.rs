use crate::error::{Result, StorageError};
use crate::templates::TEMPLATES_SCHEMA;
use crate::{AlertPage, AlertQuery, AlertStore, MAX_TEST_KEYS_PER_QUERY};
use chrono::{DateTime, Utc};
use perfdash_common::cursor::Cursor;
use perfdash_common::types::{AlertRecord, BugFilter, Bounds, SortOrder};
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const ALERTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS anomalies (
    key TEXT PRIMARY KEY,
    master_name TEXT NOT NULL,
    bot_name TEXT NOT NULL,
    test_suite_name TEXT NOT NULL,
    test TEXT NOT NULL,
    start_revision INTEGER NOT NULL,
    end_revision INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    bug_id INTEGER,
    is_improvement INTEGER NOT NULL,
    recovered INTEGER NOT NULL,
    sheriff TEXT,
    units TEXT NOT NULL DEFAULT '',
    median_before_anomaly REAL NOT NULL DEFAULT 0,
    median_after_anomaly REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_anomalies_time ON anomalies(timestamp, key);
CREATE INDEX IF NOT EXISTS idx_anomalies_suite_time ON anomalies(test_suite_name, timestamp, key);
CREATE INDEX IF NOT EXISTS idx_anomalies_bot_time ON anomalies(bot_name, timestamp, key);
CREATE INDEX IF NOT EXISTS idx_anomalies_sheriff_time ON anomalies(sheriff, timestamp, key);
CREATE INDEX IF NOT EXISTS idx_anomalies_test_time ON anomalies(test, timestamp, key);
CREATE INDEX IF NOT EXISTS idx_anomalies_bug ON anomalies(bug_id);
";

const ALERT_COLUMNS: &str = "key, master_name, bot_name, test_suite_name, test, start_revision, \
     end_revision, timestamp, bug_id, is_improvement, recovered, sheriff, units, \
     median_before_anomaly, median_after_anomaly";

/// SQLite-backed alert and report template store.
///
/// A single connection is shared behind a mutex; SQLite serializes writers
/// anyway and every request issues at most one query.
pub struct SqliteStorageEngine {
    conn: Mutex<Connection>,
}

impl SqliteStorageEngine {
    /// Opens (creating if needed) the database file at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        tracing::info!(path = %path.display(), "Opened alert store");
        Self::init(conn)
    }

    /// A private in-memory database, used by tests and local tooling.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(ALERTS_SCHEMA)?;
        conn.execute_batch(TEMPLATES_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces alert records in one transaction. Returns the
    /// number of records written. Timestamps are truncated to whole
    /// milliseconds.
    pub fn insert_alerts(&self, records: &[AlertRecord]) -> Result<usize> {
        for record in records {
            if record.start_revision > record.end_revision {
                return Err(StorageError::InvalidRecord {
                    key: record.key.clone(),
                    reason: format!(
                        "start_revision {} > end_revision {}",
                        record.start_revision, record.end_revision
                    ),
                });
            }
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO anomalies (key, master_name, bot_name, test_suite_name, test, \
                 start_revision, end_revision, timestamp, bug_id, is_improvement, recovered, sheriff, \
                 units, median_before_anomaly, median_after_anomaly)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for r in records {
                stmt.execute(rusqlite::params![
                    &r.key,
                    &r.master_name,
                    &r.bot_name,
                    &r.test_suite_name,
                    &r.test,
                    r.start_revision,
                    r.end_revision,
                    r.timestamp.timestamp_millis(),
                    r.bug_id,
                    r.is_improvement,
                    r.recovered,
                    &r.sheriff,
                    &r.units,
                    r.median_before_anomaly,
                    r.median_after_anomaly,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = records.len(), "Inserted alert records");
        Ok(records.len())
    }
}

/// WHERE clause under construction: conjunctive clauses plus their
/// positional parameters.
#[derive(Default)]
struct Predicate {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Predicate {
    /// Registers a parameter and returns its placeholder.
    fn bind(&mut self, value: impl ToSql + 'static) -> String {
        self.params.push(Box::new(value));
        format!("?{}", self.params.len())
    }

    fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn eq(&mut self, column: &str, value: impl ToSql + 'static) {
        let p = self.bind(value);
        self.push(format!("{column} = {p}"));
    }

    fn eq_text(&mut self, column: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.eq(column, v.to_string());
        }
    }

    fn bounds(&mut self, column: &str, bounds: Bounds<i64>) {
        if bounds.is_open() {
            return;
        }
        if let Some(min) = bounds.min {
            let p = self.bind(min);
            self.push(format!("{column} >= {p}"));
        }
        if let Some(max) = bounds.max {
            let p = self.bind(max);
            self.push(format!("{column} <= {p}"));
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Raw column values, validated into an [`AlertRecord`] afterwards so that a
/// bad row surfaces as [`StorageError::Inconsistent`] instead of a SQLite
/// conversion error.
struct StoredAlert {
    key: String,
    master_name: String,
    bot_name: String,
    test_suite_name: String,
    test: String,
    start_revision: i64,
    end_revision: i64,
    timestamp_ms: i64,
    bug_id: Option<i64>,
    is_improvement: bool,
    recovered: bool,
    sheriff: Option<String>,
    units: String,
    median_before_anomaly: f64,
    median_after_anomaly: f64,
}

impl StoredAlert {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            master_name: row.get(1)?,
            bot_name: row.get(2)?,
            test_suite_name: row.get(3)?,
            test: row.get(4)?,
            start_revision: row.get(5)?,
            end_revision: row.get(6)?,
            timestamp_ms: row.get(7)?,
            bug_id: row.get(8)?,
            is_improvement: row.get(9)?,
            recovered: row.get(10)?,
            sheriff: row.get(11)?,
            units: row.get(12)?,
            median_before_anomaly: row.get(13)?,
            median_after_anomaly: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<AlertRecord> {
        if self.start_revision > self.end_revision {
            return Err(StorageError::Inconsistent {
                reason: format!(
                    "start_revision {} > end_revision {}",
                    self.start_revision, self.end_revision
                ),
                key: self.key,
            });
        }
        let Some(timestamp) = DateTime::from_timestamp_millis(self.timestamp_ms) else {
            return Err(StorageError::Inconsistent {
                reason: format!("timestamp {} is out of range", self.timestamp_ms),
                key: self.key,
            });
        };
        Ok(AlertRecord {
            key: self.key,
            master_name: self.master_name,
            bot_name: self.bot_name,
            test_suite_name: self.test_suite_name,
            test: self.test,
            start_revision: self.start_revision,
            end_revision: self.end_revision,
            timestamp,
            bug_id: self.bug_id,
            is_improvement: self.is_improvement,
            recovered: self.recovered,
            sheriff: self.sheriff,
            units: self.units,
            median_before_anomaly: self.median_before_anomaly,
            median_after_anomaly: self.median_after_anomaly,
        })
    }
}

/// Smallest stored millisecond not before `t`. Stored timestamps are whole
/// milliseconds, so a sub-millisecond lower bound rounds up.
fn ceil_millis(t: &DateTime<Utc>) -> i64 {
    let ms = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 != 0 {
        ms + 1
    } else {
        ms
    }
}

fn build_predicate(query: &AlertQuery) -> Result<Predicate> {
    let f = &query.filter;
    let mut predicate = Predicate::default();

    predicate.eq_text("key", f.key.as_deref());
    predicate.eq_text("master_name", f.master.as_deref());
    predicate.eq_text("bot_name", f.bot.as_deref());
    predicate.eq_text("test_suite_name", f.test_suite.as_deref());
    predicate.eq_text("test", f.test.as_deref());
    predicate.eq_text("sheriff", f.sheriff.as_deref());

    match f.bug {
        BugFilter::Any => {}
        BugFilter::Untriaged => predicate.push("bug_id IS NULL".to_string()),
        BugFilter::Exact(id) => predicate.eq("bug_id", id),
    }
    if let Some(v) = f.is_improvement.required() {
        predicate.eq("is_improvement", v);
    }
    if let Some(v) = f.recovered.required() {
        predicate.eq("recovered", v);
    }

    predicate.bounds("start_revision", f.start_revision);
    predicate.bounds("end_revision", f.end_revision);
    predicate.bounds(
        "timestamp",
        Bounds {
            min: f.timestamp.min.map(|t| ceil_millis(&t)),
            max: f.timestamp.max.map(|t| t.timestamp_millis()),
        },
    );

    if let Some(keys) = &query.test_keys {
        if keys.len() > MAX_TEST_KEYS_PER_QUERY {
            return Err(StorageError::UnsupportedFilterCombination(format!(
                "report templates cover {} tests; at most {MAX_TEST_KEYS_PER_QUERY} can be combined in one query",
                keys.len()
            )));
        }
        let placeholders: Vec<String> = keys.iter().map(|k| predicate.bind(k.clone())).collect();
        predicate.push(format!("test IN ({})", placeholders.join(", ")));
    }

    if let Some(after) = &query.after {
        if after.order != query.order {
            return Err(StorageError::UnsupportedFilterCombination(format!(
                "cursor was issued for order '{}' but the query is ordered '{}'",
                after.order, query.order
            )));
        }
        let cmp = match query.order {
            SortOrder::NewestFirst => "<",
            SortOrder::OldestFirst => ">",
        };
        let ts = predicate.bind(after.timestamp_ms);
        let key = predicate.bind(after.key.clone());
        predicate.push(format!(
            "(timestamp {cmp} {ts} OR (timestamp = {ts} AND key {cmp} {key}))"
        ));
    }

    Ok(predicate)
}

impl AlertStore for SqliteStorageEngine {
    fn query_alerts(&self, query: &AlertQuery) -> Result<AlertPage> {
        if query.limit == 0 {
            return Ok(AlertPage::default());
        }
        if query.test_keys.as_ref().is_some_and(|keys| keys.is_empty()) {
            return Ok(AlertPage::default());
        }

        let mut predicate = build_predicate(query)?;
        let direction = match query.order {
            SortOrder::NewestFirst => "DESC",
            SortOrder::OldestFirst => "ASC",
        };
        // One probe row past the page tells whether a cursor is needed.
        let limit = predicate.bind((query.limit as i64).saturating_add(1));
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM anomalies{} ORDER BY timestamp {direction}, key {direction} LIMIT {limit}",
            predicate.where_sql()
        );
        tracing::debug!(sql = %sql, params = predicate.params.len(), "Querying alerts");

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = predicate.params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), StoredAlert::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }

        let has_more = records.len() > query.limit;
        if has_more {
            records.truncate(query.limit);
        }
        let next_cursor = if has_more {
            records.last().map(|r| Cursor::after(r, query.order))
        } else {
            None
        };

        Ok(AlertPage {
            records,
            next_cursor,
        })
    }

    fn ping(&self) -> Result<()> {
        self.lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
