//! SQLite event log.
//!
//! Events live in a single `flow_event` table. The latest-per-aggregate
//! relation is computed with window functions at query time, so summaries
//! can never drift from the log. Blocking database work runs on the tokio
//! blocking pool.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::categorization::ProjectionCategories;
use crate::core::error::AccessorError;
use crate::core::query::SummaryQuery;
use crate::domain::{
    AggregateKey, ErrorEntry, Event, EventId, EventKind, FlowHeaders, InstanceFlowSummary,
    PageRequest, SortOrder, StoredEvent,
};

use super::{EventLog, IntegrationStatusCounts, StatusCounts, SummaryPage};

/// A single schema migration
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[Migration {
    name: "001_flow_event",
    sql: "CREATE TABLE flow_event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_application_id INTEGER NOT NULL,
            source_application_integration_id TEXT NOT NULL,
            source_application_instance_id TEXT NOT NULL,
            name TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            kind TEXT NOT NULL,
            application_id TEXT NOT NULL,
            correlation_id TEXT,
            integration_id INTEGER,
            instance_id INTEGER,
            configuration_id INTEGER,
            archive_instance_id TEXT,
            destination_instance_id TEXT,
            file_ids_json TEXT NOT NULL DEFAULT '[]',
            errors_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX flow_event_aggregate_idx ON flow_event (
            source_application_id,
            source_application_integration_id,
            source_application_instance_id,
            timestamp_us,
            id
        );
        CREATE INDEX flow_event_name_idx ON flow_event (name);
        CREATE INDEX flow_event_destination_idx ON flow_event (destination_instance_id);",
}];

const KEY_COLUMNS: &str =
    "source_application_id, source_application_integration_id, source_application_instance_id";

const EVENT_COLUMNS: &str = "id, source_application_id, source_application_integration_id, \
     source_application_instance_id, name, timestamp_us, kind, application_id, correlation_id, \
     integration_id, instance_id, configuration_id, archive_instance_id, destination_instance_id, \
     file_ids_json, errors_json";

const SUMMARY_COLUMNS: &str = "s.source_application_id, s.source_application_integration_id, \
     s.source_application_instance_id, s.integration_id, s.latest_instance_id, s.latest_event_id, \
     s.latest_update_us, s.latest_status_event_name, s.latest_storage_status_event_name, \
     s.destination_ids";

/// Event log backed by a single SQLite connection
#[derive(Clone)]
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventLog {
    /// Open (or create) a database file and apply pending migrations
    pub fn open(path: &Path) -> Result<Self, AccessorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AccessorError::Unavailable(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        debug!(path = %path.display(), %journal_mode, "Opened event log database");

        Self::from_connection(conn)
    }

    /// A private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self, AccessorError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AccessorError> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T, AccessorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AccessorError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AccessorError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                AccessorError::Cancelled
            } else {
                AccessorError::Unavailable(format!("event log worker failed: {}", e))
            }
        })?
    }
}

/// Apply migrations not yet recorded in `_flowtrack_migrations`
fn run_migrations(conn: &Connection) -> Result<usize, AccessorError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _flowtrack_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM _flowtrack_migrations WHERE name = ?1",
            [migration.name],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }

        info!(migration = migration.name, "Applying migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO _flowtrack_migrations (name) VALUES (?1)",
            [migration.name],
        )?;
        tx.commit()?;
        applied += 1;
    }

    Ok(applied)
}

/// SQL text with positional parameters bound in textual order
#[derive(Default)]
struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn bind(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    /// `column IN (...)`; an empty list matches nothing
    fn push_in<I>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = Value>,
    {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            return self.push("0");
        }
        self.push(column).push(" IN (");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value);
        }
        self.push(")")
    }

    /// `column NOT IN (...)`; an empty list matches everything
    fn push_not_in<I>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = Value>,
    {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            return self.push("1");
        }
        self.push("NOT (").push_in(column, values).push(")")
    }
}

fn text<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
    values.into_iter().map(|v| Value::Text(v.to_string())).collect()
}

fn integers<'a>(values: impl IntoIterator<Item = &'a i64>) -> Vec<Value> {
    values.into_iter().map(|v| Value::Integer(*v)).collect()
}

fn key_match(left: &str, right: &str) -> String {
    format!(
        "{l}.source_application_id = {r}.source_application_id \
         AND {l}.source_application_integration_id = {r}.source_application_integration_id \
         AND {l}.source_application_instance_id = {r}.source_application_instance_id",
        l = left,
        r = right
    )
}

/// `name AS (...)`: the latest row per aggregate among rows matching `condition`
fn push_latest_cte(sql: &mut SqlBuilder, name: &str, condition: impl FnOnce(&mut SqlBuilder)) {
    sql.push(&format!(
        "{name} AS (SELECT {KEY_COLUMNS}, id, name, timestamp_us, integration_id, instance_id FROM (\
         SELECT {KEY_COLUMNS}, id, name, timestamp_us, integration_id, instance_id, \
         ROW_NUMBER() OVER (PARTITION BY {KEY_COLUMNS} ORDER BY timestamp_us DESC, id DESC) AS rn \
         FROM flow_event WHERE "
    ));
    condition(sql);
    sql.push(") WHERE rn = 1)");
}

/// `WITH ... summary AS (...) SELECT <select> FROM summary s WHERE <query>`
fn summary_select(
    query: &SummaryQuery,
    categories: &ProjectionCategories,
    select: &str,
) -> SqlBuilder {
    let mut sql = SqlBuilder::default();
    sql.push("WITH ");
    push_latest_cte(&mut sql, "latest", |sql| {
        sql.push("1");
    });
    sql.push(", ");
    push_latest_cte(&mut sql, "latest_status", |sql| {
        sql.push_in("name", text(categories.status_event_names.iter().copied()));
    });
    sql.push(", ");
    push_latest_cte(&mut sql, "latest_storage", |sql| {
        sql.push_in("name", text(categories.storage_event_names.iter().copied()));
    });
    sql.push(", ");
    push_latest_cte(&mut sql, "latest_instance", |sql| {
        sql.push("instance_id IS NOT NULL");
    });
    sql.push(", ");
    push_latest_cte(&mut sql, "latest_integration", |sql| {
        sql.push("integration_id IS NOT NULL");
    });
    sql.push(&format!(
        ", destinations AS (SELECT {KEY_COLUMNS}, \
         json_group_array(DISTINCT destination_instance_id) AS destination_ids \
         FROM flow_event WHERE destination_instance_id IS NOT NULL AND "
    ));
    sql.push_in("name", text(categories.dispatch_event_names.iter().copied()));
    sql.push(&format!(
        " GROUP BY {KEY_COLUMNS}), summary AS (SELECT \
         l.source_application_id, l.source_application_integration_id, \
         l.source_application_instance_id, lg.integration_id AS integration_id, \
         li.instance_id AS latest_instance_id, l.id AS latest_event_id, \
         l.timestamp_us AS latest_update_us, ls.name AS latest_status_event_name, \
         lst.name AS latest_storage_status_event_name, d.destination_ids AS destination_ids \
         FROM latest l \
         LEFT JOIN latest_status ls ON {} \
         LEFT JOIN latest_storage lst ON {} \
         LEFT JOIN latest_instance li ON {} \
         LEFT JOIN latest_integration lg ON {} \
         LEFT JOIN destinations d ON {}) ",
        key_match("l", "ls"),
        key_match("l", "lst"),
        key_match("l", "li"),
        key_match("l", "lg"),
        key_match("l", "d"),
    ));

    sql.push("SELECT ").push(select).push(" FROM summary s WHERE 1");
    push_predicates(&mut sql, query, categories);
    sql
}

fn push_predicates(sql: &mut SqlBuilder, query: &SummaryQuery, categories: &ProjectionCategories) {
    if let Some(min) = query.latest_update.min {
        sql.push(" AND s.latest_update_us >= ")
            .bind(Value::Integer(bound_micros(min)));
    }
    if let Some(max) = query.latest_update.max {
        sql.push(" AND s.latest_update_us < ")
            .bind(Value::Integer(bound_micros(max)));
    }
    if let Some(ref ids) = query.source_application_ids {
        sql.push(" AND ").push_in("s.source_application_id", integers(ids));
    }
    if let Some(ref ids) = query.source_application_integration_ids {
        sql.push(" AND ").push_in(
            "s.source_application_integration_id",
            text(ids.iter().map(String::as_str)),
        );
    }
    if let Some(ref ids) = query.source_application_instance_ids {
        sql.push(" AND ").push_in(
            "s.source_application_instance_id",
            text(ids.iter().map(String::as_str)),
        );
    }
    if let Some(ref ids) = query.integration_ids {
        sql.push(" AND ").push_in("s.integration_id", integers(ids));
    }
    if let Some(ref names) = query.latest_status_event_names {
        sql.push(" AND ")
            .push_in("s.latest_status_event_name", text(names.iter().copied()));
    }
    if let Some(ref constraint) = query.latest_storage_status {
        sql.push(" AND (").push_in(
            "s.latest_storage_status_event_name",
            text(constraint.event_names.iter().copied()),
        );
        if constraint.include_never_stored {
            sql.push(" OR s.latest_storage_status_event_name IS NULL");
        }
        sql.push(")");
    }
    if let Some(ref names) = query.associated_event_names {
        sql.push(&format!(
            " AND EXISTS (SELECT 1 FROM flow_event a WHERE {} AND ",
            key_match("a", "s")
        ))
        .push_in("a.name", text(names.iter().copied()))
        .push(")");
    }
    if let Some(ref ids) = query.destination_instance_ids {
        sql.push(&format!(
            " AND EXISTS (SELECT 1 FROM flow_event d WHERE {} AND ",
            key_match("d", "s")
        ))
        .push_in("d.name", text(categories.dispatch_event_names.iter().copied()))
        .push(" AND ")
        .push_in(
            "d.destination_instance_id",
            text(ids.iter().map(String::as_str)),
        )
        .push(")");
    }
}

/// Fail if the log holds any event outside the catalog
fn check_unknown_names(
    conn: &Connection,
    categories: &ProjectionCategories,
) -> Result<(), AccessorError> {
    let mut sql = SqlBuilder::default();
    sql.push("SELECT name FROM flow_event WHERE ")
        .push_not_in("name", text(categories.known_event_names.iter().copied()))
        .push(" ORDER BY id LIMIT 1");

    let unknown: Option<String> = conn
        .query_row(&sql.sql, rusqlite::params_from_iter(sql.params.iter()), |row| row.get(0))
        .optional()?;

    match unknown {
        Some(name) => Err(AccessorError::UnknownEventName(name)),
        None => Ok(()),
    }
}

/// Smallest stored micros value not before `instant`.
///
/// Stored timestamps are whole microseconds, so `ts >= bound` and
/// `ts < bound` give the same answers against the rounded-up bound.
fn bound_micros(instant: DateTime<Utc>) -> i64 {
    let micros = instant.timestamp_micros();
    if instant.timestamp_subsec_nanos() % 1_000 == 0 {
        micros
    } else {
        micros.saturating_add(1)
    }
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, AccessorError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| AccessorError::Corrupt(format!("timestamp out of range: {}", micros)))
}

/// Raw `flow_event` row before decoding
struct EventRow {
    id: i64,
    key: AggregateKey,
    name: String,
    timestamp_us: i64,
    kind: String,
    application_id: String,
    correlation_id: Option<String>,
    integration_id: Option<i64>,
    instance_id: Option<i64>,
    configuration_id: Option<i64>,
    archive_instance_id: Option<String>,
    destination_instance_id: Option<String>,
    file_ids_json: String,
    errors_json: String,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: AggregateKey {
                source_application_id: row.get(1)?,
                source_application_integration_id: row.get(2)?,
                source_application_instance_id: row.get(3)?,
            },
            name: row.get(4)?,
            timestamp_us: row.get(5)?,
            kind: row.get(6)?,
            application_id: row.get(7)?,
            correlation_id: row.get(8)?,
            integration_id: row.get(9)?,
            instance_id: row.get(10)?,
            configuration_id: row.get(11)?,
            archive_instance_id: row.get(12)?,
            destination_instance_id: row.get(13)?,
            file_ids_json: row.get(14)?,
            errors_json: row.get(15)?,
        })
    }

    fn decode(self) -> Result<StoredEvent, AccessorError> {
        let kind: EventKind = self.kind.parse().map_err(AccessorError::Corrupt)?;
        let correlation_id = self
            .correlation_id
            .map(|id| Uuid::parse_str(&id))
            .transpose()
            .map_err(|e| AccessorError::Corrupt(format!("correlation id: {}", e)))?;
        let file_ids: Vec<Uuid> = serde_json::from_str(&self.file_ids_json)?;
        let errors: Vec<ErrorEntry> = serde_json::from_str(&self.errors_json)?;

        Ok(StoredEvent {
            id: self.id,
            event: Event {
                key: self.key,
                name: self.name,
                timestamp: timestamp_from_micros(self.timestamp_us)?,
                kind,
                application_id: self.application_id,
                errors,
                flow_headers: FlowHeaders {
                    correlation_id,
                    integration_id: self.integration_id,
                    instance_id: self.instance_id,
                    configuration_id: self.configuration_id,
                    archive_instance_id: self.archive_instance_id,
                    file_ids,
                    destination_instance_id: self.destination_instance_id,
                },
            },
        })
    }
}

/// Raw summary row before decoding
struct SummaryRow {
    key: AggregateKey,
    integration_id: Option<i64>,
    latest_instance_id: Option<i64>,
    latest_event_id: i64,
    latest_update_us: i64,
    latest_status_event_name: Option<String>,
    latest_storage_status_event_name: Option<String>,
    destination_ids: Option<String>,
}

impl SummaryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: AggregateKey {
                source_application_id: row.get(0)?,
                source_application_integration_id: row.get(1)?,
                source_application_instance_id: row.get(2)?,
            },
            integration_id: row.get(3)?,
            latest_instance_id: row.get(4)?,
            latest_event_id: row.get(5)?,
            latest_update_us: row.get(6)?,
            latest_status_event_name: row.get(7)?,
            latest_storage_status_event_name: row.get(8)?,
            destination_ids: row.get(9)?,
        })
    }

    fn decode(self) -> Result<InstanceFlowSummary, AccessorError> {
        let destination_instance_ids: BTreeSet<String> = match self.destination_ids {
            Some(json) => serde_json::from_str(&json)?,
            None => BTreeSet::new(),
        };

        Ok(InstanceFlowSummary {
            key: self.key,
            integration_id: self.integration_id,
            latest_instance_id: self.latest_instance_id,
            latest_event_id: self.latest_event_id,
            latest_update: timestamp_from_micros(self.latest_update_us)?,
            latest_status_event_name: self.latest_status_event_name,
            latest_storage_status_event_name: self.latest_storage_status_event_name,
            destination_instance_ids,
        })
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_event(&self, event: Event) -> Result<EventId, AccessorError> {
        let file_ids_json = serde_json::to_string(&event.flow_headers.file_ids)?;
        let errors_json = serde_json::to_string(&event.errors)?;

        self.with_connection(move |conn| {
            let headers = &event.flow_headers;
            let id = conn.query_row(
                "INSERT INTO flow_event (
                    source_application_id, source_application_integration_id,
                    source_application_instance_id, name, timestamp_us, kind, application_id,
                    correlation_id, integration_id, instance_id, configuration_id,
                    archive_instance_id, destination_instance_id, file_ids_json, errors_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 RETURNING id",
                params![
                    event.key.source_application_id,
                    event.key.source_application_integration_id,
                    event.key.source_application_instance_id,
                    event.name,
                    event.timestamp.timestamp_micros(),
                    event.kind.as_str(),
                    event.application_id,
                    headers.correlation_id.map(|id| id.to_string()),
                    headers.integration_id,
                    headers.instance_id,
                    headers.configuration_id,
                    headers.archive_instance_id,
                    headers.destination_instance_id,
                    file_ids_json,
                    errors_json,
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn events_for_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Vec<StoredEvent>, AccessorError> {
        let key = key.clone();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM flow_event
                 WHERE source_application_id = ?1
                   AND source_application_integration_id = ?2
                   AND source_application_instance_id = ?3
                 ORDER BY timestamp_us ASC, id ASC"
            ))?;
            let rows = stmt.query_map(
                params![
                    key.source_application_id,
                    key.source_application_integration_id,
                    key.source_application_instance_id,
                ],
                EventRow::read,
            )?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row?.decode()?);
            }
            Ok(events)
        })
        .await
    }

    async fn query_latest_per_aggregate(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
        page: &PageRequest,
    ) -> Result<SummaryPage, AccessorError> {
        let query = query.clone();
        let categories = categories.clone();
        let page = *page;

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            check_unknown_names(&tx, &categories)?;

            let direction = match page.sort {
                SortOrder::LatestUpdateDesc => "DESC",
                SortOrder::LatestUpdateAsc => "ASC",
            };
            let mut sql = summary_select(&query, &categories, SUMMARY_COLUMNS);
            sql.push(&format!(
                " ORDER BY s.latest_update_us {direction}, s.source_application_id ASC, \
                 s.source_application_integration_id ASC, s.source_application_instance_id ASC \
                 LIMIT "
            ))
            .bind(Value::Integer(i64::from(page.size) + 1))
            .push(" OFFSET ")
            .bind(Value::Integer(i64::try_from(page.offset()).unwrap_or(i64::MAX)));

            let mut summaries = {
                let mut stmt = tx.prepare(&sql.sql)?;
                let rows =
                    stmt.query_map(rusqlite::params_from_iter(sql.params.iter()), SummaryRow::read)?;
                let mut summaries = Vec::new();
                for row in rows {
                    summaries.push(row?.decode()?);
                }
                summaries
            };
            // one extra row was fetched to detect a following page
            let has_next = summaries.len() > page.size as usize;
            summaries.truncate(page.size as usize);

            let total = if page.include_total {
                let sql = summary_select(&query, &categories, "COUNT(*)");
                let count: i64 = tx.query_row(
                    &sql.sql,
                    rusqlite::params_from_iter(sql.params.iter()),
                    |row| row.get(0),
                )?;
                Some(count as u64)
            } else {
                None
            };

            tx.commit()?;
            Ok(SummaryPage {
                summaries,
                has_next,
                total,
            })
        })
        .await
    }

    async fn count_grouped_by_status(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<StatusCounts, AccessorError> {
        let query = query.clone();
        let categories = categories.clone();

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            check_unknown_names(&tx, &categories)?;

            let mut sql =
                summary_select(&query, &categories, "s.latest_status_event_name, COUNT(*)");
            sql.push(" GROUP BY s.latest_status_event_name");

            let mut counts = StatusCounts::new();
            {
                let mut stmt = tx.prepare(&sql.sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql.params.iter()), |row| {
                    Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (name, count) = row?;
                    counts.insert(name, count as u64);
                }
            }

            tx.commit()?;
            Ok(counts)
        })
        .await
    }

    async fn count_grouped_by_integration(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<IntegrationStatusCounts, AccessorError> {
        let query = query.clone();
        let categories = categories.clone();

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            check_unknown_names(&tx, &categories)?;

            let mut sql = summary_select(
                &query,
                &categories,
                "s.integration_id, s.latest_status_event_name, COUNT(*)",
            );
            sql.push(" GROUP BY s.integration_id, s.latest_status_event_name");

            let mut counts = IntegrationStatusCounts::new();
            {
                let mut stmt = tx.prepare(&sql.sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql.params.iter()), |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
                for row in rows {
                    let (integration_id, name, count) = row?;
                    counts
                        .entry(integration_id)
                        .or_default()
                        .insert(name, count as u64);
                }
            }

            tx.commit()?;
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::categorization::CategorizationService;
    use crate::domain::category::*;
    use chrono::TimeZone;

    fn key() -> AggregateKey {
        AggregateKey::new(1, "INT-1", "a-1")
    }

    fn event(name: &str, second: u32) -> Event {
        Event::new(key(), name, EventKind::Info, "test")
            .at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, second).unwrap())
    }

    fn categories() -> &'static ProjectionCategories {
        CategorizationService::global().projection_categories()
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_bounds_round_up_to_whole_micros() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(bound_micros(whole), whole.timestamp_micros());
        let inside = whole + chrono::Duration::nanoseconds(1);
        assert_eq!(bound_micros(inside), whole.timestamp_micros() + 1);
    }

    #[test]
    fn test_push_in_binds_in_order() {
        let mut sql = SqlBuilder::default();
        sql.push("a = ").bind(Value::Integer(1)).push(" AND ");
        sql.push_in("b", text(["x", "y"]));
        assert_eq!(sql.sql, "a = ? AND b IN (?, ?)");
        assert_eq!(
            sql.params,
            vec![
                Value::Integer(1),
                Value::Text("x".into()),
                Value::Text("y".into())
            ]
        );
    }

    #[test]
    fn test_empty_lists_render_constants() {
        let mut sql = SqlBuilder::default();
        sql.push_in("a", Vec::new()).push(" ").push_not_in("b", Vec::new());
        assert_eq!(sql.sql, "0 1");
        assert!(sql.params.is_empty());
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let log = SqliteEventLog::in_memory().unwrap();
        let first = log.append_event(event(INSTANCE_RECEIVED, 0)).await.unwrap();
        let second = log.append_event(event(INSTANCE_MAPPED, 1)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_history_round_trips_headers_and_errors() {
        let log = SqliteEventLog::in_memory().unwrap();
        let correlation_id = Uuid::new_v4();
        let original = event(INSTANCE_DISPATCHING_ERROR, 3)
            .with_headers(FlowHeaders {
                correlation_id: Some(correlation_id),
                integration_id: Some(12),
                instance_id: Some(400),
                configuration_id: Some(3),
                archive_instance_id: Some("arch-1".into()),
                file_ids: vec![Uuid::new_v4()],
                destination_instance_id: None,
            })
            .with_error(ErrorEntry::new("destination-rejected").with_arg("status", "409"));

        let id = log.append_event(original.clone()).await.unwrap();
        let history = log.events_for_aggregate(&key()).await.unwrap();

        assert_eq!(history, vec![StoredEvent { id, event: original }]);
    }

    #[tokio::test]
    async fn test_history_is_ordered_by_timestamp_then_id() {
        let log = SqliteEventLog::in_memory().unwrap();
        log.append_event(event(INSTANCE_MAPPED, 5)).await.unwrap();
        log.append_event(event(INSTANCE_RECEIVED, 1)).await.unwrap();
        log.append_event(event(INSTANCE_MAPPING_ERROR, 5)).await.unwrap();

        let names: Vec<String> = log
            .events_for_aggregate(&key())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event.name)
            .collect();
        assert_eq!(names, vec![INSTANCE_RECEIVED, INSTANCE_MAPPED, INSTANCE_MAPPING_ERROR]);
    }

    #[tokio::test]
    async fn test_unknown_event_name_surfaces_from_queries() {
        let log = SqliteEventLog::in_memory().unwrap();
        log.append_event(event(INSTANCE_RECEIVED, 0)).await.unwrap();
        log.append_event(event("instance-vanished", 1)).await.unwrap();

        let err = log
            .query_latest_per_aggregate(&SummaryQuery::default(), categories(), &PageRequest::new(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessorError::UnknownEventName(name) if name == "instance-vanished"));

        let err = log
            .count_grouped_by_status(&SummaryQuery::default(), categories())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessorError::UnknownEventName(_)));
    }
}
