//! SQLite-backed event store.

use crate::{
    migrations, DropPolicy, EventId, EventPayload, EventStore, InsertOutcome, StoreCapacity,
    StoreError, StoreResult, StoredEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Maximum bound parameters per DELETE statement.
const REMOVE_CHUNK_SIZE: usize = 500;

/// Durable event store on a single SQLite connection.
///
/// The connection mutex serializes `query` and `remove` against each
/// other and against producer inserts; every operation is a short local
/// write, so producers never wait on network I/O.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    capacity: Option<StoreCapacity>,
    dropped: AtomicU64,
}

impl SqliteEventStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // FULL sync: an insert is on disk before `insert` returns.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;

        debug!(path = %path.display(), "Opened event store");
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            capacity: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Cap the number of pending events.
    pub fn with_capacity(mut self, capacity: StoreCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn insert_row(conn: &Connection, payload: &EventPayload) -> StoreResult<EventId> {
        let now = Utc::now().to_rfc3339();
        let json = serde_json::to_string(payload)?;
        let post_size = json.len() as i64;
        let get_size = payload.encoded_size(crate::Encoding::Get) as i64;

        conn.execute(
            "INSERT INTO events (payload, post_size, get_size, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![json, post_size, get_size, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn count_rows(conn: &Connection) -> StoreResult<usize> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, payload: EventPayload) -> StoreResult<InsertOutcome> {
        let mut conn = self.conn.lock();

        let Some(capacity) = self.capacity else {
            return Self::insert_row(&conn, &payload).map(InsertOutcome::Stored);
        };

        let count = Self::count_rows(&conn)?;
        if count < capacity.max_events {
            return Self::insert_row(&conn, &payload).map(InsertOutcome::Stored);
        }

        if capacity.max_events == 0 || capacity.drop_policy == DropPolicy::DropNewest {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(max_events = capacity.max_events, "Event store full, dropping new event");
            return Ok(InsertOutcome::Dropped);
        }

        let overflow = count + 1 - capacity.max_events;
        let tx = conn.transaction()?;
        let evicted = tx.execute(
            "DELETE FROM events WHERE id IN (SELECT id FROM events ORDER BY id ASC LIMIT ?1)",
            params![overflow as i64],
        )?;
        let id = Self::insert_row(&tx, &payload)?;
        tx.commit()?;

        self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        warn!(
            max_events = capacity.max_events,
            evicted,
            "Event store full, evicted oldest events"
        );
        Ok(InsertOutcome::Stored(id))
    }

    fn query(&self, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT id, payload, post_size, get_size, created_at
                 FROM events ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut events = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for (id, json, post_size, get_size, created_at) in rows {
            match decode_payload(id, &json) {
                Ok(payload) => events.push(StoredEvent {
                    id,
                    payload,
                    post_size: post_size as usize,
                    get_size: get_size as usize,
                    created_at: parse_datetime(created_at),
                }),
                Err(e) => {
                    error!(id, error = %e, "Discarding unreadable event");
                    unreadable.push(id);
                }
            }
        }

        // An undecodable row can never be delivered; leaving it would pin the
        // head of the queue.
        if !unreadable.is_empty() {
            for id in &unreadable {
                conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
            }
            self.dropped
                .fetch_add(unreadable.len() as u64, Ordering::Relaxed);
        }
        Ok(events)
    }

    fn remove(&self, ids: &[EventId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for chunk in ids.chunks(REMOVE_CHUNK_SIZE) {
            let placeholders = std::iter::repeat("?")
                .take(chunk.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders);
            removed += tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;

        debug!(requested = ids.len(), removed, "Removed events");
        Ok(removed)
    }

    fn count(&self) -> StoreResult<usize> {
        Self::count_rows(&self.conn.lock())
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> Option<StoreCapacity> {
        self.capacity
    }
}

fn decode_payload(id: i64, json: &str) -> StoreResult<EventPayload> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        id,
        reason: e.to_string(),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
