//! Append-only event log (C6): audit trail of all triangle state
//! transitions, and the authoritative `(account, nonce)` replay defense.

use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One append-only event. Only `Click` carries `(account, nonce)` — the
/// field is structurally absent from every other variant, so it cannot
/// collide with the unique replay index by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Create {
        id: Uuid,
        triangle_id: String,
        timestamp: i64,
    },
    Click {
        id: Uuid,
        triangle_id: String,
        timestamp: i64,
        account: String,
        nonce: String,
        signature: String,
        lat: f64,
        lon: f64,
        accuracy: f64,
        speed: Option<f64>,
        click_number: u32,
        reward: String,
    },
    Subdivide {
        id: Uuid,
        triangle_id: String,
        timestamp: i64,
        children_ids: Vec<String>,
    },
    StateChange {
        id: Uuid,
        triangle_id: String,
        timestamp: i64,
        from_state: String,
        to_state: String,
    },
}

impl Event {
    pub fn triangle_id(&self) -> &str {
        match self {
            Event::Create { triangle_id, .. }
            | Event::Click { triangle_id, .. }
            | Event::Subdivide { triangle_id, .. }
            | Event::StateChange { triangle_id, .. } => triangle_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Create { timestamp, .. }
            | Event::Click { timestamp, .. }
            | Event::Subdivide { timestamp, .. }
            | Event::StateChange { timestamp, .. } => *timestamp,
        }
    }
}

pub trait EventLog: Send + Sync {
    /// Atomically claims `(account, nonce)` before any triangle or ledger
    /// mutation happens for this submission. This, not `append`, is the
    /// gate a racing duplicate submission must fail at — callers reserve
    /// once per submission and retry the rest of the commit freely without
    /// re-claiming.
    fn reserve_nonce(&self, account: &str, nonce: &str) -> Result<(), StoreError>;
    fn append(&self, event: Event) -> Result<(), StoreError>;
    fn nonce_exists(&self, account: &str, nonce: &str) -> Result<bool, StoreError>;
    fn by_triangle(&self, triangle_id: &str) -> Result<Vec<Event>, StoreError>;
    fn last_click_by_account(&self, account: &str) -> Result<Option<Event>, StoreError>;
}

/// In-memory reference implementation; backs unit tests.
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
    nonces: Mutex<HashSet<(String, String)>>,
    reserved: Mutex<HashSet<(String, String)>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            nonces: Mutex::new(HashSet::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn reserve_nonce(&self, account: &str, nonce: &str) -> Result<(), StoreError> {
        let key = (account.to_lowercase(), nonce.to_string());
        if !self.reserved.lock().insert(key) {
            return Err(StoreError::DuplicateNonce);
        }
        Ok(())
    }

    fn append(&self, event: Event) -> Result<(), StoreError> {
        if let Event::Click { account, nonce, .. } = &event {
            let mut nonces = self.nonces.lock();
            let key = (account.to_lowercase(), nonce.clone());
            if !nonces.insert(key) {
                return Err(StoreError::DuplicateNonce);
            }
        }
        self.events.lock().push(event);
        Ok(())
    }

    fn nonce_exists(&self, account: &str, nonce: &str) -> Result<bool, StoreError> {
        Ok(self
            .nonces
            .lock()
            .contains(&(account.to_lowercase(), nonce.to_string())))
    }

    fn by_triangle(&self, triangle_id: &str) -> Result<Vec<Event>, StoreError> {
        let mut out: Vec<Event> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.triangle_id() == triangle_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| std::cmp::Reverse(e.timestamp()));
        Ok(out)
    }

    fn last_click_by_account(&self, account: &str) -> Result<Option<Event>, StoreError> {
        let events = self.events.lock();
        let mut clicks: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Click { account: a, .. } if a.eq_ignore_ascii_case(account)))
            .collect();
        clicks.sort_by_key(|e| std::cmp::Reverse(e.timestamp()));
        Ok(clicks.first().map(|e| (*e).clone()))
    }
}

/// `rusqlite`-backed event log. Events are stored as serialized JSON rows;
/// the `(account, nonce)` uniqueness is enforced by a sparse unique index
/// so only rows with a non-null nonce participate.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    pub fn open(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                triangle_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                account TEXT,
                nonce TEXT,
                body TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_account_nonce
                ON events(account, nonce) WHERE nonce IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_events_triangle ON events(triangle_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_account ON events(account, timestamp);
            CREATE TABLE IF NOT EXISTS nonce_claims (
                account TEXT NOT NULL,
                nonce TEXT NOT NULL,
                PRIMARY KEY (account, nonce)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_event(body: String) -> Result<Event, StoreError> {
        Ok(serde_json::from_str(&body)?)
    }
}

impl EventLog for SqliteEventLog {
    fn reserve_nonce(&self, account: &str, nonce: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO nonce_claims (account, nonce) VALUES (?1, ?2)",
            params![account.to_lowercase(), nonce],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateNonce)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn append(&self, event: Event) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let body = serde_json::to_string(&event)?;
        let (id, account, nonce) = match &event {
            Event::Click {
                id, account, nonce, ..
            } => (*id, Some(account.to_lowercase()), Some(nonce.clone())),
            Event::Create { id, .. } | Event::Subdivide { id, .. } | Event::StateChange { id, .. } => {
                (*id, None, None)
            }
        };
        let result = conn.execute(
            "INSERT INTO events (id, triangle_id, timestamp, account, nonce, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                event.triangle_id(),
                event.timestamp(),
                account,
                nonce,
                body
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateNonce)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn nonce_exists(&self, account: &str, nonce: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM events WHERE account = ?1 AND nonce = ?2",
                params![account.to_lowercase(), nonce],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn by_triangle(&self, triangle_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM events WHERE triangle_id = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![triangle_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::row_to_event(row?)?);
        }
        Ok(out)
    }

    fn last_click_by_account(&self, account: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM events WHERE account = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![account.to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(Self::row_to_event).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(account: &str, nonce: &str, ts: i64) -> Event {
        Event::Click {
            id: Uuid::new_v4(),
            triangle_id: "STEP-TRI-v1:L01:F00:P:0000".to_string(),
            timestamp: ts,
            account: account.to_string(),
            nonce: nonce.to_string(),
            signature: "0xdead".to_string(),
            lat: 47.0,
            lon: 19.0,
            accuracy: 10.0,
            speed: None,
            click_number: 1,
            reward: "1000000000000000000".to_string(),
        }
    }

    #[test]
    fn duplicate_nonce_is_rejected_in_memory() {
        let log = InMemoryEventLog::new();
        log.append(click("0xabc", "n1", 1)).unwrap();
        let err = log.append(click("0xabc", "n1", 2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNonce));
    }

    #[test]
    fn reserve_nonce_is_one_shot_in_memory() {
        let log = InMemoryEventLog::new();
        log.reserve_nonce("0xabc", "n1").unwrap();
        let err = log.reserve_nonce("0xabc", "n1").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNonce));
    }

    #[test]
    fn reserve_nonce_is_one_shot_in_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let log = SqliteEventLog::open(conn).unwrap();
        log.reserve_nonce("0xabc", "n1").unwrap();
        let err = log.reserve_nonce("0xabc", "n1").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNonce));
    }

    #[test]
    fn distinct_nonces_both_succeed() {
        let log = InMemoryEventLog::new();
        log.append(click("0xabc", "n1", 1)).unwrap();
        log.append(click("0xabc", "n2", 2)).unwrap();
        assert!(log.nonce_exists("0xabc", "n1").unwrap());
        assert!(log.nonce_exists("0xabc", "n2").unwrap());
    }

    #[test]
    fn duplicate_nonce_is_rejected_in_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let log = SqliteEventLog::open(conn).unwrap();
        log.append(click("0xabc", "n1", 1)).unwrap();
        let err = log.append(click("0xabc", "n1", 2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNonce));
    }

    #[test]
    fn non_click_events_do_not_touch_the_nonce_index() {
        let log = InMemoryEventLog::new();
        log.append(Event::Create {
            id: Uuid::new_v4(),
            triangle_id: "t1".to_string(),
            timestamp: 1,
        })
        .unwrap();
        log.append(Event::Create {
            id: Uuid::new_v4(),
            triangle_id: "t2".to_string(),
            timestamp: 2,
        })
        .unwrap();
    }

    #[test]
    fn last_click_by_account_returns_most_recent() {
        let log = InMemoryEventLog::new();
        log.append(click("0xabc", "n1", 100)).unwrap();
        log.append(click("0xabc", "n2", 200)).unwrap();
        let last = log.last_click_by_account("0xabc").unwrap().unwrap();
        assert_eq!(last.timestamp(), 200);
    }
}
