//! Triangle store (C5): sparse-materialized persistence of triangle
//! records, with lookup by id, bounding box, and active-state filter.

use crate::error::StoreError;
use crate::mesh::TriangleId;
use crate::triangle::{Triangle, TriangleState};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// A `[min_lon, min_lat, max_lon, max_lat]` bounding box.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

pub trait TriangleStore: Send + Sync {
    /// Loads the triangle if present, otherwise materializes it in
    /// `pending` state. Idempotent under concurrent callers.
    fn get_or_create(&self, id: &TriangleId, now_ms: i64) -> Result<Triangle, StoreError>;

    /// Transactional read-modify-write against the current record.
    fn update(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut Triangle) + Send,
    ) -> Result<Triangle, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Triangle>, StoreError>;

    /// Returns triangles at `level` whose centroid falls in `bbox`,
    /// ordered by id ascending, capped at `max`.
    fn query_bbox(
        &self,
        bbox: BoundingBox,
        level: u8,
        max: usize,
    ) -> Result<Vec<Triangle>, StoreError>;

    /// Returns triangles at `level` with `state ∈ {active, partially_mined}`
    /// and `clicks > 0`, ordered by id ascending, capped at `max`.
    fn query_active(&self, level: u8, max: usize) -> Result<Vec<Triangle>, StoreError>;

    fn triangle_count(&self) -> Result<u64, StoreError>;
}

/// In-memory reference implementation, keyed by triangle id for
/// deterministic ascending iteration.
pub struct InMemoryTriangleStore {
    triangles: Mutex<BTreeMap<String, Triangle>>,
}

impl InMemoryTriangleStore {
    pub fn new() -> Self {
        Self {
            triangles: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryTriangleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TriangleStore for InMemoryTriangleStore {
    fn get_or_create(&self, id: &TriangleId, now_ms: i64) -> Result<Triangle, StoreError> {
        let mut map = self.triangles.lock();
        let encoded = id.encode();
        if let Some(existing) = map.get(&encoded) {
            return Ok(existing.clone());
        }
        let fresh = Triangle::new_pending(id, now_ms);
        map.insert(encoded, fresh.clone());
        Ok(fresh)
    }

    fn update(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut Triangle) + Send,
    ) -> Result<Triangle, StoreError> {
        let mut map = self.triangles.lock();
        let t = map
            .get_mut(id)
            .ok_or_else(|| StoreError::TriangleNotFound(id.to_string()))?;
        mutator(t);
        Ok(t.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Triangle>, StoreError> {
        Ok(self.triangles.lock().get(id).cloned())
    }

    fn query_bbox(
        &self,
        bbox: BoundingBox,
        level: u8,
        max: usize,
    ) -> Result<Vec<Triangle>, StoreError> {
        let map = self.triangles.lock();
        Ok(map
            .values()
            .filter(|t| t.level == level)
            .filter(|t| bbox.contains(t.centroid.coordinates[0], t.centroid.coordinates[1]))
            .take(max)
            .cloned()
            .collect())
    }

    fn query_active(&self, level: u8, max: usize) -> Result<Vec<Triangle>, StoreError> {
        let map = self.triangles.lock();
        Ok(map
            .values()
            .filter(|t| t.level == level)
            .filter(|t| {
                matches!(
                    t.state,
                    TriangleState::Active | TriangleState::PartiallyMined
                ) && t.clicks > 0
            })
            .take(max)
            .cloned()
            .collect())
    }

    fn triangle_count(&self) -> Result<u64, StoreError> {
        Ok(self.triangles.lock().len() as u64)
    }
}

/// `rusqlite`-backed store. Triangle records are serialized to JSON in a
/// `body` column; `id`, `level`, `state`, and centroid lon/lat are
/// denormalized into indexed columns for the query patterns above.
pub struct SqliteTriangleStore {
    conn: Mutex<Connection>,
}

impl SqliteTriangleStore {
    pub fn open(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS triangles (
                id TEXT PRIMARY KEY,
                level INTEGER NOT NULL,
                state TEXT NOT NULL,
                clicks INTEGER NOT NULL,
                centroid_lon REAL NOT NULL,
                centroid_lat REAL NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_triangles_level_state ON triangles(level, state);
            CREATE INDEX IF NOT EXISTS idx_triangles_bbox ON triangles(level, centroid_lon, centroid_lat);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_triangle(body: String) -> Result<Triangle, StoreError> {
        Ok(serde_json::from_str(&body)?)
    }

    fn upsert(conn: &Connection, t: &Triangle) -> Result<(), StoreError> {
        let body = serde_json::to_string(t)?;
        conn.execute(
            "INSERT INTO triangles (id, level, state, clicks, centroid_lon, centroid_lat, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                level=excluded.level, state=excluded.state, clicks=excluded.clicks,
                centroid_lon=excluded.centroid_lon, centroid_lat=excluded.centroid_lat,
                body=excluded.body",
            params![
                t.id,
                t.level,
                state_tag(t.state),
                t.clicks,
                t.centroid.coordinates[0],
                t.centroid.coordinates[1],
                body
            ],
        )?;
        Ok(())
    }
}

fn state_tag(s: TriangleState) -> &'static str {
    match s {
        TriangleState::Pending => "pending",
        TriangleState::Active => "active",
        TriangleState::PartiallyMined => "partially_mined",
        TriangleState::Exhausted => "exhausted",
        TriangleState::Subdivided => "subdivided",
    }
}

impl TriangleStore for SqliteTriangleStore {
    fn get_or_create(&self, id: &TriangleId, now_ms: i64) -> Result<Triangle, StoreError> {
        let conn = self.conn.lock();
        let encoded = id.encode();
        let existing: Option<String> = conn
            .query_row(
                "SELECT body FROM triangles WHERE id = ?1",
                params![encoded],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(body) = existing {
            return Self::row_to_triangle(body);
        }
        let fresh = Triangle::new_pending(id, now_ms);
        Self::upsert(&conn, &fresh)?;
        Ok(fresh)
    }

    fn update(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut Triangle) + Send,
    ) -> Result<Triangle, StoreError> {
        let conn = self.conn.lock();
        let body: String = conn
            .query_row(
                "SELECT body FROM triangles WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::TriangleNotFound(id.to_string()))?;
        let mut t = Self::row_to_triangle(body)?;
        mutator(&mut t);
        Self::upsert(&conn, &t)?;
        Ok(t)
    }

    fn get(&self, id: &str) -> Result<Option<Triangle>, StoreError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM triangles WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(Self::row_to_triangle).transpose()
    }

    fn query_bbox(
        &self,
        bbox: BoundingBox,
        level: u8,
        max: usize,
    ) -> Result<Vec<Triangle>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM triangles
             WHERE level = ?1 AND centroid_lon BETWEEN ?2 AND ?3
               AND centroid_lat BETWEEN ?4 AND ?5
             ORDER BY id ASC LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![
                level,
                bbox.min_lon,
                bbox.max_lon,
                bbox.min_lat,
                bbox.max_lat,
                max as i64
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::row_to_triangle(row?)?);
        }
        Ok(out)
    }

    fn query_active(&self, level: u8, max: usize) -> Result<Vec<Triangle>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM triangles
             WHERE level = ?1 AND state IN ('active', 'partially_mined') AND clicks > 0
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![level, max as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::row_to_triangle(row?)?);
        }
        Ok(out)
    }

    fn triangle_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM triangles", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
