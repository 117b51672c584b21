//! Triangle record and lifecycle state machine.

use crate::mesh::TriangleId;
use crate::polygon::{polygon_of, GeoPoint, GeoPolygon};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriangleState {
    Pending,
    Active,
    PartiallyMined,
    Exhausted,
    Subdivided,
}

/// A materialized triangle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triangle {
    pub id: String,
    pub face: u8,
    pub level: u8,
    pub path_encoded: String,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub state: TriangleState,
    pub clicks: u32,
    pub moratorium_start_at: i64,
    pub last_click_at: Option<i64>,
    pub centroid: GeoPoint,
    pub polygon: GeoPolygon,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Triangle {
    /// Builds a freshly materialized triangle in `pending` state.
    pub fn new_pending(triangle_id: &TriangleId, now_ms: i64) -> Self {
        let geom = polygon_of(triangle_id);
        let parent_id = triangle_id.parent().map(|p| p.encode());
        Self {
            id: triangle_id.encode(),
            face: triangle_id.face,
            level: triangle_id.level,
            path_encoded: triangle_id.path_encoded(),
            parent_id,
            children_ids: Vec::new(),
            state: TriangleState::Pending,
            clicks: 0,
            moratorium_start_at: now_ms,
            last_click_at: None,
            centroid: geom.centroid,
            polygon: geom.polygon,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Applies one accepted click: increments the counter, transitions
    /// state, and reports whether the subdivision threshold was reached.
    ///
    /// Caller is responsible for actually creating the four children and
    /// wiring `children_ids` when this returns `true`.
    pub fn register_click(&mut self, now_ms: i64, subdivision_threshold: u32) -> ClickOutcome {
        self.clicks += 1;
        self.last_click_at = Some(now_ms);
        self.updated_at = now_ms;

        self.state = match self.state {
            TriangleState::Pending => TriangleState::Active,
            TriangleState::Active | TriangleState::PartiallyMined => TriangleState::PartiallyMined,
            other => other,
        };

        if self.clicks >= subdivision_threshold {
            if self.level < crate::mesh::MAX_LEVEL {
                self.state = TriangleState::Subdivided;
                ClickOutcome::Subdivide
            } else {
                self.state = TriangleState::Exhausted;
                ClickOutcome::Exhaust
            }
        } else {
            ClickOutcome::Continue
        }
    }

    pub fn attach_children(&mut self, children: &[TriangleId; 4], now_ms: i64) {
        self.children_ids = children.iter().map(|c| c.encode()).collect();
        self.updated_at = now_ms;
    }

    pub fn is_mineable(&self) -> bool {
        matches!(
            self.state,
            TriangleState::Pending | TriangleState::Active | TriangleState::PartiallyMined
        )
    }
}

/// Result of applying a click to a triangle's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Continue,
    Subdivide,
    Exhaust,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriangleId;

    fn sample_id() -> TriangleId {
        TriangleId {
            face: 1,
            level: 10,
            path: vec![0, 1, 2, 3, 0, 1, 2, 3, 0],
        }
    }

    #[test]
    fn pending_triangle_starts_with_zero_clicks() {
        let t = Triangle::new_pending(&sample_id(), 1000);
        assert_eq!(t.state, TriangleState::Pending);
        assert_eq!(t.clicks, 0);
        assert!(t.children_ids.is_empty());
    }

    #[test]
    fn first_click_transitions_pending_to_active() {
        let mut t = Triangle::new_pending(&sample_id(), 1000);
        let outcome = t.register_click(2000, 2);
        assert_eq!(t.state, TriangleState::Active);
        assert_eq!(outcome, ClickOutcome::Continue);
    }

    #[test]
    fn reaching_threshold_subdivides_when_level_below_max() {
        let mut t = Triangle::new_pending(&sample_id(), 1000);
        t.register_click(2000, 2);
        let outcome = t.register_click(15000, 2);
        assert_eq!(t.state, TriangleState::Subdivided);
        assert_eq!(outcome, ClickOutcome::Subdivide);
    }

    #[test]
    fn reaching_threshold_at_max_level_exhausts() {
        let id = TriangleId {
            face: 0,
            level: 21,
            path: vec![0; 20],
        };
        let mut t = Triangle::new_pending(&id, 1000);
        t.register_click(2000, 2);
        let outcome = t.register_click(15000, 2);
        assert_eq!(t.state, TriangleState::Exhausted);
        assert_eq!(outcome, ClickOutcome::Exhaust);
    }
}
