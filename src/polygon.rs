//! Triangle polygon builder (C4): derives GeoJSON centroid and polygon
//! geometry for any triangle id.

use crate::mesh::TriangleId;
use serde::{Deserialize, Serialize};

/// GeoJSON `Point`, `[lon, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            kind: "Point",
            coordinates: [lon, lat],
        }
    }
}

/// GeoJSON `Polygon` with a single closed ring of four coordinate pairs
/// (three vertices, first repeated last).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl GeoPolygon {
    pub fn new(ring: [[f64; 2]; 3]) -> Self {
        let mut closed = ring.to_vec();
        closed.push(ring[0]);
        Self {
            kind: "Polygon",
            coordinates: vec![closed],
        }
    }
}

/// Derived geometry for a triangle: its three-vertex polygon and centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGeometry {
    pub polygon: GeoPolygon,
    pub centroid: GeoPoint,
}

/// Builds the polygon and centroid for a triangle id. Pure function of the
/// id — safe to cache indefinitely per id.
pub fn polygon_of(id: &TriangleId) -> TriangleGeometry {
    let verts = id.polygon_latlon();
    let ring: [[f64; 2]; 3] = [
        [verts[0].lon, verts[0].lat],
        [verts[1].lon, verts[1].lat],
        [verts[2].lon, verts[2].lat],
    ];
    let centroid_vec = id.centroid();
    let centroid_ll = crate::geometry::latlon_from_vec(&centroid_vec);
    TriangleGeometry {
        polygon: GeoPolygon::new(ring),
        centroid: GeoPoint::new(centroid_ll.lon, centroid_ll.lat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_has_closed_ring_of_four_coords() {
        let id = TriangleId::base(0);
        let geom = polygon_of(&id);
        assert_eq!(geom.polygon.coordinates[0].len(), 4);
        assert_eq!(
            geom.polygon.coordinates[0][0],
            geom.polygon.coordinates[0][3]
        );
    }

    #[test]
    fn centroid_is_function_of_id_only() {
        let id = TriangleId::base(7);
        let a = polygon_of(&id);
        let b = polygon_of(&id);
        assert_eq!(a.centroid, b.centroid);
    }
}
