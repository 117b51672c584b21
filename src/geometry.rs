//! Spherical geometry kernel: unit-sphere vector math, geodesic midpoints,
//! and point-in-spherical-triangle containment.

use crate::error::ProofError;
use serde::{Deserialize, Serialize};

/// Boundary tolerance for containment tests. Points within this distance of
/// an edge are considered inside.
pub const EPSILON: f64 = 1e-9;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point on the unit sphere, represented as a 3-vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Normalizes to unit length. Panics only on a true zero vector, which
    /// cannot arise from valid lat/lon input or non-antipodal midpoints.
    pub fn normalized(&self) -> Vec3 {
        let n = self.norm();
        Vec3::new(self.x / n, self.y / n, self.z / n)
    }
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn validate(&self) -> Result<(), ProofError> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ProofError::InvalidCoordinate);
        }
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(ProofError::InvalidCoordinate);
        }
        Ok(())
    }
}

/// Converts a `(lat, lon)` pair in degrees to a unit vector on the sphere.
pub fn vec_from_latlon(coord: &LatLon) -> Result<Vec3, ProofError> {
    coord.validate()?;
    let lat = coord.lat.to_radians();
    let lon = coord.lon.to_radians();
    Ok(Vec3::new(
        lat.cos() * lon.cos(),
        lat.cos() * lon.sin(),
        lat.sin(),
    ))
}

/// Inverts `vec_from_latlon`, returning degrees.
pub fn latlon_from_vec(v: &Vec3) -> LatLon {
    let lat = v.z.clamp(-1.0, 1.0).asin();
    let lon = v.y.atan2(v.x);
    LatLon::new(lat.to_degrees(), lon.to_degrees())
}

/// Geodesic midpoint of two unit vectors. Undefined for antipodal inputs;
/// the mesh never requests midpoints of antipodal points within one base
/// face, so this is not guarded here.
pub fn geodesic_midpoint(a: &Vec3, b: &Vec3) -> Vec3 {
    a.add(b).normalized()
}

/// Tests whether unit vector `p` lies within the spherical triangle `(a, b,
/// c)`, where the vertices are ordered so that `(a × b) · c > 0`.
/// Boundary points (within `EPSILON`) are considered inside.
pub fn point_in_spherical_triangle(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> bool {
    let d1 = a.cross(b).dot(p);
    let d2 = b.cross(c).dot(p);
    let d3 = c.cross(a).dot(p);
    d1 >= -EPSILON && d2 >= -EPSILON && d3 >= -EPSILON
}

/// Great-circle distance in meters between two geographic points.
pub fn haversine_distance_m(a: &LatLon, b: &LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latlon_roundtrip() {
        let original = LatLon::new(47.4979, 19.0402);
        let v = vec_from_latlon(&original).unwrap();
        let back = latlon_from_vec(&v);
        assert!((back.lat - original.lat).abs() < 1e-9);
        assert!((back.lon - original.lon).abs() < 1e-9);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            vec_from_latlon(&LatLon::new(91.0, 0.0)),
            Err(ProofError::InvalidCoordinate)
        ));
        assert!(matches!(
            vec_from_latlon(&LatLon::new(0.0, 181.0)),
            Err(ProofError::InvalidCoordinate)
        ));
    }

    #[test]
    fn midpoint_is_unit_length() {
        let a = vec_from_latlon(&LatLon::new(0.0, 0.0)).unwrap();
        let b = vec_from_latlon(&LatLon::new(0.0, 10.0)).unwrap();
        let m = geodesic_midpoint(&a, &b);
        assert!((m.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn point_inside_its_own_triangle() {
        let a = vec_from_latlon(&LatLon::new(0.0, 0.0)).unwrap();
        let b = vec_from_latlon(&LatLon::new(0.0, 10.0)).unwrap();
        let c = vec_from_latlon(&LatLon::new(10.0, 5.0)).unwrap();
        let centroid = a.add(&b).add(&c).normalized();
        assert!(point_in_spherical_triangle(&centroid, &a, &b, &c));
    }

    #[test]
    fn haversine_symmetric_and_zero_at_self() {
        let a = LatLon::new(47.4979, 19.0402);
        let b = LatLon::new(47.5979, 19.0402);
        assert_eq!(haversine_distance_m(&a, &b), haversine_distance_m(&b, &a));
        assert_eq!(haversine_distance_m(&a, &a), 0.0);
    }

    #[test]
    fn haversine_known_distance() {
        // ~11.1 km, per a one-degree-of-latitude step at this longitude.
        let a = LatLon::new(47.4979, 19.0402);
        let b = LatLon::new(47.5979, 19.0402);
        let d = haversine_distance_m(&a, &b);
        assert!((d - 11_119.0).abs() < 100.0);
    }
}
