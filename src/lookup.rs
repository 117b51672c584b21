//! Mesh lookup (C3): maps `(lat, lon, level)` to a triangle id via
//! top-down descent from the 20 base faces.

use crate::error::ProofError;
use crate::geometry::{point_in_spherical_triangle, vec_from_latlon, LatLon};
use crate::mesh::{TriangleId, BASE_FACE_COUNT};

/// Finds the triangle id containing `(lat, lon)` at the given level.
///
/// Tests each of the 20 base faces, then descends into children, testing
/// child 0..3 in index order and recursing into the first match. Ties on
/// shared edges resolve to the lower-index child because of that ordering.
pub fn point_to_triangle(lat: f64, lon: f64, level: u8) -> Result<TriangleId, ProofError> {
    let p = vec_from_latlon(&LatLon::new(lat, lon))?;

    let mut current = find_base_face(&p)?;
    for _ in 1..level {
        let children = current.children()?;
        let mut found = None;
        for child in children {
            let (a, b, c) = child.vertices();
            if point_in_spherical_triangle(&p, &a, &b, &c) {
                found = Some(child);
                break;
            }
        }
        current = found.ok_or(ProofError::PointNotOnMesh)?;
    }
    Ok(current)
}

fn find_base_face(p: &crate::geometry::Vec3) -> Result<TriangleId, ProofError> {
    for face in 0..BASE_FACE_COUNT {
        let id = TriangleId::base(face);
        let (a, b, c) = id.vertices();
        if point_in_spherical_triangle(p, &a, &b, &c) {
            return Ok(id);
        }
    }
    Err(ProofError::PointNotOnMesh)
}
