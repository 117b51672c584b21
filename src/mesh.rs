//! Mesh addressing (C2): canonical triangle ID encode/decode and
//! parent/child/path math over the fixed 20-face icosahedron.

use crate::error::ProofError;
use crate::geometry::{geodesic_midpoint, vec_from_latlon, LatLon, Vec3};
use base64::Engine;
use crc::{Crc, CRC_16_XMODEM};
use once_cell::sync::Lazy;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub const MAX_LEVEL: u8 = 21;
pub const BASE_FACE_COUNT: u8 = 20;

/// One of the four children of a triangle, selected by position in its
/// parent's subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChildSlot {
    Corner0 = 0,
    Corner1 = 1,
    Corner2 = 2,
    Central = 3,
}

impl ChildSlot {
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(ChildSlot::Corner0),
            1 => Some(ChildSlot::Corner1),
            2 => Some(ChildSlot::Corner2),
            3 => Some(ChildSlot::Central),
            _ => None,
        }
    }

    pub fn digit(self) -> u8 {
        self as u8
    }
}

/// A decoded triangle identity: face, level, and descent path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriangleId {
    pub face: u8,
    pub level: u8,
    pub path: Vec<u8>,
}

impl TriangleId {
    pub fn base(face: u8) -> Self {
        Self {
            face,
            level: 1,
            path: Vec::new(),
        }
    }

    /// Decimal string form of the path interpreted as a big-endian base-4
    /// integer — the triangle record's denormalized `pathEncoded`.
    pub fn path_encoded(&self) -> String {
        path_to_bigdecimal_string(&self.path)
    }

    /// The CRC input string: `v1|{face}|{level}|{pathEncoded}`.
    fn crc_input(&self) -> String {
        format!("v1|{}|{}|{}", self.face, self.level, self.path_encoded())
    }

    fn checksum(&self) -> u16 {
        CRC16.checksum(self.crc_input().as_bytes())
    }

    /// Builds the canonical `STEP-TRI-v1:...` string.
    pub fn encode(&self) -> String {
        let path_b64 = base64url_encode_path(&self.path);
        format!(
            "STEP-TRI-v1:L{:02}:F{:02}:P{}:{:04x}",
            self.level,
            self.face,
            path_b64,
            self.checksum()
        )
    }

    /// Parses and validates a canonical triangle ID string.
    pub fn decode(id: &str) -> Result<Self, ProofError> {
        let rest = id
            .strip_prefix("STEP-TRI-v1:L")
            .ok_or(ProofError::InvalidTriangleId)?;

        let mut parts = rest.splitn(4, ':');
        let level_str = parts.next().ok_or(ProofError::InvalidTriangleId)?;
        let face_str = parts
            .next()
            .and_then(|s| s.strip_prefix('F'))
            .ok_or(ProofError::InvalidTriangleId)?;
        let path_str = parts
            .next()
            .and_then(|s| s.strip_prefix('P'))
            .ok_or(ProofError::InvalidTriangleId)?;
        let crc_str = parts.next().ok_or(ProofError::InvalidTriangleId)?;
        if parts.next().is_some() {
            return Err(ProofError::InvalidTriangleId);
        }

        let level: u8 = level_str.parse().map_err(|_| ProofError::InvalidTriangleId)?;
        if level < 1 || level > MAX_LEVEL {
            return Err(ProofError::InvalidTriangleId);
        }
        let face: u8 = face_str.parse().map_err(|_| ProofError::InvalidTriangleId)?;
        if face >= BASE_FACE_COUNT {
            return Err(ProofError::InvalidTriangleId);
        }
        let path = base64url_decode_path(path_str, (level - 1) as usize)?;
        if path.len() != (level - 1) as usize {
            return Err(ProofError::InvalidTriangleId);
        }

        let candidate = TriangleId { face, level, path };
        let expected_crc = u16::from_str_radix(crc_str, 16).map_err(|_| ProofError::InvalidTriangleId)?;
        if expected_crc != candidate.checksum() {
            return Err(ProofError::InvalidTriangleId);
        }
        Ok(candidate)
    }

    /// The parent id, or `None` at level 1.
    pub fn parent(&self) -> Option<TriangleId> {
        if self.path.is_empty() {
            return None;
        }
        let mut path = self.path.clone();
        path.pop();
        Some(TriangleId {
            face: self.face,
            level: self.level - 1,
            path,
        })
    }

    /// The four children, in slot order 0..3.
    pub fn children(&self) -> Result<[TriangleId; 4], ProofError> {
        if self.level >= MAX_LEVEL {
            return Err(ProofError::InvalidTriangleId);
        }
        Ok(std::array::from_fn(|i| {
            let mut path = self.path.clone();
            path.push(i as u8);
            TriangleId {
                face: self.face,
                level: self.level + 1,
                path,
            }
        }))
    }

    /// The three unit-sphere vertices of this triangle, ordered outward
    /// per the base-face winding, and their centroid.
    pub fn vertices(&self) -> (Vec3, Vec3, Vec3) {
        let base = &BASE_FACES[self.face as usize];
        let mut tri = (base.a, base.b, base.c);
        for &digit in &self.path {
            tri = subdivide_child(tri, digit);
        }
        tri
    }

    pub fn centroid(&self) -> Vec3 {
        let (a, b, c) = self.vertices();
        a.add(&b).add(&c).normalized()
    }

    pub fn polygon_latlon(&self) -> [LatLon; 3] {
        let (a, b, c) = self.vertices();
        [
            crate::geometry::latlon_from_vec(&a),
            crate::geometry::latlon_from_vec(&b),
            crate::geometry::latlon_from_vec(&c),
        ]
    }
}

fn subdivide_child(tri: (Vec3, Vec3, Vec3), digit: u8) -> (Vec3, Vec3, Vec3) {
    let (v0, v1, v2) = tri;
    let m01 = geodesic_midpoint(&v0, &v1);
    let m12 = geodesic_midpoint(&v1, &v2);
    let m20 = geodesic_midpoint(&v2, &v0);
    match digit {
        0 => (v0, m01, m20),
        1 => (v1, m12, m01),
        2 => (v2, m20, m12),
        3 => (m01, m12, m20),
        _ => unreachable!("digit out of range, validated at decode time"),
    }
}

fn path_to_bigdecimal_string(path: &[u8]) -> String {
    use num_bigint::BigUint;
    use num_traits::Zero;
    let mut acc = BigUint::zero();
    for &digit in path {
        acc = acc * 4u8 + digit;
    }
    acc.to_string()
}

fn base64url_encode_path(path: &[u8]) -> String {
    let mut bits: Vec<bool> = Vec::with_capacity(path.len() * 2);
    for &digit in path {
        bits.push(digit & 0b10 != 0);
        bits.push(digit & 0b01 != 0);
    }
    while bits.len() % 8 != 0 {
        bits.push(false);
    }
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 1 << (7 - i);
            }
        }
        bytes.push(byte);
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn base64url_decode_path(encoded: &str, expected_digits: usize) -> Result<Vec<u8>, ProofError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| ProofError::InvalidTriangleId)?;
    let mut bits: Vec<bool> = Vec::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for i in 0..8 {
            bits.push(byte & (1 << (7 - i)) != 0);
        }
    }
    let mut path = Vec::with_capacity(expected_digits);
    for chunk in bits.chunks(2).take(expected_digits) {
        if chunk.len() < 2 {
            return Err(ProofError::InvalidTriangleId);
        }
        let digit = (chunk[0] as u8) << 1 | (chunk[1] as u8);
        path.push(digit);
    }
    Ok(path)
}

/// A base (level-1) face of the icosahedron, in outward-oriented winding.
struct BaseFace {
    a: Vec3,
    b: Vec3,
    c: Vec3,
}

/// 12 canonical icosahedron vertices: north pole, an upper ring of 5 at
/// latitude `atan(1/2)`, a lower ring of 5 offset 36 degrees in longitude,
/// and the south pole.
fn icosahedron_vertices() -> [Vec3; 12] {
    let ring_lat = (0.5_f64).atan().to_degrees();
    let mut v = [Vec3::new(0.0, 0.0, 0.0); 12];
    v[0] = vec_from_latlon(&LatLon::new(90.0, 0.0)).unwrap();
    for i in 0..5 {
        v[1 + i] = vec_from_latlon(&LatLon::new(ring_lat, (i as f64) * 72.0)).unwrap();
    }
    for i in 0..5 {
        v[6 + i] = vec_from_latlon(&LatLon::new(-ring_lat, 36.0 + (i as f64) * 72.0)).unwrap();
    }
    v[11] = vec_from_latlon(&LatLon::new(-90.0, 0.0)).unwrap();
    v
}

/// Builds the 20 base faces with an outward-pointing winding, i.e.
/// `(a × b) · c > 0`. Index triples follow the standard gyroelongated
/// bipyramid layout; orientation is enforced programmatically rather than
/// relied on by hand.
fn build_base_faces() -> [BaseFace; 20] {
    let v = icosahedron_vertices();
    let u = |i: i64| 1 + i.rem_euclid(5) as usize;
    let l = |i: i64| 6 + i.rem_euclid(5) as usize;

    let mut raw: Vec<(usize, usize, usize)> = Vec::with_capacity(20);
    // Top cap.
    for i in 0..5i64 {
        raw.push((0, u(i), u(i + 1)));
    }
    // Upper band, apex on the upper ring.
    for i in 0..5i64 {
        raw.push((u(i), l(i - 1), l(i)));
    }
    // Lower band, apex on the lower ring.
    for i in 0..5i64 {
        raw.push((l(i), u(i + 1), u(i)));
    }
    // Bottom cap.
    for i in 0..5i64 {
        raw.push((11, l(i + 1), l(i)));
    }

    let faces: Vec<BaseFace> = raw
        .into_iter()
        .map(|(ia, ib, ic)| {
            let (a, b, c) = (v[ia], v[ib], v[ic]);
            if a.cross(&b).dot(&c) >= 0.0 {
                BaseFace { a, b, c }
            } else {
                BaseFace { a, b: c, c: b }
            }
        })
        .collect();

    faces.try_into().unwrap_or_else(|_| panic!("expected 20 base faces"))
}

static BASE_FACES: Lazy<[BaseFace; 20]> = Lazy::new(build_base_faces);
