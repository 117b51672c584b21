//! STEP - a geodesic mesh ledger where presence at a location is proven by
//! a signed location claim and rewarded in an on-chain-style token ledger.
//!
//! # Architecture
//!
//! ## Mesh addressing
//! - [`geometry`] - spherical vector math and containment tests
//! - [`mesh`] - canonical triangle ids, icosahedron base faces, subdivision
//! - [`lookup`] - `(lat, lon, level)` to triangle id resolution
//! - [`polygon`] - GeoJSON projection of a triangle id
//!
//! ## Triangle lifecycle & persistence
//! - [`triangle`] - the triangle record and click/subdivision state machine
//! - [`store`] - sparse triangle persistence (in-memory and `rusqlite`)
//! - [`events`] - append-only event log and the authoritative replay index
//!
//! ## Proof validation
//! - [`payload`] - v1/v2 proof payload types and their signable encodings
//! - [`canonical_json`] - deterministic, sorted-key JSON for v2 signing
//! - [`crypto`] - EIP-191 framing, secp256k1 recovery, Keccak-256 addresses
//! - [`heuristics`] - GPS accuracy, speed, and moratorium gates
//! - [`scoring`] - weighted confidence scorer
//! - [`pipeline`] - orchestrates the above into a single proof submission
//!
//! ## Ledger & configuration
//! - [`ledger`] - arbitrary-precision account balances and reward halving
//! - [`config`] - tunable thresholds, loaded from `config.toml`
//! - [`error`] - error taxonomy

#![forbid(unsafe_code)]

pub mod canonical_json;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod geometry;
pub mod heuristics;
pub mod ledger;
pub mod lookup;
pub mod mesh;
pub mod payload;
pub mod pipeline;
pub mod polygon;
pub mod scoring;
pub mod store;
pub mod triangle;
