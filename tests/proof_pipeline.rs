//! End-to-end scenarios for a proof submission against the sqlite-backed
//! store, event log, and ledger together, as opposed to pipeline.rs's own
//! unit tests which exercise the in-memory implementations.

use rusqlite::Connection;
use secp256k1::rand::thread_rng;
use secp256k1::{Message, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use stepcore::config::Config;
use stepcore::events::SqliteEventLog;
use stepcore::ledger::{reward_for_level, SqliteLedger};
use stepcore::lookup::point_to_triangle;
use stepcore::pipeline::Pipeline;
use stepcore::scoring::MockAttestationVerifier;
use stepcore::store::{SqliteTriangleStore, TriangleStore};

fn eip191_frame(message: &[u8]) -> Vec<u8> {
    let mut framed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    framed.extend_from_slice(message);
    framed
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn address_from_secret(secret: &SecretKey) -> String {
    let secp = Secp256k1::new();
    let pubkey = secp256k1::PublicKey::from_secret_key(&secp, secret);
    let uncompressed = pubkey.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

fn sign(secret: &SecretKey, message: &[u8]) -> String {
    let secp = Secp256k1::new();
    let framed = eip191_frame(message);
    let digest = keccak256(&framed);
    let msg = Message::from_digest_slice(&digest).unwrap();
    let (recid, sig) = secp.sign_ecdsa_recoverable(&msg, secret).serialize_compact();
    let mut bytes = sig.to_vec();
    bytes.push(recid.to_i32() as u8 + 27);
    format!("0x{}", hex::encode(bytes))
}

fn v1_payload(account: &str, triangle_id: &str, lat: f64, lon: f64, ts: &str, nonce: &str, sig: &str) -> String {
    format!(
        r#"{{"version":"STEP-PROOF-v1","account":"{account}","triangleId":"{triangle_id}","lat":{lat},"lon":{lon},"accuracy":15.0,"timestamp":"{ts}","nonce":"{nonce}","signature":"{sig}"}}"#
    )
}

fn v1_signable(lat: f64, lon: f64, triangle_id: &str, ts: &str) -> String {
    format!("{lat}|{lon}|{triangle_id}|{ts}")
}

struct Harness {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn TriangleStore>,
    _dir: tempfile::TempDir,
}

fn build_pipeline() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("step.sqlite3");

    let store: Arc<dyn TriangleStore> =
        Arc::new(SqliteTriangleStore::open(Connection::open(&db_path).unwrap()).unwrap());
    let events = Box::new(SqliteEventLog::open(Connection::open(&db_path).unwrap()).unwrap());
    let ledger = Box::new(SqliteLedger::open(Connection::open(&db_path).unwrap()).unwrap());
    let attestation = Box::new(MockAttestationVerifier);

    let pipeline = Arc::new(Pipeline::new(Config::default(), store.clone(), events, ledger, attestation));
    Harness {
        pipeline,
        store,
        _dir: dir,
    }
}

/// S1: a well-formed, correctly signed v1 proof at an untouched triangle is
/// accepted and credits the full level-10 reward.
#[test]
fn happy_path_v1_accepts_and_credits_reward() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let triangle = point_to_triangle(47.4979, 19.0402, 10).unwrap();
    let triangle_id = triangle.encode();
    let ts = "2025-10-06T12:00:00.000Z";

    let signable = v1_signable(47.4979, 19.0402, &triangle_id, ts);
    let sig = sign(&secret, signable.as_bytes());
    let payload = v1_payload(&account, &triangle_id, 47.4979, 19.0402, ts, "s1-nonce", &sig);

    let response = harness.pipeline.submit(&payload, 1_759_752_000_000);
    assert!(response.ok, "{:?}", response.error);
    assert_eq!(
        response.reward.unwrap(),
        reward_for_level("1000000000000000000", 10).unwrap().to_string()
    );
}

/// S2: replaying the exact same proof a second time is rejected, even
/// though the signature, geometry, and heuristics all still check out.
#[test]
fn replayed_nonce_is_rejected_on_sqlite_backed_pipeline() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let triangle = point_to_triangle(10.0, 10.0, 8).unwrap();
    let triangle_id = triangle.encode();
    let ts = "2025-10-06T12:00:00.000Z";

    let signable = v1_signable(10.0, 10.0, &triangle_id, ts);
    let sig = sign(&secret, signable.as_bytes());
    let payload = v1_payload(&account, &triangle_id, 10.0, 10.0, ts, "s2-nonce", &sig);

    let first = harness.pipeline.submit(&payload, 1_759_752_000_000);
    assert!(first.ok);

    let second = harness.pipeline.submit(&payload, 1_759_752_100_000);
    assert!(!second.ok);
    assert_eq!(second.error.as_deref(), Some("ReplayedNonce"));
}

/// S3: a second click from the same account, arriving fast enough to imply
/// an impossible travel speed from the prior click's location, is rejected.
#[test]
fn implausible_speed_between_two_clicks_is_rejected() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);

    let first_triangle = point_to_triangle(0.0, 0.0, 12).unwrap().encode();
    let ts1 = "2025-10-06T12:00:00.000Z";
    let sig1 = sign(&secret, v1_signable(0.0, 0.0, &first_triangle, ts1).as_bytes());
    let payload1 = v1_payload(&account, &first_triangle, 0.0, 0.0, ts1, "s3-nonce-1", &sig1);
    let first = harness.pipeline.submit(&payload1, 1_759_752_000_000);
    assert!(first.ok, "{:?}", first.error);

    // 11 seconds later, 20 degrees of longitude away: thousands of km/s.
    let second_triangle = point_to_triangle(0.0, 20.0, 12).unwrap().encode();
    let ts2 = "2025-10-06T12:00:11.000Z";
    let sig2 = sign(&secret, v1_signable(0.0, 20.0, &second_triangle, ts2).as_bytes());
    let payload2 = v1_payload(&account, &second_triangle, 0.0, 20.0, ts2, "s3-nonce-2", &sig2);
    let second = harness.pipeline.submit(&payload2, 1_759_752_011_000);
    assert!(!second.ok);
    assert_eq!(second.error.as_deref(), Some("TooFast"));
}

/// S4: enough distinct accounts click the same triangle to cross the
/// subdivision threshold; the triangle transitions out of the mineable set
/// and a later click against it is rejected as already subdivided.
#[test]
fn subdivision_threshold_closes_the_triangle_to_further_clicks() {
    let harness = build_pipeline();
    let triangle = point_to_triangle(30.0, 30.0, 9).unwrap();
    let triangle_id = triangle.encode();
    let ts = "2025-10-06T12:00:00.000Z";
    let lat = 30.0;
    let lon = 30.0;

    for (i, nonce) in ["s4-a", "s4-b"].iter().enumerate() {
        let secret = SecretKey::new(&mut thread_rng());
        let account = address_from_secret(&secret);
        let sig = sign(&secret, v1_signable(lat, lon, &triangle_id, ts).as_bytes());
        let payload = v1_payload(&account, &triangle_id, lat, lon, ts, nonce, &sig);
        let response = harness.pipeline.submit(&payload, 1_759_752_000_000 + i as i64);
        assert!(response.ok, "click {nonce} failed: {:?}", response.error);
    }

    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let sig = sign(&secret, v1_signable(lat, lon, &triangle_id, ts).as_bytes());
    let payload = v1_payload(&account, &triangle_id, lat, lon, ts, "s4-c", &sig);
    let response = harness.pipeline.submit(&payload, 1_759_752_002_000);
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("TriangleSubdivided"));
}

/// S5: a signature that checks out but whose claimed coordinates fall
/// outside the named triangle is rejected before any state mutates.
#[test]
fn coordinates_outside_the_named_triangle_are_rejected() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let triangle_id = point_to_triangle(47.4979, 19.0402, 10).unwrap().encode();
    let ts = "2025-10-06T12:00:00.000Z";

    // Tokyo coordinates signed for a Budapest-area triangle id.
    let signable = v1_signable(35.6762, 139.6503, &triangle_id, ts);
    let sig = sign(&secret, signable.as_bytes());
    let payload = v1_payload(&account, &triangle_id, 35.6762, 139.6503, ts, "s5-nonce", &sig);

    let response = harness.pipeline.submit(&payload, 1_759_752_000_000);
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("OutOfTriangle"));
}

/// S6: a tampered signature is rejected without consuming the nonce or
/// crediting anything, and the same nonce can be resubmitted once signed
/// correctly.
#[test]
fn tampered_signature_is_rejected_and_does_not_burn_the_nonce() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let triangle_id = point_to_triangle(-10.0, 100.0, 9).unwrap().encode();
    let ts = "2025-10-06T12:00:00.000Z";
    let signable = v1_signable(-10.0, 100.0, &triangle_id, ts);

    let good_sig = sign(&secret, signable.as_bytes());
    let mut bad_sig = good_sig.clone();
    bad_sig.pop();
    bad_sig.push(if good_sig.ends_with('0') { '1' } else { '0' });

    let bad_payload = v1_payload(&account, &triangle_id, -10.0, 100.0, ts, "s6-nonce", &bad_sig);
    let rejected = harness.pipeline.submit(&bad_payload, 1_759_752_000_000);
    assert!(!rejected.ok);
    assert_eq!(rejected.error.as_deref(), Some("BadSignature"));

    let good_payload = v1_payload(&account, &triangle_id, -10.0, 100.0, ts, "s6-nonce", &good_sig);
    let accepted = harness.pipeline.submit(&good_payload, 1_759_752_001_000);
    assert!(accepted.ok, "{:?}", accepted.error);
}

/// Two threads submit the identical payload against the sqlite-backed
/// pipeline at once. Only one may be accepted, and the triangle's click
/// count must reflect exactly that one acceptance, not two.
#[test]
fn racing_duplicate_submissions_against_sqlite_never_double_commit() {
    let harness = build_pipeline();
    let secret = SecretKey::new(&mut thread_rng());
    let account = address_from_secret(&secret);
    let triangle_id = point_to_triangle(5.0, 5.0, 9).unwrap().encode();
    let ts = "2025-10-06T12:00:00.000Z";
    let sig = sign(&secret, v1_signable(5.0, 5.0, &triangle_id, ts).as_bytes());
    let payload = v1_payload(&account, &triangle_id, 5.0, 5.0, ts, "race-nonce", &sig);

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = harness.pipeline.clone();
            let payload = payload.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                pipeline.submit(&payload, 1_759_752_000_000)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let accepted = results.iter().filter(|r| r.ok).count();
    assert_eq!(accepted, 1, "{results:?}");

    let triangle = harness.store.get(&triangle_id).unwrap().unwrap();
    assert_eq!(triangle.clicks, 1);
}
