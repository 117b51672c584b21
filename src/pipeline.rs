//! Proof pipeline (C10): orchestrates signature recovery, replay defense,
//! triangle loading, geometry containment, heuristic gates, confidence
//! scoring, and the atomic ledger/event/triangle update on acceptance.

use crate::config::Config;
use crate::crypto::verify_signature;
use crate::error::ProofError;
use crate::events::{Event, EventLog};
use crate::geometry::{point_in_spherical_triangle, vec_from_latlon, LatLon};
use crate::heuristics::{check_gps_accuracy, check_speed, check_timestamp};
use crate::ledger::{reward_for_level, Ledger};
use crate::mesh::TriangleId;
use crate::payload::ProofPayload;
use crate::scoring::{score, AttestationVerifier, ConfidenceLevel, ScoreBreakdown, ScoringInputs};
use crate::store::TriangleStore;
use crate::triangle::ClickOutcome;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const MAX_CONCURRENCY_RETRIES: u32 = 3;

pub struct Pipeline {
    config: Config,
    store: Arc<dyn TriangleStore>,
    events: Box<dyn EventLog>,
    ledger: Box<dyn Ledger>,
    attestation: Box<dyn AttestationVerifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<String>>,
    pub processed_at: String,
}

impl SubmitResponse {
    fn failure(err: ProofError, reasons: Vec<String>) -> Self {
        Self {
            ok: false,
            confidence: None,
            confidence_level: None,
            scores: None,
            reward: None,
            balance: None,
            error: Some(err.code().to_string()),
            reasons: if reasons.is_empty() { None } else { Some(reasons) },
            processed_at: now_iso8601(),
        }
    }

    fn failure_with_confidence(err: ProofError, reasons: Vec<String>, breakdown: ScoreBreakdown) -> Self {
        let mut r = Self::failure(err, reasons);
        r.confidence = Some(breakdown.total);
        r.confidence_level = Some(ConfidenceLevel::from_score(breakdown.total).label().to_string());
        r.scores = Some(breakdown);
        r
    }

    fn success(breakdown: ScoreBreakdown, reward: String, balance: String) -> Self {
        Self {
            ok: true,
            confidence: Some(breakdown.total),
            confidence_level: Some(ConfidenceLevel::from_score(breakdown.total).label().to_string()),
            scores: Some(breakdown),
            reward: Some(reward),
            balance: Some(balance),
            error: None,
            reasons: None,
            processed_at: now_iso8601(),
        }
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_timestamp_ms(ts: &str) -> Result<i64, ProofError> {
    let dt: DateTime<Utc> = ts.parse().map_err(|_| ProofError::InvalidTimestamp)?;
    Ok(dt.timestamp_millis())
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: Arc<dyn TriangleStore>,
        events: Box<dyn EventLog>,
        ledger: Box<dyn Ledger>,
        attestation: Box<dyn AttestationVerifier>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            ledger,
            attestation,
        }
    }

    /// Runs the full proof-validation pipeline against `raw_payload_json`,
    /// at wall-clock `now_ms`.
    pub fn submit(&self, raw_payload_json: &str, now_ms: i64) -> SubmitResponse {
        match self.try_submit(raw_payload_json, now_ms) {
            Ok(response) => response,
            Err(err) => SubmitResponse::failure(err, Vec::new()),
        }
    }

    fn try_submit(&self, raw_payload_json: &str, now_ms: i64) -> Result<SubmitResponse, ProofError> {
        // 1. Parse & shape validation.
        let payload = ProofPayload::parse(raw_payload_json)?;

        // 2. Signature recovery.
        let signable = payload.signable_message()?;
        let signature_field = extract_signature(raw_payload_json)?;
        if let Err(e) = verify_signature(&signable, &signature_field, payload.account()) {
            return Ok(SubmitResponse::failure(e, Vec::new()));
        }

        // 3. Nonce pre-check (optimization; storage uniqueness is authoritative).
        if self
            .events
            .nonce_exists(payload.account(), payload.nonce())
            .map_err(ProofError::from)?
        {
            return Ok(SubmitResponse::failure(ProofError::ReplayedNonce, Vec::new()));
        }

        // 4. Timestamp sanity against the account's last accepted click.
        let last_click = self
            .events
            .last_click_by_account(payload.account())
            .map_err(ProofError::from)?;
        let last_click_at_ms = last_click.as_ref().and_then(|e| match e {
            Event::Click { timestamp, .. } => Some(*timestamp),
            _ => None,
        });
        let payload_ts_ms = parse_timestamp_ms(payload.timestamp())?;
        let ms_since_last_click =
            match check_timestamp(payload_ts_ms, last_click_at_ms, &self.config.heuristics) {
                Ok(elapsed) => elapsed,
                Err(e) => return Ok(SubmitResponse::failure(e, Vec::new())),
            };

        // 5. Load triangle.
        let triangle_id = TriangleId::decode(payload.triangle_id())?;
        let triangle = self
            .store
            .get_or_create(&triangle_id, now_ms)
            .map_err(ProofError::from)?;
        match triangle.state {
            crate::triangle::TriangleState::Subdivided => {
                return Ok(SubmitResponse::failure(ProofError::TriangleSubdivided, Vec::new()))
            }
            crate::triangle::TriangleState::Exhausted => {
                return Ok(SubmitResponse::failure(ProofError::TriangleExhausted, Vec::new()))
            }
            _ => {}
        }

        // 6. Geometry containment.
        let p = vec_from_latlon(&LatLon::new(payload.lat(), payload.lon()))?;
        let (a, b, c) = triangle_id.vertices();
        if !point_in_spherical_triangle(&p, &a, &b, &c) {
            return Ok(SubmitResponse::failure(ProofError::OutOfTriangle, Vec::new()));
        }

        // 7. Heuristics: accuracy, speed, moratorium (moratorium already
        // checked in step 4 against the same last-click timestamp).
        if let Err(e) = check_gps_accuracy(payload.accuracy(), &self.config.heuristics) {
            return Ok(SubmitResponse::failure(e, Vec::new()));
        }
        let last_position = last_click.as_ref().and_then(|e| match e {
            Event::Click { lat, lon, timestamp, .. } => Some((LatLon::new(*lat, *lon), *timestamp)),
            _ => None,
        });
        let speed_mps = match check_speed(
            last_position,
            LatLon::new(payload.lat(), payload.lon()),
            payload_ts_ms,
            &self.config.heuristics,
        ) {
            Ok(speed) => speed,
            Err(e) => return Ok(SubmitResponse::failure(e, Vec::new())),
        };

        // 8. Confidence scoring.
        let (attestation_token, gnss, cell) = extract_scoring_fields(&payload);
        let scoring_inputs = ScoringInputs {
            gps_accuracy_m: payload.accuracy(),
            speed_mps,
            ms_since_last_click,
            attestation_token: &attestation_token,
            attestation_nonce: payload.nonce(),
            attestation_platform: "unknown",
            gnss: gnss.as_ref(),
            cell: cell.as_ref(),
        };
        let breakdown = score(&scoring_inputs, &self.config.heuristics, self.attestation.as_ref());

        // 9-14. Transactional scope: claim the nonce, increment clicks,
        // transition state, compute + credit reward, append event.
        let outcome = self.commit_click(&payload, &signature_field, &triangle_id, now_ms, speed_mps);
        Ok(match outcome {
            Ok((reward, balance)) => SubmitResponse::success(breakdown, reward, balance),
            Err(e) => SubmitResponse::failure_with_confidence(e, Vec::new(), breakdown),
        })
    }

    fn commit_click(
        &self,
        payload: &ProofPayload,
        signature: &str,
        triangle_id: &TriangleId,
        now_ms: i64,
        speed_mps: Option<f64>,
    ) -> Result<(String, String), ProofError> {
        // 10. Authoritative nonce claim, ahead of any triangle or ledger
        // mutation: a losing concurrent submission for the same
        // (account, nonce) bails out here, before touching either. Claimed
        // once per submission; retries below reuse this claim rather than
        // re-reserving it, so a transient storage failure on our own
        // attempt doesn't get misread as a replay.
        self.events
            .reserve_nonce(payload.account(), payload.nonce())
            .map_err(ProofError::from)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.commit_click_once(payload, signature, triangle_id, now_ms, speed_mps) {
                Ok(result) => return Ok(result),
                Err(e) if attempt < MAX_CONCURRENCY_RETRIES => {
                    warn!("proof commit attempt {attempt} failed, retrying: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit_click_once(
        &self,
        payload: &ProofPayload,
        signature: &str,
        triangle_id: &TriangleId,
        now_ms: i64,
        speed_mps: Option<f64>,
    ) -> Result<(String, String), ProofError> {
        let encoded_id = triangle_id.encode();
        let threshold = self.config.ledger.subdivision_threshold;

        let mut outcome = ClickOutcome::Continue;
        let mut click_number = 0u32;
        let updated = self
            .store
            .update(&encoded_id, |t| {
                outcome = t.register_click(now_ms, threshold);
                click_number = t.clicks;
            })
            .map_err(ProofError::from)?;

        let mut children = None;
        if outcome == ClickOutcome::Subdivide {
            let kids = triangle_id.children()?;
            for kid in &kids {
                self.store.get_or_create(kid, now_ms).map_err(ProofError::from)?;
            }
            self.store
                .update(&encoded_id, |t| t.attach_children(&kids, now_ms))
                .map_err(ProofError::from)?;
            children = Some(kids);
        }

        // 12. Compute reward and credit the account.
        let reward = reward_for_level(&self.config.ledger.base_reward_atomic, updated.level)
            .map_err(ProofError::from)?;
        let account = self
            .ledger
            .credit(payload.account(), &reward, now_ms)
            .map_err(ProofError::from)?;

        // 13. Append the click event for the audit trail. The nonce was
        // already claimed in `commit_click`, so this only fails on a
        // genuine storage error, not a replay.
        self.events
            .append(Event::Click {
                id: Uuid::new_v4(),
                triangle_id: encoded_id.clone(),
                timestamp: now_ms,
                account: payload.account().to_string(),
                nonce: payload.nonce().to_string(),
                signature: signature.to_string(),
                lat: payload.lat(),
                lon: payload.lon(),
                accuracy: payload.accuracy(),
                speed: speed_mps,
                click_number,
                reward: reward.to_string(),
            })
            .map_err(ProofError::from)?;

        // 15. Subsidiary events for the same logical transaction.
        if let Some(kids) = children {
            let _ = self.events.append(Event::Subdivide {
                id: Uuid::new_v4(),
                triangle_id: encoded_id.clone(),
                timestamp: now_ms,
                children_ids: kids.iter().map(|k| k.encode()).collect(),
            });
            let _ = self.events.append(Event::StateChange {
                id: Uuid::new_v4(),
                triangle_id: encoded_id,
                timestamp: now_ms,
                from_state: "partially_mined".to_string(),
                to_state: "subdivided".to_string(),
            });
        }

        Ok((reward.to_string(), account.balance))
    }
}

fn extract_signature(raw_payload_json: &str) -> Result<String, ProofError> {
    let value: serde_json::Value =
        serde_json::from_str(raw_payload_json).map_err(|_| ProofError::InvalidTriangleId)?;
    value
        .get("signature")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(ProofError::BadSignature)
}

fn extract_scoring_fields(
    payload: &ProofPayload,
) -> (String, Option<crate::payload::Gnss>, Option<crate::payload::Cell>) {
    match payload {
        ProofPayload::V1(_) => (String::new(), None, None),
        ProofPayload::V2(p) => (p.attestation.clone(), p.gnss.clone(), p.cell.clone()),
    }
}
