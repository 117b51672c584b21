//! Confidence scorer (C9): weighted combination of independent signals
//! into a 0-100 score plus the per-signal breakdown.

use crate::config::HeuristicsConfig;
use crate::payload::{Cell, Gnss};
use serde::{Deserialize, Serialize};

/// An external attestation check (Play Integrity / App Attest / similar).
/// The actual verification logic lives outside this crate; it is plugged
/// in behind this trait.
pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, token: &str, nonce: &str, platform: &str) -> bool;
}

/// Accepts any token prefixed `MOCK_ATTESTATION_`. Exercises the weighting
/// in C9 without implementing real platform attestation checks.
pub struct MockAttestationVerifier;

impl AttestationVerifier for MockAttestationVerifier {
    fn verify(&self, token: &str, _nonce: &str, _platform: &str) -> bool {
        token.starts_with("MOCK_ATTESTATION_")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ScoreBreakdown {
    pub signature: u32,
    pub gps_accuracy: u32,
    pub speed_gate: u32,
    pub moratorium: u32,
    pub attestation: u32,
    pub gnss_raw: u32,
    pub cell_tower: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    NoConfidence,
    LowConfidence,
    MediumConfidence,
    HighConfidence,
    VeryHighConfidence,
}

impl ConfidenceLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=20 => ConfidenceLevel::NoConfidence,
            21..=49 => ConfidenceLevel::LowConfidence,
            50..=74 => ConfidenceLevel::MediumConfidence,
            75..=89 => ConfidenceLevel::HighConfidence,
            _ => ConfidenceLevel::VeryHighConfidence,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::NoConfidence => "No Confidence",
            ConfidenceLevel::LowConfidence => "Low Confidence",
            ConfidenceLevel::MediumConfidence => "Medium Confidence",
            ConfidenceLevel::HighConfidence => "High Confidence",
            ConfidenceLevel::VeryHighConfidence => "Very High Confidence",
        }
    }
}

/// Inputs the scorer needs beyond the hard-gate results already computed
/// by the pipeline.
pub struct ScoringInputs<'a> {
    pub gps_accuracy_m: f64,
    pub speed_mps: Option<f64>,
    pub ms_since_last_click: i64,
    pub attestation_token: &'a str,
    pub attestation_nonce: &'a str,
    pub attestation_platform: &'a str,
    pub gnss: Option<&'a Gnss>,
    pub cell: Option<&'a Cell>,
}

/// Scores a proof that has already passed every hard gate (signature valid,
/// accuracy/speed/moratorium all within limits).
pub fn score(
    inputs: &ScoringInputs,
    cfg: &HeuristicsConfig,
    attestation: &dyn AttestationVerifier,
) -> ScoreBreakdown {
    let signature = 20;
    let gps_accuracy = score_gps_accuracy(inputs.gps_accuracy_m, cfg);
    let speed_gate = score_speed_gate(inputs.speed_mps, cfg);
    let moratorium = score_moratorium(inputs.ms_since_last_click, cfg);
    let attestation_score = if attestation.verify(
        inputs.attestation_token,
        inputs.attestation_nonce,
        inputs.attestation_platform,
    ) {
        25
    } else {
        0
    };
    let gnss_raw = score_gnss(inputs.gnss);
    let cell_tower = score_cell(inputs.cell);

    let total = (signature
        + gps_accuracy
        + speed_gate
        + moratorium
        + attestation_score
        + gnss_raw
        + cell_tower)
        .min(100);

    ScoreBreakdown {
        signature,
        gps_accuracy,
        speed_gate,
        moratorium,
        attestation: attestation_score,
        gnss_raw,
        cell_tower,
        total,
    }
}

fn score_gps_accuracy(accuracy_m: f64, cfg: &HeuristicsConfig) -> u32 {
    if accuracy_m <= 10.0 {
        15
    } else if accuracy_m <= cfg.gps_max_accuracy_m {
        let span = cfg.gps_max_accuracy_m - 10.0;
        let frac = (cfg.gps_max_accuracy_m - accuracy_m) / span;
        (15.0 * frac).round().max(0.0) as u32
    } else {
        0
    }
}

fn score_speed_gate(speed_mps: Option<f64>, cfg: &HeuristicsConfig) -> u32 {
    match speed_mps {
        None => 10,
        Some(speed) if speed < cfg.proof_speed_limit_mps / 2.0 => 10,
        Some(speed) if speed < cfg.proof_speed_limit_mps => 5,
        _ => 0,
    }
}

fn score_moratorium(ms_since_last_click: i64, cfg: &HeuristicsConfig) -> u32 {
    if ms_since_last_click >= cfg.proof_moratorium_ms.saturating_mul(2) {
        5
    } else if ms_since_last_click >= cfg.proof_moratorium_ms {
        2
    } else {
        0
    }
}

fn score_gnss(gnss: Option<&Gnss>) -> u32 {
    let Some(gnss) = gnss else {
        return 0;
    };
    if gnss.satellites.len() < 4 {
        return 0;
    }
    let cn0: Vec<f64> = gnss.satellites.iter().map(|s| s.cn0).collect();
    let mean = cn0.iter().sum::<f64>() / cn0.len() as f64;
    let variance = cn0.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / cn0.len() as f64;
    if variance.sqrt() >= 3.0 {
        15
    } else {
        0
    }
}

fn score_cell(cell: Option<&Cell>) -> u32 {
    let Some(cell) = cell else {
        return 0;
    };
    if cell.cell_id.is_some() {
        10
    } else {
        5
    }
}
