//! Proof payload types: the v1 legacy format and the v2 canonical-JSON
//! format a client submits as a claim of presence.

use crate::canonical_json::to_canonical_json_bytes;
use crate::error::ProofError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Satellite {
    pub svid: i64,
    pub cn0: f64,
    pub az: f64,
    pub el: f64,
    pub constellation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gnss {
    #[serde(default)]
    pub satellites: Vec<Satellite>,
    pub raw_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellNeighbor {
    pub cell_id: i64,
    pub rsrp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub mcc: i64,
    pub mnc: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tac: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsrp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<Vec<CellNeighbor>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub model: String,
    pub os: String,
    pub app_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_location_enabled: Option<bool>,
}

/// `STEP-PROOF-v2`: the canonical, signed proof payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayloadV2 {
    pub version: String,
    pub account: String,
    pub triangle_id: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gnss: Option<Gnss>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<Cell>,
    pub device: Device,
    pub attestation: String,
    pub timestamp: String,
    pub nonce: String,
}

impl ProofPayloadV2 {
    pub const VERSION_TAG: &'static str = "STEP-PROOF-v2";

    /// The exact bytes that get EIP-191 framed and signed: the canonical
    /// JSON encoding of this payload with sorted keys at every level.
    pub fn signable_message(&self) -> Result<Vec<u8>, ProofError> {
        to_canonical_json_bytes(self).map_err(|e| ProofError::InternalError(e.to_string()))
    }
}

/// `STEP-PROOF-v1`: legacy payload, pipe-delimited signable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayloadV1 {
    pub version: String,
    pub account: String,
    pub triangle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
    pub timestamp: String,
    pub nonce: String,
}

impl ProofPayloadV1 {
    pub const VERSION_TAG: &'static str = "STEP-PROOF-v1";

    /// `"{lat}|{lon}|{triangleId}|{timestamp}"`, exactly.
    pub fn signable_message(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.lat, self.lon, self.triangle_id, self.timestamp
        )
        .into_bytes()
    }
}

/// Either proof version, dispatched on the `version` tag at parse time.
#[derive(Debug, Clone)]
pub enum ProofPayload {
    V1(ProofPayloadV1),
    V2(ProofPayloadV2),
}

impl ProofPayload {
    pub fn parse(raw: &str) -> Result<Self, ProofError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| ProofError::InvalidTriangleId)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or(ProofError::InvalidTriangleId)?;
        match version {
            ProofPayloadV1::VERSION_TAG => {
                let payload: ProofPayloadV1 =
                    serde_json::from_value(value).map_err(|_| ProofError::InvalidTriangleId)?;
                Ok(ProofPayload::V1(payload))
            }
            ProofPayloadV2::VERSION_TAG => {
                let payload: ProofPayloadV2 =
                    serde_json::from_value(value).map_err(|_| ProofError::InvalidTriangleId)?;
                Ok(ProofPayload::V2(payload))
            }
            _ => Err(ProofError::InvalidTriangleId),
        }
    }

    pub fn account(&self) -> &str {
        match self {
            ProofPayload::V1(p) => &p.account,
            ProofPayload::V2(p) => &p.account,
        }
    }

    pub fn triangle_id(&self) -> &str {
        match self {
            ProofPayload::V1(p) => &p.triangle_id,
            ProofPayload::V2(p) => &p.triangle_id,
        }
    }

    pub fn nonce(&self) -> &str {
        match self {
            ProofPayload::V1(p) => &p.nonce,
            ProofPayload::V2(p) => &p.nonce,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            ProofPayload::V1(p) => &p.timestamp,
            ProofPayload::V2(p) => &p.timestamp,
        }
    }

    pub fn lat(&self) -> f64 {
        match self {
            ProofPayload::V1(p) => p.lat,
            ProofPayload::V2(p) => p.location.lat,
        }
    }

    pub fn lon(&self) -> f64 {
        match self {
            ProofPayload::V1(p) => p.lon,
            ProofPayload::V2(p) => p.location.lon,
        }
    }

    pub fn accuracy(&self) -> f64 {
        match self {
            ProofPayload::V1(p) => p.accuracy,
            ProofPayload::V2(p) => p.location.accuracy,
        }
    }

    pub fn signable_message(&self) -> Result<Vec<u8>, ProofError> {
        match self {
            ProofPayload::V1(p) => Ok(p.signable_message()),
            ProofPayload::V2(p) => p.signable_message(),
        }
    }
}
