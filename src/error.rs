//! Error taxonomy for the STEP mesh and proof-validation core.

use thiserror::Error;

/// Stable, caller-facing failure codes for a submitted proof.
///
/// Each variant's `Display` is the terse human-readable reason returned in
/// the proof response's `error` field; additional diagnostic strings (e.g.
/// "speed 23.4 m/s > 15 m/s") travel alongside in the response's
/// `reasons[]`, not inside the error itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("invalid coordinate")]
    InvalidCoordinate,
    #[error("invalid triangle id")]
    InvalidTriangleId,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("time went backwards")]
    TimeWentBackwards,
    #[error("bad signature")]
    BadSignature,
    #[error("replayed nonce")]
    ReplayedNonce,
    #[error("gps accuracy too low")]
    LowGpsAccuracy,
    #[error("too fast")]
    TooFast,
    #[error("moratorium not elapsed")]
    Moratorium,
    #[error("point outside triangle")]
    OutOfTriangle,
    #[error("triangle already subdivided")]
    TriangleSubdivided,
    #[error("triangle exhausted")]
    TriangleExhausted,
    #[error("point not on mesh")]
    PointNotOnMesh,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ProofError {
    /// The stable string code used in wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            ProofError::InvalidCoordinate => "InvalidCoordinate",
            ProofError::InvalidTriangleId => "InvalidTriangleId",
            ProofError::InvalidTimestamp => "InvalidTimestamp",
            ProofError::TimeWentBackwards => "TimeWentBackwards",
            ProofError::BadSignature => "BadSignature",
            ProofError::ReplayedNonce => "ReplayedNonce",
            ProofError::LowGpsAccuracy => "LowGpsAccuracy",
            ProofError::TooFast => "TooFast",
            ProofError::Moratorium => "Moratorium",
            ProofError::OutOfTriangle => "OutOfTriangle",
            ProofError::TriangleSubdivided => "TriangleSubdivided",
            ProofError::TriangleExhausted => "TriangleExhausted",
            ProofError::PointNotOnMesh => "PointNotOnMesh",
            ProofError::InsufficientBalance => "InsufficientBalance",
            ProofError::InternalError(_) => "InternalError",
        }
    }
}

/// Storage-layer failures. These never reach the caller directly — the
/// pipeline folds anything it can't handle itself into
/// `ProofError::InternalError`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("duplicate nonce for account")]
    DuplicateNonce,
    #[error("triangle not found: {0}")]
    TriangleNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed balance: {0}")]
    InvalidBalance(String),
}

impl From<StoreError> for ProofError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateNonce => ProofError::ReplayedNonce,
            other => ProofError::InternalError(other.to_string()),
        }
    }
}
