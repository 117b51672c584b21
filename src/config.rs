//! Configuration for the mesh and proof-validation core.
//!
//! Thresholds are plain data, loaded once from `config.toml` and passed
//! explicitly into `Pipeline::new` — there is no process-wide mutable
//! singleton.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration, struct-of-structs like the thresholds they group.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub heuristics: HeuristicsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heuristics: HeuristicsConfig::default(),
            ledger: LedgerConfig::default(),
            mesh: MeshConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Gate thresholds for C7. All are tunable without a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct HeuristicsConfig {
    #[serde(default = "default_gps_max_accuracy_m")]
    pub gps_max_accuracy_m: f64,
    #[serde(default = "default_speed_limit_mps")]
    pub proof_speed_limit_mps: f64,
    #[serde(default = "default_moratorium_ms")]
    pub proof_moratorium_ms: i64,
    #[serde(default = "default_clock_drift_tolerance_ms")]
    pub clock_drift_tolerance_ms: i64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            gps_max_accuracy_m: default_gps_max_accuracy_m(),
            proof_speed_limit_mps: default_speed_limit_mps(),
            proof_moratorium_ms: default_moratorium_ms(),
            clock_drift_tolerance_ms: default_clock_drift_tolerance_ms(),
        }
    }
}

fn default_gps_max_accuracy_m() -> f64 {
    50.0
}

fn default_speed_limit_mps() -> f64 {
    15.0
}

fn default_moratorium_ms() -> i64 {
    10_000
}

fn default_clock_drift_tolerance_ms() -> i64 {
    120_000
}

/// Reward and subdivision parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_subdivision_threshold")]
    pub subdivision_threshold: u32,
    #[serde(default = "default_base_reward_atomic")]
    pub base_reward_atomic: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            subdivision_threshold: default_subdivision_threshold(),
            base_reward_atomic: default_base_reward_atomic(),
        }
    }
}

fn default_subdivision_threshold() -> u32 {
    2
}

/// 1 STEP at 18 decimals.
fn default_base_reward_atomic() -> String {
    "1000000000000000000".to_string()
}

/// Query limits.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "default_max_bbox_results")]
    pub max_bbox_results: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_bbox_results: default_max_bbox_results(),
        }
    }
}

fn default_max_bbox_results() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "step.sqlite3".to_string()
}

/// Load configuration from a TOML file, falling back to defaults for any
/// section or field the file omits.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.heuristics.gps_max_accuracy_m, 50.0);
        assert_eq!(cfg.heuristics.proof_speed_limit_mps, 15.0);
        assert_eq!(cfg.heuristics.proof_moratorium_ms, 10_000);
        assert_eq!(cfg.heuristics.clock_drift_tolerance_ms, 120_000);
        assert_eq!(cfg.ledger.subdivision_threshold, 2);
        assert_eq!(cfg.ledger.base_reward_atomic, "1000000000000000000");
        assert_eq!(cfg.mesh.max_bbox_results, 256);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml_str = r#"
            [heuristics]
            gps_max_accuracy_m = 25.0
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.heuristics.gps_max_accuracy_m, 25.0);
        assert_eq!(cfg.heuristics.proof_speed_limit_mps, 15.0);
        assert_eq!(cfg.ledger.subdivision_threshold, 2);
    }
}
