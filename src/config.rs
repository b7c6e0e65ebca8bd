//! Configuration management for Heliotrack
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files, plus parsing of the MPPT algorithm
//! specification strings of the form `algo://p1:p2:...`.

use crate::error::{HeliotrackError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Hard safety limits
    pub limits: LimitsConfig,

    /// Tracker run defaults
    pub tracker: TrackerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Hard safety limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-channel current ceiling in amperes that is never exceeded,
    /// regardless of what a run requests
    pub absolute_current_limit: f64,
}

/// Tracker run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Total algorithm wall-clock budget in seconds
    pub duration_s: f64,

    /// Integration cycles per measurement; -1 leaves the SMU setting unchanged
    pub nplc: f64,

    /// Current compliance in amperes during the high-impedance V_oc probe
    pub voc_compliance: f64,

    /// Per-channel current compliance in amperes during tracking; clamped to
    /// `limits.absolute_current_limit`
    pub i_limit: f64,

    /// Algorithm specification string, e.g. `gd://`, `snaith://`, `basic://7:10`
    pub algorithm: String,

    /// Steady-state soak at V_mpp before the snaith-mode descent, seconds
    pub snaith_pre_soak_s: f64,

    /// Steady-state soak at the final voltage after the snaith-mode descent,
    /// seconds
    pub snaith_post_soak_s: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level override
    pub console_level: Option<String>,

    /// Optional file-specific level override
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            absolute_current_limit: 0.1,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            duration_s: 30.0,
            nplc: -1.0,
            voc_compliance: 0.04,
            i_limit: 0.1,
            algorithm: "gd://".to_string(),
            snaith_pre_soak_s: 15.0,
            snaith_post_soak_s: 3.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/heliotrack.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations, falling back to defaults
    pub fn load() -> Result<Self> {
        let default_paths = [
            "heliotrack_config.yaml",
            "/etc/heliotrack/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limits.absolute_current_limit <= 0.0 {
            return Err(HeliotrackError::validation(
                "limits.absolute_current_limit",
                "Must be positive",
            ));
        }

        if self.tracker.duration_s < 0.0 {
            return Err(HeliotrackError::validation(
                "tracker.duration_s",
                "Must not be negative",
            ));
        }

        if self.tracker.voc_compliance <= 0.0 {
            return Err(HeliotrackError::validation(
                "tracker.voc_compliance",
                "Must be positive",
            ));
        }

        if self.tracker.snaith_pre_soak_s < 0.0 || self.tracker.snaith_post_soak_s < 0.0 {
            return Err(HeliotrackError::validation(
                "tracker.snaith_pre_soak_s",
                "Soak times must not be negative",
            ));
        }

        // Parsing rejects malformed parameter lists and out-of-range values
        Algorithm::parse(&self.tracker.algorithm)?;

        Ok(())
    }
}

/// Parameters for the gradient-descent tracker (also used by snaith mode)
#[derive(Debug, Clone, PartialEq)]
pub struct GdParams {
    /// Learning rate
    pub alpha: f64,
    /// Minimum signed step magnitude in volts; 0 disables the floor
    pub min_step: f64,
    /// NPLC override for this run; -1 leaves the SMU setting unchanged
    pub nplc: f64,
    /// Source-to-measure settling delay in milliseconds
    pub delay_ms: f64,
    /// Maximum signed step magnitude in volts
    pub max_step: f64,
    /// Momentum coefficient in [0, 1)
    pub momentum: f64,
    /// First bootstrap step magnitude in volts
    pub delta_zero: f64,
}

impl Default for GdParams {
    fn default() -> Self {
        Self {
            alpha: 10.0,
            min_step: 0.002,
            nplc: -1.0,
            delay_ms: 0.0,
            max_step: 0.1,
            momentum: 0.1,
            delta_zero: 0.01,
        }
    }
}

impl GdParams {
    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(HeliotrackError::validation(
                "momentum",
                "Must be in [0, 1)",
            ));
        }
        if self.min_step < 0.0 {
            return Err(HeliotrackError::validation(
                "min_step",
                "Must not be negative",
            ));
        }
        if self.max_step <= 0.0 {
            return Err(HeliotrackError::validation("max_step", "Must be positive"));
        }
        if self.min_step > self.max_step {
            return Err(HeliotrackError::validation(
                "min_step",
                "Must not exceed max_step",
            ));
        }
        if self.delay_ms < 0.0 {
            return Err(HeliotrackError::validation(
                "delay_ms",
                "Must not be negative",
            ));
        }
        Ok(())
    }
}

/// Parameters for the perturb-and-observe tracker
#[derive(Debug, Clone, PartialEq)]
pub struct PoParams {
    /// Angular exploration bound in the I-V plane, degrees (plus and minus)
    pub d_angle_max_deg: f64,
    /// Constant-voltage dwell per cycle, seconds
    pub dwell_time_s: f64,
}

impl Default for PoParams {
    fn default() -> Self {
        Self {
            d_angle_max_deg: 7.0,
            dwell_time_s: 10.0,
        }
    }
}

impl PoParams {
    fn validate(&self) -> Result<()> {
        if !(0.0..=90.0).contains(&self.d_angle_max_deg) || self.d_angle_max_deg == 0.0 {
            return Err(HeliotrackError::validation(
                "d_angle_max_deg",
                "Must be in (0, 90]",
            ));
        }
        if self.dwell_time_s <= 0.0 {
            return Err(HeliotrackError::validation(
                "dwell_time_s",
                "Must be positive",
            ));
        }
        Ok(())
    }
}

/// A parsed MPPT algorithm specification
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    /// Gradient descent with momentum
    GradientDescent(GdParams),
    /// Gradient descent bracketed by steady-state soaks at V_mpp
    Snaith(GdParams),
    /// Angle-bounded perturb-and-observe
    PerturbObserve(PoParams),
    /// Unrecognized scheme; the runner warns and skips tracking
    Unknown(String),
}

impl Algorithm {
    /// Parse an algorithm specification string of the form `algo://p1:p2:...`
    ///
    /// An empty parameter list selects the documented defaults. A wrong
    /// parameter count, an unparsable float, or an out-of-range value is a
    /// validation error. An unknown scheme is carried through so the runner
    /// can warn and return bootstrap data only.
    pub fn parse(spec: &str) -> Result<Self> {
        let (algo, params) = spec.split_once("://").ok_or_else(|| {
            HeliotrackError::validation(
                "algorithm",
                "Expected an algorithm specification like gd://[params]",
            )
        })?;

        match algo {
            "gd" | "snaith" => {
                let gd = if params.is_empty() {
                    GdParams::default()
                } else {
                    let values = parse_floats(params)?;
                    if values.len() != 7 {
                        return Err(HeliotrackError::validation(
                            "algorithm",
                            "Usage: gd://[alpha]:[min_step]:[NPLC]:[delayms]:[max_step]:[momentum]:[delta_zero]",
                        ));
                    }
                    GdParams {
                        alpha: values[0],
                        min_step: values[1],
                        nplc: values[2],
                        delay_ms: values[3],
                        max_step: values[4],
                        momentum: values[5],
                        delta_zero: values[6],
                    }
                };
                gd.validate()?;
                if algo == "snaith" {
                    Ok(Algorithm::Snaith(gd))
                } else {
                    Ok(Algorithm::GradientDescent(gd))
                }
            }
            "basic" => {
                let po = if params.is_empty() {
                    PoParams::default()
                } else {
                    let values = parse_floats(params)?;
                    if values.len() != 2 {
                        return Err(HeliotrackError::validation(
                            "algorithm",
                            "Usage: basic://[degrees]:[dwell]",
                        ));
                    }
                    PoParams {
                        d_angle_max_deg: values[0],
                        dwell_time_s: values[1],
                    }
                };
                po.validate()?;
                Ok(Algorithm::PerturbObserve(po))
            }
            other => Ok(Algorithm::Unknown(other.to_string())),
        }
    }
}

fn parse_floats(params: &str) -> Result<Vec<f64>> {
    params
        .split(':')
        .map(|p| {
            p.parse::<f64>().map_err(|_| {
                HeliotrackError::validation(
                    "algorithm",
                    &format!("Not a number: '{}'", p),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.absolute_current_limit, 0.1);
        assert_eq!(config.tracker.duration_s, 30.0);
        assert_eq!(config.tracker.algorithm, "gd://");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.limits.absolute_current_limit = 0.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.tracker.algorithm = "gd://1:2".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.tracker.duration_s,
            deserialized.tracker.duration_s
        );
    }

    #[test]
    fn parse_gd_defaults() {
        let algo = Algorithm::parse("gd://").unwrap();
        assert_eq!(algo, Algorithm::GradientDescent(GdParams::default()));
    }

    #[test]
    fn parse_gd_full() {
        let algo = Algorithm::parse("gd://10:0.002:-1:0:0.1:0.1:0.01").unwrap();
        match algo {
            Algorithm::GradientDescent(p) => {
                assert_eq!(p.alpha, 10.0);
                assert_eq!(p.min_step, 0.002);
                assert_eq!(p.nplc, -1.0);
                assert_eq!(p.delay_ms, 0.0);
                assert_eq!(p.max_step, 0.1);
                assert_eq!(p.momentum, 0.1);
                assert_eq!(p.delta_zero, 0.01);
            }
            other => panic!("unexpected algorithm: {:?}", other),
        }
    }

    #[test]
    fn parse_snaith() {
        let algo = Algorithm::parse("snaith://").unwrap();
        assert_eq!(algo, Algorithm::Snaith(GdParams::default()));
    }

    #[test]
    fn parse_basic() {
        let algo = Algorithm::parse("basic://5:2").unwrap();
        assert_eq!(
            algo,
            Algorithm::PerturbObserve(PoParams {
                d_angle_max_deg: 5.0,
                dwell_time_s: 2.0,
            })
        );
    }

    #[test]
    fn parse_wrong_arity_fails() {
        assert!(Algorithm::parse("gd://1:2:3").is_err());
        assert!(Algorithm::parse("basic://7").is_err());
    }

    #[test]
    fn parse_bad_float_fails() {
        assert!(Algorithm::parse("gd://a:b:c:d:e:f:g").is_err());
    }

    #[test]
    fn parse_out_of_range_fails() {
        // momentum must stay below 1
        assert!(Algorithm::parse("gd://10:0.002:-1:0:0.1:1.0:0.01").is_err());
        // min_step must not exceed max_step
        assert!(Algorithm::parse("gd://10:0.5:-1:0:0.1:0.1:0.01").is_err());
        assert!(Algorithm::parse("basic://0:10").is_err());
        assert!(Algorithm::parse("basic://7:0").is_err());
    }

    #[test]
    fn parse_unknown_scheme_is_carried() {
        let algo = Algorithm::parse("fancy://1:2:3").unwrap();
        assert_eq!(algo, Algorithm::Unknown("fancy".to_string()));
    }

    #[test]
    fn parse_missing_scheme_fails() {
        assert!(Algorithm::parse("gd").is_err());
    }
}
