//! Detector configuration
//!
//! Loaded from an optional JSON file; any missing key falls back to its
//! default, and a malformed file is logged and ignored rather than
//! aborting a run. A couple of environment variables override the file
//! for container deployments.

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "DNSENTINEL_CONFIG";
/// Environment override for `logging.level`.
pub const ENV_LOG_LEVEL: &str = "DNSENTINEL_LOG_LEVEL";
/// Environment override for `pipeline.enable_web_checks`.
pub const ENV_WEB_CHECKS: &str = "DNSENTINEL_ENABLE_WEB_CHECKS";

/// Top-level configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub statistical_thresholds: StatisticalThresholds,
    pub logging: LoggingConfig,
}

/// Pipeline-level switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ask the external web collaborator about flagged domains.
    pub enable_web_checks: bool,
    /// Cap on how many domains get web-enriched per run.
    pub max_domains_for_web_checks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_web_checks: false,
            max_domains_for_web_checks: 25,
        }
    }
}

/// Thresholds consulted by the statistical filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalThresholds {
    /// Queries per minute above which a domain is high-frequency.
    pub frequency_per_minute: f64,
    /// Subdomain length above which a label counts as long.
    pub max_subdomain_length: usize,
    /// Entropy (bits/char) above which a label counts as random.
    pub high_entropy_threshold: f64,
    /// Minimum window (minutes) for rate indicators to be trusted.
    /// Reserved knob; no indicator consults it yet.
    pub min_analysis_window_minutes: f64,
}

impl Default for StatisticalThresholds {
    fn default() -> Self {
        Self {
            frequency_per_minute: 10.0,
            max_subdomain_length: 20,
            high_entropy_threshold: 4.0,
            min_analysis_window_minutes: 5.0,
        }
    }
}

/// Diagnostic logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of ERROR, WARN, INFO, DEBUG, TRACE (case-insensitive).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the `DNSENTINEL_CONFIG` file, or
    /// `./config.json`, in that order. Missing or malformed files fall
    /// back to defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Self {
        let candidate = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(Into::into))
            .unwrap_or_else(|| "config.json".into());

        let mut config = if candidate.exists() {
            match std::fs::read_to_string(&candidate)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Config>(&text).map_err(|e| e.to_string()))
            {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        "config {} unusable ({}), falling back to defaults",
                        candidate.display(),
                        err
                    );
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        if let Err(err) = config.validate() {
            warn!("config invalid ({}), falling back to defaults", err);
            config = Config::default();
        }

        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(value) = std::env::var(ENV_WEB_CHECKS) {
            self.pipeline.enable_web_checks =
                matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Sanity checks over threshold values.
    pub fn validate(&self) -> Result<(), String> {
        if self.statistical_thresholds.frequency_per_minute <= 0.0 {
            return Err("frequency_per_minute must be positive".to_string());
        }
        if self.statistical_thresholds.high_entropy_threshold <= 0.0 {
            return Err("high_entropy_threshold must be positive".to_string());
        }
        if self.statistical_thresholds.max_subdomain_length == 0 {
            return Err("max_subdomain_length must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.pipeline.enable_web_checks);
        assert_eq!(config.pipeline.max_domains_for_web_checks, 25);
        assert_eq!(config.statistical_thresholds.frequency_per_minute, 10.0);
        assert_eq!(config.statistical_thresholds.max_subdomain_length, 20);
        assert_eq!(config.statistical_thresholds.high_entropy_threshold, 4.0);
        assert_eq!(config.logging.level, "INFO");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_keys() {
        let json = r#"{"pipeline": {"enable_web_checks": true}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.pipeline.enable_web_checks);
        assert_eq!(config.pipeline.max_domains_for_web_checks, 25);
        assert_eq!(config.statistical_thresholds.high_entropy_threshold, 4.0);
    }

    #[test]
    fn test_threshold_overrides() {
        let json = r#"{"statistical_thresholds": {"frequency_per_minute": 25.0, "max_subdomain_length": 40}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.statistical_thresholds.frequency_per_minute, 25.0);
        assert_eq!(config.statistical_thresholds.max_subdomain_length, 40);
        assert_eq!(config.statistical_thresholds.min_analysis_window_minutes, 5.0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/dnsentinel.json")));
        assert!(!config.pipeline.enable_web_checks);
    }

    #[test]
    fn test_load_malformed_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!(
            "dnsentinel_config_{}_broken.json",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.statistical_thresholds.frequency_per_minute, 10.0);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.statistical_thresholds.frequency_per_minute = 0.0;
        assert!(config.validate().is_err());
    }
}
