//! Engine configuration.
//!
//! Handles loading, saving and validating the engine's tuning knobs:
//! - Active strategy, evaluation cadence and event queue size
//! - RSSI calibration for proximity classification
//! - Default strategy preset and per-knob overrides
//! - Region strategy thresholds
//! - Timezone used for time-rule matching
//!
//! Values come from an optional TOML file layered under `PERIMETER__*`
//! environment variables (for example `PERIMETER__ENGINE__STRATEGY=region`).
//! Strategies are only ever built from a validated configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::beacon::{ProximityCalibration, ProximityLevel, SignalQuality};
use crate::strategy::{
    HysteresisConfig, RegionStrategyConfig, RssiStrategyConfig, StrategyKind, ThresholdPreset,
};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PERIMETER";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The platform has no configuration directory.
    #[error("cannot determine configuration directory")]
    NoConfigDirectory,

    /// TOML or environment values could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several invalid values.
    #[error("{} invalid values: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineConfig {
    /// Runtime settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// RSSI calibration.
    #[serde(default)]
    pub proximity: ProximityCalibration,

    /// Default strategy tuning.
    #[serde(default)]
    pub rssi_strategy: RssiStrategySettings,

    /// Region strategy tuning.
    #[serde(default)]
    pub region_strategy: RegionStrategySettings,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct EngineSettings {
    /// Strategy used at startup.
    pub strategy: StrategyKind,

    /// Seconds between periodic evaluations.
    #[schema(example = 1.0)]
    pub evaluation_interval_secs: f64,

    /// Quiet period after an input change before re-evaluating.
    #[schema(example = 0.25)]
    pub debounce_secs: f64,

    /// Capacity of the runtime's command queue.
    #[schema(example = 256)]
    pub event_queue_capacity: usize,

    /// IANA timezone for time-rule wall-clock matching.
    #[serde(with = "timezone_serde")]
    #[schema(value_type = String, example = "Europe/Amsterdam")]
    pub timezone: Tz,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Default,
            evaluation_interval_secs: 1.0,
            debounce_secs: 0.25,
            event_queue_capacity: 256,
            timezone: chrono_tz::UTC,
        }
    }
}

/// `[rssi_strategy]` section: a preset plus optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RssiStrategySettings {
    /// Base constants.
    pub preset: ThresholdPreset,

    /// Seconds a beacon must stay in range before it is trusted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_stability_secs: Option<f64>,

    /// Weakest acceptable signal quality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_signal_quality: Option<SignalQuality>,

    /// Require near range instead of plain range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_strict_proximity: Option<bool>,

    /// Minimum in-range fraction of the analysis window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_presence_ratio: Option<f64>,

    /// Presence analysis window in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_analysis_window_secs: Option<f64>,

    /// Hysteresis overrides.
    pub hysteresis: HysteresisSettings,
}

/// `[rssi_strategy.hysteresis]` overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HysteresisSettings {
    /// While unblocked, proximity below this blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_threshold: Option<ProximityLevel>,

    /// While blocked, proximity at or above this unblocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unblocking_threshold: Option<ProximityLevel>,

    /// Hold period after a proximity change, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_stability_secs: Option<f64>,
}

/// `[region_strategy]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RegionStrategySettings {
    /// Seconds the region must have been entered before it is trusted.
    pub minimum_region_stability_secs: f64,

    /// Require a recorded region entry.
    pub require_entry_exit_history: bool,

    /// After a re-entry, seconds since that entry before it is trusted.
    pub minimum_region_transition_interval_secs: f64,
}

impl Default for RegionStrategySettings {
    fn default() -> Self {
        let defaults = RegionStrategyConfig::default();
        Self {
            minimum_region_stability_secs: defaults.minimum_region_stability_duration.as_secs_f64(),
            require_entry_exit_history: defaults.require_entry_exit_history,
            minimum_region_transition_interval_secs: defaults
                .minimum_region_transition_interval
                .as_secs_f64(),
        }
    }
}

/// Seconds to a `Duration`, saturating invalid input to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Longest accepted duration for any timing setting (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn check_secs(problems: &mut Vec<ConfigError>, field: &str, value: f64, allow_zero: bool) {
    let valid = value.is_finite() && if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !valid {
        let expected = if allow_zero { "non-negative" } else { "positive" };
        problems.push(ConfigError::ValidationError {
            field: field.to_string(),
            message: format!("must be a {expected} number of seconds (got {value})"),
        });
    } else if value > MAX_DURATION_SECS {
        problems.push(ConfigError::ValidationError {
            field: field.to_string(),
            message: format!("must be at most {MAX_DURATION_SECS} seconds (got {value})"),
        });
    }
}

impl EngineConfig {
    /// Load from `path`, then apply `PERIMETER__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed or invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::from_sources(Some(path), Environment::with_prefix(ENV_PREFIX))
    }

    /// Like [`Self::load`], but a missing file means defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, malformed or invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let path = path.exists().then_some(path);
        Self::from_sources(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Layer an optional TOML file under `environment` and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer is malformed or the result is invalid.
    pub fn from_sources(path: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;
            builder = builder.add_source(File::from_str(&content, FileFormat::Toml));
        }

        let environment = environment
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);

        let config: Self = builder
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)
    }

    /// Standard configuration file location.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no configuration directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        // On the device: /etc/perimeter/config.toml
        // Elsewhere: the platform's per-user config directory
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/perimeter/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "perimeter")
                .ok_or(ConfigError::NoConfigDirectory)?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for a single problem, or
    /// `MultipleValidationErrors` listing all of them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let engine = &self.engine;
        check_secs(
            &mut problems,
            "engine.evaluation_interval_secs",
            engine.evaluation_interval_secs,
            false,
        );
        check_secs(&mut problems, "engine.debounce_secs", engine.debounce_secs, true);
        if engine.event_queue_capacity == 0 {
            problems.push(ConfigError::ValidationError {
                field: "engine.event_queue_capacity".into(),
                message: "must be at least 1".into(),
            });
        }

        problems.extend(self.proximity.problems().into_iter().map(|(field, message)| {
            ConfigError::ValidationError {
                field: field.to_string(),
                message,
            }
        }));

        let rssi = &self.rssi_strategy;
        for (field, value) in [
            ("rssi_strategy.minimum_stability_secs", rssi.minimum_stability_secs),
            (
                "rssi_strategy.presence_analysis_window_secs",
                rssi.presence_analysis_window_secs,
            ),
            (
                "rssi_strategy.hysteresis.transition_stability_secs",
                rssi.hysteresis.transition_stability_secs,
            ),
        ] {
            if let Some(value) = value {
                check_secs(&mut problems, field, value, true);
            }
        }
        problems.extend(
            self.rssi_strategy_config()
                .problems()
                .into_iter()
                .map(|(field, message)| ConfigError::ValidationError {
                    field: format!("rssi_strategy.{field}"),
                    message,
                }),
        );

        let region = &self.region_strategy;
        check_secs(
            &mut problems,
            "region_strategy.minimum_region_stability_secs",
            region.minimum_region_stability_secs,
            true,
        );
        check_secs(
            &mut problems,
            "region_strategy.minimum_region_transition_interval_secs",
            region.minimum_region_transition_interval_secs,
            true,
        );

        match problems.len() {
            0 => Ok(()),
            1 => Err(problems.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(problems)),
        }
    }

    /// Resolve the preset and overrides into strategy tuning.
    #[must_use]
    pub fn rssi_strategy_config(&self) -> RssiStrategyConfig {
        let settings = &self.rssi_strategy;
        let base = settings.preset.config();
        let hysteresis = &settings.hysteresis;

        RssiStrategyConfig {
            minimum_stability_duration: settings
                .minimum_stability_secs
                .map_or(base.minimum_stability_duration, secs),
            minimum_signal_quality: settings
                .minimum_signal_quality
                .unwrap_or(base.minimum_signal_quality),
            use_strict_proximity: settings
                .use_strict_proximity
                .unwrap_or(base.use_strict_proximity),
            minimum_presence_ratio: settings
                .minimum_presence_ratio
                .unwrap_or(base.minimum_presence_ratio),
            presence_analysis_window: settings
                .presence_analysis_window_secs
                .map_or(base.presence_analysis_window, secs),
            hysteresis: HysteresisConfig {
                blocking_threshold: hysteresis
                    .blocking_threshold
                    .unwrap_or(base.hysteresis.blocking_threshold),
                unblocking_threshold: hysteresis
                    .unblocking_threshold
                    .unwrap_or(base.hysteresis.unblocking_threshold),
                transition_stability_duration: hysteresis
                    .transition_stability_secs
                    .map_or(base.hysteresis.transition_stability_duration, secs),
            },
        }
    }

    /// Region strategy tuning.
    #[must_use]
    pub fn region_strategy_config(&self) -> RegionStrategyConfig {
        let region = &self.region_strategy;
        RegionStrategyConfig {
            minimum_region_stability_duration: secs(region.minimum_region_stability_secs),
            require_entry_exit_history: region.require_entry_exit_history,
            minimum_region_transition_interval: secs(
                region.minimum_region_transition_interval_secs,
            ),
        }
    }

    /// Periodic evaluation interval.
    #[must_use]
    pub fn evaluation_interval(&self) -> Duration {
        secs(self.engine.evaluation_interval_secs)
    }

    /// Debounce after input changes.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        secs(self.engine.debounce_secs)
    }
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rssi_strategy_config(), RssiStrategyConfig::default());
        assert_eq!(config.region_strategy_config(), RegionStrategyConfig::default());
        assert_eq!(config.evaluation_interval(), Duration::from_secs(1));
        assert_eq!(config.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [engine]
            strategy = "region"
            timezone = "Europe/Amsterdam"

            [rssi_strategy]
            preset = "conservative"
            minimum_presence_ratio = 0.9

            [rssi_strategy.hysteresis]
            transition_stability_secs = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.strategy, StrategyKind::Region);
        assert_eq!(config.engine.timezone, chrono_tz::Europe::Amsterdam);
        assert_eq!(config.engine.event_queue_capacity, 256);
        assert_eq!(config.proximity, ProximityCalibration::default());

        let rssi = config.rssi_strategy_config();
        let conservative = ThresholdPreset::Conservative.config();
        assert!((rssi.minimum_presence_ratio - 0.9).abs() < f64::EPSILON);
        assert_eq!(rssi.minimum_signal_quality, conservative.minimum_signal_quality);
        assert_eq!(
            rssi.hysteresis.transition_stability_duration,
            Duration::from_millis(1500)
        );
        assert_eq!(
            rssi.hysteresis.unblocking_threshold,
            ProximityLevel::Immediate
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = EngineConfig::default();
        config.engine.evaluation_interval_secs = 0.0;
        config.engine.event_queue_capacity = 0;
        config.proximity.near_threshold = 10;
        config.rssi_strategy.hysteresis.blocking_threshold = Some(ProximityLevel::Immediate);

        let Err(ConfigError::MultipleValidationErrors(errors)) = config.validate() else {
            panic!("expected multiple validation errors");
        };
        let fields: Vec<String> = errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::ValidationError { field, .. } => Some(field.clone()),
                _ => None,
            })
            .collect();
        assert!(fields.contains(&"engine.evaluation_interval_secs".to_string()));
        assert!(fields.contains(&"engine.event_queue_capacity".to_string()));
        assert!(fields.contains(&"proximity.near_threshold".to_string()));
        assert!(fields.contains(&"rssi_strategy.hysteresis.unblocking_threshold".to_string()));
    }

    #[test]
    fn test_single_problem_is_not_wrapped() {
        let mut config = EngineConfig::default();
        config.region_strategy.minimum_region_stability_secs = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. })
                if field == "region_strategy.minimum_region_stability_secs"
        ));
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let mut config = EngineConfig::default();
        config.rssi_strategy.presence_analysis_window_secs = Some(9.0e12);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. })
                if field == "rssi_strategy.presence_analysis_window_secs"
        ));

        config.rssi_strategy.presence_analysis_window_secs = Some(MAX_DURATION_SECS);
        config.engine.debounce_secs = 1.0e15;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. })
                if field == "engine.debounce_secs"
        ));

        let err = EngineConfig::from_toml(
            "[region_strategy]\nminimum_region_stability_secs = 100000.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_unknown_timezone_is_a_parse_error() {
        let err = EngineConfig::from_toml("[engine]\ntimezone = \"Mars/Olympus\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.engine.strategy = StrategyKind::Region;
        config.rssi_strategy.preset = ThresholdPreset::Responsive;
        config.rssi_strategy.use_strict_proximity = Some(true);
        config.save(&path).unwrap();

        let loaded = EngineConfig::from_sources(Some(&path), env(&[])).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nstrategy = \"default\"\ndebounce_secs = 1.0\n").unwrap();

        let config = EngineConfig::from_sources(
            Some(&path),
            env(&[
                ("PERIMETER__ENGINE__STRATEGY", "region"),
                ("PERIMETER__REGION_STRATEGY__REQUIRE_ENTRY_EXIT_HISTORY", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(config.engine.strategy, StrategyKind::Region);
        assert!((config.engine.debounce_secs - 1.0).abs() < f64::EPSILON);
        assert!(!config.region_strategy.require_entry_exit_history);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::NotFound(_))
        ));
    }
}
