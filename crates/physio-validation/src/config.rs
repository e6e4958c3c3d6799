//! Engine configuration.

use physio_core::{Error, PatientLevel, Result};
use serde::{Deserialize, Serialize};

use crate::filtering::OneEuroParams;
use crate::rom::RomConfig;

const ENV_PREFIX: &str = "PHYSIO";

/// Complete engine configuration
///
/// Filter parameters have no defaults and must always be supplied, either in
/// code via [`EngineConfig::new`] or in the loaded source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum keypoint confidence for a detector or filter to use it
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f32,

    /// Patient level applied to thresholds and display limits
    #[serde(default = "default_patient_level")]
    pub patient_level: PatientLevel,

    /// One-euro filter parameters
    pub filter: OneEuroParams,

    /// ROM session tracking
    #[serde(default)]
    pub rom: RomConfig,

    /// Quality score
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Points deducted per warning-level error
    pub warning_penalty: f64,

    /// Points deducted per critical error
    pub critical_penalty: f64,

    /// Minimum score to pass (0..=100)
    pub pass_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            warning_penalty: 10.0,
            critical_penalty: 25.0,
            pass_score: 70.0,
        }
    }
}

fn default_min_visibility() -> f32 {
    0.5
}

fn default_patient_level() -> PatientLevel {
    PatientLevel::Intermediate
}

impl EngineConfig {
    pub fn new(filter: OneEuroParams) -> Self {
        Self {
            min_visibility: default_min_visibility(),
            patient_level: default_patient_level(),
            filter,
            rom: RomConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }

    /// Load configuration from file, with `PHYSIO_` environment overrides
    /// (nested keys separated by `__`, e.g. `PHYSIO_FILTER__BETA`)
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(environment())
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_visibility) {
            return Err(Error::ConfigInvalid(format!(
                "min_visibility must be within [0, 1], got {}",
                self.min_visibility
            )));
        }
        self.filter.validate()?;
        self.rom.validate()?;

        let scoring = &self.scoring;
        let penalties_ok = scoring.warning_penalty.is_finite()
            && scoring.critical_penalty.is_finite()
            && scoring.warning_penalty >= 0.0
            && scoring.critical_penalty >= scoring.warning_penalty;
        if !penalties_ok {
            return Err(Error::ConfigInvalid(format!(
                "invalid penalties: warning {}, critical {}",
                scoring.warning_penalty, scoring.critical_penalty
            )));
        }
        if !(0.0..=100.0).contains(&scoring.pass_score) {
            return Err(Error::ConfigInvalid(format!(
                "pass_score must be within [0, 100], got {}",
                scoring.pass_score
            )));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn config_error(err: config::ConfigError) -> Error {
    Error::Config(err.to_string())
}
