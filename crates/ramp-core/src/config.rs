//! Runtime configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! A few settings can be overridden from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RAMP_MAX_CONCURRENT` | `scheduler.max_concurrent` |
//! | `RAMP_MAX_ENSEMBLE_SIZE` | `ensemble.max_ensemble_size` |
//! | `RAMP_STORE_ROOT` | `store.root` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{RampError, Result};
use crate::leaderboard::LeaderboardConfig;
use crate::scheduler::SchedulerConfig;

pub const ENV_MAX_CONCURRENT: &str = "RAMP_MAX_CONCURRENT";
pub const ENV_MAX_ENSEMBLE_SIZE: &str = "RAMP_MAX_ENSEMBLE_SIZE";
pub const ENV_STORE_ROOT: &str = "RAMP_STORE_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Upper bound on the greedy selection length per fold.
    pub max_ensemble_size: usize,
    /// Seed of the stratified split used for self calibration.
    pub calibration_seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_ensemble_size: 80,
            calibration_seed: 57,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LeaderboardSection {
    /// Decimal digits kept in leaderboard scores.
    pub score_precision: usize,
}

impl Default for LeaderboardSection {
    fn default() -> Self {
        Self { score_precision: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Artifact directory; `None` keeps artifacts in memory.
    pub root: Option<PathBuf>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RampConfig {
    pub scheduler: SchedulerConfig,
    pub ensemble: EnsembleConfig,
    pub leaderboard: LeaderboardSection,
    pub store: StoreConfig,
}

impl RampConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| RampError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RampError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_CONCURRENT) {
            self.scheduler.max_concurrent = parse_count(ENV_MAX_CONCURRENT, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_ENSEMBLE_SIZE) {
            self.ensemble.max_ensemble_size = parse_count(ENV_MAX_ENSEMBLE_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_STORE_ROOT) {
            if !v.is_empty() {
                self.store.root = Some(PathBuf::from(v));
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(RampError::Config(
                "scheduler.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.ensemble.max_ensemble_size == 0 {
            return Err(RampError::Config(
                "ensemble.max_ensemble_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings consumed by [`Leaderboard::build`](crate::leaderboard::Leaderboard::build).
    pub fn leaderboard_config(&self) -> LeaderboardConfig {
        LeaderboardConfig {
            max_ensemble_size: self.ensemble.max_ensemble_size,
            calibration_seed: self.ensemble.calibration_seed,
            score_precision: self.leaderboard.score_precision,
        }
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| RampError::Config(format!("{name}={value:?} is not a number")))
}
