//! Configuration management for isolab
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (ISOLAB_* prefix, `__` between sections)
//! 3. `.env` in the project directory (never overrides the real environment)
//! 4. isolab.local.toml (gitignored, local overrides)
//! 5. isolab.toml (git-tracked, project config)
//! 6. ~/.config/isolab/config.toml (user defaults)
//! 7. Built-in defaults (lowest precedence)
//!
//! When no `[[targets]]` are configured anywhere, targets are derived from
//! `PG_URL` and `CRDB_URL`.

use anyhow::Result;
use isolab::{ConnectOptions, IsolationLevel, PacingMode, Scenario, ScenarioTiming};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main isolab configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolabConfig {
    pub targets: Vec<TargetConfig>,
    pub phantom_read: ScenarioTiming,
    pub write_skew: ScenarioTiming,
    pub run: RunConfig,
}

impl Default for IsolabConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            phantom_read: Scenario::PhantomRead.default_timing(),
            write_skew: Scenario::WriteSkew.default_timing(),
            run: RunConfig::default(),
        }
    }
}

/// One store to run the scenarios against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    /// Isolation requested for both tasks; the store default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationLevel>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    ConnectOptions::default().max_connections
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            isolation: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Interleave tasks with barriers instead of sleeps
    pub lockstep: bool,
    /// Fewest doctors that must stay available in the write skew scenario
    pub floor: i64,
    pub connect_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lockstep: false,
            floor: isolab::DEFAULT_FLOOR,
            connect_timeout_secs: 10,
        }
    }
}

impl IsolabConfig {
    pub fn pacing(&self) -> PacingMode {
        if self.run.lockstep {
            PacingMode::Lockstep
        } else {
            PacingMode::WallClock
        }
    }

    pub fn connect_options(&self, target: &TargetConfig) -> ConnectOptions {
        ConnectOptions {
            max_connections: target.max_connections,
            connect_timeout: Duration::from_secs(self.run.connect_timeout_secs),
        }
    }

    /// Keeps only the targets named in `names` (case-insensitive).
    ///
    /// An empty filter keeps every target.
    pub fn retain_targets(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        self.targets
            .retain(|t| names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)));
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "target with url '{}' has an empty name",
                    target.url
                )));
            }
            if target.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "target '{}' has an empty url",
                    target.name
                )));
            }
            if !seen.insert(target.name.to_ascii_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "target '{}' is defined more than once",
                    target.name
                )));
            }
        }
        if self.run.floor < 0 {
            return Err(ConfigError::ValidationError(format!(
                "run.floor must not be negative (got {})",
                self.run.floor
            )));
        }
        Ok(())
    }
}
