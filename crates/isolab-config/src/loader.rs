//! Configuration loader with multi-source merging

use crate::{ConfigError, IsolabConfig, Paths, TargetConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Prefix of overriding variables: `ISOLAB_RUN__LOCKSTEP=true`.
const ENV_PREFIX: &str = "ISOLAB";

/// Legacy variables, in run order, used when no targets are configured.
const LEGACY_TARGETS: &[(&str, &str)] = &[("PG_URL", "PostgreSQL"), ("CRDB_URL", "CockroachDB")];

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env: Option<config::Map<String, String>>,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: None,
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Skip ~/.config/isolab/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<IsolabConfig> {
        let vars = self.environment()?;
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = IsolabConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/isolab/config.toml)
        // 3. Project config (isolab.toml)
        // 4. Local config (isolab.local.toml, gitignored)
        let user_config_file = if self.user_config {
            Paths::new().user_config_file().ok()
        } else {
            None
        };
        let files = user_config_file.into_iter().chain([
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ]);
        for file in files.filter(|file| file.exists()) {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (ISOLAB_RUN__LOCKSTEP=true, ...)
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let mut isolab_config: IsolabConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if isolab_config.targets.is_empty() {
            isolab_config.targets = legacy_targets(&vars);
        }

        isolab_config.validate()?;

        Ok(isolab_config)
    }

    /// The process environment (or the injected one) over `.env` entries.
    fn environment(&self) -> Result<config::Map<String, String>, ConfigError> {
        let mut vars = config::Map::new();

        let dotenv_file = Paths::dotenv_file(&self.project_dir);
        if dotenv_file.exists() {
            let dotenv_error = |e: dotenvy::Error| ConfigError::DotEnvError {
                path: dotenv_file.clone(),
                message: e.to_string(),
            };
            for entry in dotenvy::from_path_iter(&dotenv_file).map_err(dotenv_error)? {
                let (key, value) = entry.map_err(dotenv_error)?;
                vars.insert(key, value);
            }
        }

        match &self.env {
            Some(injected) => vars.extend(injected.clone()),
            None => vars.extend(env::vars()),
        }

        Ok(vars)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn legacy_targets(vars: &config::Map<String, String>) -> Vec<TargetConfig> {
    LEGACY_TARGETS
        .iter()
        .filter_map(|(var, name)| match vars.get(*var) {
            Some(url) if !url.trim().is_empty() => Some(TargetConfig::new(*name, url.trim())),
            _ => {
                tracing::warn!(variable = *var, store = *name, "not set, skipping target");
                None
            }
        })
        .collect()
}
