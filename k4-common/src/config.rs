//! Bootstrap configuration loading and path resolution
//!
//! The engine reads one TOML file per run. This module owns the parts of that
//! file every crate shares (logging, resource locations, artifact root) and
//! the resolution order for locating the file itself:
//!
//! 1. Explicit argument (highest priority)
//! 2. Environment variable
//! 3. `./k4.toml` in the working directory
//! 4. Platform config directory (`<config_dir>/k4/k4.toml`)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "K4_CONFIG";

/// Environment variable naming the artifact root folder
pub const ARTIFACT_ROOT_ENV_VAR: &str = "K4_ARTIFACT_ROOT";

/// File name searched for in the working and platform config directories
pub const CONFIG_FILE_NAME: &str = "k4.toml";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locations of the static language resources
///
/// Every table is optional individually, but at least one n-gram table must be
/// present for the resource set to load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePaths {
    #[serde(default)]
    pub unigrams: Option<PathBuf>,
    #[serde(default)]
    pub bigrams: Option<PathBuf>,
    #[serde(default)]
    pub trigrams: Option<PathBuf>,
    #[serde(default)]
    pub quadgrams: Option<PathBuf>,
    #[serde(default)]
    pub wordlist: Option<PathBuf>,
}

impl ResourcePaths {
    /// Resolve relative paths against `base` (normally the config file's directory)
    pub fn relative_to(&self, base: &Path) -> Self {
        let join = |p: &Option<PathBuf>| {
            p.as_ref().map(|p| {
                if p.is_relative() {
                    base.join(p)
                } else {
                    p.clone()
                }
            })
        };
        Self {
            unigrams: join(&self.unigrams),
            bigrams: join(&self.bigrams),
            trigrams: join(&self.trigrams),
            quadgrams: join(&self.quadgrams),
            wordlist: join(&self.wordlist),
        }
    }

    /// N-gram table paths indexed by order (1..=4)
    pub fn ngram_paths(&self) -> [(usize, Option<&PathBuf>); 4] {
        [
            (1, self.unigrams.as_ref()),
            (2, self.bigrams.as_ref()),
            (3, self.trigrams.as_ref()),
            (4, self.quadgrams.as_ref()),
        ]
    }
}

/// Artifact output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Root folder for run directories (optional, resolved via env and platform default)
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Locate the configuration file
///
/// Returns an error only when an explicitly named file (argument or environment)
/// does not exist, or when no candidate location holds a config file.
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: explicit argument
    if let Some(path) = cli_arg {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        return Err(Error::Config(format!(
            "{} points to missing file: {}",
            env_var_name,
            path.display()
        )));
    }

    // Priority 3: working directory
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(local);
    }

    // Priority 4: platform config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join("k4").join(CONFIG_FILE_NAME)) {
        if path.exists() {
            return Ok(path);
        }
        debug!("No config at {}", path.display());
    }

    Err(Error::Config(format!(
        "No config file found (pass a path, set {} or create ./{})",
        env_var_name, CONFIG_FILE_NAME
    )))
}

/// Resolve the artifact root folder
///
/// Priority: configured value → environment variable → platform data dir → `./k4_artifacts`
pub fn resolve_artifact_root(configured: Option<&Path>, env_var_name: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
        warn!("{} is set but empty, ignoring", env_var_name);
    }

    dirs::data_local_dir()
        .map(|d| d.join("k4").join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("./k4_artifacts"))
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let value = toml::from_str(&content)?;
    Ok(value)
}
