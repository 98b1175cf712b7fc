// src/config.rs

//! fry configuration
//!
//! Settings are layered, later sources winning: built-in defaults, the TOML
//! config file, environment variables, then command line flags (applied by
//! the command layer).
//!
//! ```toml
//! [engine]
//! endpoint = "unix:///var/run/docker.sock"
//! timeout_secs = 600
//!
//! [cook]
//! output_dir = "packages"
//! update = "never"
//! overwrite = true
//! ```

use crate::detector::Flavour;
use crate::engine::Endpoint;
use crate::engine::docker::DEFAULT_ENDPOINT;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding the engine endpoint
pub const ENDPOINT_ENV: &str = "DOCKER_HOST";

/// Environment variable overriding the output directory
pub const OUTPUT_DIR_ENV: &str = "FRY_OUTPUT_DIR";

/// When to refresh the package index before installing build dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Refresh, and hint when the image already ships an index
    #[default]
    Auto,
    Never,
    Always,
}

impl UpdatePolicy {
    pub const VALUES: [&'static str; 3] = ["auto", "never", "always"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Never => "never",
            Self::Always => "always",
        }
    }

    /// Whether builds of `flavour` refresh the index; only apt is refreshed
    pub fn refreshes(&self, flavour: Flavour) -> bool {
        flavour == Flavour::Debian && *self != Self::Never
    }
}

impl FromStr for UpdatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            other => Err(Error::Config(format!(
                "unknown value for --update: {:?}; possible values are {}",
                other,
                Self::VALUES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FryConfig {
    pub engine: EngineSection,
    pub cook: CookSection,
}

/// `[engine]`: how to reach the container engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// `unix:///path/to/socket` or `tcp://host:port`
    pub endpoint: String,

    /// Read/write timeout on engine connections; unset waits forever
    pub timeout_secs: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: None,
        }
    }
}

/// `[cook]`: defaults for `fry cook`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CookSection {
    /// Where finished packages are written
    pub output_dir: PathBuf,

    pub update: UpdatePolicy,

    /// Replace packages that already exist in the output directory
    pub overwrite: bool,

    /// Leave the build container behind
    pub keep: bool,
}

impl Default for CookSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            update: UpdatePolicy::Auto,
            overwrite: true,
            keep: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl FryConfig {
    /// `$XDG_CONFIG_HOME/fry/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fry").join("config.toml"))
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: FryConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply overrides from variables resolved by `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.is_empty()) {
            debug!("Using engine endpoint {} from {}", endpoint, ENDPOINT_ENV);
            self.engine.endpoint = endpoint;
        }
        if let Some(dir) = lookup(OUTPUT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.cook.output_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if self.engine.timeout_secs == Some(0) {
            return Err(Error::Config(
                "engine.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        self.engine.endpoint.parse()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.engine.timeout_secs.map(Duration::from_secs)
    }
}
