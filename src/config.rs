//! Layered application settings.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file: `--config <PATH>` if given, else `settings.toml` in the
//!    platform config directory (skipped when absent)
//! 3. `PIXDUPE_*` environment variables, e.g. `PIXDUPE_STRENGTH=8` or
//!    `PIXDUPE_EXTENSIONS='["png", "jpg"]'`
//!
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::engine::{EngineConfig, DEFAULT_STRENGTH};
use crate::scanner::{DEFAULT_ARCHIVE_EXTENSIONS, DEFAULT_IMAGE_EXTENSIONS};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PIXDUPE_";

/// Errors loading or rendering settings.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A source could not be parsed or had the wrong shape.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    /// The effective settings could not be rendered as TOML.
    #[error("Failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

/// User-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Perceptual strength, 0 (loose) to 10 (strict)
    pub strength: u8,
    /// Match byte-identical files only
    pub exact: bool,
    /// Worker threads; unset means one per core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Image extensions to scan
    pub extensions: Vec<String>,
    /// Archive extensions whose members are scanned
    pub archive_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            exact: false,
            workers: None,
            extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Load settings from every layer.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if `path` is given but missing, and
    /// [`ConfigError::Invalid`] if any layer fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
        }

        let settings: Self = Self::figment(path).extract().map_err(Box::new)?;
        log::debug!("Effective settings: {:?}", settings);
        Ok(settings)
    }

    /// The layered provider stack, before extraction.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            log::debug!("Reading settings from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// `settings.toml` in the platform config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "pixdupe", "pixdupe")
            .map(|dirs| dirs.config_dir().join("settings.toml"))
    }

    /// Engine configuration for these settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.strength)
            .with_exact(self.exact)
            .with_extensions(&self.extensions)
            .with_archive_extensions(&self.archive_extensions);
        if let Some(workers) = self.workers {
            config = config.with_max_workers(workers);
        }
        config
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
