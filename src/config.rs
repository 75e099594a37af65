//! Build configuration: global flags and filesystem locations.
//!
//! A [`ContextConfig`] can be loaded from TOML and then overridden from the
//! command line. Every field has a serde default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Global build flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BuildFlags {
    /// Do not veto records missing a name, summary or icon.
    pub ignore_missing_info: bool,

    /// Do not veto addons whose parent is missing.
    pub ignore_missing_parents: bool,

    /// Also persist 128x128 icons.
    pub hidpi_icons: bool,

    /// Inline icon data into the catalog.
    pub embedded_icons: bool,

    /// Never touch the network (no screenshot mirroring).
    pub no_network: bool,

    /// Write the failed catalog.
    pub include_failed: bool,

    /// Leave the icon tree uncompressed.
    pub uncompressed_icons: bool,

    pub ignore_dead_upstream: bool,
    pub ignore_obsolete_deps: bool,
    pub ignore_legacy_icons: bool,
    pub ignore_settings: bool,
    pub use_fallbacks: bool,
    pub add_default_icons: bool,
}

fn default_origin() -> String {
    "appstream".to_string()
}

fn default_min_icon_size() -> u32 {
    32
}

fn default_api_version() -> String {
    "0.8".to_string()
}

fn default_max_threads() -> usize {
    1
}

/// Session configuration.
///
/// `basename`, `output_dir`, `temp_dir` and `cache_dir` are required by
/// [`crate::harvest::Context::setup`]; the rest is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContextConfig {
    /// Base filename of the generated artifacts.
    pub basename: Option<String>,

    /// Catalog origin attribute.
    #[serde(default = "default_origin")]
    pub origin: String,

    pub output_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,

    /// Per-package logs. Defaults to `<output_dir>/logs`.
    pub log_dir: Option<PathBuf>,

    /// Output of a previous run to reuse records and icons from.
    pub old_metadata: Option<PathBuf>,

    /// Directory of hand-written catalogs appended to the primary catalog.
    pub extra_appstream: Option<PathBuf>,

    /// Directory of hand-written AppData files.
    pub extra_appdata: Option<PathBuf>,

    /// Directory of extra screenshots.
    pub extra_screenshots: Option<PathBuf>,

    /// Base URL screenshots are mirrored under.
    pub screenshot_uri: Option<String>,

    /// Plugins to skip at load time.
    pub disabled_plugins: Vec<String>,

    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    #[serde(default = "default_min_icon_size")]
    pub min_icon_size: u32,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub flags: BuildFlags,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            basename: None,
            origin: default_origin(),
            output_dir: None,
            temp_dir: None,
            cache_dir: None,
            log_dir: None,
            old_metadata: None,
            extra_appstream: None,
            extra_appdata: None,
            extra_screenshots: None,
            screenshot_uri: None,
            disabled_plugins: Vec::new(),
            max_threads: default_max_threads(),
            min_icon_size: default_min_icon_size(),
            api_version: default_api_version(),
            flags: BuildFlags::default(),
        }
    }
}

impl ContextConfig {
    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Log directory, falling back to `<output_dir>/logs`.
    pub fn effective_log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .clone()
            .or_else(|| self.output_dir.as_ref().map(|o| o.join("logs")))
    }
}
