//! The plugin seam.
//!
//! A [`Plugin`] is one unit of extraction logic. Every hook has a default
//! so a plugin implements only what it needs; an unimplemented hook is
//! simply skipped by the loader.

use std::path::Path;
use thiserror::Error;

use crate::config::ContextConfig;
use crate::harvest::{Package, PackageError};
use crate::markup::XmlError;
use crate::model::App;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin '{plugin}' failed: {reason}")]
    Failed { plugin: String, reason: String },

    #[error("Plugin '{plugin}' could not parse '{path}': {source}")]
    Parse {
        plugin: String,
        path: String,
        #[source]
        source: XmlError,
    },

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn failed(plugin: &str, reason: impl Into<String>) -> Self {
        PluginError::Failed {
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait Plugin: Send + Sync {
    /// Unique plugin name; also the dispatch order key.
    fn name(&self) -> &'static str;

    /// One-time setup, called before any package is processed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] if the plugin cannot run in this build.
    fn initialize(&mut self, _config: &ContextConfig) -> Result<(), PluginError> {
        Ok(())
    }

    /// Adds the member globs this plugin needs extracted.
    fn add_globs(&self, _globs: &mut Vec<String>) {}

    /// Whether `filename` (an absolute path inside a package) is handled
    /// by [`process`](Self::process).
    fn check_filename(&self, _filename: &str) -> bool {
        false
    }

    /// Builds records from an exploded package tree rooted at `tmpdir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; the task logs it and carries on with the
    /// other plugins.
    fn process(&self, _package: &Package, _tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        Ok(Vec::new())
    }

    /// Refines one record using the exploded tree.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; the record is then dropped.
    fn process_app(
        &self,
        _package: &Package,
        _app: &mut App,
        _tmpdir: &Path,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Cross-record cleanup over every record of the build.
    fn merge(&self, _apps: &mut Vec<App>) {}
}
