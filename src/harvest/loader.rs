//! Plugin discovery, ordering and dispatch.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::{App, AppKind};
use crate::plugins;
use crate::traits::{Plugin, PluginError};

/// Metadata keys the font plugin uses while building records; they never
/// reach a catalog.
const FONT_METADATA_KEYS: &[&str] = &[
    "FontClassifier",
    "FontFamily",
    "FontFullName",
    "FontIconText",
    "FontParent",
    "FontSampleText",
    "FontSubFamily",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Plugin '{plugin}' failed to initialize: {source}")]
    Initialize {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("No plugins left after applying the disabled list")]
    NoPlugins,
}

/// The ordered plugin set of a build.
pub struct PluginLoader {
    plugins: Vec<Box<dyn Plugin>>,
    globs: Vec<String>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("plugins", &self.names())
            .field("globs", &self.globs.len())
            .finish()
    }
}

impl PluginLoader {
    /// A loader over the built-in plugins.
    pub fn new() -> Self {
        Self::with_plugins(plugins::builtin())
    }

    /// A loader over an explicit plugin set.
    pub fn with_plugins(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self {
            plugins,
            globs: Vec::new(),
        }
    }

    /// Drops disabled plugins, initializes the rest and fixes the
    /// dispatch order (name, descending). Also caches the glob union.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] if a plugin fails to initialize.
    pub fn setup(&mut self, config: &ContextConfig) -> Result<(), LoaderError> {
        let had_plugins = !self.plugins.is_empty();
        self.plugins.retain(|plugin| {
            let disabled = config.disabled_plugins.iter().any(|d| d == plugin.name());
            if disabled {
                warn!(plugin = plugin.name(), "Plugin disabled by configuration");
            }
            !disabled
        });
        if had_plugins && self.plugins.is_empty() {
            return Err(LoaderError::NoPlugins);
        }

        for plugin in &mut self.plugins {
            plugin
                .initialize(config)
                .map_err(|source| LoaderError::Initialize {
                    plugin: plugin.name().to_string(),
                    source,
                })?;
        }

        self.plugins.sort_by(|a, b| b.name().cmp(a.name()));

        let mut globs = Vec::new();
        for plugin in &self.plugins {
            plugin.add_globs(&mut globs);
        }
        globs.sort();
        globs.dedup();
        self.globs = globs;

        info!(plugins = ?self.names(), globs = self.globs.len(), "Plugins loaded");
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn plugins(&self) -> &[Box<dyn Plugin>] {
        &self.plugins
    }

    /// Union of every plugin's globs, valid after [`setup`](Self::setup).
    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    /// First plugin, in dispatch order, that claims `filename`.
    pub fn match_filename(&self, filename: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.check_filename(filename))
            .map(|p| p.as_ref())
    }

    /// Runs every plugin's refine hook on `app`, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the failing plugin's [`PluginError`].
    pub fn dispatch_process_app(
        &self,
        package: &Package,
        app: &mut App,
        tmpdir: &Path,
    ) -> Result<(), PluginError> {
        for plugin in &self.plugins {
            debug!(plugin = plugin.name(), app = %app.id, "Refining record");
            plugin.process_app(package, app, tmpdir)?;
        }
        Ok(())
    }

    /// Runs plugin merge hooks, strips transient font metadata and vetoes
    /// duplicate ids. `packages` is used to log against the loser's package.
    pub fn merge(&self, apps: &mut Vec<App>, packages: &[Package]) {
        for plugin in &self.plugins {
            plugin.merge(apps);
        }

        for app in apps.iter_mut() {
            for key in FONT_METADATA_KEYS {
                app.remove_metadata(key);
            }
        }

        let mut first_seen: BTreeMap<String, (usize, String)> = BTreeMap::new();
        for i in 0..apps.len() {
            if apps[i].is_vetoed() {
                continue;
            }
            let Some((winner_idx, winner)) = first_seen.get(&apps[i].id).cloned() else {
                first_seen.insert(apps[i].id.clone(), (i, apps[i].origin_label()));
                continue;
            };

            // firmware updates ship one release per package
            if apps[i].kind == AppKind::Firmware {
                let releases = apps[i].releases.clone();
                for release in releases {
                    apps[winner_idx].add_release(release);
                }
                debug!(app = %apps[i].id, winner = %winner, "Merged firmware releases");
            }

            let app = &mut apps[i];
            if let Some(package) = app
                .origin
                .as_ref()
                .and_then(|o| o.package)
                .and_then(|idx| packages.get(idx))
            {
                package.log(
                    LogLevel::Info,
                    &format!(
                        "duplicate {} not included as added from {}",
                        app.id, winner
                    ),
                );
            }
            warn!(app = %app.id, winner = %winner, "Duplicate record vetoed");
            app.add_veto(format!("duplicate of {}", winner));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
