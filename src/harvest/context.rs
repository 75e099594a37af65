//! The build session.
//!
//! A [`Context`] owns every registered package, the plugin set and the
//! record lists. [`setup`](Context::setup) prepares the filesystem and
//! loads plugins; [`process`](Context::process) runs the whole build and
//! writes the catalogs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{self, CatalogError, CatalogHeader};
use crate::config::ContextConfig;
use crate::harvest::explode::GlobSet;
use crate::harvest::loader::{LoaderError, PluginLoader};
use crate::harvest::log::LogLevel;
use crate::harvest::pipeline::{cache_id_for_filename, origin_for, Task, TaskError, TaskSettings};
use crate::harvest::resolve;
use crate::harvest::resources::{self, ResourceError};
use crate::harvest::traits::PackageError;
use crate::harvest::Package;
use crate::model::App;

/// Screenshot size directories created below `temp/screenshots`.
const SCREENSHOT_SIZES: &[&str] = &["112x63", "624x351", "752x423", "source"];

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort a build.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Required location '{0}' is not configured")]
    MissingLocation(&'static str),

    #[error("Context has not been set up")]
    NotSetUp,

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot add package '{path}': {source}")]
    Package {
        path: String,
        #[source]
        source: PackageError,
    },

    #[error("Plugin loading failed: {0}")]
    Loader(#[from] LoaderError),

    #[error("Task failed: {0}")]
    Task(#[from] TaskError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Failed to write log for '{package}': {source}")]
    Log {
        package: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ContextError + '_ {
    move |source| ContextError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters of one build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Packages registered with the context
    pub packages_total: usize,

    /// Packages disabled before or by pruning
    pub packages_disabled: usize,

    /// Packages run through a task
    pub packages_processed: usize,

    /// Packages whose records came from the old catalog
    pub packages_cached: usize,

    /// Records written to the primary catalog, extra records included
    pub apps_kept: usize,

    /// Vetoed records
    pub apps_failed: usize,

    /// Components of the ignore catalog
    pub packages_ignored: usize,
}

/// Directories resolved by [`Context::setup`].
#[derive(Debug, Clone)]
struct Locations {
    basename: String,
    output: PathBuf,
    temp: PathBuf,
    cache: PathBuf,
    log: PathBuf,
    icons: PathBuf,
    screenshots: PathBuf,
}

// ============================================================================
// Context
// ============================================================================

/// One build session.
///
/// # Example
///
/// ```ignore
/// use appstream_builder::config::ContextConfig;
/// use appstream_builder::harvest::Context;
///
/// let mut context = Context::new(config).with_temp_cleanup(true);
/// context.add_filename(Path::new("gedit-3.14-1.fc21.x86_64.rpm"))?;
/// context.setup()?;
/// let stats = context.process()?;
/// ```
#[derive(Debug)]
pub struct Context {
    config: ContextConfig,
    loader: PluginLoader,
    packages: Vec<Package>,
    apps: Vec<App>,
    extra_apps: Vec<App>,
    old_cache: HashMap<String, Vec<App>>,
    old_ignored: HashSet<String>,
    globs: GlobSet,
    locations: Option<Locations>,
    cleanup: bool,
}

impl Context {
    /// Creates a context over the built-in plugins.
    ///
    /// Temp trees are removed after each task by default.
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            loader: PluginLoader::new(),
            packages: Vec::new(),
            apps: Vec::new(),
            extra_apps: Vec::new(),
            old_cache: HashMap::new(),
            old_ignored: HashSet::new(),
            globs: GlobSet::default(),
            locations: None,
            cleanup: true,
        }
    }

    /// Replaces the plugin set.
    pub fn with_plugin_loader(mut self, loader: PluginLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Configures removal of per-package temp trees.
    ///
    /// # Arguments
    ///
    /// * `cleanup` - If `false`, exploded trees are left for inspection
    pub fn with_temp_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Every record of the build, vetoed ones included.
    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Registers a package file, choosing the backend by extension.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Package`] if the extension is unknown, or if
    /// the identity cannot be guessed from the name and opening fails.
    pub fn add_filename(&mut self, path: &Path) -> Result<(), ContextError> {
        let package_err = |source| ContextError::Package {
            path: path.display().to_string(),
            source,
        };
        let mut package = Package::from_filename(path).map_err(package_err)?;
        if !package.has_identity() {
            package.open().map_err(package_err)?;
        }
        debug!(package = %package.basename(), format = package.format_name(), "Added package");
        self.packages.push(package);
        Ok(())
    }

    /// Registers one branch of an OSTree repository.
    pub fn add_ostree(&mut self, repo: &Path, refname: &str) {
        self.packages.push(Package::ostree(repo, refname));
    }

    /// Registers an already constructed package.
    pub fn add_package(&mut self, package: Package) {
        self.packages.push(package);
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    /// Validates locations, prepares directories, loads plugins and reads
    /// the old and extra catalogs.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if a required location is missing, a
    /// directory cannot be prepared, a plugin fails to load or a catalog
    /// cannot be read.
    pub fn setup(&mut self) -> Result<(), ContextError> {
        let basename = self
            .config
            .basename
            .clone()
            .ok_or(ContextError::MissingLocation("basename"))?;
        let output = self
            .config
            .output_dir
            .clone()
            .ok_or(ContextError::MissingLocation("output-dir"))?;
        let temp = self
            .config
            .temp_dir
            .clone()
            .ok_or(ContextError::MissingLocation("temp-dir"))?;
        let cache = self
            .config
            .cache_dir
            .clone()
            .ok_or(ContextError::MissingLocation("cache-dir"))?;
        let log = self
            .config
            .effective_log_dir()
            .ok_or(ContextError::MissingLocation("log-dir"))?;

        if temp.exists() {
            fs::remove_dir_all(&temp).map_err(io_err(&temp))?;
        }
        let icons = temp.join("icons");
        let screenshots = temp.join("screenshots");
        for dir in [&output, &cache, &temp, &icons, &log] {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        for size in SCREENSHOT_SIZES {
            let dir = screenshots.join(size);
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }

        self.loader.setup(&self.config)?;
        self.globs = GlobSet::new(self.loader.globs());

        if let Some(dir) = &self.config.extra_appstream {
            self.extra_apps = catalog::read_catalog_dir(dir)?;
            info!(
                dir = %dir.display(),
                components = self.extra_apps.len(),
                "Loaded extra catalogs"
            );
        }

        if let Some(old) = &self.config.old_metadata {
            let archive = old.join(format!("{}-icons.tar.gz", basename));
            if archive.is_file() {
                catalog::unpack_archive(&archive, &icons)?;
            }
            let previous = old.join(format!("{}.xml.gz", basename));
            if previous.is_file() {
                for app in catalog::read_catalog(&previous)? {
                    let Some(cache_id) = app.metadata_item("X-CacheID").map(str::to_string) else {
                        continue;
                    };
                    self.old_cache.entry(cache_id).or_default().push(app);
                }
                info!(
                    path = %previous.display(),
                    packages = self.old_cache.len(),
                    "Loaded old metadata"
                );
            }
            let ignored = old.join(format!("{}-ignore.xml.gz", basename));
            if ignored.is_file() {
                self.old_ignored = catalog::read_catalog(&ignored)?
                    .iter()
                    .filter_map(|app| app.metadata_item("X-CacheID").map(str::to_string))
                    .collect();
                debug!(packages = self.old_ignored.len(), "Loaded old ignore list");
            }
        }

        self.locations = Some(Locations {
            basename,
            output,
            temp,
            cache,
            log,
            icons,
            screenshots,
        });
        Ok(())
    }

    /// Per-package settings read by plugins and by the package log.
    fn package_config(&self, loc: &Locations) -> Vec<(&'static str, String)> {
        let mut keys = vec![
            ("LogDir", loc.log.display().to_string()),
            ("ScreenshotDir", loc.screenshots.display().to_string()),
            ("CacheDir", loc.cache.display().to_string()),
            ("TempDir", loc.temp.display().to_string()),
            ("OutputDir", loc.output.display().to_string()),
            ("IconsDir", loc.icons.display().to_string()),
        ];
        if let Some(dir) = &self.config.extra_appdata {
            keys.push(("AppDataExtra", dir.display().to_string()));
        }
        if let Some(dir) = &self.config.extra_screenshots {
            keys.push(("ScreenshotsExtra", dir.display().to_string()));
        }
        if let Some(uri) = &self.config.screenshot_uri {
            keys.push(("MirrorURI", uri.clone()));
        }
        keys
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Runs the build and writes every artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when the environment fails. Bad package
    /// content never aborts the build.
    pub fn process(&mut self) -> Result<BuildStats, ContextError> {
        let loc = self.locations.clone().ok_or(ContextError::NotSetUp)?;
        let start = Instant::now();
        let mut stats = BuildStats {
            packages_total: self.packages.len(),
            ..BuildStats::default()
        };

        // ====================================================================
        // Pruning
        // ====================================================================

        let multiarch = resolve::prune_multiarch(&mut self.packages);
        let versions = resolve::prune_versions(&mut self.packages);
        debug!(multiarch, versions, "Packages pruned");

        // ====================================================================
        // Tasks
        // ====================================================================

        let settings = TaskSettings {
            temp_root: loc.temp.clone(),
            screenshot_dir: Some(loc.screenshots.clone()),
            mirror_uri: self.config.screenshot_uri.clone(),
            no_network: self.config.flags.no_network,
            cleanup: self.cleanup,
        };
        let package_config = self.package_config(&loc);
        let mut zero_match: Vec<usize> = Vec::new();

        for index in 0..self.packages.len() {
            for (key, value) in &package_config {
                self.packages[index].set_config(key, value);
            }
            if !self.packages[index].enabled() {
                let package = &self.packages[index];
                package.log(LogLevel::Debug, &format!("{} is not enabled", package.nevr()));
                package.flush_log().map_err(|source| ContextError::Log {
                    package: package.name().to_string(),
                    source,
                })?;
                stats.packages_disabled += 1;
                continue;
            }

            let cache_id = cache_id_for_filename(self.packages[index].basename());
            if let Some(cached) = self.old_cache.get(&cache_id) {
                let package = &self.packages[index];
                package.log(
                    LogLevel::Debug,
                    &format!("Using cached metadata for {}", package.basename()),
                );
                for app in cached {
                    let mut app = app.clone();
                    app.origin = Some(origin_for(package, index));
                    self.apps.push(app);
                }
                stats.packages_cached += 1;
                continue;
            }
            if self.old_ignored.contains(&cache_id) {
                let package = &self.packages[index];
                package.log(
                    LogLevel::Debug,
                    &format!("Nothing found in {} last time", package.basename()),
                );
                zero_match.push(index);
                stats.packages_cached += 1;
                continue;
            }

            let outcome =
                Task::new(&self.loader, &self.globs, &settings).process(&mut self.packages, index)?;
            stats.packages_processed += 1;
            if outcome.apps.is_empty() {
                zero_match.push(index);
            }
            self.apps.extend(outcome.apps);
        }

        // ====================================================================
        // Resolution
        // ====================================================================

        self.loader.merge(&mut self.apps, &self.packages);
        if !self.config.flags.ignore_missing_info {
            resolve::detect_missing_info(&mut self.apps);
        }
        if !self.config.flags.ignore_missing_parents {
            resolve::detect_missing_parents(&mut self.apps);
        }
        for warning in resolve::detect_pkgname_dups(&self.apps) {
            debug!(%warning, "Package name shared");
        }

        // ====================================================================
        // Resources
        // ====================================================================

        if self.config.flags.embedded_icons {
            self.apps
                .iter_mut()
                .filter(|a| !a.is_vetoed())
                .for_each(resources::embed_icons);
        }
        for app in self.apps.iter().filter(|a| !a.is_vetoed()) {
            resources::save_icons(app, &loc.icons)?;
        }
        for app in &self.apps {
            let Some(package) = self.package_of(app) else {
                continue;
            };
            package.log(LogLevel::Debug, &catalog::component_xml(app)?);
        }

        // ====================================================================
        // Output
        // ====================================================================

        self.write_catalogs(&loc, &zero_match, &mut stats)?;
        self.write_archives(&loc)?;

        for package in &self.packages {
            package.flush_log().map_err(|source| ContextError::Log {
                package: package.name().to_string(),
                source,
            })?;
        }

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            kept = stats.apps_kept,
            failed = stats.apps_failed,
            ignored = stats.packages_ignored,
            "Build completed"
        );
        Ok(stats)
    }

    fn package_of(&self, app: &App) -> Option<&Package> {
        app.origin
            .as_ref()
            .and_then(|o| o.package)
            .and_then(|index| self.packages.get(index))
    }

    fn write_catalogs(
        &self,
        loc: &Locations,
        zero_match: &[usize],
        stats: &mut BuildStats,
    ) -> Result<(), ContextError> {
        let mut kept: Vec<&App> = self.apps.iter().filter(|a| !a.is_vetoed()).collect();
        kept.sort_by(|a, b| a.id.cmp(&b.id));
        let primary = loc.output.join(format!("{}.xml.gz", loc.basename));
        stats.apps_kept = catalog::write_catalog(
            &primary,
            &CatalogHeader {
                origin: &self.config.origin,
                api_version: &self.config.api_version,
            },
            kept.iter().copied().chain(self.extra_apps.iter()),
        )?;

        let mut failed: Vec<&App> = self.apps.iter().filter(|a| a.is_vetoed()).collect();
        failed.sort_by(|a, b| a.id.cmp(&b.id));
        stats.apps_failed = failed.len();
        if self.config.flags.include_failed {
            let origin = format!("{}-failed", loc.basename);
            catalog::write_catalog(
                &loc.output.join(format!("{}.xml.gz", origin)),
                &CatalogHeader {
                    origin: &origin,
                    api_version: &self.config.api_version,
                },
                failed
                    .iter()
                    .copied()
                    .filter(|a| a.metadata_item("NoDisplay").is_none()),
            )?;
        }

        // A package is ignored when it ran but nothing it produced survived.
        let used: BTreeSet<usize> = kept
            .iter()
            .filter_map(|a| a.origin.as_ref().and_then(|o| o.package))
            .collect();
        let produced: BTreeSet<usize> = self
            .apps
            .iter()
            .filter_map(|a| a.origin.as_ref().and_then(|o| o.package))
            .chain(zero_match.iter().copied())
            .collect();
        // Packages that produced nothing at all carry their cache id so the
        // next run can skip them.
        let mut ignored: BTreeMap<(String, String), Option<String>> = BTreeMap::new();
        for &index in produced.difference(&used) {
            let Some(package) = self.packages.get(index) else {
                continue;
            };
            let cache_id = zero_match
                .contains(&index)
                .then(|| cache_id_for_filename(package.basename()));
            ignored
                .entry((package.name().to_string(), package.arch().to_string()))
                .or_insert(cache_id);
        }
        let records: Vec<App> = ignored
            .iter()
            .map(|((name, arch), cache_id)| {
                let mut app = catalog::ignore_record(name, arch);
                if let Some(cache_id) = cache_id {
                    app.add_metadata("X-CacheID", cache_id);
                }
                app
            })
            .collect();
        let origin = format!("{}-ignore", loc.basename);
        stats.packages_ignored = catalog::write_catalog(
            &loc.output.join(format!("{}.xml.gz", origin)),
            &CatalogHeader {
                origin: &origin,
                api_version: &self.config.api_version,
            },
            &records,
        )?;
        Ok(())
    }

    fn write_archives(&self, loc: &Locations) -> Result<(), ContextError> {
        if self.config.flags.uncompressed_icons {
            let dest = loc.output.join("icons");
            copy_tree(&loc.icons, &dest)?;
        } else {
            let dest = loc.output.join(format!("{}-icons.tar.gz", loc.basename));
            catalog::write_archive_dir(&dest, &loc.icons, true)?;
        }

        let has_screenshots = fs::read_dir(loc.screenshots.join("source"))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if has_screenshots {
            let dest = loc.output.join(format!("{}-screenshots.tar", loc.basename));
            catalog::write_archive_dir(&dest, &loc.screenshots, false)?;
        }
        Ok(())
    }
}

/// Copies the regular files and directories below `src` into `dest`.
fn copy_tree(src: &Path, dest: &Path) -> Result<(), ContextError> {
    for entry in WalkDir::new(src).into_iter().filter_map(Result::ok) {
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_err(&target))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(io_err(&target))?;
        } else {
            warn!(path = %entry.path().display(), "Skipping non-regular icon file");
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::MemoryPackage;
    use crate::model::AppKind;

    const APP_DESKTOP: &[u8] = b"[Desktop Entry]
Type=Application
Name=App
Comment=Does things
Icon=app
Categories=Utility;
";

    fn addon_metainfo(id: &str, extends: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<component type="addon">
  <id>{}</id>
  <extends>{}</extends>
  <name>{}</name>
  <summary>Adds things</summary>
</component>
"#,
            id, extends, id
        )
        .into_bytes()
    }

    fn config(root: &Path) -> ContextConfig {
        let mut config = ContextConfig::default();
        config.basename = Some("test".to_string());
        config.output_dir = Some(root.join("out"));
        config.temp_dir = Some(root.join("tmp"));
        config.cache_dir = Some(root.join("cache"));
        config.log_dir = Some(root.join("logs"));
        config.flags.include_failed = true;
        config.flags.no_network = true;
        config
    }

    fn add_scenario(context: &mut Context) {
        context.add_package(Package::memory(
            MemoryPackage::new("app", "1", "1", "noarch")
                .file("/usr/share/applications/app.desktop", APP_DESKTOP)
                .file("/usr/share/pixmaps/app.png", b"png"),
        ));
        context.add_package(Package::memory(
            MemoryPackage::new("app-extra", "1", "1", "noarch").file(
                "/usr/share/metainfo/app-extra.metainfo.xml",
                &addon_metainfo("app-extra", "app.desktop"),
            ),
        ));
        context.add_package(Package::memory(
            MemoryPackage::new("orphan-addon", "1", "1", "noarch").file(
                "/usr/share/metainfo/orphan-addon.metainfo.xml",
                &addon_metainfo("orphan-addon", "missing.desktop"),
            ),
        ));
        context.add_package(Package::memory(
            MemoryPackage::new("lib", "1", "1", "x86_64").file("/usr/lib/libfoo.so.1", b"elf"),
        ));
    }

    fn ids(apps: &[App]) -> Vec<&str> {
        apps.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_setup_requires_locations() {
        let mut context = Context::new(ContextConfig::default());
        assert!(matches!(
            context.setup(),
            Err(ContextError::MissingLocation("basename"))
        ));
    }

    #[test]
    fn test_process_before_setup() {
        let mut context = Context::new(ContextConfig::default());
        assert!(matches!(context.process(), Err(ContextError::NotSetUp)));
    }

    #[test]
    fn test_setup_prepares_directories() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("tmp/stale");
        fs::create_dir_all(&stale).unwrap();

        let mut context = Context::new(config(dir.path()));
        context.setup().unwrap();

        assert!(!stale.exists());
        assert!(dir.path().join("tmp/icons").is_dir());
        assert!(dir.path().join("tmp/screenshots/624x351").is_dir());
        assert!(dir.path().join("tmp/screenshots/source").is_dir());
        assert!(dir.path().join("out").is_dir());
        assert!(dir.path().join("cache").is_dir());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_end_to_end_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = Context::new(config(dir.path()));
        add_scenario(&mut context);
        context.setup().unwrap();
        let stats = context.process().unwrap();

        assert_eq!(stats.packages_total, 4);
        assert_eq!(stats.packages_processed, 4);
        assert_eq!(stats.apps_kept, 2);
        assert_eq!(stats.apps_failed, 1);

        let out = dir.path().join("out");
        let primary = catalog::read_catalog(&out.join("test.xml.gz")).unwrap();
        assert_eq!(ids(&primary), ["app-extra", "app.desktop"]);
        let addon = &primary[0];
        assert_eq!(addon.kind, AppKind::Addon);
        assert_eq!(addon.pkgnames, ["app-extra"]);
        assert_eq!(
            addon.metadata_item("X-CacheID"),
            Some(cache_id_for_filename(context.packages()[1].basename()).as_str())
        );

        let failed = catalog::read_catalog(&out.join("test-failed.xml.gz")).unwrap();
        assert_eq!(ids(&failed), ["orphan-addon"]);
        assert!(failed[0]
            .vetoes
            .iter()
            .any(|v| v.contains("orphan-addon") && v.contains("missing.desktop")));

        let ignore = catalog::read_catalog(&out.join("test-ignore.xml.gz")).unwrap();
        assert_eq!(ids(&ignore), ["lib.x86_64", "orphan-addon.noarch"]);
        assert_eq!(ignore[0].pkgnames, ["lib"]);
        assert_eq!(
            ignore[0].metadata_item("X-CacheID"),
            Some(cache_id_for_filename(context.packages()[3].basename()).as_str())
        );
        assert_eq!(ignore[1].metadata_item("X-CacheID"), None);

        assert!(out.join("test-icons.tar.gz").is_file());
        assert!(dir.path().join("tmp/icons/64x64/app.png").is_file());
        assert!(!out.join("test-screenshots.tar").exists());
        assert!(dir.path().join("logs/a/app.log").is_file());
    }

    #[test]
    fn test_pruned_packages_are_not_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = Context::new(config(dir.path()));
        context.add_package(Package::memory(
            MemoryPackage::new("lib", "1", "1", "x86_64").file("/usr/lib/libfoo.so.1", b"elf"),
        ));
        context.add_package(Package::memory(
            MemoryPackage::new("lib", "2", "1", "x86_64").file("/usr/lib/libfoo.so.2", b"elf"),
        ));
        context.setup().unwrap();
        let stats = context.process().unwrap();

        assert_eq!(stats.packages_disabled, 1);
        assert_eq!(stats.packages_processed, 1);
        assert_eq!(stats.packages_ignored, 1);
        assert!(!context.packages()[0].enabled());
    }

    #[test]
    fn test_old_metadata_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Context::new(config(dir.path()));
        add_scenario(&mut first);
        first.setup().unwrap();
        first.process().unwrap();

        let mut config = config(&dir.path().join("second"));
        config.old_metadata = Some(dir.path().join("out"));
        let mut second = Context::new(config);
        add_scenario(&mut second);
        second.setup().unwrap();
        let stats = second.process().unwrap();

        // the orphan produced a vetoed record, so it runs again; the library
        // produced nothing and is skipped
        assert_eq!(stats.packages_cached, 3);
        assert_eq!(stats.packages_processed, 1);
        assert_eq!(stats.apps_kept, 2);
        assert_eq!(stats.packages_ignored, 2);
        assert!(dir.path().join("second/tmp/icons/64x64/app.png").is_file());

        let ignore =
            catalog::read_catalog(&dir.path().join("second/out/test-ignore.xml.gz")).unwrap();
        assert_eq!(ids(&ignore), ["lib.x86_64", "orphan-addon.noarch"]);
        assert!(ignore[0].metadata_item("X-CacheID").is_some());
    }

    #[test]
    fn test_extra_appstream_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra");
        fs::create_dir_all(&extra).unwrap();
        fs::write(
            extra.join("extra.xml"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<components version="0.8">
  <component type="desktop"><id>web.desktop</id><name>Web</name></component>
</components>
"#,
        )
        .unwrap();

        let mut config = config(dir.path());
        config.extra_appstream = Some(extra);
        let mut context = Context::new(config);
        context.setup().unwrap();
        let stats = context.process().unwrap();

        assert_eq!(stats.apps_kept, 1);
        let primary = catalog::read_catalog(&dir.path().join("out/test.xml.gz")).unwrap();
        assert_eq!(ids(&primary), ["web.desktop"]);
    }

    #[test]
    fn test_uncompressed_icons_are_copied() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.flags.uncompressed_icons = true;
        let mut context = Context::new(config);
        add_scenario(&mut context);
        context.setup().unwrap();
        context.process().unwrap();

        let out = dir.path().join("out");
        assert!(out.join("icons/64x64/app.png").is_file());
        assert!(!out.join("test-icons.tar.gz").exists());
    }
}
