//! The per-package task.
//!
//! A [`Task`] takes one enabled package from nevra resolution to enriched
//! records:
//! 1. resolve identity
//! 2. firmware archives are parsed directly
//! 3. pick the plugins whose filename check matches the file list
//! 4. explode the package (and same-source auxiliary packages) into a
//!    private temp tree
//! 5. run each plugin's process hook
//! 6. enrich every record from the package and run the refine hooks
//! 7. clean up
//!
//! Environment failures abort the build through [`TaskError`]; anything
//! package-specific is logged and only affects this package.

use std::collections::{HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog;
use crate::harvest::explode::GlobSet;
use crate::harvest::loader::PluginLoader;
use crate::harvest::log::LogLevel;
use crate::harvest::resources;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageKind};
use crate::harvest::Package;
use crate::model::{App, AppKind, AppOrigin};
use crate::traits::Plugin;

/// Dependencies that never name a real sibling package.
const IGNORED_DEPS: &[&str] = &["rtld"];

/// Icon theme pulled in for any of these dependencies, regardless of source.
const ICON_THEME: &str = "oxygen-icon-theme";
const ICON_THEME_TRIGGERS: &[&str] = &["oxygen-icon-theme", "kde-runtime"];

/// Version of the cache-id scheme written as `X-CacheID`.
const METADATA_CACHE_VERSION: u32 = 1;

/// Cache id for a package file: `<basename>:<version>`.
pub fn cache_id_for_filename(basename: &str) -> String {
    format!("{}:{}", basename, METADATA_CACHE_VERSION)
}

/// Where a record built from `packages[index]` came from.
pub fn origin_for(package: &Package, index: usize) -> AppOrigin {
    AppOrigin {
        package: Some(index),
        name: package.name().to_string(),
        nevr: package.nevr().to_string(),
        arch: package.arch().to_string(),
        filename: package.basename().to_string(),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures that make the whole build unreliable.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Package '{package}' failed: {source}")]
    Package {
        package: String,
        #[source]
        source: PackageError,
    },

    #[error("Temporary tree '{path}' failed: {source}")]
    TempDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path traversal attempt rejected: '{attempted}'")]
    PathTraversal { attempted: String },

    #[error("Failed to write log for '{package}': {source}")]
    Log {
        package: String,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Temporary Tree
// ============================================================================

/// A task's private extraction directory.
///
/// Removed by [`remove`](Self::remove), or on drop as a fallback so an
/// early return never leaves a tree behind.
#[derive(Debug)]
pub struct TempTree {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl TempTree {
    /// Clears and recreates `<root>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::PathTraversal`] if `name` is not a single
    /// normal path component, or [`TaskError::TempDir`] on I/O failure.
    pub fn recreate(root: &Path, name: &str, cleanup_on_drop: bool) -> Result<Self, TaskError> {
        let path = Self::safe_child(root, Path::new(name))?;
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|source| TaskError::TempDir {
                path: path.display().to_string(),
                source,
            })?;
        }
        std::fs::create_dir_all(&path).map_err(|source| TaskError::TempDir {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path,
            cleanup_on_drop,
        })
    }

    /// Resolves `relative` below `root`, rejecting anything that could
    /// escape it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::PathTraversal`] for absolute paths or `..`.
    pub fn safe_child(root: &Path, relative: &Path) -> Result<PathBuf, TaskError> {
        let ok = !relative.as_os_str().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !ok {
            return Err(TaskError::PathTraversal {
                attempted: relative.display().to_string(),
            });
        }
        Ok(root.join(relative))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the tree now, reporting failure.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TempDir`] if the tree cannot be removed.
    pub fn remove(mut self) -> Result<(), TaskError> {
        self.cleanup_on_drop = false;
        if !self.path.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&self.path).map_err(|source| TaskError::TempDir {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl Drop for TempTree {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temp tree");
            }
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// What a task produced for its package.
#[derive(Debug, Default)]
pub struct TaskOutcome {
    /// Enriched records, vetoed ones included.
    pub apps: Vec<App>,

    /// Whether the package was found unusable (no plugin match or a
    /// content error).
    pub ignored: bool,
}

impl TaskOutcome {
    fn ignored() -> Self {
        Self {
            apps: Vec::new(),
            ignored: true,
        }
    }
}

/// Settings shared by all tasks of a build.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Root below which each task creates its own tree.
    pub temp_root: PathBuf,
    /// Screenshot output directory; screenshots are copied out before the
    /// temp tree is removed.
    pub screenshot_dir: Option<PathBuf>,
    pub mirror_uri: Option<String>,
    pub no_network: bool,
    /// Remove temp trees when a task ends.
    pub cleanup: bool,
}

/// Processes one package. Borrowed from the context for each package.
pub struct Task<'a> {
    loader: &'a PluginLoader,
    globs: &'a GlobSet,
    settings: &'a TaskSettings,
}

/// Turns a package error into the task's verdict: fatal errors propagate,
/// the rest are logged and mark the package as ignored.
fn triage(package: &Package, step: &str, err: PackageError) -> Result<(), TaskError> {
    if err.is_fatal() {
        return Err(TaskError::Package {
            package: package.nevra().to_string(),
            source: err,
        });
    }
    package.log(LogLevel::Warning, &format!("Failed to {}: {}", step, err));
    warn!(package = %package.basename(), step, error = %err, "Package skipped");
    Ok(())
}

impl<'a> Task<'a> {
    pub fn new(loader: &'a PluginLoader, globs: &'a GlobSet, settings: &'a TaskSettings) -> Self {
        Self {
            loader,
            globs,
            settings,
        }
    }

    /// Runs the task for `packages[index]`. Other enabled packages may be
    /// exploded into the same tree as auxiliary packages.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] only for failures of the build environment.
    pub fn process(
        &self,
        packages: &mut [Package],
        index: usize,
    ) -> Result<TaskOutcome, TaskError> {
        // 1. identity
        if let Err(e) = packages[index].ensure(EnsureFlags::NEVRA) {
            triage(&packages[index], "resolve identity", e)?;
            return Ok(TaskOutcome::ignored());
        }
        let package_name = packages[index].name().to_string();
        info!(package = %packages[index].nevra(), "Processing package");
        packages[index].log(
            LogLevel::Debug,
            &format!("Getting filename match for {}", packages[index].basename()),
        );

        let tree = TempTree::recreate(
            &self.settings.temp_root,
            packages[index].nevr(),
            self.settings.cleanup,
        )?;

        let produced = match packages[index].kind() {
            // 2. prebuilt metadata archive
            PackageKind::Firmware => self.process_archive(&mut packages[index], &tree)?,
            _ => {
                // 3. plugin selection
                if let Err(e) = packages[index].ensure(EnsureFlags::FILES | EnsureFlags::DEPS) {
                    triage(&packages[index], "read file list", e)?;
                    self.cleanup(&mut packages[index], tree, EnsureFlags::empty())?;
                    return Ok(TaskOutcome::ignored());
                }
                let selected = self.select_plugins(&packages[index]);
                if selected.is_empty() {
                    debug!(package = %package_name, "No plugin matched");
                    packages[index].log(LogLevel::Debug, "No plugins matched any file");
                    self.cleanup(&mut packages[index], tree, EnsureFlags::CLEARABLE)?;
                    return Ok(TaskOutcome::ignored());
                }

                // 4. extraction
                if let Err(e) = packages[index].explode(tree.path(), Some(self.globs)) {
                    triage(&packages[index], "explode", e)?;
                    self.cleanup(&mut packages[index], tree, EnsureFlags::CLEARABLE)?;
                    return Ok(TaskOutcome::ignored());
                }
                self.explode_auxiliary(packages, index, tree.path())?;

                // 5. extraction dispatch
                let package = &packages[index];
                let mut produced = Vec::new();
                for plugin in &selected {
                    package.log(
                        LogLevel::Debug,
                        &format!("Processing {} with {}", package.basename(), plugin.name()),
                    );
                    match plugin.process(package, tree.path()) {
                        Ok(apps) => produced.extend(apps),
                        Err(e) => {
                            package.log(
                                LogLevel::Warning,
                                &format!("Failed to run process '{}': {}", plugin.name(), e),
                            );
                            warn!(plugin = plugin.name(), error = %e, "Plugin process failed");
                        }
                    }
                }
                produced
            }
        };

        // 6. enrichment
        let apps = self.enrich(&mut packages[index], index, produced, tree.path())?;

        // 7. cleanup
        let held = match packages[index].kind() {
            PackageKind::Firmware => EnsureFlags::empty(),
            _ => EnsureFlags::CLEARABLE,
        };
        self.cleanup(&mut packages[index], tree, held)?;

        let ignored = apps.iter().all(App::is_vetoed);
        Ok(TaskOutcome { apps, ignored })
    }

    /// Distinct plugins matching any file, in dispatch order.
    fn select_plugins(&self, package: &Package) -> Vec<&'a dyn Plugin> {
        let mut selected: Vec<&'a dyn Plugin> = Vec::new();
        for file in package.filelist() {
            if let Some(plugin) = self.loader.match_filename(file) {
                if !selected.iter().any(|p| p.name() == plugin.name()) {
                    selected.push(plugin);
                }
            }
        }
        selected
    }

    /// Explodes a whole firmware archive and reads its metainfo files.
    fn process_archive(
        &self,
        package: &mut Package,
        tree: &TempTree,
    ) -> Result<Vec<App>, TaskError> {
        if let Err(e) = package.explode(tree.path(), None) {
            triage(package, "explode archive", e)?;
            return Ok(Vec::new());
        }
        let mut apps = Vec::new();
        for entry in WalkDir::new(tree.path()).into_iter().filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".metainfo.xml") {
                continue;
            }
            match catalog::read_component_file(entry.path()) {
                Ok(mut app) => {
                    if app.kind == AppKind::Unknown {
                        app.kind = AppKind::Firmware;
                    }
                    apps.push(app);
                }
                Err(e) => package.log(
                    LogLevel::Warning,
                    &format!("Failed to parse {}: {}", name, e),
                ),
            }
        }
        Ok(apps)
    }

    /// Explodes sibling packages the primary depends on and folds the
    /// dependencies of same-source siblings into the primary's list.
    fn explode_auxiliary(
        &self,
        packages: &mut [Package],
        index: usize,
        dest: &Path,
    ) -> Result<(), TaskError> {
        let own_name = packages[index].name().to_string();
        if let Err(e) = packages[index].ensure(EnsureFlags::SOURCE) {
            triage(&packages[index], "read source package", e)?;
        }
        let own_source = packages[index].source_nevra().map(str::to_string);

        let mut seen: HashSet<String> = IGNORED_DEPS.iter().map(|d| d.to_string()).collect();
        seen.insert(own_name.clone());
        let mut worklist: VecDeque<String> = packages[index].deps().iter().cloned().collect();
        let mut to_explode: Vec<usize> = Vec::new();

        while let Some(dep) = worklist.pop_front() {
            if dep.contains(' ') || dep.contains(".so") || dep.starts_with('/') {
                continue;
            }
            let (name, same_source) = if ICON_THEME_TRIGGERS.contains(&dep.as_str()) {
                (ICON_THEME.to_string(), false)
            } else {
                (dep, true)
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(aux) = packages
                .iter()
                .position(|p| p.enabled() && p.name() == name)
                .filter(|&j| j != index)
            else {
                continue;
            };

            if same_source {
                if let Err(e) = packages[aux].ensure(EnsureFlags::SOURCE | EnsureFlags::DEPS) {
                    triage(&packages[aux], "read auxiliary package", e)?;
                    continue;
                }
                if packages[aux].source_nevra() != own_source.as_deref() {
                    packages[aux].clear(EnsureFlags::DEPS);
                    continue;
                }
                let extra: Vec<String> = packages[aux].deps().to_vec();
                packages[aux].clear(EnsureFlags::DEPS);
                worklist.extend(extra.iter().cloned());
                packages[index].add_deps(extra);
            }
            to_explode.push(aux);
        }

        for aux in to_explode {
            let aux_name = packages[aux].name().to_string();
            packages[index].log(
                LogLevel::Info,
                &format!("Adding extra package {} for {}", aux_name, own_name),
            );
            if let Err(e) = packages[aux].explode(dest, Some(self.globs)) {
                packages[index].log(
                    LogLevel::Warning,
                    &format!("Failed to explode extra file: {}", e),
                );
                if e.is_fatal() {
                    return Err(TaskError::Package {
                        package: packages[aux].nevra().to_string(),
                        source: e,
                    });
                }
            }
            packages[aux].close().map_err(|source| TaskError::Package {
                package: aux_name,
                source,
            })?;
        }
        Ok(())
    }

    /// Attaches package metadata to each record and runs the refine hooks.
    fn enrich(
        &self,
        package: &mut Package,
        index: usize,
        produced: Vec<App>,
        tmpdir: &Path,
    ) -> Result<Vec<App>, TaskError> {
        if produced.is_empty() {
            return Ok(produced);
        }
        let wanted = EnsureFlags::LICENSE
            | EnsureFlags::RELEASES
            | EnsureFlags::VCS
            | EnsureFlags::URL
            | EnsureFlags::SOURCE;
        if let Err(e) = package.ensure(wanted) {
            triage(package, "read package metadata", e)?;
        }
        let package = &*package;

        let mut apps = Vec::new();
        for mut app in produced {
            if app.id.is_empty() {
                package.log(
                    LogLevel::Info,
                    &format!("app id not set for {}", package.name()),
                );
                continue;
            }

            app.origin = Some(origin_for(package, index));
            if package.kind() != PackageKind::Bundle {
                app.add_pkgname(package.name());
            }

            if let Some(url) = package.url() {
                if app.url("homepage").is_none() {
                    app.set_url("homepage", url);
                }
            }
            if app.project_license.is_none() {
                app.project_license = package.license().map(str::to_string);
            }
            if let Some(source) = package.source_pkgname() {
                if source != package.name() {
                    app.source_pkgname = Some(source.to_string());
                }
            }
            if app.kind != AppKind::Addon {
                for release in package.releases() {
                    app.add_release(release.clone());
                }
            }

            if let Err(e) = self.loader.dispatch_process_app(package, &mut app, tmpdir) {
                package.log(
                    LogLevel::Warning,
                    &format!("Failed to run process on {}: {}", app.id, e),
                );
                warn!(app = %app.id, error = %e, "Refine failed, record dropped");
                continue;
            }

            for reason in std::mem::take(&mut app.requires_appdata) {
                if reason.is_empty() {
                    app.add_veto("Required AppData");
                } else {
                    app.add_veto(format!("Required AppData: {}", reason));
                }
            }

            if let Some(vcs) = package.vcs() {
                app.add_metadata("X-VCS", vcs);
            }
            app.add_metadata("X-CacheID", &cache_id_for_filename(package.basename()));

            if !app.is_vetoed() {
                if let Some(dir) = &self.settings.screenshot_dir {
                    let mirror = if self.settings.no_network {
                        None
                    } else {
                        self.settings.mirror_uri.as_deref()
                    };
                    if let Err(e) = resources::save_screenshots(&mut app, dir, mirror) {
                        package.log(
                            LogLevel::Warning,
                            &format!("Failed to save resources: {}", e),
                        );
                        continue;
                    }
                }
            }

            package.log(LogLevel::Debug, &format!("Added {}", app.id));
            apps.push(app);
        }
        Ok(apps)
    }

    fn cleanup(
        &self,
        package: &mut Package,
        tree: TempTree,
        held: EnsureFlags,
    ) -> Result<(), TaskError> {
        if self.settings.cleanup {
            tree.remove()?;
        }
        package.flush_log().map_err(|source| TaskError::Log {
            package: package.name().to_string(),
            source,
        })?;
        package.clear(held);
        package.close().map_err(|source| TaskError::Package {
            package: package.nevra().to_string(),
            source,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::MemoryPackage;
    use crate::model::Icon;
    use crate::traits::PluginError;

    /// Emits one record per desktop file and records which files it saw.
    struct DesktopFiles;

    impl Plugin for DesktopFiles {
        fn name(&self) -> &'static str {
            "desktop-files"
        }

        fn add_globs(&self, globs: &mut Vec<String>) {
            globs.push("/usr/share/applications/*.desktop".to_string());
            globs.push("/usr/share/pixmaps/*".to_string());
        }

        fn check_filename(&self, filename: &str) -> bool {
            filename.starts_with("/usr/share/applications/") && filename.ends_with(".desktop")
        }

        fn process(&self, _package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
            let dir = tmpdir.join("usr/share/applications");
            let mut apps = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let id = entry.file_name().to_string_lossy().into_owned();
                let mut app = App::new(&id, AppKind::Desktop);
                app.set_name("C", "Name");
                app.set_summary("C", "Summary");
                if tmpdir.join("usr/share/pixmaps/theme.png").exists() {
                    app.add_icon(Icon::stock("theme"));
                }
                apps.push(app);
            }
            Ok(apps)
        }
    }

    fn setup() -> (PluginLoader, GlobSet, TaskSettings, tempfile::TempDir) {
        let mut loader = PluginLoader::with_plugins(vec![Box::new(DesktopFiles)]);
        loader.setup(&Default::default()).unwrap();
        let globs = GlobSet::new(loader.globs());
        let dir = tempfile::tempdir().unwrap();
        let settings = TaskSettings {
            temp_root: dir.path().join("tmp"),
            screenshot_dir: None,
            mirror_uri: None,
            no_network: true,
            cleanup: true,
        };
        (loader, globs, settings, dir)
    }

    #[test]
    fn test_no_matching_plugin_is_ignored() {
        let (loader, globs, settings, _dir) = setup();
        let mut packages = vec![Package::memory(
            MemoryPackage::new("lib", "1", "1", "x86_64").file("/usr/lib/libfoo.so.1", b"elf"),
        )];
        let outcome = Task::new(&loader, &globs, &settings)
            .process(&mut packages, 0)
            .unwrap();
        assert!(outcome.ignored);
        assert!(outcome.apps.is_empty());
        assert!(!settings.temp_root.join("lib-1-1").exists());
    }

    #[test]
    fn test_enrichment_from_package() {
        let (loader, globs, settings, _dir) = setup();
        let mut packages = vec![Package::memory(
            MemoryPackage::new("app", "1.0", "1", "noarch")
                .file("/usr/share/applications/app.desktop", b"[Desktop Entry]\n")
                .license("GPL-2.0+")
                .url("https://example.com")
                .vcs("git://example.com/app")
                .source("app-src")
                .history("1.0", 1_400_000_000),
        )];
        let outcome = Task::new(&loader, &globs, &settings)
            .process(&mut packages, 0)
            .unwrap();

        assert!(!outcome.ignored);
        let app = &outcome.apps[0];
        assert_eq!(app.id, "app.desktop");
        assert_eq!(app.pkgnames, ["app"]);
        assert_eq!(app.project_license.as_deref(), Some("GPL-2.0+"));
        assert_eq!(app.url("homepage"), Some("https://example.com"));
        assert_eq!(app.source_pkgname.as_deref(), Some("app-src"));
        assert_eq!(app.releases.len(), 1);
        assert_eq!(app.metadata_item("X-VCS"), Some("git://example.com/app"));
        assert_eq!(app.metadata_item("X-CacheID"), Some("app-1.0-1.noarch:1"));
        assert_eq!(app.origin.as_ref().unwrap().nevr, "app-1.0-1");
        assert!(!packages[0].is_ensured(EnsureFlags::FILES));
    }

    #[test]
    fn test_auxiliary_same_source_is_exploded() {
        let (loader, globs, settings, _dir) = setup();
        let mut packages = vec![
            Package::memory(
                MemoryPackage::new("app", "1", "1", "noarch")
                    .file("/usr/share/applications/app.desktop", b"x")
                    .dep("app-data")
                    .dep("libc.so.6")
                    .dep("rtld"),
            ),
            Package::memory(
                MemoryPackage::new("app-data", "1", "1", "noarch")
                    .source("app")
                    .file("/usr/share/pixmaps/theme.png", b"png")
                    .dep("app-extra"),
            ),
            Package::memory(MemoryPackage::new("app-extra", "1", "1", "noarch").source("app")),
        ];
        let outcome = Task::new(&loader, &globs, &settings)
            .process(&mut packages, 0)
            .unwrap();
        assert_eq!(outcome.apps[0].icons.len(), 1);
    }

    #[test]
    fn test_auxiliary_other_source_is_skipped() {
        let (loader, globs, settings, _dir) = setup();
        let mut packages = vec![
            Package::memory(
                MemoryPackage::new("app", "1", "1", "noarch")
                    .file("/usr/share/applications/app.desktop", b"x")
                    .dep("theme"),
            ),
            Package::memory(
                MemoryPackage::new("theme", "1", "1", "noarch")
                    .file("/usr/share/pixmaps/theme.png", b"png"),
            ),
        ];
        let outcome = Task::new(&loader, &globs, &settings)
            .process(&mut packages, 0)
            .unwrap();
        assert!(outcome.apps[0].icons.is_empty());
    }

    #[test]
    fn test_icon_theme_trigger_ignores_source() {
        let (loader, globs, settings, _dir) = setup();
        let mut packages = vec![
            Package::memory(
                MemoryPackage::new("app", "1", "1", "noarch")
                    .file("/usr/share/applications/app.desktop", b"x")
                    .dep("kde-runtime"),
            ),
            Package::memory(
                MemoryPackage::new("oxygen-icon-theme", "1", "1", "noarch")
                    .file("/usr/share/pixmaps/theme.png", b"png"),
            ),
        ];
        let outcome = Task::new(&loader, &globs, &settings)
            .process(&mut packages, 0)
            .unwrap();
        assert_eq!(outcome.apps[0].icons.len(), 1);
    }

    #[test]
    fn test_safe_child_rejects_escape() {
        let root = Path::new("/tmp/root");
        assert!(TempTree::safe_child(root, Path::new("../etc")).is_err());
        assert!(TempTree::safe_child(root, Path::new("/etc")).is_err());
        assert_eq!(
            TempTree::safe_child(root, Path::new("foo-1-1")).unwrap(),
            PathBuf::from("/tmp/root/foo-1-1")
        );
    }
}
