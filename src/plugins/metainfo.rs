//! Addon and font metainfo files, and absorbing addons into their parent.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::catalog;
use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::{App, AppKind};
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "metainfo";

const METAINFO_GLOBS: &[&str] = &[
    "/usr/share/appdata/*.metainfo.xml",
    "/usr/share/metainfo/*.metainfo.xml",
];

/// Marks an addon to be folded into the record it names.
pub const MERGE_WITH_PARENT: &str = "X-Merge-With-Parent";

#[derive(Debug, Default)]
pub struct MetainfoPlugin;

fn matches_metainfo(filename: &str) -> bool {
    METAINFO_GLOBS.iter().any(|g| {
        glob::Pattern::new(g)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    })
}

/// Marks every addon shipped in the same package as a desktop application
/// for absorption into that application.
fn mark_same_package_addons(apps: &mut [App]) {
    let parents: Vec<(String, String)> = apps
        .iter()
        .filter(|a| a.kind == AppKind::Desktop && !a.is_vetoed())
        .filter_map(|a| Some((a.pkgname_default()?.to_string(), a.id.clone())))
        .collect();
    for (pkgname, parent) in parents {
        for app in apps.iter_mut() {
            if app.kind != AppKind::Addon || app.is_vetoed() {
                continue;
            }
            if app.pkgname_default() != Some(pkgname.as_str()) {
                continue;
            }
            debug!(addon = %app.id, parent = %parent, "Marking addon for absorption");
            app.add_metadata(MERGE_WITH_PARENT, &parent);
        }
    }
}

impl Plugin for MetainfoPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.extend(METAINFO_GLOBS.iter().map(|g| g.to_string()));
    }

    fn check_filename(&self, filename: &str) -> bool {
        matches_metainfo(filename)
    }

    fn process(&self, package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        let mut apps = Vec::new();
        for filename in package.filelist().iter().filter(|f| matches_metainfo(f)) {
            let path = tmpdir.join(filename.trim_start_matches('/'));
            let mut app = catalog::read_component_file(&path).map_err(|e| {
                PluginError::failed(PLUGIN, format!("Failed to parse {}: {}", filename, e))
            })?;
            if app.kind == AppKind::Unknown {
                app.kind = AppKind::Addon;
            }
            if !matches!(app.kind, AppKind::Addon | AppKind::Font) {
                return Err(PluginError::failed(
                    PLUGIN,
                    format!("{} is not an addon or font", app.id),
                ));
            }
            package.log(LogLevel::Debug, &format!("Found {} {}", app.kind, app.id));
            apps.push(app);
        }
        if apps.is_empty() {
            return Err(PluginError::failed(
                PLUGIN,
                format!("nothing interesting in {}", package.basename()),
            ));
        }
        Ok(apps)
    }

    fn merge(&self, apps: &mut Vec<App>) {
        mark_same_package_addons(apps);

        let index: HashMap<String, usize> = apps
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        for i in 0..apps.len() {
            let Some(target) = apps[i].metadata_item(MERGE_WITH_PARENT).map(str::to_string) else {
                continue;
            };
            let Some(&parent) = index.get(&target) else {
                apps[i].add_veto(format!("No referenced '{}'", target));
                continue;
            };
            if parent == i {
                continue;
            }
            let addon = apps[i].clone();
            apps[parent].subsume(&addon);
            let parent_id = apps[parent].id.clone();
            apps[i].add_veto(format!(
                "partially absorbing {} into {}",
                addon.id, parent_id
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{EnsureFlags, MemoryPackage};
    use std::fs;

    fn addon(id: &str, pkgname: &str) -> App {
        let mut app = App::new(id, AppKind::Addon);
        app.add_pkgname(pkgname);
        app
    }

    #[test]
    fn test_process_builds_addons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usr/share/metainfo");
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join("app-extra.metainfo.xml"),
            r#"<component type="addon"><id>app-extra</id><extends>app.desktop</extends>
<name>Extra</name><summary>More things</summary></component>"#,
        )
        .unwrap();

        let mut package = Package::memory(
            MemoryPackage::new("app-extra", "1", "1", "noarch")
                .file("/usr/share/metainfo/app-extra.metainfo.xml", b""),
        );
        package.ensure(EnsureFlags::FILES).unwrap();

        let apps = MetainfoPlugin.process(&package, dir.path()).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].kind, AppKind::Addon);
        assert_eq!(apps[0].extends, ["app.desktop"]);
    }

    #[test]
    fn test_merge_absorbs_same_package_addon() {
        let mut parent = App::new("app.desktop", AppKind::Desktop);
        parent.add_pkgname("app");
        let mut same = addon("app-plugin", "app");
        same.add_kudo("UserDocs");
        let other = addon("other-plugin", "other");
        let mut apps = vec![parent, same, other];

        MetainfoPlugin.merge(&mut apps);

        assert!(apps[0].has_kudo("UserDocs"));
        assert_eq!(
            apps[1].vetoes,
            ["partially absorbing app-plugin into app.desktop"]
        );
        assert!(!apps[2].is_vetoed());
    }

    #[test]
    fn test_merge_vetoes_missing_reference() {
        let mut orphan = addon("orphan", "orphan");
        orphan.add_metadata(MERGE_WITH_PARENT, "gone.desktop");
        let mut apps = vec![orphan];
        MetainfoPlugin.merge(&mut apps);
        assert_eq!(apps[0].vetoes, ["No referenced 'gone.desktop'"]);
    }

    #[test]
    fn test_process_accepts_fonts_and_rejects_desktop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usr/share/metainfo");
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join("dejavu.metainfo.xml"),
            r#"<component type="font"><id>dejavu</id><name>DejaVu</name></component>"#,
        )
        .unwrap();
        fs::write(
            path.join("gedit.metainfo.xml"),
            r#"<component type="desktop"><id>gedit.desktop</id></component>"#,
        )
        .unwrap();

        let mut fonts = Package::memory(
            MemoryPackage::new("dejavu-fonts", "2.34", "1", "noarch")
                .file("/usr/share/metainfo/dejavu.metainfo.xml", b""),
        );
        fonts.ensure(EnsureFlags::FILES).unwrap();
        let apps = MetainfoPlugin.process(&fonts, dir.path()).unwrap();
        assert_eq!(apps[0].kind, AppKind::Font);

        let mut desktop = Package::memory(
            MemoryPackage::new("gedit", "3.14", "1", "noarch")
                .file("/usr/share/metainfo/gedit.metainfo.xml", b""),
        );
        desktop.ensure(EnsureFlags::FILES).unwrap();
        assert!(MetainfoPlugin.process(&desktop, dir.path()).is_err());
    }
}
