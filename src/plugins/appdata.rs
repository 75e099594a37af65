//! Merges upstream AppData files into records built from other sources.

use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog;
use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::{App, AppKind, Screenshot, ScreenshotImage};
use crate::plugins::id_stem;
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "appdata";

/// Directories below the exploded tree searched for `<stem>.appdata.xml`.
const APPDATA_DIRS: &[&str] = &[
    "files/share/appdata",
    "usr/share/appdata",
    "usr/share/metainfo",
    "usr/share/appdata-extra",
];

#[derive(Debug, Default)]
pub struct AppDataPlugin;

fn log_overwrite(package: &Package, property: &str, old: Option<&str>, new: &str) {
    if let Some(old) = old {
        if old != new {
            package.log(
                LogLevel::Info,
                &format!("AppData {}={}->{}", property, old, new),
            );
        }
    }
}

/// Copies what an AppData file adds on top of `app`.
fn merge_appdata(package: &Package, app: &mut App, appdata: &App) {
    for (locale, value) in &appdata.names {
        log_overwrite(package, "name", app.names.get(locale).map(String::as_str), value);
        app.names.insert(locale.clone(), value.clone());
    }
    for (locale, value) in &appdata.summaries {
        log_overwrite(package, "summary", app.summaries.get(locale).map(String::as_str), value);
        app.summaries.insert(locale.clone(), value.clone());
    }
    for (locale, blocks) in &appdata.descriptions {
        app.descriptions.insert(locale.clone(), blocks.clone());
    }
    if appdata.descriptions.len() == 1 {
        package.log(LogLevel::Warning, "AppData 'description' has no translations");
    }
    for (kind, url) in &appdata.urls {
        log_overwrite(package, "url", app.url(kind), url);
        app.set_url(kind, url);
    }
    if let Some(license) = &appdata.project_license {
        app.project_license = Some(license.clone());
    }
    if let Some(developer) = &appdata.developer_name {
        app.developer_name = Some(developer.clone());
    }
    if app.screenshots.is_empty() {
        app.screenshots.extend(appdata.screenshots.iter().cloned());
    } else if !appdata.screenshots.is_empty() {
        package.log(LogLevel::Info, "AppData screenshots ignored");
    }
    for (key, value) in &appdata.metadata {
        log_overwrite(package, "metadata", app.metadata_item(key), value);
        app.add_metadata(key, value);
    }
    for release in &appdata.releases {
        app.add_release(release.clone());
    }
    for provide in &appdata.provides {
        app.add_provide(&provide.kind, &provide.value);
    }
    for kudo in &appdata.kudos {
        app.add_kudo(kudo);
    }
    for category in &appdata.categories {
        app.add_category(category);
    }
}

/// Screenshots shipped out of tree in `<dir>/<stem>/`, in filename order.
fn extra_screenshots(dir: &Path, stem: &str) -> Vec<Screenshot> {
    let Ok(entries) = fs::read_dir(dir.join(stem)) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "png"))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .enumerate()
        .map(|(n, path)| Screenshot {
            is_default: n == 0,
            caption: None,
            images: vec![ScreenshotImage {
                url: path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                width: 0,
                height: 0,
                source: Some(path),
            }],
        })
        .collect()
}

impl AppDataPlugin {
    fn find(&self, package: &Package, tmpdir: &Path, stem: &str) -> Option<PathBuf> {
        let file = format!("{}.appdata.xml", stem);
        APPDATA_DIRS
            .iter()
            .map(|dir| tmpdir.join(dir).join(&file))
            .chain(package.config("AppDataExtra").map(|d| Path::new(d).join(&file)))
            .find(|p| p.is_file())
    }
}

impl Plugin for AppDataPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.push("/usr/share/appdata/*.appdata.xml".to_string());
        globs.push("/usr/share/metainfo/*.appdata.xml".to_string());
    }

    fn process_app(
        &self,
        package: &Package,
        app: &mut App,
        tmpdir: &Path,
    ) -> Result<(), PluginError> {
        let stem = id_stem(&app.id).to_string();

        if let Some(dir) = package.config("ScreenshotsExtra") {
            let extra = extra_screenshots(Path::new(dir), &stem);
            if !extra.is_empty() {
                package.log(
                    LogLevel::Debug,
                    &format!("Adding {} extra screenshots to {}", extra.len(), app.id),
                );
                app.screenshots = extra;
            }
        }

        let Some(path) = self.find(package, tmpdir, &stem) else {
            if app.kind == AppKind::Desktop && app.metadata_item("NoDisplay").is_none() {
                package.log(
                    LogLevel::Warning,
                    &format!("desktop application {} has no AppData", app.id),
                );
            }
            return Ok(());
        };

        let appdata = catalog::read_component_file(&path).map_err(|e| {
            PluginError::failed(
                PLUGIN,
                format!("AppData file '{}' invalid: {}", path.display(), e),
            )
        })?;
        if appdata.id.is_empty() {
            package.log(
                LogLevel::Warning,
                &format!("AppData {} has no ID", path.display()),
            );
        } else if appdata.id != app.id {
            package.log(
                LogLevel::Warning,
                &format!(
                    "AppData {} does not match '{}':'{}'",
                    path.display(),
                    appdata.id,
                    app.id
                ),
            );
        }

        merge_appdata(package, app, &appdata);
        app.requires_appdata.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::MemoryPackage;
    use crate::model::LOCALE_C;

    const APPDATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<component type="desktop">
  <id>panel.desktop</id>
  <project_license>GPL-2.0+</project_license>
  <summary>Configure the panel</summary>
  <description><p>Panel settings.</p></description>
  <url type="homepage">https://example.org/panel</url>
  <screenshots>
    <screenshot type="default"><image>https://example.org/shot.png</image></screenshot>
  </screenshots>
  <releases><release version="1.2" timestamp="1400000000"/></releases>
  <update_contact>someone@example.org</update_contact>
</component>
"#;

    fn needs_appdata() -> App {
        let mut app = App::new("panel.desktop", AppKind::Desktop);
        app.set_summary(LOCALE_C, "Panel");
        app.requires_appdata.push("NoDisplay=true".to_string());
        app
    }

    #[test]
    fn test_merge_clears_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let appdata_dir = dir.path().join("usr/share/appdata");
        fs::create_dir_all(&appdata_dir).unwrap();
        fs::write(appdata_dir.join("panel.appdata.xml"), APPDATA).unwrap();

        let package = Package::memory(MemoryPackage::new("panel", "1", "1", "noarch"));
        let mut app = needs_appdata();
        AppDataPlugin.process_app(&package, &mut app, dir.path()).unwrap();

        assert!(app.requires_appdata.is_empty());
        assert_eq!(app.summary(), Some("Configure the panel"));
        assert_eq!(app.project_license.as_deref(), Some("GPL-2.0+"));
        assert_eq!(app.url("homepage"), Some("https://example.org/panel"));
        assert_eq!(app.screenshots.len(), 1);
        assert_eq!(app.releases[0].version, "1.2");
        assert!(package.log_contents().contains("AppData summary=Panel->Configure the panel"));
    }

    #[test]
    fn test_extra_dirs_from_package_config() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra");
        fs::create_dir_all(&extra).unwrap();
        fs::write(extra.join("panel.appdata.xml"), APPDATA).unwrap();
        let shots = dir.path().join("shots/panel");
        fs::create_dir_all(&shots).unwrap();
        fs::write(shots.join("a.png"), b"png").unwrap();

        let mut package = Package::memory(MemoryPackage::new("panel", "1", "1", "noarch"));
        package.set_config("AppDataExtra", &extra.display().to_string());
        package.set_config("ScreenshotsExtra", &dir.path().join("shots").display().to_string());

        let mut app = needs_appdata();
        AppDataPlugin
            .process_app(&package, &mut app, &dir.path().join("tree"))
            .unwrap();
        assert!(app.requires_appdata.is_empty());
        // extra screenshots take precedence over the AppData ones
        assert_eq!(app.screenshots.len(), 1);
        assert_eq!(app.screenshots[0].images[0].url, "a.png");
        assert!(app.screenshots[0].images[0].source.is_some());
    }

    #[test]
    fn test_missing_appdata_keeps_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let package = Package::memory(MemoryPackage::new("panel", "1", "1", "noarch"));
        let mut app = needs_appdata();
        AppDataPlugin.process_app(&package, &mut app, dir.path()).unwrap();
        assert_eq!(app.requires_appdata, ["NoDisplay=true"]);
    }
}
