//! Desktop entry files.
//!
//! One desktop application record per `.desktop` file, with its icon
//! looked up in the exploded tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ContextConfig;
use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::{App, AppKind, Icon, LOCALE_C};
use crate::plugins::id_stem;
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "desktop";

const DESKTOP_GLOBS: &[&str] = &[
    "/usr/share/applications/*.desktop",
    "/usr/share/applications/kde4/*.desktop",
];

/// Hicolor sizes in search order.
const ICON_SIZES: &[&str] = &[
    "64x64", "128x128", "96x96", "256x256", "scalable", "48x48", "32x32", "24x24", "16x16",
];

const ICON_EXTENSIONS: &[&str] = &[".png", ".svg", ".xpm", ".gif", ".ico", ""];

/// Extensions that veto a record, with the name used in the veto.
const LEGACY_ICON_FORMATS: &[(&str, &str)] = &[(".xpm", "XPM"), (".gif", "GIF"), (".ico", "ICO")];

const DEFAULT_ICON: &str = "application-x-executable";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Width and height from the `IHDR` chunk of a PNG.
fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || !data.starts_with(PNG_SIGNATURE) || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}

// ============================================================================
// Desktop entry parsing
// ============================================================================

/// The `[Desktop Entry]` group of a key file: key (with optional
/// `[locale]` suffix) to value.
#[derive(Debug, Default)]
pub struct DesktopEntry {
    values: BTreeMap<String, String>,
}

impl DesktopEntry {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        let mut in_entry = false;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_entry = line == "[Desktop Entry]";
                continue;
            }
            if !in_entry {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values
                    .entry(key.trim().to_string())
                    .or_insert_with(|| value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// `;`-separated list value.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every value of `key`, keyed by locale (`C` for the plain key).
    pub fn localized(&self, key: &str) -> BTreeMap<String, String> {
        let prefix = format!("{}[", key);
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .filter_map(|(k, v)| {
                if k == key {
                    Some((LOCALE_C.to_string(), v.clone()))
                } else {
                    k.strip_prefix(&prefix)
                        .and_then(|rest| rest.strip_suffix(']'))
                        .map(|locale| (locale.to_string(), v.clone()))
                }
            })
            .collect()
    }
}

// ============================================================================
// Plugin
// ============================================================================

#[derive(Debug, Default)]
pub struct DesktopPlugin {
    hidpi_icons: bool,
    ignore_legacy_icons: bool,
    ignore_settings: bool,
    add_default_icons: bool,
    min_icon_size: u32,
}

fn matches_desktop(filename: &str) -> bool {
    DESKTOP_GLOBS.iter().any(|g| {
        glob::Pattern::new(g)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    })
}

impl DesktopPlugin {
    fn search_sizes(&self) -> impl Iterator<Item = &'static str> + '_ {
        ICON_SIZES.iter().copied().filter(move |size| {
            size.split_once('x')
                .and_then(|(w, _)| w.parse::<u32>().ok())
                .map_or(true, |w| w >= self.min_icon_size)
        })
    }

    /// Finds the file an `Icon=` key refers to inside the exploded tree.
    fn find_icon(&self, tmpdir: &Path, key: &str) -> Option<PathBuf> {
        if key.starts_with('/') {
            let path = tmpdir.join(key.trim_start_matches('/'));
            return path.is_file().then_some(path);
        }
        for ext in ICON_EXTENSIONS {
            let file = format!("{}{}", key, ext);
            let mut candidates: Vec<PathBuf> = self
                .search_sizes()
                .map(|size| {
                    tmpdir
                        .join("usr/share/icons/hicolor")
                        .join(size)
                        .join("apps")
                        .join(&file)
                })
                .collect();
            candidates.push(tmpdir.join("usr/share/pixmaps").join(&file));
            candidates.push(tmpdir.join("usr/share/icons").join(&file));
            if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
                return Some(found);
            }
        }
        None
    }

    fn attach_icon(
        &self,
        package: &Package,
        app: &mut App,
        tmpdir: &Path,
        key: &str,
    ) -> Result<(), PluginError> {
        let Some(path) = self.find_icon(tmpdir, key) else {
            if !key.contains('/') && !key.contains('.') {
                package.log(LogLevel::Debug, &format!("using stock icon {}", key));
                app.add_icon(Icon::stock(key));
                return Ok(());
            }
            return Err(PluginError::failed(PLUGIN, format!("Failed to find icon {}", key)));
        };

        let found_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.ignore_legacy_icons {
            for (ext, format) in LEGACY_ICON_FORMATS {
                if found_name.ends_with(ext) {
                    app.add_veto(format!("Uses {} icon: {}", format, key));
                }
            }
        }

        let data = fs::read(&path)?;
        if let Some((width, height)) = png_dimensions(&data) {
            if width < self.min_icon_size || height < self.min_icon_size {
                return Err(PluginError::failed(
                    PLUGIN,
                    format!("icon {} was too small {}x{}", found_name, width, height),
                ));
            }
        }

        let cache_name = format!("{}.png", id_stem(&app.id));
        let mut icon = Icon::cached(&cache_name, 64, path.clone());
        icon.data = Some(data);
        app.add_icon(icon);

        if self.hidpi_icons && !key.starts_with('/') {
            let hidpi = tmpdir
                .join("usr/share/icons/hicolor/128x128/apps")
                .join(format!("{}.png", key));
            if hidpi.is_file() {
                let mut icon = Icon::cached(&cache_name, 128, hidpi.clone());
                icon.data = Some(fs::read(&hidpi)?);
                app.icons.push(icon);
                app.add_kudo("HiDpiIcon");
            }
        }
        Ok(())
    }

    fn process_file(
        &self,
        package: &Package,
        tmpdir: &Path,
        filename: &str,
    ) -> Result<App, PluginError> {
        let path = tmpdir.join(filename.trim_start_matches('/'));
        let entry = DesktopEntry::parse(&fs::read_to_string(&path)?);
        if let Some(kind) = entry.get("Type") {
            if kind != "Application" {
                return Err(PluginError::failed(
                    PLUGIN,
                    format!("{} is not an application", filename),
                ));
            }
        }

        let id = filename.rsplit('/').next().unwrap_or(filename);
        let mut app = App::new(id, AppKind::Desktop);
        app.names = entry.localized("Name");
        app.summaries = entry.localized("Comment");
        for category in entry.get_list("Categories") {
            app.add_category(&category);
        }
        for (locale, words) in entry.localized("Keywords") {
            let words = words
                .split(';')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
            app.keywords.insert(locale, words);
        }
        app.mimetypes = entry.get_list("MimeType");

        if entry.get_bool("NoDisplay") {
            app.add_metadata("NoDisplay", "true");
            app.requires_appdata.push("NoDisplay=true".to_string());
        }
        if !self.ignore_settings {
            for category in ["Settings", "DesktopSettings"] {
                if app.has_category(category) {
                    app.requires_appdata.push(format!("Category={}", category));
                }
            }
        }

        if let Some(key) = entry.get("Icon") {
            self.attach_icon(package, &mut app, tmpdir, key)?;
        }
        if app.icons.is_empty() && self.add_default_icons {
            app.add_icon(Icon::stock(DEFAULT_ICON));
        }
        Ok(app)
    }
}

impl Plugin for DesktopPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn initialize(&mut self, config: &ContextConfig) -> Result<(), PluginError> {
        self.hidpi_icons = config.flags.hidpi_icons;
        self.ignore_legacy_icons = config.flags.ignore_legacy_icons;
        self.ignore_settings = config.flags.ignore_settings;
        self.add_default_icons = config.flags.add_default_icons;
        self.min_icon_size = config.min_icon_size;
        Ok(())
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.extend(DESKTOP_GLOBS.iter().map(|g| g.to_string()));
        globs.push("/usr/share/icons/hicolor/*/apps/*".to_string());
        globs.push("/usr/share/pixmaps/*".to_string());
        globs.push("/usr/share/icons/*".to_string());
        globs.push("/usr/share/*/icons/*".to_string());
    }

    fn check_filename(&self, filename: &str) -> bool {
        matches_desktop(filename)
    }

    fn process(&self, package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        let mut apps = Vec::new();
        for filename in package.filelist().iter().filter(|f| matches_desktop(f)) {
            match self.process_file(package, tmpdir, filename) {
                Ok(app) => apps.push(app),
                Err(e) => package.log(
                    LogLevel::Info,
                    &format!("Failed to process {}: {}", filename, e),
                ),
            }
        }
        if apps.is_empty() {
            return Err(PluginError::failed(
                PLUGIN,
                format!("nothing interesting in {}", package.basename()),
            ));
        }
        Ok(apps)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{EnsureFlags, MemoryPackage};
    use crate::model::IconKind;

    const ENTRY: &str = "\
[Desktop Entry]
Type=Application
Name=Text Editor
Name[de]=Texteditor
Comment=Edit text files
Icon=gedit
Categories=GNOME;GTK;Utility;
Keywords=text;editor;
MimeType=text/plain;

[Desktop Action new-window]
Name=New Window
";

    fn setup(flags: impl FnOnce(&mut ContextConfig)) -> (DesktopPlugin, tempfile::TempDir) {
        let mut config = ContextConfig::default();
        flags(&mut config);
        let mut plugin = DesktopPlugin::default();
        plugin.initialize(&config).unwrap();
        (plugin, tempfile::tempdir().unwrap())
    }

    fn write(root: &Path, member: &str, content: &[u8]) {
        let path = root.join(member.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn package_with(files: &[&str]) -> Package {
        let mut memory = MemoryPackage::new("gedit", "3.14", "1", "x86_64");
        for file in files {
            memory = memory.file(file, b"");
        }
        let mut package = Package::memory(memory);
        package.ensure(EnsureFlags::FILES).unwrap();
        package
    }

    #[test]
    fn test_entry_parsing() {
        let entry = DesktopEntry::parse(ENTRY);
        assert_eq!(entry.get("Name"), Some("Text Editor"));
        assert_eq!(entry.localized("Name").len(), 2);
        assert_eq!(entry.get_list("Categories"), ["GNOME", "GTK", "Utility"]);
        assert!(!entry.get_bool("NoDisplay"));
    }

    #[test]
    fn test_process_with_hicolor_icon() {
        let (plugin, dir) = setup(|c| c.flags.hidpi_icons = true);
        write(dir.path(), "/usr/share/applications/gedit.desktop", ENTRY.as_bytes());
        write(dir.path(), "/usr/share/icons/hicolor/48x48/apps/gedit.png", b"png48");
        write(dir.path(), "/usr/share/icons/hicolor/128x128/apps/gedit.png", b"png128");
        let package = package_with(&["/usr/share/applications/gedit.desktop"]);

        let apps = plugin.process(&package, dir.path()).unwrap();
        let app = &apps[0];
        assert_eq!(app.id, "gedit.desktop");
        assert_eq!(app.name(), Some("Text Editor"));
        assert_eq!(app.summary(), Some("Edit text files"));
        assert_eq!(app.keywords[LOCALE_C], ["text", "editor"]);
        assert_eq!(app.mimetypes, ["text/plain"]);

        // 128x128 is searched before 48x48
        assert_eq!(app.icons[0].kind, IconKind::Cached);
        assert_eq!(app.icons[0].name, "gedit.png");
        assert_eq!(app.icons[0].data.as_deref(), Some(&b"png128"[..]));
        assert_eq!(app.icons[1].width, 128);
        assert!(app.has_kudo("HiDpiIcon"));
    }

    #[test]
    fn test_stock_and_legacy_icons() {
        let (plugin, dir) = setup(|_| {});
        write(
            dir.path(),
            "/usr/share/applications/a.desktop",
            b"[Desktop Entry]\nName=A\nIcon=system-run\n",
        );
        write(
            dir.path(),
            "/usr/share/applications/b.desktop",
            b"[Desktop Entry]\nName=B\nIcon=b\n",
        );
        write(dir.path(), "/usr/share/pixmaps/b.xpm", b"/* XPM */");
        let package = package_with(&[
            "/usr/share/applications/a.desktop",
            "/usr/share/applications/b.desktop",
        ]);

        let apps = plugin.process(&package, dir.path()).unwrap();
        assert_eq!(apps[0].icons[0].kind, IconKind::Stock);
        assert!(!apps[0].is_vetoed());
        assert_eq!(apps[1].vetoes, ["Uses XPM icon: b"]);
    }

    #[test]
    fn test_nodisplay_and_settings_require_appdata() {
        let (plugin, dir) = setup(|_| {});
        write(
            dir.path(),
            "/usr/share/applications/panel.desktop",
            b"[Desktop Entry]\nName=Panel\nNoDisplay=true\nCategories=Settings;\n",
        );
        let package = package_with(&["/usr/share/applications/panel.desktop"]);
        let apps = plugin.process(&package, dir.path()).unwrap();
        assert_eq!(apps[0].metadata_item("NoDisplay"), Some("true"));
        assert_eq!(
            apps[0].requires_appdata,
            ["NoDisplay=true", "Category=Settings"]
        );
    }

    #[test]
    fn test_missing_icon_drops_record() {
        let (plugin, dir) = setup(|_| {});
        write(
            dir.path(),
            "/usr/share/applications/x.desktop",
            b"[Desktop Entry]\nName=X\nIcon=/opt/x/x.png\n",
        );
        let package = package_with(&["/usr/share/applications/x.desktop"]);
        assert!(plugin.process(&package, dir.path()).is_err());
        assert!(package.log_contents().contains("Failed to find icon /opt/x/x.png"));
    }

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(png_dimensions(&png_header(64, 48)), Some((64, 48)));
        assert_eq!(png_dimensions(b"not a png"), None);
    }

    #[test]
    fn test_small_icon_drops_record() {
        let (plugin, dir) = setup(|c| c.min_icon_size = 48);
        write(
            dir.path(),
            "/usr/share/applications/tiny.desktop",
            b"[Desktop Entry]\nName=Tiny\nIcon=tiny\n",
        );
        write(dir.path(), "/usr/share/pixmaps/tiny.png", &png_header(16, 16));
        let package = package_with(&["/usr/share/applications/tiny.desktop"]);

        assert!(plugin.process(&package, dir.path()).is_err());
        assert!(package
            .log_contents()
            .contains("icon tiny.png was too small 16x16"));
    }
}
