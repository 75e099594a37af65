//! GNOME Shell extensions, described by their `metadata.json`.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::config::ContextConfig;
use crate::harvest::Package;
use crate::model::{App, AppKind, DescriptionBlock, Icon, Release, LOCALE_C};
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "shell-extension";

const EXTENSION_GLOB: &str = "/usr/share/gnome-shell/extensions/*/metadata.json";

const EXTENSION_ICON: &str = "application-x-addon-symbolic";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ExtensionMetadata {
    uuid: Option<String>,
    name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(default)]
    original_authors: Vec<String>,
    #[serde(default)]
    shell_version: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ShellExtensionPlugin {
    add_default_icons: bool,
}

fn matches_extension(filename: &str) -> bool {
    glob::Pattern::new(EXTENSION_GLOB)
        .map(|p| p.matches(filename))
        .unwrap_or(false)
}

/// Component id from an extension uuid: anything outside `[A-Za-z0-9._-]`
/// becomes `_`.
fn id_from_uuid(uuid: &str) -> String {
    uuid.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Plain text to paragraphs, split on blank lines.
fn paragraphs(text: &str) -> Vec<DescriptionBlock> {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .map(DescriptionBlock::Paragraph)
        .collect()
}

impl ShellExtensionPlugin {
    fn parse(&self, data: &str) -> Result<App, PluginError> {
        let metadata: ExtensionMetadata = serde_json::from_str(data)
            .map_err(|e| PluginError::failed(PLUGIN, format!("invalid metadata: {}", e)))?;

        let mut app = App::new("", AppKind::ShellExtension);
        app.set_summary(LOCALE_C, "GNOME Shell Extension");
        if self.add_default_icons {
            app.add_category("Addons");
            app.add_category("ShellExtensions");
        }
        if let Some(uuid) = &metadata.uuid {
            app.id = id_from_uuid(uuid);
            app.add_metadata("shell-extensions::uuid", uuid);
        }
        if let Some(name) = &metadata.name {
            app.set_name(LOCALE_C, name);
        }
        if let Some(description) = &metadata.description {
            let blocks = paragraphs(description);
            if !blocks.is_empty() {
                app.descriptions.insert(LOCALE_C.to_string(), blocks);
            }
        }
        if let Some(url) = &metadata.url {
            app.set_url("homepage", url);
        }
        if let Some(author) = metadata.original_authors.first() {
            app.developer_name = Some(author.clone());
        }
        if let Some(version) = metadata.shell_version.first() {
            app.add_release(Release::new(version, 0));
        }
        if self.add_default_icons {
            app.add_icon(Icon::stock(EXTENSION_ICON));
        }
        Ok(app)
    }
}

impl Plugin for ShellExtensionPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn initialize(&mut self, config: &ContextConfig) -> Result<(), PluginError> {
        self.add_default_icons = config.flags.add_default_icons;
        Ok(())
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.push(EXTENSION_GLOB.to_string());
    }

    fn check_filename(&self, filename: &str) -> bool {
        matches_extension(filename)
    }

    fn process(&self, package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        let mut apps = Vec::new();
        for filename in package.filelist().iter().filter(|f| matches_extension(f)) {
            let data = fs::read_to_string(tmpdir.join(filename.trim_start_matches('/')))?;
            let app = self.parse(&data)?;
            debug!(package = %package.name(), app = %app.id, "Found shell extension");
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{EnsureFlags, MemoryPackage};

    const METADATA: &str = r#"{
  "uuid": "alternate-tab@gnome-shell-extensions.gcampax.github.com",
  "name": "AlternateTab",
  "description": "Substitute Alt-Tab with a window based switcher.\n\nNo grouping.",
  "url": "https://git.gnome.org/browse/gnome-shell-extensions",
  "original-authors": ["jw@bargsten.org", "thomas.bouffon@gmail.com"],
  "shell-version": ["3.14", "3.12"],
  "gettext-domain": "gnome-shell-extensions"
}"#;

    #[test]
    fn test_id_from_uuid() {
        assert_eq!(
            id_from_uuid("alternate-tab@gnome-shell-extensions.gcampax.github.com"),
            "alternate-tab_gnome-shell-extensions.gcampax.github.com"
        );
    }

    #[test]
    fn test_process_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let member = "/usr/share/gnome-shell/extensions/alternate-tab/metadata.json";
        let path = dir.path().join(member.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, METADATA).unwrap();

        let mut package = Package::memory(
            MemoryPackage::new("gnome-shell-extension-alternate-tab", "3.14", "1", "noarch")
                .file(member, b""),
        );
        package.ensure(EnsureFlags::FILES).unwrap();

        let mut plugin = ShellExtensionPlugin::default();
        let config = ContextConfig {
            flags: crate::config::BuildFlags {
                add_default_icons: true,
                ..Default::default()
            },
            ..Default::default()
        };
        plugin.initialize(&config).unwrap();
        let apps = plugin.process(&package, dir.path()).unwrap();

        let app = &apps[0];
        assert_eq!(app.kind, AppKind::ShellExtension);
        assert_eq!(app.id, "alternate-tab_gnome-shell-extensions.gcampax.github.com");
        assert_eq!(app.name(), Some("AlternateTab"));
        assert_eq!(app.summary(), Some("GNOME Shell Extension"));
        assert_eq!(app.descriptions[LOCALE_C].len(), 2);
        assert_eq!(app.developer_name.as_deref(), Some("jw@bargsten.org"));
        assert_eq!(app.releases[0].version, "3.14");
        assert!(app.has_category("ShellExtensions"));
        assert_eq!(app.icons[0].name, EXTENSION_ICON);
    }

    #[test]
    fn test_process_rejects_invalid_json() {
        let plugin = ShellExtensionPlugin::default();
        assert!(plugin.parse("{ not json").is_err());
    }
}
