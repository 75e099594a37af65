//! IBus input method components.

use std::fs;
use std::path::Path;

use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::markup::Element;
use crate::model::{App, AppKind, Icon, LOCALE_C};
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "ibus-xml";

const IBUS_GLOB: &str = "/usr/share/ibus/component/*.xml";

#[derive(Debug, Default)]
pub struct IbusXmlPlugin;

fn matches_component(filename: &str) -> bool {
    glob::Pattern::new(IBUS_GLOB)
        .map(|p| p.matches(filename))
        .unwrap_or(false)
}

/// Drops anything before the XML declaration or the `<component>` root;
/// some components open with a bare comment.
fn trim_preamble(data: &str) -> String {
    let mut out = String::new();
    let mut found_header = false;
    for line in data.lines() {
        if line.starts_with("<?xml") || line.starts_with("<component>") {
            found_header = true;
        }
        if found_header {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn component_app(filename: &str, root: &Element) -> App {
    let id = filename.rsplit('/').next().unwrap_or(filename);
    let mut app = App::new(id, AppKind::InputMethod);
    app.add_category("Addons");
    app.add_category("InputSources");
    app.requires_appdata.push(String::new());
    app.add_icon(Icon::stock("system-run-symbolic"));

    if let Some(description) = root.find_text("description") {
        app.set_name(LOCALE_C, description);
        app.set_summary(LOCALE_C, description);
    }
    if let Some(homepage) = root.find_text("homepage") {
        app.set_url("homepage", homepage);
    }

    // the engine section is more specific than the component header
    if let Some(longname) = root.find_text("engines/engine/longname") {
        app.set_name(LOCALE_C, longname);
    }
    if let Some(description) = root.find_text("engines/engine/description") {
        app.set_summary(LOCALE_C, description);
    }
    if let Some(symbol) = root.find_text("engines/engine/symbol") {
        app.add_metadata("X-IBus-Symbol", symbol);
    }
    if let Some(languages) = root.find_text("engines/engine/language") {
        for language in languages.split(',').map(str::trim) {
            if language.is_empty() || language == "other" {
                continue;
            }
            app.add_language(language, 100);
        }
    }
    app
}

impl Plugin for IbusXmlPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.push(IBUS_GLOB.to_string());
    }

    fn check_filename(&self, filename: &str) -> bool {
        matches_component(filename)
    }

    fn process(&self, package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        let mut apps = Vec::new();
        for filename in package.filelist().iter().filter(|f| matches_component(f)) {
            let path = tmpdir.join(filename.trim_start_matches('/'));
            let data = fs::read_to_string(&path)?;
            let root =
                Element::parse_str(&trim_preamble(&data)).map_err(|source| PluginError::Parse {
                    plugin: PLUGIN.to_string(),
                    path: filename.clone(),
                    source,
                })?;
            let app = component_app(filename, &root);
            package.log(LogLevel::Debug, &format!("Found input method {}", app.id));
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

    const COMPONENT: &str = r#"<!-- generated by the build -->
<?xml version="1.0" encoding="utf-8"?>
<component>
  <name>org.freedesktop.IBus.Anthy</name>
  <description>Anthy Component</description>
  <homepage>http://code.google.com/p/ibus/</homepage>
  <engines>
    <engine>
      <name>anthy</name>
      <language>ja,other</language>
      <longname>Anthy</longname>
      <description>Japanese Input Method</description>
      <symbol>あ</symbol>
    </engine>
  </engines>
</component>
"#;

    #[test]
    fn test_trim_preamble() {
        let trimmed = trim_preamble(COMPONENT);
        assert!(trimmed.starts_with("<?xml"));
        assert_eq!(trim_preamble("<!-- only a comment -->\n"), "");
    }

    #[test]
    fn test_process_reads_engine() {
        let dir = tempfile::tempdir().unwrap();
        let member = "/usr/share/ibus/component/anthy.xml";
        let path = dir.path().join(member.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, COMPONENT).unwrap();

        let mut package = Package::memory(
            MemoryPackage::new("ibus-anthy", "1.5", "1", "x86_64").file(member, b""),
        );
        package.ensure(EnsureFlags::FILES).unwrap();

        let apps = IbusXmlPlugin.process(&package, dir.path()).unwrap();
        let app = &apps[0];
        assert_eq!(app.id, "anthy.xml");
        assert_eq!(app.kind, AppKind::InputMethod);
        assert_eq!(app.name(), Some("Anthy"));
        assert_eq!(app.summary(), Some("Japanese Input Method"));
        assert_eq!(app.url("homepage"), Some("http://code.google.com/p/ibus/"));
        assert_eq!(app.metadata_item("X-IBus-Symbol"), Some("あ"));
        assert_eq!(app.language("ja"), Some(100));
        assert_eq!(app.language("other"), None);
        assert!(app.has_category("InputSources"));
    }
}
