//! Kudos and vetoes derived from the file and dependency lists.

use std::path::Path;

use crate::config::ContextConfig;
use crate::harvest::log::LogLevel;
use crate::harvest::Package;
use crate::model::App;
use crate::traits::{Plugin, PluginError};

/// Dependencies that mark a modern toolkit.
const MODERN_TOOLKITS: &[&str] = &["libgtk-3.so.0", "libQt5Core.so.5", "gtk3", "qt5-qtbase"];

/// Dependency and the obsolete thing it pulls in.
const OBSOLETE_DEPS: &[(&str, &str)] = &[
    ("libgtk-1.2.so.0", "GTK1 toolkit"),
    ("gtk+", "GTK1 toolkit"),
    ("libqt-mt.so.3", "QT3 toolkit"),
    ("qt3", "QT3 toolkit"),
    ("wxGTK", "wxGTK toolkit"),
];

#[derive(Debug, Default)]
pub struct HardcodedPlugin {
    ignore_obsolete_deps: bool,
}

impl Plugin for HardcodedPlugin {
    fn name(&self) -> &'static str {
        "hardcoded"
    }

    fn initialize(&mut self, config: &ContextConfig) -> Result<(), PluginError> {
        self.ignore_obsolete_deps = config.flags.ignore_obsolete_deps;
        Ok(())
    }

    fn process_app(
        &self,
        package: &Package,
        app: &mut App,
        _tmpdir: &Path,
    ) -> Result<(), PluginError> {
        let files = package.filelist();
        if files.iter().any(|f| f.starts_with("/usr/share/help/")) {
            package.log(
                LogLevel::Debug,
                &format!("Auto-adding kudo UserDocs for {}", app.id),
            );
            app.add_kudo("UserDocs");
        }
        if files
            .iter()
            .any(|f| f.starts_with("/usr/share/icons/HighContrast/"))
        {
            app.add_kudo("HighContrast");
        }

        let deps = package.deps();
        if deps.iter().any(|d| MODERN_TOOLKITS.contains(&d.as_str())) {
            app.add_kudo("ModernToolkit");
        }
        if !self.ignore_obsolete_deps {
            for (dep, what) in OBSOLETE_DEPS {
                if deps.iter().any(|d| d == dep) {
                    app.add_veto(format!("Uses obsolete {}", what));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{EnsureFlags, MemoryPackage};
    use crate::model::AppKind;

    fn ensured(package: MemoryPackage) -> Package {
        let mut package = Package::memory(package);
        package
            .ensure(EnsureFlags::FILES | EnsureFlags::DEPS)
            .unwrap();
        package
    }

    #[test]
    fn test_kudos_from_files_and_deps() {
        let package = ensured(
            MemoryPackage::new("app", "1", "1", "x86_64")
                .file("/usr/share/help/C/app/index.page", b"")
                .file("/usr/share/icons/HighContrast/48x48/apps/app.png", b"")
                .dep("libgtk-3.so.0"),
        );
        let mut app = App::new("app.desktop", AppKind::Desktop);
        HardcodedPlugin::default()
            .process_app(&package, &mut app, Path::new("/tmp"))
            .unwrap();
        assert!(app.has_kudo("UserDocs"));
        assert!(app.has_kudo("HighContrast"));
        assert!(app.has_kudo("ModernToolkit"));
        assert!(!app.is_vetoed());
    }

    #[test]
    fn test_obsolete_deps_veto_unless_ignored() {
        let package = ensured(MemoryPackage::new("old", "1", "1", "x86_64").dep("qt3"));
        let mut app = App::new("old.desktop", AppKind::Desktop);
        HardcodedPlugin::default()
            .process_app(&package, &mut app, Path::new("/tmp"))
            .unwrap();
        assert_eq!(app.vetoes, ["Uses obsolete QT3 toolkit"]);

        let mut config = ContextConfig::default();
        config.flags.ignore_obsolete_deps = true;
        let mut plugin = HardcodedPlugin::default();
        plugin.initialize(&config).unwrap();
        let mut app = App::new("old.desktop", AppKind::Desktop);
        plugin.process_app(&package, &mut app, Path::new("/tmp")).unwrap();
        assert!(!app.is_vetoed());
    }
}
