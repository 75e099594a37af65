//! Built-in plugins.
//!
//! Each plugin is a [`Plugin`] implementation registered in [`builtin`];
//! [`PluginLoader`](crate::harvest::PluginLoader) filters, initializes and
//! orders them.

pub mod appdata;
pub mod blacklist;
pub mod desktop;
pub mod font;
pub mod gstreamer;
pub mod hardcoded;
pub mod ibus_xml;
pub mod metainfo;
pub mod shell_extension;

pub use appdata::AppDataPlugin;
pub use blacklist::BlacklistPlugin;
pub use desktop::DesktopPlugin;
pub use font::FontPlugin;
pub use gstreamer::GstreamerPlugin;
pub use hardcoded::HardcodedPlugin;
pub use ibus_xml::IbusXmlPlugin;
pub use metainfo::MetainfoPlugin;
pub use shell_extension::ShellExtensionPlugin;

use crate::traits::Plugin;

/// Every statically linked plugin, in no particular order.
pub fn builtin() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(AppDataPlugin::default()),
        Box::new(BlacklistPlugin::default()),
        Box::new(DesktopPlugin::default()),
        Box::new(FontPlugin),
        Box::new(GstreamerPlugin),
        Box::new(HardcodedPlugin::default()),
        Box::new(IbusXmlPlugin),
        Box::new(MetainfoPlugin),
        Box::new(ShellExtensionPlugin::default()),
    ]
}

/// Filename stem of a component id: everything before the last `.`.
pub(crate) fn id_stem(id: &str) -> &str {
    id.rsplit_once('.').map_or(id, |(stem, _)| stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let plugins = builtin();
        let mut names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), plugins.len());
    }

    #[test]
    fn test_id_stem() {
        assert_eq!(id_stem("gedit.desktop"), "gedit");
        assert_eq!(id_stem("org.gnome.Maps.desktop"), "org.gnome.Maps");
        assert_eq!(id_stem("plain"), "plain");
    }
}
