//! Vetoes well-known ids that are not real applications or are dead
//! upstream.

use glob::Pattern;
use tracing::warn;

use crate::config::ContextConfig;
use crate::harvest::Package;
use crate::model::App;
use crate::plugins::id_stem;
use crate::traits::{Plugin, PluginError};
use std::path::Path;

const NOT_AN_APP: &str = "Not an application";
const ABANDONED: &str = "Upstream abandoned";

/// Id stem glob and veto reason.
const BLACKLIST: &[(&str, &str)] = &[
    ("active-*", NOT_AN_APP),
    ("ailurus", ABANDONED),
    ("authconfig", NOT_AN_APP),
    ("bareftp", "Upstream abandoned, see: http://bareftp.eide-itc.no/news/?p=228"),
    ("bf-*-editor", NOT_AN_APP),
    ("bitmap2component", NOT_AN_APP),
    ("bted", NOT_AN_APP),
    ("caja-home", NOT_AN_APP),
    ("chmsee", "Upstream abandoned, see: https://code.google.com/p/chmsee/"),
    ("cinnamon-settings", NOT_AN_APP),
    ("coccinella", ABANDONED),
    ("conduit", ABANDONED),
    ("*-demo", NOT_AN_APP),
    ("display-properties", NOT_AN_APP),
    ("emesene", "Upstream abandoned, see: https://github.com/emesene/emesene/issues/1588"),
    ("fusion-icon", ABANDONED),
    ("glade3", NOT_AN_APP),
    ("gnome-dasher", ABANDONED),
    ("gnome-wacom-panel", NOT_AN_APP),
    ("kupfer", ABANDONED),
    ("listen", ABANDONED),
    ("luckybackup-*", NOT_AN_APP),
    ("lxinput", NOT_AN_APP),
    ("lxrandr", NOT_AN_APP),
    ("mate-*", NOT_AN_APP),
    ("midori-private", NOT_AN_APP),
    ("nekobee", ABANDONED),
    ("nicotine", ABANDONED),
    ("nm-connection-editor", NOT_AN_APP),
    ("razor-config*", NOT_AN_APP),
    ("redhat-userinfo", NOT_AN_APP),
    ("*-release-notes", NOT_AN_APP),
    (
        "resapplet",
        "Obsolete, see: https://mail.gnome.org/archives/gnome-bugsquad/2011-June/msg00000.html",
    ),
    ("*-server", NOT_AN_APP),
    ("*-session-manager", NOT_AN_APP),
    ("*-shareware", NOT_AN_APP),
    (
        "specto",
        "Upstream abandoned, see: http://jeff.ecchi.ca/blog/2013/03/21/a-programs-obsolescence/",
    ),
    ("system-config-*", NOT_AN_APP),
    ("vkeybd", ABANDONED),
    ("xfce4-about", NOT_AN_APP),
    ("xfce4-*-settings", NOT_AN_APP),
    ("xfce-settings-manager", NOT_AN_APP),
    ("xinput_calibrator", NOT_AN_APP),
];

#[derive(Debug, Default)]
pub struct BlacklistPlugin {
    entries: Vec<(Pattern, &'static str)>,
}

impl BlacklistPlugin {
    /// First veto reason whose glob matches the id stem.
    pub fn search(&self, id: &str) -> Option<&'static str> {
        let stem = id_stem(id);
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.matches(stem))
            .map(|(_, reason)| *reason)
    }
}

impl Plugin for BlacklistPlugin {
    fn name(&self) -> &'static str {
        "blacklist"
    }

    fn initialize(&mut self, config: &ContextConfig) -> Result<(), PluginError> {
        self.entries = BLACKLIST
            .iter()
            .filter(|(_, reason)| {
                !(config.flags.ignore_dead_upstream && reason.starts_with(ABANDONED))
            })
            .filter_map(|(glob, reason)| match Pattern::new(glob) {
                Ok(pattern) => Some((pattern, *reason)),
                Err(e) => {
                    warn!(glob, error = %e, "Skipping invalid blacklist entry");
                    None
                }
            })
            .collect();
        Ok(())
    }

    fn process_app(
        &self,
        _package: &Package,
        app: &mut App,
        _tmpdir: &Path,
    ) -> Result<(), PluginError> {
        if let Some(reason) = self.search(&app.id) {
            app.add_veto(reason);
        }
        Ok(())
    }
}
