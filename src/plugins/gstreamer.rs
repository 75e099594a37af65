//! GStreamer codec packs, described from the plugin libraries they ship.

use std::path::Path;

use crate::harvest::Package;
use crate::model::{App, AppKind, Icon, LOCALE_C};
use crate::traits::{Plugin, PluginError};

const PLUGIN: &str = "gstreamer";

const GSTREAMER_GLOB: &str = "/usr/lib64/gstreamer-1.0/libgst*.so";

/// Plugin library to the formats it handles, `|`-separated.
const CODECS: &[(&str, &str)] = &[
    ("/usr/lib64/gstreamer-1.0/libgsta52dec.so", "AC-3"),
    ("/usr/lib64/gstreamer-1.0/libgstaiff.so", "AIFF"),
    ("/usr/lib64/gstreamer-1.0/libgstamrnb.so", "AMR-NB"),
    ("/usr/lib64/gstreamer-1.0/libgstamrwbdec.so", "AMR-WB"),
    ("/usr/lib64/gstreamer-1.0/libgstapetag.so", "APE"),
    ("/usr/lib64/gstreamer-1.0/libgstasf.so", "ASF"),
    ("/usr/lib64/gstreamer-1.0/libgstavi.so", "AVI"),
    ("/usr/lib64/gstreamer-1.0/libgstavidemux.so", "AVI"),
    ("/usr/lib64/gstreamer-1.0/libgstdecklink.so", "SDI"),
    ("/usr/lib64/gstreamer-1.0/libgstdtsdec.so", "DTS"),
    ("/usr/lib64/gstreamer-1.0/libgstdv.so", "DV"),
    ("/usr/lib64/gstreamer-1.0/libgstdvb.so", "DVB"),
    ("/usr/lib64/gstreamer-1.0/libgstdvdread.so", "DVD"),
    ("/usr/lib64/gstreamer-1.0/libgstdvdspu.so", "Bluray"),
    ("/usr/lib64/gstreamer-1.0/libgstespeak.so", "eSpeak"),
    ("/usr/lib64/gstreamer-1.0/libgstfaad.so", "MPEG-4|MPEG-2 AAC"),
    ("/usr/lib64/gstreamer-1.0/libgstflac.so", "FLAC"),
    ("/usr/lib64/gstreamer-1.0/libgstflv.so", "Flash"),
    ("/usr/lib64/gstreamer-1.0/libgstflxdec.so", "FLX"),
    ("/usr/lib64/gstreamer-1.0/libgstgsm.so", "GSM"),
    ("/usr/lib64/gstreamer-1.0/libgstid3tag.so", "ID3"),
    ("/usr/lib64/gstreamer-1.0/libgstisomp4.so", "MP4"),
    ("/usr/lib64/gstreamer-1.0/libgstmad.so", "MP3"),
    ("/usr/lib64/gstreamer-1.0/libgstmatroska.so", "MKV"),
    ("/usr/lib64/gstreamer-1.0/libgstmfc.so", "MFC"),
    ("/usr/lib64/gstreamer-1.0/libgstmidi.so", "MIDI"),
    ("/usr/lib64/gstreamer-1.0/libgstmimic.so", "Mimic"),
    ("/usr/lib64/gstreamer-1.0/libgstmms.so", "MMS"),
    ("/usr/lib64/gstreamer-1.0/libgstmpeg2dec.so", "MPEG-2"),
    ("/usr/lib64/gstreamer-1.0/libgstmpg123.so", "MP3"),
    ("/usr/lib64/gstreamer-1.0/libgstmxf.so", "MXF"),
    ("/usr/lib64/gstreamer-1.0/libgstogg.so", "Ogg"),
    ("/usr/lib64/gstreamer-1.0/libgstopus.so", "Opus"),
    ("/usr/lib64/gstreamer-1.0/libgstrmdemux.so", "RealMedia"),
    ("/usr/lib64/gstreamer-1.0/libgstschro.so", "Dirac"),
    ("/usr/lib64/gstreamer-1.0/libgstsiren.so", "Siren"),
    ("/usr/lib64/gstreamer-1.0/libgstspeex.so", "Speex"),
    ("/usr/lib64/gstreamer-1.0/libgsttheora.so", "Theora"),
    ("/usr/lib64/gstreamer-1.0/libgsttwolame.so", "MP2"),
    ("/usr/lib64/gstreamer-1.0/libgstvorbis.so", "Vorbis"),
    ("/usr/lib64/gstreamer-1.0/libgstvpx.so", "VP8|VP9"),
    ("/usr/lib64/gstreamer-1.0/libgstwavenc.so", "WAV"),
    ("/usr/lib64/gstreamer-1.0/libgstx264.so", "H.264/MPEG-4 AVC"),
];

#[derive(Debug, Default)]
pub struct GstreamerPlugin;

/// `gstreamer-<suffix>`, with the distro packaging prefixes dropped from
/// the package name.
fn codec_id(pkgname: &str) -> String {
    let mut suffix = pkgname;
    for prefix in ["gstreamer1-", "gstreamer-", "plugins-"] {
        suffix = suffix.strip_prefix(prefix).unwrap_or(suffix);
    }
    format!("gstreamer-{}", suffix)
}

/// "Multimedia playback for A, B and C".
fn codec_summary(formats: &[String]) -> String {
    let listed = match formats.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => String::new(),
    };
    format!("Multimedia playback for {}", listed)
}

impl Plugin for GstreamerPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn add_globs(&self, globs: &mut Vec<String>) {
        globs.push(GSTREAMER_GLOB.to_string());
    }

    fn check_filename(&self, filename: &str) -> bool {
        glob::Pattern::new(GSTREAMER_GLOB)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    }

    fn process(&self, package: &Package, tmpdir: &Path) -> Result<Vec<App>, PluginError> {
        let mut formats: Vec<String> = CODECS
            .iter()
            .filter(|(path, _)| tmpdir.join(path.trim_start_matches('/')).exists())
            .flat_map(|(_, text)| text.split('|'))
            .map(str::to_string)
            .collect();
        formats.sort();
        formats.dedup();
        if formats.is_empty() {
            return Err(PluginError::failed(
                PLUGIN,
                format!("nothing interesting in {}", package.basename()),
            ));
        }

        let mut app = App::new(&codec_id(package.name()), AppKind::Codec);
        app.set_name(LOCALE_C, "GStreamer Multimedia Codecs");
        app.set_summary(LOCALE_C, &codec_summary(&formats));
        app.requires_appdata.push(String::new());
        app.add_category("Addons");
        app.add_category("Codecs");
        app.add_icon(Icon::stock("application-x-executable"));
        for format in &formats {
            app.add_keyword(LOCALE_C, format);
        }
        Ok(vec![app])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_codec_id_strips_prefixes() {
        assert_eq!(codec_id("gstreamer1-plugins-ugly"), "gstreamer-ugly");
        assert_eq!(codec_id("gstreamer-plugins-bad"), "gstreamer-bad");
        assert_eq!(codec_id("libav"), "gstreamer-libav");
    }

    #[test]
    fn test_codec_summary() {
        let one = vec!["MP3".to_string()];
        assert_eq!(codec_summary(&one), "Multimedia playback for MP3");
        let three = vec!["AC-3".to_string(), "MP3".to_string(), "Ogg".to_string()];
        assert_eq!(codec_summary(&three), "Multimedia playback for AC-3, MP3 and Ogg");
    }

    #[test]
    fn test_process_lists_shipped_codecs() {
        let dir = tempfile::tempdir().unwrap();
        let libdir = dir.path().join("usr/lib64/gstreamer-1.0");
        fs::create_dir_all(&libdir).unwrap();
        fs::write(libdir.join("libgstmad.so"), b"").unwrap();
        fs::write(libdir.join("libgstvpx.so"), b"").unwrap();
        fs::write(libdir.join("libgstunknown.so"), b"").unwrap();

        let package = Package::memory(crate::harvest::MemoryPackage::new(
            "gstreamer1-plugins-ugly",
            "1.4",
            "1",
            "x86_64",
        ));
        let apps = GstreamerPlugin.process(&package, dir.path()).unwrap();

        let app = &apps[0];
        assert_eq!(app.id, "gstreamer-ugly");
        assert_eq!(app.kind, AppKind::Codec);
        assert_eq!(app.keywords[LOCALE_C], ["MP3", "VP8", "VP9"]);
        assert_eq!(app.summary(), Some("Multimedia playback for MP3, VP8 and VP9"));
        assert_eq!(app.requires_appdata, [""]);
    }

    #[test]
    fn test_process_without_codecs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let package = Package::memory(crate::harvest::MemoryPackage::new(
            "gstreamer1-plugins-base",
            "1.4",
            "1",
            "x86_64",
        ));
        assert!(GstreamerPlugin.process(&package, dir.path()).is_err());
    }
}
