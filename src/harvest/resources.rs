//! Icon and screenshot files that accompany the catalogs.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

use crate::model::{App, IconKind};

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("No image data for icon '{icon}'")]
    MissingData { icon: String },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> ResourceError + '_ {
    move |source| ResourceError::Write {
        path: path.display().to_string(),
        source,
    }
}

/// Writes every cached icon of `app` to `<icons_dir>/<w>x<h>/<name>`.
/// Stock, local, remote and embedded icons have no file to write, and
/// cached icons read back from an earlier catalog are already on disk.
///
/// # Errors
///
/// Returns [`ResourceError`] if an icon found in a package has no data or
/// a file cannot be written.
pub fn save_icons(app: &App, icons_dir: &Path) -> Result<usize, ResourceError> {
    let mut saved = 0;
    for icon in app.icons.iter().filter(|i| i.kind == IconKind::Cached) {
        let data = match (&icon.data, &icon.source) {
            (Some(data), _) => data,
            (None, None) => continue,
            (None, Some(_)) => {
                return Err(ResourceError::MissingData {
                    icon: icon.name.clone(),
                })
            }
        };
        let dir = icons_dir.join(format!("{}x{}", icon.width, icon.height));
        fs::create_dir_all(&dir).map_err(write_err(&dir))?;
        let path = dir.join(&icon.name);
        fs::write(&path, data).map_err(write_err(&path))?;
        debug!(app = %app.id, path = %path.display(), "Saved icon");
        saved += 1;
    }
    Ok(saved)
}

/// Turns cached icons that carry data into embedded icons.
pub fn embed_icons(app: &mut App) {
    for icon in &mut app.icons {
        if icon.kind == IconKind::Cached && icon.data.is_some() {
            icon.kind = IconKind::Embedded;
        }
    }
}

/// Base64 payload of an embedded icon.
pub fn encode_icon(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes an embedded icon payload, ignoring whitespace.
pub fn decode_icon(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    STANDARD.decode(compact).ok()
}

/// Copies screenshot images found in an exploded tree to
/// `<screenshot_dir>/source/` and points their URLs at the mirror.
///
/// # Errors
///
/// Returns [`ResourceError::Write`] if a copy fails.
pub fn save_screenshots(
    app: &mut App,
    screenshot_dir: &Path,
    mirror_uri: Option<&str>,
) -> Result<usize, ResourceError> {
    let stem = app.id.rsplit_once('.').map_or(app.id.as_str(), |(s, _)| s).to_string();
    let source_dir = screenshot_dir.join("source");
    let mut saved = 0;

    for (n, image) in app
        .screenshots
        .iter_mut()
        .flat_map(|s| s.images.iter_mut())
        .enumerate()
    {
        let Some(source) = image.source.take() else {
            continue;
        };
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        let filename = format!("{}-{}.{}", stem, n + 1, ext);
        fs::create_dir_all(&source_dir).map_err(write_err(&source_dir))?;
        let dest: PathBuf = source_dir.join(&filename);
        fs::copy(&source, &dest).map_err(write_err(&dest))?;
        if let Some(mirror) = mirror_uri {
            image.url = format!("{}/source/{}", mirror.trim_end_matches('/'), filename);
        }
        saved += 1;
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppKind, Icon, Screenshot, ScreenshotImage};

    #[test]
    fn test_save_icons_writes_cached_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new("foo.desktop", AppKind::Desktop);
        let mut icon = Icon::cached("foo.png", 64, PathBuf::from("/tmp/x/foo.png"));
        icon.data = Some(b"png".to_vec());
        app.add_icon(icon);
        app.add_icon(Icon::stock("system-run"));

        assert_eq!(save_icons(&app, dir.path()).unwrap(), 1);
        assert_eq!(fs::read(dir.path().join("64x64/foo.png")).unwrap(), b"png");

        // read back from an old catalog: nothing to write
        let mut reused = App::new("bar.desktop", AppKind::Desktop);
        let mut icon = Icon::cached("bar.png", 64, PathBuf::new());
        icon.source = None;
        reused.add_icon(icon);
        assert_eq!(save_icons(&reused, dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_save_icons_requires_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new("foo.desktop", AppKind::Desktop);
        app.add_icon(Icon::cached("foo.png", 64, PathBuf::from("/gone")));
        assert!(matches!(
            save_icons(&app, dir.path()),
            Err(ResourceError::MissingData { .. })
        ));
    }

    #[test]
    fn test_embed_and_encode() {
        let mut app = App::new("foo.desktop", AppKind::Desktop);
        let mut icon = Icon::cached("foo.png", 64, PathBuf::new());
        icon.data = Some(b"\x89PNG".to_vec());
        app.add_icon(icon);
        embed_icons(&mut app);
        assert_eq!(app.icons[0].kind, IconKind::Embedded);
        let encoded = encode_icon(app.icons[0].data.as_deref().unwrap());
        assert_eq!(decode_icon(&encoded).unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_save_screenshots_rewrites_url() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("shot.png");
        fs::write(&shot, b"img").unwrap();

        let mut app = App::new("foo.desktop", AppKind::Desktop);
        app.screenshots.push(Screenshot {
            is_default: true,
            caption: None,
            images: vec![ScreenshotImage {
                url: "https://example.com/shot.png".to_string(),
                width: 0,
                height: 0,
                source: Some(shot),
            }],
        });

        let out = dir.path().join("screenshots");
        let saved = save_screenshots(&mut app, &out, Some("http://mirror/")).unwrap();
        assert_eq!(saved, 1);
        assert!(out.join("source/foo-1.png").exists());
        assert_eq!(app.screenshots[0].images[0].url, "http://mirror/source/foo-1.png");
    }
}
