//! Filtered archive extraction shared by the package backends.
//!
//! Exploding is two-pass. The first pass lists archive members so the
//! selection can follow symbolic and hard links from matching members to
//! their targets. The second pass writes only the selected members.
//! Existing destination entries are never overwritten, so several packages
//! can be exploded into one tree and the first writer of a path wins.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::harvest::traits::PackageError;

// ============================================================================
// Glob Filter
// ============================================================================

/// Union of shell-style patterns matched against normalized member paths.
///
/// Matching follows `fnmatch` without flags: `*` also matches `/`.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    patterns: Vec<glob::Pattern>,
}

impl GlobSet {
    /// Compiles `patterns`, skipping (with a warning) any that are invalid.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = p.as_ref(), error = %e, "Ignoring invalid glob");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Normalizes an archive member name to an absolute path.
///
/// `/x` is kept, `./x` becomes `/x` and a bare `x` becomes `/x`.
/// Trailing slashes are dropped.
pub fn normalize_member_path(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("./") {
        format!("/{}", rest)
    } else if trimmed == "." || trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Lexically resolves `.` and `..` in an absolute path. Leading `..`
/// components are clamped at the root.
fn resolve_lexically(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

// ============================================================================
// Member Selection
// ============================================================================

/// Type of an archive member as seen in the listing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Dir,
    /// Symbolic link with its raw target.
    Symlink(String),
    /// Hard link to another member (archive path).
    Hardlink(String),
    Other,
}

/// One archive member from the listing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Normalized absolute path.
    pub path: String,
    pub kind: MemberKind,
}

impl Member {
    pub fn new(raw: &str, kind: MemberKind) -> Self {
        Self {
            path: normalize_member_path(raw),
            kind,
        }
    }

    /// Normalized path this link points at, if it is a link.
    fn link_target(&self) -> Option<String> {
        match &self.kind {
            MemberKind::Symlink(target) if target.starts_with('/') => {
                Some(resolve_lexically(target))
            }
            MemberKind::Symlink(target) => {
                let parent = match self.path.rfind('/') {
                    Some(idx) => &self.path[..idx],
                    None => "",
                };
                Some(resolve_lexically(&format!("{}/{}", parent, target)))
            }
            MemberKind::Hardlink(target) => Some(normalize_member_path(target)),
            _ => None,
        }
    }
}

/// Chooses which members to write.
///
/// Without a filter every member is selected. With one, matching members
/// are selected and link targets are followed transitively; a link to a
/// directory pulls in everything below it.
pub fn select_members(members: &[Member], globs: Option<&GlobSet>) -> BTreeSet<String> {
    let Some(globs) = globs else {
        return members.iter().map(|m| m.path.clone()).collect();
    };

    let by_path: HashMap<&str, &Member> = members.iter().map(|m| (m.path.as_str(), m)).collect();
    let mut selected: BTreeSet<String> = BTreeSet::new();
    let mut worklist: Vec<&Member> = members.iter().filter(|m| globs.matches(&m.path)).collect();

    while let Some(member) = worklist.pop() {
        if !selected.insert(member.path.clone()) {
            continue;
        }
        let Some(target) = member.link_target() else {
            continue;
        };
        match by_path.get(target.as_str()).copied() {
            Some(target_member) if target_member.kind == MemberKind::Dir => {
                let prefix = format!("{}/", target);
                worklist.push(target_member);
                worklist.extend(members.iter().filter(|m| m.path.starts_with(&prefix)));
            }
            Some(target_member) => worklist.push(target_member),
            None => debug!(link = %member.path, target = %target, "Link target not in archive"),
        }
    }

    selected
}

// ============================================================================
// Destination Writes
// ============================================================================

/// Maps a normalized member path below `dest`, rejecting `..` components.
///
/// # Errors
///
/// Returns [`PackageError::PathTraversal`] for paths escaping `dest`.
pub fn dest_path(dest: &Path, member: &str) -> Result<PathBuf, PackageError> {
    let relative = Path::new(member.trim_start_matches('/'));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(PackageError::PathTraversal {
                    attempted: member.to_string(),
                })
            }
        }
    }
    Ok(dest.join(relative))
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

fn create_parent(path: &Path) -> Result<(), PackageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PackageError::write(parent, e))?;
    }
    Ok(())
}

/// Writes one member into the tree rooted at `dest`.
pub struct TreeWriter<'a> {
    dest: &'a Path,
}

impl<'a> TreeWriter<'a> {
    /// Creates the destination directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Write`] if `dest` cannot be created.
    pub fn new(dest: &'a Path) -> Result<Self, PackageError> {
        fs::create_dir_all(dest).map_err(|e| PackageError::write(dest, e))?;
        Ok(Self { dest })
    }

    pub fn dir(&self, member: &str) -> Result<(), PackageError> {
        let path = dest_path(self.dest, member)?;
        fs::create_dir_all(&path).map_err(|e| PackageError::write(&path, e))
    }

    /// Streams a regular file. Returns `false` if the path already existed.
    pub fn file(
        &self,
        member: &str,
        content: &mut dyn Read,
        mode: Option<u32>,
    ) -> Result<bool, PackageError> {
        let path = dest_path(self.dest, member)?;
        if exists(&path) {
            debug!(path = %path.display(), "Not overwriting existing file");
            return Ok(false);
        }
        create_parent(&path)?;

        let mut file = fs::File::create(&path).map_err(|e| PackageError::write(&path, e))?;
        io::copy(content, &mut file).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                PackageError::corrupted(&path, e.to_string())
            }
            _ => PackageError::write(&path, e),
        })?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            // keep files readable so later stages can always open them
            let perms = fs::Permissions::from_mode((mode & 0o7777) | 0o600);
            fs::set_permissions(&path, perms).map_err(|e| PackageError::write(&path, e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(true)
    }

    /// Creates a symbolic link. Absolute targets are re-rooted inside
    /// the destination tree.
    pub fn symlink(&self, member: &str, target: &str) -> Result<bool, PackageError> {
        let path = dest_path(self.dest, member)?;
        if exists(&path) {
            return Ok(false);
        }
        create_parent(&path)?;

        let target = if target.starts_with('/') {
            self.dest.join(resolve_lexically(target).trim_start_matches('/'))
        } else {
            PathBuf::from(target)
        };

        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &path).map_err(|e| PackageError::write(&path, e))?;
        #[cfg(not(unix))]
        {
            let resolved = path.parent().map(|p| p.join(&target)).unwrap_or(target);
            if resolved.is_file() {
                fs::copy(&resolved, &path).map_err(|e| PackageError::write(&path, e))?;
            }
        }
        Ok(true)
    }

    /// Creates a hard link to an already written member, copying if the
    /// filesystem refuses.
    pub fn hardlink(&self, member: &str, target: &str) -> Result<bool, PackageError> {
        let path = dest_path(self.dest, member)?;
        if exists(&path) {
            return Ok(false);
        }
        let source = dest_path(self.dest, &normalize_member_path(target))?;
        if !exists(&source) {
            debug!(link = member, target, "Hard link target was not extracted");
            return Ok(false);
        }
        create_parent(&path)?;
        if fs::hard_link(&source, &path).is_err() {
            fs::copy(&source, &path).map_err(|e| PackageError::write(&path, e))?;
        }
        Ok(true)
    }
}

// ============================================================================
// Decompression
// ============================================================================

const MAGIC_GZIP: &[u8] = &[0x1f, 0x8b];
const MAGIC_XZ: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const MAGIC_ZSTD: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const MAGIC_BZIP2: &[u8] = b"BZh";
const MAGIC_LZMA: &[u8] = &[0x5d, 0x00, 0x00];

/// Wraps `reader` in a decoder chosen by sniffing its magic bytes.
/// Unrecognized data is passed through untouched.
///
/// # Errors
///
/// Returns an I/O error if the stream cannot be read or uses an
/// unsupported compressor.
pub fn decompress<'r, R: Read + 'r>(reader: R) -> io::Result<Box<dyn Read + 'r>> {
    let mut reader = BufReader::new(reader);
    let head = reader.fill_buf()?.to_vec();

    if head.starts_with(MAGIC_GZIP) {
        Ok(Box::new(flate2::read::GzDecoder::new(reader)))
    } else if head.starts_with(MAGIC_XZ) {
        Ok(Box::new(xz2::read::XzDecoder::new(reader)))
    } else if head.starts_with(MAGIC_ZSTD) {
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(reader)?))
    } else if head.starts_with(MAGIC_LZMA) {
        let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Box::new(xz2::read::XzDecoder::new_stream(reader, stream)))
    } else if head.starts_with(MAGIC_BZIP2) {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "bzip2 payloads are not supported",
        ))
    } else {
        Ok(Box::new(reader))
    }
}

// ============================================================================
// Tar
// ============================================================================

fn tar_kind<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<MemberKind> {
    let entry_type = entry.header().entry_type();
    let link = || -> io::Result<String> {
        Ok(entry
            .link_name()?
            .map(|l| l.to_string_lossy().into_owned())
            .unwrap_or_default())
    };
    Ok(match entry_type {
        tar::EntryType::Regular | tar::EntryType::Continuous => MemberKind::File,
        tar::EntryType::Directory => MemberKind::Dir,
        tar::EntryType::Symlink => MemberKind::Symlink(link()?),
        tar::EntryType::Link => MemberKind::Hardlink(link()?),
        _ => MemberKind::Other,
    })
}

/// Lists the members of a tar stream.
///
/// # Errors
///
/// Returns an I/O error if the stream is not a readable tar archive.
pub fn list_tar<R: Read>(reader: R) -> io::Result<Vec<Member>> {
    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let raw = entry.path()?.to_string_lossy().into_owned();
        let kind = tar_kind(&entry)?;
        members.push(Member::new(&raw, kind));
    }
    Ok(members)
}

/// Explodes a tar stream produced by `open`, which is called once per pass.
///
/// # Errors
///
/// Returns [`PackageError`]; only destination failures are fatal.
pub fn explode_tar<F>(
    archive_path: &Path,
    open: F,
    dest: &Path,
    globs: Option<&GlobSet>,
) -> Result<(), PackageError>
where
    F: Fn() -> Result<Box<dyn Read>, PackageError>,
{
    let writer = TreeWriter::new(dest)?;

    let members =
        list_tar(open()?).map_err(|e| PackageError::corrupted(archive_path, e.to_string()))?;
    let selected = select_members(&members, globs);
    if selected.is_empty() {
        return Ok(());
    }

    let corrupt = |e: io::Error| PackageError::corrupted(archive_path, e.to_string());
    let mut archive = tar::Archive::new(open()?);
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let raw = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
        let path = normalize_member_path(&raw);
        if !selected.contains(&path) {
            continue;
        }
        match tar_kind(&entry).map_err(corrupt)? {
            MemberKind::File => {
                let mode = entry.header().mode().ok();
                writer.file(&path, &mut entry, mode)?;
            }
            MemberKind::Dir => writer.dir(&path)?,
            MemberKind::Symlink(target) => {
                writer.symlink(&path, &target)?;
            }
            MemberKind::Hardlink(target) => {
                writer.hardlink(&path, &target)?;
            }
            MemberKind::Other => debug!(path = %path, "Skipping special file"),
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds an uncompressed tar with files and symlinks.
    pub(crate) fn build_tar(files: &[(&str, &[u8])], symlinks: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        for (path, target) in symlinks {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o777);
            header.set_entry_type(tar::EntryType::Symlink);
            builder
                .append_link(&mut header, path, target)
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_normalize_member_path() {
        assert_eq!(normalize_member_path("/usr/bin/foo"), "/usr/bin/foo");
        assert_eq!(normalize_member_path("./usr/bin/foo"), "/usr/bin/foo");
        assert_eq!(normalize_member_path("usr/bin/foo"), "/usr/bin/foo");
        assert_eq!(normalize_member_path("usr/share/"), "/usr/share");
    }

    #[test]
    fn test_glob_star_crosses_slashes() {
        let globs = GlobSet::new(&["/usr/share/*/icons/*"]);
        assert!(globs.matches("/usr/share/foo/icons/hicolor/64x64/apps/foo.png"));
        assert!(!globs.matches("/usr/bin/foo"));
    }

    #[test]
    fn test_select_follows_links() {
        let members = vec![
            Member::new(
                "./usr/share/applications/foo.desktop",
                MemberKind::Symlink("../foo/app.desktop".into()),
            ),
            Member::new("./usr/share/foo/app.desktop", MemberKind::File),
            Member::new(
                "./usr/share/pixmaps/foo.png",
                MemberKind::Symlink("/usr/share/foo/data".into()),
            ),
            Member::new("./usr/share/foo/data", MemberKind::Dir),
            Member::new("./usr/share/foo/data/icon.png", MemberKind::File),
            Member::new("./usr/bin/foo", MemberKind::File),
        ];
        let globs = GlobSet::new(&["/usr/share/applications/*.desktop", "/usr/share/pixmaps/*"]);
        let selected = select_members(&members, Some(&globs));

        assert!(selected.contains("/usr/share/applications/foo.desktop"));
        assert!(selected.contains("/usr/share/foo/app.desktop"));
        assert!(selected.contains("/usr/share/foo/data/icon.png"));
        assert!(!selected.contains("/usr/bin/foo"));
    }

    #[test]
    fn test_dest_path_rejects_traversal() {
        let dest = Path::new("/tmp/root");
        assert!(dest_path(dest, "/../../etc/passwd").is_err());
        assert_eq!(
            dest_path(dest, "/usr/share/x").unwrap(),
            PathBuf::from("/tmp/root/usr/share/x")
        );
    }

    #[test]
    fn test_explode_tar_with_zero_matches_creates_empty_dir() {
        let data = build_tar(&[("usr/bin/foo", b"#!/bin/sh\n")], &[]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let globs = GlobSet::new(&["/usr/share/applications/*.desktop"]);

        explode_tar(
            Path::new("test.tar"),
            || Ok(Box::new(Cursor::new(data.clone())) as Box<dyn Read>),
            &dest,
            Some(&globs),
        )
        .unwrap();

        assert!(dest.is_dir());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_explode_tar_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = build_tar(&[("usr/share/pixmaps/foo.png", b"first")], &[]);
        let second = build_tar(&[("./usr/share/pixmaps/foo.png", b"second")], &[]);

        for data in [first, second] {
            explode_tar(
                Path::new("test.tar"),
                || Ok(Box::new(Cursor::new(data.clone())) as Box<dyn Read>),
                dir.path(),
                None,
            )
            .unwrap();
        }

        let content = fs::read(dir.path().join("usr/share/pixmaps/foo.png")).unwrap();
        assert_eq!(content, b"first");
    }

    #[cfg(unix)]
    #[test]
    fn test_explode_tar_keeps_link_target() {
        let data = build_tar(
            &[("usr/share/foo/foo.png", b"png")],
            &[("usr/share/pixmaps/foo.png", "../foo/foo.png")],
        );
        let dir = tempfile::tempdir().unwrap();
        let globs = GlobSet::new(&["/usr/share/pixmaps/*"]);

        explode_tar(
            Path::new("test.tar"),
            || Ok(Box::new(Cursor::new(data.clone())) as Box<dyn Read>),
            dir.path(),
            Some(&globs),
        )
        .unwrap();

        let content = fs::read(dir.path().join("usr/share/pixmaps/foo.png")).unwrap();
        assert_eq!(content, b"png");
    }

    #[test]
    fn test_decompress_gzip_and_passthrough() {
        use std::io::Write;

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello").unwrap();
        let gz = encoder.finish().unwrap();

        let mut out = String::new();
        decompress(Cursor::new(gz)).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        let mut out = String::new();
        decompress(Cursor::new(b"plain".to_vec()))
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "plain");
    }
}
