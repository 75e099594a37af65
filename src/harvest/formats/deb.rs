//! Debian package backend.
//!
//! A `.deb` is an `ar` archive holding `control.tar.*` (package metadata)
//! and `data.tar.*` (the installed tree).

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use debian_packaging::binary_package_control::BinaryPackageControlFile;
use debian_packaging::control::ControlParagraphReader;
use debian_packaging::package_version::PackageVersion;

use crate::harvest::explode::{decompress, explode_tar, list_tar, GlobSet, MemberKind};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};

/// Reads the first `ar` member whose name starts with `prefix`.
fn read_ar_member(path: &Path, prefix: &str) -> Result<Vec<u8>, PackageError> {
    let file = File::open(path).map_err(|e| PackageError::read(path, e))?;
    let mut archive = ar::Archive::new(file);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|e| PackageError::corrupted(path, e.to_string()))?;
        let identifier = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        if identifier.starts_with(prefix) {
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
            return Ok(data);
        }
    }
    Err(PackageError::corrupted(path, format!("no {} member", prefix)))
}

/// Parses the first paragraph of a control file.
fn parse_control(
    path: &Path,
    text: &str,
) -> Result<BinaryPackageControlFile<'static>, PackageError> {
    let paragraph = ControlParagraphReader::new(Cursor::new(text.as_bytes()))
        .next()
        .ok_or_else(|| PackageError::corrupted(path, "empty control file"))?
        .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
    Ok(BinaryPackageControlFile::from(paragraph))
}

/// Splits a Debian version into epoch, upstream version and revision; the
/// revision defaults to `0`.
fn split_version(version: &PackageVersion) -> (u32, &str, &str) {
    (
        version.epoch_assumed(),
        version.upstream_version(),
        version.debian_revision().unwrap_or("0"),
    )
}

/// Dependency names from a `Depends` value: first alternative, no version.
fn parse_depends(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|clause| {
            let first = clause.split('|').next()?.trim();
            let name = first.split_whitespace().next()?;
            let name = name.split(':').next().unwrap_or(name);
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Debian backend. The parsed control file is the open handle.
#[derive(Debug, Default)]
pub struct DebFormat {
    control: Option<BinaryPackageControlFile<'static>>,
}

impl DebFormat {
    fn control(
        &mut self,
        path: &Path,
    ) -> Result<&BinaryPackageControlFile<'static>, PackageError> {
        if self.control.is_none() {
            let data = read_ar_member(path, "control.tar")?;
            let reader = decompress(Cursor::new(data))
                .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
            let mut archive = tar::Archive::new(reader);
            let corrupt = |e: io::Error| PackageError::corrupted(path, e.to_string());

            let mut text = None;
            for entry in archive.entries().map_err(corrupt)? {
                let mut entry = entry.map_err(corrupt)?;
                let name = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
                if name.trim_start_matches("./") == "control" {
                    let mut buf = String::new();
                    entry.read_to_string(&mut buf).map_err(corrupt)?;
                    text = Some(buf);
                    break;
                }
            }
            let text = text.ok_or_else(|| PackageError::corrupted(path, "no control file"))?;
            self.control = Some(parse_control(path, &text)?);
        }
        self.control
            .as_ref()
            .ok_or_else(|| PackageError::corrupted(path, "control not loaded"))
    }

    fn open_data(path: &Path) -> Result<Box<dyn Read>, PackageError> {
        let data = read_ar_member(path, "data.tar")?;
        decompress(Cursor::new(data)).map_err(|e| PackageError::corrupted(path, e.to_string()))
    }
}

impl PackageFormat for DebFormat {
    fn name(&self) -> &'static str {
        "deb"
    }

    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        let control = self.control(path)?;
        let missing = |field| PackageError::MissingField {
            path: path.display().to_string(),
            field,
        };
        let name = control.package().map_err(|_| missing("Package"))?;
        let arch = control.architecture().map_err(|_| missing("Architecture"))?;
        let version = control
            .version()
            .map_err(|e| PackageError::corrupted(path, e.to_string()))?;

        let (epoch, upstream, revision) = split_version(&version);
        data.set_name(name);
        data.set_version(upstream);
        data.set_release(revision);
        data.set_arch(arch);
        data.set_epoch(epoch);
        Ok(())
    }

    fn ensure(
        &mut self,
        path: &Path,
        flags: EnsureFlags,
        data: &mut PackageData,
    ) -> Result<(), PackageError> {
        if flags.contains(EnsureFlags::FILES) {
            let members = list_tar(Self::open_data(path)?)
                .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
            let files = members
                .into_iter()
                .filter(|m| m.kind != MemberKind::Dir)
                .map(|m| m.path)
                .collect();
            data.set_filelist(files);
        }

        let control = self.control(path)?;

        if flags.contains(EnsureFlags::DEPS) {
            let mut deps = Vec::new();
            for key in ["Pre-Depends", "Depends"] {
                if let Some(value) = control.field_str(key) {
                    for dep in parse_depends(value) {
                        if !deps.contains(&dep) {
                            deps.push(dep);
                        }
                    }
                }
            }
            data.set_deps(deps);
        }

        if flags.contains(EnsureFlags::SOURCE) {
            let source = control
                .source()
                .and_then(|s| s.split_whitespace().next())
                .or_else(|| control.package().ok());
            if let Some(source) = source {
                data.set_source_nevra(source);
                data.set_source_pkgname(source);
            }
        }

        if flags.contains(EnsureFlags::URL) {
            if let Some(url) = control.homepage() {
                data.set_url(url);
            }
        }

        if flags.contains(EnsureFlags::VCS) {
            if let Some(vcs) = control
                .field_str("Vcs-Git")
                .or_else(|| control.field_str("Vcs-Browser"))
            {
                data.set_vcs(vcs);
            }
        }

        Ok(())
    }

    fn explode(
        &mut self,
        path: &Path,
        dest: &Path,
        globs: Option<&GlobSet>,
    ) -> Result<(), PackageError> {
        explode_tar(path, || Self::open_data(path), dest, globs)
    }

    fn close(&mut self) {
        self.control = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
