//! Arch Linux (`.pkg.tar*`) backend.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::harvest::explode::{decompress, explode_tar, GlobSet};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};
use crate::harvest::vercmp::{evr_cmp, split_evr};

/// Fields read from `.PKGINFO`.
#[derive(Debug, Default, Clone)]
struct PkgInfo {
    name: Option<String>,
    version: Option<String>,
    arch: Option<String>,
    url: Option<String>,
    base: Option<String>,
    licenses: Vec<String>,
    depends: Vec<String>,
    files: Vec<String>,
}

fn parse_pkginfo(text: &str, info: &mut PkgInfo) {
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(" = ") else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "pkgname" => info.name = Some(value),
            "pkgver" => info.version = Some(value),
            "arch" => info.arch = Some(value),
            "url" => info.url = Some(value),
            "pkgbase" => info.base = Some(value),
            "license" => info.licenses.push(value),
            "depend" => {
                let name = value
                    .split(['<', '>', '=', ':'])
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if !name.is_empty() && !info.depends.contains(&name) {
                    info.depends.push(name);
                }
            }
            _ => {}
        }
    }
}

/// Arch backend. The handle is the parsed `.PKGINFO` plus the file list,
/// gathered in a single pass over the archive.
#[derive(Debug, Default)]
pub struct AlpmFormat {
    info: Option<PkgInfo>,
}

impl AlpmFormat {
    fn open_archive(path: &Path) -> Result<Box<dyn Read>, PackageError> {
        let file = File::open(path).map_err(|e| PackageError::read(path, e))?;
        decompress(file).map_err(|e| PackageError::corrupted(path, e.to_string()))
    }

    fn info(&mut self, path: &Path) -> Result<&PkgInfo, PackageError> {
        if self.info.is_none() {
            let corrupt = |e: io::Error| PackageError::corrupted(path, e.to_string());
            let mut archive = tar::Archive::new(Self::open_archive(path)?);
            let mut info = PkgInfo::default();
            let mut found = false;
            for entry in archive.entries().map_err(corrupt)? {
                let mut entry = entry.map_err(corrupt)?;
                let name = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
                let name = name.trim_start_matches("./").to_string();
                if name == ".PKGINFO" {
                    let mut text = String::new();
                    entry.read_to_string(&mut text).map_err(corrupt)?;
                    parse_pkginfo(&text, &mut info);
                    found = true;
                    continue;
                }
                if name.starts_with('.') || entry.header().entry_type().is_dir() {
                    continue;
                }
                info.files.push(format!("/{}", name));
            }
            if !found {
                return Err(PackageError::corrupted(path, "no .PKGINFO"));
            }
            self.info = Some(info);
        }
        self.info
            .as_ref()
            .ok_or_else(|| PackageError::corrupted(path, "package info not loaded"))
    }
}

impl PackageFormat for AlpmFormat {
    fn name(&self) -> &'static str {
        "alpm"
    }

    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        let info = self.info(path)?;
        let (Some(name), Some(version), Some(arch)) = (&info.name, &info.version, &info.arch) else {
            return Err(PackageError::MissingField {
                path: path.display().to_string(),
                field: "pkgname, pkgver or arch",
            });
        };
        let (epoch, version, release) = split_evr(version);
        data.set_name(name);
        data.set_version(version);
        data.set_release(if release.is_empty() { "1" } else { release });
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
        let info = self.info(path)?.clone();

        if flags.contains(EnsureFlags::FILES) {
            data.set_filelist(info.files);
        }
        if flags.contains(EnsureFlags::DEPS) {
            data.set_deps(info.depends);
        }
        if flags.contains(EnsureFlags::LICENSE) && !info.licenses.is_empty() {
            data.set_license(&info.licenses.join(" AND "));
        }
        if flags.contains(EnsureFlags::URL) {
            if let Some(url) = &info.url {
                data.set_url(url);
            }
        }
        if flags.contains(EnsureFlags::SOURCE) {
            if let Some(base) = info.base.as_ref().or(info.name.as_ref()) {
                data.set_source_nevra(base);
                data.set_source_pkgname(base);
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
        explode_tar(path, || Self::open_archive(path), dest, globs)
    }

    fn close(&mut self) {
        self.info = None;
    }

    fn compare(&self, a: &PackageData, b: &PackageData) -> Option<Ordering> {
        Some(a.name().cmp(b.name()).then_with(|| {
            evr_cmp(
                (a.epoch(), a.version(), a.release()),
                (b.epoch(), b.version(), b.release()),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::explode::tests::build_tar;

    const PKGINFO: &str = "# Generated by makepkg\n\
pkgname = gnome-calculator\n\
pkgbase = gnome-calculator\n\
pkgver = 1:3.14.1-1\n\
url = https://wiki.gnome.org/Apps/Calculator\n\
arch = x86_64\n\
license = GPL\n\
license = LGPL\n\
depend = gtk3>=3.12\n\
depend = libsoup\n";

    #[test]
    fn test_open_and_ensure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gnome-calculator-3.14.1-1-x86_64.pkg.tar");
        let tar = build_tar(
            &[
                (".PKGINFO", PKGINFO.as_bytes()),
                (".MTREE", b""),
                ("usr/bin/gnome-calculator", b"bin"),
            ],
            &[],
        );
        std::fs::write(&path, tar).unwrap();

        let mut format = AlpmFormat::default();
        let mut data = PackageData::default();
        format.open(&path, &mut data).unwrap();
        assert_eq!(data.name(), "gnome-calculator");
        assert_eq!(data.epoch(), 1);
        assert_eq!(data.version(), "3.14.1");
        assert_eq!(data.release(), "1");

        format
            .ensure(
                &path,
                EnsureFlags::FILES | EnsureFlags::DEPS | EnsureFlags::LICENSE,
                &mut data,
            )
            .unwrap();
        assert_eq!(data.license.as_deref(), Some("GPL AND LGPL"));
        assert_eq!(data.deps.as_deref().unwrap(), ["gtk3", "libsoup"]);
        assert_eq!(
            data.filelist.as_deref().unwrap(),
            ["/usr/bin/gnome-calculator"]
        );
    }
}
