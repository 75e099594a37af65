//! Solus `.eopkg` backend.
//!
//! An eopkg is a zip archive with `metadata.xml`, `files.xml` and the
//! installed tree as `install.tar.xz`.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use chrono::{NaiveDate, TimeZone, Utc};

use crate::harvest::explode::{decompress, explode_tar, GlobSet};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};
use crate::markup::Element;

/// Epoch recorded for every eopkg; the format has no epoch of its own.
pub const EOPKG_EPOCH: u32 = 1;

/// Architecture assumed when metadata does not name one.
const EOPKG_DEFAULT_ARCH: &str = "x86_64";

fn read_member(path: &Path, member: &str) -> Result<Vec<u8>, PackageError> {
    let file = File::open(path).map_err(|e| PackageError::read(path, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| PackageError::corrupted(path, e.to_string()))?;
    let mut entry = archive
        .by_name(member)
        .map_err(|e| PackageError::corrupted(path, format!("{}: {}", member, e)))?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
    Ok(data)
}

fn parse_member(path: &Path, member: &str) -> Result<Element, PackageError> {
    let data = read_member(path, member)?;
    Element::parse(Cursor::new(data)).map_err(|e| PackageError::corrupted(path, e.to_string()))
}

fn date_to_timestamp(date: &str) -> u64 {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp().max(0) as u64)
        .unwrap_or(0)
}

/// Update with the highest `release` attribute: (release, version).
fn newest_update(package: &Element) -> Option<(u64, String)> {
    package
        .find("History")?
        .children_named("Update")
        .filter_map(|u| {
            let release = u.attr("release")?.parse::<u64>().ok()?;
            let version = u.find_text("Version")?.to_string();
            Some((release, version))
        })
        .max_by_key(|(release, _)| *release)
}

/// Eopkg backend. The parsed `metadata.xml` is the open handle.
#[derive(Debug, Default)]
pub struct EopkgFormat {
    metadata: Option<Element>,
}

impl EopkgFormat {
    fn metadata(&mut self, path: &Path) -> Result<&Element, PackageError> {
        if self.metadata.is_none() {
            self.metadata = Some(parse_member(path, "metadata.xml")?);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| PackageError::corrupted(path, "metadata not loaded"))
    }
}

impl PackageFormat for EopkgFormat {
    fn name(&self) -> &'static str {
        "eopkg"
    }

    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        let metadata = self.metadata(path)?;
        let missing = |field| PackageError::MissingField {
            path: path.display().to_string(),
            field,
        };
        let package = metadata.child("Package").ok_or_else(|| missing("Package"))?;
        let name = package.find_text("Name").ok_or_else(|| missing("Package/Name"))?;
        let (release, version) = newest_update(package).ok_or_else(|| missing("History/Update"))?;
        let arch = package.find_text("Architecture").unwrap_or(EOPKG_DEFAULT_ARCH);

        data.set_name(name);
        data.set_version(&version);
        data.set_release(&release.to_string());
        data.set_arch(arch);
        data.set_epoch(EOPKG_EPOCH);
        Ok(())
    }

    fn ensure(
        &mut self,
        path: &Path,
        flags: EnsureFlags,
        data: &mut PackageData,
    ) -> Result<(), PackageError> {
        if flags.contains(EnsureFlags::FILES) {
            let files = parse_member(path, "files.xml")?;
            let list = files
                .children_named("File")
                .filter_map(|f| f.find_text("Path"))
                .map(|p| format!("/{}", p.trim_start_matches('/')))
                .collect();
            data.set_filelist(list);
        }

        let metadata = self.metadata(path)?;
        let source = metadata.child("Source");
        let package = metadata.child("Package");

        if flags.contains(EnsureFlags::DEPS) {
            let deps = package
                .and_then(|p| p.find("RuntimeDependencies"))
                .map(|r| {
                    r.children_named("Dependency")
                        .map(|d| d.text().to_string())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            data.set_deps(deps);
        }

        if flags.contains(EnsureFlags::LICENSE) {
            let licenses: Vec<&str> = package
                .map(|p| p.children_named("License").map(Element::text).collect())
                .unwrap_or_default();
            if !licenses.is_empty() {
                data.set_license(&licenses.join(" AND "));
            }
        }

        if flags.contains(EnsureFlags::URL) {
            if let Some(url) = source.and_then(|s| s.find_text("Homepage")) {
                data.set_url(url);
            }
        }

        if flags.contains(EnsureFlags::SOURCE) {
            if let Some(name) = source.and_then(|s| s.find_text("Name")) {
                data.set_source_nevra(name);
                data.set_source_pkgname(name);
            }
        }

        if flags.contains(EnsureFlags::RELEASES) {
            let updates: Vec<(String, u64)> = package
                .and_then(|p| p.find("History"))
                .map(|h| {
                    h.children_named("Update")
                        .filter_map(|u| {
                            let version = u.find_text("Version")?.to_string();
                            let date = u.find_text("Date").map(date_to_timestamp).unwrap_or(0);
                            Some((version, date))
                        })
                        .collect()
                })
                .unwrap_or_default();
            for (version, timestamp) in updates {
                data.add_release(&version, timestamp);
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
        explode_tar(
            path,
            || {
                let data = read_member(path, "install.tar.xz")?;
                decompress(Cursor::new(data))
                    .map_err(|e| PackageError::corrupted(path, e.to_string()))
            },
            dest,
            globs,
        )
    }

    fn close(&mut self) {
        self.metadata = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const METADATA: &str = r#"<PISI>
  <Source>
    <Name>nano</Name>
    <Homepage>https://www.nano-editor.org</Homepage>
  </Source>
  <Package>
    <Name>nano</Name>
    <License>GPL-3.0-or-later</License>
    <RuntimeDependencies>
      <Dependency releaseFrom="5">ncurses</Dependency>
    </RuntimeDependencies>
    <History>
      <Update release="4"><Date>2017-01-02</Date><Version>2.7.3</Version></Update>
      <Update release="5"><Date>2017-03-10</Date><Version>2.7.5</Version></Update>
    </History>
  </Package>
</PISI>"#;

    const FILES: &str = r#"<Files>
  <File><Path>usr/bin/nano</Path><Type>executable</Type></File>
  <File><Path>usr/share/applications/nano.desktop</Path><Type>data</Type></File>
</Files>"#;

    fn write_eopkg(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("metadata.xml", options).unwrap();
        zip.write_all(METADATA.as_bytes()).unwrap();
        zip.start_file("files.xml", options).unwrap();
        zip.write_all(FILES.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_open_and_ensure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nano-2.7.5-5-1-x86_64.eopkg");
        write_eopkg(&path);

        let mut format = EopkgFormat::default();
        let mut data = PackageData::default();
        format.open(&path, &mut data).unwrap();
        assert_eq!(data.name(), "nano");
        assert_eq!(data.version(), "2.7.5");
        assert_eq!(data.release(), "5");
        assert_eq!(data.epoch(), EOPKG_EPOCH);

        format
            .ensure(
                &path,
                EnsureFlags::FILES
                    | EnsureFlags::DEPS
                    | EnsureFlags::URL
                    | EnsureFlags::RELEASES
                    | EnsureFlags::LICENSE,
                &mut data,
            )
            .unwrap();
        assert_eq!(data.deps.as_deref().unwrap(), ["ncurses"]);
        assert_eq!(data.url.as_deref(), Some("https://www.nano-editor.org"));
        assert_eq!(data.license.as_deref(), Some("GPL-3.0-or-later"));
        assert_eq!(data.releases.len(), 2);
        assert_eq!(data.releases[1].timestamp, 1489104000);
        assert!(data
            .filelist
            .as_ref()
            .unwrap()
            .contains(&"/usr/share/applications/nano.desktop".to_string()));
    }
}
