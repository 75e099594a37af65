//! RPM backend.
//!
//! Headers are read with the `rpm` crate. The payload, a (compressed) newc
//! cpio archive, is streamed from the offset where the headers end.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use rpm::PackageMetadata;

use crate::harvest::explode::{
    decompress, normalize_member_path, select_members, GlobSet, Member, MemberKind, TreeWriter,
};
use crate::harvest::log::LogLevel;
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};
use crate::harvest::vercmp::evr_cmp;

const CPIO_TRAILER: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;

// ============================================================================
// Header
// ============================================================================

/// Reads lead, signature and main header; returns the metadata and the
/// payload offset.
fn read_metadata(path: &Path) -> Result<(PackageMetadata, u64), PackageError> {
    let file = File::open(path).map_err(|e| PackageError::read(path, e))?;
    let mut reader = BufReader::new(file);
    let metadata = PackageMetadata::parse(&mut reader)
        .map_err(|e| PackageError::corrupted(path, e.to_string()))?;
    let payload_offset = reader
        .stream_position()
        .map_err(|e| PackageError::read(path, e))?;
    Ok((metadata, payload_offset))
}

// ============================================================================
// Field Helpers
// ============================================================================

/// Fedora short license names and their SPDX identifiers. `None` drops
/// the token.
const LICENSE_MAP: &[(&str, Option<&str>)] = &[
    ("AGPLv3", Some("AGPL-3.0")),
    ("AGPLv3+", Some("AGPL-3.0+")),
    ("ASL 1.1", Some("Apache-1.1")),
    ("ASL 2.0", Some("Apache-2.0")),
    ("Artistic 2.0", Some("Artistic-2.0")),
    ("Boost", Some("BSL-1.0")),
    ("BSD", Some("BSD-3-Clause")),
    ("BSD with advertising", Some("BSD-4-Clause")),
    ("CC-BY", Some("CC-BY-3.0")),
    ("CC-BY-SA", Some("CC-BY-SA-3.0")),
    ("CC0", Some("CC0-1.0")),
    ("CDDL", Some("CDDL-1.0")),
    ("EPL", Some("EPL-1.0")),
    ("GFDL", Some("GFDL-1.3")),
    ("GPL+", Some("GPL-1.0+")),
    ("GPLv2", Some("GPL-2.0")),
    ("GPLv2+", Some("GPL-2.0+")),
    ("GPLv3", Some("GPL-3.0")),
    ("GPLv3+", Some("GPL-3.0+")),
    ("ISC", Some("ISC")),
    ("LGPLv2", Some("LGPL-2.0")),
    ("LGPLv2+", Some("LGPL-2.0+")),
    ("LGPLv2.1", Some("LGPL-2.1")),
    ("LGPLv2.1+", Some("LGPL-2.1+")),
    ("LGPLv3", Some("LGPL-3.0")),
    ("LGPLv3+", Some("LGPL-3.0+")),
    ("MIT", Some("MIT")),
    ("MIT with advertising", Some("MIT")),
    ("MPLv1.1", Some("MPL-1.1")),
    ("MPLv2.0", Some("MPL-2.0")),
    ("OFL", Some("OFL-1.1")),
    ("OpenSSL", Some("OpenSSL")),
    ("PHP", Some("PHP-3.01")),
    ("Public domain", None),
    ("Python", Some("Python-2.0")),
    ("zlib", Some("Zlib")),
];

/// Converts a Fedora license string to SPDX, token by token.
///
/// Unknown tokens are passed through unchanged and reported.
pub fn license_to_spdx(license: &str) -> (String, Vec<String>) {
    fn flush(words: &mut Vec<&str>, out: &mut Vec<String>, unknown: &mut Vec<String>) {
        if words.is_empty() {
            return;
        }
        let token = words.join(" ");
        words.clear();
        match LICENSE_MAP.iter().find(|(fedora, _)| *fedora == token) {
            Some((_, Some(spdx))) => out.push(spdx.to_string()),
            Some((_, None)) => {
                // drop a now dangling connector
                if matches!(out.last().map(String::as_str), Some("AND") | Some("OR")) {
                    out.pop();
                }
            }
            None => {
                unknown.push(token.clone());
                out.push(token);
            }
        }
    }

    let spaced = license.replace('(', " ( ").replace(')', " ) ");
    let mut out: Vec<String> = Vec::new();
    let mut unknown = Vec::new();
    let mut words: Vec<&str> = Vec::new();

    for word in spaced.split_whitespace() {
        match word {
            "and" | "or" => {
                flush(&mut words, &mut out, &mut unknown);
                if !out.is_empty() && out.last().map(String::as_str) != Some("(") {
                    out.push(word.to_uppercase());
                }
            }
            "(" | ")" => {
                flush(&mut words, &mut out, &mut unknown);
                out.push(word.to_string());
            }
            _ => words.push(word),
        }
    }
    flush(&mut words, &mut out, &mut unknown);
    while matches!(out.last().map(String::as_str), Some("AND") | Some("OR")) {
        out.pop();
    }

    let joined = out.join(" ").replace("( ", "(").replace(" )", ")");
    (joined, unknown)
}

/// Version from a changelog author line, e.g.
/// `Richard Hughes <richard@hughsie.com> - 1:0.1.2-3` gives `0.1.2`.
fn changelog_version(name: &str) -> Option<String> {
    let last = name.split_whitespace().last()?;
    if last.contains(['@', '<', '>']) {
        return None;
    }
    let without_epoch = last.split_once(':').map(|(_, v)| v).unwrap_or(last);
    let version = without_epoch
        .rsplit_once('-')
        .map(|(v, _)| v)
        .unwrap_or(without_epoch);
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Normalizes a requirement name, dropping pseudo-dependencies.
fn dependency_name(requirement: &str) -> Option<String> {
    if requirement.starts_with("rpmlib(") || requirement == "/bin/sh" {
        return None;
    }
    let name = requirement.split('(').next().unwrap_or(requirement).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// ============================================================================
// Backend
// ============================================================================

/// RPM package backend. The parsed header is the open handle.
#[derive(Debug, Default)]
pub struct RpmFormat {
    metadata: Option<PackageMetadata>,
    payload_offset: u64,
}

impl RpmFormat {
    fn metadata(&mut self, path: &Path) -> Result<&PackageMetadata, PackageError> {
        if self.metadata.is_none() {
            let (metadata, payload_offset) = read_metadata(path)?;
            self.payload_offset = payload_offset;
            self.metadata = Some(metadata);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| PackageError::corrupted(path, "header not loaded"))
    }

    fn open_payload(&self, path: &Path) -> Result<Box<dyn Read>, PackageError> {
        let mut file = File::open(path).map_err(|e| PackageError::read(path, e))?;
        file.seek(SeekFrom::Start(self.payload_offset))
            .map_err(|e| PackageError::read(path, e))?;
        decompress(file).map_err(|e| PackageError::corrupted(path, e.to_string()))
    }

    /// Lists payload members, turning data-less hard link entries into
    /// links to the member that carries the data.
    fn list_payload(&self, path: &Path) -> Result<Vec<Member>, PackageError> {
        let corrupt = |e: io::Error| PackageError::corrupted(path, e.to_string());
        let mut reader = cpio::NewcReader::new(self.open_payload(path)?).map_err(corrupt)?;

        let mut members = Vec::new();
        let mut inodes: HashMap<u32, Vec<(usize, bool)>> = HashMap::new();
        loop {
            let (name, mode, size, ino, nlink) = {
                let entry = reader.entry();
                (
                    entry.name().to_string(),
                    entry.mode(),
                    entry.file_size(),
                    entry.ino(),
                    entry.nlink(),
                )
            };
            if name == CPIO_TRAILER {
                break;
            }
            let kind = match mode & S_IFMT {
                S_IFDIR => MemberKind::Dir,
                S_IFLNK => {
                    let mut target = String::new();
                    reader.read_to_string(&mut target).map_err(corrupt)?;
                    MemberKind::Symlink(target)
                }
                S_IFREG => MemberKind::File,
                _ => MemberKind::Other,
            };
            if kind == MemberKind::File && nlink > 1 {
                inodes.entry(ino).or_default().push((members.len(), size > 0));
            }
            members.push(Member::new(&name, kind));
            reader = cpio::NewcReader::new(reader.finish().map_err(corrupt)?).map_err(corrupt)?;
        }

        for group in inodes.values() {
            let Some(&(carrier, _)) = group.iter().find(|(_, has_data)| *has_data) else {
                continue;
            };
            let carrier_path = members[carrier].path.clone();
            for &(idx, has_data) in group {
                if !has_data {
                    members[idx].kind = MemberKind::Hardlink(carrier_path.clone());
                }
            }
        }
        Ok(members)
    }
}

impl PackageFormat for RpmFormat {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        let metadata = self.metadata(path)?;
        let missing = |field| PackageError::MissingField {
            path: path.display().to_string(),
            field,
        };
        let name = metadata.get_name().map_err(|_| missing("Name"))?;
        let version = metadata.get_version().map_err(|_| missing("Version"))?;
        let release = metadata.get_release().map_err(|_| missing("Release"))?;
        let arch = metadata.get_arch().map_err(|_| missing("Arch"))?;
        let epoch = metadata
            .get_epoch()
            .ok()
            .and_then(|e| u32::try_from(e).ok())
            .unwrap_or(0);

        data.set_name(name);
        data.set_version(version);
        data.set_release(release);
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
        let metadata = self.metadata(path)?;

        if flags.contains(EnsureFlags::FILES) {
            // packages without content carry no file tags at all
            let files = metadata
                .get_file_paths()
                .map(|paths| {
                    paths
                        .iter()
                        .map(|p| normalize_member_path(&p.to_string_lossy()))
                        .collect()
                })
                .unwrap_or_default();
            data.set_filelist(files);
        }

        if flags.contains(EnsureFlags::DEPS) {
            let mut seen = BTreeSet::new();
            let deps = metadata
                .get_requires()
                .unwrap_or_default()
                .iter()
                .filter_map(|d| dependency_name(&d.name))
                .filter(|d| seen.insert(d.clone()))
                .collect();
            data.set_deps(deps);
        }

        if flags.contains(EnsureFlags::LICENSE) {
            if let Ok(license) = metadata.get_license() {
                let (spdx, unknown) = license_to_spdx(license);
                for token in unknown {
                    data.log(
                        LogLevel::Debug,
                        &format!("Unknown license component '{}'", token),
                    );
                }
                data.set_license(&spdx);
            }
        }

        if flags.contains(EnsureFlags::URL) {
            if let Ok(url) = metadata.get_url() {
                data.set_url(url);
            }
        }

        if flags.contains(EnsureFlags::VCS) {
            if let Ok(vcs) = metadata.get_vcs() {
                data.set_vcs(vcs);
            }
        }

        if flags.contains(EnsureFlags::SOURCE) {
            if let Ok(srpm) = metadata.get_source_rpm() {
                let nevra = srpm.strip_suffix(".src.rpm").unwrap_or(srpm);
                let pkgname = nevra.rsplitn(3, '-').nth(2).unwrap_or(nevra);
                data.set_source_nevra(nevra);
                data.set_source_pkgname(pkgname);
            }
        }

        if flags.contains(EnsureFlags::RELEASES) {
            for entry in metadata.get_changelog_entries().unwrap_or_default() {
                let Some(version) = changelog_version(&entry.name) else {
                    continue;
                };
                let timestamp: u64 = entry.timestamp.try_into().unwrap_or(0);
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
        self.metadata(path)?;
        let writer = TreeWriter::new(dest)?;

        let members = self.list_payload(path)?;
        let selected = select_members(&members, globs);
        if selected.is_empty() {
            return Ok(());
        }
        let kinds: HashMap<&str, &MemberKind> =
            members.iter().map(|m| (m.path.as_str(), &m.kind)).collect();

        let corrupt = |e: io::Error| PackageError::corrupted(path, e.to_string());
        let mut reader = cpio::NewcReader::new(self.open_payload(path)?).map_err(corrupt)?;
        let mut deferred = Vec::new();
        loop {
            let (name, mode) = {
                let entry = reader.entry();
                (entry.name().to_string(), entry.mode())
            };
            if name == CPIO_TRAILER {
                break;
            }
            let member = normalize_member_path(&name);
            if selected.contains(&member) {
                match kinds.get(member.as_str()) {
                    Some(MemberKind::Dir) => writer.dir(&member)?,
                    Some(MemberKind::File) => {
                        writer.file(&member, &mut reader, Some(mode))?;
                    }
                    Some(MemberKind::Symlink(target)) => {
                        writer.symlink(&member, target)?;
                    }
                    Some(MemberKind::Hardlink(target)) => deferred.push((member, target.clone())),
                    _ => {}
                }
            }
            reader = cpio::NewcReader::new(reader.finish().map_err(corrupt)?).map_err(corrupt)?;
        }

        for (member, target) in deferred {
            writer.hardlink(&member, &target)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.metadata = None;
    }

    fn compare(&self, a: &PackageData, b: &PackageData) -> Option<Ordering> {
        Some(
            a.name()
                .cmp(b.name())
                .then_with(|| {
                    evr_cmp(
                        (a.epoch(), a.version(), a.release()),
                        (b.epoch(), b.version(), b.release()),
                    )
                })
                .then_with(|| a.arch().cmp(b.arch())),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::harvest::resolve::prune_versions;
    use crate::harvest::{Context, Package};

    #[test]
    fn test_license_conversion() {
        assert_eq!(license_to_spdx("GPLv2+").0, "GPL-2.0+");
        assert_eq!(
            license_to_spdx("GPLv2+ and ASL 2.0").0,
            "GPL-2.0+ AND Apache-2.0"
        );
        assert_eq!(
            license_to_spdx("(MIT or BSD) and LGPLv2+").0,
            "(MIT OR BSD-3-Clause) AND LGPL-2.0+"
        );
        assert_eq!(license_to_spdx("MIT with advertising").0, "MIT");
        assert_eq!(license_to_spdx("GPLv3+ and Public domain").0, "GPL-3.0+");

        let (out, unknown) = license_to_spdx("Weird License");
        assert_eq!(out, "Weird License");
        assert_eq!(unknown, vec!["Weird License".to_string()]);
    }

    #[test]
    fn test_changelog_version() {
        assert_eq!(
            changelog_version("Richard Hughes <richard@hughsie.com> - 1:0.1.2-3").as_deref(),
            Some("0.1.2")
        );
        assert_eq!(
            changelog_version("Joe <joe@example.com> 2.0-1.fc21").as_deref(),
            Some("2.0")
        );
        assert_eq!(changelog_version("Joe <joe@example.com>"), None);
    }

    #[test]
    fn test_dependency_name() {
        assert_eq!(dependency_name("rpmlib(CompressedFileNames)"), None);
        assert_eq!(dependency_name("/bin/sh"), None);
        assert_eq!(
            dependency_name("libc.so.6(GLIBC_2.2.5)(64bit)").as_deref(),
            Some("libc.so.6")
        );
        assert_eq!(dependency_name("gtk3").as_deref(), Some("gtk3"));
    }

    /// Writes a small RPM with one desktop file and one binary.
    pub(crate) fn write_rpm(path: &Path, name: &str, version: &str, epoch: u32) {
        let package = rpm::PackageBuilder::new(name, version, "GPLv3+", "x86_64", "test package")
            .release("1.fc21")
            .epoch(epoch)
            .url("https://example.com/hello")
            .requires(rpm::Dependency::any("gtk3"))
            .with_file_contents(
                "[Desktop Entry]\nName=Hello\n",
                rpm::FileOptions::new(format!("/usr/share/applications/{}.desktop", name)),
            )
            .unwrap()
            .with_file_contents("bin", rpm::FileOptions::new(format!("/usr/bin/{}", name)))
            .unwrap()
            .build()
            .unwrap();
        let mut file = File::create(path).unwrap();
        package.write(&mut file).unwrap();
    }

    #[test]
    fn test_open_and_ensure() {
        let dir = tempfile::tempdir().unwrap();
        // filename deliberately disagrees with the header
        let path = dir.path().join("renamed-0-0.noarch.rpm");
        write_rpm(&path, "hello", "2.10", 1);

        let mut format = RpmFormat::default();
        let mut data = PackageData::default();
        format.open(&path, &mut data).unwrap();
        assert_eq!(data.name(), "hello");
        assert_eq!(data.version(), "2.10");
        assert_eq!(data.release(), "1.fc21");
        assert_eq!(data.arch(), "x86_64");
        assert_eq!(data.epoch(), 1);

        format
            .ensure(
                &path,
                EnsureFlags::FILES | EnsureFlags::DEPS | EnsureFlags::LICENSE | EnsureFlags::URL,
                &mut data,
            )
            .unwrap();
        assert_eq!(data.license.as_deref(), Some("GPL-3.0+"));
        assert_eq!(data.url.as_deref(), Some("https://example.com/hello"));
        assert!(data.deps.as_ref().unwrap().contains(&"gtk3".to_string()));
        assert!(data
            .filelist
            .as_ref()
            .unwrap()
            .contains(&"/usr/share/applications/hello.desktop".to_string()));

        let dest = dir.path().join("out");
        let globs = GlobSet::new(&["/usr/share/applications/*.desktop"]);
        format.explode(&path, &dest, Some(&globs)).unwrap();
        assert!(dest.join("usr/share/applications/hello.desktop").is_file());
        assert!(!dest.join("usr/bin/hello").exists());
    }

    #[test]
    fn test_open_rejects_non_rpm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.rpm");
        std::fs::write(&path, vec![0u8; 200]).unwrap();

        let mut format = RpmFormat::default();
        let err = format.open(&path, &mut PackageData::default()).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_header_epoch_is_known_at_registration() {
        let dir = tempfile::tempdir().unwrap();
        let newer_version = dir.path().join("foo-2.0-1.fc21.x86_64.rpm");
        let with_epoch = dir.path().join("foo-1.0-1.fc21.x86_64.rpm");
        write_rpm(&newer_version, "foo", "2.0", 0);
        write_rpm(&with_epoch, "foo", "1.0", 2);

        let mut context = Context::new(ContextConfig::default());
        context.add_filename(&with_epoch).unwrap();
        let registered = &context.packages()[0];
        assert_eq!(registered.epoch(), 2);
        assert_eq!(registered.nevr(), "foo-2:1.0-1.fc21");

        let mut packages: Vec<Package> = [&newer_version, &with_epoch]
            .into_iter()
            .map(|path| {
                let mut package = Package::from_filename(path).unwrap();
                package.open().unwrap();
                package
            })
            .collect();
        assert_eq!(prune_versions(&mut packages), 1);
        assert!(!packages[0].enabled());
        assert!(packages[1].enabled());
    }
}
