//! Package format backends.
//!
//! Each backend implements [`PackageFormat`] for one artifact type.
//! [`Backend`] is the closed set of them, chosen from the filename
//! extension when a package is added.

pub mod alpm;
pub mod cab;
pub mod deb;
pub mod eopkg;
pub mod ostree;
pub mod rpm;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub use alpm::AlpmFormat;
pub use cab::CabFormat;
pub use deb::DebFormat;
pub use eopkg::EopkgFormat;
pub use ostree::OstreeFormat;
pub use rpm::RpmFormat;

use crate::harvest::explode::{
    normalize_member_path, select_members, GlobSet, Member, MemberKind, TreeWriter,
};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat, PackageKind};
use crate::harvest::vercmp::evr_cmp;

// ============================================================================
// Backend Dispatch
// ============================================================================

/// The format-specific half of a [`Package`](crate::harvest::Package).
#[derive(Debug)]
pub enum Backend {
    Rpm(RpmFormat),
    Deb(DebFormat),
    Alpm(AlpmFormat),
    Cab(CabFormat),
    Eopkg(EopkgFormat),
    Ostree(OstreeFormat),
    Memory(MemoryPackage),
}

impl Backend {
    pub fn format(&self) -> &dyn PackageFormat {
        match self {
            Backend::Rpm(f) => f,
            Backend::Deb(f) => f,
            Backend::Alpm(f) => f,
            Backend::Cab(f) => f,
            Backend::Eopkg(f) => f,
            Backend::Ostree(f) => f,
            Backend::Memory(f) => f,
        }
    }

    pub fn format_mut(&mut self) -> &mut dyn PackageFormat {
        match self {
            Backend::Rpm(f) => f,
            Backend::Deb(f) => f,
            Backend::Alpm(f) => f,
            Backend::Cab(f) => f,
            Backend::Eopkg(f) => f,
            Backend::Ostree(f) => f,
            Backend::Memory(f) => f,
        }
    }

    /// Chooses a backend from the filename extension.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::UnsupportedFormat`] for anything else.
    pub fn for_path(path: &Path) -> Result<(Self, PackageKind), PackageError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_alpm = [".pkg.tar", ".pkg.tar.xz", ".pkg.tar.zst", ".pkg.tar.gz"]
            .iter()
            .any(|suffix| name.ends_with(suffix));

        if name.ends_with(".rpm") {
            Ok((Backend::Rpm(RpmFormat::default()), PackageKind::Default))
        } else if name.ends_with(".deb") {
            Ok((Backend::Deb(DebFormat::default()), PackageKind::Default))
        } else if is_alpm {
            Ok((Backend::Alpm(AlpmFormat::default()), PackageKind::Default))
        } else if name.ends_with(".cab") {
            Ok((Backend::Cab(CabFormat), PackageKind::Firmware))
        } else if name.ends_with(".eopkg") {
            Ok((Backend::Eopkg(EopkgFormat::default()), PackageKind::Default))
        } else {
            Err(PackageError::UnsupportedFormat(path.display().to_string()))
        }
    }

    pub fn ostree(repo: &Path, refname: &str) -> Self {
        Backend::Ostree(OstreeFormat::new(repo, refname))
    }

    /// Fills identity fields that are knowable without opening the artifact.
    ///
    /// Only formats whose artifacts carry no identity of their own are
    /// guessed. Package headers may hold an epoch the filename does not
    /// show, so those formats are always opened.
    pub(crate) fn guess_identity(&self, basename: &str, data: &mut PackageData) {
        match self {
            Backend::Cab(_) => cab::guess_from_filename(basename, data),
            Backend::Ostree(f) => ostree::guess_from_ref(f.refname(), data),
            Backend::Memory(f) => f.fill_identity(data),
            Backend::Rpm(_) | Backend::Deb(_) | Backend::Alpm(_) | Backend::Eopkg(_) => {}
        }
    }
}

// ============================================================================
// In-Memory Package
// ============================================================================

/// Content of one in-memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEntry {
    File(Vec<u8>),
    Symlink(String),
}

/// A package assembled in memory. Used by tests and by callers that
/// synthesize packages from other sources.
#[derive(Debug, Clone)]
pub struct MemoryPackage {
    name: String,
    version: String,
    release: String,
    arch: String,
    epoch: u32,
    filename: Option<PathBuf>,
    files: BTreeMap<String, MemoryEntry>,
    deps: Vec<String>,
    license: Option<String>,
    url: Option<String>,
    vcs: Option<String>,
    source: Option<String>,
    releases: Vec<(String, u64)>,
    pub(crate) kind: PackageKind,
}

impl MemoryPackage {
    pub fn new(name: &str, version: &str, release: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            epoch: 0,
            filename: None,
            files: BTreeMap::new(),
            deps: Vec::new(),
            license: None,
            url: None,
            vcs: None,
            source: None,
            releases: Vec::new(),
            kind: PackageKind::Default,
        }
    }

    pub fn epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    /// Adds a regular file at absolute `path`.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files
            .insert(normalize_member_path(path), MemoryEntry::File(content.to_vec()));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.files.insert(
            normalize_member_path(path),
            MemoryEntry::Symlink(target.to_string()),
        );
        self
    }

    pub fn dep(mut self, name: &str) -> Self {
        self.deps.push(name.to_string());
        self
    }

    pub fn license(mut self, license: &str) -> Self {
        self.license = Some(license.to_string());
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn vcs(mut self, vcs: &str) -> Self {
        self.vcs = Some(vcs.to_string());
        self
    }

    /// Sets the source package name; the source nevra is derived from it.
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Adds a change-history entry.
    pub fn history(mut self, version: &str, timestamp: u64) -> Self {
        self.releases.push((version.to_string(), timestamp));
        self
    }

    pub fn filename(mut self, filename: &Path) -> Self {
        self.filename = Some(filename.to_path_buf());
        self
    }

    pub fn kind(mut self, kind: PackageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Filename reported for the package; defaults to the nevra.
    pub fn path(&self) -> PathBuf {
        self.filename.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "{}-{}-{}.{}",
                self.name, self.version, self.release, self.arch
            ))
        })
    }

    fn fill_identity(&self, data: &mut PackageData) {
        data.set_name(&self.name);
        data.set_version(&self.version);
        data.set_release(&self.release);
        data.set_arch(&self.arch);
        data.set_epoch(self.epoch);
    }

    fn members(&self) -> Vec<Member> {
        self.files
            .iter()
            .map(|(path, entry)| {
                let kind = match entry {
                    MemoryEntry::File(_) => MemberKind::File,
                    MemoryEntry::Symlink(target) => MemberKind::Symlink(target.clone()),
                };
                Member::new(path, kind)
            })
            .collect()
    }
}

impl PackageFormat for MemoryPackage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&mut self, _path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        self.fill_identity(data);
        Ok(())
    }

    fn ensure(
        &mut self,
        _path: &Path,
        flags: EnsureFlags,
        data: &mut PackageData,
    ) -> Result<(), PackageError> {
        if flags.contains(EnsureFlags::FILES) {
            data.set_filelist(self.files.keys().cloned().collect());
        }
        if flags.contains(EnsureFlags::DEPS) {
            data.set_deps(self.deps.clone());
        }
        if flags.contains(EnsureFlags::LICENSE) {
            if let Some(license) = &self.license {
                data.set_license(license);
            }
        }
        if flags.contains(EnsureFlags::URL) {
            if let Some(url) = &self.url {
                data.set_url(url);
            }
        }
        if flags.contains(EnsureFlags::VCS) {
            if let Some(vcs) = &self.vcs {
                data.set_vcs(vcs);
            }
        }
        if flags.contains(EnsureFlags::SOURCE) {
            let source = self.source.as_deref().unwrap_or(&self.name);
            data.set_source_nevra(&format!("{}-{}-{}", source, self.version, self.release));
            data.set_source_pkgname(source);
        }
        if flags.contains(EnsureFlags::RELEASES) {
            for (version, timestamp) in &self.releases {
                data.add_release(version, *timestamp);
            }
        }
        Ok(())
    }

    fn explode(
        &mut self,
        _path: &Path,
        dest: &Path,
        globs: Option<&GlobSet>,
    ) -> Result<(), PackageError> {
        let writer = TreeWriter::new(dest)?;
        let selected = select_members(&self.members(), globs);
        for path in &selected {
            match self.files.get(path) {
                Some(MemoryEntry::File(content)) => {
                    writer.file(path, &mut Cursor::new(content.as_slice()), Some(0o644))?;
                }
                Some(MemoryEntry::Symlink(target)) => {
                    writer.symlink(path, target)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    fn compare(&self, a: &PackageData, b: &PackageData) -> Option<std::cmp::Ordering> {
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
