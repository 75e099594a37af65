//! The generic package.
//!
//! [`Package`] is the format-independent half of an on-disk artifact: it
//! owns the identity, the lazily populated field groups with their
//! reference counts, the per-package configuration and the build log. The
//! format-specific half lives in a [`Backend`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::harvest::explode::GlobSet;
use crate::harvest::formats::{Backend, MemoryPackage};
use crate::harvest::log::{LogLevel, PackageLog};
use crate::harvest::traits::{EnsureFlags, PackageError, PackageKind};
use crate::harvest::vercmp::vercmp;
use crate::model::Release;

/// Architectures considered 64-bit by multi-arch pruning.
const ARCHES_64BIT: &[&str] = &[
    "x86_64", "amd64", "aarch64", "arm64", "ppc64", "ppc64le", "ppc64el", "s390x", "riscv64",
    "mips64el", "sparc64", "loong64",
];

/// Architectures meaning "installable anywhere".
const ARCHES_ANY: &[&str] = &["noarch", "all", "any"];

// ============================================================================
// Populated Fields
// ============================================================================

/// Fields populated by opening and ensuring a package.
///
/// Identity setters are first-writer-wins: once a field is set, later
/// calls leave it untouched.
#[derive(Debug, Default)]
pub struct PackageData {
    name: Option<String>,
    version: Option<String>,
    release: Option<String>,
    arch: Option<String>,
    epoch: u32,
    identity_locked: bool,

    pub(crate) filelist: Option<Vec<String>>,
    pub(crate) deps: Option<Vec<String>>,
    pub(crate) releases: Vec<Release>,
    pub(crate) license: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) vcs: Option<String>,
    pub(crate) source_nevra: Option<String>,
    pub(crate) source_pkgname: Option<String>,

    pub(crate) log: PackageLog,
}

impl PackageData {
    pub fn set_name(&mut self, value: &str) {
        if !self.identity_locked {
            self.name.get_or_insert_with(|| value.to_string());
        }
    }

    pub fn set_version(&mut self, value: &str) {
        if !self.identity_locked {
            self.version.get_or_insert_with(|| value.to_string());
        }
    }

    pub fn set_release(&mut self, value: &str) {
        if !self.identity_locked {
            self.release.get_or_insert_with(|| value.to_string());
        }
    }

    pub fn set_arch(&mut self, value: &str) {
        if !self.identity_locked {
            self.arch.get_or_insert_with(|| value.to_string());
        }
    }

    /// Sets the epoch; 0 means unset, so only the first non-zero value sticks.
    pub fn set_epoch(&mut self, value: u32) {
        if !self.identity_locked && self.epoch == 0 {
            self.epoch = value;
        }
    }

    /// Freezes name, version, release, arch and epoch. Later setter calls
    /// are ignored.
    pub(crate) fn lock_identity(&mut self) {
        self.identity_locked = true;
    }

    pub fn is_identity_locked(&self) -> bool {
        self.identity_locked
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }

    pub fn release(&self) -> &str {
        self.release.as_deref().unwrap_or_default()
    }

    pub fn arch(&self) -> &str {
        self.arch.as_deref().unwrap_or_default()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Whether name, version, release and arch are all known.
    pub fn has_identity(&self) -> bool {
        self.name.is_some()
            && self.version.is_some()
            && self.release.is_some()
            && self.arch.is_some()
    }

    pub fn set_filelist(&mut self, files: Vec<String>) {
        self.filelist = Some(files);
    }

    pub fn set_deps(&mut self, deps: Vec<String>) {
        self.deps = Some(deps);
    }

    pub fn set_license(&mut self, value: &str) {
        self.license = Some(value.to_string());
    }

    pub fn set_url(&mut self, value: &str) {
        self.url = Some(value.to_string());
    }

    pub fn set_vcs(&mut self, value: &str) {
        self.vcs = Some(value.to_string());
    }

    pub fn set_source_nevra(&mut self, value: &str) {
        self.source_nevra = Some(value.to_string());
    }

    pub fn set_source_pkgname(&mut self, value: &str) {
        self.source_pkgname = Some(value.to_string());
    }

    /// Records a change-history entry, keeping the earliest timestamp seen
    /// for a version.
    pub fn add_release(&mut self, version: &str, timestamp: u64) {
        match self.releases.iter_mut().find(|r| r.version == version) {
            Some(existing) if timestamp < existing.timestamp => existing.timestamp = timestamp,
            Some(_) => {}
            None => self.releases.push(Release::new(version, timestamp)),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.log.log(self.name(), level, message);
    }

    fn evr(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}", self.version(), self.release())
        } else {
            format!("{}:{}-{}", self.epoch, self.version(), self.release())
        }
    }

    fn nevr(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}-{}", self.name(), self.version(), self.release())
        } else {
            format!(
                "{}-{}:{}-{}",
                self.name(),
                self.epoch,
                self.version(),
                self.release()
            )
        }
    }
}

#[derive(Debug)]
struct IdentityStrings {
    nevr: String,
    nevra: String,
    evr: String,
}

// ============================================================================
// Package
// ============================================================================

/// One installable artifact behind a uniform interface.
pub struct Package {
    filename: PathBuf,
    basename: String,
    kind: PackageKind,
    enabled: bool,
    is_open: bool,
    ensured: EnsureFlags,
    files_refs: u32,
    deps_refs: u32,
    data: PackageData,
    identity: OnceLock<IdentityStrings>,
    config: BTreeMap<String, String>,
    backend: Backend,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("filename", &self.filename)
            .field("format", &self.backend.format().name())
            .field("name", &self.data.name())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Package {
    pub(crate) fn with_backend(filename: PathBuf, kind: PackageKind, backend: Backend) -> Self {
        let basename = filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            basename,
            kind,
            enabled: true,
            is_open: false,
            ensured: EnsureFlags::empty(),
            files_refs: 0,
            deps_refs: 0,
            data: PackageData::default(),
            identity: OnceLock::new(),
            config: BTreeMap::new(),
            backend,
        }
    }

    /// Creates a package for `path`, choosing the backend by extension.
    ///
    /// Identity is guessed from the filename where the format allows it;
    /// otherwise the caller must [`open`](Self::open) the package.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::UnsupportedFormat`] for unknown extensions.
    pub fn from_filename(path: &Path) -> Result<Self, PackageError> {
        let (backend, kind) = Backend::for_path(path)?;
        let mut package = Self::with_backend(path.to_path_buf(), kind, backend);
        package.backend.guess_identity(&package.basename, &mut package.data);
        if package.data.has_identity() {
            package.mark_identity();
        }
        Ok(package)
    }

    /// Creates an OSTree branch package.
    pub fn ostree(repo: &Path, refname: &str) -> Self {
        let backend = Backend::ostree(repo, refname);
        let mut package = Self::with_backend(repo.join(refname), PackageKind::Bundle, backend);
        package.basename = refname.to_string();
        package.backend.guess_identity(refname, &mut package.data);
        package.mark_identity();
        package
    }

    /// Creates an in-memory package.
    pub fn memory(package: MemoryPackage) -> Self {
        let filename = package.path();
        let kind = package.kind;
        let mut package = Self::with_backend(filename, kind, Backend::Memory(package));
        package.backend.guess_identity("", &mut package.data);
        package.mark_identity();
        package
    }

    fn mark_identity(&mut self) {
        self.data.lock_identity();
        self.ensured |= EnsureFlags::NEVRA;
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Opens the package. Idempotent while open; reopening after
    /// [`close`](Self::close) keeps the existing identity.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] if the artifact is unreadable or lacks
    /// identity fields.
    pub fn open(&mut self) -> Result<(), PackageError> {
        if self.is_open {
            return Ok(());
        }
        self.backend
            .format_mut()
            .open(&self.filename, &mut self.data)?;
        if !self.data.has_identity() {
            return Err(PackageError::MissingField {
                path: self.filename.display().to_string(),
                field: "name, version, release or arch",
            });
        }
        self.is_open = true;
        self.mark_identity();
        Ok(())
    }

    /// Populates the requested field groups that are not yet populated and
    /// takes a reference on the clearable ones.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] if the backend fails to read a group.
    pub fn ensure(&mut self, flags: EnsureFlags) -> Result<(), PackageError> {
        let missing = flags.difference(self.ensured);
        if !missing.is_empty() {
            self.open()?;
            let wanted = missing.difference(EnsureFlags::NEVRA);
            if !wanted.is_empty() {
                self.backend
                    .format_mut()
                    .ensure(&self.filename, wanted, &mut self.data)?;
            }
            self.ensured |= missing;
        }
        if flags.contains(EnsureFlags::FILES) {
            self.files_refs += 1;
        }
        if flags.contains(EnsureFlags::DEPS) {
            self.deps_refs += 1;
        }
        Ok(())
    }

    /// Drops a reference on the file list and/or dependency list, freeing
    /// the data once nobody holds it. Other groups are never cleared.
    pub fn clear(&mut self, flags: EnsureFlags) {
        if flags.contains(EnsureFlags::FILES) && self.files_refs > 0 {
            self.files_refs -= 1;
            if self.files_refs == 0 {
                self.data.filelist = None;
                self.ensured.remove(EnsureFlags::FILES);
            }
        }
        if flags.contains(EnsureFlags::DEPS) && self.deps_refs > 0 {
            self.deps_refs -= 1;
            if self.deps_refs == 0 {
                self.data.deps = None;
                self.ensured.remove(EnsureFlags::DEPS);
            }
        }
    }

    /// Releases the backend handle; populated fields are kept.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible for backends holding external state.
    pub fn close(&mut self) -> Result<(), PackageError> {
        if self.is_open {
            self.backend.format_mut().close();
            self.is_open = false;
        }
        Ok(())
    }

    /// Extracts the package below `dest`, see [`PackageFormat::explode`].
    ///
    /// [`PackageFormat::explode`]: crate::harvest::PackageFormat::explode
    pub fn explode(&mut self, dest: &Path, globs: Option<&GlobSet>) -> Result<(), PackageError> {
        self.open()?;
        self.backend
            .format_mut()
            .explode(&self.filename, dest, globs)
    }

    /// Orders two packages, newest last.
    ///
    /// Uses the backend comparator when both packages share a format;
    /// otherwise name, epoch, version, release and arch in that order.
    pub fn compare(&self, other: &Package) -> Ordering {
        let format = self.backend.format();
        if format.name() == other.backend.format().name() {
            if let Some(ordering) = format.compare(&self.data, &other.data) {
                return ordering;
            }
        }
        self.name()
            .cmp(other.name())
            .then_with(|| self.epoch().cmp(&other.epoch()))
            .then_with(|| vercmp(self.version(), other.version()))
            .then_with(|| vercmp(self.release(), other.release()))
            .then_with(|| self.arch().cmp(other.arch()))
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    pub fn format_name(&self) -> &'static str {
        self.backend.format().name()
    }

    pub fn name(&self) -> &str {
        self.data.name()
    }

    pub fn version(&self) -> &str {
        self.data.version()
    }

    pub fn release(&self) -> &str {
        self.data.release()
    }

    pub fn arch(&self) -> &str {
        self.data.arch()
    }

    pub fn epoch(&self) -> u32 {
        self.data.epoch()
    }

    pub fn has_identity(&self) -> bool {
        self.data.has_identity()
    }

    fn identity_strings(&self) -> &IdentityStrings {
        self.identity.get_or_init(|| IdentityStrings {
            nevr: self.data.nevr(),
            nevra: format!("{}.{}", self.data.nevr(), self.data.arch()),
            evr: self.data.evr(),
        })
    }

    /// `name-[epoch:]version-release`. Memoized; identity never changes
    /// once set.
    pub fn nevr(&self) -> &str {
        &self.identity_strings().nevr
    }

    /// [`nevr`](Self::nevr) plus `.arch`.
    pub fn nevra(&self) -> &str {
        &self.identity_strings().nevra
    }

    /// `[epoch:]version-release`.
    pub fn evr(&self) -> &str {
        &self.identity_strings().evr
    }

    pub fn is_64bit(&self) -> bool {
        ARCHES_64BIT.contains(&self.arch())
    }

    pub fn is_any_arch(&self) -> bool {
        ARCHES_ANY.contains(&self.arch())
    }

    // ------------------------------------------------------------------------
    // Populated fields
    // ------------------------------------------------------------------------

    pub fn filelist(&self) -> &[String] {
        self.data.filelist.as_deref().unwrap_or_default()
    }

    pub fn deps(&self) -> &[String] {
        self.data.deps.as_deref().unwrap_or_default()
    }

    /// Appends dependencies not already present.
    pub fn add_deps<I: IntoIterator<Item = String>>(&mut self, deps: I) {
        let list = self.data.deps.get_or_insert_with(Vec::new);
        for dep in deps {
            if !list.contains(&dep) {
                list.push(dep);
            }
        }
    }

    pub fn releases(&self) -> &[Release] {
        &self.data.releases
    }

    pub fn license(&self) -> Option<&str> {
        self.data.license.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.data.url.as_deref()
    }

    pub fn vcs(&self) -> Option<&str> {
        self.data.vcs.as_deref()
    }

    pub fn source_nevra(&self) -> Option<&str> {
        self.data.source_nevra.as_deref()
    }

    pub fn source_pkgname(&self) -> Option<&str> {
        self.data.source_pkgname.as_deref()
    }

    pub fn is_ensured(&self, flags: EnsureFlags) -> bool {
        self.ensured.contains(flags)
    }

    // ------------------------------------------------------------------------
    // State, config and log
    // ------------------------------------------------------------------------

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    pub fn set_config(&mut self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.data.log(level, message);
    }

    pub fn log_contents(&self) -> String {
        self.data.log.contents()
    }

    /// Writes the log below the `LogDir` config key, if set and dirty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the log file cannot be written.
    pub fn flush_log(&self) -> std::io::Result<()> {
        match self.config("LogDir") {
            Some(dir) => self.data.log.flush(Path::new(dir), self.name()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(name: &str, version: &str, release: &str, arch: &str) -> Package {
        Package::memory(MemoryPackage::new(name, version, release, arch))
    }

    #[test]
    fn test_identity_strings() {
        let package = memory("gimp", "2.8", "1.fc21", "x86_64");
        assert_eq!(package.nevr(), "gimp-2.8-1.fc21");
        assert_eq!(package.nevra(), "gimp-2.8-1.fc21.x86_64");
        assert_eq!(package.evr(), "2.8-1.fc21");

        let with_epoch = Package::memory(MemoryPackage::new("gimp", "2.8", "1", "x86_64").epoch(2));
        assert_eq!(with_epoch.nevr(), "gimp-2:2.8-1");
        assert_eq!(with_epoch.evr(), "2:2.8-1");
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut package = memory("foo", "1.0", "1", "noarch");
        package.open().unwrap();
        let first = (package.name().to_string(), package.nevra().to_string());
        package.open().unwrap();
        assert_eq!(first, (package.name().to_string(), package.nevra().to_string()));

        package.close().unwrap();
        package.open().unwrap();
        assert_eq!(first.1, package.nevra());
    }

    #[test]
    fn test_identity_is_first_writer_wins() {
        let mut data = PackageData::default();
        data.set_name("foo");
        data.set_name("bar");
        data.set_epoch(1);
        data.set_epoch(3);
        assert_eq!(data.name(), "foo");
        assert_eq!(data.epoch(), 1);
    }

    #[test]
    fn test_clear_is_reference_counted() {
        let mut package = Package::memory(
            MemoryPackage::new("foo", "1.0", "1", "noarch")
                .file("/usr/bin/foo", b"bin")
                .dep("bar"),
        );

        package.ensure(EnsureFlags::FILES | EnsureFlags::DEPS).unwrap();
        package.ensure(EnsureFlags::FILES).unwrap();
        assert_eq!(package.filelist(), ["/usr/bin/foo".to_string()]);

        // two requesters on FILES, one on DEPS
        package.clear(EnsureFlags::FILES | EnsureFlags::DEPS);
        assert_eq!(package.filelist().len(), 1);
        assert!(package.deps().is_empty());

        package.clear(EnsureFlags::FILES);
        assert!(package.filelist().is_empty());
        assert!(!package.is_ensured(EnsureFlags::FILES));

        // ensure after clear repopulates
        package.ensure(EnsureFlags::FILES).unwrap();
        assert_eq!(package.filelist().len(), 1);
    }

    #[test]
    fn test_ensure_does_not_wipe_other_groups() {
        let mut package = Package::memory(
            MemoryPackage::new("foo", "1.0", "1", "noarch")
                .license("GPL-2.0+")
                .file("/usr/bin/foo", b"bin"),
        );
        package.ensure(EnsureFlags::LICENSE).unwrap();
        package.ensure(EnsureFlags::FILES).unwrap();
        package.clear(EnsureFlags::FILES | EnsureFlags::LICENSE);
        assert_eq!(package.license(), Some("GPL-2.0+"));
    }

    #[test]
    fn test_compare_reflexive_and_antisymmetric() {
        let packages = [
            memory("foo", "1.0", "1", "x86_64"),
            memory("foo", "2.0", "1", "x86_64"),
            memory("foo", "1.0", "2", "x86_64"),
            memory("foo", "1.0", "1", "i686"),
        ];
        for a in &packages {
            assert_eq!(a.compare(a), Ordering::Equal);
            for b in &packages {
                assert_eq!(a.compare(b), b.compare(a).reverse());
            }
        }
        assert_eq!(packages[0].compare(&packages[1]), Ordering::Less);
        assert_eq!(packages[2].compare(&packages[0]), Ordering::Greater);
    }

    #[test]
    fn test_arch_classes() {
        assert!(memory("foo", "1", "1", "x86_64").is_64bit());
        assert!(!memory("foo", "1", "1", "i686").is_64bit());
        assert!(memory("foo", "1", "1", "noarch").is_any_arch());
    }

    #[test]
    fn test_from_filename_rejects_unknown_extension() {
        let err = Package::from_filename(Path::new("/tmp/foo.zip")).unwrap_err();
        assert!(matches!(err, PackageError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_from_filename_guesses_cab_identity() {
        let package = Package::from_filename(Path::new("/srv/ColorHug2-2.0.3.cab")).unwrap();
        assert!(package.has_identity());
        assert!(package.is_ensured(EnsureFlags::NEVRA));
        assert_eq!(package.name(), "ColorHug2");
        assert_eq!(package.version(), "2.0.3");
        assert_eq!(package.kind(), PackageKind::Firmware);
    }

    #[test]
    fn test_rpm_identity_is_not_guessed_from_filename() {
        let package = Package::from_filename(Path::new("/srv/app-1.2-3.fc21.noarch.rpm")).unwrap();
        assert!(!package.has_identity());
        assert!(!package.is_ensured(EnsureFlags::NEVRA));
    }

    #[test]
    fn test_identity_is_frozen_once_known() {
        let mut data = PackageData::default();
        data.set_name("foo");
        data.set_version("1.0");
        data.set_release("1");
        data.set_arch("x86_64");
        data.lock_identity();

        data.set_epoch(2);
        data.set_version("2.0");
        assert_eq!(data.epoch(), 0);
        assert_eq!(data.version(), "1.0");

        let mut package = memory("foo", "1.0", "1", "x86_64");
        assert!(package.data.is_identity_locked());
        let nevr = package.nevr().to_string();
        package.close().unwrap();
        package.open().unwrap();
        assert_eq!(package.nevr(), nevr);
        assert_eq!(package.epoch(), 0);
    }
}
