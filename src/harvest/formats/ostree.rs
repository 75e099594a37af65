//! OSTree branch backend.
//!
//! A "package" is a ref such as `app/org.gnome.Maps/x86_64/stable` inside a
//! repository. Identity comes from the ref; content is read with the
//! `ostree` tool.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;
use walkdir::WalkDir;

use crate::harvest::explode::{normalize_member_path, GlobSet, TreeWriter};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};

/// Splits `kind/name/arch/branch` into identity fields: the kind becomes the
/// release and the branch the version.
pub(crate) fn guess_from_ref(refname: &str, data: &mut PackageData) {
    let parts: Vec<&str> = refname.split('/').collect();
    match parts.as_slice() {
        [kind, name, arch, branch] => {
            data.set_name(name);
            data.set_arch(arch);
            data.set_version(branch);
            data.set_release(kind);
        }
        _ => {
            data.set_name(refname);
            data.set_arch("noarch");
            data.set_version("master");
            data.set_release("app");
        }
    }
}

/// OSTree backend. Holds the repository and the ref.
#[derive(Debug)]
pub struct OstreeFormat {
    repo: PathBuf,
    refname: String,
}

impl OstreeFormat {
    pub fn new(repo: &Path, refname: &str) -> Self {
        Self {
            repo: repo.to_path_buf(),
            refname: refname.to_string(),
        }
    }

    pub fn refname(&self) -> &str {
        &self.refname
    }

    fn run(&self, args: &[&str]) -> Result<String, PackageError> {
        let repo_arg = format!("--repo={}", self.repo.display());
        let command = format!("ostree {} {}", args.join(" "), repo_arg);
        debug!(command = %command, "Running ostree");
        let output = Command::new("ostree")
            .args(args)
            .arg(&repo_arg)
            .output()
            .map_err(|e| PackageError::Command {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(PackageError::Command {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parses `ostree ls -R` output. Each line ends with the path; directories
/// start with `d`.
fn parse_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| !line.starts_with('d'))
        .filter_map(|line| line.split(" -> ").next()?.split_whitespace().last())
        .filter(|path| path.starts_with('/'))
        .map(normalize_member_path)
        .collect()
}

impl PackageFormat for OstreeFormat {
    fn name(&self) -> &'static str {
        "ostree"
    }

    fn open(&mut self, _path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        guess_from_ref(&self.refname, data);
        Ok(())
    }

    fn ensure(
        &mut self,
        _path: &Path,
        flags: EnsureFlags,
        data: &mut PackageData,
    ) -> Result<(), PackageError> {
        if flags.contains(EnsureFlags::FILES) {
            let listing = self.run(&["ls", "-R", self.refname.as_str()])?;
            data.set_filelist(parse_listing(&listing));
        }
        if flags.contains(EnsureFlags::DEPS) {
            data.set_deps(Vec::new());
        }
        if flags.contains(EnsureFlags::SOURCE) {
            data.set_source_nevra(&self.refname);
            let name = data.name().to_string();
            data.set_source_pkgname(&name);
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
        let staging = tempfile::Builder::new()
            .prefix("ostree-checkout")
            .tempdir()
            .map_err(|e| PackageError::write(dest, e))?;
        let checkout = staging.path().join("tree");
        let checkout_arg = checkout.display().to_string();
        self.run(&["checkout", "--user-mode", self.refname.as_str(), checkout_arg.as_str()])?;

        for entry in WalkDir::new(&checkout).follow_links(false) {
            let entry = entry.map_err(|e| PackageError::corrupted(&checkout, e.to_string()))?;
            let Ok(relative) = entry.path().strip_prefix(&checkout) else {
                continue;
            };
            let member = normalize_member_path(&relative.to_string_lossy());
            if member == "/" || globs.is_some_and(|g| !g.matches(&member)) {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_dir() {
                writer.dir(&member)?;
            } else if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())
                    .map_err(|e| PackageError::read(entry.path(), e))?;
                writer.symlink(&member, &target.to_string_lossy())?;
            } else if file_type.is_file() {
                let mut file = std::fs::File::open(entry.path())
                    .map_err(|e| PackageError::read(entry.path(), e))?;
                writer.file(&member, &mut file, None)?;
            }
        }
        Ok(())
    }

    fn compare(&self, a: &PackageData, b: &PackageData) -> Option<Ordering> {
        Some(a.name().cmp(b.name()))
    }
}
