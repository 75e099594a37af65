//! Firmware cabinet backend.
//!
//! Cabinets carry no package header; identity comes from the filename and
//! content is listed and extracted with the `gcab` tool.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::harvest::explode::{normalize_member_path, GlobSet};
use crate::harvest::package::PackageData;
use crate::harvest::traits::{EnsureFlags, PackageError, PackageFormat};

/// Placeholder for identity parts a cabinet name does not carry.
pub const CAB_UNKNOWN: &str = "unknown";

/// Architecture recorded for cabinets.
pub const CAB_ARCH: &str = "noarch";

/// Splits `name-version.cab` at the last `-`.
pub(crate) fn guess_from_filename(basename: &str, data: &mut PackageData) {
    let stem = basename.strip_suffix(".cab").unwrap_or(basename);
    match stem.rsplit_once('-') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            data.set_name(name);
            data.set_version(version);
        }
        _ => {
            data.set_name(stem);
            data.set_version(CAB_UNKNOWN);
        }
    }
    data.set_release(CAB_UNKNOWN);
    data.set_arch(CAB_ARCH);
}

fn run_gcab(args: &[&str], path: &Path) -> Result<String, PackageError> {
    let command = format!("gcab {}", args.join(" "));
    debug!(command = %command, path = %path.display(), "Running gcab");
    let output = Command::new("gcab")
        .args(args)
        .arg(path)
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

/// Cabinet backend. Stateless between calls.
#[derive(Debug, Default)]
pub struct CabFormat;

impl PackageFormat for CabFormat {
    fn name(&self) -> &'static str {
        "cab"
    }

    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError> {
        if !path.is_file() {
            return Err(PackageError::read(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such cabinet"),
            ));
        }
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        guess_from_filename(&basename, data);
        Ok(())
    }

    fn ensure(
        &mut self,
        path: &Path,
        flags: EnsureFlags,
        data: &mut PackageData,
    ) -> Result<(), PackageError> {
        if flags.contains(EnsureFlags::FILES) {
            let listing = run_gcab(&["--list"], path)?;
            let files = listing
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(normalize_member_path)
                .collect();
            data.set_filelist(files);
        }
        if flags.contains(EnsureFlags::DEPS) {
            data.set_deps(Vec::new());
        }
        Ok(())
    }

    fn explode(
        &mut self,
        path: &Path,
        dest: &Path,
        _globs: Option<&GlobSet>,
    ) -> Result<(), PackageError> {
        std::fs::create_dir_all(dest).map_err(|e| PackageError::write(dest, e))?;
        let dest_str = dest.display().to_string();
        run_gcab(&["--extract", "--directory", dest_str.as_str()], path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_filename() {
        let mut data = PackageData::default();
        guess_from_filename("ColorHug2-2.0.3.cab", &mut data);
        assert_eq!(data.name(), "ColorHug2");
        assert_eq!(data.version(), "2.0.3");
        assert_eq!(data.release(), CAB_UNKNOWN);

        let mut data = PackageData::default();
        guess_from_filename("firmware.cab", &mut data);
        assert_eq!(data.name(), "firmware");
        assert_eq!(data.version(), CAB_UNKNOWN);
        assert!(data.has_identity());
    }
}
