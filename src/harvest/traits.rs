//! Core traits and types shared by the package backends.
//!
//! This module defines:
//! - Lazily populated field groups via [`EnsureFlags`]
//! - Format-specific backends via [`PackageFormat`]
//! - The backend error type [`PackageError`]

use bitflags::bitflags;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

use crate::harvest::explode::GlobSet;
use crate::harvest::package::PackageData;

// ============================================================================
// Field Groups
// ============================================================================

bitflags! {
    /// Groups of package fields that are populated on demand.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnsureFlags: u32 {
        const NEVRA = 1 << 0;
        const FILES = 1 << 1;
        const RELEASES = 1 << 2;
        const DEPS = 1 << 3;
        const LICENSE = 1 << 4;
        const URL = 1 << 5;
        const SOURCE = 1 << 6;
        const VCS = 1 << 7;
    }
}

impl EnsureFlags {
    /// Groups whose data is reference counted and dropped by `clear`.
    pub const CLEARABLE: EnsureFlags = EnsureFlags::FILES.union(EnsureFlags::DEPS);
}

/// Broad package category, used by version pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageKind {
    /// Distribution package; only the newest version of a name is kept.
    #[default]
    Default,

    /// Self-contained bundle; pruned like `Default`.
    Bundle,

    /// Firmware and similar; every version is kept.
    Firmware,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Format-specific half of a [`Package`](crate::harvest::Package).
///
/// The generic package owns the populated fields in [`PackageData`] and
/// calls into the backend only for what it cannot do itself. Backends may
/// keep an open handle (a parsed header, a decompressed control file)
/// between `open` and `close`.
pub trait PackageFormat: Send {
    /// Short format identifier (`"rpm"`, `"deb"`, ...).
    fn name(&self) -> &'static str;

    /// Opens the artifact and populates at least the identity fields.
    ///
    /// Identity setters on [`PackageData`] ignore values once a field is
    /// set, so reopening after `close` never changes identity.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] if the file is unreadable or malformed.
    fn open(&mut self, path: &Path, data: &mut PackageData) -> Result<(), PackageError>;

    /// Populates the requested field groups.
    ///
    /// Only groups not yet populated are requested. The default does
    /// nothing, for backends that fill everything in `open`.
    fn ensure(
        &mut self,
        _path: &Path,
        _flags: EnsureFlags,
        _data: &mut PackageData,
    ) -> Result<(), PackageError> {
        Ok(())
    }

    /// Extracts package content below `dest`.
    ///
    /// When `globs` is set only matching members (and the targets of
    /// matching links) are written. Existing files are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Write`] when the destination cannot be
    /// written; other variants describe unreadable package content.
    fn explode(
        &mut self,
        path: &Path,
        dest: &Path,
        globs: Option<&GlobSet>,
    ) -> Result<(), PackageError>;

    /// Releases any open handle. Populated fields survive.
    fn close(&mut self) {}

    /// Format-specific ordering of two packages of the same format.
    ///
    /// `None` selects the generic name/epoch/version/release/arch order.
    fn compare(&self, _a: &PackageData, _b: &PackageData) -> Option<Ordering> {
        None
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while opening, populating or exploding a package.
#[derive(Error, Debug)]
pub enum PackageError {
    /// Package file could not be read
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Extension or payload format is not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Package file is corrupted or malformed
    #[error("Corrupted package '{path}': {reason}")]
    Corrupted { path: String, reason: String },

    /// A required field could not be determined
    #[error("Package '{path}' has no {field}")]
    MissingField { path: String, field: &'static str },

    /// Destination could not be written
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A member path would escape the destination directory
    #[error("Path traversal attempt rejected: '{attempted}'")]
    PathTraversal { attempted: String },

    /// An external helper tool failed
    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },
}

impl PackageError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        PackageError::Read {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn corrupted(path: &Path, reason: impl Into<String>) -> Self {
        PackageError::Corrupted {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        PackageError::Write {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether this error means the build environment is unreliable.
    ///
    /// Fatal errors abort the whole build; the rest only disqualify the
    /// package they came from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PackageError::Write { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
