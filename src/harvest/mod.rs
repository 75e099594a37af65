//! Harvest module - package access and the build pipeline.
//!
//! This module provides the core pieces of a build:
//! - **Packages**: [`Package`] over the [`formats`] backends
//! - **Plugins**: ordering and dispatch via [`PluginLoader`]
//! - **Pipeline**: the per-package [`Task`] and the [`Context`] session
//! - **Resolution**: pruning and cross-record checks in [`resolve`]

pub mod context;
pub mod explode;
pub mod formats;
pub mod loader;
pub mod log;
pub mod package;
pub mod pipeline;
pub mod resolve;
pub mod resources;
pub mod traits;
pub mod vercmp;

// Re-export commonly used types
pub use traits::{EnsureFlags, PackageError, PackageFormat, PackageKind};

pub use context::{BuildStats, Context, ContextError};
pub use explode::GlobSet;
pub use formats::{Backend, MemoryPackage};
pub use loader::{LoaderError, PluginLoader};
pub use package::{Package, PackageData};
pub use pipeline::{Task, TaskError, TaskOutcome, TaskSettings};
