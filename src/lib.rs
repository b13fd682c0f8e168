//! # shimkit Core Library
//!
//! This crate contains the core logic of `shimkit`, a resolver for
//! project-local tool commands. Projects declare the tools they use in a
//! `shimkit-tools.toml` manifest; `shimkit` finds the declaration that owns a
//! typed command, looks up where the tool was restored to, and hands back a
//! process to start. Tools are exposed on `PATH` through small launcher shims.
//!
//! ## Modules Overview
//! - [`manifest`] – Parsing, discovery and editing of tool manifests
//! - [`cache`] – The on-disk resolver cache of restored commands
//! - [`resolver`] – Command resolution and process command lines
//! - [`shims`] – Creating and removing launcher shims
//! - [`restore`] – Delegating package restore to an external program
//! - [`installer`] – Install, uninstall and restore flows
//! - [`transaction`] – Rollback and commit of filesystem mutations
//! - [`global`] – Global directories and configuration
//! - [`names`], [`version`] – Validated identifiers and version ranges
//! - [`util`] – Shared filesystem helpers

pub mod cache;
pub mod global;
pub mod installer;
pub mod manifest;
pub mod names;
pub mod resolver;
pub mod restore;
pub mod shims;
pub mod transaction;
pub mod util;
pub mod version;

pub use cache::{CacheError, ResolverCache, RestoreCommandIdentifier, RestoredCommand};
pub use global::{ConfigError, GlobalDirs, Settings};
pub use installer::{RestoreReport, ToolInstaller};
pub use manifest::{ManifestEntry, ManifestError, ManifestFinder, ToolManifest};
pub use names::{NameError, PackageId, ToolCommandName};
pub use resolver::{
    CommandResolver, LocalToolCommandResolver, PathCommandResolver, ProcessSpec, ResolveError,
    ResolverChain,
};
pub use restore::{ExternalRestorer, RestoreError, RestoredPackage, ToolRestorer};
pub use shims::{ShimError, ShimInstaller, ShimKind};
pub use transaction::Transaction;
pub use version::{VersionRange, VersionRangeError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    VersionRange(#[from] VersionRangeError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Shim(#[from] ShimError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
