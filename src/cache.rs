//! Persistent map from a fully qualified command identity to the executable
//! that a restore produced for it.
//!
//! One JSON file per package under `<cache-root>/<CACHE_FORMAT_VERSION>/`.
//! Executable paths are stored relative to a caller-supplied root so a cache
//! stays valid when that root is shared between machines. The cache is an
//! optimization: a file that cannot be read or parsed is a miss, never an
//! error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use crate::names::{PackageId, ToolCommandName};
use crate::transaction::{RollbackStep, Transaction};
use crate::util::{create_dir_all_tracked, read_if_exists, write_atomic};
use crate::version::VersionRange;

/// Bumped whenever the row layout changes incompatibly.
pub const CACHE_FORMAT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("resolver cache is inconsistent: {matches} rows match {identifier}")]
    Inconsistent {
        identifier: RestoreCommandIdentifier,
        matches: usize,
    },
    #[error("failed to write resolver cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize resolver cache: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything that identifies one restored command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestoreCommandIdentifier {
    pub package_id: PackageId,
    pub version: Version,
    pub platform_identifier: String,
    pub execution_platform_tag: String,
    pub command_name: ToolCommandName,
}

impl RestoreCommandIdentifier {
    pub fn new(
        package_id: PackageId,
        version: Version,
        platform_identifier: impl Into<String>,
        execution_platform_tag: impl Into<String>,
        command_name: ToolCommandName,
    ) -> Self {
        Self {
            package_id,
            version,
            platform_identifier: platform_identifier.into(),
            execution_platform_tag: execution_platform_tag.into(),
            command_name,
        }
    }
}

impl fmt::Display for RestoreCommandIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}/{}) command '{}'",
            self.package_id,
            self.version,
            self.platform_identifier,
            self.execution_platform_tag,
            self.command_name
        )
    }
}

/// A command materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredCommand {
    pub name: ToolCommandName,
    pub runner: String,
    pub executable: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRow {
    version: Version,
    platform_identifier: String,
    execution_platform_tag: String,
    command_name: ToolCommandName,
    runner: String,
    relative_executable_path: String,
}

impl CacheRow {
    fn from_entry(id: &RestoreCommandIdentifier, command: &RestoredCommand, root: &Path) -> Self {
        Self {
            version: id.version.clone(),
            platform_identifier: id.platform_identifier.clone(),
            execution_platform_tag: id.execution_platform_tag.clone(),
            command_name: id.command_name.clone(),
            runner: command.runner.clone(),
            relative_executable_path: relative_to(&command.executable, root),
        }
    }

    fn key_matches(&self, id: &RestoreCommandIdentifier) -> bool {
        self.version == id.version
            && self.platform_identifier == id.platform_identifier
            && self.execution_platform_tag == id.execution_platform_tag
            && self.command_name == id.command_name
    }

    fn key_matches_row(&self, other: &CacheRow) -> bool {
        self.version == other.version
            && self.platform_identifier == other.platform_identifier
            && self.execution_platform_tag == other.execution_platform_tag
            && self.command_name == other.command_name
    }

    fn into_entry(self, package_id: &PackageId, root: &Path) -> (RestoreCommandIdentifier, RestoredCommand) {
        let command = RestoredCommand {
            name: self.command_name.clone(),
            runner: self.runner,
            executable: root.join(&self.relative_executable_path),
        };
        let id = RestoreCommandIdentifier {
            package_id: package_id.clone(),
            version: self.version,
            platform_identifier: self.platform_identifier,
            execution_platform_tag: self.execution_platform_tag,
            command_name: self.command_name,
        };
        (id, command)
    }
}

/// `/`-separated path relative to `root`, or the absolute path when
/// `path` lies outside of it.
fn relative_to(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[derive(Debug, Clone)]
pub struct ResolverCache {
    cache_dir: PathBuf,
}

impl ResolverCache {
    /// A cache rooted at `cache_root`; rows live in its format-version subdirectory.
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_root.as_ref().join(CACHE_FORMAT_VERSION),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn package_file(&self, package_id: &PackageId) -> PathBuf {
        self.cache_dir.join(package_id.normalized())
    }

    /// Merges `entries` into the cache.
    ///
    /// Rows already present for other versions of the same package are kept.
    /// An entry whose key is already stored with the same value adds nothing;
    /// with a different value it replaces the stored row.
    ///
    /// # Arguments
    ///
    /// * `tx` - Transaction that takes over the steps restoring the previous files.
    /// * `entries` - Commands to record, keyed by their full identity.
    /// * `root` - Root the executable paths are stored relative to.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if a cache file or the cache directory
    /// cannot be written. Unreadable existing files are treated as empty.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::collections::HashMap;
    /// use std::path::Path;
    /// use semver::Version;
    /// use shimkit::{PackageId, ResolverCache, RestoreCommandIdentifier, RestoredCommand, ToolCommandName, Transaction};
    ///
    /// let root = Path::new("/opt/tools");
    /// let command = ToolCommandName::new("t-rex").unwrap();
    /// let id = RestoreCommandIdentifier::new(
    ///     PackageId::new("t-rex").unwrap(),
    ///     Version::new(1, 0, 53),
    ///     "native",
    ///     "any",
    ///     command.clone(),
    /// );
    /// let restored = RestoredCommand {
    ///     name: command,
    ///     runner: "executable".to_string(),
    ///     executable: root.join("t-rex/1.0.53/t-rex"),
    /// };
    ///
    /// let cache = ResolverCache::new("/var/cache/shimkit");
    /// let mut tx = Transaction::new();
    /// cache.save(&mut tx, &HashMap::from([(id, restored)]), root).unwrap();
    /// tx.commit();
    /// ```
    pub fn save(
        &self,
        tx: &mut Transaction,
        entries: &HashMap<RestoreCommandIdentifier, RestoredCommand>,
        root: &Path,
    ) -> Result<(), CacheError> {
        let mut by_package: BTreeMap<&PackageId, Vec<CacheRow>> = BTreeMap::new();
        for (id, command) in entries {
            by_package
                .entry(&id.package_id)
                .or_default()
                .push(CacheRow::from_entry(id, command, root));
        }

        let mut local = Transaction::new();
        for (package_id, new_rows) in by_package {
            let path = self.package_file(package_id);
            let previous = read_if_exists(&path).unwrap_or_else(|e| {
                warn!("unreadable resolver cache {}: {e}", path.display());
                None
            });
            let mut rows = previous
                .as_deref()
                .map(|bytes| parse_rows(bytes, &path))
                .unwrap_or_default();

            let mut changed = false;
            for row in new_rows {
                match rows.iter_mut().find(|existing| existing.key_matches_row(&row)) {
                    Some(existing) if *existing == row => {}
                    Some(existing) => {
                        *existing = row;
                        changed = true;
                    }
                    None => {
                        rows.push(row);
                        changed = true;
                    }
                }
            }
            if !changed {
                debug!("resolver cache for {package_id} already up to date");
                continue;
            }

            let content = serde_json::to_vec_pretty(&rows)?;
            create_dir_all_tracked(&mut local, &self.cache_dir).map_err(|source| {
                CacheError::Write {
                    path: self.cache_dir.clone(),
                    source,
                }
            })?;
            local.on_rollback(RollbackStep::RestoreContent {
                path: path.clone(),
                previous,
            });
            write_atomic(&path, &content).map_err(|source| CacheError::Write {
                path: path.clone(),
                source,
            })?;
            debug!("wrote {} resolver cache rows for {package_id}", rows.len());
        }
        tx.absorb(local);
        Ok(())
    }

    /// Exact lookup of `id`.
    ///
    /// More than one stored row for the key means something other than this
    /// cache wrote the file, and fails with [`CacheError::Inconsistent`].
    pub fn try_load(
        &self,
        id: &RestoreCommandIdentifier,
        root: &Path,
    ) -> Result<Option<RestoredCommand>, CacheError> {
        let mut matches: Vec<RestoredCommand> = self
            .load_rows(&id.package_id)
            .into_iter()
            .filter(|row| row.key_matches(id))
            .map(|row| row.into_entry(&id.package_id, root).1)
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(CacheError::Inconsistent {
                identifier: id.clone(),
                matches: n,
            }),
        }
    }

    /// The highest cached version of `package_id` within `range` that
    /// provides `command_name` for the given platform.
    pub fn try_load_highest_version(
        &self,
        package_id: &PackageId,
        range: &VersionRange,
        platform_identifier: &str,
        execution_platform_tag: &str,
        command_name: &ToolCommandName,
        root: &Path,
    ) -> Option<(RestoreCommandIdentifier, RestoredCommand)> {
        self.load_rows(package_id)
            .into_iter()
            .filter(|row| {
                row.platform_identifier == platform_identifier
                    && row.execution_platform_tag == execution_platform_tag
                    && &row.command_name == command_name
                    && range.satisfies(&row.version)
            })
            .max_by(|a, b| a.version.cmp(&b.version))
            .map(|row| row.into_entry(package_id, root))
    }

    /// Drops every row of `package_id` at `version`, returning how many were removed.
    pub fn evict(
        &self,
        tx: &mut Transaction,
        package_id: &PackageId,
        version: &Version,
    ) -> Result<usize, CacheError> {
        let path = self.package_file(package_id);
        let Some(previous) = read_if_exists(&path).ok().flatten() else {
            return Ok(0);
        };
        let mut rows = parse_rows(&previous, &path);
        let before = rows.len();
        rows.retain(|row| &row.version != version);
        let removed = before - rows.len();
        if removed == 0 {
            return Ok(0);
        }

        let content = serde_json::to_vec_pretty(&rows)?;
        tx.on_rollback(RollbackStep::RestoreContent {
            path: path.clone(),
            previous: Some(previous),
        });
        write_atomic(&path, &content).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })?;
        debug!("evicted {removed} resolver cache rows for {package_id}@{version}");
        Ok(removed)
    }

    fn load_rows(&self, package_id: &PackageId) -> Vec<CacheRow> {
        let path = self.package_file(package_id);
        match read_if_exists(&path) {
            Ok(Some(bytes)) => parse_rows(&bytes, &path),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("unreadable resolver cache {}: {e}", path.display());
                Vec::new()
            }
        }
    }
}

fn parse_rows(bytes: &[u8], path: &Path) -> Vec<CacheRow> {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        warn!("ignoring corrupt resolver cache {}: {e}", path.display());
        Vec::new()
    })
}
