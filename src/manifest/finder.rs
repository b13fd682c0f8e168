use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::manifest::{MANIFEST_CONFIG_DIR, MANIFEST_FILE_NAME, ManifestEntry, ManifestError, ToolManifest};
use crate::names::{PackageId, ToolCommandName};
use crate::transaction::{RollbackStep, Transaction};
use crate::util::{create_dir_all_tracked, write_atomic};

/// Locates the manifests that apply to a directory.
///
/// The walk visits `start_dir` and each of its ancestors up to and including
/// the filesystem root, each exactly once. At every level the layout-scoped
/// `.config/shimkit-tools.toml` is probed before the plain
/// `shimkit-tools.toml`. The walk stops after a manifest with `isRoot = true`.
/// When several manifests declare the same package, the one nearest to
/// `start_dir` wins. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct ManifestFinder {
    start_dir: PathBuf,
}

impl ManifestFinder {
    pub fn new(start_dir: impl Into<PathBuf>) -> Self {
        Self {
            start_dir: start_dir.into(),
        }
    }

    /// Candidate manifest paths, nearest first.
    pub fn candidates(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.start_dir.ancestors().flat_map(|dir| {
            [
                dir.join(MANIFEST_CONFIG_DIR).join(MANIFEST_FILE_NAME),
                dir.join(MANIFEST_FILE_NAME),
            ]
        })
    }

    /// Every tool declared for the start directory.
    ///
    /// With `explicit`, exactly that file is read. Fails with
    /// [`ManifestError::NotFound`] when no manifest exists at all.
    pub fn find(&self, explicit: Option<&Path>) -> Result<Vec<ManifestEntry>, ManifestError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ManifestError::NotFound {
                    searched: vec![path.to_path_buf()],
                });
            }
            return Ok(ToolManifest::load(path)?.tools);
        }

        let mut entries = Vec::new();
        let found = self.walk(|entry| {
            entries.push(entry);
            ControlFlow::Continue(())
        })?;
        if found == 0 {
            return Err(ManifestError::NotFound {
                searched: self.candidates().collect(),
            });
        }
        Ok(entries)
    }

    /// The declaration providing `command`, if any manifest in the chain has one.
    ///
    /// Absence of any manifest is not an error here.
    pub fn find_owning(
        &self,
        command: &ToolCommandName,
    ) -> Result<Option<ManifestEntry>, ManifestError> {
        self.find_first(|entry| entry.provides(command))
    }

    /// The nearest declaration of `package_id`, honoring root markers and
    /// shadowing the same way [`find`](Self::find) does.
    pub fn find_package(
        &self,
        package_id: &PackageId,
    ) -> Result<Option<ManifestEntry>, ManifestError> {
        self.find_first(|entry| &entry.package_id == package_id)
    }

    /// The first manifest file that exists on the walk, ignoring root markers.
    pub fn nearest_manifest_path(&self) -> Option<PathBuf> {
        self.candidates().find(|candidate| candidate.is_file())
    }

    fn find_first(
        &self,
        predicate: impl Fn(&ManifestEntry) -> bool,
    ) -> Result<Option<ManifestEntry>, ManifestError> {
        let mut owner = None;
        self.walk(|entry| {
            if predicate(&entry) {
                owner = Some(entry);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(owner)
    }

    /// Feeds every effective entry to `visit`, returning how many manifest
    /// files were read.
    fn walk(
        &self,
        mut visit: impl FnMut(ManifestEntry) -> ControlFlow<()>,
    ) -> Result<usize, ManifestError> {
        let mut seen = HashSet::new();
        let mut manifests = 0;
        for candidate in self.candidates() {
            if !candidate.is_file() {
                continue;
            }
            debug!("reading tool manifest {}", candidate.display());
            let manifest = ToolManifest::load(&candidate)?;
            manifests += 1;
            for entry in manifest.tools {
                if !seen.insert(entry.package_id.clone()) {
                    debug!(
                        "ignoring {} from {}: declared closer to {}",
                        entry.package_id,
                        candidate.display(),
                        self.start_dir.display()
                    );
                    continue;
                }
                if visit(entry).is_break() {
                    return Ok(manifests);
                }
            }
            if manifest.is_root {
                break;
            }
        }
        Ok(manifests)
    }
}

/// Writes an empty root manifest at `<dir>/.config/shimkit-tools.toml`.
pub fn create_default_manifest(
    tx: &mut Transaction,
    dir: &Path,
) -> Result<PathBuf, ManifestError> {
    let path = dir.join(MANIFEST_CONFIG_DIR).join(MANIFEST_FILE_NAME);
    if path.exists() {
        return Err(ManifestError::AlreadyExists(path));
    }
    let content = ToolManifest::new_root().to_toml_string()?;
    if let Some(parent) = path.parent() {
        create_dir_all_tracked(tx, parent).map_err(|source| ManifestError::Write {
            path: path.clone(),
            source,
        })?;
    }
    tx.on_rollback(RollbackStep::RestoreContent {
        path: path.clone(),
        previous: None,
    });
    write_atomic(&path, content.as_bytes()).map_err(|source| ManifestError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
