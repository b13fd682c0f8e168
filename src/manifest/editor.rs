use std::path::Path;
use semver::Version;
use tracing::info;
use crate::manifest::{ManifestEntry, ManifestError, ToolManifest, join_commands};
use crate::names::{PackageId, ToolCommandName};
use crate::transaction::{RollbackStep, Transaction};
use crate::util::{read_if_exists, write_atomic};

/// Declares `package_id` in the manifest at `path`.
///
/// Re-adding an identical declaration leaves the file untouched. A different
/// version or command list for an already declared package is a conflict.
///
/// # Errors
///
/// Returns [`ManifestError::NoCommands`] for an empty `commands` list and
/// [`ManifestError::PackageConflict`] for a differing declaration; the file
/// is not written in either case.
pub fn add_tool(
    tx: &mut Transaction,
    path: &Path,
    package_id: &PackageId,
    version: &Version,
    commands: &[ToolCommandName],
) -> Result<(), ManifestError> {
    require_commands(package_id, commands)?;
    let mut manifest = ToolManifest::load(path)?;
    if let Some(existing) = manifest.get(package_id) {
        if existing.same_declaration(version, commands) {
            return Ok(());
        }
        return Err(ManifestError::PackageConflict {
            package: package_id.clone(),
            path: path.to_path_buf(),
            existing_version: existing.version.clone(),
            existing_commands: join_commands(&existing.commands),
        });
    }
    manifest.tools.push(ManifestEntry {
        package_id: package_id.clone(),
        version: version.clone(),
        commands: commands.to_vec(),
        manifest_path: path.to_path_buf(),
    });
    write_manifest(tx, path, &manifest)?;
    info!("added {package_id}@{version} to {}", path.display());
    Ok(())
}

/// Replaces the version and commands of an already declared package.
pub fn edit_tool(
    tx: &mut Transaction,
    path: &Path,
    package_id: &PackageId,
    version: &Version,
    commands: &[ToolCommandName],
) -> Result<(), ManifestError> {
    require_commands(package_id, commands)?;
    let mut manifest = ToolManifest::load(path)?;
    let entry = manifest
        .tools
        .iter_mut()
        .find(|e| &e.package_id == package_id)
        .ok_or_else(|| ManifestError::PackageNotFound {
            package: package_id.clone(),
            path: path.to_path_buf(),
        })?;
    entry.version = version.clone();
    entry.commands = commands.to_vec();
    write_manifest(tx, path, &manifest)?;
    info!("updated {package_id} to {version} in {}", path.display());
    Ok(())
}

/// Removes the declaration of `package_id`, returning it.
pub fn remove_tool(
    tx: &mut Transaction,
    path: &Path,
    package_id: &PackageId,
) -> Result<ManifestEntry, ManifestError> {
    let mut manifest = ToolManifest::load(path)?;
    let index = manifest
        .tools
        .iter()
        .position(|e| &e.package_id == package_id)
        .ok_or_else(|| ManifestError::PackageNotFound {
            package: package_id.clone(),
            path: path.to_path_buf(),
        })?;
    let removed = manifest.tools.remove(index);
    write_manifest(tx, path, &manifest)?;
    info!("removed {package_id} from {}", path.display());
    Ok(removed)
}

fn require_commands(package_id: &PackageId, commands: &[ToolCommandName]) -> Result<(), ManifestError> {
    if commands.is_empty() {
        return Err(ManifestError::NoCommands {
            package: package_id.clone(),
        });
    }
    Ok(())
}

fn write_manifest(
    tx: &mut Transaction,
    path: &Path,
    manifest: &ToolManifest,
) -> Result<(), ManifestError> {
    let content = manifest.to_toml_string()?;
    let write_error = |source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    };
    let previous = read_if_exists(path).map_err(write_error)?;
    tx.on_rollback(RollbackStep::RestoreContent {
        path: path.to_path_buf(),
        previous,
    });
    write_atomic(path, content.as_bytes()).map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"version = 1
isRoot = true

[tools.t-rex]
version = "1.0.53"
commands = ["t-rex"]
"#;

    fn setup() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shimkit-tools.toml");
        fs::write(&path, MANIFEST).unwrap();
        (dir, path)
    }

    fn id(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn commands(names: &[&str]) -> Vec<ToolCommandName> {
        names.iter().map(|n| ToolCommandName::new(*n).unwrap()).collect()
    }

    #[test]
    fn add_identical_declaration_is_noop() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        add_tool(&mut tx, &path, &id("T-REX"), &Version::new(1, 0, 53), &commands(&["t-rex"]))
            .unwrap();
        assert!(tx.is_empty());
        tx.commit();
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn add_with_different_version_conflicts() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        let err = add_tool(&mut tx, &path, &id("t-rex"), &Version::new(2, 0, 0), &commands(&["t-rex"]))
            .unwrap_err();
        assert!(matches!(err, ManifestError::PackageConflict { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn add_with_different_commands_conflicts() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        let err = add_tool(&mut tx, &path, &id("t-rex"), &Version::new(1, 0, 53), &commands(&["rex"]))
            .unwrap_err();
        assert!(matches!(err, ManifestError::PackageConflict { .. }));
    }

    #[test]
    fn add_new_package_appends() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        add_tool(&mut tx, &path, &id("dino"), &Version::new(0, 1, 0), &commands(&["dino", "rawr"]))
            .unwrap();
        tx.commit();
        let manifest = ToolManifest::load(&path).unwrap();
        assert_eq!(manifest.tools.len(), 2);
        assert_eq!(manifest.tools[1].package_id.as_str(), "dino");
        assert_eq!(manifest.tools[1].commands.len(), 2);
    }

    #[test]
    fn add_without_commands_is_rejected() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        let err = add_tool(&mut tx, &path, &id("dino"), &Version::new(0, 1, 0), &[]).unwrap_err();
        assert!(matches!(err, ManifestError::NoCommands { .. }));
        assert!(tx.is_empty());
        tx.commit();
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
        assert_eq!(ToolManifest::load(&path).unwrap().tools.len(), 1);
    }

    #[test]
    fn edit_without_commands_is_rejected() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        let err = edit_tool(&mut tx, &path, &id("t-rex"), &Version::new(1, 1, 0), &[]).unwrap_err();
        assert!(matches!(err, ManifestError::NoCommands { .. }));
        tx.commit();
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn edit_replaces_declaration() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        edit_tool(&mut tx, &path, &id("t-rex"), &Version::new(1, 1, 0), &commands(&["trex"]))
            .unwrap();
        tx.commit();
        let manifest = ToolManifest::load(&path).unwrap();
        assert_eq!(manifest.tools[0].version, Version::new(1, 1, 0));
        assert_eq!(manifest.tools[0].commands, commands(&["trex"]));
    }

    #[test]
    fn edit_missing_package_fails() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        assert!(matches!(
            edit_tool(&mut tx, &path, &id("nope"), &Version::new(1, 0, 0), &commands(&["n"])),
            Err(ManifestError::PackageNotFound { .. })
        ));
    }

    #[test]
    fn remove_missing_package_fails() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        assert!(matches!(
            remove_tool(&mut tx, &path, &id("nope")),
            Err(ManifestError::PackageNotFound { .. })
        ));
    }

    #[test]
    fn aborted_remove_restores_file() {
        let (_dir, path) = setup();
        let mut tx = Transaction::new();
        let removed = remove_tool(&mut tx, &path, &id("t-rex")).unwrap();
        assert_eq!(removed.version, Version::new(1, 0, 53));
        assert!(ToolManifest::load(&path).unwrap().tools.is_empty());
        tx.rollback();
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
    }
}
