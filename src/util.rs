use std::io::Write;
use std::path::{Path, PathBuf};
use regex::Regex;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use crate::transaction::{RollbackStep, Transaction};

/// Extension carried by native executables on this platform.
#[cfg(windows)]
pub const EXEC_EXT: &str = "exe";
#[cfg(not(windows))]
pub const EXEC_EXT: &str = "";

/// Appends the platform executable extension to a file name, if there is one.
pub fn with_exec_ext(name: &str) -> String {
    if EXEC_EXT.is_empty() {
        name.to_string()
    } else {
        format!("{name}.{EXEC_EXT}")
    }
}

/// Replaces the file at `path` with `content` in one step.
///
/// The content goes to a temp file next to the destination which is then
/// renamed over it, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_atomic`], but fails with [`std::io::ErrorKind::AlreadyExists`]
/// instead of replacing a file that is already at `path`.
pub fn write_new_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Creates `dir` and its missing parents inside `tx`.
///
/// The topmost directory that did not exist yet is registered for removal,
/// so a rollback takes away every level this call created.
pub fn create_dir_all_tracked(tx: &mut Transaction, dir: &Path) -> std::io::Result<()> {
    let topmost = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .last();
    if let Some(topmost) = topmost {
        tx.on_rollback(RollbackStep::RemoveDir(topmost.to_path_buf()));
    }
    std::fs::create_dir_all(dir)
}

/// Reads a file, mapping "does not exist" to `None`.
pub fn read_if_exists(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Grants the owner execute permission on Unix; no-op elsewhere.
#[cfg(unix)]
pub fn set_owner_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o100);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn set_owner_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Checks if a given path is an executable file on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        matches!(ext.as_str(), "exe" | "bat" | "cmd")
    } else {
        false
    }
}

/// Searches `dir` for the executable that most likely provides `command`.
///
/// Executables whose stem starts with the command name win; otherwise the
/// first executable found (in path order) is returned.
pub fn find_executable(dir: &Path, command: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_executable(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let re = Regex::new(&format!(r"(?i)^{}\b", regex::escape(command))).ok()?;
    candidates.sort_by_key(|p| {
        let stem = p.file_stem().unwrap_or_default().to_string_lossy().to_lowercase();
        if re.is_match(&stem) { 0 } else { 10 }
    });
    Some(candidates.remove(0))
}
