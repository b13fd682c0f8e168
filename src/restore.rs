//! Materializing tool packages on disk.
//!
//! Fetching and unpacking packages is delegated to an external restore
//! program. It receives a JSON request and reports what it put on disk in a
//! lock file inside the output directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use crate::cache::RestoredCommand;
use crate::names::{PackageId, ToolCommandName};
use crate::util::find_executable;

/// Lock file the restore program writes into its output directory.
pub const LOCK_FILE_NAME: &str = "shimkit.lock.json";

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("failed to start restore program {program}: {source}")]
    Spawn { program: PathBuf, source: io::Error },
    #[error("restore of {package}@{version} failed ({status}): {stderr}")]
    Failed {
        package: PackageId,
        version: Version,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("restore produced {found} but {expected} was requested")]
    Mismatch { expected: String, found: String },
    #[error("restore of {package}@{version} provided no commands")]
    NoCommands { package: PackageId, version: Version },
    #[error("restored {package} does not provide an executable for command '{command}'")]
    MissingCommand {
        package: PackageId,
        command: ToolCommandName,
    },
}

/// What to restore and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub package_id: PackageId,
    pub version: Version,
    pub platform_identifier: String,
    pub execution_platform_tag: String,
    /// Commands to locate; empty means all commands of the package.
    pub commands: Vec<ToolCommandName>,
    pub output_dir: PathBuf,
}

/// The outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredPackage {
    pub package_id: PackageId,
    pub version: Version,
    pub commands: Vec<RestoredCommand>,
}

pub trait ToolRestorer {
    fn restore(&self, request: &RestoreRequest) -> Result<RestoredPackage, RestoreError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreLock {
    package: PackageId,
    version: Version,
    commands: Vec<LockedCommand>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockedCommand {
    name: ToolCommandName,
    runner: String,
    #[serde(default)]
    entry_point: Option<PathBuf>,
}

impl RestoreLock {
    fn load(path: &Path) -> Result<Self, RestoreError> {
        let content = fs::read(path).map_err(|source| RestoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| RestoreError::Lock {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Matches the lock against `request`, locating each requested command.
    fn into_package(self, request: &RestoreRequest) -> Result<RestoredPackage, RestoreError> {
        if self.package != request.package_id || self.version != request.version {
            return Err(RestoreError::Mismatch {
                expected: format!("{}@{}", request.package_id, request.version),
                found: format!("{}@{}", self.package, self.version),
            });
        }

        // an empty request takes every command the lock lists
        let wanted: Vec<ToolCommandName> = if request.commands.is_empty() {
            self.commands.iter().map(|c| c.name.clone()).collect()
        } else {
            request.commands.clone()
        };

        let mut commands = Vec::with_capacity(wanted.len());
        for name in &wanted {
            let missing = || RestoreError::MissingCommand {
                package: request.package_id.clone(),
                command: name.clone(),
            };
            let locked = self
                .commands
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(missing)?;
            let executable = match &locked.entry_point {
                Some(entry) if entry.is_absolute() => entry.clone(),
                Some(entry) => request.output_dir.join(entry),
                None => find_executable(&request.output_dir, name.as_str()).ok_or_else(missing)?,
            };
            if !executable.is_file() {
                return Err(missing());
            }
            commands.push(RestoredCommand {
                name: name.clone(),
                runner: locked.runner.clone(),
                executable,
            });
        }

        Ok(RestoredPackage {
            package_id: request.package_id.clone(),
            version: request.version.clone(),
            commands,
        })
    }
}

/// Runs `<program> [args..] restore --request <file> --output <dir>`.
#[derive(Debug, Clone)]
pub struct ExternalRestorer {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalRestorer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the `restore` subcommand.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl ToolRestorer for ExternalRestorer {
    fn restore(&self, request: &RestoreRequest) -> Result<RestoredPackage, RestoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| RestoreError::Io { path, source }
        };

        let scratch = tempfile::tempdir().map_err(io_err(&std::env::temp_dir()))?;
        let request_file = scratch.path().join("request.json");
        let body = serde_json::to_vec_pretty(request).map_err(|source| RestoreError::Lock {
            path: request_file.clone(),
            source,
        })?;
        fs::write(&request_file, body).map_err(io_err(&request_file))?;
        fs::create_dir_all(&request.output_dir).map_err(io_err(&request.output_dir))?;

        info!(
            "restoring {}@{} into {}",
            request.package_id,
            request.version,
            request.output_dir.display()
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("restore")
            .arg("--request")
            .arg(&request_file)
            .arg("--output")
            .arg(&request.output_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RestoreError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(RestoreError::Failed {
                package: request.package_id.clone(),
                version: request.version.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let lock_path = request.output_dir.join(LOCK_FILE_NAME);
        let package = RestoreLock::load(&lock_path)?.into_package(request)?;
        debug!(
            "restored {} commands for {}@{}",
            package.commands.len(),
            package.package_id,
            package.version
        );
        Ok(package)
    }
}
