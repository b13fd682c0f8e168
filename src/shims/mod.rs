//! Launcher shims: one small file per command in the shim directory that
//! forwards control to the real tool.

pub mod template;

pub use template::{MAX_TARGET_PATH_LEN, PatchError, locate_and_replace, placeholder};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use crate::names::ToolCommandName;
use crate::transaction::{CommitStep, RollbackStep, Transaction};
use crate::util::{create_dir_all_tracked, set_owner_executable, with_exec_ext, write_new_atomic};

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("a shim for command '{command}' already exists at {path}")]
    Conflict {
        command: ToolCommandName,
        path: PathBuf,
    },
    #[error("shim target path must not be empty")]
    EmptyTarget,
    #[error("shim target path is not valid UTF-8: {0}")]
    NonUtf8Target(PathBuf),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("failed to read launcher {path}: {source}")]
    Launcher {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shim I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How shims are produced when no pre-built launcher is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimKind {
    /// A short script (`sh` on Unix, `.cmd` on Windows).
    Script,
    /// A copy of a template launcher binary patched with the target path.
    Binary { template: PathBuf },
}

/// Creates and removes shims inside one directory it owns.
#[derive(Debug, Clone)]
pub struct ShimInstaller {
    shim_dir: PathBuf,
    host: Option<PathBuf>,
    kind: ShimKind,
}

impl ShimInstaller {
    /// `host` is the program scripts hand the target path to; with `None`
    /// scripts start the target directly.
    pub fn new(shim_dir: impl Into<PathBuf>, host: Option<PathBuf>, kind: ShimKind) -> Self {
        Self {
            shim_dir: shim_dir.into(),
            host,
            kind,
        }
    }

    /// Same directory and kind, but scripts start their target directly.
    pub fn without_host(&self) -> Self {
        Self {
            host: None,
            ..self.clone()
        }
    }

    pub fn shim_dir(&self) -> &Path {
        &self.shim_dir
    }

    /// Every file name a shim for `command` may occupy on this platform.
    pub fn shim_files(&self, command: &ToolCommandName) -> Vec<PathBuf> {
        let binary = self.shim_dir.join(with_exec_ext(command.as_str()));
        if cfg!(windows) {
            vec![binary, self.shim_dir.join(format!("{command}.cmd"))]
        } else {
            vec![binary]
        }
    }

    /// Path of the shim this installer writes for `command`.
    pub fn shim_path(&self, command: &ToolCommandName) -> PathBuf {
        match self.kind {
            ShimKind::Script if cfg!(windows) => self.shim_dir.join(format!("{command}.cmd")),
            _ => self.shim_dir.join(with_exec_ext(command.as_str())),
        }
    }

    pub fn shim_exists(&self, command: &ToolCommandName) -> bool {
        self.shim_files(command).iter().any(|p| p.exists())
    }

    /// Creates the shim for `command` pointing at `target`.
    ///
    /// A launcher for `command` in `prebuilt` is copied verbatim; otherwise
    /// one is synthesized according to the installer's [`ShimKind`]. An
    /// existing shim is never overwritten. If any step fails, every file
    /// written for the command is removed before the error is returned.
    ///
    /// # Arguments
    ///
    /// * `tx` - Transaction that takes over the steps undoing the creation.
    /// * `target` - Executable the shim forwards to.
    /// * `command` - Command name; it becomes the shim's file name.
    /// * `prebuilt` - Optional launchers to copy instead of synthesizing one.
    ///
    /// # Errors
    ///
    /// Returns [`ShimError::Conflict`] if a shim for `command` already exists,
    /// even one that appears while this shim is being written. Template
    /// patching and I/O failures are returned as the other variants.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::{Path, PathBuf};
    /// use shimkit::{ShimInstaller, ShimKind, ToolCommandName, Transaction};
    ///
    /// let shims = ShimInstaller::new("/opt/shims", Some(PathBuf::from("/usr/bin/dotnet")), ShimKind::Script);
    /// let mut tx = Transaction::new();
    /// let command = ToolCommandName::new("t-rex").unwrap();
    /// shims.create(&mut tx, Path::new("/opt/tools/t-rex/t-rex.dll"), &command, None).unwrap();
    /// tx.commit();
    /// ```
    pub fn create(
        &self,
        tx: &mut Transaction,
        target: &Path,
        command: &ToolCommandName,
        prebuilt: Option<&HashMap<ToolCommandName, PathBuf>>,
    ) -> Result<(), ShimError> {
        if target.as_os_str().is_empty() {
            return Err(ShimError::EmptyTarget);
        }
        if let Some(existing) = self.shim_files(command).into_iter().find(|p| p.exists()) {
            return Err(ShimError::Conflict {
                command: command.clone(),
                path: existing,
            });
        }

        let (path, content) = match prebuilt.and_then(|launchers| launchers.get(command)) {
            Some(launcher) => {
                let bytes = fs::read(launcher).map_err(|source| ShimError::Launcher {
                    path: launcher.clone(),
                    source,
                })?;
                (self.shim_dir.join(with_exec_ext(command.as_str())), bytes)
            }
            None => (self.shim_path(command), self.synthesize(target)?),
        };

        let mut local = Transaction::new();
        create_dir_all_tracked(&mut local, &self.shim_dir).map_err(|source| ShimError::Io {
            path: self.shim_dir.clone(),
            source,
        })?;
        write_new_atomic(&path, &content).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                ShimError::Conflict {
                    command: command.clone(),
                    path: path.clone(),
                }
            } else {
                ShimError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        local.on_rollback(RollbackStep::RemoveFile(path.clone()));
        set_owner_executable(&path).map_err(|source| ShimError::Io {
            path: path.clone(),
            source,
        })?;

        tx.absorb(local);
        info!("created shim {} -> {}", path.display(), target.display());
        Ok(())
    }

    /// Removes the shim for `command`.
    ///
    /// The files are first moved into a staging directory inside the shim
    /// directory; they are deleted when `tx` commits and moved back when it
    /// rolls back. Removing a shim that does not exist does nothing.
    pub fn remove(&self, tx: &mut Transaction, command: &ToolCommandName) -> Result<(), ShimError> {
        let files: Vec<PathBuf> = self
            .shim_files(command)
            .into_iter()
            .filter(|p| p.exists())
            .collect();
        if files.is_empty() {
            debug!("no shim for '{command}' to remove");
            return Ok(());
        }

        let staging = tempfile::Builder::new()
            .prefix(".shimkit-remove-")
            .tempdir_in(&self.shim_dir)
            .map_err(|source| ShimError::Io {
                path: self.shim_dir.clone(),
                source,
            })?
            .keep();

        let mut local = Transaction::new();
        local.on_rollback(RollbackStep::RemoveDir(staging.clone()));
        for file in files {
            let staged = staging.join(file.file_name().unwrap_or_default());
            fs::rename(&file, &staged).map_err(|source| ShimError::Io {
                path: file.clone(),
                source,
            })?;
            local.on_rollback(RollbackStep::Unstage {
                staged,
                original: file,
            });
        }
        local.on_commit(CommitStep::RemoveDir(staging));

        tx.absorb(local);
        info!("removed shim for '{command}'");
        Ok(())
    }

    fn synthesize(&self, target: &Path) -> Result<Vec<u8>, ShimError> {
        match &self.kind {
            ShimKind::Binary { template } => {
                let target = target
                    .to_str()
                    .ok_or_else(|| ShimError::NonUtf8Target(target.to_path_buf()))?;
                if target.len() > MAX_TARGET_PATH_LEN {
                    return Err(PatchError::NameTooLong {
                        len: target.len(),
                        max: MAX_TARGET_PATH_LEN,
                    }
                    .into());
                }
                let bytes = fs::read(template).map_err(|source| ShimError::Launcher {
                    path: template.clone(),
                    source,
                })?;
                Ok(locate_and_replace(&bytes, &placeholder(), target.as_bytes())?)
            }
            ShimKind::Script => Ok(self.script(target).into_bytes()),
        }
    }

    #[cfg(not(windows))]
    fn script(&self, target: &Path) -> String {
        let target = sh_quote(&target.to_string_lossy());
        match &self.host {
            Some(host) => format!(
                "#!/bin/sh\nexec {} {target} \"$@\"\n",
                sh_quote(&host.to_string_lossy())
            ),
            None => format!("#!/bin/sh\nexec {target} \"$@\"\n"),
        }
    }

    #[cfg(windows)]
    fn script(&self, target: &Path) -> String {
        match &self.host {
            Some(host) => format!(
                "@echo off\r\n\"{}\" \"{}\" %*\r\n",
                host.display(),
                target.display()
            ),
            None => format!("@echo off\r\n\"{}\" %*\r\n", target.display()),
        }
    }
}

/// Single-quotes `s` for POSIX `sh`.
#[cfg(not(windows))]
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
