//! Turning a typed command name into a process to start.
//!
//! Resolution is a chain: each [`CommandResolver`] either produces a
//! [`ProcessSpec`], answers `Ok(None)` so the next link gets a turn, or fails.

use std::fmt;
use std::iter;
use std::path::{Path, PathBuf};
use std::process::Command;
use semver::Version;
use thiserror::Error;
use tracing::debug;
use crate::cache::{CacheError, ResolverCache, RestoreCommandIdentifier};
use crate::global::config::Settings;
use crate::manifest::{ManifestError, ManifestFinder};
use crate::names::{PackageId, ToolCommandName};
use crate::util::{is_executable, with_exec_ext};

/// Runner value meaning "start the cached executable itself".
pub const EXECUTABLE_RUNNER: &str = "executable";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("command '{command}' from {package}@{version} ({manifest}) {reason}; run `shimkit restore`")]
    NeedsRestore {
        command: ToolCommandName,
        package: PackageId,
        version: Version,
        manifest: PathBuf,
        reason: NeedsRestoreReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedsRestoreReason {
    /// The resolver cache has no row for the command.
    NotCached,
    /// The cache points at an executable that is gone.
    MissingExecutable(PathBuf),
}

impl fmt::Display for NeedsRestoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCached => f.write_str("has not been restored"),
            Self::MissingExecutable(path) => {
                write!(f, "points at {} which no longer exists", path.display())
            }
        }
    }
}

/// A program and its arguments, ready to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Runner recorded for the command; empty for commands found on `PATH`.
    pub runner: String,
}

impl ProcessSpec {
    /// The full command line with every part quoted for process start.
    pub fn command_line(&self) -> String {
        iter::once(escape_arg(&self.program.to_string_lossy()))
            .chain(self.args.iter().map(|a| escape_arg(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Quotes `arg` so that a Windows-style command line parser yields it back
/// unchanged: arguments without whitespace or quotes pass through, others are
/// wrapped in quotes with embedded quotes escaped and the backslashes
/// preceding a quote doubled.
pub fn escape_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(iter::repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(iter::repeat_n('\\', backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(iter::repeat_n('\\', backslashes * 2));
    out.push('"');
    out
}

pub trait CommandResolver {
    /// `Ok(None)` means this resolver does not handle `command`.
    fn resolve(&self, command: &str, args: &[String]) -> Result<Option<ProcessSpec>, ResolveError>;
}

/// Tries each resolver in order and returns the first answer.
#[derive(Default)]
pub struct ResolverChain {
    links: Vec<Box<dyn CommandResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl CommandResolver + 'static) -> Self {
        self.links.push(Box::new(resolver));
        self
    }
}

impl CommandResolver for ResolverChain {
    fn resolve(&self, command: &str, args: &[String]) -> Result<Option<ProcessSpec>, ResolveError> {
        for link in &self.links {
            if let Some(spec) = link.resolve(command, args)? {
                return Ok(Some(spec));
            }
        }
        Ok(None)
    }
}

/// Resolves prefixed commands (`shimkit-t-rex`) through the manifest chain
/// and the resolver cache.
#[derive(Debug, Clone)]
pub struct LocalToolCommandResolver {
    finder: ManifestFinder,
    cache: ResolverCache,
    tools_root: PathBuf,
    platform_identifier: String,
    execution_platform_tag: String,
    host: PathBuf,
    prefix: String,
}

impl LocalToolCommandResolver {
    pub fn new(
        finder: ManifestFinder,
        cache: ResolverCache,
        tools_root: impl Into<PathBuf>,
        platform_identifier: impl Into<String>,
        execution_platform_tag: impl Into<String>,
        host: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            finder,
            cache,
            tools_root: tools_root.into(),
            platform_identifier: platform_identifier.into(),
            execution_platform_tag: execution_platform_tag.into(),
            host: host.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_settings(settings: &Settings, start_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            ManifestFinder::new(start_dir),
            ResolverCache::new(&settings.cache_root),
            &settings.tools_root,
            &settings.platform_identifier,
            &settings.execution_platform_tag,
            &settings.host,
            &settings.command_prefix,
        )
    }

    /// Resolves an unprefixed command name, as `shimkit run` does.
    pub fn resolve_tool(
        &self,
        command: &ToolCommandName,
        args: &[String],
    ) -> Result<Option<ProcessSpec>, ResolveError> {
        let Some(entry) = self.finder.find_owning(command)? else {
            debug!("no manifest declares '{command}'");
            return Ok(None);
        };

        let id = RestoreCommandIdentifier::new(
            entry.package_id.clone(),
            entry.version.clone(),
            &self.platform_identifier,
            &self.execution_platform_tag,
            command.clone(),
        );
        let needs_restore = |reason| ResolveError::NeedsRestore {
            command: command.clone(),
            package: entry.package_id.clone(),
            version: entry.version.clone(),
            manifest: entry.manifest_path.clone(),
            reason,
        };

        let restored = self
            .cache
            .try_load(&id, &self.tools_root)?
            .ok_or_else(|| needs_restore(NeedsRestoreReason::NotCached))?;
        if !restored.executable.exists() {
            return Err(needs_restore(NeedsRestoreReason::MissingExecutable(
                restored.executable,
            )));
        }

        debug!("resolved '{command}' to {}", restored.executable.display());
        let spec = if restored.runner == EXECUTABLE_RUNNER {
            ProcessSpec {
                program: restored.executable,
                args: args.to_vec(),
                runner: restored.runner,
            }
        } else {
            let mut full_args = Vec::with_capacity(args.len() + 1);
            full_args.push(restored.executable.to_string_lossy().into_owned());
            full_args.extend_from_slice(args);
            ProcessSpec {
                program: self.host.clone(),
                args: full_args,
                runner: restored.runner,
            }
        };
        Ok(Some(spec))
    }
}

impl CommandResolver for LocalToolCommandResolver {
    fn resolve(&self, command: &str, args: &[String]) -> Result<Option<ProcessSpec>, ResolveError> {
        let Some(stripped) = command.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };
        let Ok(name) = ToolCommandName::new(stripped) else {
            return Ok(None);
        };
        self.resolve_tool(&name, args)
    }
}

/// Finds commands in a list of directories, by default `PATH`.
#[derive(Debug, Clone)]
pub struct PathCommandResolver {
    search_paths: Vec<PathBuf>,
}

impl PathCommandResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn from_env() -> Self {
        let paths = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(paths)
    }

    fn locate(&self, command: &str) -> Option<PathBuf> {
        let file_name = if Path::new(command).extension().is_some() {
            command.to_string()
        } else {
            with_exec_ext(command)
        };
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| is_executable(candidate))
    }
}

impl CommandResolver for PathCommandResolver {
    fn resolve(&self, command: &str, args: &[String]) -> Result<Option<ProcessSpec>, ResolveError> {
        if command.is_empty() || command.contains(['/', '\\']) {
            return Ok(None);
        }
        Ok(self.locate(command).map(|program| ProcessSpec {
            program,
            args: args.to_vec(),
            runner: String::new(),
        }))
    }
}
