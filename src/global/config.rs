use std::io;
use std::path::{Path, PathBuf};
use semver::Version;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use crate::cache::ResolverCache;
use crate::global::dirs::GlobalDirs;
use crate::names::PackageId;
use crate::restore::ExternalRestorer;
use crate::shims::{ShimInstaller, ShimKind};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_COMMAND_PREFIX: &str = "shimkit-";
pub const DEFAULT_RESTORE_PROGRAM: &str = "shimkit-restore";
pub const DEFAULT_PLATFORM_IDENTIFIER: &str = "native";
pub const DEFAULT_EXECUTION_PLATFORM_TAG: &str = "any";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHome,
    #[error("failed to read config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not locate the running executable: {0}")]
    CurrentExe(io::Error),
}

/// The contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    cache_root: Option<PathBuf>,
    tools_root: Option<PathBuf>,
    shim_dir: Option<PathBuf>,
    host: Option<PathBuf>,
    platform_identifier: Option<String>,
    execution_platform_tag: Option<String>,
    command_prefix: Option<String>,
    restore_program: Option<PathBuf>,
    #[serde(default)]
    restore_args: Vec<String>,
    shim_template: Option<PathBuf>,
}

/// Effective configuration, with defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of the resolver cache.
    pub cache_root: PathBuf,
    /// Root restored packages live under; cache paths are relative to it.
    pub tools_root: PathBuf,
    pub shim_dir: PathBuf,
    /// Multiplexing host that runs non-native commands.
    pub host: PathBuf,
    pub platform_identifier: String,
    pub execution_platform_tag: String,
    pub command_prefix: String,
    pub restore_program: PathBuf,
    pub restore_args: Vec<String>,
    pub shim_template: Option<PathBuf>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&GlobalDirs::discover()?)
    }

    /// Reads `config.toml` from `dirs.config_dir`. A missing file yields the defaults.
    pub fn load_from(dirs: &GlobalDirs) -> Result<Self, ConfigError> {
        let path = dirs.config_dir.join(CONFIG_FILE_NAME);
        let file = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                SettingsFile::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Self::from_file(file, dirs)
    }

    fn from_file(file: SettingsFile, dirs: &GlobalDirs) -> Result<Self, ConfigError> {
        // relative paths in the file are taken relative to the config directory
        let anchor = |p: PathBuf| {
            if p.is_relative() {
                dirs.config_dir.join(p)
            } else {
                p
            }
        };
        let host = match file.host {
            Some(host) => anchor(host),
            None => std::env::current_exe().map_err(ConfigError::CurrentExe)?,
        };
        Ok(Self {
            cache_root: file
                .cache_root
                .map(anchor)
                .unwrap_or_else(|| dirs.cache_dir.join("resolver")),
            tools_root: file
                .tools_root
                .map(anchor)
                .unwrap_or_else(|| dirs.data_dir.join("tools")),
            shim_dir: file
                .shim_dir
                .map(anchor)
                .unwrap_or_else(|| dirs.data_dir.join("shims")),
            host,
            platform_identifier: file
                .platform_identifier
                .unwrap_or_else(|| DEFAULT_PLATFORM_IDENTIFIER.to_string()),
            execution_platform_tag: file
                .execution_platform_tag
                .unwrap_or_else(|| DEFAULT_EXECUTION_PLATFORM_TAG.to_string()),
            command_prefix: file
                .command_prefix
                .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string()),
            restore_program: file
                .restore_program
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESTORE_PROGRAM)),
            restore_args: file.restore_args,
            shim_template: file.shim_template.map(anchor),
        })
    }

    pub fn resolver_cache(&self) -> ResolverCache {
        ResolverCache::new(&self.cache_root)
    }

    pub fn shim_installer(&self) -> ShimInstaller {
        let kind = match &self.shim_template {
            Some(template) => ShimKind::Binary {
                template: template.clone(),
            },
            None => ShimKind::Script,
        };
        ShimInstaller::new(&self.shim_dir, Some(self.host.clone()), kind)
    }

    pub fn restorer(&self) -> ExternalRestorer {
        ExternalRestorer::new(&self.restore_program).with_args(self.restore_args.iter().cloned())
    }

    pub fn config_path(dirs: &GlobalDirs) -> PathBuf {
        dirs.config_dir.join(CONFIG_FILE_NAME)
    }
}

/// Where a package version is restored to.
pub(crate) fn package_dir(
    tools_root: &Path,
    package: &PackageId,
    version: &Version,
) -> PathBuf {
    tools_root.join(package.normalized()).join(version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let dirs = GlobalDirs::under(dir.path());
        let settings = Settings::load_from(&dirs).unwrap();
        assert_eq!(settings.cache_root, dirs.cache_dir.join("resolver"));
        assert_eq!(settings.tools_root, dirs.data_dir.join("tools"));
        assert_eq!(settings.command_prefix, "shimkit-");
        assert_eq!(settings.platform_identifier, "native");
        assert_eq!(settings.execution_platform_tag, "any");
        assert_eq!(settings.restore_program, PathBuf::from("shimkit-restore"));
        assert!(settings.shim_template.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let dirs = GlobalDirs::under(dir.path());
        std::fs::create_dir_all(&dirs.config_dir).unwrap();
        std::fs::write(
            Settings::config_path(&dirs),
            r#"
host = "/usr/bin/dotnet"
shim_dir = "shims"
command_prefix = "dotnet-"
restore_program = "/bin/sh"
restore_args = ["restore.sh"]
shim_template = "/opt/launcher"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&dirs).unwrap();
        assert_eq!(settings.host, PathBuf::from("/usr/bin/dotnet"));
        assert_eq!(settings.shim_dir, dirs.config_dir.join("shims"));
        assert_eq!(settings.command_prefix, "dotnet-");
        assert_eq!(settings.restore_args, vec!["restore.sh".to_string()]);
        assert_eq!(
            settings.shim_installer().shim_dir(),
            dirs.config_dir.join("shims").as_path()
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempdir().unwrap();
        let dirs = GlobalDirs::under(dir.path());
        std::fs::create_dir_all(&dirs.config_dir).unwrap();
        std::fs::write(Settings::config_path(&dirs), "colour = true\n").unwrap();
        assert!(matches!(
            Settings::load_from(&dirs),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn package_dir_is_lowercased() {
        let dir = package_dir(
            Path::new("/tools"),
            &PackageId::new("T-Rex").unwrap(),
            &Version::parse("1.0.53").unwrap(),
        );
        assert_eq!(dir, PathBuf::from("/tools/t-rex/1.0.53"));
    }
}
