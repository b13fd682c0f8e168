use std::path::PathBuf;
use directories::ProjectDirs;
use crate::global::config::ConfigError;

/// Setting this relocates every global directory under one root.
pub const HOME_ENV: &str = "SHIMKIT_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDirs {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl GlobalDirs {
    /// `$SHIMKIT_HOME` if set, otherwise the platform's per-user directories.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|h| !h.is_empty()) {
            return Ok(Self::under(home));
        }
        let proj_dirs = ProjectDirs::from("org", "shimkit", "shimkit").ok_or(ConfigError::NoHome)?;
        Ok(Self {
            config_dir: proj_dirs.config_dir().to_path_buf(),
            cache_dir: proj_dirs.cache_dir().to_path_buf(),
            data_dir: proj_dirs.data_dir().to_path_buf(),
        })
    }

    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_splits_root() {
        let dirs = GlobalDirs::under("/srv/shimkit");
        assert_eq!(dirs.config_dir, PathBuf::from("/srv/shimkit/config"));
        assert_eq!(dirs.cache_dir, PathBuf::from("/srv/shimkit/cache"));
        assert_eq!(dirs.data_dir, PathBuf::from("/srv/shimkit/data"));
    }
}
