//! Machine-wide state: where shimkit keeps its files and how it is configured.

pub mod config;
pub mod dirs;

pub use config::{ConfigError, Settings};
pub use dirs::GlobalDirs;
