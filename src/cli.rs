use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Log at info level unless SHIMKIT_LOG says otherwise
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: ShimkitCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ShimkitCommand {
    /// Creates `.config/shimkit-tools.toml` in the current directory
    Init,
    /// Lists every tool visible from the current directory, nearest first
    List,
    /// Declares a tool in the nearest manifest. The tool is not restored!
    Add {
        /// Package and version: <package>@<version>
        package_at_version: String,
        /// Command provided by the package; repeatable. Defaults to the package name
        #[clap(short, long = "command")]
        commands: Vec<String>,
        /// Manifest to edit instead of the nearest one
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Removes a tool declaration from the nearest manifest that declares it
    Remove {
        package: String,
        /// Manifest to edit instead of the declaring one
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Restores a tool, creates its shims and declares it in the nearest manifest
    Install {
        /// Package and version: <package>@<version>
        package_at_version: String,
        /// Command to install; repeatable. Defaults to every command of the package
        #[clap(short, long = "command")]
        commands: Vec<String>,
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Removes a tool declaration, its shims and its cache entries
    Uninstall {
        package: String,
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Restores every declared tool that is not restored yet
    Restore {
        /// Only restore the tools of this manifest
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Runs a declared tool command
    Run {
        command: String,
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Prints the process a command resolves to and its shim
    Which {
        command: String,
    },
}
