//! Tool manifests (`shimkit-tools.toml`).
//!
//! Parsing happens in two passes: `serde` checks the document shape into a raw
//! structure, then [`ToolManifest::parse_str`] checks every value and reports
//! all problems of a file at once.

pub mod editor;
pub mod finder;

pub use editor::{add_tool, edit_tool, remove_tool};
pub use finder::{ManifestFinder, create_default_manifest};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::names::{PackageId, ToolCommandName};

/// Plain manifest file name, probed at every directory level.
pub const MANIFEST_FILE_NAME: &str = "shimkit-tools.toml";
/// Sub-directory holding the layout-scoped manifest, probed before the plain one.
pub const MANIFEST_CONFIG_DIR: &str = ".config";
/// Highest manifest format version this build understands.
pub const MAX_MANIFEST_VERSION: i64 = 1;
const DEFAULT_MANIFEST_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid manifest {path}:{}", format_problems(.problems))]
    Invalid { path: PathBuf, problems: Vec<String> },
    #[error("no tool manifest found; searched:{}", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
    #[error("package '{package}' is not declared in {path}")]
    PackageNotFound { package: PackageId, path: PathBuf },
    #[error("package '{package}' is already declared in {path} as version {existing_version} with commands [{existing_commands}]")]
    PackageConflict {
        package: PackageId,
        path: PathBuf,
        existing_version: Version,
        existing_commands: String,
    },
    #[error("package '{package}' must declare at least one command")]
    NoCommands { package: PackageId },
    #[error("a tool manifest already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn format_problems(problems: &[String]) -> String {
    problems.iter().map(|p| format!("\n\t{p}")).collect()
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| format!("\n\t{}", p.display())).collect()
}

/// One tool declaration, tagged with the manifest file that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub package_id: PackageId,
    pub version: Version,
    pub commands: Vec<ToolCommandName>,
    pub manifest_path: PathBuf,
}

impl ManifestEntry {
    /// Directory whose subtree this declaration applies to.
    pub fn owning_dir(&self) -> &Path {
        let parent = self.manifest_path.parent().unwrap_or(Path::new(""));
        if parent.file_name().is_some_and(|n| n == MANIFEST_CONFIG_DIR) {
            parent.parent().unwrap_or(parent)
        } else {
            parent
        }
    }

    pub fn provides(&self, command: &ToolCommandName) -> bool {
        self.commands.contains(command)
    }

    /// Same package, version and command list.
    pub fn same_declaration(&self, version: &Version, commands: &[ToolCommandName]) -> bool {
        &self.version == version && self.commands == commands
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}]", self.package_id, self.version, join_commands(&self.commands))
    }
}

pub(crate) fn join_commands(commands: &[ToolCommandName]) -> String {
    commands
        .iter()
        .map(ToolCommandName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A validated manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolManifest {
    pub version: u32,
    pub is_root: bool,
    pub tools: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawManifest {
    version: Option<i64>,
    is_root: Option<bool>,
    #[serde(default)]
    tools: toml::Table,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawTool {
    version: Option<String>,
    commands: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    version: u32,
    is_root: bool,
    tools: toml::Table,
}

impl ToolManifest {
    /// An empty root manifest.
    pub fn new_root() -> Self {
        Self {
            version: DEFAULT_MANIFEST_VERSION as u32,
            is_root: true,
            tools: Vec::new(),
        }
    }

    /// Reads and validates the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content, path)
    }

    /// Parses `content`, which was read from `path`.
    ///
    /// A document of the wrong shape fails with [`ManifestError::Parse`];
    /// a well-shaped document with bad values fails with
    /// [`ManifestError::Invalid`] listing every problem found.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let parse_error = |source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let raw: RawManifest = toml::from_str(content).map_err(parse_error)?;

        let mut problems = Vec::new();
        let version = raw.version.unwrap_or(DEFAULT_MANIFEST_VERSION);
        if version <= 0 {
            problems.push(format!("manifest version {version} is not a valid format version"));
        } else if version > MAX_MANIFEST_VERSION {
            problems.push(format!(
                "manifest version {version} is newer than the highest supported version {MAX_MANIFEST_VERSION}"
            ));
        }
        if raw.is_root.is_none() {
            problems.push("missing required field 'isRoot'".to_string());
        }

        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for (key, value) in raw.tools {
            let raw_tool = value.try_into::<RawTool>().map_err(parse_error)?;
            let package_id = match PackageId::new(key.clone()) {
                Ok(id) => id,
                Err(e) => {
                    problems.push(e.to_string());
                    continue;
                }
            };
            if !seen.insert(package_id.clone()) {
                problems.push(format!("package '{package_id}' is declared more than once"));
                continue;
            }
            if let Some(entry) = validate_tool(package_id, raw_tool, path, &mut problems) {
                tools.push(entry);
            }
        }

        if !problems.is_empty() {
            return Err(ManifestError::Invalid {
                path: path.to_path_buf(),
                problems,
            });
        }
        Ok(Self {
            version: version as u32,
            is_root: raw.is_root.unwrap_or_default(),
            tools,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ManifestError> {
        let mut tools = toml::Table::new();
        for entry in &self.tools {
            let raw = RawTool {
                version: Some(entry.version.to_string()),
                commands: Some(entry.commands.iter().map(ToString::to_string).collect()),
            };
            tools.insert(entry.package_id.to_string(), toml::Value::try_from(raw)?);
        }
        let doc = ManifestDocument {
            version: self.version,
            is_root: self.is_root,
            tools,
        };
        Ok(toml::to_string_pretty(&doc)?)
    }

    pub fn get(&self, package_id: &PackageId) -> Option<&ManifestEntry> {
        self.tools.iter().find(|e| &e.package_id == package_id)
    }
}

fn validate_tool(
    package_id: PackageId,
    raw: RawTool,
    path: &Path,
    problems: &mut Vec<String>,
) -> Option<ManifestEntry> {
    let before = problems.len();

    let version = match raw.version.as_deref().map(str::trim) {
        None | Some("") => {
            problems.push(format!("package '{package_id}': missing version"));
            None
        }
        Some(v) => match Version::parse(v) {
            Ok(version) => Some(version),
            Err(e) => {
                problems.push(format!(
                    "package '{package_id}': version '{v}' is not a valid semantic version: {e}"
                ));
                None
            }
        },
    };

    let mut commands = Vec::new();
    match raw.commands {
        None => problems.push(format!("package '{package_id}': missing commands")),
        Some(names) if names.is_empty() => {
            problems.push(format!("package '{package_id}': commands must not be empty"))
        }
        Some(names) => {
            for name in names {
                match ToolCommandName::new(name) {
                    Ok(command) => commands.push(command),
                    Err(e) => problems.push(format!("package '{package_id}': {e}")),
                }
            }
        }
    }

    if problems.len() > before {
        return None;
    }
    Some(ManifestEntry {
        package_id,
        version: version?,
        commands,
        manifest_path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ToolManifest, ManifestError> {
        ToolManifest::parse_str(content, Path::new("/work/shimkit-tools.toml"))
    }

    #[test]
    fn parses_valid_manifest_in_order() {
        let manifest = parse(
            r#"
version = 1
isRoot = true

[tools.zeta]
version = "2.0.0"
commands = ["zeta"]

[tools.t-rex]
version = "1.0.53"
commands = ["t-rex", "rex"]
"#,
        )
        .unwrap();
        assert!(manifest.is_root);
        assert_eq!(manifest.tools.len(), 2);
        assert_eq!(manifest.tools[0].package_id.as_str(), "zeta");
        assert_eq!(manifest.tools[1].version, Version::new(1, 0, 53));
        assert_eq!(manifest.tools[1].commands.len(), 2);
    }

    #[test]
    fn version_defaults_to_one() {
        let manifest = parse("isRoot = false\n").unwrap();
        assert_eq!(manifest.version, 1);
        assert!(manifest.tools.is_empty());
    }

    #[test]
    fn wrong_shape_is_a_parse_error() {
        let err = parse("isRoot = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        let err = parse("isRoot = true\n[tools.a]\nversion = \"1.0.0\"\ncommands = [\"a\"]\nextra = 1\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn collects_every_problem() {
        let err = parse(
            r#"
version = 0

[tools.a]
commands = ["a"]

[tools.b]
version = "not-a-version"
commands = ["b"]

[tools.c]
version = "1.0.0"
commands = []

[tools.C]
version = "1.0.0"
commands = ["c"]
"#,
        )
        .unwrap_err();
        let ManifestError::Invalid { problems, .. } = err else {
            panic!("expected validation error, got {err:?}");
        };
        let joined = problems.join("\n");
        assert!(joined.contains("version 0"), "{joined}");
        assert!(joined.contains("isRoot"), "{joined}");
        assert!(joined.contains("'a': missing version"), "{joined}");
        assert!(joined.contains("not-a-version"), "{joined}");
        assert!(joined.contains("'c': commands must not be empty"), "{joined}");
        assert!(joined.contains("'C' is declared more than once"), "{joined}");
        assert_eq!(problems.len(), 6);
    }

    #[test]
    fn rejects_future_format_version() {
        let err = parse("version = 2\nisRoot = true\n").unwrap_err();
        assert!(err.to_string().contains("newer than the highest supported version"));
    }

    #[test]
    fn rejects_missing_commands_and_bad_names() {
        let err = parse("isRoot = true\n[tools.a]\nversion = \"1.0.0\"\n[tools.b]\nversion = \"1.0.0\"\ncommands = [\".b\"]\n")
            .unwrap_err();
        let ManifestError::Invalid { problems, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("missing commands"));
        assert!(problems[1].contains("must not start with '.'"));
    }

    #[test]
    fn serialized_manifest_parses_back() {
        let mut manifest = ToolManifest::new_root();
        manifest.tools.push(ManifestEntry {
            package_id: PackageId::new("t-rex").unwrap(),
            version: Version::new(1, 0, 53),
            commands: vec![ToolCommandName::new("t-rex").unwrap()],
            manifest_path: PathBuf::from("/work/shimkit-tools.toml"),
        });
        let text = manifest.to_toml_string().unwrap();
        assert_eq!(parse(&text).unwrap(), manifest);
    }

    #[test]
    fn owning_dir_skips_config_dir() {
        let entry = ManifestEntry {
            package_id: PackageId::new("a").unwrap(),
            version: Version::new(1, 0, 0),
            commands: vec![ToolCommandName::new("a").unwrap()],
            manifest_path: PathBuf::from("/work/.config/shimkit-tools.toml"),
        };
        assert_eq!(entry.owning_dir(), Path::new("/work"));
    }
}
