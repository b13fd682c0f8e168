use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Characters that can never appear in a file name on any supported platform.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("package id must not be empty")]
    EmptyPackageId,
    #[error("invalid package id '{0}': must not contain path separators or control characters")]
    InvalidPackageId(String),
    #[error("command name must not be empty")]
    EmptyCommandName,
    #[error("invalid command name '{0}': must not start with '.'")]
    LeadingDot(String),
    #[error("invalid command name '{name}': contains invalid character {invalid:?}")]
    InvalidCommandChar { name: String, invalid: char },
}

/// Identifier of a tool package.
///
/// Comparison, ordering and hashing ignore case; the original spelling is
/// kept for display and serialization.
#[derive(Debug, Clone)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Result<Self, NameError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(NameError::EmptyPackageId);
        }
        if trimmed == "." || trimmed == ".." || trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(NameError::InvalidPackageId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form, used wherever the id becomes a file name.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

/// Name of a command exposed by a tool package, e.g. `t-rex`.
///
/// Like [`PackageId`], equality and hashing ignore case.
#[derive(Debug, Clone)]
pub struct ToolCommandName(String);

impl ToolCommandName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::EmptyCommandName);
        }
        if name.starts_with('.') {
            return Err(NameError::LeadingDot(name));
        }
        if let Some(invalid) = name
            .chars()
            .find(|c| INVALID_FILE_NAME_CHARS.contains(c) || c.is_control())
        {
            return Err(NameError::InvalidCommandChar { name, invalid });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! case_insensitive_name {
    ($ty:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.0.to_lowercase() == other.0.to_lowercase()
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.to_lowercase().hash(state);
            }
        }

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.to_lowercase().cmp(&other.0.to_lowercase())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

case_insensitive_name!(PackageId);
case_insensitive_name!(ToolCommandName);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn package_id_equality_ignores_case() {
        let a = PackageId::new("T-Rex").unwrap();
        let b = PackageId::new("t-rex").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized(), "t-rex");
        assert_eq!(a.to_string(), "T-Rex");
    }

    #[test]
    fn package_id_rejects_separators_and_empty() {
        assert_eq!(PackageId::new("  "), Err(NameError::EmptyPackageId));
        assert!(PackageId::new("a/b").is_err());
        assert!(PackageId::new("a\\b").is_err());
        assert!(PackageId::new("a\u{7}b").is_err());
        assert!(PackageId::new("..").is_err());
    }

    #[test]
    fn command_name_hash_ignores_case() {
        let mut set = HashSet::new();
        set.insert(ToolCommandName::new("Format").unwrap());
        assert!(set.contains(&ToolCommandName::new("format").unwrap()));
    }

    #[test]
    fn command_name_rejects_leading_dot() {
        assert!(matches!(
            ToolCommandName::new(".hidden"),
            Err(NameError::LeadingDot(_))
        ));
    }

    #[test]
    fn command_name_rejects_invalid_chars() {
        let err = ToolCommandName::new("a:b").unwrap_err();
        assert_eq!(
            err,
            NameError::InvalidCommandChar {
                name: "a:b".to_owned(),
                invalid: ':'
            }
        );
        assert_eq!(ToolCommandName::new(""), Err(NameError::EmptyCommandName));
    }

    #[test]
    fn names_deserialize_through_validation() {
        let ok: ToolCommandName = serde_json::from_str("\"t-rex\"").unwrap();
        assert_eq!(ok.as_str(), "t-rex");
        assert!(serde_json::from_str::<ToolCommandName>("\".x\"").is_err());
    }
}
