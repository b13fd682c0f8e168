use std::fmt;
use std::str::FromStr;
use semver::Version;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionRangeError {
    #[error("version range must not be empty")]
    Empty,
    #[error("invalid version range '{0}': expected '1.0.0', '[1.0.0]' or an interval like '[1.0.0, 2.0.0)'")]
    Malformed(String),
    #[error("invalid version '{version}' in range '{range}': {reason}")]
    InvalidVersion {
        range: String,
        version: String,
        reason: String,
    },
}

/// An interval of semantic versions.
///
/// Accepts interval notation: `[1.0.0, 2.0.0)` (inclusive min, exclusive
/// max), `(,2.0.0]`, `[1.0.0,)`, `[1.2.3]` for an exact version, and a bare
/// `1.2.3` meaning "1.2.3 or later".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Option<Version>,
    min_inclusive: bool,
    max: Option<Version>,
    max_inclusive: bool,
}

impl VersionRange {
    pub fn new(
        min: Option<Version>,
        min_inclusive: bool,
        max: Option<Version>,
        max_inclusive: bool,
    ) -> Self {
        Self {
            min,
            min_inclusive,
            max,
            max_inclusive,
        }
    }

    /// Every version satisfies this range.
    pub fn any() -> Self {
        Self::new(None, false, None, false)
    }

    pub fn exact(version: Version) -> Self {
        Self::new(Some(version.clone()), true, Some(version), true)
    }

    pub fn at_least(version: Version) -> Self {
        Self::new(Some(version), true, None, false)
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }
}

impl FromStr for VersionRange {
    type Err = VersionRangeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(VersionRangeError::Empty);
        }
        let parse = |raw: &str| -> Result<Option<Version>, VersionRangeError> {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(None);
            }
            Version::parse(raw)
                .map(Some)
                .map_err(|e| VersionRangeError::InvalidVersion {
                    range: input.to_string(),
                    version: raw.to_string(),
                    reason: e.to_string(),
                })
        };

        let first = s.chars().next().unwrap_or_default();
        if first != '[' && first != '(' {
            let min = parse(s)?.ok_or_else(|| VersionRangeError::Malformed(input.to_string()))?;
            return Ok(Self::at_least(min));
        }

        let last = s.chars().last().unwrap_or_default();
        if (last != ']' && last != ')') || s.len() < 2 {
            return Err(VersionRangeError::Malformed(input.to_string()));
        }
        let min_inclusive = first == '[';
        let max_inclusive = last == ']';
        let inner = &s[1..s.len() - 1];

        match inner.split_once(',') {
            None => {
                // "[1.2.3]" is the only valid single-version interval
                if !(min_inclusive && max_inclusive) {
                    return Err(VersionRangeError::Malformed(input.to_string()));
                }
                let version =
                    parse(inner)?.ok_or_else(|| VersionRangeError::Malformed(input.to_string()))?;
                Ok(Self::exact(version))
            }
            Some((lo, hi)) => {
                if hi.contains(',') {
                    return Err(VersionRangeError::Malformed(input.to_string()));
                }
                let min = parse(lo)?;
                let max = parse(hi)?;
                if min.is_none() && max.is_none() {
                    return Err(VersionRangeError::Malformed(input.to_string()));
                }
                Ok(Self::new(min, min_inclusive, max, max_inclusive))
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.min_inclusive { '[' } else { '(' };
        let close = if self.max_inclusive { ']' } else { ')' };
        let min = self.min.as_ref().map(ToString::to_string).unwrap_or_default();
        let max = self.max.as_ref().map(ToString::to_string).unwrap_or_default();
        write!(f, "{open}{min}, {max}{close}")
    }
}
