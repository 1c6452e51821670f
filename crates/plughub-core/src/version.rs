//! Semantic version parsing, comparison, and compatibility rules.
//!
//! The [`VersionOracle`] is the sole authority on version compatibility in
//! the host. It is constructed once from [`crate::config::ApiConfig`] and
//! passed explicitly to the registries — never read from global state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::result::PlatformResult;

/// A parsed semantic version triple.
///
/// Ordering is lexicographic on `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version (breaking changes).
    pub major: u32,
    /// Minor version (backwards-compatible features).
    pub minor: u32,
    /// Patch version (bug fixes). Never load-bearing for compatibility.
    pub patch: u32,
}

impl Version {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string such as `"1.2.3"`.
    ///
    /// Up to three dot-separated segments are read; missing segments default
    /// to zero. A pre-release suffix on the patch segment (`"1.2.3-rc1"`) is
    /// stripped before parsing. Empty input or a non-numeric segment fails
    /// with [`PlatformError::InvalidVersionFormat`].
    pub fn parse(input: &str) -> PlatformResult<Self> {
        if input.is_empty() {
            return Err(PlatformError::InvalidVersionFormat(input.to_string()));
        }

        let mut segments = input.split('.');
        let major = parse_segment(segments.next(), input)?;
        let minor = parse_segment(segments.next(), input)?;
        // The patch segment may carry a "-suffix" (e.g. "3-rc1").
        let patch = match segments.next() {
            Some(raw) => {
                let numeric = raw.split('-').next().unwrap_or(raw);
                parse_segment(Some(numeric), input)?
            }
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

fn parse_segment(segment: Option<&str>, input: &str) -> PlatformResult<u32> {
    match segment {
        None => Ok(0),
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| PlatformError::InvalidVersionFormat(input.to_string())),
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Authority on platform/plugin version compatibility.
///
/// Holds the platform's current API version and the oldest version it still
/// supports. All checks are pure functions of these two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionOracle {
    /// The platform's current API version.
    current: Version,
    /// The oldest API version the platform still supports.
    minimum_supported: Version,
}

impl VersionOracle {
    /// Create an oracle from the platform's current and minimum-supported
    /// versions.
    pub fn new(current: Version, minimum_supported: Version) -> Self {
        Self {
            current,
            minimum_supported,
        }
    }

    /// The platform's current API version.
    pub fn current(&self) -> Version {
        self.current
    }

    /// The oldest API version the platform still supports.
    pub fn minimum_supported(&self) -> Version {
        self.minimum_supported
    }

    /// Compare two versions, major field first.
    ///
    /// Returns a negative/zero/positive ordering exactly like the underlying
    /// lexicographic `Ord`.
    pub fn compare(a: Version, b: Version) -> std::cmp::Ordering {
        a.cmp(&b)
    }

    /// Whether the platform's current version satisfies a requirement.
    ///
    /// Compatible iff majors are equal and the required minor does not exceed
    /// the current minor. The patch field is intentionally ignored.
    pub fn is_compatible(&self, required: Version) -> bool {
        required.major == self.current.major && required.minor <= self.current.minor
    }

    /// Whether a plugin declaring `candidate_min` as its minimum platform
    /// version can be resolved against this platform.
    ///
    /// Rejects minimums below the supported floor (older major, or same major
    /// with an older minor) and minimums newer than the current version
    /// (newer major, or same major with a newer minor).
    pub fn supports_minimum(&self, candidate_min: Version) -> bool {
        if candidate_min.major < self.minimum_supported.major {
            return false;
        }
        if candidate_min.major > self.current.major {
            return false;
        }
        if candidate_min.major == self.minimum_supported.major
            && candidate_min.minor < self.minimum_supported.minor
        {
            return false;
        }
        candidate_min.major != self.current.major || candidate_min.minor <= self.current.minor
    }
}
