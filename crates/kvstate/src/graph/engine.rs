//! Version reporting for the engine that will run a rewritten graph.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Release version of a graph engine, ordered by its numeric `major.minor.patch` triple.
///
/// Build suffixes (`2024.1.0-15008-f4afc983258`) are kept for display but ignored when
/// comparing.
#[derive(Debug, Clone)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid engine version `{input}`: {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: &'static str,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            raw: String::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let fail = |reason| VersionParseError {
            input: input.to_string(),
            reason,
        };
        let trimmed = input.trim();
        let core = trimmed
            .split(|c: char| c == '-' || c == '+' || c == ' ')
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(fail("empty version"));
        }

        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u32, VersionParseError> {
            match parts.next() {
                Some(part) => part.parse::<u32>().map_err(|_| fail("non-numeric component")),
                None if required => Err(fail("missing minor component")),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;

        Ok(Self {
            major,
            minor,
            patch,
            raw: trimmed.to_string(),
        })
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl FromStr for EngineVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineVersion::parse(s)
    }
}

impl PartialEq for EngineVersion {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for EngineVersion {}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            f.write_str(&self.raw)
        }
    }
}

/// Capability queries answered by the hosting graph engine.
pub trait EngineCapabilities {
    fn version(&self) -> &EngineVersion;

    fn is_engine_at_least(&self, minimum: &EngineVersion) -> bool {
        self.version() >= minimum
    }
}

/// Engine whose version is known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    version: EngineVersion,
}

impl EngineInfo {
    pub fn new(version: EngineVersion) -> Self {
        Self { version }
    }

    pub fn parse(version: &str) -> Result<Self, VersionParseError> {
        EngineVersion::parse(version).map(Self::new)
    }
}

impl EngineCapabilities for EngineInfo {
    fn version(&self) -> &EngineVersion {
        &self.version
    }
}
