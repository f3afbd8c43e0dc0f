//! Build identity: which artifact a probe resolves to
//!
//! A descriptor combines a date or revision with a branch and build-type
//! flags. The flags select the artifact; they never change how the range is
//! bisected.

use crate::error::{BisectError, BisectResult};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date format used for nightly boundaries
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifier of a single build: a nightly date or a changeset hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildId {
    Date(NaiveDate),
    Revision(String),
}

impl BuildId {
    /// Whether this identifier is a calendar date
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    fn is_revision(s: &str) -> bool {
        (12..=40).contains(&s.len()) && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    fn is_date_shaped(s: &str) -> bool {
        let bytes = s.as_bytes();
        bytes.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
    }
}

impl FromStr for BuildId {
    type Err = BisectError;

    fn from_str(s: &str) -> BisectResult<Self> {
        let invalid = |reason: &str| BisectError::InvalidBoundary {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if Self::is_date_shaped(s) {
            return NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Self::Date)
                .map_err(|e| invalid(&e.to_string()));
        }

        if Self::is_revision(s) {
            return Ok(Self::Revision(s.to_string()));
        }

        Err(invalid("expected YYYY-MM-DD or a 12-40 character hex revision"))
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            Self::Revision(rev) => write!(f, "{}", rev),
        }
    }
}

/// Repository branch builds are taken from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// mozilla-central
    #[default]
    Central,
    /// mozilla-inbound
    Inbound,
    /// mozilla-release
    Release,
    /// mozilla-beta
    Beta,
    /// mozilla-esr
    Esr,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Central => "central",
            Self::Inbound => "inbound",
            Self::Release => "release",
            Self::Beta => "beta",
            Self::Esr => "esr",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build-type flags selecting which artifact a descriptor resolves to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildFlags {
    pub debug: bool,
    pub asan: bool,
    pub fuzzing: bool,
    pub coverage: bool,
    pub arch_32: bool,
}

impl BuildFlags {
    /// Short tag used in cache prefixes, e.g. `debug-asan` or `opt`
    pub fn tag(&self) -> String {
        let mut parts = vec![if self.debug { "debug" } else { "opt" }];
        if self.asan {
            parts.push("asan");
        }
        if self.fuzzing {
            parts.push("fuzzing");
        }
        if self.coverage {
            parts.push("coverage");
        }
        if self.arch_32 {
            parts.push("x86");
        }
        parts.join("-")
    }
}

/// Identity of one candidate build. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildDescriptor {
    id: BuildId,
    branch: Branch,
    flags: BuildFlags,
}

impl BuildDescriptor {
    pub fn new(id: BuildId, branch: Branch, flags: BuildFlags) -> Self {
        Self { id, branch, flags }
    }

    pub fn id(&self) -> &BuildId {
        &self.id
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    /// Cache prefix: `<branch>-<id>-<flags>`, safe to use as a directory name
    pub fn prefix(&self) -> String {
        format!("{}-{}-{}", self.branch, self.id, self.flags.tag())
    }
}

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_boundary() {
        let id: BuildId = "2023-01-07".parse().unwrap();
        assert_eq!(
            id,
            BuildId::Date(NaiveDate::from_ymd_opt(2023, 1, 7).unwrap())
        );
        assert_eq!(id.to_string(), "2023-01-07");
    }

    #[test]
    fn parses_revision_boundary() {
        let id: BuildId = "a1b2c3d4e5f6".parse().unwrap();
        assert_eq!(id, BuildId::Revision("a1b2c3d4e5f6".to_string()));
        assert!("0123456789abcdef0123456789abcdef01234567"
            .parse::<BuildId>()
            .is_ok());
    }

    #[test]
    fn rejects_malformed_boundaries() {
        for value in [
            "2023-13-01",
            "2023-1-07",
            "abc",
            "a1b2c3d4e5f",
            "A1B2C3D4E5F6",
            "0123456789abcdef0123456789abcdef012345678",
            "",
        ] {
            let err = value.parse::<BuildId>().unwrap_err();
            assert!(
                matches!(err, BisectError::InvalidBoundary { .. }),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn flags_tag() {
        assert_eq!(BuildFlags::default().tag(), "opt");
        let flags = BuildFlags {
            debug: true,
            asan: true,
            arch_32: true,
            ..Default::default()
        };
        assert_eq!(flags.tag(), "debug-asan-x86");
    }

    #[test]
    fn descriptor_prefix() {
        let desc = BuildDescriptor::new(
            "2023-01-07".parse().unwrap(),
            Branch::Beta,
            BuildFlags {
                fuzzing: true,
                ..Default::default()
            },
        );
        assert_eq!(desc.prefix(), "beta-2023-01-07-opt-fuzzing");
        assert_eq!(desc.to_string(), desc.prefix());
    }
}
