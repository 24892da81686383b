//! Replication targets and target sets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A place a file copy can live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Primary local disk of the capture host.
    Local,
    /// Secondary on-premises copy (NAS share or NAS object bucket).
    Nas,
    /// Off-site copy in Cloudflare R2.
    R2,
}

impl Target {
    /// Every target, in replication order.
    pub const ALL: [Self; 3] = [Self::Local, Self::Nas, Self::R2];

    /// Durable targets a worker uploads to.
    pub const DURABLE: [Self; 2] = [Self::Nas, Self::R2];

    /// Bit used for this target inside a [`TargetSet`].
    pub const fn bit(self) -> i64 {
        match self {
            Self::Local => 1,
            Self::Nas => 2,
            Self::R2 => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Nas => "nas",
            Self::R2 => "r2",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "nas" => Ok(Self::Nas),
            "r2" => Ok(Self::R2),
            other => Err(Error::InvalidInput(format!("Unknown target: {other}"))),
        }
    }
}

/// Set of targets, stored as a bitmask column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Target>", from = "Vec<Target>")]
pub struct TargetSet(i64);

impl TargetSet {
    pub const EMPTY: Self = Self(0);

    /// Build a set from a raw bitmask, dropping unknown bits.
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(self) -> i64 {
        self.0
    }

    pub const fn of(target: Target) -> Self {
        Self(target.bit())
    }

    #[must_use]
    pub const fn with(self, target: Target) -> Self {
        Self(self.0 | target.bit())
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, target: Target) -> bool {
        self.0 & target.bit() != 0
    }

    /// True when every member of `other` is also in `self`.
    pub const fn covers(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Target> {
        Target::ALL
            .into_iter()
            .filter(move |target| self.contains(*target))
    }

    /// Members of `self` that are missing from `synced`.
    #[must_use]
    pub const fn missing_from(self, synced: Self) -> Self {
        Self(self.0 & !synced.0)
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl From<Vec<Target>> for TargetSet {
    fn from(targets: Vec<Target>) -> Self {
        targets.into_iter().collect()
    }
}

impl From<TargetSet> for Vec<Target> {
    fn from(set: TargetSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter().map(Target::as_str).collect::<Vec<_>>();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}
