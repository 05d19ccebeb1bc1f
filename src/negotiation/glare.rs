//! Glare tie-break.
//!
//! When both endpoints send an offer before seeing the other's, exactly one of
//! them must give up its offer and answer instead. Both sides evaluate the same
//! rule over the same pair of identifiers, so they always reach opposite
//! conclusions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::Participant;

/// Which side yields during glare. Both peers must be configured alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The lexicographically lower identifier yields and becomes responder
    #[default]
    LowerYields,
    /// The lexicographically higher identifier yields and becomes responder
    HigherYields,
}

impl TieBreak {
    /// Whether the local side must discard its offer in favour of the remote one.
    pub fn local_yields(&self, local: &Participant, remote: &Participant) -> bool {
        match self {
            TieBreak::LowerYields => local < remote,
            TieBreak::HigherYields => local > remote,
        }
    }

    /// Config/CLI spelling
    pub fn name(&self) -> &'static str {
        match self {
            TieBreak::LowerYields => "lower-yields",
            TieBreak::HigherYields => "higher-yields",
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lower-yields" | "lower" => Ok(Self::LowerYields),
            "higher-yields" | "higher" => Ok(Self::HigherYields),
            _ => Err(format!("Unknown tie-break rule: {s}")),
        }
    }
}
