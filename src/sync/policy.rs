use crate::engine::FileInfo;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Conflict-resolution strategy for a whole compare/sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Source always wins; destination ends up identical to source
    Mirror,
    /// Only add or update on the destination, never remove from it
    Incremental,
    /// Whichever side has a file contributes it; true conflicts are left alone
    TwoWay,
}

/// Decided action for one diff node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Destination's copy is authoritative: overwrite/create on source
    ToLeft,
    /// Source's copy is authoritative: overwrite/create on destination
    ToRight,
    Ignore,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::ToLeft => write!(f, "<-"),
            Resolution::ToRight => write!(f, "->"),
            Resolution::Ignore => write!(f, "--"),
        }
    }
}

/// Map (strategy, presence-in-source, presence-in-destination) to an action.
///
/// Pure; re-applied wholesale whenever the strategy changes.
pub fn resolve(strategy: Strategy, source_present: bool, dest_present: bool) -> Resolution {
    match strategy {
        Strategy::Mirror => Resolution::ToRight,
        Strategy::Incremental => {
            if !source_present && dest_present {
                Resolution::Ignore
            } else {
                Resolution::ToRight
            }
        }
        Strategy::TwoWay => {
            if source_present && dest_present {
                Resolution::Ignore
            } else if !source_present {
                Resolution::ToLeft
            } else {
                Resolution::ToRight
            }
        }
    }
}

/// Byte cost of applying `resolution` to a node with the given sides
pub fn transfer_bytes(
    resolution: Resolution,
    source: Option<&FileInfo>,
    dest: Option<&FileInfo>,
) -> u64 {
    match resolution {
        Resolution::Ignore => 0,
        Resolution::ToLeft => dest.map(|d| d.size).unwrap_or(0),
        Resolution::ToRight => source.map(|s| s.size).unwrap_or(0),
    }
}
