use serde::{Deserialize, Serialize};
use std::fmt;

pub mod job;
pub mod record;
pub mod result;
pub mod table;

// Re-exports for convenience
pub use job::*;
pub use record::*;
pub use result::*;
pub use table::*;

// Common enums used across models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HarvestMode {
    /// Only events on the target date; the listing scan stops at older rows.
    Current,
    /// Every row of the listing, no date filter.
    Historical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Home,
    Away,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Home => f.write_str("home"),
            ParticipantRole::Away => f.write_str("away"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Replace,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Replace => f.write_str("replace"),
        }
    }
}
