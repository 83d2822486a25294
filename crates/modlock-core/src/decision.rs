//! File-conflict strategies and the actions they produce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How file conflicts between selected packages are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Keep the highest-priority owner; prompt only for merge candidates.
    Automatic,
    /// Prompt for every conflict, with a suggested winner.
    Conservative,
    /// Keep the highest-priority owner for every conflict, merge candidates included.
    Aggressive,
    /// Prompt for everything; no suggestions are computed.
    Manual,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Automatic
    }
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Automatic => "automatic",
            Strategy::Conservative => "conservative",
            Strategy::Aggressive => "aggressive",
            Strategy::Manual => "manual",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Strategy::Automatic),
            "conservative" => Ok(Strategy::Conservative),
            "aggressive" => Ok(Strategy::Aggressive),
            "manual" => Ok(Strategy::Manual),
            other => Err(format!(
                "unknown strategy '{other}' (expected automatic, conservative, aggressive or manual)"
            )),
        }
    }
}

/// What to do with one conflicting file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileAction {
    KeepWinner,
    SkipFile,
    PromptUser,
    MergeContent,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileAction::KeepWinner => "keep winner",
            FileAction::SkipFile => "skip file",
            FileAction::PromptUser => "prompt user",
            FileAction::MergeContent => "merge content",
        };
        f.write_str(s)
    }
}
