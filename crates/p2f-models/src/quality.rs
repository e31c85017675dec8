//! Render quality tiers.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality tier requested for a render.
///
/// Accepts both the long form (`low`, `medium`, `high`) and the single-letter
/// tags (`l`, `m`, `h`) used in cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[serde(alias = "l")]
    Low,
    #[default]
    #[serde(alias = "m")]
    Medium,
    #[serde(alias = "h")]
    High,
}

/// Error returned when a quality string is not a known tier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown quality tier '{0}' (expected low, medium or high)")]
pub struct ParseQualityError(pub String);

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    /// Single-letter tag used when deriving cache keys.
    pub fn tag(&self) -> &'static str {
        match self {
            QualityTier::Low => "l",
            QualityTier::Medium => "m",
            QualityTier::High => "h",
        }
    }

    /// Quality flag understood by the scene renderer CLI.
    pub fn renderer_flag(&self) -> &'static str {
        match self {
            QualityTier::Low => "-ql",
            QualityTier::Medium => "-qm",
            QualityTier::High => "-qh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(QualityTier::Low),
            "m" | "medium" => Ok(QualityTier::Medium),
            "h" | "high" => Ok(QualityTier::High),
            _ => Err(ParseQualityError(s.to_string())),
        }
    }
}
