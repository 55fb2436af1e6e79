//! Ordered severity and evidence classification tags shared by every
//! diagnostic producer in the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much a finding should worry the reader.
///
/// Totally ordered: `Critical > High > Medium > Informational`. The output
/// layer sorts descending so Critical findings surface first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn name(self) -> &'static str {
        match self {
            Severity::Informational => "Informational",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Numeric rank used in structural feature vectors.
    pub fn ordinal(self) -> u8 {
        match self {
            Severity::Informational => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "informational" | "info" => Ok(Severity::Informational),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Strength of the evidence behind a finding.
///
/// `Proven` means structurally guaranteed (a record size is a fact),
/// `Likely` is a strong heuristic (escape analysis plus atomics), and
/// `Unknown` covers topology-dependent or speculative findings. Ordered so
/// that `Proven` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceTier {
    Unknown,
    Likely,
    Proven,
}

impl EvidenceTier {
    pub fn name(self) -> &'static str {
        match self {
            EvidenceTier::Proven => "proven",
            EvidenceTier::Likely => "likely",
            EvidenceTier::Unknown => "speculative",
        }
    }
}

impl fmt::Display for EvidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
