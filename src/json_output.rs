//! JSON output format for diagnostics.

use crate::diagnostic::Diagnostic;
use crate::metadata::ExecutionMetadata;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Root JSON envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    /// Format version identifier.
    pub version: String,
    pub format: String,
    pub metadata: ExecutionMetadata,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: JsonSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub informational: usize,
}

impl JsonReport {
    pub fn new(metadata: ExecutionMetadata, diagnostics: Vec<Diagnostic>) -> Self {
        let count = |s: Severity| diagnostics.iter().filter(|d| d.severity == s).count();
        let summary = JsonSummary {
            total: diagnostics.len(),
            critical: count(Severity::Critical),
            high: count(Severity::High),
            medium: count(Severity::Medium),
            informational: count(Severity::Informational),
        };
        JsonReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "falla-json-v1".to_string(),
            metadata,
            diagnostics,
            summary,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLoc;
    use crate::severity::EvidenceTier;

    fn diag(severity: Severity) -> Diagnostic {
        Diagnostic {
            rule_id: "FL001".into(),
            title: "Cache Line Spanning Struct".into(),
            severity,
            confidence: 0.72,
            evidence_tier: EvidenceTier::Proven,
            suppressed: false,
            location: SourceLoc {
                file: "a.cpp".into(),
                line: 1,
                column: 1,
            },
            function_name: String::new(),
            hardware_reasoning: "reasoning".into(),
            structural_evidence: "sizeof=192B".into(),
            mitigation: "split".into(),
            escalations: vec![],
        }
    }

    #[test]
    fn report_counts_by_severity_and_round_trips() {
        let report = JsonReport::new(
            ExecutionMetadata::default(),
            vec![
                diag(Severity::Critical),
                diag(Severity::High),
                diag(Severity::High),
            ],
        );
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.critical, 1);
        assert_eq!(report.summary.high, 2);

        let json = report.to_json().unwrap();
        let parsed: JsonReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.format, "falla-json-v1");
        assert_eq!(parsed.diagnostics.len(), 3);
    }
}
