//! Human-readable text report.

use crate::diagnostic::Diagnostic;
use std::fmt::Write;

/// Render a severity-sorted diagnostic list as a terminal report. The
/// caller filters suppressed and below-threshold findings first.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();

    if diagnostics.is_empty() {
        out.push_str("No latency hazards detected.\n");
        return out;
    }

    writeln!(out, "{} finding(s)\n", diagnostics.len()).ok();

    for diag in diagnostics {
        writeln!(
            out,
            "[{}] {} {} (confidence {:.2}, {})",
            diag.severity, diag.rule_id, diag.title, diag.confidence, diag.evidence_tier
        )
        .ok();
        writeln!(
            out,
            "  at {}:{}:{}",
            diag.location.file, diag.location.line, diag.location.column
        )
        .ok();
        if !diag.function_name.is_empty() {
            writeln!(out, "  in {}", diag.function_name).ok();
        }
        writeln!(out, "  why: {}", diag.hardware_reasoning).ok();
        writeln!(out, "  evidence: {}", diag.structural_evidence).ok();
        for escalation in &diag.escalations {
            writeln!(out, "    ^ {escalation}").ok();
        }
        writeln!(out, "  fix: {}", diag.mitigation).ok();
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLoc;
    use crate::severity::{EvidenceTier, Severity};

    #[test]
    fn report_includes_location_evidence_and_trace() {
        let diag = Diagnostic {
            rule_id: "FL010".into(),
            title: "Overly Strong Atomic Ordering".into(),
            severity: Severity::Critical,
            confidence: 0.90,
            evidence_tier: EvidenceTier::Likely,
            suppressed: false,
            location: SourceLoc {
                file: "hot.cpp".into(),
                line: 14,
                column: 9,
            },
            function_name: "md::publish".into(),
            hardware_reasoning: "XCHG per iteration".into(),
            structural_evidence: "op=store; ordering=seq_cst".into(),
            mitigation: "use release".into(),
            escalations: vec!["seq_cst store inside loop".into()],
        };
        let text = render(&[diag]);
        assert!(text.contains("[Critical] FL010"));
        assert!(text.contains("hot.cpp:14:9"));
        assert!(text.contains("md::publish"));
        assert!(text.contains("ordering=seq_cst"));
        assert!(text.contains("^ seq_cst store inside loop"));
    }

    #[test]
    fn empty_input_reports_cleanly() {
        assert!(render(&[]).contains("No latency hazards"));
    }
}
