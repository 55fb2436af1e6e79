//! Minimal SARIF 2.1.0 output for code-review integrations.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use serde_json::{json, Value};

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Informational => "note",
    }
}

pub fn render(diagnostics: &[Diagnostic]) -> anyhow::Result<String> {
    let mut rule_ids: Vec<&str> = diagnostics.iter().map(|d| d.rule_id.as_str()).collect();
    rule_ids.sort_unstable();
    rule_ids.dedup();

    let rules: Vec<Value> = rule_ids
        .iter()
        .map(|id| {
            let title = diagnostics
                .iter()
                .find(|d| d.rule_id == *id)
                .map(|d| d.title.as_str())
                .unwrap_or(*id);
            json!({
                "id": id,
                "shortDescription": { "text": title },
            })
        })
        .collect();

    let results: Vec<Value> = diagnostics
        .iter()
        .map(|d| {
            json!({
                "ruleId": d.rule_id,
                "level": sarif_level(d.severity),
                "message": {
                    "text": format!("{} (confidence {:.2}): {}",
                                    d.title, d.confidence, d.hardware_reasoning),
                },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": d.location.file },
                        "region": {
                            "startLine": d.location.line.max(1),
                            "startColumn": d.location.column.max(1),
                        },
                    },
                }],
                "properties": {
                    "confidence": d.confidence,
                    "evidenceTier": d.evidence_tier.name(),
                    "structuralEvidence": d.structural_evidence,
                    "mitigation": d.mitigation,
                    "escalations": d.escalations,
                },
            })
        })
        .collect();

    let doc = json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "falla",
                    "version": env!("CARGO_PKG_VERSION"),
                    "informationUri": "https://github.com/paiml/falla",
                    "rules": rules,
                },
            },
            "results": results,
        }],
    });

    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLoc;
    use crate::severity::EvidenceTier;

    #[test]
    fn sarif_document_has_schema_rules_and_results() {
        let diag = Diagnostic {
            rule_id: "FL030".into(),
            title: "Virtual Dispatch in Hot Path".into(),
            severity: Severity::High,
            confidence: 0.80,
            evidence_tier: EvidenceTier::Proven,
            suppressed: false,
            location: SourceLoc {
                file: "disp.cpp".into(),
                line: 33,
                column: 9,
            },
            function_name: "disp::pump".into(),
            hardware_reasoning: "indirect branch".into(),
            structural_evidence: "virtual_call=Handler::on_event".into(),
            mitigation: "CRTP".into(),
            escalations: vec![],
        };

        let text = render(&[diag]).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["version"], "2.1.0");
        assert_eq!(doc["runs"][0]["tool"]["driver"]["name"], "falla");
        assert_eq!(doc["runs"][0]["results"][0]["ruleId"], "FL030");
        assert_eq!(doc["runs"][0]["results"][0]["level"], "error");
        assert_eq!(
            doc["runs"][0]["results"][0]["locations"][0]["physicalLocation"]["region"]
                ["startLine"],
            33
        );
    }
}
