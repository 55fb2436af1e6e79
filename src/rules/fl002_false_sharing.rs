//! FL002: mutable fields co-located on one cache line in a
//! thread-escaping record.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::cache_line::CacheLineMap;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::escape::EscapeAnalysis;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct FalseSharing;

impl Rule for FalseSharing {
    fn id(&self) -> &'static str {
        "FL002"
    }

    fn title(&self) -> &'static str {
        "False Sharing Candidate"
    }

    fn base_severity(&self) -> Severity {
        Severity::Critical
    }

    fn hardware_mechanism(&self) -> &'static str {
        "MESI invalidation ping-pong across cores due to shared cache line writes. \
         Each write by one core forces invalidation of the line in all other cores' \
         L1/L2, triggering RFO traffic."
    }

    fn analyze(
        &self,
        decl: &Decl<'_>,
        unit: &TranslationUnit,
        _oracle: &HotPathOracle,
        config: &AnalyzerConfig,
        out: &mut Vec<Diagnostic>,
    ) {
        let Decl::Record(record) = decl else { return };
        if !record.is_complete || record.is_implicit || record.is_lambda {
            return;
        }

        let escape = EscapeAnalysis::new(unit);
        if !escape.may_escape_thread(record) {
            return;
        }

        let map = CacheLineMap::build(record, unit, config.cache_line_bytes);
        let mutable_pairs = map.mutable_pairs_on_same_line();
        if mutable_pairs.is_empty() {
            return;
        }

        let atomic_pairs = map.atomic_pairs_on_same_line();
        let has_atomic_pairs = !atomic_pairs.is_empty();

        // Without an atomic pair we cannot statically show that different
        // threads write different fields; require at least one atomic
        // field in the record before reporting.
        if !has_atomic_pairs && map.total_atomic_fields() == 0 {
            return;
        }

        let (severity, confidence, tier) = if has_atomic_pairs {
            (Severity::Critical, 0.88, EvidenceTier::Proven)
        } else {
            (Severity::High, 0.68, EvidenceTier::Likely)
        };

        let mut escalations = Vec::new();
        for pair in &atomic_pairs {
            let a = &map.fields()[pair.a];
            let b = &map.fields()[pair.b];
            escalations.push(format!(
                "atomic fields '{}' and '{}' share line {}: guaranteed cross-core \
                 invalidation on write",
                a.name, b.name, pair.line_index
            ));
        }
        for line in map.false_sharing_candidate_lines() {
            let bucket = &map.buckets()[line as usize];
            escalations.push(format!(
                "line {}: {} atomic + {} non-atomic mutable field(s), mixed write surface",
                line,
                bucket.atomic_count,
                bucket.mutable_count - bucket.atomic_count
            ));
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity,
            confidence,
            evidence_tier: tier,
            suppressed: false,
            location: record.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Struct '{}' ({}B, {} line(s)): {} mutable field pair(s) share cache line(s) \
                 with thread-escape evidence. Concurrent writes to co-located fields trigger \
                 MESI invalidation per write.",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned(),
                mutable_pairs.len()
            ),
            structural_evidence: format!(
                "sizeof={}B; lines={}; mutable_pairs_same_line={}; atomic_pairs_same_line={}; \
                 thread_escape=true; atomics={}",
                map.record_size_bytes(),
                map.lines_spanned(),
                mutable_pairs.len(),
                atomic_pairs.len(),
                super::yes_no(map.total_atomic_fields() > 0)
            ),
            mitigation: "Pad independently-written fields to separate 64B cache lines with \
                         alignas(64). Consider per-thread/per-core replicas."
                .into(),
            escalations,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldDecl, RecordDecl, TypeRef};
    use crate::rules::Rule;

    fn run(record: RecordDecl) -> Vec<Diagnostic> {
        let unit = TranslationUnit {
            records: vec![record],
            ..Default::default()
        };
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        FalseSharing.analyze(
            &Decl::Record(&unit.records[0]),
            &unit,
            &oracle,
            &config,
            &mut out,
        );
        out
    }

    #[test]
    fn adjacent_atomics_are_a_proven_critical_finding() {
        let record = RecordDecl::sized(
            "Cursor",
            16,
            vec![
                FieldDecl::at("r", TypeRef::atomic_of("unsigned long", 8), 0),
                FieldDecl::at("w", TypeRef::atomic_of("unsigned long", 8), 8),
            ],
        );
        let diags = run(record);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.88).abs() < 1e-9);
        assert_eq!(d.evidence_tier, EvidenceTier::Proven);
        assert!(d
            .escalations
            .iter()
            .any(|e| e.contains("'r'") && e.contains("'w'") && e.contains("line 0")));
    }

    #[test]
    fn mixed_surface_without_atomic_pair_downgrades() {
        // One atomic plus plain mutable neighbors on the same line.
        let record = RecordDecl::sized(
            "Stats",
            24,
            vec![
                FieldDecl::at("counter", TypeRef::atomic_of("unsigned long", 8), 0),
                FieldDecl::at("sum", TypeRef::sized("unsigned long", 8), 8),
                FieldDecl::at("last", TypeRef::sized("unsigned long", 8), 16),
            ],
        );
        let diags = run(record);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::High);
        assert!((d.confidence - 0.68).abs() < 1e-9);
        assert_eq!(d.evidence_tier, EvidenceTier::Likely);
        assert!(d.escalations.iter().any(|e| e.contains("mixed write surface")));
    }

    #[test]
    fn records_without_escape_evidence_are_silent() {
        let record = RecordDecl::sized(
            "Plain",
            16,
            vec![
                FieldDecl::at("a", TypeRef::sized("unsigned long", 8), 0),
                FieldDecl::at("b", TypeRef::sized("unsigned long", 8), 8),
            ],
        );
        assert!(run(record).is_empty());
    }

    #[test]
    fn padded_atomics_on_separate_lines_are_silent() {
        let record = RecordDecl::sized(
            "Padded",
            128,
            vec![
                FieldDecl::at("head", TypeRef::atomic_of("unsigned long", 8), 0),
                FieldDecl::at("tail", TypeRef::atomic_of("unsigned long", 8), 64),
            ],
        );
        // Each line holds one field, so no pair shares a line.
        assert!(run(record).is_empty());
    }
}
