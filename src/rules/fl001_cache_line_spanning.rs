//! FL001: struct footprint spans multiple cache lines.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::cache_line::CacheLineMap;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct CacheLineSpanning;

impl Rule for CacheLineSpanning {
    fn id(&self) -> &'static str {
        "FL001"
    }

    fn title(&self) -> &'static str {
        "Cache Line Spanning Struct"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "L1/L2 cache line footprint expansion. Increased eviction probability. \
         Higher coherence traffic under multi-core writes."
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

        let map = CacheLineMap::build(record, unit, config.cache_line_bytes);
        if map.lines_spanned() <= 1 {
            return;
        }

        let mut severity = Severity::High;
        let mut confidence: f64 = 0.72;
        let mut escalations = Vec::new();

        if map.lines_spanned() >= 3 {
            severity = Severity::Critical;
            escalations.push(format!(
                "{}B spans {} cache lines: elevated eviction pressure across the footprint",
                map.record_size_bytes(),
                map.lines_spanned()
            ));
        }

        // Only fields that would fit in a single line count as avoidable
        // straddles; a 160B array necessarily crosses boundaries.
        let avoidable_straddlers: Vec<_> = map
            .straddling_fields()
            .into_iter()
            .filter(|f| f.size_bytes <= map.cache_line_bytes())
            .collect();
        for field in &avoidable_straddlers {
            confidence = confidence.max(0.82);
            escalations.push(format!(
                "field '{}' at offset {} straddles lines {}..{}: split access pays two line fills",
                field.name, field.offset_bytes, field.start_line, field.end_line
            ));
        }

        if map.total_atomic_fields() > 0 {
            severity = Severity::Critical;
            confidence = 0.90;
            escalations.push(
                "contains atomic fields: coherence traffic amplified across spanned cache \
                 lines (MESI RFO storms)"
                    .to_string(),
            );
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity,
            confidence,
            evidence_tier: EvidenceTier::Proven,
            suppressed: false,
            location: record.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Struct '{}' occupies {}B, spanning {} cache line(s). Each access may touch \
                 multiple lines, increasing L1D pressure and coherence invalidation surface.",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned()
            ),
            structural_evidence: format!(
                "sizeof={}B; lines_spanned={}; straddling_fields={}; atomic_fields={}; \
                 mutable_fields={}",
                map.record_size_bytes(),
                map.lines_spanned(),
                avoidable_straddlers.len(),
                map.total_atomic_fields(),
                map.total_mutable_fields()
            ),
            mitigation: "Split hot/cold fields into separate structs. Consider AoS->SoA \
                         transformation. Apply alignas(64) to isolate write-heavy sub-structs."
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
        CacheLineSpanning.analyze(
            &Decl::Record(&unit.records[0]),
            &unit,
            &oracle,
            &config,
            &mut out,
        );
        out
    }

    #[test]
    fn single_line_records_are_silent() {
        let record = RecordDecl::sized(
            "Small",
            24,
            vec![FieldDecl::at("a", TypeRef::sized("unsigned long", 8), 0)],
        );
        assert!(run(record).is_empty());
    }

    #[test]
    fn three_line_record_is_critical_at_base_confidence() {
        let record = RecordDecl::sized(
            "OrderBookEntry",
            192,
            vec![
                FieldDecl::at("id", TypeRef::sized("unsigned long", 8), 0),
                FieldDecl::at("price", TypeRef::sized("unsigned long", 8), 8),
                FieldDecl::at("qty", TypeRef::sized("unsigned int", 4), 16),
                FieldDecl::at("flags", TypeRef::sized("unsigned int", 4), 20),
                FieldDecl::at("metadata", TypeRef::sized("char[160]", 160), 24),
            ],
        );
        let diags = run(record);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.72).abs() < 1e-9);
        assert_eq!(d.evidence_tier, EvidenceTier::Proven);
        assert_eq!(d.evidence_value("sizeof"), Some("192B"));
        assert_eq!(d.evidence_value("lines_spanned"), Some("3"));
        assert_eq!(d.evidence_value("straddling_fields"), Some("0"));
        assert_eq!(d.evidence_value("atomic_fields"), Some("0"));
        assert_eq!(d.evidence_value("mutable_fields"), Some("5"));
    }

    #[test]
    fn atomic_fields_escalate_to_critical_high_confidence() {
        let record = RecordDecl::sized(
            "Feed",
            224,
            vec![
                FieldDecl::at("seq_num", TypeRef::atomic_of("unsigned long", 8), 0),
                FieldDecl::at("last_price", TypeRef::atomic_of("unsigned long", 8), 8),
                FieldDecl::at("payload", TypeRef::sized("char[200]", 200), 16),
            ],
        );
        let diags = run(record);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.90).abs() < 1e-9);
        assert!(d.escalations.iter().any(|e| e.contains("atomic fields")));
        assert_eq!(d.evidence_value("atomic_fields"), Some("2"));
    }

    #[test]
    fn small_field_crossing_a_boundary_raises_confidence() {
        let record = RecordDecl::sized(
            "Packed",
            128,
            vec![
                FieldDecl::at("pad", TypeRef::sized("char[60]", 60), 0),
                FieldDecl::at("cursor", TypeRef::sized("unsigned long", 8), 60),
                FieldDecl::at("rest", TypeRef::sized("char[60]", 60), 68),
            ],
        );
        let diags = run(record);
        let d = &diags[0];
        assert!(d.confidence >= 0.82);
        assert_eq!(d.evidence_value("straddling_fields"), Some("1"));
        assert!(d.escalations.iter().any(|e| e.contains("cursor")));
    }

    #[test]
    fn lambdas_and_implicit_records_are_skipped() {
        let mut record = RecordDecl::sized("L", 192, vec![]);
        record.is_lambda = true;
        assert!(run(record).is_empty());
    }
}
