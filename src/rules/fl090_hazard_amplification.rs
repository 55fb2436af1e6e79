//! FL090: compound hazards on a single structure.
//!
//! Fires only when at least three independent signals coincide: a
//! multi-line footprint, atomic fields, and thread-escape evidence. Each
//! participating signal contributes its own escalation so the trace
//! explains exactly what compounds.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::cache_line::CacheLineMap;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::escape::EscapeAnalysis;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct HazardAmplification;

impl Rule for HazardAmplification {
    fn id(&self) -> &'static str {
        "FL090"
    }

    fn title(&self) -> &'static str {
        "Hazard Amplification"
    }

    fn base_severity(&self) -> Severity {
        Severity::Critical
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Multiple interacting latency multipliers on a single structure: cache line \
         spanning + atomic contention + cross-thread sharing. Each hazard compounds \
         under load. Coherence storms, store buffer saturation, and TLB pressure \
         interact to produce tail latency."
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
        let escape = EscapeAnalysis::new(unit);

        let multi_line = map.lines_spanned() >= 3;
        let has_atomics = map.total_atomic_fields() > 0;
        let thread_escape = escape.may_escape_thread(record);

        let signal_count =
            u32::from(multi_line) + u32::from(has_atomics) + u32::from(thread_escape);
        if signal_count < 3 {
            return;
        }

        let atomic_lines = map.buckets().iter().filter(|b| b.atomic_count > 0).count();
        let written_lines = map.buckets().iter().filter(|b| b.mutable_count > 0).count();

        let mut escalations = vec![
            format!(
                "{}B across {} cache lines",
                map.record_size_bytes(),
                map.lines_spanned()
            ),
            format!(
                "{} atomic field(s) on {} line(s): per-line RFO ownership transfer",
                map.total_atomic_fields(),
                atomic_lines
            ),
            "thread-escaping: coherence traffic amplified across participating cores"
                .to_string(),
        ];

        let straddlers = map.straddling_fields();
        if !straddlers.is_empty() {
            escalations.push(format!(
                "{} field(s) straddle line boundaries: split load/store penalty compounds \
                 with coherence cost",
                straddlers.len()
            ));
        }
        if map.total_mutable_fields() > 4 {
            escalations.push(format!(
                "{} mutable fields across {} line(s): wide write surface",
                map.total_mutable_fields(),
                written_lines
            ));
        }
        let atomic_pairs = map.atomic_pairs_on_same_line();
        if !atomic_pairs.is_empty() {
            escalations.push(format!(
                "{} atomic pair(s) share cache line(s): intra-line contention adds to \
                 cross-line RFO cost",
                atomic_pairs.len()
            ));
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity: Severity::Critical,
            confidence: 0.88,
            evidence_tier: EvidenceTier::Likely,
            suppressed: false,
            location: record.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Struct '{}' ({}B, {} lines) exhibits compound hazard: {} atomic field(s) \
                 across {} line(s) with thread-escape evidence. Under multi-core contention, \
                 per-line RFO ownership transfer and coherence invalidation interact across \
                 the full footprint.",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned(),
                map.total_atomic_fields(),
                atomic_lines
            ),
            structural_evidence: format!(
                "struct={}; sizeof={}B; cache_lines={}; atomic_fields={}; atomic_lines={}; \
                 mutable_fields={}; straddling={}; thread_escape=yes; signal_count={}",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned(),
                map.total_atomic_fields(),
                atomic_lines,
                map.total_mutable_fields(),
                straddlers.len(),
                signal_count
            ),
            mitigation: "Decompose into separate cache-line-aligned sub-structures. Isolate \
                         atomic fields with alignas(64) padding. Split hot (frequently \
                         written) and cold (rarely accessed) fields. Consider per-core \
                         replicas with periodic merge."
                .into(),
            escalations,
        });
    }
}
