//! FL041: concurrent-queue index pattern with head/tail atomics on one
//! cache line.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::cache_line::CacheLineMap;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct ContendedQueue;

const QUEUE_NAME_TOKENS: &[&str] = &["queue", "buffer", "ring"];
const INDEX_NAME_TOKENS: &[&str] = &[
    "head", "tail", "read", "write", "push", "pop", "front", "back",
];

fn contains_token(name: &str, tokens: &[&str]) -> bool {
    let lower = name.to_ascii_lowercase();
    tokens.iter().any(|t| lower.contains(t))
}

impl Rule for ContendedQueue {
    fn id(&self) -> &'static str {
        "FL041"
    }

    fn title(&self) -> &'static str {
        "Contended Queue Pattern"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Producer writes the tail index while the consumer writes the head index. \
         Without padding, producer and consumer thrash the same line."
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
        let atomic_pairs = map.atomic_pairs_on_same_line();
        if atomic_pairs.is_empty() {
            return;
        }

        let looks_like_queue = contains_token(&record.name, QUEUE_NAME_TOKENS);
        let has_head_tail = map
            .fields()
            .iter()
            .filter(|f| f.is_atomic)
            .any(|f| contains_token(&f.name, INDEX_NAME_TOKENS));
        let queue_suggestive = looks_like_queue || has_head_tail;

        let mut escalations = Vec::new();
        if queue_suggestive {
            escalations.push(
                "structure appears to be a concurrent queue: head/tail atomic indices on \
                 the same cache line guarantee producer-consumer cache line ping-pong"
                    .to_string(),
            );
        }
        for pair in &atomic_pairs {
            let a = &map.fields()[pair.a];
            let b = &map.fields()[pair.b];
            escalations.push(format!(
                "atomic fields '{}' and '{}' share line {}: concurrent writes trigger MESI \
                 invalidation",
                a.name, b.name, pair.line_index
            ));
        }

        let first = &atomic_pairs[0];
        let field_a = &map.fields()[first.a];
        let field_b = &map.fields()[first.b];

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity: if queue_suggestive {
                Severity::Critical
            } else {
                Severity::High
            },
            confidence: if queue_suggestive { 0.82 } else { 0.62 },
            evidence_tier: EvidenceTier::Likely,
            suppressed: false,
            location: record.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Struct '{}' ({}B, {} line(s)) has {} atomic field(s) with '{}' and '{}' on \
                 the same cache line. Under MPMC workload, every enqueue/dequeue triggers \
                 cross-core RFO for the shared line.",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned(),
                map.total_atomic_fields(),
                field_a.name,
                field_b.name
            ),
            structural_evidence: format!(
                "struct={}; sizeof={}B; lines={}; atomic_fields={}; same_line_pair={}; \
                 queue_heuristic={}; head_tail_names={}",
                record.name,
                map.record_size_bytes(),
                map.lines_spanned(),
                map.total_atomic_fields(),
                atomic_pairs.len(),
                super::yes_no(looks_like_queue),
                super::yes_no(has_head_tail)
            ),
            mitigation: "Pad head and tail indices to separate 64B cache lines using \
                         alignas(64). Use per-core queues (SPSC) where possible. Consider \
                         cache-line-aware queue implementations."
                .into(),
            escalations,
        });
    }
}
