//! FL060: large shared mutable structures with no NUMA-aware placement.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::escape::{is_field_mutable, EscapeAnalysis};
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct NumaUnfriendly;

const SIZE_GATE_BYTES: u64 = 256;
const SIZE_CRITICAL_BYTES: u64 = 4096;

impl Rule for NumaUnfriendly {
    fn id(&self) -> &'static str {
        "FL060"
    }

    fn title(&self) -> &'static str {
        "NUMA-Unfriendly Shared Structure"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Remote NUMA access costs ~100-300ns versus ~60-80ns local. Large shared \
         mutable structures allocated without NUMA-aware placement will be accessed \
         remotely by at least one socket."
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
        if record.size_bytes < SIZE_GATE_BYTES {
            return;
        }

        let escape = EscapeAnalysis::new(unit);
        if !escape.may_escape_thread(record) {
            return;
        }

        let has_atomics = escape.has_atomic_members(record);
        let mutable_count = record
            .fields
            .iter()
            .filter(|f| is_field_mutable(f.is_mutable_marked, &f.ty))
            .count() as u32;
        if mutable_count == 0 && !has_atomics {
            return;
        }

        let cache_lines = record.size_bytes.div_ceil(config.cache_line_bytes);
        let mut severity = Severity::High;
        let mut escalations = Vec::new();

        if record.size_bytes >= SIZE_CRITICAL_BYTES {
            severity = Severity::Critical;
            escalations.push(format!(
                "sizeof >= 4KB: spans {cache_lines} cache lines, guaranteed multi-page TLB \
                 footprint on a remote NUMA node"
            ));
        }
        if has_atomics {
            escalations.push(
                "contains atomic fields: cross-socket atomic RMW incurs interconnect \
                 round-trip (~200-400ns on QPI/UPI)"
                    .to_string(),
            );
        }
        if mutable_count > 8 {
            escalations.push(format!(
                "{mutable_count} mutable fields: wide write surface amplifies remote store \
                 buffer pressure"
            ));
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity,
            confidence: if has_atomics { 0.55 } else { 0.35 },
            evidence_tier: EvidenceTier::Unknown,
            suppressed: false,
            location: record.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Struct '{}' ({}B, {cache_lines} cache lines) with {mutable_count} mutable \
                 field(s) and thread-escape evidence. On multi-socket systems, at least one \
                 socket accesses this structure via the remote NUMA interconnect. Each \
                 remote cache line fetch adds ~100-300ns; atomic operations on remote lines \
                 require an interconnect round-trip.",
                record.name, record.size_bytes
            ),
            structural_evidence: format!(
                "struct={}; sizeof={}B; cache_lines={cache_lines}; \
                 mutable_fields={mutable_count}; atomics={}; thread_escape=yes",
                record.name,
                record.size_bytes,
                super::yes_no(has_atomics)
            ),
            mitigation: "Use numa_alloc_onnode() or mbind() for NUMA-aware placement. \
                         Replicate the structure per-socket with periodic synchronization. \
                         Split into read-mostly (replicated) and write-heavy (local) parts. \
                         Consider interleaved allocation for balanced access patterns."
                .into(),
            escalations,
        });
    }
}
