//! FL040: centralized mutable global state.

use super::{Decl, Rule};
use crate::ast::TranslationUnit;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::escape::{is_atomic_type, EscapeAnalysis};
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct GlobalState;

impl Rule for GlobalState {
    fn id(&self) -> &'static str {
        "FL040"
    }

    fn title(&self) -> &'static str {
        "Centralized Mutable Global State"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Any-thread access without confinement (remote NUMA penalty on multi-socket \
         systems). Cache line contention on shared writes. Scalability collapse \
         under core count increase."
    }

    fn analyze(
        &self,
        decl: &Decl<'_>,
        unit: &TranslationUnit,
        _oracle: &HotPathOracle,
        _config: &AnalyzerConfig,
        out: &mut Vec<Diagnostic>,
    ) {
        let Decl::Var(var) = decl else { return };

        let escape = EscapeAnalysis::new(unit);
        if !escape.is_global_shared_mutable(var) {
            return;
        }

        let mut has_atomics = is_atomic_type(&var.ty);
        if let Some(record) = var.ty.record.as_deref().and_then(|q| unit.record(q)) {
            has_atomics = has_atomics || escape.has_atomic_members(record);
        }

        let mut escalations = Vec::new();
        if has_atomics {
            escalations.push(
                "contains atomic fields: confirmed multi-writer intent, guaranteed \
                 cross-core cache line contention"
                    .to_string(),
            );
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity: if has_atomics {
                Severity::Critical
            } else {
                Severity::High
            },
            confidence: if has_atomics { 0.85 } else { 0.60 },
            evidence_tier: if has_atomics {
                EvidenceTier::Likely
            } else {
                EvidenceTier::Unknown
            },
            suppressed: false,
            location: var.loc.clone(),
            function_name: String::new(),
            hardware_reasoning: format!(
                "Global mutable variable '{}' (type: {}). Accessible from any thread \
                 without confinement. On multi-socket systems, remote NUMA access adds \
                 ~100-300ns. Under multi-core write contention, cache line bouncing \
                 degrades linearly with core count.",
                var.name, var.ty.name
            ),
            structural_evidence: format!(
                "var={}; type={}; storage=global; const=no; thread_local=no; atomics={}",
                var.name,
                var.ty.name,
                super::yes_no(has_atomics)
            ),
            mitigation: "Partition state per-thread or per-core. Inject via a context \
                         object instead of global access. Use thread_local where possible. \
                         If read-mostly, consider RCU-style patterns."
                .into(),
            escalations,
        });
    }
}
