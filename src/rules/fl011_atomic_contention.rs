//! FL011: repeated atomic writes in one hot function.
//!
//! One summary diagnostic per function, gated on write count or a write
//! inside a loop; a single fire-and-forget atomic write is not a
//! contention signal.

use super::{collect_atomic_sites, Decl, Rule};
use crate::ast::TranslationUnit;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct AtomicContention;

impl Rule for AtomicContention {
    fn id(&self) -> &'static str {
        "FL011"
    }

    fn title(&self) -> &'static str {
        "Atomic Contention Hotspot"
    }

    fn base_severity(&self) -> Severity {
        Severity::Critical
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Cache line ownership thrashing via MESI RFO (Read-For-Ownership). Each \
         atomic write from a different core forces exclusive ownership transfer \
         (~40-100ns cross-core, ~100-300ns cross-socket). Store buffer pressure \
         from sustained atomic writes."
    }

    fn analyze(
        &self,
        decl: &Decl<'_>,
        _unit: &TranslationUnit,
        oracle: &HotPathOracle,
        _config: &AnalyzerConfig,
        out: &mut Vec<Diagnostic>,
    ) {
        let Decl::Function(function) = decl else { return };
        let Some(body) = &function.body else { return };
        if !oracle.is_function_hot(function) {
            return;
        }

        let writes: Vec<_> = collect_atomic_sites(body)
            .into_iter()
            .filter(|s| s.is_write)
            .collect();
        if writes.is_empty() {
            return;
        }

        let write_count = writes.len();
        let has_loop_write = writes.iter().any(|s| s.in_loop);
        if write_count < 2 && !has_loop_write {
            return;
        }

        let mut escalations = Vec::new();
        if write_count >= 3 {
            escalations.push(
                "3+ atomic writes per invocation: high store buffer pressure, sustained RFO \
                 traffic"
                    .to_string(),
            );
        }
        if has_loop_write {
            escalations.push(
                "atomic write inside loop: per-iteration cache line ownership transfer, store \
                 buffer saturation risk"
                    .to_string(),
            );
        }

        let ops = writes
            .iter()
            .map(|s| format!("{}({})", s.op, s.var_name))
            .collect::<Vec<_>>()
            .join(", ");

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity: Severity::Critical,
            confidence: if has_loop_write { 0.80 } else { 0.65 },
            evidence_tier: EvidenceTier::Likely,
            suppressed: false,
            location: function.loc.clone(),
            function_name: function.qualified_name.clone(),
            hardware_reasoning: format!(
                "Hot function '{}' contains {} atomic write(s). Under multi-core contention, \
                 each write triggers RFO cache line transfer. Multiple writes compound store \
                 buffer drain latency and coherence traffic.",
                function.qualified_name, write_count
            ),
            structural_evidence: format!(
                "function={}; atomic_writes={}; loop_writes={}; ops=[{}]",
                function.qualified_name,
                write_count,
                super::yes_no(has_loop_write),
                ops
            ),
            mitigation: "Shard atomic state per-core to eliminate cross-core RFO. Batch \
                         updates to reduce write frequency. Redesign ownership model to \
                         single-writer pattern. Consider thread-local accumulation with \
                         periodic merge."
                .into(),
            escalations,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, SourceLoc, Stmt, TypeRef};
    use crate::rules::Rule;

    fn write(method: &str, var: &str) -> Stmt {
        Stmt::MemberCall {
            loc: SourceLoc::default(),
            method: method.into(),
            class_qualified: "std::atomic".into(),
            receiver_ty: TypeRef::atomic_of("unsigned long", 8),
            receiver_name: Some(var.into()),
            is_virtual: false,
            order_args: vec![],
            args: vec![],
        }
    }

    fn run(body: Vec<Stmt>) -> Vec<Diagnostic> {
        let function = FunctionDecl {
            qualified_name: "engine::tick".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(body),
            ..Default::default()
        };
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        AtomicContention.analyze(&Decl::Function(&function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn single_straight_line_write_is_not_contention() {
        assert!(run(vec![write("store", "seq")]).is_empty());
    }

    #[test]
    fn two_writes_fire_one_summary_diagnostic() {
        let diags = run(vec![write("store", "seq"), write("fetch_add", "count")]);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.65).abs() < 1e-9);
        assert_eq!(d.evidence_value("atomic_writes"), Some("2"));
        assert_eq!(d.evidence_value("loop_writes"), Some("no"));
        assert!(d.evidence_value("ops").unwrap().contains("store(seq)"));
    }

    #[test]
    fn loop_write_raises_confidence() {
        let diags = run(vec![Stmt::While {
            body: vec![write("fetch_add", "count")],
        }]);
        let d = &diags[0];
        assert!((d.confidence - 0.80).abs() < 1e-9);
        assert!(d.escalations.iter().any(|e| e.contains("inside loop")));
    }

    #[test]
    fn loads_do_not_count_as_writes() {
        assert!(run(vec![write("load", "seq"), write("load", "count")]).is_empty());
    }
}
