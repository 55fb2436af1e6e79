//! FL010: sequentially consistent ordering where a weaker order would do.
//!
//! On x86-64 TSO the cost asymmetry is on stores: a seq_cst store lowers
//! to XCHG (implicit LOCK, store buffer drain) where a release store is a
//! plain MOV. seq_cst loads are free, so they are skipped outright.

use super::{collect_atomic_sites, AtomicOpClass, Decl, Rule};
use crate::ast::TranslationUnit;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct AtomicOrdering;

impl Rule for AtomicOrdering {
    fn id(&self) -> &'static str {
        "FL010"
    }

    fn title(&self) -> &'static str {
        "Overly Strong Atomic Ordering"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "On x86-64 TSO: seq_cst stores lower to XCHG (implicit LOCK, store buffer \
         drain). seq_cst loads lower to plain MOV (no additional cost over acquire). \
         seq_cst RMW lowers to a LOCK-prefixed instruction (same as acq_rel RMW). \
         The actionable cost is on stores where release ordering would emit plain MOV."
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

        let sites: Vec<_> = collect_atomic_sites(body)
            .into_iter()
            .filter(|s| s.is_seq_cst)
            // Plain assignment is covered by FL011's write census, not by
            // the ordering rule's operator set.
            .filter(|s| !(s.from_operator && s.op == "operator="))
            .collect();
        if sites.is_empty() {
            return;
        }

        let seq_cst_total = sites.len();

        for site in &sites {
            // Free on TSO.
            if site.op_class == AtomicOpClass::Load {
                continue;
            }
            let is_store = site.op_class == AtomicOpClass::Store;

            let mut severity = if is_store {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut confidence = if is_store { 0.85 } else { 0.55 };
            let mut escalations = Vec::new();

            if site.in_loop && is_store {
                severity = Severity::Critical;
                confidence = 0.90;
                escalations.push(
                    "seq_cst store inside loop: XCHG per iteration, sustained store buffer drain"
                        .to_string(),
                );
            } else if site.in_loop {
                severity = Severity::High;
                escalations.push(
                    "seq_cst RMW inside loop: LOCK-prefixed op per iteration (same cost as \
                     acq_rel on x86-64, but prevents compiler reordering optimizations)"
                        .to_string(),
                );
            }

            if seq_cst_total > 1 {
                escalations.push(format!(
                    "{seq_cst_total} seq_cst operations in function: cumulative serialization"
                ));
            }

            let hardware_reasoning = if is_store {
                format!(
                    "seq_cst store on '{}' in '{}': lowers to XCHG on x86-64 (implicit LOCK \
                     prefix, store buffer drain). release ordering would emit plain MOV with \
                     zero fence cost on TSO.",
                    site.var_name, function.qualified_name
                )
            } else {
                format!(
                    "seq_cst {} on '{}' in '{}': lowers to a LOCK-prefixed instruction on \
                     x86-64. On TSO, acq_rel RMW emits the same LOCK-prefixed op, so there is \
                     no runtime cost difference, but seq_cst prevents compiler reordering \
                     across the operation.",
                    site.op, site.var_name, function.qualified_name
                )
            };

            let mitigation = if is_store {
                "Use memory_order_release for stores where total order is not required. On \
                 x86-64 TSO, release stores emit plain MOV (zero fence cost). Verify no \
                 downstream load depends on SC total order before weakening."
            } else {
                "Use memory_order_acq_rel for RMW if total order is not required. On x86-64, \
                 runtime cost is identical (LOCK prefix either way), but weaker ordering \
                 enables compiler reordering optimizations around the operation."
            };

            out.push(Diagnostic {
                rule_id: self.id().into(),
                title: self.title().into(),
                severity,
                confidence,
                evidence_tier: if is_store {
                    EvidenceTier::Likely
                } else {
                    EvidenceTier::Unknown
                },
                suppressed: false,
                location: site.loc.clone(),
                function_name: function.qualified_name.clone(),
                hardware_reasoning,
                structural_evidence: format!(
                    "op={}; op_class={}; var={}; ordering=seq_cst; function={}; in_loop={}; \
                     total_seq_cst_in_func={}",
                    site.op,
                    site.op_class.name(),
                    site.var_name,
                    function.qualified_name,
                    super::yes_no(site.in_loop),
                    seq_cst_total
                ),
                mitigation: mitigation.into(),
                escalations,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, SourceLoc, Stmt, TypeRef};
    use crate::rules::Rule;

    fn atomic_call(method: &str, var: &str, order_args: Vec<String>, line: u32) -> Stmt {
        Stmt::MemberCall {
            loc: SourceLoc {
                file: "hot.cpp".into(),
                line,
                column: 5,
            },
            method: method.into(),
            class_qualified: "std::atomic".into(),
            receiver_ty: TypeRef::atomic_of("unsigned long", 8),
            receiver_name: Some(var.into()),
            is_virtual: false,
            order_args,
            args: vec![],
        }
    }

    fn hot_function(body: Vec<Stmt>) -> FunctionDecl {
        FunctionDecl {
            name: "publish".into(),
            qualified_name: "md::publish".into(),
            mangled_name: "_ZN2md7publishEv".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(body),
            ..Default::default()
        }
    }

    fn run(function: &FunctionDecl) -> Vec<Diagnostic> {
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        AtomicOrdering.analyze(&Decl::Function(function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn store_in_loop_is_critical_and_load_is_skipped() {
        // for (...) seq.store(seq.load() + 1);
        let function = hot_function(vec![Stmt::For {
            body: vec![Stmt::MemberCall {
                loc: SourceLoc {
                    file: "hot.cpp".into(),
                    line: 14,
                    column: 9,
                },
                method: "store".into(),
                class_qualified: "std::atomic".into(),
                receiver_ty: TypeRef::atomic_of("unsigned long", 8),
                receiver_name: Some("seq".into()),
                is_virtual: false,
                order_args: vec![],
                args: vec![atomic_call("load", "seq", vec![], 14)],
            }],
        }]);

        let diags = run(&function);
        assert_eq!(diags.len(), 1, "load sites must not be reported");
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.90).abs() < 1e-9);
        assert!(d.escalations.iter().any(|e| e.contains("inside loop")));
        assert_eq!(d.evidence_value("op_class"), Some("store"));
        assert_eq!(d.evidence_value("ordering"), Some("seq_cst"));
        assert_eq!(d.evidence_value("total_seq_cst_in_func"), Some("2"));
    }

    #[test]
    fn explicit_release_store_is_not_flagged() {
        let function = hot_function(vec![atomic_call(
            "store",
            "seq",
            vec!["memory_order_release".into()],
            7,
        )]);
        assert!(run(&function).is_empty());
    }

    #[test]
    fn rmw_outside_loop_is_medium_speculative() {
        let function = hot_function(vec![atomic_call("fetch_add", "hits", vec![], 3)]);
        let diags = run(&function);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Medium);
        assert!((d.confidence - 0.55).abs() < 1e-9);
        assert_eq!(d.evidence_tier, EvidenceTier::Unknown);
        assert_eq!(d.evidence_value("op_class"), Some("rmw"));
    }

    #[test]
    fn cold_functions_are_ignored() {
        let mut function = hot_function(vec![atomic_call("store", "seq", vec![], 2)]);
        function.annotations.clear();
        assert!(run(&function).is_empty());
    }
}
