//! FL050: deep conditional nesting and wide switches in hot code.

use super::{Decl, Rule};
use crate::ast::{walk, Stmt, TranslationUnit, WalkContext};
use crate::config::AnalyzerConfig;
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct DeepConditional;

const SWITCH_CASE_WARN: u32 = 8;

impl Rule for DeepConditional {
    fn id(&self) -> &'static str {
        "FL050"
    }

    fn title(&self) -> &'static str {
        "Deep Conditional Tree in Hot Path"
    }

    fn base_severity(&self) -> Severity {
        Severity::Medium
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Deeply nested conditionals increase branch misprediction surface. Each \
         unpredictable branch costs ~14-20 cycles (pipeline flush). Large switch \
         statements on non-constexpr values pressure the BTB and I-cache."
    }

    fn analyze(
        &self,
        decl: &Decl<'_>,
        _unit: &TranslationUnit,
        oracle: &HotPathOracle,
        config: &AnalyzerConfig,
        out: &mut Vec<Diagnostic>,
    ) {
        let Decl::Function(function) = decl else { return };
        let Some(body) = &function.body else { return };
        if !oracle.is_function_hot(function) {
            return;
        }

        let mut max_depth: u32 = 0;
        let mut deepest: Option<(SourceLoc, u32)> = None;
        let mut switches: Vec<(SourceLoc, u32)> = Vec::new();

        walk(body, &mut |stmt: &Stmt, ctx: WalkContext| match stmt {
            Stmt::If { loc, .. } => {
                max_depth = max_depth.max(ctx.if_depth);
                if ctx.if_depth >= config.branch_depth_warn {
                    let deeper = deepest
                        .as_ref()
                        .map(|(_, d)| ctx.if_depth > *d)
                        .unwrap_or(true);
                    if deeper {
                        deepest = Some((loc.clone(), ctx.if_depth));
                    }
                }
            }
            Stmt::Switch { loc, cases, .. } if *cases >= SWITCH_CASE_WARN => {
                switches.push((loc.clone(), *cases));
            }
            _ => {}
        });

        if let Some((loc, depth)) = deepest {
            let mut severity = Severity::Medium;
            let mut escalations = Vec::new();
            if depth >= 6 {
                severity = Severity::High;
                escalations.push(format!(
                    "nesting depth {depth}: high branch entropy, compounding misprediction \
                     cost"
                ));
            }
            out.push(Diagnostic {
                rule_id: self.id().into(),
                title: self.title().into(),
                severity,
                confidence: 0.50,
                evidence_tier: EvidenceTier::Unknown,
                suppressed: false,
                location: loc,
                function_name: function.qualified_name.clone(),
                hardware_reasoning: format!(
                    "Conditional nesting depth {depth} in hot function '{}'. Each nested \
                     branch is a prediction point. Deep trees create correlated \
                     misprediction chains that defeat pattern-based predictors.",
                    function.qualified_name
                ),
                structural_evidence: format!(
                    "function={}; type=nested_if; depth={depth}; max_depth={max_depth}",
                    function.qualified_name
                ),
                mitigation: "Use table-driven dispatch. Flatten conditional logic with early \
                             returns. Precompute decision trees. Use __builtin_expect for \
                             predictable branches."
                    .into(),
                escalations,
            });
        }

        for (loc, cases) in switches {
            out.push(Diagnostic {
                rule_id: self.id().into(),
                title: self.title().into(),
                severity: Severity::High,
                confidence: 0.50,
                evidence_tier: EvidenceTier::Unknown,
                suppressed: false,
                location: loc,
                function_name: function.qualified_name.clone(),
                hardware_reasoning: format!(
                    "switch statement with {cases} cases in hot function '{}'. A \
                     non-constexpr switch generates an indirect jump table. The BTB must \
                     predict the target from {cases} possibilities and the I-cache footprint \
                     scales with case count.",
                    function.qualified_name
                ),
                structural_evidence: format!(
                    "function={}; type=switch; depth=0; max_depth={max_depth}; cases={cases}",
                    function.qualified_name
                ),
                mitigation: "Use table-driven dispatch. Flatten conditional logic with early \
                             returns. Precompute decision trees. Use __builtin_expect for \
                             predictable branches."
                    .into(),
                escalations: vec![format!(
                    "large switch ({cases} cases): BTB capacity pressure, I-cache bloat from \
                     jump table expansion"
                )],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionDecl;
    use crate::rules::Rule;

    fn nested_ifs(depth: u32) -> Stmt {
        let mut stmt = Stmt::If {
            loc: SourceLoc {
                file: "router.cpp".into(),
                line: 40 + depth,
                column: 1,
            },
            then_branch: vec![],
            else_branch: vec![],
        };
        for level in (1..depth).rev() {
            stmt = Stmt::If {
                loc: SourceLoc {
                    file: "router.cpp".into(),
                    line: 40 + level,
                    column: 1,
                },
                then_branch: vec![stmt],
                else_branch: vec![],
            };
        }
        stmt
    }

    fn run(body: Vec<Stmt>) -> Vec<Diagnostic> {
        let function = FunctionDecl {
            qualified_name: "router::classify".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(body),
            ..Default::default()
        };
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        DeepConditional.analyze(&Decl::Function(&function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn shallow_nesting_is_silent() {
        assert!(run(vec![nested_ifs(3)]).is_empty());
    }

    #[test]
    fn depth_four_emits_exactly_one_nesting_diagnostic() {
        let diags = run(vec![nested_ifs(5)]);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Medium);
        assert!((d.confidence - 0.50).abs() < 1e-9);
        assert_eq!(d.evidence_value("depth"), Some("5"));
        assert_eq!(d.evidence_value("max_depth"), Some("5"));
    }

    #[test]
    fn depth_six_is_high() {
        let diags = run(vec![nested_ifs(6)]);
        assert_eq!(diags[0].severity, Severity::High);
        assert!(diags[0].escalations.iter().any(|e| e.contains("depth 6")));
    }

    #[test]
    fn wide_switches_each_get_a_diagnostic() {
        let diags = run(vec![
            Stmt::Switch {
                loc: SourceLoc::default(),
                cases: 12,
                body: vec![],
            },
            Stmt::Switch {
                loc: SourceLoc::default(),
                cases: 7,
                body: vec![],
            },
            Stmt::Switch {
                loc: SourceLoc::default(),
                cases: 9,
                body: vec![],
            },
        ]);
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.severity == Severity::High));
        assert_eq!(diags[0].evidence_value("cases"), Some("12"));
        assert_eq!(diags[1].evidence_value("cases"), Some("9"));
    }
}
