//! FL031: type-erased callable dispatch on the hot path.
//!
//! Flags call-operator invocations on `std::function`, construction of
//! one, direct calls through a `std::function`-typed variable, and hot
//! functions taking a `std::function` parameter even when the body has
//! no visible call site (the invocation cost exists wherever the wrapper
//! is eventually called).

use super::{Decl, Rule};
use crate::ast::{walk, Stmt, TranslationUnit, WalkContext};
use crate::config::AnalyzerConfig;
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::escape::is_std_function_type;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct StdFunctionHotPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteKind {
    Invoke,
    Construct,
    Parameter,
}

impl SiteKind {
    fn name(self) -> &'static str {
        match self {
            SiteKind::Invoke => "invocation",
            SiteKind::Construct => "construction",
            SiteKind::Parameter => "parameter",
        }
    }
}

struct FuncSite {
    loc: SourceLoc,
    kind: SiteKind,
    in_loop: bool,
}

impl Rule for StdFunctionHotPath {
    fn id(&self) -> &'static str {
        "FL031"
    }

    fn title(&self) -> &'static str {
        "std::function in Hot Path"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "std::function uses type-erased callable storage. Invocation requires an \
         indirect call (BTB pressure). Construction may heap-allocate if the \
         callable exceeds SBO (typically 16-32B). Prevents inlining."
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

        let mut sites = Vec::new();
        walk(body, &mut |stmt: &Stmt, ctx: WalkContext| {
            let in_loop = ctx.loop_depth > 0;
            match stmt {
                Stmt::OperatorCall {
                    loc,
                    op,
                    receiver_ty,
                    ..
                } if op == "()" && is_std_function_type(receiver_ty) => {
                    sites.push(FuncSite {
                        loc: loc.clone(),
                        kind: SiteKind::Invoke,
                        in_loop,
                    });
                }
                Stmt::Construct { loc, ty } if is_std_function_type(ty) => {
                    sites.push(FuncSite {
                        loc: loc.clone(),
                        kind: SiteKind::Construct,
                        in_loop,
                    });
                }
                Stmt::Call {
                    loc,
                    callee_ty: Some(callee_ty),
                    ..
                } if is_std_function_type(callee_ty) => {
                    sites.push(FuncSite {
                        loc: loc.clone(),
                        kind: SiteKind::Invoke,
                        in_loop,
                    });
                }
                _ => {}
            }
        });

        let has_func_param = function.params.iter().any(|p| is_std_function_type(&p.ty));
        if sites.is_empty() {
            if !has_func_param {
                return;
            }
            sites.push(FuncSite {
                loc: function.loc.clone(),
                kind: SiteKind::Parameter,
                in_loop: false,
            });
        }

        for site in sites {
            let mut severity = Severity::High;
            let mut escalations = Vec::new();

            if site.in_loop {
                severity = Severity::Critical;
                escalations.push(
                    "std::function used inside loop: repeated indirect call and potential \
                     per-iteration heap allocation"
                        .to_string(),
                );
            }
            if site.kind == SiteKind::Construct {
                escalations.push(
                    "std::function constructed in hot path: may heap-allocate if the \
                     callable exceeds the SBO threshold (~16-32B)"
                        .to_string(),
                );
            }
            if site.kind == SiteKind::Parameter {
                escalations.push(
                    "std::function parameter on hot function: every eventual invocation \
                     pays the indirect call"
                        .to_string(),
                );
            }

            out.push(Diagnostic {
                rule_id: self.id().into(),
                title: self.title().into(),
                severity,
                confidence: 0.80,
                evidence_tier: EvidenceTier::Proven,
                suppressed: false,
                location: site.loc,
                function_name: function.qualified_name.clone(),
                hardware_reasoning: format!(
                    "std::function {} in hot function '{}'. Type erasure forces an indirect \
                     call through a function pointer (BTB lookup, pipeline flush on \
                     mispredict) and prevents compiler inlining of the callable.",
                    site.kind.name(),
                    function.qualified_name
                ),
                structural_evidence: format!(
                    "std_function_{}; caller={}; in_loop={}; hot_path=true",
                    site.kind.name(),
                    function.qualified_name,
                    super::yes_no(site.in_loop)
                ),
                mitigation: "Use a template parameter for the callable type. Use an auto \
                             lambda. Use a raw function pointer if the target is known. Use \
                             std::variant + visitor for closed type sets."
                    .into(),
                escalations,
            });
        }
    }
}
