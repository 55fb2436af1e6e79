//! FL021: oversized stack frames.
//!
//! The frame estimate sums locals declared in the immediate body plus
//! by-value parameters. The estimate is deliberately coarse; the IR
//! refiner later replaces it with the precise alloca total and may
//! suppress the finding outright.

use super::{Decl, Rule};
use crate::ast::{Stmt, TranslationUnit};
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct LargeStackFrame;

impl Rule for LargeStackFrame {
    fn id(&self) -> &'static str {
        "FL021"
    }

    fn title(&self) -> &'static str {
        "Large Stack Frame"
    }

    fn base_severity(&self) -> Severity {
        Severity::Medium
    }

    fn hardware_mechanism(&self) -> &'static str {
        "TLB pressure from stack spanning multiple pages. L1D cache pressure from \
         large working set. Potential stack page faults on deep call chains."
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

        let mut total_bytes: u64 = 0;
        let mut large_locals: Vec<(String, u64)> = Vec::new();

        // Locals in the immediate body only; nested scopes typically
        // share frame slots after lowering.
        for stmt in body {
            let Stmt::DeclStmt { vars } = stmt else {
                continue;
            };
            for var in vars {
                if !var.has_local_storage {
                    continue;
                }
                if var.ty.is_incomplete || var.ty.is_dependent {
                    continue;
                }
                let Some(size) = var.ty.size_bytes else {
                    continue;
                };
                total_bytes += size;
                if size >= config.alloc_size_escalation {
                    large_locals.push((var.name.clone(), size));
                }
            }
        }

        // Parameters passed by value land in the frame too.
        for param in &function.params {
            if param.ty.is_incomplete || param.ty.is_dependent {
                continue;
            }
            if param.ty.is_reference || param.ty.is_pointer {
                continue;
            }
            if let Some(size) = param.ty.size_bytes {
                total_bytes += size;
            }
        }

        if total_bytes < config.stack_frame_warn_bytes {
            return;
        }

        let is_hot = oracle.is_function_hot(function);
        let mut severity = if is_hot { Severity::High } else { Severity::Medium };
        let mut escalations = Vec::new();

        if total_bytes > config.page_size {
            escalations.push(format!(
                "stack frame exceeds page size ({}B): guaranteed TLB miss on first access, \
                 potential page fault",
                config.page_size
            ));
            if is_hot {
                severity = Severity::Critical;
            }
        }
        if is_hot {
            escalations.push("function is on hot path".to_string());
        }

        let mut evidence = format!(
            "function={}; estimated_frame={}B; threshold={}B",
            function.qualified_name, total_bytes, config.stack_frame_warn_bytes
        );
        if !large_locals.is_empty() {
            let listing = large_locals
                .iter()
                .map(|(name, size)| format!("{name}({size}B)"))
                .collect::<Vec<_>>()
                .join(", ");
            evidence.push_str(&format!("; large_locals=[{listing}]"));
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity,
            confidence: 0.80,
            evidence_tier: EvidenceTier::Likely,
            suppressed: false,
            location: function.loc.clone(),
            function_name: function.qualified_name.clone(),
            hardware_reasoning: format!(
                "Function '{}' estimated stack frame ~{}B. Spans ~{} page(s). Large stack \
                 frames increase D-TLB working set, pressure L1D capacity, and risk stack \
                 page faults on deep call chains.",
                function.qualified_name,
                total_bytes,
                total_bytes.div_ceil(config.page_size)
            ),
            structural_evidence: evidence,
            mitigation: "Move large arrays to heap with an arena allocator. Use \
                         static/thread_local buffers for fixed-size data. Reduce local \
                         buffer sizes. Consider passing large structures by reference."
                .into(),
            escalations,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, LocalVar, ParamDecl, TypeRef};
    use crate::rules::Rule;

    fn locals(sizes: &[(&str, u64)]) -> Stmt {
        Stmt::DeclStmt {
            vars: sizes
                .iter()
                .map(|(name, size)| LocalVar {
                    name: name.to_string(),
                    ty: TypeRef::sized(format!("char[{size}]"), *size),
                    has_local_storage: true,
                })
                .collect(),
        }
    }

    fn run(function: FunctionDecl) -> Vec<Diagnostic> {
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        LargeStackFrame.analyze(&Decl::Function(&function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn frames_below_threshold_are_silent() {
        let function = FunctionDecl {
            qualified_name: "f".into(),
            body: Some(vec![locals(&[("buf", 1024)])]),
            ..Default::default()
        };
        assert!(run(function).is_empty());
    }

    #[test]
    fn cold_large_frame_is_medium_with_estimate_evidence() {
        let function = FunctionDecl {
            qualified_name: "codec::render".into(),
            body: Some(vec![locals(&[("buf", 2048), ("hdr", 452)])]),
            ..Default::default()
        };
        let diags = run(function);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Medium);
        assert!((d.confidence - 0.80).abs() < 1e-9);
        assert_eq!(d.evidence_number("estimated_frame"), Some(2500.0));
        assert!(d.evidence_value("large_locals").unwrap().contains("buf(2048B)"));
    }

    #[test]
    fn hot_frame_over_page_size_is_critical() {
        let function = FunctionDecl {
            qualified_name: "codec::render".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(vec![locals(&[("buf", 8192)])]),
            ..Default::default()
        };
        let diags = run(function);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!(d.escalations.iter().any(|e| e.contains("page size")));
        assert!(d.escalations.iter().any(|e| e.contains("hot path")));
    }

    #[test]
    fn by_value_params_count_but_references_do_not() {
        let function = FunctionDecl {
            qualified_name: "f".into(),
            params: vec![
                ParamDecl {
                    name: "msg".into(),
                    ty: TypeRef::sized("Message", 2048),
                },
                ParamDecl {
                    name: "ctx".into(),
                    ty: TypeRef {
                        name: "Context&".into(),
                        size_bytes: Some(4096),
                        is_reference: true,
                        ..Default::default()
                    },
                },
            ],
            body: Some(vec![]),
            ..Default::default()
        };
        let diags = run(function);
        assert_eq!(diags[0].evidence_number("estimated_frame"), Some(2048.0));
    }
}
