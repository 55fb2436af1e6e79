//! FL061: single-point dispatcher fan-out in a hot function.

use super::{Decl, Rule};
use crate::ast::{walk, Stmt, TranslationUnit, WalkContext};
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct CentralizedDispatcher;

#[derive(Default)]
struct DispatchInfo {
    virtual_calls: u32,
    switch_cases: u32,
    callees: u32,
    has_loop: bool,
}

impl Rule for CentralizedDispatcher {
    fn id(&self) -> &'static str {
        "FL061"
    }

    fn title(&self) -> &'static str {
        "Centralized Dispatcher Bottleneck"
    }

    fn base_severity(&self) -> Severity {
        Severity::High
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Single-point fan-out dispatcher serializes all message processing through \
         one function. Under load this creates instruction cache pressure from the \
         large dispatch body, branch misprediction from polymorphic dispatch, and \
         prevents per-core locality of message handling state."
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

        let mut info = DispatchInfo::default();
        walk(body, &mut |stmt: &Stmt, _ctx: WalkContext| match stmt {
            Stmt::MemberCall { is_virtual, .. } => {
                info.callees += 1;
                if *is_virtual {
                    info.virtual_calls += 1;
                }
            }
            Stmt::Call { .. } | Stmt::OperatorCall { .. } => info.callees += 1,
            Stmt::Switch { cases, .. } => info.switch_cases = info.switch_cases.max(*cases),
            s if s.is_loop() => info.has_loop = true,
            _ => {}
        });

        let reason = if info.callees >= 8 {
            format!("{} call sites (high fan-out)", info.callees)
        } else if info.switch_cases >= 6 && info.callees >= 3 {
            format!(
                "{}-case switch with {} call sites",
                info.switch_cases, info.callees
            )
        } else if info.virtual_calls >= 3 {
            format!(
                "{} virtual dispatch sites (polymorphic fan-out)",
                info.virtual_calls
            )
        } else {
            return;
        };

        let mut severity = Severity::High;
        let mut escalations = Vec::new();
        if info.has_loop {
            severity = Severity::Critical;
            escalations.push(
                "dispatch loop: per-iteration fan-out amplifies I-cache and BTB pressure"
                    .to_string(),
            );
        }
        if info.virtual_calls >= 3 && info.switch_cases >= 4 {
            severity = Severity::Critical;
            escalations.push(
                "mixed dispatch: switch + virtual calls compound branch misprediction surface"
                    .to_string(),
            );
        }

        out.push(Diagnostic {
            rule_id: self.id().into(),
            title: self.title().into(),
            severity,
            confidence: 0.55,
            evidence_tier: EvidenceTier::Unknown,
            suppressed: false,
            location: function.loc.clone(),
            function_name: function.qualified_name.clone(),
            hardware_reasoning: format!(
                "Hot function '{}' exhibits a centralized dispatcher pattern: {reason}. \
                 Single-point fan-out serializes all processing, pressures the I-cache with \
                 a large dispatch body, and creates BTB contention from multiple indirect \
                 targets.",
                function.qualified_name
            ),
            structural_evidence: format!(
                "function={}; callees={}; virtual_call={}; switch_cases={}; has_loop={}",
                function.qualified_name,
                info.callees,
                info.virtual_calls,
                info.switch_cases,
                super::yes_no(info.has_loop)
            ),
            mitigation: "Partition dispatch by message type to separate handlers. Use \
                         compile-time dispatch (templates, CRTP) where the type set is \
                         closed. Shard by core to eliminate cross-core contention on \
                         dispatcher state. Consider table-driven dispatch with function \
                         pointer arrays."
                .into(),
            escalations,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, SourceLoc, TypeRef};
    use crate::rules::Rule;

    fn call(callee: &str) -> Stmt {
        Stmt::Call {
            loc: SourceLoc::default(),
            callee: Some(callee.into()),
            callee_ty: None,
            args: vec![],
        }
    }

    fn virtual_call() -> Stmt {
        Stmt::MemberCall {
            loc: SourceLoc::default(),
            method: "handle".into(),
            class_qualified: "Handler".into(),
            receiver_ty: TypeRef {
                name: "Handler*".into(),
                is_pointer: true,
                ..Default::default()
            },
            receiver_name: None,
            is_virtual: true,
            order_args: vec![],
            args: vec![],
        }
    }

    fn run(body: Vec<Stmt>) -> Vec<Diagnostic> {
        let function = FunctionDecl {
            qualified_name: "bus::dispatch".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(body),
            ..Default::default()
        };
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        CentralizedDispatcher.analyze(&Decl::Function(&function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn high_fan_out_alone_triggers() {
        let body: Vec<Stmt> = (0..8).map(|i| call(&format!("handler_{i}"))).collect();
        let diags = run(body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::High);
        assert_eq!(diags[0].evidence_value("callees"), Some("8"));
    }

    #[test]
    fn few_plain_calls_do_not_trigger() {
        let body: Vec<Stmt> = (0..5).map(|i| call(&format!("f{i}"))).collect();
        assert!(run(body).is_empty());
    }

    #[test]
    fn switch_with_calls_triggers() {
        let mut body = vec![Stmt::Switch {
            loc: SourceLoc::default(),
            cases: 6,
            body: vec![],
        }];
        body.extend((0..3).map(|i| call(&format!("f{i}"))));
        let diags = run(body);
        assert_eq!(diags[0].evidence_value("switch_cases"), Some("6"));
    }

    #[test]
    fn loop_enclosed_dispatch_is_critical() {
        let body = vec![Stmt::While {
            body: (0..8).map(|i| call(&format!("f{i}"))).collect(),
        }];
        let diags = run(body);
        assert_eq!(diags[0].severity, Severity::Critical);
        assert_eq!(diags[0].evidence_value("has_loop"), Some("yes"));
    }

    #[test]
    fn mixed_virtual_and_switch_is_critical() {
        let mut body = vec![Stmt::Switch {
            loc: SourceLoc::default(),
            cases: 4,
            body: vec![],
        }];
        body.extend((0..3).map(|_| virtual_call()));
        let diags = run(body);
        assert_eq!(diags[0].severity, Severity::Critical);
        assert!(diags[0].escalations.iter().any(|e| e.contains("mixed dispatch")));
    }
}
