//! FL012: mutex acquisition on the hot path.
//!
//! Detects explicit `lock`/`try_lock` calls on mutex-like classes and
//! RAII lock wrapper construction. Lock nesting is tracked by bumping a
//! counter at each acquisition and restoring it when the enclosing scope
//! ends.

use super::{Decl, Rule};
use crate::ast::{Stmt, TranslationUnit};
use crate::config::AnalyzerConfig;
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct LockHotPath;

const RAII_LOCK_TEMPLATES: &[&str] = &[
    "std::lock_guard",
    "std::unique_lock",
    "std::shared_lock",
    "std::scoped_lock",
];

#[derive(Debug)]
struct LockSite {
    loc: SourceLoc,
    kind: String,
    is_nested: bool,
    in_loop: bool,
}

fn is_mutex_class(class_qualified: &str) -> bool {
    class_qualified.contains("mutex")
        || class_qualified.contains("spinlock")
        || class_qualified.contains("shared_mutex")
}

fn collect_locks(stmts: &[Stmt], loop_depth: u32, lock_depth: &mut u32, sites: &mut Vec<LockSite>) {
    for stmt in stmts {
        match stmt {
            Stmt::Compound { stmts } => {
                let saved = *lock_depth;
                collect_locks(stmts, loop_depth, lock_depth, sites);
                *lock_depth = saved;
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                let saved = *lock_depth;
                collect_locks(then_branch, loop_depth, lock_depth, sites);
                *lock_depth = saved;
                collect_locks(else_branch, loop_depth, lock_depth, sites);
                *lock_depth = saved;
            }
            Stmt::For { body } | Stmt::While { body } | Stmt::Do { body } | Stmt::RangeFor { body } => {
                let saved = *lock_depth;
                collect_locks(body, loop_depth + 1, lock_depth, sites);
                *lock_depth = saved;
            }
            Stmt::Switch { body, .. } => {
                let saved = *lock_depth;
                collect_locks(body, loop_depth, lock_depth, sites);
                *lock_depth = saved;
            }
            Stmt::MemberCall {
                loc,
                method,
                class_qualified,
                args,
                ..
            } => {
                if (method == "lock" || method == "try_lock") && is_mutex_class(class_qualified) {
                    sites.push(LockSite {
                        loc: loc.clone(),
                        kind: format!("{class_qualified}::{method}"),
                        is_nested: *lock_depth > 0,
                        in_loop: loop_depth > 0,
                    });
                    *lock_depth += 1;
                }
                collect_locks(args, loop_depth, lock_depth, sites);
            }
            Stmt::Construct { loc, ty } => {
                if let Some(template) = ty.template.as_deref() {
                    if RAII_LOCK_TEMPLATES.contains(&template) {
                        sites.push(LockSite {
                            loc: loc.clone(),
                            kind: template.to_string(),
                            is_nested: *lock_depth > 0,
                            in_loop: loop_depth > 0,
                        });
                        *lock_depth += 1;
                    }
                }
            }
            other => {
                for child in other.children() {
                    collect_locks(std::slice::from_ref(child), loop_depth, lock_depth, sites);
                }
            }
        }
    }
}

impl Rule for LockHotPath {
    fn id(&self) -> &'static str {
        "FL012"
    }

    fn title(&self) -> &'static str {
        "Lock in Hot Path"
    }

    fn base_severity(&self) -> Severity {
        Severity::Critical
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Lock convoy: threads serialize on a contended mutex, converting parallel \
         execution to sequential. Blocking locks trigger futex syscall and context \
         switch (~1-10us). Cache line contention on mutex internal state."
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
        let mut lock_depth = 0;
        collect_locks(body, 0, &mut lock_depth, &mut sites);

        for site in sites {
            let mut escalations = Vec::new();
            if site.is_nested {
                escalations.push(
                    "nested lock acquisition: deadlock risk and compounding serialization \
                     latency"
                        .to_string(),
                );
            }
            if site.in_loop {
                escalations.push(
                    "lock inside loop: per-iteration lock convoy risk, sustained context \
                     switch pressure under contention"
                        .to_string(),
                );
            }

            out.push(Diagnostic {
                rule_id: self.id().into(),
                title: self.title().into(),
                severity: Severity::Critical,
                confidence: 0.75,
                evidence_tier: EvidenceTier::Likely,
                suppressed: false,
                location: site.loc,
                function_name: function.qualified_name.clone(),
                hardware_reasoning: format!(
                    "'{}' in hot function '{}'. Under contention, a blocking mutex triggers \
                     futex syscall and context switch (~1-10us). Even uncontended, LOCK \
                     CMPXCHG on the mutex state drains the store buffer.",
                    site.kind, function.qualified_name
                ),
                structural_evidence: format!(
                    "lock_type={}; function={}; nested={}; in_loop={}",
                    site.kind,
                    function.qualified_name,
                    super::yes_no(site.is_nested),
                    super::yes_no(site.in_loop)
                ),
                mitigation: "Use lock-free data structures. Adopt single-writer design \
                             pattern. Partition state to eliminate shared mutable access. \
                             Use try_lock with fallback to avoid blocking."
                    .into(),
                escalations,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, TypeRef};
    use crate::rules::Rule;

    fn guard(line: u32) -> Stmt {
        Stmt::Construct {
            loc: SourceLoc {
                file: "srv.cpp".into(),
                line,
                column: 5,
            },
            ty: TypeRef {
                name: "std::lock_guard<std::mutex>".into(),
                template: Some("std::lock_guard".into()),
                ..Default::default()
            },
        }
    }

    fn run(body: Vec<Stmt>) -> Vec<Diagnostic> {
        let function = FunctionDecl {
            qualified_name: "srv::handle".into(),
            annotations: vec!["faultline_hot".into()],
            body: Some(body),
            ..Default::default()
        };
        let unit = TranslationUnit::default();
        let config = AnalyzerConfig::default();
        let oracle = HotPathOracle::new(&config);
        let mut out = Vec::new();
        LockHotPath.analyze(&Decl::Function(&function), &unit, &oracle, &config, &mut out);
        out
    }

    #[test]
    fn raii_guard_fires_one_critical_per_site() {
        let diags = run(vec![guard(10)]);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Critical);
        assert!((d.confidence - 0.75).abs() < 1e-9);
        assert_eq!(d.evidence_value("lock_type"), Some("std::lock_guard"));
        assert_eq!(d.evidence_value("nested"), Some("no"));
        assert!(d.escalations.is_empty());
    }

    #[test]
    fn explicit_lock_call_on_mutex_class_is_detected() {
        let diags = run(vec![Stmt::MemberCall {
            loc: SourceLoc::default(),
            method: "lock".into(),
            class_qualified: "std::mutex".into(),
            receiver_ty: TypeRef::named("std::mutex"),
            receiver_name: Some("mu".into()),
            is_virtual: false,
            order_args: vec![],
            args: vec![],
        }]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].evidence_value("lock_type"), Some("std::mutex::lock"));
    }

    #[test]
    fn nested_acquisition_escalates() {
        let diags = run(vec![Stmt::Compound {
            stmts: vec![guard(10), Stmt::Compound { stmts: vec![guard(11)] }],
        }]);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].evidence_value("nested"), Some("no"));
        assert_eq!(diags[1].evidence_value("nested"), Some("yes"));
        assert!(diags[1].escalations.iter().any(|e| e.contains("nested")));
    }

    #[test]
    fn sibling_scopes_do_not_inherit_nesting() {
        let diags = run(vec![
            Stmt::Compound { stmts: vec![guard(10)] },
            Stmt::Compound { stmts: vec![guard(20)] },
        ]);
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.evidence_value("nested") == Some("no")));
    }

    #[test]
    fn loop_enclosed_acquisition_escalates() {
        let diags = run(vec![Stmt::For { body: vec![guard(9)] }]);
        assert_eq!(diags[0].evidence_value("in_loop"), Some("yes"));
        assert!(diags[0].escalations.iter().any(|e| e.contains("loop")));
    }
}
