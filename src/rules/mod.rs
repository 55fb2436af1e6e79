//! The rule engine: a registry of pluggable structural rules, each
//! consuming one declaration and appending zero or more diagnostics.
//!
//! Rules never fail. Malformed or incomplete input makes a rule abstain;
//! no error crosses the rule boundary. Registration order is fixed and
//! doubles as the stable component of diagnostic output order.

use crate::ast::{FunctionDecl, RecordDecl, Stmt, TranslationUnit, VarDecl, WalkContext};
use crate::config::AnalyzerConfig;
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::escape::is_atomic_type;
use crate::hotpath::HotPathOracle;
use crate::severity::Severity;

mod fl001_cache_line_spanning;
mod fl002_false_sharing;
mod fl010_atomic_ordering;
mod fl011_atomic_contention;
mod fl012_lock_hot_path;
mod fl020_heap_alloc_hot_path;
mod fl021_large_stack_frame;
mod fl030_virtual_dispatch;
mod fl031_std_function_hot_path;
mod fl040_global_state;
mod fl041_contended_queue;
mod fl050_deep_conditional;
mod fl060_numa_unfriendly;
mod fl061_centralized_dispatcher;
mod fl090_hazard_amplification;

/// One declaration as seen by the rule engine.
#[derive(Debug, Clone, Copy)]
pub enum Decl<'a> {
    Record(&'a RecordDecl),
    Function(&'a FunctionDecl),
    Var(&'a VarDecl),
}

impl<'a> Decl<'a> {
    pub fn in_system_header(&self) -> bool {
        match self {
            Decl::Record(r) => r.in_system_header,
            Decl::Function(f) => f.in_system_header,
            Decl::Var(v) => v.in_system_header,
        }
    }
}

pub trait Rule {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn base_severity(&self) -> Severity;
    /// One-line description of the hardware mechanism behind the hazard.
    fn hardware_mechanism(&self) -> &'static str;

    fn analyze(
        &self,
        decl: &Decl<'_>,
        unit: &TranslationUnit,
        oracle: &HotPathOracle,
        config: &AnalyzerConfig,
        out: &mut Vec<Diagnostic>,
    );
}

/// The process-wide rule set, in registration order. The collection is
/// built once per driver; there is no mutable global.
pub fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(fl001_cache_line_spanning::CacheLineSpanning),
        Box::new(fl002_false_sharing::FalseSharing),
        Box::new(fl010_atomic_ordering::AtomicOrdering),
        Box::new(fl011_atomic_contention::AtomicContention),
        Box::new(fl012_lock_hot_path::LockHotPath),
        Box::new(fl020_heap_alloc_hot_path::HeapAllocHotPath),
        Box::new(fl021_large_stack_frame::LargeStackFrame),
        Box::new(fl030_virtual_dispatch::VirtualDispatch),
        Box::new(fl031_std_function_hot_path::StdFunctionHotPath),
        Box::new(fl040_global_state::GlobalState),
        Box::new(fl041_contended_queue::ContendedQueue),
        Box::new(fl050_deep_conditional::DeepConditional),
        Box::new(fl060_numa_unfriendly::NumaUnfriendly),
        Box::new(fl061_centralized_dispatcher::CentralizedDispatcher),
        Box::new(fl090_hazard_amplification::HazardAmplification),
    ]
}

// --- shared helpers used by several rules ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AtomicOpClass {
    Load,
    Store,
    Rmw,
}

impl AtomicOpClass {
    pub(crate) fn name(self) -> &'static str {
        match self {
            AtomicOpClass::Load => "load",
            AtomicOpClass::Store => "store",
            AtomicOpClass::Rmw => "rmw",
        }
    }
}

/// One atomic operation site found in a function body.
#[derive(Debug, Clone)]
pub(crate) struct AtomicSite {
    pub loc: SourceLoc,
    pub op: String,
    pub var_name: String,
    pub op_class: AtomicOpClass,
    pub is_seq_cst: bool,
    pub is_write: bool,
    pub in_loop: bool,
    pub from_operator: bool,
}

const ATOMIC_METHODS: &[&str] = &[
    "load",
    "store",
    "exchange",
    "compare_exchange_weak",
    "compare_exchange_strong",
    "fetch_add",
    "fetch_sub",
    "fetch_and",
    "fetch_or",
    "fetch_xor",
    "notify_one",
    "notify_all",
    "wait",
];

const ATOMIC_WRITE_METHODS: &[&str] = &[
    "store",
    "exchange",
    "compare_exchange_weak",
    "compare_exchange_strong",
    "fetch_add",
    "fetch_sub",
    "fetch_and",
    "fetch_or",
    "fetch_xor",
];

const ATOMIC_RMW_OPERATORS: &[&str] = &["++", "--", "+=", "-=", "&=", "|=", "^="];

const WEAKER_ORDER_TOKENS: &[&str] = &["relaxed", "acquire", "release", "acq_rel", "consume"];

/// Collect every atomic method call and overloaded atomic operator in a
/// body, with loop depth and inferred ordering. seq_cst is the default
/// when no order argument names a weaker ordering.
pub(crate) fn collect_atomic_sites(body: &[Stmt]) -> Vec<AtomicSite> {
    let mut sites = Vec::new();
    crate::ast::walk(body, &mut |stmt: &Stmt, ctx: WalkContext| match stmt {
        Stmt::MemberCall {
            loc,
            method,
            receiver_ty,
            receiver_name,
            order_args,
            ..
        } => {
            if !is_atomic_type(receiver_ty) || !ATOMIC_METHODS.contains(&method.as_str()) {
                return;
            }
            let weakened = order_args
                .iter()
                .any(|arg| WEAKER_ORDER_TOKENS.iter().any(|t| arg.contains(t)));
            let op_class = match method.as_str() {
                "load" => AtomicOpClass::Load,
                "store" => AtomicOpClass::Store,
                _ => AtomicOpClass::Rmw,
            };
            sites.push(AtomicSite {
                loc: loc.clone(),
                op: method.clone(),
                var_name: receiver_name.clone().unwrap_or_else(|| "<unknown>".into()),
                op_class,
                is_seq_cst: !weakened,
                is_write: ATOMIC_WRITE_METHODS.contains(&method.as_str()),
                in_loop: ctx.loop_depth > 0,
                from_operator: false,
            });
        }
        Stmt::OperatorCall {
            loc,
            op,
            receiver_ty,
            receiver_name,
            ..
        } => {
            if !is_atomic_type(receiver_ty) {
                return;
            }
            let is_rmw = ATOMIC_RMW_OPERATORS.contains(&op.as_str());
            let is_assign = op == "=";
            if !is_rmw && !is_assign {
                return;
            }
            sites.push(AtomicSite {
                loc: loc.clone(),
                op: format!("operator{op}"),
                var_name: receiver_name.clone().unwrap_or_else(|| "<atomic>".into()),
                op_class: if is_assign {
                    AtomicOpClass::Store
                } else {
                    AtomicOpClass::Rmw
                },
                is_seq_cst: true,
                is_write: true,
                in_loop: ctx.loop_depth > 0,
                from_operator: true,
            });
        }
        _ => {}
    });
    sites
}

pub(crate) fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeRef;

    #[test]
    fn registry_order_is_fl001_through_fl090() {
        let ids: Vec<_> = all_rules().iter().map(|r| r.id()).collect();
        assert_eq!(
            ids,
            vec![
                "FL001", "FL002", "FL010", "FL011", "FL012", "FL020", "FL021", "FL030", "FL031",
                "FL040", "FL041", "FL050", "FL060", "FL061", "FL090",
            ]
        );
    }

    #[test]
    fn every_rule_documents_a_hardware_mechanism() {
        for rule in all_rules() {
            assert!(!rule.title().is_empty(), "{} has no title", rule.id());
            assert!(
                !rule.hardware_mechanism().is_empty(),
                "{} has no mechanism",
                rule.id()
            );
        }
    }

    #[test]
    fn atomic_site_collector_classifies_ops_and_orderings() {
        let atomic = TypeRef::atomic_of("unsigned long", 8);
        let body = vec![Stmt::For {
            body: vec![
                Stmt::MemberCall {
                    loc: SourceLoc::default(),
                    method: "store".into(),
                    class_qualified: "std::atomic".into(),
                    receiver_ty: atomic.clone(),
                    receiver_name: Some("seq".into()),
                    is_virtual: false,
                    order_args: vec![],
                    args: vec![],
                },
                Stmt::MemberCall {
                    loc: SourceLoc::default(),
                    method: "load".into(),
                    class_qualified: "std::atomic".into(),
                    receiver_ty: atomic.clone(),
                    receiver_name: Some("seq".into()),
                    is_virtual: false,
                    order_args: vec!["memory_order_acquire".into()],
                    args: vec![],
                },
                Stmt::OperatorCall {
                    loc: SourceLoc::default(),
                    op: "++".into(),
                    receiver_ty: atomic,
                    receiver_name: Some("hits".into()),
                    args: vec![],
                },
            ],
        }];

        let sites = collect_atomic_sites(&body);
        assert_eq!(sites.len(), 3);

        let store = &sites[0];
        assert_eq!(store.op_class, AtomicOpClass::Store);
        assert!(store.is_seq_cst && store.is_write && store.in_loop);

        let load = &sites[1];
        assert_eq!(load.op_class, AtomicOpClass::Load);
        assert!(!load.is_seq_cst && !load.is_write);

        let inc = &sites[2];
        assert_eq!(inc.op_class, AtomicOpClass::Rmw);
        assert!(inc.is_seq_cst && inc.is_write && inc.from_operator);
    }

    #[test]
    fn non_atomic_receivers_are_ignored() {
        let body = vec![Stmt::MemberCall {
            loc: SourceLoc::default(),
            method: "store".into(),
            class_qualified: "cache::Store".into(),
            receiver_ty: TypeRef::sized("cache::Store", 64),
            receiver_name: Some("db".into()),
            is_virtual: false,
            order_args: vec![],
            args: vec![],
        }];
        assert!(collect_atomic_sites(&body).is_empty());
    }
}
