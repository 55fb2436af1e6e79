//! FL020: allocator traffic on the hot path.

use super::{Decl, Rule};
use crate::ast::{walk, Stmt, TranslationUnit, WalkContext};
use crate::config::AnalyzerConfig;
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::hotpath::HotPathOracle;
use crate::severity::{EvidenceTier, Severity};

pub struct HeapAllocHotPath;

const ALLOC_FUNCTIONS: &[&str] = &[
    "malloc",
    "calloc",
    "realloc",
    "free",
    "aligned_alloc",
    "posix_memalign",
];

/// Containers and wrappers whose construction allocates (or may,
/// depending on SBO/SSO thresholds).
const ALLOCATING_TEMPLATES: &[&str] = &[
    "std::function",
    "std::shared_ptr",
    "std::basic_string",
    "std::vector",
    "std::map",
    "std::unordered_map",
    "std::list",
    "std::deque",
];

struct AllocSite {
    loc: SourceLoc,
    kind: String,
    in_loop: bool,
}

fn collect_alloc_sites(body: &[Stmt]) -> Vec<AllocSite> {
    let mut sites = Vec::new();
    walk(body, &mut |stmt: &Stmt, ctx: WalkContext| {
        let in_loop = ctx.loop_depth > 0;
        match stmt {
            Stmt::New { loc, .. } => sites.push(AllocSite {
                loc: loc.clone(),
                kind: "operator new".into(),
                in_loop,
            }),
            Stmt::Delete { loc } => sites.push(AllocSite {
                loc: loc.clone(),
                kind: "operator delete".into(),
                in_loop,
            }),
            Stmt::Call {
                loc,
                callee: Some(callee),
                ..
            } => {
                if ALLOC_FUNCTIONS.contains(&callee.as_str())
                    || callee.contains("make_shared")
                    || callee.contains("make_unique")
                {
                    sites.push(AllocSite {
                        loc: loc.clone(),
                        kind: callee.clone(),
                        in_loop,
                    });
                }
            }
            Stmt::Construct { loc, ty } => {
                if let Some(template) = ty.template.as_deref() {
                    if ALLOCATING_TEMPLATES.contains(&template) {
                        sites.push(AllocSite {
                            loc: loc.clone(),
                            kind: format!("{template} ctor"),
                            in_loop,
                        });
                    }
                }
            }
            _ => {}
        }
    });
    sites
}

impl Rule for HeapAllocHotPath {
    fn id(&self) -> &'static str {
        "FL020"
    }

    fn title(&self) -> &'static str {
        "Heap Allocation in Hot Path"
    }

    fn base_severity(&self) -> Severity {
        Severity::Critical
    }

    fn hardware_mechanism(&self) -> &'static str {
        "Allocator lock contention (glibc malloc arena locks). TLB pressure from \
         new page mappings. Page fault jitter. Heap fragmentation degrades spatial \
         locality."
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

        for site in collect_alloc_sites(body) {
            let mut escalations = Vec::new();
            if site.in_loop {
                escalations.push(
                    "allocation inside loop: per-iteration allocator pressure, compounding \
                     TLB and fragmentation cost"
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
                    "'{}' in hot function '{}'. Each allocation may contend on allocator \
                     arena locks, trigger mmap/brk syscalls, fault new pages into the TLB, \
                     and fragment the heap reducing spatial locality.",
                    site.kind, function.qualified_name
                ),
                structural_evidence: format!(
                    "alloc_type={}; function={}; in_loop={}; hot_path=true",
                    site.kind,
                    function.qualified_name,
                    super::yes_no(site.in_loop)
                ),
                mitigation: "Preallocate buffers. Use arena/slab/pool allocators. Move \
                             allocation to cold initialization path. Reserve vector capacity \
                             upfront."
                    .into(),
                escalations,
            });
        }
    }
}
