//! Structural summaries of lowered IR.
//!
//! The analyzer walks every defined function and condenses it into an
//! [`IrFunctionProfile`]: stack frame bytes, atomic events with orderings
//! and debug locations, heap allocator call sites, call counts, and a
//! conservative per-block in-loop flag. Loop membership uses a back-edge
//! heuristic (a block is in a loop when it self-loops or one of its
//! successors is also a predecessor), which is cheap and sufficient for
//! in-loop annotation without a full loop analysis.

use crate::ir::{IrBlock, IrFunction, IrInst, IrModule, ORDERING_SEQ_CST};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct IrAllocaInfo {
    pub name: String,
    pub size_bytes: u64,
    pub is_array: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IrCallSiteInfo {
    /// Empty for indirect calls.
    pub callee_name: String,
    pub is_indirect: bool,
    pub is_in_loop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Load,
    Store,
    Rmw,
    CmpXchg,
    Fence,
}

#[derive(Debug, Clone)]
pub struct IrAtomicInfo {
    pub op: AtomicOp,
    pub ordering: u8,
    pub is_in_loop: bool,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
}

impl IrAtomicInfo {
    pub fn is_seq_cst(&self) -> bool {
        self.ordering == ORDERING_SEQ_CST
    }

    pub fn is_write(&self) -> bool {
        matches!(self.op, AtomicOp::Store | AtomicOp::Rmw | AtomicOp::CmpXchg)
    }
}

/// Per-function structural summary of lowered IR.
#[derive(Debug, Clone, Default)]
pub struct IrFunctionProfile {
    pub mangled_name: String,
    pub demangled_name: String,
    pub total_alloca_bytes: u64,
    pub allocas: Vec<IrAllocaInfo>,
    /// Heap alloc/free call sites surviving optimization, plus one
    /// synthetic anonymous entry per indirect call site.
    pub heap_alloc_calls: Vec<IrCallSiteInfo>,
    pub indirect_call_count: u32,
    pub direct_call_count: u32,
    pub atomics: Vec<IrAtomicInfo>,
    pub fence_count: u32,
    pub seq_cst_count: u32,
    pub basic_block_count: u32,
    pub loop_count: u32,
}

const HEAP_ALLOC_NAMES: &[&str] = &[
    "malloc",
    "calloc",
    "realloc",
    "aligned_alloc",
    "posix_memalign",
];

fn is_heap_alloc_function(name: &str) -> bool {
    // _Znwm / _Znam cover the mangled operator new and new[] families,
    // including aligned variants.
    HEAP_ALLOC_NAMES.contains(&name) || name.starts_with("_Znwm") || name.starts_with("_Znam")
}

fn is_heap_free_function(name: &str) -> bool {
    name == "free" || name.starts_with("_ZdlPv") || name.starts_with("_ZdaPv")
}

/// Map from mangled name to profile, with the lookup ladder the refiner
/// needs: exact demangled match, qualified suffix match at a `::`
/// boundary, then exact mangled match.
#[derive(Debug, Default)]
pub struct ProfileMap {
    profiles: HashMap<String, IrFunctionProfile>,
}

impl ProfileMap {
    pub fn insert(&mut self, profile: IrFunctionProfile) {
        self.profiles.insert(profile.mangled_name.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IrFunctionProfile> {
        self.profiles.values()
    }

    pub fn by_mangled(&self, mangled: &str) -> Option<&IrFunctionProfile> {
        self.profiles.get(mangled)
    }

    /// Resolve a qualified source-level name to a profile.
    pub fn lookup(&self, function_name: &str) -> Option<&IrFunctionProfile> {
        if function_name.is_empty() {
            return None;
        }

        // Exact demangled match first. Demangled names carry parameter
        // lists, so also accept a match on the name up to the paren.
        for profile in self.profiles.values() {
            let demangled = profile.demangled_name.as_str();
            let base = demangled.split('(').next().unwrap_or(demangled);
            if demangled == function_name || base == function_name {
                return Some(profile);
            }
        }

        // Qualified suffix at a namespace boundary: `publish` matches
        // `md::publish` but never `republish`.
        for profile in self.profiles.values() {
            let demangled = profile.demangled_name.as_str();
            let base = demangled.split('(').next().unwrap_or(demangled);
            if let Some(prefix) = base.strip_suffix(function_name) {
                if prefix.ends_with("::") {
                    return Some(profile);
                }
            }
        }

        self.profiles.get(function_name)
    }
}

/// Walks IR modules and accumulates profiles.
#[derive(Debug, Default)]
pub struct IrAnalyzer {
    profiles: ProfileMap,
}

impl IrAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze_module(&mut self, module: &IrModule) {
        for function in &module.functions {
            self.analyze_function(function);
        }
    }

    pub fn into_profiles(self) -> ProfileMap {
        self.profiles
    }

    pub fn profiles(&self) -> &ProfileMap {
        &self.profiles
    }

    fn analyze_function(&mut self, function: &IrFunction) {
        let mut profile = IrFunctionProfile {
            mangled_name: function.mangled_name.clone(),
            demangled_name: function.demangled_name.clone(),
            basic_block_count: function.blocks.len() as u32,
            ..Default::default()
        };

        let loop_blocks: Vec<bool> = function.blocks.iter().map(block_is_in_loop).collect();
        profile.loop_count = loop_blocks.iter().filter(|&&b| b).count() as u32;

        for (block, &in_loop) in function.blocks.iter().zip(&loop_blocks) {
            for inst in &block.instructions {
                match inst {
                    IrInst::Alloca {
                        name,
                        element_size,
                        array_count,
                        is_array,
                    } => {
                        // Unknown-count arrays contribute one element.
                        let size = element_size * array_count.unwrap_or(1);
                        profile.total_alloca_bytes += size;
                        profile.allocas.push(IrAllocaInfo {
                            name: if name.is_empty() {
                                "<anon>".to_string()
                            } else {
                                name.clone()
                            },
                            size_bytes: size,
                            is_array: *is_array,
                        });
                    }
                    IrInst::AtomicLoad {
                        ordering,
                        file,
                        line,
                    } => profile.record_atomic(AtomicOp::Load, *ordering, in_loop, file, line),
                    IrInst::AtomicStore {
                        ordering,
                        file,
                        line,
                    } => profile.record_atomic(AtomicOp::Store, *ordering, in_loop, file, line),
                    IrInst::AtomicRmw {
                        ordering,
                        file,
                        line,
                    } => profile.record_atomic(AtomicOp::Rmw, *ordering, in_loop, file, line),
                    IrInst::AtomicCmpXchg {
                        ordering,
                        file,
                        line,
                    } => profile.record_atomic(AtomicOp::CmpXchg, *ordering, in_loop, file, line),
                    IrInst::Fence {
                        ordering,
                        file,
                        line,
                    } => {
                        profile.record_atomic(AtomicOp::Fence, *ordering, in_loop, file, line);
                        profile.fence_count += 1;
                    }
                    IrInst::Call {
                        callee,
                        is_intrinsic,
                    }
                    | IrInst::Invoke {
                        callee,
                        is_intrinsic,
                    } => {
                        if *is_intrinsic {
                            continue;
                        }
                        match callee {
                            None => {
                                profile.indirect_call_count += 1;
                                profile.heap_alloc_calls.push(IrCallSiteInfo {
                                    callee_name: String::new(),
                                    is_indirect: true,
                                    is_in_loop: in_loop,
                                });
                            }
                            Some(name) => {
                                profile.direct_call_count += 1;
                                if is_heap_alloc_function(name) || is_heap_free_function(name) {
                                    profile.heap_alloc_calls.push(IrCallSiteInfo {
                                        callee_name: name.clone(),
                                        is_indirect: false,
                                        is_in_loop: in_loop,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        self.profiles.insert(profile);
    }
}

/// Back-edge heuristic: self-loop, or some successor that is also a
/// predecessor.
fn block_is_in_loop(block: &IrBlock) -> bool {
    block
        .successors
        .iter()
        .any(|s| *s == block.id || block.predecessors.contains(s))
}

impl IrFunctionProfile {
    fn record_atomic(
        &mut self,
        op: AtomicOp,
        ordering: u8,
        in_loop: bool,
        file: &Option<String>,
        line: &Option<u32>,
    ) {
        if ordering == ORDERING_SEQ_CST {
            self.seq_cst_count += 1;
        }
        self.atomics.push(IrAtomicInfo {
            op,
            ordering,
            is_in_loop: in_loop,
            source_file: file.clone(),
            source_line: *line,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_function() -> IrFunction {
        IrFunction {
            mangled_name: "_ZN2md7publishEv".into(),
            demangled_name: "md::publish()".into(),
            blocks: vec![
                IrBlock {
                    id: 0,
                    successors: vec![1],
                    predecessors: vec![],
                    instructions: vec![IrInst::Alloca {
                        name: "buf".into(),
                        element_size: 1,
                        array_count: Some(4096),
                        is_array: true,
                    }],
                },
                IrBlock {
                    id: 1,
                    successors: vec![1, 2],
                    predecessors: vec![0, 1],
                    instructions: vec![
                        IrInst::AtomicStore {
                            ordering: ORDERING_SEQ_CST,
                            file: Some("hot.cpp".into()),
                            line: Some(14),
                        },
                        IrInst::Call {
                            callee: Some("malloc".into()),
                            is_intrinsic: false,
                        },
                        IrInst::Call {
                            callee: None,
                            is_intrinsic: false,
                        },
                    ],
                },
                IrBlock {
                    id: 2,
                    successors: vec![],
                    predecessors: vec![1],
                    instructions: vec![IrInst::Call {
                        callee: Some("llvm.dbg.value".into()),
                        is_intrinsic: true,
                    }],
                },
            ],
        }
    }

    fn analyzed() -> ProfileMap {
        let mut analyzer = IrAnalyzer::new();
        analyzer.analyze_module(&IrModule {
            source_file: "hot.cpp".into(),
            functions: vec![loop_function()],
        });
        analyzer.into_profiles()
    }

    #[test]
    fn back_edge_blocks_are_in_loop() {
        let profiles = analyzed();
        let p = profiles.by_mangled("_ZN2md7publishEv").unwrap();
        assert_eq!(p.loop_count, 1);
        assert!(p.atomics[0].is_in_loop);
    }

    #[test]
    fn alloca_bytes_multiply_constant_array_counts() {
        let profiles = analyzed();
        let p = profiles.by_mangled("_ZN2md7publishEv").unwrap();
        assert_eq!(p.total_alloca_bytes, 4096);
        assert!(p.allocas[0].is_array);
    }

    #[test]
    fn call_accounting_separates_direct_indirect_and_intrinsics() {
        let profiles = analyzed();
        let p = profiles.by_mangled("_ZN2md7publishEv").unwrap();
        assert_eq!(p.direct_call_count, 1);
        assert_eq!(p.indirect_call_count, 1);
        // malloc call site plus one synthetic indirect entry.
        assert_eq!(p.heap_alloc_calls.len(), 2);
        assert!(p.heap_alloc_calls.iter().any(|c| c.callee_name == "malloc"));
        assert!(p.heap_alloc_calls.iter().any(|c| c.is_indirect));
    }

    #[test]
    fn seq_cst_and_debug_locations_are_recorded() {
        let profiles = analyzed();
        let p = profiles.by_mangled("_ZN2md7publishEv").unwrap();
        assert_eq!(p.seq_cst_count, 1);
        assert_eq!(p.atomics[0].source_line, Some(14));
        assert!(p.atomics[0].is_seq_cst());
        assert!(p.atomics[0].is_write());
    }

    #[test]
    fn lookup_prefers_exact_then_suffix_at_namespace_boundary() {
        let profiles = analyzed();
        assert!(profiles.lookup("md::publish").is_some());
        assert!(profiles.lookup("publish").is_some());
        assert!(profiles.lookup("republish").is_none());
        assert!(profiles.lookup("_ZN2md7publishEv").is_some());
        assert!(profiles.lookup("").is_none());
    }

    #[test]
    fn mangled_operator_new_counts_as_heap_call() {
        assert!(is_heap_alloc_function("_Znwm"));
        assert!(is_heap_alloc_function("_ZnwmSt11align_val_t"));
        assert!(is_heap_free_function("_ZdlPv"));
        assert!(!is_heap_alloc_function("mallocish"));
    }
}
