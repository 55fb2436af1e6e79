//! Lowered IR document model.
//!
//! A compiler-side exporter serializes each optimized module into this
//! shape: functions, basic blocks with explicit successor and predecessor
//! edges, and the instruction subset the analyzer cares about (stack
//! allocations, atomic operations with their memory orderings, fences,
//! and call sites). Debug locations ride along when the module was built
//! with debug info.

use serde::{Deserialize, Serialize};

/// Memory ordering ordinals as the exporter emits them, matching the
/// lowered IR's atomic ordering enumeration. Only sequential consistency
/// is interpreted by name; everything else is carried opaquely.
pub const ORDERING_SEQ_CST: u8 = 7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IrModule {
    pub source_file: String,
    pub functions: Vec<IrFunction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IrFunction {
    pub mangled_name: String,
    pub demangled_name: String,
    /// Declarations without bodies are not exported; every function here
    /// is defined.
    pub blocks: Vec<IrBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IrBlock {
    pub id: u32,
    pub successors: Vec<u32>,
    pub predecessors: Vec<u32>,
    pub instructions: Vec<IrInst>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrInst {
    Alloca {
        #[serde(default)]
        name: String,
        element_size: u64,
        /// Constant element count for array allocations; `None` when the
        /// count is not a compile-time constant.
        #[serde(default)]
        array_count: Option<u64>,
        #[serde(default)]
        is_array: bool,
    },
    AtomicLoad {
        ordering: u8,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<u32>,
    },
    AtomicStore {
        ordering: u8,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<u32>,
    },
    AtomicRmw {
        ordering: u8,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<u32>,
    },
    AtomicCmpXchg {
        /// Success ordering.
        ordering: u8,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<u32>,
    },
    Fence {
        ordering: u8,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<u32>,
    },
    Call {
        /// `None` for indirect calls.
        #[serde(default)]
        callee: Option<String>,
        #[serde(default)]
        is_intrinsic: bool,
    },
    /// Exception-aware call; treated like `Call` by the analyzer.
    Invoke {
        #[serde(default)]
        callee: Option<String>,
        #[serde(default)]
        is_intrinsic: bool,
    },
}
