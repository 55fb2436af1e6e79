//! Hazard classification tags, one per rule, used by the hypothesis
//! pipeline to select templates, counter sets, and interaction models.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HazardClass {
    /// FL001: struct footprint spans multiple cache lines.
    CacheGeometry,
    /// FL002: independently written fields co-located on one line.
    FalseSharing,
    /// FL010: seq_cst where release/acq_rel would do.
    AtomicOrdering,
    /// FL011: repeated atomic writes from one hot function.
    AtomicContention,
    /// FL012: mutex acquisition on the hot path.
    LockContention,
    /// FL020: allocator traffic on the hot path.
    HeapAllocation,
    /// FL021: oversized stack frames.
    StackPressure,
    /// FL030: vtable dispatch on the hot path.
    VirtualDispatch,
    /// FL031: type-erased callable dispatch on the hot path.
    StdFunction,
    /// FL040: centralized mutable global state.
    GlobalState,
    /// FL041: head/tail atomics sharing a line.
    ContendedQueue,
    /// FL050: deep conditional trees and wide switches.
    DeepConditional,
    /// FL060: large shared structures without NUMA placement.
    NUMALocality,
    /// FL061: single-point dispatcher fan-out.
    CentralizedDispatch,
    /// FL090: compound hazards on one structure.
    HazardAmplification,
}

impl HazardClass {
    pub fn name(self) -> &'static str {
        match self {
            HazardClass::CacheGeometry => "CacheGeometry",
            HazardClass::FalseSharing => "FalseSharing",
            HazardClass::AtomicOrdering => "AtomicOrdering",
            HazardClass::AtomicContention => "AtomicContention",
            HazardClass::LockContention => "LockContention",
            HazardClass::HeapAllocation => "HeapAllocation",
            HazardClass::StackPressure => "StackPressure",
            HazardClass::VirtualDispatch => "VirtualDispatch",
            HazardClass::StdFunction => "StdFunction",
            HazardClass::GlobalState => "GlobalState",
            HazardClass::ContendedQueue => "ContendedQueue",
            HazardClass::DeepConditional => "DeepConditional",
            HazardClass::NUMALocality => "NUMALocality",
            HazardClass::CentralizedDispatch => "CentralizedDispatch",
            HazardClass::HazardAmplification => "HazardAmplification",
        }
    }

    /// Map a rule ID to its hazard class. Unknown IDs fall back to
    /// `CacheGeometry`, mirroring the permissive behavior of the rule
    /// engine (an unknown ID never aborts the pipeline).
    pub fn from_rule_id(rule_id: &str) -> HazardClass {
        match rule_id {
            "FL001" => HazardClass::CacheGeometry,
            "FL002" => HazardClass::FalseSharing,
            "FL010" => HazardClass::AtomicOrdering,
            "FL011" => HazardClass::AtomicContention,
            "FL012" => HazardClass::LockContention,
            "FL020" => HazardClass::HeapAllocation,
            "FL021" => HazardClass::StackPressure,
            "FL030" => HazardClass::VirtualDispatch,
            "FL031" => HazardClass::StdFunction,
            "FL040" => HazardClass::GlobalState,
            "FL041" => HazardClass::ContendedQueue,
            "FL050" => HazardClass::DeepConditional,
            "FL060" => HazardClass::NUMALocality,
            "FL061" => HazardClass::CentralizedDispatch,
            "FL090" => HazardClass::HazardAmplification,
            _ => HazardClass::CacheGeometry,
        }
    }

    pub const ALL: [HazardClass; 15] = [
        HazardClass::CacheGeometry,
        HazardClass::FalseSharing,
        HazardClass::AtomicOrdering,
        HazardClass::AtomicContention,
        HazardClass::LockContention,
        HazardClass::HeapAllocation,
        HazardClass::StackPressure,
        HazardClass::VirtualDispatch,
        HazardClass::StdFunction,
        HazardClass::GlobalState,
        HazardClass::ContendedQueue,
        HazardClass::DeepConditional,
        HazardClass::NUMALocality,
        HazardClass::CentralizedDispatch,
        HazardClass::HazardAmplification,
    ];
}

impl fmt::Display for HazardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rule_id_maps_to_a_distinct_class() {
        let ids = [
            "FL001", "FL002", "FL010", "FL011", "FL012", "FL020", "FL021", "FL030", "FL031",
            "FL040", "FL041", "FL050", "FL060", "FL061", "FL090",
        ];
        let classes: Vec<_> = ids.iter().map(|id| HazardClass::from_rule_id(id)).collect();
        for (i, a) in classes.iter().enumerate() {
            for b in &classes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(classes.len(), HazardClass::ALL.len());
    }

    #[test]
    fn unknown_rule_id_falls_back() {
        assert_eq!(HazardClass::from_rule_id("FL999"), HazardClass::CacheGeometry);
    }
}
