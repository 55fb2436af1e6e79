//! Per-hazard hypothesis templates.
//!
//! Each template fixes the H0/H1 prose (with `{mde}`, `{percentile}`,
//! `{cache_lines}`, `{threshold}`, `{target_count}` placeholders filled by
//! the measurement planner), the primary metric, the PMU counter sets
//! with per-counter justification, the default minimum detectable effect,
//! the eight standard confound controls, and whether the hazard composes
//! in interaction templates.

use super::{ConfoundControl, CounterTier, MetricSpec, PmuCounter, PmuCounterSet};
use crate::hazard::HazardClass;

#[derive(Debug, Clone)]
pub struct HypothesisTemplate {
    pub hazard_class: HazardClass,
    pub h0_template: String,
    pub h1_template: String,
    pub primary_metric: MetricSpec,
    pub counter_set: PmuCounterSet,
    pub default_mde: f64,
    pub confound_requirements: Vec<ConfoundControl>,
    pub interaction_eligible: bool,
}

pub struct HypothesisTemplateRegistry {
    templates: Vec<HypothesisTemplate>,
}

impl HypothesisTemplateRegistry {
    pub fn new() -> Self {
        HypothesisTemplateRegistry {
            templates: build_templates(),
        }
    }

    pub fn lookup(&self, hazard_class: HazardClass) -> Option<&HypothesisTemplate> {
        self.templates
            .iter()
            .find(|t| t.hazard_class == hazard_class)
    }

    pub fn templates(&self) -> &[HypothesisTemplate] {
        &self.templates
    }
}

impl Default for HypothesisTemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The standard confound set every experiment pins down.
pub fn standard_confounds() -> Vec<ConfoundControl> {
    let pairs = [
        (
            "cpu_frequency",
            "cpupower frequency-set --governor performance",
        ),
        (
            "turbo_boost",
            "echo 1 > /sys/devices/system/cpu/intel_pstate/no_turbo",
        ),
        ("c_states", "disable states > C0 via cpuidle sysfs"),
        ("cpu_pinning", "taskset / pthread_setaffinity_np"),
        (
            "transparent_hugepages",
            "echo never > /sys/kernel/mm/transparent_hugepage/enabled",
        ),
        ("aslr", "echo 0 > /proc/sys/kernel/randomize_va_space"),
        ("compiler_flags", "-O2 -march=native -fno-lto"),
        (
            "interrupt_isolation",
            "isolcpus + irqbalance disabled on test cores",
        ),
    ];
    pairs
        .iter()
        .map(|(variable, method)| ConfoundControl {
            variable: variable.to_string(),
            method: method.to_string(),
        })
        .collect()
}

fn cache_geometry_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "L1-dcache-load-misses",
                CounterTier::Standard,
                "Direct measure of L1D pressure from footprint",
            ),
            PmuCounter::new(
                "L1-dcache-store-misses",
                CounterTier::Standard,
                "Write-side pressure",
            ),
            PmuCounter::new(
                "LLC-load-misses",
                CounterTier::Standard,
                "Eviction cascading to LLC",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Baseline for IPC"),
            PmuCounter::new("instructions", CounterTier::Universal, "Baseline for IPC"),
        ],
        optional: vec![
            PmuCounter::new(
                "MEM_LOAD_RETIRED.L1_MISS",
                CounterTier::Extended,
                "Precise L1 miss attribution",
            ),
            PmuCounter::new(
                "MEM_LOAD_RETIRED.L2_MISS",
                CounterTier::Extended,
                "L2 cascade confirmation",
            ),
        ],
    }
}

fn false_sharing_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "L1-dcache-load-misses",
                CounterTier::Standard,
                "Invalidation forces reload",
            ),
            PmuCounter::new("L1-dcache-store-misses", CounterTier::Standard, "RFO stall"),
            PmuCounter::new(
                "LLC-store-misses",
                CounterTier::Standard,
                "Ownership transfer reaching LLC",
            ),
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Pipeline stall from coherence wait",
            ),
        ],
        optional: vec![
            PmuCounter::new(
                "offcore_response.demand_rfo.l3_miss.snoop_hitm",
                CounterTier::Extended,
                "Direct HITM measurement",
            ),
            PmuCounter::new(
                "MEM_LOAD_L3_HIT_RETIRED.XSNP_HITM",
                CounterTier::Extended,
                "Cross-core snoop hit modified (ICL+)",
            ),
        ],
    }
}

fn atomic_ordering_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Store buffer drain stall",
            ),
            PmuCounter::new(
                "stalled-cycles-frontend",
                CounterTier::Standard,
                "Serialization-induced frontend stall",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cycle cost"),
            PmuCounter::new("instructions", CounterTier::Universal, "IPC computation"),
        ],
        optional: vec![PmuCounter::new(
            "MACHINE_CLEARS.MEMORY_ORDERING",
            CounterTier::Extended,
            "Memory ordering machine clears",
        )],
    }
}

fn atomic_contention_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Ownership transfer stall",
            ),
            PmuCounter::new("LLC-store-misses", CounterTier::Standard, "RFO reaching LLC"),
            PmuCounter::new(
                "L1-dcache-store-misses",
                CounterTier::Standard,
                "Invalidation-induced store miss",
            ),
        ],
        optional: vec![
            PmuCounter::new(
                "offcore_response.demand_rfo.l3_miss.snoop_hitm",
                CounterTier::Extended,
                "Direct cross-core contention",
            ),
            PmuCounter::new(
                "offcore_response.demand_rfo.l3_hit.snoop_hitm",
                CounterTier::Extended,
                "Intra-socket contention",
            ),
        ],
    }
}

fn lock_contention_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "context-switches",
                CounterTier::Universal,
                "Direct serialization measure",
            ),
            PmuCounter::new(
                "cpu-migrations",
                CounterTier::Universal,
                "Scheduler-induced cache invalidation",
            ),
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Lock spin + syscall overhead",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cost"),
        ],
        optional: vec![PmuCounter::new(
            "page-faults",
            CounterTier::Universal,
            "Post-context-switch TLB refill",
        )],
    }
}

fn heap_allocation_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "dTLB-load-misses",
                CounterTier::Standard,
                "New page TLB pressure",
            ),
            PmuCounter::new(
                "dTLB-store-misses",
                CounterTier::Standard,
                "Write-side TLB pressure",
            ),
            PmuCounter::new("page-faults", CounterTier::Universal, "New page mapping"),
            PmuCounter::new(
                "cache-misses",
                CounterTier::Universal,
                "Cold cache on new allocation",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cost"),
        ],
        optional: vec![],
    }
}

fn stack_pressure_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "dTLB-load-misses",
                CounterTier::Standard,
                "Stack page TLB pressure",
            ),
            PmuCounter::new(
                "L1-dcache-load-misses",
                CounterTier::Standard,
                "Stack data L1D pressure",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cost"),
        ],
        optional: vec![],
    }
}

fn indirect_dispatch_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "branch-misses",
                CounterTier::Universal,
                "Direct misprediction count",
            ),
            PmuCounter::new(
                "branches",
                CounterTier::Universal,
                "Total branch count for miss rate",
            ),
            PmuCounter::new(
                "L1-icache-load-misses",
                CounterTier::Standard,
                "I-cache pressure from multiple targets",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cost"),
        ],
        optional: vec![
            PmuCounter::new(
                "BR_MISP_RETIRED.INDIRECT",
                CounterTier::Extended,
                "Indirect branch misprediction specifically",
            ),
            PmuCounter::new(
                "BR_MISP_RETIRED.INDIRECT_CALL",
                CounterTier::Extended,
                "Indirect call misprediction",
            ),
            PmuCounter::new(
                "BACLEARS.ANY",
                CounterTier::Extended,
                "Frontend resteers from misprediction",
            ),
        ],
    }
}

fn numa_locality_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "LLC-load-misses",
                CounterTier::Standard,
                "Misses reaching memory subsystem",
            ),
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Memory stall",
            ),
        ],
        optional: vec![
            PmuCounter::new(
                "offcore_response.demand_data_rd.l3_miss.remote_dram",
                CounterTier::Extended,
                "Direct remote DRAM access",
            ),
            PmuCounter::new(
                "offcore_response.demand_data_rd.l3_miss.local_dram",
                CounterTier::Extended,
                "Local DRAM baseline",
            ),
            PmuCounter::new("node-load-misses", CounterTier::Standard, "NUMA node miss"),
            PmuCounter::new(
                "node-store-misses",
                CounterTier::Standard,
                "NUMA node store miss",
            ),
        ],
    }
}

fn global_state_counters() -> PmuCounterSet {
    PmuCounterSet {
        required: vec![
            PmuCounter::new(
                "LLC-store-misses",
                CounterTier::Standard,
                "Cross-core writes to the shared object",
            ),
            PmuCounter::new(
                "stalled-cycles-backend",
                CounterTier::Standard,
                "Coherence wait on the shared line",
            ),
            PmuCounter::new("cycles", CounterTier::Universal, "Total cost"),
            PmuCounter::new("instructions", CounterTier::Universal, "IPC computation"),
        ],
        optional: vec![PmuCounter::new(
            "node-store-misses",
            CounterTier::Standard,
            "Remote-socket write traffic",
        )],
    }
}

fn template(
    hazard_class: HazardClass,
    h0: &str,
    h1: &str,
    metric: MetricSpec,
    counters: PmuCounterSet,
    interaction_eligible: bool,
    confounds: &[ConfoundControl],
) -> HypothesisTemplate {
    HypothesisTemplate {
        hazard_class,
        h0_template: h0.to_string(),
        h1_template: h1.to_string(),
        primary_metric: metric,
        counter_set: counters,
        default_mde: 0.05,
        confound_requirements: confounds.to_vec(),
        interaction_eligible,
    }
}

fn build_templates() -> Vec<HypothesisTemplate> {
    let confounds = standard_confounds();
    let p99 = || MetricSpec::new("p99_operation_latency_ns", "nanoseconds", "p99");
    let p99_9 = || MetricSpec::new("p99.9_operation_latency_ns", "nanoseconds", "p99.9");
    let p99_99 = || MetricSpec::new("p99.99_operation_latency_ns", "nanoseconds", "p99.99");

    vec![
        template(
            HazardClass::CacheGeometry,
            "Struct layout does not cause measurable increase in L1D/L2 miss rate or \
             coherence traffic under concurrent access.",
            "Struct spanning {cache_lines} cache lines causes >= {mde}% increase in \
             L1-dcache-load-misses and >= {mde}% increase in {percentile} operation latency \
             compared to cache-line-aligned control.",
            p99_9(),
            cache_geometry_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::FalseSharing,
            "Adjacent mutable fields on the same cache line do not cause measurable \
             coherence traffic under multi-writer access.",
            "Unpadded adjacent fields cause >= {mde}% increase in HITM events and >= {mde}% \
             increase in {percentile} latency compared to 64B-padded control.",
            p99_9(),
            false_sharing_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::AtomicOrdering,
            "memory_order_seq_cst does not cause measurable pipeline serialization cost \
             compared to acquire/release on x86-64 TSO.",
            "seq_cst operations in hot loop cause >= {mde}% increase in \
             stalled-cycles-backend and >= {mde}% increase in {percentile} latency compared \
             to acquire/release variant.",
            p99(),
            atomic_ordering_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::AtomicContention,
            "Concurrent atomic writes to a shared variable do not cause measurable \
             cross-core ownership transfer cost.",
            "N-thread concurrent atomic writes cause >= {mde}% increase in HITM events and \
             >= {mde}% increase in {percentile} latency compared to per-core sharded \
             control.",
            p99_9(),
            atomic_contention_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::LockContention,
            "Mutex acquisition in the hot path does not cause measurable serialization or \
             context-switch cost under concurrent load.",
            "Contended mutex causes >= {mde}% increase in context-switches and >= {mde}% \
             increase in {percentile} latency compared to lock-free control.",
            p99_99(),
            lock_contention_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::HeapAllocation,
            "Heap allocation in the hot path does not cause measurable allocator contention \
             or TLB pressure.",
            "Per-iteration allocation causes >= {mde}% increase in dTLB-load-misses and >= \
             {mde}% increase in {percentile} latency compared to preallocated control.",
            p99_9(),
            heap_allocation_counters(),
            false,
            &confounds,
        ),
        template(
            HazardClass::StackPressure,
            "A large stack frame does not cause measurable TLB or L1D pressure in the hot \
             path.",
            "Stack frame > {threshold}B causes >= {mde}% increase in dTLB-load-misses and \
             >= {mde}% increase in {percentile} latency compared to reduced-frame control.",
            p99(),
            stack_pressure_counters(),
            false,
            &confounds,
        ),
        template(
            HazardClass::VirtualDispatch,
            "Virtual/indirect call in the hot path does not cause measurable branch \
             misprediction cost.",
            "Polymorphic dispatch with {target_count} targets causes >= {mde}% increase in \
             branch-misses and >= {mde}% increase in {percentile} latency compared to \
             direct/CRTP control.",
            p99(),
            indirect_dispatch_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::StdFunction,
            "std::function invocation in the hot path does not cause measurable indirect \
             dispatch or allocation cost.",
            "std::function usage causes >= {mde}% increase in branch-misses and >= {mde}% \
             increase in {percentile} latency compared to template callable control.",
            p99(),
            indirect_dispatch_counters(),
            false,
            &confounds,
        ),
        template(
            HazardClass::GlobalState,
            "Centralized mutable global state does not cause measurable cross-core write \
             contention under concurrent access.",
            "Shared global writes cause >= {mde}% increase in LLC-store-misses and >= \
             {mde}% increase in {percentile} latency compared to per-thread sharded \
             control.",
            p99_9(),
            global_state_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::ContendedQueue,
            "Adjacent atomic indices on the same cache line do not cause measurable \
             coherence traffic under producer-consumer access.",
            "Unpadded head/tail atomics cause >= {mde}% increase in HITM events and >= \
             {mde}% increase in {percentile} latency compared to 64B-padded control.",
            p99_9(),
            false_sharing_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::DeepConditional,
            "Deep conditional nesting does not cause measurable branch misprediction cost \
             in the hot path.",
            "Conditional tree of depth >= {threshold} causes >= {mde}% increase in \
             branch-misses and >= {mde}% increase in {percentile} latency compared to \
             table-driven control.",
            p99(),
            indirect_dispatch_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::NUMALocality,
            "A shared mutable structure does not incur measurable remote memory access \
             penalty.",
            "Cross-socket access to the shared structure causes >= {mde}% increase in \
             remote DRAM accesses and >= {mde}% increase in {percentile} latency compared \
             to socket-local control.",
            p99_9(),
            numa_locality_counters(),
            true,
            &confounds,
        ),
        template(
            HazardClass::CentralizedDispatch,
            "A centralized dispatcher does not cause measurable I-cache or branch predictor \
             pressure compared to partitioned dispatch.",
            "Single-point dispatch over {target_count} handlers causes >= {mde}% increase \
             in branch-misses and >= {mde}% increase in {percentile} latency compared to \
             partitioned control.",
            p99_9(),
            indirect_dispatch_counters(),
            false,
            &confounds,
        ),
        template(
            HazardClass::HazardAmplification,
            "Co-occurrence of multiple structural hazards does not produce a super-additive \
             tail latency effect.",
            "Combined hazard produces tail latency increase > sum of individual hazard \
             effects.",
            p99_99(),
            cache_geometry_counters()
                .merged(&atomic_contention_counters())
                .merged(&numa_locality_counters()),
            false,
            &confounds,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hazard_class_has_a_template() {
        let registry = HypothesisTemplateRegistry::new();
        for hazard in HazardClass::ALL {
            let t = registry
                .lookup(hazard)
                .unwrap_or_else(|| panic!("no template for {hazard}"));
            assert!(!t.h0_template.is_empty());
            assert!(!t.h1_template.is_empty());
            assert!(!t.counter_set.required.is_empty());
            assert_eq!(t.confound_requirements.len(), 8);
            assert!((t.default_mde - 0.05).abs() < 1e-9);
        }
    }

    #[test]
    fn confound_set_covers_the_standard_eight() {
        let confounds = standard_confounds();
        let vars: Vec<_> = confounds.iter().map(|c| c.variable.as_str()).collect();
        for expected in [
            "cpu_frequency",
            "turbo_boost",
            "c_states",
            "cpu_pinning",
            "transparent_hugepages",
            "aslr",
            "compiler_flags",
            "interrupt_isolation",
        ] {
            assert!(vars.contains(&expected), "missing confound {expected}");
        }
    }

    #[test]
    fn amplification_counters_are_the_component_union() {
        let registry = HypothesisTemplateRegistry::new();
        let t = registry.lookup(HazardClass::HazardAmplification).unwrap();
        let expected = cache_geometry_counters()
            .merged(&atomic_contention_counters())
            .merged(&numa_locality_counters());
        assert_eq!(
            t.counter_set.all().count(),
            expected.all().count()
        );
    }

    #[test]
    fn every_counter_carries_a_justification() {
        let registry = HypothesisTemplateRegistry::new();
        for t in registry.templates() {
            for counter in t.counter_set.all() {
                assert!(
                    !counter.justification.is_empty(),
                    "counter {} in {} lacks justification",
                    counter.name,
                    t.hazard_class
                );
            }
        }
    }
}
