//! Measurement plan generation: counter group partitioning plus the
//! deterministic, ordered collection script list.
//!
//! Counters are partitioned into groups no larger than the hardware's
//! programmable counter budget, preserving input order (required first,
//! then optional). The script list is always [setup, perf-stat, optional
//! C2C, optional LBR, PEBS, teardown].

use super::{LatencyHypothesis, PmuCounter, PmuCounterSet};
use crate::hazard::HazardClass;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterGroup {
    pub group_id: u32,
    pub counters: Vec<PmuCounter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionScript {
    /// e.g. `run_perf_stat.sh`.
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementPlan {
    pub hypothesis_id: String,
    pub sku_family: String,
    pub counter_groups: Vec<CounterGroup>,
    pub scripts: Vec<CollectionScript>,
    pub max_counters_per_group: u32,
    pub requires_c2c: bool,
    pub requires_numa: bool,
    pub requires_lbr: bool,
}

pub struct MeasurementPlanGenerator;

const DEFAULT_CORE_LIST: &str = "4,5";

impl MeasurementPlanGenerator {
    pub fn generate(
        hypothesis: &LatencyHypothesis,
        sku_family: &str,
        max_counters_per_group: u32,
    ) -> MeasurementPlan {
        let counter_groups =
            partition_counters(&hypothesis.counter_set, max_counters_per_group.max(1));

        let requires_c2c = needs_c2c(hypothesis.hazard_class);
        let requires_numa = needs_numa(hypothesis.hazard_class);
        let requires_lbr = needs_lbr(hypothesis.hazard_class);

        let mut scripts = vec![
            setup_env_script(),
            perf_stat_script(&counter_groups, DEFAULT_CORE_LIST),
        ];
        if requires_c2c {
            scripts.push(perf_c2c_script());
        }
        if requires_lbr {
            scripts.push(perf_lbr_script(DEFAULT_CORE_LIST));
        }
        scripts.push(perf_pebs_script(DEFAULT_CORE_LIST));
        scripts.push(teardown_env_script());

        MeasurementPlan {
            hypothesis_id: hypothesis.hypothesis_id.clone(),
            sku_family: sku_family.to_string(),
            counter_groups,
            scripts,
            max_counters_per_group,
            requires_c2c,
            requires_numa,
            requires_lbr,
        }
    }
}

/// Cross-core coherence sampling is only meaningful for hazards whose
/// mechanism is line ownership transfer.
fn needs_c2c(hazard: HazardClass) -> bool {
    matches!(
        hazard,
        HazardClass::FalseSharing
            | HazardClass::AtomicContention
            | HazardClass::ContendedQueue
            | HazardClass::HazardAmplification
    )
}

fn needs_numa(hazard: HazardClass) -> bool {
    matches!(
        hazard,
        HazardClass::NUMALocality | HazardClass::HazardAmplification
    )
}

fn needs_lbr(hazard: HazardClass) -> bool {
    matches!(
        hazard,
        HazardClass::VirtualDispatch
            | HazardClass::StdFunction
            | HazardClass::CentralizedDispatch
            | HazardClass::DeepConditional
    )
}

fn partition_counters(counter_set: &PmuCounterSet, max_per_group: u32) -> Vec<CounterGroup> {
    let mut groups: Vec<CounterGroup> = Vec::new();
    let mut current = CounterGroup {
        group_id: 0,
        counters: Vec::new(),
    };

    for counter in counter_set.all() {
        if current.counters.len() >= max_per_group as usize {
            let next_id = groups.len() as u32 + 1;
            groups.push(std::mem::replace(
                &mut current,
                CounterGroup {
                    group_id: next_id,
                    counters: Vec::new(),
                },
            ));
        }
        current.counters.push(counter.clone());
    }
    if !current.counters.is_empty() {
        groups.push(current);
    }
    groups
}

fn setup_env_script() -> CollectionScript {
    let content = r#"#!/bin/bash
set -euo pipefail

echo "[falla] Configuring measurement environment"

# Disable turbo boost
echo 1 > /sys/devices/system/cpu/intel_pstate/no_turbo 2>/dev/null || \
    wrmsr -a 0x1a0 0x4000850089 2>/dev/null || true

# Set governor to performance
cpupower frequency-set -g performance

# Disable C-states beyond C0
for cpu in /sys/devices/system/cpu/cpu*/cpuidle/state[1-9]; do
    echo 1 > "$cpu/disable" 2>/dev/null || true
done

# Disable THP
echo never > /sys/kernel/mm/transparent_hugepage/enabled

# Disable ASLR
echo 0 > /proc/sys/kernel/randomize_va_space

# Record system state
mkdir -p results
uname -r > results/env_state.txt
lscpu >> results/env_state.txt
grep "model name" /proc/cpuinfo | head -1 >> results/env_state.txt
numactl --hardware >> results/env_state.txt 2>/dev/null || true
echo "[falla] Environment configured"
"#;
    CollectionScript {
        name: "setup_env.sh".into(),
        content: content.into(),
    }
}

fn perf_stat_script(groups: &[CounterGroup], core_list: &str) -> CollectionScript {
    let mut content = format!(
        "#!/bin/bash\nset -euo pipefail\n\n\
         VARIANT=${{1:?\"Usage: $0 <treatment|control>\"}}\n\
         CORES=\"{core_list}\"\nRUNS=${{RUNS:-5}}\n\n"
    );
    for group in groups {
        let events = group
            .counters
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        content.push_str(&format!(
            "# Counter group {id}\nEVENTS=\"{events}\"\n\
             taskset -c $CORES perf stat -e $EVENTS -r $RUNS --detailed \
             --output results/perf_stat_${{VARIANT}}_group{id}.txt ./experiment_${{VARIANT}}\n\n",
            id = group.group_id
        ));
    }
    CollectionScript {
        name: "run_perf_stat.sh".into(),
        content,
    }
}

fn perf_c2c_script() -> CollectionScript {
    let content = r#"#!/bin/bash
set -euo pipefail

VARIANT=${1:?"Usage: $0 <treatment|control>"}

perf c2c record -o results/perf_c2c_${VARIANT}.data ./experiment_${VARIANT}
perf c2c report -i results/perf_c2c_${VARIANT}.data --stdio > results/c2c_report_${VARIANT}.txt
"#;
    CollectionScript {
        name: "run_perf_c2c.sh".into(),
        content: content.into(),
    }
}

fn perf_lbr_script(core_list: &str) -> CollectionScript {
    let content = format!(
        "#!/bin/bash\nset -euo pipefail\n\n\
         VARIANT=${{1:?\"Usage: $0 <treatment|control>\"}}\nCORES=\"{core_list}\"\n\n\
         taskset -c $CORES perf record -e cycles:pp -b --call-graph lbr \
         -o results/perf_lbr_${{VARIANT}}.data ./experiment_${{VARIANT}}\n"
    );
    CollectionScript {
        name: "run_perf_lbr.sh".into(),
        content,
    }
}

fn perf_pebs_script(core_list: &str) -> CollectionScript {
    let content = format!(
        "#!/bin/bash\nset -euo pipefail\n\n\
         VARIANT=${{1:?\"Usage: $0 <treatment|control>\"}}\nCORES=\"{core_list}\"\n\n\
         taskset -c $CORES perf record -e mem_load_retired.l3_miss:pp \
         -o results/perf_pebs_${{VARIANT}}.data ./experiment_${{VARIANT}}\n"
    );
    CollectionScript {
        name: "run_perf_pebs.sh".into(),
        content,
    }
}

fn teardown_env_script() -> CollectionScript {
    let content = r#"#!/bin/bash
set -euo pipefail

echo "[falla] Restoring environment"

# Re-enable turbo boost
echo 0 > /sys/devices/system/cpu/intel_pstate/no_turbo 2>/dev/null || true

# Restore governor
cpupower frequency-set -g powersave 2>/dev/null || true

# Re-enable C-states
for cpu in /sys/devices/system/cpu/cpu*/cpuidle/state[1-9]; do
    echo 0 > "$cpu/disable" 2>/dev/null || true
done

# Re-enable THP
echo madvise > /sys/kernel/mm/transparent_hugepage/enabled 2>/dev/null || true

# Re-enable ASLR
echo 2 > /proc/sys/kernel/randomize_va_space

echo "[falla] Environment restored"
"#;
    CollectionScript {
        name: "teardown_env.sh".into(),
        content: content.into(),
    }
}
