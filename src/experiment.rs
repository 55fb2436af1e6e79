//! Experiment bundle synthesis.
//!
//! For each hypothesis and its measurement plan, emit a self-contained
//! directory a performance engineer can run: a common measurement header,
//! a harness skeleton with treatment/control hooks, build and
//! orchestration scripts, a Makefile, a README describing the protocol,
//! the hypothesis as JSON, and the plan's collection scripts.

use crate::hypothesis::{LatencyHypothesis, MeasurementPlan};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ExperimentFile {
    pub relative_path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ExperimentBundle {
    pub finding_id: String,
    pub hypothesis_id: String,
    pub output_dir: String,
    pub files: Vec<ExperimentFile>,
}

pub struct ExperimentSynthesizer;

impl ExperimentSynthesizer {
    pub fn synthesize(
        hypothesis: &LatencyHypothesis,
        plan: &MeasurementPlan,
        output_dir: &str,
    ) -> ExperimentBundle {
        let mut files = vec![
            common_header(hypothesis),
            harness(hypothesis),
            build_script(),
            run_all(plan),
            makefile(),
            readme(hypothesis, plan),
            hypothesis_json(hypothesis),
        ];
        for script in &plan.scripts {
            files.push(ExperimentFile {
                relative_path: format!("scripts/{}", script.name),
                content: script.content.clone(),
            });
        }

        ExperimentBundle {
            finding_id: hypothesis.finding_id.clone(),
            hypothesis_id: hypothesis.hypothesis_id.clone(),
            output_dir: output_dir.to_string(),
            files,
        }
    }

    pub fn write_to_disk(bundle: &ExperimentBundle) -> Result<()> {
        let root = Path::new(&bundle.output_dir);
        for file in &bundle.files {
            let path = root.join(&file.relative_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create bundle directory: {}", parent.display())
                })?;
            }
            fs::write(&path, &file.content)
                .with_context(|| format!("failed to write bundle file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn common_header(hypothesis: &LatencyHypothesis) -> ExperimentFile {
    let content = format!(
        r#"// Shared measurement support for {id}.
#pragma once

#include <algorithm>
#include <cstdint>
#include <vector>

namespace falla_exp {{

inline uint64_t rdtscp_serialized() {{
    uint32_t lo, hi, aux;
    __asm__ __volatile__("rdtscp" : "=a"(lo), "=d"(hi), "=c"(aux)::"memory");
    return (static_cast<uint64_t>(hi) << 32) | lo;
}}

// Percentile over a sample vector; sorts in place.
inline uint64_t percentile(std::vector<uint64_t> &samples, double p) {{
    if (samples.empty()) return 0;
    std::sort(samples.begin(), samples.end());
    size_t idx = static_cast<size_t>(p * (samples.size() - 1));
    return samples[idx];
}}

constexpr uint64_t kWarmupIterations = 10000;
constexpr uint64_t kMeasureIterations = 1000000;

}} // namespace falla_exp
"#,
        id = hypothesis.hypothesis_id
    );
    ExperimentFile {
        relative_path: "src/experiment_common.h".into(),
        content,
    }
}

fn harness(hypothesis: &LatencyHypothesis) -> ExperimentFile {
    let content = format!(
        r#"// Harness for {id} ({hazard}).
//
// Treatment: {treatment}
// Control:   {control}
//
// Fill in run_treatment_op() and run_control_op() with the code under
// test; the measurement loop and percentile reporting are provided.

#include "experiment_common.h"

#include <cstdio>
#include <vector>

// TODO: paste the detected hazard code path here.
static void run_treatment_op() {{}}

// TODO: paste the mitigated variant here.
static void run_control_op() {{}}

#ifdef VARIANT_TREATMENT
static constexpr bool kTreatment = true;
#else
static constexpr bool kTreatment = false;
#endif

int main() {{
    for (uint64_t i = 0; i < falla_exp::kWarmupIterations; ++i) {{
        kTreatment ? run_treatment_op() : run_control_op();
    }}

    std::vector<uint64_t> samples;
    samples.reserve(falla_exp::kMeasureIterations);
    for (uint64_t i = 0; i < falla_exp::kMeasureIterations; ++i) {{
        uint64_t start = falla_exp::rdtscp_serialized();
        kTreatment ? run_treatment_op() : run_control_op();
        samples.push_back(falla_exp::rdtscp_serialized() - start);
    }}

    std::printf("variant=%s n=%zu p50=%llu p99=%llu p99.9=%llu p99.99=%llu\n",
                kTreatment ? "treatment" : "control", samples.size(),
                (unsigned long long)falla_exp::percentile(samples, 0.50),
                (unsigned long long)falla_exp::percentile(samples, 0.99),
                (unsigned long long)falla_exp::percentile(samples, 0.999),
                (unsigned long long)falla_exp::percentile(samples, 0.9999));
    return 0;
}}
"#,
        id = hypothesis.hypothesis_id,
        hazard = hypothesis.hazard_class,
        treatment = hypothesis.treatment_description,
        control = hypothesis.control_description,
    );
    ExperimentFile {
        relative_path: "src/harness.cpp".into(),
        content,
    }
}

fn build_script() -> ExperimentFile {
    let content = r#"#!/bin/bash
set -euo pipefail

CXX=${CXX:-g++}
FLAGS="-O2 -march=native -fno-lto -g -std=c++20"

$CXX $FLAGS -DVARIANT_TREATMENT src/harness.cpp -o experiment_treatment -lpthread
$CXX $FLAGS -DVARIANT_CONTROL src/harness.cpp -o experiment_control -lpthread

echo "built experiment_treatment and experiment_control"
"#;
    ExperimentFile {
        relative_path: "build.sh".into(),
        content: content.into(),
    }
}

fn run_all(plan: &MeasurementPlan) -> ExperimentFile {
    let mut content = String::from(
        "#!/bin/bash\nset -euo pipefail\n\n./build.sh\n\n",
    );
    for script in &plan.scripts {
        if script.name == "setup_env.sh" || script.name == "teardown_env.sh" {
            content.push_str(&format!("bash scripts/{}\n", script.name));
        } else {
            content.push_str(&format!(
                "bash scripts/{name} treatment\nbash scripts/{name} control\n",
                name = script.name
            ));
        }
    }
    ExperimentFile {
        relative_path: "run_all.sh".into(),
        content,
    }
}

fn makefile() -> ExperimentFile {
    let content = r#"all:
	./build.sh

run: all
	./run_all.sh

clean:
	rm -f experiment_treatment experiment_control
	rm -rf results

.PHONY: all run clean
"#;
    ExperimentFile {
        relative_path: "Makefile".into(),
        content: content.into(),
    }
}

fn readme(hypothesis: &LatencyHypothesis, plan: &MeasurementPlan) -> ExperimentFile {
    let counters = plan
        .counter_groups
        .iter()
        .map(|g| {
            let names = g
                .counters
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("- group {}: {}", g.group_id, names)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = format!(
        r#"# Experiment {id}

Hazard class: {hazard}
Primary metric: {metric} ({percentile})

## Hypotheses

H0: {h0}

H1: {h1}

## Protocol

Alpha {alpha}, power {power}, minimum detectable effect {mde}. Run count is
determined by a pilot run unless overridden. Treatment and control differ
only in the structural hazard under test; everything else is pinned by
scripts/setup_env.sh.

## Counter groups

{counters}

## Running

    make run

Results land under results/. Restore the machine with
scripts/teardown_env.sh (run_all.sh does this automatically).
"#,
        id = hypothesis.hypothesis_id,
        hazard = hypothesis.hazard_class,
        metric = hypothesis.primary_metric.name,
        percentile = hypothesis.primary_metric.percentile,
        h0 = hypothesis.h0,
        h1 = hypothesis.h1,
        alpha = hypothesis.significance_level,
        power = hypothesis.power,
        mde = hypothesis.minimum_detectable_effect,
        counters = counters,
    );
    ExperimentFile {
        relative_path: "README.md".into(),
        content,
    }
}

fn hypothesis_json(hypothesis: &LatencyHypothesis) -> ExperimentFile {
    let content = serde_json::to_string_pretty(hypothesis)
        .unwrap_or_else(|_| "{}".to_string());
    ExperimentFile {
        relative_path: "hypothesis.json".into(),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Diagnostic, SourceLoc};
    use crate::hypothesis::templates::HypothesisTemplateRegistry;
    use crate::hypothesis::{HypothesisConstructor, MeasurementPlanGenerator};
    use crate::severity::{EvidenceTier, Severity};

    fn bundle() -> ExperimentBundle {
        let registry = HypothesisTemplateRegistry::new();
        let constructor = HypothesisConstructor::new(&registry);
        let finding = Diagnostic {
            rule_id: "FL002".into(),
            title: "False Sharing Candidate".into(),
            severity: Severity::Critical,
            confidence: 0.88,
            evidence_tier: EvidenceTier::Proven,
            suppressed: false,
            location: SourceLoc {
                file: "ring.hpp".into(),
                line: 14,
                column: 1,
            },
            function_name: String::new(),
            hardware_reasoning: String::new(),
            structural_evidence: "sizeof=16B; thread_escape=true".into(),
            mitigation: String::new(),
            escalations: vec![],
        };
        let hyp = constructor.construct(&finding).unwrap();
        let plan = MeasurementPlanGenerator::generate(&hyp, "icelake-sp", 4);
        ExperimentSynthesizer::synthesize(&hyp, &plan, "/tmp/exp")
    }

    #[test]
    fn bundle_contains_the_full_file_set() {
        let bundle = bundle();
        let paths: Vec<_> = bundle.files.iter().map(|f| f.relative_path.as_str()).collect();
        for expected in [
            "src/experiment_common.h",
            "src/harness.cpp",
            "build.sh",
            "run_all.sh",
            "Makefile",
            "README.md",
            "hypothesis.json",
            "scripts/setup_env.sh",
            "scripts/run_perf_stat.sh",
            "scripts/run_perf_c2c.sh",
            "scripts/run_perf_pebs.sh",
            "scripts/teardown_env.sh",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn hypothesis_json_round_trips() {
        let bundle = bundle();
        let json = bundle
            .files
            .iter()
            .find(|f| f.relative_path == "hypothesis.json")
            .unwrap();
        let parsed: crate::hypothesis::LatencyHypothesis =
            serde_json::from_str(&json.content).unwrap();
        assert_eq!(parsed.hypothesis_id, bundle.hypothesis_id);
    }

    #[test]
    fn run_all_invokes_scripts_in_plan_order() {
        let bundle = bundle();
        let run_all = bundle
            .files
            .iter()
            .find(|f| f.relative_path == "run_all.sh")
            .unwrap();
        let setup = run_all.content.find("setup_env.sh").unwrap();
        let stat = run_all.content.find("run_perf_stat.sh").unwrap();
        let teardown = run_all.content.find("teardown_env.sh").unwrap();
        assert!(setup < stat && stat < teardown);
    }

    #[test]
    fn write_to_disk_materializes_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = bundle();
        bundle.output_dir = dir.path().to_string_lossy().into_owned();
        ExperimentSynthesizer::write_to_disk(&bundle).unwrap();
        assert!(dir.path().join("src/harness.cpp").exists());
        assert!(dir.path().join("scripts/setup_env.sh").exists());
    }
}
