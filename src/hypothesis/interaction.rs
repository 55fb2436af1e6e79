//! Interaction modeling between co-located findings.
//!
//! Some hazards compound: a struct that both spans lines and takes
//! contended atomic writes can produce tail latency beyond the sum of
//! either hazard alone. The eligibility matrix enumerates the known
//! compositions; detection pairs hypotheses that share a declaration
//! scope; the catalog accumulates experimental results per template.

use super::templates::HypothesisTemplateRegistry;
use super::{ExperimentVerdict, LatencyHypothesis, MetricSpec, PmuCounterSet};
use crate::hazard::HazardClass;
use crate::severity::EvidenceTier;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct InteractionTemplate {
    /// e.g. `IX-001`.
    pub id: String,
    pub components: Vec<HazardClass>,
    pub amplification_mechanism: String,
    /// Union of the component counter sets.
    pub counter_set: PmuCounterSet,
    /// Delta: the combined effect must exceed the sum of individual
    /// effects by at least this fraction to count as an interaction.
    pub interaction_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct InteractionCandidate {
    pub declaration_scope: String,
    pub finding_ids: Vec<String>,
    pub hazard_classes: Vec<HazardClass>,
    pub template_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct InteractionResult {
    pub interaction_id: String,
    pub template_id: String,
    pub effect_a: f64,
    pub effect_b: f64,
    pub effect_combined: f64,
    /// `effect_combined - (effect_a + effect_b)`.
    pub interaction_effect: f64,
    /// Cohen's d for the interaction term.
    pub interaction_d: f64,
    pub p_value: f64,
    pub super_additive: bool,
    pub replication_count: u32,
    pub confirmed_skus: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InteractionCatalogEntry {
    pub template: InteractionTemplate,
    pub results: Vec<InteractionResult>,
    pub mean_interaction_d: f64,
    pub confirmed_super_additive: bool,
}

pub struct InteractionEligibilityMatrix {
    templates: Vec<InteractionTemplate>,
}

impl InteractionEligibilityMatrix {
    pub fn new(registry: &HypothesisTemplateRegistry) -> Self {
        let counters = |hc: HazardClass| {
            registry
                .lookup(hc)
                .map(|t| t.counter_set.clone())
                .unwrap_or_default()
        };

        let make = |id: &str,
                    components: Vec<HazardClass>,
                    mechanism: &str,
                    counter_set: PmuCounterSet| InteractionTemplate {
            id: id.to_string(),
            components,
            amplification_mechanism: mechanism.to_string(),
            counter_set,
            interaction_threshold: 0.20,
        };

        let templates = vec![
            make(
                "IX-001",
                vec![HazardClass::CacheGeometry, HazardClass::AtomicContention],
                "Multi-line RFO amplification: RFO traffic spans multiple cache lines, each \
                 requiring separate ownership transfer",
                counters(HazardClass::CacheGeometry)
                    .merged(&counters(HazardClass::AtomicContention)),
            ),
            make(
                "IX-002",
                vec![HazardClass::FalseSharing, HazardClass::AtomicContention],
                "Same-line invalidation + atomic write serialization: every write \
                 invalidates the line for all other cores, atomics prevent batching",
                counters(HazardClass::FalseSharing)
                    .merged(&counters(HazardClass::AtomicContention)),
            ),
            make(
                "IX-003",
                vec![HazardClass::AtomicOrdering, HazardClass::AtomicContention],
                "Fence serialization + ownership transfer: seq_cst fence extends the window \
                 during which the line is exclusively held",
                counters(HazardClass::AtomicOrdering)
                    .merged(&counters(HazardClass::AtomicContention)),
            ),
            make(
                "IX-004",
                vec![HazardClass::AtomicContention, HazardClass::NUMALocality],
                "Cross-socket RFO: remote RFO is 3-5x more expensive than intra-socket, \
                 compounding contention cost",
                counters(HazardClass::AtomicContention)
                    .merged(&counters(HazardClass::NUMALocality)),
            ),
            make(
                "IX-005",
                vec![HazardClass::LockContention, HazardClass::HeapAllocation],
                "Allocation under lock: allocation latency extends the critical section, \
                 increasing contention probability",
                counters(HazardClass::LockContention)
                    .merged(&counters(HazardClass::HeapAllocation)),
            ),
            make(
                "IX-006",
                vec![HazardClass::VirtualDispatch, HazardClass::DeepConditional],
                "Compounding branch misprediction surface: virtual dispatch + deep \
                 conditionals exhaust BTB and pattern history",
                counters(HazardClass::VirtualDispatch)
                    .merged(&counters(HazardClass::DeepConditional)),
            ),
            make(
                "IX-007",
                vec![
                    HazardClass::CacheGeometry,
                    HazardClass::AtomicContention,
                    HazardClass::NUMALocality,
                ],
                "Full compound hazard: large struct + atomics + NUMA produces a multi-line \
                 cross-socket RFO storm",
                counters(HazardClass::CacheGeometry)
                    .merged(&counters(HazardClass::AtomicContention))
                    .merged(&counters(HazardClass::NUMALocality)),
            ),
        ];

        InteractionEligibilityMatrix { templates }
    }

    pub fn templates(&self) -> &[InteractionTemplate] {
        &self.templates
    }

    /// Pairwise eligibility; order-insensitive. Templates with more than
    /// two components describe higher-order compositions and do not
    /// participate in pair detection.
    pub fn find_template(&self, a: HazardClass, b: HazardClass) -> Option<&InteractionTemplate> {
        self.templates.iter().find(|t| {
            t.components.len() == 2
                && ((t.components[0] == a && t.components[1] == b)
                    || (t.components[0] == b && t.components[1] == a))
        })
    }

    pub fn is_eligible(&self, a: HazardClass, b: HazardClass) -> bool {
        self.find_template(a, b).is_some()
    }

    pub fn by_id(&self, template_id: &str) -> Option<&InteractionTemplate> {
        self.templates.iter().find(|t| t.id == template_id)
    }
}

pub struct InteractionDetector;

impl InteractionDetector {
    /// Group hypotheses by declaration scope (finding IDs carry
    /// `<rule>-<file>:<line>`; the scope key is the file component) and
    /// emit a candidate for every eligible pair within a scope.
    pub fn detect(
        hypotheses: &[LatencyHypothesis],
        matrix: &InteractionEligibilityMatrix,
    ) -> Vec<InteractionCandidate> {
        let mut scopes: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, hyp) in hypotheses.iter().enumerate() {
            scopes.entry(scope_key(&hyp.finding_id)).or_default().push(idx);
        }

        let mut scope_keys: Vec<_> = scopes.keys().cloned().collect();
        scope_keys.sort();

        let mut candidates = Vec::new();
        for key in scope_keys {
            let indices = &scopes[&key];
            if indices.len() < 2 {
                continue;
            }
            for (i, &a) in indices.iter().enumerate() {
                for &b in &indices[i + 1..] {
                    let (ha, hb) = (hypotheses[a].hazard_class, hypotheses[b].hazard_class);
                    let Some(template) = matrix.find_template(ha, hb) else {
                        continue;
                    };
                    candidates.push(InteractionCandidate {
                        declaration_scope: key.clone(),
                        finding_ids: vec![
                            hypotheses[a].finding_id.clone(),
                            hypotheses[b].finding_id.clone(),
                        ],
                        hazard_classes: vec![ha, hb],
                        template_id: template.id.clone(),
                    });
                }
            }
        }
        candidates
    }

    /// Build the combined-effect hypothesis for one candidate pair.
    pub fn construct_interaction_hypothesis(
        candidate: &InteractionCandidate,
        matrix: &InteractionEligibilityMatrix,
    ) -> Option<LatencyHypothesis> {
        if candidate.hazard_classes.len() < 2 {
            return None;
        }
        let template = matrix.by_id(&candidate.template_id)?;

        let mut id = format!("H-{}", template.id);
        for fid in &candidate.finding_ids {
            let mut hasher = DefaultHasher::new();
            fid.hash(&mut hasher);
            id.push_str(&format!("-{}", hasher.finish()));
        }

        let (a, b) = (candidate.hazard_classes[0], candidate.hazard_classes[1]);
        Some(LatencyHypothesis {
            finding_id: candidate.finding_ids.join("+"),
            hypothesis_id: id,
            hazard_class: HazardClass::HazardAmplification,
            h0: format!(
                "The combined effect of {a} and {b} on tail latency is <= sum of individual \
                 effects."
            ),
            h1: format!(
                "The combined effect of {a} and {b} on tail latency is > sum of individual \
                 effects by >= {}% (interaction threshold). Mechanism: {}",
                template.interaction_threshold * 100.0,
                template.amplification_mechanism
            ),
            primary_metric: MetricSpec::new("p99.99_operation_latency_ns", "nanoseconds", "p99.99"),
            counter_set: template.counter_set.clone(),
            minimum_detectable_effect: 0.05,
            significance_level: 0.01,
            power: 0.90,
            required_runs: 0,
            control_description: "Both hazards mitigated (baseline)".to_string(),
            treatment_description: "Both hazards present simultaneously".to_string(),
            confound_controls: vec![],
            structural_features: vec![],
            evidence_tier: EvidenceTier::Likely,
            verdict: ExperimentVerdict::Pending,
        })
    }
}

/// `FL002-src/ring.hpp:14` groups under `src/ring.hpp`.
fn scope_key(finding_id: &str) -> String {
    let scope = finding_id
        .split_once('-')
        .map(|(_, rest)| rest)
        .unwrap_or(finding_id);
    match scope.rsplit_once(':') {
        Some((file, _line)) => file.to_string(),
        None => scope.to_string(),
    }
}

/// Running aggregates of interaction experiments per template.
#[derive(Default)]
pub struct InteractionCatalog {
    entries: Vec<InteractionCatalogEntry>,
}

impl InteractionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[InteractionCatalogEntry] {
        &self.entries
    }

    pub fn lookup(&self, template_id: &str) -> Option<&InteractionCatalogEntry> {
        self.entries.iter().find(|e| e.template.id == template_id)
    }

    pub fn add_result(
        &mut self,
        template_id: &str,
        result: InteractionResult,
        matrix: &InteractionEligibilityMatrix,
    ) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.template.id == template_id) {
            entry.results.push(result);
            let count = entry.results.len() as f64;
            entry.mean_interaction_d =
                entry.results.iter().map(|r| r.interaction_d).sum::<f64>() / count;
            entry.confirmed_super_additive = entry.results.iter().any(|r| r.super_additive);
            return;
        }
        let Some(template) = matrix.by_id(template_id) else {
            tracing::warn!(template_id, "interaction result for unknown template dropped");
            return;
        };
        self.entries.push(InteractionCatalogEntry {
            template: template.clone(),
            mean_interaction_d: result.interaction_d,
            confirmed_super_additive: result.super_additive,
            results: vec![result],
        });
    }
}
