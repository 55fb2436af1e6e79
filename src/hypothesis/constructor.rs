//! Finding to hypothesis construction.
//!
//! A pure function of (diagnostic, templates): maps the rule ID to a
//! hazard class, fills the template, extracts the structural feature
//! vector from the machine-parseable evidence, and derives stable
//! finding and hypothesis identifiers.

use super::templates::HypothesisTemplateRegistry;
use super::{ExperimentVerdict, LatencyHypothesis};
use crate::diagnostic::Diagnostic;
use crate::hazard::HazardClass;
use crate::severity::EvidenceTier;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct HypothesisConstructor<'a> {
    templates: &'a HypothesisTemplateRegistry,
}

/// Evidence keys parsed into the numeric feature vector, in order.
const FEATURE_KEYS: &[&str] = &[
    "sizeof",
    "cache_lines",
    "atomic_writes",
    "mutable_fields",
    "estimated_frame",
    "depth",
    "callees",
];

impl<'a> HypothesisConstructor<'a> {
    pub fn new(templates: &'a HypothesisTemplateRegistry) -> Self {
        HypothesisConstructor { templates }
    }

    pub fn construct(&self, finding: &Diagnostic) -> Option<LatencyHypothesis> {
        let hazard_class = HazardClass::from_rule_id(&finding.rule_id);
        let template = self.templates.lookup(hazard_class)?;

        Some(LatencyHypothesis {
            finding_id: finding_id(finding),
            hypothesis_id: hypothesis_id(finding),
            hazard_class,
            h0: template.h0_template.clone(),
            h1: template.h1_template.clone(),
            primary_metric: template.primary_metric.clone(),
            counter_set: template.counter_set.clone(),
            minimum_detectable_effect: template.default_mde,
            significance_level: 0.01,
            power: 0.90,
            // Pilot run determines the count.
            required_runs: 0,
            control_description: "Mitigated variant with the structural hazard removed"
                .to_string(),
            treatment_description: "Original code preserving the structural hazard as detected"
                .to_string(),
            confound_controls: template.confound_requirements.clone(),
            structural_features: extract_features(finding),
            evidence_tier: infer_evidence_tier(finding),
            verdict: ExperimentVerdict::Pending,
        })
    }
}

pub fn finding_id(finding: &Diagnostic) -> String {
    format!(
        "{}-{}:{}",
        finding.rule_id, finding.location.file, finding.location.line
    )
}

pub fn hypothesis_id(finding: &Diagnostic) -> String {
    let site = format!("{}:{}", finding.location.file, finding.location.line);
    let mut hasher = DefaultHasher::new();
    site.hash(&mut hasher);
    format!("H-{}-{}", finding.rule_id, hasher.finish())
}

/// Numeric feature vector: severity ordinal, confidence, escalation
/// count, then the parsed evidence values (missing keys contribute 0).
pub fn extract_features(finding: &Diagnostic) -> Vec<f64> {
    let mut features = vec![
        f64::from(finding.severity.ordinal()),
        finding.confidence,
        finding.escalations.len() as f64,
    ];
    for key in FEATURE_KEYS {
        features.push(finding.evidence_number(key).unwrap_or(0.0));
    }
    features
}

/// Tier inference from evidence keys. Size-derived facts are provable
/// from layout alone; escape or atomic presence degrades to a strong
/// heuristic; explicit seq_cst ordering is a lowering fact.
pub fn infer_evidence_tier(finding: &Diagnostic) -> EvidenceTier {
    let has = |key: &str| finding.evidence_value(key).is_some();

    if has("sizeof") || has("cache_lines") || has("estimated_frame") {
        let escape = matches!(
            finding.evidence_value("thread_escape"),
            Some("true") | Some("yes")
        );
        let atomics = finding.evidence_value("atomics") == Some("yes");
        return if escape || atomics {
            EvidenceTier::Likely
        } else {
            EvidenceTier::Proven
        };
    }
    if finding.evidence_value("ordering") == Some("seq_cst") {
        return EvidenceTier::Proven;
    }
    if has("atomic_writes") || has("virtual_call") {
        return EvidenceTier::Likely;
    }
    EvidenceTier::Unknown
}
