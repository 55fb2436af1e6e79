//! The hypothesis pipeline: turns surviving findings into falsifiable
//! latency hypotheses with PMU measurement plans, detects interactions
//! between co-located findings, and feeds experiment verdicts back into a
//! calibration store.

use crate::hazard::HazardClass;
use crate::severity::EvidenceTier;
use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod constructor;
pub mod interaction;
pub mod plan;
pub mod templates;

pub use calibration::{
    CalibrationFeedbackStore, EnvironmentState, ExperimentResult, LabelValue, LabeledRecord,
};
pub use constructor::HypothesisConstructor;
pub use interaction::{
    InteractionCandidate, InteractionCatalog, InteractionCatalogEntry, InteractionDetector,
    InteractionEligibilityMatrix, InteractionResult, InteractionTemplate,
};
pub use plan::{CollectionScript, CounterGroup, MeasurementPlan, MeasurementPlanGenerator};
pub use templates::{HypothesisTemplate, HypothesisTemplateRegistry};

/// PMU counter portability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterTier {
    /// Available on all x86-64 since Sandy Bridge.
    Universal,
    /// Available on most server SKUs.
    Standard,
    /// Requires a specific microarchitecture.
    Extended,
    /// Per-socket, not per-core.
    Uncore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmuCounter {
    pub name: String,
    pub tier: CounterTier,
    /// Why this counter speaks to the hazard under test.
    pub justification: String,
}

impl PmuCounter {
    pub fn new(name: &str, tier: CounterTier, justification: &str) -> Self {
        PmuCounter {
            name: name.to_string(),
            tier,
            justification: justification.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PmuCounterSet {
    pub required: Vec<PmuCounter>,
    pub optional: Vec<PmuCounter>,
}

impl PmuCounterSet {
    /// Concatenate two sets, preserving order.
    pub fn merged(&self, other: &PmuCounterSet) -> PmuCounterSet {
        let mut result = self.clone();
        result.required.extend(other.required.iter().cloned());
        result.optional.extend(other.optional.iter().cloned());
        result
    }

    pub fn all(&self) -> impl Iterator<Item = &PmuCounter> {
        self.required.iter().chain(self.optional.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSpec {
    /// e.g. `p99.9_operation_latency_ns`.
    pub name: String,
    pub unit: String,
    pub percentile: String,
}

impl MetricSpec {
    pub fn new(name: &str, unit: &str, percentile: &str) -> Self {
        MetricSpec {
            name: name.to_string(),
            unit: unit.to_string(),
            percentile: percentile.to_string(),
        }
    }
}

/// One confound and the command that pins it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfoundControl {
    pub variable: String,
    pub method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentVerdict {
    Pending,
    /// H0 rejected at alpha with sufficient power.
    Confirmed,
    /// H0 not rejected.
    Refuted,
    /// Insufficient power or excessive variance.
    Inconclusive,
    /// An uncontrolled variable invalidated the experiment.
    Confounded,
}

impl ExperimentVerdict {
    pub fn name(self) -> &'static str {
        match self {
            ExperimentVerdict::Pending => "pending",
            ExperimentVerdict::Confirmed => "confirmed",
            ExperimentVerdict::Refuted => "refuted",
            ExperimentVerdict::Inconclusive => "inconclusive",
            ExperimentVerdict::Confounded => "confounded",
        }
    }
}

/// A falsifiable hypothesis derived from one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyHypothesis {
    /// `<rule>-<file>:<line>`.
    pub finding_id: String,
    /// `H-<rule>-<hash of file:line>`.
    pub hypothesis_id: String,
    pub hazard_class: HazardClass,
    pub h0: String,
    pub h1: String,
    pub primary_metric: MetricSpec,
    pub counter_set: PmuCounterSet,
    /// Relative effect the experiment must be able to detect.
    pub minimum_detectable_effect: f64,
    /// Alpha.
    pub significance_level: f64,
    /// 1 - beta.
    pub power: f64,
    /// 0 means the pilot run determines the count.
    pub required_runs: u32,
    pub control_description: String,
    pub treatment_description: String,
    pub confound_controls: Vec<ConfoundControl>,
    pub structural_features: Vec<f64>,
    pub evidence_tier: EvidenceTier,
    pub verdict: ExperimentVerdict,
}
