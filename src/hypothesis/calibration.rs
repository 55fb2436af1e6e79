//! Calibration feedback store.
//!
//! Experiment verdicts flow back here as labeled records: label assignment
//! from the verdict, a label quality score from power and environment
//! hygiene, quality gates that keep weak labels out of training, and a
//! false-positive registry gated on three independent refutations before
//! a hazard class is treated as known-benign.
//!
//! The store outlives analyzer invocations; records and the registry are
//! persisted as JSON at the configured path. Mutation is not safe under
//! concurrent writers; callers serialize.

use super::ExperimentVerdict;
use crate::hazard::HazardClass;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p99: f64,
    pub p99_9: f64,
    pub p99_99: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterDelta {
    pub counter_name: String,
    pub treatment: u64,
    pub control: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentState {
    pub kernel: String,
    pub cpu_model: String,
    pub sku_family: String,
    pub cores_used: Vec<u32>,
    pub numa_topology: String,
    pub governor: String,
    pub turbo_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub finding_id: String,
    pub hypothesis_id: String,
    pub schema_version: String,
    pub verdict: ExperimentVerdict,
    pub p_value: f64,
    pub effect_size_d: f64,
    pub power: f64,
    #[serde(default)]
    pub treatment_latency: LatencyPercentiles,
    #[serde(default)]
    pub control_latency: LatencyPercentiles,
    #[serde(default)]
    pub counter_deltas: Vec<CounterDelta>,
    pub env_state: EnvironmentState,
    pub warmup_iterations: u64,
    pub measurement_iterations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelValue {
    /// Hazard confirmed exercised.
    Positive,
    /// Hazard refuted.
    Negative,
    /// Inconclusive.
    Unlabeled,
    /// Confounded or low quality.
    Excluded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub finding_id: String,
    pub hypothesis_id: String,
    pub hazard_class: HazardClass,
    pub feature_vector: Vec<f64>,
    pub label: LabelValue,
    pub label_quality: f64,
    pub effect_size: f64,
    pub p_value: f64,
    pub sku_family: String,
    pub kernel_version: String,
    pub schema_version: String,
    pub ingestion_timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalsePositiveEntry {
    pub feature_vector: Vec<f64>,
    pub hazard_class: HazardClass,
    pub reason: String,
    pub refutation_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    records: Vec<LabeledRecord>,
    false_positive_registry: Vec<FalsePositiveEntry>,
}

const MIN_LABEL_QUALITY: f64 = 0.60;
const MIN_NEGATIVE_POWER: f64 = 0.80;
const KNOWN_FALSE_POSITIVE_REFUTATIONS: u32 = 3;
const DEFAULT_CONFOUND_RISK: f64 = 0.05;

pub struct CalibrationFeedbackStore {
    store_path: PathBuf,
    records: Vec<LabeledRecord>,
    false_positive_registry: Vec<FalsePositiveEntry>,
}

impl CalibrationFeedbackStore {
    pub fn new<P: AsRef<Path>>(store_path: P) -> Self {
        CalibrationFeedbackStore {
            store_path: store_path.as_ref().to_path_buf(),
            records: Vec::new(),
            false_positive_registry: Vec::new(),
        }
    }

    /// Open an existing store, or start empty when the file is absent.
    pub fn open<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let path = store_path.as_ref();
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration store: {}", path.display()))?;
        let snapshot: StoreSnapshot =
            serde_json::from_str(&content).context("failed to parse calibration store")?;
        Ok(CalibrationFeedbackStore {
            store_path: path.to_path_buf(),
            records: snapshot.records,
            false_positive_registry: snapshot.false_positive_registry,
        })
    }

    pub fn save(&self) -> Result<()> {
        let snapshot = StoreSnapshot {
            records: self.records.clone(),
            false_positive_registry: self.false_positive_registry.clone(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.store_path, content).with_context(|| {
            format!("failed to write calibration store: {}", self.store_path.display())
        })?;
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Ingest a raw experiment result. Returns the labeled record when
    /// the schema validates; a rejected result produces no record and no
    /// registry mutation.
    pub fn ingest(
        &mut self,
        result: &ExperimentResult,
        feature_vector: &[f64],
        hazard_class: HazardClass,
    ) -> Option<LabeledRecord> {
        if !validate_schema(result) {
            tracing::debug!(
                finding = %result.finding_id,
                "calibration ingest rejected by schema validation"
            );
            return None;
        }

        let mut label = assign_label(result.verdict);
        let quality = compute_label_quality(result);

        // Low-quality labels are kept out of training.
        if quality < MIN_LABEL_QUALITY && label != LabelValue::Excluded {
            label = LabelValue::Unlabeled;
        }
        // An underpowered refutation is not a refutation.
        if result.power < MIN_NEGATIVE_POWER && label == LabelValue::Negative {
            label = LabelValue::Unlabeled;
        }

        let record = LabeledRecord {
            finding_id: result.finding_id.clone(),
            hypothesis_id: result.hypothesis_id.clone(),
            hazard_class,
            feature_vector: feature_vector.to_vec(),
            label,
            label_quality: quality,
            effect_size: result.effect_size_d,
            p_value: result.p_value,
            sku_family: result.env_state.sku_family.clone(),
            kernel_version: result.env_state.kernel.clone(),
            schema_version: result.schema_version.clone(),
            ingestion_timestamp: epoch_seconds(),
        };
        self.records.push(record.clone());

        if label == LabelValue::Negative {
            self.bump_registry(feature_vector, hazard_class, "Experimentally refuted");
        }

        Some(record)
    }

    pub fn query_by_hazard_class(&self, hazard_class: HazardClass) -> Vec<&LabeledRecord> {
        self.records
            .iter()
            .filter(|r| r.hazard_class == hazard_class)
            .collect()
    }

    pub fn query_by_sku(&self, sku_family: &str) -> Vec<&LabeledRecord> {
        self.records
            .iter()
            .filter(|r| r.sku_family == sku_family)
            .collect()
    }

    /// True only after three independent refutations of the hazard class.
    pub fn is_known_false_positive(&self, _features: &[f64], hazard_class: HazardClass) -> bool {
        self.false_positive_registry
            .iter()
            .any(|e| e.hazard_class == hazard_class && e.refutation_count >= KNOWN_FALSE_POSITIVE_REFUTATIONS)
    }

    pub fn register_false_positive(
        &mut self,
        features: &[f64],
        hazard_class: HazardClass,
        reason: &str,
    ) {
        for entry in &mut self.false_positive_registry {
            if entry.hazard_class == hazard_class {
                entry.reason = reason.to_string();
                entry.refutation_count += 1;
                return;
            }
        }
        self.false_positive_registry.push(FalsePositiveEntry {
            feature_vector: features.to_vec(),
            hazard_class,
            reason: reason.to_string(),
            refutation_count: 1,
        });
    }

    fn bump_registry(&mut self, features: &[f64], hazard_class: HazardClass, reason: &str) {
        for entry in &mut self.false_positive_registry {
            if entry.hazard_class == hazard_class {
                entry.refutation_count += 1;
                return;
            }
        }
        self.false_positive_registry.push(FalsePositiveEntry {
            feature_vector: features.to_vec(),
            hazard_class,
            reason: reason.to_string(),
            refutation_count: 1,
        });
    }
}

fn validate_schema(result: &ExperimentResult) -> bool {
    !result.finding_id.is_empty()
        && !result.hypothesis_id.is_empty()
        && !result.schema_version.is_empty()
        && result.warmup_iterations > 0
        && result.measurement_iterations > 0
        && !result.env_state.cpu_model.is_empty()
}

fn assign_label(verdict: ExperimentVerdict) -> LabelValue {
    match verdict {
        ExperimentVerdict::Confirmed => LabelValue::Positive,
        ExperimentVerdict::Refuted => LabelValue::Negative,
        ExperimentVerdict::Inconclusive | ExperimentVerdict::Pending => LabelValue::Unlabeled,
        ExperimentVerdict::Confounded => LabelValue::Excluded,
    }
}

/// Quality = min(power, 1) x environment quality x (1 - confound risk).
/// Environment quality starts at 1.0 and degrades when key controls are
/// missing from the recorded state.
fn compute_label_quality(result: &ExperimentResult) -> f64 {
    let power_factor = result.power.min(1.0);

    let mut env_quality: f64 = 1.0;
    if !result.env_state.turbo_disabled {
        env_quality -= 0.15;
    }
    if result.env_state.governor != "performance" {
        env_quality -= 0.10;
    }
    if result.env_state.cores_used.is_empty() {
        env_quality -= 0.20;
    }
    env_quality = env_quality.max(0.0);

    power_factor * env_quality * (1.0 - DEFAULT_CONFOUND_RISK)
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_env() -> EnvironmentState {
        EnvironmentState {
            kernel: "6.8.0".into(),
            cpu_model: "Xeon Gold 6338".into(),
            sku_family: "icelake-sp".into(),
            cores_used: vec![4, 5],
            numa_topology: "2 nodes".into(),
            governor: "performance".into(),
            turbo_disabled: true,
        }
    }

    fn result(verdict: ExperimentVerdict, power: f64) -> ExperimentResult {
        ExperimentResult {
            finding_id: "FL010-hot.cpp:14".into(),
            hypothesis_id: "H-FL010-1".into(),
            schema_version: "1".into(),
            verdict,
            p_value: 0.2,
            effect_size_d: 0.1,
            power,
            treatment_latency: LatencyPercentiles::default(),
            control_latency: LatencyPercentiles::default(),
            counter_deltas: vec![],
            env_state: clean_env(),
            warmup_iterations: 1000,
            measurement_iterations: 100_000,
        }
    }

    #[test]
    fn schema_violations_produce_no_record_or_registry_change() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        let mut bad = result(ExperimentVerdict::Refuted, 0.95);
        bad.env_state.cpu_model.clear();
        assert!(store.ingest(&bad, &[1.0], HazardClass::AtomicOrdering).is_none());
        assert_eq!(store.record_count(), 0);
        assert!(!store.is_known_false_positive(&[], HazardClass::AtomicOrdering));
    }

    #[test]
    fn three_refutations_flip_the_false_positive_gate() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        for i in 0..3 {
            assert!(
                !store.is_known_false_positive(&[], HazardClass::AtomicOrdering),
                "gate flipped early at {i}"
            );
            let rec = store
                .ingest(
                    &result(ExperimentVerdict::Refuted, 0.95),
                    &[1.0, 2.0],
                    HazardClass::AtomicOrdering,
                )
                .unwrap();
            assert_eq!(rec.label, LabelValue::Negative);
        }
        assert!(store.is_known_false_positive(&[], HazardClass::AtomicOrdering));
        assert!(!store.is_known_false_positive(&[], HazardClass::FalseSharing));
    }

    #[test]
    fn verdict_to_label_mapping() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        let confirmed = store
            .ingest(&result(ExperimentVerdict::Confirmed, 0.95), &[], HazardClass::FalseSharing)
            .unwrap();
        assert_eq!(confirmed.label, LabelValue::Positive);

        let inconclusive = store
            .ingest(
                &result(ExperimentVerdict::Inconclusive, 0.95),
                &[],
                HazardClass::FalseSharing,
            )
            .unwrap();
        assert_eq!(inconclusive.label, LabelValue::Unlabeled);

        let confounded = store
            .ingest(&result(ExperimentVerdict::Confounded, 0.95), &[], HazardClass::FalseSharing)
            .unwrap();
        assert_eq!(confounded.label, LabelValue::Excluded);
    }

    #[test]
    fn sloppy_environment_downgrades_a_refutation() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        let mut r = result(ExperimentVerdict::Refuted, 0.95);
        r.env_state.turbo_disabled = false;
        r.env_state.governor = "powersave".into();
        // quality = 0.95 * 0.75 * 0.95 = 0.677 >= 0.60, so the label
        // survives the quality gate; drop cores to push it under.
        r.env_state.cores_used.clear();
        let rec = store.ingest(&r, &[], HazardClass::LockContention).unwrap();
        assert_eq!(rec.label, LabelValue::Unlabeled);
        assert!(!store.is_known_false_positive(&[], HazardClass::LockContention));
    }

    #[test]
    fn underpowered_negative_becomes_unlabeled() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        let rec = store
            .ingest(&result(ExperimentVerdict::Refuted, 0.70), &[], HazardClass::HeapAllocation)
            .unwrap();
        assert_eq!(rec.label, LabelValue::Unlabeled);
        assert!(!store.is_known_false_positive(&[], HazardClass::HeapAllocation));
    }

    #[test]
    fn queries_filter_by_hazard_and_sku() {
        let mut store = CalibrationFeedbackStore::new("/tmp/unused.json");
        store
            .ingest(&result(ExperimentVerdict::Confirmed, 0.95), &[], HazardClass::FalseSharing)
            .unwrap();
        store
            .ingest(&result(ExperimentVerdict::Confirmed, 0.95), &[], HazardClass::StackPressure)
            .unwrap();
        assert_eq!(store.query_by_hazard_class(HazardClass::FalseSharing).len(), 1);
        assert_eq!(store.query_by_sku("icelake-sp").len(), 2);
        assert!(store.query_by_sku("milan").is_empty());
    }

    #[test]
    fn quality_computation_matches_the_model() {
        let r = result(ExperimentVerdict::Confirmed, 0.90);
        let q = compute_label_quality(&r);
        assert!((q - 0.90 * 1.0 * 0.95).abs() < 1e-9);

        let mut degraded = r;
        degraded.env_state.turbo_disabled = false;
        let q = compute_label_quality(&degraded);
        assert!((q - 0.90 * 0.85 * 0.95).abs() < 1e-9);
    }
}
