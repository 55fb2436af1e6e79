//! Hypothesis construction, measurement planning, and interaction
//! detection over real rule engine output.

use falla::ast::{
    FieldDecl, FunctionDecl, RecordDecl, SourceLoc, Stmt, TranslationUnit, TypeRef,
};
use falla::config::AnalyzerConfig;
use falla::driver::AnalysisDriver;
use falla::hazard::HazardClass;
use falla::hypothesis::templates::HypothesisTemplateRegistry;
use falla::hypothesis::{
    HypothesisConstructor, InteractionDetector, InteractionEligibilityMatrix,
    MeasurementPlanGenerator,
};
use falla::severity::EvidenceTier;

fn ring_unit() -> TranslationUnit {
    // One record that trips FL001 (3 lines), FL002/FL041 (adjacent
    // atomics), FL060 (large + escape), and FL090 (all three signals).
    let record = RecordDecl {
        loc: SourceLoc {
            file: "src/ring.hpp".into(),
            line: 14,
            column: 1,
        },
        ..RecordDecl::sized(
            "EventRing",
            320,
            vec![
                FieldDecl::at("head", TypeRef::atomic_of("unsigned long", 8), 0),
                FieldDecl::at("tail", TypeRef::atomic_of("unsigned long", 8), 8),
                FieldDecl::at("slots", TypeRef::sized("void*[38]", 304), 16),
            ],
        )
    };
    // A hot producer in the same file: atomic writes in a loop trip
    // FL010 and FL011 so contention pairs with the layout findings.
    let atomic = TypeRef::atomic_of("unsigned long", 8);
    let producer = FunctionDecl {
        name: "push".into(),
        qualified_name: "EventRing::push".into(),
        annotations: vec!["faultline_hot".into()],
        loc: SourceLoc {
            file: "src/ring.hpp".into(),
            line: 40,
            column: 1,
        },
        body: Some(vec![Stmt::While {
            body: vec![
                Stmt::MemberCall {
                    loc: SourceLoc {
                        file: "src/ring.hpp".into(),
                        line: 42,
                        column: 9,
                    },
                    method: "store".into(),
                    class_qualified: "std::atomic".into(),
                    receiver_ty: atomic.clone(),
                    receiver_name: Some("tail".into()),
                    is_virtual: false,
                    order_args: vec![],
                    args: vec![],
                },
                Stmt::MemberCall {
                    loc: SourceLoc {
                        file: "src/ring.hpp".into(),
                        line: 43,
                        column: 9,
                    },
                    method: "fetch_add".into(),
                    class_qualified: "std::atomic".into(),
                    receiver_ty: atomic,
                    receiver_name: Some("head".into()),
                    is_virtual: false,
                    order_args: vec![],
                    args: vec![],
                },
            ],
        }]),
        ..Default::default()
    };

    TranslationUnit {
        source_file: "src/ring.hpp".into(),
        records: vec![record],
        functions: vec![producer],
        ..Default::default()
    }
}

#[test]
fn every_finding_maps_to_a_hypothesis_with_protocol_defaults() {
    let diags = AnalysisDriver::new(AnalyzerConfig::default()).analyze(&[ring_unit()]);
    assert!(!diags.is_empty());

    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);

    for diag in &diags {
        let hyp = constructor
            .construct(diag)
            .unwrap_or_else(|| panic!("no hypothesis for {}", diag.rule_id));
        assert_eq!(hyp.hazard_class, HazardClass::from_rule_id(&diag.rule_id));
        assert!((hyp.significance_level - 0.01).abs() < 1e-9);
        assert!((hyp.power - 0.90).abs() < 1e-9);
        assert!((hyp.minimum_detectable_effect - 0.05).abs() < 1e-9);
        assert_eq!(hyp.required_runs, 0);
        assert_eq!(hyp.confound_controls.len(), 8);
        assert!(hyp.finding_id.starts_with(&diag.rule_id));
        assert!(hyp
            .hypothesis_id
            .starts_with(&format!("H-{}", diag.rule_id)));
        assert!(!hyp.structural_features.is_empty());
    }
}

#[test]
fn unknown_tier_only_without_proven_or_likely_evidence_keys() {
    let diags = AnalysisDriver::new(AnalyzerConfig::default()).analyze(&[ring_unit()]);
    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);

    for diag in &diags {
        let hyp = constructor.construct(diag).unwrap();
        if hyp.evidence_tier == EvidenceTier::Unknown {
            for key in ["sizeof", "cache_lines", "estimated_frame", "atomic_writes", "virtual_call"]
            {
                assert!(
                    diag.evidence_value(key).is_none(),
                    "{} carries {key} yet tier is Unknown",
                    diag.rule_id
                );
            }
            assert_ne!(diag.evidence_value("ordering"), Some("seq_cst"));
        }
    }
}

#[test]
fn plan_partitioning_preserves_counters_and_script_order() {
    let diags = AnalysisDriver::new(AnalyzerConfig::default()).analyze(&[ring_unit()]);
    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);

    for diag in &diags {
        let hyp = constructor.construct(diag).unwrap();
        let plan = MeasurementPlanGenerator::generate(&hyp, "icelake-sp", 4);

        // Concatenating groups reproduces the counter set in order.
        let flat: Vec<_> = plan
            .counter_groups
            .iter()
            .flat_map(|g| g.counters.iter().map(|c| c.name.clone()))
            .collect();
        let expected: Vec<_> = hyp.counter_set.all().map(|c| c.name.clone()).collect();
        assert_eq!(flat, expected);
        assert!(plan.counter_groups.iter().all(|g| g.counters.len() <= 4));

        // Script skeleton: setup, perf-stat, [c2c], [lbr], pebs, teardown.
        let names: Vec<_> = plan.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"setup_env.sh"));
        assert_eq!(names.get(1), Some(&"run_perf_stat.sh"));
        assert_eq!(names.last(), Some(&"teardown_env.sh"));
        assert_eq!(names[names.len() - 2], "run_perf_pebs.sh");
        assert_eq!(names.contains(&"run_perf_c2c.sh"), plan.requires_c2c);
        assert_eq!(names.contains(&"run_perf_lbr.sh"), plan.requires_lbr);
    }
}

#[test]
fn co_located_findings_produce_interaction_candidates() {
    let diags = AnalysisDriver::new(AnalyzerConfig::default()).analyze(&[ring_unit()]);
    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);
    let hypotheses: Vec<_> = diags
        .iter()
        .filter_map(|d| constructor.construct(d))
        .collect();

    let matrix = InteractionEligibilityMatrix::new(&registry);
    let candidates = InteractionDetector::detect(&hypotheses, &matrix);
    assert!(
        !candidates.is_empty(),
        "co-located eligible hazards should pair"
    );

    for candidate in &candidates {
        assert_eq!(candidate.declaration_scope, "src/ring.hpp");
        let hyp =
            InteractionDetector::construct_interaction_hypothesis(candidate, &matrix).unwrap();
        assert_eq!(hyp.hazard_class, HazardClass::HazardAmplification);
        assert_eq!(hyp.primary_metric.percentile, "p99.99");
        assert_eq!(hyp.evidence_tier, EvidenceTier::Likely);
    }
}

#[test]
fn hypothesis_construction_is_deterministic() {
    let diags = AnalysisDriver::new(AnalyzerConfig::default()).analyze(&[ring_unit()]);
    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);

    let first: Vec<_> = diags
        .iter()
        .filter_map(|d| constructor.construct(d))
        .map(|h| (h.finding_id, h.hypothesis_id))
        .collect();
    let second: Vec<_> = diags
        .iter()
        .filter_map(|d| constructor.construct(d))
        .map(|h| (h.finding_id, h.hypothesis_id))
        .collect();
    assert_eq!(first, second);
}
