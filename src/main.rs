use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;

use falla::cli::{Cli, OutputFormat};
use falla::config::AnalyzerConfig;
use falla::diagnostic::{sort_for_output, Diagnostic};
use falla::driver::AnalysisDriver;
use falla::experiment::ExperimentSynthesizer;
use falla::hazard::HazardClass;
use falla::hypothesis::constructor::extract_features;
use falla::hypothesis::templates::HypothesisTemplateRegistry;
use falla::hypothesis::{
    CalibrationFeedbackStore, HypothesisConstructor, MeasurementPlanGenerator,
};
use falla::ingest;
use falla::ir_analyzer::IrAnalyzer;
use falla::metadata::ExecutionMetadata;
use falla::refiner::DiagnosticRefiner;
use falla::severity::Severity;
use falla::{json_output, sarif_output, text_output};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    if args.inputs.is_empty() {
        anyhow::bail!("no inputs. Usage: falla <TU_JSON>... [--ir <IR_JSON>...]");
    }

    let config = build_config(&args)?;

    // Ingest exported translation units.
    let mut units = Vec::new();
    for path in &args.inputs {
        let unit = ingest::load_translation_unit(path)
            .with_context(|| format!("failed to read translation unit: {}", path.display()))?;
        units.push(unit);
    }

    let driver = AnalysisDriver::new(config.clone());
    let mut diagnostics = driver.analyze(&units);

    // Refine against lowered IR when provided.
    let ir_enabled = !args.ir_inputs.is_empty();
    if ir_enabled {
        let mut analyzer = IrAnalyzer::new();
        for path in &args.ir_inputs {
            let module = ingest::load_ir_module(path)
                .with_context(|| format!("failed to read IR module: {}", path.display()))?;
            analyzer.analyze_module(&module);
        }
        let profiles = analyzer.into_profiles();
        let mut refiner = DiagnosticRefiner::new(&profiles, &config);
        refiner.refine(&mut diagnostics);
    }

    // Drop findings the calibration store has refuted three times over.
    if let Some(store_path) = &args.calibration_store {
        let store = CalibrationFeedbackStore::open(store_path)?;
        diagnostics.retain(|d| {
            let hazard = HazardClass::from_rule_id(&d.rule_id);
            let known_fp = store.is_known_false_positive(&extract_features(d), hazard);
            if known_fp {
                tracing::debug!(rule = %d.rule_id, file = %d.location.file,
                                "dropped known false positive");
            }
            !known_fp
        });
    }

    diagnostics.retain(|d| !d.suppressed && d.severity >= config.min_severity);
    sort_for_output(&mut diagnostics);

    if let Some(dir) = &args.experiments_dir {
        synthesize_experiments(&diagnostics, dir, &args.sku_family, args.max_counters)?;
    }

    let metadata = ExecutionMetadata::now(
        args.config
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
            .as_str(),
        ir_enabled,
        args.inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    );

    let rendered = match args.format {
        OutputFormat::Text => text_output::render(&diagnostics),
        OutputFormat::Json => json_output::JsonReport::new(metadata, diagnostics).to_json()?,
        OutputFormat::Sarif => sarif_output::render(&diagnostics)?,
    };

    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write output: {}", path.display()))?,
        None => print!("{rendered}"),
    }

    Ok(())
}

fn build_config(args: &Cli) -> Result<AnalyzerConfig> {
    let mut config = match &args.config {
        Some(path) => AnalyzerConfig::load_or_default(path),
        None => AnalyzerConfig::defaults(),
    };

    config
        .hot_function_patterns
        .extend(args.hot_functions.iter().cloned());
    config.hot_file_patterns.extend(args.hot_files.iter().cloned());
    config
        .disabled_rules
        .extend(args.disabled_rules.iter().cloned());
    if let Some(sev) = &args.min_severity {
        config.min_severity = sev
            .parse::<Severity>()
            .map_err(|e| anyhow::anyhow!("--min-severity: {e}"))?;
    }
    if let Some(path) = &args.output {
        config.output_file = path.to_string_lossy().into_owned();
    }
    config.json_output = args.format == OutputFormat::Json;

    Ok(config)
}

fn synthesize_experiments(
    diagnostics: &[Diagnostic],
    dir: &Path,
    sku_family: &str,
    max_counters: u32,
) -> Result<()> {
    let registry = HypothesisTemplateRegistry::new();
    let constructor = HypothesisConstructor::new(&registry);

    for diag in diagnostics {
        let Some(hypothesis) = constructor.construct(diag) else {
            continue;
        };
        let plan = MeasurementPlanGenerator::generate(&hypothesis, sku_family, max_counters);
        let bundle_dir = dir.join(sanitize(&hypothesis.finding_id));
        let bundle = ExperimentSynthesizer::synthesize(
            &hypothesis,
            &plan,
            &bundle_dir.to_string_lossy(),
        );
        ExperimentSynthesizer::write_to_disk(&bundle)?;
        tracing::debug!(finding = %hypothesis.finding_id, dir = %bundle_dir.display(),
                        "experiment bundle written");
    }
    Ok(())
}

fn sanitize(finding_id: &str) -> String {
    finding_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
