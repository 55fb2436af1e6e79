//! CLI argument parsing for falla.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text report (default).
    Text,
    /// JSON envelope for machine consumption.
    Json,
    /// SARIF 2.1.0 for code-review integrations.
    Sarif,
}

#[derive(Parser, Debug)]
#[command(name = "falla")]
#[command(version)]
#[command(
    about = "Structural latency hazard analyzer with falsifiable measurement plans",
    long_about = None
)]
pub struct Cli {
    /// Exported translation unit documents (JSON), one per source file
    pub inputs: Vec<PathBuf>,

    /// Analyzer configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Exported lowered IR documents (JSON) for refinement
    #[arg(long = "ir", value_name = "FILE")]
    pub ir_inputs: Vec<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Output destination; standard output when omitted
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Minimum severity to report (informational, medium, high, critical)
    #[arg(long = "min-severity", value_name = "SEV")]
    pub min_severity: Option<String>,

    /// Glob over qualified function names to classify as hot (repeatable)
    #[arg(long = "hot-function", value_name = "GLOB")]
    pub hot_functions: Vec<String>,

    /// Glob over source file paths to classify as hot (repeatable)
    #[arg(long = "hot-file", value_name = "GLOB")]
    pub hot_files: Vec<String>,

    /// Rule IDs to disable (repeatable)
    #[arg(long = "disable", value_name = "RULE")]
    pub disabled_rules: Vec<String>,

    /// Synthesize experiment bundles for surviving findings under DIR
    #[arg(long = "experiments-dir", value_name = "DIR")]
    pub experiments_dir: Option<PathBuf>,

    /// Calibration store used to drop known-false-positive findings
    #[arg(long = "calibration-store", value_name = "FILE")]
    pub calibration_store: Option<PathBuf>,

    /// Target SKU family recorded in measurement plans
    #[arg(long = "sku-family", value_name = "SKU", default_value = "generic")]
    pub sku_family: String,

    /// Programmable PMU counters available per group
    #[arg(long = "max-counters", value_name = "N", default_value = "4")]
    pub max_counters: u32,
}
