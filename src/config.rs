//! Analyzer configuration.
//!
//! Loaded from a TOML file; every key has a default so a partial file is
//! valid. A malformed or missing file is a recoverable condition: the
//! analyzer logs a warning and continues with defaults.

use crate::severity::Severity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Coherence unit width used by the cache line model.
    pub cache_line_bytes: u64,
    /// FL001 warn threshold in bytes (informational only).
    pub cache_line_span_warn: u64,
    /// FL001 critical threshold in bytes (informational only).
    pub cache_line_span_crit: u64,
    /// FL021 warn threshold; also the IR suppression threshold.
    pub stack_frame_warn_bytes: u64,
    /// FL021 large-local threshold in bytes.
    pub alloc_size_escalation: u64,
    /// FL050 if-nesting threshold.
    pub branch_depth_warn: u32,
    /// Findings below this severity are dropped at the output boundary.
    pub min_severity: Severity,
    /// Select the JSON formatter instead of the text report.
    pub json_output: bool,
    /// Output destination; empty means standard output.
    pub output_file: String,
    /// Glob patterns over qualified function names classified as hot.
    pub hot_function_patterns: Vec<String>,
    /// Glob patterns over source file paths classified as hot.
    pub hot_file_patterns: Vec<String>,
    /// Rule IDs to skip entirely.
    pub disabled_rules: Vec<String>,
    /// Page size used for FL021 page-span reasoning.
    pub page_size: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cache_line_bytes: 64,
            cache_line_span_warn: 64,
            cache_line_span_crit: 128,
            stack_frame_warn_bytes: 2048,
            alloc_size_escalation: 256,
            branch_depth_warn: 4,
            min_severity: Severity::Informational,
            json_output: false,
            output_file: String::new(),
            hot_function_patterns: Vec::new(),
            hot_file_patterns: Vec::new(),
            disabled_rules: Vec::new(),
            page_size: 4096,
        }
    }
}

impl AnalyzerConfig {
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Strict load, for callers that want the parse error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let config: AnalyzerConfig =
            toml::from_str(&content).context("failed to parse analyzer config")?;
        Ok(config)
    }

    /// Lenient load used by the driver: falls back to defaults on any
    /// error so one bad config file never blocks an analysis run.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %err,
                    "config load failed, continuing with defaults"
                );
                Self::default()
            }
        }
    }

    pub fn is_rule_disabled(&self, rule_id: &str) -> bool {
        self.disabled_rules.iter().any(|r| r == rule_id)
    }
}
