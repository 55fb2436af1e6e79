//! Execution metadata attached to machine-readable output envelopes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerInfo {
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionMetadata {
    pub tool_version: String,
    pub config_path: String,
    pub ir_opt_level: String,
    pub ir_enabled: bool,
    pub timestamp_epoch_sec: u64,
    pub source_files: Vec<String>,
    pub compilers: Vec<CompilerInfo>,
}

impl ExecutionMetadata {
    pub fn now(config_path: &str, ir_enabled: bool, source_files: Vec<String>) -> Self {
        ExecutionMetadata {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            config_path: config_path.to_string(),
            ir_opt_level: "O2".to_string(),
            ir_enabled,
            timestamp_epoch_sec: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            source_files,
            compilers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_captures_version_and_sources() {
        let meta = ExecutionMetadata::now("falla.toml", true, vec!["a.cpp".into()]);
        assert_eq!(meta.tool_version, env!("CARGO_PKG_VERSION"));
        assert!(meta.ir_enabled);
        assert_eq!(meta.source_files, vec!["a.cpp"]);
        assert!(meta.timestamp_epoch_sec > 0);
    }
}
