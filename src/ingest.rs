//! Input ingestion for exported AST and IR documents.

use crate::ast::TranslationUnit;
use crate::ir::IrModule;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn read(path: &Path) -> Result<String, IngestError> {
    fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_translation_unit(path: &Path) -> Result<TranslationUnit, IngestError> {
    let content = read(path)?;
    serde_json::from_str(&content).map_err(|source| IngestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_ir_module(path: &Path) -> Result<IrModule, IngestError> {
    let content = read(path)?;
    serde_json::from_str(&content).map_err(|source| IngestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
