//! falla - Structural latency hazard analyzer
//!
//! This library detects source-level patterns whose lowered machine
//! behavior degrades tail latency on cache-coherent multicore CPUs. It
//! models per-record cache line occupancy, runs a registry of structural
//! rules over exported ASTs, refines findings against lowered IR
//! profiles, and synthesizes falsifiable latency hypotheses with PMU
//! measurement plans so downstream experiments can confirm or refute
//! each finding.

pub mod ast;
pub mod cache_line;
pub mod cli;
pub mod config;
pub mod confidence;
pub mod diagnostic;
pub mod driver;
pub mod escape;
pub mod experiment;
pub mod hazard;
pub mod hotpath;
pub mod hypothesis;
pub mod ingest;
pub mod ir;
pub mod ir_analyzer;
pub mod json_output;
pub mod metadata;
pub mod refiner;
pub mod rules;
pub mod sarif_output;
pub mod severity;
pub mod text_output;
