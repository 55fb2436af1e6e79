//! Hot-path classification.
//!
//! A function is hot when it carries the `faultline_hot` annotation, when
//! its qualified name matches a configured glob, or when its source file
//! path matches a configured glob. Decisions are memoized per oracle
//! instance; the driver owns the oracle so the memo set never outlives a
//! translation unit batch.

use crate::ast::FunctionDecl;
use crate::config::AnalyzerConfig;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::cell::RefCell;
use std::collections::HashSet;

pub const HOT_ANNOTATION: &str = "faultline_hot";

pub struct HotPathOracle {
    function_globs: GlobSet,
    file_globs: GlobSet,
    hot_cache: RefCell<HashSet<String>>,
}

impl HotPathOracle {
    pub fn new(config: &AnalyzerConfig) -> Self {
        HotPathOracle {
            function_globs: compile_globs(&config.hot_function_patterns),
            file_globs: compile_globs(&config.hot_file_patterns),
            hot_cache: RefCell::new(HashSet::new()),
        }
    }

    /// Seed the memo set, e.g. from profile-guided external hints.
    pub fn mark_hot(&self, qualified_name: &str) {
        self.hot_cache.borrow_mut().insert(qualified_name.to_string());
    }

    pub fn is_function_hot(&self, function: &FunctionDecl) -> bool {
        if self.hot_cache.borrow().contains(&function.qualified_name) {
            return true;
        }
        if self.has_hot_annotation(function) || self.matches_config_pattern(function) {
            self.mark_hot(&function.qualified_name);
            return true;
        }
        false
    }

    fn has_hot_annotation(&self, function: &FunctionDecl) -> bool {
        function.annotations.iter().any(|a| a == HOT_ANNOTATION)
    }

    fn matches_config_pattern(&self, function: &FunctionDecl) -> bool {
        if self.function_globs.is_match(&function.qualified_name) {
            return true;
        }
        if function.loc.is_valid() && self.file_globs.is_match(&function.loc.file) {
            return true;
        }
        false
    }
}

fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "ignoring invalid hot-path glob");
            }
        }
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "hot-path glob set failed to build, matching nothing");
        GlobSet::empty()
    })
}
