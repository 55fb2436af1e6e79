//! The analysis driver: walks translation units and dispatches every
//! registered rule over every non-system declaration.
//!
//! Two passes per unit. The first touches every function through the
//! hot-path oracle so annotation-driven hot marks are cached before any
//! rule runs; the second runs the rules. Diagnostics are produced in
//! (rule-registration-order x traversal-order), which keeps output
//! stable across runs on identical input.

use crate::ast::TranslationUnit;
use crate::config::AnalyzerConfig;
use crate::diagnostic::Diagnostic;
use crate::hotpath::HotPathOracle;
use crate::rules::{all_rules, Decl, Rule};

pub struct AnalysisDriver {
    config: AnalyzerConfig,
    oracle: HotPathOracle,
    rules: Vec<Box<dyn Rule>>,
}

impl AnalysisDriver {
    pub fn new(config: AnalyzerConfig) -> Self {
        let oracle = HotPathOracle::new(&config);
        let rules = all_rules()
            .into_iter()
            .filter(|r| !config.is_rule_disabled(r.id()))
            .collect();
        AnalysisDriver {
            config,
            oracle,
            rules,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn oracle(&self) -> &HotPathOracle {
        &self.oracle
    }

    /// Analyze one translation unit, appending to the shared list.
    pub fn analyze_unit(&self, unit: &TranslationUnit, diagnostics: &mut Vec<Diagnostic>) {
        // Warm the hot-path memo before rules consult it.
        for function in &unit.functions {
            if function.in_system_header {
                continue;
            }
            self.oracle.is_function_hot(function);
        }

        let decls: Vec<Decl<'_>> = unit
            .records
            .iter()
            .map(Decl::Record)
            .chain(unit.functions.iter().map(Decl::Function))
            .chain(unit.globals.iter().map(Decl::Var))
            .collect();

        for decl in &decls {
            if decl.in_system_header() {
                continue;
            }
            for rule in &self.rules {
                rule.analyze(decl, unit, &self.oracle, &self.config, diagnostics);
            }
        }
    }

    /// Analyze a batch of units into a fresh diagnostic list.
    pub fn analyze(&self, units: &[TranslationUnit]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for unit in units {
            self.analyze_unit(unit, &mut diagnostics);
        }
        diagnostics
    }
}
