//! IR-driven diagnostic refinement.
//!
//! The refiner rewrites AST-derived diagnostics in place using lowered IR
//! profiles: confirming findings at site or function granularity, walking
//! confidence through the named evidence factors, promoting evidence
//! tiers, and, for the stack-frame rule only, suppressing a finding the
//! IR refutes outright. Missing profiles or debug locations never remove
//! a finding.
//!
//! Refinement must run exactly once per diagnostic (escalation traces
//! append); the entry is guarded so a second call is a no-op.

use crate::config::AnalyzerConfig;
use crate::confidence::{apply, Adjustment};
use crate::diagnostic::{evidence_value, Diagnostic};
use crate::ir_analyzer::{AtomicOp, IrFunctionProfile, ProfileMap};
use crate::severity::EvidenceTier;

pub struct DiagnosticRefiner<'a> {
    profiles: &'a ProfileMap,
    config: &'a AnalyzerConfig,
    ran: bool,
}

impl<'a> DiagnosticRefiner<'a> {
    pub fn new(profiles: &'a ProfileMap, config: &'a AnalyzerConfig) -> Self {
        DiagnosticRefiner {
            profiles,
            config,
            ran: false,
        }
    }

    /// Refine every diagnostic in place. Idempotence is enforced by a
    /// run-once guard rather than by content.
    pub fn refine(&mut self, diagnostics: &mut [Diagnostic]) {
        if self.ran {
            tracing::warn!("refiner invoked twice, ignoring second run");
            return;
        }
        self.ran = true;

        for diag in diagnostics.iter_mut() {
            match diag.rule_id.as_str() {
                "FL010" => self.refine_fl010(diag),
                "FL011" => self.refine_fl011(diag),
                "FL012" => self.refine_fl012(diag),
                "FL020" => self.refine_fl020(diag),
                "FL021" => self.refine_fl021(diag),
                "FL030" => self.refine_fl030(diag),
                "FL031" => self.refine_fl031(diag),
                "FL090" => self.refine_fl090(diag),
                _ => {}
            }
        }
    }

    fn function_name_of(diag: &Diagnostic) -> String {
        if !diag.function_name.is_empty() {
            return diag.function_name.clone();
        }
        for key in ["function", "caller"] {
            if let Some(name) = evidence_value(&diag.structural_evidence, key) {
                return name.to_string();
            }
        }
        String::new()
    }

    fn profile_for(&self, diag: &Diagnostic) -> Option<&'a IrFunctionProfile> {
        self.profiles.lookup(&Self::function_name_of(diag))
    }

    fn refine_fl010(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        let site_match = profile.atomics.iter().any(|a| {
            a.is_seq_cst()
                && a.source_line == Some(diag.location.line)
                && a.source_file
                    .as_deref()
                    .map(|f| paths_match(f, &diag.location.file))
                    .unwrap_or(false)
        });

        if site_match {
            apply(diag, Adjustment::site_confirmed());
            diag.evidence_tier = EvidenceTier::Proven;
            diag.escalations.push(format!(
                "IR confirmed: seq_cst instruction at {}:{} after lowering",
                diag.location.file, diag.location.line
            ));
        } else if profile.seq_cst_count > 0 {
            apply(diag, Adjustment::function_confirmed());
            diag.escalations.push(format!(
                "IR confirmed: {} seq_cst instruction(s) emitted in function after lowering",
                profile.seq_cst_count
            ));
        } else if !profile.atomics.is_empty() {
            apply(diag, Adjustment::optimized_away());
            diag.escalations.push(
                "IR refinement: no seq_cst instructions emitted, compiler may have relaxed \
                 the ordering"
                    .to_string(),
            );
        }

        if profile.fence_count > 0 {
            diag.escalations.push(format!(
                "IR confirmed: {} explicit fence instruction(s)",
                profile.fence_count
            ));
        }
    }

    fn refine_fl011(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        let writes: Vec<_> = profile.atomics.iter().filter(|a| a.is_write()).collect();
        if writes.is_empty() {
            return;
        }
        let loop_writes = writes.iter().filter(|a| a.is_in_loop).count();
        let line_matched = writes
            .iter()
            .filter(|a| a.source_line == Some(diag.location.line))
            .count();

        apply(diag, Adjustment::site_confirmed());
        let mut note = format!("IR confirmed: {} atomic write instruction(s)", writes.len());
        if loop_writes > 0 {
            note.push_str(&format!(", {loop_writes} in loop back-edge blocks"));
        }
        if line_matched > 0 {
            note.push_str(&format!(", {line_matched} matched to the reported line"));
        }
        diag.escalations.push(note);
    }

    fn refine_fl012(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        let mutex_calls = profile
            .heap_alloc_calls
            .iter()
            .filter(|c| {
                c.callee_name.contains("pthread_mutex") || c.callee_name.contains("__gthread_mutex")
            })
            .count();
        let cmpxchgs: Vec<_> = profile
            .atomics
            .iter()
            .filter(|a| a.op == AtomicOp::CmpXchg)
            .collect();

        if mutex_calls == 0 && cmpxchgs.is_empty() {
            return;
        }

        apply(diag, Adjustment::lock_confirmed());
        let mut note = String::from("IR confirmed: lock machinery in lowered code (");
        if mutex_calls > 0 {
            note.push_str(&format!("{mutex_calls} mutex call(s)"));
        }
        if !cmpxchgs.is_empty() {
            if mutex_calls > 0 {
                note.push_str(", ");
            }
            note.push_str(&format!("{} cmpxchg(s)", cmpxchgs.len()));
        }
        note.push(')');
        diag.escalations.push(note);

        let line_match = cmpxchgs
            .iter()
            .any(|a| a.source_line == Some(diag.location.line));
        if line_match {
            diag.evidence_tier = EvidenceTier::Proven;
            diag.escalations.push(format!(
                "IR confirmed: cmpxchg at line {} matches the acquisition site",
                diag.location.line
            ));
        }
    }

    fn refine_fl020(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        let direct: Vec<_> = profile
            .heap_alloc_calls
            .iter()
            .filter(|c| !c.is_indirect)
            .collect();

        if !direct.is_empty() {
            let loop_calls = direct.iter().filter(|c| c.is_in_loop).count();
            apply(diag, Adjustment::heap_survived());
            let mut note = format!(
                "IR confirmed: {} heap alloc/free call(s) after inlining",
                direct.len()
            );
            if loop_calls > 0 {
                note.push_str(&format!(", {loop_calls} in loop blocks"));
            }
            diag.escalations.push(note);
        } else {
            apply(diag, Adjustment::heap_eliminated());
            diag.escalations.push(
                "IR refinement: no heap alloc calls found after inlining, allocation may \
                 have been optimized away"
                    .to_string(),
            );
        }
    }

    fn refine_fl021(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        let ir_bytes = profile.total_alloca_bytes;

        // The one suppression rule in the refiner: IR-precise frame below
        // the warn threshold refutes the AST estimate.
        if ir_bytes < self.config.stack_frame_warn_bytes {
            diag.suppressed = true;
            diag.escalations.push(format!(
                "IR refinement: lowered stack frame is {ir_bytes}B, below the {}B threshold; \
                 AST estimate was conservative",
                self.config.stack_frame_warn_bytes
            ));
            return;
        }

        apply(diag, Adjustment::stack_confirmed());
        diag.evidence_tier = EvidenceTier::Proven;

        let mut note = format!(
            "IR confirmed: stack frame {ir_bytes}B from {} alloca(s)",
            profile.allocas.len()
        );
        for alloca in &profile.allocas {
            if alloca.size_bytes >= self.config.alloc_size_escalation {
                note.push_str(&format!(" [{}={}B]", alloca.name, alloca.size_bytes));
            }
        }
        diag.escalations.push(note);

        let ast_estimate = diag.evidence_number("estimated_frame").unwrap_or(0.0) as u64;
        diag.push_evidence("ir_frame", format!("{ir_bytes}B"));
        diag.push_evidence("ir_allocas", profile.allocas.len());

        if ast_estimate > 0 && ir_bytes > ast_estimate * 2 {
            diag.escalations.push(format!(
                "IR stack frame ({ir_bytes}B) exceeds AST estimate ({ast_estimate}B): \
                 compiler-generated temporaries or alignment padding"
            ));
        }
    }

    fn refine_fl030(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        if profile.indirect_call_count > 0 {
            apply(diag, Adjustment::indirect_confirmed());
            diag.escalations.push(format!(
                "IR confirmed: {} indirect call(s) remain after devirtualization",
                profile.indirect_call_count
            ));
        } else if profile.direct_call_count > 0 {
            apply(diag, Adjustment::fully_devirtualized());
            diag.escalations.push(
                "IR refinement: all calls devirtualized to direct, BTB pressure eliminated \
                 by the compiler"
                    .to_string(),
            );
        }
    }

    fn refine_fl031(&self, diag: &mut Diagnostic) {
        let Some(profile) = self.profile_for(diag) else {
            return;
        };

        if profile.indirect_call_count > 0 {
            apply(diag, Adjustment::indirect_confirmed());
            diag.escalations.push(format!(
                "IR confirmed: {} indirect call(s) through type-erased storage remain",
                profile.indirect_call_count
            ));
        } else {
            apply(diag, Adjustment::optimized_away_indirect());
            diag.escalations.push(
                "IR refinement: no indirect calls remain, wrapper likely inlined away"
                    .to_string(),
            );
        }
    }

    fn refine_fl090(&self, diag: &mut Diagnostic) {
        let mut atomic_writes = 0usize;
        let mut indirect_calls = 0u32;
        let mut fences = 0u32;
        for profile in self.profiles.iter() {
            atomic_writes += profile.atomics.iter().filter(|a| a.is_write()).count();
            indirect_calls += profile.indirect_call_count;
            fences += profile.fence_count;
        }
        if atomic_writes == 0 && indirect_calls == 0 && fences == 0 {
            return;
        }
        diag.escalations.push(format!(
            "IR module aggregate: {atomic_writes} atomic write(s), {indirect_calls} indirect \
             call(s), {fences} fence(s) across profiled functions"
        ));
    }
}

/// Suffix path comparison at a component boundary: `src/hot.cpp` matches
/// `hot.cpp` and `/build/src/hot.cpp`, but `shot.cpp` does not.
fn paths_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    match long.strip_suffix(short) {
        Some(prefix) => prefix.ends_with('/') || prefix.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_suffix_match_respects_component_boundaries() {
        assert!(paths_match("src/hot.cpp", "hot.cpp"));
        assert!(paths_match("hot.cpp", "/build/src/hot.cpp"));
        assert!(paths_match("hot.cpp", "hot.cpp"));
        assert!(!paths_match("shot.cpp", "hot.cpp"));
        assert!(!paths_match("src/hot.cpp", "cold.cpp"));
    }
}
