//! Conservative thread-escape classification.
//!
//! A record type is treated as thread-escaping when it recursively
//! contains anything that only makes sense under multi-thread access: an
//! atomic member, a synchronization primitive, a shared-ownership smart
//! pointer, or a volatile member. The predicate is deliberately biased
//! toward reporting; it never proves confinement.
//!
//! Matching is structural. Standard library templates are recognized by
//! the primary template's qualified name carried on the type reference.
//! The only string fallback is for the POSIX C types, which have no
//! record declaration to resolve.

use crate::ast::{RecordDecl, TranslationUnit, TypeRef, VarDecl};

const SYNC_TEMPLATES: &[&str] = &["std::counting_semaphore", "std::barrier"];

const SYNC_RECORDS: &[&str] = &[
    "std::mutex",
    "std::recursive_mutex",
    "std::shared_mutex",
    "std::timed_mutex",
    "std::recursive_timed_mutex",
    "std::shared_timed_mutex",
    "std::condition_variable",
    "std::condition_variable_any",
    "std::binary_semaphore",
    "std::latch",
    "std::barrier",
];

const POSIX_SYNC_NAMES: &[&str] = &[
    "pthread_mutex_t",
    "pthread_spinlock_t",
    "pthread_rwlock_t",
    "pthread_cond_t",
    "sem_t",
];

/// Atomicity: the C `_Atomic` qualifier, or an instantiation of
/// `std::atomic` / `std::atomic_ref`.
pub fn is_atomic_type(ty: &TypeRef) -> bool {
    if ty.is_atomic_qualified {
        return true;
    }
    matches!(
        ty.template.as_deref(),
        Some("std::atomic") | Some("std::atomic_ref")
    )
}

pub fn is_sync_type(ty: &TypeRef) -> bool {
    if let Some(template) = ty.template.as_deref() {
        if SYNC_TEMPLATES.contains(&template) {
            return true;
        }
    }
    if let Some(record) = ty.record.as_deref() {
        if SYNC_RECORDS.contains(&record) {
            return true;
        }
    }
    // POSIX sync types are plain C structs with no resolvable record decl.
    POSIX_SYNC_NAMES.iter().any(|n| ty.name.contains(n))
}

pub fn is_shared_ownership_type(ty: &TypeRef) -> bool {
    matches!(
        ty.template.as_deref(),
        Some("std::shared_ptr") | Some("std::weak_ptr")
    )
}

/// Callback detection: raw function pointers and `std::function`. Kept
/// separate from the escape rollup; only rules that need callback
/// evidence consult it.
pub fn is_callback_type(ty: &TypeRef) -> bool {
    ty.is_function_pointer || ty.template.as_deref() == Some("std::function")
}

pub fn is_std_function_type(ty: &TypeRef) -> bool {
    ty.template.as_deref() == Some("std::function")
}

/// Field mutability: explicitly `mutable`, or a non-const type.
pub fn is_field_mutable(is_mutable_marked: bool, ty: &TypeRef) -> bool {
    is_mutable_marked || !ty.is_const
}

/// Type-level predicate helpers over a record, traversing bases. The
/// recursion guard keeps self-referential record graphs from looping.
pub struct EscapeAnalysis<'a> {
    unit: &'a TranslationUnit,
}

impl<'a> EscapeAnalysis<'a> {
    pub fn new(unit: &'a TranslationUnit) -> Self {
        EscapeAnalysis { unit }
    }

    pub fn has_atomic_members(&self, record: &RecordDecl) -> bool {
        self.any_member(record, &mut Vec::new(), &is_atomic_type)
    }

    pub fn has_sync_primitives(&self, record: &RecordDecl) -> bool {
        self.any_member(record, &mut Vec::new(), &is_sync_type)
    }

    pub fn has_shared_ownership_members(&self, record: &RecordDecl) -> bool {
        self.any_member(record, &mut Vec::new(), &is_shared_ownership_type)
    }

    pub fn has_volatile_members(&self, record: &RecordDecl) -> bool {
        self.any_member(record, &mut Vec::new(), &|ty: &TypeRef| ty.is_volatile)
    }

    pub fn has_callback_members(&self, record: &RecordDecl) -> bool {
        self.any_member(record, &mut Vec::new(), &is_callback_type)
    }

    /// May this record plausibly participate in multi-thread access?
    pub fn may_escape_thread(&self, record: &RecordDecl) -> bool {
        self.has_atomic_members(record)
            || self.has_sync_primitives(record)
            || self.has_shared_ownership_members(record)
            || self.has_volatile_members(record)
    }

    /// Global storage, non-const, and not thread-local.
    pub fn is_global_shared_mutable(&self, var: &VarDecl) -> bool {
        var.has_global_storage && !var.ty.is_const && !var.is_thread_local
    }

    fn any_member(
        &self,
        record: &RecordDecl,
        visiting: &mut Vec<String>,
        pred: &dyn Fn(&TypeRef) -> bool,
    ) -> bool {
        if !record.is_complete {
            return false;
        }
        if visiting.iter().any(|q| q == &record.qualified_name) {
            return false;
        }
        visiting.push(record.qualified_name.clone());

        for field in &record.fields {
            if pred(&field.ty) {
                visiting.pop();
                return true;
            }
            // Recurse through nested record fields, atomics excepted: an
            // atomic<T> member is a leaf regardless of T's contents.
            if !is_atomic_type(&field.ty) {
                if let Some(nested) = field.ty.record.as_deref().and_then(|q| self.unit.record(q))
                {
                    if self.any_member(nested, visiting, pred) {
                        visiting.pop();
                        return true;
                    }
                }
            }
        }

        for base in &record.bases {
            if let Some(base_record) = self.unit.record(&base.record) {
                if self.any_member(base_record, visiting, pred) {
                    visiting.pop();
                    return true;
                }
            }
        }

        visiting.pop();
        false
    }
}
