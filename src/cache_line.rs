//! Per-record cache line occupancy model.
//!
//! Computes the exact field-to-line mapping from compiler-reported layout
//! offsets: which cache lines a record touches, which fields straddle a
//! line boundary, and which fields are co-located on one line. Nested
//! record fields are expanded at sub-object granularity so a hazard inside
//! an embedded struct is attributed to the enclosing object's lines.
//!
//! Invariants, for a record of `size` bytes and line width `w`:
//! lines_spanned = ceil(size / w); each field's start line is
//! `offset / w` and end line `(offset + size - 1) / w`; a field appears in
//! every bucket of its line range; the straddling set is exactly the
//! fields whose start and end lines differ.

use crate::ast::{RecordDecl, TranslationUnit};
use crate::escape::{is_atomic_type, is_field_mutable};

/// One field (or nested sub-field) placed on the line grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLineEntry {
    pub name: String,
    /// Absolute byte offset within the outermost record, including base
    /// subobject and enclosing-field offsets.
    pub offset_bytes: u64,
    pub size_bytes: u64,
    pub start_line: u64,
    /// Inclusive.
    pub end_line: u64,
    pub straddles: bool,
    pub is_atomic: bool,
    pub is_mutable: bool,
}

/// All fields mapping to one cache line.
#[derive(Debug, Clone, Default)]
pub struct CacheLineBucket {
    pub line_index: u64,
    /// Indices into [`CacheLineMap::fields`].
    pub fields: Vec<usize>,
    pub atomic_count: u32,
    pub mutable_count: u32,
}

/// An unordered pair of distinct fields sharing at least one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedLinePair {
    pub a: usize,
    pub b: usize,
    pub line_index: u64,
}

#[derive(Debug, Clone)]
pub struct CacheLineMap {
    cache_line_bytes: u64,
    size_bytes: u64,
    lines_spanned: u64,
    total_atomics: u32,
    total_mutables: u32,
    fields: Vec<FieldLineEntry>,
    buckets: Vec<CacheLineBucket>,
}

impl CacheLineMap {
    /// Build the map for a record. Incomplete records produce an empty
    /// map rather than an error; the caller's gate drops them.
    pub fn build(record: &RecordDecl, unit: &TranslationUnit, cache_line_bytes: u64) -> Self {
        let mut map = CacheLineMap {
            cache_line_bytes: cache_line_bytes.max(1),
            size_bytes: 0,
            lines_spanned: 0,
            total_atomics: 0,
            total_mutables: 0,
            fields: Vec::new(),
            buckets: Vec::new(),
        };

        if !record.is_complete {
            return map;
        }

        map.size_bytes = record.size_bytes;
        map.lines_spanned = record.size_bytes.div_ceil(map.cache_line_bytes);
        map.collect_fields(record, unit, 0, &mut Vec::new());
        map.build_buckets();
        map
    }

    pub fn record_size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn lines_spanned(&self) -> u64 {
        self.lines_spanned
    }

    pub fn cache_line_bytes(&self) -> u64 {
        self.cache_line_bytes
    }

    pub fn fields(&self) -> &[FieldLineEntry] {
        &self.fields
    }

    pub fn buckets(&self) -> &[CacheLineBucket] {
        &self.buckets
    }

    pub fn total_atomic_fields(&self) -> u32 {
        self.total_atomics
    }

    pub fn total_mutable_fields(&self) -> u32 {
        self.total_mutables
    }

    /// Fields whose byte range crosses at least one line boundary.
    pub fn straddling_fields(&self) -> Vec<&FieldLineEntry> {
        self.fields.iter().filter(|f| f.straddles).collect()
    }

    /// Unordered pairs of distinct mutable fields sharing a line.
    pub fn mutable_pairs_on_same_line(&self) -> Vec<SharedLinePair> {
        self.pairs_where(|f| f.is_mutable)
    }

    /// Unordered pairs of distinct atomic fields sharing a line.
    pub fn atomic_pairs_on_same_line(&self) -> Vec<SharedLinePair> {
        self.pairs_where(|f| f.is_atomic)
    }

    /// Lines carrying both atomic and non-atomic mutable surface. This is
    /// the mixed write surface that invites false sharing.
    pub fn false_sharing_candidate_lines(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .filter(|b| b.atomic_count > 0 && b.mutable_count > b.atomic_count)
            .map(|b| b.line_index)
            .collect()
    }

    fn pairs_where(&self, pred: impl Fn(&FieldLineEntry) -> bool) -> Vec<SharedLinePair> {
        let mut pairs = Vec::new();
        for bucket in &self.buckets {
            for (i, &fa) in bucket.fields.iter().enumerate() {
                if !pred(&self.fields[fa]) {
                    continue;
                }
                for &fb in &bucket.fields[i + 1..] {
                    if !pred(&self.fields[fb]) {
                        continue;
                    }
                    pairs.push(SharedLinePair {
                        a: fa,
                        b: fb,
                        line_index: bucket.line_index,
                    });
                }
            }
        }
        pairs
    }

    fn collect_fields(
        &mut self,
        record: &RecordDecl,
        unit: &TranslationUnit,
        base_offset: u64,
        visiting: &mut Vec<String>,
    ) {
        if !record.is_complete {
            return;
        }
        if visiting.iter().any(|q| q == &record.qualified_name) {
            return;
        }
        visiting.push(record.qualified_name.clone());

        // Non-virtual bases first, then virtual bases, then direct fields.
        for base in record.bases.iter().filter(|b| !b.is_virtual) {
            if let Some(base_record) = unit.record(&base.record) {
                self.collect_fields(base_record, unit, base_offset + base.offset_bytes, visiting);
            }
        }
        for base in record.bases.iter().filter(|b| b.is_virtual) {
            if let Some(base_record) = unit.record(&base.record) {
                self.collect_fields(base_record, unit, base_offset + base.offset_bytes, visiting);
            }
        }

        for field in &record.fields {
            let Some(field_size) = field.ty.size_bytes else {
                // Incomplete or dependent member type: abstain.
                continue;
            };

            let abs_offset = base_offset + field.offset_bytes;
            let start_line = abs_offset / self.cache_line_bytes;
            let end_byte = abs_offset + field_size;
            let end_line = if end_byte > 0 {
                (end_byte - 1) / self.cache_line_bytes
            } else {
                start_line
            };

            let atomic = is_atomic_type(&field.ty);
            let mutable = is_field_mutable(field.is_mutable_marked, &field.ty);
            if atomic {
                self.total_atomics += 1;
            }
            if mutable {
                self.total_mutables += 1;
            }

            // Expose nested sub-objects at field granularity. Atomic
            // fields are leaves: atomic<T> is one indivisible object.
            if !atomic {
                if let Some(nested) = field.ty.record.as_deref().and_then(|q| unit.record(q)) {
                    if nested.is_complete {
                        self.collect_fields(nested, unit, abs_offset, visiting);
                    }
                }
            }

            self.fields.push(FieldLineEntry {
                name: field.name.clone(),
                offset_bytes: abs_offset,
                size_bytes: field_size,
                start_line,
                end_line,
                straddles: start_line != end_line,
                is_atomic: atomic,
                is_mutable: mutable,
            });
        }

        visiting.pop();
    }

    fn build_buckets(&mut self) {
        if self.lines_spanned == 0 {
            return;
        }
        self.buckets = (0..self.lines_spanned)
            .map(|line_index| CacheLineBucket {
                line_index,
                ..Default::default()
            })
            .collect();

        for (idx, field) in self.fields.iter().enumerate() {
            let last = field.end_line.min(self.lines_spanned - 1);
            for line in field.start_line..=last {
                let bucket = &mut self.buckets[line as usize];
                bucket.fields.push(idx);
                if field.is_atomic {
                    bucket.atomic_count += 1;
                }
                if field.is_mutable {
                    bucket.mutable_count += 1;
                }
            }
        }
    }
}
