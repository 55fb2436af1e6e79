//! Frontend-neutral declaration model.
//!
//! The analyzer core never links against a compiler. A compiler-side
//! exporter walks the real AST and serializes one document per translation
//! unit: records with layout offsets, functions with statement trees, and
//! globals, each tagged with source locations and system-header flags.
//! This module is that document's schema plus the traversal helpers the
//! rules build on.
//!
//! Type identity is structural: a `TypeRef` carries the primary template's
//! qualified name when the type is a class template specialization, so
//! predicates compare against `std::atomic` rather than substring-matching
//! a stringified type.

use serde::{Deserialize, Serialize};

pub use crate::diagnostic::SourceLoc;

/// A resolved type reference with the layout and qualifier facts the
/// rules need. `size_bytes` is `None` for incomplete or dependent types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRef {
    /// Canonical spelled name, e.g. `std::atomic<unsigned long>`.
    pub name: String,
    pub size_bytes: Option<u64>,
    pub is_const: bool,
    pub is_volatile: bool,
    /// C11 `_Atomic` qualifier.
    pub is_atomic_qualified: bool,
    pub is_pointer: bool,
    pub is_reference: bool,
    pub is_incomplete: bool,
    pub is_dependent: bool,
    pub is_function_pointer: bool,
    /// Qualified name of the primary template when this is a class
    /// template specialization, e.g. `std::atomic`.
    pub template: Option<String>,
    /// Qualified name of the record declaration when this is a record
    /// type, resolvable through [`TranslationUnit::record`].
    pub record: Option<String>,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn sized(name: impl Into<String>, size_bytes: u64) -> Self {
        TypeRef {
            name: name.into(),
            size_bytes: Some(size_bytes),
            ..Default::default()
        }
    }

    /// A `std::atomic<inner>` specialization of the given size.
    pub fn atomic_of(inner: &str, size_bytes: u64) -> Self {
        TypeRef {
            name: format!("std::atomic<{inner}>"),
            size_bytes: Some(size_bytes),
            template: Some("std::atomic".to_string()),
            ..Default::default()
        }
    }

    /// A record type by qualified name, resolvable in the unit.
    pub fn record_of(qualified: &str, size_bytes: u64) -> Self {
        TypeRef {
            name: qualified.to_string(),
            size_bytes: Some(size_bytes),
            record: Some(qualified.to_string()),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }
}

/// A base class subobject with its offset inside the enclosing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseSpec {
    /// Qualified name of the base record declaration.
    pub record: String,
    pub offset_bytes: u64,
    pub is_virtual: bool,
}

impl Default for BaseSpec {
    fn default() -> Self {
        BaseSpec {
            record: String::new(),
            offset_bytes: 0,
            is_virtual: false,
        }
    }
}

/// One field with its compiler-reported byte offset (including base
/// subobject offsets when the exporter flattens derived layouts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub offset_bytes: u64,
    /// Explicit `mutable` keyword on the member.
    pub is_mutable_marked: bool,
}

impl Default for FieldDecl {
    fn default() -> Self {
        FieldDecl {
            name: String::new(),
            ty: TypeRef::default(),
            offset_bytes: 0,
            is_mutable_marked: false,
        }
    }
}

impl FieldDecl {
    pub fn at(name: &str, ty: TypeRef, offset_bytes: u64) -> Self {
        FieldDecl {
            name: name.to_string(),
            ty,
            offset_bytes,
            is_mutable_marked: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordDecl {
    pub name: String,
    pub qualified_name: String,
    pub loc: SourceLoc,
    pub in_system_header: bool,
    pub is_complete: bool,
    pub is_implicit: bool,
    pub is_lambda: bool,
    /// Total object size from the record layout.
    pub size_bytes: u64,
    pub bases: Vec<BaseSpec>,
    /// Direct fields in declaration order.
    pub fields: Vec<FieldDecl>,
}

impl Default for RecordDecl {
    fn default() -> Self {
        RecordDecl {
            name: String::new(),
            qualified_name: String::new(),
            loc: SourceLoc::default(),
            in_system_header: false,
            is_complete: true,
            is_implicit: false,
            is_lambda: false,
            size_bytes: 0,
            bases: Vec::new(),
            fields: Vec::new(),
        }
    }
}

impl RecordDecl {
    pub fn sized(name: &str, size_bytes: u64, fields: Vec<FieldDecl>) -> Self {
        RecordDecl {
            name: name.to_string(),
            qualified_name: name.to_string(),
            size_bytes,
            fields,
            ..Default::default()
        }
    }
}

/// A local variable inside a declaration statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalVar {
    pub name: String,
    pub ty: TypeRef,
    pub has_local_storage: bool,
}

impl Default for LocalVar {
    fn default() -> Self {
        LocalVar {
            name: String::new(),
            ty: TypeRef::default(),
            has_local_storage: true,
        }
    }
}

/// Statement and expression tree. Only the node kinds the rules inspect
/// are modeled; everything else arrives as `Other` with its children
/// preserved so traversal never loses sites nested in unmodeled syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Compound {
        #[serde(default)]
        stmts: Vec<Stmt>,
    },
    If {
        #[serde(default)]
        loc: SourceLoc,
        #[serde(default)]
        then_branch: Vec<Stmt>,
        #[serde(default)]
        else_branch: Vec<Stmt>,
    },
    For {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    While {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Do {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    RangeFor {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Switch {
        #[serde(default)]
        loc: SourceLoc,
        #[serde(default)]
        cases: u32,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    DeclStmt {
        #[serde(default)]
        vars: Vec<LocalVar>,
    },
    /// A member call with its resolved method and receiver facts.
    MemberCall {
        #[serde(default)]
        loc: SourceLoc,
        method: String,
        /// Qualified name of the class declaring the method.
        #[serde(default)]
        class_qualified: String,
        #[serde(default)]
        receiver_ty: TypeRef,
        /// Member or variable name of the receiver when resolvable.
        #[serde(default)]
        receiver_name: Option<String>,
        #[serde(default)]
        is_virtual: bool,
        /// Declaration names of memory-order arguments, when any argument
        /// is a direct reference to a named constant.
        #[serde(default)]
        order_args: Vec<String>,
        #[serde(default)]
        args: Vec<Stmt>,
    },
    Call {
        #[serde(default)]
        loc: SourceLoc,
        /// Qualified name of the direct callee, `None` for indirect calls.
        #[serde(default)]
        callee: Option<String>,
        /// Type of the callee expression, for calls through variables.
        #[serde(default)]
        callee_ty: Option<TypeRef>,
        #[serde(default)]
        args: Vec<Stmt>,
    },
    /// Overloaded operator call; `op` is the token, e.g. `++` or `+=`.
    OperatorCall {
        #[serde(default)]
        loc: SourceLoc,
        op: String,
        #[serde(default)]
        receiver_ty: TypeRef,
        #[serde(default)]
        receiver_name: Option<String>,
        #[serde(default)]
        args: Vec<Stmt>,
    },
    Construct {
        #[serde(default)]
        loc: SourceLoc,
        #[serde(default)]
        ty: TypeRef,
    },
    New {
        #[serde(default)]
        loc: SourceLoc,
        #[serde(default)]
        is_array: bool,
    },
    Delete {
        #[serde(default)]
        loc: SourceLoc,
    },
    Other {
        #[serde(default)]
        children: Vec<Stmt>,
    },
}

impl Stmt {
    /// Child statements in source order, including call arguments.
    pub fn children(&self) -> Vec<&Stmt> {
        match self {
            Stmt::Compound { stmts } => stmts.iter().collect(),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => then_branch.iter().chain(else_branch.iter()).collect(),
            Stmt::For { body }
            | Stmt::While { body }
            | Stmt::Do { body }
            | Stmt::RangeFor { body } => body.iter().collect(),
            Stmt::Switch { body, .. } => body.iter().collect(),
            Stmt::MemberCall { args, .. }
            | Stmt::Call { args, .. }
            | Stmt::OperatorCall { args, .. } => args.iter().collect(),
            Stmt::Other { children } => children.iter().collect(),
            Stmt::DeclStmt { .. }
            | Stmt::Construct { .. }
            | Stmt::New { .. }
            | Stmt::Delete { .. } => Vec::new(),
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Stmt::For { .. } | Stmt::While { .. } | Stmt::Do { .. } | Stmt::RangeFor { .. }
        )
    }
}

/// Traversal context threaded through [`walk`]. `loop_depth` counts
/// enclosing loop statements; `if_depth` counts enclosing `if` statements
/// including the one currently being visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkContext {
    pub loop_depth: u32,
    pub if_depth: u32,
}

/// Preorder traversal over a statement list with loop and branch depth
/// tracking. The callback sees every node exactly once.
pub fn walk(body: &[Stmt], f: &mut impl FnMut(&Stmt, WalkContext)) {
    let mut ctx = WalkContext::default();
    for stmt in body {
        walk_inner(stmt, &mut ctx, f);
    }
}

fn walk_inner(stmt: &Stmt, ctx: &mut WalkContext, f: &mut impl FnMut(&Stmt, WalkContext)) {
    match stmt {
        Stmt::If { .. } => {
            ctx.if_depth += 1;
            f(stmt, *ctx);
            for child in stmt.children() {
                walk_inner(child, ctx, f);
            }
            ctx.if_depth -= 1;
        }
        _ if stmt.is_loop() => {
            f(stmt, *ctx);
            ctx.loop_depth += 1;
            for child in stmt.children() {
                walk_inner(child, ctx, f);
            }
            ctx.loop_depth -= 1;
        }
        _ => {
            f(stmt, *ctx);
            for child in stmt.children() {
                walk_inner(child, ctx, f);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeRef,
}

impl Default for ParamDecl {
    fn default() -> Self {
        ParamDecl {
            name: String::new(),
            ty: TypeRef::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionDecl {
    pub name: String,
    pub qualified_name: String,
    /// Linker-level name used for IR profile correlation.
    pub mangled_name: String,
    pub loc: SourceLoc,
    pub in_system_header: bool,
    /// Annotation attribute payloads, e.g. `faultline_hot`.
    pub annotations: Vec<String>,
    pub params: Vec<ParamDecl>,
    pub body: Option<Vec<Stmt>>,
}

impl Default for FunctionDecl {
    fn default() -> Self {
        FunctionDecl {
            name: String::new(),
            qualified_name: String::new(),
            mangled_name: String::new(),
            loc: SourceLoc::default(),
            in_system_header: false,
            annotations: Vec::new(),
            params: Vec::new(),
            body: None,
        }
    }
}

impl FunctionDecl {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeRef,
    pub loc: SourceLoc,
    pub in_system_header: bool,
    pub has_global_storage: bool,
    pub is_thread_local: bool,
}

impl Default for VarDecl {
    fn default() -> Self {
        VarDecl {
            name: String::new(),
            ty: TypeRef::default(),
            loc: SourceLoc::default(),
            in_system_header: false,
            has_global_storage: false,
            is_thread_local: false,
        }
    }
}

/// One exported translation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationUnit {
    pub source_file: String,
    pub records: Vec<RecordDecl>,
    pub functions: Vec<FunctionDecl>,
    pub globals: Vec<VarDecl>,
}

impl TranslationUnit {
    /// Resolve a record declaration by qualified name. Used to recurse
    /// into nested record fields and base subobjects.
    pub fn record(&self, qualified_name: &str) -> Option<&RecordDecl> {
        self.records
            .iter()
            .find(|r| r.qualified_name == qualified_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_tracks_loop_depth_through_call_arguments() {
        let body = vec![Stmt::For {
            body: vec![Stmt::MemberCall {
                loc: SourceLoc::default(),
                method: "store".into(),
                class_qualified: "std::atomic".into(),
                receiver_ty: TypeRef::atomic_of("unsigned long", 8),
                receiver_name: Some("seq".into()),
                is_virtual: false,
                order_args: vec![],
                args: vec![Stmt::MemberCall {
                    loc: SourceLoc::default(),
                    method: "load".into(),
                    class_qualified: "std::atomic".into(),
                    receiver_ty: TypeRef::atomic_of("unsigned long", 8),
                    receiver_name: Some("seq".into()),
                    is_virtual: false,
                    order_args: vec![],
                    args: vec![],
                }],
            }],
        }];

        let mut seen = Vec::new();
        walk(&body, &mut |stmt, ctx| {
            if let Stmt::MemberCall { method, .. } = stmt {
                seen.push((method.clone(), ctx.loop_depth));
            }
        });

        assert_eq!(seen, vec![("store".to_string(), 1), ("load".to_string(), 1)]);
    }

    #[test]
    fn walk_counts_if_nesting_inclusively() {
        let body = vec![Stmt::If {
            loc: SourceLoc::default(),
            then_branch: vec![Stmt::If {
                loc: SourceLoc::default(),
                then_branch: vec![],
                else_branch: vec![],
            }],
            else_branch: vec![],
        }];

        let mut max_depth = 0;
        walk(&body, &mut |stmt, ctx| {
            if matches!(stmt, Stmt::If { .. }) {
                max_depth = max_depth.max(ctx.if_depth);
            }
        });
        assert_eq!(max_depth, 2);
    }

    #[test]
    fn unit_resolves_records_by_qualified_name() {
        let unit = TranslationUnit {
            source_file: "a.cpp".into(),
            records: vec![RecordDecl::sized("engine::Order", 64, vec![])],
            functions: vec![],
            globals: vec![],
        };
        assert!(unit.record("engine::Order").is_some());
        assert!(unit.record("Order").is_none());
    }

    #[test]
    fn translation_unit_deserializes_from_terse_json() {
        let doc = r#"{
            "source_file": "hot.cpp",
            "functions": [{
                "name": "publish",
                "qualified_name": "md::publish",
                "annotations": ["faultline_hot"],
                "body": [
                    {"kind": "for", "body": [
                        {"kind": "new", "loc": {"file": "hot.cpp", "line": 9}}
                    ]}
                ]
            }]
        }"#;
        let unit: TranslationUnit = serde_json::from_str(doc).unwrap();
        assert_eq!(unit.functions.len(), 1);
        assert!(unit.functions[0].has_body());
    }
}
