//! High-level IR: tree-shaped nodes with resolved names and explicit
//! control-flow constructs.
//!
//! The front end (out of scope here) produces an owned [`HirModule`]; the
//! [`resolver`] pass then assigns `(depth, slot)` indices to identifier
//! references inside function and lambda bodies and moves every body into the
//! module's lambda table, after which the module is frozen behind an `Arc`
//! and executed by [`eval`].

pub mod eval;
pub mod resolver;

use std::sync::Arc;

use crate::{
    errors::CodeLoc,
    ops::{BinOp, UnOp},
    types::Visibility,
};

/// Source position of a node, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub line: u32,
    pub column: u32,
}

impl Loc {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn code_loc(self, file: Option<&Arc<str>>) -> CodeLoc {
        CodeLoc {
            file: file.cloned(),
            line: self.line,
            column: self.column,
        }
    }
}

/// Index into [`HirModule::lambdas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LambdaId(pub u32);

impl LambdaId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A complete HIR program unit.
#[derive(Debug, Default)]
pub struct HirModule {
    pub name: Arc<str>,
    pub file: Option<Arc<str>>,
    /// Module-level statements and declarations, executed in order.
    pub body: Vec<Stmt>,
    /// Function and lambda bodies, extracted by the resolver pass so closures
    /// can reference them by id instead of cloning subtrees.
    pub lambdas: Vec<LambdaDef>,
}

impl HirModule {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn lambda(&self, id: LambdaId) -> &LambdaDef {
        &self.lambdas[id.index()]
    }
}

/// An extracted function or lambda body.
#[derive(Debug)]
pub struct LambdaDef {
    pub name: Arc<str>,
    pub params: Vec<Param>,
    pub body: Block,
    /// Capture strategy decided by the resolver's free-variable analysis.
    pub captures: CaptureSpec,
}

/// How a closure captures its environment.
#[derive(Debug, Clone)]
pub enum CaptureSpec {
    /// Share the creating environment frame. Chosen when any captured binding
    /// is mutable (so mutation stays observable) or when the body contains a
    /// nested lambda the shallow analysis cannot see into.
    ShareEnv,
    /// Copy exactly these immutable bindings into a fresh minimal frame.
    Minimal(Vec<Arc<str>>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Arc<str>,
    pub default: Option<Expr>,
}

impl Param {
    pub fn required(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

/// A statement block.
///
/// Transparent blocks (e.g. an `if` branch that declares nothing) share the
/// enclosing environment frame; non-transparent blocks get their own.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub transparent: bool,
}

impl Block {
    pub fn of(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            transparent: false,
        }
    }
}

/// An identifier reference.
///
/// `slot` is filled by the resolver pass for references inside function and
/// lambda bodies; module-level references stay name-resolved because the
/// global frame's slot layout is unpredictable (builtins are injected ad hoc).
#[derive(Debug, Clone)]
pub struct Ident {
    pub name: Arc<str>,
    pub slot: Option<(u16, u16)>,
}

impl Ident {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            slot: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Loc) -> Self {
        Self { kind, loc }
    }
}

#[derive(Debug, Clone)]
pub enum Lit {
    Null,
    Unit,
    Bool(bool),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(Arc<str>),
}

/// One segment of an interpolated string literal.
#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(Arc<str>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Lit),
    /// Interpolated string: parts concatenated via `toString`.
    StrTemplate(Vec<TemplatePart>),
    Ident(Ident),
    This,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Call of an arbitrary callee expression. The callee is evaluated in
    /// "callee position", which suppresses zero-arg auto-invocation.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `recv.name(args)`, or `recv?.name(args)` when `safe`.
    MethodCall {
        recv: Box<Expr>,
        name: Arc<str>,
        args: Vec<Expr>,
        safe: bool,
    },
    /// `recv.name`, or `recv?.name` when `safe`.
    Member {
        recv: Box<Expr>,
        name: Arc<str>,
        safe: bool,
    },
    Index {
        recv: Box<Expr>,
        index: Box<Expr>,
    },
    Assign {
        target: Box<AssignTarget>,
        value: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Block,
        els: Option<Block>,
    },
    Block(Block),
    /// Lambda creation. `body`/`params` are drained into the module's lambda
    /// table by the resolver pass, which fills `id`.
    Lambda {
        params: Vec<Param>,
        body: Block,
        id: Option<LambdaId>,
    },
    ListLit(Vec<Expr>),
    MapLit(Vec<(Expr, Expr)>),
    RangeLit {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    /// `operand is Ty` (or `!is` when negated).
    TypeCheck {
        operand: Box<Expr>,
        ty: Arc<str>,
        negated: bool,
    },
    /// `operand as Ty` (`as?` when safe: yields null instead of raising).
    TypeCast {
        operand: Box<Expr>,
        ty: Arc<str>,
        safe: bool,
    },
    /// `recv::name` method reference, or `::name` free-function reference.
    MethodRef {
        recv: Option<Box<Expr>>,
        name: Arc<str>,
    },
    /// `operand!!`.
    NullAssert(Box<Expr>),
    /// `value ?: fallback`.
    Elvis {
        value: Box<Expr>,
        fallback: Box<Expr>,
    },
    /// `operand?`: unwraps `Result.Ok`/non-null, early-returns `Err`/null.
    Propagate(Box<Expr>),
    Await(Box<Expr>),
    Throw(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Ident(Ident),
    Member { recv: Expr, name: Arc<str> },
    Index { recv: Expr, index: Expr },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Loc,
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Loc) -> Self {
        Self { kind, loc }
    }
}

/// Binding introduced by `val`/`var`/`for`: one name or a destructuring list.
#[derive(Debug, Clone)]
pub enum DeclNames {
    Single(Arc<str>),
    /// Positional destructuring via `component1`, `component2`, ...
    Destructure(Vec<Arc<str>>),
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub binding: Arc<str>,
    /// Declared class name; `None` catches everything.
    pub class_name: Option<Arc<str>>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `val`/`var` declaration, optionally destructuring.
    Decl {
        names: DeclNames,
        init: Expr,
        mutable: bool,
    },
    Fun(FunDecl),
    Class(Box<ClassDecl>),
    While {
        label: Option<Arc<str>>,
        cond: Expr,
        body: Block,
    },
    For {
        label: Option<Arc<str>>,
        binding: DeclNames,
        iterable: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Break {
        label: Option<Arc<str>>,
    },
    Continue {
        label: Option<Arc<str>>,
    },
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    /// `fun Target.name(...)` user extension function.
    ExtensionFun {
        target: Arc<str>,
        fun: FunDecl,
    },
    /// `val Target.name get() = ...` user extension property.
    ExtensionProp {
        target: Arc<str>,
        name: Arc<str>,
        getter: FunDecl,
    },
}

/// A named function declaration.
///
/// The resolver pass drains `params`/`body` into the lambda table and fills
/// `lambda`.
#[derive(Debug, Clone)]
pub struct FunDecl {
    pub name: Arc<str>,
    pub params: Vec<Param>,
    pub body: Block,
    pub lambda: Option<LambdaId>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: Arc<str>,
    pub mutable: bool,
    pub visibility: Visibility,
    pub init: Option<Expr>,
}

/// A primary-constructor parameter; `property` makes it a field (`val`/`var`).
#[derive(Debug, Clone)]
pub struct PrimaryParam {
    pub name: Arc<str>,
    pub property: Option<PropertyKind>,
    pub default: Option<Expr>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Val,
    Var,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub fun: FunDecl,
    pub visibility: Visibility,
    pub is_abstract: bool,
    /// Interface method with a body.
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct CtorDecl {
    pub params: Vec<Param>,
    pub body: Block,
    pub lambda: Option<LambdaId>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct EnumEntryDecl {
    pub name: Arc<str>,
    pub args: Vec<Expr>,
    pub overrides: Vec<MethodDecl>,
}

/// HIR class declaration covering classes, interfaces, enums, singleton
/// objects, and annotation classes.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Arc<str>,
    pub kind: crate::types::ClassKind,
    pub superclass: Option<Arc<str>>,
    /// Arguments to the superclass primary constructor.
    pub super_args: Vec<Expr>,
    pub interfaces: Vec<Arc<str>>,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_data: bool,
    pub primary_params: Vec<PrimaryParam>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    /// Custom property getters: `val x get() = ...`.
    pub getters: Vec<(Arc<str>, FunDecl)>,
    pub ctors: Vec<CtorDecl>,
    /// Companion/static values initialized at class registration.
    pub statics: Vec<FieldDecl>,
    pub annotations: Vec<Arc<str>>,
    pub enum_entries: Vec<EnumEntryDecl>,
}
