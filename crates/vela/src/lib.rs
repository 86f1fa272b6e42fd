//! Execution engine for the Vela scripting language.
//!
//! The core is a dual-layer interpreter: a tree-walking evaluator over HIR
//! and a register-based interpreter over MIR, sharing one runtime value
//! model, environment, member resolver, dispatch subsystem, structured
//! concurrency core, and foreign bridge. Front ends (lexer, parser, HIR
//! builder, HIR→MIR lowering) live outside this crate and hand the engine a
//! well-formed module.
//!
//! # Quick start
//!
//! ```
//! use vela::{Interpreter, ProgramModule, SecurityPolicy};
//! use vela::hir::{Expr, ExprKind, Lit, Loc};
//!
//! let mut interp = Interpreter::new(SecurityPolicy::standard());
//! interp.register_builtins();
//! let expr = Expr::new(ExprKind::Literal(Lit::Int(41)), Loc::default());
//! let value = interp.eval(expr).unwrap();
//! assert_eq!(value.render(), "41");
//! ```

pub mod builtins;
pub mod concurrent;
pub mod env;
pub mod errors;
pub mod foreign;
pub mod hir;
pub mod io;
mod member;
pub mod mir;
pub mod ops;
pub mod policy;
pub mod resource;
pub mod runtime;
pub mod tracer;
pub mod types;
pub mod value;

mod interp;

pub use crate::{
    builtins::Builtin,
    concurrent::{CancelToken, Executor, ScopeMode, Scheduler},
    env::{Env, EnvFrame},
    errors::{CodeLoc, ExcKind, Exception, RunError, RunResult, StackFrame},
    foreign::{ExternalObject, ForeignClass, ForeignClassBuilder},
    interp::{Interpreter, ProgramModule},
    io::{CaptureConsole, Console, NullConsole, StdConsole},
    policy::{PolicyLevel, SecurityPolicy},
    resource::{ResourceLimits, ResourceTracker},
    runtime::{AnnotationHandle, Runtime},
    tracer::{ExecTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    value::{Foreign, TypeTag, Value},
};
