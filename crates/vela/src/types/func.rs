use std::{fmt, sync::Arc};

use smallvec::SmallVec;

use crate::{
    builtins::Builtin,
    env::Env,
    errors::RunResult,
    hir::{HirModule, LambdaId},
    interp::Interpreter,
    mir::{MirFunction, MirModule},
    value::Value,
};

/// Call arguments. Most calls have at most four arguments, so the inline
/// capacity eliminates the heap allocation for the vast majority of calls.
pub type Args = SmallVec<[Value; 4]>;

/// Every callable shape the engine can invoke through one contract.
///
/// Foreign callables, host builtins, and user code all present as one of
/// these variants; the interpreter's `call_callable` is the single funnel.
#[derive(Debug, Clone)]
pub enum Callable {
    /// HIR function or lambda with its captured environment.
    Closure(Arc<Closure>),
    /// MIR module function.
    Mir(Arc<MirClosure>),
    /// Engine builtin.
    Builtin(Builtin),
    /// Host-provided native function: extensions, stdlib members, foreign methods.
    Native(Arc<NativeFn>),
    /// Partial application with a placeholder bitmask.
    Partial(Arc<PartialApp>),
}

impl Callable {
    /// Display name used in error messages and stack traces.
    pub fn name(&self) -> Arc<str> {
        match self {
            Self::Closure(c) => c.name.clone(),
            Self::Mir(m) => m.func.name.clone(),
            Self::Builtin(b) => Arc::from(b.as_str()),
            Self::Native(n) => n.name.clone(),
            Self::Partial(p) => p.name(),
        }
    }
}

/// An HIR function or lambda closed over its defining environment.
///
/// The body lives in the module's lambda table; the closure only carries the
/// id plus whatever environment the capture analysis decided on (a minimal
/// frame of immutable captures, or the shared enclosing frame).
pub struct Closure {
    pub name: Arc<str>,
    pub module: Arc<HirModule>,
    pub lambda: LambdaId,
    pub env: Env,
    /// Receiver bound at method-extraction or scope-function time.
    pub this: Option<Value>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("lambda", &self.lambda)
            .finish_non_exhaustive()
    }
}

impl Closure {
    /// Rebinds the receiver, sharing everything else.
    pub fn with_this(self: &Arc<Self>, this: Value) -> Arc<Self> {
        Arc::new(Self {
            name: self.name.clone(),
            module: self.module.clone(),
            lambda: self.lambda,
            env: self.env.clone(),
            this: Some(this),
        })
    }
}

/// A MIR function paired with its defining module.
///
/// The module reference is needed because function bodies resolve same-module
/// `INVOKE_STATIC` targets and class names against it.
#[derive(Debug)]
pub struct MirClosure {
    pub module: Arc<MirModule>,
    pub func: Arc<MirFunction>,
}

/// Host function signature.
///
/// The receiver is `Some` for member-style natives (extensions, stdlib
/// members, foreign methods) and `None` for free functions.
pub type NativeImpl = Box<dyn Fn(&mut Interpreter, Option<Value>, Args) -> RunResult<Value> + Send + Sync>;

/// A native (Rust) function exposed to programs.
pub struct NativeFn {
    pub name: Arc<str>,
    /// Exact positional arity, or `None` for variadic.
    pub arity: Option<usize>,
    pub f: NativeImpl,
}

impl NativeFn {
    pub fn new(
        name: impl Into<Arc<str>>,
        arity: Option<usize>,
        f: impl Fn(&mut Interpreter, Option<Value>, Args) -> RunResult<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            arity,
            f: Box::new(f),
        })
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

/// A partial application created by the `$PartialApplication|mask` synthetic
/// call owner.
///
/// Bit `i` of `mask` set means operand position `i` was a placeholder to be
/// filled by the next invocation's arguments, in order; clear bits were bound
/// eagerly. Surplus call-time arguments are appended after the merged list.
#[derive(Debug, Clone)]
pub struct PartialApp {
    pub target: Value,
    pub mask: u32,
    pub bound: Vec<Value>,
}

impl PartialApp {
    pub fn name(&self) -> Arc<str> {
        Arc::from("<partial>")
    }

    /// Number of operand positions the mask describes.
    pub fn positions(&self) -> usize {
        self.bound.len()
    }

    /// Merges call-time arguments into the placeholder positions.
    pub fn merge(&self, call_args: Args) -> Args {
        let mut incoming = call_args.into_iter();
        let mut merged: Args = SmallVec::with_capacity(self.bound.len());
        for (i, bound) in self.bound.iter().enumerate() {
            if self.mask & (1 << i) != 0 {
                merged.push(incoming.next().unwrap_or(Value::Null));
            } else {
                merged.push(bound.clone());
            }
        }
        merged.extend(incoming);
        merged
    }
}

/// A method extracted from its receiver, usable anywhere a callable is
/// expected.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub callable: Value,
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn partial_merge_fills_placeholders_in_order() {
        let partial = PartialApp {
            target: Value::Null,
            // positions 0 and 2 are placeholders
            mask: 0b101,
            bound: vec![Value::Null, Value::Int(2), Value::Null],
        };
        let merged = partial.merge(smallvec![Value::Int(1), Value::Int(3), Value::Int(4)]);
        let ints: Vec<i64> = merged
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                _ => panic!("expected Int"),
            })
            .collect();
        assert_eq!(ints, vec![1, 2, 3, 4]);
    }
}
