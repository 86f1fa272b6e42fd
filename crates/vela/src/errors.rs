use std::{
    borrow::Cow,
    fmt::{self, Write},
};

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Error kinds surfaced to Vela programs.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `TypeMismatch` -> "TypeMismatch"), which is also the class name a
/// `catch` clause matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcKind {
    /// Operand or argument had the wrong runtime type.
    TypeMismatch,
    /// Member lookup exhausted every resolution layer.
    UnknownMember,
    /// Identifier could not be resolved in any enclosing frame.
    UnknownName,
    /// A callable was invoked with the wrong number of arguments.
    ArityMismatch,
    /// `val`/`var` re-declared a name already bound in the same frame.
    DuplicateBinding,
    /// Assignment to a `val` binding.
    ImmutableAssign,
    /// Division or remainder by zero on integer operands, and kin.
    ArithmeticError,
    IndexOutOfBounds,
    /// `!!` applied to null, or a member access on null without `?.`.
    NullDereference,
    /// `as` cast failed; the safe form `as?` yields null instead.
    Cast,
    /// Foreign class resolution failed.
    ClassNotFound,
    /// Member exists but is not visible from the calling class.
    MemberNotAccessible,
    /// The security policy refused the attempted action. Never catchable.
    SecurityDenied,
    /// Loop back-edge count exceeded the configured cap. Never catchable.
    LoopLimit,
    /// Call depth (or tail-call count) exceeded the configured cap. Never catchable.
    RecursionLimit,
    /// Execution deadline or `withTimeout` window expired.
    Timeout,
    /// Send on a closed channel, or receive from a closed empty channel.
    ChannelClosed,
    /// The task was cancelled while running or blocked.
    Interrupted,
    /// A value thrown by user code via `throw` or `error(...)`.
    UserThrown,
    /// An engine invariant was violated; indicates a bug in vela, not user code.
    InternalInvariant,
}

/// Source position attached to raised errors, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    /// Originating file, when the front end provided one.
    pub file: Option<std::sync::Arc<str>>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}

/// One entry of a captured language-level stack trace.
///
/// Frames are stored innermost-first, matching the order they are printed.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Function or method name, `<main>` for module-level code.
    pub name: std::sync::Arc<str>,
    /// Call-site location, when known.
    pub location: Option<CodeLoc>,
    /// Number of tail-call frames folded into this entry.
    pub folded_tail_calls: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.name)?;
        if let Some(loc) = &self.location {
            write!(f, " ({loc})")?;
        }
        if self.folded_tail_calls > 0 {
            write!(f, "\n    ... {} tail-call frames omitted ...", self.folded_tail_calls)?;
        }
        Ok(())
    }
}

/// An exception value without raise context: kind, optional message, optional payload.
///
/// The payload carries the original thrown `Value` for `UserThrown` so a catch
/// clause binds the instance the program threw, not a stringified copy.
#[derive(Debug, Clone)]
pub struct SimpleException {
    kind: ExcKind,
    message: Option<String>,
    payload: Option<Value>,
}

impl SimpleException {
    pub fn new(kind: ExcKind, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            payload: None,
        }
    }

    pub fn new_msg(kind: ExcKind, message: impl fmt::Display) -> Self {
        Self {
            kind,
            message: Some(message.to_string()),
            payload: None,
        }
    }

    /// Creates a `UserThrown` exception carrying the thrown value.
    pub fn thrown(message: Option<String>, payload: Value) -> Self {
        Self {
            kind: ExcKind::UserThrown,
            message,
            payload: Some(payload),
        }
    }

    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// The thrown value for `UserThrown`, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn take_payload(&mut self) -> Option<Value> {
        self.payload.take()
    }
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A raised exception: the exception itself plus throw-site context.
///
/// The stack is captured at throw time, innermost frame first. `location` and
/// `snippet` are filled in by the evaluator from the offending node when it
/// annotates a bare raise on the way out.
#[derive(Debug, Clone)]
pub struct Raise {
    pub exc: SimpleException,
    pub location: Option<CodeLoc>,
    /// Source text of the offending expression, when the front end kept it.
    pub snippet: Option<String>,
    pub stack: Vec<StackFrame>,
}

impl Raise {
    pub fn new(exc: SimpleException) -> Self {
        Self {
            exc,
            location: None,
            snippet: None,
            stack: Vec::new(),
        }
    }

    pub fn with_location(mut self, loc: CodeLoc) -> Self {
        self.location = Some(loc);
        self
    }
}

impl From<SimpleException> for Raise {
    fn from(exc: SimpleException) -> Self {
        Self::new(exc)
    }
}

/// Internal error channel threaded through every fallible engine path.
#[derive(Debug)]
pub enum RunError {
    /// Internal interpreter error - indicates a bug in vela, not user code.
    Internal(Cow<'static, str>),
    /// Catchable exception (e.g., `TypeMismatch`, `IndexOutOfBounds`).
    Exc(Box<Raise>),
    /// Uncatchable exception from the security policy or resource caps.
    ///
    /// These display with normal tracebacks but propagate past every
    /// `try`/`catch`, so untrusted code cannot suppress sandbox violations.
    Uncatchable(Box<Raise>),
}

impl From<Raise> for RunError {
    fn from(raise: Raise) -> Self {
        Self::Exc(Box::new(raise))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Catchable raise with a formatted message.
    pub fn exc(kind: ExcKind, message: impl fmt::Display) -> Self {
        SimpleException::new_msg(kind, message).into()
    }

    /// Uncatchable raise with a formatted message.
    pub fn uncatchable(kind: ExcKind, message: impl fmt::Display) -> Self {
        Self::Uncatchable(Box::new(SimpleException::new_msg(kind, message).into()))
    }

    pub fn type_mismatch(message: impl fmt::Display) -> Self {
        Self::exc(ExcKind::TypeMismatch, message)
    }

    pub fn unknown_member(type_name: impl fmt::Display, member: &str) -> Self {
        Self::exc(
            ExcKind::UnknownMember,
            format!("'{type_name}' has no member '{member}'"),
        )
    }

    pub fn unknown_name(name: &str) -> Self {
        Self::exc(ExcKind::UnknownName, format!("unresolved reference: {name}"))
    }

    pub fn arity(callee: &str, expected: usize, got: usize) -> Self {
        Self::exc(
            ExcKind::ArityMismatch,
            format!("{callee} expects {expected} argument(s), got {got}"),
        )
    }

    pub fn division_by_zero() -> Self {
        Self::exc(ExcKind::ArithmeticError, "Division by zero")
    }

    pub fn null_deref(context: &str) -> Self {
        Self::exc(ExcKind::NullDereference, context)
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::exc(
            ExcKind::IndexOutOfBounds,
            format!("index {index} out of bounds for length {len}"),
        )
    }

    /// Returns the kind this error would surface as.
    pub fn kind(&self) -> ExcKind {
        match self {
            Self::Internal(_) => ExcKind::InternalInvariant,
            Self::Exc(raise) | Self::Uncatchable(raise) => raise.exc.kind(),
        }
    }

    /// Whether a `catch` clause may handle this error at all.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Exc(_))
    }

    /// Attaches a location to the innermost raise if it doesn't have one yet.
    pub fn with_location(self, loc: &CodeLoc) -> Self {
        match self {
            Self::Exc(mut raise) => {
                if raise.location.is_none() {
                    raise.location = Some(loc.clone());
                }
                Self::Exc(raise)
            }
            Self::Uncatchable(mut raise) => {
                if raise.location.is_none() {
                    raise.location = Some(loc.clone());
                }
                Self::Uncatchable(raise)
            }
            other => other,
        }
    }

    /// Converts this runtime error to an `Exception` for the public API.
    ///
    /// Internal errors become `InternalInvariant` exceptions with no traceback.
    pub fn into_exception(self) -> Exception {
        match self {
            Self::Exc(raise) | Self::Uncatchable(raise) => Exception::from_raise(*raise),
            Self::Internal(msg) => Exception {
                kind: ExcKind::InternalInvariant,
                message: Some(format!("internal error in vela: {msg}")),
                location: None,
                snippet: None,
                stack: Vec::new(),
            },
        }
    }
}

/// Public exception surfaced to embedders and printed for uncaught errors.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExcKind,
    pub message: Option<String>,
    pub location: Option<CodeLoc>,
    pub snippet: Option<String>,
    /// Captured language-level stack trace, innermost frame first.
    pub stack: Vec<StackFrame>,
}

impl Exception {
    pub fn from_raise(raise: Raise) -> Self {
        Self {
            kind: raise.exc.kind(),
            message: raise.exc.into_message(),
            location: raise.location,
            snippet: raise.snippet,
            stack: raise.stack,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(loc) = &self.location {
            write!(f, "\n  --> {loc}")?;
        }
        if let Some(snippet) = &self.snippet {
            write!(f, "\n  |  {snippet}")?;
        }
        for frame in &self.stack {
            f.write_char('\n')?;
            write!(f, "    {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}
