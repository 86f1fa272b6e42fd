//! Execution tracing infrastructure.
//!
//! Provides a trait-based tracing system shared by both interpreter tiers.
//! The tracer is a per-interpreter field (shared with async children), not a
//! global logger, so embedders can observe one engine without touching
//! process-wide state.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem |

use std::sync::Arc;

use parking_lot::Mutex;

/// Trace event emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A call frame was pushed.
    Call { name: String, depth: usize },
    /// A call frame was popped.
    Return { depth: usize },
    /// A MIR instruction was dispatched.
    Step { function: String, block: u32, pc: usize },
    /// An exception started propagating.
    Throw { kind: String },
    /// An async child task was spawned.
    TaskSpawn { kind: &'static str },
    /// An async child task finished (successfully or not).
    TaskFinish { failed: bool },
}

/// Trait for engine execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code. Implementations must be `Send + Sync`: child task
/// interpreters share the parent's tracer.
pub trait ExecTracer: Send + Sync + std::fmt::Debug {
    /// Called when a new call frame is pushed.
    ///
    /// `depth` is the call stack depth after the push.
    #[inline]
    fn on_call(&self, _name: &str, _depth: usize) {}

    /// Called when a call frame is popped.
    #[inline]
    fn on_return(&self, _depth: usize) {}

    /// Called before each MIR instruction dispatch.
    ///
    /// This is the hottest hook; implementations should stay lightweight.
    #[inline]
    fn on_step(&self, _function: &str, _block: u32, _pc: usize) {}

    /// Called when an exception starts propagating.
    #[inline]
    fn on_throw(&self, _kind: &str) {}

    /// Called when an async child task is spawned (`async`, `launch`, timers).
    #[inline]
    fn on_task_spawn(&self, _kind: &'static str) {}

    /// Called when an async child task completes.
    #[inline]
    fn on_task_finish(&self, _failed: bool) {}
}

/// No-op tracer used unless the embedder installs another one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl ExecTracer for NoopTracer {}

/// Tracer that writes a human-readable execution log to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl ExecTracer for StderrTracer {
    fn on_call(&self, name: &str, depth: usize) {
        eprintln!("{:depth$}-> {name}", "");
    }

    fn on_return(&self, depth: usize) {
        eprintln!("{:depth$}<-", "");
    }

    fn on_throw(&self, kind: &str) {
        eprintln!("!! throw {kind}");
    }

    fn on_task_spawn(&self, kind: &'static str) {
        eprintln!("** spawn {kind}");
    }
}

/// Tracer that records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Number of events matching a predicate.
    pub fn count(&self, pred: impl Fn(&TraceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl ExecTracer for RecordingTracer {
    fn on_call(&self, name: &str, depth: usize) {
        self.events.lock().push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&self, depth: usize) {
        self.events.lock().push(TraceEvent::Return { depth });
    }

    fn on_step(&self, function: &str, block: u32, pc: usize) {
        self.events.lock().push(TraceEvent::Step {
            function: function.to_owned(),
            block,
            pc,
        });
    }

    fn on_throw(&self, kind: &str) {
        self.events.lock().push(TraceEvent::Throw { kind: kind.to_owned() });
    }

    fn on_task_spawn(&self, kind: &'static str) {
        self.events.lock().push(TraceEvent::TaskSpawn { kind });
    }

    fn on_task_finish(&self, failed: bool) {
        self.events.lock().push(TraceEvent::TaskFinish { failed });
    }
}
