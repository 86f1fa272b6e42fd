//! Structured concurrency: cancel tokens, task futures, scopes, channels,
//! mutexes, atomics, and executors.
//!
//! Execution is single-threaded per interpreter instance. Every async child
//! runs in its own child interpreter (sharing the runtime's read-mostly
//! tables) on an executor thread; the handles here are the only
//! synchronization points between them.

pub mod channel;
pub mod executor;
pub mod sync;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use smallvec::smallvec;

pub use channel::ChannelValue;
pub use executor::{Executor, Scheduler, SpawnExecutor, Task, ThreadPool, TimerTask};
pub use sync::{AtomicKind, AtomicValue, MutexValue};

use crate::{
    errors::{ExcKind, Raise, RunError, RunResult, SimpleException},
    interp::Interpreter,
    types::Callable,
    value::Value,
};

/// Shared cooperative-cancellation flag.
///
/// Checked on loop back-edges, call entry, and inside every blocking wait so
/// a cancelled task unwinds promptly even while parked.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raises `Interrupted` (uncatchable) when the token is cancelled, so a
    /// cancelled task cannot swallow its own cancellation.
    pub fn check(&self) -> RunResult<()> {
        if self.is_cancelled() {
            Err(RunError::uncatchable(ExcKind::Interrupted, "task was cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Polling window for blocking waits; keeps cancellation observable.
const WAIT_POLL: Duration = Duration::from_millis(25);

#[derive(Debug)]
enum FutureState {
    Pending,
    Done(Value),
    Failed { raise: Box<Raise>, catchable: bool },
    Cancelled,
}

/// Completion handle behind `Deferred`, `Job`, and `Future` values.
#[derive(Debug)]
pub struct FutureValue {
    state: Mutex<FutureState>,
    cond: Condvar,
    cancel: CancelToken,
}

impl Default for FutureValue {
    fn default() -> Self {
        Self {
            state: Mutex::new(FutureState::Pending),
            cond: Condvar::new(),
            cancel: CancelToken::new(),
        }
    }
}

impl FutureValue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an already-completed future. Used by `sync` on the main
    /// thread and by tests.
    pub fn completed(value: Value) -> Arc<Self> {
        let f = Self::new();
        f.complete(value);
        f
    }

    /// The token handed to the child interpreter running this task.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn complete(&self, value: Value) {
        let mut state = self.state.lock();
        if matches!(*state, FutureState::Pending) {
            *state = FutureState::Done(value);
        }
        self.cond.notify_all();
    }

    pub fn fail(&self, err: RunError) {
        let (raise, catchable) = error_parts(err);
        let mut state = self.state.lock();
        if matches!(*state, FutureState::Pending) {
            *state = FutureState::Failed { raise, catchable };
        }
        self.cond.notify_all();
    }

    /// Cooperative cancellation: flags the child's token and marks the handle
    /// cancelled if it never completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if matches!(*state, FutureState::Pending) {
            *state = FutureState::Cancelled;
        }
        self.cond.notify_all();
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(*self.state.lock(), FutureState::Pending)
    }

    /// Snapshot of the completion value, if completed successfully.
    pub fn peek_done(&self) -> Option<Value> {
        match &*self.state.lock() {
            FutureState::Done(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn state_result(state: &FutureState) -> Option<RunResult<Value>> {
        match state {
            FutureState::Pending => None,
            FutureState::Done(v) => Some(Ok(v.clone())),
            FutureState::Failed { raise, catchable } => Some(Err(if *catchable {
                RunError::Exc(raise.clone())
            } else {
                RunError::Uncatchable(raise.clone())
            })),
            FutureState::Cancelled => Some(Err(RunError::exc(
                ExcKind::Interrupted,
                "awaited task was cancelled",
            ))),
        }
    }

    /// `Deferred.await`: blocks until completion, re-raising child failure in
    /// the waiting task.
    pub fn await_value(&self, waiter: &CancelToken) -> RunResult<Value> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = Self::state_result(&state) {
                return result;
            }
            waiter.check()?;
            self.cond.wait_for(&mut state, WAIT_POLL);
        }
    }

    /// `Job.join`: waits for a terminal state, ignoring value and failure.
    pub fn join(&self, waiter: &CancelToken) -> RunResult<()> {
        let mut state = self.state.lock();
        while matches!(*state, FutureState::Pending) {
            waiter.check()?;
            self.cond.wait_for(&mut state, WAIT_POLL);
        }
        Ok(())
    }

    /// Await with a deadline; raises catchable `Timeout` on expiry without
    /// touching the task (the caller decides whether to cancel).
    pub fn await_timeout(&self, ms: u64, waiter: &CancelToken) -> RunResult<Value> {
        let deadline = Instant::now() + Duration::from_millis(ms);
        let mut state = self.state.lock();
        loop {
            if let Some(result) = Self::state_result(&state) {
                return result;
            }
            waiter.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Err(RunError::exc(ExcKind::Timeout, format!("timed out after {ms} ms")));
            }
            self.cond.wait_for(&mut state, WAIT_POLL.min(deadline - now));
        }
    }

    /// The child's failure, if it failed. Used by strict scopes to propagate
    /// the first error after join.
    fn failure(&self) -> Option<(Box<Raise>, bool)> {
        match &*self.state.lock() {
            FutureState::Failed { raise, catchable } => Some((raise.clone(), *catchable)),
            _ => None,
        }
    }
}

/// Strict scopes cancel siblings on the first child failure and rethrow it
/// from `join_all`; supervisor scopes isolate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Strict,
    Supervisor,
}

/// A structured-concurrency region bounding its child tasks.
#[derive(Debug)]
pub struct ScopeValue {
    mode: ScopeMode,
    executor: Arc<dyn Executor>,
    children: Mutex<Vec<Arc<FutureValue>>>,
    /// First child failure observed (strict mode only).
    first_error: Mutex<Option<(Box<Raise>, bool)>>,
}

impl ScopeValue {
    pub fn new(mode: ScopeMode, executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            mode,
            executor,
            children: Mutex::new(Vec::new()),
            first_error: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn add_child(&self, child: Arc<FutureValue>) {
        self.children.lock().push(child);
    }

    /// Cancels every child future.
    pub fn cancel_all(&self) {
        for child in self.children.lock().iter() {
            child.cancel();
        }
    }

    /// Called by the task wrapper when a child fails: in strict mode the
    /// first failure is recorded and all siblings are cancelled.
    pub fn on_child_failed(&self, child: &Arc<FutureValue>) {
        if self.mode != ScopeMode::Strict {
            return;
        }
        let Some(failure) = child.failure() else { return };
        {
            let mut first = self.first_error.lock();
            if first.is_some() {
                return;
            }
            *first = Some(failure);
        }
        self.cancel_all();
    }

    /// Awaits every child; in strict mode, rethrows the first child failure
    /// after all siblings have reached a terminal state.
    pub fn join_all(&self, waiter: &CancelToken) -> RunResult<()> {
        // Children may keep spawning while we join, so loop until the set is
        // stable and fully terminal.
        let mut joined = 0;
        loop {
            let pending: Vec<Arc<FutureValue>> = {
                let children = self.children.lock();
                children.iter().skip(joined).cloned().collect()
            };
            if pending.is_empty() {
                break;
            }
            for child in &pending {
                child.join(waiter)?;
            }
            joined += pending.len();
        }
        if self.mode != ScopeMode::Strict {
            return Ok(());
        }
        // Prefer the recorded first error, but fall back to scanning the
        // joined children: a child's state flips terminal slightly before its
        // wrapper records the failure here.
        let failure = self
            .first_error
            .lock()
            .clone()
            .or_else(|| self.children.lock().iter().find_map(|c| c.failure()));
        match failure {
            Some((raise, true)) => Err(RunError::Exc(raise)),
            Some((raise, false)) => Err(RunError::Uncatchable(raise)),
            None => Ok(()),
        }
    }
}

fn error_parts(err: RunError) -> (Box<Raise>, bool) {
    match err {
        RunError::Exc(raise) => (raise, true),
        RunError::Uncatchable(raise) => (raise, false),
        RunError::Internal(msg) => (
            Box::new(Raise::new(SimpleException::new_msg(ExcKind::InternalInvariant, msg))),
            false,
        ),
    }
}

impl Interpreter {
    /// Spawns `callable` on `executor` in a child interpreter, returning the
    /// completion handle. `scope` links the task into a structured scope.
    pub(crate) fn spawn_task(
        &mut self,
        callable: Value,
        scope: Option<Arc<ScopeValue>>,
        executor: Arc<dyn Executor>,
        kind: &'static str,
    ) -> RunResult<Arc<FutureValue>> {
        self.runtime().acquire_task_permit(self.policy())?;
        let future = FutureValue::new();
        if let Some(scope) = &scope {
            scope.add_child(future.clone());
        }

        // The scope block and its children receive the scope as `this`.
        let callable = match (&callable, &scope) {
            (Value::Func(Callable::Closure(closure)), Some(scope)) => {
                Value::Func(Callable::Closure(closure.with_this(Value::Scope(scope.clone()))))
            }
            _ => callable,
        };

        let mut child = self.fork_child(future.cancel_token().clone());
        // A task spawned into a scope can itself launch into that scope.
        if let Some(scope) = &scope {
            child.push_scope_context(scope.clone());
        }
        let tracer = self.tracer_handle();
        tracer.on_task_spawn(kind);
        let fut = future.clone();
        let task_scope = scope;
        executor.execute(Box::new(move || {
            let result = child.call_value(&callable, smallvec![]);
            child.runtime().release_task_permit();
            match result {
                Ok(v) => {
                    fut.complete(v);
                    child.tracer_handle().on_task_finish(false);
                }
                Err(err) => {
                    fut.fail(err);
                    if let Some(scope) = &task_scope {
                        scope.on_child_failed(&fut);
                    }
                    child.tracer_handle().on_task_finish(true);
                }
            }
        }));
        Ok(future)
    }

    /// `coroutineScope` / `supervisorScope`: run the block with the scope as
    /// receiver, then join every child before returning.
    pub(crate) fn run_scope(&mut self, mode: ScopeMode, block: &Value) -> RunResult<Value> {
        let executor = self.runtime().scheduler().background().clone();
        let scope = ScopeValue::new(mode, executor);
        self.push_scope_context(scope.clone());
        let result = self.call_with_receiver(block, Value::Scope(scope.clone()), smallvec![]);
        self.pop_scope_context();
        let join = scope.join_all(self.cancel_token());
        match (result, join) {
            (Err(err), _) => {
                scope.cancel_all();
                Err(err)
            }
            (Ok(_), Err(err)) => Err(err),
            (Ok(v), Ok(())) => Ok(v),
        }
    }

    /// `await` over the handle kinds.
    pub(crate) fn await_value(&mut self, value: &Value) -> RunResult<Value> {
        let waiter = self.cancel_token().clone();
        match value {
            Value::Deferred(f) | Value::Future(f) => f.await_value(&waiter),
            Value::Job(f) => {
                f.join(&waiter)?;
                Ok(Value::Unit)
            }
            other => Err(RunError::type_mismatch(format!(
                "await requires a Deferred/Future/Job, got {}",
                other.type_name()
            ))),
        }
    }

    /// `withTimeout(ms, block)`: run on the async executor, bounded by `ms`.
    pub(crate) fn with_timeout(&mut self, ms: u64, block: &Value) -> RunResult<Value> {
        let executor = self.runtime().scheduler().background().clone();
        let future = self.spawn_task(block.clone(), None, executor, "withTimeout")?;
        match future.await_timeout(ms, self.cancel_token()) {
            Err(err) if err.kind() == ExcKind::Timeout => {
                future.cancel();
                Err(err)
            }
            other => other,
        }
    }

    /// `sync(block)`: posts to the main executor and blocks; executes
    /// synchronously when already on the main thread (avoiding deadlock) or
    /// when no main executor exists.
    pub(crate) fn sync_call(&mut self, block: &Value) -> RunResult<Value> {
        let scheduler = self.runtime().scheduler().clone();
        if scheduler.is_main_thread() || scheduler.main().is_none() {
            return self.call_value(block, smallvec![]);
        }
        let future = FutureValue::new();
        let mut child = self.fork_child(future.cancel_token().clone());
        let block = block.clone();
        let fut = future.clone();
        scheduler.post_main(Box::new(move || match child.call_value(&block, smallvec![]) {
            Ok(v) => fut.complete(v),
            Err(err) => fut.fail(err),
        }));
        future.await_value(self.cancel_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_completes_once() {
        let f = FutureValue::new();
        f.complete(Value::Int(1));
        f.complete(Value::Int(2));
        assert!(f.await_value(&CancelToken::new()).unwrap().equals(&Value::Int(1)));
    }

    #[test]
    fn await_on_cancelled_future_raises_interrupted() {
        let f = FutureValue::new();
        f.cancel();
        let err = f.await_value(&CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ExcKind::Interrupted);
        assert!(err.is_catchable());
    }

    #[test]
    fn await_timeout_expires() {
        let f = FutureValue::new();
        let err = f.await_timeout(20, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ExcKind::Timeout);
    }

    #[test]
    fn strict_scope_records_first_failure_and_cancels_siblings() {
        let scope = ScopeValue::new(ScopeMode::Strict, ThreadPool::new(2));
        let ok = FutureValue::new();
        let bad = FutureValue::new();
        scope.add_child(ok.clone());
        scope.add_child(bad.clone());

        bad.fail(RunError::exc(ExcKind::ArithmeticError, "Division by zero"));
        scope.on_child_failed(&bad);

        // the sibling was cancelled before join completes
        assert!(ok.is_terminal());
        let err = scope.join_all(&CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ExcKind::ArithmeticError);
    }

    #[test]
    fn supervisor_scope_isolates_failures() {
        let scope = ScopeValue::new(ScopeMode::Supervisor, ThreadPool::new(2));
        let ok = FutureValue::new();
        let bad = FutureValue::new();
        scope.add_child(ok.clone());
        scope.add_child(bad.clone());

        bad.fail(RunError::exc(ExcKind::ArithmeticError, "Division by zero"));
        scope.on_child_failed(&bad);

        assert!(!ok.is_terminal());
        ok.complete(Value::Unit);
        scope.join_all(&CancelToken::new()).unwrap();
    }
}
