//! Executors and the host-pluggable scheduler.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Minimal executor surface the engine schedules onto.
///
/// The engine ships a thread-pool implementation; embedders can supply their
/// own (e.g. a UI main-loop executor) through [`Scheduler`].
pub trait Executor: Send + Sync + fmt::Debug {
    fn execute(&self, task: Task);
}

/// Fixed-size worker pool fed by an unbounded channel.
pub struct ThreadPool {
    sender: Sender<Task>,
    size: usize,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadPool(size={})", self.size)
    }
}

impl ThreadPool {
    /// Spawns `size` detached workers. Workers exit when every sender handle
    /// is dropped.
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = unbounded();
        for i in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("vela-worker-{i}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })
                .expect("failed to spawn worker thread");
        }
        Arc::new(Self { sender, size })
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) {
        // A send can only fail if every worker exited, which means the
        // process is tearing down; dropping the task is then harmless.
        let _ = self.sender.send(task);
    }
}

/// Executor that runs each task on a fresh background thread.
///
/// Fallback used by `scope` when the embedder supplied no async executor and
/// pool construction is undesirable.
#[derive(Debug, Default)]
pub struct SpawnExecutor;

impl Executor for SpawnExecutor {
    fn execute(&self, task: Task) {
        let _ = thread::Builder::new().name("vela-task".into()).spawn(task);
    }
}

/// A handle for a task scheduled via `schedule`/`scheduleRepeat`.
///
/// Cancellation is cooperative: a pending run observes the flag before
/// firing, and a repeating task stops rescheduling.
#[derive(Debug, Default)]
pub struct TimerTask {
    cancelled: AtomicBool,
}

impl TimerTask {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Host-pluggable scheduler: an optional single-threaded main executor and an
/// async executor (defaults to a CPU-sized pool).
pub struct Scheduler {
    main: Option<Arc<dyn Executor>>,
    background: Arc<dyn Executor>,
    /// Thread id of the main executor's thread, recorded on first main task.
    main_thread: Mutex<Option<thread::ThreadId>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("has_main", &self.main.is_some())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Default scheduler: no main executor, pool sized to the machine.
    pub fn new_default() -> Self {
        Self {
            main: None,
            background: ThreadPool::new(num_cpus::get()),
            main_thread: Mutex::new(None),
        }
    }

    /// Scheduler with host-provided executors.
    pub fn with_executors(main: Option<Arc<dyn Executor>>, background: Arc<dyn Executor>) -> Self {
        Self {
            main,
            background,
            main_thread: Mutex::new(None),
        }
    }

    pub fn background(&self) -> &Arc<dyn Executor> {
        &self.background
    }

    pub fn main(&self) -> Option<&Arc<dyn Executor>> {
        self.main.as_ref()
    }

    /// Whether the calling thread is the main executor's thread.
    ///
    /// Without a main executor every thread counts as "main", matching the
    /// synchronous embedding case.
    pub fn is_main_thread(&self) -> bool {
        match (&self.main, *self.main_thread.lock()) {
            (None, _) => true,
            (Some(_), Some(id)) => thread::current().id() == id,
            (Some(_), None) => false,
        }
    }

    /// Posts a task to the main executor, recording its thread id on first
    /// use so later `is_main_thread` checks can answer.
    pub fn post_main(self: &Arc<Self>, task: Task) -> bool {
        let Some(main) = &self.main else {
            return false;
        };
        let scheduler = self.clone();
        main.execute(Box::new(move || {
            scheduler
                .main_thread
                .lock()
                .get_or_insert_with(|| thread::current().id());
            task();
        }));
        true
    }

    /// Schedules `task` to run once after `delay_ms` on the background
    /// executor. Returns a cancellable handle.
    pub fn schedule_later(self: &Arc<Self>, delay_ms: u64, task: Task) -> Arc<TimerTask> {
        let handle = TimerTask::new();
        let timer = handle.clone();
        let scheduler = self.clone();
        let _ = thread::Builder::new().name("vela-timer".into()).spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            if !timer.is_cancelled() {
                scheduler.background.execute(task);
            }
        });
        handle
    }

    /// Schedules `make_task` to run repeatedly: first after `delay_ms`, then
    /// every `period_ms` until the handle is cancelled.
    pub fn schedule_repeat(
        self: &Arc<Self>,
        delay_ms: u64,
        period_ms: u64,
        make_task: impl Fn() -> Task + Send + 'static,
    ) -> Arc<TimerTask> {
        let handle = TimerTask::new();
        let timer = handle.clone();
        let scheduler = self.clone();
        let _ = thread::Builder::new().name("vela-timer".into()).spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            loop {
                if timer.is_cancelled() {
                    break;
                }
                scheduler.background.execute(make_task());
                thread::sleep(Duration::from_millis(period_ms.max(1)));
            }
        });
        handle
    }
}
