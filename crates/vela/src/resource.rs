use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::errors::{ExcKind, RunError};

/// Configuration for execution resource caps.
///
/// All limits are optional - `None` disables a specific limit. The security
/// policy maps its numeric fields here, translating `0` to `None`.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum wall-clock execution time.
    pub max_duration: Option<Duration>,
    /// Maximum function call depth (tail-folded calls count individually).
    pub max_recursion_depth: Option<u32>,
    /// Maximum loop back-edges taken, summed across all loops.
    pub max_loop_iterations: Option<u64>,
    /// Maximum concurrently live async tasks spawned by this engine.
    pub max_async_tasks: Option<u32>,
}

impl ResourceLimits {
    /// Creates limits with everything disabled.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn max_recursion_depth(mut self, limit: u32) -> Self {
        self.max_recursion_depth = Some(limit);
        self
    }

    pub fn max_loop_iterations(mut self, limit: u64) -> Self {
        self.max_loop_iterations = Some(limit);
        self
    }

    pub fn max_async_tasks(mut self, limit: u32) -> Self {
        self.max_async_tasks = Some(limit);
        self
    }
}

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum recursion depth exceeded.
    Recursion { limit: u32, depth: u32 },
    /// Maximum loop back-edge count exceeded.
    Loop { limit: u64, count: u64 },
    /// Maximum concurrent async task count exceeded.
    Tasks { limit: u32 },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Recursion { limit, depth } => {
                write!(f, "maximum recursion depth exceeded: {depth} > {limit}")
            }
            Self::Loop { limit, count } => {
                write!(f, "loop iteration limit exceeded: {count} > {limit}")
            }
            Self::Tasks { limit } => {
                write!(f, "concurrent task limit exceeded: {limit}")
            }
        }
    }
}

impl From<ResourceError> for RunError {
    /// Limit violations are uncatchable so `try`/`catch` cannot suppress them.
    fn from(err: ResourceError) -> Self {
        let kind = match err {
            ResourceError::Time { .. } => ExcKind::Timeout,
            ResourceError::Recursion { .. } => ExcKind::RecursionLimit,
            ResourceError::Loop { .. } => ExcKind::LoopLimit,
            ResourceError::Tasks { .. } => ExcKind::LoopLimit,
        };
        Self::uncatchable(kind, err)
    }
}

/// Per-interpreter tracker enforcing [`ResourceLimits`].
///
/// The tracker is owned by the executing interpreter; child task interpreters
/// get a fresh tracker with the same limits so caps are per-task, not shared.
/// `check_loop_edge` is called on loop back-edges, `check_recursion` on call
/// entry, and both also poll the wall-clock deadline. Time is only sampled
/// every [`TIME_CHECK_MASK`]+1 back-edges to keep the hot path cheap.
#[derive(Debug)]
pub struct ResourceTracker {
    limits: ResourceLimits,
    /// When execution started (for time limit checking).
    start_time: Instant,
    /// Total loop back-edges taken.
    loop_count: u64,
    /// Back-edges since the last wall-clock sample.
    ticks_since_time_check: u32,
}

/// Sample the wall clock every 1024 back-edges.
const TIME_CHECK_MASK: u32 = 0x3ff;

impl ResourceTracker {
    /// Creates a tracker; the deadline starts counting immediately, so create
    /// it right before starting execution.
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            loop_count: 0,
            ticks_since_time_check: 0,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Restarts the deadline without resetting counters.
    ///
    /// Used when one interpreter executes several top-level requests.
    pub fn restart_clock(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Called on every loop back-edge.
    pub fn check_loop_edge(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_loop_iterations {
            self.loop_count += 1;
            if self.loop_count > max {
                return Err(ResourceError::Loop {
                    limit: max,
                    count: self.loop_count,
                });
            }
        }
        self.ticks_since_time_check += 1;
        if self.ticks_since_time_check & TIME_CHECK_MASK == 0 {
            self.check_time()?;
        }
        Ok(())
    }

    /// Called on call entry with the depth before the new frame is pushed.
    pub fn check_recursion(&mut self, current_depth: u32) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            });
        }
        self.check_time()
    }

    /// Checks the wall-clock deadline immediately.
    pub fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_cap_trips_after_limit() {
        let mut tracker = ResourceTracker::new(ResourceLimits::unlimited().max_loop_iterations(3));
        assert!(tracker.check_loop_edge().is_ok());
        assert!(tracker.check_loop_edge().is_ok());
        assert!(tracker.check_loop_edge().is_ok());
        assert!(matches!(tracker.check_loop_edge(), Err(ResourceError::Loop { .. })));
    }

    #[test]
    fn recursion_cap_counts_depth_before_push() {
        let mut tracker = ResourceTracker::new(ResourceLimits::unlimited().max_recursion_depth(10));
        assert!(tracker.check_recursion(9).is_ok());
        assert!(matches!(
            tracker.check_recursion(10),
            Err(ResourceError::Recursion { .. })
        ));
    }

    #[test]
    fn limit_errors_map_to_uncatchable_raises() {
        let err: RunError = ResourceError::Loop { limit: 1, count: 2 }.into();
        assert!(!err.is_catchable());
        assert_eq!(err.kind(), ExcKind::LoopLimit);
    }
}
