//! Security policy gating access to the host from untrusted programs.
//!
//! The policy is immutable once constructed - permissions cannot be escalated
//! during execution. Foreign-call sites, stdio builtins, and the concurrency
//! core consult it before touching anything outside the engine. A denial is an
//! uncatchable [`SecurityDenied`](crate::errors::ExcKind::SecurityDenied)
//! raise carrying the attempted action, so sandboxed code cannot observe and
//! suppress the refusal.

use std::time::Duration;

use ahash::AHashSet;

use crate::{
    errors::{ExcKind, RunError, RunResult},
    resource::ResourceLimits,
};

/// Predefined policy strictness levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyLevel {
    /// Everything allowed, no caps. For trusted embedders only.
    Unrestricted,
    /// Foreign interop and stdio allowed; file/network/process denied.
    #[default]
    Standard,
    /// Pure computation: no interop, no stdio, conservative caps.
    Strict,
    /// Field-by-field configuration supplied by the embedder.
    Custom,
}

/// Immutable security policy record.
///
/// Class gating evaluation order (`is_class_allowed`): denied class, then
/// allowed class, then any denied package prefix, then - if the allow list is
/// non-empty - require an allowed package prefix, else allow.
///
/// All numeric caps use `0` to mean "unlimited".
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub level: PolicyLevel,
    pub allow_packages: AHashSet<String>,
    pub deny_packages: AHashSet<String>,
    pub allow_classes: AHashSet<String>,
    pub deny_classes: AHashSet<String>,
    /// Denied entries of the form `"full.class.Name#method"`.
    pub deny_methods: AHashSet<String>,
    pub allow_foreign_interop: bool,
    pub allow_set_accessible: bool,
    pub allow_stdio: bool,
    pub allow_file_io: bool,
    pub allow_network: bool,
    pub allow_process_exec: bool,
    pub max_execution_time_ms: u64,
    pub max_recursion_depth: u32,
    pub max_loop_iterations: u64,
    pub max_async_tasks: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SecurityPolicy {
    /// Everything allowed, no caps.
    pub fn unrestricted() -> Self {
        Self {
            level: PolicyLevel::Unrestricted,
            allow_packages: AHashSet::new(),
            deny_packages: AHashSet::new(),
            allow_classes: AHashSet::new(),
            deny_classes: AHashSet::new(),
            deny_methods: AHashSet::new(),
            allow_foreign_interop: true,
            allow_set_accessible: true,
            allow_stdio: true,
            allow_file_io: true,
            allow_network: true,
            allow_process_exec: true,
            max_execution_time_ms: 0,
            max_recursion_depth: 0,
            max_loop_iterations: 0,
            max_async_tasks: 0,
        }
    }

    /// Interop and stdio allowed; file, network, and process access denied.
    pub fn standard() -> Self {
        Self {
            level: PolicyLevel::Standard,
            allow_foreign_interop: true,
            allow_set_accessible: false,
            allow_file_io: false,
            allow_network: false,
            allow_process_exec: false,
            max_recursion_depth: 4096,
            ..Self::unrestricted()
        }
    }

    /// Pure computation profile with conservative caps.
    pub fn strict() -> Self {
        Self {
            level: PolicyLevel::Strict,
            allow_foreign_interop: false,
            allow_set_accessible: false,
            allow_stdio: false,
            allow_file_io: false,
            allow_network: false,
            allow_process_exec: false,
            max_execution_time_ms: 10_000,
            max_recursion_depth: 1024,
            max_loop_iterations: 10_000_000,
            max_async_tasks: 64,
            ..Self::unrestricted()
        }
    }

    /// Translates the policy's numeric caps to [`ResourceLimits`] (`0` = unlimited).
    pub fn resource_limits(&self) -> ResourceLimits {
        let mut limits = ResourceLimits::unlimited();
        if self.max_execution_time_ms > 0 {
            limits = limits.max_duration(Duration::from_millis(self.max_execution_time_ms));
        }
        if self.max_recursion_depth > 0 {
            limits = limits.max_recursion_depth(self.max_recursion_depth);
        }
        if self.max_loop_iterations > 0 {
            limits = limits.max_loop_iterations(self.max_loop_iterations);
        }
        if self.max_async_tasks > 0 {
            limits = limits.max_async_tasks(self.max_async_tasks);
        }
        limits
    }

    /// Whether a foreign class may be touched at all.
    pub fn is_class_allowed(&self, full_name: &str) -> bool {
        if self.deny_classes.contains(full_name) {
            return false;
        }
        if self.allow_classes.contains(full_name) {
            return true;
        }
        if self.deny_packages.iter().any(|pkg| has_package_prefix(full_name, pkg)) {
            return false;
        }
        if !self.allow_packages.is_empty() {
            return self.allow_packages.iter().any(|pkg| has_package_prefix(full_name, pkg));
        }
        true
    }

    pub fn is_method_allowed(&self, full_name: &str, method: &str) -> bool {
        !self.deny_methods.contains(&format!("{full_name}#{method}"))
    }

    pub fn check_class(&self, full_name: &str) -> RunResult<()> {
        self.check_foreign_interop(full_name)?;
        if self.is_class_allowed(full_name) {
            Ok(())
        } else {
            Err(denied(format!("access to class {full_name}")))
        }
    }

    pub fn check_method(&self, full_name: &str, method: &str) -> RunResult<()> {
        self.check_class(full_name)?;
        if self.is_method_allowed(full_name, method) {
            Ok(())
        } else {
            Err(denied(format!("call to {full_name}#{method}")))
        }
    }

    pub fn check_foreign_interop(&self, action: &str) -> RunResult<()> {
        if self.allow_foreign_interop {
            Ok(())
        } else {
            Err(denied(format!("foreign interop ({action})")))
        }
    }

    pub fn check_stdio(&self) -> RunResult<()> {
        if self.allow_stdio {
            Ok(())
        } else {
            Err(denied("standard input/output"))
        }
    }

    pub fn check_set_accessible(&self) -> RunResult<()> {
        if self.allow_set_accessible {
            Ok(())
        } else {
            Err(denied("accessibility override"))
        }
    }
}

fn denied(action: impl std::fmt::Display) -> RunError {
    RunError::uncatchable(ExcKind::SecurityDenied, action)
}

/// Prefix match on package boundaries: `java.io` matches `java.io.File` but
/// not `java.iomega.X`.
fn has_package_prefix(full_name: &str, pkg: &str) -> bool {
    full_name
        .strip_prefix(pkg)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(f: impl FnOnce(&mut SecurityPolicy)) -> SecurityPolicy {
        let mut p = SecurityPolicy::unrestricted();
        f(&mut p);
        p
    }

    #[test]
    fn deny_class_wins_over_allow_package() {
        let p = policy_with(|p| {
            p.allow_packages.insert("java.util".into());
            p.deny_classes.insert("java.util.Scanner".into());
        });
        assert!(!p.is_class_allowed("java.util.Scanner"));
        assert!(p.is_class_allowed("java.util.ArrayList"));
    }

    #[test]
    fn allow_class_wins_over_deny_package() {
        let p = policy_with(|p| {
            p.deny_packages.insert("java.io".into());
            p.allow_classes.insert("java.io.PrintStream".into());
        });
        assert!(p.is_class_allowed("java.io.PrintStream"));
        assert!(!p.is_class_allowed("java.io.File"));
    }

    #[test]
    fn nonempty_allow_list_requires_match() {
        let p = policy_with(|p| {
            p.allow_packages.insert("java.util".into());
        });
        assert!(p.is_class_allowed("java.util.HashMap"));
        assert!(!p.is_class_allowed("java.net.Socket"));
    }

    #[test]
    fn package_prefix_respects_boundaries() {
        assert!(has_package_prefix("java.io.File", "java.io"));
        assert!(!has_package_prefix("java.iomega.X", "java.io"));
    }

    #[test]
    fn zero_caps_mean_unlimited() {
        let limits = SecurityPolicy::unrestricted().resource_limits();
        assert!(limits.max_duration.is_none());
        assert!(limits.max_recursion_depth.is_none());
    }

    #[test]
    fn denial_is_uncatchable() {
        let p = policy_with(|p| p.allow_foreign_interop = false);
        let err = p.check_foreign_interop("java.lang.System").unwrap_err();
        assert!(!err.is_catchable());
    }
}
