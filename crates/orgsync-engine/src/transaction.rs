//! Transaction scopes around listener hook calls.
//!
//! Every hook call runs between a `begin` and an `end` of the configured
//! [`TransactionScope`]. [`ScopeGuard`] ends the scope on drop so that early
//! returns and errors release it as well.

use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Error reported by a request lifecycle.
#[derive(Debug, Error)]
#[error("Request lifecycle failed: {message}")]
pub struct LifecycleError {
    pub message: String,
}

impl LifecycleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Brackets a unit of work.
pub trait TransactionScope: Send + Sync {
    fn begin(&self);
    fn end(&self);
}

/// Scope that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransaction;

impl TransactionScope for NoTransaction {
    fn begin(&self) {}
    fn end(&self) {}
}

/// Per-request setup and teardown of a backend session.
pub trait RequestLifecycle: Send + Sync {
    /// Open the request.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError` if the session could not be opened.
    fn start_request(&self) -> Result<(), LifecycleError>;

    /// Close the request.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError` if the session could not be closed cleanly.
    fn end_request(&self) -> Result<(), LifecycleError>;
}

/// Scope that only reaches the lifecycle at the outermost nesting level.
///
/// Lifecycle failures are logged and never interrupt the wrapped work.
#[derive(Debug)]
pub struct ReentrantScope<L> {
    lifecycle: L,
    depth: AtomicUsize,
}

impl<L: RequestLifecycle> ReentrantScope<L> {
    pub fn new(lifecycle: L) -> Self {
        Self {
            lifecycle,
            depth: AtomicUsize::new(0),
        }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> &L {
        &self.lifecycle
    }
}

impl<L: RequestLifecycle> TransactionScope for ReentrantScope<L> {
    fn begin(&self) {
        if self.depth.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(e) = self.lifecycle.start_request() {
                tracing::warn!(error = %e, "Failed to start request");
            }
        }
    }

    fn end(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
        match previous {
            Ok(1) => {
                if let Err(e) = self.lifecycle.end_request() {
                    tracing::warn!(error = %e, "Failed to end request");
                }
            }
            Ok(_) => {}
            Err(_) => tracing::warn!("Request ended more often than it was started"),
        }
    }
}

/// Begins a scope on creation and ends it on drop.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    scope: &'a dyn TransactionScope,
}

impl<'a> ScopeGuard<'a> {
    pub fn enter(scope: &'a dyn TransactionScope) -> Self {
        scope.begin();
        Self { scope }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLifecycle {
        calls: Mutex<Vec<&'static str>>,
        fail_end: bool,
    }

    impl RequestLifecycle for RecordingLifecycle {
        fn start_request(&self) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push("start");
            Ok(())
        }

        fn end_request(&self) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push("end");
            if self.fail_end {
                return Err(LifecycleError::new("session already closed"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_reentrant_scope_only_reaches_outermost_level() {
        let scope = ReentrantScope::new(RecordingLifecycle::default());
        {
            let _outer = ScopeGuard::enter(&scope);
            {
                let _inner = ScopeGuard::enter(&scope);
                assert_eq!(scope.depth(), 2);
            }
            assert_eq!(scope.depth(), 1);
        }
        assert_eq!(scope.depth(), 0);
        assert_eq!(*scope.lifecycle().calls.lock().unwrap(), vec!["start", "end"]);
    }

    #[test]
    fn test_guard_ends_scope_on_early_exit() {
        fn fails(scope: &dyn TransactionScope) -> Result<(), LifecycleError> {
            let _guard = ScopeGuard::enter(scope);
            Err(LifecycleError::new("hook failed"))
        }

        let scope = ReentrantScope::new(RecordingLifecycle::default());
        assert!(fails(&scope).is_err());
        assert_eq!(scope.depth(), 0);
    }

    #[test]
    fn test_end_failures_are_swallowed() {
        let scope = ReentrantScope::new(RecordingLifecycle {
            fail_end: true,
            ..Default::default()
        });
        scope.begin();
        scope.end();
        assert_eq!(scope.depth(), 0);
    }

    #[test]
    fn test_unbalanced_end_does_not_underflow() {
        let scope = ReentrantScope::new(RecordingLifecycle::default());
        scope.end();
        assert_eq!(scope.depth(), 0);
        assert!(scope.lifecycle().calls.lock().unwrap().is_empty());
    }
}
