//! Process-wide shutdown coordination.
//! A flag set by signal handlers so the operation loop can stop between
//! operations instead of mid-copy.
//!
//! Relaxed atomics are sufficient for a one-way "stop" flag, and `request()`
//! is safe to call from signal handlers.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative shutdown (idempotent).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Check whether a shutdown has been requested.
#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Test/utility-only: clear the shutdown flag.
#[cfg(any(test, feature = "test-helpers"))]
#[inline]
pub fn reset() {
    SHUTDOWN.store(false, Ordering::Relaxed);
}
