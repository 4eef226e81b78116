//! Process-wide settings.
//!
//! The crate has a single tunable: the stack buffer size used when a contained
//! panic is written to the error log. Set it once during startup, before any
//! server or executor is constructed.

use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_STACK_BUFFER_SIZE: usize = 4096;

static STACK_BUFFER_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_STACK_BUFFER_SIZE);

/// Sets the byte limit for stack traces captured on contained panics.
///
/// With a non-zero size, panic handlers render a backtrace truncated to that
/// many bytes into the error log. With 0, only the panic payload is logged.
pub fn set_stack_buffer_size(size: usize) {
    STACK_BUFFER_SIZE.store(size, Ordering::Relaxed);
}

#[inline]
pub fn stack_buffer_size() -> usize {
    STACK_BUFFER_SIZE.load(Ordering::Relaxed)
}
