use crate::config;
use captains_log::*;
use std::any::Any;
use std::backtrace::Backtrace;

/// Renders a panic payload into a printable reason.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    return "non-string panic payload".to_string();
}

/// Captures the current backtrace, truncated to the configured stack buffer size.
///
/// Returns None when the stack buffer size is 0.
pub(crate) fn capture_stack() -> Option<String> {
    let limit = config::stack_buffer_size();
    if limit == 0 {
        return None;
    }
    let mut rendered = Backtrace::force_capture().to_string();
    if rendered.len() > limit {
        let mut end = limit;
        while end > 0 && !rendered.is_char_boundary(end) {
            end -= 1;
        }
        rendered.truncate(end);
    }
    Some(rendered)
}

/// Logs a contained panic and returns the rendered reason.
pub(crate) fn log_panic(context: &str, payload: Box<dyn Any + Send>) -> String {
    let reason = panic_reason(payload.as_ref());
    match capture_stack() {
        Some(stack) => error!("{} panicked: {}\n{}", context, reason, stack),
        None => error!("{} panicked: {}", context, reason),
    }
    return reason;
}
