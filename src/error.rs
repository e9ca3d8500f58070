//! The error-reporting sink the allocator core calls into.
//!
//! Corruption (a bad block id, a double free, a trash-sentinel mismatch)
//! is unrecoverable and must stop the process before it does more damage.
//! Resource exhaustion (the hunk is full, a caller passed a null pointer
//! to free) is recoverable at a level above the allocator. Rather than
//! building an exception hierarchy into the allocator, both cases are
//! routed through two small callbacks injected once at init — the
//! allocator core never needs to know what logging or shutdown machinery
//! the embedding engine actually uses.

use std::fmt;

/// A non-fatal condition the caller can recover from. The allocator has
/// already unwound any partial state before constructing one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropError {
    /// `zone_free` was called with a null pointer.
    FreeNull,
    /// A hunk allocation could not be satisfied without exceeding the
    /// reserved region.
    HunkExhausted { requested: usize, remaining: usize },
}

impl fmt::Display for DropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropError::FreeNull => write!(f, "attempted to free a null pointer"),
            DropError::HunkExhausted {
                requested,
                remaining,
            } => write!(
                f,
                "hunk allocation of {} bytes exceeds {} bytes remaining",
                requested, remaining
            ),
        }
    }
}

impl std::error::Error for DropError {}

/// Receives fatal and drop conditions raised by the zone and hunk
/// allocators. Installed once via [`crate::init::com_init`].
pub trait ErrorSink {
    /// A corrupted or misused allocator invariant. Must not return.
    fn fatal(&self, message: &str) -> !;

    /// A recoverable condition. The allocator has already restored its
    /// own invariants; the sink decides how loud to be about it.
    fn drop_error(&self, err: DropError);
}

/// Default sink: logs through the `log` crate, aborts the process for
/// fatal conditions and logs-and-ignores drop conditions (matching the
/// upstream behaviour where `ERR_DROP` longjmps back to a safe point —
/// this crate has no such jump target, so it is up to the caller to
/// check `Result`s; this sink only reports).
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn fatal(&self, message: &str) -> ! {
        log::error!("fatal allocator error: {}", message);
        std::process::abort();
    }

    fn drop_error(&self, err: DropError) {
        log::warn!("recoverable allocator error: {}", err);
    }
}

/// A sink that panics instead of aborting on fatal conditions. Useful
/// for embedding a host that wants to unwind back to a recovery point
/// (a script sandbox, a test harness) rather than take the whole
/// process down; `abort()` can't be caught, a panic can.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicErrorSink;

impl ErrorSink for PanicErrorSink {
    fn fatal(&self, message: &str) -> ! {
        panic!("fatal allocator error: {}", message);
    }

    fn drop_error(&self, err: DropError) {
        log::warn!("recoverable allocator error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_error_messages_are_descriptive() {
        let err = DropError::HunkExhausted {
            requested: 100,
            remaining: 10,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("10"));
    }
}
