//! Error types shared by the arena family and the async I/O queue.
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.

use std::alloc::Layout;
use std::io;

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::warn;

// ============================================================================
// Arena / VArena errors
// ============================================================================

/// Errors produced by `arena`/`varena` construction and allocation.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ArenaError {
    #[error("alignment {align} is not a power of two")]
    InvalidAlignment { align: usize },

    #[error("chunk size {size} must be a non-zero multiple of alignment {align}")]
    InvalidChunkSize { size: usize, align: usize },

    #[error("raw allocation failed: {size} bytes at {align} byte alignment")]
    AllocationFailed { size: usize, align: usize },

    #[error("flexible-struct layout overflowed: off={off}, esz={esz}, n={n}")]
    FlexSizeOverflow { off: usize, esz: usize, n: usize },
}

impl ArenaError {
    /// Whether retrying the same request with no other change could plausibly succeed.
    ///
    /// Configuration errors never become retryable; a transient allocator
    /// failure might, if the caller frees memory elsewhere first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }

    pub fn invalid_alignment(align: usize) -> Self {
        Self::InvalidAlignment { align }
    }

    pub fn invalid_chunk_size(size: usize, align: usize) -> Self {
        Self::InvalidChunkSize { size, align }
    }

    #[must_use]
    pub fn allocation_failed(layout: Layout) -> Self {
        Self::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        }
    }

    pub fn flex_size_overflow(off: usize, esz: usize, n: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(off, esz, n, "flexible-struct size computation saturated");

        Self::FlexSizeOverflow { off, esz, n }
    }
}

/// Result type for arena/varena operations.
pub type ArenaResult<T> = core::result::Result<T, ArenaError>;

// ============================================================================
// Ioq errors
// ============================================================================

/// Errors produced by the I/O queue's public API.
///
/// Per-entry operation failures (the `close`/`opendir`/`closedir` syscall
/// itself failing) are not represented here: they are reported on the
/// [`crate::ioq::IoqEnt`] that comes back from `pop`/`trypop`, as
/// `ret`/`error`, exactly as the queue's contract describes. This enum only
/// covers failures to get a request *into* the queue, or to create one.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid queue configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("entry pool exhausted (depth {depth})")]
    PoolExhausted { depth: usize },

    #[error("queue has been destroyed")]
    Destroyed,

    #[error("failed to spawn worker thread {index}")]
    WorkerSpawnFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
}

impl QueueError {
    /// Submission failures are transient: the caller may retry once capacity
    /// frees up. A destroyed queue is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn pool_exhausted(depth: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(depth, "ioq entry pool exhausted");

        Self::PoolExhausted { depth }
    }
}

/// Result type for `ioq` submission-side operations.
pub type QueueResult<T> = core::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_error_messages_are_populated() {
        let err = ArenaError::invalid_alignment(3);
        assert!(err.to_string().contains('3'));

        let err = ArenaError::allocation_failed(Layout::new::<u64>());
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn arena_retryability() {
        assert!(ArenaError::allocation_failed(Layout::new::<u64>()).is_retryable());
        assert!(!ArenaError::invalid_alignment(3).is_retryable());
    }

    #[test]
    fn queue_error_messages_are_populated() {
        let err = QueueError::pool_exhausted(16);
        assert!(err.to_string().contains("16"));
        assert!(err.is_retryable());

        let err = QueueError::Destroyed;
        assert!(!err.is_retryable());
    }
}
