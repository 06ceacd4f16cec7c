//! Standalone error types for persist-mem
//!
//! Uses thiserror for clean, idiomatic Rust error definitions. All mutating
//! public operations surface failure as a null offset, `None`, or `false`
//! (spec §7) — `PersistMemError` exists for the internal plumbing and for
//! callers that want a reason rather than a bare sentinel (`Manager::reason`).

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::{error, warn};

/// Errors produced while creating, loading, or mutating a region.
///
/// Only [`Manager::create`](crate::manager::Manager::create),
/// [`Manager::create_with_config`](crate::manager::Manager::create_with_config),
/// [`Manager::load`](crate::manager::Manager::load), and
/// [`Manager::load_from_file`](crate::manager::Manager::load_from_file) return
/// this type directly. Every other mutating operation on `Manager` collapses
/// its failures to a null offset, `None`, or `false` per spec §7; this enum's
/// constructors still run (and, under the `logging` feature, still log) on
/// those paths, so the reason is observable in logs even where the public
/// return type can't carry it.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PersistMemError {
    /// `create`/`load` called with a null base, undersized region, or
    /// misaligned base pointer.
    #[error("invalid region: {reason}")]
    InvalidRegion {
        /// Human-readable reason.
        reason: String,
    },

    /// `load` rejected an image: wrong magic, unsupported version, or a
    /// `region-size` mismatch against the supplied buffer.
    #[error("image mismatch: {reason}")]
    ImageMismatch {
        /// Human-readable reason.
        reason: String,
    },

    /// `allocate`/`reallocate` could not find or create a fitting free
    /// chunk in any block.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested by the caller.
        requested: u64,
        /// Bytes of free capacity across all blocks at the time of failure.
        available: u64,
    },

    /// `create`/`load` attempted while another manager is already bound in
    /// this process.
    #[error("a manager is already bound in this process")]
    DoubleBind,

    /// `save`/`load_from_file` failed to read or write the backing file.
    #[error("I/O failure: {0}")]
    Io(String),

    /// The validator found a structural violation.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A mutating operation was attempted while the manager was unbound.
    #[error("manager is not bound to a region")]
    Unbound,
}

impl PersistMemError {
    pub(crate) fn invalid_region(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        #[cfg(feature = "logging")]
        warn!(%reason, "invalid region");
        Self::InvalidRegion { reason }
    }

    pub(crate) fn image_mismatch(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        #[cfg(feature = "logging")]
        warn!(%reason, "image mismatch on load");
        Self::ImageMismatch { reason }
    }

    pub(crate) fn out_of_memory(requested: u64, available: u64) -> Self {
        #[cfg(feature = "logging")]
        warn!(requested, available, "allocation failed: out of memory");
        Self::OutOfMemory {
            requested,
            available,
        }
    }

    pub(crate) fn io(err: &std::io::Error) -> Self {
        let msg = err.to_string();
        #[cfg(feature = "logging")]
        error!(error = %msg, "I/O failure");
        Self::Io(msg)
    }

    pub(crate) fn corruption(details: impl Into<String>) -> Self {
        let details = details.into();
        #[cfg(feature = "logging")]
        error!(%details, "corruption detected by validator");
        Self::Corruption(details)
    }

    pub(crate) fn unbound() -> Self {
        #[cfg(feature = "logging")]
        warn!("mutating operation attempted on an unbound manager");
        Self::Unbound
    }
}

/// Result alias used throughout the crate's internals.
pub type PersistMemResult<T> = std::result::Result<T, PersistMemError>;

/// Convenience alias matching the teacher crate's `Result` re-export.
pub type Result<T> = PersistMemResult<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        let err = PersistMemError::out_of_memory(4096, 0);
        assert_eq!(
            err.to_string(),
            "out of memory: requested 4096 bytes, 0 available"
        );
    }

    #[test]
    fn double_bind_has_fixed_message() {
        assert_eq!(
            PersistMemError::DoubleBind.to_string(),
            "a manager is already bound in this process"
        );
    }
}
