//! Error handling and per-message error codes
//!
//! Two propagation channels exist, mirroring the two failure families of the
//! library:
//!
//! - Construction and resource-acquisition failures (building a fabric,
//!   attaching a context, requesting an unavailable thread-support level) are
//!   returned as [`Error`] values and abort the construction; no partial
//!   object escapes.
//! - Per-message conditions are carried as plain integer codes inside a
//!   [`Status`](crate::point_to_point::Status) so that long-running
//!   communication loops can inspect them and continue. The [`SUCCESS`]
//!   sentinel marks a clean completion.
//!
//! Caller contract violations (sending to an out-of-range rank, negative
//! user tags, mismatched reduction buffer lengths) are not errors of either
//! kind; they panic, as they indicate a bug in the calling program.

use thiserror::Error;

use crate::environment::Threading;
use crate::topology::Rank;

/// Code carried by a `Status`; `SUCCESS` means the message completed cleanly.
pub type ErrorCode = i32;

/// Sentinel code of a successfully completed or probed message.
pub const SUCCESS: ErrorCode = 0;

/// Code reported by a request that was cancelled before completion.
pub const CANCELLED: ErrorCode = 1;

/// Failures surfaced while constructing fabrics, contexts or communicators.
#[derive(Debug, Error)]
pub enum Error {
    /// An argument was structurally invalid; carries the 1-based position of
    /// the offending parameter.
    #[error("invalid argument {index}: {reason}")]
    InvalidArgument {
        /// 1-based position of the offending parameter
        index: usize,
        /// Human-readable description of the violated requirement
        reason: String,
    },

    /// The substrate could not grant the requested thread-support level.
    #[error("thread support level {requested:?} unavailable, best effort is {provided:?}")]
    ThreadingUnavailable {
        /// Level asked for at initialization
        requested: Threading,
        /// Highest level the substrate can offer
        provided: Threading,
    },

    /// A rank outside `0..size` was used to attach a context.
    #[error("rank {rank} out of range for a fabric of size {size}")]
    RankOutOfRange {
        /// The offending rank
        rank: Rank,
        /// Size of the fabric
        size: Rank,
    },

    /// An operation failed at runtime in a way that is not a caller error.
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),
}

impl Error {
    pub(crate) fn invalid_argument(index: usize, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            index,
            reason: reason.into(),
        }
    }
}
