//! Crate-wide error type

use thiserror::Error;

/// Errors surfaced by buffer, interpretation and registry operations.
///
/// Decode failures are deliberately absent: they are recovered locally by
/// substituting U+FFFD and never abort a call.
#[derive(Debug, Error)]
pub enum Error {
    /// A byte or character index lies outside the addressed buffer or
    /// interpretation. The call fails without any state change.
    #[error("position {position} out of bounds (len: {len})")]
    BadPosition { position: usize, len: usize },

    /// An iterator was used with a tree it does not belong to, or has been
    /// invalidated. This is a programmer error, not a user-visible fault.
    #[error("iterator does not belong to this tree or is stale")]
    InvalidIterator,

    /// Attempted to remove the last caret of a caret set.
    #[error("a caret set must contain at least one caret")]
    EmptyCaretSet,

    /// The file source failed to read or write.
    #[error("file source error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
