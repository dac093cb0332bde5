use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by query construction and pipeline execution.
///
/// Spec and schema problems are reported synchronously when a [`Scan`] is
/// built; reader and invariant failures travel down the record stream and
/// terminate it with the original cause.
///
/// The type is `Clone` so a failure cached behind a shared in-flight fetch
/// can be handed to every waiter.
///
/// [`Scan`]: crate::Scan
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// The filter specification is malformed.
    #[error("invalid filter spec: {reason}")]
    Spec {
        /// What was wrong with the spec
        reason: String,
    },

    /// A predicate or field path is absent from every row group.
    #[error("path '{path}' not found in any row group")]
    Schema {
        /// The unresolvable column path
        path: String,
    },

    /// An I/O failure propagated from the underlying reader.
    #[error("reader error: {source}")]
    Reader {
        /// The original cause
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// An internal invariant was violated. Fatal.
    #[error("invariant violated: {reason}")]
    Invariant {
        /// Which invariant broke
        reason: String,
    },
}

impl Error {
    pub(crate) fn spec(reason: impl Into<String>) -> Self {
        Error::Spec {
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(path: impl Into<String>) -> Self {
        Error::Schema { path: path.into() }
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Error::Invariant {
            reason: reason.into(),
        }
    }

    /// Wraps an arbitrary error as a reader failure.
    pub fn reader(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Reader {
            source: Arc::new(source),
        }
    }

    /// Wraps a plain message as a reader failure.
    pub fn reader_msg(message: impl Into<String>) -> Self {
        #[derive(Debug, Error)]
        #[error("{0}")]
        struct Message(String);

        Error::Reader {
            source: Arc::new(Message(message.into())),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
