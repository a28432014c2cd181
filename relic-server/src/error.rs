//! Error taxonomy shared by the relic services.

use snafu::Snafu;

use crate::{blobs::BlobError, store::StoreError};

/// Errors returned by the services.
///
/// The HTTP layer maps each variant onto a status code, see [`crate::http`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A request argument failed validation.
    #[snafu(display("{message}"))]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },
    /// The requested entity does not exist or was deleted.
    #[snafu(display("{what} not found"))]
    NotFound {
        /// Kind of entity that was looked up.
        what: &'static str,
    },
    /// The relic exists but its expiry has passed.
    #[snafu(display("relic has expired"))]
    Gone,
    /// The caller is known but not allowed to do this.
    #[snafu(display("{reason}"))]
    Forbidden {
        /// Human readable reason.
        reason: &'static str,
    },
    /// The operation requires a client identity.
    #[snafu(display("client identity required"))]
    Unauthorized,
    /// The operation collides with existing state.
    #[snafu(display("{message}"))]
    Conflict {
        /// Human readable reason.
        message: &'static str,
    },
    /// The uploaded content is larger than the configured limit.
    #[snafu(display("content of {size} bytes exceeds the limit of {max} bytes"))]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// Every generated id collided with an existing one.
    #[snafu(display("failed to generate a unique id after {attempts} attempts"))]
    GenerationExhausted {
        /// Number of ids that were tried.
        attempts: usize,
    },
    /// The blob store failed or timed out.
    #[snafu(display("blob storage unavailable"))]
    StorageUnavailable {
        /// Underlying blob store failure.
        source: BlobError,
    },
    /// The metadata store failed.
    #[snafu(transparent)]
    Store {
        /// Underlying metadata store failure.
        source: StoreError,
    },
    /// A stored password hash could not be produced or parsed.
    #[snafu(display("password hashing failed: {message}"))]
    PasswordHash {
        /// Description from the hasher.
        message: String,
    },
    /// A blocking task was cancelled or panicked.
    #[snafu(display("blocking task failed"))]
    TaskFailed {
        /// Join failure from the runtime.
        source: tokio::task::JoinError,
    },
    /// A backup document could not be encoded.
    #[snafu(display("failed to encode backup"))]
    Backup {
        /// Underlying serialization failure.
        source: serde_json::Error,
    },
}

/// Result type defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error is caused by the server rather than the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::GenerationExhausted { .. }
                | Self::StorageUnavailable { .. }
                | Self::Store { .. }
                | Self::PasswordHash { .. }
                | Self::TaskFailed { .. }
                | Self::Backup { .. }
        )
    }
}
