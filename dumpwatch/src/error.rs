//! Error types for dumpwatch operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Alias for `Result<T, dumpwatch::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by supervision and reporting operations.
///
/// None of these are fatal to the monitored application: callers decide
/// whether to run their workload without crash protection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required crash context field was empty.
    #[error("crash context field `{field}` must not be empty")]
    InvalidContext {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The watchdog process could not be spawned.
    #[error("failed to launch watchdog {}: {source}", program.display())]
    Launch {
        /// Watchdog executable that was launched.
        program: PathBuf,
        /// Underlying spawn error.
        source: io::Error,
    },

    /// The rendezvous channel did not appear within the wait budget.
    #[error("watchdog not ready: {} did not appear within {waited:?}", channel.display())]
    RendezvousTimeout {
        /// Channel that was polled.
        channel: PathBuf,
        /// Wait budget that elapsed.
        waited: Duration,
    },

    /// The watchdog process could not be terminated.
    #[error("failed to terminate watchdog: {0}")]
    Termination(#[source] io::Error),

    /// The rendezvous channel could not be opened by the watchdog.
    #[error("failed to open rendezvous channel {}: {source}", path.display())]
    Channel {
        /// Channel path.
        path: PathBuf,
        /// Underlying bind error.
        source: io::Error,
    },

    /// The upload request failed before a response was received.
    #[error("upload to {url} failed: {reason}")]
    Transport {
        /// Reporting server address.
        url: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// The reporting server answered with a non-success status.
    #[error("reporting server returned HTTP {status}: {body}")]
    Rejected {
        /// Numeric response status.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// A file attachment could not be opened.
    #[error("cannot attach {}: {source}", path.display())]
    Attachment {
        /// Path of the attachment.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The operation is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// Any other I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}
