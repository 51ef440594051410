//! Protocol message types for client↔watchdog communication.

use serde::{Deserialize, Serialize};

/// File-name prefix of a rendezvous channel.
pub const CHANNEL_PREFIX: &str = "dumpwatch-";

/// File-name suffix of a rendezvous channel.
pub const CHANNEL_SUFFIX: &str = ".sock";

/// Returns the rendezvous channel file name for the monitored `pid`.
///
/// Both sides derive the name independently; nothing else is exchanged
/// before the channel exists.
pub fn channel_name(pid: u32) -> String {
    format!("{CHANNEL_PREFIX}{pid}{CHANNEL_SUFFIX}")
}

/// Request sent from the monitored process to the watchdog.
#[derive(Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Request {
    /// Registers the connecting process as a monitored client.
    Register {
        /// Process ID of the client.
        pid: u32,
    },
    /// The client trapped a fatal fault.
    Crashed {
        /// Path of the minidump written for the fault, if one was produced.
        dump_path: Option<String>,
    },
    /// The client is shutting down normally.
    Exiting,
}

/// Response sent from the watchdog to the monitored process.
#[derive(Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Response {
    /// Reply to [`Request::Register`].
    Registered {
        /// Directory the client should write minidumps into.
        dump_dir: String,
    },
    /// Acknowledgment for [`Request::Crashed`] / [`Request::Exiting`].
    Ack,
    /// The request was rejected.
    Error(String),
}
