//! Wire protocol between a monitored process and its dumpwatch watchdog.
//!
//! Messages are serialized with [`postcard`] and framed with a 4-byte
//! big-endian length prefix, suitable for any reliable byte stream
//! (Unix socket, named pipe, TCP).

mod codec;
mod message;

pub use codec::{MAX_FRAME, decode, encode};
pub use message::{CHANNEL_PREFIX, CHANNEL_SUFFIX, Request, Response, channel_name};
