//! Framing for client/watchdog messages.
//!
//! A frame is a `u32` big-endian payload length followed by the `postcard`
//! encoding of one [`Request`](crate::Request) or
//! [`Response`](crate::Response). Frames above [`MAX_FRAME`] are refused in
//! both directions.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Largest accepted payload. A crash report request carries little more
/// than a dump path.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Maps a postcard failure onto an I/O error.
fn invalid(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed frame: {e}"))
}

/// Writes `msg` as one frame and flushes `w`.
pub fn encode<W: Write>(w: &mut W, msg: &impl Serialize) -> io::Result<()> {
    let payload = postcard::to_allocvec(msg).map_err(invalid)?;
    if payload.len() > MAX_FRAME {
        return Err(invalid(format!("{} byte payload exceeds limit", payload.len())));
    }
    let len = u32::try_from(payload.len()).map_err(invalid)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    w.write_all(&frame)?;
    w.flush()
}

/// Reads one frame from `r`.
///
/// A stream that ends before the length prefix yields
/// [`io::ErrorKind::UnexpectedEof`], which callers treat as a hang-up.
pub fn decode<T: DeserializeOwned>(r: &mut impl Read) -> io::Result<T> {
    let mut prefix = [0u8; 4];
    r.read_exact(&mut prefix)?;
    let len = usize::try_from(u32::from_be_bytes(prefix)).map_err(invalid)?;
    if len > MAX_FRAME {
        return Err(invalid(format!("{len} byte payload exceeds limit")));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    postcard::from_bytes(&payload).map_err(invalid)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Request, Response, channel_name};

    #[test]
    fn crashed_keeps_dump_path() {
        let mut buf = Vec::new();
        encode(
            &mut buf,
            &Request::Crashed {
                dump_path: Some("/tmp/d.dmp".into()),
            },
        )
        .unwrap();

        let mut cursor = io::Cursor::new(&buf);
        match decode::<Request>(&mut cursor).unwrap() {
            Request::Crashed { dump_path } => assert_eq!(dump_path.as_deref(), Some("/tmp/d.dmp")),
            other => panic!("expected Crashed, got {other:?}"),
        }
    }

    #[test]
    fn frames_are_read_back_in_order() {
        let mut buf = Vec::new();
        encode(&mut buf, &Request::Register { pid: 1234 }).unwrap();
        encode(&mut buf, &Request::Exiting).unwrap();

        let mut cursor = io::Cursor::new(&buf);
        assert!(matches!(
            decode::<Request>(&mut cursor).unwrap(),
            Request::Register { pid: 1234 }
        ));
        assert!(matches!(
            decode::<Request>(&mut cursor).unwrap(),
            Request::Exiting
        ));
        let eof = decode::<Request>(&mut cursor).unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn registered_carries_dump_dir() {
        let mut buf = Vec::new();
        encode(
            &mut buf,
            &Response::Registered {
                dump_dir: "/var/dumps".into(),
            },
        )
        .unwrap();
        let mut cursor = io::Cursor::new(&buf);
        match decode::<Response>(&mut cursor).unwrap() {
            Response::Registered { dump_dir } => assert_eq!(dump_dir, "/var/dumps"),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_frame() {
        let header = (32u32 * 1024 * 1024).to_be_bytes();
        let mut cursor = io::Cursor::new(&header[..]);
        let err = decode::<Request>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn channel_name_is_keyed_by_pid() {
        assert_eq!(channel_name(1234), "dumpwatch-1234.sock");
        assert_ne!(channel_name(1), channel_name(2));
    }
}
