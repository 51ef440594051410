//! Application-side client of the watchdog's crash-capture server.
//!
//! This is what an in-process fault trap uses once the rendezvous has
//! succeeded: register, then report a crash (with the minidump it wrote)
//! or a normal exit.

#[cfg(unix)]
mod inner {
    use std::io;
    use std::os::unix::net::UnixStream;
    use std::path::{Path, PathBuf};

    use dumpwatch_proto::{Request, Response};

    /// A registered connection to a running watchdog.
    #[derive(Debug)]
    pub struct CrashClient {
        /// The underlying Unix socket stream.
        stream: UnixStream,
        /// Where the watchdog expects minidumps to be written.
        dump_dir: PathBuf,
    }

    impl CrashClient {
        /// Connects to `channel` and registers the current process.
        pub fn connect(channel: impl AsRef<Path>) -> io::Result<Self> {
            Self::register(channel, std::process::id())
        }

        /// Connects to `channel` and registers `pid` as the monitored client.
        pub fn register(channel: impl AsRef<Path>, pid: u32) -> io::Result<Self> {
            let mut stream = UnixStream::connect(channel)?;
            dumpwatch_proto::encode(&mut stream, &Request::Register { pid })?;
            match dumpwatch_proto::decode::<Response>(&mut stream)? {
                Response::Registered { dump_dir } => Ok(Self {
                    stream,
                    dump_dir: PathBuf::from(dump_dir),
                }),
                Response::Error(e) => Err(io::Error::other(e)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected response",
                )),
            }
        }

        /// Directory the watchdog asked minidumps to be written into.
        pub fn dump_dir(&self) -> &Path {
            &self.dump_dir
        }

        /// Reports a fatal fault, with the minidump if one was written.
        ///
        /// Returns once the watchdog has taken the event; the upload happens
        /// afterwards in the watchdog process.
        pub fn crashed(&mut self, dump_path: Option<&Path>) -> io::Result<()> {
            let dump_path = dump_path.map(|p| p.to_string_lossy().into_owned());
            self.send_expect_ack(&Request::Crashed { dump_path })
        }

        /// Reports a normal shutdown and closes the connection.
        pub fn exiting(mut self) -> io::Result<()> {
            self.send_expect_ack(&Request::Exiting)
        }

        /// Sends a request and expects [`Response::Ack`].
        fn send_expect_ack(&mut self, req: &Request) -> io::Result<()> {
            dumpwatch_proto::encode(&mut self.stream, req)?;
            match dumpwatch_proto::decode::<Response>(&mut self.stream)? {
                Response::Ack => Ok(()),
                Response::Error(e) => Err(io::Error::other(e)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected response",
                )),
            }
        }
    }

}

#[cfg(unix)]
pub use inner::CrashClient;
