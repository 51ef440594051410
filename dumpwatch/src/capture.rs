//! Crash-capture events and the server that produces them.
//!
//! The in-process fault trap of a monitored application connects to the
//! watchdog's rendezvous channel, registers its pid and reports a crash (with
//! the minidump it wrote) or a normal exit. The server turns that
//! conversation into [`CrashEvent`]s for the watchdog state machine.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// What the crash-capture collaborator observed about a client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CrashEvent {
    /// A process registered as a monitored client.
    ClientConnected {
        /// Client process ID.
        pid: u32,
    },
    /// A client trapped a fatal fault.
    ClientCrashed {
        /// Client process ID.
        pid: u32,
        /// Minidump written for the fault; may be missing.
        dump_path: Option<PathBuf>,
    },
    /// A client went away without crashing.
    ClientExited {
        /// Client process ID.
        pid: u32,
    },
}

impl CrashEvent {
    /// Process the event is about.
    pub const fn pid(&self) -> u32 {
        match self {
            Self::ClientConnected { pid }
            | Self::ClientCrashed { pid, .. }
            | Self::ClientExited { pid } => *pid,
        }
    }
}

/// Result of waiting for the next event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Next {
    /// An event arrived.
    Event(CrashEvent),
    /// Nothing arrived within the timeout.
    Idle,
    /// The source is gone; no more events will arrive.
    Closed,
}

/// A stream of crash events.
pub trait EventSource {
    /// Waits up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Next;
}

impl EventSource for Receiver<CrashEvent> {
    fn next_event(&mut self, timeout: Duration) -> Next {
        match self.recv_timeout(timeout) {
            Ok(event) => Next::Event(event),
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }
}

/// Replays a fixed script, then reports [`Next::Closed`].
impl EventSource for VecDeque<Next> {
    fn next_event(&mut self, _timeout: Duration) -> Next {
        self.pop_front().unwrap_or(Next::Closed)
    }
}

#[cfg(unix)]
pub use server::CaptureServer;

#[cfg(unix)]
mod server {
    use std::io::{self, BufReader};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread;
    use std::time::Duration;

    use dumpwatch_proto::{Request, Response};

    use super::{CrashEvent, EventSource, Next};
    use crate::rendezvous::RendezvousListener;

    /// Accepts client connections on a rendezvous channel and emits events.
    ///
    /// Runs one listener thread plus one thread per connected client; the
    /// watchdog only ever sees the resulting event stream.
    #[derive(Debug)]
    pub struct CaptureServer {
        /// Events from all client sessions.
        events: Receiver<CrashEvent>,
    }

    impl CaptureServer {
        /// Starts serving `channel`.
        ///
        /// Clients are told to write their dumps into `dump_dir`.
        pub fn start(channel: &RendezvousListener, dump_dir: PathBuf) -> io::Result<Self> {
            let listener = channel.try_clone_listener()?;
            let (tx, events) = mpsc::channel();
            thread::Builder::new()
                .name("dumpwatch-capture".into())
                .spawn(move || accept_loop(&listener, &tx, &dump_dir))?;
            Ok(Self { events })
        }
    }

    impl EventSource for CaptureServer {
        fn next_event(&mut self, timeout: Duration) -> Next {
            self.events.next_event(timeout)
        }
    }

    /// Hands each connection to its own session thread.
    fn accept_loop(listener: &UnixListener, tx: &Sender<CrashEvent>, dump_dir: &Path) {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "capture server stopped accepting");
                    return;
                }
            };
            let tx = tx.clone();
            let dump_dir = dump_dir.to_string_lossy().into_owned();
            let spawned = thread::Builder::new()
                .name("dumpwatch-client".into())
                .spawn(move || {
                    if let Err(e) = session(stream, &tx, dump_dir) {
                        tracing::warn!(error = %e, "client session ended with error");
                    }
                });
            if let Err(e) = spawned {
                tracing::error!(error = %e, "failed to spawn client session");
            }
        }
    }

    /// Serves one client until it disconnects.
    ///
    /// A disconnect says nothing about the client process: only an explicit
    /// `Crashed` or `Exiting` request produces an event after registration.
    /// Liveness of a silent client is left to the watchdog's exit poll.
    fn session(stream: UnixStream, tx: &Sender<CrashEvent>, dump_dir: String) -> io::Result<()> {
        let mut r = BufReader::new(stream.try_clone()?);
        let mut w = stream;
        let mut client: Option<u32> = None;
        let mut finished = false;

        loop {
            let req: Request = match dumpwatch_proto::decode(&mut r) {
                Ok(req) => req,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if let (Some(pid), false) = (client, finished) {
                        tracing::debug!(pid, "client disconnected without finishing");
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let resp = match (req, client) {
                (Request::Register { pid }, None) => {
                    client = Some(pid);
                    let _ = tx.send(CrashEvent::ClientConnected { pid });
                    Response::Registered {
                        dump_dir: dump_dir.clone(),
                    }
                }
                (Request::Register { .. }, Some(pid)) => {
                    Response::Error(format!("already registered as pid {pid}"))
                }
                (Request::Crashed { dump_path }, Some(pid)) if !finished => {
                    finished = true;
                    let _ = tx.send(CrashEvent::ClientCrashed {
                        pid,
                        dump_path: dump_path.map(PathBuf::from),
                    });
                    Response::Ack
                }
                (Request::Exiting, Some(pid)) if !finished => {
                    finished = true;
                    let _ = tx.send(CrashEvent::ClientExited { pid });
                    Response::Ack
                }
                (Request::Crashed { .. } | Request::Exiting, Some(_)) => Response::Ack,
                (_, Some(_)) => Response::Error("unsupported request".into()),
                (_, None) => Response::Error("not registered".into()),
            };
            dumpwatch_proto::encode(&mut w, &resp)?;
        }
    }
}


#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::panic)]
mod server_tests {
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    use dumpwatch_proto::{Request, Response};

    use super::*;
    use crate::rendezvous::RendezvousListener;

    const WAIT: Duration = Duration::from_secs(10);

    fn exchange(stream: &mut UnixStream, req: &Request) -> Response {
        dumpwatch_proto::encode(stream, req).unwrap();
        dumpwatch_proto::decode(stream).unwrap()
    }

    #[test]
    fn crash_conversation() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = RendezvousListener::bind(tmp.path(), 1234).unwrap();
        let mut server = CaptureServer::start(&channel, "/var/dumps".into()).unwrap();

        let mut client = UnixStream::connect(channel.path()).unwrap();
        match exchange(&mut client, &Request::Register { pid: 1234 }) {
            Response::Registered { dump_dir } => assert_eq!(dump_dir, "/var/dumps"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            server.next_event(WAIT),
            Next::Event(CrashEvent::ClientConnected { pid: 1234 })
        );

        let resp = exchange(
            &mut client,
            &Request::Crashed {
                dump_path: Some("/tmp/d.dmp".into()),
            },
        );
        assert!(matches!(resp, Response::Ack));
        assert_eq!(
            server.next_event(WAIT),
            Next::Event(CrashEvent::ClientCrashed {
                pid: 1234,
                dump_path: Some(Path::new("/tmp/d.dmp").to_owned()),
            })
        );

        // Disconnect after a crash is not a second event.
        drop(client);
        assert_eq!(server.next_event(Duration::from_millis(200)), Next::Idle);
    }

    #[test]
    fn silent_disconnect_is_not_an_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = RendezvousListener::bind(tmp.path(), 55).unwrap();
        let mut server = CaptureServer::start(&channel, ".".into()).unwrap();

        let mut client = UnixStream::connect(channel.path()).unwrap();
        exchange(&mut client, &Request::Register { pid: 55 });
        drop(client);

        assert_eq!(
            server.next_event(WAIT),
            Next::Event(CrashEvent::ClientConnected { pid: 55 })
        );
        assert_eq!(server.next_event(Duration::from_millis(200)), Next::Idle);

        // The same process can register again and still report.
        let mut again = UnixStream::connect(channel.path()).unwrap();
        exchange(&mut again, &Request::Register { pid: 55 });
        exchange(&mut again, &Request::Exiting);
        assert_eq!(
            server.next_event(WAIT),
            Next::Event(CrashEvent::ClientConnected { pid: 55 })
        );
        assert_eq!(
            server.next_event(WAIT),
            Next::Event(CrashEvent::ClientExited { pid: 55 })
        );
    }

    #[test]
    fn unregistered_crash_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = RendezvousListener::bind(tmp.path(), 3).unwrap();
        let mut server = CaptureServer::start(&channel, ".".into()).unwrap();

        let mut client = UnixStream::connect(channel.path()).unwrap();
        let resp = exchange(&mut client, &Request::Crashed { dump_path: None });
        assert!(matches!(resp, Response::Error(_)));
        drop(client);
        assert_eq!(server.next_event(Duration::from_millis(200)), Next::Idle);
    }
}
