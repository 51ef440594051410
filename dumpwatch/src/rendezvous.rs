//! Rendezvous channel: the readiness handshake between supervisor and watchdog.
//!
//! The watchdog binds a Unix socket whose name is derived from the monitored
//! process ID. The supervisor never connects to it during the handshake; the
//! socket's existence alone means the watchdog is ready to accept crash
//! registrations.

use std::path::{Path, PathBuf};

use dumpwatch_proto::channel_name;

/// Directory holding rendezvous channels when none is configured.
///
/// `$XDG_RUNTIME_DIR/dumpwatch` where the platform has a runtime directory,
/// otherwise `dumpwatch` under the temp directory.
pub fn default_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dumpwatch")
}

/// Path of the channel for monitored process `pid` inside `dir`.
pub fn channel_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(channel_name(pid))
}

#[cfg(unix)]
pub use listener::RendezvousListener;

#[cfg(unix)]
mod listener {
    use std::fs;
    use std::os::unix::fs::DirBuilderExt;
    use std::os::unix::net::UnixListener;
    use std::path::{Path, PathBuf};

    use crate::error::{Error, Result};

    /// Watchdog-side channel. Removes its socket file when dropped.
    #[derive(Debug)]
    pub struct RendezvousListener {
        /// Bound socket.
        listener: UnixListener,
        /// Socket file path.
        path: PathBuf,
    }

    impl RendezvousListener {
        /// Creates the channel for `pid` in `dir`.
        ///
        /// A leftover socket from an earlier process with the same pid is
        /// replaced.
        pub fn bind(dir: &Path, pid: u32) -> Result<Self> {
            let path = super::channel_path(dir, pid);
            let channel_err = |source| Error::Channel {
                path: path.clone(),
                source,
            };

            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(channel_err)?;
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(channel_err(e));
                }
                _ => {}
            }
            let listener = UnixListener::bind(&path).map_err(channel_err)?;
            tracing::debug!(channel = %path.display(), "rendezvous channel open");
            Ok(Self { listener, path })
        }

        /// Socket file path.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Independent handle on the listening socket.
        pub fn try_clone_listener(&self) -> std::io::Result<UnixListener> {
            self.listener.try_clone()
        }
    }

    impl Drop for RendezvousListener {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}
