//! Operating-system primitives used by the supervision logic.
//!
//! Everything above this layer is platform-agnostic and is tested against
//! fake implementations of [`Platform`].

mod pre_exec;

use std::fmt::Debug;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::{fs, io};

/// Process and rendezvous-channel operations.
pub trait Platform {
    /// Owned handle to a spawned process.
    type Process: Debug;

    /// Spawns `program` with `args`.
    fn spawn_process(&self, program: &Path, args: &[String]) -> io::Result<Self::Process>;

    /// Forcibly terminates a spawned process and reaps it.
    ///
    /// Terminating a process that already exited is not an error.
    fn terminate_process(&self, process: &mut Self::Process) -> io::Result<()>;

    /// Returns whether the process `pid` is still running.
    fn process_running(&self, pid: u32) -> io::Result<bool>;

    /// Returns whether the named rendezvous channel exists.
    fn channel_exists(&self, channel: &Path) -> bool;

    /// Removes a rendezvous channel. Missing channels are not an error.
    fn remove_channel(&self, channel: &Path) -> io::Result<()>;
}

impl<P: Platform + ?Sized> Platform for std::sync::Arc<P> {
    type Process = P::Process;

    fn spawn_process(&self, program: &Path, args: &[String]) -> io::Result<Self::Process> {
        (**self).spawn_process(program, args)
    }

    fn terminate_process(&self, process: &mut Self::Process) -> io::Result<()> {
        (**self).terminate_process(process)
    }

    fn process_running(&self, pid: u32) -> io::Result<bool> {
        (**self).process_running(pid)
    }

    fn channel_exists(&self, channel: &Path) -> bool {
        (**self).channel_exists(channel)
    }

    fn remove_channel(&self, channel: &Path) -> io::Result<()> {
        (**self).remove_channel(channel)
    }
}

/// The host operating system.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct NativePlatform;

/// A child process spawned by [`NativePlatform`].
#[derive(Debug)]
pub struct NativeProcess {
    /// The child; dropping it releases the OS handle.
    child: Child,
}

impl NativeProcess {
    /// OS process ID.
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Platform for NativePlatform {
    type Process = NativeProcess;

    fn spawn_process(&self, program: &Path, args: &[String]) -> io::Result<NativeProcess> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        pre_exec::apply(&mut cmd);
        let child = cmd.spawn()?;
        tracing::debug!(pid = child.id(), program = %program.display(), "spawned watchdog");
        Ok(NativeProcess { child })
    }

    fn terminate_process(&self, process: &mut NativeProcess) -> io::Result<()> {
        if process.child.try_wait()?.is_some() {
            return Ok(());
        }
        process.child.kill()?;
        process.child.wait()?;
        Ok(())
    }

    fn process_running(&self, pid: u32) -> io::Result<bool> {
        sys::process_running(pid)
    }

    fn channel_exists(&self, channel: &Path) -> bool {
        fs::symlink_metadata(channel).is_ok()
    }

    fn remove_channel(&self, channel: &Path) -> io::Result<()> {
        match fs::remove_file(channel) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::io;

    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    /// Probes `pid` with signal 0.
    pub(super) fn process_running(pid: u32) -> io::Result<bool> {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Ok(!is_zombie(pid)),
            Err(Errno::ESRCH) => Ok(false),
            // Exists, owned by someone else.
            Err(Errno::EPERM) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// A zombie still answers `kill(pid, 0)` but will never run again.
    #[cfg(target_os = "linux")]
    fn is_zombie(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.trim_start().chars().next()
            })
            .is_some_and(|state| state == 'Z')
    }

    #[cfg(not(target_os = "linux"))]
    const fn is_zombie(_pid: u32) -> bool {
        false
    }
}

#[cfg(not(unix))]
mod sys {
    use std::io;

    /// Liveness polling is only implemented for Unix.
    pub(super) fn process_running(_pid: u32) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process liveness polling requires a Unix platform",
        ))
    }
}
