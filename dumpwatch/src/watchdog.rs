//! Watchdog state machine.
//!
//! The watchdog runs in its own process next to the monitored application.
//! It opens the rendezvous channel, follows the crash-capture events for its
//! target and, when the target crashes, uploads exactly one report. A target
//! that goes away without crashing ends the watchdog quietly.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{CrashEvent, EventSource, Next};
use crate::clock::Clock;
use crate::context::CrashContext;
use crate::error::{Error, Result};
use crate::monitor::ProcessMonitor;
use crate::platform::Platform;
use crate::rendezvous;
use crate::upload::{HttpTransport, Transport, Uploader};

/// Lifecycle of a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum State {
    /// Context built, nothing opened yet.
    Idle,
    /// Creating the rendezvous channel.
    ChannelOpening,
    /// Channel open, waiting for the target to register.
    Listening,
    /// The target registered.
    ClientConnected,
    /// The target reported a fatal fault.
    Crashed,
    /// The target went away without crashing.
    ClientExited,
    /// The crash report was sent (successfully or not).
    ReportAttempted,
    /// Nothing left to do.
    Terminated,
}

/// How a watchdog run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Outcome {
    /// The target crashed and a report was attempted.
    Reported {
        /// Whether the reporting server accepted the report.
        delivered: bool,
    },
    /// The target exited without crashing; no report was sent.
    Exited,
}

impl Outcome {
    /// Whether the watchdog process should exit with status 0.
    pub const fn is_success(self) -> bool {
        !matches!(self, Self::Reported { delivered: false })
    }
}

/// Follows one target process and reports its crash.
#[derive(Debug)]
pub struct Watchdog<T = HttpTransport> {
    /// Process being watched.
    target: u32,
    /// Report contents; the dump path is filled in on crash.
    context: CrashContext,
    /// Sends the report.
    uploader: Uploader<T>,
    /// Current state.
    state: State,
    /// Set once the run has a result.
    outcome: Option<Outcome>,
}

impl<T: Transport> Watchdog<T> {
    /// Creates a watchdog for `target` in the [`State::Idle`] state.
    pub const fn new(target: u32, context: CrashContext, uploader: Uploader<T>) -> Self {
        Self {
            target,
            context,
            uploader,
            state: State::Idle,
            outcome: None,
        }
    }

    /// Process being watched.
    pub const fn target(&self) -> u32 {
        self.target
    }

    /// Current state.
    pub const fn state(&self) -> State {
        self.state
    }

    /// The crash context, including the dump path once a crash was seen.
    pub const fn context(&self) -> &CrashContext {
        &self.context
    }

    /// Result of the run, once there is one.
    pub const fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Applies one event. Returns the outcome if this event decided the run.
    ///
    /// Events about other processes, and any event after the outcome is
    /// known, are ignored.
    pub fn handle(&mut self, event: CrashEvent) -> Option<Outcome> {
        if self.outcome.is_some() {
            tracing::debug!(?event, "ignoring event after termination");
            return None;
        }
        if event.pid() != self.target {
            tracing::warn!(?event, target = self.target, "ignoring event for foreign process");
            return None;
        }

        match event {
            CrashEvent::ClientConnected { pid } => {
                if self.state == State::ClientConnected {
                    tracing::debug!(pid, "client registered again");
                } else {
                    tracing::info!(pid, "client connected");
                    self.transition(State::ClientConnected);
                }
                None
            }
            CrashEvent::ClientCrashed { pid, dump_path } => {
                tracing::info!(pid, "client crashed");
                self.transition(State::Crashed);
                match dump_path {
                    Some(path) => {
                        self.context.set_crash_dump_file(path);
                    }
                    None => tracing::warn!(pid, "crash reported without a minidump"),
                }
                let delivered = self.uploader.report(&self.context);
                self.transition(State::ReportAttempted);
                Some(self.finish(Outcome::Reported { delivered }))
            }
            CrashEvent::ClientExited { pid } => {
                tracing::info!(pid, "client exited");
                self.transition(State::ClientExited);
                Some(self.finish(Outcome::Exited))
            }
        }
    }

    /// Runs the event loop until the target crashes or exits.
    ///
    /// Between events the target's liveness is polled, so a target that dies
    /// without saying so still ends the run. If the event source closes,
    /// the remaining wait is a plain exit poll.
    pub fn watch<P, C>(
        &mut self,
        events: &mut impl EventSource,
        monitor: &ProcessMonitor<P, C>,
    ) -> Outcome
    where
        P: Platform,
        C: Clock,
    {
        if matches!(self.state, State::Idle | State::ChannelOpening) {
            self.transition(State::Listening);
        }
        loop {
            if let Some(outcome) = self.outcome {
                return outcome;
            }
            match events.next_event(monitor.exit_poll()) {
                Next::Event(event) => {
                    self.handle(event);
                }
                Next::Idle => {
                    if !monitor.is_running(self.target) {
                        // A crash reported just before exit is still queued.
                        while let Next::Event(event) = events.next_event(Duration::ZERO) {
                            self.handle(event);
                        }
                        self.target_gone();
                    }
                }
                Next::Closed => {
                    tracing::debug!("event source closed, polling for exit");
                    monitor.wait_for_exit(self.target);
                    self.target_gone();
                }
            }
        }
    }

    /// Records the exit of a target that never said goodbye.
    fn target_gone(&mut self) {
        if self.outcome.is_none() {
            self.handle(CrashEvent::ClientExited { pid: self.target });
        }
    }

    /// Stores the outcome and moves to [`State::Terminated`].
    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.outcome = Some(outcome);
        self.transition(State::Terminated);
        outcome
    }

    /// Moves to `next`, logging the transition.
    fn transition(&mut self, next: State) {
        tracing::debug!(from = ?self.state, to = ?next, "watchdog state");
        self.state = next;
    }
}

/// Where the watchdog listens and where clients write dumps.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Directory holding the rendezvous channel.
    rendezvous_dir: PathBuf,
    /// Directory announced to clients for their minidumps.
    dump_dir: PathBuf,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            rendezvous_dir: rendezvous::default_dir(),
            dump_dir: PathBuf::from("."),
        }
    }
}

impl ServeOptions {
    /// Sets the rendezvous directory.
    #[must_use]
    pub fn rendezvous_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rendezvous_dir = dir.into();
        self
    }

    /// Sets the dump directory.
    #[must_use]
    pub fn dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = dir.into();
        self
    }
}

impl<T: Transport> Watchdog<T> {
    /// Opens the rendezvous channel and watches the target until it
    /// crashes or exits.
    ///
    /// Fails only if the channel cannot be opened, or with
    /// [`Error::Unsupported`] where the capture server is not available.
    #[cfg(unix)]
    pub fn serve(&mut self, options: &ServeOptions) -> Result<Outcome> {
        use crate::capture::CaptureServer;
        use crate::rendezvous::RendezvousListener;

        self.transition(State::ChannelOpening);
        let channel = RendezvousListener::bind(&options.rendezvous_dir, self.target)?;
        let mut server = CaptureServer::start(&channel, options.dump_dir.clone())
            .map_err(|source| Error::Channel {
                path: channel.path().to_owned(),
                source,
            })?;
        tracing::info!(
            pid = self.target,
            channel = %channel.path().display(),
            "watching process"
        );
        Ok(self.watch(&mut server, &ProcessMonitor::native()))
    }

    /// Opens the rendezvous channel and watches the target until it
    /// crashes or exits.
    ///
    /// Always fails with [`Error::Unsupported`] on this platform.
    #[cfg(not(unix))]
    pub fn serve(&mut self, options: &ServeOptions) -> Result<Outcome> {
        tracing::debug!(?options, "capture server unavailable");
        Err(Error::Unsupported("watching a process"))
    }
}



#[cfg(all(test, not(unix)))]
#[allow(clippy::unwrap_used)]
mod unsupported_tests {
    use super::*;
    use crate::testing::RecordingTransport;

    #[test]
    fn serve_is_unsupported() {
        let transport = RecordingTransport::answering(200, "ok");
        let ctx = CrashContext::new("http://host/add", "App").unwrap();
        let mut wd = Watchdog::new(1, ctx, Uploader::new(&transport));
        assert!(matches!(
            wd.serve(&ServeOptions::default()),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(wd.state(), State::Idle);
    }
}
