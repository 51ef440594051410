//! In-process side of crash protection: launches and owns the watchdog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::context::{CrashContext, flag};
use crate::error::{Error, Result};
use crate::monitor::{ProcessMonitor, READY_POLL};
use crate::platform::{NativePlatform, Platform};
use crate::rendezvous;

/// How long `start` waits for the watchdog's rendezvous channel.
pub const READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Launch settings for the watchdog process.
///
/// # Example
///
/// ```
/// use dumpwatch::SupervisorConfig;
///
/// let config = SupervisorConfig::new("/usr/libexec/dumpwatch")
///     .target_pid(1234)
///     .rendezvous_dir("/run/dumpwatch");
/// assert!(config.channel_path().ends_with("dumpwatch-1234.sock"));
/// ```
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Watchdog executable.
    watchdog: PathBuf,
    /// Process the watchdog monitors.
    target_pid: u32,
    /// Directory of the rendezvous channel.
    rendezvous_dir: PathBuf,
    /// Wait budget for the rendezvous.
    ready_timeout: Duration,
    /// Interval between rendezvous checks.
    ready_poll: Duration,
    /// Run the watchdog with debug logging.
    verbose: bool,
    /// Extra arguments appended to the watchdog command line.
    additional_args: Vec<String>,
}

impl SupervisorConfig {
    /// Defaults: monitor the current process, channel in
    /// [`rendezvous::default_dir`], 3 s rendezvous budget polled every 10 ms.
    pub fn new(watchdog: impl Into<PathBuf>) -> Self {
        Self {
            watchdog: watchdog.into(),
            target_pid: std::process::id(),
            rendezvous_dir: rendezvous::default_dir(),
            ready_timeout: READY_TIMEOUT,
            ready_poll: READY_POLL,
            verbose: false,
            additional_args: Vec::new(),
        }
    }

    /// Sets the process to monitor.
    #[must_use]
    pub const fn target_pid(mut self, pid: u32) -> Self {
        self.target_pid = pid;
        self
    }

    /// Sets the rendezvous directory.
    #[must_use]
    pub fn rendezvous_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rendezvous_dir = dir.into();
        self
    }

    /// Sets the rendezvous wait budget.
    #[must_use]
    pub const fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the rendezvous poll interval.
    #[must_use]
    pub const fn ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    /// Enables debug logging in the watchdog.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Appends arguments to the watchdog command line.
    #[must_use]
    pub fn additional_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Watchdog executable.
    pub fn watchdog(&self) -> &Path {
        &self.watchdog
    }

    /// Monitored process ID.
    pub const fn pid(&self) -> u32 {
        self.target_pid
    }

    /// Rendezvous channel the watchdog will open.
    pub fn channel_path(&self) -> PathBuf {
        rendezvous::channel_path(&self.rendezvous_dir, self.target_pid)
    }

    /// Full watchdog command line for `ctx`.
    pub fn watchdog_args(&self, ctx: &CrashContext) -> Vec<String> {
        let mut args = ctx.to_args();
        args.push(flag::PID.to_owned());
        args.push(self.target_pid.to_string());
        args.push(flag::RENDEZVOUS_DIR.to_owned());
        args.push(self.rendezvous_dir.to_string_lossy().into_owned());
        if self.verbose {
            args.push(flag::VERBOSE.to_owned());
        }
        args.extend(self.additional_args.iter().cloned());
        args
    }
}

/// Owns the watchdog process for the lifetime of the application.
///
/// A started supervisor guarantees the watchdog is ready to capture crashes
/// of the target. Dropping it stops the watchdog.
///
/// ```no_run
/// use dumpwatch::{CrashContext, Supervisor, SupervisorConfig};
///
/// let ctx = CrashContext::new("http://crashes.example.com/add", "App")?;
/// let mut supervisor = Supervisor::new(SupervisorConfig::new("dumpwatch"), ctx);
/// if !supervisor.start() {
///     // Keep running without crash protection.
/// }
/// # Ok::<(), dumpwatch::Error>(())
/// ```
#[derive(Debug)]
pub struct Supervisor<P: Platform = NativePlatform, C: Clock = SystemClock> {
    /// Launch settings.
    config: SupervisorConfig,
    /// Report contents handed to the watchdog.
    context: CrashContext,
    /// Spawns and polls.
    monitor: ProcessMonitor<P, C>,
    /// Running watchdog, once started.
    process: Option<P::Process>,
}

impl Supervisor {
    /// Supervisor for the host OS.
    pub fn new(config: SupervisorConfig, context: CrashContext) -> Self {
        Self::with_platform(config, context, NativePlatform, SystemClock::new())
    }
}

impl<P: Platform, C: Clock> Supervisor<P, C> {
    /// Supervisor over an explicit platform and clock.
    pub fn with_platform(config: SupervisorConfig, context: CrashContext, platform: P, clock: C) -> Self {
        let monitor = ProcessMonitor::new(platform, clock).with_ready_poll(config.ready_poll);
        Self {
            config,
            context,
            monitor,
            process: None,
        }
    }

    /// Launch settings.
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Context passed to the watchdog.
    pub const fn context(&self) -> &CrashContext {
        &self.context
    }

    /// Returns `true` while a ready watchdog is owned.
    pub const fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Launches the watchdog and waits for its rendezvous channel.
    ///
    /// Does nothing if already started. On failure no watchdog is left
    /// running.
    pub fn try_start(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let platform = self.monitor.platform();
        let channel = self.config.channel_path();
        if platform.channel_exists(&channel) {
            tracing::debug!(channel = %channel.display(), "removing stale rendezvous channel");
            platform.remove_channel(&channel)?;
        }

        let args = self.config.watchdog_args(&self.context);
        let process = platform
            .spawn_process(&self.config.watchdog, &args)
            .map_err(|source| Error::Launch {
                program: self.config.watchdog.clone(),
                source,
            })?;
        let guard = ProcessGuard::new(platform, process);

        if !self.monitor.wait_for_ready(&channel, self.config.ready_timeout) {
            return Err(Error::RendezvousTimeout {
                channel,
                waited: self.config.ready_timeout,
            });
        }

        self.process = guard.keep();
        tracing::info!(
            pid = self.config.target_pid,
            channel = %channel.display(),
            "crash protection active"
        );
        Ok(())
    }

    /// Like [`try_start`](Self::try_start), logging the error.
    pub fn start(&mut self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "crash protection unavailable");
                false
            }
        }
    }

    /// Forcibly terminates the watchdog.
    ///
    /// Does nothing if not started. The handle is released even when
    /// termination fails.
    pub fn try_stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        let platform = self.monitor.platform();
        platform
            .terminate_process(&mut process)
            .map_err(Error::Termination)?;

        let channel = self.config.channel_path();
        if let Err(e) = platform.remove_channel(&channel) {
            tracing::warn!(channel = %channel.display(), error = %e, "failed to remove rendezvous channel");
        }
        tracing::debug!("watchdog stopped");
        Ok(())
    }

    /// Like [`try_stop`](Self::try_stop), logging the error.
    pub fn stop(&mut self) -> bool {
        match self.try_stop() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to stop watchdog");
                false
            }
        }
    }
}

impl<P: Platform, C: Clock> Drop for Supervisor<P, C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Terminates a freshly spawned watchdog unless it is kept.
struct ProcessGuard<'a, P: Platform> {
    /// Platform that spawned the process.
    platform: &'a P,
    /// The process; `None` once kept.
    process: Option<P::Process>,
}

impl<'a, P: Platform> ProcessGuard<'a, P> {
    /// Guards `process`.
    const fn new(platform: &'a P, process: P::Process) -> Self {
        Self {
            platform,
            process: Some(process),
        }
    }

    /// Disarms the guard and hands the process over.
    fn keep(mut self) -> Option<P::Process> {
        self.process.take()
    }
}

impl<P: Platform> Drop for ProcessGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = self.platform.terminate_process(&mut process) {
                tracing::warn!(?process, error = %e, "failed to terminate watchdog");
            }
        }
    }
}
