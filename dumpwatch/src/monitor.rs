//! Sleep-poll waits on process liveness and channel readiness.

use std::path::Path;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::platform::{NativePlatform, Platform};

/// Poll interval while waiting for a rendezvous channel.
pub const READY_POLL: Duration = Duration::from_millis(10);

/// Poll interval while waiting for a process to exit.
pub const EXIT_POLL: Duration = Duration::from_secs(1);

/// Polls a [`Platform`] for channel and process state.
///
/// All waits block the calling thread; the only way to interrupt them is
/// a cancellable [`Clock`].
#[derive(Debug)]
pub struct ProcessMonitor<P = NativePlatform, C = SystemClock> {
    /// Source of process and channel state.
    platform: P,
    /// Source of time and sleeps.
    clock: C,
    /// Interval between channel checks.
    ready_poll: Duration,
    /// Interval between liveness checks.
    exit_poll: Duration,
}

impl ProcessMonitor {
    /// Monitor for the host OS on wall-clock time.
    pub fn native() -> Self {
        Self::new(NativePlatform, SystemClock::new())
    }
}

impl<P: Platform, C: Clock> ProcessMonitor<P, C> {
    /// Creates a monitor with the default poll intervals.
    pub const fn new(platform: P, clock: C) -> Self {
        Self {
            platform,
            clock,
            ready_poll: READY_POLL,
            exit_poll: EXIT_POLL,
        }
    }

    /// Overrides the channel poll interval.
    #[must_use]
    pub const fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    /// Overrides the liveness poll interval.
    #[must_use]
    pub const fn with_exit_poll(mut self, interval: Duration) -> Self {
        self.exit_poll = interval;
        self
    }

    /// The platform being polled.
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// The clock used for waiting.
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Interval between liveness checks.
    pub const fn exit_poll(&self) -> Duration {
        self.exit_poll
    }

    /// Waits until `channel` exists or `max_wait` elapses.
    ///
    /// Returns `false` on timeout or cancellation.
    pub fn wait_for_ready(&self, channel: &Path, max_wait: Duration) -> bool {
        let deadline = self.clock.now() + max_wait;
        loop {
            if self.platform.channel_exists(channel) {
                tracing::debug!(channel = %channel.display(), "rendezvous channel is up");
                return true;
            }
            let now = self.clock.now();
            if now >= deadline {
                return false;
            }
            if !self.clock.sleep(self.ready_poll.min(deadline - now)) {
                return false;
            }
        }
    }

    /// Returns whether `pid` is running. Query failures count as exited.
    pub fn is_running(&self, pid: u32) -> bool {
        match self.platform.process_running(pid) {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(pid, error = %e, "unable to query process");
                false
            }
        }
    }

    /// Blocks until `pid` is no longer running. There is no timeout.
    pub fn wait_for_exit(&self, pid: u32) {
        while self.is_running(pid) {
            if !self.clock.sleep(self.exit_poll) {
                tracing::debug!(pid, "exit wait cancelled");
                return;
            }
        }
        tracing::info!(pid, "process is no longer running");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, VirtualClock};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn monitor() -> (Arc<FakePlatform>, ProcessMonitor<Arc<FakePlatform>, Arc<VirtualClock>>) {
        let clock = Arc::new(VirtualClock::new());
        let platform = Arc::new(FakePlatform::new(Arc::clone(&clock)));
        let monitor = ProcessMonitor::new(Arc::clone(&platform), clock);
        (platform, monitor)
    }

    #[test]
    fn ready_when_channel_appears_in_time() {
        let (platform, monitor) = monitor();
        let channel = PathBuf::from("/run/dumpwatch/dumpwatch-1234.sock");
        platform.create_channel_at(&channel, Duration::from_secs(1));

        assert!(monitor.wait_for_ready(&channel, Duration::from_secs(3)));
        assert_eq!(monitor.clock().elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn times_out_when_channel_is_late() {
        let (platform, monitor) = monitor();
        let channel = PathBuf::from("/run/dumpwatch/dumpwatch-1234.sock");
        platform.create_channel_at(&channel, Duration::from_millis(3100));

        assert!(!monitor.wait_for_ready(&channel, Duration::from_secs(3)));
        assert_eq!(monitor.clock().elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn ready_polls_every_ten_millis() {
        let (_platform, monitor) = monitor();
        let channel = PathBuf::from("/never");
        assert!(!monitor.wait_for_ready(&channel, Duration::from_millis(50)));
        assert_eq!(
            monitor.clock().sleeps(),
            vec![Duration::from_millis(10); 5]
        );
    }

    #[test]
    fn exit_detected_within_one_poll() {
        let (platform, monitor) = monitor();
        platform.exit_process_at(4321, Duration::from_millis(5500));

        monitor.wait_for_exit(4321);

        let elapsed = monitor.clock().elapsed();
        assert!(elapsed >= Duration::from_millis(5500));
        assert!(elapsed <= Duration::from_millis(5500) + EXIT_POLL);
    }

    #[test]
    fn exit_of_dead_process_returns_at_once() {
        let (platform, monitor) = monitor();
        platform.exit_process_at(7, Duration::ZERO);
        monitor.wait_for_exit(7);
        assert_eq!(monitor.clock().elapsed(), Duration::ZERO);
    }

    #[test]
    fn query_failure_ends_exit_wait() {
        let (platform, monitor) = monitor();
        platform.fail_process_queries();
        monitor.wait_for_exit(99);
        assert!(!monitor.is_running(99));
    }
}
