//! Out-of-process crash supervision.
//!
//! `dumpwatch` protects an application by running a separate watchdog
//! process next to it. The application's [`Supervisor`] launches the
//! watchdog and waits until its rendezvous channel exists; from then on a
//! crash of the application is captured by the watchdog, which uploads a
//! report (minidump plus [`CrashContext`]) to an analysis server.
//!
//! # Quick start
//!
//! ```no_run
//! use dumpwatch::{CrashContext, Supervisor, SupervisorConfig};
//!
//! let ctx = CrashContext::new("http://crashes.example.com/add", "App")?
//!     .with_tag("beta")
//!     .with_application_version("1.2.3");
//! let mut supervisor = Supervisor::new(SupervisorConfig::new("dumpwatch"), ctx);
//! if supervisor.start() {
//!     // Crash protection is active until `supervisor` is dropped.
//! }
//! # Ok::<(), dumpwatch::Error>(())
//! ```
//!
//! The watchdog side is [`Watchdog`], driven by the `dumpwatch` binary.

pub mod capture;
mod client;
mod clock;
mod context;
mod error;
mod monitor;
mod platform;
pub mod rendezvous;
mod supervisor;
#[cfg(test)]
mod testing;
mod upload;
mod watchdog;

pub use capture::{CrashEvent, EventSource, Next};
#[cfg(unix)]
pub use client::CrashClient;
pub use clock::{CancelToken, Clock, SystemClock};
pub use context::{
    CrashContext, FILE_CRASH_DUMP, FILE_EXECUTABLE, FILE_SYMBOLS, PARAM_APPLICATION,
    PARAM_APPLICATION_VERSION, PARAM_OPERATING_SYSTEM, PARAM_TAG, flag, operating_system,
};
pub use error::{Error, Result};
pub use monitor::{EXIT_POLL, ProcessMonitor, READY_POLL};
pub use platform::{NativePlatform, NativeProcess, Platform};
pub use supervisor::{READY_TIMEOUT, Supervisor, SupervisorConfig};
pub use upload::{
    HttpTransport, MultipartRequest, Transport, TransportResponse, UPLOAD_TIMEOUT, Uploader,
};
pub use watchdog::{Outcome, ServeOptions, State, Watchdog};
