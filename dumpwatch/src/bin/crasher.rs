//! dumpwatch-crasher: demo application that crashes under supervision.
//!
//! Starts a [`Supervisor`] for itself, registers with the watchdog, writes a
//! placeholder minidump, reports the crash and aborts. The watchdog then
//! uploads the report to the given server.

// Demo binary: stderr is the user interface.
#![allow(clippy::print_stderr)]

#[cfg(not(unix))]
fn main() {
    eprintln!("dumpwatch-crasher: only supported on Unix");
    std::process::exit(1);
}

#[cfg(unix)]
fn main() {
    let mut args = std::env::args().skip(1);
    let (Some(watchdog), Some(server)) = (args.next(), args.next()) else {
        eprintln!("usage: dumpwatch-crasher <watchdog-exe> <reporting-server>");
        std::process::exit(1);
    };

    if let Err(e) = crash(watchdog, server) {
        eprintln!("dumpwatch-crasher: {e}");
        std::process::exit(1);
    }
}

/// Runs the supervised crash; only returns on error.
#[cfg(unix)]
fn crash(watchdog: String, server: String) -> dumpwatch::Result<()> {
    use dumpwatch::{CrashClient, CrashContext, Supervisor, SupervisorConfig};

    let mut ctx = CrashContext::new(server, "dumpwatch-crasher")?
        .with_application_version(env!("CARGO_PKG_VERSION"));
    if let Ok(exe) = std::env::current_exe() {
        ctx = ctx.with_executable_file(exe);
    }

    let mut supervisor = Supervisor::new(SupervisorConfig::new(watchdog), ctx);
    supervisor.try_start()?;

    let mut client = CrashClient::connect(supervisor.config().channel_path())?;
    let dump = client
        .dump_dir()
        .join(format!("dumpwatch-crasher-{}.dmp", std::process::id()));
    std::fs::write(&dump, b"MDMP")?;
    client.crashed(Some(&dump))?;

    eprintln!("dumpwatch-crasher: crash reported, aborting");
    // The watchdog runs in its own session and outlives us.
    std::process::abort();
}
