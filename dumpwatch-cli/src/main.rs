//! Crash watchdog process.
//!
//! Launched by a `Supervisor` with `--pid`, it opens the rendezvous channel
//! for that process, waits for it to crash or exit and uploads a crash
//! report. Without `--pid` it uploads a report immediately, which is handy
//! for sending an existing dump with `--crash-dump`.

#![allow(clippy::print_stderr, clippy::missing_docs_in_private_items)]

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dumpwatch::{CrashContext, ServeOptions, Uploader, Watchdog};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dumpwatch",
    version,
    about = "Watches a process and reports its crash to an analysis server"
)]
struct Cli {
    /// Address of the crash analysis server.
    #[arg(short = 'r', long)]
    reporting_server: String,

    /// Name the application is reported under.
    #[arg(short = 'a', long)]
    application: String,

    /// Process to watch. Without it, a report is sent right away.
    #[arg(short = 'p', long)]
    pid: Option<u32>,

    /// Free-form tag attached to the report.
    #[arg(short = 't', long)]
    tag: Option<String>,

    /// Application version.
    #[arg(short = 'n', long)]
    application_version: Option<String>,

    /// Symbols file uploaded with the report.
    #[arg(short = 'y', long, value_parser = any_path)]
    symbols: Option<PathBuf>,

    /// Executable uploaded with the report.
    #[arg(short = 'e', long, value_parser = any_path)]
    executable: Option<PathBuf>,

    /// Existing minidump uploaded with the report.
    #[arg(short = 'c', long, value_parser = any_path)]
    crash_dump: Option<PathBuf>,

    /// Directory holding the rendezvous channel.
    #[arg(long)]
    rendezvous_dir: Option<PathBuf>,

    /// Directory clients are told to write minidumps into.
    #[arg(long, default_value = ".")]
    dump_dir: PathBuf,

    /// Log debug output to stderr.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Rebuilds the crash context from the startup parameters.
    ///
    /// Empty optional values count as absent.
    fn context(&self) -> dumpwatch::Result<CrashContext> {
        let mut ctx = CrashContext::new(self.reporting_server.as_str(), self.application.as_str())?;
        if let Some(tag) = non_empty(self.tag.as_deref()) {
            ctx = ctx.with_tag(tag);
        }
        if let Some(version) = non_empty(self.application_version.as_deref()) {
            ctx = ctx.with_application_version(version);
        }
        if let Some(path) = non_empty_path(self.symbols.as_deref()) {
            ctx = ctx.with_symbols_file(path);
        }
        if let Some(path) = non_empty_path(self.executable.as_deref()) {
            ctx = ctx.with_executable_file(path);
        }
        if let Some(path) = non_empty_path(self.crash_dump.as_deref()) {
            ctx = ctx.with_crash_dump_file(path);
        }
        Ok(ctx)
    }

    fn run(&self) -> Result<()> {
        let ctx = self.context()?;
        let uploader = Uploader::http()?;
        match self.pid {
            Some(pid) => self.watch(pid, ctx, uploader),
            None => {
                tracing::debug!("no process to watch, reporting immediately");
                uploader
                    .try_report(&ctx)
                    .context("crash report was not delivered")?;
                Ok(())
            }
        }
    }

    fn watch(&self, pid: u32, ctx: CrashContext, uploader: Uploader) -> Result<()> {
        let mut options = ServeOptions::default().dump_dir(&self.dump_dir);
        if let Some(dir) = &self.rendezvous_dir {
            options = options.rendezvous_dir(dir);
        }
        let outcome = Watchdog::new(pid, ctx, uploader).serve(&options)?;
        tracing::debug!(?outcome, "watchdog finished");
        anyhow::ensure!(outcome.is_success(), "crash report was not delivered");
        Ok(())
    }
}

/// Accepts any path, including an empty one.
#[allow(clippy::unnecessary_wraps)]
fn any_path(value: &str) -> Result<PathBuf, Infallible> {
    Ok(PathBuf::from(value))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Installs the stderr subscriber. `RUST_LOG` overrides `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.run() {
        eprintln!("dumpwatch: {e:#}");
        std::process::exit(1);
    }
}
