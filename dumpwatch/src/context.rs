//! Crash context: everything needed to produce one crash report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Multipart parameter carrying the platform tag.
pub const PARAM_OPERATING_SYSTEM: &str = "OperatingSystem";
/// Multipart parameter carrying the application name.
pub const PARAM_APPLICATION: &str = "Application";
/// Multipart parameter carrying the optional tag.
pub const PARAM_TAG: &str = "Tag";
/// Multipart parameter carrying the optional application version.
pub const PARAM_APPLICATION_VERSION: &str = "ApplicationVersion";

/// Multipart file field for the symbols file.
pub const FILE_SYMBOLS: &str = "SymbolsFile";
/// Multipart file field for the executable.
pub const FILE_EXECUTABLE: &str = "ExecutableFile";
/// Multipart file field for the minidump.
pub const FILE_CRASH_DUMP: &str = "CrashDumpFile";

/// Command-line flags understood by the watchdog binary.
pub mod flag {
    /// Reporting server address (required).
    pub const REPORTING_SERVER: &str = "--reporting-server";
    /// Application name (required).
    pub const APPLICATION: &str = "--application";
    /// Process to monitor.
    pub const PID: &str = "--pid";
    /// Report tag.
    pub const TAG: &str = "--tag";
    /// Application version.
    pub const APPLICATION_VERSION: &str = "--application-version";
    /// Symbols file path.
    pub const SYMBOLS: &str = "--symbols";
    /// Executable file path.
    pub const EXECUTABLE: &str = "--executable";
    /// Existing crash dump path.
    pub const CRASH_DUMP: &str = "--crash-dump";
    /// Directory holding rendezvous channels.
    pub const RENDEZVOUS_DIR: &str = "--rendezvous-dir";
    /// Verbose logging.
    pub const VERBOSE: &str = "--verbose";
}

/// Returns the `OperatingSystem` value sent with every report.
pub fn operating_system() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Windows",
        "linux" => "Linux",
        "macos" => "macOS",
        other => other,
    }
}

/// The context around a crash, as reported to the analysis server.
///
/// The reporting server and application name are fixed at construction.
/// Optional fields are filled in from startup parameters; the crash dump
/// path is recorded by the watchdog when a crash is observed.
///
/// # Example
///
/// ```
/// use dumpwatch::CrashContext;
///
/// let ctx = CrashContext::new("http://host/add", "App")
///     .unwrap()
///     .with_tag("beta");
/// assert_eq!(ctx.parameters()["Tag"], "beta");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashContext {
    /// Address of the analysis server, including the scheme.
    reporting_server: String,
    /// Name the application is reported under.
    application: String,
    /// Free-form report tag.
    tag: Option<String>,
    /// Application version string.
    application_version: Option<String>,
    /// Symbols file uploaded with the report.
    symbols_file: Option<PathBuf>,
    /// Executable uploaded with the report.
    executable_file: Option<PathBuf>,
    /// Minidump of the crash.
    crash_dump_file: Option<PathBuf>,
}

impl CrashContext {
    /// Creates a context with the two required fields.
    ///
    /// Fails with [`Error::InvalidContext`] if either is empty.
    pub fn new(reporting_server: impl Into<String>, application: impl Into<String>) -> Result<Self> {
        let reporting_server = reporting_server.into();
        let application = application.into();
        if reporting_server.trim().is_empty() {
            return Err(Error::InvalidContext {
                field: "reporting_server",
            });
        }
        if application.trim().is_empty() {
            return Err(Error::InvalidContext {
                field: "application",
            });
        }
        Ok(Self {
            reporting_server,
            application,
            tag: None,
            application_version: None,
            symbols_file: None,
            executable_file: None,
            crash_dump_file: None,
        })
    }

    /// Sets the report tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the application version.
    #[must_use]
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = Some(version.into());
        self
    }

    /// Sets the symbols file path.
    #[must_use]
    pub fn with_symbols_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.symbols_file = Some(path.into());
        self
    }

    /// Sets the executable file path.
    #[must_use]
    pub fn with_executable_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_file = Some(path.into());
        self
    }

    /// Sets the crash dump path up front (immediate-report mode).
    #[must_use]
    pub fn with_crash_dump_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.crash_dump_file = Some(path.into());
        self
    }

    /// Records the minidump produced for an observed crash.
    ///
    /// Returns the previously recorded path, if any.
    pub fn set_crash_dump_file(&mut self, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.crash_dump_file.replace(path.into())
    }

    /// Reporting server address.
    pub fn reporting_server(&self) -> &str {
        &self.reporting_server
    }

    /// Application name.
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Report tag, if set.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Application version, if set.
    pub fn application_version(&self) -> Option<&str> {
        self.application_version.as_deref()
    }

    /// Symbols file path, if set.
    pub fn symbols_file(&self) -> Option<&Path> {
        self.symbols_file.as_deref()
    }

    /// Executable file path, if set.
    pub fn executable_file(&self) -> Option<&Path> {
        self.executable_file.as_deref()
    }

    /// Crash dump path, if one has been recorded.
    pub fn crash_dump_file(&self) -> Option<&Path> {
        self.crash_dump_file.as_deref()
    }

    /// Form parameters of the report.
    ///
    /// Always holds the operating system and application; tag and version
    /// only when present.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert(
            PARAM_OPERATING_SYSTEM.to_owned(),
            operating_system().to_owned(),
        );
        params.insert(PARAM_APPLICATION.to_owned(), self.application.clone());
        if let Some(tag) = &self.tag {
            params.insert(PARAM_TAG.to_owned(), tag.clone());
        }
        if let Some(version) = &self.application_version {
            params.insert(PARAM_APPLICATION_VERSION.to_owned(), version.clone());
        }
        params
    }

    /// File attachments of the report, kept apart from [`parameters`](Self::parameters).
    pub fn files(&self) -> BTreeMap<String, PathBuf> {
        [
            (FILE_SYMBOLS, &self.symbols_file),
            (FILE_EXECUTABLE, &self.executable_file),
            (FILE_CRASH_DUMP, &self.crash_dump_file),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.as_ref().map(|p| (name.to_owned(), p.clone())))
        .collect()
    }

    /// Encodes the context as watchdog command-line arguments.
    ///
    /// The crash dump path is left out: the watchdog learns it from the
    /// crash event.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            flag::REPORTING_SERVER.to_owned(),
            self.reporting_server.clone(),
            flag::APPLICATION.to_owned(),
            self.application.clone(),
        ];
        let optional = [
            (flag::TAG, self.tag.clone()),
            (flag::APPLICATION_VERSION, self.application_version.clone()),
            (flag::SYMBOLS, path_arg(self.symbols_file.as_deref())),
            (flag::EXECUTABLE, path_arg(self.executable_file.as_deref())),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                args.push(name.to_owned());
                args.push(value);
            }
        }
        args
    }
}

/// Lossy string form of an optional path argument.
fn path_arg(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn app() -> CrashContext {
        CrashContext::new("http://host/add", "App").unwrap()
    }

    #[test]
    fn rejects_empty_required_fields() {
        assert!(matches!(
            CrashContext::new("", "App"),
            Err(Error::InvalidContext {
                field: "reporting_server"
            })
        ));
        assert!(matches!(
            CrashContext::new("http://host/add", "  "),
            Err(Error::InvalidContext {
                field: "application"
            })
        ));
    }

    #[test]
    fn minimal_parameters() {
        let params = app().parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[PARAM_OPERATING_SYSTEM], operating_system());
        assert_eq!(params[PARAM_APPLICATION], "App");
        assert!(app().files().is_empty());
    }

    #[test]
    fn tag_is_sent_verbatim() {
        let ctx = app().with_tag("  beta rc/1 ");
        assert_eq!(ctx.parameters()[PARAM_TAG], "  beta rc/1 ");
        assert_eq!(ctx.tag(), Some("  beta rc/1 "));
    }

    #[test]
    fn files_stay_out_of_parameters() {
        let ctx = app()
            .with_application_version("1.2.3")
            .with_symbols_file("/s/app.pdb")
            .with_executable_file("/s/app.exe")
            .with_crash_dump_file("/tmp/d.dmp");

        let params = ctx.parameters();
        assert_eq!(params.len(), 3);
        assert_eq!(params[PARAM_APPLICATION_VERSION], "1.2.3");
        for name in [FILE_SYMBOLS, FILE_EXECUTABLE, FILE_CRASH_DUMP] {
            assert!(!params.contains_key(name), "{name} leaked into parameters");
        }

        let files = ctx.files();
        assert_eq!(files[FILE_SYMBOLS], PathBuf::from("/s/app.pdb"));
        assert_eq!(files[FILE_EXECUTABLE], PathBuf::from("/s/app.exe"));
        assert_eq!(files[FILE_CRASH_DUMP], PathBuf::from("/tmp/d.dmp"));
    }

    #[test]
    fn crash_dump_transitions_once() {
        let mut ctx = app();
        assert_eq!(ctx.crash_dump_file(), None);
        assert_eq!(ctx.set_crash_dump_file("/tmp/d.dmp"), None);
        assert_eq!(ctx.crash_dump_file(), Some(Path::new("/tmp/d.dmp")));
    }

    #[test]
    fn args_cover_present_fields_only() {
        assert_eq!(
            app().to_args(),
            [
                "--reporting-server",
                "http://host/add",
                "--application",
                "App"
            ]
        );

        let args = app()
            .with_tag("beta")
            .with_executable_file("/bin/app")
            .with_crash_dump_file("/tmp/d.dmp")
            .to_args();
        assert!(args.windows(2).any(|w| w == ["--tag", "beta"]));
        assert!(args.windows(2).any(|w| w == ["--executable", "/bin/app"]));
        assert!(!args.iter().any(|a| a == flag::SYMBOLS));
        assert!(!args.iter().any(|a| a == flag::CRASH_DUMP));
    }
}
