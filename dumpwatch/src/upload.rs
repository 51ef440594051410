//! Crash report upload over a multipart transport.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::CrashContext;
use crate::error::{Error, Result};

/// Fixed transport budget for one report.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A multipart form POST, as handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct MultipartRequest {
    /// Destination URL.
    pub url: String,
    /// Text form fields.
    pub parameters: BTreeMap<String, String>,
    /// File form fields, by field name.
    pub files: BTreeMap<String, PathBuf>,
    /// Time budget for the whole request.
    pub timeout: Duration,
}

/// Status and body returned by the reporting server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransportResponse {
    /// Numeric HTTP status.
    pub status: u16,
    /// Response body. Only logged, never parsed.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response value.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends multipart requests.
pub trait Transport {
    /// Performs the request, returning whatever response the server gave.
    ///
    /// A non-success status is still `Ok`; `Err` means no response.
    fn send(&self, request: &MultipartRequest) -> Result<TransportResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &MultipartRequest) -> Result<TransportResponse> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: &MultipartRequest) -> Result<TransportResponse> {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Shared connection pool.
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Builds a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &MultipartRequest) -> Result<TransportResponse> {
        let mut form = reqwest::blocking::multipart::Form::new();
        for (name, value) in &request.parameters {
            form = form.text(name.clone(), value.clone());
        }
        for (name, path) in &request.files {
            form = form
                .file(name.clone(), path)
                .map_err(|source| Error::Attachment {
                    path: path.clone(),
                    source,
                })?;
        }

        let failed = |e: reqwest::Error| Error::Transport {
            url: request.url.clone(),
            reason: e.to_string(),
        };
        let resp = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .multipart(form)
            .send()
            .map_err(failed)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(failed)?;
        Ok(TransportResponse { status, body })
    }
}

/// Turns a [`CrashContext`] into a report and sends it.
///
/// There is no retry: a failed report is returned to the caller.
#[derive(Debug, Clone)]
pub struct Uploader<T = HttpTransport> {
    /// Transport used for every report.
    transport: T,
}

impl Uploader<HttpTransport> {
    /// Uploader over HTTP with the fixed [`UPLOAD_TIMEOUT`].
    pub fn http() -> Result<Self> {
        Ok(Self::new(HttpTransport::new(UPLOAD_TIMEOUT)?))
    }
}

impl<T: Transport> Uploader<T> {
    /// Wraps a transport.
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Returns the underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds the request for `ctx` without sending it.
    pub fn request(ctx: &CrashContext) -> MultipartRequest {
        MultipartRequest {
            url: ctx.reporting_server().to_owned(),
            parameters: ctx.parameters(),
            files: ctx.files(),
            timeout: UPLOAD_TIMEOUT,
        }
    }

    /// Sends the report, failing on transport errors and non-2xx statuses.
    pub fn try_report(&self, ctx: &CrashContext) -> Result<TransportResponse> {
        let request = Self::request(ctx);
        tracing::info!(url = %request.url, "reporting crash");
        tracing::debug!(parameters = ?request.parameters, files = ?request.files, "report contents");

        let resp = self.transport.send(&request)?;
        tracing::info!(status = resp.status, body = %resp.body, "reporting server responded");
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(Error::Rejected {
                status: resp.status,
                body: resp.body,
            })
        }
    }

    /// Sends the report and returns whether it was delivered.
    pub fn report(&self, ctx: &CrashContext) -> bool {
        match self.try_report(ctx) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "crash report not delivered");
                false
            }
        }
    }
}
