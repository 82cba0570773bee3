use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::error;

use super::body::{derive_outcome, FailsafeOutcome};
use super::diagnostics::{RawErrorSink, StderrSink};
use crate::error::{panic_message, DispatchError};
use crate::server::{OutputMode, Request, Response};

/// Renders a best-effort response when normal processing, and the normal
/// error handling after it, have failed.
///
/// [`respond`](Self::respond) never returns an error and never unwinds.
#[derive(Clone)]
pub struct FailsafeResponder {
    error_file_path: Option<PathBuf>,
    diagnostics: Arc<dyn RawErrorSink>,
}

impl std::fmt::Debug for FailsafeResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailsafeResponder")
            .field("error_file_path", &self.error_file_path)
            .finish_non_exhaustive()
    }
}

impl Default for FailsafeResponder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FailsafeResponder {
    #[must_use]
    pub fn new(error_file_path: Option<PathBuf>) -> Self {
        Self {
            error_file_path,
            diagnostics: Arc::new(StderrSink),
        }
    }

    /// Replace the raw diagnostic channel (standard error by default).
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn RawErrorSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn error_file_path(&self) -> Option<&Path> {
        self.error_file_path.as_deref()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<dyn RawErrorSink> {
        &self.diagnostics
    }

    /// The degraded response that would be produced for `status_line`.
    pub fn outcome(&self, status_line: &str, request: Option<&Request>) -> std::io::Result<FailsafeOutcome> {
        derive_outcome(
            status_line,
            request.and_then(Request::content_type),
            self.error_file_path(),
        )
    }

    /// Run `primary`, falling back to a degraded response if it fails or panics.
    ///
    /// `primary` receives the output sink and whatever request and response
    /// objects exist. When it fails, the failure is logged with `status_line`,
    /// a failsafe body is derived and written to `output`. If that also fails,
    /// the only remaining effect is a message on the raw diagnostic channel
    /// naming both the failsafe error and `originating`.
    pub fn respond<W, F>(
        &self,
        output: &mut W,
        status_line: &str,
        originating: Option<&DispatchError>,
        request: Option<&Request>,
        mut response: Option<&mut Response>,
        primary: F,
    ) where
        W: Write + ?Sized,
        F: FnOnce(&mut W, Option<&Request>, Option<&mut Response>) -> anyhow::Result<()>,
    {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            primary(&mut *output, request, response.as_deref_mut())
        }));
        let failure = match attempt {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
        };

        let degraded = catch_unwind(AssertUnwindSafe(|| {
            self.render_degraded(output, status_line, &failure, originating, request, response)
        }));
        let failsafe_error = match degraded {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.diagnostics
            .emit(&format!("Error during failsafe response: {failsafe_error}"));
        if let Some(originating) = originating {
            self.diagnostics.emit(&format!("(originally {originating})"));
        }
    }

    fn render_degraded<W: Write + ?Sized>(
        &self,
        mut output: &mut W,
        status_line: &str,
        failure: &str,
        originating: Option<&DispatchError>,
        request: Option<&Request>,
        response: Option<&mut Response>,
    ) -> anyhow::Result<()> {
        self.log_failsafe(status_line, failure, originating);
        let outcome = self.outcome(status_line, request)?;

        let mut standalone;
        let response = match response {
            Some(res) => res,
            None => {
                standalone = Response::new(OutputMode::Gateway);
                &mut standalone
            }
        };
        let length = outcome.body.len();
        response.set_status_line(&outcome.status_line);
        response.set_header("Content-Type", outcome.content_type);
        if !response.has_header("Content-Length") {
            response.set_header("Content-Length", length.to_string());
        }
        response.set_body(outcome.body);
        if let Some(req) = request {
            response.attach_request(req.summary());
        }
        response.prepare();

        response.out(&mut output)?;
        Ok(())
    }

    fn log_failsafe(&self, status_line: &str, failure: &str, originating: Option<&DispatchError>) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z");
        if tracing::dispatcher::has_been_set() {
            error!(
                status = %status_line,
                error = %failure,
                originating = originating.map(tracing::field::display),
                "/!\\ FAILSAFE /!\\  {timestamp}"
            );
        } else {
            let mut message = format!("/!\\ FAILSAFE /!\\  {timestamp}\n  Status: {status_line}\n  {failure}");
            if let Some(originating) = originating {
                message.push_str(&format!("\n  originally: {originating}"));
            }
            self.diagnostics.emit(&message);
        }
    }
}
