use std::io::{self, Write};
use std::sync::Arc;

use http::StatusCode;

use super::request::RequestSummary;
use super::HeaderVec;

/// How [`Response::out`] serializes onto the output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Gateway style: a `Status:` line and header block, a blank line, then the body.
    Gateway,
    /// Body bytes only; the adapter transfers status and headers itself.
    BodyOnly,
}

/// Internal response shape filled by controllers and by the failsafe responder.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderVec,
    body: Vec<u8>,
    request: Option<RequestSummary>,
    mode: OutputMode,
    prepared: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(OutputMode::Gateway)
    }
}

/// Parse the numeric code at the start of a status line such as `"500 Internal Server Error"`.
#[must_use]
pub fn parse_status_line(line: &str) -> Option<StatusCode> {
    let code = line.trim_start().get(..3)?;
    code.parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
}

impl Response {
    #[must_use]
    pub fn new(mode: OutputMode) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderVec::new(),
            body: Vec::new(),
            request: None,
            mode,
            prepared: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Set the status from a full status line and record the line in the `Status` header.
    pub fn set_status_line(&mut self, line: &str) {
        if let Some(status) = parse_status_line(line) {
            self.status = status;
        }
        self.set_header("Status", line.to_string());
    }

    #[must_use]
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Add or replace a header
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
        self.prepared = false;
    }

    /// Convenience for controllers: status, content type and body in one call.
    pub fn render(&mut self, status: StatusCode, content_type: &str, body: impl Into<Vec<u8>>) {
        self.set_status(status);
        self.set_header("Content-Type", content_type.to_string());
        self.set_body(body);
    }

    #[must_use]
    pub fn request(&self) -> Option<&RequestSummary> {
        self.request.as_ref()
    }

    /// Attach the originating request unless one is already attached.
    pub fn attach_request(&mut self, request: RequestSummary) {
        if self.request.is_none() {
            self.request = Some(request);
        }
    }

    /// Bytes `out` will write after the header block (`HEAD` responses carry none).
    #[must_use]
    pub fn body_to_send(&self) -> &[u8] {
        match &self.request {
            Some(req) if req.method == http::Method::HEAD => &[],
            _ => &self.body,
        }
    }

    /// Finalize headers: default content type and `Content-Length` when absent.
    pub fn prepare(&mut self) {
        if !self.has_header("Content-Type") {
            self.set_header("Content-Type", "text/html; charset=utf-8".to_string());
        }
        if !self.has_header("Content-Length") {
            self.set_header("Content-Length", self.body.len().to_string());
        }
        self.prepared = true;
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Stream the response onto `sink`.
    pub fn out(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        if !self.prepared {
            self.prepare();
        }
        if self.mode == OutputMode::Gateway {
            let status_line = match self.header("Status") {
                Some(line) => line.to_string(),
                None => format!(
                    "{} {}",
                    self.status.as_str(),
                    self.status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string(),
            };
            write!(sink, "Status: {status_line}\r\n")?;
            for (name, value) in self.headers.iter().filter(|(k, _)| !k.eq_ignore_ascii_case("Status")) {
                write!(sink, "{name}: {value}\r\n")?;
            }
            sink.write_all(b"\r\n")?;
        }
        sink.write_all(self.body_to_send())?;
        sink.flush()
    }
}
