use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;

use super::BAD_REQUEST;
use crate::server::parse_status_line;

/// What a degraded response is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailsafeOutcome {
    pub status_line: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FailsafeOutcome {
    fn new(status_line: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_line: status_line.to_string(),
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }
}

/// Derive the failsafe response for `status_line`.
///
/// A structured request content type (json, xml, yaml/yml; matched
/// case-insensitively anywhere in the media type) wins over the original status
/// and produces a `400 Bad Request` payload in the same family. Otherwise the
/// error page `{error_dir}/{code}.html` is used verbatim when it exists, and a
/// minimal inline page when it does not.
pub fn derive_outcome(
    status_line: &str,
    request_content_type: Option<&str>,
    error_dir: Option<&Path>,
) -> io::Result<FailsafeOutcome> {
    let ctype = request_content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .unwrap_or("");

    if !ctype.is_empty() {
        if let Some(outcome) = structured_outcome(ctype)? {
            return Ok(outcome);
        }
    }

    if let (Some(dir), Some(code)) = (error_dir, parse_status_line(status_line)) {
        let page = dir.join(format!("{}.html", code.as_str()));
        match fs::read(&page) {
            Ok(body) => return Ok(FailsafeOutcome::new(status_line, "text/html", body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(FailsafeOutcome::new(
        status_line,
        "text/html",
        format!("<html><body><h1>{status_line}</h1></body></html>"),
    ))
}

fn structured_outcome(ctype: &str) -> io::Result<Option<FailsafeOutcome>> {
    let lowered = ctype.to_ascii_lowercase();
    let message = format!("Bad Request.  Could not parse request body sent as {ctype}");

    if lowered.contains("json") {
        let body = json!({ "error": message }).to_string();
        return Ok(Some(FailsafeOutcome::new(BAD_REQUEST, "application/json", body)));
    }
    if lowered.contains("xml") {
        let body = format!("<error><message>{}</message></error>", escape_xml(&message));
        return Ok(Some(FailsafeOutcome::new(BAD_REQUEST, "application/xml", body)));
    }
    if lowered.contains("yaml") || lowered.contains("yml") {
        let mut doc = serde_yaml::Mapping::new();
        doc.insert("error".into(), message.into());
        let rendered = serde_yaml::to_string(&doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let body = format!("---\n{rendered}");
        return Ok(Some(FailsafeOutcome::new(BAD_REQUEST, "application/x-yaml", body)));
    }
    Ok(None)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
