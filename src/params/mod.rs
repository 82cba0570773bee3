//! Request body parameter parsing.
//!
//! Structured bodies (JSON, XML, YAML) are turned into a `serde_json::Value`
//! tree. Which formats are accepted is decided once, when the framework
//! settings are finalized; a disabled format yields no body parameters at all.

mod xml;

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;

/// Structured body formats with a registered parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyFormat {
    Json,
    Xml,
    Yaml,
}

impl BodyFormat {
    /// Map a `Content-Type` value (parameters ignored) to a body format.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "text/x-json" | "application/jsonrequest" => Some(BodyFormat::Json),
            "application/xml" | "text/xml" | "application/x-xml" => Some(BodyFormat::Xml),
            "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml" => {
                Some(BodyFormat::Yaml)
            }
            other if other.ends_with("+json") => Some(BodyFormat::Json),
            other if other.ends_with("+xml") => Some(BodyFormat::Xml),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("request body is not valid UTF-8")]
    Encoding,
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML body: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid XML body: {0}")]
    Xml(String),
}

/// The set of enabled body parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamParsers {
    enabled: HashSet<BodyFormat>,
}

impl Default for ParamParsers {
    fn default() -> Self {
        Self::all()
    }
}

impl ParamParsers {
    #[must_use]
    pub fn all() -> Self {
        Self {
            enabled: [BodyFormat::Json, BodyFormat::Xml, BodyFormat::Yaml]
                .into_iter()
                .collect(),
        }
    }

    pub fn remove(&mut self, format: BodyFormat) {
        self.enabled.remove(&format);
    }

    #[must_use]
    pub fn contains(&self, format: BodyFormat) -> bool {
        self.enabled.contains(&format)
    }

    /// Parse `body` according to `content_type`.
    ///
    /// Returns `Ok(None)` for empty bodies, unknown types and disabled parsers.
    pub fn parse(&self, content_type: Option<&str>, body: &[u8]) -> Result<Option<Value>, ParamsError> {
        let Some(format) = content_type.and_then(BodyFormat::from_content_type) else {
            return Ok(None);
        };
        if !self.contains(format) {
            tracing::debug!(format = ?format, "Body parser disabled, ignoring request body");
            return Ok(None);
        }
        let text = std::str::from_utf8(body).map_err(|_| ParamsError::Encoding)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value = match format {
            BodyFormat::Json => serde_json::from_str(text)?,
            BodyFormat::Yaml => serde_yaml::from_str(text)?,
            BodyFormat::Xml => xml::parse(text).map_err(ParamsError::Xml)?,
        };
        Ok(Some(value))
    }
}

/// Serialize `value` as JSON, optionally escaping `<`, `>` and `&` as unicode escapes.
///
/// Escaped output is safe to embed inside an HTML `<script>` block.
#[must_use]
pub fn encode_json(value: &Value, escape_html_entities: bool) -> String {
    let encoded = value.to_string();
    if !escape_html_entities {
        return encoded;
    }
    let mut escaped = String::with_capacity(encoded.len());
    for ch in encoded.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            other => escaped.push(other),
        }
    }
    escaped
}
