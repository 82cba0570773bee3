use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use serde_json::{Map, Value};

use super::HeaderVec;
use crate::config::hardening::{self, FrameworkSettings};
use crate::ids::RequestId;
use crate::params::ParamsError;

/// Internal request shape consumed by the dispatcher.
///
/// Transport adapters build it from a gateway environment or an `http::Request`.
/// Header names are stored lowercase.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: RequestId,
    pub method: Method,
    /// Path without the query string
    pub path: String,
    pub query_string: String,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
    settings: Arc<FrameworkSettings>,
}

/// The part of a request a response keeps once the request is attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
}

impl Request {
    /// A bodyless request using the process-wide framework settings.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path, String::new()),
        };
        Self {
            request_id: RequestId::new(),
            method,
            path,
            query_string,
            headers: HeaderVec::new(),
            body: Vec::new(),
            settings: hardening::installed(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Arc<FrameworkSettings>) -> Self {
        self.settings = settings;
        self
    }

    /// Add or replace a header (names are normalized to lowercase).
    pub fn set_header(&mut self, name: &str, value: String) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| k.as_ref() != name);
        self.headers.push((Arc::from(name.as_str()), value));
    }

    /// Header lookup (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    #[must_use]
    pub fn settings(&self) -> &FrameworkSettings {
        &self.settings
    }

    #[must_use]
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            request_id: self.request_id,
            method: self.method.clone(),
            path: self.path.clone(),
        }
    }

    /// Decoded query string parameters; later duplicates win.
    #[must_use]
    pub fn query_params(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.query_string.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Body parameters, parsed with whichever parsers the framework settings leave enabled.
    pub fn body_params(&self) -> Result<Option<Value>, ParamsError> {
        self.settings
            .param_parsers()
            .parse(self.content_type(), &self.body)
    }

    /// Query parameters merged with object-shaped body parameters (body wins).
    pub fn params(&self) -> Result<Value, ParamsError> {
        let mut merged: Map<String, Value> = self
            .query_params()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        if let Some(body) = self.body_params()? {
            match body {
                Value::Object(fields) => merged.extend(fields),
                other => {
                    merged.insert("_body".to_string(), other);
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HardeningConfig, Profile};
    use serde_json::json;

    #[test]
    fn test_query_string_is_split_from_path() {
        let req = Request::new(Method::GET, "/pets?limit=10&limit=20&name=a%20b");
        assert_eq!(req.path, "/pets");
        let params = req.query_params();
        assert_eq!(params.get("limit").map(String::as_str), Some("20"));
        assert_eq!(params.get("name").map(String::as_str), Some("a b"));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = Request::new(Method::POST, "/")
            .with_header("Content-Type", "application/json")
            .with_header("CONTENT-TYPE", "text/xml");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.content_type(), Some("text/xml"));
    }

    #[test]
    fn test_params_merge_query_and_body() {
        let req = Request::new(Method::POST, "/pets?page=2")
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"Rex"}"#);
        assert_eq!(req.params().unwrap(), json!({"page": "2", "name": "Rex"}));
    }

    #[test]
    fn test_hardened_settings_ignore_json_bodies() {
        let settings = Arc::new(HardeningConfig::for_profile(Profile::Hardened).finalize());
        let req = Request::new(Method::POST, "/pets")
            .with_header("content-type", "application/json")
            .with_body("{malformed")
            .with_settings(settings);
        assert_eq!(req.body_params().unwrap(), None);
    }
}
