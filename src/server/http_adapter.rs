use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use tracing::warn;

use super::{OutputMode, Request, Response};
use crate::dispatcher::DispatcherPool;
use crate::error::DispatchError;
use crate::failsafe::BAD_REQUEST;
use crate::ids::RequestId;

/// Runs `http::Request<Vec<u8>>` values through a [`DispatcherPool`].
///
/// Responses are collected in body-only mode and handed back as
/// `http::Response<Vec<u8>>`, so any server that speaks the `http` types can
/// sit in front of the dispatcher.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    pool: Arc<DispatcherPool>,
}

impl HttpAdapter {
    pub fn new(pool: Arc<DispatcherPool>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<DispatcherPool> {
        &self.pool
    }

    pub fn call(&self, req: http::Request<Vec<u8>>) -> http::Response<Vec<u8>> {
        let mut body = Vec::new();
        let mut response = Response::new(OutputMode::BodyOnly);
        let mut converted = None;
        self.pool
            .failsafe()
            .respond(&mut body, BAD_REQUEST, None, None, Some(&mut response), |_, _, _| {
                converted = Some(convert_request(req)?);
                Ok(())
            });
        let Some(request) = converted else {
            return into_http(&response, body);
        };

        let mut dispatcher = self.pool.dispatcher(Vec::new(), Some(request), Some(response));
        dispatcher.dispatch();
        let (body, response) = dispatcher.into_parts();
        into_http(&response.unwrap_or_default(), body)
    }

    /// A `400 Bad Request` failsafe response for input that never became an `http::Request`.
    pub fn reject_malformed(&self, reason: &str) -> http::Response<Vec<u8>> {
        let mut body = Vec::new();
        let mut response = Response::new(OutputMode::BodyOnly);
        let fault = DispatchError::MalformedRequest(reason.to_string());
        self.pool.failsafe().respond(
            &mut body,
            BAD_REQUEST,
            Some(&fault),
            None,
            Some(&mut response),
            |_, _, _| Err(anyhow::anyhow!("{fault}")),
        );
        into_http(&response, body)
    }
}

/// Convert an `http::Request` into the dispatcher's request shape.
///
/// Header values must be valid UTF-8.
pub fn convert_request(req: http::Request<Vec<u8>>) -> Result<Request, DispatchError> {
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    let mut request = Request::new(parts.method, target);
    for (name, value) in &parts.headers {
        let value = value.to_str().map_err(|_| {
            DispatchError::MalformedRequest(format!("header `{name}` is not valid UTF-8"))
        })?;
        request.set_header(name.as_str(), value.to_string());
    }
    request.request_id = RequestId::from_header_or_new(request.header("x-request-id"));
    request.body = body;
    Ok(request)
}

fn into_http(response: &Response, body: Vec<u8>) -> http::Response<Vec<u8>> {
    let mut out = http::Response::new(body);
    *out.status_mut() = response.status();
    let headers = out.headers_mut();
    for (name, value) in response
        .headers()
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("Status"))
    {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Dropping response header that is not valid HTTP"),
        }
    }
    out
}
