//! CGI-style gateway adapter.
//!
//! The request arrives as an environment map (`REQUEST_METHOD`, `PATH_INFO`,
//! `QUERY_STRING`, `CONTENT_TYPE`, `CONTENT_LENGTH`, `HTTP_*`) plus an input
//! stream; the response is written to the output sink as a `Status:` header
//! block followed by the body.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use http::Method;
use tracing::debug;

use super::{read_body, OutputMode, Request, Response};
use crate::dispatcher::DispatcherPool;
use crate::error::DispatchError;
use crate::failsafe::BAD_REQUEST;
use crate::ids::RequestId;

pub type GatewayEnv = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct GatewayAdapter {
    pool: Arc<DispatcherPool>,
    test_request: bool,
}

impl GatewayAdapter {
    pub fn new(pool: Arc<DispatcherPool>) -> Self {
        Self {
            pool,
            test_request: false,
        }
    }

    /// Mark every dispatch from this adapter as part of a test transaction.
    #[must_use]
    pub fn test_requests(mut self, enabled: bool) -> Self {
        self.test_request = enabled;
        self
    }

    /// Build the request and dispatch it, writing everything to `output`.
    ///
    /// When the request cannot be built, a `400 Bad Request` failsafe response
    /// is written instead and nothing is dispatched.
    pub fn serve<W: Write>(&self, env: &GatewayEnv, input: &mut dyn Read, mut output: W) -> W {
        let mut built = None;
        self.pool
            .failsafe()
            .respond(&mut output, BAD_REQUEST, None, None, None, |_, _, _| {
                built = Some(build_request(env, input)?);
                Ok(())
            });
        let Some(request) = built else {
            return output;
        };

        let mut dispatcher = self.pool.dispatcher(
            output,
            Some(request),
            Some(Response::new(OutputMode::Gateway)),
        );
        if self.test_request {
            dispatcher.mark_as_test_request();
        }
        dispatcher.dispatch();
        dispatcher.into_parts().0
    }
}

/// Translate a gateway environment and input stream into a [`Request`].
pub fn build_request(env: &GatewayEnv, input: &mut dyn Read) -> Result<Request, DispatchError> {
    let method = env
        .get("REQUEST_METHOD")
        .ok_or_else(|| DispatchError::MalformedRequest("REQUEST_METHOD is not set".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| DispatchError::MalformedRequest(format!("invalid REQUEST_METHOD `{method}`")))?;

    let path = env
        .get("PATH_INFO")
        .filter(|p| !p.is_empty())
        .map_or("/", String::as_str);
    let mut request = Request::new(method, path);
    if let Some(query) = env.get("QUERY_STRING").filter(|q| !q.is_empty()) {
        request.query_string.clone_from(query);
    }

    for (name, value) in env {
        if let Some(header) = name.strip_prefix("HTTP_") {
            request.set_header(&header.replace('_', "-"), value.clone());
        }
    }
    if let Some(ctype) = env.get("CONTENT_TYPE").filter(|c| !c.is_empty()) {
        request.set_header("content-type", ctype.clone());
    }
    request.request_id = RequestId::from_header_or_new(request.header("x-request-id"));

    let length = match env.get("CONTENT_LENGTH").filter(|l| !l.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| DispatchError::MalformedRequest(format!("invalid CONTENT_LENGTH `{raw}`")))?,
        None => 0,
    };
    if length > 0 {
        request.body = read_body(input, Some(length))?;
        request.set_header("content-length", length.to_string());
    }

    debug!(
        request_id = %request.request_id,
        method = %request.method,
        path = %request.path,
        "Gateway request built"
    );
    Ok(request)
}
