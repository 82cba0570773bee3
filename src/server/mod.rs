//! # Server Module
//!
//! The internal request/response shape and the transport adapters that
//! translate into it.
//!
//! - [`Request`] / [`Response`]: what the dispatcher and controllers see
//! - [`gateway`]: CGI-style environment map plus input stream
//! - [`http_adapter`]: `http::Request<Vec<u8>>` in, `http::Response<Vec<u8>>` out
//! - [`http_server`]: blocking `tiny_http` listener with worker threads

pub mod gateway;
pub mod http_adapter;
pub mod http_server;
pub mod request;
pub mod response;

use std::io::Read;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::DispatchError;

/// Most requests carry fewer headers than this, so they stay on the stack.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Largest request body either adapter will buffer.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Header list shared by [`Request`] and [`Response`].
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

pub use gateway::{GatewayAdapter, GatewayEnv};
pub use http_adapter::HttpAdapter;
pub use http_server::{HttpServer, ServerHandle};
pub use request::{Request, RequestSummary};
pub use response::{parse_status_line, OutputMode, Response};

/// Buffer a request body of at most [`MAX_BODY_SIZE`] bytes.
///
/// With `expected` set the body must be exactly that long; otherwise the
/// stream is read to its end. Oversized or truncated bodies are malformed.
pub(crate) fn read_body(
    input: &mut dyn Read,
    expected: Option<usize>,
) -> Result<Vec<u8>, DispatchError> {
    if let Some(length) = expected.filter(|&l| l > MAX_BODY_SIZE) {
        return Err(DispatchError::MalformedRequest(format!(
            "request body of {length} bytes exceeds the {MAX_BODY_SIZE} byte limit"
        )));
    }
    let limit = expected.unwrap_or(MAX_BODY_SIZE + 1);
    let mut body = Vec::with_capacity(expected.unwrap_or(0));
    Read::take(input, limit as u64).read_to_end(&mut body)?;

    match expected {
        Some(length) if body.len() < length => Err(DispatchError::MalformedRequest(format!(
            "request body shorter than CONTENT_LENGTH {length}"
        ))),
        None if body.len() > MAX_BODY_SIZE => Err(DispatchError::MalformedRequest(format!(
            "request body exceeds the {MAX_BODY_SIZE} byte limit"
        ))),
        _ => Ok(body),
    }
}
