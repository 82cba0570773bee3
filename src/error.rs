//! Fault taxonomy for the dispatch path.
//!
//! Everything in this module is caught at the [`Dispatcher`](crate::dispatcher::Dispatcher)
//! boundary and redirected to the failsafe responder. Configuration faults live in
//! [`crate::config::ConfigError`] because they are allowed to abort startup.

use std::any::Any;

use http::Method;
use thiserror::Error;

use crate::callbacks::Phase;

/// The routing collaborator could not resolve a controller.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("No route matches [{method}] \"{path}\"")]
    NotFound { method: Method, path: String },
    #[error("route table is not loaded: {0}")]
    Unavailable(String),
}

/// A fault raised anywhere inside one dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Raised by controller execution.
    #[error(transparent)]
    Application(#[from] anyhow::Error),
    /// The transport input could not be turned into a request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("{phase} callback `{identifier}` failed: {error}")]
    Callback {
        phase: Phase,
        identifier: String,
        error: anyhow::Error,
    },
    #[error("panic during {stage}: {message}")]
    Panic { stage: &'static str, message: String },
    #[error("failed to write response: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Convert a payload caught by `catch_unwind` into a fault.
    #[must_use]
    pub fn from_panic(stage: &'static str, payload: Box<dyn Any + Send>) -> Self {
        DispatchError::Panic {
            stage,
            message: panic_message(payload.as_ref()),
        }
    }

    #[must_use]
    pub fn is_routing(&self) -> bool {
        matches!(self, DispatchError::Routing(_))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
