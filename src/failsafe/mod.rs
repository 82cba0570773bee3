//! # Failsafe Module
//!
//! Last line of defence for a dispatch: [`FailsafeResponder`] turns a failure
//! of the normal error path into a minimal response, and a failure of that
//! into a line on a [`RawErrorSink`].

mod body;
mod diagnostics;
mod responder;

pub use body::{derive_outcome, FailsafeOutcome};
pub use diagnostics::{CapturedSink, RawErrorSink, StderrSink};
pub use responder::FailsafeResponder;

pub const INTERNAL_SERVER_ERROR: &str = "500 Internal Server Error";
pub const BAD_REQUEST: &str = "400 Bad Request";
