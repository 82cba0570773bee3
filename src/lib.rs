//! # Railyard
//!
//! **Railyard** is the request dispatch core of a web application framework: it
//! takes one request from a transport adapter, runs the registered lifecycle
//! callbacks around it, hands it to the router and controller, and guarantees
//! that *something* is written back to the client even when the normal error
//! handling path itself fails.
//!
//! ## Architecture
//!
//! - **[`callbacks`]** - Ordered, identifier-addressable callback chains per phase
//! - **[`dispatcher`]** - The per-request [`Dispatcher`] and the shared [`DispatcherPool`]
//! - **[`failsafe`]** - Minimal degraded responses and the raw error sink
//! - **[`server`]** - Request/response model plus gateway, `http` and `tiny_http` adapters
//! - **[`collaborators`]** - Router, controller, persistence and cache seams
//! - **[`config`]** - Application config file and the hardening finalizer
//! - **[`params`]** - Body parameter parsers and JSON entity escaping
//! - **[`i18n`]** / **[`view`]** - Localization backend and the view translation helper
//! - **[`logging`]** - `tracing` subscriber setup and the flushable log file
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Adapter as Transport adapter
//!     participant Dispatcher
//!     participant Callbacks as CallbackRegistry
//!     participant Router
//!     participant Controller
//!     participant Failsafe as FailsafeResponder
//!
//!     Adapter->>Dispatcher: dispatch(request, response, output)
//!     Dispatcher->>Dispatcher: acquire pool lock (unless allow_concurrency)
//!     Dispatcher->>Callbacks: prepare_application (reload mode, or once when cached)
//!     Dispatcher->>Callbacks: before_dispatch
//!     Dispatcher->>Router: recognize(request)
//!     Router-->>Dispatcher: controller
//!     Dispatcher->>Controller: process(request, response)
//!     Dispatcher->>Adapter: response.out(output)
//!
//!     alt any step fails
//!         Dispatcher->>Controller: process_with_exception (500)
//!         alt rescue fails too
//!             Dispatcher->>Failsafe: respond(output, "500 Internal Server Error")
//!         end
//!     end
//!
//!     Dispatcher->>Callbacks: after_dispatch (reverse order, always)
//!     Dispatcher->>Dispatcher: release pool lock
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http::Method;
//! use railyard::collaborators::{Route, RouteTable};
//! use railyard::dispatcher::DispatcherPool;
//! use railyard::server::{OutputMode, Request, Response};
//! use railyard::static_files::{StaticFiles, StaticFilesController};
//!
//! let files = StaticFilesController::new(StaticFiles::new("public"));
//! let routes = RouteTable::new(vec![Route::prefix(None, "/", Arc::new(files))]);
//! let pool = DispatcherPool::builder(Arc::new(routes))
//!     .cache_classes(false)
//!     .error_file_path("public")
//!     .build();
//!
//! let mut dispatcher = pool.dispatcher(
//!     Vec::new(),
//!     Some(Request::new(Method::GET, "/index.html")),
//!     Some(Response::new(OutputMode::Gateway)),
//! );
//! dispatcher.dispatch();
//! let (written, _response) = dispatcher.into_parts();
//! println!("{}", String::from_utf8_lossy(&written));
//! ```
//!
//! ## Runtime Considerations
//!
//! Dispatch is synchronous. Unless `allow_concurrency` is set, every dispatch of
//! a pool is serialized behind one mutex, and the `serve` command's worker
//! threads queue on it. Panics inside callbacks or controllers are caught and
//! treated like any other dispatch fault.

pub mod callbacks;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod failsafe;
pub mod i18n;
pub mod ids;
pub mod logging;
pub mod params;
pub mod server;
pub mod static_files;
pub mod view;

pub use callbacks::{CallbackRegistry, Phase};
pub use dispatcher::{Dispatcher, DispatcherPool};
pub use error::{DispatchError, RoutingError};
pub use failsafe::FailsafeResponder;
