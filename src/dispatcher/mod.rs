//! # Dispatcher Module
//!
//! The dispatcher mediates between a transport adapter and the application's
//! controllers. One [`Dispatcher`] handles exactly one request; the
//! [`DispatcherPool`] it is created from holds everything shared between
//! requests.
//!
//! ## Request Flow
//!
//! 1. Take the pool lock, unless the pool allows concurrency
//! 2. In cached mode, run the preparation callbacks once for the whole pool
//! 3. Run `before_dispatch` callbacks in registration order
//! 4. Recognize the route, run the controller, stream the response
//! 5. On any fault in 2-4, hand over to the failsafe responder (`500`)
//! 6. Run `after_dispatch` callbacks in reverse registration order, always
//!
//! ## Reload Mode
//!
//! With `cache_classes = false` the pool installs `reload_application` as a
//! before-dispatch callback and `cleanup_application` as an after-dispatch
//! callback. Every request then re-runs the preparation callbacks, reloads
//! the route table and the view paths, and clears cached application code
//! afterwards. The loaded-code cache is not thread-safe, which is why
//! dispatches are serialized by default.
//!
//! ## Example
//!
//! ```rust,ignore
//! use railyard::dispatcher::DispatcherPool;
//!
//! let pool = DispatcherPool::builder(Arc::new(routes))
//!     .cache_classes(false)
//!     .build();
//! pool.after_dispatch(Some("audit"), |scope| {
//!     tracing::info!(request_id = ?scope.request_id(), "done");
//!     Ok(())
//! });
//!
//! let mut dispatcher = pool.dispatcher(Vec::new(), Some(request), None);
//! dispatcher.dispatch();
//! let (bytes, _response) = dispatcher.into_parts();
//! ```

mod core;
pub mod lifecycle;
mod pool;

pub use core::{DispatchContext, DispatchState, Dispatcher};
pub use pool::{CallbackScope, ControllerFactory, DispatcherPool, DispatcherPoolBuilder};
