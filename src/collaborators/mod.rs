//! # Collaborators Module
//!
//! Narrow contracts the dispatcher consumes from its neighbours. The routing
//! table, controllers, view search paths, the persistence layer, the code
//! dependency cache and the application logger all sit behind these traits.
//!
//! Optional collaborators (persistence, dependency cache, flushable logger,
//! localization) are configured explicitly on the
//! [`DispatcherPoolBuilder`](crate::dispatcher::DispatcherPoolBuilder); the
//! built-in callbacks that use them are only installed when they are present.
//!
//! Default implementations: [`RouteTable`] for routing and [`TemplatePaths`]
//! for view search paths.

mod route_table;
mod view_paths;

use std::sync::Arc;

use crate::error::{DispatchError, RoutingError};
use crate::server::{Request, Response};

pub use route_table::{PathPattern, Route, RouteLoader, RouteTable};
pub use view_paths::TemplatePaths;

/// Executes one request.
pub trait Controller: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn process(&self, request: &Request, response: &mut Response) -> anyhow::Result<()>;

    /// Exception-handling entry point, run after `process` (or anything before it) failed.
    ///
    /// The default re-raises, which hands the fault to the failsafe responder.
    fn process_with_exception(
        &self,
        _request: &Request,
        _response: &mut Response,
        error: &DispatchError,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("{error}"))
    }
}

/// Resolves a request to a controller.
pub trait Router: Send + Sync {
    fn recognize(&self, request: &Request) -> Result<Arc<dyn Controller>, RoutingError>;

    /// Rebuild the routing table. Called before every request in reload mode.
    fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// View template search paths.
pub trait ViewPaths: Send + Sync {
    fn reload(&self) -> anyhow::Result<()>;
}

/// Persistence layer hooks.
pub trait Persistence: Send + Sync {
    /// Return every connection checked out by the current thread to its pool.
    fn clear_active_connections(&self) -> anyhow::Result<()>;
    /// Drop connections that must not survive a code reload.
    fn clear_reloadable_connections(&self) -> anyhow::Result<()>;
    /// Forget cached model subclasses so they are rebuilt from reloaded code.
    fn reset_subclasses(&self) -> anyhow::Result<()>;
    fn instantiate_observers(&self) -> anyhow::Result<()>;
}

/// Cache of loaded application code that reload mode throws away after each request.
pub trait DependencyCache: Send + Sync {
    fn clear(&self) -> anyhow::Result<()>;
}

/// An application logger whose buffer can be flushed on demand.
pub trait FlushLog: Send + Sync {
    fn flush(&self) -> std::io::Result<()>;
}
