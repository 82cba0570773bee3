//! Built-in callbacks installed by [`DispatcherPoolBuilder::build`](super::DispatcherPoolBuilder::build).

use tracing::{debug, info};

use super::pool::{CallbackScope, DispatcherPool};
use crate::callbacks::Phase;

pub const RELOAD_APPLICATION: &str = "reload_application";
pub const CLEANUP_APPLICATION: &str = "cleanup_application";
pub const LOAD_APPLICATION_CONTROLLER: &str = "load_application_controller";
pub const CHECKIN_CONNECTIONS: &str = "checkin_connections";
pub const INSTANTIATE_OBSERVERS: &str = "instantiate_observers";
pub const FLUSH_LOGGER: &str = "flush_logger";

/// Register the framework's own callbacks, depending on reload mode and on
/// which optional collaborators the pool was built with.
pub(super) fn define_dispatcher_callbacks(pool: &DispatcherPool) {
    if !pool.cache_classes() {
        pool.before_dispatch(Some(RELOAD_APPLICATION), reload_application);
        pool.after_dispatch(Some(CLEANUP_APPLICATION), cleanup_application);
    }

    pool.to_prepare(Some(LOAD_APPLICATION_CONTROLLER), |scope| {
        scope.pool().load_application_controller()
    });

    if pool.persistence().is_some() {
        pool.after_dispatch(Some(CHECKIN_CONNECTIONS), checkin_connections);
        pool.to_prepare(Some(INSTANTIATE_OBSERVERS), |scope| {
            match scope.pool().persistence() {
                Some(persistence) => persistence.instantiate_observers(),
                None => Ok(()),
            }
        });
    }

    if pool.logger().is_some() {
        pool.after_dispatch(Some(FLUSH_LOGGER), flush_logger);
    }

    if pool.localization().is_some() {
        pool.to_prepare(None, |scope| match scope.pool().localization() {
            Some(localization) => localization.reload(),
            None => Ok(()),
        });
    }
}

/// Run the preparation callbacks, then reload routes and view paths.
///
/// Preparation comes first: route and view reloads assume the application
/// controller and localization data are already primed.
pub fn reload_application(scope: &CallbackScope) -> anyhow::Result<()> {
    let pool = scope.pool();
    pool.run_callbacks(Phase::PrepareDispatch, scope)?;
    pool.router().reload()?;
    if let Some(view_paths) = pool.view_paths() {
        view_paths.reload()?;
    }
    info!(request_id = ?scope.request_id(), "Application reloaded");
    Ok(())
}

/// Forget loaded application code so the next request starts clean.
pub fn cleanup_application(scope: &CallbackScope) -> anyhow::Result<()> {
    let pool = scope.pool();
    if let Some(persistence) = pool.persistence() {
        persistence.reset_subclasses()?;
    }
    if let Some(dependencies) = pool.dependencies() {
        dependencies.clear()?;
    }
    if let Some(persistence) = pool.persistence() {
        persistence.clear_reloadable_connections()?;
    }
    debug!(request_id = ?scope.request_id(), "Application cleaned up");
    Ok(())
}

/// Return the request's connections to the pool, except inside a test transaction.
pub fn checkin_connections(scope: &CallbackScope) -> anyhow::Result<()> {
    if scope.is_test_request() {
        debug!(request_id = ?scope.request_id(), "Test request, keeping connections checked out");
        return Ok(());
    }
    match scope.pool().persistence() {
        Some(persistence) => persistence.clear_active_connections(),
        None => Ok(()),
    }
}

pub fn flush_logger(scope: &CallbackScope) -> anyhow::Result<()> {
    if let Some(logger) = scope.pool().logger() {
        logger.flush()?;
    }
    Ok(())
}
