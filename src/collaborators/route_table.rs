use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::Method;
use tracing::{debug, info};

use super::{Controller, Router};
use crate::error::RoutingError;
use crate::server::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    /// Matches the prefix itself and anything below it (`/assets` matches `/assets/app.css`).
    Prefix(String),
}

impl PathPattern {
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// One routing entry. A `None` method matches any method.
#[derive(Clone)]
pub struct Route {
    pub method: Option<Method>,
    pub pattern: PathPattern,
    pub controller: Arc<dyn Controller>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("controller", &self.controller.name())
            .finish()
    }
}

impl Route {
    pub fn exact(method: Method, path: &str, controller: Arc<dyn Controller>) -> Self {
        Self {
            method: Some(method),
            pattern: PathPattern::Exact(path.to_string()),
            controller,
        }
    }

    pub fn prefix(method: Option<Method>, prefix: &str, controller: Arc<dyn Controller>) -> Self {
        Self {
            method,
            pattern: PathPattern::Prefix(prefix.to_string()),
            controller,
        }
    }

    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.pattern.matches(path)
    }
}

/// Produces a fresh route list on every reload.
pub type RouteLoader = Box<dyn Fn() -> anyhow::Result<Vec<Route>> + Send + Sync>;

/// Ordered route list, first match wins.
///
/// Reads go through an `ArcSwap`, so a reload swaps the whole table without
/// blocking concurrent recognition.
pub struct RouteTable {
    routes: ArcSwap<Vec<Route>>,
    loader: Option<RouteLoader>,
    generation: AtomicU64,
}

impl RouteTable {
    /// A fixed table; `reload` keeps it as is.
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: ArcSwap::from_pointee(routes),
            loader: None,
            generation: AtomicU64::new(0),
        }
    }

    /// A table rebuilt from `loader` now and on every reload.
    pub fn with_loader(loader: RouteLoader) -> anyhow::Result<Self> {
        let routes = loader()?;
        Ok(Self {
            routes: ArcSwap::from_pointee(routes),
            loader: Some(loader),
            generation: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn routes(&self) -> Arc<Vec<Route>> {
        self.routes.load_full()
    }

    /// Number of reloads applied so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Router for RouteTable {
    fn recognize(&self, request: &Request) -> Result<Arc<dyn Controller>, RoutingError> {
        let routes = self.routes.load();
        let found = routes
            .iter()
            .find(|route| route.matches(&request.method, &request.path));
        match found {
            Some(route) => {
                debug!(
                    request_id = %request.request_id,
                    method = %request.method,
                    path = %request.path,
                    controller = %route.controller.name(),
                    "Route recognized"
                );
                Ok(Arc::clone(&route.controller))
            }
            None => Err(RoutingError::NotFound {
                method: request.method.clone(),
                path: request.path.clone(),
            }),
        }
    }

    fn reload(&self) -> anyhow::Result<()> {
        let Some(loader) = &self.loader else {
            return Ok(());
        };
        let routes = loader()?;
        let count = routes.len();
        self.routes.store(Arc::new(routes));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(routes = count, generation, "Route table reloaded");
        Ok(())
    }
}
