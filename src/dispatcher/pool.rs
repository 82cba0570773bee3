use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::core::Dispatcher;
use super::lifecycle;
use crate::callbacks::{CallbackChain, CallbackRegistry, CallbackUnit, Phase, Registration};
use crate::collaborators::{Controller, DependencyCache, FlushLog, Persistence, Router, ViewPaths};
use crate::config::DispatcherSection;
use crate::error::DispatchError;
use crate::failsafe::{FailsafeResponder, RawErrorSink};
use crate::i18n::Localization;
use crate::ids::RequestId;
use crate::server::{Request, Response};

/// Resolves the application-wide fallback controller.
pub type ControllerFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Controller>> + Send + Sync>;

/// What a callback sees while it runs.
#[derive(Clone)]
pub struct CallbackScope {
    pool: Arc<DispatcherPool>,
    test_request: bool,
    request_id: Option<RequestId>,
}

impl fmt::Debug for CallbackScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackScope")
            .field("test_request", &self.test_request)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl CallbackScope {
    pub(crate) fn new(pool: Arc<DispatcherPool>, test_request: bool, request_id: Option<RequestId>) -> Self {
        Self {
            pool,
            test_request,
            request_id,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<DispatcherPool> {
        &self.pool
    }

    /// Set by [`Dispatcher::mark_as_test_request`].
    #[must_use]
    pub fn is_test_request(&self) -> bool {
        self.test_request
    }

    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }
}

/// Process-wide dispatch state shared by every [`Dispatcher`].
///
/// Owns the callback chains, the collaborators, the failsafe responder and
/// the lock that serializes dispatches when concurrency is off. Pools that
/// must serialize against each other can be built with the same lock.
pub struct DispatcherPool {
    allow_concurrency: bool,
    cache_classes: bool,
    lock: Arc<Mutex<()>>,
    callbacks: RwLock<CallbackRegistry<CallbackScope>>,
    prepared: OnceCell<()>,
    router: Arc<dyn Router>,
    view_paths: Option<Arc<dyn ViewPaths>>,
    persistence: Option<Arc<dyn Persistence>>,
    dependencies: Option<Arc<dyn DependencyCache>>,
    logger: Option<Arc<dyn FlushLog>>,
    localization: Option<Arc<dyn Localization>>,
    application_controller_factory: Option<ControllerFactory>,
    application_controller: RwLock<Option<Arc<dyn Controller>>>,
    failsafe: FailsafeResponder,
}

impl fmt::Debug for DispatcherPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherPool")
            .field("allow_concurrency", &self.allow_concurrency)
            .field("cache_classes", &self.cache_classes)
            .field("persistence", &self.persistence.is_some())
            .field("flushable_logger", &self.logger.is_some())
            .field("localization", &self.localization.is_some())
            .field("failsafe", &self.failsafe)
            .finish_non_exhaustive()
    }
}

impl DispatcherPool {
    pub fn builder(router: Arc<dyn Router>) -> DispatcherPoolBuilder {
        DispatcherPoolBuilder::new(router)
    }

    /// A dispatcher for one request.
    pub fn dispatcher<W: Write>(
        self: &Arc<Self>,
        output: W,
        request: Option<Request>,
        response: Option<Response>,
    ) -> Dispatcher<W> {
        Dispatcher::new(Arc::clone(self), output, request, response)
    }

    #[must_use]
    pub fn allow_concurrency(&self) -> bool {
        self.allow_concurrency
    }

    #[must_use]
    pub fn cache_classes(&self) -> bool {
        self.cache_classes
    }

    #[must_use]
    pub fn lock(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }

    #[must_use]
    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    #[must_use]
    pub fn view_paths(&self) -> Option<&Arc<dyn ViewPaths>> {
        self.view_paths.as_ref()
    }

    #[must_use]
    pub fn persistence(&self) -> Option<&Arc<dyn Persistence>> {
        self.persistence.as_ref()
    }

    #[must_use]
    pub fn dependencies(&self) -> Option<&Arc<dyn DependencyCache>> {
        self.dependencies.as_ref()
    }

    #[must_use]
    pub fn logger(&self) -> Option<&Arc<dyn FlushLog>> {
        self.logger.as_ref()
    }

    #[must_use]
    pub fn localization(&self) -> Option<&Arc<dyn Localization>> {
        self.localization.as_ref()
    }

    #[must_use]
    pub fn failsafe(&self) -> &FailsafeResponder {
        &self.failsafe
    }

    /// Add a preparation callback.
    ///
    /// Preparation callbacks run before every request in reload mode and once,
    /// before the first request, otherwise. Registering again under the same
    /// identifier replaces the earlier unit in place.
    pub fn to_prepare<F>(&self, identifier: Option<&str>, unit: F) -> Registration
    where
        F: Fn(&CallbackScope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Phase::PrepareDispatch, identifier, Arc::new(unit))
    }

    pub fn before_dispatch<F>(&self, identifier: Option<&str>, unit: F) -> Registration
    where
        F: Fn(&CallbackScope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Phase::BeforeDispatch, identifier, Arc::new(unit))
    }

    /// Add a teardown callback. After-dispatch callbacks run last-registered first.
    pub fn after_dispatch<F>(&self, identifier: Option<&str>, unit: F) -> Registration
    where
        F: Fn(&CallbackScope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Phase::AfterDispatch, identifier, Arc::new(unit))
    }

    pub fn register(
        &self,
        phase: Phase,
        identifier: Option<&str>,
        unit: CallbackUnit<CallbackScope>,
    ) -> Registration {
        let registration = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(phase, identifier, unit);
        debug!(
            phase = %phase,
            identifier = identifier.unwrap_or("-"),
            ?registration,
            "Callback registered"
        );
        registration
    }

    /// Identifiers of `phase` in registration order (`None` for anonymous units).
    #[must_use]
    pub fn callback_identifiers(&self, phase: Phase) -> Vec<Option<String>> {
        self.chain(phase)
            .identifiers()
            .into_iter()
            .map(|id| id.map(str::to_string))
            .collect()
    }

    /// Copy of one chain; callbacks may register new callbacks while it runs.
    pub(crate) fn chain(&self, phase: Phase) -> CallbackChain<CallbackScope> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(phase)
    }

    /// Run `phase` in its natural direction, stopping at the first failure.
    pub fn run_callbacks(&self, phase: Phase, scope: &CallbackScope) -> Result<(), DispatchError> {
        self.chain(phase).run(phase.default_direction(), scope)
    }

    /// Run every preparation callback now, outside any request.
    pub fn run_prepare_callbacks(self: &Arc<Self>) -> Result<(), DispatchError> {
        let scope = CallbackScope::new(Arc::clone(self), false, None);
        self.run_callbacks(Phase::PrepareDispatch, &scope)
    }

    /// In cached mode, run the preparation callbacks before the first dispatch.
    ///
    /// A failed preparation leaves the pool unprepared, so the next dispatch retries it.
    pub(crate) fn ensure_prepared(&self, scope: &CallbackScope) -> Result<(), DispatchError> {
        if !self.cache_classes {
            return Ok(());
        }
        self.prepared
            .get_or_try_init(|| -> Result<(), DispatchError> {
                self.run_callbacks(Phase::PrepareDispatch, scope)?;
                info!("Application prepared");
                Ok(())
            })
            .map(|_| ())
    }

    /// The controller failsafe rescue falls back to when routing never produced one.
    #[must_use]
    pub fn application_controller(&self) -> Option<Arc<dyn Controller>> {
        self.application_controller
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-resolve the fallback controller from its factory.
    pub fn load_application_controller(&self) -> anyhow::Result<()> {
        let Some(factory) = &self.application_controller_factory else {
            return Ok(());
        };
        let controller = factory()?;
        debug!(controller = %controller.name(), "Application controller loaded");
        *self
            .application_controller
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(controller);
        Ok(())
    }
}

/// Configures a [`DispatcherPool`].
///
/// ```rust,ignore
/// let pool = DispatcherPool::builder(Arc::new(routes))
///     .cache_classes(false)
///     .persistence(Arc::new(db))
///     .error_file_path("public")
///     .build();
/// ```
pub struct DispatcherPoolBuilder {
    router: Arc<dyn Router>,
    allow_concurrency: bool,
    cache_classes: bool,
    lock: Option<Arc<Mutex<()>>>,
    view_paths: Option<Arc<dyn ViewPaths>>,
    persistence: Option<Arc<dyn Persistence>>,
    dependencies: Option<Arc<dyn DependencyCache>>,
    logger: Option<Arc<dyn FlushLog>>,
    localization: Option<Arc<dyn Localization>>,
    application_controller: Option<ControllerFactory>,
    error_file_path: Option<PathBuf>,
    diagnostics: Option<Arc<dyn RawErrorSink>>,
}

impl DispatcherPoolBuilder {
    fn new(router: Arc<dyn Router>) -> Self {
        let defaults = DispatcherSection::default();
        Self {
            router,
            allow_concurrency: defaults.allow_concurrency,
            cache_classes: defaults.cache_classes,
            lock: None,
            view_paths: None,
            persistence: None,
            dependencies: None,
            logger: None,
            localization: None,
            application_controller: None,
            error_file_path: defaults.error_file_path,
            diagnostics: None,
        }
    }

    /// Take concurrency, reload mode and the error page directory from a config section.
    #[must_use]
    pub fn config(mut self, section: &DispatcherSection) -> Self {
        self.allow_concurrency = section.allow_concurrency;
        self.cache_classes = section.cache_classes;
        self.error_file_path.clone_from(&section.error_file_path);
        self
    }

    #[must_use]
    pub fn allow_concurrency(mut self, allow: bool) -> Self {
        self.allow_concurrency = allow;
        self
    }

    #[must_use]
    pub fn cache_classes(mut self, cache: bool) -> Self {
        self.cache_classes = cache;
        self
    }

    /// Serialize against another pool by sharing its lock.
    #[must_use]
    pub fn lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub fn view_paths(mut self, view_paths: Arc<dyn ViewPaths>) -> Self {
        self.view_paths = Some(view_paths);
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub fn dependencies(mut self, dependencies: Arc<dyn DependencyCache>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    #[must_use]
    pub fn flushable_logger(mut self, logger: Arc<dyn FlushLog>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn localization(mut self, localization: Arc<dyn Localization>) -> Self {
        self.localization = Some(localization);
        self
    }

    #[must_use]
    pub fn application_controller<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Controller>> + Send + Sync + 'static,
    {
        self.application_controller = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn error_file_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_file_path = Some(dir.into());
        self
    }

    /// Raw diagnostic channel for the failsafe responder.
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Arc<dyn RawErrorSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Build the pool and install the built-in lifecycle callbacks.
    #[must_use]
    pub fn build(self) -> Arc<DispatcherPool> {
        let mut failsafe = FailsafeResponder::new(self.error_file_path);
        if let Some(diagnostics) = self.diagnostics {
            failsafe = failsafe.with_diagnostics(diagnostics);
        }
        let pool = DispatcherPool {
            allow_concurrency: self.allow_concurrency,
            cache_classes: self.cache_classes,
            lock: self.lock.unwrap_or_default(),
            callbacks: RwLock::new(CallbackRegistry::new()),
            prepared: OnceCell::new(),
            router: self.router,
            view_paths: self.view_paths,
            persistence: self.persistence,
            dependencies: self.dependencies,
            logger: self.logger,
            localization: self.localization,
            application_controller_factory: self.application_controller,
            application_controller: RwLock::new(None),
            failsafe,
        };
        lifecycle::define_dispatcher_callbacks(&pool);
        info!(
            allow_concurrency = pool.allow_concurrency,
            cache_classes = pool.cache_classes,
            prepare = pool.chain(Phase::PrepareDispatch).len(),
            before = pool.chain(Phase::BeforeDispatch).len(),
            after = pool.chain(Phase::AfterDispatch).len(),
            "Dispatcher pool ready"
        );
        Arc::new(pool)
    }
}
