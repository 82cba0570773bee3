#![allow(dead_code)]

//! Recording collaborators shared by the integration tests.
//!
//! Every mock pushes a short event name onto a shared [`EventLog`], so a test
//! can assert on the exact order in which the dispatcher touched them.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, FixedOffset};
use http::StatusCode;
use serde_json::Value;

use railyard::collaborators::{
    Controller, DependencyCache, FlushLog, Persistence, Router, ViewPaths,
};
use railyard::error::{DispatchError, RoutingError};
use railyard::i18n::{I18nError, Localization, MissingTranslation, TranslateOptions};
use railyard::server::{Request, Response};

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Renders `200 OK` with a fixed body.
pub struct OkController {
    pub log: EventLog,
    pub body: &'static str,
}

impl Controller for OkController {
    fn name(&self) -> &str {
        "ok"
    }

    fn process(&self, _request: &Request, response: &mut Response) -> anyhow::Result<()> {
        self.log.push("process");
        response.render(StatusCode::OK, "text/plain", self.body);
        Ok(())
    }
}

/// Fails in `process`; rescues itself only when `rescue` is set.
pub struct FailingController {
    pub log: EventLog,
    pub rescue: bool,
}

impl Controller for FailingController {
    fn name(&self) -> &str {
        "failing"
    }

    fn process(&self, _request: &Request, _response: &mut Response) -> anyhow::Result<()> {
        self.log.push("process");
        Err(anyhow!("boom"))
    }

    fn process_with_exception(
        &self,
        _request: &Request,
        response: &mut Response,
        error: &DispatchError,
    ) -> anyhow::Result<()> {
        self.log.push("process_with_exception");
        if !self.rescue {
            return Err(anyhow!("rescue failed too: {error}"));
        }
        response.render(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("rescued: {error}"),
        );
        Ok(())
    }
}

pub struct PanickingController;

impl Controller for PanickingController {
    fn process(&self, _request: &Request, _response: &mut Response) -> anyhow::Result<()> {
        panic!("controller exploded");
    }
}

/// Routes everything to one controller, or nothing when `controller` is `None`.
pub struct RecordingRouter {
    pub log: EventLog,
    pub controller: Option<Arc<dyn Controller>>,
}

impl Router for RecordingRouter {
    fn recognize(&self, request: &Request) -> Result<Arc<dyn Controller>, RoutingError> {
        self.log.push("recognize");
        self.controller.clone().ok_or_else(|| RoutingError::NotFound {
            method: request.method.clone(),
            path: request.path.clone(),
        })
    }

    fn reload(&self) -> anyhow::Result<()> {
        self.log.push("router.reload");
        Ok(())
    }
}

pub struct RecordingViewPaths {
    pub log: EventLog,
}

impl ViewPaths for RecordingViewPaths {
    fn reload(&self) -> anyhow::Result<()> {
        self.log.push("views.reload");
        Ok(())
    }
}

pub struct RecordingPersistence {
    pub log: EventLog,
}

impl Persistence for RecordingPersistence {
    fn clear_active_connections(&self) -> anyhow::Result<()> {
        self.log.push("clear_active_connections");
        Ok(())
    }

    fn clear_reloadable_connections(&self) -> anyhow::Result<()> {
        self.log.push("clear_reloadable_connections");
        Ok(())
    }

    fn reset_subclasses(&self) -> anyhow::Result<()> {
        self.log.push("reset_subclasses");
        Ok(())
    }

    fn instantiate_observers(&self) -> anyhow::Result<()> {
        self.log.push("instantiate_observers");
        Ok(())
    }
}

pub struct RecordingDependencies {
    pub log: EventLog,
}

impl DependencyCache for RecordingDependencies {
    fn clear(&self) -> anyhow::Result<()> {
        self.log.push("dependencies.clear");
        Ok(())
    }
}

pub struct RecordingLogger {
    pub log: EventLog,
}

impl FlushLog for RecordingLogger {
    fn flush(&self) -> std::io::Result<()> {
        self.log.push("logger.flush");
        Ok(())
    }
}

/// Knows no translations; only records reloads.
pub struct RecordingLocalization {
    pub log: EventLog,
}

impl Localization for RecordingLocalization {
    fn reload(&self) -> anyhow::Result<()> {
        self.log.push("i18n.reload");
        Ok(())
    }

    fn default_locale(&self) -> String {
        "en".to_string()
    }

    fn translate(&self, key: &str, options: &TranslateOptions) -> Result<Value, MissingTranslation> {
        Err(MissingTranslation {
            locale: options.locale.clone().unwrap_or_else(|| "en".to_string()),
            key: key.to_string(),
            scope: options.scope.clone(),
        })
    }

    fn localize(
        &self,
        _time: &DateTime<FixedOffset>,
        _locale: Option<&str>,
        _format: Option<&str>,
    ) -> Result<String, I18nError> {
        Err(I18nError::InvalidFormat("not supported".to_string()))
    }
}
