use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::pool::{CallbackScope, DispatcherPool};
use crate::callbacks::{Direction, Phase};
use crate::collaborators::Controller;
use crate::error::DispatchError;
use crate::failsafe::INTERNAL_SERVER_ERROR;
use crate::server::{Request, Response};

/// Where a dispatch currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    RunningBefore,
    RunningAction,
    RunningAfter,
    Done,
}

/// Per-request state. Built with the dispatcher, dropped with it.
pub struct DispatchContext<W> {
    pub output: W,
    pub request: Option<Request>,
    pub response: Option<Response>,
    /// Set once routing resolves a controller.
    pub controller: Option<Arc<dyn Controller>>,
    pub test_request: bool,
    state: DispatchState,
}

/// Runs one request through the callback phases, routing and the controller.
///
/// Nothing raised inside [`dispatch`](Self::dispatch) reaches the caller: faults
/// are handed to the pool's failsafe responder and the after-dispatch phase
/// runs on every exit path.
pub struct Dispatcher<W: Write> {
    pool: Arc<DispatcherPool>,
    ctx: DispatchContext<W>,
}

/// Runs the after-dispatch chain when dropped, whichever way the dispatch ended.
struct AfterDispatch {
    pool: Arc<DispatcherPool>,
    scope: CallbackScope,
}

impl Drop for AfterDispatch {
    fn drop(&mut self) {
        let failures = self
            .pool
            .chain(Phase::AfterDispatch)
            .run_all(Direction::Reverse, &self.scope);
        if !failures.is_empty() {
            warn!(
                request_id = ?self.scope.request_id(),
                failures = failures.len(),
                "After-dispatch callbacks failed"
            );
        }
    }
}

impl<W: Write> Dispatcher<W> {
    pub fn new(
        pool: Arc<DispatcherPool>,
        output: W,
        request: Option<Request>,
        response: Option<Response>,
    ) -> Self {
        Self {
            pool,
            ctx: DispatchContext {
                output,
                request,
                response,
                controller: None,
                test_request: false,
                state: DispatchState::Idle,
            },
        }
    }

    /// Flag this dispatch as part of an enclosing test transaction.
    ///
    /// `checkin_connections` then leaves the request's connections checked out.
    pub fn mark_as_test_request(&mut self) -> &mut Self {
        self.ctx.test_request = true;
        self
    }

    #[must_use]
    pub fn is_test_request(&self) -> bool {
        self.ctx.test_request
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.ctx.state
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<DispatcherPool> {
        &self.pool
    }

    #[must_use]
    pub fn context(&self) -> &DispatchContext<W> {
        &self.ctx
    }

    #[must_use]
    pub fn output(&self) -> &W {
        &self.ctx.output
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.ctx.response.as_ref()
    }

    #[must_use]
    pub fn controller(&self) -> Option<&Arc<dyn Controller>> {
        self.ctx.controller.as_ref()
    }

    /// Give back the output sink and the response.
    pub fn into_parts(self) -> (W, Option<Response>) {
        (self.ctx.output, self.ctx.response)
    }

    /// Dispatch the request, serialized behind the pool lock unless concurrency is allowed.
    pub fn dispatch(&mut self) {
        if self.pool.allow_concurrency() {
            self.dispatch_unlocked();
        } else {
            let lock = Arc::clone(self.pool.lock());
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.dispatch_unlocked();
        }
    }

    /// Dispatch without taking the pool lock.
    pub fn dispatch_unlocked(&mut self) {
        let started = Instant::now();
        let request_id = self.ctx.request.as_ref().map(|r| r.request_id);
        let scope = CallbackScope::new(Arc::clone(&self.pool), self.ctx.test_request, request_id);
        let after = AfterDispatch {
            pool: Arc::clone(&self.pool),
            scope: scope.clone(),
        };

        self.ctx.state = DispatchState::RunningBefore;
        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<(), DispatchError> {
            self.pool.ensure_prepared(&scope)?;
            self.pool.run_callbacks(Phase::BeforeDispatch, &scope)?;
            self.ctx.state = DispatchState::RunningAction;
            self.handle_request()
        }))
        .unwrap_or_else(|payload| Err(DispatchError::from_panic("dispatch", payload)));

        if let Err(e) = outcome {
            self.failsafe_rescue(e);
        }

        self.ctx.state = DispatchState::RunningAfter;
        drop(after);
        self.ctx.state = DispatchState::Done;

        debug!(
            request_id = ?request_id,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Dispatch finished"
        );
    }

    /// Resolve the controller, run it and stream its response.
    fn handle_request(&mut self) -> Result<(), DispatchError> {
        let ctx = &mut self.ctx;
        let request = ctx
            .request
            .as_ref()
            .ok_or_else(|| DispatchError::MalformedRequest("no request to dispatch".to_string()))?;

        let controller = self.pool.router().recognize(request)?;
        ctx.controller = Some(Arc::clone(&controller));

        let response = ctx.response.get_or_insert_with(Response::default);
        controller
            .process(request, response)
            .map_err(DispatchError::Application)?;
        response.attach_request(request.summary());
        response.out(&mut ctx.output)?;

        info!(
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path,
            controller = %controller.name(),
            status = response.status().as_u16(),
            "Request dispatched"
        );
        Ok(())
    }

    /// Hand a fault to the failsafe responder with `500 Internal Server Error`.
    ///
    /// The primary action re-runs the controller's exception handler, falling
    /// back to the pool's application controller when routing never got that
    /// far, and re-raises when there is neither.
    fn failsafe_rescue(&mut self, fault: DispatchError) {
        error!(
            request_id = ?self.ctx.request.as_ref().map(|r| r.request_id),
            error = %fault,
            "Dispatch failed, rescuing"
        );
        if self.ctx.controller.is_none() {
            self.ctx.controller = self.pool.application_controller();
        }
        let controller = self.ctx.controller.clone();

        let failsafe = self.pool.failsafe();
        let ctx = &mut self.ctx;
        failsafe.respond(
            &mut ctx.output,
            INTERNAL_SERVER_ERROR,
            Some(&fault),
            ctx.request.as_ref(),
            ctx.response.as_mut(),
            |output, request, response| {
                let (Some(controller), Some(request), Some(response)) = (controller, request, response)
                else {
                    return Err(anyhow::anyhow!("{fault}"));
                };
                controller.process_with_exception(request, response, &fault)?;
                response.attach_request(request.summary());
                response.out(output)?;
                Ok(())
            },
        );
    }
}
