//! Tests for the dispatcher lifecycle
//!
//! # Test Coverage
//!
//! - Callback ordering in cached and reload mode
//! - After-dispatch callbacks on every exit path (success, callback failure, panic)
//! - Connection check-in skipped for test requests
//! - One-time preparation in cached mode, retried after a failure
//! - Rescue through the controller, the application controller, or the failsafe page
//! - Serialization behind the pool lock

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use common::*;
use http::{Method, StatusCode};
use railyard::callbacks::{Phase, Registration};
use railyard::collaborators::Controller;
use railyard::dispatcher::{DispatchState, DispatcherPool, DispatcherPoolBuilder};
use railyard::failsafe::{CapturedSink, RawErrorSink};
use railyard::server::{OutputMode, Request, Response};

fn builder(log: &EventLog, controller: Option<Arc<dyn Controller>>) -> DispatcherPoolBuilder {
    DispatcherPool::builder(Arc::new(RecordingRouter {
        log: log.clone(),
        controller,
    }))
}

fn ok_controller(log: &EventLog) -> Option<Arc<dyn Controller>> {
    Some(Arc::new(OkController {
        log: log.clone(),
        body: "hello",
    }))
}

fn run(pool: &Arc<DispatcherPool>, path: &str) -> String {
    let mut dispatcher = pool.dispatcher(
        Vec::new(),
        Some(Request::new(Method::GET, path)),
        Some(Response::new(OutputMode::Gateway)),
    );
    dispatcher.dispatch();
    assert_eq!(dispatcher.state(), DispatchState::Done);
    String::from_utf8(dispatcher.into_parts().0).unwrap()
}

#[test]
fn test_cached_mode_prepares_once_and_runs_after_in_reverse() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .flushable_logger(Arc::new(RecordingLogger { log: log.clone() }))
        .build();

    let out = run(&pool, "/hello");
    assert!(out.starts_with("Status: 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\nhello"));
    assert_eq!(
        log.events(),
        vec![
            "instantiate_observers",
            "recognize",
            "process",
            "logger.flush",
            "clear_active_connections",
        ]
    );

    log.clear();
    run(&pool, "/hello");
    assert_eq!(
        log.events(),
        vec!["recognize", "process", "logger.flush", "clear_active_connections"]
    );
}

#[test]
fn test_reload_mode_prepares_and_cleans_up_every_request() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .cache_classes(false)
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .dependencies(Arc::new(RecordingDependencies { log: log.clone() }))
        .view_paths(Arc::new(RecordingViewPaths { log: log.clone() }))
        .localization(Arc::new(RecordingLocalization { log: log.clone() }))
        .build();

    let expected = vec![
        "instantiate_observers",
        "i18n.reload",
        "router.reload",
        "views.reload",
        "recognize",
        "process",
        "clear_active_connections",
        "reset_subclasses",
        "dependencies.clear",
        "clear_reloadable_connections",
    ];
    for _ in 0..2 {
        log.clear();
        run(&pool, "/hello");
        assert_eq!(log.events(), expected);
    }
}

#[test]
fn test_builtin_callback_identifiers() {
    let log = EventLog::new();
    let pool = builder(&log, None)
        .cache_classes(false)
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .localization(Arc::new(RecordingLocalization { log: log.clone() }))
        .build();

    assert_eq!(
        pool.callback_identifiers(Phase::PrepareDispatch),
        vec![
            Some("load_application_controller".to_string()),
            Some("instantiate_observers".to_string()),
            None,
        ]
    );
    assert_eq!(
        pool.callback_identifiers(Phase::BeforeDispatch),
        vec![Some("reload_application".to_string())]
    );
    assert_eq!(
        pool.callback_identifiers(Phase::AfterDispatch),
        vec![
            Some("cleanup_application".to_string()),
            Some("checkin_connections".to_string()),
        ]
    );
}

#[test]
fn test_cached_mode_has_no_reload_callbacks() {
    let log = EventLog::new();
    let pool = builder(&log, None).build();
    assert!(pool.callback_identifiers(Phase::BeforeDispatch).is_empty());
    assert!(pool.callback_identifiers(Phase::AfterDispatch).is_empty());
    assert_eq!(
        pool.callback_identifiers(Phase::PrepareDispatch),
        vec![Some("load_application_controller".to_string())]
    );
}

#[test]
fn test_reregistering_replaces_in_place() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .build();

    let replaced_log = log.clone();
    let registration = pool.to_prepare(Some("load_application_controller"), move |_| {
        replaced_log.push("custom_prepare");
        Ok(())
    });
    assert_eq!(registration, Registration::Replaced);
    assert_eq!(
        pool.callback_identifiers(Phase::PrepareDispatch),
        vec![
            Some("load_application_controller".to_string()),
            Some("instantiate_observers".to_string()),
        ]
    );

    run(&pool, "/");
    assert_eq!(&log.events()[..2], ["custom_prepare", "instantiate_observers"]);
}

#[test]
fn test_test_request_keeps_connections_checked_out() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .build();

    let mut dispatcher = pool.dispatcher(Vec::new(), Some(Request::new(Method::GET, "/")), None);
    dispatcher.mark_as_test_request().dispatch();
    assert!(dispatcher.is_test_request());
    assert_eq!(log.count("clear_active_connections"), 0);

    run(&pool, "/");
    assert_eq!(log.count("clear_active_connections"), 1);
}

#[test]
fn test_before_failure_still_runs_after_callbacks() {
    let log = EventLog::new();
    let sink = Arc::new(CapturedSink::new());
    let pool = builder(&log, ok_controller(&log))
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .diagnostics(Arc::clone(&sink) as Arc<dyn RawErrorSink>)
        .build();
    pool.before_dispatch(Some("authenticate"), |_| Err(anyhow!("not allowed")));

    let out = run(&pool, "/");
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(out.ends_with("<html><body><h1>500 Internal Server Error</h1></body></html>"));
    assert_eq!(log.count("process"), 0);
    assert_eq!(log.count("clear_active_connections"), 1);
}

#[test]
fn test_after_failure_does_not_stop_other_after_callbacks() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
        .build();
    pool.after_dispatch(Some("audit"), |_| Err(anyhow!("audit store down")));

    let out = run(&pool, "/");
    assert!(out.starts_with("Status: 200 OK\r\n"));
    assert_eq!(log.count("clear_active_connections"), 1);
}

#[test]
fn test_controller_rescues_its_own_failure() {
    let log = EventLog::new();
    let controller: Arc<dyn Controller> = Arc::new(FailingController {
        log: log.clone(),
        rescue: true,
    });
    let pool = builder(&log, Some(controller)).build();

    let out = run(&pool, "/orders");
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(out.ends_with("rescued: boom"));
    assert_eq!(log.count("process_with_exception"), 1);
}

#[test]
fn test_failed_rescue_serves_error_page() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("500.html"), "<h1>We're sorry</h1>").unwrap();
    let log = EventLog::new();
    let sink = Arc::new(CapturedSink::new());
    let controller: Arc<dyn Controller> = Arc::new(FailingController {
        log: log.clone(),
        rescue: false,
    });
    let pool = builder(&log, Some(controller))
        .error_file_path(dir.path())
        .diagnostics(Arc::clone(&sink) as Arc<dyn RawErrorSink>)
        .build();

    let out = run(&pool, "/orders");
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(out.contains("Content-Type: text/html\r\n"));
    assert!(out.ends_with("<h1>We're sorry</h1>"));
    assert!(!sink.contents().contains("Error during failsafe response"));
}

#[test]
fn test_routing_failure_falls_back_to_application_controller() {
    let log = EventLog::new();
    let rescue_log = log.clone();
    let pool = builder(&log, None)
        .application_controller(move || {
            Ok(Arc::new(FailingController {
                log: rescue_log.clone(),
                rescue: true,
            }) as Arc<dyn Controller>)
        })
        .build();

    let out = run(&pool, "/missing");
    assert!(out.ends_with("rescued: No route matches [GET] \"/missing\""));
    assert_eq!(log.count("process_with_exception"), 1);
    assert_eq!(log.count("process"), 0);
}

#[test]
fn test_panicking_controller_is_contained() {
    let log = EventLog::new();
    let controller: Arc<dyn Controller> = Arc::new(PanickingController);
    let pool = builder(&log, Some(controller))
        .flushable_logger(Arc::new(RecordingLogger { log: log.clone() }))
        .diagnostics(Arc::new(CapturedSink::new()))
        .build();

    let out = run(&pool, "/");
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert_eq!(log.count("logger.flush"), 1);
}

#[test]
fn test_missing_request_and_response_still_answer() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .diagnostics(Arc::new(CapturedSink::new()))
        .build();
    let mut dispatcher = pool.dispatcher(Vec::new(), None, None);
    dispatcher.dispatch();
    let out = String::from_utf8(dispatcher.into_parts().0).unwrap();
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert_eq!(log.count("recognize"), 0);
}

#[test]
fn test_cached_preparation_is_retried_after_failure() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log))
        .diagnostics(Arc::new(CapturedSink::new()))
        .build();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    pool.to_prepare(Some("warm_cache"), move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("cache server not up yet"))
        } else {
            Ok(())
        }
    });

    assert!(run(&pool, "/").starts_with("Status: 500 Internal Server Error\r\n"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(log.count("process"), 0);

    assert!(run(&pool, "/").starts_with("Status: 200 OK\r\n"));
    assert!(run(&pool, "/").starts_with("Status: 200 OK\r\n"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(log.count("process"), 2);
}

#[test]
fn test_response_is_available_after_dispatch() {
    let log = EventLog::new();
    let pool = builder(&log, ok_controller(&log)).build();
    let mut dispatcher = pool.dispatcher(
        Vec::new(),
        Some(Request::new(Method::GET, "/greeting")),
        Some(Response::new(OutputMode::BodyOnly)),
    );
    dispatcher.dispatch();
    assert_eq!(dispatcher.controller().map(|c| c.name()), Some("ok"));
    let response = dispatcher.response().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.request().map(|r| r.path.as_str()), Some("/greeting"));
    assert_eq!(dispatcher.output().as_slice(), b"hello");
}

/// Tracks how many `process` calls overlap.
struct SlowController {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Controller for SlowController {
    fn process(&self, _request: &Request, response: &mut Response) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response.render(StatusCode::OK, "text/plain", "done");
        Ok(())
    }
}

fn hammer(pools: &[Arc<DispatcherPool>]) {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pool = Arc::clone(&pools[i % pools.len()]);
            thread::spawn(move || {
                let mut d = pool.dispatcher(Vec::new(), Some(Request::new(Method::GET, "/")), None);
                d.dispatch();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_dispatches_are_serialized_without_concurrency() {
    let log = EventLog::new();
    let slow = Arc::new(SlowController {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let pool = builder(&log, Some(Arc::clone(&slow) as Arc<dyn Controller>)).build();
    hammer(&[pool]);
    assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pools_sharing_a_lock_serialize_together() {
    let log = EventLog::new();
    let slow = Arc::new(SlowController {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let lock = Arc::new(Mutex::new(()));
    let first = builder(&log, Some(Arc::clone(&slow) as Arc<dyn Controller>))
        .lock(Arc::clone(&lock))
        .build();
    let second = builder(&log, Some(Arc::clone(&slow) as Arc<dyn Controller>))
        .lock(lock)
        .build();
    hammer(&[first, second]);
    assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
}
