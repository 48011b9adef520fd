//! Event manager behavior: ordering, propagation, interceptors, cycle
//! detection, reports.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use runner::prelude::*;
use serde_json::{json, Value};

fn options() -> RunOptions {
    RunOptions { platform: Some(Arc::new(runner::platform::TestPlatform::new())), ..RunOptions::default() }
}

#[tokio::test]
async fn hooks_fire_in_order_then_registration_order() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let e = event("app.ping").sequential().build();

    let mk = |id: &str, label: &'static str, position: i32, log: Arc<Mutex<Vec<&'static str>>>| {
        hook(id)
            .on_id("app.ping")
            .order(position)
            .run(move |_emission, _deps| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(label);
                    Ok(())
                }
            })
            .build()
    };

    let app = resource("app")
        .register([
            e.into(),
            mk("h.late", "late", 10, Arc::clone(&order)).into(),
            mk("h.early", "early", -10, Arc::clone(&order)).into(),
            mk("h.tie_a", "tie_a", 0, Arc::clone(&order)).into(),
            mk("h.tie_b", "tie_b", 0, Arc::clone(&order)).into(),
        ])
        .build();

    let runtime = run(app, options()).await.unwrap();
    runtime.emit_event("app.ping", json!({}), EmitOptions::default()).await.unwrap();
    assert_eq!(*order.lock(), vec!["early", "tie_a", "tie_b", "late"]);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn stop_propagation_halts_sequential_dispatch() {
    let spy_calls = Arc::new(AtomicUsize::new(0));
    let spy_clone = Arc::clone(&spy_calls);

    let e = event("app.ordered").sequential().build();
    let stopper = hook("h.stopper")
        .on_id("app.ordered")
        .order(0)
        .run(|emission, _deps| async move {
            emission.stop_propagation();
            Ok(())
        })
        .build();
    let spy = hook("h.spy")
        .on_id("app.ordered")
        .order(1)
        .run(move |_emission, _deps| {
            let spy = Arc::clone(&spy_clone);
            async move {
                spy.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();
    let app = resource("app").register([e.into(), stopper.into(), spy.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let report = runtime
        .emit_event("app.ordered", json!({}), EmitOptions { report: true, ..EmitOptions::default() })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(spy_calls.load(Ordering::SeqCst), 0, "spy must not run after stop_propagation");
    assert!(report.stopped);
    assert_eq!(report.listener_ids, vec!["h.stopper".into()]);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn interceptor_swapping_the_emission_is_a_validation_error() {
    let e = event("app.tampered").build();
    let bait = event("app.bait").build();
    let app = resource("app").register([e.into(), bait.into()]).build();
    let runtime = run(app, options()).await.unwrap();

    // Capture a legitimate emission, then replay it for a different
    // event: the foreign propagation-control token must be rejected.
    let captured: Arc<Mutex<Option<runner::Emission>>> = Arc::new(Mutex::new(None));
    let captured_clone = Arc::clone(&captured);
    runtime.event_manager().intercept_emissions(Arc::new(move |next, emission| {
        if emission.event_id.as_str() == "app.bait" {
            *captured_clone.lock() = Some(emission.clone());
            next(emission)
        } else if let Some(bait) = captured_clone.lock().clone() {
            next(bait)
        } else {
            next(emission)
        }
    }));

    runtime.emit_event("app.bait", json!({}), EmitOptions::default()).await.unwrap();
    let err = runtime
        .emit_event("app.tampered", json!({}), EmitOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(
        err.to_string().contains("Interceptors cannot override stopPropagation"),
        "got: {err}"
    );
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn parallel_listeners_all_settle_despite_failures() {
    let reached = Arc::new(AtomicUsize::new(0));
    let reached_clone = Arc::clone(&reached);

    let e = event("app.parallel").build();
    let failing = hook("h.fail")
        .on_id("app.parallel")
        .order(0)
        .run(|_, _| async { Err(RunnerError::task("listener down")) })
        .build();
    let healthy = hook("h.ok")
        .on_id("app.parallel")
        .order(1)
        .run(move |_, _| {
            let reached = Arc::clone(&reached_clone);
            async move {
                reached.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();
    let app = resource("app").register([e.into(), failing.into(), healthy.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let report = runtime
        .emit_event("app.parallel", json!({}), EmitOptions { report: true, ..EmitOptions::default() })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reached.load(Ordering::SeqCst), 1, "healthy peer still ran");
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].listener_id, "h.fail".into());

    // Without a report the first failure propagates to the emitter.
    let err = runtime
        .emit_event("app.parallel", json!({}), EmitOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "listener down");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn star_hooks_receive_every_event() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let a = event("app.a").build();
    let b = event("app.b").build();
    let audit = hook("h.audit")
        .on_any()
        .run(move |emission, _deps| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().push(emission.event_id.to_string());
                Ok(())
            }
        })
        .build();
    let app = resource("app").register([a.into(), b.into(), audit.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    seen.lock().clear(); // drop boot-time lifecycle emissions
    runtime.emit_event("app.a", json!({}), EmitOptions::default()).await.unwrap();
    runtime.emit_event("app.b", json!({}), EmitOptions::default()).await.unwrap();

    let events = seen.lock().clone();
    assert!(events.contains(&"app.a".to_string()));
    assert!(events.contains(&"app.b".to_string()));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn payload_schema_rejects_bad_emissions() {
    let e = event("app.typed")
        .payload_schema(
            Schema::json(json!({
                "type": "object",
                "properties": {"n": {"type": "integer"}},
                "required": ["n"]
            }))
            .unwrap(),
        )
        .build();
    let app = resource("app").register([e.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    runtime.emit_event("app.typed", json!({"n": 1}), EmitOptions::default()).await.unwrap();

    let err = runtime
        .emit_event("app.typed", json!({"n": "one"}), EmitOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("Event payload validation failed for app.typed"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn dry_run_rejects_static_event_cycles() {
    let a = event("evt.a").build();
    let b = event("evt.b").build();
    let h1 = hook("h.one")
        .on_id("evt.a")
        .dependencies([DependencyRef::event("evt.b")])
        .run(|_, _| async { Ok(()) })
        .build();
    let h2 = hook("h.two")
        .on_id("evt.b")
        .dependencies([DependencyRef::event("evt.a")])
        .run(|_, _| async { Ok(()) })
        .build();
    let app = resource("app").register([a.into(), b.into(), h1.into(), h2.into()]).build();

    let err = run(app, RunOptions { dry_run: true, ..options() }).await.unwrap_err();
    assert!(err.is_event_emission_cycle());
    let text = err.to_string().to_lowercase();
    assert!(text.contains("event emission cycles"), "got: {text}");
}

#[tokio::test]
async fn runtime_cycle_detection_catches_reemission() {
    let ping = event("app.ping").build();
    // The hook on ping emits ping again through its declared emitter.
    let echo = hook("h.echo")
        .on_id("app.ping")
        .dependencies([DependencyRef::event("app.ping")])
        .run(|_, deps| async move { deps.emit("app.ping", json!({})).await })
        .build();
    let app = resource("app").register([ping.into(), echo.into()]).build();

    let runtime = run(
        app,
        RunOptions { runtime_event_cycle_detection: true, ..options() },
    )
    .await
    .unwrap();

    let err = runtime
        .emit_event("app.ping", json!({}), EmitOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_event_emission_cycle(), "got: {err}");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn emission_meta_is_a_snapshot() {
    let seen_meta: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen_meta);

    let e = event("app.metadata").meta(json!({"version": 1})).build();
    let h = hook("h.reader")
        .on_id("app.metadata")
        .run(move |mut emission, _deps| {
            let seen = Arc::clone(&seen_clone);
            async move {
                // Record what arrived, then mutate the local copy; the
                // mutation must not leak into later emissions.
                seen.lock().push(emission.meta["version"].clone());
                emission.meta["version"] = json!(99);
                Ok(())
            }
        })
        .build();
    let app = resource("app").register([e.into(), h.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    runtime.emit_event("app.metadata", json!({}), EmitOptions::default()).await.unwrap();
    runtime.emit_event("app.metadata", json!({}), EmitOptions::default()).await.unwrap();

    assert_eq!(seen_meta.lock().clone(), vec![json!(1), json!(1)]);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn unknown_event_is_event_not_found() {
    let app = resource("app").build();
    let runtime = run(app, options()).await.unwrap();
    let err = runtime.emit_event("ghost.event", json!({}), EmitOptions::default()).await.unwrap_err();
    assert!(matches!(err, RunnerError::EventNotFound { .. }));
    runtime.dispose().await.unwrap();
}
