//! Middleware composition and the built-in middleware suite.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use runner::prelude::*;
use serde_json::{json, Value};

fn options() -> RunOptions {
    RunOptions { platform: Some(Arc::new(runner::platform::TestPlatform::new())), ..RunOptions::default() }
}

#[tokio::test]
async fn middleware_composes_as_an_onion() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mk = |id: &str, label: &'static str, trace: Arc<Mutex<Vec<&'static str>>>| {
        task_middleware(id)
            .run(move |call, _deps, _config| {
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().push(label);
                    let out = call.next(call.input.clone()).await;
                    trace.lock().push(label);
                    out
                }
            })
            .build()
    };

    let outer = mk("mw.outer", "outer", Arc::clone(&trace));
    let inner = mk("mw.inner", "inner", Arc::clone(&trace));
    let trace_task = Arc::clone(&trace);
    let t = task("t")
        .middleware([(&outer).into(), (&inner).into()])
        .run(move |_, _| {
            let trace = Arc::clone(&trace_task);
            async move {
                trace.lock().push("body");
                Ok(Value::Null)
            }
        })
        .build();

    let app = resource("app")
        .register([outer.into(), inner.into(), t.into()])
        .build();

    let runtime = run(app, options()).await.unwrap();
    runtime.run_task("t", Value::Null).await.unwrap();
    assert_eq!(*trace.lock(), vec!["outer", "inner", "body", "inner", "outer"]);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn global_middleware_wraps_outside_attached() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let trace_global = Arc::clone(&trace);
    let global = task_middleware("mw.global")
        .everywhere_when(|t| t.id.as_str() == "t")
        .run(move |call, _deps, _config| {
            let trace = Arc::clone(&trace_global);
            async move {
                trace.lock().push("global");
                call.next(call.input.clone()).await
            }
        })
        .build();
    let trace_attached = Arc::clone(&trace);
    let attached = task_middleware("mw.attached")
        .run(move |call, _deps, _config| {
            let trace = Arc::clone(&trace_attached);
            async move {
                trace.lock().push("attached");
                call.next(call.input.clone()).await
            }
        })
        .build();
    let t = task("t")
        .middleware([(&attached).into()])
        .run(|_, _| async { Ok(Value::Null) })
        .build();

    let app = resource("app")
        .register([global.into(), attached.into(), t.into()])
        .build();

    let runtime = run(app, options()).await.unwrap();
    runtime.run_task("t", Value::Null).await.unwrap();
    assert_eq!(*trace.lock(), vec!["global", "attached"]);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn retry_middleware_retries_transient_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);

    let flaky = task("t.flaky")
        .middleware([runner::builtins::retry(json!({"attempts": 3, "delay_ms": 1}))])
        .run(move |_, _| {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RunnerError::task("transient"))
                } else {
                    Ok(json!("recovered"))
                }
            }
        })
        .build();
    let app = resource("app").register([flaky.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("t.flaky", Value::Null).await.unwrap();
    assert_eq!(out, json!("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn timeout_middleware_enforces_its_deadline() {
    let slow = task("t.slow")
        .middleware([runner::builtins::timeout(json!({"ms": 20}))])
        .run(|_, _| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        })
        .build();
    let app = resource("app").register([slow.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let err = runtime.run_task("t.slow", Value::Null).await.unwrap_err();
    assert!(err.is_timeout());
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn fallback_runs_on_failure() {
    let rescue = fallback("mw.rescue", |error: RunnerError, input: Value| async move {
        Ok(json!({"rescued": true, "from": error.to_string(), "input": input}))
    });
    let doomed = task("t.doomed")
        .middleware([(&rescue).into()])
        .run(|_, _| async { Err(RunnerError::task("primary down")) })
        .build();
    let app = resource("app").register([rescue.into(), doomed.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("t.doomed", json!({"k": 1})).await.unwrap();
    assert_eq!(out["rescued"], true);
    assert_eq!(out["from"], "primary down");
    assert_eq!(out["input"]["k"], 1);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn circuit_breaker_opens_after_threshold() {
    let t = task("t.breaking")
        .middleware([runner::builtins::circuit_breaker(json!({"threshold": 2, "cooldown_ms": 60_000, "half_open_probes": 1}))])
        .run(|_, _| async { Err(RunnerError::task("backend down")) })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    for _ in 0..2 {
        let err = runtime.run_task("t.breaking", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "backend down");
    }
    let err = runtime.run_task("t.breaking", Value::Null).await.unwrap_err();
    assert!(err.is_circuit_breaker_open(), "got: {err}");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn rate_limit_rejects_when_the_bucket_empties() {
    let t = task("t.limited")
        .middleware([runner::builtins::rate_limit(json!({"capacity": 2, "refill_per_sec": 0.001}))])
        .run(|_, _| async { Ok(Value::Null) })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    runtime.run_task("t.limited", Value::Null).await.unwrap();
    runtime.run_task("t.limited", Value::Null).await.unwrap();
    let err = runtime.run_task("t.limited", Value::Null).await.unwrap_err();
    assert!(err.is_rate_limit_exceeded());
    assert!(err.retry_after().is_some());
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn cache_middleware_reuses_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);

    let t = task("t.cached")
        .middleware([runner::builtins::cache(json!({"max_capacity": 16}))])
        .run(move |input, _| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"echo": input}))
            }
        })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let a = runtime.run_task("t.cached", json!({"q": 1})).await.unwrap();
    let b = runtime.run_task("t.cached", json!({"q": 1})).await.unwrap();
    let c = runtime.run_task("t.cached", json!({"q": 2})).await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "same input must hit the cache");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn concurrency_middleware_bounds_parallelism() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let active_clone = Arc::clone(&active);
    let peak_clone = Arc::clone(&peak);

    let t = task("t.bounded")
        .middleware([runner::builtins::concurrency(json!({"limit": 2}))])
        .run(move |_, _| {
            let active = Arc::clone(&active_clone);
            let peak = Arc::clone(&peak_clone);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = Arc::new(run(app, options()).await.unwrap());
    let mut handles = Vec::new();
    for _ in 0..6 {
        let runtime = Arc::clone(&runtime);
        handles.push(tokio::spawn(async move {
            runtime.run_task("t.bounded", Value::Null).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn input_and_result_schemas_gate_execution() {
    let t = task("t.typed")
        .input_schema(
            Schema::json(json!({
                "type": "object",
                "properties": {"n": {"type": "integer"}},
                "required": ["n"]
            }))
            .unwrap(),
        )
        .result_schema(Schema::json(json!({"type": "string"})).unwrap())
        .run(|input, _| async move {
            if input["n"] == 13 {
                // Violates the result schema on purpose.
                Ok(json!(13))
            } else {
                Ok(json!("ok"))
            }
        })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = run(app, options()).await.unwrap();

    let err = runtime.run_task("t.typed", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("Task input validation failed for t.typed"));

    assert_eq!(runtime.run_task("t.typed", json!({"n": 1})).await.unwrap(), json!("ok"));

    let err = runtime.run_task("t.typed", json!({"n": 13})).await.unwrap_err();
    assert!(err.to_string().contains("Task result validation failed for t.typed"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn suppressed_task_error_resolves_null() {
    let failing = task("t.fragile")
        .run(|_, _| async { Err(RunnerError::task("fragile")) })
        .build();
    let swallow = hook("h.swallow")
        .on_id(runner::lifecycle::TASKS_ON_ERROR)
        .run(|emission, _deps| async move {
            if let Some(payload) = emission.payload::<runner::lifecycle::TaskOnError>() {
                payload.suppress.suppress();
            }
            Ok(())
        })
        .build();
    let app = resource("app").register([failing.into(), swallow.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("t.fragile", Value::Null).await.unwrap();
    assert_eq!(out, Value::Null);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn after_run_listeners_can_rewrite_the_output() {
    let t = task("t.plain").run(|_, _| async { Ok(json!("raw")) }).build();
    let rewrite = hook("h.rewrite")
        .on_id("t.plain.after_run")
        .run(|emission, _deps| async move {
            if let Some(payload) = emission.payload::<runner::lifecycle::TaskAfterRun>() {
                payload.output.set(json!("polished"));
            }
            Ok(())
        })
        .build();
    let app = resource("app").register([t.into(), rewrite.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("t.plain", Value::Null).await.unwrap();
    assert_eq!(out, json!("polished"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn tunnel_routes_phantom_tasks() {
    let remote = phantom_task("remote.compute");
    let tunnel_resource = resource("app.tunnel")
        .tags([runner::builtins::tunnel_tag().into()])
        .init(|_, _| async {
            let service = TunnelService::new(vec!["remote.compute".into()], |task_id, input| {
                async move { Ok(json!({"routed": task_id.as_str(), "input": input})) }
            });
            Ok(Arc::new(service) as runner::AnyValue)
        })
        .build();
    let app = resource("app").register([remote.into(), tunnel_resource.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("remote.compute", json!({"x": 1})).await.unwrap();
    assert_eq!(out["routed"], "remote.compute");
    assert_eq!(out["input"]["x"], 1);
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn unrouted_phantom_task_fails() {
    let ghost = phantom_task("remote.ghost");
    let app = resource("app").register([ghost.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    let err = runtime.run_task("remote.ghost", Value::Null).await.unwrap_err();
    assert!(matches!(err, RunnerError::PhantomTaskNotRouted { .. }));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn dependencies_resolve_tasks_resources_and_emitters() {
    let db = resource("app.db")
        .init(|_, _| async { Ok(Arc::new(String::from("connection")) as runner::AnyValue) })
        .build();
    let helper = task("app.helper").run(|input, _| async move { Ok(json!([input, "helped"])) }).build();
    let done = event("app.done").build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let listener = hook("h.done")
        .on_id("app.done")
        .run(move |_emission, _deps| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().push("done".to_string());
                Ok(())
            }
        })
        .build();

    let orchestrate = task("app.orchestrate")
        .dependencies([
            DependencyRef::resource("app.db"),
            DependencyRef::task("app.helper"),
            DependencyRef::event("app.done"),
        ])
        .run(|_, deps| async move {
            let connection = deps.resource::<String>("app.db")?;
            let helped = deps.run_task("app.helper", json!("work")).await?;
            deps.emit("app.done", json!({})).await?;
            Ok(json!({"db": connection.as_str(), "helped": helped}))
        })
        .build();

    let app = resource("app")
        .register([db.into(), helper.into(), done.into(), listener.into(), orchestrate.into()])
        .build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("app.orchestrate", Value::Null).await.unwrap();
    assert_eq!(out["db"], "connection");
    assert_eq!(out["helped"], json!(["work", "helped"]));
    assert_eq!(seen.lock().len(), 1);

    // Undeclared dependencies stay invisible.
    let sneaky = runtime.run_task("app.helper", json!("direct")).await.unwrap();
    assert_eq!(sneaky, json!(["direct", "helped"]));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn require_context_gates_on_bound_context() {
    let t = task("t.ctx")
        .middleware([runner::builtins::require_context()])
        .run(|_, _| async { Ok(json!("with ctx")) })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = run(app, options()).await.unwrap();

    let err = runtime.run_task("t.ctx", Value::Null).await.unwrap_err();
    assert!(err.is_validation(), "got: {err}");

    let out = runtime
        .with_context(Arc::new("tenant-1".to_string()), runtime.run_task("t.ctx", Value::Null))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out, json!("with ctx"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn debounce_lets_only_the_latest_call_through() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = Arc::clone(&runs);

    let t = task("t.debounced")
        .middleware([runner::builtins::debounce(json!({"ms": 30}))])
        .run(move |_, _| {
            let runs = Arc::clone(&runs_clone);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!("ran"))
            }
        })
        .build();
    let app = resource("app").register([t.into()]).build();

    let runtime = Arc::new(run(app, options()).await.unwrap());
    let first = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run_task("t.debounced", Value::Null).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run_task("t.debounced", Value::Null).await })
    };

    // The superseded call resolves to null; the latest actually runs.
    assert_eq!(first.await.unwrap().unwrap(), Value::Null);
    assert_eq!(second.await.unwrap().unwrap(), json!("ran"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    runtime.dispose().await.unwrap();
}
