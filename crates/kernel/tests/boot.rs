//! Boot-path behavior: registration, cycles, init/dispose ordering,
//! overrides, idempotent disposal.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use runner::prelude::*;
use runner::AnyValue;
use serde_json::{json, Value};

fn options() -> RunOptions {
    RunOptions { platform: Some(Arc::new(runner::platform::TestPlatform::new())), ..RunOptions::default() }
}

#[tokio::test]
async fn duplicate_task_registration_rejects_the_boot() {
    let app = resource("app")
        .register([
            task("t").run(|_, _| async { Ok(Value::Null) }).build().into(),
            task("t").run(|_, _| async { Ok(Value::Null) }).build().into(),
        ])
        .build();

    let err = run(app, options()).await.unwrap_err();
    assert!(err.is_duplicate());
    assert!(err.to_string().starts_with("Task \"t\" already registered"));
}

#[tokio::test]
async fn circular_dependencies_report_every_cycle() {
    let a = task("A")
        .dependencies([DependencyRef::task("B")])
        .run(|_, _| async { Ok(Value::Null) })
        .build();
    let b = task("B")
        .dependencies([DependencyRef::task("A")])
        .run(|_, _| async { Ok(Value::Null) })
        .build();
    let app = resource("app").register([a.into(), b.into()]).build();

    let err = run(app, options()).await.unwrap_err();
    assert!(err.is_circular_dependencies());
    let text = err.to_string();
    assert!(text.contains("Circular dependencies detected"), "got: {text}");
    assert!(text.contains("A -> B -> A"), "got: {text}");
}

#[tokio::test]
async fn missing_dependency_names_kind_and_id() {
    let t = task("app.foo.caller")
        .dependencies([DependencyRef::task("app.foo")])
        .run(|_, _| async { Ok(Value::Null) })
        .build();
    let app = resource("app").register([t.into()]).build();

    let err = run(app, options()).await.unwrap_err();
    assert!(err.is_dependency_not_found());
    assert!(err.to_string().contains("Task app.foo not found"), "got: {err}");
}

#[tokio::test]
async fn resources_initialize_leaves_first_and_dispose_in_reverse() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let make = |id: &str, log: Arc<Mutex<Vec<String>>>, deps: Vec<DependencyRef>| {
        let init_log = Arc::clone(&log);
        let dispose_log = log;
        let id_owned = id.to_string();
        let id_for_dispose = id.to_string();
        resource(id)
            .dependencies(deps)
            .init(move |_config, _deps| {
                let log = Arc::clone(&init_log);
                let id = id_owned.clone();
                async move {
                    log.lock().push(format!("init:{id}"));
                    Ok(Arc::new(Value::Null) as AnyValue)
                }
            })
            .dispose(move |_value, _config, _deps| {
                let log = Arc::clone(&dispose_log);
                let id = id_for_dispose.clone();
                async move {
                    log.lock().push(format!("dispose:{id}"));
                    Ok(())
                }
            })
            .build()
    };

    let leaf = make("r.leaf", Arc::clone(&log), vec![]);
    let mid = make("r.mid", Arc::clone(&log), vec![DependencyRef::resource("r.leaf")]);
    let top = make("r.top", Arc::clone(&log), vec![DependencyRef::resource("r.mid")]);
    let app = resource("app").register([leaf.into(), mid.into(), top.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    runtime.dispose().await.unwrap();

    let entries = log.lock().clone();
    let position = |needle: &str| entries.iter().position(|e| e == needle).expect("logged");
    assert!(position("init:r.leaf") < position("init:r.mid"));
    assert!(position("init:r.mid") < position("init:r.top"));
    assert!(position("dispose:r.top") < position("dispose:r.mid"));
    assert!(position("dispose:r.mid") < position("dispose:r.leaf"));
}

#[tokio::test]
async fn failed_init_disposes_the_initialized_prefix_exactly_once() {
    let disposals = Arc::new(AtomicUsize::new(0));
    let disposals_x = Arc::clone(&disposals);
    let disposals_y = Arc::clone(&disposals);

    let x = resource("r.x")
        .init(|_, _| async { Ok(Arc::new(Value::Null) as AnyValue) })
        .dispose(move |_, _, _| {
            let disposals = Arc::clone(&disposals_x);
            async move {
                disposals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();
    let y = resource("r.y")
        .dependencies([DependencyRef::resource("r.x")])
        .init(|_, _| async { Err(RunnerError::task("y refuses to boot")) })
        .dispose(move |_, _, _| {
            let disposals = Arc::clone(&disposals_y);
            async move {
                // Must never run: y never initialized.
                disposals.fetch_add(100, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();
    let app = resource("app").register([x.into(), y.into()]).build();

    let err = run(app, options()).await.unwrap_err();
    assert_eq!(err.to_string(), "y refuses to boot");
    assert_eq!(disposals.load(Ordering::SeqCst), 1, "x disposed exactly once, y not at all");
}

#[tokio::test]
async fn dispose_is_idempotent_and_guards_the_facade() {
    let disposals = Arc::new(AtomicUsize::new(0));
    let disposals_clone = Arc::clone(&disposals);

    let r = resource("r")
        .init(|_, _| async { Ok(Arc::new(Value::Null) as AnyValue) })
        .dispose(move |_, _, _| {
            let disposals = Arc::clone(&disposals_clone);
            async move {
                disposals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build();
    let t = task("t").run(|_, _| async { Ok(json!(1)) }).build();
    let app = resource("app").register([r.into(), t.into()]).build();

    let runtime = run(app, options()).await.unwrap();

    let (first, second) = tokio::join!(runtime.dispose(), runtime.dispose());
    first.unwrap();
    second.unwrap();
    runtime.dispose().await.unwrap();
    assert_eq!(disposals.load(Ordering::SeqCst), 1);

    let err = runtime.run_task("t", Value::Null).await.unwrap_err();
    assert!(err.is_disposed());
    assert!(err.to_string().to_lowercase().contains("disposed"));
}

#[tokio::test]
async fn overrides_rebind_a_registered_id() {
    let original = task("app.greet").run(|_, _| async { Ok(json!("original")) }).build();
    let replacement = task("app.greet").run(|_, _| async { Ok(json!("replacement")) }).build();
    let app = resource("app")
        .register([original.into()])
        .overrides([replacement.into()])
        .build();

    let runtime = run(app, options()).await.unwrap();
    let out = runtime.run_task("app.greet", Value::Null).await.unwrap();
    assert_eq!(out, json!("replacement"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn forced_overrides_apply_after_resource_overrides() {
    let original = task("app.greet").run(|_, _| async { Ok(json!("original")) }).build();
    let forced = task("app.greet").run(|_, _| async { Ok(json!("forced")) }).build();
    let app = resource("app").register([original.into()]).build();

    let runtime = run(
        app,
        RunOptions { overrides: vec![forced.into()], ..options() },
    )
    .await
    .unwrap();
    let out = runtime.run_task("app.greet", Value::Null).await.unwrap();
    assert_eq!(out, json!("forced"));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn dry_run_validates_without_initializing() {
    let inits = Arc::new(AtomicUsize::new(0));
    let inits_clone = Arc::clone(&inits);
    let r = resource("r")
        .init(move |_, _| {
            let inits = Arc::clone(&inits_clone);
            async move {
                inits.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Value::Null) as AnyValue)
            }
        })
        .build();
    let app = resource("app").register([r.into()]).build();

    let runtime = run(app, RunOptions { dry_run: true, ..options() }).await.unwrap();
    assert!(runtime.is_dry_run());
    assert_eq!(inits.load(Ordering::SeqCst), 0, "dry run must not initialize resources");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn configured_resource_receives_its_config() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    let db = resource("app.db")
        .init(move |config, _deps| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock() = Some(config);
                Ok(Arc::new(Value::Null) as AnyValue)
            }
        })
        .build();
    let app = resource("app").register([db.with(json!({"pool": 4})).into()]).build();

    let runtime = run(app, options()).await.unwrap();
    assert_eq!(seen.lock().clone().unwrap(), json!({"pool": 4}));
    assert_eq!(runtime.get_resource_config("app.db").unwrap(), json!({"pool": 4}));
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn root_resource_value_is_reachable() {
    let app = resource("app")
        .init(|_, _| async { Ok(Arc::new(String::from("root value")) as AnyValue) })
        .build();

    let runtime = run(app, options()).await.unwrap();
    let value = runtime.value_as::<String>().unwrap();
    assert_eq!(*value, "root value");
    runtime.dispose().await.unwrap();
}

#[tokio::test]
async fn suppressed_resource_init_proceeds_without_value() {
    let broken = resource("r.broken")
        .init(|_, _| async { Err(RunnerError::task("nope")) })
        .build();
    let swallow = hook("h.swallow")
        .on_id(runner::lifecycle::RESOURCES_ON_ERROR)
        .run(|emission, _deps| async move {
            if let Some(payload) = emission.payload::<runner::lifecycle::ResourceOnError>() {
                payload.suppress.suppress();
            }
            Ok(())
        })
        .build();
    let app = resource("app").register([broken.into(), swallow.into()]).build();

    let runtime = run(app, options()).await.unwrap();
    // Initialized, but no value to fetch.
    assert!(runtime.get_resource_value("r.broken").is_err());
    runtime.dispose().await.unwrap();
}
