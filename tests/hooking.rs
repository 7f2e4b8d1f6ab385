//! Integration tests for the hook engine.
//!
//! These drive the public API the way a module loader would: resolve members, install
//! callbacks with different priorities, call through the runtime and react to package loads.

use hookscope::{hook::ArtifactSource, prelude::*};
use std::sync::{Arc, Mutex};

struct App {
    runtime: Arc<MethodTable>,
    engine: HookEngine,
    check: Member,
    ctor: Member,
}

fn app(config: HookConfig) -> Result<App> {
    let runtime = Arc::new(MethodTable::new());
    let check = Member::from_descriptor(
        "com/example/License",
        "verify",
        "(Ljava/lang/String;I)Z",
        MemberFlags::empty(),
    )?;
    let ctor = Member::constructor("com/example/License", "(Ljava/lang/String;)V", MemberFlags::empty())?;

    runtime.define(&check, |_, args| {
        let key = args[0].as_str().unwrap_or_default();
        if key.is_empty() {
            return Err(Throwable::new("java.lang.IllegalArgumentException", "empty key"));
        }
        Ok(Value::Boolean(key.len() as i32 == args[1].as_int().unwrap_or(-1)))
    });
    runtime.define(&ctor, |_, _| Ok(Value::Null));

    Ok(App {
        engine: HookEngine::new(runtime.clone(), config),
        runtime,
        check,
        ctor,
    })
}

fn license() -> Value {
    Value::object("com/example/License", Mutex::new(0u32))
}

#[test]
fn modules_stack_in_priority_order() -> Result<()> {
    let app = app(HookConfig::in_memory())?;
    let trace = Arc::new(Mutex::new(Vec::new()));

    // a logging module that only observes
    let log = trace.clone();
    app.engine.hook_method(
        &app.check,
        HookCallback::with_priority(PRIORITY_HIGHEST).after(move |param| {
            log.lock().unwrap().push(format!("{:?}", param.result_or_throwable()));
            Ok(())
        }),
    )?;

    // a patch module that forces success, but only for one key
    app.engine.hook_method(
        &app.check,
        HookCallback::new().before(|param| {
            if param.args[0].as_str() == Some("trusted") {
                param.set_result(true);
            }
            Ok(())
        }),
    )?;

    let this = license();
    let args = |key: &str, len: i32| [Value::from(key), Value::Int(len)];

    assert_eq!(app.runtime.invoke(&app.check, Some(&this), &args("trusted", 0)), Ok(Value::Boolean(true)));
    assert_eq!(app.runtime.invoke(&app.check, Some(&this), &args("abc", 3)), Ok(Value::Boolean(true)));
    assert_eq!(app.runtime.invoke(&app.check, Some(&this), &args("abc", 4)), Ok(Value::Boolean(false)));

    let thrown = app.runtime.invoke(&app.check, Some(&this), &args("", 0)).unwrap_err();
    assert_eq!(thrown.class(), "java.lang.IllegalArgumentException");

    assert_eq!(trace.lock().unwrap().len(), 4);
    Ok(())
}

#[test]
fn after_can_swallow_original_exception() -> Result<()> {
    let app = app(HookConfig::in_memory())?;
    app.engine.hook_method(
        &app.check,
        HookCallback::new().after(|param| {
            if param.has_throwable() {
                param.set_result(false);
            }
            Ok(())
        }),
    )?;

    let result = app
        .runtime
        .invoke(&app.check, Some(&license()), &[Value::from(""), Value::Int(0)]);
    assert_eq!(result, Ok(Value::Boolean(false)));
    Ok(())
}

#[test]
fn constructors_and_receivers() -> Result<()> {
    let app = app(HookConfig::in_memory())?;
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    app.engine.hook_method(
        &app.ctor,
        HookCallback::new().after(move |param| {
            let counter = param.this_object().and_then(|this| this.downcast_ref::<Mutex<u32>>());
            if let Some(counter) = counter {
                *counter.lock().unwrap() += 1;
            }
            *sink.lock().unwrap() = param.args.first().cloned();
            Ok(())
        }),
    )?;

    let this = license();
    assert_eq!(app.runtime.invoke(&app.ctor, Some(&this), &[Value::from("k")]), Ok(Value::Null));
    assert_eq!(*seen.lock().unwrap(), Some(Value::from("k")));
    assert_eq!(*this.downcast_ref::<Mutex<u32>>().unwrap().lock().unwrap(), 1);

    let thrown = app.runtime.invoke(&app.ctor, None, &[Value::from("k")]).unwrap_err();
    assert_eq!(thrown.class(), "java.lang.NullPointerException");
    Ok(())
}

#[test]
fn trampolines_survive_restarts() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();

    for round in 0..3 {
        let app = app(HookConfig::with_cache_dir(dir.path()))?;
        app.engine.hook_method(&app.check, HookCallback::return_constant(true))?;
        let source = app.engine.trampoline(&app.check).map(|t| t.source());
        let expected = if round == 0 {
            ArtifactSource::Generated
        } else {
            ArtifactSource::Disk
        };
        assert_eq!(source, Some(expected));
    }
    Ok(())
}

#[test]
fn package_loads_are_delivered_once() -> Result<()> {
    let app = app(HookConfig::in_memory())?;
    let engine = Arc::new(app.engine);
    let check = app.check.clone();

    // a module that installs its hook once its target package shows up
    let installer = Arc::downgrade(&engine);
    engine.packages().register(LoadPackageCallback::new(move |event| {
        if event.package_name != "com.example" {
            return Ok(());
        }
        let Some(engine) = installer.upgrade() else {
            return Ok(());
        };
        engine
            .hook_method(&check, HookCallback::return_constant(true))
            .map(|_| ())
            .map_err(Throwable::from)
    }));

    let first = LoadPackageEvent::new("com.example", "com.example", Value::Null, true);
    let again = LoadPackageEvent::new("com.example", "com.example:service", Value::Null, false);
    assert!(engine.packages().dispatch(&first));
    assert!(!engine.packages().dispatch(&again));

    assert_eq!(engine.registry().snapshot(&app.check).len(), 1);
    assert_eq!(engine.packages().loaded_packages(), vec!["com.example".to_string()]);
    Ok(())
}
