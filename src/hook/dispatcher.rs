//! The callback state machine run by every hook entry.
//!
//! One invocation walks a snapshot of the member's callbacks:
//!
//! 1. `before` stages in priority order. A stage that sets a result or throwable stops the walk
//!    and skips the original body. A failing stage is logged, its partial effect is discarded
//!    (result reset to `null`, skip flag cleared) and the walk continues.
//! 2. The original body, unless skipped. Its return value or throwable becomes the outcome.
//! 3. `after` stages of exactly the callbacks whose `before` ran, in reverse. A failing stage is
//!    logged and the outcome it saw on entry is restored.
//!
//! The final outcome is returned or thrown to the caller.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::error;

use crate::hook::{
    member::Member,
    param::MethodHookParam,
    registry::{CallbackEntry, CallbackSet},
    runtime::MethodEntry,
    value::{Throwable, Value},
};

/// Everything a hook entry needs to dispatch one member.
pub(crate) struct HookContext {
    pub(crate) member: Member,
    pub(crate) backup: MethodEntry,
    pub(crate) callbacks: Arc<CallbackSet>,
    pub(crate) disabled: Arc<AtomicBool>,
    pub(crate) log_failures: bool,
}

impl HookContext {
    fn report(&self, stage: &str, entry: &CallbackEntry, throwable: &Throwable) {
        if self.log_failures {
            error!(
                "{stage} callback (priority {}) on {} failed: {throwable}",
                entry.priority(),
                self.member
            );
        }
    }
}

/// Run the callbacks of `ctx` around its original body.
///
/// # Errors
/// Returns the throwable the invocation ends with.
pub(crate) fn dispatch(
    ctx: &HookContext,
    this: Option<&Value>,
    args: &[Value],
) -> Result<Value, Throwable> {
    if ctx.disabled.load(Ordering::Acquire) {
        return (ctx.backup)(this, args);
    }

    let snapshot = ctx.callbacks.snapshot();
    if snapshot.is_empty() {
        return (ctx.backup)(this, args);
    }

    let mut param = MethodHookParam::new(ctx.member.clone(), this.cloned(), args.to_vec());

    let mut before_count = 0;
    while before_count < snapshot.len() {
        let entry = &snapshot[before_count];
        before_count += 1;

        if let Err(throwable) = entry.callback().call_before(&mut param) {
            ctx.report("before", entry, &throwable);
            param.set_result(Value::Null);
            param.return_early = false;
            continue;
        }
        if param.return_early {
            break;
        }
    }

    if !param.return_early {
        match (ctx.backup)(param.this_object(), &param.args) {
            Ok(result) => param.set_result(result),
            Err(throwable) => param.set_throwable(throwable),
        }
    }

    for entry in snapshot[..before_count].iter().rev() {
        let last_result = param.result().clone();
        let last_throwable = param.throwable().cloned();

        if let Err(throwable) = entry.callback().call_after(&mut param) {
            ctx.report("after", entry, &throwable);
            match last_throwable {
                None => param.set_result(last_result),
                Some(last) => param.set_throwable(last),
            }
        }
    }

    param.take_outcome()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::hook::{registry::CallbackRegistry, HookCallback, MemberFlags};

    struct Fixture {
        registry: CallbackRegistry,
        member: Member,
        calls: Arc<Mutex<Vec<String>>>,
        ctx: HookContext,
    }

    fn fixture(original: Result<Value, Throwable>) -> Fixture {
        let registry = CallbackRegistry::new();
        let member = Member::from_descriptor("a/B", "f", "(I)I", MemberFlags::STATIC).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let backup: MethodEntry = Arc::new(move |_: Option<&Value>, _: &[Value]| {
            log.lock().unwrap().push("original".to_string());
            original.clone()
        });
        let ctx = HookContext {
            member: member.clone(),
            backup,
            callbacks: registry.set_for(&member),
            disabled: Arc::new(AtomicBool::new(false)),
            log_failures: false,
        };
        Fixture {
            registry,
            member,
            calls,
            ctx,
        }
    }

    impl Fixture {
        fn tracing(&self, name: &'static str, priority: i32) -> HookCallback {
            let before = self.calls.clone();
            let after = self.calls.clone();
            HookCallback::with_priority(priority)
                .before(move |_| {
                    before.lock().unwrap().push(format!("before {name}"));
                    Ok(())
                })
                .after(move |_| {
                    after.lock().unwrap().push(format!("after {name}"));
                    Ok(())
                })
        }

        fn hook(&self, callback: HookCallback) {
            self.registry.register(&self.member, Arc::new(callback));
        }

        fn run(&self) -> Result<Value, Throwable> {
            dispatch(&self.ctx, None, &[Value::Int(1)])
        }

        fn trace(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[test]
    fn no_callbacks_calls_through() {
        let f = fixture(Ok(Value::Int(3)));
        assert_eq!(f.run(), Ok(Value::Int(3)));
        assert_eq!(f.trace(), vec!["original"]);
    }

    #[test]
    fn nesting_order() {
        let f = fixture(Ok(Value::Int(3)));
        f.hook(f.tracing("low", 1));
        f.hook(f.tracing("high", 100));
        assert_eq!(f.run(), Ok(Value::Int(3)));
        assert_eq!(
            f.trace(),
            vec!["before high", "before low", "original", "after low", "after high"]
        );
    }

    #[test]
    fn early_return_skips_lower_priorities() {
        let f = fixture(Ok(Value::Int(3)));
        f.hook(f.tracing("high", 100));
        f.hook(HookCallback::return_constant(42));
        f.hook(f.tracing("low", 1));

        assert_eq!(f.run(), Ok(Value::Int(42)));
        assert_eq!(f.trace(), vec!["before high", "after high"]);
    }

    #[test]
    fn failing_before_is_discarded() {
        let f = fixture(Ok(Value::Int(3)));
        f.hook(HookCallback::with_priority(100).before(|param| {
            param.set_result(99);
            Err(Throwable::bare("java.lang.IllegalStateException"))
        }));
        f.hook(f.tracing("low", 1));

        assert_eq!(f.run(), Ok(Value::Int(3)));
        assert_eq!(f.trace(), vec!["before low", "original", "after low"]);
    }

    #[test]
    fn failing_after_restores_outcome() {
        let f = fixture(Err(Throwable::bare("java.io.IOException")));
        f.hook(HookCallback::new().after(|param| {
            param.set_result(5);
            panic!("after failed")
        }));

        let thrown = f.run().unwrap_err();
        assert_eq!(thrown.class(), "java.io.IOException");
    }

    #[test]
    fn after_can_replace_throwable() {
        let f = fixture(Err(Throwable::bare("java.io.IOException")));
        f.hook(HookCallback::new().after(|param| {
            assert!(param.has_throwable());
            param.set_result(0);
            Ok(())
        }));
        assert_eq!(f.run(), Ok(Value::Int(0)));
    }

    #[test]
    fn disabled_bypasses_callbacks() {
        let f = fixture(Ok(Value::Int(3)));
        f.hook(HookCallback::return_constant(42));
        f.ctx.disabled.store(true, Ordering::Release);
        assert_eq!(f.run(), Ok(Value::Int(3)));
    }
}
