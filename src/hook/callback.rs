//! Hook callbacks.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
};

use crate::hook::{
    param::MethodHookParam,
    value::{Throwable, Value},
};

/// The default callback priority.
pub const PRIORITY_DEFAULT: i32 = 50;
/// Runs last in `before` and first in `after`.
pub const PRIORITY_LOWEST: i32 = -10000;
/// Runs first in `before` and last in `after`.
pub const PRIORITY_HIGHEST: i32 = 10000;

type Stage = Box<dyn Fn(&mut MethodHookParam) -> Result<(), Throwable> + Send + Sync>;

/// A pair of `before` / `after` stages run around a hooked member.
///
/// Higher priorities run earlier in `before` and later in `after`. Either stage may fail by
/// returning a [`Throwable`] (or by panicking); the dispatcher logs the failure and repairs the
/// context so other callbacks are unaffected.
///
/// # Examples
///
/// ```rust
/// use hookscope::hook::{HookCallback, Value};
///
/// let callback = HookCallback::with_priority(100)
///     .before(|param| {
///         if param.args.first() == Some(&Value::Int(0)) {
///             param.set_result(-1);
///         }
///         Ok(())
///     })
///     .after(|param| {
///         param.set_extra("seen", true);
///         Ok(())
///     });
/// assert_eq!(callback.priority(), 100);
/// ```
pub struct HookCallback {
    priority: i32,
    before: Option<Stage>,
    after: Option<Stage>,
}

impl HookCallback {
    /// An empty callback with [`PRIORITY_DEFAULT`].
    #[must_use]
    pub fn new() -> Self {
        HookCallback::with_priority(PRIORITY_DEFAULT)
    }

    /// An empty callback with `priority`.
    #[must_use]
    pub fn with_priority(priority: i32) -> Self {
        HookCallback {
            priority,
            before: None,
            after: None,
        }
    }

    /// Set the stage run before the original body.
    #[must_use]
    pub fn before<F>(mut self, stage: F) -> Self
    where
        F: Fn(&mut MethodHookParam) -> Result<(), Throwable> + Send + Sync + 'static,
    {
        self.before = Some(Box::new(stage));
        self
    }

    /// Set the stage run after the original body.
    #[must_use]
    pub fn after<F>(mut self, stage: F) -> Self
    where
        F: Fn(&mut MethodHookParam) -> Result<(), Throwable> + Send + Sync + 'static,
    {
        self.after = Some(Box::new(stage));
        self
    }

    /// Replace the member's body with `body`.
    ///
    /// The original is never called; a throwable returned by `body` is delivered to the caller.
    pub fn replacement<F>(body: F) -> Self
    where
        F: Fn(&MethodHookParam) -> Result<Value, Throwable> + Send + Sync + 'static,
    {
        HookCallback::new().before(move |param| {
            match body(param) {
                Ok(result) => param.set_result(result),
                Err(throwable) => param.set_throwable(throwable),
            }
            Ok(())
        })
    }

    /// Replace the member's body with one returning `value`.
    pub fn return_constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        HookCallback::replacement(move |_| Ok(value.clone()))
    }

    /// Replace the member's body with one that does nothing and returns `null`.
    #[must_use]
    pub fn do_nothing() -> Self {
        HookCallback::replacement(|_| Ok(Value::Null))
    }

    /// The priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn call_before(&self, param: &mut MethodHookParam) -> Result<(), Throwable> {
        call_stage(self.before.as_ref(), param)
    }

    pub(crate) fn call_after(&self, param: &mut MethodHookParam) -> Result<(), Throwable> {
        call_stage(self.after.as_ref(), param)
    }
}

fn call_stage(stage: Option<&Stage>, param: &mut MethodHookParam) -> Result<(), Throwable> {
    let Some(stage) = stage else {
        return Ok(());
    };
    match catch_unwind(AssertUnwindSafe(|| stage(param))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(Throwable::from_panic(payload.as_ref())),
    }
}

impl Default for HookCallback {
    fn default() -> Self {
        HookCallback::new()
    }
}

impl fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCallback")
            .field("priority", &self.priority)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}
