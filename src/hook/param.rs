//! The per-invocation hook context.

use std::collections::HashMap;

use crate::hook::{
    member::Member,
    value::{Throwable, Value},
};

/// The mutable context of one hooked invocation, shared by every callback in the chain.
///
/// Setting a result or a throwable from a `before` callback skips the original body and the
/// remaining `before` callbacks. The two slots are exclusive: setting one clears the other.
#[derive(Debug)]
pub struct MethodHookParam {
    member: Member,
    this_object: Option<Value>,
    /// Arguments, modifiable by `before` callbacks
    pub args: Vec<Value>,
    result: Value,
    throwable: Option<Throwable>,
    pub(crate) return_early: bool,
    extras: HashMap<String, Value>,
}

impl MethodHookParam {
    pub(crate) fn new(member: Member, this_object: Option<Value>, args: Vec<Value>) -> Self {
        MethodHookParam {
            member,
            this_object,
            args,
            result: Value::Null,
            throwable: None,
            return_early: false,
            extras: HashMap::new(),
        }
    }

    /// The hooked member.
    #[must_use]
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// The receiver, `None` for static methods.
    #[must_use]
    pub fn this_object(&self) -> Option<&Value> {
        self.this_object.as_ref()
    }

    /// The current result.
    #[must_use]
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Replace the result and clear any throwable.
    ///
    /// From a `before` callback this prevents the original body from running.
    pub fn set_result(&mut self, result: impl Into<Value>) {
        self.result = result.into();
        self.throwable = None;
        self.return_early = true;
    }

    /// The pending throwable.
    #[must_use]
    pub fn throwable(&self) -> Option<&Throwable> {
        self.throwable.as_ref()
    }

    /// Returns `true` if a throwable is pending.
    #[must_use]
    pub fn has_throwable(&self) -> bool {
        self.throwable.is_some()
    }

    /// Throw `throwable` to the caller and clear the result.
    ///
    /// From a `before` callback this prevents the original body from running.
    pub fn set_throwable(&mut self, throwable: Throwable) {
        self.throwable = Some(throwable);
        self.result = Value::Null;
        self.return_early = true;
    }

    /// The result, or the pending throwable as an error.
    ///
    /// # Errors
    /// Returns the pending [`Throwable`].
    pub fn result_or_throwable(&self) -> Result<Value, Throwable> {
        match &self.throwable {
            Some(throwable) => Err(throwable.clone()),
            None => Ok(self.result.clone()),
        }
    }

    /// Returns `true` once a callback has requested to skip the original body.
    #[must_use]
    pub fn returns_early(&self) -> bool {
        self.return_early
    }

    /// A value stored by an earlier callback of this invocation.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    /// Store a value for later callbacks of this invocation, typically a `before` handing
    /// state to its own `after`.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extras.insert(key.into(), value.into());
    }

    pub(crate) fn take_outcome(self) -> Result<Value, Throwable> {
        match self.throwable {
            Some(throwable) => Err(throwable),
            None => Ok(self.result),
        }
    }
}
