//! Shared test fixtures: byte-level builders for classfiles and dex images, and callbacks
//! that record what they saw.

mod dex;

use std::sync::{Arc, Mutex};

pub use classfile::ClassFileBuilder;
pub use dex::DexBuilder;

use crate::hook::{HookCallback, Value};

/// Collects `"before NAME"` / `"after NAME"` events from the callbacks it creates.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    /// A callback that only records.
    pub fn callback(&self, name: &str, priority: i32) -> HookCallback {
        self.build(name, priority, None)
    }

    /// A callback that records and returns `result` early from its `before` stage.
    pub fn skipping(&self, name: &str, priority: i32, result: impl Into<Value>) -> HookCallback {
        self.build(name, priority, Some(result.into()))
    }

    fn build(&self, name: &str, priority: i32, result: Option<Value>) -> HookCallback {
        let before = (self.events.clone(), format!("before {name}"));
        let after = (self.events.clone(), format!("after {name}"));
        HookCallback::with_priority(priority)
            .before(move |param| {
                before.0.lock().unwrap().push(before.1.clone());
                if let Some(result) = &result {
                    param.set_result(result.clone());
                }
                Ok(())
            })
            .after(move |_| {
                after.0.lock().unwrap().push(after.1.clone());
                Ok(())
            })
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}
