//! Package load notifications.
//!
//! The platform glue reports every application initialization point it observes; several of
//! them can describe the same logical load. [`PackageLoadDispatcher`] reduces these to exactly
//! one [`LoadPackageEvent`] per package and fans it out to the registered callbacks, highest
//! priority first, isolating each callback's failure from the others.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use dashmap::DashSet;
use log::{debug, error};

use crate::hook::{
    callback::PRIORITY_DEFAULT,
    value::{Throwable, Value},
};

/// The package name the framework's own process is reported under.
pub const SYSTEM_PACKAGE: &str = "system";

/// A package that was loaded into the current process.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPackageEvent {
    /// The package name, `"system"` for the framework itself
    pub package_name: String,
    /// The process the package runs in
    pub process_name: String,
    /// The class loader of the package
    pub class_loader: Value,
    /// Opaque application info, if the platform supplied one
    pub application_info: Option<Value>,
    /// Whether this is the first (and usually only) application of the process
    pub is_first_application: bool,
}

impl LoadPackageEvent {
    /// An event for `package_name` running in `process_name`.
    ///
    /// The framework package `"android"` is reported as [`SYSTEM_PACKAGE`] when it is the
    /// first application of its process.
    pub fn new(
        package_name: &str,
        process_name: &str,
        class_loader: Value,
        is_first_application: bool,
    ) -> Self {
        let package_name = if is_first_application && package_name == "android" {
            SYSTEM_PACKAGE
        } else {
            package_name
        };
        LoadPackageEvent {
            package_name: package_name.to_string(),
            process_name: process_name.to_string(),
            class_loader,
            application_info: None,
            is_first_application,
        }
    }

    /// Attach the platform's application info.
    #[must_use]
    pub fn with_application_info(mut self, info: Value) -> Self {
        self.application_info = Some(info);
        self
    }
}

type LoadBody = Box<dyn Fn(&LoadPackageEvent) -> Result<(), Throwable> + Send + Sync>;

/// A callback run for every loaded package.
pub struct LoadPackageCallback {
    priority: i32,
    body: LoadBody,
}

impl LoadPackageCallback {
    /// A callback with the default priority.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&LoadPackageEvent) -> Result<(), Throwable> + Send + Sync + 'static,
    {
        LoadPackageCallback::with_priority(PRIORITY_DEFAULT, body)
    }

    /// A callback with `priority`; higher priorities run first.
    pub fn with_priority<F>(priority: i32, body: F) -> Self
    where
        F: Fn(&LoadPackageEvent) -> Result<(), Throwable> + Send + Sync + 'static,
    {
        LoadPackageCallback {
            priority,
            body: Box::new(body),
        }
    }

    /// The priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    fn call(&self, event: &LoadPackageEvent) -> Result<(), Throwable> {
        match catch_unwind(AssertUnwindSafe(|| (self.body)(event))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(Throwable::from_panic(payload.as_ref())),
        }
    }
}

impl fmt::Debug for LoadPackageCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadPackageCallback")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Delivers [`LoadPackageEvent`]s, at most once per package.
#[derive(Default)]
pub struct PackageLoadDispatcher {
    callbacks: boxcar::Vec<Arc<LoadPackageCallback>>,
    loaded: DashSet<String>,
}

impl PackageLoadDispatcher {
    /// A dispatcher with no callbacks and no loaded packages.
    #[must_use]
    pub fn new() -> Self {
        PackageLoadDispatcher::default()
    }

    /// Register `callback` for all future loads.
    pub fn register(&self, callback: impl Into<Arc<LoadPackageCallback>>) {
        self.callbacks.push(callback.into());
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.count()
    }

    /// Deliver `event` unless its package was already delivered.
    ///
    /// Returns `false` for a duplicate. Callback failures are logged and do not stop the
    /// remaining callbacks.
    pub fn dispatch(&self, event: &LoadPackageEvent) -> bool {
        if !self.loaded.insert(event.package_name.clone()) {
            debug!(
                "package {} already loaded in {}, skipping",
                event.package_name, event.process_name
            );
            return false;
        }

        let mut ordered: Vec<(usize, Arc<LoadPackageCallback>)> = self
            .callbacks
            .iter()
            .map(|(index, callback)| (index, callback.clone()))
            .collect();
        ordered.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));

        debug!(
            "loading package {} in {} ({} callbacks)",
            event.package_name,
            event.process_name,
            ordered.len()
        );
        for (_, callback) in ordered {
            if let Err(throwable) = callback.call(event) {
                error!(
                    "load package callback (priority {}) for {} failed: {throwable}",
                    callback.priority, event.package_name
                );
            }
        }
        true
    }

    /// Returns `true` if `package_name` was delivered.
    #[must_use]
    pub fn is_loaded(&self, package_name: &str) -> bool {
        self.loaded.contains(package_name)
    }

    /// Every delivered package name, sorted.
    #[must_use]
    pub fn loaded_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.loaded.iter().map(|p| p.key().clone()).collect();
        packages.sort();
        packages
    }
}

impl fmt::Debug for PackageLoadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageLoadDispatcher")
            .field("callbacks", &self.callbacks.count())
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(
        seen: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
        priority: i32,
    ) -> LoadPackageCallback {
        let seen = seen.clone();
        LoadPackageCallback::with_priority(priority, move |event| {
            seen.lock()
                .unwrap()
                .push(format!("{tag}:{}", event.package_name));
            Ok(())
        })
    }

    #[test]
    fn once_per_package() {
        let dispatcher = PackageLoadDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(recorder(&seen, "a", 0));

        let event = LoadPackageEvent::new("com.example", "com.example", Value::Null, true);
        assert!(dispatcher.dispatch(&event));
        let later = LoadPackageEvent::new("com.example", "com.example:remote", Value::Null, false);
        assert!(!dispatcher.dispatch(&later));

        assert_eq!(*seen.lock().unwrap(), vec!["a:com.example"]);
        assert!(dispatcher.is_loaded("com.example"));
    }

    #[test]
    fn priority_order_and_isolation() {
        let dispatcher = PackageLoadDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(recorder(&seen, "low", -5));
        dispatcher.register(LoadPackageCallback::with_priority(10, |_| {
            Err(Throwable::bare("java.lang.LinkageError"))
        }));
        dispatcher.register(LoadPackageCallback::with_priority(20, |_| panic!("module bug")));
        dispatcher.register(recorder(&seen, "high", 100));
        dispatcher.register(recorder(&seen, "default", PRIORITY_DEFAULT));

        dispatcher.dispatch(&LoadPackageEvent::new("p", "p", Value::Null, true));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["high:p", "default:p", "low:p"]
        );
        assert_eq!(dispatcher.callback_count(), 5);
    }

    #[test]
    fn framework_is_reported_as_system() {
        let event = LoadPackageEvent::new("android", "system_server", Value::Null, true);
        assert_eq!(event.package_name, SYSTEM_PACKAGE);
        let event = LoadPackageEvent::new("android", "com.other", Value::Null, false)
            .with_application_info(Value::from("info"));
        assert_eq!(event.package_name, "android");
        assert_eq!(event.application_info, Some(Value::from("info")));

        let dispatcher = PackageLoadDispatcher::new();
        dispatcher.dispatch(&LoadPackageEvent::new("b", "b", Value::Null, true));
        dispatcher.dispatch(&LoadPackageEvent::new("android", "system_server", Value::Null, true));
        assert_eq!(dispatcher.loaded_packages(), vec!["b", "system"]);
    }
}
