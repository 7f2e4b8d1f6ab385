//! Method hooking.
//!
//! A hook wraps a method or constructor ([`Member`]) with an ordered chain of
//! [`HookCallback`]s. The first hook on a member generates its [`Trampoline`]: the runtime's
//! [`ReplacementRuntime`] backs up the original body and routes every call to a hook entry,
//! which checks the arguments, runs the callback chain around the backup and hands the outcome
//! back to the caller.
//!
//! # Architecture
//!
//! - [`member`] - Member identity and flags, built from descriptors, classfiles or dex images
//! - [`value`] - Boxed values and throwables travelling through a hooked call
//! - [`callback`] / [`param`] - Callback stages and the per-invocation context they share
//! - [`registry`] - Copy-on-write callback sets and unhook handles
//! - [`signature`] / [`cache`] - Erased signatures, signature ids and the on-disk artifact cache
//! - [`trampoline`] - Artifact generation and binding
//! - [`runtime`] - The replacement capability, plus the in-process [`MethodTable`]
//! - [`engine`] - [`HookEngine`], the process-scoped root object
//! - [`loader`] - Deduplicated package load notifications
//!
//! # Call protocol
//!
//! `before` stages run in priority order (highest first, registration order among equals).
//! A stage that sets a result or a throwable skips the original body and all lower
//! priorities. `after` stages then run for exactly the callbacks whose `before` ran, in
//! reverse. A failing stage never reaches the caller: a failed `before` is undone, a failed
//! `after` restores the outcome it started from. Only a result of the wrong type reaches the
//! caller, as a `java.lang.ClassCastException`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use hookscope::hook::{HookCallback, HookConfig, HookEngine, Member, MemberFlags, MethodTable, ReplacementRuntime, Value};
//!
//! let runtime = Arc::new(MethodTable::new());
//! let check = Member::from_descriptor("com/app/License", "isValid", "()Z", MemberFlags::empty())?;
//! runtime.define(&check, |_, _| Ok(Value::Boolean(false)));
//!
//! let engine = HookEngine::new(runtime.clone(), HookConfig::in_memory());
//! engine.hook_method(&check, HookCallback::return_constant(true))?;
//!
//! let license = Value::object("com/app/License", ());
//! assert_eq!(runtime.invoke(&check, Some(&license), &[]), Ok(Value::Boolean(true)));
//! assert_eq!(engine.invoke_original(&check, Some(&license), &[]), Ok(Value::Boolean(false)));
//! # Ok::<(), hookscope::Error>(())
//! ```

pub mod cache;
pub mod callback;
mod dispatcher;
pub mod engine;
pub mod loader;
pub mod member;
pub mod param;
pub mod registry;
pub mod runtime;
pub mod signature;
pub mod trampoline;
pub mod value;

pub use crate::classfile::JavaType;
pub use cache::{ArtifactCache, StubArtifact};
pub use callback::{HookCallback, PRIORITY_DEFAULT, PRIORITY_HIGHEST, PRIORITY_LOWEST};
pub use engine::{HookConfig, HookEngine};
pub use loader::{LoadPackageCallback, LoadPackageEvent, PackageLoadDispatcher, SYSTEM_PACKAGE};
pub use member::{Member, MemberFlags};
pub use param::MethodHookParam;
pub use registry::{CallbackEntry, CallbackRegistry, CallbackSet, Snapshot, UnhookHandle};
pub use runtime::{MethodEntry, MethodTable, ReplacementRuntime};
pub use signature::{signature_id, ErasedSignature};
pub use trampoline::{ArtifactSource, Trampoline, TrampolineGenerator};
pub use value::{Object, Throwable, Value};
