//! The process-scoped hook engine.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dashmap::DashMap;
use log::debug;

use crate::{
    hook::{
        cache::ArtifactCache,
        callback::HookCallback,
        loader::PackageLoadDispatcher,
        member::{Member, MemberFlags},
        registry::{CallbackRegistry, UnhookHandle},
        runtime::ReplacementRuntime,
        trampoline::{Trampoline, TrampolineGenerator},
        value::{Throwable, Value},
    },
    Error, Result,
};

/// Configuration for a [`HookEngine`]
///
/// The disk cache is only consulted when `use_disk_cache` is set and a `cache_dir` is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    /// Directory for generated trampoline artifacts
    pub cache_dir: Option<PathBuf>,

    /// Read and write artifacts on disk
    pub use_disk_cache: bool,

    /// Upper bound for a single cache read or write; `None` waits indefinitely
    pub cache_io_timeout: Option<Duration>,

    /// Log `before` / `after` callback failures at error level
    pub log_callback_failures: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            use_disk_cache: true,
            cache_io_timeout: Some(Duration::from_secs(2)),
            log_callback_failures: true,
        }
    }
}

impl HookConfig {
    /// Never touch the disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            use_disk_cache: false,
            ..Self::default()
        }
    }

    /// Cache artifacts under `dir`
    #[must_use]
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(dir.into()),
            use_disk_cache: true,
            ..Self::default()
        }
    }

    fn artifact_cache(&self) -> Option<ArtifactCache> {
        if !self.use_disk_cache {
            return None;
        }
        self.cache_dir
            .as_ref()
            .map(|dir| ArtifactCache::new(dir.clone(), self.cache_io_timeout))
    }
}

/// Installs hooks and owns everything that lives for the process: the callback registry, the
/// trampolines, the global disable switch and the set of loaded packages.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use hookscope::hook::{HookCallback, HookConfig, HookEngine, Member, MemberFlags, MethodTable, ReplacementRuntime, Value};
///
/// let runtime = Arc::new(MethodTable::new());
/// let answer = Member::from_descriptor("Deep/Thought", "answer", "()I", MemberFlags::STATIC)?;
/// runtime.define(&answer, |_, _| Ok(Value::Int(41)));
///
/// let engine = HookEngine::new(runtime.clone(), HookConfig::in_memory());
/// let handle = engine.hook_method(&answer, HookCallback::new().after(|param| {
///     let fixed = param.result().as_int().unwrap_or(0) + 1;
///     param.set_result(fixed);
///     Ok(())
/// }))?;
///
/// assert_eq!(runtime.invoke(&answer, None, &[]), Ok(Value::Int(42)));
/// handle.unhook();
/// assert_eq!(runtime.invoke(&answer, None, &[]), Ok(Value::Int(41)));
/// # Ok::<(), hookscope::Error>(())
/// ```
pub struct HookEngine {
    config: HookConfig,
    runtime: Arc<dyn ReplacementRuntime>,
    registry: CallbackRegistry,
    generator: TrampolineGenerator,
    trampolines: DashMap<Member, Arc<Trampoline>>,
    creating: DashMap<Member, Arc<Mutex<()>>>,
    disabled: Arc<AtomicBool>,
    packages: PackageLoadDispatcher,
}

impl HookEngine {
    /// An engine installing its trampolines through `runtime`.
    pub fn new(runtime: Arc<dyn ReplacementRuntime>, config: HookConfig) -> Self {
        HookEngine {
            generator: TrampolineGenerator::new(config.artifact_cache()),
            config,
            runtime,
            registry: CallbackRegistry::new(),
            trampolines: DashMap::new(),
            creating: DashMap::new(),
            disabled: Arc::new(AtomicBool::new(false)),
            packages: PackageLoadDispatcher::new(),
        }
    }

    /// The configuration the engine was created with.
    #[must_use]
    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Add `callback` to `member`, installing its trampoline on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotHookable`] for fields, abstract or interface methods and
    /// members of the dispatch path, before any generation work. Returns
    /// [`crate::Error::GenerationFailure`] if the trampoline can not be installed; nothing is
    /// registered in that case.
    pub fn hook_method(
        &self,
        member: &Member,
        callback: impl Into<Arc<HookCallback>>,
    ) -> Result<UnhookHandle> {
        check_hookable(member)?;
        let trampoline = self.trampoline_for(member)?;
        let handle = self.registry.register(member, callback.into());
        debug!(
            "hooked {member} (priority {}, {} callbacks, trampoline {})",
            handle.callback().priority(),
            trampoline.callbacks().len(),
            trampoline.id()
        );
        Ok(handle)
    }

    /// Hook every method called `name` in `members`. Constructors are skipped.
    ///
    /// # Errors
    /// Stops at and returns the first failure; hooks installed before it stay in place.
    pub fn hook_all_methods(
        &self,
        members: &[Member],
        name: &str,
        callback: impl Into<Arc<HookCallback>>,
    ) -> Result<Vec<UnhookHandle>> {
        let callback = callback.into();
        members
            .iter()
            .filter(|m| m.is_executable() && !m.is_constructor() && m.name() == name)
            .map(|m| self.hook_method(m, callback.clone()))
            .collect()
    }

    /// Hook every constructor in `members`.
    ///
    /// # Errors
    /// Stops at and returns the first failure; hooks installed before it stay in place.
    pub fn hook_all_constructors(
        &self,
        members: &[Member],
        callback: impl Into<Arc<HookCallback>>,
    ) -> Result<Vec<UnhookHandle>> {
        let callback = callback.into();
        members
            .iter()
            .filter(|m| m.is_constructor())
            .map(|m| self.hook_method(m, callback.clone()))
            .collect()
    }

    /// Remove the first registration of `callback` on `member`, by identity.
    ///
    /// The trampoline stays installed and passes calls through once no callback is left.
    pub fn unhook_method(&self, member: &Member, callback: &Arc<HookCallback>) -> bool {
        self.registry.remove_callback(member, callback)
    }

    /// Call the original body of `member`, bypassing all callbacks.
    ///
    /// # Errors
    /// Returns whatever the body throws, or an `IllegalArgumentException` if `member` is not a
    /// method or constructor.
    pub fn invoke_original(
        &self,
        member: &Member,
        this: Option<&Value>,
        args: &[Value],
    ) -> std::result::Result<Value, Throwable> {
        if !member.is_executable() {
            return Err(Throwable::illegal_argument(format!(
                "{member} is not a method or constructor"
            )));
        }
        // clone out of the map so a re-entrant hook on this thread can not deadlock the shard
        let trampoline = self.trampolines.get(member).map(|t| t.clone());
        match trampoline {
            Some(trampoline) => trampoline.invoke_backup(this, args),
            None => self.runtime.invoke(member, this, args),
        }
    }

    /// Call `member` the way any other caller would, hooks included.
    ///
    /// # Errors
    /// Returns the throwable the invocation ends with.
    pub fn invoke(
        &self,
        member: &Member,
        this: Option<&Value>,
        args: &[Value],
    ) -> std::result::Result<Value, Throwable> {
        self.runtime.invoke(member, this, args)
    }

    /// Turn every hook into a pass-through, or back.
    pub fn set_hooks_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    /// Returns `true` if hooks are currently passed through.
    #[must_use]
    pub fn hooks_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Returns `true` if `member` has at least one callback.
    #[must_use]
    pub fn is_hooked(&self, member: &Member) -> bool {
        !self.registry.snapshot(member).is_empty()
    }

    /// The trampoline of `member`, if it was ever hooked.
    #[must_use]
    pub fn trampoline(&self, member: &Member) -> Option<Arc<Trampoline>> {
        self.trampolines.get(member).map(|t| t.clone())
    }

    /// The callback registry, for inspection. Registration goes through [`Self::hook_method`].
    #[must_use]
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// The trampoline generator.
    #[must_use]
    pub fn generator(&self) -> &TrampolineGenerator {
        &self.generator
    }

    /// The package load dispatcher.
    #[must_use]
    pub fn packages(&self) -> &PackageLoadDispatcher {
        &self.packages
    }

    fn trampoline_for(&self, member: &Member) -> Result<Arc<Trampoline>> {
        if let Some(existing) = self.trampolines.get(member) {
            return Ok(existing.clone());
        }

        // one creator per member; cache I/O and binding run without holding any map shard
        let creating = self.creating.entry(member.clone()).or_default().clone();
        let _guard = lock!(creating);
        if let Some(existing) = self.trampolines.get(member) {
            return Ok(existing.clone());
        }

        let artifact = self.generator.artifact(member);
        let bound = self.generator.bind(
            member,
            artifact,
            self.runtime.as_ref(),
            self.registry.set_for(member),
            self.disabled.clone(),
            self.config.log_callback_failures,
        );
        let trampoline = match bound {
            Ok(trampoline) => Arc::new(trampoline),
            Err(e) => {
                self.registry.discard_if_empty(member);
                return Err(e);
            }
        };
        debug!("installed trampoline {} for {member}", trampoline.id());
        self.trampolines.insert(member.clone(), trampoline.clone());
        // later callers take the fast path; a failed member keeps its lock so retries serialize
        self.creating.remove(member);
        Ok(trampoline)
    }
}

fn check_hookable(member: &Member) -> Result<()> {
    let reason = if !member.is_executable() {
        "only methods and constructors can be hooked"
    } else if member.flags().contains(MemberFlags::INTERFACE) {
        "interface methods can not be hooked"
    } else if member.flags().contains(MemberFlags::ABSTRACT) {
        "abstract methods can not be hooked"
    } else if member.flags().contains(MemberFlags::BRIDGE_INTERNAL) {
        "member is part of the hook dispatch path"
    } else {
        return Ok(());
    };

    Err(Error::NotHookable {
        member: member.to_string(),
        reason,
    })
}

impl std::fmt::Debug for HookEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookEngine")
            .field("config", &self.config)
            .field("trampolines", &self.trampolines.len())
            .field("disabled", &self.hooks_disabled())
            .field("packages", &self.packages)
            .finish_non_exhaustive()
    }
}
