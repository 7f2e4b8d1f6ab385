//! Trampoline generation and binding.
//!
//! Generating a trampoline means deriving the member's [`StubArtifact`] (its id and erased
//! signature), preferably from the disk cache. Binding turns an artifact into a live hook entry:
//! the runtime backs up the original body, the entry is installed in its place, and from then on
//! every invocation is checked against the erased signature and run through the dispatcher.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use log::{debug, warn};

use crate::{
    hook::{
        cache::{ArtifactCache, StubArtifact},
        dispatcher::{dispatch, HookContext},
        member::Member,
        registry::CallbackSet,
        runtime::{MethodEntry, ReplacementRuntime},
        signature::{signature_id, ErasedSignature},
        value::{Throwable, Value},
    },
    Error, Result,
};

/// Where an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Synthesized in this process
    Generated,
    /// Loaded from the disk cache
    Disk,
}

/// Produces [`StubArtifact`]s and binds them to members.
#[derive(Debug, Default)]
pub struct TrampolineGenerator {
    cache: Option<ArtifactCache>,
    generated: AtomicUsize,
    disk_hits: AtomicUsize,
}

impl TrampolineGenerator {
    /// A generator consulting `cache`, if any.
    #[must_use]
    pub fn new(cache: Option<ArtifactCache>) -> Self {
        TrampolineGenerator {
            cache,
            ..TrampolineGenerator::default()
        }
    }

    /// The disk cache, if enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_ref()
    }

    /// Number of artifacts synthesized so far.
    #[must_use]
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    /// Number of artifacts served from disk so far.
    #[must_use]
    pub fn disk_hits(&self) -> usize {
        self.disk_hits.load(Ordering::Relaxed)
    }

    /// The artifact for `member`, loaded from disk when a valid copy exists.
    ///
    /// Freshly generated artifacts are written back to the cache. A failed write is logged and
    /// otherwise ignored; the artifact is still usable from memory.
    pub fn artifact(&self, member: &Member) -> (StubArtifact, ArtifactSource) {
        let id = signature_id(member);
        let signature = ErasedSignature::of(member);

        if let Some(cache) = &self.cache {
            match cache.load(&id) {
                Some(artifact) if artifact.signature == signature => {
                    self.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("trampoline for {member} loaded from {}", cache.dir().display());
                    return (artifact, ArtifactSource::Disk);
                }
                Some(_) => debug!("cached trampoline {id} does not match {member}, regenerating"),
                None => {}
            }
        }

        self.generated.fetch_add(1, Ordering::Relaxed);
        let artifact = StubArtifact { id, signature };
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&artifact) {
                warn!("could not cache trampoline for {member}: {e}");
            }
        }
        (artifact, ArtifactSource::Generated)
    }

    /// Make `artifact` the live entry of `member`.
    ///
    /// # Errors
    /// Returns [`crate::Error::GenerationFailure`] if the runtime can not back up the original
    /// or install the entry.
    pub(crate) fn bind(
        &self,
        member: &Member,
        (artifact, source): (StubArtifact, ArtifactSource),
        runtime: &dyn ReplacementRuntime,
        callbacks: Arc<CallbackSet>,
        disabled: Arc<AtomicBool>,
        log_failures: bool,
    ) -> Result<Trampoline> {
        let backup = runtime.backup(member).map_err(generation_failure)?;
        let ctx = Arc::new(HookContext {
            member: member.clone(),
            backup: backup.clone(),
            callbacks: callbacks.clone(),
            disabled,
            log_failures,
        });

        let signature = artifact.signature.clone();
        let ret = member.return_type().clone();
        let hook: MethodEntry = Arc::new(move |this: Option<&Value>, args: &[Value]| {
            check_call(&ctx.member, &signature, this, args)?;
            let result = dispatch(&ctx, this, args)?;
            result.conform(&ret).map_err(Throwable::from)
        });

        runtime
            .install_replacement(member, hook.clone())
            .map_err(generation_failure)?;

        Ok(Trampoline {
            member: member.clone(),
            artifact,
            source,
            hook,
            backup,
            callbacks,
        })
    }
}

fn generation_failure(error: Error) -> Error {
    match error {
        Error::GenerationFailure(_) => error,
        other => Error::GenerationFailure(other.to_string()),
    }
}

fn check_call(
    member: &Member,
    signature: &ErasedSignature,
    this: Option<&Value>,
    args: &[Value],
) -> std::result::Result<(), Throwable> {
    if signature.receiver && this.map_or(true, Value::is_null) {
        return Err(Throwable::new(
            "java.lang.NullPointerException",
            format!("null receiver for {member}"),
        ));
    }
    if args.len() != signature.arity() {
        return Err(Throwable::illegal_argument(format!(
            "wrong number of arguments for {member}; expected {}, got {}",
            signature.arity(),
            args.len()
        )));
    }
    for (index, (arg, ty)) in args.iter().zip(signature.arguments()).enumerate() {
        if !arg.fits(ty) {
            return Err(Throwable::illegal_argument(format!(
                "argument {index} of {member} is {}, expected {ty}",
                arg.type_name()
            )));
        }
    }
    Ok(())
}

/// A live trampoline: the installed hook entry of one member and its backup.
pub struct Trampoline {
    member: Member,
    artifact: StubArtifact,
    source: ArtifactSource,
    hook: MethodEntry,
    backup: MethodEntry,
    callbacks: Arc<CallbackSet>,
}

impl Trampoline {
    /// The hooked member.
    #[must_use]
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// The signature id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.artifact.id
    }

    /// The erased signature the entry enforces.
    #[must_use]
    pub fn signature(&self) -> &ErasedSignature {
        &self.artifact.signature
    }

    /// Where the artifact came from.
    #[must_use]
    pub fn source(&self) -> ArtifactSource {
        self.source
    }

    /// The callbacks dispatched by this trampoline.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackSet> {
        &self.callbacks
    }

    /// Run the hook entry directly.
    ///
    /// # Errors
    /// Returns the throwable the invocation ends with.
    pub fn invoke_hook(&self, this: Option<&Value>, args: &[Value]) -> std::result::Result<Value, Throwable> {
        (self.hook)(this, args)
    }

    /// Run the original body, bypassing every callback.
    ///
    /// # Errors
    /// Returns whatever the original body throws.
    pub fn invoke_backup(&self, this: Option<&Value>, args: &[Value]) -> std::result::Result<Value, Throwable> {
        (self.backup)(this, args)
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("member", &self.member)
            .field("id", &self.artifact.id)
            .field("source", &self.source)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{registry::CallbackRegistry, HookCallback, MemberFlags, MethodTable};

    fn bound(member: &Member, table: &MethodTable, registry: &CallbackRegistry) -> Trampoline {
        let generator = TrampolineGenerator::new(None);
        generator
            .bind(
                member,
                generator.artifact(member),
                table,
                registry.set_for(member),
                Arc::new(AtomicBool::new(false)),
                false,
            )
            .unwrap()
    }

    #[test]
    fn argument_checks() {
        let table = MethodTable::new();
        let registry = CallbackRegistry::new();
        let member = Member::from_descriptor("a/B", "f", "(ILjava/lang/String;)I", MemberFlags::empty()).unwrap();
        table.define(&member, |_, args| Ok(args[0].clone()));
        let trampoline = bound(&member, &table, &registry);
        let this = Value::object("a/B", ());

        assert_eq!(
            trampoline.invoke_hook(Some(&this), &[Value::Int(4), Value::from("x")]),
            Ok(Value::Int(4))
        );
        assert_eq!(
            trampoline
                .invoke_hook(None, &[Value::Int(4), Value::Null])
                .unwrap_err()
                .class(),
            "java.lang.NullPointerException"
        );
        assert_eq!(
            trampoline
                .invoke_hook(Some(&this), &[Value::Int(4)])
                .unwrap_err()
                .class(),
            "java.lang.IllegalArgumentException"
        );
        assert_eq!(
            trampoline
                .invoke_hook(Some(&this), &[Value::Long(4), Value::Null])
                .unwrap_err()
                .class(),
            "java.lang.IllegalArgumentException"
        );
    }

    #[test]
    fn results_are_unboxed_to_the_declared_type() {
        let table = MethodTable::new();
        let registry = CallbackRegistry::new();
        let member = Member::from_descriptor("a/B", "g", "()I", MemberFlags::STATIC).unwrap();
        table.define(&member, |_, _| Ok(Value::Int(1)));
        let trampoline = bound(&member, &table, &registry);

        registry.register(&member, Arc::new(HookCallback::return_constant("nope")));
        let thrown = trampoline.invoke_hook(None, &[]).unwrap_err();
        assert_eq!(thrown.class(), "java.lang.ClassCastException");
        assert!(table.is_replaced(&member));
        assert_eq!(trampoline.invoke_backup(None, &[]), Ok(Value::Int(1)));
    }

    #[test]
    fn generation_counters() {
        let generator = TrampolineGenerator::new(None);
        let member = Member::from_descriptor("a/B", "g", "()I", MemberFlags::STATIC).unwrap();
        let (artifact, source) = generator.artifact(&member);
        assert_eq!(source, ArtifactSource::Generated);
        assert_eq!(artifact.id, signature_id(&member));
        assert_eq!(generator.generated(), 1);
        assert_eq!(generator.disk_hits(), 0);
    }

    #[test]
    fn unknown_member_fails_to_bind() {
        let table = MethodTable::new();
        let member = Member::from_descriptor("a/B", "h", "()V", MemberFlags::STATIC).unwrap();
        let generator = TrampolineGenerator::new(None);
        let result = generator.bind(
            &member,
            generator.artifact(&member),
            &table,
            CallbackRegistry::new().set_for(&member),
            Arc::new(AtomicBool::new(false)),
            false,
        );
        assert!(matches!(result, Err(Error::GenerationFailure(_))));
    }
}
