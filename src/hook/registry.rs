//! Per-member callback sets.
//!
//! Every hooked [`Member`] owns one [`CallbackSet`]: an immutable, sorted slice behind an
//! `RwLock<Arc<..>>`. Readers clone the `Arc` and walk their private snapshot without holding
//! any lock; writers build a fresh slice and swap it in. A dispatch therefore always sees one
//! consistent list, no matter how many registrations happen while it runs.
//!
//! Order is priority descending, then registration order ascending. The registration sequence
//! is global to the registry, so ties resolve identically for every member.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};

use dashmap::DashMap;

use crate::hook::{callback::HookCallback, member::Member};

/// One registration of a callback.
#[derive(Debug, Clone)]
pub struct CallbackEntry {
    seq: u64,
    callback: Arc<HookCallback>,
}

impl CallbackEntry {
    /// The registered callback.
    #[must_use]
    pub fn callback(&self) -> &Arc<HookCallback> {
        &self.callback
    }

    /// Registration sequence number, unique within the registry.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Shorthand for the callback's priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.callback.priority()
    }
}

/// An immutable view of a member's callbacks in dispatch order.
pub type Snapshot = Arc<[CallbackEntry]>;

/// The copy-on-write callback list of one member.
#[derive(Debug)]
pub struct CallbackSet {
    entries: RwLock<Snapshot>,
}

impl CallbackSet {
    fn new() -> Self {
        CallbackSet {
            entries: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// The current callbacks. Later changes to the set are not reflected.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        read_lock!(self.entries).clone()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.entries).len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, entry: CallbackEntry) {
        let mut entries = write_lock!(self.entries);
        let (priority, seq) = (entry.priority(), entry.seq);
        let position = entries
            .partition_point(|e| e.priority() > priority || (e.priority() == priority && e.seq < seq));
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend_from_slice(&entries[..position]);
        next.push(entry);
        next.extend_from_slice(&entries[position..]);
        *entries = next.into();
    }

    fn remove_where(&self, matches: impl Fn(&CallbackEntry) -> bool) -> bool {
        let mut entries = write_lock!(self.entries);
        let Some(position) = entries.iter().position(matches) else {
            return false;
        };
        let mut next = entries.to_vec();
        next.remove(position);
        *entries = next.into();
        true
    }
}

/// A token removing exactly one registration.
///
/// Unhooking twice is a no-op the second time.
#[derive(Debug, Clone)]
pub struct UnhookHandle {
    member: Member,
    seq: u64,
    callback: Arc<HookCallback>,
    set: Arc<CallbackSet>,
}

impl UnhookHandle {
    /// The member the callback was registered on.
    #[must_use]
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// The registered callback.
    #[must_use]
    pub fn callback(&self) -> &Arc<HookCallback> {
        &self.callback
    }

    /// Remove the registration. Returns `false` if it was already removed.
    pub fn unhook(&self) -> bool {
        let seq = self.seq;
        self.set.remove_where(|e| e.seq == seq)
    }
}

impl PartialEq for UnhookHandle {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && Arc::ptr_eq(&self.set, &other.set)
    }
}

impl Eq for UnhookHandle {}

/// All callback sets of an engine, keyed by member.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    sets: DashMap<Member, Arc<CallbackSet>>,
    seq: AtomicU64,
}

impl CallbackRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        CallbackRegistry::default()
    }

    /// The callback set of `member`, created on first use.
    ///
    /// Trampolines hold on to this set; it stays the same object for the registry's lifetime.
    #[must_use]
    pub(crate) fn set_for(&self, member: &Member) -> Arc<CallbackSet> {
        self.sets
            .entry(member.clone())
            .or_insert_with(|| Arc::new(CallbackSet::new()))
            .clone()
    }

    /// Add `callback` for `member`.
    ///
    /// Registering the same callback twice creates two independent entries. Callers outside
    /// the crate go through [`HookEngine::hook_method`](crate::hook::HookEngine::hook_method),
    /// which validates the member and binds its trampoline first.
    pub(crate) fn register(&self, member: &Member, callback: Arc<HookCallback>) -> UnhookHandle {
        let set = self.set_for(member);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        set.insert(CallbackEntry {
            seq,
            callback: callback.clone(),
        });
        UnhookHandle {
            member: member.clone(),
            seq,
            callback,
            set,
        }
    }

    /// Remove the registration behind `handle`. Returns `false` if it was already removed.
    pub fn unregister(&self, handle: &UnhookHandle) -> bool {
        handle.unhook()
    }

    /// Remove the first registration of `callback` on `member`, by identity.
    pub fn remove_callback(&self, member: &Member, callback: &Arc<HookCallback>) -> bool {
        match self.sets.get(member) {
            Some(set) => set.remove_where(|e| Arc::ptr_eq(&e.callback, callback)),
            None => false,
        }
    }

    /// Drop the set of `member` if nothing is registered in it.
    pub(crate) fn discard_if_empty(&self, member: &Member) {
        self.sets.remove_if(member, |_, set| set.is_empty());
    }

    /// The callbacks of `member` in dispatch order; empty if it was never hooked.
    #[must_use]
    pub fn snapshot(&self, member: &Member) -> Snapshot {
        match self.sets.get(member) {
            Some(set) => set.snapshot(),
            None => Arc::from(Vec::new()),
        }
    }

    /// Number of members with a callback set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Returns `true` if no member was ever registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
