//! The method replacement capability the engine is built on.
//!
//! [`ReplacementRuntime`] is the boundary to whatever executes the hooked code. On a device it
//! rewrites method slots; [`MethodTable`] is an in-process implementation where every member
//! is a Rust closure, used by tests, benches and hosts that embed the engine directly.

use std::{fmt, sync::Arc};

use dashmap::DashMap;

use crate::{
    hook::{
        member::Member,
        value::{Throwable, Value},
    },
    Error, Result,
};

/// A callable method body: `(receiver, arguments) -> result`.
pub type MethodEntry = Arc<dyn Fn(Option<&Value>, &[Value]) -> std::result::Result<Value, Throwable> + Send + Sync>;

/// Redirects members to generated entries.
pub trait ReplacementRuntime: Send + Sync {
    /// A callable that runs `target`'s current, unreplaced body.
    ///
    /// Must stay valid after [`ReplacementRuntime::install_replacement`] for the same target.
    ///
    /// # Errors
    /// Returns [`crate::Error::GenerationFailure`] if the body can not be preserved.
    fn backup(&self, target: &Member) -> Result<MethodEntry>;

    /// Route every future invocation of `target` to `entry`.
    ///
    /// # Errors
    /// Returns [`crate::Error::GenerationFailure`] if the replacement can not be installed.
    fn install_replacement(&self, target: &Member, entry: MethodEntry) -> Result<()>;

    /// Invoke `target` the way an ordinary caller would, replacement included.
    ///
    /// # Errors
    /// Returns whatever the body throws.
    fn invoke(&self, target: &Member, this: Option<&Value>, args: &[Value]) -> std::result::Result<Value, Throwable>;
}

struct Slot {
    original: MethodEntry,
    current: MethodEntry,
}

/// An in-process [`ReplacementRuntime`]: a table of closures keyed by member.
///
/// # Examples
///
/// ```rust
/// use hookscope::hook::{Member, MemberFlags, MethodTable, ReplacementRuntime, Value};
///
/// let table = MethodTable::new();
/// let add = Member::from_descriptor("Calc", "add", "(II)I", MemberFlags::STATIC)?;
/// table.define(&add, |_, args| {
///     Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
/// });
/// assert_eq!(table.invoke(&add, None, &[Value::Int(2), Value::Int(3)]), Ok(Value::Int(5)));
/// # Ok::<(), hookscope::Error>(())
/// ```
#[derive(Default)]
pub struct MethodTable {
    slots: DashMap<Member, Slot>,
}

impl MethodTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        MethodTable::default()
    }

    /// Define (or redefine) the body of `member`, dropping any installed replacement.
    pub fn define<F>(&self, member: &Member, body: F)
    where
        F: Fn(Option<&Value>, &[Value]) -> std::result::Result<Value, Throwable> + Send + Sync + 'static,
    {
        let body: MethodEntry = Arc::new(body);
        self.slots.insert(
            member.clone(),
            Slot {
                original: body.clone(),
                current: body,
            },
        );
    }

    /// Returns `true` if `member` currently runs a replacement.
    #[must_use]
    pub fn is_replaced(&self, member: &Member) -> bool {
        self.slots
            .get(member)
            .is_some_and(|slot| !Arc::ptr_eq(&slot.original, &slot.current))
    }

    fn missing(member: &Member) -> Error {
        Error::GenerationFailure(format!("no body defined for {member}"))
    }
}

impl ReplacementRuntime for MethodTable {
    fn backup(&self, target: &Member) -> Result<MethodEntry> {
        let slot = self.slots.get(target).ok_or_else(|| Self::missing(target))?;
        let original = slot.original.clone();
        Ok(Arc::new(move |this: Option<&Value>, args: &[Value]| {
            original(this, args)
        }))
    }

    fn install_replacement(&self, target: &Member, entry: MethodEntry) -> Result<()> {
        let mut slot = self
            .slots
            .get_mut(target)
            .ok_or_else(|| Self::missing(target))?;
        slot.current = entry;
        Ok(())
    }

    fn invoke(&self, target: &Member, this: Option<&Value>, args: &[Value]) -> std::result::Result<Value, Throwable> {
        // release the shard lock before running the body, which may call back into the table
        let entry = match self.slots.get(target) {
            Some(slot) => slot.current.clone(),
            None => {
                return Err(Throwable::new(
                    "java.lang.NoSuchMethodError",
                    target.to_string(),
                ))
            }
        };
        entry(this, args)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("members", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::MemberFlags;

    #[test]
    fn replacement_keeps_backup() {
        let table = MethodTable::new();
        let member = Member::from_descriptor("A", "f", "()I", MemberFlags::STATIC).unwrap();
        table.define(&member, |_, _| Ok(Value::Int(1)));

        let backup = table.backup(&member).unwrap();
        table
            .install_replacement(&member, Arc::new(|_: Option<&Value>, _: &[Value]| Ok(Value::Int(2))))
            .unwrap();

        assert!(table.is_replaced(&member));
        assert_eq!(table.invoke(&member, None, &[]), Ok(Value::Int(2)));
        assert_eq!(backup(None, &[]), Ok(Value::Int(1)));
    }

    #[test]
    fn unknown_members() {
        let table = MethodTable::new();
        let member = Member::from_descriptor("A", "g", "()V", MemberFlags::STATIC).unwrap();
        assert!(matches!(table.backup(&member), Err(Error::GenerationFailure(_))));
        assert_eq!(
            table.invoke(&member, None, &[]).unwrap_err().class(),
            "java.lang.NoSuchMethodError"
        );
    }

    #[test]
    fn reentrant_bodies() {
        let table = Arc::new(MethodTable::new());
        let inner = Member::from_descriptor("A", "inner", "()I", MemberFlags::STATIC).unwrap();
        let outer = Member::from_descriptor("A", "outer", "()I", MemberFlags::STATIC).unwrap();
        table.define(&inner, |_, _| Ok(Value::Int(4)));

        let weak = Arc::downgrade(&table);
        let target = inner.clone();
        table.define(&outer, move |this, args| match weak.upgrade() {
            Some(table) => table.invoke(&target, this, args),
            None => Ok(Value::Null),
        });
        assert_eq!(table.invoke(&outer, None, &[]), Ok(Value::Int(4)));
    }
}
