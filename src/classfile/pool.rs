use std::sync::Arc;

use crate::{
    classfile::constants::{Constant, ConstantRc, MemberRef, NameAndType},
    Result,
};

/// A fully resolved classfile constant pool.
///
/// Slot `0` is reserved and always absent, as is the second slot of every `long` and
/// `double` entry. All other slots hold a resolved [`Constant`]. Indices are stable for the
/// lifetime of the pool.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    slots: Vec<Option<ConstantRc>>,
}

impl ConstantPool {
    pub(crate) fn from_slots(slots: Vec<Option<ConstantRc>>) -> Self {
        ConstantPool { slots }
    }

    /// Returns the `constant_pool_count` value, i.e. one more than the highest valid index.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Returns the constant at `index`, or `None` for index `0`, holes and out of range indices.
    #[must_use]
    pub fn get_or_none(&self, index: u16) -> Option<&ConstantRc> {
        self.slots.get(usize::from(index)).and_then(Option::as_ref)
    }

    /// Returns the constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` does not denote a present constant.
    pub fn get(&self, index: u16) -> Result<&ConstantRc> {
        self.get_or_none(index)
            .ok_or_else(|| malformed_error!("invalid constant pool index {:#06x}", index))
    }

    /// Returns the constant at `index`, treating `0` as "absent".
    ///
    /// Several classfile structures (e.g. `super_class` of `java/lang/Object`, the `catch_type`
    /// of a finally handler) use index `0` to mean "no constant".
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-zero `index` is invalid.
    pub fn get_optional(&self, index: u16) -> Result<Option<&ConstantRc>> {
        if index == 0 {
            return Ok(None);
        }
        self.get(index).map(Some)
    }

    /// Returns the string of the `Utf8` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is absent or not a `Utf8` constant.
    pub fn utf8(&self, index: u16) -> Result<&Arc<str>> {
        match self.get(index)?.as_ref() {
            Constant::Utf8(s) => Ok(s),
            other => Err(malformed_error!(
                "constant {:#06x} is {:?}, expected Utf8",
                index,
                other.tag()
            )),
        }
    }

    /// Returns the internal class name of the `Class` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is absent or not a `Class` constant.
    pub fn class_name(&self, index: u16) -> Result<&Arc<str>> {
        match self.get(index)?.as_ref() {
            Constant::Class(s) => Ok(s),
            other => Err(malformed_error!(
                "constant {:#06x} is {:?}, expected Class",
                index,
                other.tag()
            )),
        }
    }

    /// Returns the `NameAndType` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is absent or of another kind.
    pub fn name_and_type(&self, index: u16) -> Result<&NameAndType> {
        match self.get(index)?.as_ref() {
            Constant::NameAndType(nat) => Ok(nat),
            other => Err(malformed_error!(
                "constant {:#06x} is {:?}, expected NameAndType",
                index,
                other.tag()
            )),
        }
    }

    /// Returns the field or method reference at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is absent or not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<&MemberRef> {
        let constant = self.get(index)?;
        constant.as_member_ref().ok_or_else(|| {
            malformed_error!(
                "constant {:#06x} is {:?}, expected a member reference",
                index,
                constant.tag()
            )
        })
    }

    /// Iterate over all present constants with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantRc)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let constant = slot.as_ref()?;
            u16::try_from(i).ok().map(|i| (i, constant))
        })
    }
}
