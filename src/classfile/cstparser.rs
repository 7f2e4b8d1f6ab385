//! Two-pass constant pool parser.
//!
//! Classfile constants reference each other by index, and nothing in the format requires a
//! referenced entry to appear before the entry referencing it. Parsing therefore happens in
//! two passes:
//!
//! 1. **Pre-parse** walks the byte stream once, recording the start offset of every slot.
//!    Only the entry sizes are needed for that, so no cross references are followed.
//!    `Utf8` entries are decoded right away since every other kind eventually depends on
//!    them. `long` and `double` entries take two slots; the second one stays a hole.
//! 2. **Resolve** decodes each slot on demand and recursively resolves the slots it refers to
//!    first. Every resolved constant is memoized, so each slot is decoded at most once no matter
//!    how many entries point at it.
//!
//! Before following a reference the tag of the target slot is checked against the kinds the
//! referring entry allows. The allowed kinds form an acyclic graph, so a self-referencing or
//! cyclic pool is reported as malformed instead of recursing without bound.
//!
//! Failures carry a breadcrumb trail naming every slot the failure unwound through.
//!
//! # Examples
//!
//! ```rust
//! use hookscope::classfile::ConstantPoolParser;
//!
//! #[rustfmt::skip]
//! let bytes = [
//!     0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34,
//!     0x00, 0x03,                         // constant_pool_count
//!     0x07, 0x00, 0x02,                   // #1 Class -> #2
//!     0x01, 0x00, 0x03, b'F', b'o', b'o', // #2 Utf8 "Foo"
//! ];
//!
//! let parser = ConstantPoolParser::new(&bytes)?;
//! assert_eq!(parser.end_offset(), bytes.len());
//! let pool = parser.parse()?;
//! assert_eq!(pool.class_name(1)?.as_ref(), "Foo");
//! # Ok::<(), hookscope::Error>(())
//! ```

use std::sync::{Arc, OnceLock};

use crate::{
    classfile::{
        constants::{Constant, ConstantRc, ConstantTag, MemberRef, MethodHandleKind, NameAndType},
        pool::ConstantPool,
    },
    file::{io::read_be_at, parser::Parser},
    Result,
};

/// Offset of `constant_pool_count` from the start of a classfile.
const COUNT_OFFSET: usize = 8;
/// Offset of the first constant pool entry from the start of a classfile.
const FIRST_ENTRY_OFFSET: usize = 10;

/// Parser for the constant pool of a classfile.
///
/// Construction runs the pre-parse pass; [`ConstantPoolParser::resolve`] resolves single
/// slots lazily and [`ConstantPoolParser::parse`] resolves everything into a
/// [`ConstantPool`].
pub struct ConstantPoolParser<'a> {
    data: &'a [u8],
    /// Start offset of each slot; `0` marks index 0 and the holes after long/double entries
    offsets: Vec<usize>,
    slots: Vec<OnceLock<ConstantRc>>,
    end_offset: usize,
}

impl<'a> ConstantPoolParser<'a> {
    /// Run the pre-parse pass over the classfile in `data`.
    ///
    /// `data` is the whole classfile starting at the magic number.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] for unknown tags or truncated entries, with a breadcrumb
    /// naming the slot and offset being pre-parsed.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut offset = COUNT_OFFSET;
        let count = usize::from(
            read_be_at::<u16>(data, &mut offset)
                .map_err(|e| e.with_context("...while reading constant_pool_count"))?,
        );

        let mut parser = ConstantPoolParser {
            data,
            offsets: vec![0; count],
            slots: (0..count).map(|_| OnceLock::new()).collect(),
            end_offset: 0,
        };
        parser.determine_offsets()?;
        Ok(parser)
    }

    fn determine_offsets(&mut self) -> Result<()> {
        let mut at = FIRST_ENTRY_OFFSET;
        let mut index = 1;

        while index < self.offsets.len() {
            self.offsets[index] = at;
            let (tag, size) = self.preparse_entry(index, at).map_err(|e| {
                e.with_context(format!(
                    "...while preparsing cst {index:#06x} at offset {at:#010x}"
                ))
            })?;

            at += size;
            index += tag.slots();
        }

        self.end_offset = at;
        Ok(())
    }

    fn preparse_entry(&self, index: usize, at: usize) -> Result<(ConstantTag, usize)> {
        let raw = *self.data.get(at).ok_or(out_of_bounds_error!())?;
        let Some(tag) = ConstantTag::from_u8(raw) else {
            return Err(malformed_error!("unknown tag byte: {:#04x}", raw));
        };

        let size = if tag == ConstantTag::Utf8 {
            let mut parser = Parser::new_at(self.data, at + 1)?;
            let length = usize::from(parser.read_be::<u16>()?);
            let value = parser.read_mutf8(length)?;
            let _ = self.slots[index].set(Arc::new(Constant::Utf8(value.into())));
            3 + length
        } else {
            tag.fixed_size()
        };

        if at + size > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok((tag, size))
    }

    /// Returns the offset of the first byte after the constant pool.
    #[must_use]
    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    /// Returns `constant_pool_count`.
    #[must_use]
    pub fn count(&self) -> usize {
        self.offsets.len()
    }

    /// Resolve the constant at `index`, resolving everything it refers to first.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] if the slot or any slot it depends on is invalid.
    pub fn resolve(&self, index: u16) -> Result<ConstantRc> {
        self.parse0(index)
    }

    /// Resolve every slot and return the finished pool.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] on the first slot that fails to resolve.
    pub fn parse(self) -> Result<ConstantPool> {
        for index in 1..self.offsets.len() {
            if self.offsets[index] != 0 {
                // count is read from a u16, so every index fits
                self.parse0(index as u16)?;
            }
        }

        Ok(ConstantPool::from_slots(
            self.slots.into_iter().map(OnceLock::into_inner).collect(),
        ))
    }

    fn offset_of(&self, index: u16) -> Result<usize> {
        match self.offsets.get(usize::from(index)) {
            Some(&offset) if offset != 0 => Ok(offset),
            _ => Err(malformed_error!("invalid constant pool index {:#06x}", index)),
        }
    }

    fn tag_of(&self, index: u16) -> Result<ConstantTag> {
        let at = self.offset_of(index)?;
        // validated during pre-parse
        ConstantTag::from_u8(self.data[at])
            .ok_or_else(|| malformed_error!("unknown tag byte: {:#04x}", self.data[at]))
    }

    fn parse0(&self, index: u16) -> Result<ConstantRc> {
        let at = self.offset_of(index)?;
        let slot = &self.slots[usize::from(index)];
        if let Some(constant) = slot.get() {
            return Ok(constant.clone());
        }

        let constant = self.decode(at).map_err(|e| {
            e.with_context(format!(
                "...while parsing cst {index:#06x} at offset {at:#010x}"
            ))
        })?;

        Ok(slot.get_or_init(|| Arc::new(constant)).clone())
    }

    /// Resolve `index` after checking that its tag is one of `allowed`.
    fn expect(&self, index: u16, allowed: &[ConstantTag]) -> Result<ConstantRc> {
        let tag = self.tag_of(index)?;
        if !allowed.contains(&tag) {
            return Err(malformed_error!(
                "constant {:#06x} is {:?}, expected one of {:?}",
                index,
                tag,
                allowed
            ));
        }
        self.parse0(index)
    }

    fn expect_utf8(&self, index: u16) -> Result<Arc<str>> {
        match self.expect(index, &[ConstantTag::Utf8])?.as_ref() {
            Constant::Utf8(s) => Ok(s.clone()),
            _ => Err(malformed_error!("constant {:#06x} is not Utf8", index)),
        }
    }

    fn expect_class(&self, index: u16) -> Result<Arc<str>> {
        match self.expect(index, &[ConstantTag::Class])?.as_ref() {
            Constant::Class(s) => Ok(s.clone()),
            _ => Err(malformed_error!("constant {:#06x} is not a Class", index)),
        }
    }

    fn expect_nat(&self, index: u16) -> Result<NameAndType> {
        match self.expect(index, &[ConstantTag::NameAndType])?.as_ref() {
            Constant::NameAndType(nat) => Ok(nat.clone()),
            _ => Err(malformed_error!("constant {:#06x} is not a NameAndType", index)),
        }
    }

    fn member_ref(&self, at: usize) -> Result<MemberRef> {
        let mut offset = at + 1;
        let class_index = read_be_at::<u16>(self.data, &mut offset)?;
        let nat_index = read_be_at::<u16>(self.data, &mut offset)?;

        Ok(MemberRef {
            class: self.expect_class(class_index)?,
            nat: self.expect_nat(nat_index)?,
        })
    }

    fn decode(&self, at: usize) -> Result<Constant> {
        let raw = self.data[at];
        let Some(tag) = ConstantTag::from_u8(raw) else {
            return Err(malformed_error!("unknown tag byte: {:#04x}", raw));
        };

        let mut offset = at + 1;
        let constant = match tag {
            ConstantTag::Utf8 => {
                let mut parser = Parser::new_at(self.data, offset)?;
                let length = usize::from(parser.read_be::<u16>()?);
                Constant::Utf8(parser.read_mutf8(length)?.into())
            }
            ConstantTag::Integer => Constant::Integer(read_be_at::<i32>(self.data, &mut offset)?),
            ConstantTag::Float => Constant::Float(read_be_at::<f32>(self.data, &mut offset)?),
            ConstantTag::Long => Constant::Long(read_be_at::<i64>(self.data, &mut offset)?),
            ConstantTag::Double => Constant::Double(read_be_at::<f64>(self.data, &mut offset)?),
            ConstantTag::Class => {
                let name_index = read_be_at::<u16>(self.data, &mut offset)?;
                Constant::Class(self.expect_utf8(name_index)?)
            }
            ConstantTag::String => {
                let string_index = read_be_at::<u16>(self.data, &mut offset)?;
                Constant::String(self.expect_utf8(string_index)?)
            }
            ConstantTag::FieldRef => Constant::FieldRef(self.member_ref(at)?),
            ConstantTag::MethodRef => Constant::MethodRef(self.member_ref(at)?),
            ConstantTag::InterfaceMethodRef => Constant::InterfaceMethodRef(self.member_ref(at)?),
            ConstantTag::NameAndType => {
                let name_index = read_be_at::<u16>(self.data, &mut offset)?;
                let descriptor_index = read_be_at::<u16>(self.data, &mut offset)?;
                Constant::NameAndType(NameAndType {
                    name: self.expect_utf8(name_index)?,
                    descriptor: self.expect_utf8(descriptor_index)?,
                })
            }
            ConstantTag::MethodHandle => {
                let raw_kind = read_be_at::<u8>(self.data, &mut offset)?;
                let reference_index = read_be_at::<u16>(self.data, &mut offset)?;
                let Some(kind) = MethodHandleKind::from_u8(raw_kind) else {
                    return Err(malformed_error!("Unsupported MethodHandle kind: {}", raw_kind));
                };
                Constant::MethodHandle {
                    kind,
                    reference: self.expect(reference_index, kind.allowed_targets())?,
                }
            }
            ConstantTag::MethodType => {
                let descriptor_index = read_be_at::<u16>(self.data, &mut offset)?;
                Constant::MethodType(self.expect_utf8(descriptor_index)?)
            }
            ConstantTag::InvokeDynamic => {
                let bootstrap_method_index = read_be_at::<u16>(self.data, &mut offset)?;
                let nat_index = read_be_at::<u16>(self.data, &mut offset)?;
                Constant::InvokeDynamic {
                    bootstrap_method_index,
                    nat: self.expect_nat(nat_index)?,
                }
            }
        };

        Ok(constant)
    }
}
