//! Field and method lists.
//!
//! Fields and methods share one record shape in a classfile:
//! `u2 access_flags, u2 name_index, u2 descriptor_index, attributes`. The
//! [`MemberListParser`] reads a `u2` count followed by that many records, threading the
//! matching [`AttributeContext`] into the nested attribute parse so the same parser serves
//! both lists.

use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::{
    classfile::attributes::{
        AttributeContext, AttributeFactory, AttributeList, AttributeListParser, AttributeSource,
    },
    file::io::read_be_at,
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access flags of classes, fields and methods.
    ///
    /// The low sixteen bits are shared by the classfile and dex formats; some bits carry a
    /// different meaning depending on whether they are set on a class, a field or a method.
    /// The two high bits only occur in dex images.
    pub struct AccessFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Only accessible from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from the package and subclasses
        const PROTECTED = 0x0004;
        /// Not bound to an instance
        const STATIC = 0x0008;
        /// Not overridable or assignable
        const FINAL = 0x0010;
        /// Method: acquires the monitor around the call
        const SYNCHRONIZED = 0x0020;
        /// Class: `invokespecial` uses modern semantics
        const SUPER = 0x0020;
        /// Field: not cached
        const VOLATILE = 0x0040;
        /// Method: compiler generated bridge
        const BRIDGE = 0x0040;
        /// Field: not serialized
        const TRANSIENT = 0x0080;
        /// Method: variable arity
        const VARARGS = 0x0080;
        /// Method: implemented natively
        const NATIVE = 0x0100;
        /// Class: is an interface
        const INTERFACE = 0x0200;
        /// Class or method: abstract
        const ABSTRACT = 0x0400;
        /// Method: strict floating point
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Class: is an annotation type
        const ANNOTATION = 0x2000;
        /// Class or field: enum type or constant
        const ENUM = 0x4000;
        /// Class: is a module descriptor
        const MODULE = 0x8000;
        /// Dex method: constructor or static initializer
        const CONSTRUCTOR = 0x1_0000;
        /// Dex method: declared `synchronized`
        const DECLARED_SYNCHRONIZED = 0x2_0000;
    }
}

/// Which list a [`MemberListParser`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// The `fields` table
    Field,
    /// The `methods` table
    Method,
}

impl MemberKind {
    fn attribute_context(self) -> AttributeContext {
        match self {
            MemberKind::Field => AttributeContext::Field,
            MemberKind::Method => AttributeContext::Method,
        }
    }

    fn human_name(self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Method => "method",
        }
    }
}

/// A field or method declared by a classfile.
#[derive(Debug, Clone)]
pub struct ClassMember {
    /// Field or method
    pub kind: MemberKind,
    /// Access flags
    pub access_flags: AccessFlags,
    /// Simple name, `<init>` / `<clinit>` for constructors and static initializers
    pub name: Arc<str>,
    /// Field or method descriptor
    pub descriptor: Arc<str>,
    /// Attributes parsed in the matching context
    pub attributes: AttributeList,
}

impl ClassMember {
    /// Returns `true` for instance and class initializers.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        self.kind == MemberKind::Method
            && (self.name.as_ref() == "<init>" || self.name.as_ref() == "<clinit>")
    }
}

impl fmt::Display for ClassMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.descriptor)
    }
}

/// Parser for the `fields` or `methods` table of a classfile.
pub struct MemberListParser<'a> {
    source: AttributeSource<'a>,
    kind: MemberKind,
    offset: usize,
    factory: &'a dyn AttributeFactory,
}

impl<'a> MemberListParser<'a> {
    /// Create a parser for the table whose count starts at `offset`.
    #[must_use]
    pub fn new(
        source: AttributeSource<'a>,
        kind: MemberKind,
        offset: usize,
        factory: &'a dyn AttributeFactory,
    ) -> Self {
        MemberListParser {
            source,
            kind,
            offset,
            factory,
        }
    }

    /// Parse the table, returning its members and the offset just past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] naming the failing `fields[i]` / `methods[i]` entry.
    pub fn parse(&self) -> Result<(Vec<ClassMember>, usize)> {
        let mut at = self.offset;
        let count = read_be_at::<u16>(self.source.data, &mut at).map_err(|e| {
            e.with_context(format!("...while parsing {}s_count", self.kind.human_name()))
        })?;

        let mut members = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let member = self.parse_one(&mut at).map_err(|e| {
                e.with_context(format!(
                    "...while parsing {}s[{i}]",
                    self.kind.human_name()
                ))
            })?;
            members.push(member);
        }

        Ok((members, at))
    }

    fn parse_one(&self, at: &mut usize) -> Result<ClassMember> {
        let access_flags = read_be_at::<u16>(self.source.data, at)?;
        let name_index = read_be_at::<u16>(self.source.data, at)?;
        let descriptor_index = read_be_at::<u16>(self.source.data, at)?;

        let name = self.source.pool.utf8(name_index)?.clone();
        let descriptor = self.source.pool.utf8(descriptor_index)?.clone();

        let (attributes, end) = AttributeListParser::new(
            self.source,
            self.kind.attribute_context(),
            *at,
            self.factory,
        )
        .parse()?;
        *at = end;

        Ok(ClassMember {
            kind: self.kind,
            access_flags: AccessFlags::from_bits_truncate(u32::from(access_flags)),
            name,
            descriptor,
            attributes,
        })
    }
}
