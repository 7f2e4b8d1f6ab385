//! Classfile attributes.
//!
//! Attributes hang off the class itself, its fields, its methods and the `Code` attribute of a
//! method. Which attributes are meaningful depends on where they appear, so every parse runs in
//! an [`AttributeContext`].
//!
//! Recognition is pluggable: an [`AttributeFactory`] decides which names it understands, and
//! anything it does not recognize degrades to a [`RawAttribute`] holding the uninterpreted
//! payload. [`StdAttributeFactory`] recognizes the standard set needed to locate hook targets:
//!
//! | Context | Recognized |
//! |---------|------------|
//! | class   | `SourceFile`, `Signature`, `Deprecated`, `Synthetic` |
//! | field   | `ConstantValue`, `Signature`, `Deprecated`, `Synthetic` |
//! | method  | `Code`, `Exceptions`, `Signature`, `Deprecated`, `Synthetic` |
//! | code    | `LineNumberTable` |
//!
//! [`RawAttributeFactory`] recognizes nothing and is useful when only the structure of a class
//! matters.

mod parser;

pub use parser::AttributeListParser;

use std::sync::Arc;

use crate::{
    classfile::{constants::ConstantRc, pool::ConstantPool},
    file::io::read_be_at,
    Result,
};

/// Where an attribute list appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeContext {
    /// The attributes of the class itself
    Class,
    /// The attributes of a field
    Field,
    /// The attributes of a method
    Method,
    /// The attributes nested inside a `Code` attribute
    Code,
}

/// The inputs every attribute parse needs: the classfile bytes and its resolved pool.
#[derive(Clone, Copy)]
pub struct AttributeSource<'a> {
    /// The complete classfile
    pub data: &'a [u8],
    /// The resolved constant pool of that classfile
    pub pool: &'a ConstantPool,
}

/// An attribute whose contents were not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Attribute name
    pub name: Arc<str>,
    /// Offset of the payload (after the six byte header) within the classfile
    pub offset: usize,
    /// The payload bytes
    pub data: Vec<u8>,
}

/// One entry of a `Code` attribute's exception table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First covered bytecode offset (inclusive)
    pub start_pc: u16,
    /// Last covered bytecode offset (exclusive)
    pub end_pc: u16,
    /// Handler entry offset
    pub handler_pc: u16,
    /// Caught class, `None` for a catch-all (`finally`) handler
    pub catch_type: Option<Arc<str>>,
}

/// One entry of a `LineNumberTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// Bytecode offset where the line starts
    pub start_pc: u16,
    /// Source line
    pub line_number: u16,
}

/// A parsed `Code` attribute.
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Exception handlers in declaration order
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes, parsed in [`AttributeContext::Code`]
    pub attributes: AttributeList,
}

/// A classfile attribute.
#[derive(Debug, Clone)]
pub enum Attribute {
    /// `ConstantValue` of a static field
    ConstantValue(ConstantRc),
    /// `Code` of a method
    Code(CodeAttribute),
    /// Checked exceptions declared by a method
    Exceptions(Vec<Arc<str>>),
    /// Name of the source file
    SourceFile(Arc<str>),
    /// Generic signature
    Signature(Arc<str>),
    /// `Deprecated` marker
    Deprecated,
    /// `Synthetic` marker
    Synthetic,
    /// Bytecode offset to source line mapping
    LineNumberTable(Vec<LineNumber>),
    /// Anything the factory did not recognize
    Raw(RawAttribute),
}

impl Attribute {
    /// The attribute's name as it appears in the classfile.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Attribute::ConstantValue(_) => "ConstantValue",
            Attribute::Code(_) => "Code",
            Attribute::Exceptions(_) => "Exceptions",
            Attribute::SourceFile(_) => "SourceFile",
            Attribute::Signature(_) => "Signature",
            Attribute::Deprecated => "Deprecated",
            Attribute::Synthetic => "Synthetic",
            Attribute::LineNumberTable(_) => "LineNumberTable",
            Attribute::Raw(raw) => &raw.name,
        }
    }
}

/// An ordered, immutable list of attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeList {
    attributes: Vec<Attribute>,
}

impl AttributeList {
    pub(crate) fn new(attributes: Vec<Attribute>) -> Self {
        AttributeList { attributes }
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns `true` if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate in classfile order.
    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    /// First attribute named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    /// The `Code` attribute, if present.
    #[must_use]
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    /// The generic signature, if present.
    #[must_use]
    pub fn signature(&self) -> Option<&Arc<str>> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Signature(s) => Some(s),
            _ => None,
        })
    }

    /// Returns `true` if a `Synthetic` marker is present.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, Attribute::Synthetic))
    }
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

/// Turns one attribute payload into an [`Attribute`].
///
/// Implementors override [`AttributeFactory::parse_known`]; the provided
/// [`AttributeFactory::parse`] falls back to a [`RawAttribute`] for every name the
/// implementation does not recognize.
pub trait AttributeFactory: Send + Sync {
    /// Parse the payload at `offset..offset + length` if `name` is recognized in `context`.
    ///
    /// Returning `Ok(None)` means "not recognized" and produces a raw attribute.
    ///
    /// # Errors
    /// Returns an error if the attribute is recognized but its payload is malformed.
    fn parse_known(
        &self,
        source: &AttributeSource<'_>,
        context: AttributeContext,
        name: &str,
        offset: usize,
        length: usize,
    ) -> Result<Option<Attribute>>;

    /// Parse one attribute payload, degrading unknown names to [`Attribute::Raw`].
    ///
    /// # Errors
    /// Returns an error if the payload range lies outside the classfile or a recognized
    /// attribute is malformed.
    fn parse(
        &self,
        source: &AttributeSource<'_>,
        context: AttributeContext,
        name: &Arc<str>,
        offset: usize,
        length: usize,
    ) -> Result<Attribute> {
        let end = offset.checked_add(length).ok_or(out_of_bounds_error!())?;
        let Some(payload) = source.data.get(offset..end) else {
            return Err(out_of_bounds_error!());
        };

        match self.parse_known(source, context, name, offset, length)? {
            Some(attribute) => Ok(attribute),
            None => Ok(Attribute::Raw(RawAttribute {
                name: name.clone(),
                offset,
                data: payload.to_vec(),
            })),
        }
    }
}

/// A factory which recognizes nothing; every attribute becomes [`Attribute::Raw`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RawAttributeFactory;

impl AttributeFactory for RawAttributeFactory {
    fn parse_known(
        &self,
        _source: &AttributeSource<'_>,
        _context: AttributeContext,
        _name: &str,
        _offset: usize,
        _length: usize,
    ) -> Result<Option<Attribute>> {
        Ok(None)
    }
}

/// The standard attribute factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdAttributeFactory;

impl StdAttributeFactory {
    fn expect_length(name: &str, length: usize, expected: usize) -> Result<()> {
        if length != expected {
            return Err(malformed_error!(
                "bad attribute length; expected length {:#010x} for {}, found {:#010x}",
                expected,
                name,
                length
            ));
        }
        Ok(())
    }

    fn utf8_attribute(source: &AttributeSource<'_>, name: &str, offset: usize, length: usize) -> Result<Arc<str>> {
        Self::expect_length(name, length, 2)?;
        let mut at = offset;
        let index = read_be_at::<u16>(source.data, &mut at)?;
        Ok(source.pool.utf8(index)?.clone())
    }

    fn constant_value(source: &AttributeSource<'_>, offset: usize, length: usize) -> Result<Attribute> {
        Self::expect_length("ConstantValue", length, 2)?;
        let mut at = offset;
        let index = read_be_at::<u16>(source.data, &mut at)?;
        Ok(Attribute::ConstantValue(source.pool.get(index)?.clone()))
    }

    fn exceptions(source: &AttributeSource<'_>, offset: usize, length: usize) -> Result<Attribute> {
        let mut at = offset;
        let count = usize::from(read_be_at::<u16>(source.data, &mut at)?);
        Self::expect_length("Exceptions", length, 2 + count * 2)?;

        let mut classes = Vec::with_capacity(count);
        for _ in 0..count {
            let index = read_be_at::<u16>(source.data, &mut at)?;
            classes.push(source.pool.class_name(index)?.clone());
        }
        Ok(Attribute::Exceptions(classes))
    }

    fn line_number_table(source: &AttributeSource<'_>, offset: usize, length: usize) -> Result<Attribute> {
        let mut at = offset;
        let count = usize::from(read_be_at::<u16>(source.data, &mut at)?);
        Self::expect_length("LineNumberTable", length, 2 + count * 4)?;

        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(LineNumber {
                start_pc: read_be_at::<u16>(source.data, &mut at)?,
                line_number: read_be_at::<u16>(source.data, &mut at)?,
            });
        }
        Ok(Attribute::LineNumberTable(lines))
    }

    fn exception_handler(source: &AttributeSource<'_>, at: &mut usize) -> Result<ExceptionHandler> {
        let start_pc = read_be_at::<u16>(source.data, at)?;
        let end_pc = read_be_at::<u16>(source.data, at)?;
        let handler_pc = read_be_at::<u16>(source.data, at)?;
        let catch_type = match read_be_at::<u16>(source.data, at)? {
            0 => None,
            index => Some(source.pool.class_name(index)?.clone()),
        };

        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        })
    }

    fn code(&self, source: &AttributeSource<'_>, offset: usize, length: usize) -> Result<Attribute> {
        let mut at = offset;
        let max_stack = read_be_at::<u16>(source.data, &mut at)?;
        let max_locals = read_be_at::<u16>(source.data, &mut at)?;
        let code_length = read_be_at::<u32>(source.data, &mut at)? as usize;
        if code_length == 0 {
            return Err(malformed_error!("code_length == 0"));
        }

        let code = source
            .data
            .get(at..at + code_length)
            .ok_or(out_of_bounds_error!())?
            .to_vec();
        at += code_length;

        let table_length = usize::from(read_be_at::<u16>(source.data, &mut at)?);
        let mut exception_table = Vec::with_capacity(table_length);
        for i in 0..table_length {
            let handler = Self::exception_handler(source, &mut at)
                .map_err(|e| e.with_context(format!("...while parsing exception_table[{i}]")))?;
            exception_table.push(handler);
        }

        let (attributes, end) =
            AttributeListParser::new(*source, AttributeContext::Code, at, self).parse()?;
        if end - offset != length {
            return Err(malformed_error!(
                "bad attribute length; expected length {:#010x} for Code, found {:#010x}",
                end - offset,
                length
            ));
        }

        Ok(Attribute::Code(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        }))
    }
}

impl AttributeFactory for StdAttributeFactory {
    fn parse_known(
        &self,
        source: &AttributeSource<'_>,
        context: AttributeContext,
        name: &str,
        offset: usize,
        length: usize,
    ) -> Result<Option<Attribute>> {
        let attribute = match (context, name) {
            (
                AttributeContext::Class | AttributeContext::Field | AttributeContext::Method,
                "Deprecated",
            ) => {
                Self::expect_length(name, length, 0)?;
                Attribute::Deprecated
            }
            (
                AttributeContext::Class | AttributeContext::Field | AttributeContext::Method,
                "Synthetic",
            ) => {
                Self::expect_length(name, length, 0)?;
                Attribute::Synthetic
            }
            (
                AttributeContext::Class | AttributeContext::Field | AttributeContext::Method,
                "Signature",
            ) => Attribute::Signature(Self::utf8_attribute(source, name, offset, length)?),
            (AttributeContext::Class, "SourceFile") => {
                Attribute::SourceFile(Self::utf8_attribute(source, name, offset, length)?)
            }
            (AttributeContext::Field, "ConstantValue") => {
                Self::constant_value(source, offset, length)?
            }
            (AttributeContext::Method, "Code") => self.code(source, offset, length)?,
            (AttributeContext::Method, "Exceptions") => Self::exceptions(source, offset, length)?,
            (AttributeContext::Code, "LineNumberTable") => {
                Self::line_number_table(source, offset, length)?
            }
            _ => return Ok(None),
        };

        Ok(Some(attribute))
    }
}
