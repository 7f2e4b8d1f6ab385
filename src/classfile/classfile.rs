use std::sync::Arc;

use crate::{
    classfile::{
        attributes::{
            Attribute, AttributeContext, AttributeFactory, AttributeList, AttributeListParser,
            AttributeSource, StdAttributeFactory,
        },
        cstparser::ConstantPoolParser,
        members::{AccessFlags, ClassMember, MemberKind, MemberListParser},
        pool::ConstantPool,
    },
    file::{io::read_be_at, File},
    Result,
};

/// `CA FE BA BE`
pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// A parsed classfile.
///
/// Parsing is eager and all-or-nothing: any structural problem aborts the parse with a
/// [`crate::Error::Parse`] whose breadcrumbs locate the failing element.
///
/// # Examples
///
/// ```rust,no_run
/// use hookscope::classfile::ClassFile;
///
/// let bytes = std::fs::read("Foo.class")?;
/// let class = ClassFile::parse(&bytes)?;
/// for method in class.methods() {
///     println!("{}.{}", class.this_class(), method);
/// }
/// # Ok::<(), hookscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ClassFile {
    minor_version: u16,
    major_version: u16,
    pool: ConstantPool,
    access_flags: AccessFlags,
    this_class: Arc<str>,
    super_class: Option<Arc<str>>,
    interfaces: Vec<Arc<str>>,
    fields: Vec<ClassMember>,
    methods: Vec<ClassMember>,
    attributes: AttributeList,
}

impl ClassFile {
    /// Parse with the [`StdAttributeFactory`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] for malformed or truncated input.
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        Self::parse_with(data, &StdAttributeFactory)
    }

    /// Parse a loaded [`File`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] for malformed or truncated input.
    pub fn from_file(file: &File) -> Result<ClassFile> {
        Self::parse(file.data())
    }

    /// Parse with a caller supplied attribute factory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] for malformed or truncated input.
    pub fn parse_with(data: &[u8], factory: &dyn AttributeFactory) -> Result<ClassFile> {
        Self::parse_inner(data, factory).map_err(|e| e.with_context("...while parsing class file"))
    }

    fn parse_inner(data: &[u8], factory: &dyn AttributeFactory) -> Result<ClassFile> {
        let mut at = 0;
        let magic = read_be_at::<u32>(data, &mut at)?;
        if magic != CLASS_MAGIC {
            return Err(malformed_error!("bad class file magic ({:#010x})", magic));
        }
        let minor_version = read_be_at::<u16>(data, &mut at)?;
        let major_version = read_be_at::<u16>(data, &mut at)?;

        let parser = ConstantPoolParser::new(data)?;
        at = parser.end_offset();
        let pool = parser.parse()?;

        let access_flags = read_be_at::<u16>(data, &mut at)?;
        let this_index = read_be_at::<u16>(data, &mut at)?;
        let super_index = read_be_at::<u16>(data, &mut at)?;

        let this_class = pool.class_name(this_index)?.clone();
        let super_class = match super_index {
            0 => None,
            index => Some(pool.class_name(index)?.clone()),
        };

        let interface_count = read_be_at::<u16>(data, &mut at)?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for i in 0..interface_count {
            let index = read_be_at::<u16>(data, &mut at)?;
            interfaces.push(
                pool.class_name(index)
                    .map_err(|e| e.with_context(format!("...while parsing interfaces[{i}]")))?
                    .clone(),
            );
        }

        let source = AttributeSource { data, pool: &pool };
        let (fields, end) = MemberListParser::new(source, MemberKind::Field, at, factory).parse()?;
        let (methods, end) =
            MemberListParser::new(source, MemberKind::Method, end, factory).parse()?;
        let (attributes, end) =
            AttributeListParser::new(source, AttributeContext::Class, end, factory).parse()?;

        if end != data.len() {
            return Err(malformed_error!(
                "extra bytes at end of class file, at offset {:#010x}",
                end
            ));
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            access_flags: AccessFlags::from_bits_truncate(u32::from(access_flags)),
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
            pool,
        })
    }

    /// Returns `(major, minor)`.
    #[must_use]
    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    /// The resolved constant pool.
    #[must_use]
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// Class access flags.
    #[must_use]
    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    /// Internal name of this class.
    #[must_use]
    pub fn this_class(&self) -> &Arc<str> {
        &self.this_class
    }

    /// Internal name of the superclass, `None` only for `java/lang/Object`.
    #[must_use]
    pub fn super_class(&self) -> Option<&Arc<str>> {
        self.super_class.as_ref()
    }

    /// Directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[Arc<str>] {
        &self.interfaces
    }

    /// Declared fields.
    #[must_use]
    pub fn fields(&self) -> &[ClassMember] {
        &self.fields
    }

    /// Declared methods, including initializers.
    #[must_use]
    pub fn methods(&self) -> &[ClassMember] {
        &self.methods
    }

    /// Class level attributes.
    #[must_use]
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// The `SourceFile` attribute, if any.
    #[must_use]
    pub fn source_file(&self) -> Option<&Arc<str>> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::SourceFile(s) => Some(s),
            _ => None,
        })
    }

    /// Find a method by name and descriptor.
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&ClassMember> {
        self.methods
            .iter()
            .find(|m| m.name.as_ref() == name && m.descriptor.as_ref() == descriptor)
    }

    /// Find a field by name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&ClassMember> {
        self.fields.iter().find(|f| f.name.as_ref() == name)
    }

    /// Returns `true` if the class is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(AccessFlags::INTERFACE)
    }
}
