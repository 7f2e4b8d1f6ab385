//! Class definitions, class data and annotation directories.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{OnceLock, Weak},
};

use crate::{
    classfile::AccessFlags,
    dex::{
        annotations::{
            read_annotation_set, read_annotation_set_ref_list, read_encoded_array, Annotation,
            EncodedValue,
        },
        code::MethodBody,
        header::{DexHeader, NO_INDEX},
        ids::read_type_list,
        session::Session,
    },
    file::parser::Parser,
    Error, Result,
};

/// The fixed part of a `code_item` plus the location of its instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem {
    /// Number of registers
    pub registers_size: u16,
    /// Number of argument words
    pub ins_size: u16,
    /// Outgoing argument words needed for calls
    pub outs_size: u16,
    /// Number of `try_item`s
    pub tries_size: u16,
    /// Offset of the debug info, `0` if absent
    pub debug_info_off: u32,
    /// Byte range of the `insns` array within the image
    pub insns: Range<usize>,
}

impl CodeItem {
    fn parse(data: &[u8], offset: u32) -> Result<CodeItem> {
        let mut parser = Parser::new_at(data, offset as usize)?;
        let registers_size = parser.read_le::<u16>()?;
        let ins_size = parser.read_le::<u16>()?;
        let outs_size = parser.read_le::<u16>()?;
        let tries_size = parser.read_le::<u16>()?;
        let debug_info_off = parser.read_le::<u32>()?;
        let insns_size = parser.read_le::<u32>()? as usize;

        let start = parser.pos();
        let end = parser.calc_end_position(insns_size * 2)?;
        Ok(CodeItem {
            registers_size,
            ins_size,
            outs_size,
            tries_size,
            debug_info_off,
            insns: start..end,
        })
    }

    /// Number of 16-bit code units.
    #[must_use]
    pub fn insns_size(&self) -> usize {
        self.insns.len() / 2
    }
}

/// A field declared in `class_data_item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField {
    /// Index into the field id table
    pub field_idx: u32,
    /// Access flags
    pub access_flags: AccessFlags,
    /// Positions in [`crate::dex::DexParser::annotations`]
    pub annotations: Vec<u32>,
}

/// A method declared in `class_data_item`.
///
/// The structural part is decoded when the session opens. The instruction summary is
/// decoded on first request through the session's [`crate::dex::CodeDecoder`] and memoized;
/// every later request returns the same [`MethodBody`].
#[derive(Debug)]
pub struct EncodedMethod {
    /// Index into the method id table
    pub method_idx: u32,
    /// Access flags
    pub access_flags: AccessFlags,
    /// The code item, `None` for abstract and native methods
    pub code: Option<CodeItem>,
    /// Positions in [`crate::dex::DexParser::annotations`]
    pub annotations: Vec<u32>,
    /// Per parameter positions in [`crate::dex::DexParser::annotations`]
    pub parameter_annotations: Vec<Vec<u32>>,
    body: OnceLock<MethodBody>,
    session: Weak<Session>,
}

impl EncodedMethod {
    /// The decoded instruction summary. Methods without code have an empty body.
    ///
    /// Safe to call from many threads; the decoder runs at most once per method.
    ///
    /// # Errors
    /// Returns [`crate::Error::SessionClosed`] once the owning session has been closed.
    pub fn body(&self) -> Result<&MethodBody> {
        let session = self.session.upgrade().ok_or(Error::SessionClosed)?;
        let image = read_lock!(session.image);
        let Some(file) = image.as_ref() else {
            return Err(Error::SessionClosed);
        };

        Ok(self.body.get_or_init(|| match &self.code {
            Some(code) => {
                let insns = file.data().get(code.insns.clone()).unwrap_or_default();
                session.decoder.decode(insns)
            }
            None => MethodBody::default(),
        }))
    }

    /// Opcodes in stream order.
    ///
    /// # Errors
    /// See [`EncodedMethod::body`].
    pub fn opcodes(&self) -> Result<&[u8]> {
        Ok(&self.body()?.opcodes)
    }

    /// Method indices invoked by this method.
    ///
    /// # Errors
    /// See [`EncodedMethod::body`].
    pub fn invoked_methods(&self) -> Result<&[u32]> {
        Ok(&self.body()?.invoked_methods)
    }

    /// Field indices read by this method.
    ///
    /// # Errors
    /// See [`EncodedMethod::body`].
    pub fn accessed_fields(&self) -> Result<&[u32]> {
        Ok(&self.body()?.accessed_fields)
    }

    /// Field indices written by this method.
    ///
    /// # Errors
    /// See [`EncodedMethod::body`].
    pub fn assigned_fields(&self) -> Result<&[u32]> {
        Ok(&self.body()?.assigned_fields)
    }

    /// String indices loaded by this method.
    ///
    /// # Errors
    /// See [`EncodedMethod::body`].
    pub fn referred_strings(&self) -> Result<&[u32]> {
        Ok(&self.body()?.referred_strings)
    }

    /// Returns `true` once the body has been decoded.
    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.body.get().is_some()
    }
}

/// A `class_def_item` with its class data resolved.
#[derive(Debug)]
pub struct ClassDef {
    /// Type index of this class
    pub class_idx: u32,
    /// Access flags
    pub access_flags: AccessFlags,
    /// Type index of the superclass, `None` for `java.lang.Object`
    pub superclass_idx: Option<u32>,
    /// Type indices of the implemented interfaces
    pub interfaces: Vec<u32>,
    /// String index of the source file name
    pub source_file_idx: Option<u32>,
    /// Static fields
    pub static_fields: Vec<EncodedField>,
    /// Instance fields
    pub instance_fields: Vec<EncodedField>,
    /// Static, private and constructor methods
    pub direct_methods: Vec<EncodedMethod>,
    /// Overridable methods
    pub virtual_methods: Vec<EncodedMethod>,
    /// Class level annotations, positions in [`crate::dex::DexParser::annotations`]
    pub annotations: Vec<u32>,
    /// Initial values of the static fields
    pub static_values: Vec<EncodedValue>,
}

impl ClassDef {
    /// Static then instance fields.
    pub fn fields(&self) -> impl Iterator<Item = &EncodedField> {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    /// Direct then virtual methods.
    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }
}

/// Table sizes needed to validate indices found in class data.
#[derive(Clone, Copy)]
pub(crate) struct Limits {
    pub strings: usize,
    pub types: usize,
    pub fields: usize,
    pub methods: usize,
}

#[derive(Default)]
struct AnnotationDirectory {
    class: Vec<u32>,
    fields: HashMap<u32, Vec<u32>>,
    methods: HashMap<u32, Vec<u32>>,
    parameters: HashMap<u32, Vec<Vec<u32>>>,
}

fn optional_index(index: u32, limit: usize, kind: &str) -> Result<Option<u32>> {
    match index {
        NO_INDEX => Ok(None),
        index if (index as usize) < limit => Ok(Some(index)),
        index => Err(malformed_error!("{} index {:#x} out of range", kind, index)),
    }
}

pub(crate) fn parse_class_defs(
    data: &[u8],
    header: &DexHeader,
    limits: Limits,
    include_annotations: bool,
    table: &mut Vec<Annotation>,
    session: &Weak<Session>,
) -> Result<Vec<ClassDef>> {
    let mut parser = Parser::new_at(data, header.class_defs_off as usize)?;
    let mut classes = Vec::with_capacity(header.class_defs_size as usize);

    for i in 0..header.class_defs_size {
        let class = parse_class_def(
            &mut parser,
            data,
            limits,
            include_annotations,
            table,
            session,
        )
        .map_err(|e| e.with_context(format!("...while parsing class_defs[{i}]")))?;
        classes.push(class);
    }

    Ok(classes)
}

fn parse_class_def(
    parser: &mut Parser<'_>,
    data: &[u8],
    limits: Limits,
    include_annotations: bool,
    table: &mut Vec<Annotation>,
    session: &Weak<Session>,
) -> Result<ClassDef> {
    let class_idx = parser.read_le::<u32>()?;
    let access_flags = parser.read_le::<u32>()?;
    let superclass_idx = parser.read_le::<u32>()?;
    let interfaces_off = parser.read_le::<u32>()?;
    let source_file_idx = parser.read_le::<u32>()?;
    let annotations_off = parser.read_le::<u32>()?;
    let class_data_off = parser.read_le::<u32>()?;
    let static_values_off = parser.read_le::<u32>()?;

    if class_idx as usize >= limits.types {
        return Err(malformed_error!("class index {:#x} out of range", class_idx));
    }

    let directory = if include_annotations && annotations_off != 0 {
        parse_annotation_directory(data, annotations_off, table)
            .map_err(|e| e.with_context("...while parsing annotations_directory"))?
    } else {
        AnnotationDirectory::default()
    };

    let mut class = ClassDef {
        class_idx,
        access_flags: AccessFlags::from_bits_truncate(access_flags),
        superclass_idx: optional_index(superclass_idx, limits.types, "superclass")?,
        interfaces: read_type_list(data, interfaces_off, limits.types)?,
        source_file_idx: optional_index(source_file_idx, limits.strings, "source file")?,
        static_fields: Vec::new(),
        instance_fields: Vec::new(),
        direct_methods: Vec::new(),
        virtual_methods: Vec::new(),
        annotations: directory.class.clone(),
        static_values: Vec::new(),
    };

    if class_data_off != 0 {
        parse_class_data(data, class_data_off, limits, &directory, session, &mut class)
            .map_err(|e| e.with_context("...while parsing class_data"))?;
    }

    if static_values_off != 0 {
        let mut values = Parser::new_at(data, static_values_off as usize)?;
        class.static_values = read_encoded_array(&mut values)
            .map_err(|e| e.with_context("...while parsing static_values"))?;
    }

    Ok(class)
}

fn parse_annotation_directory(
    data: &[u8],
    offset: u32,
    table: &mut Vec<Annotation>,
) -> Result<AnnotationDirectory> {
    let mut parser = Parser::new_at(data, offset as usize)?;
    let class_annotations_off = parser.read_le::<u32>()?;
    let fields_size = parser.read_le::<u32>()?;
    let methods_size = parser.read_le::<u32>()?;
    let parameters_size = parser.read_le::<u32>()?;
    parser.ensure_remaining((fields_size as usize + methods_size as usize + parameters_size as usize) * 8)?;

    let mut directory = AnnotationDirectory {
        class: read_annotation_set(data, class_annotations_off, table)?,
        ..AnnotationDirectory::default()
    };

    for _ in 0..fields_size {
        let field_idx = parser.read_le::<u32>()?;
        let set_off = parser.read_le::<u32>()?;
        let indices = read_annotation_set(data, set_off, table)?;
        directory.fields.entry(field_idx).or_default().extend(indices);
    }
    for _ in 0..methods_size {
        let method_idx = parser.read_le::<u32>()?;
        let set_off = parser.read_le::<u32>()?;
        let indices = read_annotation_set(data, set_off, table)?;
        directory.methods.entry(method_idx).or_default().extend(indices);
    }
    for _ in 0..parameters_size {
        let method_idx = parser.read_le::<u32>()?;
        let list_off = parser.read_le::<u32>()?;
        let parameters = read_annotation_set_ref_list(data, list_off, table)?;
        directory.parameters.insert(method_idx, parameters);
    }

    Ok(directory)
}

fn parse_class_data(
    data: &[u8],
    offset: u32,
    limits: Limits,
    directory: &AnnotationDirectory,
    session: &Weak<Session>,
    class: &mut ClassDef,
) -> Result<()> {
    let mut parser = Parser::new_at(data, offset as usize)?;
    let static_fields_size = parser.read_uleb128()?;
    let instance_fields_size = parser.read_uleb128()?;
    let direct_methods_size = parser.read_uleb128()?;
    let virtual_methods_size = parser.read_uleb128()?;

    // each encoded member takes at least two bytes
    parser.ensure_remaining(
        (static_fields_size as usize + instance_fields_size as usize) * 2
            + (direct_methods_size as usize + virtual_methods_size as usize) * 3,
    )?;

    class.static_fields = parse_fields(&mut parser, static_fields_size, limits, directory)?;
    class.instance_fields = parse_fields(&mut parser, instance_fields_size, limits, directory)?;
    class.direct_methods =
        parse_methods(&mut parser, data, direct_methods_size, limits, directory, session)?;
    class.virtual_methods =
        parse_methods(&mut parser, data, virtual_methods_size, limits, directory, session)?;
    Ok(())
}

fn parse_fields(
    parser: &mut Parser<'_>,
    count: u32,
    limits: Limits,
    directory: &AnnotationDirectory,
) -> Result<Vec<EncodedField>> {
    let mut fields = Vec::with_capacity(count as usize);
    let mut field_idx = 0u32;

    for _ in 0..count {
        field_idx = field_idx
            .checked_add(parser.read_uleb128()?)
            .ok_or_else(|| malformed_error!("field index overflow"))?;
        if field_idx as usize >= limits.fields {
            return Err(malformed_error!("field index {:#x} out of range", field_idx));
        }
        let access_flags = parser.read_uleb128()?;

        fields.push(EncodedField {
            field_idx,
            access_flags: AccessFlags::from_bits_truncate(access_flags),
            annotations: directory.fields.get(&field_idx).cloned().unwrap_or_default(),
        });
    }

    Ok(fields)
}

fn parse_methods(
    parser: &mut Parser<'_>,
    data: &[u8],
    count: u32,
    limits: Limits,
    directory: &AnnotationDirectory,
    session: &Weak<Session>,
) -> Result<Vec<EncodedMethod>> {
    let mut methods = Vec::with_capacity(count as usize);
    let mut method_idx = 0u32;

    for _ in 0..count {
        method_idx = method_idx
            .checked_add(parser.read_uleb128()?)
            .ok_or_else(|| malformed_error!("method index overflow"))?;
        if method_idx as usize >= limits.methods {
            return Err(malformed_error!("method index {:#x} out of range", method_idx));
        }
        let access_flags = parser.read_uleb128()?;
        let code_off = parser.read_uleb128()?;

        let code = match code_off {
            0 => None,
            offset => Some(CodeItem::parse(data, offset).map_err(|e| {
                e.with_context(format!("...while parsing code_item of method {method_idx:#x}"))
            })?),
        };

        methods.push(EncodedMethod {
            method_idx,
            access_flags: AccessFlags::from_bits_truncate(access_flags),
            code,
            annotations: directory.methods.get(&method_idx).cloned().unwrap_or_default(),
            parameter_annotations: directory
                .parameters
                .get(&method_idx)
                .cloned()
                .unwrap_or_default(),
            body: OnceLock::new(),
            session: session.clone(),
        });
    }

    Ok(methods)
}
