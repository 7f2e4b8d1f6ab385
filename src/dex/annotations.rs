//! Encoded values and annotations.
//!
//! Annotations and static field initializers are stored as `encoded_value`s: a header byte
//! holding the value type in its low five bits and a size or boolean argument in its high
//! three bits, followed by up to eight little-endian payload bytes. Arrays and nested
//! annotations recurse.

use crate::{file::parser::Parser, Result};

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1A;
const VALUE_ENUM: u8 = 0x1B;
const VALUE_ARRAY: u8 = 0x1C;
const VALUE_ANNOTATION: u8 = 0x1D;
const VALUE_NULL: u8 = 0x1E;
const VALUE_BOOLEAN: u8 = 0x1F;

/// Nesting limit for arrays and annotations inside encoded values.
const MAX_DEPTH: usize = 64;

/// A decoded `encoded_value`.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// Signed byte
    Byte(i8),
    /// Signed short
    Short(i16),
    /// UTF-16 code unit
    Char(u16),
    /// Signed int
    Int(i32),
    /// Signed long
    Long(i64),
    /// Float
    Float(f32),
    /// Double
    Double(f64),
    /// Proto index
    MethodType(u32),
    /// Method handle index
    MethodHandle(u32),
    /// String index
    String(u32),
    /// Type index
    Type(u32),
    /// Field index
    Field(u32),
    /// Method index
    Method(u32),
    /// Field index of an enum constant
    Enum(u32),
    /// Nested array
    Array(Vec<EncodedValue>),
    /// Nested annotation
    Annotation(EncodedAnnotation),
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
}

/// Visibility of an `annotation_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationVisibility {
    /// Only visible at build time
    Build,
    /// Visible at runtime
    Runtime,
    /// Visible to the system only
    System,
}

impl AnnotationVisibility {
    fn from_u8(value: u8) -> Result<AnnotationVisibility> {
        match value {
            0x00 => Ok(AnnotationVisibility::Build),
            0x01 => Ok(AnnotationVisibility::Runtime),
            0x02 => Ok(AnnotationVisibility::System),
            other => Err(malformed_error!("bad annotation visibility {:#04x}", other)),
        }
    }
}

/// One `name = value` pair of an annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationElement {
    /// String index of the element name
    pub name: u32,
    /// The element value
    pub value: EncodedValue,
}

/// An `encoded_annotation`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAnnotation {
    /// Type index of the annotation class
    pub type_idx: u32,
    /// Elements in file order
    pub elements: Vec<AnnotationElement>,
}

/// An `annotation_item`: a visibility plus the encoded annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Visibility
    pub visibility: AnnotationVisibility,
    /// Type index of the annotation class
    pub type_idx: u32,
    /// Elements in file order
    pub elements: Vec<AnnotationElement>,
}

fn read_unsigned(parser: &mut Parser<'_>, size: usize) -> Result<u64> {
    let bytes = parser.read_bytes(size)?;
    Ok(bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (i * 8))))
}

fn read_signed(parser: &mut Parser<'_>, size: usize) -> Result<i64> {
    let raw = read_unsigned(parser, size)?;
    let shift = 64 - size * 8;
    Ok(((raw << shift) as i64) >> shift)
}

/// Floats store their most significant bytes; the missing low bytes are zero.
fn read_right_zero_extended(parser: &mut Parser<'_>, size: usize, width: usize) -> Result<u64> {
    let raw = read_unsigned(parser, size)?;
    Ok(raw << ((width - size) * 8))
}

fn check_size(value_type: u8, size: usize, max: usize) -> Result<usize> {
    if size > max {
        return Err(malformed_error!(
            "encoded value type {:#04x} with size {} (max {})",
            value_type,
            size,
            max
        ));
    }
    Ok(size)
}

/// Read one `encoded_value`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown value types, oversized payloads or nesting
/// beyond a sane depth, and [`crate::Error::OutOfBounds`] on truncated input.
pub fn read_encoded_value(parser: &mut Parser<'_>) -> Result<EncodedValue> {
    read_value(parser, 0)
}

fn read_value(parser: &mut Parser<'_>, depth: usize) -> Result<EncodedValue> {
    if depth > MAX_DEPTH {
        return Err(malformed_error!("encoded values nested too deeply"));
    }

    let header = parser.read_le::<u8>()?;
    let value_type = header & 0x1F;
    let arg = header >> 5;
    let size = usize::from(arg) + 1;

    let value = match value_type {
        VALUE_BYTE => EncodedValue::Byte(read_signed(parser, check_size(value_type, size, 1)?)? as i8),
        VALUE_SHORT => {
            EncodedValue::Short(read_signed(parser, check_size(value_type, size, 2)?)? as i16)
        }
        VALUE_CHAR => {
            EncodedValue::Char(read_unsigned(parser, check_size(value_type, size, 2)?)? as u16)
        }
        VALUE_INT => EncodedValue::Int(read_signed(parser, check_size(value_type, size, 4)?)? as i32),
        VALUE_LONG => EncodedValue::Long(read_signed(parser, check_size(value_type, size, 8)?)?),
        VALUE_FLOAT => {
            let bits = read_right_zero_extended(parser, check_size(value_type, size, 4)?, 4)?;
            EncodedValue::Float(f32::from_bits(bits as u32))
        }
        VALUE_DOUBLE => {
            let bits = read_right_zero_extended(parser, check_size(value_type, size, 8)?, 8)?;
            EncodedValue::Double(f64::from_bits(bits))
        }
        VALUE_METHOD_TYPE | VALUE_METHOD_HANDLE | VALUE_STRING | VALUE_TYPE | VALUE_FIELD
        | VALUE_METHOD | VALUE_ENUM => {
            let index = read_unsigned(parser, check_size(value_type, size, 4)?)? as u32;
            match value_type {
                VALUE_METHOD_TYPE => EncodedValue::MethodType(index),
                VALUE_METHOD_HANDLE => EncodedValue::MethodHandle(index),
                VALUE_STRING => EncodedValue::String(index),
                VALUE_TYPE => EncodedValue::Type(index),
                VALUE_FIELD => EncodedValue::Field(index),
                VALUE_METHOD => EncodedValue::Method(index),
                _ => EncodedValue::Enum(index),
            }
        }
        VALUE_ARRAY => EncodedValue::Array(read_array(parser, depth + 1)?),
        VALUE_ANNOTATION => EncodedValue::Annotation(read_annotation(parser, depth + 1)?),
        VALUE_NULL => EncodedValue::Null,
        VALUE_BOOLEAN => EncodedValue::Boolean(arg == 1),
        other => return Err(malformed_error!("unknown encoded value type {:#04x}", other)),
    };

    Ok(value)
}

/// Read an `encoded_array`.
///
/// # Errors
/// See [`read_encoded_value`].
pub fn read_encoded_array(parser: &mut Parser<'_>) -> Result<Vec<EncodedValue>> {
    read_array(parser, 0)
}

fn read_array(parser: &mut Parser<'_>, depth: usize) -> Result<Vec<EncodedValue>> {
    let size = parser.read_uleb128()?;
    // every value takes at least its header byte
    parser.ensure_remaining(size as usize)?;

    let mut values = Vec::with_capacity(size as usize);
    for _ in 0..size {
        values.push(read_value(parser, depth)?);
    }
    Ok(values)
}

fn read_annotation(parser: &mut Parser<'_>, depth: usize) -> Result<EncodedAnnotation> {
    let type_idx = parser.read_uleb128()?;
    let size = parser.read_uleb128()?;
    parser.ensure_remaining(size as usize)?;

    let mut elements = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let name = parser.read_uleb128()?;
        let value = read_value(parser, depth)?;
        elements.push(AnnotationElement { name, value });
    }

    Ok(EncodedAnnotation { type_idx, elements })
}

/// Read the `annotation_item` at `offset`.
pub(crate) fn read_annotation_item(data: &[u8], offset: u32) -> Result<Annotation> {
    let mut parser = Parser::new_at(data, offset as usize)?;
    let visibility = AnnotationVisibility::from_u8(parser.read_le::<u8>()?)?;
    let EncodedAnnotation { type_idx, elements } = read_annotation(&mut parser, 0)?;
    Ok(Annotation {
        visibility,
        type_idx,
        elements,
    })
}

/// Read the `annotation_set_item` at `offset`, appending every annotation to `table` and
/// returning their positions in it.
pub(crate) fn read_annotation_set(
    data: &[u8],
    offset: u32,
    table: &mut Vec<Annotation>,
) -> Result<Vec<u32>> {
    if offset == 0 {
        return Ok(Vec::new());
    }

    let mut parser = Parser::new_at(data, offset as usize)?;
    let size = parser.read_le::<u32>()?;
    parser.ensure_remaining(size as usize * 4)?;

    let mut indices = Vec::with_capacity(size as usize);
    for i in 0..size {
        let item_off = parser.read_le::<u32>()?;
        let annotation = read_annotation_item(data, item_off)
            .map_err(|e| e.with_context(format!("...while parsing annotation_set[{i}]")))?;
        indices.push(table.len() as u32);
        table.push(annotation);
    }
    Ok(indices)
}

/// Read the `annotation_set_ref_list` at `offset`; one set per parameter.
pub(crate) fn read_annotation_set_ref_list(
    data: &[u8],
    offset: u32,
    table: &mut Vec<Annotation>,
) -> Result<Vec<Vec<u32>>> {
    let mut parser = Parser::new_at(data, offset as usize)?;
    let size = parser.read_le::<u32>()?;
    parser.ensure_remaining(size as usize * 4)?;

    let mut parameters = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let set_off = parser.read_le::<u32>()?;
        parameters.push(read_annotation_set(data, set_off, table)?);
    }
    Ok(parameters)
}
