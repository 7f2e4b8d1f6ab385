//! Dex id tables.
//!
//! Every table is a run of fixed-size records starting at the offset the header names, so
//! they are decoded eagerly in one pass. Records keep raw indices into the other tables;
//! the [`crate::dex::DexParser`] resolves them on request.

use std::sync::Arc;

use crate::{
    dex::header::DexHeader,
    file::parser::Parser,
    Result,
};

/// A `string_id_item`, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringId {
    /// Position in the string table
    pub id: u32,
    /// The decoded string
    pub value: Arc<str>,
}

/// A `type_id_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeId {
    /// Position in the type table
    pub id: u32,
    /// String index of the type descriptor
    pub descriptor: u32,
}

/// A `proto_id_item` with its parameter list resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoId {
    /// Position in the proto table
    pub id: u32,
    /// String index of the shorty descriptor
    pub shorty: u32,
    /// Type index of the return type
    pub return_type: u32,
    /// Type indices of the parameters
    pub parameters: Vec<u32>,
}

/// A `field_id_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    /// Position in the field table
    pub id: u32,
    /// Type index of the declaring class
    pub class: u32,
    /// Type index of the field type
    pub type_idx: u32,
    /// String index of the name
    pub name: u32,
}

/// A `method_id_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    /// Position in the method table
    pub id: u32,
    /// Type index of the declaring class
    pub class: u32,
    /// Proto index of the signature
    pub proto: u32,
    /// String index of the name
    pub name: u32,
}

fn check_index(kind: &str, index: u32, limit: usize) -> Result<u32> {
    if index as usize >= limit {
        return Err(malformed_error!(
            "{} index {:#x} out of range ({} entries)",
            kind,
            index,
            limit
        ));
    }
    Ok(index)
}

pub(crate) fn parse_strings(data: &[u8], header: &DexHeader) -> Result<Vec<StringId>> {
    let mut table = Parser::new_at(data, header.string_ids_off as usize)?;
    let mut strings = Vec::with_capacity(header.string_ids_size as usize);

    for id in 0..header.string_ids_size {
        let offset = table.read_le::<u32>()?;
        let value = read_string_data(data, offset as usize)
            .map_err(|e| e.with_context(format!("...while parsing string_ids[{id}]")))?;
        strings.push(StringId {
            id,
            value: value.into(),
        });
    }

    Ok(strings)
}

fn read_string_data(data: &[u8], offset: usize) -> Result<String> {
    let mut parser = Parser::new_at(data, offset)?;
    let _utf16_size = parser.read_uleb128()?;
    parser.read_mutf8_cstr()
}

pub(crate) fn parse_types(data: &[u8], header: &DexHeader, strings: usize) -> Result<Vec<TypeId>> {
    let mut parser = Parser::new_at(data, header.type_ids_off as usize)?;
    let mut types = Vec::with_capacity(header.type_ids_size as usize);

    for id in 0..header.type_ids_size {
        let descriptor = check_index("string", parser.read_le::<u32>()?, strings)
            .map_err(|e| e.with_context(format!("...while parsing type_ids[{id}]")))?;
        types.push(TypeId { id, descriptor });
    }

    Ok(types)
}

/// Read a `type_list` at `offset`, `0` meaning "empty".
pub(crate) fn read_type_list(data: &[u8], offset: u32, types: usize) -> Result<Vec<u32>> {
    if offset == 0 {
        return Ok(Vec::new());
    }

    let mut parser = Parser::new_at(data, offset as usize)?;
    let size = parser.read_le::<u32>()?;
    parser.ensure_remaining(size as usize * 2)?;

    let mut list = Vec::with_capacity(size as usize);
    for _ in 0..size {
        list.push(check_index("type", u32::from(parser.read_le::<u16>()?), types)?);
    }
    Ok(list)
}

pub(crate) fn parse_protos(
    data: &[u8],
    header: &DexHeader,
    strings: usize,
    types: usize,
) -> Result<Vec<ProtoId>> {
    let mut parser = Parser::new_at(data, header.proto_ids_off as usize)?;
    let mut protos = Vec::with_capacity(header.proto_ids_size as usize);

    for id in 0..header.proto_ids_size {
        let proto = parse_proto(&mut parser, data, id, strings, types)
            .map_err(|e| e.with_context(format!("...while parsing proto_ids[{id}]")))?;
        protos.push(proto);
    }

    Ok(protos)
}

fn parse_proto(
    parser: &mut Parser<'_>,
    data: &[u8],
    id: u32,
    strings: usize,
    types: usize,
) -> Result<ProtoId> {
    let shorty = check_index("string", parser.read_le::<u32>()?, strings)?;
    let return_type = check_index("type", parser.read_le::<u32>()?, types)?;
    let parameters_off = parser.read_le::<u32>()?;
    Ok(ProtoId {
        id,
        shorty,
        return_type,
        parameters: read_type_list(data, parameters_off, types)?,
    })
}

pub(crate) fn parse_fields(
    data: &[u8],
    header: &DexHeader,
    strings: usize,
    types: usize,
) -> Result<Vec<FieldId>> {
    let mut parser = Parser::new_at(data, header.field_ids_off as usize)?;
    let mut fields = Vec::with_capacity(header.field_ids_size as usize);

    for id in 0..header.field_ids_size {
        let class = u32::from(parser.read_le::<u16>()?);
        let type_idx = u32::from(parser.read_le::<u16>()?);
        let name = parser.read_le::<u32>()?;

        let context = |e: crate::Error| e.with_context(format!("...while parsing field_ids[{id}]"));
        fields.push(FieldId {
            id,
            class: check_index("type", class, types).map_err(context)?,
            type_idx: check_index("type", type_idx, types).map_err(context)?,
            name: check_index("string", name, strings).map_err(context)?,
        });
    }

    Ok(fields)
}

pub(crate) fn parse_methods(
    data: &[u8],
    header: &DexHeader,
    strings: usize,
    types: usize,
    protos: usize,
) -> Result<Vec<MethodId>> {
    let mut parser = Parser::new_at(data, header.method_ids_off as usize)?;
    let mut methods = Vec::with_capacity(header.method_ids_size as usize);

    for id in 0..header.method_ids_size {
        let class = u32::from(parser.read_le::<u16>()?);
        let proto = u32::from(parser.read_le::<u16>()?);
        let name = parser.read_le::<u32>()?;

        let context = |e: crate::Error| e.with_context(format!("...while parsing method_ids[{id}]"));
        methods.push(MethodId {
            id,
            class: check_index("type", class, types).map_err(context)?,
            proto: check_index("proto", proto, protos).map_err(context)?,
            name: check_index("string", name, strings).map_err(context)?,
        });
    }

    Ok(methods)
}
