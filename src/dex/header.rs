//! Dex header and map list.
//!
//! The header is a fixed `0x70` byte record at the start of the image holding the sizes and
//! offsets of every id table. The map list, located through `map_off`, repeats that
//! information for every section of the image and is validated against the file size.

use sha1::{Digest, Sha1};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::{file::parser::Parser, Result};

/// Size of the fixed dex header.
pub const HEADER_SIZE: usize = 0x70;
/// Little-endian byte order marker.
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;
/// Byte-swapped byte order marker.
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x7856_3412;
/// Marker for an absent index (`superclass_idx`, `source_file_idx`).
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

const MIN_VERSION: u32 = 35;
const MAX_VERSION: u32 = 41;

/// The parsed dex header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexHeader {
    /// Format version, e.g. `35` for `dex\n035\0`
    pub version: u32,
    /// Adler-32 checksum of everything after this field
    pub checksum: u32,
    /// SHA-1 of everything after this field
    pub signature: [u8; 20],
    /// Size of the whole image
    pub file_size: u32,
    /// Size of this header, always `0x70`
    pub header_size: u32,
    /// Size of the link section
    pub link_size: u32,
    /// Offset of the link section
    pub link_off: u32,
    /// Offset of the map list
    pub map_off: u32,
    /// Number of `string_id_item`s
    pub string_ids_size: u32,
    /// Offset of the string id table
    pub string_ids_off: u32,
    /// Number of `type_id_item`s
    pub type_ids_size: u32,
    /// Offset of the type id table
    pub type_ids_off: u32,
    /// Number of `proto_id_item`s
    pub proto_ids_size: u32,
    /// Offset of the proto id table
    pub proto_ids_off: u32,
    /// Number of `field_id_item`s
    pub field_ids_size: u32,
    /// Offset of the field id table
    pub field_ids_off: u32,
    /// Number of `method_id_item`s
    pub method_ids_size: u32,
    /// Offset of the method id table
    pub method_ids_off: u32,
    /// Number of `class_def_item`s
    pub class_defs_size: u32,
    /// Offset of the class def table
    pub class_defs_off: u32,
    /// Size of the data section
    pub data_size: u32,
    /// Offset of the data section
    pub data_off: u32,
}

impl DexHeader {
    /// Parse and validate the header at the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for compact dex and byte-swapped images, and
    /// [`crate::Error::Malformed`] for a bad magic, unknown version or inconsistent sizes.
    pub fn parse(data: &[u8]) -> Result<DexHeader> {
        if data.starts_with(b"cdex") {
            return Err(crate::Error::NotSupported);
        }
        if data.len() < HEADER_SIZE {
            return Err(out_of_bounds_error!());
        }

        let magic = &data[..8];
        if &magic[..4] != b"dex\n" || magic[7] != 0 {
            return Err(malformed_error!("bad dex magic"));
        }
        let version = magic[4..7]
            .iter()
            .try_fold(0u32, |acc, &digit| {
                digit
                    .is_ascii_digit()
                    .then(|| acc * 10 + u32::from(digit - b'0'))
            })
            .ok_or_else(|| malformed_error!("bad dex version"))?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(malformed_error!("unsupported dex version {:03}", version));
        }

        let mut parser = Parser::new_at(data, 8)?;
        let checksum = parser.read_le::<u32>()?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(parser.read_bytes(20)?);
        let file_size = parser.read_le::<u32>()?;
        let header_size = parser.read_le::<u32>()?;
        let endian_tag = parser.read_le::<u32>()?;

        match endian_tag {
            ENDIAN_CONSTANT => {}
            REVERSE_ENDIAN_CONSTANT => return Err(crate::Error::NotSupported),
            other => return Err(malformed_error!("bad endian tag {:#010x}", other)),
        }
        if header_size as usize != HEADER_SIZE {
            return Err(malformed_error!("bad header size {:#x}", header_size));
        }
        if file_size as usize > data.len() {
            return Err(malformed_error!(
                "file size {:#x} exceeds image size {:#x}",
                file_size,
                data.len()
            ));
        }

        let header = DexHeader {
            version,
            checksum,
            signature,
            file_size,
            header_size,
            link_size: parser.read_le::<u32>()?,
            link_off: parser.read_le::<u32>()?,
            map_off: parser.read_le::<u32>()?,
            string_ids_size: parser.read_le::<u32>()?,
            string_ids_off: parser.read_le::<u32>()?,
            type_ids_size: parser.read_le::<u32>()?,
            type_ids_off: parser.read_le::<u32>()?,
            proto_ids_size: parser.read_le::<u32>()?,
            proto_ids_off: parser.read_le::<u32>()?,
            field_ids_size: parser.read_le::<u32>()?,
            field_ids_off: parser.read_le::<u32>()?,
            method_ids_size: parser.read_le::<u32>()?,
            method_ids_off: parser.read_le::<u32>()?,
            class_defs_size: parser.read_le::<u32>()?,
            class_defs_off: parser.read_le::<u32>()?,
            data_size: parser.read_le::<u32>()?,
            data_off: parser.read_le::<u32>()?,
        };

        header.check_table("string_ids", header.string_ids_off, header.string_ids_size, 4)?;
        header.check_table("type_ids", header.type_ids_off, header.type_ids_size, 4)?;
        header.check_table("proto_ids", header.proto_ids_off, header.proto_ids_size, 12)?;
        header.check_table("field_ids", header.field_ids_off, header.field_ids_size, 8)?;
        header.check_table("method_ids", header.method_ids_off, header.method_ids_size, 8)?;
        header.check_table("class_defs", header.class_defs_off, header.class_defs_size, 32)?;

        Ok(header)
    }

    fn check_table(&self, name: &str, offset: u32, count: u32, item_size: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let end = u64::from(offset) + u64::from(count) * item_size;
        if (offset as usize) < HEADER_SIZE || end > u64::from(self.file_size) {
            return Err(malformed_error!(
                "{} table ({} items at {:#x}) lies outside the image",
                name,
                count,
                offset
            ));
        }
        Ok(())
    }

    /// Verify [`DexHeader::signature`] against the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a mismatch.
    pub fn verify_signature(&self, data: &[u8]) -> Result<()> {
        let Some(covered) = data.get(32..self.file_size as usize) else {
            return Err(out_of_bounds_error!());
        };

        let digest = Sha1::digest(covered);
        if digest.as_slice() != self.signature {
            return Err(malformed_error!("dex signature mismatch"));
        }
        Ok(())
    }
}

/// Section types listed in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MapItemType {
    HeaderItem = 0x0000,
    StringIdItem = 0x0001,
    TypeIdItem = 0x0002,
    ProtoIdItem = 0x0003,
    FieldIdItem = 0x0004,
    MethodIdItem = 0x0005,
    ClassDefItem = 0x0006,
    CallSiteIdItem = 0x0007,
    MethodHandleItem = 0x0008,
    MapList = 0x1000,
    TypeList = 0x1001,
    AnnotationSetRefList = 0x1002,
    AnnotationSetItem = 0x1003,
    ClassDataItem = 0x2000,
    CodeItem = 0x2001,
    StringDataItem = 0x2002,
    DebugInfoItem = 0x2003,
    AnnotationItem = 0x2004,
    EncodedArrayItem = 0x2005,
    AnnotationsDirectoryItem = 0x2006,
    HiddenapiClassDataItem = 0xF000,
}

impl MapItemType {
    /// Map a raw type code to its variant.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<MapItemType> {
        MapItemType::iter().find(|kind| *kind as u16 == code)
    }
}

/// One entry of the map list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    /// Section type
    pub kind: MapItemType,
    /// Number of items in the section
    pub size: u32,
    /// Offset of the section
    pub offset: u32,
}

/// Parse the map list referenced by `header`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown section types or sections outside the image.
pub fn parse_map(data: &[u8], header: &DexHeader) -> Result<Vec<MapItem>> {
    let mut parser = Parser::new_at(data, header.map_off as usize)?;
    let count = parser.read_le::<u32>()?;
    parser.ensure_remaining(count as usize * 12)?;

    let mut items = Vec::with_capacity(count as usize);
    for i in 0..count {
        let code = parser.read_le::<u16>()?;
        let _unused = parser.read_le::<u16>()?;
        let size = parser.read_le::<u32>()?;
        let offset = parser.read_le::<u32>()?;

        let Some(kind) = MapItemType::from_u16(code) else {
            return Err(malformed_error!("unknown map item type {:#06x} at map[{}]", code, i));
        };
        if offset > header.file_size {
            return Err(malformed_error!(
                "map[{}] ({:?}) starts past the end of the image",
                i,
                kind
            ));
        }
        items.push(MapItem { kind, size, offset });
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::DexBuilder, Error};

    #[test]
    fn header_of_built_image() {
        let mut builder = DexBuilder::new();
        builder.class("LFoo;", "Ljava/lang/Object;");
        let image = builder.build();

        let header = DexHeader::parse(&image).unwrap();
        assert_eq!(header.version, 35);
        assert_eq!(header.file_size as usize, image.len());
        assert_eq!(header.class_defs_size, 1);
        header.verify_signature(&image).unwrap();

        let map = parse_map(&image, &header).unwrap();
        assert!(map.iter().any(|item| item.kind == MapItemType::MapList));
        assert_eq!(map[0].kind, MapItemType::HeaderItem);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            DexHeader::parse(b"cdex001\0"),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            DexHeader::parse(b"dex\n035\0"),
            Err(Error::OutOfBounds)
        ));

        let mut image = DexBuilder::new().build();
        image[4..7].copy_from_slice(b"099");
        assert!(matches!(
            DexHeader::parse(&image),
            Err(Error::Malformed { .. })
        ));

        let mut image = DexBuilder::new().build();
        image[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        assert!(matches!(DexHeader::parse(&image), Err(Error::NotSupported)));
    }

    #[test]
    fn signature_mismatch() {
        let mut image = DexBuilder::new().build();
        let header = DexHeader::parse(&image).unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        assert!(header.verify_signature(&image).is_err());
    }

    #[test]
    fn map_item_codes() {
        assert_eq!(MapItemType::from_u16(0x2001), Some(MapItemType::CodeItem));
        assert_eq!(MapItemType::from_u16(0x1234), None);
        assert_eq!(MapItemType::COUNT, 21);
    }
}
