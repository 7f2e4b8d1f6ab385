//! Byte level dex assembly for tests.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

/// An annotation to emit: `(visibility, type descriptor, elements)` where every element is a
/// name and its raw `encoded_value` bytes.
pub type AnnotationSpec = (u8, String, Vec<(String, Vec<u8>)>);

struct MethodSpec {
    method_idx: u32,
    flags: u32,
    code: Option<Vec<u16>>,
}

struct ClassSpec {
    class_idx: u32,
    superclass_idx: Option<u32>,
    access_flags: u32,
    interfaces: Vec<u32>,
    static_fields: Vec<(u32, u32)>,
    instance_fields: Vec<(u32, u32)>,
    direct_methods: Vec<MethodSpec>,
    virtual_methods: Vec<MethodSpec>,
    annotations: Vec<AnnotationSpec>,
    method_annotations: Vec<(u32, Vec<AnnotationSpec>)>,
    static_values: Option<Vec<u8>>,
}

/// Assembles a little-endian dex image with a valid header, map and signature.
///
/// Ids are interned in call order; the returned indices are the ones the image will use.
pub struct DexBuilder {
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    types: Vec<u32>,
    type_index: HashMap<String, u32>,
    protos: Vec<(u32, u32, Vec<u32>)>,
    fields: Vec<(u32, u32, u32)>,
    methods: Vec<(u32, u32, u32)>,
    classes: Vec<ClassSpec>,
}

pub fn uleb128(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn shorty_char(descriptor: &str) -> char {
    match descriptor.as_bytes().first() {
        Some(b'L' | b'[') => 'L',
        Some(c) => char::from(*c),
        None => 'V',
    }
}

impl DexBuilder {
    pub fn new() -> Self {
        DexBuilder {
            strings: Vec::new(),
            string_index: HashMap::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            protos: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), index);
        index
    }

    pub fn type_id(&mut self, descriptor: &str) -> u32 {
        if let Some(index) = self.type_index.get(descriptor) {
            return *index;
        }
        let string = self.string(descriptor);
        let index = self.types.len() as u32;
        self.types.push(string);
        self.type_index.insert(descriptor.to_string(), index);
        index
    }

    pub fn proto(&mut self, ret: &str, params: &[&str]) -> u32 {
        let shorty: String = std::iter::once(ret)
            .chain(params.iter().copied())
            .map(shorty_char)
            .collect();
        let shorty = self.string(&shorty);
        let ret = self.type_id(ret);
        let params = params.iter().map(|p| self.type_id(p)).collect();
        self.protos.push((shorty, ret, params));
        (self.protos.len() - 1) as u32
    }

    pub fn field(&mut self, class: &str, name: &str, ty: &str) -> u32 {
        let class = self.type_id(class);
        let ty = self.type_id(ty);
        let name = self.string(name);
        self.fields.push((class, ty, name));
        (self.fields.len() - 1) as u32
    }

    pub fn method(&mut self, class: &str, name: &str, ret: &str, params: &[&str]) -> u32 {
        let class = self.type_id(class);
        let proto = self.proto(ret, params);
        let name = self.string(name);
        self.methods.push((class, proto, name));
        (self.methods.len() - 1) as u32
    }

    /// Define a class, returning its position for the member helpers.
    pub fn class(&mut self, descriptor: &str, superclass: &str) -> usize {
        let class_idx = self.type_id(descriptor);
        let superclass_idx = Some(self.type_id(superclass));
        self.classes.push(ClassSpec {
            class_idx,
            superclass_idx,
            access_flags: 0x0001,
            interfaces: Vec::new(),
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
            annotations: Vec::new(),
            method_annotations: Vec::new(),
            static_values: None,
        });
        self.classes.len() - 1
    }

    pub fn interface(&mut self, class: usize, descriptor: &str) {
        let index = self.type_id(descriptor);
        self.classes[class].interfaces.push(index);
    }

    pub fn static_field(&mut self, class: usize, field: u32, flags: u32) {
        self.classes[class].static_fields.push((field, flags));
    }

    pub fn instance_field(&mut self, class: usize, field: u32, flags: u32) {
        self.classes[class].instance_fields.push((field, flags));
    }

    pub fn direct_method(&mut self, class: usize, method: u32, flags: u32, code: Option<&[u16]>) {
        self.classes[class].direct_methods.push(MethodSpec {
            method_idx: method,
            flags,
            code: code.map(<[u16]>::to_vec),
        });
    }

    pub fn virtual_method(&mut self, class: usize, method: u32, flags: u32, code: Option<&[u16]>) {
        self.classes[class].virtual_methods.push(MethodSpec {
            method_idx: method,
            flags,
            code: code.map(<[u16]>::to_vec),
        });
    }

    pub fn class_annotation(&mut self, class: usize, annotation: AnnotationSpec) {
        self.classes[class].annotations.push(annotation);
    }

    pub fn method_annotation(&mut self, class: usize, method: u32, annotation: AnnotationSpec) {
        self.classes[class]
            .method_annotations
            .push((method, vec![annotation]));
    }

    /// Raw `encoded_array` bytes for the static field initializers.
    pub fn static_values(&mut self, class: usize, encoded_array: Vec<u8>) {
        self.classes[class].static_values = Some(encoded_array);
    }

    pub fn build(mut self) -> Vec<u8> {
        // intern every annotation name before the tables are laid out
        let mut prepared = Vec::new();
        for class in &self.classes {
            let mut sets = Vec::new();
            for (visibility, ty, elements) in &class.annotations {
                sets.push((*visibility, ty.clone(), elements.clone()));
            }
            prepared.push(sets);
        }
        let mut encoded_class_annotations = Vec::new();
        for sets in prepared {
            let mut items = Vec::new();
            for (visibility, ty, elements) in sets {
                items.push(self.encode_annotation(visibility, &ty, &elements));
            }
            encoded_class_annotations.push(items);
        }
        let mut encoded_method_annotations = Vec::new();
        for position in 0..self.classes.len() {
            let specs: Vec<(u32, Vec<AnnotationSpec>)> =
                self.classes[position].method_annotations.clone();
            let mut per_method = Vec::new();
            for (method, annotations) in specs {
                let items = annotations
                    .iter()
                    .map(|(visibility, ty, elements)| {
                        self.encode_annotation(*visibility, ty, elements)
                    })
                    .collect::<Vec<_>>();
                per_method.push((method, items));
            }
            encoded_method_annotations.push(per_method);
        }

        let string_ids_off = 0x70usize;
        let type_ids_off = string_ids_off + self.strings.len() * 4;
        let proto_ids_off = type_ids_off + self.types.len() * 4;
        let field_ids_off = proto_ids_off + self.protos.len() * 12;
        let method_ids_off = field_ids_off + self.fields.len() * 8;
        let class_defs_off = method_ids_off + self.methods.len() * 8;
        let data_off = class_defs_off + self.classes.len() * 32;

        let mut image = vec![0u8; data_off];
        let place = |image: &mut Vec<u8>, bytes: &[u8], align: usize| -> u32 {
            while image.len() % align != 0 {
                image.push(0);
            }
            let offset = image.len() as u32;
            image.extend_from_slice(bytes);
            offset
        };

        for (i, value) in self.strings.iter().enumerate() {
            let mut item = Vec::new();
            uleb128(value.encode_utf16().count() as u32, &mut item);
            item.extend_from_slice(value.as_bytes());
            item.push(0);
            let offset = place(&mut image, &item, 1);
            put_u32(&mut image, string_ids_off + i * 4, offset);
        }

        for (i, descriptor) in self.types.iter().enumerate() {
            put_u32(&mut image, type_ids_off + i * 4, *descriptor);
        }

        for (i, (shorty, ret, params)) in self.protos.iter().enumerate() {
            let params_off = if params.is_empty() {
                0
            } else {
                place(&mut image, &type_list(params), 4)
            };
            let at = proto_ids_off + i * 12;
            put_u32(&mut image, at, *shorty);
            put_u32(&mut image, at + 4, *ret);
            put_u32(&mut image, at + 8, params_off);
        }

        for (i, (class, ty, name)) in self.fields.iter().enumerate() {
            let at = field_ids_off + i * 8;
            put_u16(&mut image, at, *class as u16);
            put_u16(&mut image, at + 2, *ty as u16);
            put_u32(&mut image, at + 4, *name);
        }

        for (i, (class, proto, name)) in self.methods.iter().enumerate() {
            let at = method_ids_off + i * 8;
            put_u16(&mut image, at, *class as u16);
            put_u16(&mut image, at + 2, *proto as u16);
            put_u32(&mut image, at + 4, *name);
        }

        for (i, class) in self.classes.iter_mut().enumerate() {
            let interfaces_off = if class.interfaces.is_empty() {
                0
            } else {
                place(&mut image, &type_list(&class.interfaces), 4)
            };

            let class_items = &encoded_class_annotations[i];
            let method_items = &encoded_method_annotations[i];
            let annotations_off = if class_items.is_empty() && method_items.is_empty() {
                0
            } else {
                let class_set = annotation_set(&mut image, class_items, &place);
                let mut method_sets = Vec::new();
                for (method, items) in method_items {
                    method_sets.push((*method, annotation_set(&mut image, items, &place)));
                }
                let mut directory = Vec::new();
                directory.extend_from_slice(&class_set.to_le_bytes());
                directory.extend_from_slice(&0u32.to_le_bytes());
                directory.extend_from_slice(&(method_sets.len() as u32).to_le_bytes());
                directory.extend_from_slice(&0u32.to_le_bytes());
                for (method, set) in method_sets {
                    directory.extend_from_slice(&method.to_le_bytes());
                    directory.extend_from_slice(&set.to_le_bytes());
                }
                place(&mut image, &directory, 4)
            };

            let mut code_offsets = HashMap::new();
            for method in class.direct_methods.iter().chain(&class.virtual_methods) {
                if let Some(code) = &method.code {
                    let mut item = Vec::new();
                    for value in [4u16, 1, 1, 0] {
                        item.extend_from_slice(&value.to_le_bytes());
                    }
                    item.extend_from_slice(&0u32.to_le_bytes());
                    item.extend_from_slice(&(code.len() as u32).to_le_bytes());
                    for unit in code {
                        item.extend_from_slice(&unit.to_le_bytes());
                    }
                    code_offsets.insert(method.method_idx, place(&mut image, &item, 4));
                }
            }

            class.static_fields.sort_unstable();
            class.instance_fields.sort_unstable();
            class.direct_methods.sort_unstable_by_key(|m| m.method_idx);
            class.virtual_methods.sort_unstable_by_key(|m| m.method_idx);

            let mut data = Vec::new();
            uleb128(class.static_fields.len() as u32, &mut data);
            uleb128(class.instance_fields.len() as u32, &mut data);
            uleb128(class.direct_methods.len() as u32, &mut data);
            uleb128(class.virtual_methods.len() as u32, &mut data);
            for fields in [&class.static_fields, &class.instance_fields] {
                let mut previous = 0;
                for (field, flags) in fields {
                    uleb128(field - previous, &mut data);
                    uleb128(*flags, &mut data);
                    previous = *field;
                }
            }
            for methods in [&class.direct_methods, &class.virtual_methods] {
                let mut previous = 0;
                for method in methods {
                    uleb128(method.method_idx - previous, &mut data);
                    uleb128(method.flags, &mut data);
                    uleb128(
                        code_offsets.get(&method.method_idx).copied().unwrap_or(0),
                        &mut data,
                    );
                    previous = method.method_idx;
                }
            }
            let class_data_off = place(&mut image, &data, 1);

            let static_values_off = match &class.static_values {
                Some(values) => place(&mut image, values, 1),
                None => 0,
            };

            let at = class_defs_off + i * 32;
            put_u32(&mut image, at, class.class_idx);
            put_u32(&mut image, at + 4, class.access_flags);
            put_u32(&mut image, at + 8, class.superclass_idx.unwrap_or(0xFFFF_FFFF));
            put_u32(&mut image, at + 12, interfaces_off);
            put_u32(&mut image, at + 16, 0xFFFF_FFFF);
            put_u32(&mut image, at + 20, annotations_off);
            put_u32(&mut image, at + 24, class_data_off);
            put_u32(&mut image, at + 28, static_values_off);
        }

        let sections = [
            (0x0000u16, 1usize, 0usize),
            (0x0001, self.strings.len(), string_ids_off),
            (0x0002, self.types.len(), type_ids_off),
            (0x0003, self.protos.len(), proto_ids_off),
            (0x0004, self.fields.len(), field_ids_off),
            (0x0005, self.methods.len(), method_ids_off),
            (0x0006, self.classes.len(), class_defs_off),
        ];
        while image.len() % 4 != 0 {
            image.push(0);
        }
        let map_off = image.len();
        let present: Vec<_> = sections.iter().filter(|(_, size, _)| *size > 0).collect();
        image.extend_from_slice(&(present.len() as u32 + 1).to_le_bytes());
        for (kind, size, offset) in present {
            image.extend_from_slice(&kind.to_le_bytes());
            image.extend_from_slice(&0u16.to_le_bytes());
            image.extend_from_slice(&(*size as u32).to_le_bytes());
            image.extend_from_slice(&(*offset as u32).to_le_bytes());
        }
        image.extend_from_slice(&0x1000u16.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&(map_off as u32).to_le_bytes());

        let file_size = image.len();
        image[..8].copy_from_slice(b"dex\n035\0");
        put_u32(&mut image, 32, file_size as u32);
        put_u32(&mut image, 36, 0x70);
        put_u32(&mut image, 40, 0x1234_5678);
        put_u32(&mut image, 52, map_off as u32);
        let tables = [
            (self.strings.len(), string_ids_off),
            (self.types.len(), type_ids_off),
            (self.protos.len(), proto_ids_off),
            (self.fields.len(), field_ids_off),
            (self.methods.len(), method_ids_off),
            (self.classes.len(), class_defs_off),
        ];
        for (i, (size, offset)) in tables.iter().enumerate() {
            let offset = if *size == 0 { 0 } else { *offset };
            put_u32(&mut image, 56 + i * 8, *size as u32);
            put_u32(&mut image, 60 + i * 8, offset as u32);
        }
        put_u32(&mut image, 104, (file_size - data_off) as u32);
        put_u32(&mut image, 108, data_off as u32);

        let signature = Sha1::digest(&image[32..]);
        image[12..32].copy_from_slice(&signature);
        image
    }

    fn encode_annotation(
        &mut self,
        visibility: u8,
        ty: &str,
        elements: &[(String, Vec<u8>)],
    ) -> Vec<u8> {
        let mut item = vec![visibility];
        uleb128(self.type_id(ty), &mut item);
        uleb128(elements.len() as u32, &mut item);
        for (name, value) in elements {
            uleb128(self.string(name), &mut item);
            item.extend_from_slice(value);
        }
        item
    }
}

fn annotation_set(
    image: &mut Vec<u8>,
    items: &[Vec<u8>],
    place: &impl Fn(&mut Vec<u8>, &[u8], usize) -> u32,
) -> u32 {
    if items.is_empty() {
        return 0;
    }
    let offsets: Vec<u32> = items.iter().map(|item| place(image, item, 1)).collect();
    let mut set = (offsets.len() as u32).to_le_bytes().to_vec();
    for offset in offsets {
        set.extend_from_slice(&offset.to_le_bytes());
    }
    place(image, &set, 4)
}

fn type_list(types: &[u32]) -> Vec<u8> {
    let mut list = (types.len() as u32).to_le_bytes().to_vec();
    for ty in types {
        list.extend_from_slice(&(*ty as u16).to_le_bytes());
    }
    list
}

fn put_u16(image: &mut [u8], at: usize, value: u16) {
    image[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
