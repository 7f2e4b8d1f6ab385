use std::sync::{Arc, RwLock};

use crossbeam_skiplist::SkipMap;
use log::debug;
use rayon::prelude::*;

use crate::{
    classfile::MethodDescriptor,
    dex::{
        annotations::Annotation,
        classdef::{parse_class_defs, ClassDef, Limits},
        code::{CodeDecoder, DalvikDecoder},
        header::{parse_map, DexHeader, MapItem},
        ids::{
            parse_fields, parse_methods, parse_protos, parse_strings, parse_types, FieldId,
            MethodId, ProtoId, StringId, TypeId,
        },
    },
    file::{File, FileKind},
    Error, Result,
};

/// Options controlling how much of a dex image is decoded up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexOptions {
    /// Decode annotation directories and build the annotation table
    pub include_annotations: bool,
    /// Decode every method body in parallel right after opening
    pub eager_bodies: bool,
    /// Check the SHA-1 signature in the header before parsing
    pub verify_signature: bool,
}

impl Default for DexOptions {
    fn default() -> Self {
        DexOptions {
            include_annotations: true,
            eager_bodies: false,
            verify_signature: false,
        }
    }
}

impl DexOptions {
    /// Structure only: no annotations, no eager decoding.
    #[must_use]
    pub fn minimal() -> Self {
        DexOptions {
            include_annotations: false,
            eager_bodies: false,
            verify_signature: false,
        }
    }

    /// Everything, including eager body decoding and signature verification.
    #[must_use]
    pub fn full() -> Self {
        DexOptions {
            include_annotations: true,
            eager_bodies: true,
            verify_signature: true,
        }
    }
}

/// The resources that live exactly as long as a session is open.
pub(crate) struct Session {
    pub(crate) image: RwLock<Option<File>>,
    pub(crate) decoder: Box<dyn CodeDecoder>,
}

/// A parsed dex image.
///
/// Opening a session decodes the header, every id table and every class definition eagerly.
/// Method bodies are summarized lazily by [`crate::dex::EncodedMethod::body`]; the decode runs
/// under the session's read lock, so any number of threads may decode concurrently while
/// [`DexParser::close`] waits for them under the write lock.
///
/// The id tables stay readable after `close`. Anything that needs the image itself fails with
/// [`crate::Error::SessionClosed`].
///
/// # Examples
///
/// ```rust,no_run
/// use hookscope::dex::{DexOptions, DexParser};
///
/// let bytes = std::fs::read("classes.dex")?;
/// let dex = DexParser::open(&bytes, DexOptions::default())?;
/// for class in dex.class_defs() {
///     println!("{}", dex.type_descriptor(class.class_idx)?);
///     for method in class.methods() {
///         let invoked = method.invoked_methods()?;
///         println!("  {} calls", invoked.len());
///     }
/// }
/// dex.close();
/// # Ok::<(), hookscope::Error>(())
/// ```
pub struct DexParser {
    header: DexHeader,
    map: Vec<MapItem>,
    strings: Vec<StringId>,
    types: Vec<TypeId>,
    protos: Vec<ProtoId>,
    fields: Vec<FieldId>,
    methods: Vec<MethodId>,
    class_defs: Vec<ClassDef>,
    annotations: Vec<Annotation>,
    by_descriptor: SkipMap<Arc<str>, usize>,
    session: Arc<Session>,
}

impl DexParser {
    /// Open a session over a private copy of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] with a breadcrumb trail for malformed images and
    /// [`crate::Error::NotSupported`] for compact or byte-swapped dex.
    pub fn open(data: &[u8], options: DexOptions) -> Result<DexParser> {
        Self::from_file(File::from_slice(data)?, options)
    }

    /// Open a session over an already loaded [`File`], taking ownership of it.
    ///
    /// # Errors
    /// See [`DexParser::open`].
    pub fn from_file(file: File, options: DexOptions) -> Result<DexParser> {
        Self::with_decoder(file, options, Box::new(DalvikDecoder))
    }

    /// Open a session with a custom [`CodeDecoder`].
    ///
    /// # Errors
    /// See [`DexParser::open`].
    pub fn with_decoder(
        file: File,
        options: DexOptions,
        decoder: Box<dyn CodeDecoder>,
    ) -> Result<DexParser> {
        if file.kind() != FileKind::Dex && !file.data().starts_with(b"cdex") {
            return Err(malformed_error!("not a dex image"));
        }

        let session = Arc::new(Session {
            image: RwLock::new(None),
            decoder,
        });

        let parser = {
            let mut image = write_lock!(session.image);
            let parser = Self::parse(file.data(), options, &session)
                .map_err(|e| match e {
                    Error::NotSupported => Error::NotSupported,
                    e => e.with_context("...while opening dex image"),
                })?;
            *image = Some(file);
            parser
        };

        debug!(
            "opened dex session: {} strings, {} methods, {} classes",
            parser.strings.len(),
            parser.methods.len(),
            parser.class_defs.len()
        );

        if options.eager_bodies {
            parser.warm_bodies()?;
        }

        Ok(parser)
    }

    fn parse(data: &[u8], options: DexOptions, session: &Arc<Session>) -> Result<DexParser> {
        let header = DexHeader::parse(data)?;
        if options.verify_signature {
            header.verify_signature(data)?;
        }
        let map = parse_map(data, &header)?;

        let strings = parse_strings(data, &header)?;
        let types = parse_types(data, &header, strings.len())?;
        let protos = parse_protos(data, &header, strings.len(), types.len())?;
        let fields = parse_fields(data, &header, strings.len(), types.len())?;
        let methods = parse_methods(data, &header, strings.len(), types.len(), protos.len())?;

        let limits = Limits {
            strings: strings.len(),
            types: types.len(),
            fields: fields.len(),
            methods: methods.len(),
        };
        let mut annotations = Vec::new();
        let class_defs = parse_class_defs(
            data,
            &header,
            limits,
            options.include_annotations,
            &mut annotations,
            &Arc::downgrade(session),
        )?;

        let by_descriptor = SkipMap::new();
        for (position, class) in class_defs.iter().enumerate() {
            let descriptor = &strings[types[class.class_idx as usize].descriptor as usize];
            by_descriptor.insert(descriptor.value.clone(), position);
        }

        Ok(DexParser {
            header,
            map,
            strings,
            types,
            protos,
            fields,
            methods,
            class_defs,
            annotations,
            by_descriptor,
            session: session.clone(),
        })
    }

    fn warm_bodies(&self) -> Result<()> {
        self.class_defs
            .par_iter()
            .flat_map_iter(ClassDef::methods)
            .try_for_each(|method| method.body().map(|_| ()))
    }

    /// Release the image. Idempotent; also runs on drop.
    ///
    /// Waits for in-flight body decodes to finish.
    pub fn close(&self) {
        let mut image = write_lock!(self.session.image);
        if image.take().is_some() {
            debug!("closed dex session");
        }
    }

    /// Returns `true` after [`DexParser::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        read_lock!(self.session.image).is_none()
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &DexHeader {
        &self.header
    }

    /// The map list.
    #[must_use]
    pub fn map(&self) -> &[MapItem] {
        &self.map
    }

    /// The string table.
    #[must_use]
    pub fn strings(&self) -> &[StringId] {
        &self.strings
    }

    /// The type table.
    #[must_use]
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    /// The proto table.
    #[must_use]
    pub fn protos(&self) -> &[ProtoId] {
        &self.protos
    }

    /// The field table.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// The method table.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    /// Class definitions in file order.
    #[must_use]
    pub fn class_defs(&self) -> &[ClassDef] {
        &self.class_defs
    }

    /// Every annotation referenced by a class, field, method or parameter.
    ///
    /// Empty unless the session was opened with [`DexOptions::include_annotations`].
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Look up a class definition by type descriptor, e.g. `Lcom/example/Foo;`.
    #[must_use]
    pub fn find_class(&self, descriptor: &str) -> Option<&ClassDef> {
        let entry = self.by_descriptor.get(descriptor)?;
        self.class_defs.get(*entry.value())
    }

    /// Class descriptors in sorted order.
    pub fn class_descriptors(&self) -> impl Iterator<Item = Arc<str>> + '_ {
        self.by_descriptor.iter().map(|entry| entry.key().clone())
    }

    /// Resolve a string index.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn string(&self, index: u32) -> Result<&Arc<str>> {
        self.strings
            .get(index as usize)
            .map(|s| &s.value)
            .ok_or(out_of_bounds_error!())
    }

    /// Resolve a type index to its descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn type_descriptor(&self, index: u32) -> Result<&Arc<str>> {
        let ty = self.types.get(index as usize).ok_or(out_of_bounds_error!())?;
        self.string(ty.descriptor)
    }

    /// Rebuild the method descriptor of a proto, e.g. `(ILjava/lang/String;)V`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn proto_descriptor(&self, index: u32) -> Result<MethodDescriptor> {
        let proto = self.protos.get(index as usize).ok_or(out_of_bounds_error!())?;
        let mut descriptor = String::from("(");
        for parameter in &proto.parameters {
            descriptor.push_str(self.type_descriptor(*parameter)?);
        }
        descriptor.push(')');
        descriptor.push_str(self.type_descriptor(proto.return_type)?);
        MethodDescriptor::parse(&descriptor)
    }

    /// Resolve a method index to `(declaring class descriptor, name, descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn method_signature(&self, index: u32) -> Result<(&Arc<str>, &Arc<str>, MethodDescriptor)> {
        let method = self.methods.get(index as usize).ok_or(out_of_bounds_error!())?;
        Ok((
            self.type_descriptor(method.class)?,
            self.string(method.name)?,
            self.proto_descriptor(method.proto)?,
        ))
    }

    /// Resolve a field index to `(declaring class descriptor, name, type descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn field_signature(&self, index: u32) -> Result<(&Arc<str>, &Arc<str>, &Arc<str>)> {
        let field = self.fields.get(index as usize).ok_or(out_of_bounds_error!())?;
        Ok((
            self.type_descriptor(field.class)?,
            self.string(field.name)?,
            self.type_descriptor(field.type_idx)?,
        ))
    }
}

impl Drop for DexParser {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DexParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexParser")
            .field("version", &self.header.version)
            .field("classes", &self.class_defs.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
