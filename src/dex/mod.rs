//! Dex image parsing.
//!
//! A [`DexParser`] is a session over one dex image. Opening it validates the header and map
//! list and decodes the id tables and every class definition eagerly. The instruction level
//! facts of a method (invoked methods, accessed and assigned fields, loaded strings, opcodes)
//! are produced lazily, once per method, and stay valid until the session is closed.
//!
//! # Architecture
//!
//! - [`header`](DexHeader) - header, signature and map list
//! - ids - string, type, proto, field and method id tables
//! - [`ClassDef`] - class definitions with their fields, methods and annotations
//! - [`CodeDecoder`] - the instruction summarizer, [`DalvikDecoder`] by default
//! - [`DexVisitor`] - a structured walk over all defined classes
//!
//! # Thread Safety
//!
//! [`DexParser`] is `Send + Sync`. Body decodes may run from any number of threads; closing
//! the session waits for in-flight decodes and fails all later ones with
//! [`crate::Error::SessionClosed`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use hookscope::dex::{DexOptions, DexParser};
//!
//! let bytes = std::fs::read("classes.dex")?;
//! let dex = DexParser::open(&bytes, DexOptions::minimal())?;
//! if let Some(class) = dex.find_class("Lcom/example/Main;") {
//!     for method in class.methods() {
//!         let (_, name, descriptor) = dex.method_signature(method.method_idx)?;
//!         println!("{name}{descriptor}");
//!     }
//! }
//! # Ok::<(), hookscope::Error>(())
//! ```

mod annotations;
mod classdef;
mod code;
mod header;
mod ids;
mod session;
mod visitor;

pub use annotations::{
    read_encoded_array, read_encoded_value, Annotation, AnnotationElement, AnnotationVisibility,
    EncodedAnnotation, EncodedValue,
};
pub use classdef::{ClassDef, CodeItem, EncodedField, EncodedMethod};
pub use code::{CodeDecoder, DalvikDecoder, MethodBody, OPCODE_LEN};
pub use header::{
    parse_map, DexHeader, MapItem, MapItemType, ENDIAN_CONSTANT, HEADER_SIZE, NO_INDEX,
    REVERSE_ENDIAN_CONSTANT,
};
pub use ids::{FieldId, MethodId, ProtoId, StringId, TypeId};
pub use session::{DexOptions, DexParser};
pub use visitor::{Descend, DexVisitor};

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{classfile::AccessFlags, file::File, test::DexBuilder, Error};

    struct Sample {
        image: Vec<u8>,
        hello: u32,
        run: u32,
        helper: u32,
        counter: u32,
    }

    /// `LFoo;` with a static `counter`, a native `helper()` and a `run()` that touches both.
    fn sample() -> Sample {
        let mut builder = DexBuilder::new();
        let hello = builder.string("hello");
        let counter = builder.field("LFoo;", "counter", "I");
        let helper = builder.method("LFoo;", "helper", "V", &[]);
        let run = builder.method("LFoo;", "run", "I", &["Ljava/lang/String;", "J"]);

        let foo = builder.class("LFoo;", "Ljava/lang/Object;");
        builder.static_field(foo, counter, 0x0008);
        builder.direct_method(foo, helper, 0x0108, None);
        #[rustfmt::skip]
        let code = [
            0x001A, hello as u16,               // const-string v0, "hello"
            0x0071, helper as u16, 0x0000,      // invoke-static {}, helper
            0x0060, counter as u16,             // sget v0, counter
            0x0067, counter as u16,             // sput v0, counter
            0x000F,                             // return v0
        ];
        builder.virtual_method(foo, run, 0x0001, Some(&code));
        builder.static_values(foo, vec![0x01, 0x04, 0x2A]);

        let bar = builder.class("LBar;", "LFoo;");
        builder.interface(bar, "Ljava/lang/Runnable;");

        Sample {
            image: builder.build(),
            hello,
            run,
            helper,
            counter,
        }
    }

    struct CountingDecoder(Arc<AtomicUsize>);

    impl CodeDecoder for CountingDecoder {
        fn decode(&self, insns: &[u8]) -> MethodBody {
            self.0.fetch_add(1, Ordering::SeqCst);
            DalvikDecoder.decode(insns)
        }
    }

    fn counting(image: &[u8], options: DexOptions) -> (DexParser, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let dex = DexParser::with_decoder(
            File::from_slice(image).unwrap(),
            options,
            Box::new(CountingDecoder(count.clone())),
        )
        .unwrap();
        (dex, count)
    }

    fn run_method(dex: &DexParser) -> &EncodedMethod {
        dex.find_class("LFoo;")
            .unwrap()
            .virtual_methods
            .first()
            .unwrap()
    }

    #[test]
    fn open_and_resolve() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::full()).unwrap();

        assert_eq!(dex.class_defs().len(), 2);
        assert_eq!(&**dex.string(sample.hello).unwrap(), "hello");

        let (class, name, descriptor) = dex.method_signature(sample.run).unwrap();
        assert_eq!(&**class, "LFoo;");
        assert_eq!(&**name, "run");
        assert_eq!(descriptor.to_string(), "(Ljava/lang/String;J)I");

        let (_, name, ty) = dex.field_signature(sample.counter).unwrap();
        assert_eq!(&**name, "counter");
        assert_eq!(&**ty, "I");

        let foo = dex.find_class("LFoo;").unwrap();
        assert_eq!(
            &**dex.type_descriptor(foo.superclass_idx.unwrap()).unwrap(),
            "Ljava/lang/Object;"
        );
        assert_eq!(foo.static_values, vec![EncodedValue::Int(42)]);
        assert!(foo.direct_methods[0].code.is_none());
        assert!(foo.direct_methods[0]
            .access_flags
            .contains(AccessFlags::NATIVE | AccessFlags::STATIC));

        let bar = dex.find_class("LBar;").unwrap();
        assert_eq!(bar.interfaces.len(), 1);
        assert_eq!(
            &**dex.type_descriptor(bar.interfaces[0]).unwrap(),
            "Ljava/lang/Runnable;"
        );

        assert!(dex.find_class("LMissing;").is_none());
        let descriptors: Vec<_> = dex.class_descriptors().collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(&*descriptors[0], "LBar;");

        assert!(matches!(dex.string(10_000), Err(Error::OutOfBounds)));
    }

    #[test]
    fn body_facts() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::default()).unwrap();
        let run = run_method(&dex);

        assert_eq!(run.referred_strings().unwrap(), &[sample.hello]);
        assert_eq!(run.invoked_methods().unwrap(), &[sample.helper]);
        assert_eq!(run.accessed_fields().unwrap(), &[sample.counter]);
        assert_eq!(run.assigned_fields().unwrap(), &[sample.counter]);
        assert_eq!(run.opcodes().unwrap(), &[0x1A, 0x71, 0x60, 0x67, 0x0F]);

        let helper = &dex.find_class("LFoo;").unwrap().direct_methods[0];
        assert_eq!(helper.body().unwrap(), &MethodBody::default());
    }

    #[test]
    fn bodies_are_decoded_once() {
        let sample = sample();
        let (dex, count) = counting(&sample.image, DexOptions::default());
        let run = run_method(&dex);

        assert!(!run.is_decoded());
        let first = run.body().unwrap();
        let second = run.body().unwrap();
        assert!(std::ptr::eq(first, second));
        run.invoked_methods().unwrap();
        run.opcodes().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(run.is_decoded());
    }

    #[test]
    fn concurrent_decode() {
        let sample = sample();
        let (dex, count) = counting(&sample.image, DexOptions::default());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let run = run_method(&dex);
                    assert_eq!(run.invoked_methods().unwrap().len(), 1);
                });
            }
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eager_bodies() {
        let sample = sample();
        let options = DexOptions {
            eager_bodies: true,
            ..DexOptions::minimal()
        };
        let (dex, count) = counting(&sample.image, options);

        // the native method has no code and never reaches the decoder
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(dex.class_defs().iter().flat_map(ClassDef::methods).all(EncodedMethod::is_decoded));
    }

    #[test]
    fn closed_session() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::default()).unwrap();
        run_method(&dex).body().unwrap();

        dex.close();
        assert!(dex.is_closed());
        dex.close();

        let run = run_method(&dex);
        assert!(matches!(run.body(), Err(Error::SessionClosed)));
        assert!(matches!(run.invoked_methods(), Err(Error::SessionClosed)));
        assert!(matches!(
            dex.visit_defined_classes(&mut Recorder::default()),
            Err(Error::SessionClosed)
        ));

        // structural tables outlive the image
        assert_eq!(&**dex.string(sample.hello).unwrap(), "hello");
        assert!(dex.find_class("LFoo;").is_some());
    }

    #[derive(Default)]
    struct Recorder {
        classes: Vec<u32>,
        fields: Vec<u32>,
        methods: Vec<u32>,
        bodies: Vec<usize>,
        stop_after_first_class: bool,
        stop_after_first_member: bool,
    }

    impl DexVisitor for Recorder {
        fn visit_class(&mut self, class: &ClassDef) -> Descend {
            self.classes.push(class.class_idx);
            Descend::All
        }

        fn visit_field(&mut self, _class: &ClassDef, field: &EncodedField) {
            self.fields.push(field.field_idx);
        }

        fn visit_method(&mut self, _class: &ClassDef, method: &EncodedMethod) -> bool {
            self.methods.push(method.method_idx);
            true
        }

        fn visit_method_body(&mut self, _method: &EncodedMethod, body: &MethodBody) {
            self.bodies.push(body.opcodes.len());
        }

        fn stop_members(&self) -> bool {
            self.stop_after_first_member
        }

        fn stop(&self) -> bool {
            self.stop_after_first_class
        }
    }

    #[test]
    fn visitor_walks_everything() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::default()).unwrap();

        let mut recorder = Recorder::default();
        dex.visit_defined_classes(&mut recorder).unwrap();
        assert_eq!(recorder.classes.len(), 2);
        assert_eq!(recorder.fields, vec![sample.counter]);
        assert_eq!(recorder.methods, vec![sample.helper, sample.run]);
        // only `run` has code
        assert_eq!(recorder.bodies, vec![5]);
    }

    #[test]
    fn visitor_stops_early() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::default()).unwrap();

        let mut recorder = Recorder {
            stop_after_first_class: true,
            stop_after_first_member: true,
            ..Recorder::default()
        };
        dex.visit_defined_classes(&mut recorder).unwrap();
        assert_eq!(recorder.classes.len(), 1);
        assert_eq!(recorder.fields.len(), 1);
        assert_eq!(recorder.methods, vec![sample.helper]);
        assert!(recorder.bodies.is_empty());
    }

    #[test]
    fn annotations_are_collected() {
        let mut builder = DexBuilder::new();
        let run = builder.method("LFoo;", "run", "V", &[]);
        let foo = builder.class("LFoo;", "Ljava/lang/Object;");
        builder.virtual_method(foo, run, 0x0001, Some(&[0x000E]));
        builder.class_annotation(
            foo,
            (
                0x01,
                "Lcom/example/Keep;".to_string(),
                vec![("level".to_string(), vec![0x04, 0x03])],
            ),
        );
        builder.method_annotation(foo, run, (0x02, "Ldalvik/annotation/Signature;".to_string(), vec![]));
        let image = builder.build();

        let dex = DexParser::open(&image, DexOptions::default()).unwrap();
        let foo = dex.find_class("LFoo;").unwrap();
        assert_eq!(dex.annotations().len(), 2);

        let keep = &dex.annotations()[foo.annotations[0] as usize];
        assert_eq!(keep.visibility, AnnotationVisibility::Runtime);
        assert_eq!(&**dex.type_descriptor(keep.type_idx).unwrap(), "Lcom/example/Keep;");
        assert_eq!(&**dex.string(keep.elements[0].name).unwrap(), "level");
        assert_eq!(keep.elements[0].value, EncodedValue::Int(3));

        let signature = &dex.annotations()[foo.virtual_methods[0].annotations[0] as usize];
        assert_eq!(signature.visibility, AnnotationVisibility::System);

        let dex = DexParser::open(&image, DexOptions::minimal()).unwrap();
        assert!(dex.annotations().is_empty());
        assert!(dex.find_class("LFoo;").unwrap().annotations.is_empty());
    }

    #[test]
    fn broken_class_data_has_context() {
        let sample = sample();
        let dex = DexParser::open(&sample.image, DexOptions::minimal()).unwrap();
        let header = dex.header().clone();
        drop(dex);

        // point the first class at a class_data_off past the end of the image
        let mut image = sample.image.clone();
        let at = header.class_defs_off as usize + 24;
        image[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = DexParser::open(&image, DexOptions::minimal()).unwrap_err();
        let context = err.context();
        assert!(context.iter().any(|c| c.contains("class_defs[0]")));
        assert_eq!(context.last().unwrap(), "...while opening dex image");
    }

    #[test]
    fn rejects_other_formats() {
        assert!(DexParser::open(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 0], DexOptions::default()).is_err());
    }
}
