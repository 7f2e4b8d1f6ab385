//! JVM classfile structure parsing.
//!
//! This module turns a raw classfile into a structured, read-only model that is used to
//! locate hook targets (declaring type, name, descriptor, flags) and to inspect method
//! bodies. The parse is layered the same way the format is:
//!
//! 1. [`ConstantPoolParser`] - two-pass pool parse with recursive, memoized resolution
//! 2. [`MemberListParser`] - the `fields` and `methods` tables
//! 3. [`AttributeListParser`] - attribute lists in class, field, method and code context,
//!    delegating payloads to a pluggable [`AttributeFactory`]
//! 4. [`ClassFile`] - the façade tying everything together
//!
//! # Key Types
//! - [`ClassFile`]: Parsed class
//! - [`ConstantPool`], [`Constant`]: Resolved constant pool
//! - [`ClassMember`], [`AccessFlags`]: Fields and methods
//! - [`Attribute`], [`StdAttributeFactory`], [`RawAttribute`]: Attributes
//! - [`JavaType`], [`MethodDescriptor`]: Descriptor model
//!
//! # Error Handling
//!
//! Every failure is fatal to the parse and surfaces as [`crate::Error::Parse`] with a
//! breadcrumb trail, innermost first:
//!
//! ```text
//! Malformed - src/classfile/pool.rs:44: invalid constant pool index 0x0009
//! ...while parsing cst 0x0002 at offset 0x0000000f
//! ...while parsing cst 0x0001 at offset 0x0000000a
//! ...while parsing class file
//! ```

pub mod attributes;
#[allow(clippy::module_inception)]
mod classfile;
mod constants;
mod cstparser;
mod descriptor;
mod members;
mod pool;

pub use attributes::{
    Attribute, AttributeContext, AttributeFactory, AttributeList, AttributeListParser,
    AttributeSource, CodeAttribute, ExceptionHandler, LineNumber, RawAttribute,
    RawAttributeFactory, StdAttributeFactory,
};
pub use classfile::{ClassFile, CLASS_MAGIC};
pub use constants::{
    Constant, ConstantRc, ConstantTag, MemberRef, MethodHandleKind, NameAndType,
};
pub use cstparser::ConstantPoolParser;
pub use descriptor::{JavaType, MethodDescriptor};
pub use members::{AccessFlags, ClassMember, MemberKind, MemberListParser};
pub use pool::ConstantPool;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::ClassFileBuilder, Error};

    #[test]
    fn parse_simple_class() {
        let mut builder = ClassFileBuilder::new("com/example/Foo", Some("java/lang/Object"));
        builder.interface("java/lang/Runnable");
        builder.source_file("Foo.java");
        builder.field(0x0002, "count", "I", Vec::new());
        let code = builder.code(2, 1, &[0x2A, 0xB7, 0x00, 0x01, 0xB1], &[], Vec::new());
        builder.method(0x0001, "<init>", "()V", vec![code]);
        builder.method(0x0401, "run", "()V", Vec::new());
        let bytes = builder.build();

        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.this_class().as_ref(), "com/example/Foo");
        assert_eq!(class.super_class().unwrap().as_ref(), "java/lang/Object");
        assert_eq!(class.interfaces().len(), 1);
        assert_eq!(class.version(), (52, 0));
        assert_eq!(class.source_file().unwrap().as_ref(), "Foo.java");
        assert!(!class.is_interface());

        assert_eq!(class.fields().len(), 1);
        assert_eq!(class.fields()[0].access_flags, AccessFlags::PRIVATE);

        let init = class.find_method("<init>", "()V").unwrap();
        assert!(init.is_initializer());
        let code = init.attributes.code().unwrap();
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.code, vec![0x2A, 0xB7, 0x00, 0x01, 0xB1]);

        let run = class.find_method("run", "()V").unwrap();
        assert!(run.access_flags.contains(AccessFlags::ABSTRACT));
        assert!(run.attributes.code().is_none());
    }

    #[test]
    fn code_attribute_with_handlers_and_lines() {
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let catch = builder.class("java/io/IOException");
        let lines = builder.attribute("LineNumberTable", &[0, 1, 0, 0, 0, 10]);
        let unknown = builder.attribute("StackMapTable", &[0, 0]);
        let code = builder.code(
            1,
            1,
            &[0x00, 0x00, 0x00, 0xB1],
            &[(0, 2, 3, catch), (0, 2, 3, 0)],
            vec![lines, unknown],
        );
        builder.method(0x0009, "m", "()V", vec![code]);
        let bytes = builder.build();

        let class = ClassFile::parse(&bytes).unwrap();
        let code = class.methods()[0].attributes.code().unwrap();
        assert_eq!(code.exception_table.len(), 2);
        assert_eq!(
            code.exception_table[0].catch_type.as_deref(),
            Some("java/io/IOException")
        );
        assert!(code.exception_table[1].catch_type.is_none());

        assert_eq!(code.attributes.len(), 2);
        let Some(Attribute::LineNumberTable(lines)) = code.attributes.find("LineNumberTable")
        else {
            panic!("line numbers must be recognized in code context");
        };
        assert_eq!(lines[0].line_number, 10);
        assert!(matches!(
            code.attributes.find("StackMapTable"),
            Some(Attribute::Raw(_))
        ));
    }

    #[test]
    fn context_decides_recognition() {
        // LineNumberTable outside of Code is kept raw
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let lines = builder.attribute("LineNumberTable", &[0, 0]);
        builder.field(0x0008, "f", "J", vec![lines]);
        let bytes = builder.build();

        let class = ClassFile::parse(&bytes).unwrap();
        assert!(matches!(
            class.fields()[0].attributes.iter().next(),
            Some(Attribute::Raw(raw)) if raw.name.as_ref() == "LineNumberTable"
        ));
    }

    #[test]
    fn constant_value_and_exceptions() {
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let value = builder.integer(42);
        let constant = builder.attribute("ConstantValue", &value.to_be_bytes());
        builder.field(0x0019, "ANSWER", "I", vec![constant]);

        let io = builder.class("java/io/IOException");
        let mut payload = vec![0, 1];
        payload.extend_from_slice(&io.to_be_bytes());
        let exceptions = builder.attribute("Exceptions", &payload);
        let deprecated = builder.attribute("Deprecated", &[]);
        builder.method(0x0401, "read", "()I", vec![exceptions, deprecated]);
        let bytes = builder.build();

        let class = ClassFile::parse(&bytes).unwrap();
        let Some(Attribute::ConstantValue(value)) = class.fields()[0].attributes.find("ConstantValue")
        else {
            panic!("expected a constant value");
        };
        assert_eq!(**value, Constant::Integer(42));

        let method = &class.methods()[0];
        let Some(Attribute::Exceptions(classes)) = method.attributes.find("Exceptions") else {
            panic!("expected exceptions");
        };
        assert_eq!(classes[0].as_ref(), "java/io/IOException");
        assert!(method.attributes.find("Deprecated").is_some());
    }

    #[test]
    fn raw_factory_keeps_everything_raw() {
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        builder.source_file("A.java");
        let bytes = builder.build();

        let class = ClassFile::parse_with(&bytes, &RawAttributeFactory).unwrap();
        assert!(class.source_file().is_none());
        let Some(Attribute::Raw(raw)) = class.attributes().find("SourceFile") else {
            panic!("expected raw attribute");
        };
        assert_eq!(raw.data.len(), 2);
    }

    #[test]
    fn bad_attribute_length_is_rejected() {
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let bogus = builder.attribute("Synthetic", &[0]);
        builder.method(0x0001, "m", "()V", vec![bogus]);
        let bytes = builder.build();

        let err = ClassFile::parse(&bytes).unwrap_err();
        let context = err.context();
        assert_eq!(
            context,
            &[
                "...while parsing attributes[0]".to_string(),
                "...while parsing methods[0]".to_string(),
                "...while parsing class file".to_string(),
            ]
        );
    }

    #[test]
    fn bad_magic_and_trailing_bytes() {
        let err = ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 0x34, 0, 1]).unwrap_err();
        assert!(err.to_string().contains("bad class file magic"));

        let mut bytes = ClassFileBuilder::new("A", None).build();
        assert!(ClassFile::parse(&bytes).is_ok());
        bytes.push(0);
        assert!(matches!(ClassFile::parse(&bytes), Err(Error::Parse { .. })));

        assert!(ClassFile::parse(&[0xCA, 0xFE]).is_err());
    }

    #[test]
    fn forward_referenced_method_ref() {
        let mut builder = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let index = builder.method_ref_forward("java/io/PrintStream", "println", "(I)V");
        let bytes = builder.build();

        let class = ClassFile::parse(&bytes).unwrap();
        let method = class.pool().member_ref(index).unwrap();
        assert_eq!(method.class.as_ref(), "java/io/PrintStream");
        assert_eq!(method.nat.descriptor.as_ref(), "(I)V");
    }
}
