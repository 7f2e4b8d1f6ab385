//! Constant pool value types.
//!
//! Every slot of a classfile constant pool resolves to exactly one [`Constant`]. Symbolic
//! references (class, field, method, name-and-type) are stored fully resolved, i.e. a
//! [`Constant::MethodRef`] carries the class name and the name/descriptor strings rather than
//! the raw indices, so consumers never have to chase indices themselves.
//!
//! # Key Types
//! - [`ConstantTag`]: The one-byte tag in front of every pool entry
//! - [`Constant`]: A resolved constant
//! - [`MemberRef`], [`NameAndType`]: Resolved symbolic references
//! - [`MethodHandleKind`]: The `reference_kind` of a `CONSTANT_MethodHandle`

use std::{fmt, sync::Arc};

use strum::{EnumCount, EnumIter};

/// A reference counted, resolved constant.
pub type ConstantRc = Arc<Constant>;

/// Tag byte of a constant pool entry.
///
/// The numeric values are the ones defined by the JVM classfile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
#[repr(u8)]
pub enum ConstantTag {
    /// `CONSTANT_Utf8`
    Utf8 = 1,
    /// `CONSTANT_Integer`
    Integer = 3,
    /// `CONSTANT_Float`
    Float = 4,
    /// `CONSTANT_Long`, occupies two slots
    Long = 5,
    /// `CONSTANT_Double`, occupies two slots
    Double = 6,
    /// `CONSTANT_Class`
    Class = 7,
    /// `CONSTANT_String`
    String = 8,
    /// `CONSTANT_Fieldref`
    FieldRef = 9,
    /// `CONSTANT_Methodref`
    MethodRef = 10,
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodRef = 11,
    /// `CONSTANT_NameAndType`
    NameAndType = 12,
    /// `CONSTANT_MethodHandle`
    MethodHandle = 15,
    /// `CONSTANT_MethodType`
    MethodType = 16,
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic = 18,
}

impl ConstantTag {
    /// Map a raw tag byte, returning `None` for unknown tags.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<ConstantTag> {
        Some(match tag {
            1 => ConstantTag::Utf8,
            3 => ConstantTag::Integer,
            4 => ConstantTag::Float,
            5 => ConstantTag::Long,
            6 => ConstantTag::Double,
            7 => ConstantTag::Class,
            8 => ConstantTag::String,
            9 => ConstantTag::FieldRef,
            10 => ConstantTag::MethodRef,
            11 => ConstantTag::InterfaceMethodRef,
            12 => ConstantTag::NameAndType,
            15 => ConstantTag::MethodHandle,
            16 => ConstantTag::MethodType,
            18 => ConstantTag::InvokeDynamic,
            _ => return None,
        })
    }

    /// Number of constant pool slots an entry with this tag occupies.
    #[must_use]
    pub fn slots(self) -> usize {
        match self {
            ConstantTag::Long | ConstantTag::Double => 2,
            _ => 1,
        }
    }

    /// Size in bytes of the fixed part of an entry, including the tag byte.
    ///
    /// For `Utf8` this is only the header (tag plus length); the payload follows.
    #[must_use]
    pub fn fixed_size(self) -> usize {
        match self {
            ConstantTag::Integer
            | ConstantTag::Float
            | ConstantTag::FieldRef
            | ConstantTag::MethodRef
            | ConstantTag::InterfaceMethodRef
            | ConstantTag::NameAndType
            | ConstantTag::InvokeDynamic => 5,
            ConstantTag::Long | ConstantTag::Double => 9,
            ConstantTag::Class
            | ConstantTag::String
            | ConstantTag::MethodType
            | ConstantTag::Utf8 => 3,
            ConstantTag::MethodHandle => 4,
        }
    }
}

/// `reference_kind` of a `CONSTANT_MethodHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum MethodHandleKind {
    /// `REF_getField`
    GetField = 1,
    /// `REF_getStatic`
    GetStatic = 2,
    /// `REF_putField`
    PutField = 3,
    /// `REF_putStatic`
    PutStatic = 4,
    /// `REF_invokeVirtual`
    InvokeVirtual = 5,
    /// `REF_invokeStatic`
    InvokeStatic = 6,
    /// `REF_invokeSpecial`
    InvokeSpecial = 7,
    /// `REF_newInvokeSpecial`
    NewInvokeSpecial = 8,
    /// `REF_invokeInterface`
    InvokeInterface = 9,
}

impl MethodHandleKind {
    /// Map a raw `reference_kind`, returning `None` for out-of-range values.
    #[must_use]
    pub fn from_u8(kind: u8) -> Option<MethodHandleKind> {
        Some(match kind {
            1 => MethodHandleKind::GetField,
            2 => MethodHandleKind::GetStatic,
            3 => MethodHandleKind::PutField,
            4 => MethodHandleKind::PutStatic,
            5 => MethodHandleKind::InvokeVirtual,
            6 => MethodHandleKind::InvokeStatic,
            7 => MethodHandleKind::InvokeSpecial,
            8 => MethodHandleKind::NewInvokeSpecial,
            9 => MethodHandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Constant tags the handle's `reference_index` may point at.
    #[must_use]
    pub fn allowed_targets(self) -> &'static [ConstantTag] {
        match self {
            MethodHandleKind::GetField
            | MethodHandleKind::GetStatic
            | MethodHandleKind::PutField
            | MethodHandleKind::PutStatic => &[ConstantTag::FieldRef],
            MethodHandleKind::InvokeVirtual | MethodHandleKind::NewInvokeSpecial => {
                &[ConstantTag::MethodRef]
            }
            MethodHandleKind::InvokeStatic | MethodHandleKind::InvokeSpecial => {
                &[ConstantTag::MethodRef, ConstantTag::InterfaceMethodRef]
            }
            MethodHandleKind::InvokeInterface => &[ConstantTag::InterfaceMethodRef],
        }
    }
}

/// A resolved `CONSTANT_NameAndType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameAndType {
    /// Member name
    pub name: Arc<str>,
    /// Field or method descriptor
    pub descriptor: Arc<str>,
}

/// A resolved field, method or interface method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the declaring class, e.g. `java/lang/String`
    pub class: Arc<str>,
    /// Name and descriptor of the member
    pub nat: NameAndType,
}

/// A fully resolved constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Modified UTF-8 string data
    Utf8(Arc<str>),
    /// 32-bit integer
    Integer(i32),
    /// 32-bit float
    Float(f32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Class reference by internal name
    Class(Arc<str>),
    /// String literal
    String(Arc<str>),
    /// Field reference
    FieldRef(MemberRef),
    /// Method reference
    MethodRef(MemberRef),
    /// Interface method reference
    InterfaceMethodRef(MemberRef),
    /// Name and type pair
    NameAndType(NameAndType),
    /// Method handle
    MethodHandle {
        /// How the handle behaves
        kind: MethodHandleKind,
        /// The referenced field or method
        reference: ConstantRc,
    },
    /// Method type by descriptor
    MethodType(Arc<str>),
    /// Dynamic call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method_index: u16,
        /// Name and descriptor of the call site
        nat: NameAndType,
    },
}

impl Constant {
    /// Returns the tag this constant was parsed from.
    #[must_use]
    pub fn tag(&self) -> ConstantTag {
        match self {
            Constant::Utf8(_) => ConstantTag::Utf8,
            Constant::Integer(_) => ConstantTag::Integer,
            Constant::Float(_) => ConstantTag::Float,
            Constant::Long(_) => ConstantTag::Long,
            Constant::Double(_) => ConstantTag::Double,
            Constant::Class(_) => ConstantTag::Class,
            Constant::String(_) => ConstantTag::String,
            Constant::FieldRef(_) => ConstantTag::FieldRef,
            Constant::MethodRef(_) => ConstantTag::MethodRef,
            Constant::InterfaceMethodRef(_) => ConstantTag::InterfaceMethodRef,
            Constant::NameAndType(_) => ConstantTag::NameAndType,
            Constant::MethodHandle { .. } => ConstantTag::MethodHandle,
            Constant::MethodType(_) => ConstantTag::MethodType,
            Constant::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
        }
    }

    /// Returns the string payload of `Utf8` constants.
    #[must_use]
    pub fn as_utf8(&self) -> Option<&Arc<str>> {
        match self {
            Constant::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the member reference of field and method constants.
    #[must_use]
    pub fn as_member_ref(&self) -> Option<&MemberRef> {
        match self {
            Constant::FieldRef(r) | Constant::MethodRef(r) | Constant::InterfaceMethodRef(r) => {
                Some(r)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Utf8(s) => write!(f, "utf8{{\"{s}\"}}"),
            Constant::Integer(v) => write!(f, "int{{{v:#010x} / {v}}}"),
            Constant::Float(v) => write!(f, "float{{{v}}}"),
            Constant::Long(v) => write!(f, "long{{{v:#018x} / {v}}}"),
            Constant::Double(v) => write!(f, "double{{{v}}}"),
            Constant::Class(s) => write!(f, "type{{{s}}}"),
            Constant::String(s) => write!(f, "string{{\"{s}\"}}"),
            Constant::FieldRef(r) => write!(f, "field{{{}.{}:{}}}", r.class, r.nat.name, r.nat.descriptor),
            Constant::MethodRef(r) => write!(f, "method{{{}.{}:{}}}", r.class, r.nat.name, r.nat.descriptor),
            Constant::InterfaceMethodRef(r) => {
                write!(f, "ifaceMethod{{{}.{}:{}}}", r.class, r.nat.name, r.nat.descriptor)
            }
            Constant::NameAndType(nat) => write!(f, "nat{{{}:{}}}", nat.name, nat.descriptor),
            Constant::MethodHandle { kind, reference } => {
                write!(f, "method-handle{{{kind:?}, {reference}}}")
            }
            Constant::MethodType(d) => write!(f, "proto{{{d}}}"),
            Constant::InvokeDynamic {
                bootstrap_method_index,
                nat,
            } => write!(
                f,
                "invoke-dynamic{{bootstrap={bootstrap_method_index}, {}:{}}}",
                nat.name, nat.descriptor
            ),
        }
    }
}
