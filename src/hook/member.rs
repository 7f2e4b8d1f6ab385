//! Hook targets.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use bitflags::bitflags;

use crate::{
    classfile::{AccessFlags, ClassFile, ClassMember, JavaType, MemberKind, MethodDescriptor},
    dex::{ClassDef, DexParser, EncodedMethod},
    Result,
};

bitflags! {
    /// Properties of a [`Member`] that decide whether and how it can be hooked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemberFlags: u32 {
        /// No receiver
        const STATIC = 0x0001;
        /// No body
        const ABSTRACT = 0x0002;
        /// Declared by an interface
        const INTERFACE = 0x0004;
        /// An instance initializer
        const CONSTRUCTOR = 0x0008;
        /// A field; never executable
        const FIELD = 0x0010;
        /// Implemented natively
        const NATIVE = 0x0020;
        /// Part of the reflective call path the dispatcher itself goes through
        const BRIDGE_INTERNAL = 0x0040;
        /// Takes a trailing variable argument array
        const VARARGS = 0x0080;
    }
}

impl MemberFlags {
    /// Translate classfile / dex access flags. `interface` describes the declaring class.
    #[must_use]
    pub fn from_access(access: AccessFlags, interface: bool) -> MemberFlags {
        let mut flags = MemberFlags::empty();
        flags.set(MemberFlags::STATIC, access.contains(AccessFlags::STATIC));
        flags.set(MemberFlags::ABSTRACT, access.contains(AccessFlags::ABSTRACT));
        flags.set(MemberFlags::NATIVE, access.contains(AccessFlags::NATIVE));
        flags.set(MemberFlags::VARARGS, access.contains(AccessFlags::VARARGS));
        flags.set(MemberFlags::CONSTRUCTOR, access.contains(AccessFlags::CONSTRUCTOR));
        flags.set(MemberFlags::INTERFACE, interface);
        flags
    }
}

struct MemberData {
    declaring_class: Arc<str>,
    name: Arc<str>,
    params: Vec<JavaType>,
    ret: JavaType,
    flags: MemberFlags,
}

/// A method, constructor or field of the target runtime.
///
/// Cheap to clone. Two members are equal when they name the same declaring class, name and
/// signature; flags do not take part in equality, so a member resolved from a classfile and one
/// resolved from a dex image refer to the same hook target.
#[derive(Clone)]
pub struct Member {
    data: Arc<MemberData>,
}

impl Member {
    /// A method of `declaring_class` (internal name, e.g. `com/example/Foo`).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid method descriptor.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookscope::hook::{Member, MemberFlags};
    ///
    /// let member = Member::from_descriptor("com/example/Foo", "bar", "(ILjava/lang/String;)J", MemberFlags::empty())?;
    /// assert_eq!(member.to_string(), "com.example.Foo#bar(int,java.lang.String)long");
    /// # Ok::<(), hookscope::Error>(())
    /// ```
    pub fn from_descriptor(
        declaring_class: &str,
        name: &str,
        descriptor: &str,
        flags: MemberFlags,
    ) -> Result<Member> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let mut flags = flags;
        // constructors are always instance members returning void
        let ret = if name == "<init>" {
            flags.insert(MemberFlags::CONSTRUCTOR);
            flags.remove(MemberFlags::STATIC);
            JavaType::Void
        } else {
            descriptor.ret
        };

        Ok(Member::build(declaring_class, name, descriptor.params, ret, flags))
    }

    /// A constructor of `declaring_class` taking `descriptor`'s parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid method descriptor.
    pub fn constructor(declaring_class: &str, descriptor: &str, flags: MemberFlags) -> Result<Member> {
        Member::from_descriptor(declaring_class, "<init>", descriptor, flags)
    }

    /// A field of `declaring_class` with type descriptor `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid type descriptor.
    pub fn field(declaring_class: &str, name: &str, ty: &str, flags: MemberFlags) -> Result<Member> {
        let ty = JavaType::parse(ty)?;
        Ok(Member::build(
            declaring_class,
            name,
            Vec::new(),
            ty,
            flags | MemberFlags::FIELD,
        ))
    }

    fn build(
        declaring_class: &str,
        name: &str,
        params: Vec<JavaType>,
        ret: JavaType,
        flags: MemberFlags,
    ) -> Member {
        Member {
            data: Arc::new(MemberData {
                declaring_class: declaring_class.into(),
                name: name.into(),
                params,
                ret,
                flags,
            }),
        }
    }

    /// Resolve a member declared by a parsed classfile.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the member's descriptor is invalid.
    pub fn from_class_member(class: &ClassFile, member: &ClassMember) -> Result<Member> {
        let flags = MemberFlags::from_access(member.access_flags, class.is_interface());
        match member.kind {
            MemberKind::Field => Member::field(class.this_class(), &member.name, &member.descriptor, flags),
            MemberKind::Method => {
                Member::from_descriptor(class.this_class(), &member.name, &member.descriptor, flags)
            }
        }
    }

    /// Every method and constructor a classfile declares, static initializer excluded.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a method descriptor is invalid.
    pub fn declared_by(class: &ClassFile) -> Result<Vec<Member>> {
        class
            .methods()
            .iter()
            .filter(|m| m.name.as_ref() != "<clinit>")
            .map(|m| Member::from_class_member(class, m))
            .collect()
    }

    /// Resolve a method declared in a dex image.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] if the method's
    /// ids do not resolve.
    pub fn from_dex_method(dex: &DexParser, class: &ClassDef, method: &EncodedMethod) -> Result<Member> {
        let (declaring, name, descriptor) = dex.method_signature(method.method_idx)?;
        let declaring: &str = declaring;
        let declaring = declaring
            .strip_prefix('L')
            .and_then(|d| d.strip_suffix(';'))
            .unwrap_or(declaring);
        let interface = class.access_flags.contains(AccessFlags::INTERFACE);
        let flags = MemberFlags::from_access(method.access_flags, interface);
        Member::from_descriptor(declaring, name, &descriptor.to_string(), flags)
    }

    /// Every method and constructor of a dex class definition, static initializer excluded.
    ///
    /// # Errors
    /// See [`Member::from_dex_method`].
    pub fn declared_by_dex(dex: &DexParser, class: &ClassDef) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        for method in class.methods() {
            let member = Member::from_dex_method(dex, class, method)?;
            if member.name() != "<clinit>" {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Mark this member as part of the dispatcher's own reflective call path.
    #[must_use]
    pub fn bridge_internal(self) -> Member {
        let data = &self.data;
        Member::build(
            &data.declaring_class,
            &data.name,
            data.params.clone(),
            data.ret.clone(),
            data.flags | MemberFlags::BRIDGE_INTERNAL,
        )
    }

    /// Internal name of the declaring class.
    #[must_use]
    pub fn declaring_class(&self) -> &str {
        &self.data.declaring_class
    }

    /// Simple name; `<init>` for constructors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Declared parameter types.
    #[must_use]
    pub fn params(&self) -> &[JavaType] {
        &self.data.params
    }

    /// Declared return type, the field type for fields.
    #[must_use]
    pub fn return_type(&self) -> &JavaType {
        &self.data.ret
    }

    /// Flags.
    #[must_use]
    pub fn flags(&self) -> MemberFlags {
        self.data.flags
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.data.flags.contains(MemberFlags::STATIC)
    }

    /// Returns `true` for constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.data.flags.contains(MemberFlags::CONSTRUCTOR)
    }

    /// Returns `true` for methods and constructors.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        !self.data.flags.contains(MemberFlags::FIELD)
    }

    /// The JVM method descriptor, e.g. `(ILjava/lang/String;)V`.
    #[must_use]
    pub fn descriptor(&self) -> String {
        MethodDescriptor {
            params: self.data.params.clone(),
            ret: self.data.ret.clone(),
        }
        .to_string()
    }

    /// `class#name(desc)`, the string the trampoline id is derived from.
    #[must_use]
    pub fn qualified_signature(&self) -> String {
        format!(
            "{}#{}{}",
            self.data.declaring_class,
            self.data.name,
            self.descriptor()
        )
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            || (self.data.declaring_class == other.data.declaring_class
                && self.data.name == other.data.name
                && self.data.params == other.data.params
                && self.data.ret == other.data.ret
                && self.is_executable() == other.is_executable())
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.declaring_class.hash(state);
        self.data.name.hash(state);
        self.data.params.hash(state);
        self.data.ret.hash(state);
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.data.declaring_class.replace('/', ".");
        if !self.is_executable() {
            return write!(f, "{class}#{}:{}", self.data.name, self.data.ret.java_name());
        }

        write!(f, "{class}#{}(", self.data.name)?;
        for (i, param) in self.data.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&param.java_name())?;
        }
        write!(f, "){}", self.data.ret.java_name())
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member({self}, {:?})", self.data.flags)
    }
}
