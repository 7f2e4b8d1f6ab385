//! Field and method descriptors.
//!
//! Descriptors are the type strings the JVM and dex formats attach to fields and methods,
//! e.g. `I`, `[Ljava/lang/String;` or `(IJLjava/lang/Object;)V`. This module parses them
//! into [`JavaType`] and [`MethodDescriptor`] values which are shared by the classfile
//! model, the dex id tables and the hook engine's [`crate::hook::Member`].

use std::{fmt, sync::Arc};

use crate::Result;

/// A JVM type as written in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaType {
    /// `V`, only valid as a return type
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `Lpkg/Name;`, holding the internal name `pkg/Name`
    Object(Arc<str>),
    /// `[` followed by the component type
    Array(Box<JavaType>),
}

impl JavaType {
    /// `java/lang/Object`, the type every reference erases to.
    #[must_use]
    pub fn object() -> JavaType {
        JavaType::Object("java/lang/Object".into())
    }

    /// Parse a complete field descriptor such as `[J` or `Ljava/lang/String;`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `descriptor` is not exactly one type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookscope::classfile::JavaType;
    ///
    /// let ty = JavaType::parse("[Ljava/lang/String;")?;
    /// assert_eq!(ty.java_name(), "java.lang.String[]");
    /// # Ok::<(), hookscope::Error>(())
    /// ```
    pub fn parse(descriptor: &str) -> Result<JavaType> {
        let (ty, rest) = parse_one(descriptor.as_bytes(), descriptor)?;
        if !rest.is_empty() {
            return Err(malformed_error!(
                "trailing characters in descriptor '{}'",
                descriptor
            ));
        }
        if ty == JavaType::Void {
            return Err(malformed_error!("void is not a field type"));
        }
        Ok(ty)
    }

    /// Resolve a Java source-level name (`int`, `java.lang.String[]`) into a type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty name.
    pub fn from_java_name(name: &str) -> Result<JavaType> {
        if let Some(component) = name.strip_suffix("[]") {
            return Ok(JavaType::Array(Box::new(JavaType::from_java_name(
                component,
            )?)));
        }

        Ok(match name {
            "" => return Err(malformed_error!("empty type name")),
            "void" => JavaType::Void,
            "boolean" => JavaType::Boolean,
            "byte" => JavaType::Byte,
            "char" => JavaType::Char,
            "short" => JavaType::Short,
            "int" => JavaType::Int,
            "long" => JavaType::Long,
            "float" => JavaType::Float,
            "double" => JavaType::Double,
            other => JavaType::Object(other.replace('.', "/").into()),
        })
    }

    /// Returns `true` for the eight primitive types. `void` is not primitive.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            JavaType::Void | JavaType::Object(_) | JavaType::Array(_)
        )
    }

    /// Returns `true` for class and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_) | JavaType::Array(_))
    }

    /// Returns `true` for `long` and `double`, which take two registers or slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, JavaType::Long | JavaType::Double)
    }

    /// Erase the type for trampoline signatures: primitives and `void` are kept, every
    /// reference type becomes `java/lang/Object`.
    #[must_use]
    pub fn erased(&self) -> JavaType {
        if self.is_reference() {
            JavaType::object()
        } else {
            self.clone()
        }
    }

    /// The name as written in Java source, e.g. `int[][]` or `java.util.Map`.
    #[must_use]
    pub fn java_name(&self) -> String {
        match self {
            JavaType::Void => "void".into(),
            JavaType::Boolean => "boolean".into(),
            JavaType::Byte => "byte".into(),
            JavaType::Char => "char".into(),
            JavaType::Short => "short".into(),
            JavaType::Int => "int".into(),
            JavaType::Long => "long".into(),
            JavaType::Float => "float".into(),
            JavaType::Double => "double".into(),
            JavaType::Object(name) => name.replace('/', "."),
            JavaType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// The boxed wrapper name of a primitive (`java.lang.Integer` for `int`), or the
    /// plain Java name for everything else.
    #[must_use]
    pub fn boxed_name(&self) -> String {
        match self {
            JavaType::Boolean => "java.lang.Boolean".into(),
            JavaType::Byte => "java.lang.Byte".into(),
            JavaType::Char => "java.lang.Character".into(),
            JavaType::Short => "java.lang.Short".into(),
            JavaType::Int => "java.lang.Integer".into(),
            JavaType::Long => "java.lang.Long".into(),
            JavaType::Float => "java.lang.Float".into(),
            JavaType::Double => "java.lang.Double".into(),
            other => other.java_name(),
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Void => f.write_str("V"),
            JavaType::Boolean => f.write_str("Z"),
            JavaType::Byte => f.write_str("B"),
            JavaType::Char => f.write_str("C"),
            JavaType::Short => f.write_str("S"),
            JavaType::Int => f.write_str("I"),
            JavaType::Long => f.write_str("J"),
            JavaType::Float => f.write_str("F"),
            JavaType::Double => f.write_str("D"),
            JavaType::Object(name) => write!(f, "L{name};"),
            JavaType::Array(component) => write!(f, "[{component}"),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<JavaType>,
    /// Return type, possibly [`JavaType::Void`]
    pub ret: JavaType,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(ILjava/lang/String;[J)V`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `descriptor` is not a valid method descriptor.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookscope::classfile::{JavaType, MethodDescriptor};
    ///
    /// let desc = MethodDescriptor::parse("(ILjava/lang/String;[J)V")?;
    /// assert_eq!(desc.params.len(), 3);
    /// assert_eq!(desc.ret, JavaType::Void);
    /// assert_eq!(desc.to_string(), "(ILjava/lang/String;[J)V");
    /// # Ok::<(), hookscope::Error>(())
    /// ```
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let Some(mut rest) = descriptor.as_bytes().strip_prefix(b"(") else {
            return Err(malformed_error!(
                "method descriptor '{}' does not start with '('",
                descriptor
            ));
        };

        let mut params = Vec::new();
        loop {
            match rest.first() {
                Some(b')') => {
                    rest = &rest[1..];
                    break;
                }
                Some(_) => {
                    let (ty, tail) = parse_one(rest, descriptor)?;
                    if ty == JavaType::Void {
                        return Err(malformed_error!(
                            "void parameter in descriptor '{}'",
                            descriptor
                        ));
                    }
                    params.push(ty);
                    rest = tail;
                }
                None => {
                    return Err(malformed_error!(
                        "unterminated parameter list in '{}'",
                        descriptor
                    ))
                }
            }
        }

        let (ret, tail) = parse_one(rest, descriptor)?;
        if !tail.is_empty() {
            return Err(malformed_error!(
                "trailing characters in descriptor '{}'",
                descriptor
            ));
        }

        Ok(MethodDescriptor { params, ret })
    }

    /// Number of argument slots, counting `long`/`double` twice.
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.params
            .iter()
            .map(|p| if p.is_wide() { 2 } else { 1 })
            .sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.ret)
    }
}

fn parse_one<'d>(bytes: &'d [u8], descriptor: &str) -> Result<(JavaType, &'d [u8])> {
    let Some((&first, rest)) = bytes.split_first() else {
        return Err(malformed_error!("truncated descriptor '{}'", descriptor));
    };

    let ty = match first {
        b'V' => JavaType::Void,
        b'Z' => JavaType::Boolean,
        b'B' => JavaType::Byte,
        b'C' => JavaType::Char,
        b'S' => JavaType::Short,
        b'I' => JavaType::Int,
        b'J' => JavaType::Long,
        b'F' => JavaType::Float,
        b'D' => JavaType::Double,
        b'L' => {
            let Some(end) = rest.iter().position(|&b| b == b';') else {
                return Err(malformed_error!(
                    "unterminated class name in '{}'",
                    descriptor
                ));
            };
            if end == 0 {
                return Err(malformed_error!("empty class name in '{}'", descriptor));
            }
            let name = std::str::from_utf8(&rest[..end])
                .map_err(|_| malformed_error!("invalid class name in '{}'", descriptor))?;
            return Ok((JavaType::Object(name.into()), &rest[end + 1..]));
        }
        b'[' => {
            let (component, tail) = parse_one(rest, descriptor)?;
            if component == JavaType::Void {
                return Err(malformed_error!("array of void in '{}'", descriptor));
            }
            return Ok((JavaType::Array(Box::new(component)), tail));
        }
        other => {
            return Err(malformed_error!(
                "unexpected '{}' in descriptor '{}'",
                char::from(other),
                descriptor
            ))
        }
    };

    Ok((ty, rest))
}
