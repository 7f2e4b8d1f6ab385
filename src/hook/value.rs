//! Boxed values travelling through a hooked invocation.
//!
//! Arguments, receivers and results cross the dispatcher as [`Value`]s: primitives keep their
//! exact wrapper kind, strings are interned, and everything the engine can not look into is
//! an opaque [`Object`]. Unboxing into a declared [`JavaType`] is strict; an `Int` never
//! silently becomes a `Long`.

use std::{any::Any, fmt, sync::Arc};

use crate::{classfile::JavaType, Error, Result};

/// An opaque runtime object.
pub type Object = Arc<dyn Any + Send + Sync>;

/// A boxed argument, receiver or result.
#[derive(Clone, Default)]
pub enum Value {
    /// `null`, also the result of a `void` method
    #[default]
    Null,
    /// `java.lang.Boolean`
    Boolean(bool),
    /// `java.lang.Byte`
    Byte(i8),
    /// `java.lang.Character`
    Char(u16),
    /// `java.lang.Short`
    Short(i16),
    /// `java.lang.Integer`
    Int(i32),
    /// `java.lang.Long`
    Long(i64),
    /// `java.lang.Float`
    Float(f32),
    /// `java.lang.Double`
    Double(f64),
    /// `java.lang.String`
    String(Arc<str>),
    /// Any other object, with the internal name of its class
    Object {
        /// Internal name, e.g. `android/app/Activity`
        class: Arc<str>,
        /// The object itself
        value: Object,
    },
}

impl Value {
    /// Box an opaque object of class `class`.
    ///
    /// `class` is an internal name such as `android/app/Activity`; a binary name
    /// (`android.app.Activity`) is converted to the internal form.
    pub fn object<T: Any + Send + Sync>(class: &str, value: T) -> Value {
        Value::Object {
            class: class.replace('.', "/").into(),
            value: Arc::new(value),
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The binary class name of the boxed value (`java.lang.Integer`), `null` for
    /// [`Value::Null`].
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Boolean(_) => "java.lang.Boolean".into(),
            Value::Byte(_) => "java.lang.Byte".into(),
            Value::Char(_) => "java.lang.Character".into(),
            Value::Short(_) => "java.lang.Short".into(),
            Value::Int(_) => "java.lang.Integer".into(),
            Value::Long(_) => "java.lang.Long".into(),
            Value::Float(_) => "java.lang.Float".into(),
            Value::Double(_) => "java.lang.Double".into(),
            Value::String(_) => "java.lang.String".into(),
            Value::Object { class, .. } => class.replace('/', "."),
        }
    }

    fn primitive(&self) -> Option<JavaType> {
        Some(match self {
            Value::Boolean(_) => JavaType::Boolean,
            Value::Byte(_) => JavaType::Byte,
            Value::Char(_) => JavaType::Char,
            Value::Short(_) => JavaType::Short,
            Value::Int(_) => JavaType::Int,
            Value::Long(_) => JavaType::Long,
            Value::Float(_) => JavaType::Float,
            Value::Double(_) => JavaType::Double,
            _ => return None,
        })
    }

    /// Returns `true` if this value may be passed where `ty` is declared.
    ///
    /// Primitive types need the exact wrapper. Reference types accept `null`, strings only
    /// where a string is assignable, boxed primitives only as their wrapper or a common
    /// supertype, and opaque objects anywhere a reference is expected.
    #[must_use]
    pub fn fits(&self, ty: &JavaType) -> bool {
        match ty {
            JavaType::Void => true,
            JavaType::Object(name) => match self {
                Value::Null | Value::Object { .. } => true,
                Value::String(_) => matches!(
                    name.as_ref(),
                    "java/lang/String"
                        | "java/lang/Object"
                        | "java/lang/CharSequence"
                        | "java/lang/Comparable"
                        | "java/io/Serializable"
                ),
                boxed => {
                    name.as_ref() == "java/lang/Object"
                        || name.as_ref() == "java/io/Serializable"
                        || boxed.type_name() == ty.java_name()
                        || (name.as_ref() == "java/lang/Number"
                            && !matches!(boxed, Value::Boolean(_) | Value::Char(_)))
                }
            },
            JavaType::Array(_) => matches!(self, Value::Null | Value::Object { .. }),
            primitive => self.primitive().as_ref() == Some(primitive),
        }
    }

    /// Check this value against a declared type, producing what the caller receives.
    ///
    /// A `void` declaration always yields [`Value::Null`].
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the value does not fit `ty`.
    pub fn conform(self, ty: &JavaType) -> Result<Value> {
        if *ty == JavaType::Void {
            return Ok(Value::Null);
        }
        if self.fits(ty) {
            Ok(self)
        } else {
            Err(Error::TypeMismatch {
                expected: ty.boxed_name(),
                found: self.type_name(),
            })
        }
    }

    /// The `int` payload, if this is an [`Value::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The `long` payload, if this is an [`Value::Long`].
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The `boolean` payload, if this is an [`Value::Boolean`].
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast an opaque object.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object { value, .. } => value.downcast_ref(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            // objects compare by identity
            (Value::Object { value: a, .. }, Value::Object { value: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}b"),
            Value::Char(v) => write!(f, "'\\u{v:04x}'"),
            Value::Short(v) => write!(f, "{v}s"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Float(v) => write!(f, "{v}f"),
            Value::Double(v) => write!(f, "{v}d"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Object { class, value } => {
                write!(f, "{}@{:p}", class.replace('/', "."), Arc::as_ptr(value))
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

/// An exception travelling through a hooked invocation.
///
/// Thrown by original bodies and by callbacks, stored in the hook context's throwable slot and
/// finally delivered to the real caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    class: Arc<str>,
    message: Option<String>,
}

impl Throwable {
    /// A throwable of class `class` (Java name, e.g. `java.lang.IllegalStateException`).
    pub fn new(class: &str, message: impl Into<String>) -> Self {
        Throwable {
            class: class.into(),
            message: Some(message.into()),
        }
    }

    /// A throwable without a message.
    #[must_use]
    pub fn bare(class: &str) -> Self {
        Throwable {
            class: class.into(),
            message: None,
        }
    }

    /// The Java class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The detail message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Raised when an argument list does not match the hooked member's signature.
    pub(crate) fn illegal_argument(message: impl Into<String>) -> Self {
        Throwable::new("java.lang.IllegalArgumentException", message)
    }

    /// Raised for a callback that panicked instead of returning.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".to_string());
        Throwable::new("java.lang.Error", message)
    }
}

impl From<Error> for Throwable {
    fn from(error: Error) -> Self {
        match error {
            Error::TypeMismatch { .. } => Throwable::new("java.lang.ClassCastException", error.to_string()),
            other => Throwable::new("java.lang.RuntimeException", other.to_string()),
        }
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class, message),
            None => f.write_str(&self.class),
        }
    }
}

impl std::error::Error for Throwable {}
