use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three families which are treated very differently by the rest of the
/// crate:
///
/// ## Hook Engine Errors
/// - [`Error::NotHookable`] - The target member can not carry a trampoline (abstract, interface, field)
/// - [`Error::GenerationFailure`] - Trampoline synthesis or installation failed
/// - [`Error::TypeMismatch`] - A boxed value does not fit the declared type it is converted to
///
/// ## Binary Parser Errors
/// - [`Error::Malformed`] - Corrupted or invalid structure, tagged with the detecting source location
/// - [`Error::Parse`] - A parse failure carrying a breadcrumb trail of the nested parses it unwound
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the buffer
/// - [`Error::SessionClosed`] - A lazy operation was attempted on a closed dex session
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and Miscellaneous
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust
/// use hookscope::{Error, classfile::ClassFile};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::Parse { message, context }) => {
///         eprintln!("parse failed: {message}");
///         for line in context {
///             eprintln!("  {line}");
///         }
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Hook engine errors
    /// The member refused hooking before any trampoline work was attempted.
    ///
    /// Interface methods, abstract methods and non-executable members (fields) can not be
    /// hooked, since there is no method body for the backup entry to preserve.
    #[error("Cannot hook {member}: {reason}")]
    NotHookable {
        /// Human readable form of the rejected member
        member: String,
        /// Why the member was rejected
        reason: &'static str,
    },

    /// Trampoline synthesis or installation of the generated artifact failed.
    ///
    /// When this is returned no registry entry has been recorded for the member.
    #[error("Failed to generate trampoline - {0}")]
    GenerationFailure(String),

    /// A boxed value did not match the type it was supposed to be unboxed into.
    ///
    /// Raised by the dispatcher when a callback stored a result that is incompatible with the
    /// declared return type of the hooked member. The dispatcher converts it into a
    /// [`crate::hook::Throwable`] which is delivered to the real caller.
    #[error("Type mismatch - expected {expected}, found {found}")]
    TypeMismatch {
        /// The declared type
        expected: String,
        /// The type of the value that was supplied
        found: String,
    },

    // Binary parser errors
    /// The input is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A parse failure with positional context.
    ///
    /// Every parse layer the failure travels through appends one line to `context`, so the
    /// innermost location comes first and the outermost last.
    #[error("{message}{}", format_context(.context))]
    Parse {
        /// The root cause
        message: String,
        /// Breadcrumb trail, innermost first
        context: Vec<String>,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// An operation which needs the live session was attempted after `close()`.
    #[error("Dex session has been closed")]
    SessionClosed,

    /// This input or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    // I/O and miscellaneous
    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

fn format_context(context: &[String]) -> String {
    let mut out = String::new();
    for line in context {
        out.push('\n');
        out.push_str(line);
    }
    out
}

impl Error {
    /// Append a breadcrumb to this error, converting it into [`Error::Parse`] if necessary.
    ///
    /// Used by the nested parsers to describe where a failure happened while it unwinds,
    /// e.g. `"...while parsing cst 0x0004 at offset 0x0000001a"`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookscope::Error;
    ///
    /// let err = Error::OutOfBounds
    ///     .with_context("...while parsing attribute 0")
    ///     .with_context("...while parsing methods[1]");
    /// match err {
    ///     Error::Parse { context, .. } => assert_eq!(context.len(), 2),
    ///     _ => unreachable!(),
    /// }
    /// ```
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Parse {
                message,
                context: mut trail,
            } => {
                trail.push(context.into());
                Error::Parse {
                    message,
                    context: trail,
                }
            }
            Error::SessionClosed => Error::SessionClosed,
            other => Error::Parse {
                message: other.to_string(),
                context: vec![context.into()],
            },
        }
    }

    /// Returns the breadcrumb trail if this is a parse error.
    #[must_use]
    pub fn context(&self) -> &[String] {
        match self {
            Error::Parse { context, .. } => context,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_grows_outwards() {
        let err = malformed_error!("unknown tag byte: {:#04x}", 0x13)
            .with_context("...while preparsing cst 0x0002 at offset 0x0000000d")
            .with_context("...while parsing constant pool");

        let Error::Parse { message, context } = &err else {
            panic!("expected parse error");
        };
        assert!(message.contains("unknown tag byte: 0x13"));
        assert_eq!(context.len(), 2);
        assert!(context[0].contains("cst 0x0002"));
        assert!(err.to_string().ends_with("...while parsing constant pool"));
    }

    #[test]
    fn session_closed_is_not_wrapped() {
        let err = Error::SessionClosed.with_context("...while decoding method 3");
        assert!(matches!(err, Error::SessionClosed));
    }

    #[test]
    fn non_parse_errors_have_no_context() {
        assert!(Error::OutOfBounds.context().is_empty());
    }
}
