//! Erased trampoline signatures.
//!
//! A trampoline only distinguishes primitives from references: every reference type is
//! generalized to `java/lang/Object`, so members with the same primitive shape share one
//! artifact layout. Instance members carry their receiver as a leading `Object` parameter.

use std::fmt::Write;

use sha1::{Digest, Sha1};

use crate::{
    classfile::{JavaType, MethodDescriptor},
    hook::member::Member,
    Result,
};

/// The erased shape of a hooked member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErasedSignature {
    /// Whether the first parameter is the receiver
    pub receiver: bool,
    /// Erased parameter types, receiver included
    pub params: Vec<JavaType>,
    /// Erased return type
    pub ret: JavaType,
}

impl ErasedSignature {
    /// Erase the signature of `member`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookscope::hook::{ErasedSignature, Member, MemberFlags};
    ///
    /// let member = Member::from_descriptor("a/B", "c", "(ILjava/lang/String;)[J", MemberFlags::empty())?;
    /// let erased = ErasedSignature::of(&member);
    /// assert_eq!(erased.descriptor(), "(Ljava/lang/Object;ILjava/lang/Object;)Ljava/lang/Object;");
    /// # Ok::<(), hookscope::Error>(())
    /// ```
    #[must_use]
    pub fn of(member: &Member) -> ErasedSignature {
        let receiver = !member.is_static();
        let mut params = Vec::with_capacity(member.params().len() + usize::from(receiver));
        if receiver {
            params.push(JavaType::object());
        }
        params.extend(member.params().iter().map(JavaType::erased));

        let ret = if member.is_constructor() {
            JavaType::Void
        } else {
            member.return_type().erased()
        };

        ErasedSignature {
            receiver,
            params,
            ret,
        }
    }

    /// Rebuild a signature from its descriptor form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor, or one that is not erased.
    pub fn parse(descriptor: &str, receiver: bool) -> Result<ErasedSignature> {
        let parsed = MethodDescriptor::parse(descriptor)?;
        let erased = |ty: &JavaType| *ty == ty.erased();
        if !parsed.params.iter().all(erased) || !erased(&parsed.ret) {
            return Err(malformed_error!("descriptor '{}' is not erased", descriptor));
        }
        if receiver && parsed.params.first() != Some(&JavaType::object()) {
            return Err(malformed_error!(
                "descriptor '{}' has no receiver slot",
                descriptor
            ));
        }

        Ok(ErasedSignature {
            receiver,
            params: parsed.params,
            ret: parsed.ret,
        })
    }

    /// The erased method descriptor, receiver included.
    #[must_use]
    pub fn descriptor(&self) -> String {
        MethodDescriptor {
            params: self.params.clone(),
            ret: self.ret.clone(),
        }
        .to_string()
    }

    /// Declared argument count, receiver excluded.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len() - usize::from(self.receiver)
    }

    /// Parameter types as seen by callers, receiver excluded.
    #[must_use]
    pub fn arguments(&self) -> &[JavaType] {
        &self.params[usize::from(self.receiver)..]
    }
}

/// The stable identifier of a member's trampoline: the hex SHA-1 of its qualified signature.
#[must_use]
pub fn signature_id(member: &Member) -> String {
    let digest = Sha1::digest(member.qualified_signature().as_bytes());
    let mut id = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(id, "{byte:02x}");
    }
    id
}
