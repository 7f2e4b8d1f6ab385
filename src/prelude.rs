//! # hookscope Prelude
//!
//! The types most programs need, for glob import:
//!
//! ```rust
//! use hookscope::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all hookscope operations
pub use crate::Error;

/// The result type used throughout hookscope
pub use crate::Result;

/// Input buffers and the binary cursor
pub use crate::{File, Parser};

// ================================================================================================
// Hooking
// ================================================================================================

pub use crate::hook::{
    HookCallback, HookConfig, HookEngine, LoadPackageCallback, LoadPackageEvent, Member,
    MemberFlags, MethodHookParam, MethodTable, ReplacementRuntime, Throwable, UnhookHandle,
    Value, PRIORITY_DEFAULT, PRIORITY_HIGHEST, PRIORITY_LOWEST,
};

// ================================================================================================
// Binary Formats
// ================================================================================================

pub use crate::classfile::{AccessFlags, ClassFile, ClassMember, ConstantPool, JavaType, MethodDescriptor};

pub use crate::dex::{ClassDef, DexOptions, DexParser, DexVisitor, EncodedMethod, MethodBody};
