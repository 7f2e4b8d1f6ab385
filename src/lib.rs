// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # hookscope
//!
//! A method hooking engine for Java-style runtimes, together with the binary parsers needed
//! to find what to hook. `hookscope` intercepts methods and constructors, runs an ordered
//! chain of `before` / `after` callbacks around the original body and reconciles results and
//! exceptions, and it reads Java classfiles and Android dex images to resolve the members
//! those hooks target.
//!
//! ## Features
//!
//! - **Ordered callback chains** - Priority ordered, strictly nested `before` / `after` stages
//!   with early return, argument rewriting and result or exception override
//! - **Failure isolation** - A failing callback is logged and undone; it never breaks the
//!   hooked call or other callbacks
//! - **Lock-free dispatch** - Every call walks an immutable snapshot of its callbacks
//! - **Cached trampolines** - One trampoline per member, generated at most once and persisted
//!   in a self-validating disk cache
//! - **Classfile parsing** - Lazily resolved constant pool, pluggable attribute factories
//! - **Dex parsing** - Id tables, class definitions, annotations and memoized per-method
//!   instruction facts with an explicit session lifecycle
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hookscope::prelude::*;
//!
//! let runtime = Arc::new(MethodTable::new());
//! let greet = Member::from_descriptor("com/example/Greeter", "greet", "(Ljava/lang/String;)Ljava/lang/String;", MemberFlags::STATIC)?;
//! runtime.define(&greet, |_, args| {
//!     Ok(Value::from(format!("Hello, {}", args[0].as_str().unwrap_or("?"))))
//! });
//!
//! let engine = HookEngine::new(runtime.clone(), HookConfig::in_memory());
//! engine.hook_method(&greet, HookCallback::new().before(|param| {
//!     param.args[0] = Value::from("hooked");
//!     Ok(())
//! }))?;
//!
//! let greeting = runtime.invoke(&greet, None, &[Value::from("world")]);
//! assert_eq!(greeting, Ok(Value::from("Hello, hooked")));
//! # Ok::<(), hookscope::Error>(())
//! ```
//!
//! ### Resolving members from a dex image
//!
//! ```rust,no_run
//! use hookscope::prelude::*;
//!
//! let file = File::from_file("classes.dex".as_ref())?;
//! let dex = DexParser::from_file(file, DexOptions::minimal())?;
//! if let Some(class) = dex.find_class("Lcom/example/Main;") {
//!     for member in Member::declared_by_dex(&dex, class)? {
//!         println!("{member}");
//!     }
//! }
//! dex.close();
//! # Ok::<(), hookscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Owned or memory-mapped input buffers and the bounds checked [`Parser`] cursor
//! - [`classfile`] - Constant pool, attributes, members and the [`classfile::ClassFile`] model
//! - [`dex`] - The [`dex::DexParser`] session and its tables
//! - [`hook`] - Members, callbacks, registry, trampolines and the [`hook::HookEngine`]
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Parse failures carry a breadcrumb trail of
//! the nested structures they unwound through (see [`Error::context`]). Failures inside a
//! hooked call are [`hook::Throwable`]s delivered to the caller instead.
//!
//! ## Logging
//!
//! `hookscope` logs through the [`log`](https://docs.rs/log) facade and never installs a
//! logger itself.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Input buffers and the binary cursor shared by all parsers
pub mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use hookscope::prelude::*;
///
/// let member = Member::from_descriptor("a/B", "run", "()V", MemberFlags::empty())?;
/// assert_eq!(member.to_string(), "a.B#run()void");
/// # Ok::<(), hookscope::Error>(())
/// ```
pub mod prelude;

/// Java classfile parsing
///
/// The constant pool is located in one pass and resolved on demand, so constants may
/// reference slots that appear later in the byte stream. Attributes are recognized by a
/// pluggable [`classfile::AttributeFactory`]; unknown ones are kept as raw bytes.
pub mod classfile;

pub mod dex;

pub mod hook;

/// `hookscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `hookscope` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the variants.
pub use error::Error;

/// Provides access to low-level file and memory parsing utilities.
///
/// The [`Parser`] type is used by every binary format in this crate and is exposed for
/// callers that need to decode auxiliary data the same way.
///
/// # Examples
///
/// ```rust
/// use hookscope::Parser;
///
/// let mut parser = Parser::new(&[0xCA, 0xFE, 0xBA, 0xBE, 0x01]);
/// assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
/// assert_eq!(parser.read_uleb128()?, 1);
/// # Ok::<(), hookscope::Error>(())
/// ```
pub use file::{parser::Parser, File};
