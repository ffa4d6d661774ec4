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

//! # cilweave
//!
//! An instrumentation engine for .NET application performance monitoring. `cilweave` sits behind a
//! profiler's runtime callbacks, reads the metadata of each loaded module, and rewrites the CIL of
//! selected methods so that every call reports its entry, its regular exit and its exceptional
//! exit to tracer entry points of an agent assembly. Everything else about the method stays
//! observably identical: branch targets, exception regions, return values and stack balance.
//!
//! ## Features
//!
//! - **Rule-based selection** - Type, method and parameter patterns loaded from XML
//! - **Structural rewriting** - Prologue, try/catch wrap and a single shared epilogue per method
//! - **Offset-mapped patching** - Every branch, switch table and exception clause is remapped
//! - **Isolated failures** - A method that cannot be rewritten keeps its original body
//! - **Concurrent modules** - Independent modules are processed in parallel, methods are planned
//!   on a thread pool and committed in a deterministic order
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cilweave::prelude::*;
//!
//! let rules = RuleSet::from_xml(
//!     r#"<extension>
//!          <instrumentation>
//!            <tracerFactory name="CartTracer">
//!              <match assemblyName="Shop" className="Shop.Cart">
//!                <exactMethodMatcher methodName="Total" />
//!              </match>
//!            </tracerFactory>
//!          </instrumentation>
//!        </extension>"#,
//! )?;
//!
//! let module = InMemoryModule::new(ModuleId(1), "Shop").with_method(
//!     MethodDef {
//!         token: Token::new(0x0600_0001),
//!         declaring_type: "Shop.Cart".into(),
//!         name: "Total".into(),
//!         flags: MethodAttributes::STATIC,
//!         impl_flags: 0,
//!         declaring_type_is_value: false,
//!         signature: vec![0x00, 0x00, 0x08],
//!     },
//!     // tiny body: ldc.i4.0; ret
//!     vec![(2 << 2) | 0x2, 0x16, 0x2A],
//! );
//! let module = Arc::new(module);
//!
//! let injector = ModuleInjector::new(InjectorConfig::default(), rules);
//! let report = injector.on_module_load(module.clone())?;
//!
//! assert_eq!(report.state, ModuleState::Committed);
//! assert_eq!(report.rewritten_count(), 1);
//! assert_eq!(module.commits().len(), 1);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! A module-load notification flows through the crate as follows:
//!
//! 1. [`runtime::RuntimeEventBridge`] receives the host callback and contains panics
//! 2. [`injector::ModuleInjector`] tracks module state and drives one pass per module
//! 3. [`metadata::reader::MetadataReader`] turns a method token into a descriptor
//! 4. [`policy::RuleSet`] decides whether and with which probe the method is instrumented
//! 5. [`rewriter::Rewriter`] plans the new body and emits it once tokens are allocated
//! 6. [`tokens::TokenAllocator`] mints the `MemberRef`, `TypeSpec`, signature and string tokens
//! 7. [`module::Module::commit_method_body`] hands the finished body back to the host
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Errors are split into those that
//! are local to one method (the method is skipped and reported) and those that abort the pass of
//! the whole module, see [`Error::aborts_pass`].
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: one `info` line per module pass, `warn` for skipped
//! methods and `error` for aborted passes and rejected notifications. Install any logger in the
//! host, for example `env_logger` as the tests do.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilweave::prelude::*;
///
/// let rules = RuleSet::new().with_rule(Rule::new("Shop.*", "*", "ShopTracer"));
/// let injector = ModuleInjector::new(InjectorConfig::default(), rules);
/// assert_eq!(injector.module_count(), 0);
/// ```
pub mod prelude;

/// Bounds-checked little-endian reading and writing.
///
/// The primitive layer underneath method body, exception clause and signature parsing.
pub mod io;

/// CIL instruction decoding, encoding and method body assembly based on ECMA-335 Partition III.
///
/// # Key Types
///
/// - [`assembly::Instruction`] - A decoded instruction with operand and flow information
/// - [`assembly::InstructionEncoder`] - Label-aware instruction encoder
/// - [`assembly::MethodBodyBuilder`] - Builds complete method bodies with headers and clauses
///
/// # Examples
///
/// ```rust
/// use cilweave::{assembly::decode_stream, Parser};
///
/// let instructions = decode_stream(&[0x00, 0x2A])?; // nop, ret
/// assert_eq!(instructions[1].mnemonic, "ret");
///
/// let mut parser = Parser::new(&[0x2A]);
/// assert_eq!(parser.read_le::<u8>()?, 0x2A);
/// # Ok::<(), cilweave::Error>(())
/// ```
pub mod assembly;

/// Tokens, signatures, method bodies and the Metadata Reader.
pub mod metadata;

/// The host-facing module abstraction and an in-memory implementation.
pub mod module;

/// Instrumentation rules and the selection policy.
pub mod policy;

/// Minting of new metadata tokens for rewritten methods.
pub mod tokens;

/// Planning, emitting and verifying rewritten method bodies.
pub mod rewriter;

/// Per-module state machine and the injection pass.
pub mod injector;

/// The callback surface the host runtime calls into.
pub mod runtime;

/// `cilweave` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Cursor-based parser over a byte slice
pub use io::Parser;
