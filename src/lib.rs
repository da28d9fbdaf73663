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
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # dotrepack
//!
//! A static linker for .NET modules. `dotrepack` merges N independently compiled modules
//! (types, members, method bodies, embedded resources and custom attributes) into one output
//! module that behaves as if all inputs were loaded together.
//!
//! ## Features
//!
//! - **Reference resolution** - Inputs, wildcards and transitive reference-only dependencies
//! - **Symbol unification** - One namespace keyed by qualified name, built in parallel
//! - **Conflict resolution** - Internalization, renaming, union merging, duplicate namespaces
//! - **Resource and attribute policies** - Duplicate handling, drop lists, linker file merging
//! - **Reference rewriting** - Every token remapped into the output's token space
//! - **Deterministic emission** - Byte-for-byte reproducible output, written atomically
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotrepack::prelude::*;
//!
//! let options = RepackOptions::builder()
//!     .input("bin/App.exe")
//!     .input("bin/Library.dll")
//!     .output("merged/App.exe")
//!     .internalize(true)
//!     .build();
//!
//! let outcome = Repacker::new(options)?.repack()?;
//! println!("Merged {} modules into {}", outcome.merged_modules.len(), outcome.output.display());
//! # Ok::<(), dotrepack::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`metadata`] - The module data model (types, members, signatures, bodies, resources)
//! - [`image`] - Module readers and writers, including the bundled [`image::ImageCodec`]
//! - [`repack`] - The merge engine and its configuration
//! - [`Error`] and [`Result`] - Error handling
//!
//! The merge runs as a strictly sequential pipeline: resolve, build the symbol table,
//! resolve conflicts, rewrite references, emit. Work inside the loading, table building and
//! rewriting stages is spread over a rayon thread pool.
//!
//! ## Error Handling
//!
//! Fatal conditions abort the merge with an [`Error`] and never leave an output file behind.
//! Advisory conditions (dropped duplicates, missing reference-only dependencies) are reported
//! through [`repack::RepackLogger`] only.
//!
//! ```rust,no_run
//! use dotrepack::{Error, repack::{RepackOptions, Repacker}};
//!
//! let options = RepackOptions::builder().input("A.dll").input("B.dll").output("AB.dll").build();
//! match Repacker::new(options).and_then(|repacker| repacker.repack()) {
//!     Ok(outcome) => println!("wrote {}", outcome.output.display()),
//!     Err(Error::Resolution { path, .. }) => println!("cannot find {path}"),
//!     Err(e) => println!("{}: {}", e.kind(), e),
//! }
//! ```

#[macro_use]
pub(crate) mod error;
pub mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dotrepack::prelude::*;
///
/// let options = RepackOptions::builder().input("A.dll").output("out/A.dll").build();
/// let outcome = Repacker::new(options)?.repack()?;
/// # Ok::<(), dotrepack::Error>(())
/// ```
pub mod prelude;

/// The module data model.
///
/// # Key Components
///
/// - [`metadata::module::Module`] - A complete module: identity, types, references, resources
/// - [`metadata::typedef::TypeDef`] - Type definitions with fields, methods, properties, events
/// - [`metadata::signatures`] - Type and member signatures
/// - [`metadata::body::MethodBody`] - Method bodies and instruction operands
/// - [`metadata::token::Token`] - Metadata tokens for cross-references
/// - [`metadata::builder`] - Fluent builders for in-memory modules
pub mod metadata;

/// Module image encoding and decoding.
pub mod image;

/// The merge engine.
///
/// See [`repack::Repacker`] for the entry point and [`repack::RepackOptions`] for the
/// configuration surface.
pub mod repack;

/// `dotrepack` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotrepack` Error type and its coarse classification.
pub use error::{Error, ErrorKind};

/// Provides access to low-level file and memory parsing utilities.
///
/// # Example
///
/// ```rust
/// use dotrepack::Parser;
/// let data = [0x2A, 0x00];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_le::<u16>()?, 0x002A);
/// # Ok::<(), dotrepack::Error>(())
/// ```
pub use file::{parser::Parser, File};
