//! # dotrepack Prelude
//!
//! The types needed to configure and run a merge, plus the data model entry points used when
//! building or inspecting modules in memory.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotrepack operations
pub use crate::Error;

/// Coarse error classification
pub use crate::ErrorKind;

/// The result type used throughout dotrepack
pub use crate::Result;

// ================================================================================================
// Merge Engine
// ================================================================================================

/// Merge entry point and results
pub use crate::repack::{merge_modules, RepackOutcome, Repacker};

/// Configuration
pub use crate::repack::{MergePolicy, RepackOptions, RepackOptionsBuilder, TargetKind};

/// Logging side channel
pub use crate::repack::{FileLogger, LogForwarder, RecordingLogger, RepackLogger};

/// Strong-name signing
pub use crate::repack::signing::{KeyContainerSigner, KeyFileSigner, StrongNameSigner};

// ================================================================================================
// Module Images and Data Model
// ================================================================================================

/// Module image readers and writers
pub use crate::image::{ImageCodec, ModuleReader, ModuleWriter};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

/// Module model
pub use crate::metadata::{
    builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
    identity::{ModuleIdentity, ModuleVersion},
    module::{Module, ModuleKind},
    token::Token,
    typedef::TypeDef,
};
