//! The module data model.
//!
//! Everything the merge engine reads and produces is expressed in these types: a [`module::Module`]
//! owns its [`typedef::TypeDef`] tree, external reference tables, resources and attributes, and
//! every cross reference is a [`token::Token`] local to the owning module.
//!
//! # Key Components
//!
//! - [`token`] - Metadata tokens and table ids
//! - [`identity`] - Module identities, versions and strong-name keys
//! - [`flags`] - Type, member and resource attribute bitflags
//! - [`signatures`] - Type and member signatures with their blob encoding
//! - [`body`] - Method bodies, instructions and exception handlers
//! - [`typedef`] - Type definitions and members
//! - [`attributes`] - Custom attributes
//! - [`module`] - The module itself, plus external references and resources
//! - [`builder`] - Fluent construction of modules in memory

pub mod attributes;
pub mod body;
pub mod builder;
pub mod flags;
pub mod identity;
pub mod module;
pub mod signatures;
pub mod token;
pub mod typedef;
