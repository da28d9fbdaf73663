//! Shared helpers for the merge integration tests.

#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use dotrepack::{
    image::{ImageCodec, ModuleWriter},
    metadata::{
        attributes::{AttributeValue, CustomAttribute},
        builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
        identity::{ModuleIdentity, ModuleVersion},
        module::{Module, ModuleKind},
        signatures::{MethodSig, TypeSig},
    },
    repack::{RecordingLogger, RepackOptions, RepackOptionsBuilder, RepackOutcome, Repacker},
    Result,
};

pub fn void() -> MethodSig {
    MethodSig::new_static(TypeSig::Void, vec![])
}

/// A type with static `void` methods, named by a comma separated list.
pub fn with_methods(namespace: &str, name: &str, methods: &str) -> TypeBuilder {
    methods
        .split(',')
        .filter(|method| !method.is_empty())
        .fold(TypeBuilder::new(namespace, name), |ty, method| {
            ty.method(MethodBuilder::new(method, void()))
        })
}

/// A module declaring one type per `(namespace, name, methods)` entry.
pub fn module(name: &str, kind: ModuleKind, types: &[(&str, &str, &str)]) -> Module {
    let mut builder = ModuleBuilder::new(name, kind);
    for (namespace, ty, methods) in types {
        builder.add_type(with_methods(namespace, ty, methods));
    }
    builder.build().unwrap()
}

/// A module with string-valued assembly attributes, each typed by a reference into
/// `System.Runtime`.
pub fn with_assembly_attributes(builder: &mut ModuleBuilder, attributes: &[(&str, &str, &str)]) {
    let core = builder.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
    for (namespace, name, value) in attributes {
        let ty = builder.type_ref(core, namespace, name);
        builder.attribute(CustomAttribute::new(
            ty,
            vec![AttributeValue::String(Some((*value).to_string()))],
        ));
    }
}

/// Writes `module` as `<name>.<extension>` into `dir`.
pub fn write(dir: &Path, module: &Module, extension: &str) {
    let image = ImageCodec.write(module).unwrap();
    std::fs::write(
        dir.join(format!("{}.{extension}", module.name())),
        image.bytes,
    )
    .unwrap();
}

pub fn options(dir: &Path, inputs: &[&str]) -> RepackOptionsBuilder {
    RepackOptions::builder()
        .inputs(inputs.iter().copied())
        .output("out/Merged.dll")
        .working_directory(dir)
}

pub fn repack(options: RepackOptions) -> (Result<RepackOutcome>, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::new());
    let result = Repacker::new(options).and_then(|repacker| repacker.with_logger(logger.clone()).repack());
    (result, logger)
}

/// Names of the assembly attribute types of `module`.
pub fn attribute_names(module: &Module) -> Vec<String> {
    module
        .attributes
        .iter()
        .filter_map(|attribute| module.type_name(attribute.attribute_type))
        .collect()
}
