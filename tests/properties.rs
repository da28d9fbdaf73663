//! Merge-wide guarantees checked over synthetic module sets.

mod common;

use std::collections::{BTreeSet, HashMap};

use common::*;
use dotrepack::{
    image::{ImageCodec, ModuleReader},
    metadata::{
        body::{opcodes, Operand},
        builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
        identity::{ModuleIdentity, ModuleVersion},
        module::{Module, ModuleKind},
        signatures::TypeSig,
    },
    repack::rewriter::verify_reference_closure,
    ErrorKind,
};

/// A library with a chain of `Shared.T<i>` types implementing `System.IDisposable`, each holding
/// a field of the previous type and a method calling the previous type's method.
fn library(name: &str, types: usize, extra_method: &str) -> Module {
    let mut builder = ModuleBuilder::new(name, ModuleKind::Dll);
    let core = builder.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
    let disposable = builder.type_ref(core, "System", "IDisposable");
    let mut previous = None;
    for index in 0..types {
        let mut ty =
            with_methods("Shared", &format!("T{index}"), extra_method).implements(disposable);
        let mut code = vec![(opcodes::RET, Operand::None)];
        if let Some((token, method)) = previous {
            ty = ty.field("previous", TypeSig::Class(token));
            code.insert(0, (opcodes::CALL, Operand::Token(method)));
        }
        ty = ty.method(MethodBuilder::new("Step", void()).code(code));

        let token = builder.add_type(ty);
        previous = Some((token, builder.method_token(token, "Step").unwrap()));
    }
    builder.add_type(TypeBuilder::new(name, "Owner"));
    builder.build().unwrap()
}

fn member_names(module: &Module) -> HashMap<String, BTreeSet<String>> {
    module
        .types
        .iter()
        .map(|ty| {
            let members = ty
                .methods
                .iter()
                .map(|method| method.name.clone())
                .chain(ty.fields.iter().map(|field| field.name.clone()))
                .collect();
            (ty.qualified_name(), members)
        })
        .collect()
}

#[test]
fn merges_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &library("App", 3, "Run"), "dll");
    write(dir.path(), &library("Lib", 4, "Other"), "dll");
    write(dir.path(), &library("Util", 2, ""), "dll");

    let build = |output: &str, parallel: bool| {
        options(dir.path(), &["App.dll", "Lib.dll", "Util.dll"])
            .output(output)
            .internalize(true)
            .parallel(parallel)
            .build()
    };

    let first = repack(build("first/Merged.dll", true)).0.unwrap();
    let second = repack(build("second/Merged.dll", true)).0.unwrap();
    let sequential = repack(build("sequential/Merged.dll", false)).0.unwrap();

    let first = std::fs::read(first.output).unwrap();
    assert_eq!(first, std::fs::read(second.output).unwrap());
    assert_eq!(first, std::fs::read(sequential.output).unwrap());
}

#[test]
fn output_references_resolve_inside_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &library("App", 5, "Run"), "dll");
    write(dir.path(), &library("Lib", 5, "Run"), "dll");

    let (result, _) = repack(
        options(dir.path(), &["App.dll", "Lib.dll"])
            .internalize(true)
            .rename_internalized(true)
            .build(),
    );
    let outcome = result.unwrap();
    let output = ImageCodec.read_path(&outcome.output).unwrap();
    verify_reference_closure(&output).unwrap();

    for ty in &output.types {
        for method in &ty.methods {
            let Some(body) = &method.body else { continue };
            for instruction in &body.instructions {
                if let Operand::Token(token) = instruction.operand {
                    assert!(output.find_method(token).is_some(), "dangling {token}");
                }
            }
        }
    }
}

#[test]
fn union_merge_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let original = library("A", 4, "Run,Walk");
    write(dir.path(), &original, "dll");

    let mut copy = library("A", 4, "Run,Walk");
    copy.identity.name = "ACopy".to_string();
    copy.types.retain(|ty| ty.namespace == "Shared");
    write(dir.path(), &copy, "dll");

    let (result, _) = repack(
        options(dir.path(), &["A.dll", "ACopy.dll"])
            .union_merge(true)
            .no_manifest_resource(true)
            .build(),
    );
    let output = result.unwrap().module;

    assert_eq!(output.types.len(), original.types.len());
    assert_eq!(member_names(&output), member_names(&original));
    assert!(output
        .types
        .iter()
        .filter(|ty| ty.namespace == "Shared")
        .all(|ty| ty.interfaces.len() == 1));
    assert_eq!(output.type_refs.len(), 1);
    verify_reference_closure(&output).unwrap();
}

#[test]
fn same_input_twice_is_loaded_once() {
    let dir = tempfile::tempdir().unwrap();
    let original = library("A", 2, "Run");
    write(dir.path(), &original, "dll");

    let (result, logger) = repack(
        options(dir.path(), &["A.dll", "./A.dll"])
            .union_merge(true)
            .build(),
    );
    let outcome = result.unwrap();

    assert_eq!(outcome.merged_modules.len(), 1);
    assert_eq!(member_names(&outcome.module), member_names(&original));
    assert!(logger.warnings().iter().any(|warning| warning.contains("Duplicate input")));
}

#[test]
fn internalization_is_limited_to_selected_modules() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &module("App", ModuleKind::Exe, &[("App", "Program", "Main")]), "exe");
    write(
        dir.path(),
        &module(
            "Lib",
            ModuleKind::Dll,
            &[("Lib.Api", "Client", "Call"), ("Lib.Impl", "Worker", "Work")],
        ),
        "dll",
    );
    write(dir.path(), &module("Util", ModuleKind::Dll, &[("Util", "Strings", "Trim")]), "dll");

    let (result, _) = repack(
        options(dir.path(), &["App.exe", "Lib.dll", "Util.dll"])
            .internalize(true)
            .internalize_assembly("Lib.dll")
            .internalize_exclude_pattern(r"^Lib\.Api\.")
            .build(),
    );
    let output = result.unwrap().module;

    let public = |name: &str| output.find_type_by_name(name).unwrap().flags.is_public();
    assert!(public("App.Program"));
    assert!(public("Lib.Api.Client"));
    assert!(!public("Lib.Impl.Worker"));
    assert!(public("Util.Strings"));
}

#[test]
fn colliding_public_names_never_survive_twice() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["A", "B", "C", "D"];
    for (index, name) in names.iter().enumerate() {
        write(dir.path(), &library(name, index + 2, "Run"), "dll");
    }
    let inputs = names.iter().map(|name| format!("{name}.dll")).collect::<Vec<_>>();
    let inputs = inputs.iter().map(String::as_str).collect::<Vec<_>>();

    let (result, _) = repack(options(dir.path(), &inputs).internalize(true).build());
    let output = result.unwrap().module;

    let mut public = HashMap::<String, usize>::new();
    for ty in output.types.iter().filter(|ty| ty.flags.is_public()) {
        *public.entry(ty.qualified_name()).or_default() += 1;
    }
    assert!(public.values().all(|&count| count == 1), "{public:?}");
    assert_eq!(public.get("Shared.T0"), Some(&1));

    let (result, _) = repack(options(dir.path(), &inputs).build());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::PolicyConflict);
}
