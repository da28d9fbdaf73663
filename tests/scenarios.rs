//! End-to-end merges of small modules written to disk.

mod common;

use common::*;
use dotrepack::{
    image::{ImageCodec, ModuleReader},
    metadata::{builder::ModuleBuilder, module::ModuleKind},
    repack::{logger::LogLevel, manifest},
};

/// Both modules declare a public `N.T`; internalization keeps the primary's public and hides the
/// secondary's under a new name.
#[test]
fn internalize_resolves_public_name_collision() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        &module("App", ModuleKind::Exe, &[("N", "T", "F")]),
        "exe",
    );
    write(
        dir.path(),
        &module("Lib", ModuleKind::Dll, &[("N", "T", "G")]),
        "dll",
    );

    let (result, logger) = repack(
        options(dir.path(), &["App.exe", "Lib.dll"])
            .internalize(true)
            .build(),
    );
    let outcome = result.unwrap();
    let output = ImageCodec.read_path(&outcome.output).unwrap();

    let public = output.find_type_by_name("N.T").unwrap();
    assert!(public.flags.is_public());
    assert_eq!(public.methods.len(), 1);
    assert_eq!(public.methods[0].name, "F");

    let hidden = output
        .types
        .iter()
        .find(|ty| ty.methods.iter().any(|method| method.name == "G"))
        .unwrap();
    assert_eq!(hidden.namespace, "N");
    assert_ne!(hidden.name, "T");
    assert!(!hidden.flags.is_public());

    assert_eq!(outcome.internalized, 1);
    assert_eq!(outcome.renamed, 1);
    assert!(logger.messages(LogLevel::Error).is_empty());
}

/// Two modules embed `data.bin`; the primary's copy wins and the drop is reported.
#[test]
fn duplicate_resource_keeps_primary_copy() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = ModuleBuilder::new("App", ModuleKind::Dll);
    app.resource("data.bin", b"primary".to_vec());
    let mut lib = ModuleBuilder::new("Lib", ModuleKind::Dll);
    lib.resource("data.bin", b"secondary".to_vec());
    write(dir.path(), &app.build().unwrap(), "dll");
    write(dir.path(), &lib.build().unwrap(), "dll");

    let (result, logger) = repack(options(dir.path(), &["App.dll", "Lib.dll"]).build());
    let outcome = result.unwrap();
    let output = ImageCodec.read_path(&outcome.output).unwrap();

    let data = output
        .resources
        .iter()
        .filter(|resource| resource.name == "data.bin")
        .collect::<Vec<_>>();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].data, b"primary");
    assert!(output
        .resources
        .iter()
        .any(|resource| resource.name == manifest::MANIFEST_RESOURCE));

    assert_eq!(logger.duplicates(), vec!["resource data.bin".to_string()]);
}

/// With an attribute source file but without `copy_attributes`, only the primary's assembly
/// attributes reach the output.
#[test]
fn attribute_file_without_copy_keeps_primary_attributes() {
    let dir = tempfile::tempdir().unwrap();

    let mut app = ModuleBuilder::new("App", ModuleKind::Dll);
    with_assembly_attributes(
        &mut app,
        &[("System.Reflection", "AssemblyTitleAttribute", "App")],
    );
    write(dir.path(), &app.build().unwrap(), "dll");
    write(dir.path(), &module("Lib", ModuleKind::Dll, &[]), "dll");

    let mut attributes = ModuleBuilder::new("Attributes", ModuleKind::Dll);
    with_assembly_attributes(&mut attributes, &[("Build", "BuildVersion", "1.2")]);
    write(dir.path(), &attributes.build().unwrap(), "dll");

    let base = options(dir.path(), &["App.dll", "Lib.dll"]).attribute_file("Attributes.dll");

    let (result, _) = repack(base.clone().build());
    let output = result.unwrap().module;
    assert_eq!(
        attribute_names(&output),
        vec!["System.Reflection.AssemblyTitleAttribute".to_string()]
    );

    let (result, _) = repack(base.copy_attributes(true).build());
    let output = result.unwrap().module;
    assert_eq!(attribute_names(&output), vec!["Build.BuildVersion".to_string()]);
}

/// Types calling across module boundaries end up calling definitions of the merged output.
#[test]
fn cross_module_call_is_bound_to_merged_definition() {
    use dotrepack::metadata::{
        body::{opcodes, Operand},
        builder::{MethodBuilder, TypeBuilder},
        signatures::MemberSig,
        token::Token,
    };

    let dir = tempfile::tempdir().unwrap();
    let lib = module("Lib", ModuleKind::Dll, &[("Lib", "Helper", "Run")]);

    let mut app = ModuleBuilder::new("App", ModuleKind::Exe);
    let lib_ref = app.reference(lib.identity.clone());
    let helper = app.type_ref(lib_ref, "Lib", "Helper");
    let run = app.member_ref(helper, "Run", MemberSig::Method(void()));
    let program = app.add_type(TypeBuilder::new("App", "Program").method(
        MethodBuilder::new("Main", void()).code(vec![
            (opcodes::CALL, Operand::Token(run)),
            (opcodes::RET, Operand::None),
        ]),
    ));
    let main = app.method_token(program, "Main").unwrap();
    app.entry_point(main);

    write(dir.path(), &app.build().unwrap(), "exe");
    write(dir.path(), &lib, "dll");

    let (result, _) = repack(
        options(dir.path(), &["App.exe", "Lib.dll"])
            .output("out/App.exe")
            .build(),
    );
    let outcome = result.unwrap();
    let output = ImageCodec.read_path(&outcome.output).unwrap();

    assert_eq!(output.kind, ModuleKind::Exe);
    assert!(output.references.is_empty());
    let target = output.find_type_by_name("Lib.Helper").unwrap().methods[0].token;
    let main = output.find_type_by_name("App.Program").unwrap().methods[0].clone();
    assert_eq!(output.entry_point, Some(main.token));

    let body = main.body.unwrap();
    assert_eq!(body.instructions[0].operand, Operand::Token(target));
    assert_eq!(target.table(), Token::METHOD_DEF);
}
