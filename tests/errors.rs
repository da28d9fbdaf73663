//! Every fatal condition surfaces as a typed error with the right kind.

mod common;

use common::*;
use dotrepack::{
    metadata::module::ModuleKind,
    repack::{RepackOptions, TargetKind},
    Error, ErrorKind,
};

#[test]
fn invalid_configuration() {
    let (result, _) = repack(RepackOptions::builder().output("out.dll").build());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);

    let dir = tempfile::tempdir().unwrap();
    let (result, _) = repack(
        options(dir.path(), &["A.dll"])
            .key_file("key.snk")
            .key_container("Release")
            .build(),
    );
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);

    let (result, _) = repack(
        options(dir.path(), &["A.dll"])
            .internalize(true)
            .internalize_exclude_pattern("(unclosed")
            .build(),
    );
    let error = result.unwrap_err();
    assert!(matches!(error, Error::Pattern(_)));
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn unresolvable_inputs() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &module("App", ModuleKind::Dll, &[]), "dll");

    let (result, _) = repack(options(dir.path(), &["App.dll", "Missing.dll"]).build());
    match result.unwrap_err() {
        Error::Resolution { path, .. } => assert_eq!(path, "Missing.dll"),
        other => panic!("unexpected error {other:?}"),
    }

    std::fs::write(dir.path().join("Corrupt.dll"), b"not a module").unwrap();
    let (result, _) = repack(options(dir.path(), &["App.dll", "Corrupt.dll"]).build());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Resolution);
}

#[test]
fn zero_kind_needs_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &module("App", ModuleKind::Dll, &[]), "dll");
    write(dir.path(), &module("Raw", ModuleKind::Unspecified, &[]), "dll");

    let (result, _) = repack(options(dir.path(), &["App.dll", "Raw.dll"]).build());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Resolution);

    let (result, _) = repack(
        options(dir.path(), &["App.dll", "Raw.dll"])
            .allow_zero_pe_kind(true)
            .build(),
    );
    assert!(result.is_ok());
}

#[test]
fn unwritable_output_is_an_emission_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &module("App", ModuleKind::Dll, &[("App", "Program", "Main")]), "dll");
    std::fs::write(dir.path().join("blocked"), b"file").unwrap();

    let (result, logger) = repack(
        options(dir.path(), &["App.dll"])
            .output("blocked/App.dll")
            .target_kind(TargetKind::Dll)
            .build(),
    );
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Emission);
    assert_eq!(
        logger.messages(dotrepack::repack::logger::LogLevel::Error).len(),
        1
    );
}

#[test]
fn broken_documentation_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), &module("App", ModuleKind::Dll, &[("App", "Program", "Main")]), "dll");
    write(dir.path(), &module("Lib", ModuleKind::Dll, &[("Lib", "Api", "Call")]), "dll");
    std::fs::write(
        dir.path().join("Lib.xml"),
        "<doc><members><member name=\"T:Lib.Api\">",
    )
    .unwrap();

    let (result, _) = repack(
        options(dir.path(), &["App.dll", "Lib.dll"])
            .xml_documentation(true)
            .debug_info(true)
            .build(),
    );
    assert!(result.is_err());

    let out = dir.path().join("out");
    assert!(!out.join("Merged.dll").exists());
    assert!(!out.join("Merged.pdb").exists());
    assert!(!out.join("Merged.xml").exists());
}

#[test]
fn lenient_target_kind_only_warns() {
    let logger = dotrepack::repack::RecordingLogger::new();
    assert_eq!(
        TargetKind::parse_lenient("Library", &logger),
        TargetKind::SameAsPrimaryAssembly
    );
    assert_eq!(logger.warnings().len(), 1);
}
