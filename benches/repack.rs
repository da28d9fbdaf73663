//! Benchmarks for the merge pipeline over synthetic modules.
//!
//! - In-memory merge of several libraries with colliding names (internalize)
//! - The same merge with union merging
//! - Encoding and decoding of a merged image

extern crate dotrepack;

use criterion::{criterion_group, criterion_main, Criterion};
use dotrepack::{
    image::{ImageCodec, ModuleReader},
    metadata::{
        body::{opcodes, Operand},
        builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
        module::{Module, ModuleKind},
        signatures::{MethodSig, TypeSig},
    },
    repack::{merge_modules, RecordingLogger, RepackOptions},
};
use std::hint::black_box;

/// A library of `types` types in a shared namespace, each calling its predecessor.
fn library(name: &str, types: usize) -> Module {
    let mut builder = ModuleBuilder::new(name, ModuleKind::Dll);
    let mut previous = None;
    for index in 0..types {
        let mut code = vec![(opcodes::RET, Operand::None)];
        if let Some(method) = previous {
            code.insert(0, (opcodes::CALL, Operand::Token(method)));
        }
        let token = builder.add_type(
            TypeBuilder::new("Shared", format!("T{index}"))
                .field("value", TypeSig::I4)
                .method(
                    MethodBuilder::new("Step", MethodSig::new_static(TypeSig::Void, vec![]))
                        .code(code),
                ),
        );
        previous = builder.method_token(token, "Step");
    }
    builder.build().unwrap()
}

fn libraries() -> Vec<Module> {
    (0..8).map(|index| library(&format!("Lib{index}"), 200)).collect()
}

/// Benchmark merging eight libraries whose type names all collide, internalizing the losers.
fn bench_merge_internalize(c: &mut Criterion) {
    let modules = libraries();
    let options = RepackOptions::builder().internalize(true).build();

    c.bench_function("merge_internalize_8x200", |b| {
        b.iter(|| {
            let merged =
                merge_modules(black_box(modules.clone()), &options, &RecordingLogger::new())
                    .unwrap();
            black_box(merged)
        });
    });
}

/// Benchmark merging the same libraries with union merging.
fn bench_merge_union(c: &mut Criterion) {
    let modules = libraries();
    let options = RepackOptions::builder().union_merge(true).build();

    c.bench_function("merge_union_8x200", |b| {
        b.iter(|| {
            let merged =
                merge_modules(black_box(modules.clone()), &options, &RecordingLogger::new())
                    .unwrap();
            black_box(merged)
        });
    });
}

/// Benchmark decoding a merged image.
fn bench_decode_merged(c: &mut Criterion) {
    let options = RepackOptions::builder().internalize(true).build();
    let (_, image) = merge_modules(libraries(), &options, &RecordingLogger::new()).unwrap();

    c.bench_function("decode_merged_image", |b| {
        b.iter(|| {
            let module = ImageCodec.read(black_box(&image)).unwrap();
            black_box(module)
        });
    });
}

criterion_group!(
    benches,
    bench_merge_internalize,
    bench_merge_union,
    bench_decode_merged
);
criterion_main!(benches);
