#![allow(unused)]
extern crate ncscope;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ncscope::prelude::*;
use std::hint::black_box;

const MANIFEST: &str = "void PrintInteger(int nInteger);\nint Random(int nMaxInteger);";

/// Builds a script with `count` helper subroutines, each looping over a counter and calling
/// the next helper with a random argument.
fn synthetic_script(count: usize) -> Vec<u8> {
    let mut asm = NcsAssembler::new();
    asm.jsr("main").unwrap().retn().unwrap();

    asm.label("main").unwrap();
    asm.const_int(10).unwrap().jsr("helper0").unwrap();
    asm.retn().unwrap();

    for index in 0..count {
        let top = format!("top{index}");
        let end = format!("end{index}");
        asm.label(&format!("helper{index}")).unwrap();

        // int i = 0; while (i < n) { PrintInteger(i); i++; }
        asm.rsadd(TypeCode::Int).unwrap();
        asm.const_int(0).unwrap().cpdownsp(-8, 4).unwrap().movsp(-4).unwrap();
        asm.label(&top).unwrap();
        asm.cptopsp(-4, 4).unwrap().cptopsp(-12, 4).unwrap();
        asm.op(Opcode::Lt, TypeCode::IntInt).unwrap();
        asm.jz(&end).unwrap();
        asm.cptopsp(-4, 4).unwrap().action(0, 1).unwrap();
        asm.incisp(-4).unwrap();
        asm.jmp(&top).unwrap();
        asm.label(&end).unwrap();

        if index + 1 < count {
            asm.const_int(100).unwrap().action(1, 1).unwrap();
            asm.jsr(&format!("helper{}", index + 1)).unwrap();
        }
        asm.movsp(-8).unwrap().retn().unwrap();
    }
    asm.finish().unwrap()
}

/// Benchmark the full pipeline on growing synthetic scripts
fn bench_decompile(c: &mut Criterion) {
    let actions = ActionTable::parse(MANIFEST).unwrap();
    let decompiler = Decompiler::new(actions, DecompilerConfig::default());

    let mut group = c.benchmark_group("decompile");
    for count in [1, 16, 64] {
        let data = synthetic_script(count);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(format!("helpers_{count}"), |b| {
            b.iter(|| {
                let result = decompiler.decompile(black_box(&data));
                black_box(result)
            });
        });
    }
    group.finish();

    let scripts: Vec<Vec<u8>> = (0..32).map(|_| synthetic_script(16)).collect();
    let inputs: Vec<&[u8]> = scripts.iter().map(Vec::as_slice).collect();
    c.bench_function("decompile_batch_32", |b| {
        b.iter(|| black_box(decompiler.decompile_batch(black_box(&inputs))));
    });
}

/// Benchmark instruction decoding alone
fn bench_decode(c: &mut Criterion) {
    let data = synthetic_script(64);
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("decode_stream", |b| {
        b.iter(|| black_box(decode_stream(black_box(&data)).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_decompile, bench_decode);
criterion_main!(benches);
