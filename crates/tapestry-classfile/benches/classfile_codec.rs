use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tapestry_classfile::access::{ACC_PUBLIC, ACC_STATIC};
use tapestry_classfile::{ClassBuilder, ClassFile, MethodContext, Opcode};

fn class_with_methods(count: usize) -> Vec<u8> {
    let mut class = ClassBuilder::new("bench/Subject", "java/lang/Object");
    class.field(ACC_STATIC, "total", "J");
    for i in 0..count {
        class.method(ACC_PUBLIC | ACC_STATIC, &format!("step{}", i), "(I)I", |m| {
            m.code(1, |c| {
                let skip = c.new_label();
                c.iload(0)
                    .jump(Opcode::Ifle, skip)
                    .iload(0)
                    .iconst(i as i32)
                    .op(Opcode::Iadd)
                    .op(Opcode::Ireturn)
                    .place(skip)
                    .iconst(0)
                    .op(Opcode::Ireturn);
            });
        });
    }
    class.to_bytes().unwrap()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for count in [8usize, 64, 256] {
        let bytes = class_with_methods(count);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("methods", count), &bytes, |b, bytes| {
            b.iter(|| ClassFile::parse(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let bytes = class_with_methods(64);
    c.bench_function("parse_and_write", |b| {
        b.iter(|| ClassFile::parse(black_box(&bytes)).unwrap().to_bytes());
    });
}

fn bench_code_reassembly(c: &mut Criterion) {
    let bytes = class_with_methods(64);
    let class = ClassFile::parse(&bytes).unwrap();
    let context = MethodContext {
        owner: "bench/Subject",
        name: "step0",
        descriptor: "(I)I",
        is_static: true,
    };
    c.bench_function("decode_encode_body", |b| {
        b.iter(|| {
            let mut pool = class.constant_pool.clone();
            let body = class.method_body(black_box(0)).unwrap().unwrap();
            body.encode(&mut pool, &context, true).unwrap()
        });
    });
}

criterion_group!(benches, bench_parse, bench_roundtrip, bench_code_reassembly);
criterion_main!(benches);
