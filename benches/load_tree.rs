//! Benchmark: load a synthetic tag-length-value table into a tree, serialize it back, and
//! walk it. Every record dispatches its body on the tag, so the dynamic-field path is
//! exercised once per record.

use binform::{dump, BitType, Endianness, Registry, Tree, Type};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

const RECORDS: usize = 2_000;

fn table() -> Type {
    let mut registry: Registry<u8> = Registry::of_types("bodies");
    registry.define(1, Type::u32le()).expect("define");
    registry.define(2, Type::cstring()).expect("define");
    registry
        .define(
            3,
            Type::bits(
                BitType::record("flags")
                    .uint("kind", 3)
                    .uint("level", 5)
                    .build()
                    .expect("bit record"),
                Endianness::Big,
            ),
        )
        .expect("define");
    let registry = Arc::new(registry);
    let record = Type::record("tlv")
        .field("tag", Type::u8())
        .field("len", Type::u8())
        .dynamic("body", move |s| {
            let tag = s.uint("tag")? as u8;
            Ok(registry.get(&tag, Some(s.uint("len")?)))
        })
        .build()
        .expect("record");
    Type::infinite(record)
}

fn synthetic_input() -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..RECORDS {
        match i % 4 {
            0 => out.extend_from_slice(&[1, 4, i as u8, 0, 0, 0]),
            1 => out.extend_from_slice(&[2, 0, b'n', b'a', b'm', b'e', 0]),
            2 => out.extend_from_slice(&[3, 1, 0xa5]),
            _ => out.extend_from_slice(&[9, 3, 0xde, 0xad, 0xbf]),
        }
    }
    out
}

fn bench_load_tree(c: &mut Criterion) {
    let input = synthetic_input();
    let layout = table();

    let mut tree = Tree::from_bytes(input.clone());
    let root = tree.load_new(layout.clone(), "table", 0).expect("warm-up load");
    assert_eq!(tree.serialize(root), input);
    eprintln!(
        "load_tree: {} records, {} bytes, {} atoms walked (one warm-up pass)",
        tree.atom(root).len(),
        input.len(),
        tree.atom(root).walk().count()
    );

    c.bench_function("load_tlv_table", |b| {
        b.iter(|| {
            let mut tree = Tree::from_bytes(black_box(input.clone()));
            let root = tree.load_new(layout.clone(), "table", 0).expect("load");
            black_box(tree.atom(root).len())
        });
    });

    c.bench_function("serialize_tlv_table", |b| {
        b.iter(|| black_box(tree.serialize(black_box(root))).len());
    });

    c.bench_function("walk_tlv_table", |b| {
        b.iter(|| black_box(tree.atom(root).walk().count()));
    });

    c.bench_function("dump_tlv_table", |b| {
        b.iter(|| black_box(dump(&tree.atom(root))).len());
    });
}

criterion_group!(benches, bench_load_tree);
criterion_main!(benches);
