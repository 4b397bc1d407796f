//! Bit-packed records and arrays inside byte hosts.

use binform::{BitType, BytesSource, Config, Endianness, Error, Tree, Type, Value, Warning};

fn flags() -> BitType {
    BitType::record("flags")
        .uint("a", 3)
        .uint("b", 5)
        .uint("c", 8)
        .build()
        .expect("valid bit record")
}

#[test]
fn test_lsb_first_order() {
    let mut tree = Tree::from_bytes(vec![0xa3]);
    let layout = BitType::record("lsb")
        .uint("a", 3)
        .uint("b", 5)
        .build()
        .expect("valid bit record");
    let root = tree
        .load_new(Type::bits(layout, Endianness::Little), "lsb", 0)
        .expect("load");
    let atom = tree.atom(root);
    assert_eq!(atom.field("a").expect("a").uint().expect("int"), 0b011);
    assert_eq!(atom.field("b").expect("b").uint().expect("int"), 0b10100);
    assert_eq!(tree.serialize(root), vec![0xa3]);
}

#[test]
fn test_lsb_field_spanning_bytes() {
    let layout = BitType::record("span")
        .uint("lo", 4)
        .uint("mid", 8)
        .uint("hi", 4)
        .build()
        .expect("valid bit record");
    let config = Config {
        bit_order: Endianness::Little,
        ..Config::default()
    };
    let mut tree = Tree::from_bytes(vec![0x21, 0x43]);
    let root = tree.load_new(config.bits(layout), "span", 0).expect("load");
    let atom = tree.atom(root);
    assert_eq!(atom.field("lo").expect("lo").uint().expect("int"), 1);
    assert_eq!(atom.field("mid").expect("mid").uint().expect("int"), 0x32);
    assert_eq!(atom.field("hi").expect("hi").uint().expect("int"), 4);
    assert_eq!(tree.serialize(root), vec![0x21, 0x43]);
}

#[test]
fn test_signed_bit_fields() {
    let layout = BitType::record("s")
        .sint("x", 4)
        .uint("y", 4)
        .build()
        .expect("valid bit record");
    let mut tree = Tree::from_bytes(vec![0xe5]);
    let root = tree
        .load_new(Type::bits(layout, Endianness::Big), "s", 0)
        .expect("load");
    assert_eq!(
        tree.atom(root).value().expect("value"),
        Value::Struct(vec![
            ("x".into(), Value::Signed(-2)),
            ("y".into(), Value::Unsigned(5)),
        ])
    );
    tree.set_at(root, "x", -8i32).expect("set");
    assert_eq!(tree.serialize(root), vec![0x85]);
    assert!(matches!(tree.set_at(root, "x", 8u8), Err(Error::Value { .. })));
}

#[test]
fn test_unused_bits_survive_round_trip() {
    let layout = BitType::record("head").uint("a", 3).build().expect("valid bit record");
    let mut tree = Tree::from_bytes(vec![0xa3]);
    let root = tree
        .load_new(Type::bits(layout, Endianness::Big), "head", 0)
        .expect("load");
    assert_eq!(tree.atom(root).field("a").expect("a").uint().expect("int"), 5);
    assert_eq!(tree.atom(root).size(), 1);
    assert_eq!(tree.serialize(root), vec![0xa3]);
}

#[test]
fn test_dynamic_bit_field() {
    let layout = BitType::record("pkt")
        .uint("wide", 1)
        .dynamic("value", |s| {
            Ok(if s.uint("wide")? == 1 {
                BitType::uint(7)
            } else {
                BitType::uint(3)
            })
        })
        .build()
        .expect("valid bit record");
    let host = Type::bits(layout, Endianness::Big);

    let mut tree = Tree::from_bytes(vec![0x85]);
    let root = tree.load_new(host.clone(), "pkt", 0).expect("load");
    assert_eq!(tree.atom(root).lookup("value").expect("value").uint().expect("int"), 5);
    assert_eq!(tree.atom(root).lookup("value").expect("value").bits(), 7);

    let mut tree = Tree::from_bytes(vec![0x5f]);
    let root = tree.load_new(host, "pkt", 0).expect("load");
    let value = tree.lookup(root, "value").expect("value");
    assert_eq!(tree.atom(value).uint().expect("int"), 5);
    assert_eq!(tree.atom(value).bits(), 3);
    assert_eq!(tree.serialize(root), vec![0x5f]);

    tree.set_at(root, "wide", 1u8).expect("set");
    assert_eq!(tree.atom(value).bits(), 7);
    assert_eq!(tree.serialize(root), vec![0x80]);
    tree.set(value, 0x7fu8).expect("set");
    assert_eq!(tree.serialize(root), vec![0xff]);
}

#[test]
fn test_bit_arrays() {
    let mut tree = Tree::from_bytes(vec![0xe4]);
    let root = tree
        .load_new(
            Type::bits(BitType::array(BitType::uint(2), 4), Endianness::Big),
            "arr",
            0,
        )
        .expect("load");
    let atom = tree.atom(root);
    assert_eq!(
        atom.value().expect("value"),
        Value::List(vec![3u8.into(), 2u8.into(), 1u8.into(), 0u8.into()])
    );
    let second = atom.lookup("[1]").expect("[1]");
    assert_eq!(second.path(), "arr[1]");
    assert_eq!(second.position(), 2);
}

#[test]
fn test_terminated_bit_array() {
    let nibbles = || {
        BitType::terminated(BitType::uint(4), |a| a.uint().map(|v| v == 0).unwrap_or(true))
    };
    let mut tree = Tree::from_bytes(vec![0x12, 0x30, 0xff]);
    let root = tree
        .load_new(Type::bits(nibbles(), Endianness::Big), "nibbles", 0)
        .expect("load");
    assert_eq!(tree.atom(root).len(), 4);
    assert_eq!(tree.atom(root).size(), 2);
    assert!(tree.warnings().is_empty());

    let mut tree = Tree::from_bytes(vec![0x12]);
    let root = tree
        .load_new(Type::bits(nibbles(), Endianness::Big), "nibbles", 0)
        .expect("load");
    assert_eq!(tree.atom(root).len(), 2);
    assert_eq!(
        tree.warnings(),
        &[Warning::UnterminatedArray {
            path: "nibbles".into(),
            count: 2
        }]
    );
}

#[test]
fn test_bit_fields_inside_a_record() {
    let layout = Type::record("hdr")
        .field("lead", Type::u8())
        .field("flags", Type::bits(flags(), Endianness::Big))
        .field("len", Type::u8())
        .build()
        .expect("valid record");
    assert_eq!(layout.static_size(), Some(4));

    let mut tree = Tree::from_bytes(vec![0xff, 0xa3, 0x7f, 0x09]);
    let root = tree.load_new(layout, "hdr", 0).expect("load");
    let c = tree.lookup(root, "flags.c").expect("c");
    let atom = tree.atom(c);
    assert_eq!(atom.path(), "hdr.flags.c");
    assert_eq!(atom.position(), 16);
    assert_eq!(atom.offset(), 2);
    assert!(atom.is_bit());
    assert_eq!(tree.atom(root).field("len").expect("len").offset(), 3);

    let err = tree.set_at(root, "flags.a", 8u8).expect_err("too wide");
    assert!(matches!(err, Error::Value { .. }));
    assert_eq!(err.path(), Some("hdr.flags.a"));
}

#[test]
fn test_commit_of_bit_field_writes_its_host() {
    let layout = Type::record("hdr")
        .field("lead", Type::u8())
        .field("flags", Type::bits(flags(), Endianness::Big))
        .build()
        .expect("valid record");
    let mut tree = Tree::new(binform::shared(BytesSource::new(vec![0xff, 0xa3, 0x7f])));
    let root = tree.load_new(layout, "hdr", 0).expect("load");
    let c = tree.lookup(root, "flags.c").expect("c");
    tree.set(c, 1u8).expect("set");
    tree.commit(c).expect("commit");

    let reread = tree.load_new(Type::block(3), "all", 0).expect("reload");
    assert_eq!(tree.serialize(reread), vec![0xff, 0xa3, 0x01]);
}

#[test]
fn test_wide_bit_field_reads_as_bitmap() {
    let mut tree = Tree::from_bytes(vec![0xff; 17]);
    let root = tree
        .load_new(
            Type::bits(BitType::record("w").uint("big", 136).build().expect("valid"), Endianness::Big),
            "w",
            0,
        )
        .expect("load");
    let big = tree.atom(root).field("big").expect("big");
    match big.value().expect("value") {
        Value::Bits(b) => {
            assert_eq!(b.width(), 136);
            assert_eq!(b.count(true), 136);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(big.uint(), Err(Error::Value { .. })));
}

#[test]
fn test_bit_descriptor_reading_a_later_field_fails() {
    let layout = BitType::record("pkt")
        .dynamic("value", |s| Ok(BitType::uint(if s.uint("width")? > 0 { 4 } else { 2 })))
        .uint("width", 4)
        .build()
        .expect("valid bit record");
    let mut tree = Tree::from_bytes(vec![0xff]);
    let err = tree
        .load_new(Type::bits(layout, Endianness::Big), "pkt", 0)
        .expect_err("width is not loaded yet");
    assert!(
        matches!(err, Error::Initialization { ref message, .. } if message.contains("before it is loaded"))
    );
}
