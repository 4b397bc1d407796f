//! Building documents from scratch, editing loaded ones and writing them back.

use binform::walk::{ancestors, find, leaves};
use binform::{
    compare, dump, shared, BitType, BytesSource, Config, Difference, EmptySource, Endianness,
    Error, IntType, Key, Tree, Type, Value,
};

fn message() -> Type {
    Type::record("msg")
        .field("magic", Type::constant(*b"BF"))
        .field("count", Type::u8())
        .update(|s| Ok(Value::from(s.field("items")?.len() as u64)))
        .dynamic("items", |s| Ok(Type::array(Type::u16le(), s.uint("count")?)))
        .field("name", Type::cstring())
        .build()
        .expect("valid record")
}

#[test]
fn test_alloc_then_set_struct_value() {
    let mut tree = Tree::detached();
    let root = tree.alloc_new(message(), "msg").expect("alloc");
    assert_eq!(tree.serialize(root), vec![b'B', b'F', 0, 0]);

    tree.set(
        root,
        vec![
            ("count", Value::from(3u8)),
            ("items", Value::List(vec![1u16.into(), 2u16.into(), 0x0403u16.into()])),
            ("name", Value::from("hi")),
        ],
    )
    .expect("set");
    assert_eq!(
        tree.serialize(root),
        vec![b'B', b'F', 3, 1, 0, 2, 0, 3, 4, b'h', b'i', 0]
    );
    let atom = tree.atom(root);
    assert_eq!(atom.field("name").expect("name").offset(), 9);
    assert_eq!(atom.size(), 12);

    tree.recalculate(root).expect("recalculate");
    assert_eq!(tree.atom(root).field("count").expect("count").uint().expect("int"), 3);
}

#[test]
fn test_shrinking_a_count_relayouts_later_fields() {
    let mut tree = Tree::from_bytes(vec![b'B', b'F', 2, 0x11, 0x00, 0x22, 0x00, b'o', b'k', 0]);
    let root = tree.load_new(message(), "msg", 0).expect("load");
    let items = tree.lookup(root, "items").expect("items");
    assert_eq!(tree.atom(items).len(), 2);

    tree.set_at(root, "count", 1u8).expect("set");
    let atom = tree.atom(root);
    let items = atom.field("items").expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items.index(0).expect("[0]").uint().expect("int"), 0x11);
    assert_eq!(atom.field("name").expect("name").offset(), 5);
    assert_eq!(atom.field("name").expect("name").text().expect("text"), "ok");
    assert_eq!(
        tree.serialize(root),
        vec![b'B', b'F', 1, 0x11, 0x00, b'o', b'k', 0]
    );
}

#[test]
fn test_fixed_array_rejects_wrong_length() {
    let mut tree = Tree::detached();
    let root = tree
        .alloc_new(Type::array(Type::u8(), 2), "pair")
        .expect("alloc");
    let err = tree
        .set(root, Value::List(vec![1u8.into()]))
        .expect_err("length mismatch");
    assert!(matches!(err, Error::Value { .. }));
    tree.set(root, Value::List(vec![7u8.into(), 9u8.into()]))
        .expect("set");
    assert_eq!(tree.serialize(root), vec![7, 9]);
}

#[test]
fn test_growing_list_of_open_array() {
    let mut tree = Tree::detached();
    let root = tree
        .alloc_new(Type::infinite(Type::cstring()), "names")
        .expect("alloc");
    assert_eq!(tree.atom(root).len(), 0);
    tree.set(root, Value::List(vec!["a".into(), "bc".into()]))
        .expect("set");
    assert_eq!(tree.serialize(root), b"a\0bc\0".to_vec());
    assert_eq!(tree.atom(root).lookup("[1]").expect("[1]").offset(), 2);
}

fn blob() -> Type {
    Type::record("blob")
        .field("len", Type::u8())
        .update(|s| Ok(Value::from(s.size_of("data")?)))
        .dynamic("data", |s| Ok(Type::block(s.uint("len")?)))
        .build()
        .expect("valid record")
}

#[test]
fn test_commit_recalculates_and_writes_back() {
    let mut tree = Tree::new(shared(BytesSource::new(vec![2, b'a', b'b', 0xee, 0xee])));
    let root = tree.load_new(blob(), "blob", 0).expect("load");
    tree.set_at(root, "data", "xyz").expect("set");
    assert_eq!(tree.serialize(root), vec![2, b'x', b'y', b'z']);

    tree.commit(root).expect("commit");
    assert!(!tree.atom(root).is_dirty());
    assert_eq!(tree.serialize(root), vec![3, b'x', b'y', b'z']);

    let all = tree.load_new(Type::block(5), "all", 0).expect("reload");
    assert_eq!(tree.serialize(all), vec![3, b'x', b'y', b'z', 0xee]);
}

#[test]
fn test_commit_to_read_only_source_fails() {
    let mut tree = Tree::new(shared(EmptySource));
    let root = tree.alloc_new(Type::u8(), "byte").expect("alloc");
    let err = tree.commit(root).expect_err("read-only");
    assert!(matches!(err, Error::Source { .. }));
    assert_eq!(err.path(), Some("byte"));
}

#[test]
fn test_cast_reinterprets_bytes() {
    let mut tree = Tree::from_bytes(vec![0, 0, 0x78, 0x56, 0x34, 0x12]);
    let word = tree.load_new(Type::u32le(), "word", 2).expect("load");
    let bytes = tree
        .cast(word, Type::array(Type::u8(), 4))
        .expect("cast");
    let atom = tree.atom(bytes);
    assert_eq!(atom.offset(), 2);
    assert!(atom.parent().is_none());
    assert_eq!(
        atom.value().expect("value"),
        Value::List(vec![0x78u8.into(), 0x56u8.into(), 0x34u8.into(), 0x12u8.into()])
    );
    assert!(tree.cast(word, Type::u64le()).expect_err("too short").is_consume());
}

#[test]
fn test_copy_is_independent_and_compare_reports_edits() {
    let mut tree = Tree::from_bytes(vec![2, b'a', b'b']);
    let root = tree.load_new(blob(), "blob", 0).expect("load");
    let before = tree.copy(root).expect("copy");
    assert!(compare(&tree.atom(before), &tree.atom(root)).is_empty());

    tree.set_at(root, "data", "abc").expect("set");
    tree.recalculate(root).expect("recalculate");
    assert_eq!(tree.serialize(before), vec![2, b'a', b'b']);

    let diffs = compare(&tree.atom(before), &tree.atom(root));
    assert_eq!(
        diffs,
        vec![
            Difference::Changed {
                path: "len".into(),
                offset: 0,
                before: vec![2],
                after: vec![3],
            },
            Difference::Changed {
                path: "data".into(),
                offset: 1,
                before: b"ab".to_vec(),
                after: b"abc".to_vec(),
            },
        ]
    );
    assert_eq!(diffs[0].to_string(), "len @0x0: 02 -> 03");
}

#[test]
fn test_compare_reports_added_and_removed_leaves() {
    let mut tree = Tree::from_bytes(vec![1, 2, 3]);
    let short = tree
        .load_new(Type::array(Type::u8(), 2), "t", 0)
        .expect("load");
    let long = tree
        .load_new(Type::array(Type::u8(), 3), "t", 0)
        .expect("load");
    assert_eq!(
        compare(&tree.atom(short), &tree.atom(long)),
        vec![Difference::Added { path: "[2]".into() }]
    );
    assert_eq!(
        compare(&tree.atom(long), &tree.atom(short)),
        vec![Difference::Removed { path: "[2]".into() }]
    );
}

#[test]
fn test_relocate_moves_the_subtree() {
    let mut tree = Tree::from_bytes(vec![2, b'a', b'b']);
    let root = tree.load_new(blob(), "blob", 0).expect("load");
    tree.relocate(root, 0x10);
    let atom = tree.atom(root);
    assert_eq!(atom.offset(), 0x10);
    assert_eq!(atom.field("data").expect("data").offset(), 0x11);
    assert_eq!(atom.at(0x12).expect("at").path(), "blob.data");
    assert!(atom.at(0x02).is_none());
}

#[test]
fn test_dump_and_summary() {
    let layout = Type::record("hdr")
        .field("magic", Type::u16be())
        .field("len", Type::u16be())
        .build()
        .expect("valid record");
    let mut tree = Tree::from_bytes(vec![0x4d, 0x5a, 0x00, 0x03]);
    let root = tree.load_new(layout, "hdr", 0).expect("load");
    let text = dump(&tree.atom(root));
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "[0x0] hdr hdr (4 bytes, 2 members)",
            "  [0x0] magic u16be 0x4d5a (19802)",
            "  [0x2] len u16be 0x0003 (3)",
        ]
    );

    let fresh = tree.create(Type::u8(), "later", 8);
    assert_eq!(binform::summary(&tree.atom(fresh)), "[0x8] later u8 <uninitialized>");
}

#[test]
fn test_walk_helpers() {
    let mut tree = Tree::from_bytes(vec![b'B', b'F', 1, 0x11, 0x00, b'x', 0]);
    let root = tree.load_new(message(), "msg", 0).expect("load");
    let atom = tree.atom(root);
    let names: Vec<String> = leaves(&atom).map(|a| a.path()).collect();
    assert_eq!(names, vec!["msg.magic", "msg.count", "msg.items[0]", "msg.name"]);

    let found = find(&atom, |a| a.type_name() == "strz").expect("string");
    assert_eq!(found.path(), "msg.name");
    let element = atom.lookup("items[0]").expect("[0]");
    let chain: Vec<String> = ancestors(&element).map(|a| a.path()).collect();
    assert_eq!(chain, vec!["msg.items", "msg"]);
    assert_eq!(element.root(), atom);
    assert_eq!(atom.item("count").expect("count"), atom.item(Key::Index(1)).expect("[1]"));
}

#[test]
fn test_lookup_failures_name_the_container() {
    let mut tree = Tree::from_bytes(vec![b'B', b'F', 0, 0]);
    let root = tree.load_new(message(), "msg", 0).expect("load");
    let err = tree.lookup(root, "items[4]").expect_err("out of range");
    assert!(matches!(err, Error::NotFound { ref path, ref key } if path == "msg.items" && key == "[4]"));
    let err = tree.set_at(root, "nope", 1u8).expect_err("no field");
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn test_allocated_padding_uses_configured_fill() {
    let layout = Type::record("padded")
        .field("a", Type::u8())
        .field("gap", Type::padding(2))
        .field("b", Type::u8())
        .build()
        .expect("valid record");
    let config = Config {
        padding: 0xcc,
        ..Config::default()
    };
    let mut tree = Tree::with_config(shared(EmptySource), config);
    let root = tree.alloc_new(layout, "padded").expect("alloc");
    assert_eq!(tree.serialize(root), vec![0, 0xcc, 0xcc, 0]);
}

#[test]
fn test_loaded_documents_serialize_unchanged() {
    let tagged = Type::record("tagged")
        .field("tag", Type::u8())
        .dynamic("body", |s| {
            Ok(match s.uint("tag")? {
                1 => Type::u32be(),
                n => Type::block(n),
            })
        })
        .build()
        .expect("valid record");
    let packed = Type::bits(
        BitType::record("p")
            .uint("a", 5)
            .sint("b", 6)
            .build()
            .expect("valid bit record"),
        Endianness::Big,
    );
    let pointed = Type::record("pointed")
        .field("p", Type::pointer(IntType::U16LE, Type::u8()))
        .field("q", Type::u8())
        .build()
        .expect("valid record");
    let cases: Vec<(Type, Vec<u8>)> = vec![
        (message(), vec![b'B', b'F', 2, 1, 2, 3, 4, b'z', 0]),
        (tagged.clone(), vec![1, 0xde, 0xad, 0xbe, 0xef]),
        (tagged, vec![3, 9, 8, 7]),
        (packed, vec![0xab, 0xcd]),
        (pointed, vec![3, 0, 0x44]),
        (Type::block_array(Type::u16le(), 5), vec![1, 2, 3, 4, 5]),
        (Type::pstring(IntType::U16BE), vec![0, 2, b'o', b'k']),
    ];
    for (ty, input) in cases {
        let name = ty.name();
        let mut tree = Tree::from_bytes(input.clone());
        let root = tree.load_new(ty, "doc", 0).expect("load");
        assert_eq!(tree.serialize(root), input, "{name}");
        assert_eq!(tree.atom(root).size(), input.len() as u64, "{name}");
    }
}

#[test]
fn test_nested_length_change_relayouts_outer_fields() {
    let layout = Type::record("msg")
        .field("hdr", Type::record("hdr").field("len", Type::u8()).build().expect("valid record"))
        .dynamic("body", |s| Ok(Type::block(s.field("hdr")?.field("len")?.uint()? as u64)))
        .build()
        .expect("valid record");
    let mut tree = Tree::from_bytes(vec![3, 0x41, 0x42, 0x43]);
    let root = tree.load_new(layout, "msg", 0).expect("load");
    assert_eq!(tree.atom(root).field("body").expect("body").size(), 3);

    tree.set_at(root, "hdr.len", 1u8).expect("set");
    assert_eq!(tree.serialize(root), vec![1, 0x41]);
    assert_eq!(tree.atom(root).field("body").expect("body").size(), 1);
}

#[test]
fn test_repeated_relayout_reuses_released_atoms() {
    let layout = Type::record("msg")
        .field("len", Type::u8())
        .dynamic("body", |s| Ok(Type::array(Type::u8(), s.uint("len")?)))
        .build()
        .expect("valid record");
    let mut tree = Tree::from_bytes(vec![3, 1, 2, 3]);
    let root = tree.load_new(layout, "msg", 0).expect("load");
    for i in 0..1000u32 {
        tree.set_at(root, "len", (i % 4) as u8).expect("set");
    }
    assert_eq!(tree.atom(root).field("body").expect("body").len(), 3);
    assert_eq!(tree.atom_count(), tree.atom(root).walk().count());

    let fresh = tree.create(Type::u8(), "x", 0);
    assert!(fresh.index() < 16);
    tree.discard(fresh).expect("discard");

    let before = tree.atom_count();
    let copy = tree.copy(root).expect("copy");
    assert_eq!(tree.atom_count(), before * 2);
    tree.discard(copy).expect("discard");
    assert_eq!(tree.atom_count(), before);

    let len = tree.lookup(root, "len").expect("len");
    let err = tree.discard(len).expect_err("has a parent");
    assert!(matches!(err, Error::Value { .. }));
}

#[test]
fn test_failed_relayout_is_reported() {
    let layout = Type::record("msg")
        .field("kind", Type::u8())
        .dynamic("body", |s| {
            if s.uint("kind")? == 1 {
                Type::record("inner")
                    .dynamic("x", |_| Err(Error::value("unsupported body")))
                    .build()
            } else {
                Ok(Type::u8())
            }
        })
        .build()
        .expect("valid record");
    let mut tree = Tree::from_bytes(vec![0, 7]);
    let root = tree.load_new(layout, "msg", 0).expect("load");

    let err = tree.set_at(root, "kind", 1u8).expect_err("body cannot be built");
    assert!(matches!(err, Error::Initialization { ref message, .. } if message.contains("unsupported body")));
    assert_eq!(err.path(), Some("msg.kind"));
    assert!(err.to_string().contains("msg.body.x"));
}
