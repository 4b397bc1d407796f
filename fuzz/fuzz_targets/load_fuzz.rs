//! Load fuzz target: feed arbitrary bytes to a layout with dynamic fields, pointers, bit
//! fields and open-ended arrays. Loading must not panic; whatever loads must serialize
//! back to the bytes it was read from.
//! Build with: cargo fuzz run load_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use binform::{BitType, Endianness, IntType, Tree, Type};
#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fn layout() -> Type {
    let flags = BitType::record("flags")
        .uint("kind", 2)
        .dynamic("value", |s| Ok(BitType::uint(1 + s.uint("kind")? as u32)))
        .build()
        .expect("bit record");
    let entry = Type::record("entry")
        .field("len", Type::u8())
        .dynamic("body", |s| Ok(Type::block(s.uint("len")? % 32)))
        .field("name", Type::cstring())
        .field("flags", Type::bits(flags, Endianness::Little))
        .field("next", Type::pointer(IntType::U16LE, Type::u16be()))
        .build()
        .expect("record");
    Type::infinite(entry)
}

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let mut tree = Tree::from_bytes(data.to_vec());
    let root = match tree.load_new(layout(), "fuzz", 0) {
        Ok(root) => root,
        Err(_) => return,
    };
    let out = tree.serialize(root);
    assert_eq!(&data[..out.len()], &out[..]);
    for i in 0..tree.atom(root).len() {
        if let Ok(next) = tree.lookup(root, &format!("[{i}].next")) {
            let _ = tree.dereference(next);
        }
    }
    let _ = binform::dump(&tree.atom(root));
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run load_fuzz");
}
