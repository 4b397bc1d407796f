//! # binform: declarative binary formats
//!
//! Describe a binary format once as a tree of [`Type`]s, then load it from any byte
//! [`Source`], inspect it, edit it and write it back.
//!
//! ## Model
//!
//! - **Types** ([`Type`], [`BitType`]) are immutable descriptions: integers, floats,
//!   fixed-point, LEB128, strings, blocks, records, arrays, unions, pointers and bit-packed
//!   records. A record field may be *dynamic*: its type is computed from the fields before
//!   it through a [`Scope`].
//! - **Atoms** are instances of types at an offset. They live in a [`Tree`] arena and are
//!   addressed by [`AtomId`]; [`Atom`] is a read-only view.
//! - **Sources** provide the bytes: in memory, a file, a window into another source, or
//!   another process's memory.
//!
//! ## Byte order and bit order
//!
//! | Item | Default | Override |
//! |------|---------|----------|
//! | Integers | as declared (`u16le`, `u16be`, ...) | [`Config::byteorder`] for [`Config::uint`] |
//! | Pointer wire values | 8 bytes, little-endian | [`Config::pointer_width`] |
//! | Bit packing | MSB-first | [`Config::bit_order`] for [`Config::bits`] |
//! | Wide strings | UTF-16 LE | `Type::wstring(n, Endianness::Big)` |
//!
//! ## Example
//!
//! ```ignore
//! use binform::{Tree, Type, Value};
//!
//! let header = Type::record("header")
//!     .field("magic", Type::u16be())
//!     .field("len", Type::u16be())
//!     .update(|s| Ok(Value::from(s.size_of("payload")?)))
//!     .dynamic("payload", |s| Ok(Type::block(s.uint("len")?)))
//!     .build()?;
//!
//! let mut tree = Tree::from_bytes(vec![0x4d, 0x5a, 0x00, 0x03, b'A', b'B', b'C']);
//! let root = tree.load_new(header, "header", 0)?;
//! tree.set_at(root, "payload", "XY")?;
//! tree.recalculate(root)?;
//! assert_eq!(tree.serialize(root), b"MZ\x00\x02XY");
//! ```
//!
//! Loading never panics on malformed input: short reads, bad descriptors and
//! dereferences of null pointers are [`Error`]s carrying the dotted path of the failing
//! atom, and recoverable oddities (undecodable strings, missing terminators, leftover
//! bytes) are collected as [`Warning`]s on the tree.

pub mod atom;
pub mod bitmap;
pub mod bits;
pub mod codec;
pub mod config;
pub mod dump;
pub mod error;
pub mod registry;
pub mod schema;
pub mod scope;
pub mod source;
pub mod tree;
pub mod value;
pub mod walk;

pub use atom::{Atom, Key};
pub use bitmap::Bitmap;
pub use bits::{BitRecordBuilder, BitType};
pub use codec::{Encoding, Endianness};
pub use config::Config;
pub use dump::{dump, hexdump, summary};
pub use error::{Error, Result, Warning};
pub use registry::Registry;
pub use schema::{
    AddressPolicy, Base, IntType, Precision, RecordBuilder, Shape, StrLength, Type, UnionBuilder,
};
pub use scope::Scope;
pub use source::{
    shared, BytesSource, EmptySource, FileSource, ProxySource, SharedSource, Source, SourceError,
};
#[cfg(target_os = "linux")]
pub use source::ProcessMemorySource;
pub use tree::{AtomId, Tree};
pub use value::Value;
pub use walk::{compare, Difference, Walk};
