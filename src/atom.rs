//! Read-only views on atoms.

use crate::bitmap::Bitmap;
use crate::bits::BitType;
use crate::codec;
use crate::error::{Error, Result};
use crate::schema::{Precision, Type};
use crate::tree::{decode_int, str_content, AtomId, Layout, Payload, Tree};
use crate::value::Value;
use crate::walk::Walk;
use std::fmt;

/// Member selector for [`Atom::item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key<'_> {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// A borrowed handle on one atom of a [`Tree`].
#[derive(Clone, Copy)]
pub struct Atom<'t> {
    tree: &'t Tree,
    id: AtomId,
}

impl PartialEq for Atom<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl fmt::Debug for Atom<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{:#x}", self.type_name(), self.path(), self.offset())
    }
}

impl<'t> Atom<'t> {
    pub(crate) fn new(tree: &'t Tree, id: AtomId) -> Self {
        Atom { tree, id }
    }

    pub fn id(&self) -> AtomId {
        self.id
    }

    pub fn tree(&self) -> &'t Tree {
        self.tree
    }

    fn wrap(&self, id: AtomId) -> Atom<'t> {
        Atom::new(self.tree, id)
    }

    pub fn name(&self) -> &'t str {
        &self.tree.n(self.id).name
    }

    pub fn type_name(&self) -> String {
        self.tree.type_name(self.id)
    }

    pub fn path(&self) -> String {
        self.tree.path(self.id)
    }

    /// Byte offset in the source. Bit atoms report the byte holding their first bit.
    pub fn offset(&self) -> u64 {
        self.tree.byte_offset(self.id)
    }

    /// Position in bits.
    pub fn position(&self) -> u64 {
        let node = self.tree.n(self.id);
        if self.is_bit() {
            node.offset
        } else {
            node.offset.saturating_mul(8)
        }
    }

    pub fn size(&self) -> u64 {
        self.tree.size(self.id)
    }

    pub fn bits(&self) -> u64 {
        self.tree.bits(self.id)
    }

    /// Size the atom's type promises, known before loading when the type is static.
    pub fn blocksize(&self) -> Result<u64> {
        self.tree.blocksize(self.id)
    }

    pub fn is_bit(&self) -> bool {
        self.tree.is_bit(self.id)
    }

    pub fn is_initialized(&self) -> bool {
        self.tree.n(self.id).initialized
    }

    pub fn is_dirty(&self) -> bool {
        self.tree.n(self.id).dirty
    }

    /// A string that did not decode under its encoding; its raw bytes are kept.
    pub fn decode_failed(&self) -> bool {
        self.tree.n(self.id).decode_failed
    }

    pub fn is_null(&self) -> bool {
        self.tree.n(self.id).null
    }

    pub fn parent(&self) -> Option<Atom<'t>> {
        self.tree.n(self.id).parent.map(|p| self.wrap(p))
    }

    /// Nearest ancestor whose type is named `type_name`, or the parent when `None`.
    pub fn getparent(&self, type_name: Option<&str>) -> Option<Atom<'t>> {
        let mut current = self.parent();
        while let Some(p) = current {
            match type_name {
                None => return Some(p),
                Some(name) if p.type_name() == name => return Some(p),
                Some(_) => current = p.parent(),
            }
        }
        None
    }

    pub fn root(&self) -> Atom<'t> {
        let mut current = *self;
        while let Some(p) = current.parent() {
            current = p;
        }
        current
    }

    /// Record fields, array elements or union members in order.
    pub fn children(&self) -> Vec<Atom<'t>> {
        self.tree
            .members(self.id)
            .iter()
            .map(|&c| self.wrap(c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.members(self.id).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item<'k>(&self, key: impl Into<Key<'k>>) -> Result<Atom<'t>> {
        match key.into() {
            Key::Name(name) => self.field(name),
            Key::Index(i) => self.index(i),
        }
    }

    pub fn field(&self, name: &str) -> Result<Atom<'t>> {
        self.tree
            .child_named(self.id, name)
            .map(|c| self.wrap(c))
            .ok_or_else(|| Error::not_found(name).within(&self.path()))
    }

    pub fn index(&self, index: usize) -> Result<Atom<'t>> {
        self.tree
            .members(self.id)
            .get(index)
            .map(|&c| self.wrap(c))
            .ok_or_else(|| Error::not_found(format!("[{index}]")).within(&self.path()))
    }

    /// Cached referent of a pointer that has been dereferenced.
    pub fn referent(&self) -> Option<Atom<'t>> {
        self.tree.referent(self.id).map(|r| self.wrap(r))
    }

    /// Resolve a dotted path such as `entries[2].name` below this atom.
    pub fn lookup(&self, path: &str) -> Result<Atom<'t>> {
        self.tree.lookup(self.id, path).map(|id| self.wrap(id))
    }

    /// Offset of the atom at `path` below this one.
    pub fn offset_of(&self, path: &str) -> Result<u64> {
        Ok(self.lookup(path)?.offset())
    }

    /// Deepest atom of this subtree whose bytes cover `offset`.
    pub fn at(&self, offset: u64) -> Option<Atom<'t>> {
        let start = self.offset();
        if offset < start || offset >= start + self.size() {
            return None;
        }
        if !self.is_bit() && matches!(self.tree.n(self.id).payload, Payload::Children(_)) {
            if let Some(found) = self.children().iter().find_map(|c| c.at(offset)) {
                return Some(found);
            }
        }
        Some(*self)
    }

    /// Pre-order traversal of this atom and everything below it, including cached
    /// pointer referents.
    pub fn walk(&self) -> Walk<'t> {
        Walk::new(*self)
    }

    pub(crate) fn structural(&self) -> Vec<Atom<'t>> {
        self.tree
            .structural(self.id)
            .into_iter()
            .map(|c| self.wrap(c))
            .collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.tree.serialize(self.id)
    }

    fn raw(&self) -> Result<&'t [u8]> {
        match &self.tree.n(self.id).payload {
            Payload::Raw(b) => Ok(b),
            _ => Err(Error::init("atom has no scalar content").within(&self.path())),
        }
    }

    fn loaded(&self) -> Result<()> {
        let node = self.tree.n(self.id);
        if node.null {
            return Err(Error::NullDereference { path: self.path() });
        }
        if matches!(node.payload, Payload::Empty) {
            return Err(Error::init("atom is not initialized").within(&self.path()));
        }
        Ok(())
    }

    /// The atom's decoded value.
    pub fn value(&self) -> Result<Value> {
        self.loaded()?;
        let node = self.tree.n(self.id);
        match &node.layout {
            Layout::Bit(ty) => match (&node.payload, ty) {
                (Payload::Bits(b), _) => Ok(bits_value(b)),
                (_, BitType::Array(_)) => self.list(),
                _ => self.record(),
            },
            Layout::Byte(ty) => match ty {
                Type::Int(t) => Ok(int_value(decode_int(self.raw()?, t), t.is_signed())),
                Type::Float(_) | Type::Fixed(_) => Ok(Value::Float(self.float()?)),
                Type::Varint { signed } => {
                    let raw = self.raw()?;
                    if *signed {
                        Ok(Value::Signed(codec::read_sleb128(raw)?))
                    } else {
                        Ok(Value::Unsigned(codec::read_uleb128(raw)?))
                    }
                }
                Type::Str(_) => Ok(Value::Text(self.text()?)),
                Type::Block(_) | Type::Constant(_) | Type::Padding(_) | Type::Align(_) => {
                    Ok(Value::Bytes(self.raw()?.to_vec()))
                }
                Type::Record(_) | Type::Union(_) => self.record(),
                Type::Array(_) => self.list(),
                Type::Pointer(p) => match &node.payload {
                    Payload::Pointer { wire, .. } => {
                        Ok(int_value(decode_int(wire, &p.wire()), p.wire().is_signed()))
                    }
                    _ => Err(Error::init("pointer is not loaded").within(&self.path())),
                },
                Type::Bits(_) => match self.structural().first() {
                    Some(root) => root.value(),
                    None => Err(Error::init("bit host has no content").within(&self.path())),
                },
            },
        }
    }

    fn record(&self) -> Result<Value> {
        self.children()
            .into_iter()
            .map(|c| Ok((c.name().to_string(), c.value()?)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Struct)
    }

    fn list(&self) -> Result<Value> {
        self.children()
            .into_iter()
            .map(|c| c.value())
            .collect::<Result<Vec<_>>>()
            .map(Value::List)
    }

    /// Integer value; fails for non-integer atoms and for values beyond `i128`.
    pub fn int(&self) -> Result<i128> {
        let value = self.value()?;
        value.as_i128().ok_or_else(|| {
            Error::value(format!("{} is not a signed integer", value.kind())).within(&self.path())
        })
    }

    pub fn uint(&self) -> Result<u128> {
        let value = self.value()?;
        value.as_u128().ok_or_else(|| {
            Error::value(format!("{} is not an unsigned integer", value.kind())).within(&self.path())
        })
    }

    pub fn float(&self) -> Result<f64> {
        self.loaded()?;
        match &self.tree.n(self.id).layout {
            Layout::Byte(Type::Float(t)) => {
                let raw = self.raw()?;
                Ok(match t.precision {
                    Precision::Half => codec::half_to_f64(codec::read_uint(raw, t.order) as u16),
                    Precision::Single => codec::read_f32(raw, t.order) as f64,
                    Precision::Double => codec::read_f64(raw, t.order),
                })
            }
            Layout::Byte(Type::Fixed(t)) => {
                let raw = decode_int(self.raw()?, &t.base);
                Ok(raw as f64 / 2f64.powi(t.fractional as i32))
            }
            _ => self.value()?.as_f64().ok_or_else(|| {
                Error::value("not a number").within(&self.path())
            }),
        }
    }

    /// Decoded text of a string atom, without terminator or length prefix.
    pub fn text(&self) -> Result<String> {
        self.loaded()?;
        match &self.tree.n(self.id).layout {
            Layout::Byte(Type::Str(s)) => s
                .encoding
                .decode(str_content(self.raw()?, s))
                .map_err(|e| e.within(&self.path())),
            layout => Err(Error::value(format!("{} is not a string", layout.name())).within(&self.path())),
        }
    }

    /// Value of a bit atom as a bitmap.
    pub fn bitmap(&self) -> Result<Bitmap> {
        match &self.tree.n(self.id).payload {
            Payload::Bits(b) => Ok(b.clone()),
            _ => Err(Error::value("not a bit integer").within(&self.path())),
        }
    }
}

fn int_value(raw: i128, signed: bool) -> Value {
    if signed {
        Value::Signed(raw)
    } else {
        Value::Unsigned(raw as u128)
    }
}

fn bits_value(b: &Bitmap) -> Value {
    let converted = if b.is_signed() {
        b.to_i128().map(Value::Signed)
    } else {
        b.to_u128().map(Value::Unsigned)
    };
    converted.unwrap_or_else(|| Value::Bits(b.clone()))
}
