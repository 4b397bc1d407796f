//! Type descriptions: what an atom is before any bytes are read.
//!
//! Types are immutable values, cheap to clone (compound types sit behind `Arc`), and may be
//! shared across threads. Dynamic parts of a layout are closures over a [`Scope`], which
//! exposes the already-loaded siblings and ancestors of the atom being built.
//!
//! ```ignore
//! let header = Type::record("header")
//!     .field("magic", Type::string(2))
//!     .field("len", Type::u16be())
//!     .dynamic("payload", |s| Ok(Type::block(s.uint("len")?)))
//!     .update(|s| Ok(Value::Bytes(s.field("payload")?.serialize())))
//!     .build()?;
//! ```

use crate::atom::Atom;
use crate::bits::BitType;
use crate::codec::{Encoding, Endianness};
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Chooses a field's type from the fields before it.
pub type Descriptor = Arc<dyn Fn(&Scope<'_>) -> Result<Type> + Send + Sync>;
/// Overrides the number of bytes a field occupies.
pub type Extent = Arc<dyn Fn(&Scope<'_>) -> Result<u64> + Send + Sync>;
/// Recomputes a field's value from the rest of its record before serialization.
pub type Update = Arc<dyn Fn(&Scope<'_>) -> Result<Value> + Send + Sync>;
/// Ends a terminated array once it returns true for the element just loaded.
pub type Terminator = Arc<dyn Fn(&Atom<'_>) -> bool + Send + Sync>;
/// Maps a pointer's wire value to an offset from the pointer itself (and back).
pub type WireMap = Arc<dyn Fn(i128) -> i128 + Send + Sync>;
pub type AddressFn = Arc<dyn Fn(&Scope<'_>, i128) -> Result<u64> + Send + Sync>;
pub type InverseFn = Arc<dyn Fn(&Scope<'_>, u64) -> Result<i128> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    width: usize,
    signed: bool,
    order: Endianness,
}

impl IntType {
    /// Integer of `width` bytes; widths outside 1..=16 are rejected.
    pub fn new(width: usize, signed: bool, order: Endianness) -> Result<Self> {
        if width == 0 || width > 16 {
            return Err(Error::schema(format!(
                "integer width must be 1..=16 bytes, got {width}"
            )));
        }
        Ok(IntType {
            width,
            signed,
            order,
        })
    }

    const fn known(width: usize, signed: bool, order: Endianness) -> Self {
        IntType {
            width,
            signed,
            order,
        }
    }

    pub const U8: IntType = IntType::known(1, false, Endianness::Little);
    pub const I8: IntType = IntType::known(1, true, Endianness::Little);
    pub const U16LE: IntType = IntType::known(2, false, Endianness::Little);
    pub const U16BE: IntType = IntType::known(2, false, Endianness::Big);
    pub const U32LE: IntType = IntType::known(4, false, Endianness::Little);
    pub const U32BE: IntType = IntType::known(4, false, Endianness::Big);
    pub const U64LE: IntType = IntType::known(8, false, Endianness::Little);
    pub const U64BE: IntType = IntType::known(8, false, Endianness::Big);
    pub const I16LE: IntType = IntType::known(2, true, Endianness::Little);
    pub const I16BE: IntType = IntType::known(2, true, Endianness::Big);
    pub const I32LE: IntType = IntType::known(4, true, Endianness::Little);
    pub const I32BE: IntType = IntType::known(4, true, Endianness::Big);
    pub const I64LE: IntType = IntType::known(8, true, Endianness::Little);
    pub const I64BE: IntType = IntType::known(8, true, Endianness::Big);

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn order(&self) -> Endianness {
        self.order
    }

    pub fn name(&self) -> String {
        let sign = if self.signed { 'i' } else { 'u' };
        if self.width == 1 {
            format!("{sign}8")
        } else {
            format!("{sign}{}{}", self.width * 8, self.order.suffix())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Half,
    Single,
    Double,
}

impl Precision {
    pub fn width(self) -> usize {
        match self {
            Precision::Half => 2,
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatType {
    pub precision: Precision,
    pub order: Endianness,
}

/// Fixed-point number: an integer scaled by `2^-fractional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedType {
    pub base: IntType,
    pub fractional: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrLength {
    /// Exactly this many code units.
    Fixed(usize),
    /// Code units up to and including a zero unit.
    Terminated,
    /// Code-unit count stored in a leading integer.
    Prefixed(IntType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrType {
    pub encoding: Encoding,
    pub length: StrLength,
}

pub struct Field {
    name: String,
    kind: FieldKind,
    extent: Option<Extent>,
    update: Option<Update>,
}

pub enum FieldKind {
    Static(Type),
    Dynamic(Descriptor),
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn extent(&self) -> Option<&Extent> {
        self.extent.as_ref()
    }

    pub fn update(&self) -> Option<&Update> {
        self.update.as_ref()
    }
}

pub struct RecordType {
    name: String,
    fields: Vec<Field>,
}

impl RecordType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Builds a [`RecordType`]. `sized` and `update` apply to the most recently added field.
pub struct RecordBuilder {
    name: String,
    fields: Vec<Field>,
    misuse: Option<String>,
}

impl RecordBuilder {
    fn push(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            kind,
            extent: None,
            update: None,
        });
        self
    }

    pub fn field(self, name: &str, ty: Type) -> Self {
        self.push(name, FieldKind::Static(ty))
    }

    /// A field whose type is computed from earlier fields when the record loads.
    pub fn dynamic<F>(self, name: &str, descriptor: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<Type> + Send + Sync + 'static,
    {
        self.push(name, FieldKind::Dynamic(Arc::new(descriptor)))
    }

    /// Force the last field to occupy exactly the returned number of bytes.
    pub fn sized<F>(mut self, extent: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<u64> + Send + Sync + 'static,
    {
        match self.fields.last_mut() {
            Some(f) => f.extent = Some(Arc::new(extent)),
            None => self.misuse = Some("`sized` before any field".into()),
        }
        self
    }

    /// Recompute the last field during `recalculate`.
    pub fn update<F>(mut self, update: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        match self.fields.last_mut() {
            Some(f) => f.update = Some(Arc::new(update)),
            None => self.misuse = Some("`update` before any field".into()),
        }
        self
    }

    pub fn build(self) -> Result<Type> {
        if let Some(m) = self.misuse {
            return Err(Error::schema(format!("record {}: {m}", self.name)));
        }
        let mut seen = HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::schema(format!(
                    "record {}: duplicate field name {:?}",
                    self.name, f.name
                )));
            }
        }
        Ok(Type::Record(Arc::new(RecordType {
            name: self.name,
            fields: self.fields,
        })))
    }
}

pub enum Shape {
    /// Exactly this many elements.
    Fixed(u64),
    /// As many elements as fit in this many bytes.
    Block(u64),
    /// Elements until the terminator accepts one.
    Terminated(Terminator),
    /// Elements until the source runs out.
    Infinite,
}

pub struct ArrayType {
    elem: Type,
    shape: Shape,
}

impl ArrayType {
    pub fn elem(&self) -> &Type {
        &self.elem
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

pub struct UnionType {
    name: String,
    members: Vec<(String, Type)>,
    size: u64,
}

impl UnionType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[(String, Type)] {
        &self.members
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

pub struct UnionBuilder {
    name: String,
    members: Vec<(String, Type)>,
    size: Option<u64>,
}

impl UnionBuilder {
    pub fn member(mut self, name: &str, ty: Type) -> Self {
        self.members.push((name.to_string(), ty));
        self
    }

    /// Explicit backing size; must cover every member.
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn build(self) -> Result<Type> {
        let mut seen = HashSet::new();
        let mut largest = 0;
        for (name, ty) in &self.members {
            if !seen.insert(name.as_str()) {
                return Err(Error::schema(format!(
                    "union {}: duplicate member name {name:?}",
                    self.name
                )));
            }
            let size = ty.static_size().ok_or_else(|| {
                Error::schema(format!(
                    "union {}: member {name:?} ({}) has no static size",
                    self.name,
                    ty.name()
                ))
            })?;
            largest = largest.max(size);
        }
        let size = match self.size {
            Some(s) if s < largest => {
                return Err(Error::schema(format!(
                    "union {}: size {s} is smaller than its largest member ({largest})",
                    self.name
                )))
            }
            Some(s) => s,
            None => largest,
        };
        Ok(Type::Union(Arc::new(UnionType {
            name: self.name,
            members: self.members,
            size,
        })))
    }
}

/// What a relative pointer's wire value is added to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base {
    Root,
    Parent,
    /// Nearest ancestor whose type has this name.
    Ancestor(String),
}

#[derive(Clone)]
pub enum AddressPolicy {
    Absolute,
    Relative(Base),
    /// `address = pointer.offset + map(wire)`.
    SelfRelative {
        map: WireMap,
        inverse: Option<WireMap>,
    },
    Computed {
        decode: AddressFn,
        encode: Option<InverseFn>,
    },
}

impl AddressPolicy {
    /// Wire value is the distance from the pointer itself.
    pub fn self_relative() -> Self {
        AddressPolicy::SelfRelative {
            map: Arc::new(|w| w),
            inverse: Some(Arc::new(|d| d)),
        }
    }

    pub fn self_relative_with<F>(map: F) -> Self
    where
        F: Fn(i128) -> i128 + Send + Sync + 'static,
    {
        AddressPolicy::SelfRelative {
            map: Arc::new(map),
            inverse: None,
        }
    }

    pub fn computed<F>(decode: F) -> Self
    where
        F: Fn(&Scope<'_>, i128) -> Result<u64> + Send + Sync + 'static,
    {
        AddressPolicy::Computed {
            decode: Arc::new(decode),
            encode: None,
        }
    }

    pub fn computed_with_inverse<F, G>(decode: F, encode: G) -> Self
    where
        F: Fn(&Scope<'_>, i128) -> Result<u64> + Send + Sync + 'static,
        G: Fn(&Scope<'_>, u64) -> Result<i128> + Send + Sync + 'static,
    {
        AddressPolicy::Computed {
            decode: Arc::new(decode),
            encode: Some(Arc::new(encode)),
        }
    }

    pub fn is_invertible(&self) -> bool {
        match self {
            AddressPolicy::Absolute | AddressPolicy::Relative(_) => true,
            AddressPolicy::SelfRelative { inverse, .. } => inverse.is_some(),
            AddressPolicy::Computed { encode, .. } => encode.is_some(),
        }
    }
}

impl fmt::Debug for AddressPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressPolicy::Absolute => f.write_str("Absolute"),
            AddressPolicy::Relative(base) => write!(f, "Relative({base:?})"),
            AddressPolicy::SelfRelative { .. } => f.write_str("SelfRelative"),
            AddressPolicy::Computed { .. } => f.write_str("Computed"),
        }
    }
}

pub struct PointerType {
    wire: IntType,
    target: Type,
    policy: AddressPolicy,
}

impl PointerType {
    pub fn wire(&self) -> IntType {
        self.wire
    }

    pub fn target(&self) -> &Type {
        &self.target
    }

    pub fn policy(&self) -> &AddressPolicy {
        &self.policy
    }
}

/// A byte-aligned atom whose content is a bit-granular tree.
pub struct BitHost {
    root: BitType,
    order: Endianness,
}

impl BitHost {
    pub fn root(&self) -> &BitType {
        &self.root
    }

    pub fn order(&self) -> Endianness {
        self.order
    }
}

#[derive(Clone)]
pub enum Type {
    Int(IntType),
    Float(FloatType),
    Fixed(FixedType),
    Varint { signed: bool },
    Str(StrType),
    Block(u64),
    Constant(Arc<[u8]>),
    Padding(u64),
    Align(u64),
    Record(Arc<RecordType>),
    Array(Arc<ArrayType>),
    Union(Arc<UnionType>),
    Pointer(Arc<PointerType>),
    Bits(Arc<BitHost>),
}

impl Type {
    pub fn u8() -> Type {
        Type::Int(IntType::U8)
    }

    pub fn i8() -> Type {
        Type::Int(IntType::I8)
    }

    pub fn u16le() -> Type {
        Type::Int(IntType::U16LE)
    }

    pub fn u16be() -> Type {
        Type::Int(IntType::U16BE)
    }

    pub fn u32le() -> Type {
        Type::Int(IntType::U32LE)
    }

    pub fn u32be() -> Type {
        Type::Int(IntType::U32BE)
    }

    pub fn u64le() -> Type {
        Type::Int(IntType::U64LE)
    }

    pub fn u64be() -> Type {
        Type::Int(IntType::U64BE)
    }

    pub fn i16le() -> Type {
        Type::Int(IntType::I16LE)
    }

    pub fn i16be() -> Type {
        Type::Int(IntType::I16BE)
    }

    pub fn i32le() -> Type {
        Type::Int(IntType::I32LE)
    }

    pub fn i32be() -> Type {
        Type::Int(IntType::I32BE)
    }

    pub fn i64le() -> Type {
        Type::Int(IntType::I64LE)
    }

    pub fn i64be() -> Type {
        Type::Int(IntType::I64BE)
    }

    pub fn uint(width: usize, order: Endianness) -> Result<Type> {
        Ok(Type::Int(IntType::new(width, false, order)?))
    }

    pub fn sint(width: usize, order: Endianness) -> Result<Type> {
        Ok(Type::Int(IntType::new(width, true, order)?))
    }

    pub fn float(precision: Precision, order: Endianness) -> Type {
        Type::Float(FloatType { precision, order })
    }

    pub fn f16(order: Endianness) -> Type {
        Type::float(Precision::Half, order)
    }

    pub fn f32(order: Endianness) -> Type {
        Type::float(Precision::Single, order)
    }

    pub fn f64(order: Endianness) -> Type {
        Type::float(Precision::Double, order)
    }

    /// Fixed-point number over `base` with `fractional` fraction bits.
    pub fn fixed(base: IntType, fractional: u32) -> Result<Type> {
        if fractional as usize > base.width * 8 {
            return Err(Error::schema(format!(
                "{fractional} fraction bits exceed the {}-bit base",
                base.width * 8
            )));
        }
        Ok(Type::Fixed(FixedType { base, fractional }))
    }

    pub fn uleb128() -> Type {
        Type::Varint { signed: false }
    }

    pub fn sleb128() -> Type {
        Type::Varint { signed: true }
    }

    pub fn text(encoding: Encoding, length: StrLength) -> Type {
        Type::Str(StrType { encoding, length })
    }

    /// ASCII string of exactly `len` characters.
    pub fn string(len: usize) -> Type {
        Type::text(Encoding::Ascii, StrLength::Fixed(len))
    }

    /// Zero-terminated ASCII string.
    pub fn cstring() -> Type {
        Type::text(Encoding::Ascii, StrLength::Terminated)
    }

    /// ASCII string preceded by its length.
    pub fn pstring(prefix: IntType) -> Type {
        Type::text(Encoding::Ascii, StrLength::Prefixed(prefix))
    }

    pub fn wstring(len: usize, order: Endianness) -> Type {
        Type::text(utf16(order), StrLength::Fixed(len))
    }

    pub fn wcstring(order: Endianness) -> Type {
        Type::text(utf16(order), StrLength::Terminated)
    }

    pub fn char() -> Type {
        Type::string(1)
    }

    pub fn wchar(order: Endianness) -> Type {
        Type::wstring(1, order)
    }

    pub fn block(len: u64) -> Type {
        Type::Block(len)
    }

    /// Bytes that are expected to read back as `bytes` (a magic number).
    pub fn constant(bytes: impl Into<Vec<u8>>) -> Type {
        let bytes: Vec<u8> = bytes.into();
        Type::Constant(Arc::from(bytes))
    }

    pub fn padding(len: u64) -> Type {
        Type::Padding(len)
    }

    /// Pads to the next multiple of `alignment` from the start of the enclosing record.
    pub fn align(alignment: u64) -> Result<Type> {
        if alignment == 0 {
            return Err(Error::schema("alignment must be non-zero"));
        }
        Ok(Type::Align(alignment))
    }

    pub fn record(name: &str) -> RecordBuilder {
        RecordBuilder {
            name: name.to_string(),
            fields: Vec::new(),
            misuse: None,
        }
    }

    pub fn array(elem: Type, count: u64) -> Type {
        Type::with_shape(elem, Shape::Fixed(count))
    }

    pub fn block_array(elem: Type, bytes: u64) -> Type {
        Type::with_shape(elem, Shape::Block(bytes))
    }

    pub fn terminated<F>(elem: Type, terminator: F) -> Type
    where
        F: Fn(&Atom<'_>) -> bool + Send + Sync + 'static,
    {
        Type::with_shape(elem, Shape::Terminated(Arc::new(terminator)))
    }

    pub fn infinite(elem: Type) -> Type {
        Type::with_shape(elem, Shape::Infinite)
    }

    pub fn with_shape(elem: Type, shape: Shape) -> Type {
        Type::Array(Arc::new(ArrayType { elem, shape }))
    }

    pub fn union(name: &str) -> UnionBuilder {
        UnionBuilder {
            name: name.to_string(),
            members: Vec::new(),
            size: None,
        }
    }

    pub fn pointer(wire: IntType, target: Type) -> Type {
        Type::pointer_with(wire, target, AddressPolicy::Absolute)
    }

    pub fn rpointer(wire: IntType, target: Type, base: Base) -> Type {
        Type::pointer_with(wire, target, AddressPolicy::Relative(base))
    }

    pub fn pointer_with(wire: IntType, target: Type, policy: AddressPolicy) -> Type {
        Type::Pointer(Arc::new(PointerType {
            wire,
            target,
            policy,
        }))
    }

    pub fn bits(root: BitType, order: Endianness) -> Type {
        Type::Bits(Arc::new(BitHost { root, order }))
    }

    /// Byte size known without reading any content.
    pub fn static_size(&self) -> Option<u64> {
        match self {
            Type::Int(t) => Some(t.width as u64),
            Type::Float(t) => Some(t.precision.width() as u64),
            Type::Fixed(t) => Some(t.base.width as u64),
            Type::Varint { .. } | Type::Align(_) => None,
            Type::Str(s) => match s.length {
                StrLength::Fixed(n) => n.checked_mul(s.encoding.unit()).map(|b| b as u64),
                _ => None,
            },
            Type::Block(n) | Type::Padding(n) => Some(*n),
            Type::Constant(b) => Some(b.len() as u64),
            Type::Record(r) => r
                .fields
                .iter()
                .try_fold(0u64, |total, f| match (&f.kind, &f.extent) {
                    (FieldKind::Static(t), None) => total.checked_add(t.static_size()?),
                    _ => None,
                }),
            Type::Array(a) => match a.shape {
                Shape::Fixed(n) => a.elem.static_size().and_then(|s| s.checked_mul(n)),
                Shape::Block(n) => Some(n),
                Shape::Terminated(_) | Shape::Infinite => None,
            },
            Type::Union(u) => Some(u.size),
            Type::Pointer(p) => Some(p.wire.width as u64),
            Type::Bits(h) => h.root.static_bits().map(|b| b.div_ceil(8)),
        }
    }

    /// Opaque byte types; a block array may cut its last element of such a type short.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Type::Block(_))
    }

    pub fn name(&self) -> String {
        match self {
            Type::Int(t) => t.name(),
            Type::Float(t) => {
                let bits = t.precision.width() * 8;
                format!("f{bits}{}", t.order.suffix())
            }
            Type::Fixed(t) => format!(
                "{}fixed{}.{}{}",
                if t.base.signed { 's' } else { 'u' },
                t.base.width * 8,
                t.fractional,
                if t.base.width == 1 { "" } else { t.base.order.suffix() }
            ),
            Type::Varint { signed } => {
                if *signed {
                    "sleb128".into()
                } else {
                    "uleb128".into()
                }
            }
            Type::Str(s) => {
                let enc = match s.encoding {
                    Encoding::Ascii => "str",
                    Encoding::Utf8 => "utf8",
                    Encoding::Utf16Le => "wstrle",
                    Encoding::Utf16Be => "wstrbe",
                };
                match s.length {
                    StrLength::Fixed(n) => format!("{enc}[{n}]"),
                    StrLength::Terminated => format!("{enc}z"),
                    StrLength::Prefixed(p) => format!("{enc}<{}>", p.name()),
                }
            }
            Type::Block(n) => format!("block[{n}]"),
            Type::Constant(b) => format!("const[{}]", b.len()),
            Type::Padding(n) => format!("padding[{n}]"),
            Type::Align(n) => format!("align[{n}]"),
            Type::Record(r) => r.name.clone(),
            Type::Array(a) => {
                let elem = a.elem.name();
                match &a.shape {
                    Shape::Fixed(n) => format!("{elem}[{n}]"),
                    Shape::Block(n) => format!("{elem}[{n} bytes]"),
                    Shape::Terminated(_) => format!("{elem}[..]"),
                    Shape::Infinite => format!("{elem}[*]"),
                }
            }
            Type::Union(u) => u.name.clone(),
            Type::Pointer(p) => format!("*{}", p.target.name()),
            Type::Bits(h) => h.root.name(),
        }
    }
}

fn utf16(order: Endianness) -> Encoding {
    match order {
        Endianness::Big => Encoding::Utf16Be,
        Endianness::Little => Encoding::Utf16Le,
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_field_names_are_rejected() {
        let r = Type::record("r")
            .field("a", Type::u8())
            .field("a", Type::u16le())
            .build();
        assert!(matches!(r, Err(Error::Schema(_))));
    }

    #[test]
    fn union_members_need_static_sizes() {
        let u = Type::union("u").member("s", Type::cstring()).build();
        assert!(matches!(u, Err(Error::Schema(_))));
        let u = Type::union("u")
            .member("a", Type::u32le())
            .size(2)
            .build();
        assert!(matches!(u, Err(Error::Schema(_))));
    }

    #[test]
    fn static_sizes_add_up() {
        let r = Type::record("hdr")
            .field("magic", Type::string(2))
            .field("len", Type::u16be())
            .field("words", Type::array(Type::u32le(), 3))
            .build()
            .expect("valid record");
        assert_eq!(r.static_size(), Some(16));
        let d = Type::record("dyn")
            .field("n", Type::u8())
            .dynamic("body", |s| Ok(Type::block(s.uint("n")?)))
            .build()
            .expect("valid record");
        assert_eq!(d.static_size(), None);
        assert_eq!(Type::array(Type::u64le(), u64::MAX).static_size(), None);
        let huge = Type::record("huge")
            .field("a", Type::block(u64::MAX))
            .field("b", Type::u8())
            .build()
            .expect("valid record");
        assert_eq!(huge.static_size(), None);
    }

    #[test]
    fn names() {
        assert_eq!(Type::u16be().name(), "u16be");
        assert_eq!(Type::u8().name(), "u8");
        assert_eq!(Type::array(Type::i32le(), 4).name(), "i32le[4]");
        assert_eq!(Type::cstring().name(), "strz");
    }
}
