//! The atom arena: every loaded or allocated atom of one document lives in a [`Tree`] and
//! is addressed by an [`AtomId`].
//!
//! ## Lifecycle
//!
//! An atom is *created* from a [`Type`] at an offset (uninitialized, size 0), then either
//! *loaded* from the tree's source or *allocated* with default content. After that it can be
//! *set*, *serialized* (pure, no I/O) and *committed* back to the source.
//!
//! ## Edits
//!
//! [`Tree::set`] keeps the document consistent:
//!
//! - later sibling fields whose type is computed from earlier ones are re-resolved; they
//!   keep their id and reload from their previous bytes when those still fit;
//! - offsets of everything after the edited atom are recomputed;
//! - an edit inside a union member rewrites the union's backing bytes and reloads the
//!   other members from them;
//! - the containing records are marked dirty so [`Tree::recalculate`] reruns their field
//!   update functions.
//!
//! ## Pointers
//!
//! A pointer's referent is a child of the pointer with its own offset. It is created and
//! loaded on the first [`Tree::dereference`] and cached; a zero wire value yields an
//! uninitialized referent whose load fails with [`Error::NullDereference`].

use crate::atom::Atom;
use crate::bitmap::Bitmap;
use crate::bits::{BitFieldKind, BitReader, BitShape, BitType, BitWriter};
use crate::codec::{self, Endianness};
use crate::config::Config;
use crate::error::{join_path, Error, Result, Warning};
use crate::schema::{
    AddressPolicy, ArrayType, Base, BitHost, Extent, Field, FieldKind, IntType, PointerType,
    Precision, RecordType, Shape, StrLength, StrType, Terminator, Type, UnionType,
};
use crate::scope::Scope;
use crate::source::{shared, BytesSource, Detached, EmptySource, SharedSource, Source, SourceError, Window};
use crate::value::Value;
use log::{debug, trace, warn};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u32);

impl AtomId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone)]
pub(crate) enum Layout {
    Byte(Type),
    Bit(BitType),
}

impl Layout {
    pub(crate) fn name(&self) -> String {
        match self {
            Layout::Byte(t) => t.name(),
            Layout::Bit(t) => t.name(),
        }
    }
}

pub(crate) enum Payload {
    Empty,
    /// Scalars, blocks, strings, constants, padding.
    Raw(Vec<u8>),
    /// Records and arrays, byte- or bit-level.
    Children(Vec<AtomId>),
    Union {
        backing: Vec<u8>,
        members: Vec<AtomId>,
    },
    Pointer {
        wire: Vec<u8>,
        referent: Option<AtomId>,
    },
    /// A byte-aligned host of a bit tree; `pad` holds the unused bits of its last byte.
    Host {
        root: AtomId,
        pad: Bitmap,
    },
    Bits(Bitmap),
}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) layout: Layout,
    /// Byte offset, or absolute bit position for bit atoms.
    pub(crate) offset: u64,
    pub(crate) parent: Option<AtomId>,
    pub(crate) initialized: bool,
    pub(crate) dirty: bool,
    pub(crate) decode_failed: bool,
    /// Referent of a null pointer.
    pub(crate) null: bool,
    /// Byte extent forced by the enclosing record.
    pub(crate) extent: Option<u64>,
    pub(crate) payload: Payload,
    /// Bytes owned by the atom past its content (extent padding, block-array leftovers).
    pub(crate) tail: Vec<u8>,
}

pub struct Tree {
    nodes: Vec<Node>,
    /// Released slots, reused by the next atoms created.
    free: Vec<AtomId>,
    source: SharedSource,
    config: Config,
    warnings: Vec<Warning>,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("atoms", &self.atom_count())
            .field("config", &self.config)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Read `amount` bytes at `offset`. Zero-length reads never touch the source.
fn read_at(src: &mut dyn Source, offset: u64, amount: u64) -> Result<Vec<u8>> {
    if amount == 0 {
        return Ok(Vec::new());
    }
    seek_to(src, offset, amount)?;
    Ok(src.consume(amount)?)
}

/// `offset + amount`; a span past the end of the address space reads as running out of bytes.
fn span_end(offset: u64, amount: u64) -> Result<u64> {
    offset.checked_add(amount).ok_or(Error::Consume {
        path: String::new(),
        offset,
        desired: amount,
        got: 0,
    })
}

/// `count` code units of `unit` bytes each.
fn units(count: u64, unit: u64) -> Result<u64> {
    count
        .checked_mul(unit)
        .ok_or_else(|| Error::init(format!("{count} characters overflow the address space")))
}

/// Bit position of a byte offset.
fn bit_position(offset: u64) -> Result<u64> {
    offset
        .checked_mul(8)
        .ok_or_else(|| Error::init(format!("offset {offset:#x} has no bit position")))
}

/// Seek for a read of `amount` bytes; seeking past the end reads as running out of bytes.
fn seek_to(src: &mut dyn Source, offset: u64, amount: u64) -> Result<()> {
    match src.seek(offset) {
        Ok(_) => Ok(()),
        Err(SourceError::OutOfBounds { .. }) => Err(Error::Consume {
            path: String::new(),
            offset,
            desired: amount,
            got: 0,
        }),
        Err(e) => Err(e.into()),
    }
}

fn read_varint(src: &mut dyn Source, offset: u64) -> Result<Vec<u8>> {
    seek_to(src, offset, 1)?;
    let mut raw = Vec::new();
    loop {
        let byte = src.consume(1)?[0];
        raw.push(byte);
        if byte & 0x80 == 0 {
            return Ok(raw);
        }
        if raw.len() >= 19 {
            return Err(Error::init("LEB128 value longer than 19 bytes"));
        }
    }
}

fn read_str(src: &mut dyn Source, offset: u64, ty: &StrType, limit: usize) -> Result<Vec<u8>> {
    let unit = ty.encoding.unit() as u64;
    match ty.length {
        StrLength::Fixed(n) => read_at(src, offset, units(n as u64, unit)?),
        StrLength::Terminated => {
            seek_to(src, offset, unit)?;
            let mut raw = Vec::new();
            loop {
                let chunk = src.consume(unit)?;
                let done = chunk.iter().all(|&b| b == 0);
                raw.extend_from_slice(&chunk);
                if done {
                    return Ok(raw);
                }
                if raw.len() as u64 / unit >= limit as u64 {
                    return Err(Error::init(format!("no terminator within {limit} characters")));
                }
            }
        }
        StrLength::Prefixed(prefix) => {
            let width = prefix.width() as u64;
            let mut raw = read_at(src, offset, width)?;
            let count = u64::try_from(codec::read_uint(&raw, prefix.order()))
                .map_err(|_| Error::init("string length prefix out of range"))?;
            raw.extend(read_at(src, span_end(offset, width)?, units(count, unit)?)?);
            Ok(raw)
        }
    }
}

/// The text bytes of a string atom, without terminator or length prefix.
pub(crate) fn str_content<'a>(raw: &'a [u8], ty: &StrType) -> &'a [u8] {
    match ty.length {
        StrLength::Fixed(_) => raw,
        StrLength::Terminated => &raw[..raw.len().saturating_sub(ty.encoding.unit())],
        StrLength::Prefixed(p) => raw.get(p.width()..).unwrap_or(&[]),
    }
}

fn encode_str(ty: &StrType, text: &str) -> Result<Vec<u8>> {
    let body = ty.encoding.encode(text)?;
    let unit = ty.encoding.unit();
    match ty.length {
        StrLength::Fixed(n) => {
            let capacity = n
                .checked_mul(unit)
                .ok_or_else(|| Error::value(format!("{n} characters overflow the address space")))?;
            if body.len() > capacity {
                return Err(Error::value(format!(
                    "{} characters do not fit in {n}",
                    body.len() / unit
                )));
            }
            let mut raw = body;
            raw.resize(capacity, 0);
            Ok(raw)
        }
        StrLength::Terminated => {
            let mut raw = body;
            raw.extend(std::iter::repeat(0).take(unit));
            Ok(raw)
        }
        StrLength::Prefixed(prefix) => {
            let count = (body.len() / unit) as u128;
            let mut raw = codec::write_uint(count, prefix.width(), prefix.order())?;
            raw.extend(body);
            Ok(raw)
        }
    }
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::value(format!("expected {expected}, got {}", value.kind()))
}

fn encode_int(value: &Value, ty: &IntType) -> Result<Vec<u8>> {
    match value {
        Value::Signed(x) => codec::write_int(*x, ty.width(), ty.is_signed(), ty.order()),
        _ => {
            let x = value.as_u128().ok_or_else(|| mismatch("an integer", value))?;
            if ty.is_signed() {
                let x = i128::try_from(x).map_err(|_| Error::value(format!("{x} is out of range")))?;
                codec::write_int(x, ty.width(), true, ty.order())
            } else {
                codec::write_uint(x, ty.width(), ty.order())
            }
        }
    }
}

pub(crate) fn decode_int(raw: &[u8], ty: &IntType) -> i128 {
    if ty.is_signed() {
        codec::read_int(raw, ty.order())
    } else {
        codec::read_uint(raw, ty.order()) as i128
    }
}

fn index_segment(index: u64) -> String {
    format!("[{index}]")
}

impl Tree {
    pub fn new(source: SharedSource) -> Self {
        Tree::with_config(source, Config::default())
    }

    pub fn with_config(source: SharedSource, config: Config) -> Self {
        Tree {
            nodes: Vec::new(),
            free: Vec::new(),
            source,
            config,
            warnings: Vec::new(),
        }
    }

    /// Tree over an in-memory copy of `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Tree::new(shared(BytesSource::new(bytes)))
    }

    /// Tree with no backing bytes, for building documents with `alloc`.
    pub fn detached() -> Self {
        Tree::new(shared(EmptySource))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn atom(&self, id: AtomId) -> Atom<'_> {
        Atom::new(self, id)
    }

    pub(crate) fn n(&self, id: AtomId) -> &Node {
        &self.nodes[id.index()]
    }

    fn n_mut(&mut self, id: AtomId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn spawn(&mut self, parent: Option<AtomId>, name: String, layout: Layout, offset: u64) -> AtomId {
        let node = Node {
            name,
            layout,
            offset,
            parent,
            initialized: false,
            dirty: false,
            decode_failed: false,
            null: false,
            extent: None,
            payload: Payload::Empty,
            tail: Vec::new(),
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id.index()] = node;
            return id;
        }
        let id = AtomId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Return `id` and everything below it to the free list. Ids of released atoms are
    /// reused by later atoms.
    fn release(&mut self, id: AtomId) {
        self.release_children(id);
        let node = self.n_mut(id);
        node.name.clear();
        node.layout = Layout::Byte(Type::Block(0));
        node.parent = None;
        node.payload = Payload::Empty;
        node.tail = Vec::new();
        node.extent = None;
        node.null = false;
        node.initialized = false;
        node.dirty = false;
        node.decode_failed = false;
        self.free.push(id);
    }

    fn release_children(&mut self, id: AtomId) {
        for child in self.structural(id) {
            self.release(child);
        }
    }

    /// Live atoms in the arena.
    pub fn atom_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Drop a parentless atom and everything below it. Its id, and the ids of its
    /// descendants, must not be used afterwards.
    pub fn discard(&mut self, id: AtomId) -> Result<()> {
        if self.n(id).parent.is_some() {
            return Err(Error::value("only parentless atoms can be discarded").within(&self.path(id)));
        }
        self.release(id);
        Ok(())
    }

    fn attach(&mut self, parent: AtomId, child: AtomId) {
        match &mut self.n_mut(parent).payload {
            Payload::Children(c) => c.push(child),
            Payload::Union { members, .. } => members.push(child),
            _ => {}
        }
    }

    fn detach_last(&mut self, parent: AtomId) {
        let popped = match &mut self.n_mut(parent).payload {
            Payload::Children(c) => c.pop(),
            _ => None,
        };
        if let Some(child) = popped {
            self.release(child);
        }
    }

    fn push_element(&mut self, array: AtomId, index: u64, layout: Layout, offset: u64) -> AtomId {
        let child = self.spawn(Some(array), index.to_string(), layout, offset);
        self.attach(array, child);
        child
    }

    fn reset_content(&mut self, id: AtomId) {
        self.release_children(id);
        let node = self.n_mut(id);
        node.payload = Payload::Empty;
        node.tail.clear();
        node.initialized = false;
        node.decode_failed = false;
    }

    fn set_raw(&mut self, id: AtomId, raw: Vec<u8>) {
        self.n_mut(id).payload = Payload::Raw(raw);
    }

    fn record_warning(&mut self, warning: Warning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub(crate) fn is_bit(&self, id: AtomId) -> bool {
        matches!(self.n(id).layout, Layout::Bit(_))
    }

    pub(crate) fn is_array(&self, id: AtomId) -> bool {
        matches!(
            self.n(id).layout,
            Layout::Byte(Type::Array(_)) | Layout::Bit(BitType::Array(_))
        )
    }

    pub(crate) fn type_name(&self, id: AtomId) -> String {
        self.n(id).layout.name()
    }

    /// Named or indexed members: record fields, array elements, union members. A bit host
    /// exposes the members of its root.
    pub(crate) fn members(&self, id: AtomId) -> &[AtomId] {
        match &self.n(id).payload {
            Payload::Children(c) => c,
            Payload::Union { members, .. } => members,
            Payload::Host { root, .. } => self.members(*root),
            _ => &[],
        }
    }

    /// Everything owned by the atom, including a bit host's root and a cached referent.
    pub(crate) fn structural(&self, id: AtomId) -> Vec<AtomId> {
        match &self.n(id).payload {
            Payload::Children(c) => c.clone(),
            Payload::Union { members, .. } => members.clone(),
            Payload::Host { root, .. } => vec![*root],
            Payload::Pointer {
                referent: Some(r), ..
            } => vec![*r],
            _ => Vec::new(),
        }
    }

    pub(crate) fn referent(&self, id: AtomId) -> Option<AtomId> {
        match &self.n(id).payload {
            Payload::Pointer { referent, .. } => *referent,
            _ => None,
        }
    }

    pub(crate) fn child_named(&self, id: AtomId, name: &str) -> Option<AtomId> {
        self.members(id)
            .iter()
            .copied()
            .find(|&c| self.n(c).name == name)
    }

    fn segment(&self, id: AtomId) -> String {
        let node = self.n(id);
        match node.parent {
            Some(p) if self.is_array(p) => format!("[{}]", node.name),
            _ => node.name.clone(),
        }
    }

    /// Dotted path from the outermost ancestor, e.g. `hdr.entries[3].name`.
    pub fn path(&self, id: AtomId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            segments.push(self.segment(c));
            current = self.n(c).parent;
        }
        segments
            .iter()
            .rev()
            .fold(String::new(), |acc, s| join_path(&acc, s))
    }

    /// Resolve a path such as `hdr.entries[3].name` relative to `id`.
    pub fn lookup(&self, id: AtomId, path: &str) -> Result<AtomId> {
        let mut current = id;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let (name, rest) = match segment.find('[') {
                Some(i) => segment.split_at(i),
                None => (segment, ""),
            };
            if !name.is_empty() {
                current = self
                    .child_named(current, name)
                    .ok_or_else(|| Error::not_found(name).within(&self.path(current)))?;
            }
            for index in rest.split('[').filter(|s| !s.is_empty()) {
                let index: usize = index
                    .trim_end_matches(']')
                    .parse()
                    .map_err(|_| Error::value(format!("bad index in {segment:?}")))?;
                current = *self.members(current).get(index).ok_or_else(|| {
                    Error::not_found(index_segment(index as u64)).within(&self.path(current))
                })?;
            }
        }
        Ok(current)
    }

    /// Byte size of the content, excluding the tail.
    fn content_size(&self, id: AtomId) -> u64 {
        let node = self.n(id);
        if self.is_bit(id) {
            return self.bits(id).div_ceil(8);
        }
        match &node.payload {
            Payload::Empty | Payload::Bits(_) => 0,
            Payload::Raw(b) => b.len() as u64,
            Payload::Children(c) => c.iter().map(|&c| self.size(c)).sum(),
            Payload::Union { backing, .. } => backing.len() as u64,
            Payload::Pointer { wire, .. } => wire.len() as u64,
            Payload::Host { root, pad } => (self.bits(*root) + pad.width() as u64).div_ceil(8),
        }
    }

    pub(crate) fn size(&self, id: AtomId) -> u64 {
        self.content_size(id) + self.n(id).tail.len() as u64
    }

    pub(crate) fn bits(&self, id: AtomId) -> u64 {
        if !self.is_bit(id) {
            return self.size(id) * 8;
        }
        match &self.n(id).payload {
            Payload::Bits(b) => b.width() as u64,
            Payload::Children(c) => c.iter().map(|&c| self.bits(c)).sum(),
            _ => 0,
        }
    }

    pub(crate) fn blocksize(&self, id: AtomId) -> Result<u64> {
        let node = self.n(id);
        if let Some(extent) = node.extent {
            return Ok(extent);
        }
        let known = match &node.layout {
            Layout::Byte(ty) => ty.static_size(),
            Layout::Bit(ty) => ty.static_bits().map(|b| b.div_ceil(8)),
        };
        match known {
            Some(s) => Ok(s),
            None if !matches!(node.payload, Payload::Empty) => Ok(self.size(id)),
            None => Err(Error::init(format!(
                "size of {} depends on content that is not loaded",
                node.layout.name()
            ))
            .within(&self.path(id))),
        }
    }

    /// Byte offset of the byte holding the atom's first bit, for bit atoms.
    pub(crate) fn byte_offset(&self, id: AtomId) -> u64 {
        if self.is_bit(id) {
            self.n(id).offset / 8
        } else {
            self.n(id).offset
        }
    }

    fn bit_order_of(&self, id: AtomId) -> Endianness {
        let mut current = Some(id);
        while let Some(c) = current {
            if let Layout::Byte(Type::Bits(host)) = &self.n(c).layout {
                return host.order();
            }
            current = self.n(c).parent;
        }
        self.config.bit_order
    }

    fn byte_owner(&self, id: AtomId) -> AtomId {
        let mut current = id;
        while self.is_bit(current) {
            match self.n(current).parent {
                Some(p) => current = p,
                None => break,
            }
        }
        current
    }

    /// A new, uninitialized atom of `ty` at `offset` with no parent.
    pub fn create(&mut self, ty: Type, name: &str, offset: u64) -> AtomId {
        self.spawn(None, name.to_string(), Layout::Byte(ty), offset)
    }

    /// Create and load in one step. On failure the error is returned and the partially
    /// loaded atom is discarded; use [`Tree::create`] + [`Tree::load`] to inspect it.
    pub fn load_new(&mut self, ty: Type, name: &str, offset: u64) -> Result<AtomId> {
        let id = self.create(ty, name, offset);
        if let Err(e) = self.load(id) {
            self.release(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn alloc_new(&mut self, ty: Type, name: &str) -> Result<AtomId> {
        let id = self.create(ty, name, 0);
        if let Err(e) = self.alloc(id) {
            self.release(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Read the atom's content from the tree's source.
    pub fn load(&mut self, id: AtomId) -> Result<()> {
        if self.n(id).null {
            return Err(Error::NullDereference {
                path: self.path(id),
            });
        }
        debug!(
            "load {} ({}) at {:#x}",
            self.path(id),
            self.type_name(id),
            self.n(id).offset
        );
        let source = Arc::clone(&self.source);
        let mut guard = source
            .lock()
            .map_err(|_| Error::from(SourceError::Poisoned).within(&self.path(id)))?;
        let loaded = self.load_node(id, &mut *guard);
        drop(guard);
        loaded.map_err(|e| e.within(&self.path(id)))?;
        if self.n(id).parent.is_some() {
            self.reflow(id);
        }
        Ok(())
    }

    fn load_node(&mut self, id: AtomId, src: &mut dyn Source) -> Result<()> {
        let ty = match &self.n(id).layout {
            Layout::Byte(ty) => ty.clone(),
            Layout::Bit(_) => return Err(Error::init("bit atoms load through their host")),
        };
        self.reset_content(id);
        let offset = self.n(id).offset;
        trace!("{} at {offset:#x}", ty.name());
        match &ty {
            Type::Int(t) => {
                let raw = read_at(src, offset, t.width() as u64)?;
                self.set_raw(id, raw);
            }
            Type::Float(t) => {
                let raw = read_at(src, offset, t.precision.width() as u64)?;
                self.set_raw(id, raw);
            }
            Type::Fixed(t) => {
                let raw = read_at(src, offset, t.base.width() as u64)?;
                self.set_raw(id, raw);
            }
            Type::Varint { .. } => {
                let raw = read_varint(src, offset)?;
                self.set_raw(id, raw);
            }
            Type::Str(s) => {
                let raw = read_str(src, offset, s, self.config.max_elements)?;
                if let Err(e) = s.encoding.decode(str_content(&raw, s)) {
                    self.n_mut(id).decode_failed = true;
                    let path = self.path(id);
                    self.record_warning(Warning::Decode {
                        path,
                        message: e.to_string(),
                    });
                }
                self.set_raw(id, raw);
            }
            Type::Block(n) | Type::Padding(n) => {
                let raw = read_at(src, offset, *n)?;
                self.set_raw(id, raw);
            }
            Type::Constant(expected) => {
                let raw = read_at(src, offset, expected.len() as u64)?;
                if raw[..] != expected[..] {
                    let path = self.path(id);
                    self.record_warning(Warning::ConstantMismatch {
                        path,
                        expected: expected.to_vec(),
                        found: raw.clone(),
                    });
                }
                self.set_raw(id, raw);
            }
            Type::Align(n) => {
                let pad = self.align_pad(id, *n);
                let raw = read_at(src, offset, pad)?;
                self.set_raw(id, raw);
            }
            Type::Record(r) => self.load_record(id, r, src)?,
            Type::Array(a) => self.load_array(id, a, src)?,
            Type::Union(u) => self.load_union(id, u, src)?,
            Type::Pointer(p) => {
                let wire = read_at(src, offset, p.wire().width() as u64)?;
                self.n_mut(id).payload = Payload::Pointer {
                    wire,
                    referent: None,
                };
            }
            Type::Bits(h) => self.load_host(id, h, src)?,
        }
        self.n_mut(id).initialized = true;
        Ok(())
    }

    fn align_pad(&self, id: AtomId, alignment: u64) -> u64 {
        let node = self.n(id);
        let start = node.parent.map(|p| self.n(p).offset).unwrap_or(0);
        let relative = node.offset.saturating_sub(start);
        (alignment - relative % alignment) % alignment
    }

    fn resolve_field(&self, record: AtomId, index: usize, field: &Field) -> Result<Type> {
        match field.kind() {
            FieldKind::Static(ty) => Ok(ty.clone()),
            FieldKind::Dynamic(descriptor) => {
                let scope = Scope::new(self, record, index);
                descriptor(&scope).map_err(Error::into_initialization)
            }
        }
    }

    fn eval_extent(&self, record: AtomId, index: usize, extent: &Extent) -> Result<u64> {
        let scope = Scope::new(self, record, index);
        extent(&scope).map_err(Error::into_initialization)
    }

    fn load_record(&mut self, id: AtomId, record: &RecordType, src: &mut dyn Source) -> Result<()> {
        self.n_mut(id).payload = Payload::Children(Vec::new());
        let mut cursor = self.n(id).offset;
        for (index, field) in record.fields().iter().enumerate() {
            let ty = self
                .resolve_field(id, index, field)
                .map_err(|e| e.within(field.name()))?;
            let child = self.spawn(Some(id), field.name().to_string(), Layout::Byte(ty), cursor);
            self.attach(id, child);
            let loaded = match field.extent() {
                Some(extent) => match self.eval_extent(id, index, extent) {
                    Ok(n) => self.load_extent(child, n, src),
                    Err(e) => Err(e),
                },
                None => self.load_node(child, src),
            };
            loaded.map_err(|e| e.within(field.name()))?;
            trace!("{}.{} at {cursor:#x}", record.name(), field.name());
            cursor = span_end(cursor, self.size(child)).map_err(|e| e.within(field.name()))?;
        }
        Ok(())
    }

    fn load_extent(&mut self, id: AtomId, extent: u64, src: &mut dyn Source) -> Result<()> {
        self.n_mut(id).extent = Some(extent);
        let offset = self.n(id).offset;
        {
            let mut window = Window::new(src, span_end(offset, extent)?);
            self.load_node(id, &mut window)?;
        }
        let used = self.content_size(id);
        if used < extent {
            let tail = read_at(src, offset + used, extent - used)?;
            self.n_mut(id).tail = tail;
        }
        Ok(())
    }

    fn load_array(&mut self, id: AtomId, array: &ArrayType, src: &mut dyn Source) -> Result<()> {
        self.n_mut(id).payload = Payload::Children(Vec::new());
        let elem = array.elem();
        match array.shape() {
            Shape::Fixed(count) => {
                let mut cursor = self.n(id).offset;
                for i in 0..*count {
                    let child = self.push_element(id, i, Layout::Byte(elem.clone()), cursor);
                    self.load_node(child, src)
                        .map_err(|e| e.within(&index_segment(i)))?;
                    cursor = span_end(cursor, self.size(child))
                        .map_err(|e| e.within(&index_segment(i)))?;
                }
                Ok(())
            }
            Shape::Block(extent) => self.load_block_array(id, elem, *extent, src),
            Shape::Terminated(done) => self.load_terminated(id, elem, Some(done), src),
            Shape::Infinite => self.load_terminated(id, elem, None, src),
        }
    }

    fn load_block_array(&mut self, id: AtomId, elem: &Type, extent: u64, src: &mut dyn Source) -> Result<()> {
        let end = span_end(self.n(id).offset, extent)?;
        let fixed = elem.static_size();
        let mut cursor = self.n(id).offset;
        let mut index = 0;
        while cursor < end {
            let remaining = end - cursor;
            let ty = match fixed {
                Some(0) => break,
                Some(s) if s > remaining => {
                    if !elem.is_opaque() {
                        break;
                    }
                    Type::block(remaining)
                }
                _ => elem.clone(),
            };
            let child = self.push_element(id, index, Layout::Byte(ty), cursor);
            let loaded = {
                let mut window = Window::new(src, end);
                self.load_node(child, &mut window)
            };
            match loaded {
                Ok(()) => {}
                Err(e) if e.is_consume() && fixed.is_none() => {
                    self.detach_last(id);
                    break;
                }
                Err(e) => return Err(e.within(&index_segment(index))),
            }
            let size = self.size(child);
            if size == 0 {
                break;
            }
            cursor = span_end(cursor, size).map_err(|e| e.within(&index_segment(index)))?;
            index += 1;
        }
        if cursor < end {
            let tail = read_at(src, cursor, end - cursor)?;
            let bytes = tail.len() as u64;
            self.n_mut(id).tail = tail;
            let path = self.path(id);
            self.record_warning(Warning::Leftover { path, bytes });
        }
        Ok(())
    }

    /// Terminated (`done` given) or infinite arrays.
    fn load_terminated(
        &mut self,
        id: AtomId,
        elem: &Type,
        done: Option<&Terminator>,
        src: &mut dyn Source,
    ) -> Result<()> {
        let mut cursor = self.n(id).offset;
        let mut index = 0u64;
        loop {
            if index as usize >= self.config.max_elements {
                return Err(Error::init(format!(
                    "more than {} elements",
                    self.config.max_elements
                )));
            }
            if done.is_none() && src.size().is_some_and(|size| cursor >= size) {
                break;
            }
            let child = self.push_element(id, index, Layout::Byte(elem.clone()), cursor);
            match self.load_node(child, src) {
                Ok(()) => {}
                Err(e) if e.is_consume() => {
                    self.detach_last(id);
                    if done.is_none() {
                        break;
                    }
                    if src.size().is_some() {
                        let path = self.path(id);
                        self.record_warning(Warning::UnterminatedArray {
                            path,
                            count: index as usize,
                        });
                        break;
                    }
                    return Err(e.within(&index_segment(index)));
                }
                Err(e) => return Err(e.within(&index_segment(index))),
            }
            let size = self.size(child);
            cursor = span_end(cursor, size).map_err(|e| e.within(&index_segment(index)))?;
            index += 1;
            match done {
                Some(done) => {
                    if done(&self.atom(child)) {
                        break;
                    }
                }
                None if size == 0 => break,
                None => {}
            }
        }
        Ok(())
    }

    fn load_union(&mut self, id: AtomId, union: &UnionType, src: &mut dyn Source) -> Result<()> {
        let offset = self.n(id).offset;
        let backing = read_at(src, offset, union.size())?;
        self.n_mut(id).payload = Payload::Union {
            backing: backing.clone(),
            members: Vec::new(),
        };
        for (name, ty) in union.members() {
            let member = self.spawn(Some(id), name.clone(), Layout::Byte(ty.clone()), offset);
            self.attach(id, member);
            let mut view = Detached::new(&backing, offset);
            self.load_node(member, &mut view)
                .map_err(|e| e.within(name))?;
        }
        Ok(())
    }

    fn load_host(&mut self, id: AtomId, host: &BitHost, src: &mut dyn Source) -> Result<()> {
        let offset = self.n(id).offset;
        let position = bit_position(offset)?;
        let root = self.spawn(Some(id), String::new(), Layout::Bit(host.root().clone()), position);
        self.n_mut(id).payload = Payload::Host {
            root,
            pad: Bitmap::zero(),
        };
        if host.root().static_bits() == Some(0) {
            return self.alloc_bits(root);
        }
        seek_to(src, offset, 1)?;
        let mut reader = BitReader::new(src, host.order(), offset);
        self.load_bits(root, &mut reader)?;
        let leftover = reader.pad();
        if let Payload::Host { pad, .. } = &mut self.n_mut(id).payload {
            *pad = leftover;
        }
        Ok(())
    }

    fn resolve_bit_field(&self, record: AtomId, index: usize, kind: &BitFieldKind) -> Result<BitType> {
        match kind {
            BitFieldKind::Static(ty) => Ok(ty.clone()),
            BitFieldKind::Dynamic(descriptor) => {
                let scope = Scope::new(self, record, index);
                descriptor(&scope).map_err(Error::into_initialization)
            }
        }
    }

    fn load_bits(&mut self, id: AtomId, reader: &mut BitReader<'_>) -> Result<()> {
        let ty = match &self.n(id).layout {
            Layout::Bit(ty) => ty.clone(),
            Layout::Byte(_) => return Err(Error::init("byte atom inside a bit tree")),
        };
        let start = self.n(id).offset;
        match &ty {
            BitType::Int { bits, signed } => {
                let value = reader.read(*bits)?.with_sign(*signed);
                self.n_mut(id).payload = Payload::Bits(value);
            }
            BitType::Record(record) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let mut cursor = start;
                for (index, field) in record.fields().iter().enumerate() {
                    let fty = self
                        .resolve_bit_field(id, index, field.kind())
                        .map_err(|e| e.within(field.name()))?;
                    let child = self.spawn(Some(id), field.name().to_string(), Layout::Bit(fty), cursor);
                    self.attach(id, child);
                    self.load_bits(child, reader)
                        .map_err(|e| e.within(field.name()))?;
                    cursor = cursor.saturating_add(self.bits(child));
                }
            }
            BitType::Array(array) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let mut cursor = start;
                let mut index = 0u64;
                loop {
                    match array.shape() {
                        BitShape::Fixed(n) if index >= *n => break,
                        _ if index as usize >= self.config.max_elements => {
                            return Err(Error::init(format!(
                                "more than {} elements",
                                self.config.max_elements
                            )))
                        }
                        _ => {}
                    }
                    let child = self.push_element(id, index, Layout::Bit(array.elem().clone()), cursor);
                    match self.load_bits(child, reader) {
                        Ok(()) => {}
                        Err(e) if e.is_consume() && matches!(array.shape(), BitShape::Terminated(_)) => {
                            self.detach_last(id);
                            if reader.bounded() {
                                let path = self.path(id);
                                self.record_warning(Warning::UnterminatedArray {
                                    path,
                                    count: index as usize,
                                });
                                break;
                            }
                            return Err(e.within(&index_segment(index)));
                        }
                        Err(e) => return Err(e.within(&index_segment(index))),
                    }
                    cursor = cursor.saturating_add(self.bits(child));
                    index += 1;
                    if let BitShape::Terminated(done) = array.shape() {
                        if done(&self.atom(child)) {
                            break;
                        }
                    }
                }
            }
        }
        self.n_mut(id).initialized = true;
        Ok(())
    }

    /// Give the atom default content without touching the source.
    pub fn alloc(&mut self, id: AtomId) -> Result<()> {
        self.alloc_node(id).map_err(|e| e.within(&self.path(id)))?;
        if self.n(id).parent.is_some() {
            self.reflow(id);
        }
        Ok(())
    }

    fn alloc_node(&mut self, id: AtomId) -> Result<()> {
        let ty = match &self.n(id).layout {
            Layout::Byte(ty) => ty.clone(),
            Layout::Bit(_) => return self.alloc_bits(id),
        };
        self.reset_content(id);
        let fill = self.config.padding;
        let offset = self.n(id).offset;
        match &ty {
            Type::Int(t) => self.set_raw(id, vec![0; t.width()]),
            Type::Float(t) => self.set_raw(id, vec![0; t.precision.width()]),
            Type::Fixed(t) => self.set_raw(id, vec![0; t.base.width()]),
            Type::Varint { .. } => self.set_raw(id, vec![0]),
            Type::Str(s) => {
                let unit = s.encoding.unit();
                let raw = match s.length {
                    StrLength::Fixed(n) => vec![0; units(n as u64, unit as u64)? as usize],
                    StrLength::Terminated => vec![0; unit],
                    StrLength::Prefixed(p) => vec![0; p.width()],
                };
                self.set_raw(id, raw);
            }
            Type::Block(n) => self.set_raw(id, vec![0; *n as usize]),
            Type::Padding(n) => self.set_raw(id, vec![fill; *n as usize]),
            Type::Constant(bytes) => self.set_raw(id, bytes.to_vec()),
            Type::Align(n) => {
                let pad = self.align_pad(id, *n);
                self.set_raw(id, vec![fill; pad as usize]);
            }
            Type::Record(record) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let mut cursor = offset;
                for (index, field) in record.fields().iter().enumerate() {
                    let ty = self
                        .resolve_field(id, index, field)
                        .map_err(|e| e.within(field.name()))?;
                    let child = self.spawn(Some(id), field.name().to_string(), Layout::Byte(ty), cursor);
                    self.attach(id, child);
                    self.alloc_node(child).map_err(|e| e.within(field.name()))?;
                    if let Some(extent) = field.extent() {
                        let n = self
                            .eval_extent(id, index, extent)
                            .map_err(|e| e.within(field.name()))?;
                        self.apply_extent(child, n);
                    }
                    cursor = cursor.saturating_add(self.size(child));
                }
            }
            Type::Array(array) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let elem = array.elem();
                let (count, tail) = match array.shape() {
                    Shape::Fixed(n) => (*n, 0),
                    Shape::Block(extent) => match elem.static_size() {
                        Some(s) if s > 0 => (extent / s, extent % s),
                        _ => (0, *extent),
                    },
                    Shape::Terminated(_) | Shape::Infinite => (0, 0),
                };
                let mut cursor = offset;
                for i in 0..count {
                    let child = self.push_element(id, i, Layout::Byte(elem.clone()), cursor);
                    self.alloc_node(child)
                        .map_err(|e| e.within(&index_segment(i)))?;
                    cursor = cursor.saturating_add(self.size(child));
                }
                self.n_mut(id).tail = vec![fill; tail as usize];
            }
            Type::Union(union) => {
                let backing = vec![0; union.size() as usize];
                self.n_mut(id).payload = Payload::Union {
                    backing: backing.clone(),
                    members: Vec::new(),
                };
                for (name, ty) in union.members() {
                    let member = self.spawn(Some(id), name.clone(), Layout::Byte(ty.clone()), offset);
                    self.attach(id, member);
                    let mut view = Detached::new(&backing, offset);
                    self.load_node(member, &mut view)
                        .map_err(|e| e.within(name))?;
                }
            }
            Type::Pointer(p) => {
                self.n_mut(id).payload = Payload::Pointer {
                    wire: vec![0; p.wire().width()],
                    referent: None,
                };
            }
            Type::Bits(host) => {
                let position = bit_position(offset)?;
                let root = self.spawn(Some(id), String::new(), Layout::Bit(host.root().clone()), position);
                self.n_mut(id).payload = Payload::Host {
                    root,
                    pad: Bitmap::zero(),
                };
                self.alloc_bits(root)?;
                self.fix_pad(id);
            }
        }
        self.n_mut(id).initialized = true;
        Ok(())
    }

    fn alloc_bits(&mut self, id: AtomId) -> Result<()> {
        let ty = match &self.n(id).layout {
            Layout::Bit(ty) => ty.clone(),
            Layout::Byte(_) => return self.alloc_node(id),
        };
        self.reset_content(id);
        let start = self.n(id).offset;
        match &ty {
            BitType::Int { bits, signed } => {
                self.n_mut(id).payload = Payload::Bits(Bitmap::new(0, *bits).with_sign(*signed));
            }
            BitType::Record(record) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let mut cursor = start;
                for (index, field) in record.fields().iter().enumerate() {
                    let fty = self
                        .resolve_bit_field(id, index, field.kind())
                        .map_err(|e| e.within(field.name()))?;
                    let child = self.spawn(Some(id), field.name().to_string(), Layout::Bit(fty), cursor);
                    self.attach(id, child);
                    self.alloc_bits(child)?;
                    cursor = cursor.saturating_add(self.bits(child));
                }
            }
            BitType::Array(array) => {
                self.n_mut(id).payload = Payload::Children(Vec::new());
                let count = match array.shape() {
                    BitShape::Fixed(n) => *n,
                    BitShape::Terminated(_) => 0,
                };
                let mut cursor = start;
                for i in 0..count {
                    let child = self.push_element(id, i, Layout::Bit(array.elem().clone()), cursor);
                    self.alloc_bits(child)?;
                    cursor = cursor.saturating_add(self.bits(child));
                }
            }
        }
        self.n_mut(id).initialized = true;
        Ok(())
    }

    /// Pad a host's bit tree out to whole bytes, keeping existing pad bits when the width
    /// still matches.
    fn fix_pad(&mut self, host: AtomId) {
        let root = match &self.n(host).payload {
            Payload::Host { root, .. } => *root,
            _ => return,
        };
        let width = ((8 - self.bits(root) % 8) % 8) as u32;
        if let Payload::Host { pad, .. } = &mut self.n_mut(host).payload {
            if pad.width() != width {
                *pad = Bitmap::new(0, width);
            }
        }
    }

    /// Force `id` to own exactly `extent` bytes by adjusting its tail.
    fn apply_extent(&mut self, id: AtomId, extent: u64) {
        let used = self.content_size(id);
        let fill = self.config.padding;
        let node = self.n_mut(id);
        node.extent = Some(extent);
        if used > extent {
            debug!("content of {used} bytes exceeds the forced extent of {extent}");
            node.tail.clear();
        } else {
            node.tail.resize((extent - used) as usize, fill);
        }
    }

    /// Assign a value. See the module docs for what an edit updates.
    pub fn set(&mut self, id: AtomId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.set_value(id, &value)
            .map_err(|e| e.within(&self.path(id)))
    }

    /// [`Tree::set`] on the atom at `path` below `id`.
    pub fn set_at(&mut self, id: AtomId, path: &str, value: impl Into<Value>) -> Result<()> {
        let target = self.lookup(id, path)?;
        self.set(target, value)
    }

    fn set_value(&mut self, id: AtomId, value: &Value) -> Result<()> {
        if self.n(id).null {
            return Err(Error::NullDereference {
                path: String::new(),
            });
        }
        if matches!(self.n(id).payload, Payload::Empty) {
            self.alloc_node(id)?;
        }
        self.assign(id, value)?;
        self.n_mut(id).initialized = true;
        self.after_change(id)
    }

    fn assign(&mut self, id: AtomId, value: &Value) -> Result<()> {
        let ty = match &self.n(id).layout {
            Layout::Byte(ty) => ty.clone(),
            Layout::Bit(ty) => {
                let ty = ty.clone();
                return self.assign_bits(id, &ty, value);
            }
        };
        match (&ty, value) {
            (Type::Int(_) | Type::Float(_) | Type::Fixed(_) | Type::Varint { .. }, Value::Bytes(b)) => {
                if let Some(width) = ty.static_size() {
                    if b.len() as u64 != width {
                        return Err(Error::value(format!("expected {width} bytes, got {}", b.len())));
                    }
                }
                self.set_raw(id, b.clone());
            }
            (Type::Int(t), _) => {
                let raw = encode_int(value, t)?;
                self.set_raw(id, raw);
            }
            (Type::Float(t), _) => {
                let x = value.as_f64().ok_or_else(|| mismatch("a number", value))?;
                let raw = match t.precision {
                    Precision::Half => codec::encode_uint(codec::f64_to_half(x) as u128, 2, t.order),
                    Precision::Single => codec::write_f32(x as f32, t.order),
                    Precision::Double => codec::write_f64(x, t.order),
                };
                self.set_raw(id, raw);
            }
            (Type::Fixed(t), _) => {
                let x = value.as_f64().ok_or_else(|| mismatch("a number", value))?;
                let scaled = (x * 2f64.powi(t.fractional as i32)).round_ties_even();
                if !scaled.is_finite() || scaled.abs() >= 2f64.powi(127) {
                    return Err(Error::value(format!("{x} is out of range")));
                }
                let raw = codec::write_int(scaled as i128, t.base.width(), t.base.is_signed(), t.base.order())?;
                self.set_raw(id, raw);
            }
            (Type::Varint { signed }, _) => {
                let raw = if *signed {
                    codec::write_sleb128(value.as_i128().ok_or_else(|| mismatch("an integer", value))?)
                } else {
                    codec::write_uleb128(value.as_u128().ok_or_else(|| mismatch("an unsigned integer", value))?)
                };
                self.set_raw(id, raw);
            }
            (Type::Str(_), Value::Bytes(b)) => {
                self.set_raw(id, b.clone());
                self.n_mut(id).decode_failed = false;
            }
            (Type::Str(s), _) => {
                let text = value.as_str().ok_or_else(|| mismatch("text", value))?;
                let raw = encode_str(s, text)?;
                self.set_raw(id, raw);
                self.n_mut(id).decode_failed = false;
            }
            (Type::Block(_) | Type::Constant(_) | Type::Padding(_) | Type::Align(_), _) => {
                let bytes = value.as_bytes().ok_or_else(|| mismatch("bytes", value))?;
                self.set_raw(id, bytes.to_vec());
            }
            (Type::Record(_) | Type::Union(_), _) => {
                let fields = value.as_struct().ok_or_else(|| mismatch("a struct", value))?;
                for (name, v) in fields {
                    let child = self
                        .child_named(id, name)
                        .ok_or_else(|| Error::not_found(name.clone()))?;
                    self.set_value(child, v).map_err(|e| e.within(name))?;
                }
            }
            (Type::Array(array), _) => self.assign_array(id, array, value)?,
            (Type::Pointer(p), _) => {
                let wire = encode_int(value, &p.wire())?;
                self.release_children(id);
                self.n_mut(id).payload = Payload::Pointer {
                    wire,
                    referent: None,
                };
            }
            (Type::Bits(_), _) => {
                let root = match &self.n(id).payload {
                    Payload::Host { root, .. } => *root,
                    _ => return Err(Error::init("bit host has no content")),
                };
                self.set_value(root, value)?;
            }
        }
        Ok(())
    }

    fn assign_array(&mut self, id: AtomId, array: &ArrayType, value: &Value) -> Result<()> {
        let items = value.as_list().ok_or_else(|| mismatch("a list", value))?;
        let children = self.members(id).to_vec();
        if items.len() == children.len() {
            for (i, (child, v)) in children.iter().zip(items).enumerate() {
                self.set_value(*child, v)
                    .map_err(|e| e.within(&index_segment(i as u64)))?;
            }
            return Ok(());
        }
        if let Shape::Fixed(n) = array.shape() {
            return Err(Error::value(format!(
                "expected {n} elements, got {}",
                items.len()
            )));
        }
        self.release_children(id);
        let node = self.n_mut(id);
        node.payload = Payload::Children(Vec::new());
        node.tail.clear();
        let mut cursor = node.offset;
        for (i, v) in items.iter().enumerate() {
            let i = i as u64;
            let child = self.push_element(id, i, Layout::Byte(array.elem().clone()), cursor);
            self.alloc_node(child).map_err(|e| e.within(&index_segment(i)))?;
            self.set_value(child, v).map_err(|e| e.within(&index_segment(i)))?;
            cursor = cursor.saturating_add(self.size(child));
        }
        Ok(())
    }

    fn assign_bits(&mut self, id: AtomId, ty: &BitType, value: &Value) -> Result<()> {
        match ty {
            BitType::Int { bits, signed } => {
                let bitmap = match value {
                    Value::Bits(b) => {
                        if b.width() != *bits {
                            return Err(Error::value(format!(
                                "expected {bits} bits, got {}",
                                b.width()
                            )));
                        }
                        b.clone().with_sign(*signed)
                    }
                    Value::Signed(x) if *signed => {
                        check_bit_range(*x, *bits, true)?;
                        Bitmap::signed(*x, *bits)
                    }
                    _ => {
                        let x = value.as_i128().ok_or_else(|| mismatch("an integer", value))?;
                        check_bit_range(x, *bits, *signed)?;
                        Bitmap::with_length(x, if *signed { -(*bits as i32) } else { *bits as i32 })
                    }
                };
                self.n_mut(id).payload = Payload::Bits(bitmap);
            }
            BitType::Record(_) => {
                let fields = value.as_struct().ok_or_else(|| mismatch("a struct", value))?;
                for (name, v) in fields {
                    let child = self
                        .child_named(id, name)
                        .ok_or_else(|| Error::not_found(name.clone()))?;
                    self.set_value(child, v).map_err(|e| e.within(name))?;
                }
            }
            BitType::Array(_) => {
                let items = value.as_list().ok_or_else(|| mismatch("a list", value))?;
                let children = self.members(id).to_vec();
                if items.len() != children.len() {
                    return Err(Error::value(format!(
                        "expected {} elements, got {}",
                        children.len(),
                        items.len()
                    )));
                }
                for (i, (child, v)) in children.iter().zip(items).enumerate() {
                    self.set_value(*child, v)
                        .map_err(|e| e.within(&index_segment(i as u64)))?;
                }
            }
        }
        Ok(())
    }

    fn after_change(&mut self, id: AtomId) -> Result<()> {
        self.relayout_dependents(id)?;
        self.reflow(id);
        self.sync_union(id)?;
        self.mark_dirty(id);
        Ok(())
    }

    /// Re-resolve the dynamic fields that follow `id` in each enclosing record, innermost
    /// first. Referents are separate layouts, so the walk stops at a pointer.
    fn relayout_dependents(&mut self, id: AtomId) -> Result<()> {
        let mut current = id;
        while let Some(parent) = self.n(current).parent {
            if matches!(self.n(parent).payload, Payload::Pointer { .. }) {
                break;
            }
            self.relayout_after(parent, current).map_err(|e| {
                let e = e.within(&self.path(parent));
                Error::init(format!("dependent field cannot follow the change: {e}"))
            })?;
            current = parent;
        }
        Ok(())
    }

    fn relayout_after(&mut self, parent: AtomId, id: AtomId) -> Result<()> {
        let siblings = match &self.n(parent).payload {
            Payload::Children(c) => c.clone(),
            _ => return Ok(()),
        };
        let Some(index) = siblings.iter().position(|&c| c == id) else {
            return Ok(());
        };
        match self.n(parent).layout.clone() {
            Layout::Byte(Type::Record(record)) => {
                let end = siblings.len().min(record.fields().len());
                for j in index + 1..end {
                    let field = &record.fields()[j];
                    let child = siblings[j];
                    if let FieldKind::Dynamic(_) = field.kind() {
                        let ty = self
                            .resolve_field(parent, j, field)
                            .map_err(|e| e.within(field.name()))?;
                        debug!("{}: re-resolved as {}", self.path(child), ty.name());
                        self.rebuild(child, ty).map_err(|e| e.within(field.name()))?;
                    }
                    if let Some(extent) = field.extent() {
                        let n = self
                            .eval_extent(parent, j, extent)
                            .map_err(|e| e.within(field.name()))?;
                        self.apply_extent(child, n);
                    }
                }
            }
            Layout::Bit(BitType::Record(record)) => {
                let end = siblings.len().min(record.fields().len());
                for j in index + 1..end {
                    let field = &record.fields()[j];
                    if let BitFieldKind::Dynamic(_) = field.kind() {
                        let ty = self
                            .resolve_bit_field(parent, j, field.kind())
                            .map_err(|e| e.within(field.name()))?;
                        let child = siblings[j];
                        self.n_mut(child).layout = Layout::Bit(ty);
                        self.alloc_bits(child).map_err(|e| e.within(field.name()))?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Change an atom's type in place, reloading it from its previous bytes when they
    /// still fit and allocating it otherwise.
    fn rebuild(&mut self, id: AtomId, ty: Type) -> Result<()> {
        let old = self.serialize(id);
        let offset = self.n(id).offset;
        self.n_mut(id).layout = Layout::Byte(ty);
        let mut view = Detached::new(&old, offset);
        if let Err(e) = self.load_node(id, &mut view) {
            debug!("{}: previous bytes do not fit ({e}), allocating", self.path(id));
            self.alloc_node(id)?;
        }
        Ok(())
    }

    /// Recompute offsets after `id` changed size, up through its ancestors.
    fn reflow(&mut self, id: AtomId) {
        let mut current = id;
        while let Some(parent) = self.n(current).parent {
            let payload = &self.n(parent).payload;
            if matches!(payload, Payload::Children(_)) {
                self.layout_children(parent);
            } else if matches!(payload, Payload::Host { .. }) {
                self.fix_pad(parent);
            } else if !matches!(payload, Payload::Union { .. }) {
                break;
            }
            current = parent;
        }
    }

    fn move_to(&mut self, id: AtomId, offset: u64) {
        if self.n(id).offset == offset {
            return;
        }
        self.n_mut(id).offset = offset;
        self.layout_children(id);
    }

    fn layout_children(&mut self, id: AtomId) {
        let offset = self.n(id).offset;
        let bit = self.is_bit(id);
        match &self.n(id).payload {
            Payload::Children(c) => {
                let mut cursor = offset;
                for child in c.clone() {
                    self.move_to(child, cursor);
                    let step = if bit { self.bits(child) } else { self.size(child) };
                    cursor = cursor.saturating_add(step);
                }
            }
            Payload::Union { members, .. } => {
                for member in members.clone() {
                    self.move_to(member, offset);
                }
            }
            Payload::Host { root, .. } => {
                let root = *root;
                self.move_to(root, offset.saturating_mul(8));
            }
            _ => {}
        }
    }

    /// Move an atom (and everything it contains) to a new offset.
    pub fn relocate(&mut self, id: AtomId, offset: u64) {
        let offset = if self.is_bit(id) { offset.saturating_mul(8) } else { offset };
        self.n_mut(id).offset = offset;
        self.layout_children(id);
    }

    fn sync_union(&mut self, id: AtomId) -> Result<()> {
        let mut member = id;
        loop {
            let Some(parent) = self.n(member).parent else {
                return Ok(());
            };
            match &self.n(parent).payload {
                Payload::Union { .. } => return self.sync_members(parent, member),
                Payload::Pointer { .. } => return Ok(()),
                _ => member = parent,
            }
        }
    }

    /// Write `changed` into the union's backing bytes and reload the other members.
    fn sync_members(&mut self, union: AtomId, changed: AtomId) -> Result<()> {
        let bytes = self.serialize(changed);
        let offset = self.n(union).offset;
        let (backing, members) = match &mut self.n_mut(union).payload {
            Payload::Union { backing, members } => {
                let n = bytes.len().min(backing.len());
                backing[..n].copy_from_slice(&bytes[..n]);
                (backing.clone(), members.clone())
            }
            _ => return Ok(()),
        };
        for member in members.into_iter().filter(|&m| m != changed) {
            let mut view = Detached::new(&backing, offset);
            self.load_node(member, &mut view)
                .map_err(|e| e.within(&self.n(member).name))?;
        }
        self.sync_union(union)
    }

    fn mark_dirty(&mut self, id: AtomId) {
        let mut current = self.n(id).parent;
        while let Some(p) = current {
            if matches!(self.n(p).payload, Payload::Pointer { .. }) {
                break;
            }
            self.n_mut(p).dirty = true;
            current = self.n(p).parent;
        }
    }

    /// Rerun field update functions of dirty records below and including `id`, and
    /// re-encode pointers whose referent moved. Children are processed before parents.
    pub fn recalculate(&mut self, id: AtomId) -> Result<()> {
        self.recalc(id).map_err(|e| e.within(&self.path(id)))
    }

    fn recalc(&mut self, id: AtomId) -> Result<()> {
        for child in self.structural(id) {
            let segment = self.segment(child);
            self.recalc(child).map_err(|e| e.within(&segment))?;
        }
        if self.n(id).dirty {
            if let Layout::Byte(Type::Record(record)) = self.n(id).layout.clone() {
                for (j, field) in record.fields().iter().enumerate() {
                    let Some(update) = field.update() else {
                        continue;
                    };
                    let Some(child) = self.members(id).get(j).copied() else {
                        continue;
                    };
                    let wanted = {
                        let scope = Scope::full(self, id);
                        update(&scope)
                            .map_err(|e| e.into_initialization().within(field.name()))?
                    };
                    if self.atom(child).value().ok().as_ref() != Some(&wanted) {
                        debug!("{}: updated to {wanted:?}", self.path(child));
                        self.set_value(child, &wanted)
                            .map_err(|e| e.within(field.name()))?;
                    }
                }
            }
        }
        if let Some(referent) = self.referent(id) {
            self.refresh_wire(id, referent)?;
        }
        self.n_mut(id).dirty = false;
        Ok(())
    }

    fn pointer_type(&self, id: AtomId) -> Result<Arc<PointerType>> {
        match &self.n(id).layout {
            Layout::Byte(Type::Pointer(p)) => Ok(Arc::clone(p)),
            layout => Err(Error::value(format!("{} is not a pointer", layout.name()))),
        }
    }

    fn wire_value(&self, id: AtomId, pointer: &PointerType) -> Result<i128> {
        match &self.n(id).payload {
            Payload::Pointer { wire, .. } => Ok(decode_int(wire, &pointer.wire())),
            _ => Err(Error::init("pointer is not loaded")),
        }
    }

    fn base_offset(&self, id: AtomId, base: &Base) -> Result<u64> {
        match base {
            Base::Root => {
                let mut current = id;
                while let Some(p) = self.n(current).parent {
                    current = p;
                }
                Ok(self.n(current).offset)
            }
            Base::Parent => self
                .n(id)
                .parent
                .map(|p| self.byte_offset(p))
                .ok_or_else(|| Error::init("relative pointer has no parent")),
            Base::Ancestor(name) => self
                .atom(id)
                .getparent(Some(name.as_str()))
                .map(|a| a.offset())
                .ok_or_else(|| Error::not_found(format!("ancestor of type {name}"))),
        }
    }

    fn resolve_address(&self, id: AtomId, pointer: &PointerType, wire: i128) -> Result<u64> {
        let address = match pointer.policy() {
            AddressPolicy::Absolute => wire,
            AddressPolicy::Relative(base) => self.base_offset(id, base)? as i128 + wire,
            AddressPolicy::SelfRelative { map, .. } => self.n(id).offset as i128 + map(wire),
            AddressPolicy::Computed { decode, .. } => {
                let scope = Scope::full(self, id);
                return decode(&scope, wire).map_err(Error::into_initialization);
            }
        };
        u64::try_from(address).map_err(|_| Error::init(format!("address {address} is out of range")))
    }

    fn encode_address(&self, id: AtomId, pointer: &PointerType, address: u64) -> Result<i128> {
        let address = address as i128;
        match pointer.policy() {
            AddressPolicy::Absolute => Ok(address),
            AddressPolicy::Relative(base) => Ok(address - self.base_offset(id, base)? as i128),
            AddressPolicy::SelfRelative {
                inverse: Some(inverse),
                ..
            } => Ok(inverse(address - self.n(id).offset as i128)),
            AddressPolicy::Computed {
                encode: Some(encode),
                ..
            } => {
                let scope = Scope::full(self, id);
                encode(&scope, address as u64).map_err(Error::into_initialization)
            }
            _ => Err(Error::value("pointer has no inverse address mapping")),
        }
    }

    /// Keep a dereferenced pointer's wire value in step with its referent's offset.
    fn refresh_wire(&mut self, id: AtomId, referent: AtomId) -> Result<()> {
        let pointer = self.pointer_type(id)?;
        if !pointer.policy().is_invertible() || self.n(referent).null {
            return Ok(());
        }
        let target = self.n(referent).offset;
        let wire = self.encode_address(id, &pointer, target)?;
        let raw = encode_int(&Value::Signed(wire), &pointer.wire())?;
        let changed = match &mut self.n_mut(id).payload {
            Payload::Pointer { wire, .. } if *wire != raw => {
                *wire = raw;
                true
            }
            _ => false,
        };
        if changed {
            debug!("{}: re-encoded for referent at {target:#x}", self.path(id));
            self.sync_union(id)?;
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// The pointer's referent, created and loaded on first use and cached afterwards.
    pub fn dereference(&mut self, id: AtomId) -> Result<AtomId> {
        self.deref_node(id).map_err(|e| e.within(&self.path(id)))
    }

    fn deref_node(&mut self, id: AtomId) -> Result<AtomId> {
        let pointer = self.pointer_type(id)?;
        if let Some(r) = self.referent(id) {
            trace!("{}: cached referent", self.path(id));
            return Ok(r);
        }
        let wire = self.wire_value(id, &pointer)?;
        let target = Layout::Byte(pointer.target().clone());
        if wire == 0 {
            let r = self.spawn(Some(id), "*".into(), target, 0);
            self.n_mut(r).null = true;
            self.set_referent(id, r);
            debug!("{}: null pointer", self.path(id));
            return Ok(r);
        }
        let address = self.resolve_address(id, &pointer, wire)?;
        debug!("{}: {wire:#x} -> {address:#x}", self.path(id));
        let source = Arc::clone(&self.source);
        let mut guard = source.lock().map_err(|_| Error::from(SourceError::Poisoned))?;
        let r = self.spawn(Some(id), "*".into(), target, address);
        let loaded = self.load_node(r, &mut *guard);
        drop(guard);
        if let Err(e) = loaded {
            self.release(r);
            return Err(e.within("*"));
        }
        self.set_referent(id, r);
        Ok(r)
    }

    fn set_referent(&mut self, id: AtomId, r: AtomId) {
        if let Payload::Pointer { referent, .. } = &mut self.n_mut(id).payload {
            *referent = Some(r);
        }
    }

    /// Point `id` at `address`, encoding it through the pointer's address policy.
    pub fn reference(&mut self, id: AtomId, address: u64) -> Result<()> {
        self.reference_node(id, address)
            .map_err(|e| e.within(&self.path(id)))
    }

    /// Point `id` at another atom's offset.
    pub fn reference_atom(&mut self, id: AtomId, target: AtomId) -> Result<()> {
        let address = self.byte_offset(target);
        self.reference(id, address)
    }

    fn reference_node(&mut self, id: AtomId, address: u64) -> Result<()> {
        let pointer = self.pointer_type(id)?;
        let wire = self.encode_address(id, &pointer, address)?;
        let raw = encode_int(&Value::Signed(wire), &pointer.wire())?;
        self.release_children(id);
        self.n_mut(id).payload = Payload::Pointer {
            wire: raw,
            referent: None,
        };
        self.n_mut(id).initialized = true;
        self.after_change(id)
    }

    /// The atom's bytes as they would be written. Pure: no I/O and no recalculation.
    pub fn serialize(&self, id: AtomId) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size(id) as usize);
        self.serialize_into(id, &mut out);
        out
    }

    fn serialize_into(&self, id: AtomId, out: &mut Vec<u8>) {
        let node = self.n(id);
        if self.is_bit(id) {
            let mut writer = BitWriter::new(self.bit_order_of(id));
            self.write_bits(id, &mut writer);
            out.extend(writer.finish(&Bitmap::zero()));
            return;
        }
        match &node.payload {
            Payload::Empty | Payload::Bits(_) => {}
            Payload::Raw(b) => out.extend_from_slice(b),
            Payload::Children(c) => {
                for &child in c {
                    self.serialize_into(child, out);
                }
            }
            Payload::Union { backing, .. } => out.extend_from_slice(backing),
            Payload::Pointer { wire, .. } => out.extend_from_slice(wire),
            Payload::Host { root, pad } => {
                let mut writer = BitWriter::new(self.bit_order_of(id));
                self.write_bits(*root, &mut writer);
                out.extend(writer.finish(pad));
            }
        }
        out.extend_from_slice(&node.tail);
    }

    fn write_bits(&self, id: AtomId, writer: &mut BitWriter) {
        match &self.n(id).payload {
            Payload::Bits(b) => writer.write(b),
            Payload::Children(c) => {
                for &child in c {
                    self.write_bits(child, writer);
                }
            }
            _ => {}
        }
    }

    /// Recalculate, then write the atom's bytes to the source at its offset. Bit atoms
    /// commit their whole host.
    pub fn commit(&mut self, id: AtomId) -> Result<()> {
        let target = self.byte_owner(id);
        self.recalculate(target)?;
        let bytes = self.serialize(target);
        let offset = self.n(target).offset;
        debug!("commit {} bytes of {} at {offset:#x}", bytes.len(), self.path(target));
        let source = Arc::clone(&self.source);
        let mut guard = source
            .lock()
            .map_err(|_| Error::from(SourceError::Poisoned).within(&self.path(target)))?;
        let stored = guard
            .seek(offset)
            .and_then(|_| guard.store(&bytes))
            .and_then(|written| {
                if written < bytes.len() as u64 {
                    Err(SourceError::Store {
                        offset,
                        desired: bytes.len() as u64,
                        written,
                    })
                } else {
                    Ok(written)
                }
            });
        drop(guard);
        stored.map_err(|e| Error::from(e).within(&self.path(target)))?;
        Ok(())
    }

    /// Reinterpret the atom's current bytes as `ty`. The result is a new parentless atom at
    /// the same offset.
    pub fn cast(&mut self, id: AtomId, ty: Type) -> Result<AtomId> {
        let bytes = self.serialize(id);
        let offset = self.byte_offset(id);
        let name = self.n(id).name.clone();
        let cast = self.spawn(None, name, Layout::Byte(ty), offset);
        let mut view = Detached::new(&bytes, offset);
        if let Err(e) = self.load_node(cast, &mut view) {
            let e = e.within(&self.path(cast));
            self.release(cast);
            return Err(e);
        }
        Ok(cast)
    }

    /// Independent copy of the atom's content. Pointer referents are not copied.
    pub fn copy(&mut self, id: AtomId) -> Result<AtomId> {
        let ty = match &self.n(id).layout {
            Layout::Byte(ty) => ty.clone(),
            Layout::Bit(_) => {
                return Err(Error::value("bit atoms are copied with their host").within(&self.path(id)))
            }
        };
        self.cast(id, ty)
    }
}

fn check_bit_range(value: i128, bits: u32, signed: bool) -> Result<()> {
    let ok = if bits >= 127 {
        signed || value >= 0
    } else if signed {
        let half = 1i128 << (bits.max(1) - 1);
        (-half..half).contains(&value)
    } else {
        value >= 0 && value < (1i128 << bits)
    };
    if ok {
        Ok(())
    } else {
        Err(Error::value(format!("{value} does not fit in {bits} bits")))
    }
}
