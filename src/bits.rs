//! Bit-granular types and the bit stream they load from.
//!
//! A bit tree always lives inside a byte-aligned host ([`Type::bits`](crate::schema::Type::bits)).
//! The host reads whole bytes from its source on demand and hands out bits in one of two
//! orders:
//!
//! - **Big** (MSB-first): the first field takes the most significant bits of the first byte.
//! - **Little** (LSB-first): the first field takes the least significant bits of the first
//!   byte, and later bits of a field are more significant than earlier ones.
//!
//! Bits left over in the host's last byte are kept so the host serializes back unchanged.

use crate::atom::Atom;
use crate::bitmap::Bitmap;
use crate::codec::Endianness;
use crate::error::{Error, Result};
use crate::schema::Terminator;
use crate::scope::Scope;
use crate::source::{Source, SourceError};
use num_traits::ToPrimitive;
use std::collections::HashSet;
use std::sync::Arc;

pub type BitDescriptor = Arc<dyn Fn(&Scope<'_>) -> Result<BitType> + Send + Sync>;

#[derive(Clone)]
pub enum BitType {
    Int { bits: u32, signed: bool },
    Record(Arc<BitRecordType>),
    Array(Arc<BitArrayType>),
}

pub struct BitRecordType {
    name: String,
    fields: Vec<BitField>,
}

impl BitRecordType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }
}

pub struct BitField {
    name: String,
    kind: BitFieldKind,
}

impl BitField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &BitFieldKind {
        &self.kind
    }
}

pub enum BitFieldKind {
    Static(BitType),
    Dynamic(BitDescriptor),
}

pub enum BitShape {
    Fixed(u64),
    Terminated(Terminator),
}

pub struct BitArrayType {
    elem: BitType,
    shape: BitShape,
}

impl BitArrayType {
    pub fn elem(&self) -> &BitType {
        &self.elem
    }

    pub fn shape(&self) -> &BitShape {
        &self.shape
    }
}

pub struct BitRecordBuilder {
    name: String,
    fields: Vec<BitField>,
}

impl BitRecordBuilder {
    pub fn field(mut self, name: &str, ty: BitType) -> Self {
        self.fields.push(BitField {
            name: name.to_string(),
            kind: BitFieldKind::Static(ty),
        });
        self
    }

    /// Unsigned integer field of `bits` bits.
    pub fn uint(self, name: &str, bits: u32) -> Self {
        self.field(name, BitType::uint(bits))
    }

    pub fn sint(self, name: &str, bits: u32) -> Self {
        self.field(name, BitType::sint(bits))
    }

    pub fn dynamic<F>(mut self, name: &str, descriptor: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<BitType> + Send + Sync + 'static,
    {
        self.fields.push(BitField {
            name: name.to_string(),
            kind: BitFieldKind::Dynamic(Arc::new(descriptor)),
        });
        self
    }

    pub fn build(self) -> Result<BitType> {
        let mut seen = HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::schema(format!(
                    "bit record {}: duplicate field name {:?}",
                    self.name, f.name
                )));
            }
        }
        Ok(BitType::Record(Arc::new(BitRecordType {
            name: self.name,
            fields: self.fields,
        })))
    }
}

impl BitType {
    pub fn uint(bits: u32) -> BitType {
        BitType::Int {
            bits,
            signed: false,
        }
    }

    pub fn sint(bits: u32) -> BitType {
        BitType::Int { bits, signed: true }
    }

    pub fn record(name: &str) -> BitRecordBuilder {
        BitRecordBuilder {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn array(elem: BitType, count: u64) -> BitType {
        BitType::Array(Arc::new(BitArrayType {
            elem,
            shape: BitShape::Fixed(count),
        }))
    }

    pub fn terminated<F>(elem: BitType, terminator: F) -> BitType
    where
        F: Fn(&Atom<'_>) -> bool + Send + Sync + 'static,
    {
        BitType::Array(Arc::new(BitArrayType {
            elem,
            shape: BitShape::Terminated(Arc::new(terminator)),
        }))
    }

    /// Width in bits known without reading.
    pub fn static_bits(&self) -> Option<u64> {
        match self {
            BitType::Int { bits, .. } => Some(*bits as u64),
            BitType::Record(r) => r
                .fields
                .iter()
                .try_fold(0u64, |total, f| match &f.kind {
                    BitFieldKind::Static(t) => total.checked_add(t.static_bits()?),
                    BitFieldKind::Dynamic(_) => None,
                }),
            BitType::Array(a) => match a.shape {
                BitShape::Fixed(n) => a.elem.static_bits().and_then(|b| b.checked_mul(n)),
                BitShape::Terminated(_) => None,
            },
        }
    }

    pub fn name(&self) -> String {
        match self {
            BitType::Int { bits, signed } => {
                format!("{}{bits}", if *signed { 's' } else { 'u' })
            }
            BitType::Record(r) => r.name.clone(),
            BitType::Array(a) => match &a.shape {
                BitShape::Fixed(n) => format!("{}[{n}]", a.elem.name()),
                BitShape::Terminated(_) => format!("{}[..]", a.elem.name()),
            },
        }
    }
}

impl std::fmt::Debug for BitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

fn low_bits(value: u8, n: u32) -> u8 {
    if n >= 8 {
        value
    } else {
        value & ((1u8 << n) - 1)
    }
}

/// Pulls bits from a byte source one byte at a time.
pub(crate) struct BitReader<'a> {
    src: &'a mut dyn Source,
    order: Endianness,
    current: u8,
    /// Unread bits left in `current`.
    remaining: u32,
    /// Byte offset of the next byte to fetch.
    next: u64,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(src: &'a mut dyn Source, order: Endianness, offset: u64) -> Self {
        BitReader {
            src,
            order,
            current: 0,
            remaining: 0,
            next: offset,
        }
    }

    pub(crate) fn bounded(&self) -> bool {
        self.src.size().is_some()
    }

    pub(crate) fn read(&mut self, n: u32) -> Result<Bitmap> {
        let mut out = Bitmap::zero();
        let mut left = n;
        while left > 0 {
            if self.remaining == 0 {
                let byte = self.src.consume(1).map_err(|e| match e {
                    SourceError::Consume { .. } => Error::Consume {
                        path: String::new(),
                        offset: self.next,
                        desired: 1,
                        got: 0,
                    },
                    other => Error::from(other),
                })?;
                self.current = byte[0];
                self.remaining = 8;
                self.next += 1;
            }
            let take = left.min(self.remaining);
            let chunk = match self.order {
                Endianness::Big => low_bits(self.current >> (self.remaining - take), take),
                Endianness::Little => low_bits(self.current >> (8 - self.remaining), take),
            };
            let piece = Bitmap::new(chunk as u128, take);
            out = match self.order {
                Endianness::Big => out.push(&piece),
                Endianness::Little => out.append(&piece),
            };
            self.remaining -= take;
            left -= take;
        }
        Ok(out)
    }

    /// The unread bits of the last fetched byte.
    pub(crate) fn pad(&self) -> Bitmap {
        let bits = match self.order {
            Endianness::Big => low_bits(self.current, self.remaining),
            Endianness::Little => {
                if self.remaining == 0 {
                    0
                } else {
                    self.current >> (8 - self.remaining)
                }
            }
        };
        Bitmap::new(bits as u128, self.remaining)
    }
}

/// Packs bitmaps into bytes in the host's bit order.
pub(crate) struct BitWriter {
    order: Endianness,
    out: Vec<u8>,
    current: u8,
    filled: u32,
}

impl BitWriter {
    pub(crate) fn new(order: Endianness) -> Self {
        BitWriter {
            order,
            out: Vec::new(),
            current: 0,
            filled: 0,
        }
    }

    pub(crate) fn write(&mut self, bits: &Bitmap) {
        let width = bits.width();
        let mut left = width;
        while left > 0 {
            let take = left.min(8 - self.filled);
            let shift = match self.order {
                Endianness::Big => left - take,
                Endianness::Little => width - left,
            };
            let chunk = bits.get(shift, take).to_u64().and_then(|v| v.to_u8()).unwrap_or(0);
            match self.order {
                Endianness::Big => self.current |= chunk << (8 - self.filled - take),
                Endianness::Little => self.current |= chunk << self.filled,
            }
            self.filled += take;
            left -= take;
            if self.filled == 8 {
                self.out.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    /// Flush, filling the last partial byte with `pad` (zeros if it does not fit).
    pub(crate) fn finish(mut self, pad: &Bitmap) -> Vec<u8> {
        if self.filled > 0 {
            if pad.width() == 8 - self.filled {
                self.write(pad);
            } else {
                self.out.push(self.current);
            }
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BytesSource;

    #[test]
    fn msb_first_reads() {
        let mut src = BytesSource::new(vec![0xA3, 0x7F]);
        let mut r = BitReader::new(&mut src, Endianness::Big, 0);
        assert_eq!(r.read(3).expect("bits").to_u64(), Some(5));
        assert_eq!(r.read(5).expect("bits").to_u64(), Some(3));
        assert_eq!(r.read(8).expect("bits").to_u64(), Some(0x7F));
    }

    #[test]
    fn lsb_first_reads() {
        let mut src = BytesSource::new(vec![0xA3]);
        let mut r = BitReader::new(&mut src, Endianness::Little, 0);
        assert_eq!(r.read(3).expect("bits").to_u64(), Some(0b011));
        assert_eq!(r.read(5).expect("bits").to_u64(), Some(0b10100));
    }

    #[test]
    fn writer_mirrors_reader() {
        for order in [Endianness::Big, Endianness::Little] {
            let mut src = BytesSource::new(vec![0xA3, 0x7F]);
            let mut r = BitReader::new(&mut src, order, 0);
            let a = r.read(3).expect("bits");
            let b = r.read(9).expect("bits");
            let pad = r.pad();
            let mut w = BitWriter::new(order);
            w.write(&a);
            w.write(&b);
            assert_eq!(w.finish(&pad), vec![0xA3, 0x7F]);
        }
    }
}
