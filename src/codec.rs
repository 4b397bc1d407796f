//! Scalar wire codecs: integers of 1..=16 bytes in either byte order, IEEE floats
//! (half, single, double), LEB128 varints and the text encodings used by string atoms.
//!
//! These are plain functions over byte slices; atoms call them on their raw bytes.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

impl Endianness {
    pub fn suffix(self) -> &'static str {
        match self {
            Endianness::Big => "be",
            Endianness::Little => "le",
        }
    }
}

pub fn read_uint(bytes: &[u8], order: Endianness) -> u128 {
    if bytes.is_empty() {
        return 0;
    }
    match order {
        Endianness::Big => BigEndian::read_uint128(bytes, bytes.len()),
        Endianness::Little => LittleEndian::read_uint128(bytes, bytes.len()),
    }
}

pub fn read_int(bytes: &[u8], order: Endianness) -> i128 {
    sign_extend(read_uint(bytes, order), bytes.len() as u32 * 8)
}

/// Interpret the low `bits` bits of `value` as two's complement.
pub fn sign_extend(value: u128, bits: u32) -> i128 {
    if bits == 0 || bits >= 128 {
        return value as i128;
    }
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}

fn fits_unsigned(value: u128, width: usize) -> bool {
    width >= 16 || value >> (width * 8) == 0
}

fn fits_signed(value: i128, width: usize) -> bool {
    if width >= 16 {
        return true;
    }
    let bits = width as u32 * 8;
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

/// Encode an integer into `width` bytes. `value` is range-checked against the width and
/// signedness; negative values are only accepted when `signed`.
pub fn write_int(value: i128, width: usize, signed: bool, order: Endianness) -> Result<Vec<u8>> {
    let raw = if signed {
        if !fits_signed(value, width) {
            return Err(Error::value(format!(
                "{value} does not fit a signed {width}-byte integer"
            )));
        }
        value as u128
    } else {
        if value < 0 || !fits_unsigned(value as u128, width) {
            return Err(Error::value(format!(
                "{value} does not fit an unsigned {width}-byte integer"
            )));
        }
        value as u128
    };
    Ok(encode_uint(raw, width, order))
}

pub fn write_uint(value: u128, width: usize, order: Endianness) -> Result<Vec<u8>> {
    if !fits_unsigned(value, width) {
        return Err(Error::value(format!(
            "{value} does not fit an unsigned {width}-byte integer"
        )));
    }
    Ok(encode_uint(value, width, order))
}

/// Low `width` bytes of `value`, no range check.
pub fn encode_uint(value: u128, width: usize, order: Endianness) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    if width == 0 {
        return buf;
    }
    let masked = if width >= 16 {
        value
    } else {
        value & ((1u128 << (width * 8)) - 1)
    };
    match order {
        Endianness::Big => BigEndian::write_uint128(&mut buf, masked, width),
        Endianness::Little => LittleEndian::write_uint128(&mut buf, masked, width),
    }
    buf
}

pub fn read_f32(bytes: &[u8], order: Endianness) -> f32 {
    match order {
        Endianness::Big => BigEndian::read_f32(bytes),
        Endianness::Little => LittleEndian::read_f32(bytes),
    }
}

pub fn read_f64(bytes: &[u8], order: Endianness) -> f64 {
    match order {
        Endianness::Big => BigEndian::read_f64(bytes),
        Endianness::Little => LittleEndian::read_f64(bytes),
    }
}

pub fn write_f32(value: f32, order: Endianness) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    match order {
        Endianness::Big => BigEndian::write_f32(&mut buf, value),
        Endianness::Little => LittleEndian::write_f32(&mut buf, value),
    }
    buf
}

pub fn write_f64(value: f64, order: Endianness) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    match order {
        Endianness::Big => BigEndian::write_f64(&mut buf, value),
        Endianness::Little => LittleEndian::write_f64(&mut buf, value),
    }
    buf
}

/// IEEE 754 binary16 to f64.
pub fn half_to_f64(half: u16) -> f64 {
    let sign = if half & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = ((half >> 10) & 0x1f) as i32;
    let frac = (half & 0x3ff) as f64;
    match exp {
        0 => sign * frac * 2f64.powi(-24),
        0x1f if frac == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1.0 + frac / 1024.0) * 2f64.powi(exp - 15),
    }
}

/// f64 to IEEE 754 binary16, rounding to nearest even. Out-of-range values become infinity.
pub fn f64_to_half(value: f64) -> u16 {
    let bits = (value as f32).to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    let (base, rem) = if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = (mant | 0x80_0000) >> (1 - e);
        (m >> 13, m & 0x1fff)
    } else {
        (((e as u32) << 10) | (mant >> 13), mant & 0x1fff)
    };
    let rounded = if rem > 0x1000 || (rem == 0x1000 && base & 1 == 1) {
        base + 1
    } else {
        base
    };
    sign | rounded as u16
}

/// Decode an unsigned LEB128 value.
pub fn read_uleb128(bytes: &[u8]) -> Result<u128> {
    let mut result = 0u128;
    for (i, byte) in bytes.iter().enumerate() {
        let shift = i as u32 * 7;
        let chunk = (byte & 0x7f) as u128;
        if shift >= 128 || (shift > 121 && chunk >> (128 - shift) != 0) {
            return Err(Error::decode("LEB128 value exceeds 128 bits"));
        }
        result |= chunk << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(Error::decode("LEB128 value has no final byte"))
}

/// Decode a signed LEB128 value.
pub fn read_sleb128(bytes: &[u8]) -> Result<i128> {
    let mut result = 0i128;
    let mut shift = 0u32;
    for byte in bytes {
        if shift >= 128 {
            return Err(Error::decode("LEB128 value exceeds 128 bits"));
        }
        result |= ((byte & 0x7f) as i128) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 128 && byte & 0x40 != 0 {
                result |= -1i128 << shift;
            }
            return Ok(result);
        }
    }
    Err(Error::decode("LEB128 value has no final byte"))
}

pub fn write_uleb128(mut value: u128) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn write_sleb128(mut value: i128) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Character encodings of string atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Encoding {
    /// Bytes per code unit.
    pub fn unit(self) -> usize {
        match self {
            Encoding::Ascii | Encoding::Utf8 => 1,
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(i) => Err(Error::decode(format!(
                    "byte {:#04x} at index {i} is not ASCII",
                    bytes[i]
                ))),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| Error::decode(e.to_string())),
            Encoding::Utf16Le | Encoding::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(Error::decode("odd number of bytes in UTF-16 text"));
                }
                let units = bytes.chunks_exact(2).map(|c| match self {
                    Encoding::Utf16Be => BigEndian::read_u16(c),
                    _ => LittleEndian::read_u16(c),
                });
                char::decode_utf16(units)
                    .collect::<std::result::Result<String, _>>()
                    .map_err(|e| Error::decode(e.to_string()))
            }
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(Error::value(format!("{c:?} is not ASCII")));
                }
                Ok(text.as_bytes().to_vec())
            }
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Utf16Le | Encoding::Utf16Be => {
                let mut out = Vec::with_capacity(text.len() * 2);
                for unit in text.encode_utf16() {
                    let mut buf = [0u8; 2];
                    match self {
                        Encoding::Utf16Be => BigEndian::write_u16(&mut buf, unit),
                        _ => LittleEndian::write_u16(&mut buf, unit),
                    }
                    out.extend_from_slice(&buf);
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_width_integers() {
        assert_eq!(read_uint(&[0x01, 0x02, 0x03], Endianness::Big), 0x010203);
        assert_eq!(read_uint(&[0x01, 0x02, 0x03], Endianness::Little), 0x030201);
        assert_eq!(read_int(&[0xff, 0xff, 0xff], Endianness::Big), -1);
        assert_eq!(encode_uint(0x010203, 3, Endianness::Little), vec![3, 2, 1]);
    }

    #[test]
    fn range_checks() {
        assert!(write_int(256, 1, false, Endianness::Little).is_err());
        assert!(write_int(-129, 1, true, Endianness::Little).is_err());
        assert_eq!(
            write_int(-2, 2, true, Endianness::Big).expect("fits"),
            vec![0xff, 0xfe]
        );
    }

    #[test]
    fn half_precision() {
        assert_eq!(f64_to_half(1.0), 0x3c00);
        assert_eq!(f64_to_half(-2.0), 0xc000);
        assert_eq!(f64_to_half(65504.0), 0x7bff);
        assert_eq!(half_to_f64(0x3800), 0.5);
        assert!(half_to_f64(0x7c00).is_infinite());
    }

    #[test]
    fn leb128() {
        assert_eq!(write_uleb128(624485), vec![0xe5, 0x8e, 0x26]);
        assert_eq!(read_uleb128(&[0xe5, 0x8e, 0x26]).expect("valid"), 624485);
        assert_eq!(write_sleb128(-123456), vec![0xc0, 0xbb, 0x78]);
        assert_eq!(read_sleb128(&[0xc0, 0xbb, 0x78]).expect("valid"), -123456);
        assert!(read_uleb128(&[0x80]).is_err());
    }

    #[test]
    fn text_encodings() {
        assert!(Encoding::Ascii.decode(&[0x41, 0xc3]).is_err());
        assert_eq!(
            Encoding::Utf16Le.decode(&[0x48, 0, 0x69, 0]).expect("valid"),
            "Hi"
        );
        assert_eq!(Encoding::Utf16Be.encode("A").expect("valid"), vec![0, 0x41]);
    }
}
