//! Fixed-width bit values.
//!
//! A [`Bitmap`] is an unsigned magnitude plus a width in bits. Signed bitmaps store the
//! two's complement of their value within that width; the sign only changes how
//! [`Bitmap::to_i128`], arithmetic and display interpret the bits. Every operation returns
//! a new bitmap.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Bitmap {
    value: BigUint,
    bits: u32,
    signed: bool,
}

fn mask(bits: u32) -> BigUint {
    (BigUint::one() << bits as usize) - BigUint::one()
}

/// Reduce `value` modulo 2^bits into the non-negative range.
fn wrap(value: BigInt, bits: u32) -> BigUint {
    let modulus = BigInt::one() << bits as usize;
    let reduced = ((value % &modulus) + &modulus) % &modulus;
    reduced.to_biguint().unwrap_or_default()
}

impl Bitmap {
    pub fn zero() -> Self {
        Bitmap::default()
    }

    /// Unsigned bitmap of `bits` width. Bits above the width are discarded.
    pub fn new(value: u128, bits: u32) -> Self {
        Bitmap::from_biguint(BigUint::from(value), bits, false)
    }

    /// Signed bitmap holding the two's complement of `value` in `bits` bits.
    pub fn signed(value: i128, bits: u32) -> Self {
        Bitmap {
            value: wrap(BigInt::from(value), bits),
            bits,
            signed: true,
        }
    }

    /// Width taken from the sign of `length`: negative lengths build signed bitmaps.
    pub fn with_length(value: i128, length: i32) -> Self {
        let bits = length.unsigned_abs();
        if length < 0 {
            Bitmap::signed(value, bits)
        } else {
            Bitmap {
                value: wrap(BigInt::from(value), bits),
                bits,
                signed: false,
            }
        }
    }

    pub fn from_biguint(value: BigUint, bits: u32, signed: bool) -> Self {
        Bitmap {
            value: value & mask(bits),
            bits,
            signed,
        }
    }

    pub fn width(&self) -> u32 {
        self.bits
    }

    /// Width with the sign convention: negative for signed bitmaps.
    pub fn length(&self) -> i64 {
        if self.signed {
            -(self.bits as i64)
        } else {
            self.bits as i64
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Same bits, reinterpreted with the given signedness.
    pub fn with_sign(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    /// The raw bits as an unsigned magnitude.
    pub fn raw(&self) -> &BigUint {
        &self.value
    }

    pub fn to_biguint(&self) -> BigUint {
        self.value.clone()
    }

    /// Value honoring the sign: the two's complement reading for signed bitmaps.
    pub fn to_bigint(&self) -> BigInt {
        if self.signed && self.bits > 0 && self.bit(self.bits - 1) {
            BigInt::from_biguint(Sign::Plus, self.value.clone()) - (BigInt::one() << self.bits as usize)
        } else {
            BigInt::from_biguint(Sign::Plus, self.value.clone())
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.value.to_u128()
    }

    pub fn to_i128(&self) -> Option<i128> {
        self.to_bigint().to_i128()
    }

    pub fn bit(&self, index: u32) -> bool {
        index < self.bits && !((&self.value >> index as usize) & BigUint::one()).is_zero()
    }

    /// `self` followed by `other`: `other` lands in the low bits.
    pub fn push(&self, other: &Bitmap) -> Bitmap {
        Bitmap {
            value: (&self.value << other.bits as usize) | &other.value,
            bits: self.bits + other.bits,
            signed: self.signed,
        }
    }

    /// `other` placed above `self`: `self` keeps the low bits.
    pub fn append(&self, other: &Bitmap) -> Bitmap {
        Bitmap {
            value: (&other.value << self.bits as usize) | &self.value,
            bits: self.bits + other.bits,
            signed: self.signed,
        }
    }

    /// Split off the `n` most significant bits. Returns `(remainder, taken)`.
    pub fn shift(&self, n: u32) -> (Bitmap, Bitmap) {
        let n = n.min(self.bits);
        let rest = self.bits - n;
        let taken = Bitmap {
            value: &self.value >> rest as usize,
            bits: n,
            signed: self.signed,
        };
        let remainder = Bitmap {
            value: &self.value & mask(rest),
            bits: rest,
            signed: self.signed,
        };
        (remainder, taken)
    }

    /// Split off the `n` least significant bits. Returns `(remainder, taken)`.
    pub fn consume(&self, n: u32) -> (Bitmap, Bitmap) {
        let n = n.min(self.bits);
        let taken = Bitmap {
            value: &self.value & mask(n),
            bits: n,
            signed: self.signed,
        };
        let remainder = Bitmap {
            value: &self.value >> n as usize,
            bits: self.bits - n,
            signed: self.signed,
        };
        (remainder, taken)
    }

    pub fn rotate_left(&self, n: u32) -> Bitmap {
        if self.bits == 0 {
            return self.clone();
        }
        let n = n % self.bits;
        let value = ((&self.value << n as usize) | (&self.value >> (self.bits - n) as usize))
            & mask(self.bits);
        Bitmap {
            value,
            bits: self.bits,
            signed: self.signed,
        }
    }

    pub fn rotate_right(&self, n: u32) -> Bitmap {
        if self.bits == 0 {
            return self.clone();
        }
        self.rotate_left(self.bits - n % self.bits)
    }

    /// Number of bits equal to `value`.
    pub fn count(&self, value: bool) -> u32 {
        let ones = self.value.count_ones() as u32;
        if value {
            ones
        } else {
            self.bits - ones
        }
    }

    /// Index of the first bit equal to `value`, scanning upward from `from`.
    pub fn scan(&self, value: bool, from: u32) -> Option<u32> {
        (from..self.bits).find(|&i| self.bit(i) == value)
    }

    /// Index of the first bit equal to `value`, scanning downward from `from`.
    pub fn scan_reverse(&self, value: bool, from: u32) -> Option<u32> {
        if self.bits == 0 {
            return None;
        }
        (0..=from.min(self.bits - 1))
            .rev()
            .find(|&i| self.bit(i) == value)
    }

    /// The run of equal bits starting at `from`, as `(bit, length)`.
    pub fn run(&self, from: u32) -> Option<(bool, u32)> {
        if from >= self.bits {
            return None;
        }
        let current = self.bit(from);
        let end = self.scan(!current, from).unwrap_or(self.bits);
        Some((current, end - from))
    }

    /// Runs of equal bits from least to most significant, each as its own bitmap.
    pub fn runs(&self) -> Vec<Bitmap> {
        let mut out = Vec::new();
        let mut start = 0;
        while let Some((_, len)) = self.run(start) {
            out.push(self.get(start, len));
            start += len;
        }
        out
    }

    /// `count` bits starting at bit `index` (counted from the least significant bit).
    pub fn get(&self, index: u32, count: u32) -> Bitmap {
        Bitmap {
            value: (&self.value >> index as usize) & mask(count),
            bits: count,
            signed: false,
        }
    }

    /// Replace `count` bits starting at `index` with the low bits of `value`.
    pub fn set(&self, index: u32, value: u128, count: u32) -> Bitmap {
        let field = mask(count) << index as usize;
        let cleared = &self.value & (mask(self.bits) ^ &field);
        let inserted = (BigUint::from(value) & mask(count)) << index as usize;
        Bitmap::from_biguint(cleared | inserted, self.bits, self.signed)
    }

    /// Widen by `n` zero bits at the top.
    pub fn grow(&self, n: u32) -> Bitmap {
        Bitmap {
            value: self.value.clone(),
            bits: self.bits + n,
            signed: self.signed,
        }
    }

    /// Drop the `n` most significant bits.
    pub fn shrink(&self, n: u32) -> Bitmap {
        let bits = self.bits.saturating_sub(n);
        Bitmap::from_biguint(self.value.clone(), bits, self.signed)
    }

    /// Bit order reversed within the width.
    pub fn reverse(&self) -> Bitmap {
        let mut value = BigUint::zero();
        for i in 0..self.bits {
            if self.bit(i) {
                value |= BigUint::one() << (self.bits - 1 - i) as usize;
            }
        }
        Bitmap {
            value,
            bits: self.bits,
            signed: self.signed,
        }
    }

    /// Cut into chunks of at most `size` bits, most significant chunk first.
    pub fn split(&self, size: u32) -> Vec<Bitmap> {
        let mut out = Vec::new();
        if size == 0 {
            return out;
        }
        let mut rest = self.clone();
        while rest.bits > 0 {
            let (remainder, taken) = rest.shift(size.min(rest.bits));
            out.push(taken);
            rest = remainder;
        }
        out
    }

    fn wrapped(&self, value: BigInt) -> Bitmap {
        Bitmap {
            value: wrap(value, self.bits),
            bits: self.bits,
            signed: self.signed,
        }
    }

    pub fn wrapping_add(&self, rhs: i128) -> Bitmap {
        self.wrapped(self.to_bigint() + rhs)
    }

    pub fn wrapping_sub(&self, rhs: i128) -> Bitmap {
        self.wrapped(self.to_bigint() - rhs)
    }

    pub fn wrapping_mul(&self, rhs: i128) -> Bitmap {
        self.wrapped(self.to_bigint() * rhs)
    }

    /// Truncating division; `None` on division by zero.
    pub fn checked_div(&self, rhs: i128) -> Option<Bitmap> {
        (rhs != 0).then(|| self.wrapped(self.to_bigint() / rhs))
    }

    pub fn checked_rem(&self, rhs: i128) -> Option<Bitmap> {
        (rhs != 0).then(|| self.wrapped(self.to_bigint() % rhs))
    }

    /// Binary digits, zero-padded to the width.
    pub fn binary(&self) -> String {
        let digits = self.value.to_str_radix(2);
        format!("{:0>width$}", digits, width = self.bits as usize)
    }

    /// Hex digits, zero-padded to the width.
    pub fn hex(&self) -> String {
        let digits = self.value.to_str_radix(16);
        format!("{:0>width$}", digits, width = self.bits.div_ceil(4) as usize)
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.to_bigint(), self.length())
    }
}
