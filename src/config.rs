//! Tree-wide defaults.

use crate::bits::BitType;
use crate::codec::Endianness;
use crate::error::Result;
use crate::schema::{IntType, Type};

/// Defaults a [`Tree`](crate::tree::Tree) applies when a type leaves them open, plus the
/// limits it enforces while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Byte order for integers built through [`Config::uint`] / [`Config::sint`].
    pub byteorder: Endianness,
    /// Bit order for hosts built through [`Config::bits`].
    pub bit_order: Endianness,
    /// Width in bytes of pointers built through [`Config::pointer`].
    pub pointer_width: usize,
    /// Upper bound on elements of terminated and infinite arrays.
    pub max_elements: usize,
    /// Fill byte for allocated padding and extent tails.
    pub padding: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            byteorder: Endianness::Little,
            bit_order: Endianness::Big,
            pointer_width: 8,
            max_elements: 1 << 20,
            padding: 0,
        }
    }
}

impl Config {
    pub fn uint(&self, width: usize) -> Result<Type> {
        Ok(Type::Int(IntType::new(width, false, self.byteorder)?))
    }

    pub fn sint(&self, width: usize) -> Result<Type> {
        Ok(Type::Int(IntType::new(width, true, self.byteorder)?))
    }

    /// Absolute pointer of the configured width and byte order.
    pub fn pointer(&self, target: Type) -> Result<Type> {
        let wire = IntType::new(self.pointer_width, false, self.byteorder)?;
        Ok(Type::pointer(wire, target))
    }

    pub fn bits(&self, root: BitType) -> Type {
        Type::bits(root, self.bit_order)
    }
}
