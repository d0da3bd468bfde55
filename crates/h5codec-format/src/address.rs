//! File-relative addresses.

use core::fmt;

use crate::error::{FormatError, Result};

/// A byte position inside an HDF5 file, as stored on disk.
///
/// Addresses are plain integers that survive serialization; they are only
/// turned into slice positions through [`crate::context::FileContext::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u64);

impl Address {
    /// The all-ones "no address" sentinel.
    pub const UNDEFINED: Address = Address(u64::MAX);

    pub fn new(value: u64) -> Self {
        Address(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_undefined(self) -> bool {
        self.0 == u64::MAX
    }

    /// Address `delta` bytes past this one. The sentinel stays undefined.
    pub fn offset_by(self, delta: u64) -> Address {
        if self.is_undefined() {
            self
        } else {
            Address(self.0.wrapping_add(delta))
        }
    }

    /// Return the address, or an error naming `context` if it is the sentinel.
    pub fn require(self, context: &'static str) -> Result<Address> {
        if self.is_undefined() {
            Err(FormatError::UndefinedAddress { context })
        } else {
            Ok(self)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "UNDEF")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}
