//! Raw addresses and word alignment.
//!
//! The collector never interprets object contents, so everything it hands out
//! or reads back is a plain machine address. [`Address`] keeps that address as
//! an integer; turning it into a pointer and dereferencing it is left to the
//! code that owns the memory.

use std::fmt;

/// Size in bytes of a platform word. Every block size is a multiple of this.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Rounds `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` if the rounded value would overflow `usize`.
#[inline]
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Rounds `bytes` up to the platform word size.
#[inline]
pub fn align_to_word(bytes: usize) -> Option<usize> {
    align_up(bytes, WORD_SIZE)
}

/// A machine address.
///
/// The null address (`0`) doubles as the "no object" value inside reference
/// fields.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Wraps a raw address value.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Address(raw)
    }

    /// Takes the address of a pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the address as a typed raw pointer.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns true for the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` past this one.
    #[inline]
    pub const fn add(self, bytes: usize) -> Self {
        Address(self.0 + bytes)
    }

    /// Returns the address `bytes` before this one.
    #[inline]
    pub const fn sub(self, bytes: usize) -> Self {
        Address(self.0 - bytes)
    }

    /// Number of bytes from `base` up to this address.
    ///
    /// Panics in debug builds if `base` is above `self`.
    #[inline]
    pub fn offset_from(self, base: Address) -> usize {
        debug_assert!(base.0 <= self.0);
        self.0 - base.0
    }

    /// Returns true if the address is a multiple of [`WORD_SIZE`].
    #[inline]
    pub const fn is_word_aligned(self) -> bool {
        self.0 % WORD_SIZE == 0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(raw: usize) -> Self {
        Address(raw)
    }
}

impl From<Address> for usize {
    fn from(addr: Address) -> Self {
        addr.0
    }
}
