//! Opaque handles returned by the scope protocol

use core::fmt;

/// Identifies one open scope; returned by `push`, consumed by `pop`
///
/// Either the address of the scope's boundary slot or [`Token::PLACEHOLDER`]
/// when the scope has not been given any storage yet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(usize);

impl Token {
    /// Scope pushed on a thread with no pages; slot addresses are always
    /// slot-aligned so `1` never names a real slot.
    pub const PLACEHOLDER: Token = Token(1);

    #[inline]
    pub(crate) const fn from_address(address: usize) -> Self {
        Self(address)
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_placeholder(self) -> bool {
        self == Self::PLACEHOLDER
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            f.write_str("Token(PLACEHOLDER)")
        } else {
            write!(f, "Token({:#x})", self.0)
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Address of the slot a registration landed in
///
/// With coalescing the slot may be shared with earlier registrations of the
/// same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(usize);

impl SlotHandle {
    #[inline]
    pub(crate) const fn from_address(address: usize) -> Self {
        Self(address)
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }
}

impl From<SlotHandle> for Token {
    fn from(slot: SlotHandle) -> Self {
        Token(slot.0)
    }
}
