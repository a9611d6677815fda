//! Page integrity tag
//!
//! Four words at the head of every page: a fixed first word followed by the
//! ASCII bytes `AUTORELEASE!`. Cleared before the page memory is returned so
//! a recycled block never looks like a live page.

const M0: u32 = 0xA1A1_A1A1;
const M1: &[u8; 12] = b"AUTORELEASE!";

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Magic {
    m: [u32; 4],
}

impl Magic {
    pub const fn new() -> Self {
        Self {
            m: [
                M0,
                u32::from_ne_bytes([M1[0], M1[1], M1[2], M1[3]]),
                u32::from_ne_bytes([M1[4], M1[5], M1[6], M1[7]]),
                u32::from_ne_bytes([M1[8], M1[9], M1[10], M1[11]]),
            ],
        }
    }

    /// Full check of all four words
    #[inline]
    pub fn check(&self) -> bool {
        *self == Self::new()
    }

    /// First word only, unless built with full checking
    #[inline]
    pub fn fast_check(&self) -> bool {
        if cfg!(any(debug_assertions, feature = "checked")) {
            self.check()
        } else {
            self.m[0] == M0
        }
    }

    /// Zero the tag; volatile so the store survives the following free
    pub fn clear(&mut self) {
        for word in self.m.iter_mut() {
            // SAFETY: `word` is a valid, aligned `&mut u32`.
            unsafe { core::ptr::write_volatile(word, 0) };
        }
    }

    pub fn words(&self) -> [u32; 4] {
        self.m
    }
}

impl Default for Magic {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Magic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:#010x} {:#010x} {:#010x} {:#010x}",
            self.m[0], self.m[1], self.m[2], self.m[3]
        )
    }
}
