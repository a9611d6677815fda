//! Slot encoding - one registered reference per machine word
//!
//! Layout on 64-bit targets: the low 48 bits carry the object address and the
//! high 16 bits carry the number of *extra* pending releases, so consecutive
//! registrations of one object can share a slot. Other targets store the plain
//! address and never coalesce.
//!
//! The zero word is the scope boundary marker; no object lives at address 0.

use core::ptr::NonNull;

/// Type-erased release entry point stored next to every entry word
pub type ReleaseFn = unsafe fn(NonNull<()>);

/// Whether this target has spare address bits for a repeat count
pub const SUPPORTS_COALESCING: bool = cfg!(target_pointer_width = "64");

/// Packed `{address, count}` word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntryWord(usize);

#[cfg(target_pointer_width = "64")]
const ADDRESS_BITS: u32 = 48;
#[cfg(target_pointer_width = "64")]
const ADDRESS_MASK: usize = (1 << ADDRESS_BITS) - 1;

impl EntryWord {
    /// Scope boundary marker
    pub const BOUNDARY: Self = Self(0);

    /// Pattern left behind in a vacated slot (0xA3A3...)
    pub const SCRIBBLE: Self = Self(usize::from_ne_bytes([0xA3; core::mem::size_of::<usize>()]));

    /// Largest repeat count a single entry can hold
    pub const MAX_COUNT: u16 = u16::MAX;

    /// Fresh entry for `address` (count 0: one pending release)
    #[inline]
    pub fn encode(address: usize) -> Self {
        debug_assert!(address != 0, "null reference");
        #[cfg(target_pointer_width = "64")]
        debug_assert!(
            address & !ADDRESS_MASK == 0,
            "address {address:#x} does not fit in 48 bits"
        );
        Self(address)
    }

    /// `(address, release_times)` where `release_times = count + 1`
    #[inline]
    pub fn decode(self) -> (usize, u32) {
        (self.address(), self.count() as u32 + 1)
    }

    #[inline]
    pub fn is_boundary(self) -> bool {
        self == Self::BOUNDARY
    }

    #[inline]
    pub fn bits(self) -> usize {
        self.0
    }
}

#[cfg(target_pointer_width = "64")]
impl EntryWord {
    /// Record one more pending release, `None` once the count is saturated
    #[inline]
    pub fn bump(self) -> Option<Self> {
        let count = self.count();
        if count == Self::MAX_COUNT {
            return None;
        }
        Some(Self(self.address() | ((count as usize + 1) << ADDRESS_BITS)))
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0 & ADDRESS_MASK
    }

    /// Extra releases recorded beyond the first
    #[inline]
    pub fn count(self) -> u16 {
        (self.0 >> ADDRESS_BITS) as u16
    }
}

#[cfg(not(target_pointer_width = "64"))]
impl EntryWord {
    #[inline]
    pub fn bump(self) -> Option<Self> {
        None
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }

    #[inline]
    pub fn count(self) -> u16 {
        0
    }
}

impl core::fmt::Debug for EntryWord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_boundary() {
            f.write_str("EntryWord(BOUNDARY)")
        } else {
            f.debug_struct("EntryWord")
                .field("address", &format_args!("{:#x}", self.address()))
                .field("count", &self.count())
                .finish()
        }
    }
}

/// One stack slot: entry word plus the release function of its object
///
/// A boundary has no release function. Zeroed memory is a valid boundary,
/// which lets pages be allocated with `alloc_zeroed`.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Slot {
    word: EntryWord,
    release: Option<ReleaseFn>,
}

impl Slot {
    pub const BOUNDARY: Self = Self {
        word: EntryWord::BOUNDARY,
        release: None,
    };

    pub const SCRIBBLE: Self = Self {
        word: EntryWord::SCRIBBLE,
        release: None,
    };

    #[inline]
    pub fn entry(address: usize, release: ReleaseFn) -> Self {
        Self {
            word: EntryWord::encode(address),
            release: Some(release),
        }
    }

    #[inline]
    pub fn word(&self) -> EntryWord {
        self.word
    }

    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.word.is_boundary()
    }

    /// Same object, same release function
    #[inline]
    pub fn same_object(&self, other: &Slot) -> bool {
        !self.is_boundary()
            && self.word.address() == other.word.address()
            && match (self.release, other.release) {
                (Some(a), Some(b)) => a as usize == b as usize,
                _ => false,
            }
    }

    /// Whether one more registration still fits in this entry
    #[inline]
    pub fn can_bump(&self) -> bool {
        !self.is_boundary() && self.word.bump().is_some()
    }

    /// Bump the repeat count in place; `false` when saturated
    #[inline]
    pub fn try_bump(&mut self) -> bool {
        match self.word.bump() {
            Some(word) => {
                self.word = word;
                true
            }
            None => false,
        }
    }

    /// Work owed for this slot once popped, `None` for boundaries and scrub
    #[inline]
    pub fn pending(&self) -> Option<PendingRelease> {
        let release = self.release?;
        let (address, times) = self.word.decode();
        NonNull::new(address as *mut ()).map(|object| PendingRelease {
            object,
            release,
            times,
        })
    }
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.word.fmt(f)
    }
}

/// A popped entry whose object still has to be released
#[derive(Debug, Clone, Copy)]
pub struct PendingRelease {
    object: NonNull<()>,
    release: ReleaseFn,
    times: u32,
}

impl PendingRelease {
    #[inline]
    pub fn object(&self) -> NonNull<()> {
        self.object
    }

    #[inline]
    pub fn times(&self) -> u32 {
        self.times
    }

    /// Invoke the object's release `times` times
    ///
    /// Must be called with no borrow of the pool state held: a release may
    /// autorelease more objects.
    pub fn run(self) {
        for _ in 0..self.times {
            // SAFETY: the registrant guaranteed the object outlives its scope.
            unsafe { (self.release)(self.object) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn noop(_: NonNull<()>) {}
    unsafe fn other(p: NonNull<()>) {
        core::hint::black_box(p);
    }

    #[test]
    fn encode_starts_with_one_release() {
        let word = EntryWord::encode(0x1000);
        assert_eq!(word.decode(), (0x1000, 1));
        assert!(!word.is_boundary());
    }

    #[test]
    fn boundary_is_zero() {
        assert!(EntryWord::BOUNDARY.is_boundary());
        assert_eq!(EntryWord::BOUNDARY.bits(), 0);
        assert!(!EntryWord::SCRIBBLE.is_boundary());
        assert!(Slot::BOUNDARY.pending().is_none());
        assert!(Slot::SCRIBBLE.pending().is_none());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn bump_saturates_at_max_count() {
        let mut word = EntryWord::encode(0x7fff_0000_1000);
        for _ in 0..EntryWord::MAX_COUNT {
            word = word.bump().expect("below cap");
        }
        assert_eq!(word.count(), EntryWord::MAX_COUNT);
        assert_eq!(word.decode(), (0x7fff_0000_1000, 65536));
        assert!(word.bump().is_none());
    }

    #[cfg(not(target_pointer_width = "64"))]
    #[test]
    fn bump_unavailable_without_spare_bits() {
        assert!(EntryWord::encode(0x1000).bump().is_none());
    }

    #[test]
    fn same_object_needs_matching_release_fn() {
        let a = Slot::entry(0x2000, noop);
        let b = Slot::entry(0x2000, noop);
        let c = Slot::entry(0x2000, other);
        let d = Slot::entry(0x3000, noop);
        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
        assert!(!a.same_object(&d));
        assert!(!Slot::BOUNDARY.same_object(&Slot::BOUNDARY));
    }
}
