//! Pool pages - fixed-size slot stacks
//!
//! Design: a page is one size-aligned block laid out as
//! 1. Header (integrity tag, owner thread, cursor, depth, high-water mark)
//! 2. `CAPACITY` slots filled bottom-up
//!
//! Aligning each block to its own size lets a scope token (a slot address)
//! be mapped back to its page by masking off the low bits.

mod entry;
mod magic;
mod memory;


pub use entry::{EntryWord, PendingRelease, ReleaseFn, Slot, SUPPORTS_COALESCING};
pub use magic::Magic;
pub use memory::{os_page_size, protection_available};

use crate::error::PoolError;
use core::mem::size_of;
use memory::RawBlock;

/// Bytes per page (size and alignment)
#[cfg(not(feature = "protect"))]
pub const PAGE_SIZE: usize = 4096;
/// Bytes per page (size and alignment), large enough for 16K OS pages
#[cfg(feature = "protect")]
pub const PAGE_SIZE: usize = 16384;

/// Slots per page
pub const CAPACITY: usize = (PAGE_SIZE - size_of::<PageHeader>()) / size_of::<Slot>();

/// Slots examined below the top when looking for a coalescing partner
pub const LRU_WINDOW: usize = 4;

/// How `add` merges a registration into existing entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalescing {
    /// Always take a fresh slot
    Off,
    /// Merge only into the top slot
    Top,
    /// Merge into any of the top `LRU_WINDOW` slots, moving the match to the top
    Window,
}

#[repr(C)]
struct PageHeader {
    magic: Magic,
    thread: u64,
    next: usize,
    depth: u32,
    hiwat: u32,
}

#[cfg_attr(not(feature = "protect"), repr(C, align(4096)))]
#[cfg_attr(feature = "protect", repr(C, align(16384)))]
struct PageBlock {
    header: PageHeader,
    slots: [Slot; CAPACITY],
}

const _: () = assert!(size_of::<PageBlock>() == PAGE_SIZE);
const _: () = assert!(core::mem::align_of::<PageBlock>() == PAGE_SIZE);

impl PageBlock {
    #[inline]
    fn slot_address(&self, index: usize) -> usize {
        &self.slots[index] as *const Slot as usize
    }

    fn add(&mut self, slot: Slot, mode: Coalescing) -> usize {
        let next = self.header.next;
        if next > 0 && !slot.is_boundary() {
            let top = next - 1;
            match mode {
                Coalescing::Window => {
                    for offset in 0..LRU_WINDOW {
                        let index = top - offset;
                        if index == 0 || self.slots[index].is_boundary() {
                            break;
                        }
                        if self.slots[index].same_object(&slot) && self.slots[index].can_bump() {
                            if offset > 0 {
                                let found = self.slots[index];
                                self.slots.copy_within(index + 1..=top, index);
                                self.slots[top] = found;
                            }
                            self.slots[top].try_bump();
                            return self.slot_address(top);
                        }
                    }
                }
                Coalescing::Top => {
                    if self.slots[top].same_object(&slot) && self.slots[top].try_bump() {
                        return self.slot_address(top);
                    }
                }
                Coalescing::Off => {}
            }
        }

        self.slots[next] = slot;
        self.header.next = next + 1;
        self.slot_address(next)
    }

    fn pop(&mut self) -> Slot {
        self.header.next -= 1;
        let index = self.header.next;
        let slot = self.slots[index];
        self.slots[index] = Slot::SCRIBBLE;
        slot
    }
}

/// One page of a thread's chain
///
/// Position in the chain (parent, child) is owned by the chain; the page only
/// records its depth.
pub struct Page {
    block: RawBlock<PageBlock>,
    protected: bool,
}

impl Page {
    /// Allocate a page on top of `parent` for the thread `thread`
    pub fn new(parent: Option<&Page>, thread: u64, protect: bool) -> Self {
        // SAFETY: every field of `PageBlock` accepts all-zero bytes: integers,
        // and `Option<fn>` slots read back as boundaries.
        let mut block = unsafe { RawBlock::<PageBlock>::zeroed() };
        {
            let header = &mut block.get_mut().header;
            header.magic = Magic::new();
            header.thread = thread;
            header.depth = parent.map_or(0, |p| p.depth() + 1);
            header.hiwat = parent.map_or(0, |p| p.hiwat());
        }

        let mut page = Self {
            block,
            protected: protect && protection_available(PAGE_SIZE),
        };
        page.protect();
        page
    }

    #[inline]
    fn header(&self) -> &PageHeader {
        &self.block.get().header
    }

    #[inline]
    fn protect(&mut self) {
        if self.protected {
            self.block.set_writable(false);
        }
    }

    #[inline]
    fn unprotect(&mut self) {
        if self.protected {
            self.block.set_writable(true);
        }
    }

    /// Run one mutation with write access
    fn write<R>(&mut self, f: impl FnOnce(&mut PageBlock) -> R) -> R {
        self.unprotect();
        let result = f(self.block.get_mut());
        self.protect();
        result
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.header().depth
    }

    #[inline]
    pub fn hiwat(&self) -> u32 {
        self.header().hiwat
    }

    #[inline]
    pub fn thread(&self) -> u64 {
        self.header().thread
    }

    /// Occupied slots (the write cursor)
    #[inline]
    pub fn len(&self) -> usize {
        self.header().next
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == CAPACITY
    }

    #[inline]
    pub fn less_than_half_full(&self) -> bool {
        self.len() < CAPACITY / 2
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Occupied slots, bottom first
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.block.get().slots[..self.len()]
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Slot {
        self.block.get().slots[index]
    }

    #[inline]
    pub fn slot_address(&self, index: usize) -> usize {
        self.block.get().slot_address(index)
    }

    /// Start of the page block
    #[inline]
    pub fn address(&self) -> usize {
        self.block.bounds().0
    }

    /// Slot index for a slot address inside this page
    pub fn index_of(&self, address: usize) -> Option<usize> {
        if !self.block.contains(address) {
            return None;
        }
        let offset = address.checked_sub(self.slot_address(0))?;
        if offset % size_of::<Slot>() != 0 {
            return None;
        }
        let index = offset / size_of::<Slot>();
        (index < CAPACITY).then_some(index)
    }

    /// Full integrity check: tag and owning thread
    pub fn verify(&self, thread: u64) -> Result<(), PoolError> {
        let header = self.header();
        if header.magic.check() && header.thread == thread {
            Ok(())
        } else {
            Err(self.corruption(thread))
        }
    }

    /// Cheap check used on every hot-page read
    #[inline]
    pub fn fast_verify(&self, thread: u64) -> Result<(), PoolError> {
        if cfg!(any(debug_assertions, feature = "checked")) {
            return self.verify(thread);
        }
        if self.header().magic.fast_check() {
            Ok(())
        } else {
            Err(self.corruption(thread))
        }
    }

    fn corruption(&self, expected_thread: u64) -> PoolError {
        let header = self.header();
        PoolError::Corrupted {
            page: self.address(),
            magic: header.magic.words(),
            thread: header.thread,
            expected_thread,
        }
    }

    /// Push `slot`, merging per `mode`; returns the address it landed at
    pub fn add(&mut self, slot: Slot, mode: Coalescing) -> usize {
        debug_assert!(!self.is_full(), "add to a full page");
        self.write(|block| block.add(slot, mode))
    }

    /// Remove the top slot and scrub its memory
    pub fn pop(&mut self) -> Slot {
        debug_assert!(!self.is_empty(), "pop from an empty page");
        self.write(PageBlock::pop)
    }

    pub fn set_hiwat(&mut self, mark: u32) {
        self.write(|block| block.header.hiwat = mark);
    }

    /// Releases saved by coalescing on this page
    pub fn sum_of_extra_releases(&self) -> u32 {
        self.slots()
            .iter()
            .filter(|slot| !slot.is_boundary())
            .map(|slot| slot.word().count() as u32)
            .sum()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        self.write(|block| block.header.magic.clear());
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        debug_assert!(self.is_empty(), "freeing a page with pending releases");
        self.write(|block| block.header.magic.clear());
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("depth", &self.depth())
            .field("len", &self.len())
            .field("hiwat", &self.hiwat())
            .finish()
    }
}
