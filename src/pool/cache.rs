//! Hot-page cache - which page of the chain takes the next registration
//!
//! Three states per thread: nothing pushed yet, a placeholder for a single
//! scope that never needed storage, or the index of the live hot page.

use crate::page::Page;
use crate::pool::diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotPage {
    None,
    Placeholder,
    Page(usize),
}

#[derive(Debug)]
pub(crate) struct HotPageCache {
    slot: HotPage,
}

impl HotPageCache {
    pub(crate) const fn new() -> Self {
        Self {
            slot: HotPage::None,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> HotPage {
        self.slot
    }

    /// Index of the hot page, integrity-checked
    #[inline]
    pub(crate) fn hot_page(&self, pages: &[Page], thread: u64) -> Option<usize> {
        match self.slot {
            HotPage::Page(index) => {
                if let Err(err) = pages[index].fast_verify(thread) {
                    diagnostics::busted_die(&err);
                }
                Some(index)
            }
            HotPage::None | HotPage::Placeholder => None,
        }
    }

    #[inline]
    pub(crate) fn set_hot_page(&mut self, page: Option<usize>, pages: &[Page], thread: u64) {
        self.slot = match page {
            Some(index) => {
                if let Err(err) = pages[index].fast_verify(thread) {
                    diagnostics::busted_die(&err);
                }
                HotPage::Page(index)
            }
            None => HotPage::None,
        };
    }

    #[inline]
    pub(crate) fn has_placeholder(&self) -> bool {
        self.slot == HotPage::Placeholder
    }

    pub(crate) fn set_placeholder(&mut self) {
        debug_assert_eq!(self.slot, HotPage::None, "placeholder over a live pool");
        self.slot = HotPage::Placeholder;
    }

    pub(crate) fn clear(&mut self) {
        self.slot = HotPage::None;
    }
}
