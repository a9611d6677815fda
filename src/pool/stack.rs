//! PoolStack - one thread's chain of pages and the scope protocol over it
//!
//! Pages live in a `Vec` indexed by depth: `pages[i + 1]` is the child of
//! `pages[i]`. Everything above the hot page is empty, so growing and
//! trimming only ever touch the tail.
//!
//! A pop is split into steps (`begin_pop`, `release_next`, `finish_pop`) so
//! the thread-local facade can run each release with no borrow held.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::PoolOptions;
use crate::error::PoolError;
use crate::logging::{log_hiwat, log_page_added, log_pages_freed, log_teardown};
use crate::object::ObjectRef;
use crate::page::{Coalescing, Page, PendingRelease, Slot, PAGE_SIZE};
use crate::pool::cache::{HotPage, HotPageCache};
use crate::pool::diagnostics::{self, PoolSnapshot};
use crate::pool::retention;
use crate::token::{SlotHandle, Token};

/// Owner ids stamped into page headers; 0 is never handed out
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Where an add ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Landing {
    Landed(usize),
    Placeholder,
    Leaked,
}

/// Resolved pop destination: release until `pages[page].len() == index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PopTarget {
    page: usize,
    index: usize,
}

/// A thread's autorelease pool stack
///
/// Not `Send`: pages are stamped with the owner id and checked on access.
pub struct PoolStack {
    options: PoolOptions,
    mode: Coalescing,
    thread: u64,
    pages: Vec<Page>,
    cache: HotPageCache,
    hiwat: u32,
}

impl PoolStack {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            mode: options.coalescing_mode(),
            options,
            thread: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            pages: Vec::new(),
            cache: HotPageCache::new(),
            hiwat: 0,
        }
    }

    #[inline]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Owner id stamped into this stack's pages
    #[inline]
    pub fn thread(&self) -> u64 {
        self.thread
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn hot(&self) -> HotPage {
        self.cache.state()
    }

    /// Highest recorded high-water mark
    #[inline]
    pub fn hiwat(&self) -> u32 {
        self.hiwat
    }

    /// Open a scope
    pub fn push(&mut self) -> Token {
        let landing = if self.options.debug_pool_allocation {
            self.autorelease_new_page(Slot::BOUNDARY)
        } else {
            self.autorelease_fast(Slot::BOUNDARY)
        };
        match landing {
            Landing::Landed(address) => Token::from_address(address),
            Landing::Placeholder => Token::PLACEHOLDER,
            Landing::Leaked => unreachable!("boundaries are never leaked"),
        }
    }

    /// Register one pending release in the innermost scope
    ///
    /// `None` when there is no scope and missing-pool debugging is on: the
    /// reference leaks.
    pub fn autorelease(&mut self, object: ObjectRef) -> Option<SlotHandle> {
        match self.autorelease_fast(object.to_slot()) {
            Landing::Landed(address) => Some(SlotHandle::from_address(address)),
            Landing::Placeholder | Landing::Leaked => None,
        }
    }

    /// Close the scope opened by `token` and every scope inside it
    pub fn try_pop(&mut self, token: Token) -> Result<(), PoolError> {
        let Some(target) = self.begin_pop(token)? else {
            return Ok(());
        };
        while let Some(release) = self.release_next(&target) {
            release.run();
        }
        self.finish_pop(target);
        Ok(())
    }

    /// `try_pop` with invalid tokens reported instead of returned
    pub fn pop(&mut self, token: Token) {
        if let Err(err) = self.try_pop(token) {
            self.report_bad_pop(&err);
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::capture(&self.pages, self.cache.state(), self.thread)
    }

    pub fn print_all(&self) {
        diagnostics::print_all(&self.snapshot());
    }

    pub fn print_hiwat(&self) {
        let extra_releases = self.pages.iter().map(Page::sum_of_extra_releases).sum();
        log_hiwat(self.thread, self.hiwat, extra_releases);
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    #[inline]
    fn autorelease_fast(&mut self, slot: Slot) -> Landing {
        match self.cache.hot_page(&self.pages, self.thread) {
            Some(hot) if !self.pages[hot].is_full() => {
                Landing::Landed(self.pages[hot].add(slot, self.mode))
            }
            Some(hot) => self.autorelease_full_page(slot, hot),
            None => self.autorelease_no_page(slot),
        }
    }

    #[cold]
    fn autorelease_full_page(&mut self, slot: Slot, page: usize) -> Landing {
        debug_assert!(self.pages[page].is_full() || self.options.debug_pool_allocation);

        let mut index = page;
        loop {
            index = self.child_of(index);
            if !self.pages[index].is_full() {
                break;
            }
        }

        self.cache.set_hot_page(Some(index), &self.pages, self.thread);
        Landing::Landed(self.pages[index].add(slot, self.mode))
    }

    #[cold]
    fn autorelease_no_page(&mut self, slot: Slot) -> Landing {
        debug_assert!(self.pages.is_empty(), "pages without a hot page");

        let push_boundary = if self.cache.has_placeholder() {
            true
        } else if !slot.is_boundary() && self.options.debug_missing_pools {
            diagnostics::missing_pool(self.thread, slot.word().address());
            return Landing::Leaked;
        } else if slot.is_boundary() && self.options.placeholder_enabled() {
            self.cache.set_placeholder();
            return Landing::Placeholder;
        } else {
            false
        };

        let root = self.grow(None);
        self.cache.set_hot_page(Some(root), &self.pages, self.thread);

        // The placeholder stood for a boundary at the very bottom
        if push_boundary {
            self.pages[root].add(Slot::BOUNDARY, self.mode);
        }
        Landing::Landed(self.pages[root].add(slot, self.mode))
    }

    #[cold]
    fn autorelease_new_page(&mut self, slot: Slot) -> Landing {
        match self.cache.hot_page(&self.pages, self.thread) {
            Some(hot) => self.autorelease_full_page(slot, hot),
            None => self.autorelease_no_page(slot),
        }
    }

    // ------------------------------------------------------------------
    // Pop
    // ------------------------------------------------------------------

    /// Resolve `token` and record the high-water mark
    ///
    /// `Ok(None)` when there is nothing to release.
    pub(crate) fn begin_pop(&mut self, token: Token) -> Result<Option<PopTarget>, PoolError> {
        let target = if token.is_placeholder() {
            if self.pages.is_empty() {
                self.cache.clear();
                return Ok(None);
            }
            PopTarget { page: 0, index: 0 }
        } else {
            self.resolve(token)?
        };

        self.track_hiwat();
        Ok(Some(target))
    }

    fn resolve(&self, token: Token) -> Result<PopTarget, PoolError> {
        let invalid = || PoolError::InvalidPop { token };
        let address = token.address();
        let base = address & !(PAGE_SIZE - 1);

        let page = self
            .pages
            .iter()
            .position(|p| p.address() == base)
            .ok_or_else(invalid)?;
        let index = self.pages[page].index_of(address).ok_or_else(invalid)?;

        if index >= self.pages[page].len() {
            return Err(invalid());
        }
        // Slot 0 of the root may hold an object: autorelease with no scope
        if !self.pages[page].slot(index).is_boundary() && (page, index) != (0, 0) {
            return Err(invalid());
        }
        Ok(PopTarget { page, index })
    }

    /// Pop the next slot above `target` that owes releases
    ///
    /// Walks down through pages emptied on the way and skips boundaries of
    /// inner scopes.
    pub(crate) fn release_next(&mut self, target: &PopTarget) -> Option<PendingRelease> {
        loop {
            let mut hot = self.cache.hot_page(&self.pages, self.thread)?;
            while hot > target.page && self.pages[hot].is_empty() {
                hot -= 1;
                self.cache.set_hot_page(Some(hot), &self.pages, self.thread);
            }

            let page = &mut self.pages[hot];
            if hot < target.page || (hot == target.page && page.len() <= target.index) {
                return None;
            }
            if let Some(release) = page.pop().pending() {
                return Some(release);
            }
        }
    }

    /// Make the target page hot and trim the chain above it
    pub(crate) fn finish_pop(&mut self, target: PopTarget) {
        // A release popped an outer scope, which already trimmed the chain
        if target.page >= self.pages.len() || self.pages[target.page].len() < target.index {
            return;
        }
        self.cache.set_hot_page(Some(target.page), &self.pages, self.thread);

        let plan = retention::plan(&self.options, &self.pages, target.page);
        if let Some(from) = plan.free_from {
            self.kill_from(from);
        }
        self.cache.set_hot_page(plan.hot, &self.pages, self.thread);
    }

    pub(crate) fn report_bad_pop(&self, err: &PoolError) {
        diagnostics::bad_pop(self.thread, err, &self.options);
    }

    fn track_hiwat(&mut self) {
        let Some(hot) = self.cache.hot_page(&self.pages, self.thread) else {
            return;
        };
        if let Some(mark) =
            diagnostics::update_hiwat(&mut self.pages, hot, self.thread, self.options.print_hiwat)
        {
            self.hiwat = self.hiwat.max(mark);
        }
    }

    // ------------------------------------------------------------------
    // Chain
    // ------------------------------------------------------------------

    /// Existing child of `parent`, or a fresh one
    fn child_of(&mut self, parent: usize) -> usize {
        let child = parent + 1;
        if child < self.pages.len() {
            return child;
        }
        self.grow(Some(parent))
    }

    fn grow(&mut self, parent: Option<usize>) -> usize {
        debug_assert_eq!(
            parent.map_or(0, |p| p + 1),
            self.pages.len(),
            "chains never branch"
        );
        let page = Page::new(
            parent.map(|p| &self.pages[p]),
            self.thread,
            self.options.protect_pages,
        );
        log_page_added(self.thread, page.depth(), page.address());
        self.pages.push(page);
        self.pages.len() - 1
    }

    /// Free `pages[from..]`, tail first
    fn kill_from(&mut self, from: usize) {
        if from >= self.pages.len() {
            return;
        }
        let count = self.pages.len() - from;
        while self.pages.len() > from {
            self.pages.pop();
        }
        log_pages_freed(self.thread, from, count);
    }
}

impl Drop for PoolStack {
    fn drop(&mut self) {
        let pages = self.pages.len();
        let mut released = 0;

        if pages > 0 {
            let bottom = PopTarget { page: 0, index: 0 };
            while let Some(release) = self.release_next(&bottom) {
                released += release.times() as usize;
                release.run();
            }
            self.kill_from(0);
        }
        self.cache.clear();

        log_teardown(self.thread, pages, released);
    }
}

impl core::fmt::Debug for PoolStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolStack")
            .field("thread", &self.thread)
            .field("hot", &self.cache.state())
            .field("pages", &self.pages)
            .field("hiwat", &self.hiwat)
            .finish()
    }
}
