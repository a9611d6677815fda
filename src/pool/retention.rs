//! Page retention after a pop
//!
//! Keeps at most one empty page above the page that now holds the cursor, so
//! a scope that repeatedly fills a page and drains back does not thrash the
//! allocator. Debug modes free more eagerly.

use crate::config::PoolOptions;
use crate::page::Page;

/// What to do with the chain once releases stopped in `page`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Plan {
    /// Free `pages[from..]`
    pub free_from: Option<usize>,
    /// New hot page
    pub hot: Option<usize>,
}

pub(crate) fn plan(options: &PoolOptions, pages: &[Page], page: usize) -> Plan {
    let current = &pages[page];

    if options.debug_pool_allocation && current.is_empty() {
        return Plan {
            free_from: Some(page),
            hot: page.checked_sub(1),
        };
    }

    if options.debug_missing_pools && current.is_empty() && page == 0 {
        return Plan {
            free_from: Some(0),
            hot: None,
        };
    }

    let free_from = if page + 1 >= pages.len() {
        None
    } else if current.less_than_half_full() {
        Some(page + 1)
    } else if page + 2 < pages.len() {
        Some(page + 2)
    } else {
        None
    };

    Plan {
        free_from,
        hot: Some(page),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Coalescing, Slot, CAPACITY};
    use core::ptr::NonNull;

    unsafe fn noop(_: NonNull<()>) {}

    fn chain(depth: usize) -> Vec<Page> {
        let mut pages: Vec<Page> = Vec::new();
        for _ in 0..depth {
            let page = Page::new(pages.last(), 1, false);
            pages.push(page);
        }
        pages
    }

    fn fill(page: &mut Page, count: usize) {
        for i in 0..count {
            page.add(Slot::entry(0x1000 + i * 16, noop), Coalescing::Off);
        }
    }

    fn drain(pages: &mut Vec<Page>) {
        while let Some(mut page) = pages.pop() {
            while !page.is_empty() {
                page.pop();
            }
        }
    }

    #[test]
    fn lone_page_is_kept() {
        let mut pages = chain(1);
        let plan = plan(&PoolOptions::default(), &pages, 0);
        assert_eq!(plan, Plan { free_from: None, hot: Some(0) });
        drain(&mut pages);
    }

    #[test]
    fn less_than_half_full_frees_every_child() {
        let mut pages = chain(3);
        fill(&mut pages[0], CAPACITY / 2 - 1);
        let plan = plan(&PoolOptions::default(), &pages, 0);
        assert_eq!(plan.free_from, Some(1));
        assert_eq!(plan.hot, Some(0));
        drain(&mut pages);
    }

    #[test]
    fn half_full_keeps_one_child() {
        let mut pages = chain(3);
        fill(&mut pages[0], CAPACITY / 2);
        assert_eq!(plan(&PoolOptions::default(), &pages, 0).free_from, Some(2));

        pages.pop();
        assert_eq!(plan(&PoolOptions::default(), &pages, 0).free_from, None);
        drain(&mut pages);
    }

    #[test]
    fn page_per_scope_frees_empty_page() {
        let options = PoolOptions {
            debug_pool_allocation: true,
            ..PoolOptions::default()
        };
        let mut pages = chain(2);
        assert_eq!(
            plan(&options, &pages, 1),
            Plan { free_from: Some(1), hot: Some(0) }
        );
        assert_eq!(
            plan(&options, &pages, 0),
            Plan { free_from: Some(0), hot: None }
        );
        drain(&mut pages);
    }

    #[test]
    fn missing_pool_mode_frees_emptied_root() {
        let options = PoolOptions {
            debug_missing_pools: true,
            ..PoolOptions::default()
        };
        let mut pages = chain(2);
        assert_eq!(
            plan(&options, &pages, 0),
            Plan { free_from: Some(0), hot: None }
        );

        fill(&mut pages[0], 1);
        assert_eq!(plan(&options, &pages, 0).free_from, Some(1));
        drain(&mut pages);
    }
}
