//! Diagnostics - corruption handling, misuse reports, high-water marks, dumps
//!
//! Nothing here changes what gets released or when; it only observes the
//! chain and reports through `tracing`.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::PoolOptions;
use crate::error::PoolError;
use crate::logging::{error, info, log_bad_pop, log_hiwat, log_missing_pool, warn};
use crate::page::{Magic, Page, CAPACITY};
use crate::pool::cache::HotPage;

/// High-water marks closer than this to the previous one are not recorded
pub const HIWAT_NOISE: u32 = 256;

/// Only the first non-fatal bad pop in the process is reported
static COMPLAINED: AtomicBool = AtomicBool::new(false);

/// Dump a corrupted page and abort
#[cold]
#[inline(never)]
pub fn busted_die(err: &PoolError) -> ! {
    error!(
        target: "diagnostics",
        event = "page_corrupted",
        error = %err,
        expected_magic = ?Magic::new(),
        "autorelease pool page corrupted"
    );
    std::process::abort()
}

/// Handle a pop whose token is not an open boundary
///
/// Fatal under strict options; otherwise warns once per process and lets the
/// caller carry on without releasing anything.
#[cold]
pub fn bad_pop(thread: u64, err: &PoolError, options: &PoolOptions) {
    if options.bad_pop_is_fatal() {
        error!(
            target: "diagnostics",
            event = "bad_pop",
            thread,
            error = %err,
            "Invalid or prematurely-freed autorelease pool"
        );
        std::process::abort();
    }
    if !COMPLAINED.swap(true, Ordering::Relaxed) {
        if let PoolError::InvalidPop { token } = err {
            log_bad_pop(thread, token.address());
        }
    }
}

/// Report an autorelease that found no pool
#[cold]
pub fn missing_pool(thread: u64, object: usize) {
    log_missing_pool(thread, object);
}

/// Pending-slot count of the chain as seen from the hot page
#[inline]
pub fn current_mark(page: &Page) -> u32 {
    (page.depth() as usize * CAPACITY + page.len()) as u32
}

/// Record a new high-water mark on the hot page and all of its ancestors
///
/// Returns the new mark when it moved. `report` also logs it together with
/// the number of releases saved by coalescing.
pub fn update_hiwat(pages: &mut [Page], hot: usize, thread: u64, report: bool) -> Option<u32> {
    let mark = current_mark(&pages[hot]);
    if mark <= pages[hot].hiwat().saturating_add(HIWAT_NOISE) {
        return None;
    }

    let mut extra_releases = 0;
    for page in pages[..=hot].iter_mut().rev() {
        page.set_hiwat(mark);
        if report {
            extra_releases += page.sum_of_extra_releases();
        }
    }

    if report {
        log_hiwat(thread, mark, extra_releases);
    }
    Some(mark)
}

/// One slot in a [`PageSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySnapshot {
    Boundary { slot: usize },
    Object { slot: usize, object: usize, releases: u32 },
}

/// Read-only copy of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub address: usize,
    pub depth: u32,
    pub hiwat: u32,
    pub hot: bool,
    pub cold: bool,
    pub full: bool,
    pub intact: bool,
    pub entries: Vec<EntrySnapshot>,
}

/// Read-only copy of a thread's whole chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub thread: u64,
    pub placeholder: bool,
    pub pages: Vec<PageSnapshot>,
}

impl PoolSnapshot {
    pub(crate) fn capture(pages: &[Page], hot: HotPage, thread: u64) -> Self {
        let hot_index = match hot {
            HotPage::Page(index) => Some(index),
            HotPage::None | HotPage::Placeholder => None,
        };
        let pages = pages
            .iter()
            .enumerate()
            .map(|(index, page)| PageSnapshot {
                address: page.address(),
                depth: page.depth(),
                hiwat: page.hiwat(),
                hot: hot_index == Some(index),
                cold: index == 0,
                full: page.is_full(),
                intact: page.verify(thread).is_ok(),
                entries: page
                    .slots()
                    .iter()
                    .enumerate()
                    .map(|(i, slot)| {
                        let address = page.slot_address(i);
                        if slot.is_boundary() {
                            EntrySnapshot::Boundary { slot: address }
                        } else {
                            let (object, releases) = slot.word().decode();
                            EntrySnapshot::Object {
                                slot: address,
                                object,
                                releases,
                            }
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            thread,
            placeholder: hot == HotPage::Placeholder,
            pages,
        }
    }

    /// Occupied slots, boundaries included
    pub fn occupied_slots(&self) -> usize {
        self.pages.iter().map(|p| p.entries.len()).sum()
    }

    /// Release calls owed if every scope closed now
    pub fn pending_releases(&self) -> usize {
        self.entries()
            .map(|e| match e {
                EntrySnapshot::Object { releases, .. } => *releases as usize,
                EntrySnapshot::Boundary { .. } => 0,
            })
            .sum()
    }

    /// Open scope boundaries (the placeholder counts as one)
    pub fn open_scopes(&self) -> usize {
        let boundaries = self
            .entries()
            .filter(|e| matches!(e, EntrySnapshot::Boundary { .. }))
            .count();
        boundaries + usize::from(self.placeholder)
    }

    /// Every slot, bottom of the chain first
    pub fn entries(&self) -> impl Iterator<Item = &EntrySnapshot> {
        self.pages.iter().flat_map(|p| p.entries.iter())
    }
}

/// Log every page and slot of a chain
pub fn print_all(snapshot: &PoolSnapshot) {
    info!(target: "diagnostics", "##############");
    info!(
        target: "diagnostics",
        "AUTORELEASE POOLS for thread {}", snapshot.thread
    );
    info!(
        target: "diagnostics",
        "{} releases pending.", snapshot.occupied_slots()
    );

    if snapshot.placeholder {
        info!(target: "diagnostics", "[placeholder]  ................  PAGE (placeholder)");
        info!(target: "diagnostics", "[placeholder]  ################  POOL (placeholder)");
    } else {
        for page in &snapshot.pages {
            if !page.intact {
                warn!(
                    target: "diagnostics",
                    page = format_args!("{:#x}", page.address),
                    "page failed integrity check"
                );
            }
            info!(
                target: "diagnostics",
                "[{:#x}]  ................  PAGE {} {} {}",
                page.address,
                if page.full { "(full)" } else { "" },
                if page.hot { "(hot)" } else { "" },
                if page.cold { "(cold)" } else { "" },
            );
            for entry in &page.entries {
                match *entry {
                    EntrySnapshot::Boundary { slot } => {
                        info!(target: "diagnostics", "[{:#x}]  ################  POOL {:#x}", slot, slot);
                    }
                    EntrySnapshot::Object {
                        slot,
                        object,
                        releases,
                    } if releases > 1 => {
                        info!(
                            target: "diagnostics",
                            "[{:#x}]  {:#16x}  autorelease count {}", slot, object, releases
                        );
                    }
                    EntrySnapshot::Object { slot, object, .. } => {
                        info!(target: "diagnostics", "[{:#x}]  {:#16x}", slot, object);
                    }
                }
            }
        }
    }

    info!(target: "diagnostics", "##############");
}
