//! Page memory - size-aligned blocks and OS write protection
//!
//! Design: one allocation per page, aligned to its own size so any slot
//! address rounds down to the start of its block. Blocks come zeroed from the
//! global allocator; protection toggles go straight to the OS.

use core::ptr::NonNull;
use once_cell::sync::Lazy;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use crate::logging::{log_page_memory, warn};

/// Owned, zero-initialized, size-aligned block holding one `T`
pub struct RawBlock<T> {
    start: NonNull<T>,
    writable: bool,
}

impl<T> RawBlock<T> {
    const LAYOUT: Layout = Layout::new::<T>();

    /// Allocate a zeroed block
    ///
    /// # Safety
    ///
    /// The all-zero bit pattern must be a valid `T`.
    pub unsafe fn zeroed() -> Self {
        let ptr = alloc_zeroed(Self::LAYOUT);
        let Some(start) = NonNull::new(ptr as *mut T) else {
            handle_alloc_error(Self::LAYOUT)
        };
        log_page_memory("allocate", ptr, Self::LAYOUT.size());
        Self {
            start,
            writable: true,
        }
    }

    #[inline]
    pub fn get(&self) -> &T {
        // SAFETY: the block holds an initialized `T` for its whole life.
        unsafe { self.start.as_ref() }
    }

    /// Mutable access; the caller must have made the block writable
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        debug_assert!(self.writable, "write to a protected page");
        // SAFETY: unique owner, see `get`.
        unsafe { self.start.as_mut() }
    }

    /// `[start, end)` of the block
    #[inline]
    pub fn bounds(&self) -> (usize, usize) {
        let start = self.start.as_ptr() as usize;
        (start, start + Self::LAYOUT.size())
    }

    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        let (start, end) = self.bounds();
        (start..end).contains(&address)
    }

    /// Flip OS write access for the whole block
    pub fn set_writable(&mut self, writable: bool) {
        if self.writable == writable {
            return;
        }
        let ptr = self.start.as_ptr() as *mut u8;
        // SAFETY: the block is ours and page aligned (checked by the caller
        // through `protection_available`).
        if let Err(err) = unsafe { os::protect(ptr, Self::LAYOUT.size(), writable) } {
            warn!(
                target: "page",
                address = ?ptr,
                writable,
                error = %err,
                "page protection change failed"
            );
            return;
        }
        self.writable = writable;
    }
}

impl<T> Drop for RawBlock<T> {
    fn drop(&mut self) {
        self.set_writable(true);
        let ptr = self.start.as_ptr() as *mut u8;
        log_page_memory("free", ptr, Self::LAYOUT.size());
        // SAFETY: allocated in `zeroed` with the same layout.
        unsafe { dealloc(ptr, Self::LAYOUT) };
    }
}

static OS_PAGE_SIZE: Lazy<usize> = Lazy::new(os::page_size);

/// Granularity of OS protection on this host
pub fn os_page_size() -> usize {
    *OS_PAGE_SIZE
}

/// Whether blocks of `size` bytes can be protected without touching
/// neighbouring allocations
pub fn protection_available(size: usize) -> bool {
    os::SUPPORTED && size % os_page_size() == 0
}

#[cfg(unix)]
mod os {
    use std::io;

    pub const SUPPORTED: bool = true;

    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    pub unsafe fn protect(ptr: *mut u8, len: usize, writable: bool) -> io::Result<()> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        if libc::mprotect(ptr as *mut libc::c_void, len, prot) == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod os {
    use std::io;
    use winapi::um::memoryapi::VirtualProtect;
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    use winapi::um::winnt::{PAGE_READONLY, PAGE_READWRITE};

    pub const SUPPORTED: bool = true;

    pub fn page_size() -> usize {
        // SAFETY: GetSystemInfo fills the zeroed struct.
        unsafe {
            let mut info: SYSTEM_INFO = core::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    pub unsafe fn protect(ptr: *mut u8, len: usize, writable: bool) -> io::Result<()> {
        let prot = if writable { PAGE_READWRITE } else { PAGE_READONLY };
        let mut old = 0;
        if VirtualProtect(ptr as _, len, prot, &mut old) != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use std::io;

    pub const SUPPORTED: bool = false;

    pub fn page_size() -> usize {
        4096
    }

    pub unsafe fn protect(_ptr: *mut u8, _len: usize, _writable: bool) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
