//! Autorelease pools - per-thread deferred-release scopes
//!
//! Design: every thread owns one [`PoolStack`] in thread-local storage,
//! created on first use from the process-wide [`PoolOptions`]. The free
//! functions here drive that stack:
//!
//! ```text
//! let token = push();        // open a scope
//! autorelease(&OBJECT);      // defer one release into it
//! pop(token);                // release everything since `push`
//! ```
//!
//! Releases run with no borrow of the thread's stack held, so a `release`
//! may itself push, autorelease or pop. When the thread exits, the stack's
//! destructor releases whatever is still pending and frees its pages.

mod cache;
pub mod diagnostics;
mod retention;
mod stack;


pub use cache::HotPage;
pub use diagnostics::{EntrySnapshot, PageSnapshot, PoolSnapshot};
pub use stack::PoolStack;

use core::cell::RefCell;
use core::marker::PhantomData;
use once_cell::sync::OnceCell;

use crate::config::PoolOptions;
use crate::error::PoolError;
use crate::object::ObjectRef;
use crate::token::{SlotHandle, Token};

/// Options shared by every thread's stack
static OPTIONS: OnceCell<PoolOptions> = OnceCell::new();

thread_local! {
    static POOL: RefCell<PoolStack> = RefCell::new(PoolStack::new(options().clone()));
}

/// Install options from the `AUTOPOOL_*` environment
pub fn init() {
    OPTIONS.get_or_init(PoolOptions::from_env);
}

/// Install explicit options
///
/// Succeeds again with equal options; fails once different options (or the
/// environment defaults, picked up by an earlier call) are in place.
pub fn init_with_options(options: PoolOptions) -> Result<(), PoolError> {
    match OPTIONS.set(options) {
        Ok(()) => Ok(()),
        Err(options) if OPTIONS.get() == Some(&options) => Ok(()),
        Err(_) => Err(PoolError::AlreadyInitialized),
    }
}

/// Options in effect, read from the environment if nothing was installed
pub fn options() -> &'static PoolOptions {
    OPTIONS.get_or_init(PoolOptions::from_env)
}

/// Open a scope on this thread
///
/// Once the thread's pool is torn down the scope cannot hold anything: the
/// placeholder token is returned and popping it does nothing.
pub fn push() -> Token {
    POOL.try_with(|pool| pool.borrow_mut().push())
        .unwrap_or_else(|_| {
            diagnostics::missing_pool(0, 0);
            Token::PLACEHOLDER
        })
}

/// Defer one release of `object` to the innermost scope on this thread
///
/// `None` when the object leaked: no scope open with missing-pool debugging
/// on, or the thread's pool already torn down.
pub fn autorelease(object: impl Into<ObjectRef>) -> Option<SlotHandle> {
    let object = object.into();
    match POOL.try_with(|pool| pool.borrow_mut().autorelease(object)) {
        Ok(handle) => handle,
        Err(_) => {
            diagnostics::missing_pool(0, object.address());
            None
        }
    }
}

/// Close the scope opened by `token`, and any scope still open inside it
pub fn pop(token: Token) {
    let begun = POOL.try_with(|pool| {
        let mut pool = pool.borrow_mut();
        match pool.begin_pop(token) {
            Ok(target) => target,
            Err(err) => {
                pool.report_bad_pop(&err);
                None
            }
        }
    });
    let Ok(Some(target)) = begun else {
        return;
    };

    while let Some(release) = POOL
        .try_with(|pool| pool.borrow_mut().release_next(&target))
        .ok()
        .flatten()
    {
        release.run();
    }

    let _ = POOL.try_with(|pool| pool.borrow_mut().finish_pop(target));
}

/// Log every page and entry of this thread's pool
pub fn print_all() {
    let _ = POOL.try_with(|pool| pool.borrow().print_all());
}

/// Log this thread's high-water mark
pub fn print_hiwat() {
    let _ = POOL.try_with(|pool| pool.borrow().print_hiwat());
}

/// Copy of this thread's pool state, empty once the pool is torn down
pub fn snapshot() -> PoolSnapshot {
    POOL.try_with(|pool| pool.borrow().snapshot())
        .unwrap_or_default()
}

/// Highest pending-slot count recorded on this thread
pub fn hiwat() -> u32 {
    POOL.try_with(|pool| pool.borrow().hiwat()).unwrap_or(0)
}

/// Scope that pops itself when dropped
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard {
    token: Token,
    // Tokens only make sense on the thread that pushed them
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn new() -> Self {
        Self {
            token: push(),
            _not_send: PhantomData,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

impl Default for ScopeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        pop(self.token);
    }
}

impl core::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ScopeGuard").field(&self.token).finish()
    }
}

/// Run `f` inside a fresh scope
pub fn scope<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ScopeGuard::new();
    f()
}
