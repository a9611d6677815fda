// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod object;
pub mod page;
pub mod pool;
pub mod token;

// Re-export commonly used items
pub use config::PoolOptions;
pub use error::{ConfigError, PoolError};
pub use object::{ObjectRef, Release};
pub use page::{Coalescing, CAPACITY, PAGE_SIZE};
pub use pool::{
    autorelease, hiwat, init, init_with_options, options, pop, print_all, print_hiwat, push,
    scope, snapshot, HotPage, PoolSnapshot, PoolStack, ScopeGuard,
};
pub use token::{SlotHandle, Token};
