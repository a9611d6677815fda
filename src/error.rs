use crate::token::Token;
use std::fmt;
use std::io;

/// Conditions the pool engine can detect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Page tag overwritten or page touched from a foreign thread
    Corrupted {
        page: usize,
        magic: [u32; 4],
        thread: u64,
        expected_thread: u64,
    },
    /// `pop` with a token that is not an open boundary on this thread
    InvalidPop { token: Token },
    /// `autorelease` with no scope open; the object leaks
    MissingPool { object: usize },
    /// Options were already installed with different values
    AlreadyInitialized,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted {
                page,
                magic,
                thread,
                expected_thread,
            } => {
                write!(
                    f,
                    "autorelease pool page {:#x} corrupted: magic {:#010x} {:#010x} {:#010x} {:#010x}, thread {} (should be {})",
                    page, magic[0], magic[1], magic[2], magic[3], thread, expected_thread
                )
            }
            Self::InvalidPop { token } => {
                write!(f, "Invalid or prematurely-freed autorelease pool {}", token)
            }
            Self::MissingPool { object } => {
                write!(
                    f,
                    "Object {:#x} autoreleased with no pool in place - just leaking",
                    object
                )
            }
            Self::AlreadyInitialized => {
                write!(f, "Pool options already initialized with different values")
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Failure loading `PoolOptions` from a file or string
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
