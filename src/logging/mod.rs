//! Logging infrastructure - structured tracing for the pool engine
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per target (`page`, `pool`, `diagnostics`)
//! - Zero-cost when disabled
//! - Console output, optionally JSON, optionally mirrored to a file
//!
//! The engine itself never installs a subscriber; binaries and tests call
//! [`init`] when they want output.

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // AUTOPOOL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("AUTOPOOL_LOG_LEVEL") {
            config.level = match level_str.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            };
        }

        // AUTOPOOL_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("AUTOPOOL_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("AUTOPOOL_LOG_JSON").is_ok();
        config.show_spans = std::env::var("AUTOPOOL_LOG_SPANS").is_ok();

        config
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Every page and slot event
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("autopool.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "autopool={level},page={level},pool={level},diagnostics={level}",
                level = config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let console_json = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
        });
        let console_text = (!config.json_format).then(|| {
            fmt::layer()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
        });
        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
                let name = path.file_name().unwrap_or(path.as_os_str());
                let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                fmt::layer().with_writer(writer).with_ansi(false)
            });

        // Another subscriber may already be installed (e.g. by the host)
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_json)
            .with(console_text)
            .with(file)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Pool-specific logging functions
// ============================================================================

/// Log a page block allocation or free
#[inline]
pub fn log_page_memory(action: &'static str, ptr: *const u8, size: usize) {
    trace!(
        target: "page",
        event = action,
        address = ?ptr,
        size_bytes = size,
        "page memory"
    );
}

/// Log a page joining a thread's chain
#[inline]
pub fn log_page_added(thread: u64, depth: u32, address: usize) {
    debug!(
        target: "pool",
        event = "page_added",
        thread,
        depth,
        address = format_args!("{:#x}", address),
        "new pool page"
    );
}

/// Log pages leaving a thread's chain
#[inline]
pub fn log_pages_freed(thread: u64, from_depth: usize, count: usize) {
    debug!(
        target: "pool",
        event = "pages_freed",
        thread,
        from_depth,
        count,
        "freed pool pages"
    );
}

/// Log a pop with a token that is not an open boundary
pub fn log_bad_pop(thread: u64, token: usize) {
    warn!(
        target: "diagnostics",
        event = "bad_pop",
        thread,
        token = format_args!("{:#x}", token),
        "Invalid or prematurely-freed autorelease pool; proceeding anyway, memory errors are likely"
    );
}

/// Log an autorelease with no pool in place
pub fn log_missing_pool(thread: u64, object: usize) {
    warn!(
        target: "diagnostics",
        event = "missing_pool",
        thread,
        object = format_args!("{:#x}", object),
        "MISSING POOLS: object autoreleased with no pool in place - just leaking"
    );
}

/// Log a new high-water mark
pub fn log_hiwat(thread: u64, mark: u32, extra_releases: u32) {
    info!(
        target: "diagnostics",
        event = "pool_highwater",
        thread,
        mark,
        extra_releases,
        "POOL HIGHWATER: new high water mark of pending releases"
    );
}

/// Log thread teardown of a chain
pub fn log_teardown(thread: u64, pages: usize, released: usize) {
    debug!(
        target: "pool",
        event = "teardown",
        thread,
        pages,
        released,
        "thread pool chain torn down"
    );
}
