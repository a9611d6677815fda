//! Pool options - read once, then immutable
//!
//! Sources, in the order a host typically layers them:
//! 1. `PoolOptions::default()` (coalescing on, every debug switch off)
//! 2. A TOML file or string (`load`, `from_toml_str`)
//! 3. `AUTOPOOL_*` environment switches (`from_env`, `apply_env`)

use crate::error::ConfigError;
use crate::page::{Coalescing, SUPPORTS_COALESCING};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Merge repeated registrations of one object into a single slot
    pub coalescing: bool,

    /// Search a small window below the top for the merge partner
    pub coalescing_lru: bool,

    /// Give every scope its own page and free it on pop
    pub debug_pool_allocation: bool,

    /// Report (and leak) autoreleases with no scope open
    pub debug_missing_pools: bool,

    /// Log each new high-water mark
    pub print_hiwat: bool,

    /// Keep pages read-only between mutations
    pub protect_pages: bool,

    /// Treat an invalid pop as fatal instead of warning once
    pub strict_pops: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            coalescing: true,
            coalescing_lru: true,
            debug_pool_allocation: false,
            debug_missing_pools: false,
            print_hiwat: false,
            protect_pages: false,
            strict_pops: false,
        }
    }
}

const ENV_SWITCHES: &[(&str, fn(&mut PoolOptions))] = &[
    ("AUTOPOOL_DISABLE_COALESCING", |o| o.coalescing = false),
    ("AUTOPOOL_DISABLE_COALESCING_LRU", |o| o.coalescing_lru = false),
    ("AUTOPOOL_DEBUG_POOL_ALLOCATION", |o| o.debug_pool_allocation = true),
    ("AUTOPOOL_DEBUG_MISSING_POOLS", |o| o.debug_missing_pools = true),
    ("AUTOPOOL_PRINT_POOL_HIGHWATER", |o| o.print_hiwat = true),
    ("AUTOPOOL_PROTECT_POOLS", |o| o.protect_pages = true),
    ("AUTOPOOL_STRICT_POPS", |o| o.strict_pops = true),
];

impl PoolOptions {
    /// Defaults overridden by `AUTOPOOL_*` switches
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env();
        options
    }

    /// Apply every `AUTOPOOL_*` switch set to `1`/`true`/`yes`
    pub fn apply_env(&mut self) {
        self.apply_switches(|name| std::env::var(name).ok());
    }

    fn apply_switches(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (name, apply) in ENV_SWITCHES {
            if lookup(name).is_some_and(|v| is_truthy(&v)) {
                apply(self);
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load options from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Merge strategy implied by the switches on this target
    pub fn coalescing_mode(&self) -> Coalescing {
        if !self.coalescing || !SUPPORTS_COALESCING {
            Coalescing::Off
        } else if self.coalescing_lru {
            Coalescing::Window
        } else {
            Coalescing::Top
        }
    }

    /// Whether a first, unused scope may be a placeholder instead of a page
    pub fn placeholder_enabled(&self) -> bool {
        !self.debug_pool_allocation
    }

    /// Whether `pop` on a bad token aborts
    pub fn bad_pop_is_fatal(&self) -> bool {
        self.strict_pops || self.debug_pool_allocation
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_enable_window_coalescing() {
        let options = PoolOptions::default();
        if SUPPORTS_COALESCING {
            assert_eq!(options.coalescing_mode(), Coalescing::Window);
        }
        assert!(options.placeholder_enabled());
        assert!(!options.bad_pop_is_fatal());
    }

    #[test]
    fn coalescing_switches_select_mode() {
        let off = PoolOptions {
            coalescing: false,
            ..PoolOptions::default()
        };
        assert_eq!(off.coalescing_mode(), Coalescing::Off);

        let top = PoolOptions {
            coalescing_lru: false,
            ..PoolOptions::default()
        };
        if SUPPORTS_COALESCING {
            assert_eq!(top.coalescing_mode(), Coalescing::Top);
        }
    }

    #[test]
    fn page_per_scope_disables_placeholder_and_is_strict() {
        let options = PoolOptions {
            debug_pool_allocation: true,
            ..PoolOptions::default()
        };
        assert!(!options.placeholder_enabled());
        assert!(options.bad_pop_is_fatal());
    }

    #[test]
    fn switches_apply_only_when_truthy() {
        let env: HashMap<&str, &str> = [
            ("AUTOPOOL_DISABLE_COALESCING", "1"),
            ("AUTOPOOL_DEBUG_MISSING_POOLS", "yes"),
            ("AUTOPOOL_PRINT_POOL_HIGHWATER", "0"),
        ]
        .into_iter()
        .collect();

        let mut options = PoolOptions::default();
        options.apply_switches(|name| env.get(name).map(|v| v.to_string()));

        assert!(!options.coalescing);
        assert!(options.debug_missing_pools);
        assert!(!options.print_hiwat);
        assert!(options.coalescing_lru);
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let options = PoolOptions::from_toml_str("print_hiwat = true\nstrict_pops = true\n")
            .expect("valid toml");
        assert!(options.print_hiwat);
        assert!(options.strict_pops);
        assert!(options.coalescing);
    }

    #[test]
    fn toml_type_errors_are_reported() {
        let err = PoolOptions::from_toml_str("coalescing = \"maybe\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "debug_pool_allocation = true").expect("write");
        let options = PoolOptions::load(file.path()).expect("load");
        assert!(options.debug_pool_allocation);

        let missing = PoolOptions::load(Path::new("/nonexistent/autopool.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
