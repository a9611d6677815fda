//! Demo driver: one scope, two objects, repeated registrations

use autopool::logging::{self, LogConfig};
use autopool::{ObjectRef, PoolOptions, Release};
use std::path::PathBuf;
use std::ptr::NonNull;

struct Object {
    name: String,
}

impl Object {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Release for Object {
    fn release(&self) {
        println!("<Object:{:p}-{}> call release", self, self.name);
    }
}

#[derive(Debug, Default)]
struct DemoConfig {
    config: Option<PathBuf>,
    no_coalescing: bool,
    no_lru: bool,
    print_all: bool,
    verbose: bool,
}

fn parse_args() -> Result<DemoConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--no-coalescing" => config.no_coalescing = true,
            "--no-lru" => config.no_lru = true,
            "--print-all" => config.print_all = true,
            "--verbose" => config.verbose = true,
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires an argument".to_string());
                }
                config.config = Some(PathBuf::from(&args[i]));
            }
            "--help" | "-h" => {
                return Err(format!(
                    "Usage: {} [OPTIONS]\n\nOptions:\n  \
                     --config PATH     Load pool options from a TOML file\n  \
                     --no-coalescing   Give every registration its own slot\n  \
                     --no-lru          Coalesce only into the top slot\n  \
                     --print-all       Dump the pool before popping\n  \
                     --verbose         Log page and pool events",
                    args[0]
                ));
            }
            arg => return Err(format!("Unknown option: {}", arg)),
        }
        i += 1;
    }

    Ok(config)
}

fn pool_options(demo: &DemoConfig) -> Result<PoolOptions, Box<dyn std::error::Error>> {
    let mut options = match &demo.config {
        Some(path) => PoolOptions::load(path)?,
        None => PoolOptions::default(),
    };
    options.apply_env();
    if demo.no_coalescing {
        options.coalescing = false;
    }
    if demo.no_lru {
        options.coalescing_lru = false;
    }
    Ok(options)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let demo = parse_args()?;

    let mut log_config = LogConfig::from_env();
    if demo.verbose {
        log_config.level = logging::Level::TRACE;
    }
    logging::init_with_config(log_config);

    autopool::init_with_options(pool_options(&demo)?)?;

    let object = Box::new(Object::new("test"));
    let object2 = Box::new(Object::new("test2"));
    // SAFETY: both boxes outlive the scope popped below.
    let (first, second) = unsafe {
        (
            ObjectRef::from_raw(NonNull::from(&*object)),
            ObjectRef::from_raw(NonNull::from(&*object2)),
        )
    };

    let token = autopool::push();
    autopool::autorelease(first);
    autopool::autorelease(second);
    autopool::autorelease(first);
    autopool::autorelease(first);
    autopool::autorelease(second);
    if demo.print_all {
        autopool::print_all();
    }
    autopool::pop(token);

    drop(object);
    drop(object2);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
