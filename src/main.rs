//! embcache admin tool.
//!
//! Inspects and maintains the durable tier named in a configuration file.

use clap::{Parser, Subcommand};
use embcache::{logging, Config, DurableStore, LoggingConfig, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "embcache")]
#[command(about = "Maintenance for the embedding cache's durable tier")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print row counts by model and content class as JSON
    Stats,

    /// Delete expired rows
    Cleanup,

    /// Delete every row
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Print the default configuration and exit
    PrintConfig,
}

fn main() {
    let cli = Cli::parse();

    if let Commands::PrintConfig = cli.command {
        print_default_config();
        return;
    }

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No config file specified. Use --config <path> or print-config");
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    if let Err(e) = run(&cli.command, &config) {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

fn run(command: &Commands, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let cache = &config.cache;
    let path = match (&cache.persistence.path, cache.persistence.enabled) {
        (Some(path), true) => path,
        _ => return Err("persistence is not enabled in this configuration".into()),
    };
    let store = DurableStore::open(path, cache.compression, Arc::new(SystemClock))?;

    match command {
        Commands::Stats => {
            let stats = store.stats()?;
            let mut by_model = json::JsonValue::new_object();
            for (model, count) in &stats.by_model {
                by_model[model.as_str()] = (*count).into();
            }
            let mut by_class = json::JsonValue::new_object();
            for (class, count) in &stats.by_class {
                by_class[class.as_str()] = (*count).into();
            }
            let output = json::object! {
                path: path.display().to_string(),
                entries: stats.entries,
                by_model: by_model,
                by_class: by_class,
            };
            println!("{}", output.pretty(2));
        }
        Commands::Cleanup => {
            let removed = store.cleanup_expired()?;
            println!("removed {} expired rows", removed);
        }
        Commands::Clear { yes } => {
            if !yes {
                return Err("refusing to clear without --yes".into());
            }
            let removed = store.clear()?;
            println!("removed {} rows", removed);
        }
        Commands::PrintConfig => print_default_config(),
    }

    Ok(())
}

fn print_default_config() {
    let defaults = LoggingConfig::default();
    let config = format!(
        r#"# embcache configuration

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "{level}"
# Log format: "pretty", "json", or "compact"
format = "compact"
timestamps = {timestamps}
thread_names = false
target = false

[cache]
# Eviction strategy: "lru", "lfu", "ttl", "adaptive", "content_aware"
strategy = "lru"

# Memory tier bounds
max_entries = 10000
max_memory_bytes = "512MB"

# Reject vectors of any other length
# dimensions = 384

# Entry lifetime when no class override applies ("none" disables expiry)
default_ttl = "7d"

# Background expiry sweep period ("none" disables the task)
cleanup_interval = "1h"

# Run durable operations on a worker thread with bounded waits
concurrent = true

# Durable vector compression: "none" or "lz4"
compression = "none"

[cache.ttl_by_class]
# definition = "30d"
# narrative = "1d"

[cache.persistence]
enabled = false
# path = "/var/cache/embcache/embeddings.redb"
timeout = "250ms"

[cache.optimization]
# Any of "normalize", "reduce", "quantize"; quantize always runs last
techniques = []
reduction_ratio = 0.5

[cache.scoring]
age = 1.0
frequency = 1.0
recency = 1.0
quality = 1.0
class_bonus = 0.5
content_aware_bonus_factor = 4.0
ttl_pressure = 1.0
"#,
        level = defaults.level,
        timestamps = defaults.timestamps,
    );
    print!("{}", config);
}
