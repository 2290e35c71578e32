//! procshare command line tool.
//!
//! Inspects and drives a shared store from the shell:
//! 1. Parses command-line arguments and environment
//! 2. Initializes logging (stderr, `RUST_LOG` override)
//! 3. Runs one subcommand against the store
//!
//! Also serves as the second process in the multi-process tests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use procshare_provider::PersistentDataProvider;
use procshare_provider::provider::{SHARER_CAPACITY, SHARER_NAME};
use procshare_store::{DataSharer, ProcessLock, SharerConfig, Value, ValueType};
use serde::Serialize;

/// Command line configuration.
#[derive(Debug, Parser)]
#[command(
    name = "procshare",
    about = "Inspect and update a cross-process shared store",
    version
)]
struct Cli {
    /// Directory holding the store files
    #[arg(long, global = true, env = "PROCSHARE_DIR", default_value = ".")]
    dir: PathBuf,

    /// Store name
    #[arg(long, global = true, env = "PROCSHARE_NAME", default_value = SHARER_NAME)]
    name: String,

    /// Capacity used when the store is created
    #[arg(long, global = true, env = "PROCSHARE_CAPACITY", default_value_t = SHARER_CAPACITY)]
    capacity: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value stored under a key
    Get {
        key: String,
        /// Require this value type
        #[arg(long)]
        kind: Option<ValueType>,
    },
    /// Store a value
    Put {
        key: String,
        value: String,
        /// Value type
        #[arg(long, default_value = "string")]
        kind: ValueType,
    },
    /// Increment a long counter, printing each previous value
    Incr {
        key: String,
        #[arg(long, default_value_t = 1)]
        delta: i64,
        #[arg(long, default_value_t = 1)]
        times: u32,
        /// Append values to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Reserve event sequence ids
    Seq {
        event_type: String,
        #[arg(long, default_value_t = 1)]
        times: u32,
    },
    /// Acquire the store lock and hold it until killed
    HoldLock {
        /// Created once the lock is held
        #[arg(long)]
        ready_file: Option<PathBuf>,
    },
    /// Print all entries
    Dump {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct Snapshot {
    stats: procshare_store::SharerStats,
    entries: Vec<procshare_store::Entry>,
}

impl Cli {
    fn store_config(&self) -> SharerConfig {
        SharerConfig::new(&self.dir, self.name.clone()).with_capacity(self.capacity)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.store_config();
    config.validate()?;
    tracing::debug!("store {} in {}", config.name, config.dir.display());

    match cli.command {
        Command::Get { key, kind } => {
            let sharer = DataSharer::open(config)?;
            let Some(value) = sharer.get(&key)? else {
                bail!("key not found: {key}");
            };
            if let Some(kind) = kind
                && value.value_type() != kind
            {
                bail!("{key} holds a {}, not a {kind}", value.value_type());
            }
            println!("{value}");
        }
        Command::Put { key, value, kind } => {
            let sharer = DataSharer::open(config)?;
            let value = Value::parse(kind, &value).map_err(anyhow::Error::msg)?;
            sharer.put(&key, value)?;
        }
        Command::Incr {
            key,
            delta,
            times,
            output,
        } => {
            let sharer = DataSharer::open(config)?;
            let mut sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .with_context(|| format!("opening {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout()),
            };
            for _ in 0..times {
                let previous = sharer.get_and_increment(&key, delta)?;
                writeln!(sink, "{previous}")?;
                sink.flush()?;
            }
        }
        Command::Seq { event_type, times } => {
            let provider = PersistentDataProvider::with_config(config)?;
            for _ in 0..times {
                let id = provider.get_and_increment(&event_type)?;
                println!("{} {}", id.global_id, id.event_type_id);
            }
        }
        Command::HoldLock { ready_file } => {
            let lock = ProcessLock::new(config.lock_path());
            lock.lock()?;
            tracing::info!("holding {}", lock.path().display());
            if let Some(path) = ready_file {
                std::fs::write(&path, std::process::id().to_string())
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            loop {
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        Command::Dump { json } => {
            let sharer = DataSharer::open(config)?;
            let snapshot = Snapshot {
                stats: sharer.stats()?,
                entries: sharer.entries()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!(
                    "capacity={} entries={} token={} slot_size={}",
                    snapshot.stats.capacity,
                    snapshot.stats.entry_count,
                    snapshot.stats.modification_token,
                    snapshot.stats.slot_size
                );
                for entry in &snapshot.entries {
                    println!(
                        "{}\t{}\t{}",
                        entry.key,
                        entry.value.value_type(),
                        entry.value
                    );
                }
            }
        }
    }

    Ok(())
}
