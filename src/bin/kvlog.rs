//! kvlog CLI
//!
//! Operates directly on a store directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kvlog::wal::WalRecovery;
use kvlog::{KvlogError, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// kvlog CLI
#[derive(Parser, Debug)]
#[command(name = "kvlog")]
#[command(about = "Durable, ordered key-value log")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./kvlog_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the write-ahead log without opening the store
    VerifyWal,

    #[command(flatten)]
    Data(DataCommands),
}

/// Commands that need an open store
#[derive(Subcommand, Debug)]
enum DataCommands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List entries in key order
    Scan {
        /// Only keys starting with this prefix
        #[arg(long, conflicts_with_all = ["start", "end"])]
        prefix: Option<String>,

        /// Inclusive lower bound
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Exclusive upper bound
        #[arg(long, requires = "start")]
        end: Option<String>,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,kvlog=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> kvlog::Result<ExitCode> {
    match args.command {
        Commands::VerifyWal => verify_wal(&args.data_dir),
        Commands::Data(command) => {
            let store = Store::open(&args.data_dir)?;
            let code = execute(&store, command)?;
            store.close()?;
            Ok(code)
        }
    }
}

fn verify_wal(data_dir: &Path) -> kvlog::Result<ExitCode> {
    let result = WalRecovery::verify(&data_dir.join("wal.log"))?;
    println!(
        "entries: {}  corrupted: {}  last_lsn: {}  torn_tail: {}",
        result.entries_recovered,
        result.entries_corrupted,
        result.last_lsn,
        result.was_truncated
    );
    Ok(if result.entries_corrupted == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn execute(store: &Store, command: DataCommands) -> kvlog::Result<ExitCode> {
    match command {
        DataCommands::Get { key } => match store.get(&key) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(KvlogError::KeyNotFound) => {
                eprintln!("(not found)");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e),
        },
        DataCommands::Put { key, value } => {
            store.put(&key, value.as_bytes())?;
            println!("OK");
        }
        DataCommands::Delete { key } => {
            store.delete(&key)?;
            println!("OK");
        }
        DataCommands::Scan {
            prefix,
            start,
            end,
            limit,
        } => {
            let entries = match (prefix, start, end) {
                (Some(prefix), _, _) => store.entries_with_prefix(&prefix),
                (None, Some(start), Some(end)) => store.entries_between(&start, &end),
                _ => store.entries(),
            };

            for entry in entries.take(limit.unwrap_or(usize::MAX)) {
                let (key, value) = entry?;
                println!("{}\t{}", key, String::from_utf8_lossy(&value));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
