//! Diagnostics for orange-store data files
//!
//! ```bash
//! # Validate a heap file and list its blocks
//! orange-store alloc-check data/strings.heap
//!
//! # Validate an index under the configured data directory
//! orange-store --config store.json -vv index-check users_id
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::{debug, error};
use prettytable::{Table, row};

use orange_store::{FileAllocator, Storage, StorageConfig, StorageError, StorageResult};

/// Inspect and validate orange-store files
#[derive(Parser, Debug)]
#[command(name = "orange-store", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a heap file and print its block table
    AllocCheck {
        /// Path of the heap file
        file: PathBuf,
    },
    /// Validate an index in the data directory and print its shape
    IndexCheck {
        /// Index name
        name: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether the checked structure is consistent
fn run(args: Args) -> StorageResult<bool> {
    let config = match &args.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    debug!("using {:?}", config);

    match args.command {
        Command::AllocCheck { file } => alloc_check(file),
        Command::IndexCheck { name } => index_check(config, &name),
    }
}

fn alloc_check(file: PathBuf) -> StorageResult<bool> {
    if !file.exists() {
        return Err(StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", file.display()),
        )));
    }
    let mut allocator = FileAllocator::open(&file)?;

    match allocator.blocks() {
        Ok(blocks) => {
            let mut table = Table::new();
            table.add_row(row!["Offset", "Size", "State"]);
            for block in &blocks {
                let state = if block.allocated { "allocated" } else { "free" };
                table.add_row(row![block.offset, block.size, state]);
            }
            table.printstd();

            let used: u64 = blocks
                .iter()
                .filter(|b| b.allocated)
                .map(|b| b.size as u64)
                .sum();
            println!("{} blocks, {} bytes allocated: OK", blocks.len(), used);
            Ok(true)
        }
        Err(e) => {
            println!("{}: CORRUPTED ({})", file.display(), e);
            Ok(false)
        }
    }
}

fn index_check(config: StorageConfig, name: &str) -> StorageResult<bool> {
    let mut storage = Storage::open(config)?;
    storage.open_index(name)?;

    match storage.check_index(name) {
        Ok(stats) => {
            let mut table = Table::new();
            table.add_row(row!["Index", "Height", "Entries", "Degree", "Key width"]);
            table.add_row(row![
                name,
                stats.height,
                stats.entries,
                stats.degree,
                stats.key_width
            ]);
            table.printstd();
            println!("{}: OK", name);
            Ok(true)
        }
        Err(e) => {
            println!("{}: CORRUPTED ({})", name, e);
            Ok(false)
        }
    }
}
