//! shardstore CLI
//!
//! Command-line interface for inspecting and maintaining a store directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use shardstore::{Config, Engine, StoreError};

/// shardstore CLI
#[derive(Parser, Debug)]
#[command(name = "shardstore-cli")]
#[command(about = "Inspect and maintain an embedded shardstore directory")]
#[command(version)]
struct Args {
    /// Store root directory
    #[arg(short, long, default_value = "./shardstore_data")]
    root: String,

    /// Max records per block file
    #[arg(short, long, default_value = "2000")]
    max_records_per_file: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a record by id
    Get {
        /// The record id
        id: String,
    },

    /// Insert a record (value is a JSON document)
    Insert {
        /// The record id
        id: String,

        /// The JSON document to store
        json: String,
    },

    /// Update a record (value is a JSON document)
    Update {
        /// The record id
        id: String,

        /// The replacement JSON document
        json: String,
    },

    /// Delete a record by id
    Del {
        /// The record id
        id: String,
    },

    /// List records, newest first
    List {
        /// Page size
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Records to skip
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Print store statistics
    Stats,

    /// Delete every record, keeping the directory skeleton
    Clear,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardstore=debug"));

    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), StoreError> {
    let config = Config::builder()
        .root_dir(&args.root)
        .max_records_per_file(args.max_records_per_file)
        .build();
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { id } => {
            let record = engine.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Insert { id, json } => {
            let data = serde_json::from_str(&json)?;
            let record = engine.insert(&id, data)?;
            println!("inserted {} (hash {})", record.id, record.hash);
        }
        Commands::Update { id, json } => {
            let data = serde_json::from_str(&json)?;
            let record = engine.update(&id, data)?;
            println!("updated {} (hash {})", record.id, record.hash);
        }
        Commands::Del { id } => {
            engine.delete(&id)?;
            println!("deleted {}", id);
        }
        Commands::List { limit, offset } => {
            for record in engine.list_page(limit, offset)? {
                println!("{}  {}", record.id, record.data);
            }
        }
        Commands::Stats => {
            println!("root:    {}", engine.root_dir().display());
            println!("shards:  {}", engine.shard_count()?);
            println!("records: {}", engine.record_count()?);
        }
        Commands::Clear => {
            engine.clear()?;
            println!("store cleared");
        }
    }

    Ok(())
}
