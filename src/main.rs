//! Command-line front end for pagekv tables
//!
//! ```bash
//! pagekv --file users.tbl insert 1 alice
//! pagekv --file users.tbl range 0 100
//! RUST_LOG=debug pagekv --file users.tbl stats
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pagekv::{Database, EngineConfig, Key, TableResult, Value};

#[derive(Parser, Debug)]
#[command(name = "pagekv", version, about = "Page-organized B+ tree key/value tables")]
struct Args {
    /// Table file (created if missing)
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Engine configuration in JSON
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log engine activity (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert a new record
    #[command(allow_negative_numbers = true)]
    Insert { key: Key, value: String },

    /// Print the value stored under a key
    #[command(allow_negative_numbers = true)]
    Find { key: Key },

    /// Overwrite the value of an existing key
    #[command(allow_negative_numbers = true)]
    Update { key: Key, value: String },

    /// Remove a record
    #[command(allow_negative_numbers = true)]
    Delete { key: Key },

    /// Print every record with lo <= key <= hi
    #[command(allow_negative_numbers = true)]
    Range { lo: Key, hi: Key },

    /// Check the tree and print its shape
    Stats,

    /// Remove every record and free the tree's pages
    Destroy,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pagekv=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> TableResult<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    let mut db = Database::new(config)?;
    let table = db.open_table(&args.file)?;

    match args.command {
        Command::Insert { key, value } => {
            db.insert(table, key, Value::try_from(value.as_str())?)?;
            println!("inserted {key}");
        }
        Command::Find { key } => match db.find(table, key)? {
            Some(value) => println!("{key}\t{value}"),
            None => println!("{key} not found"),
        },
        Command::Update { key, value } => {
            db.update(table, key, Value::try_from(value.as_str())?)?;
            println!("updated {key}");
        }
        Command::Delete { key } => {
            let value = db.delete(table, key)?;
            println!("deleted {key}\t{value}");
        }
        Command::Range { lo, hi } => {
            let records = db.find_range(table, lo, hi)?;
            for (key, value) in &records {
                println!("{key}\t{value}");
            }
            println!("({} records)", records.len());
        }
        Command::Stats => {
            let stats = db.stats(table)?;
            println!("height:          {}", stats.height);
            println!("leaf pages:      {}", stats.leaf_count);
            println!("internal pages:  {}", stats.internal_count);
            println!("keys:            {}", stats.key_count);
        }
        Command::Destroy => {
            let freed = db.destroy(table)?;
            println!("freed {freed} pages");
        }
    }

    db.shutdown()
}
