//! ISCADB CLI
//!
//! Command-line tools for ISCADB table files.
//!
//! # Commands
//!
//! - `init` - create or load every table declared in a JSON config
//! - `count` - print the record count of a table
//! - `write` - append one `{id, name, score}` row
//! - `read` - print the record at an index
//! - `encrypt` / `decrypt` - run a crypto pass over a record's name slot
//! - `add-field` - extend the schema online
//! - `backup` - archive the table file

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use iscadb_core::{
    CompletionQueue, CryptoOp, DatabaseConfig, FieldDef, Initializer, ManagerConfig, Table,
    TableManager,
};
use tracing_subscriber::EnvFilter;

/// ISCADB command-line database tools.
#[derive(Parser)]
#[command(name = "iscadb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the table file (all commands except `init`)
    #[arg(global = true, short, long)]
    table: Option<PathBuf>,

    /// Worker threads for task dispatch
    #[arg(global = true, short, long, default_value = "4")]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or load every table declared in a JSON config
    Init {
        /// Path to the JSON configuration document
        #[arg(short, long)]
        config: PathBuf,

        /// Database root directory
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Print the record count
    Count,

    /// Append one {id, name, score} row
    Write {
        /// Record id
        #[arg(long)]
        id: i32,

        /// Name payload
        #[arg(long)]
        name: String,

        /// Score payload
        #[arg(long)]
        score: f32,
    },

    /// Print the record at an index
    Read {
        /// Record index
        #[arg(long)]
        index: usize,
    },

    /// Encrypt the name slot of a record in place
    Encrypt {
        /// Record index
        #[arg(long)]
        index: usize,
    },

    /// Decrypt the name slot of a record in place
    Decrypt {
        /// Record index
        #[arg(long)]
        index: usize,
    },

    /// Append a new field to the schema, migrating existing records
    AddField {
        /// Field name
        #[arg(long)]
        name: String,

        /// Field type
        #[arg(long, value_enum)]
        field_type: CliFieldType,

        /// Slot width in bytes (text fields only)
        #[arg(long, default_value = "32")]
        value_len: usize,
    },

    /// Archive the table file
    Backup {
        /// Destination archive path
        #[arg(short, long)]
        dest: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFieldType {
    Int,
    Float,
    String,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { config, root } => run_init(&config, &root),
        command => run_table_command(cli.table, cli.workers, command),
    }
}

fn run_init(config_path: &Path, root: &Path) -> Result<(), Box<dyn Error>> {
    let config = DatabaseConfig::from_json_file(config_path)?;
    let initializer = Initializer::new(root)?;
    let tables = initializer.initialize(&config.tables)?;

    if tables.is_empty() {
        return Err("no tables could be initialized".into());
    }
    for (alias, table) in &tables {
        println!(
            "{alias}: {} fields, {} records",
            table.fields().len(),
            table.record_count()?
        );
        table.close()?;
    }
    Ok(())
}

fn run_table_command(
    table_path: Option<PathBuf>,
    workers: usize,
    command: Commands,
) -> Result<(), Box<dyn Error>> {
    let path = table_path.ok_or("--table is required for this command")?;
    let table = Arc::new(Table::load(&path)?);

    let completions = CompletionQueue::new();
    let manager = TableManager::new(
        Arc::clone(&table),
        ManagerConfig::new()
            .worker_threads(workers)
            .completions(completions.sink()),
    );

    match command {
        Commands::Count => {
            println!("{}", manager.record_count()?);
        }
        Commands::Write { id, name, score } => {
            manager.submit_write(id, name, score, |ok, id| {
                println!("write {id}: {}", if ok { "ok" } else { "FAILED" });
            });
        }
        Commands::Read { index } => {
            manager.submit_read(index, move |ok, record| {
                if !ok {
                    println!("read {index}: FAILED");
                    return;
                }
                for (name, value) in &record {
                    println!("{name} = {value:?}");
                }
            });
        }
        Commands::Encrypt { index } => {
            manager.submit_crypto(index, CryptoOp::Encrypt, |ok, index| {
                println!("encrypt {index}: {}", if ok { "ok" } else { "FAILED" });
            });
        }
        Commands::Decrypt { index } => {
            manager.submit_crypto(index, CryptoOp::Decrypt, |ok, index| {
                println!("decrypt {index}: {}", if ok { "ok" } else { "FAILED" });
            });
        }
        Commands::AddField {
            name,
            field_type,
            value_len,
        } => {
            let field = match field_type {
                CliFieldType::Int => FieldDef::int32(name),
                CliFieldType::Float => FieldDef::float32(name),
                CliFieldType::String => FieldDef::text(name, value_len),
            };
            manager.submit_modify_field(field, |ok, name| {
                println!("add-field {name}: {}", if ok { "ok" } else { "FAILED" });
            });
        }
        Commands::Backup { dest } => {
            manager.submit_backup(dest, |ok, dest| {
                println!(
                    "backup to {}: {}",
                    dest.display(),
                    if ok { "ok" } else { "FAILED" }
                );
            });
        }
        Commands::Init { .. } => unreachable!("handled by caller"),
    }

    manager.wait_for_all();
    completions.pump();
    table.close()?;
    Ok(())
}
