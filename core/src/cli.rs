use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db;
use crate::engine::ScriptEngine;
use crate::interpreter::MemoryInterpreterFactory;
use crate::logging;
use crate::scope::Scope;
use crate::stored::{LibraryVersion, LoadReport};
use crate::types::ScriptValue;

#[derive(Parser)]
#[command(name = "scriptpool")]
#[command(about = "Scriptpool - pooled script contexts with stored functions", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Manage stored functions
    Stored {
        #[command(subcommand)]
        command: StoredCommands,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
pub enum StoredCommands {
    /// List the stored functions of a database
    List {
        /// Logical database name
        #[arg(long)]
        db: String,
    },

    /// Create or replace a stored function
    Set {
        #[arg(long)]
        db: String,

        #[arg(long)]
        name: String,

        /// Function source
        #[arg(long)]
        code: String,
    },

    /// Remove a stored function
    Remove {
        #[arg(long)]
        db: String,

        #[arg(long)]
        name: String,
    },

    /// Load a database's stored functions into a fresh context and report
    /// which of them bind
    Verify {
        #[arg(long)]
        db: String,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load config before any command runs so config errors surface first
    let config = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config.map(PathBuf::from))
        .build()?;
    logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            println!("Running migrations...");
            db::migrate(&pool).await?;
            println!("Migrations complete!");
        }

        Commands::Stored { command } => {
            let pool = db::create_pool(&config.database).await?;
            let version = LibraryVersion::global();
            run_stored(command, pool, version, &config).await?;
        }
    }

    Ok(())
}

async fn run_stored(
    command: StoredCommands,
    pool: sqlx::PgPool,
    version: Arc<LibraryVersion>,
    config: &Config,
) -> Result<()> {
    match command {
        StoredCommands::List { db } => {
            let rows = db::list_stored_functions(&pool, &db).await?;
            if rows.is_empty() {
                println!("No stored functions in {}", db);
                return Ok(());
            }

            println!("Found {} stored function(s) in {}:\n", rows.len(), db);
            for row in rows {
                let value = row
                    .value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<missing>".to_string());
                println!("  {} | {} | {}", row.name, row.updated_at, value);
            }
        }

        StoredCommands::Set { db, name, code } => {
            db::save_stored_function(&pool, &version, &db, &name, &ScriptValue::Code(code))
                .await?;
            println!("✓ Stored function {}.{} saved", db, name);
        }

        StoredCommands::Remove { db, name } => {
            if db::remove_stored_function(&pool, &version, &db, &name).await? {
                println!("✓ Stored function {}.{} removed", db, name);
            } else {
                eprintln!("Stored function {}.{} not found", db, name);
                std::process::exit(1);
            }
        }

        StoredCommands::Verify { db } => {
            let source = db::PgStoredFunctions::from_current(pool)?;
            let engine = ScriptEngine::new(Arc::new(MemoryInterpreterFactory::new()), Arc::new(source))
                .with_version(version)
                .with_pool_settings(config.pool);

            let report = tokio::task::spawn_blocking(move || -> Result<LoadReport> {
                let mut ctx = engine.new_context()?;
                ctx.set_local_db(&db);
                ctx.load_stored(false)
                    .with_context(|| format!("Failed to load stored functions of {}", db))
            })
            .await
            .context("Verification task panicked")??;

            print_report(&report);
        }
    }

    Ok(())
}

fn print_report(report: &LoadReport) {
    match report {
        LoadReport::NotConnected => println!("Context is not bound to a database"),
        LoadReport::UpToDate => println!("Stored functions already up to date"),
        LoadReport::Reloaded {
            version,
            bound,
            failed,
            removed: _,
        } => {
            println!("Loaded library version {}", version);
            for name in bound {
                println!("  ✓ {}", name);
            }
            for name in failed {
                println!("  ✗ {}", name);
            }
            if !failed.is_empty() {
                println!("\n{} stored function(s) failed to bind", failed.len());
            }
        }
    }
}
