//! `pgkit` CLI entry-point.
//!
//! Available sub-commands:
//! - `ping`: check that the database answers.
//! - `dev init-db`: run the schema files, then migrations.
//! - `dev reset-db`: drop and recreate the application schema, then init.
//! - `migrate up`: run pending database migrations.
//! - `migrate create`: write a new reversible migration pair.
//! - `migrate reset`: revert every applied migration.
//! - `lock`: take and release an advisory lock.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pg::{lock::lock_key, Db, PgConfig, PgStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod migration;
mod schema;

#[derive(Parser)]
#[command(
    name = "pgkit",
    about = "Schema, migration and diagnostic commands for the Postgres data layer",
    version
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Command,
}

/// Connection settings. Each flag falls back to its environment variable.
#[derive(Args)]
struct ConnArgs {
    #[arg(long, env = "POSTGRES_HOST", global = true)]
    host: Option<String>,
    #[arg(long, env = "POSTGRES_PORT", global = true)]
    port: Option<String>,
    #[arg(long, env = "POSTGRES_USER", global = true)]
    user: Option<String>,
    #[arg(long, env = "POSTGRES_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
    #[arg(long, env = "POSTGRES_DB", global = true)]
    database: Option<String>,
}

impl ConnArgs {
    fn config(&self) -> Result<PgConfig> {
        let config = PgConfig::from_lookup(|key| {
            let flag = match key {
                "POSTGRES_HOST" => self.host.clone(),
                "POSTGRES_PORT" => self.port.clone(),
                "POSTGRES_USER" => self.user.clone(),
                "POSTGRES_PASSWORD" => self.password.clone(),
                "POSTGRES_DB" => self.database.clone(),
                _ => None,
            };
            flag.or_else(|| std::env::var(key).ok())
        })?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Check that the database answers.
    Ping,
    /// Developer database commands.
    #[command(subcommand)]
    Dev(DevCommand),
    /// Database migrations.
    Migrate(MigrateArgs),
    /// Take and release a transaction-scoped advisory lock.
    Lock { key1: String, key2: String },
}

#[derive(Subcommand)]
enum DevCommand {
    /// Run the schema files by phase, then migrations.
    InitDb(InitArgs),
    /// Drop and recreate the application schema, then init.
    ResetDb {
        #[command(flatten)]
        init: InitArgs,
        /// Schema to recreate. Defaults to POSTGRES_SCHEMA, then `private`.
        #[arg(long)]
        schema: Option<String>,
    },
}

#[derive(Args)]
struct MigrateArgs {
    #[arg(long, default_value = "migrations", global = true)]
    dir: PathBuf,

    #[command(subcommand)]
    command: MigrateCommand,
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Apply every pending migration.
    Up,
    /// Write `<timestamp>_<name>.up.sql` and `.down.sql`.
    Create { name: String },
    /// Revert every applied migration.
    Reset,
}

#[derive(Args)]
struct InitArgs {
    #[arg(long, default_value = "schema")]
    schema_dir: PathBuf,
    #[arg(long, default_value = "migrations")]
    migrations: PathBuf,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Migrate(MigrateArgs {
        dir,
        command: MigrateCommand::Create { name },
    }) = &cli.command
    {
        migration::create(dir, name, chrono::Utc::now())?;
        return Ok(());
    }

    let mut config = cli.conn.config().context("invalid database settings")?;
    if matches!(cli.command, Command::Dev(_)) {
        // Session settings such as search_path must stick to one connection.
        config.max_connections = 1;
    }

    let store = Arc::new(PgStore::connect(&config).await?);
    let db = Db::new(store.clone(), config.environment);

    let result = run(cli.command, &db, &store, &config).await;
    db.close().await;
    result
}

async fn run(command: Command, db: &Db, store: &PgStore, config: &PgConfig) -> Result<()> {
    match command {
        Command::Ping => {
            db.ping().await?;
            info!("Database is reachable");
        }
        Command::Dev(DevCommand::InitDb(args)) => {
            schema::init(db, store.pool(), &args.schema_dir, &args.migrations).await?;
            info!("Database initialised");
        }
        Command::Dev(DevCommand::ResetDb { init, schema }) => {
            refuse_online(config)?;
            let schema = schema
                .or_else(|| config.schema.clone())
                .unwrap_or_else(|| "private".to_owned());
            schema::reset(db, &schema).await?;
            schema::init(db, store.pool(), &init.schema_dir, &init.migrations).await?;
            info!("Database reset");
        }
        Command::Migrate(MigrateArgs { dir, command }) => match command {
            MigrateCommand::Up => {
                pg::pool::run_migrations(store.pool(), &dir).await?;
                info!("Migrations applied successfully");
            }
            MigrateCommand::Reset => {
                refuse_online(config)?;
                pg::pool::undo_migrations(store.pool(), &dir, 0).await?;
                info!("Migrations reverted");
            }
            MigrateCommand::Create { .. } => {}
        },
        Command::Lock { key1, key2 } => {
            info!(
                "Locking ({key1}, {key2}) as ({}, {})",
                lock_key(&key1),
                lock_key(&key2)
            );
            db.lock(&db.empty_tx(), &key1, &key2).await?;
            info!("Lock acquired and released");
        }
    }
    Ok(())
}

fn refuse_online(config: &PgConfig) -> Result<()> {
    anyhow::ensure!(
        !config.environment.is_online(),
        "refusing to reset a {:?} database",
        config.environment
    );
    Ok(())
}
