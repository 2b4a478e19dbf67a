//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::backup::{BackupService, ConsistencyChecker};
use crate::config::Settings;
use crate::embedder::HashEmbedder;
use crate::models::BackupType;
use crate::repository::{migrations, DbContext};
use crate::vector::VectorIndex;

#[derive(Parser)]
#[command(name = "refbase", about = "Scholarly PDF ingestion and retrieval system", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion server.
    Serve {
        /// Listen address override.
        #[arg(long)]
        host: Option<String>,
        /// Listen port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create the data directory and run migrations.
    Init,
    /// Backup operations.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Cross-store consistency operations.
    Consistency {
        #[command(subcommand)]
        action: ConsistencyAction,
    },
    /// Show resolved configuration and store counts.
    Status,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Create a backup now.
    Trigger {
        /// snapshot | full | incremental | unified
        #[arg(long, default_value = "snapshot")]
        backup_type: String,
    },
    /// List recorded backups.
    List,
    /// Verify a backup artifact against its recorded checksum.
    Verify { backup_id: String },
}

#[derive(Subcommand)]
enum ConsistencyAction {
    /// Compare the relational and vector stores.
    Check,
    /// Apply the safe auto-fix policy.
    Fix,
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            let mut settings = settings;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            crate::server::serve(&settings).await
        }
        Command::Init => init(&settings).await,
        Command::Backup { action } => backup(&settings, action).await,
        Command::Consistency { action } => consistency(&settings, action).await,
        Command::Status => status(&settings).await,
    }
}

async fn init(settings: &Settings) -> anyhow::Result<()> {
    let paths = settings.data_layout();
    paths.ensure_directories()?;
    migrations::run_migrations(&settings.database_url()).await?;
    println!("Initialized data directory at {}", paths.root().display());
    Ok(())
}

fn backup_service(settings: &Settings) -> BackupService {
    let paths = settings.data_layout();
    let ctx = DbContext::from_path(&paths.database_path());
    BackupService::new(paths, ctx.backups(), settings.backup.clone())
}

async fn backup(settings: &Settings, action: BackupAction) -> anyhow::Result<()> {
    migrations::run_migrations(&settings.database_url()).await?;
    let service = backup_service(settings);

    match action {
        BackupAction::Trigger { backup_type } => {
            let backup_type = BackupType::from_str(&backup_type)
                .ok_or_else(|| anyhow::anyhow!("unknown backup type '{}'", backup_type))?;
            let record = service.create(backup_type).await?;
            println!(
                "Created {} backup {} ({} bytes)",
                record.backup_type.as_str(),
                record.backup_id,
                record.size_bytes
            );
        }
        BackupAction::List => {
            for record in service.records().list().await? {
                println!(
                    "{}  {:<11} {:<8} {:>12}  expires {}",
                    record.backup_id,
                    record.backup_type.as_str(),
                    record.status.as_str(),
                    record.size_bytes,
                    record.expire_date.format("%Y-%m-%d")
                );
            }
        }
        BackupAction::Verify { backup_id } => {
            if service.verify(&backup_id).await? {
                println!("Backup {} verified", backup_id);
            } else {
                anyhow::bail!("backup {} FAILED verification", backup_id);
            }
        }
    }
    Ok(())
}

async fn consistency(settings: &Settings, action: ConsistencyAction) -> anyhow::Result<()> {
    migrations::run_migrations(&settings.database_url()).await?;
    let paths = settings.data_layout();
    let ctx = DbContext::from_path(&paths.database_path());
    let vectors = std::sync::Arc::new(VectorIndex::open(&paths.vector_dir())?);
    let embedder = std::sync::Arc::new(HashEmbedder::default());
    let checker = ConsistencyChecker::new(ctx.papers(), vectors, embedder);

    match action {
        ConsistencyAction::Check => {
            let report = checker.check().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ConsistencyAction::Fix => {
            let summary = checker.fix_safe().await?;
            println!(
                "fixed: {}, failed: {}, skipped: {}",
                summary.fixed, summary.failed, summary.skipped
            );
        }
    }
    Ok(())
}

async fn status(settings: &Settings) -> anyhow::Result<()> {
    let paths = settings.data_layout();
    println!("data dir:     {}", paths.root().display());
    println!("database:     {}", paths.database_path().display());
    println!("listen:       {}:{}", settings.host, settings.port);
    println!("workers:      {}", settings.max_concurrent);
    println!("queue bound:  {}", settings.max_queue_size);

    if paths.database_path().exists() {
        migrations::run_migrations(&settings.database_url()).await?;
        let ctx = DbContext::from_path(&paths.database_path());
        println!("papers:       {}", ctx.papers().count().await?);
        let vectors = VectorIndex::open(&paths.vector_dir())?;
        println!("vectors:      {}", vectors.len().await);
    } else {
        println!("papers:       (not initialized)");
    }
    Ok(())
}
