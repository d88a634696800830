//! tripup: command-line host for the TripUp asset sync pipeline.
//!
//! Scans a library directory, imports new items into the encrypted cloud
//! library, applies server changes and downloads renditions on demand.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use tripup_app::{App, AppConfig};
use tripup_core::{AssetRepository, Quality};

/// Poll interval while waiting for the queues to drain.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Longest a command waits for queued work before exiting.
const IDLE_LIMIT: Duration = Duration::from_secs(30 * 60);

#[derive(Parser)]
#[command(name = "tripup")]
#[command(author, version, about = "Encrypted photo library sync for TripUp")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record new library items and import them when auto-backup is on
    Scan,

    /// Import specific assets and wait for the result
    Import {
        /// Library local identifiers or asset ids to import
        #[arg(required = true, num_args = 1..)]
        items: Vec<String>,
    },

    /// Run one background import pass within the configured deadline
    Backup,

    /// Delete assets locally, on the server and from the library
    Delete {
        /// Asset ids to delete
        #[arg(required = true, num_args = 1..)]
        ids: Vec<Uuid>,
    },

    /// Download and decrypt a rendition of an asset
    Download {
        /// Asset id
        id: Uuid,

        /// Rendition to fetch: "low" or "original"
        #[arg(short, long, default_value = "low")]
        quality: Quality,
    },

    /// Apply asset changes from the server
    Pull,

    /// Show pending work and reachability
    Status,
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "tripup=info,tripup_app=info,tripup_sync=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tripup=info,tripup_app=info,tripup_sync=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("tripup.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr so command output stays clean on stdout.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let app = App::open(&config).await?;
    if !matches!(cli.command, Commands::Status) {
        app.start().await?;
    }

    let result = execute(&app, cli.command).await;
    app.close().await?;
    result
}

async fn wait_idle(app: &App) {
    if !app.wait_idle(IDLE_POLL, IDLE_LIMIT).await {
        warn!("Work still outstanding, exiting anyway");
    }
}

/// Map command-line items to asset ids, accepting either form.
async fn resolve_assets(app: &App, items: &[String]) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        if let Ok(id) = item.parse::<Uuid>() {
            ids.push(id);
            continue;
        }
        match app.db.assets.find_by_local_identifier(item).await? {
            Some(id) => ids.push(id),
            None => anyhow::bail!("no asset for library item {} (run scan first)", item),
        }
    }
    Ok(ids)
}

async fn execute(app: &App, command: Commands) -> anyhow::Result<()> {
    let manager = &app.manager;
    match command {
        Commands::Scan => {
            let added = app.controller.sync_photo_library().await?;
            println!("Found {} new library item(s)", added.len());
            wait_idle(app).await;
            for id in added {
                if let Some(asset) = app.controller.asset(id).await? {
                    println!("{}  {:<7} imported={}", id, asset.asset_type, asset.imported);
                }
            }
        }

        Commands::Import { items } => {
            let ids = resolve_assets(app, &items).await?;
            let success = manager.priority_import(&ids).await?;
            if !success {
                anyhow::bail!("one or more assets failed to import");
            }
            println!("Imported {} asset(s)", ids.len());
        }

        Commands::Backup => {
            app.controller.sync_photo_library().await?;
            if manager.start_background_imports().await? {
                println!("Background import finished");
            } else {
                anyhow::bail!("background import did not finish in time");
            }
        }

        Commands::Delete { ids } => {
            manager.delete(&ids).await?;
            wait_idle(app).await;
            println!("Deleted {} asset(s)", ids.len());
        }

        Commands::Download { id, quality } => {
            if !manager.request_download(id, quality).await? {
                anyhow::bail!("download of {} ({}) failed", id, quality);
            }
            let path = manager.context().paths.local_path(id, quality);
            println!("{}", path.display());
        }

        Commands::Pull => {
            let summary = app.controller.apply_server_changes().await?;
            println!(
                "added={} updated={} deleted={}",
                summary.added, summary.updated, summary.deleted
            );
            wait_idle(app).await;
        }

        Commands::Status => {
            let assets = &app.db.assets;
            let last_sync = assets
                .last_server_sync()
                .await?
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let status = app.monitor.probe().await;
            println!("unimported:        {}", assets.unimported_ids().await?.len());
            println!("pending deletes:   {}", assets.deleted_pending_ids().await?.len());
            println!("pending originals: {}", assets.missing_original_ids().await?.len());
            println!("last server sync:  {}", last_sync);
            println!("network:           {}", status.network_available);
        }
    }
    Ok(())
}
