use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tvguide::{GuideConfig, ProgramStore, load_files};
use tvserver::ServerBuilder;
use tvviewers::{ViewersContext, ViewersExt};

/// Fichiers produits par les scrapers, dans le répertoire courant
const DEFAULT_LISTINGS: [&str; 3] = [
    "tv_programs_BBC.txt",
    "tv_programs_Disc.txt",
    "tv_programs_NatGeo.txt",
];

#[derive(Debug, Parser)]
#[command(
    name = "tvpulse",
    about = "Live TV viewer counts and now-playing programs over HTTP, SSE and webhooks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP service (default).
    Serve,

    /// Load scraped listing files into the program guide database.
    Load {
        /// Listing files (defaults to the three channel files in the current directory)
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Load { files } => load(files).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let mut server = ServerBuilder::new_configured().build();
    server.init_logging().await;

    server
        .add_route("/info", || async {
            serde_json::json!({"service": "tvpulse", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    let config = tvconfig::get_config();
    let ctx = Arc::new(
        ViewersContext::from_config(&config).context("Failed to initialize viewer engine")?,
    );
    let loops = server.init_viewers(ctx).await?;

    info!("🌐 Starting HTTP server...");
    server.start().await;

    info!("✅ TVPulse is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    // Le jeton d'arrêt du serveur a été annulé : les boucles se terminent
    loops.join().await;
    info!("TVPulse stopped");
    Ok(())
}

async fn load(files: Vec<PathBuf>) -> anyhow::Result<()> {
    let _log_state = tvserver::logs::init_logging();

    let config = tvconfig::get_config();
    let guide = GuideConfig::from_config(&config)?;
    let files = if files.is_empty() {
        DEFAULT_LISTINGS.iter().map(PathBuf::from).collect()
    } else {
        files
    };

    info!(database = %guide.database_path.display(), files = files.len(), "Loading listings");
    let report = tokio::task::spawn_blocking(move || -> tvguide::Result<_> {
        let mut store = ProgramStore::open(&guide.database_path)?;
        load_files(&mut store, &files, &guide)
    })
    .await??;

    if report.files_loaded == 0 {
        warn!("No listing file loaded");
    }
    info!(
        files_loaded = report.files_loaded,
        files_skipped = report.files_skipped,
        programs = report.programs_upserted,
        schedules = report.schedules_inserted,
        "Data inserted"
    );
    Ok(())
}
