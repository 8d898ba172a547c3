use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frame_dashboard::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "frame-dashboard", about = "Random photo slideshow over remote libraries")]
struct Cli {
    /// Settings file (defaults to ./frame-dashboard.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync all sources in the background and run the slideshow until Ctrl-C
    Run {
        /// Seconds per image (overrides settings)
        #[arg(long)]
        interval: Option<u64>,
        /// Show the filename under each image
        #[arg(long)]
        show_filename: bool,
    },
    /// Sync one source, or every active source, in the foreground
    Sync {
        #[arg(long)]
        source: Option<i64>,
    },
    /// List sources with item counts
    Sources,
    /// Connect an object-storage bucket
    AddBucket {
        #[arg(long)]
        key_id: String,
        #[arg(long)]
        application_key: String,
        #[arg(long)]
        bucket: String,
    },
    /// Connect a photo-library account from a saved OAuth token file
    AddPhotos {
        /// Account email
        #[arg(long)]
        label: String,
        #[arg(long)]
        token_json: PathBuf,
    },
    /// Deactivate a source and delete its catalog items
    RemoveSource { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let app = cli::App::build(&settings)?;

    match args.command.unwrap_or(Commands::Run {
        interval: None,
        show_filename: false,
    }) {
        Commands::Run {
            interval,
            show_filename,
        } => cli::run(&app, &settings, interval, show_filename).await,
        Commands::Sync { source } => cli::sync(&app, source).await,
        Commands::Sources => cli::sources(&app),
        Commands::AddBucket {
            key_id,
            application_key,
            bucket,
        } => cli::add_bucket(&app, &key_id, &application_key, &bucket),
        Commands::AddPhotos { label, token_json } => cli::add_photos(&app, &label, &token_json).await,
        Commands::RemoveSource { id } => cli::remove_source(&app, id),
    }
}
