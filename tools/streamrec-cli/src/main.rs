//! streamrec CLI: record snapshots and video segments from a live stream.
//!
//! Usage:
//!   streamrec record <URI> [OPTIONS]   Record until Ctrl+C
//!   streamrec check                    Check the media engine installation
//!   streamrec config [--write]         Show or save the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use streamrec_common::config::AppConfig;
use streamrec_common::formats::{ImageFormat, VideoContainer};

mod commands;

#[derive(Parser)]
#[command(
    name = "streamrec",
    about = "Periodic snapshots and rotating video segments from live streams",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/streamrec/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a stream until Ctrl+C
    Record {
        /// Stream URI, e.g. rtsp://camera/live
        uri: String,

        /// Take periodic snapshots
        #[arg(long)]
        snapshots: bool,

        /// Record rotating video segments
        #[arg(long)]
        video: bool,

        /// Snapshot output directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        /// Video output directory
        #[arg(long)]
        video_dir: Option<PathBuf>,

        /// Seconds between snapshots
        #[arg(long)]
        snapshot_interval: Option<u64>,

        /// Minutes per video segment
        #[arg(long)]
        segment_minutes: Option<u64>,

        /// Snapshot format: png|jpg
        #[arg(long)]
        image_format: Option<ImageFormat>,

        /// Video container: mp4|avi|mkv
        #[arg(long)]
        container: Option<VideoContainer>,

        /// Do not render the stream live
        #[arg(long)]
        no_display: bool,
    },

    /// Check the media engine and required elements
    Check,

    /// Print the effective configuration
    Config {
        /// Save it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    streamrec_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            uri,
            snapshots,
            video,
            snapshot_dir,
            video_dir,
            snapshot_interval,
            segment_minutes,
            image_format,
            container,
            no_display,
        } => {
            commands::record::run(
                config,
                commands::record::RecordArgs {
                    uri,
                    snapshots,
                    video,
                    snapshot_dir,
                    video_dir,
                    snapshot_interval,
                    segment_minutes,
                    image_format,
                    container,
                    display: !no_display,
                },
            )
            .await
        }
        Commands::Check => commands::check::run(&config),
        Commands::Config { write } => commands::config::run(&config, write, cli.config),
    }
}
