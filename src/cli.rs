use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vodforge")]
#[command(author, version, about = "Video ingest pipeline: multipart uploads and HLS transcoding")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and the transcode workers
    Start {
        /// Host to bind to (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a media file and display duration and video metadata
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that ffmpeg and ffprobe are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
