use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tvplay", version, about = "Resolve, fetch and frame-rate-match hosted video")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to <config dir>/tvplay/config.toml)
    #[arg(short, long, global = true, env = "TVPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the direct media URLs of a video as JSON
    Resolve {
        /// Watch URL, short link or bare video id
        url: String,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Download the streams of a URL, matching the display while it runs
    Fetch {
        /// Watch URL, video id or direct media URL
        url: String,

        /// Output file for the video stream
        #[arg(short, long)]
        output: PathBuf,

        /// Output file for a separate audio stream (defaults to <output>.audio)
        #[arg(long)]
        audio_output: Option<PathBuf>,
    },

    /// Report the frame rate of a video and the display mode it would use
    AfrProbe {
        /// Watch URL, video id or direct media URL
        url: String,
    },
}

/// Where a separate audio stream goes when the video is written to `output`.
pub fn audio_output_path(output: &Path, audio_output: Option<&Path>) -> PathBuf {
    match audio_output {
        Some(path) => path.to_path_buf(),
        None => {
            let mut path = output.as_os_str().to_owned();
            path.push(".audio");
            PathBuf::from(path)
        }
    }
}
