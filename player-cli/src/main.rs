use std::path::Path;
use std::process;

use afr_engine::pick_best_mode;
use anyhow::Context;
use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use tvplay::cli::{Args, Commands, audio_output_path};
use tvplay::{AppConfig, AudioSink, PlaybackSession, StaticDisplay, TvplayError};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    init_logging(args.verbose, args.quiet);

    let config = AppConfig::load(args.config.as_deref())?;
    let session = PlaybackSession::new(&config)?;

    match args.command {
        Commands::Resolve { url, pretty } => {
            let source = session
                .resolve(&url)
                .await
                .ok_or_else(|| TvplayError::NoSource(url.clone()))?;
            let json = if pretty {
                serde_json::to_string_pretty(&source)?
            } else {
                serde_json::to_string(&source)?
            };
            println!("{json}");
        }

        Commands::Fetch {
            url,
            output,
            audio_output,
        } => {
            let source = session
                .resolve(&url)
                .await
                .ok_or_else(|| TvplayError::NoSource(url.clone()))?;
            let mut file = create_output(&output).await?;
            let audio_path = source
                .audio_url
                .is_some()
                .then(|| audio_output_path(&output, audio_output.as_deref()));
            let mut audio_file = match &audio_path {
                Some(path) => Some(create_output(path).await?),
                None => None,
            };

            let audio_sink = audio_file.as_mut().map(|f| f as AudioSink<'_>);
            let report = session.play_source(source, &mut file, audio_sink).await?;
            info!(path = %output.display(), bytes = report.bytes, "Saved");
            if let (Some(path), Some(bytes)) = (&audio_path, report.audio_bytes) {
                info!(path = %path.display(), bytes, "Saved audio");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::AfrProbe { url } => {
            let (source, detected) = session.probe_frame_rate(&url).await?;
            let best_mode = detected.as_ref().and_then(|d| {
                let display = StaticDisplay::from_config(&config.display)?;
                pick_best_mode(&config.display.modes, &display.current(), d.fps)
            });
            let report = serde_json::json!({
                "source": source,
                "detected": detected,
                "bestMode": best_mode,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn create_output(path: &Path) -> anyhow::Result<tokio::fs::File> {
    tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
