use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use transcribe_engine::{AppConfig, CompareApp, PipelineKind};

#[derive(Parser)]
#[command(name = "speech-compare")]
#[command(
    about = "Side-by-side comparison of streaming and legacy speech-to-text pipelines",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Pipeline to start with: legacy or modern
    #[arg(long)]
    pipeline: Option<String>,

    /// Transcription locale for the streaming pipeline
    #[arg(long)]
    locale: Option<String>,

    /// Input device name ("default" for the system default)
    #[arg(long)]
    device: Option<String>,

    /// Directory holding streaming analyzer models
    #[arg(long)]
    model_dir: Option<String>,

    /// Mirror the analyzer feed to WAV files for offline replay
    #[arg(long)]
    debug_audio: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List available audio input devices")]
    ListDevices,
    #[command(about = "List locales supported by the streaming pipeline")]
    ListLocales,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::ListDevices) => {
            for device in transcribe_engine::capture::list_devices()? {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}", device.name, marker);
            }
            Ok(())
        }
        Some(Commands::ListLocales) => {
            for locale in transcribe_engine::model_manager::supported_locales() {
                println!("{}", locale);
            }
            Ok(())
        }
        None => run(cli).await,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(pipeline) = cli.pipeline {
        config.pipeline = pipeline;
    }
    if let Some(locale) = cli.locale {
        config.locale = locale;
    }
    if let Some(device) = cli.device {
        config.device = Some(device);
    }
    if let Some(model_dir) = cli.model_dir {
        config.model_dir = model_dir;
    }
    if cli.debug_audio {
        config.debug_audio = true;
    }

    let mut app = CompareApp::new(&config)?;
    info!("selected pipeline: {}", app.selected());

    // Render transcript snapshots as they arrive; volatile text is dimmed
    // to mark it provisional.
    let mut view_rx = app.subscribe();
    let render = tokio::spawn(async move {
        use std::io::Write;

        while view_rx.changed().await.is_ok() {
            let view = view_rx.borrow().clone();
            let marker = if view.recording { "●" } else { " " };
            print!(
                "\r\x1b[2K{} {}\x1b[2m{}\x1b[0m",
                marker, view.finalized, view.volatile
            );
            let _ = std::io::stdout().flush();
            if !view.recording {
                println!();
            }
        }
    });

    println!("commands: start | stop | switch <legacy|modern> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("start") => {
                if let Err(e) = app.start().await {
                    error!("start failed: {}", e);
                }
            }
            Some("stop") => {
                if let Err(e) = app.stop().await {
                    error!("stop failed: {}", e);
                }
            }
            Some("switch") => match parts.next().and_then(PipelineKind::from_str) {
                Some(kind) => match app.select(kind) {
                    Ok(()) => info!("switched to {} pipeline", kind),
                    Err(e) => error!("switch failed: {}", e),
                },
                None => error!("usage: switch <legacy|modern>"),
            },
            Some("quit") | Some("q") => break,
            Some(other) => error!("unknown command '{}'", other),
            None => {}
        }
    }

    let _ = app.stop().await;
    render.abort();
    Ok(())
}
