use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info};

use logger::{LevelFilter, LogFormat, init_tracing, parse_level};
use publish_monitor::events::forward_events;
use publish_monitor::{Config, Orchestrator};

/// Capacity of the channel between the event reader and the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "publish-monitor", version, about = "Publish availability monitor")]
struct Args {
    /// Configuration file, created with defaults when missing.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Newline-delimited JSON content events. Overrides the configured file, stdin when neither is set.
    #[arg(short, long)]
    events: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref()).context("Failed to load configuration")?;
    init_tracing(
        parse_level(&config.log.level).unwrap_or(LevelFilter::INFO),
        LogFormat::from_name(&config.log.format),
    );
    info!("Loaded configuration:\n{}", config);

    let events_path = args.events.or_else(|| config.events.clone());
    let orchestrator = Orchestrator::new(config)?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let forwarded = match events_path {
            Some(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    info!(path = %path.display(), "Reading content events from file");
                    forward_events(BufReader::new(file), event_tx).await
                }
                Err(e) => Err(e),
            },
            None => {
                info!("Reading content events from stdin");
                forward_events(BufReader::new(tokio::io::stdin()), event_tx).await
            }
        };

        match forwarded {
            Ok(count) => info!(count, "Content event source exhausted"),
            Err(e) => error!("Failed to read content events: {}", e),
        }
    });

    orchestrator.run(event_rx).await
}
