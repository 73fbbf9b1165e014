use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use saddlebag_watchbot::config;
use saddlebag_watchbot::discord::model::WebhookPayload;
use saddlebag_watchbot::discord::{DiscordWebhook, NotificationSink};
use saddlebag_watchbot::saddlebag::SaddlebagClient;
use saddlebag_watchbot::scheduler::PollScheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Data directory holding webhooks.json and watches/
    #[arg(long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Skip the startup message to each webhook
    #[arg(long)]
    no_announce: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(&args.data_dir)?;
    info!(watches = cfg.watches.len(), "configuration loaded");

    let sink = Arc::new(DiscordWebhook::new());
    if !args.no_announce {
        // Best effort: a dead webhook shows up again on the first real alert.
        let payload = WebhookPayload::content("starting market alert watch");
        for url in cfg.distinct_webhook_urls() {
            if let Err(err) = sink.deliver(url, &payload).await {
                warn!(%err, "startup announcement failed");
            }
        }
    }

    let scan = Arc::new(SaddlebagClient::new());
    let mut scheduler = PollScheduler::new(cfg, scan, sink);
    scheduler.run().await
}
