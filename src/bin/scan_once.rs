//! Run a single scan pass over every configured watch and exit. With
//! `--dry-run` the rendered payloads are printed instead of delivered.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use saddlebag_watchbot::config;
use saddlebag_watchbot::discord::model::WebhookPayload;
use saddlebag_watchbot::discord::{Delivered, DeliveryError, DiscordWebhook, NotificationSink};
use saddlebag_watchbot::saddlebag::SaddlebagClient;
use saddlebag_watchbot::scheduler::PollScheduler;

#[derive(Parser, Debug)]
struct Args {
    /// Data directory holding webhooks.json and watches/
    #[arg(long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Print payloads to stdout instead of posting them
    #[arg(long)]
    dry_run: bool,
}

struct PrintSink;

#[async_trait]
impl NotificationSink for PrintSink {
    async fn deliver(
        &self,
        target: &str,
        payload: &WebhookPayload,
    ) -> Result<Delivered, DeliveryError> {
        if payload.is_empty() {
            return Ok(Delivered::Skipped);
        }
        println!("--> {target}");
        println!(
            "{}",
            serde_json::to_string_pretty(payload).unwrap_or_default()
        );
        Ok(Delivered::Sent)
    }
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

    let scan = Arc::new(SaddlebagClient::new());
    let sink: Arc<dyn NotificationSink> = if args.dry_run {
        Arc::new(PrintSink)
    } else {
        Arc::new(DiscordWebhook::new())
    };

    let mut scheduler = PollScheduler::new(cfg, scan, sink);
    scheduler.run_all_watches().await;
    Ok(())
}
