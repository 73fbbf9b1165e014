//! Dump the upload-timer records and the refresh minute each selector
//! resolves to for a region.

use anyhow::Result;
use clap::Parser;

use saddlebag_watchbot::model::TimerSelector;
use saddlebag_watchbot::saddlebag::{select_refresh_minute, SaddlebagClient, ScanService};

#[derive(Parser, Debug)]
struct Args {
    /// Region to resolve (NA, EU, ...)
    #[arg(long, default_value = "NA")]
    region: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = SaddlebagClient::new();
    let timers = client.upload_timers().await?;

    println!("{} upload timer records:", timers.len());
    for t in &timers {
        println!(
            "  dataSetID {:>5}  region {:<4}  minute {:>2}  {}",
            t.data_set_id,
            t.region,
            t.last_upload_minute,
            t.last_upload_time_raw.as_deref().unwrap_or("-"),
        );
    }

    for selector in [TimerSelector::Simple, TimerSelector::Full] {
        match select_refresh_minute(&timers, &args.region, selector) {
            Some(minute) => {
                println!("{:?} refresh minute for {}: {}", selector, args.region, minute)
            }
            None => println!("{:?} refresh minute for {}: not found", selector, args.region),
        }
    }
    Ok(())
}
