//! Configuration loader and validator for the market alert watcher.
//!
//! Layout under the data directory:
//!
//! ```text
//! user_data/
//!   webhooks.json      named webhook URLs: {"main": "https://discord.com/..."}
//!   watches/*.json     one watch per file, "kind"-tagged, "webhook" names
//!                      the delivery target; example.json is skipped
//! ```
//!
//! A broken watch file is logged and skipped so one bad entry cannot take
//! the rest of the watches down; an unreadable webhooks.json or an empty
//! watch set is fatal.

use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::watch::WatchSpec;

pub const DEFAULT_DATA_DIR: &str = "user_data";

const EXAMPLE_FILE: &str = "example.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the scheduler needs to run: the usable watches with their
/// delivery targets already resolved.
#[derive(Debug, Clone)]
pub struct Config {
    pub watches: Vec<WatchConfig>,
}

/// One user's alert subscription.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Watch file stem, used in logs.
    pub name: String,
    pub webhook_name: String,
    pub webhook_url: String,
    pub suppress_repeats: bool,
    pub spec: WatchSpec,
}

impl Config {
    /// Delivery URLs in watch order, each listed once.
    pub fn distinct_webhook_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for watch in &self.watches {
            if !urls.contains(&watch.webhook_url.as_str()) {
                urls.push(&watch.webhook_url);
            }
        }
        urls
    }
}

#[derive(Debug, Deserialize)]
struct WatchFile {
    webhook: String,
    #[serde(default = "default_suppress_repeats")]
    suppress_repeats: bool,
    #[serde(flatten)]
    spec: WatchSpec,
}

fn default_suppress_repeats() -> bool {
    true
}

/// Load every usable watch under `dir`. Watch files that fail to parse or
/// validate are skipped with an error log; ending up with zero watches is
/// fatal.
pub fn load(dir: &Path) -> Result<Config, ConfigError> {
    let webhooks = load_webhooks(&dir.join("webhooks.json"))?;

    let watches_dir = dir.join("watches");
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(&watches_dir)? {
        let path = entry?.path();
        if path.extension().and_then(OsStr::to_str) != Some("json") {
            continue;
        }
        if path.file_name().and_then(OsStr::to_str) == Some(EXAMPLE_FILE) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut watches = Vec::new();
    for path in &paths {
        match load_watch_file(path, &webhooks) {
            Ok(watch) => {
                info!(
                    watch = %watch.name,
                    kind = watch.spec.kind_name(),
                    label = watch.spec.label(),
                    webhook = %watch.webhook_name,
                    "loaded watch"
                );
                watches.push(watch);
            }
            Err(err) => {
                error!(file = %path.display(), %err, "skipping invalid watch file");
            }
        }
    }

    if watches.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "no usable watch files in {}",
            watches_dir.display()
        )));
    }
    Ok(Config { watches })
}

fn load_webhooks(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let content = fs::read_to_string(path)?;
    let webhooks: HashMap<String, String> = serde_json::from_str(&content)?;
    if webhooks.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} has no webhook entries",
            path.display()
        )));
    }
    for (name, url) in &webhooks {
        if url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "webhook '{name}' has an empty URL"
            )));
        }
    }
    Ok(webhooks)
}

fn load_watch_file(
    path: &Path,
    webhooks: &HashMap<String, String>,
) -> Result<WatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let file: WatchFile = serde_json::from_str(&content)?;
    let url = webhooks.get(&file.webhook).ok_or_else(|| {
        ConfigError::Invalid(format!("unknown webhook '{}'", file.webhook))
    })?;
    file.spec
        .validate()
        .map_err(|msg| ConfigError::Invalid(msg.to_string()))?;
    let name = path
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or_default()
        .to_string();
    Ok(WatchConfig {
        name,
        webhook_name: file.webhook,
        webhook_url: url.clone(),
        suppress_repeats: file.suppress_repeats,
        spec: file.spec,
    })
}

/// Example webhooks.json content.
pub fn example_webhooks() -> &'static str {
    r#"{
  "main": "https://discord.com/api/webhooks/123456789/example-token"
}
"#
}

/// Example watch file content.
pub fn example_watch() -> &'static str {
    r#"{
  "kind": "wow_pricecheck",
  "webhook": "main",
  "region": "NA",
  "homeRealmName": "Thrall",
  "user_auctions": [
    { "itemID": 168487, "price": 500, "desired_state": "below" }
  ]
}
"#
}
