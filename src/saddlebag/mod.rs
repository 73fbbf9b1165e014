use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::model::TimerSelector;
use crate::saddlebag::model::{UploadTimer, UploadTimersResponse};

pub mod model;

const API_BASE: &str = "http://api.saddlebagexchange.com/";
const UPLOAD_TIMERS_ENDPOINT: &str = "api/wow/uploadtimers";

/// Dataset ids of the merged "simple" timer records: EU uploads under -2,
/// every other region under -1.
const SIMPLE_EU_DATASET: i64 = -2;
const SIMPLE_DEFAULT_DATASET: i64 = -1;
const SIMPLE_DATASET_IDS: [i64; 2] = [SIMPLE_DEFAULT_DATASET, SIMPLE_EU_DATASET];

/// Failures talking to the market API. Mid-loop these skip the pass and keep
/// previous state; during startup priming they are fatal.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("market API unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("market API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid market API response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid scan endpoint '{0}'")]
    BadEndpoint(String),
    #[error("no upload timer for region {region} ({selector:?})")]
    MissingTimer {
        region: String,
        selector: TimerSelector,
    },
}

#[derive(Clone)]
pub struct SaddlebagClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for SaddlebagClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaddlebagClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ScanService: Send + Sync {
    /// POST a scan request body to an API endpoint and return the raw JSON
    /// response.
    async fn scan(&self, endpoint: &str, body: &Value) -> Result<Value, UpstreamError>;

    /// Fetch the upload-timer records for every dataset.
    async fn upload_timers(&self) -> Result<Vec<UploadTimer>, UpstreamError>;
}

impl SaddlebagClient {
    pub fn new() -> Self {
        let base_url = Url::parse(API_BASE).expect("valid default API URL");
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("saddlebag-watchbot/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    pub fn build_scan_request(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<reqwest::Request, UpstreamError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|_| UpstreamError::BadEndpoint(endpoint.to_string()))?;
        Ok(self
            .http
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .build()?)
    }

    async fn execute_scan(&self, request: reqwest::Request) -> Result<Value, UpstreamError> {
        let url = request.url().clone();
        let res = self.http.execute(request).await?;
        let status = res.status();
        debug!(%url, %status, "scan response");
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }
        let text = res.text().await?;
        // A bodyless 200 means the API had nothing to report.
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for SaddlebagClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanService for SaddlebagClient {
    async fn scan(&self, endpoint: &str, body: &Value) -> Result<Value, UpstreamError> {
        let request = self.build_scan_request(endpoint, body)?;
        self.execute_scan(request).await
    }

    async fn upload_timers(&self) -> Result<Vec<UploadTimer>, UpstreamError> {
        let raw = self.scan(UPLOAD_TIMERS_ENDPOINT, &json!({})).await?;
        let parsed: UploadTimersResponse = serde_json::from_value(raw)?;
        Ok(parsed.data)
    }
}

/// Pick the upload-timer record for (region, selector) and return its
/// last-upload minute. Simple watches read the merged dataset for their
/// region; full watches take the first realm dataset tagged with it. A
/// record bearing a minute outside the hour is treated as missing.
pub fn select_refresh_minute(
    timers: &[UploadTimer],
    region: &str,
    selector: TimerSelector,
) -> Option<u32> {
    let record = match selector {
        TimerSelector::Simple => {
            let want = if region == "EU" {
                SIMPLE_EU_DATASET
            } else {
                SIMPLE_DEFAULT_DATASET
            };
            timers.iter().find(|t| t.data_set_id == want)
        }
        TimerSelector::Full => timers
            .iter()
            .find(|t| !SIMPLE_DATASET_IDS.contains(&t.data_set_id) && t.region == region),
    };
    record
        .map(|t| t.last_upload_minute)
        .filter(|minute| *minute < 60)
}
