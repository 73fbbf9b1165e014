use async_trait::async_trait;
use chrono::Local;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::batch::{BatchLimits, NotificationBatch};
use crate::discord::model::{
    Embed, EmbedField, EmbedFooter, WebhookPayload, CONTENT_CHAR_BUDGET, EMBED_CHAR_BUDGET,
    MAX_EMBED_FIELDS,
};
use crate::model::Presentation;

pub mod model;

/// Consecutive webhook deliveries are spaced at least this far apart.
const MIN_SEND_SPACING: Duration = Duration::from_secs(1);

/// Failures delivering one webhook message. Delivery failures never abort a
/// watch pass; the batch is dropped after retries and the pass moves on.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

impl DeliveryError {
    /// Whether another attempt may succeed. Webhook posts are treated as
    /// idempotent, so network failures and rejections both qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Rejected { .. })
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt ceiling is reached. `op` always runs at least once and
    /// receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, DeliveryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && err.is_transient() => {
                    warn!(attempt, %err, "delivery attempt failed, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Outcome of a delivery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    Sent,
    /// The payload was empty and nothing was posted.
    Skipped,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// POST one payload to a webhook URL, honoring the sink's pacing and
    /// retry policy.
    async fn deliver(
        &self,
        target: &str,
        payload: &WebhookPayload,
    ) -> Result<Delivered, DeliveryError>;
}

pub struct DiscordWebhook {
    http: Client,
    retry: RetryPolicy,
    min_spacing: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl fmt::Debug for DiscordWebhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordWebhook")
            .field("retry", &self.retry)
            .field("min_spacing", &self.min_spacing)
            .finish_non_exhaustive()
    }
}

impl DiscordWebhook {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), MIN_SEND_SPACING)
    }

    pub fn with_policy(retry: RetryPolicy, min_spacing: Duration) -> Self {
        let http = Client::builder()
            .user_agent("saddlebag-watchbot/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            retry,
            min_spacing,
            last_send: Mutex::new(None),
        }
    }

    async fn post_once(&self, target: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let res = self.http.post(target).json(payload).send().await?;
        let status = res.status();
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            debug!(%status, "webhook accepted");
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status, body })
    }
}

impl Default for DiscordWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn deliver(
        &self,
        target: &str,
        payload: &WebhookPayload,
    ) -> Result<Delivered, DeliveryError> {
        if payload.is_empty() {
            debug!("empty payload, nothing to deliver");
            return Ok(Delivered::Skipped);
        }
        // The lock is held across the send so concurrent callers are paced
        // one after another.
        let mut last_send = self.last_send.lock().await;
        if let Some(prev) = *last_send {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        let result = self.retry.run(|_| self.post_once(target, payload)).await;
        *last_send = Some(Instant::now());
        result.map(|_| Delivered::Sent)
    }
}

/// Delivery caps for each presentation style: embeds are bounded by their
/// field count, content messages by their character budget.
pub fn limits_for(presentation: &Presentation) -> BatchLimits {
    match presentation {
        Presentation::Embed { .. } => BatchLimits {
            max_entries: MAX_EMBED_FIELDS,
            max_chars: EMBED_CHAR_BUDGET,
        },
        Presentation::Content => BatchLimits::chars_only(CONTENT_CHAR_BUDGET),
    }
}

/// Render one batch as a webhook payload. Labeled sections become a single
/// field with their entries joined by newlines; unlabeled entries each get
/// their own field. The mention tag, when present, rides along as message
/// content next to the embed.
pub fn render_batch(
    presentation: &Presentation,
    batch: &NotificationBatch,
    mention: Option<&str>,
) -> WebhookPayload {
    match presentation {
        Presentation::Embed {
            title,
            description,
            color,
        } => {
            let mut fields = Vec::new();
            for section in &batch.sections {
                match &section.label {
                    Some(label) => {
                        let value: Vec<&str> =
                            section.entries.iter().map(|e| e.value.as_str()).collect();
                        fields.push(EmbedField {
                            name: format!("**{label}**"),
                            value: value.join("\n"),
                            inline: true,
                        });
                    }
                    None => {
                        for entry in &section.entries {
                            fields.push(EmbedField {
                                name: entry.name.clone(),
                                value: entry.value.clone(),
                                inline: true,
                            });
                        }
                    }
                }
            }
            let mut payload = WebhookPayload::embed(Embed {
                title: title.clone(),
                description: description.clone(),
                color: *color,
                fields,
                footer: timestamp_footer(),
            });
            if let Some(tag) = mention.filter(|t| !t.is_empty()) {
                payload.content = Some(tag.to_string());
            }
            payload
        }
        Presentation::Content => {
            let blocks: Vec<&str> = batch.entries().map(|e| e.value.as_str()).collect();
            if blocks.is_empty() {
                return WebhookPayload::default();
            }
            WebhookPayload::content(blocks.join("\n"))
        }
    }
}

/// Footer stamped with the local send time.
fn timestamp_footer() -> EmbedFooter {
    EmbedFooter {
        text: Local::now().format("%m/%d/%Y %I:%M %p").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::split_batches;
    use crate::discord::model::COLOR_RED;
    use crate::model::FormattedEntry;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn embed_presentation() -> Presentation {
        Presentation::Embed {
            title: "Undercuts".into(),
            description: "desc".into(),
            color: COLOR_RED,
        }
    }

    fn one_batch(entries: Vec<FormattedEntry>) -> NotificationBatch {
        let mut batches = split_batches(entries, BatchLimits::count_only(25));
        assert_eq!(batches.len(), 1);
        batches.remove(0)
    }

    #[test]
    fn embed_limits_cap_fields() {
        let limits = limits_for(&embed_presentation());
        assert_eq!(limits.max_entries, 25);
        assert_eq!(limits.max_chars, 5500);
    }

    #[test]
    fn content_limits_cap_characters() {
        let limits = limits_for(&Presentation::Content);
        assert_eq!(limits.max_chars, 1500);
        assert_eq!(limits.max_entries, usize::MAX);
    }

    #[test]
    fn render_embed_gives_each_entry_a_field() {
        let batch = one_batch(vec![
            FormattedEntry::field("**Saronite Ore**", "Lowest Price: 12"),
            FormattedEntry::field("**Titansteel Bar**", "Lowest Price: 90"),
        ]);
        let payload = render_batch(&embed_presentation(), &batch, None);
        assert!(payload.content.is_none());
        let embed = &payload.embeds[0];
        assert_eq!(embed.title, "Undercuts");
        assert_eq!(embed.color, COLOR_RED);
        assert_eq!(embed.fields.len(), 2);
        assert_eq!(embed.fields[0].name, "**Saronite Ore**");
        assert!(embed.fields.iter().all(|f| f.inline));
        assert!(!embed.footer.text.is_empty());
    }

    #[test]
    fn render_embed_folds_labeled_sections_into_one_field() {
        let batch = one_batch(vec![
            FormattedEntry::plain("[Item A](link)").in_section("Retainer1"),
            FormattedEntry::plain("[Item B](link)").in_section("Retainer1"),
        ]);
        let payload = render_batch(&embed_presentation(), &batch, Some("<@123>"));
        let embed = &payload.embeds[0];
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(embed.fields[0].name, "**Retainer1**");
        assert_eq!(embed.fields[0].value, "[Item A](link)\n[Item B](link)");
        assert_eq!(payload.content.as_deref(), Some("<@123>"));
    }

    #[test]
    fn render_content_joins_blocks() {
        let batch = one_batch(vec![
            FormattedEntry::plain("block one"),
            FormattedEntry::plain("block two"),
        ]);
        let payload = render_batch(&Presentation::Content, &batch, None);
        assert_eq!(payload.content.as_deref(), Some("block one\nblock two"));
        assert!(payload.embeds.is_empty());
    }

    #[test]
    fn empty_mention_is_not_attached() {
        let batch = one_batch(vec![FormattedEntry::field("**A**", "v")]);
        let payload = render_batch(&embed_presentation(), &batch, Some(""));
        assert!(payload.content.is_none());
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(DeliveryError::Rejected {
                            status: StatusCode::INTERNAL_SERVER_ERROR,
                            body: String::new(),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_at_attempt_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(DeliveryError::Rejected {
                        status: StatusCode::BAD_GATEWAY,
                        body: "bad".into(),
                    })
                }
            })
            .await;
        assert!(matches!(
            result,
            Err(DeliveryError::Rejected {
                status: StatusCode::BAD_GATEWAY,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_payload_is_skipped_without_a_request() {
        let sink = DiscordWebhook::new();
        let result = sink
            .deliver("http://127.0.0.1:9/hook", &WebhookPayload::default())
            .await;
        assert!(matches!(result, Ok(Delivered::Skipped)));
    }

    #[tokio::test]
    async fn consecutive_deliveries_are_paced_apart() {
        let spacing = Duration::from_millis(100);
        let sink = DiscordWebhook::with_policy(
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::ZERO,
            },
            spacing,
        );
        let payload = WebhookPayload::content("ping");

        let start = Instant::now();
        let first = sink.deliver("http://127.0.0.1:9/hook", &payload).await;
        let second = sink.deliver("http://127.0.0.1:9/hook", &payload).await;

        // Nothing listens on port 9; both attempts fail fast, which still
        // stamps the send time.
        assert!(matches!(first, Err(DeliveryError::Http(_))));
        assert!(matches!(second, Err(DeliveryError::Http(_))));
        // The second send waited out the spacing measured from the first
        // attempt's completion.
        assert!(start.elapsed() >= spacing);
    }
}
