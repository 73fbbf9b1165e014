//! Update-synchronized polling loop.
//!
//! The scheduler wakes every sixty seconds and looks at the minute of the
//! hour: minute 0 clears all dedup caches, minute 1 re-resolves the upload
//! timers, and every watch whose window (or fixed interval) is open gets a
//! scan pass. Watches run one at a time; a failing watch never stops the
//! others.

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::batch::split_batches;
use crate::config::{Config, WatchConfig};
use crate::dedup::DedupCache;
use crate::discord::{limits_for, render_batch, Delivered, NotificationSink};
use crate::model::{Cadence, TimerSelector};
use crate::saddlebag::{select_refresh_minute, ScanService, UpstreamError};

const TICK_INTERVAL: Duration = Duration::from_secs(60);
/// Pause between consecutive watch scans within one evaluation.
const SCAN_SPACING: Duration = Duration::from_secs(1);

type TimerKey = (String, TimerSelector);

/// Upload refresh minutes per (region, selector), re-resolved once an hour.
#[derive(Debug, Default)]
pub struct ScheduleState {
    refresh_minutes: HashMap<TimerKey, u32>,
}

impl ScheduleState {
    pub fn refresh_minute(&self, region: &str, selector: TimerSelector) -> Option<u32> {
        self.refresh_minutes
            .get(&(region.to_string(), selector))
            .copied()
    }
}

/// One watch's runtime state: the loaded config plus the dedup cache and
/// the time of its last fixed-interval attempt.
#[derive(Debug)]
pub struct WatchState {
    pub config: WatchConfig,
    pub cache: DedupCache,
    last_attempt: Option<Instant>,
}

impl WatchState {
    fn new(config: WatchConfig) -> Self {
        let cache = DedupCache::new(config.suppress_repeats);
        Self {
            config,
            cache,
            last_attempt: None,
        }
    }

    fn due_at(&self, minute: u32, timers: &ScheduleState) -> bool {
        match self.config.spec.cadence() {
            Cadence::UploadWindow {
                selector,
                offset_low,
                offset_high,
            } => {
                let Some((region, _)) = self.config.spec.timer_key() else {
                    return false;
                };
                match timers.refresh_minute(&region, selector) {
                    Some(refresh) => in_window(minute, refresh, offset_low, offset_high),
                    None => false,
                }
            }
            Cadence::FixedInterval { secs } => self
                .last_attempt
                .map_or(true, |t| t.elapsed() >= Duration::from_secs(secs)),
        }
    }
}

/// The scan window opens `low` minutes after the refresh minute and closes
/// after `high`. Minute arithmetic is plain comparison with no wraparound;
/// upstream refresh minutes sit mid-hour, so windows crossing minute 59
/// do not occur in practice.
pub(crate) fn in_window(minute: u32, refresh: u32, low: u32, high: u32) -> bool {
    refresh + low <= minute && minute <= refresh + high
}

/// Counters from one watch pass, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Items parsed out of the scan response.
    pub matches: usize,
    /// Items that survived dedup.
    pub fresh: usize,
    /// Batches delivered.
    pub sent: usize,
    /// Batches dropped after delivery retries.
    pub failed: usize,
}

pub struct PollScheduler {
    watches: Vec<WatchState>,
    timers: ScheduleState,
    scan: Arc<dyn ScanService>,
    sink: Arc<dyn NotificationSink>,
}

impl PollScheduler {
    pub fn new(config: Config, scan: Arc<dyn ScanService>, sink: Arc<dyn NotificationSink>) -> Self {
        let watches = config.watches.into_iter().map(WatchState::new).collect();
        Self {
            watches,
            timers: ScheduleState::default(),
            scan,
            sink,
        }
    }

    pub fn watches(&self) -> &[WatchState] {
        &self.watches
    }

    pub fn timers(&self) -> &ScheduleState {
        &self.timers
    }

    /// Distinct (region, selector) pairs the window watches depend on, in
    /// watch order.
    fn timer_keys(&self) -> Vec<TimerKey> {
        let mut keys: Vec<TimerKey> = Vec::new();
        for watch in &self.watches {
            if let Some(key) = watch.config.spec.timer_key() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Resolve every needed upload timer. Runs before the loop starts; a
    /// failure here is fatal since window watches cannot be scheduled
    /// without a refresh minute.
    pub async fn prime_timers(&mut self) -> Result<(), UpstreamError> {
        let keys = self.timer_keys();
        if keys.is_empty() {
            return Ok(());
        }
        let timers = self.scan.upload_timers().await?;
        for (region, selector) in keys {
            let minute = select_refresh_minute(&timers, &region, selector).ok_or_else(|| {
                UpstreamError::MissingTimer {
                    region: region.clone(),
                    selector,
                }
            })?;
            info!(%region, ?selector, minute, "resolved upload timer");
            self.timers.refresh_minutes.insert((region, selector), minute);
        }
        Ok(())
    }

    /// Hourly timer refresh. Any key that cannot be re-resolved keeps its
    /// previous minute.
    async fn refresh_timers(&mut self) {
        let keys = self.timer_keys();
        if keys.is_empty() {
            return;
        }
        let timers = match self.scan.upload_timers().await {
            Ok(timers) => timers,
            Err(err) => {
                warn!(%err, "upload timer refresh failed, keeping previous minutes");
                return;
            }
        };
        for (region, selector) in keys {
            match select_refresh_minute(&timers, &region, selector) {
                Some(minute) => {
                    debug!(%region, ?selector, minute, "upload timer refreshed");
                    self.timers.refresh_minutes.insert((region, selector), minute);
                }
                None => {
                    warn!(%region, ?selector, "no upload timer record, keeping previous minute");
                }
            }
        }
    }

    /// Scan every watch regardless of cadence. Used for the eager pass at
    /// startup.
    pub async fn run_all_watches(&mut self) {
        let due: Vec<usize> = (0..self.watches.len()).collect();
        self.run_due_watches(&due).await;
    }

    /// One scheduler evaluation for the given minute of the hour.
    pub async fn tick_at(&mut self, minute: u32) {
        if minute == 0 {
            info!("clearing alert records");
            for watch in &mut self.watches {
                watch.cache.clear();
            }
        }
        if minute == 1 {
            self.refresh_timers().await;
        }
        let due: Vec<usize> = self
            .watches
            .iter()
            .enumerate()
            .filter(|(_, w)| w.due_at(minute, &self.timers))
            .map(|(i, _)| i)
            .collect();
        if due.is_empty() {
            debug!(minute, "no watches due");
            return;
        }
        self.run_due_watches(&due).await;
    }

    async fn run_due_watches(&mut self, due: &[usize]) {
        for (i, &idx) in due.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SCAN_SPACING).await;
            }
            let watch = &mut self.watches[idx];
            let name = watch.config.name.clone();
            match run_watch_pass(self.scan.as_ref(), self.sink.as_ref(), watch).await {
                Ok(stats) if stats.matches == 0 => {
                    info!(watch = %name, "no matches");
                }
                Ok(stats) => {
                    info!(
                        watch = %name,
                        matches = stats.matches,
                        fresh = stats.fresh,
                        sent = stats.sent,
                        failed = stats.failed,
                        "pass complete"
                    );
                }
                Err(err) => {
                    warn!(watch = %name, %err, "scan failed, keeping previous state");
                }
            }
        }
    }

    /// Run one eager pass, prime the timers, then evaluate once a minute
    /// forever.
    pub async fn run(&mut self) -> Result<()> {
        info!(watches = self.watches.len(), "running startup scan");
        self.run_all_watches().await;
        self.prime_timers()
            .await
            .context("initial upload timer resolution failed")?;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the eager pass above
        // already covered it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let minute = Local::now().minute();
            self.tick_at(minute).await;
        }
    }
}

/// Fetch, dedup, batch, and deliver for one watch. Upstream failures abort
/// the pass with previous state intact; delivery failures drop the affected
/// batch and carry on.
#[instrument(skip_all, fields(watch = %watch.config.name, kind = watch.config.spec.kind_name()))]
async fn run_watch_pass(
    scan: &dyn ScanService,
    sink: &dyn NotificationSink,
    watch: &mut WatchState,
) -> Result<PassStats, UpstreamError> {
    watch.last_attempt = Some(Instant::now());
    let spec = &watch.config.spec;
    let body = spec.build_request();
    let raw = scan.scan(spec.endpoint(), &body).await?;
    let groups = spec.parse_response(&raw);

    let mut stats = PassStats::default();
    for group in groups {
        stats.matches += group.items.len();
        let fresh = watch.cache.filter(group.items);
        if fresh.is_empty() {
            continue;
        }
        stats.fresh += fresh.len();
        let entries = fresh.into_iter().map(|item| item.entry).collect();
        for one in split_batches(entries, limits_for(&group.presentation)) {
            let payload = render_batch(&group.presentation, &one, spec.mention());
            match sink.deliver(&watch.config.webhook_url, &payload).await {
                Ok(Delivered::Sent) => stats.sent += 1,
                Ok(Delivered::Skipped) => {}
                Err(err) => {
                    warn!(%err, "delivery failed, dropping batch");
                    stats.failed += 1;
                }
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchSpec;
    use serde_json::json;

    fn window_watch() -> WatchState {
        WatchState::new(WatchConfig {
            name: "thrall".into(),
            webhook_name: "main".into(),
            webhook_url: "https://hook/main".into(),
            suppress_repeats: true,
            spec: WatchSpec::WowPricecheck {
                region: "NA".into(),
                home_realm_name: "Thrall".into(),
                user_auctions: vec![json!({"itemID": 168487})],
            },
        })
    }

    fn fixed_watch() -> WatchState {
        WatchState::new(WatchConfig {
            name: "famfrit".into(),
            webhook_name: "main".into(),
            webhook_url: "https://hook/main".into(),
            suppress_repeats: true,
            spec: WatchSpec::FfxivPricecheck {
                home_server: "Famfrit".into(),
                user_auctions: vec![json!({"itemID": 44162})],
                mention: String::new(),
            },
        })
    }

    fn timers_with(region: &str, selector: TimerSelector, minute: u32) -> ScheduleState {
        let mut state = ScheduleState::default();
        state
            .refresh_minutes
            .insert((region.to_string(), selector), minute);
        state
    }

    #[test]
    fn window_opens_after_low_and_closes_after_high_offset() {
        for minute in [55, 56, 57, 58, 59] {
            assert!(in_window(minute, 52, 3, 7), "minute {minute} should match");
        }
        for minute in [0, 1, 50, 52, 54] {
            assert!(!in_window(minute, 52, 3, 7), "minute {minute} should not match");
        }
    }

    #[test]
    fn window_never_wraps_past_the_hour() {
        // refresh at 58: the whole window lies beyond any real minute.
        for minute in 0..60 {
            assert!(!in_window(minute, 58, 3, 7));
        }
    }

    #[test]
    fn watch_due_only_inside_its_window() {
        let watch = window_watch();
        let timers = timers_with("NA", TimerSelector::Simple, 52);
        assert!(watch.due_at(55, &timers));
        assert!(watch.due_at(59, &timers));
        assert!(!watch.due_at(54, &timers));
        assert!(!watch.due_at(0, &timers));
    }

    #[test]
    fn watch_not_due_without_a_resolved_timer() {
        let watch = window_watch();
        assert!(!watch.due_at(55, &ScheduleState::default()));
    }

    #[test]
    fn fixed_interval_watch_is_due_until_first_attempt() {
        let mut watch = fixed_watch();
        let timers = ScheduleState::default();
        assert!(watch.due_at(17, &timers));
        watch.last_attempt = Some(Instant::now());
        assert!(!watch.due_at(18, &timers));
    }
}
