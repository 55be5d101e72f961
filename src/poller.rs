//! The poll cycle: fetch every watched feed once, deliver new entries to
//! each subscribed room, and advance the per-room watermarks.
//!
//! Feed-level failures are logged and skipped; nothing inside a cycle is
//! cycle-fatal. The cycle's wall-clock duration, slow failures included,
//! feeds the scheduler's adaptive-interval rule.

use crate::creds::CredentialResolver;
use crate::fetch::{Entry, FeedFetcher};
use crate::scheduler::CycleRunner;
use crate::storage::{Database, Feed, Subscription};
use crate::util::humanize_since;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Delivery Sink
// ============================================================================

/// Outbound side of delivery: one formatted message per new entry.
///
/// The hosting chat runtime is an external collaborator; the daemon wires
/// a console sink, tests wire a recording one.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()>;
}

/// Sink that prints deliveries to stdout, one line per entry.
pub struct ConsoleSink;

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        println!("[{}] {}", destination, text);
        Ok(())
    }
}

/// Render one entry as the delivery line: `[title](link) --- when`.
fn render_entry(entry: &Entry, now: DateTime<Utc>) -> String {
    format!(
        "[{}]({}) --- {}",
        entry.title,
        entry.link.as_deref().unwrap_or(""),
        humanize_since(entry.published, now)
    )
}

// ============================================================================
// Poll Engine
// ============================================================================

/// Orchestrates one polling cycle across all watched feeds.
pub struct PollEngine {
    db: Database,
    fetcher: FeedFetcher,
    resolver: CredentialResolver,
    sink: Arc<dyn MessageSink>,
}

impl PollEngine {
    pub fn new(
        db: Database,
        fetcher: FeedFetcher,
        resolver: CredentialResolver,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            db,
            fetcher,
            resolver,
            sink,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run one full cycle and return its wall-clock duration.
    ///
    /// The feed set is snapshotted once: a feed watched mid-cycle waits
    /// for the next cycle.
    pub async fn run_cycle(&self) -> Duration {
        let started = Instant::now();
        tracing::info!("Starting feed check");

        let snapshot = match self.db.feeds_with_subscriptions().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "Could not snapshot the feed registry, skipping cycle");
                return started.elapsed();
            }
        };

        if snapshot.is_empty() {
            tracing::info!("No feeds to check");
            return started.elapsed();
        }

        tracing::info!(feeds = snapshot.len(), "Checking feeds");
        for (feed, subscriptions) in &snapshot {
            self.check_feed(feed, subscriptions).await;
        }

        let took = started.elapsed();
        tracing::info!(seconds = took.as_secs(), "Feed check finished");
        took
    }

    /// Fetch one feed and deliver its new entries to every subscriber.
    async fn check_feed(&self, feed: &Feed, subscriptions: &[Subscription]) {
        let rule = self.resolver.resolve(&feed.url);
        let fetched = match self.fetcher.fetch(&feed.url, rule).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(feed = %feed.title, error = %e, "Feed fetch failed, skipping");
                return;
            }
        };
        if fetched.entries.is_empty() {
            tracing::info!(feed = %feed.title, "No entries yet");
            return;
        }

        // Ascending by published; the sort is stable, so entries that share
        // a published instant keep their feed-source order.
        let mut entries = fetched.entries;
        entries.sort_by_key(|entry| entry.published);

        let now = Utc::now();
        for subscription in subscriptions {
            self.deliver_to_subscription(feed, subscription, &entries, now)
                .await;
        }
    }

    /// Select entries strictly newer than the subscription's watermark,
    /// deliver them in ascending order, and advance the watermark to the
    /// last entry actually sent.
    async fn deliver_to_subscription(
        &self,
        feed: &Feed,
        subscription: &Subscription,
        entries: &[Entry],
        now: DateTime<Utc>,
    ) {
        let recent: Vec<&Entry> = entries
            .iter()
            .filter(|entry| entry.published > subscription.last_check)
            .collect();

        if recent.is_empty() {
            tracing::info!(
                feed = %feed.title,
                destination = %subscription.destination,
                entries = entries.len(),
                since = %humanize_since(subscription.last_check, now),
                "No new entries since last check"
            );
            return;
        }

        tracing::info!(
            feed = %feed.title,
            destination = %subscription.destination,
            count = recent.len(),
            "Delivering new entries"
        );

        // The watermark tracks what was actually sent: on a sink failure we
        // stop this subscription's delivery and advance only through the
        // last success, so the remainder is retried next cycle.
        let mut delivered_through = None;
        for entry in recent {
            let text = render_entry(entry, now);
            if let Err(e) = self.sink.send(&subscription.destination, &text).await {
                tracing::warn!(
                    feed = %feed.title,
                    destination = %subscription.destination,
                    error = %e,
                    "Delivery failed, deferring remaining entries to the next cycle"
                );
                break;
            }
            delivered_through = Some(entry.published);
        }

        let Some(watermark) = delivered_through else {
            return;
        };
        match self.db.advance_watermark(subscription.id, watermark).await {
            Ok(()) => {
                tracing::info!(
                    feed = %feed.title,
                    destination = %subscription.destination,
                    watermark = %watermark,
                    "Advanced watermark"
                );
            }
            Err(e) => {
                // Entries up to the watermark may be redelivered next cycle.
                tracing::error!(
                    feed = %feed.title,
                    destination = %subscription.destination,
                    error = %e,
                    "Failed to advance watermark"
                );
            }
        }
    }
}

#[async_trait]
impl CycleRunner for PollEngine {
    async fn run_cycle(&self) -> Duration {
        PollEngine::run_cycle(self).await
    }

    async fn interval_override(&self) -> Option<u64> {
        match self.db.interval_override().await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read the interval setting");
                None
            }
        }
    }
}
