//! End-to-end poll cycle tests: a wiremock feed server, an in-memory
//! database, and a recording sink standing in for the chat surface.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feedwatch::creds::CredentialResolver;
use feedwatch::fetch::FeedFetcher;
use feedwatch::poller::{MessageSink, PollEngine};
use feedwatch::storage::Database;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

/// Captures every delivered message instead of printing it.
#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

/// Accepts `allow` messages, then fails every send after that.
struct FlakySink {
    allow: usize,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageSink for FlakySink {
    async fn send(&self, _destination: &str, text: &str) -> anyhow::Result<()> {
        let mut sent = self.sent.lock().unwrap();
        if sent.len() >= self.allow {
            anyhow::bail!("room unreachable");
        }
        sent.push(text.to_string());
        Ok(())
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

/// Build an RSS 2.0 document. Items are emitted in the order given, so
/// callers can present entries newest-first the way real feeds do.
fn rss_body(title: &str, items: &[(&str, DateTime<Utc>)]) -> String {
    let items: String = items
        .iter()
        .map(|(item_title, published)| {
            format!(
                "<item><title>{}</title><link>https://example.com/{}</link>\
                 <pubDate>{}</pubDate></item>",
                item_title,
                item_title,
                published.to_rfc2822()
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
         <title>{title}</title>{items}</channel></rss>"
    )
}

fn engine_with_sink(db: &Database, sink: Arc<dyn MessageSink>) -> PollEngine {
    PollEngine::new(
        db.clone(),
        FeedFetcher::new().unwrap(),
        CredentialResolver::new(Vec::new()),
        sink,
    )
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn cycle_delivers_per_room_from_each_watermark() {
    let server = MockServer::start().await;
    // Newest-first in the document; delivery must still be oldest-first.
    let body = rss_body(
        "News",
        &[("third", at(3, 9)), ("second", at(2, 9)), ("first", at(1, 9))],
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let url = format!("{}/feed.xml", server.uri());
    // room1 starts before every entry, room2 exactly at the second entry.
    db.watch_feed("News", &url, "room1", None, at(1, 0), false)
        .await
        .unwrap();
    db.watch_feed("News", &url, "room2", None, at(2, 9), false)
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with_sink(&db, sink.clone());
    engine.run_cycle().await;

    let messages = sink.messages();
    let room1: Vec<&str> = messages
        .iter()
        .filter(|(dest, _)| dest == "room1")
        .map(|(_, text)| text.as_str())
        .collect();
    let room2: Vec<&str> = messages
        .iter()
        .filter(|(dest, _)| dest == "room2")
        .map(|(_, text)| text.as_str())
        .collect();

    // room1 sees all three entries, oldest first.
    assert_eq!(room1.len(), 3);
    assert!(room1[0].starts_with("[first]"));
    assert!(room1[1].starts_with("[second]"));
    assert!(room1[2].starts_with("[third]"));
    // Entries published exactly at the watermark are already seen.
    assert_eq!(room2.len(), 1);
    assert!(room2[0].starts_with("[third]"));

    // Both watermarks land on the newest delivered entry.
    for room in ["room1", "room2"] {
        let feeds = db.feeds_for_destination(room).await.unwrap();
        assert_eq!(feeds[0].last_check, at(3, 9), "watermark for {room}");
    }
}

#[tokio::test]
async fn second_cycle_redelivers_nothing() {
    let server = MockServer::start().await;
    let body = rss_body("News", &[("only", at(1, 9))]);
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let url = format!("{}/feed.xml", server.uri());
    db.watch_feed("News", &url, "room1", None, at(1, 0), false)
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with_sink(&db, sink.clone());
    engine.run_cycle().await;
    assert_eq!(sink.messages().len(), 1);

    engine.run_cycle().await;
    assert_eq!(sink.messages().len(), 1, "no redelivery on the second cycle");
}

#[tokio::test]
async fn failing_feed_does_not_block_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let body = rss_body("Healthy", &[("post", at(1, 9))]);
    Mock::given(method("GET"))
        .and(path("/healthy.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    db.watch_feed(
        "Broken",
        &format!("{}/broken.xml", server.uri()),
        "room1",
        None,
        at(1, 0),
        false,
    )
    .await
    .unwrap();
    db.watch_feed(
        "Healthy",
        &format!("{}/healthy.xml", server.uri()),
        "room1",
        None,
        at(1, 0),
        false,
    )
    .await
    .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with_sink(&db, sink.clone());
    engine.run_cycle().await;

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.starts_with("[post]"));

    // The broken feed's watermark stays put for a later retry.
    let feeds = db.feeds_for_destination("room1").await.unwrap();
    let broken = feeds.iter().find(|f| f.title == "Broken").unwrap();
    assert_eq!(broken.last_check, at(1, 0));
}

#[tokio::test]
async fn sink_failure_keeps_the_watermark_at_the_last_delivered_entry() {
    let server = MockServer::start().await;
    let body = rss_body(
        "News",
        &[("third", at(3, 9)), ("second", at(2, 9)), ("first", at(1, 9))],
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let url = format!("{}/feed.xml", server.uri());
    db.watch_feed("News", &url, "room1", None, at(1, 0), false)
        .await
        .unwrap();

    let sink = Arc::new(FlakySink {
        allow: 1,
        sent: Mutex::new(Vec::new()),
    });
    let engine = engine_with_sink(&db, sink.clone());
    engine.run_cycle().await;

    // Only the first entry made it out; the watermark must not run ahead
    // of what was actually delivered.
    assert_eq!(sink.sent.lock().unwrap().len(), 1);
    let feeds = db.feeds_for_destination("room1").await.unwrap();
    assert_eq!(feeds[0].last_check, at(1, 9));

    // The undelivered entries go out on the next cycle once the room is back.
    let recording = Arc::new(RecordingSink::default());
    let engine = engine_with_sink(&db, recording.clone());
    engine.run_cycle().await;
    let messages = recording.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].1.starts_with("[second]"));
    assert!(messages[1].1.starts_with("[third]"));
}
