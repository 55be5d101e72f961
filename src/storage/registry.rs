use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{datetime_from_millis, DatabaseError, Feed, RoomFeed, Subscription, WatchOutcome};

impl Database {
    // ========================================================================
    // Subscription Registry Operations
    // ========================================================================

    /// Register a watch: create the feed on first registration and add a
    /// subscription for `destination` starting at `start`.
    ///
    /// Duplicate watches are a no-op reported as `AlreadyWatching`, unless
    /// `reset_watermark` is set (an explicit `watch --date`), in which case
    /// the existing subscription's watermark is overwritten — the one
    /// sanctioned way to move a watermark backward.
    ///
    /// The whole operation is one transaction.
    pub async fn watch_feed(
        &self,
        title: &str,
        url: &str,
        destination: &str,
        requested_by: Option<&str>,
        start: DateTime<Utc>,
        reset_watermark: bool,
    ) -> Result<WatchOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64, String)> =
            sqlx::query_as("SELECT id, url FROM feeds WHERE title = ?")
                .bind(title)
                .fetch_optional(&mut *tx)
                .await?;

        let feed_id = match existing {
            Some((id, stored_url)) => {
                // Feed URLs are immutable once created; a re-watch under the
                // same discovered title keeps the stored URL.
                if stored_url != url {
                    tracing::warn!(
                        feed = %title,
                        stored_url = %stored_url,
                        requested_url = %url,
                        "Feed already registered under a different URL, keeping the stored one"
                    );
                }
                id
            }
            None => {
                let result = sqlx::query("INSERT INTO feeds (title, url) VALUES (?, ?)")
                    .bind(title)
                    .bind(url)
                    .execute(&mut *tx)
                    .await?;
                result.last_insert_rowid()
            }
        };

        let subscription: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM subscriptions WHERE feed_id = ? AND destination = ?")
                .bind(feed_id)
                .bind(destination)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match subscription {
            Some((subscription_id,)) if reset_watermark => {
                sqlx::query("UPDATE subscriptions SET last_check = ? WHERE id = ?")
                    .bind(start.timestamp_millis())
                    .bind(subscription_id)
                    .execute(&mut *tx)
                    .await?;
                WatchOutcome::WatermarkReset
            }
            Some(_) => WatchOutcome::AlreadyWatching,
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO subscriptions (feed_id, destination, last_check, requested_by, created_at)
                    VALUES (?, ?, ?, ?, ?)
                "#,
                )
                .bind(feed_id)
                .bind(destination)
                .bind(start.timestamp_millis())
                .bind(requested_by)
                .bind(Utc::now().timestamp_millis())
                .execute(&mut *tx)
                .await?;
                WatchOutcome::Created
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Remove a room's subscription to the feed named or located by `needle`
    /// (an exact title or URL match).
    ///
    /// When the feed's last subscription goes, the feed goes with it.
    /// Returns the feed that was unwatched, or `None` when the room has no
    /// such subscription.
    pub async fn unwatch_feed(
        &self,
        needle: &str,
        destination: &str,
    ) -> Result<Option<Feed>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let feed: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, title, url FROM feeds WHERE title = ? OR url = ?")
                .bind(needle)
                .bind(needle)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((feed_id, title, url)) = feed else {
            return Ok(None);
        };

        let deleted = sqlx::query("DELETE FROM subscriptions WHERE feed_id = ? AND destination = ?")
            .bind(feed_id)
            .bind(destination)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(None);
        }

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&mut *tx)
                .await?;
        if remaining == 0 {
            sqlx::query("DELETE FROM feeds WHERE id = ?")
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(feed = %title, "Last subscription removed, dropping feed");
        }

        tx.commit().await?;
        Ok(Some(Feed {
            id: feed_id,
            title,
            url,
        }))
    }

    /// Snapshot every feed together with its subscriptions, for one poll
    /// cycle. Feeds added after the snapshot wait for the next cycle.
    pub async fn feeds_with_subscriptions(
        &self,
    ) -> Result<Vec<(Feed, Vec<Subscription>)>, DatabaseError> {
        let rows: Vec<(i64, String, String, i64, String, i64, Option<String>)> = sqlx::query_as(
            r#"
                SELECT f.id, f.title, f.url,
                       s.id, s.destination, s.last_check, s.requested_by
                FROM feeds f
                JOIN subscriptions s ON s.feed_id = f.id
                ORDER BY f.title, s.destination
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut feeds: Vec<(Feed, Vec<Subscription>)> = Vec::new();
        for (feed_id, title, url, sub_id, destination, last_check, requested_by) in rows {
            let subscription = Subscription {
                id: sub_id,
                feed_id,
                destination,
                last_check: datetime_from_millis(last_check),
                requested_by,
            };
            match feeds.last_mut() {
                Some((feed, subscriptions)) if feed.id == feed_id => {
                    subscriptions.push(subscription)
                }
                _ => feeds.push((
                    Feed {
                        id: feed_id,
                        title,
                        url,
                    },
                    vec![subscription],
                )),
            }
        }
        Ok(feeds)
    }

    /// List the feeds one room is subscribed to, ordered by title.
    pub async fn feeds_for_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<RoomFeed>, DatabaseError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
                SELECT f.title, f.url, s.last_check
                FROM feeds f
                JOIN subscriptions s ON s.feed_id = f.id
                WHERE s.destination = ?
                ORDER BY f.title
            "#,
        )
        .bind(destination)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(title, url, last_check)| RoomFeed {
                title,
                url,
                last_check: datetime_from_millis(last_check),
            })
            .collect())
    }

    // ========================================================================
    // Watermark Operations
    // ========================================================================

    /// Advance a subscription's watermark to the published time of the last
    /// entry actually delivered to it.
    ///
    /// Keyed by subscription id, so a concurrent ignore makes this a no-op
    /// instead of resurrecting the row.
    pub async fn advance_watermark(
        &self,
        subscription_id: i64,
        to: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE subscriptions SET last_check = ? WHERE id = ?")
            .bind(to.timestamp_millis())
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
