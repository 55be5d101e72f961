use anyhow::Result;

use super::schema::Database;

/// Settings key holding the runtime polling interval override, in seconds.
const INTERVAL_KEY: &str = "poller.interval_seconds";

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Get a single setting value by key.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a setting value (UPSERT).
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The persisted polling interval override, if one was ever set.
    ///
    /// A stored value that fails to parse is treated as absent (and logged):
    /// a corrupt setting must not take the poller down.
    pub async fn interval_override(&self) -> Result<Option<u64>> {
        let Some(raw) = self.get_setting(INTERVAL_KEY).await? else {
            return Ok(None);
        };
        match raw.parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "Ignoring unparseable interval setting");
                Ok(None)
            }
        }
    }

    /// Persist the polling interval so the next `run` (and the running
    /// poller, between cycles) picks it up.
    pub async fn set_interval_override(&self, seconds: u64) -> Result<()> {
        self.set_setting(INTERVAL_KEY, &seconds.to_string()).await
    }
}
