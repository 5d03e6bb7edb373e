//! Time-windowed exact-match duplicate suppression.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio_stream::StreamExt;
use tracing::debug;

/// Checks a claimed message against recent traffic to the same recipient.
///
/// Matching is exact string equality after trimming; there is no similarity
/// scoring. A window of zero means the dispatch loop bypasses the guard
/// entirely, so `check` can assume a live window.
pub struct DuplicateGuard {
    pool: SqlitePool,
    window: Duration,
}

impl DuplicateGuard {
    pub fn new(pool: SqlitePool, window: Duration) -> Self {
        Self { pool, window }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Returns a human-readable suppression reason when an identical message
    /// to the same recipient was sent (or is being sent) within the window.
    ///
    /// `exclude_id` is the message under evaluation, which is itself already
    /// persisted as PROCESSING and must not match itself.
    pub async fn check(
        &self,
        recipient: &str,
        body: &str,
        exclude_id: i64,
    ) -> eyre::Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - self.window.as_secs() as i64;

        let mut rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT body, created_at FROM messages
             WHERE recipient = $1
               AND id != $2
               AND status IN ('SENT', 'PROCESSING')
               AND created_at > $3
             ORDER BY created_at DESC
             LIMIT 5",
        )
        .bind(recipient)
        .bind(exclude_id)
        .bind(cutoff)
        .fetch(&self.pool);

        let candidate = body.trim();

        while let Some((prev_body, created_at)) = rows.next().await.transpose()? {
            let elapsed = now - created_at;

            if candidate == prev_body.trim() {
                return Ok(Some(format!("exact duplicate delivered {elapsed}s ago")));
            }

            debug!(recipient, elapsed, "recent message differs");
        }

        Ok(None)
    }
}
