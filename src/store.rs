//! Durable message table: the single source of truth for queue state.

use std::path::{Path, PathBuf};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{Error, InvalidTransitionSnafu, MessageNotFoundSnafu, StoreUnavailableSnafu},
    message::{Message, MessageStatus},
};

const DB_FILE: &str = "courier.db";
const APP_DIR: &str = "courier";

#[derive(Clone, Debug)]
pub struct QueueStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl QueueStore {
    /// Opens the store at the configured path, or walks the candidate
    /// ladder when no explicit path is set.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        let candidates = match &config.db_path {
            Some(path) => vec![PathBuf::from(path)],
            None => Self::candidate_paths(),
        };

        Self::open_with_candidates(&candidates).await
    }

    /// Tries each candidate in order and adopts the first one whose schema
    /// opens. Failing all of them is the one unrecoverable startup error.
    pub async fn open_with_candidates(candidates: &[PathBuf]) -> Result<Self, Error> {
        for path in candidates {
            match Self::open_at(path).await {
                Ok(store) => {
                    info!(path = %store.path.display(), "queue store initialized");
                    return Ok(store);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "storage candidate rejected");
                }
            }
        }

        StoreUnavailableSnafu {
            candidates: candidates.to_vec(),
        }
        .fail()
    }

    /// Default storage locations, most preferred first: application
    /// directory, roaming profile, local profile, system temp.
    fn candidate_paths() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(dir.join(DB_FILE));
        }

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join(APP_DIR).join(DB_FILE));
        }

        if let Some(dir) = dirs::data_local_dir() {
            candidates.push(dir.join(APP_DIR).join(DB_FILE));
        }

        candidates.push(std::env::temp_dir().join(APP_DIR).join(DB_FILE));

        candidates
    }

    async fn open_at(path: &Path) -> eyre::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// The location adopted by the candidate search.
    pub fn resolved_path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new PENDING message and returns its id. Recipient and body
    /// validation is the producer interface's job; this fails only on
    /// storage errors.
    pub async fn enqueue(
        &self,
        recipient: impl AsRef<str>,
        body: impl AsRef<str>,
        attachment: Option<&str>,
    ) -> Result<i64, Error> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (recipient, body, attachment, status, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(recipient.as_ref())
        .bind(body.as_ref())
        .bind(attachment)
        .bind(MessageStatus::Pending)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Atomically selects the oldest PENDING message (ties by ascending id)
    /// and flips it to PROCESSING in the same statement, so a second caller
    /// can never claim the same row.
    pub async fn claim_next_pending(&self) -> Result<Option<Message>, Error> {
        let claimed = sqlx::query_as::<_, Message>(
            "UPDATE messages SET status = $1
             WHERE id = (
                 SELECT id FROM messages
                 WHERE status = $2
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(MessageStatus::Processing)
        .bind(MessageStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    /// Finalizes a PROCESSING message. Rejects unknown ids with
    /// `MessageNotFound` and anything not currently PROCESSING (or a
    /// requested status that is not terminal) with `InvalidTransition`.
    pub async fn mark_terminal(
        &self,
        id: i64,
        status: MessageStatus,
        detail: Option<&str>,
    ) -> Result<(), Error> {
        if !status.is_terminal() {
            return InvalidTransitionSnafu { id, status }.fail();
        }

        let mut tx = self.pool.begin().await?;

        let current: Option<MessageStatus> =
            sqlx::query_scalar("SELECT status FROM messages WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(current) = current else {
            return MessageNotFoundSnafu { id }.fail();
        };

        if current != MessageStatus::Processing {
            return InvalidTransitionSnafu {
                id,
                status: current,
            }
            .fail();
        }

        sqlx::query(
            "UPDATE messages SET status = $1, processed_at = $2, error_detail = $3
             WHERE id = $4",
        )
        .bind(status)
        .bind(chrono::Utc::now().timestamp())
        .bind(detail)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Message, Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::MessageNotFound { id })
    }

    /// Startup sweep for rows left PROCESSING by an ungraceful shutdown.
    ///
    /// With a single consumer, any PROCESSING row found before the loop
    /// starts is abandoned work: it goes back to PENDING with its requeue
    /// counter bumped, unless the counter has reached `limit`, in which case
    /// the row is finalized as ERROR instead of being retried forever.
    /// Returns (requeued, abandoned) counts.
    pub async fn recover_stale(&self, limit: u32) -> Result<(u64, u64), Error> {
        let mut tx = self.pool.begin().await?;

        let abandoned = sqlx::query(
            "UPDATE messages
             SET status = $1, processed_at = $2, error_detail = $3
             WHERE status = $4 AND requeues >= $5",
        )
        .bind(MessageStatus::Error)
        .bind(chrono::Utc::now().timestamp())
        .bind(format!("abandoned after {limit} crash-recovery requeues"))
        .bind(MessageStatus::Processing)
        .bind(limit as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            "UPDATE messages SET status = $1, requeues = requeues + 1 WHERE status = $2",
        )
        .bind(MessageStatus::Pending)
        .bind(MessageStatus::Processing)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok((requeued, abandoned))
    }
}
