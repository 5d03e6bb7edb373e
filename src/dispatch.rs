//! The sequential consumer: claims one message at a time and drives it to a
//! terminal state.
//!
//! There is exactly one dispatch loop per service, which is what enforces
//! the at-most-one-in-flight invariant; the store's atomic claim is the
//! safety margin underneath it. One bad message degrades throughput, never
//! availability: every per-message failure is contained inside its own
//! iteration.

use std::{path::Path, sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audit::AuditLog,
    config::Config,
    dedup::DuplicateGuard,
    driver::DeliveryDriver,
    message::{Message, MessageStatus},
    store::QueueStore,
};

pub struct DispatchLoop {
    store: QueueStore,
    guard: DuplicateGuard,
    audit: AuditLog,
    driver: Arc<dyn DeliveryDriver>,
    idle_poll: Duration,
    pre_send_delay: Duration,
    post_send_delay: Duration,
    error_backoff: Duration,
    shutdown: CancellationToken,
}

impl DispatchLoop {
    pub fn new(
        store: QueueStore,
        guard: DuplicateGuard,
        audit: AuditLog,
        driver: Arc<dyn DeliveryDriver>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            guard,
            audit,
            driver,
            idle_poll: config.idle_poll(),
            pre_send_delay: config.pre_send_delay(),
            post_send_delay: config.post_send_delay(),
            error_backoff: config.error_backoff(),
            shutdown,
        }
    }

    /// Runs until cancelled. Cancellation is observed between iterations and
    /// during the loop-level sleeps, never inside an iteration, so the
    /// in-flight message always reaches its terminal write.
    pub async fn run(self) {
        info!("dispatch loop started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.tick().await {
                // Processed a message; claim the next one immediately.
                Ok(true) => {}
                // Queue drained; idle poll.
                Ok(false) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(self.idle_poll) => {}
                    }
                }
                Err(err) => {
                    error!(?err, "dispatch iteration failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        info!("dispatch loop stopped");
    }

    /// One iteration: claim, process, contain. Returns false when the queue
    /// is empty.
    async fn tick(&self) -> eyre::Result<bool> {
        let Some(msg) = self.store.claim_next_pending().await? else {
            return Ok(false);
        };

        if let Err(err) = self.process(&msg).await {
            warn!(id = msg.id, recipient = %msg.recipient, ?err, "containing failed iteration");

            // Leave a truthful terminal state behind rather than a wedged
            // PROCESSING row. The guarded transition makes this a no-op if
            // the message already went terminal.
            if let Err(mark_err) = self
                .store
                .mark_terminal(msg.id, MessageStatus::Error, Some(&format!("{err:#}")))
                .await
            {
                debug!(id = msg.id, ?mark_err, "terminal write after failure skipped");
            }

            return Err(err);
        }

        Ok(true)
    }

    async fn process(&self, msg: &Message) -> eyre::Result<()> {
        if self.guard.is_enabled() {
            if let Some(reason) = self
                .guard
                .check(&msg.recipient, &msg.body, msg.id)
                .await?
            {
                info!(id = msg.id, recipient = %msg.recipient, %reason, "duplicate suppressed");
                self.store
                    .mark_terminal(msg.id, MessageStatus::Duplicate, Some(&reason))
                    .await?;

                // Suppressed sends hit no channel, so no throttle delay.
                return Ok(());
            }
        }

        sleep(self.pre_send_delay).await;

        let attachment = msg.attachment.as_deref().map(Path::new);

        match self.driver.send(&msg.recipient, &msg.body, attachment).await {
            Ok(()) => {
                self.store
                    .mark_terminal(msg.id, MessageStatus::Sent, None)
                    .await?;
                self.audit
                    .append(&msg.recipient, self.audit_label(msg), "success");

                info!(id = msg.id, recipient = %msg.recipient, "message delivered");

                sleep(self.post_send_delay).await;
            }
            Err(err) => {
                warn!(id = msg.id, recipient = %msg.recipient, %err, "delivery failed");
                self.store
                    .mark_terminal(msg.id, MessageStatus::Error, Some(&err.message))
                    .await?;
                self.audit
                    .append(&msg.recipient, self.audit_label(msg), &format!("error: {err}"));
            }
        }

        Ok(())
    }

    fn audit_label<'a>(&self, msg: &'a Message) -> &'a str {
        if msg.body.is_empty() {
            "[attachment]"
        } else {
            &msg.body
        }
    }
}
