use std::{path::Path, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    audit::AuditLog,
    config::Config,
    dedup::DuplicateGuard,
    dispatch::DispatchLoop,
    driver::{ChannelState, DeliveryDriver},
    error::Error,
    message::Message,
    session::SessionMonitor,
    store::QueueStore,
};

const AUDIT_FILE: &str = "deliveries.csv";

/// The assembled dispatch service.
///
/// Explicitly constructed and explicitly torn down: it owns the queue store,
/// the duplicate guard, the audit ledger and the handle to the delivery
/// driver, and it runs the dispatch loop and session monitor as background
/// tasks under one cancellation token.
pub struct Service {
    store: QueueStore,
    audit: AuditLog,
    driver: Arc<dyn DeliveryDriver>,
    session: watch::Receiver<ChannelState>,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    pub async fn connect() -> eyre::Result<Self> {
        Self::connect_with(Config::default(), Arc::new(crate::driver::DetachedDriver)).await
    }

    pub async fn connect_with(
        config: Config,
        driver: Arc<dyn DeliveryDriver>,
    ) -> eyre::Result<Self> {
        let store = QueueStore::open(&config).await?;

        let (requeued, abandoned) = store.recover_stale(config.stale_requeue_limit).await?;
        if requeued > 0 || abandoned > 0 {
            info!(requeued, abandoned, "recovered stale in-flight messages");
        }

        let audit_path = match &config.audit_path {
            Some(path) => path.into(),
            None => store
                .resolved_path()
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(AUDIT_FILE),
        };
        let audit = AuditLog::new(audit_path);

        let guard = DuplicateGuard::new(
            store.pool().clone(),
            Duration::from_secs(config.duplicate_window_secs),
        );

        let monitor = SessionMonitor::new(
            driver.clone(),
            config.probe_timeout(),
            config.session_poll(),
        );
        let session = monitor.subscribe();

        let shutdown = CancellationToken::new();

        let dispatch = DispatchLoop::new(
            store.clone(),
            guard,
            audit.clone(),
            driver.clone(),
            &config,
            shutdown.child_token(),
        );

        let tasks = vec![
            tokio::spawn(dispatch.run()),
            tokio::spawn(monitor.run(shutdown.child_token())),
        ];

        Ok(Self {
            store,
            audit,
            driver,
            session,
            shutdown,
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    /// Accepts a new message for delivery and returns its id.
    ///
    /// Recipient/body validation belongs to the producer interface; this
    /// fails only when storage is unavailable.
    pub async fn enqueue(
        &self,
        recipient: impl AsRef<str>,
        body: impl AsRef<str>,
        attachment: Option<&str>,
    ) -> Result<i64, Error> {
        let id = self
            .store
            .enqueue(recipient.as_ref(), body.as_ref(), attachment)
            .await?;

        info!(id, recipient = recipient.as_ref(), "message queued");

        Ok(id)
    }

    /// Per-message outcome inspection.
    pub async fn message(&self, id: i64) -> Result<Message, Error> {
        self.store.get(id).await
    }

    /// Last published session classification.
    pub fn status(&self) -> ChannelState {
        *self.session.borrow()
    }

    /// Watch channel of session transitions, for orchestrating layers.
    pub fn session_events(&self) -> watch::Receiver<ChannelState> {
        self.session.clone()
    }

    pub async fn challenge_artifact(&self) -> Option<Vec<u8>> {
        self.driver.challenge_artifact().await
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Stops the background tasks. The in-flight dispatch iteration finishes
    /// its terminal write before the loop exits.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}
