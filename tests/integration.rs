use std::{
    collections::VecDeque,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier::{
    audit::AuditLog,
    config::Config,
    dedup::DuplicateGuard,
    driver::{ChannelState, DeliveryDriver, DeliveryError},
    error::Error,
    message::{Message, MessageStatus},
    service::Service,
    session::SessionMonitor,
    store::QueueStore,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Driver whose send outcomes are scripted per call; defaults to success
/// once the script runs out.
#[derive(Default)]
struct ScriptedDriver {
    responses: Mutex<VecDeque<Result<(), String>>>,
    sent: Mutex<Vec<(String, String)>>,
    initialized: bool,
    authenticated: AtomicBool,
    challenge: AtomicBool,
}

impl ScriptedDriver {
    fn always_ok() -> Self {
        Self {
            initialized: true,
            authenticated: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn with_responses(responses: impl IntoIterator<Item = Result<(), String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::always_ok()
        }
    }
}

#[async_trait]
impl DeliveryDriver for ScriptedDriver {
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        _attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        let next = self.responses.lock().await.pop_front().unwrap_or(Ok(()));

        match next {
            Ok(()) => {
                self.sent
                    .lock()
                    .await
                    .push((recipient.to_owned(), body.to_owned()));
                Ok(())
            }
            Err(message) => Err(DeliveryError::new(message)),
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    async fn probe_authenticated(&self, _timeout: Duration) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn probe_challenge(&self, _timeout: Duration) -> bool {
        self.challenge.load(Ordering::SeqCst)
    }

    async fn challenge_artifact(&self) -> Option<Vec<u8>> {
        if self.challenge.load(Ordering::SeqCst) {
            Some(vec![0x89, 0x50, 0x4e, 0x47])
        } else {
            None
        }
    }
}

fn fast_config(dir: &Path) -> Config {
    Config {
        db_path: Some(dir.join("courier.db").to_string_lossy().into_owned()),
        audit_path: Some(dir.join("deliveries.csv").to_string_lossy().into_owned()),
        idle_poll_ms: 10,
        pre_send_delay_ms: 0,
        post_send_delay_ms: 0,
        error_backoff_ms: 10,
        probe_timeout_ms: 10,
        session_poll_ms: 10,
        ..Config::default()
    }
}

struct TmpService {
    svc: Service,
    #[allow(unused)]
    tmpdir: TempDir,
}

impl Deref for TmpService {
    type Target = Service;

    fn deref(&self) -> &Self::Target {
        &self.svc
    }
}

async fn setup_with(driver: Arc<dyn DeliveryDriver>) -> TmpService {
    let tmpdir = tempfile::tempdir().unwrap();

    TmpService {
        svc: Service::connect_with(fast_config(tmpdir.path()), driver)
            .await
            .unwrap(),
        tmpdir,
    }
}

async fn open_store(dir: &Path) -> QueueStore {
    QueueStore::open_with_candidates(&[dir.join("courier.db")])
        .await
        .unwrap()
}

async fn wait_terminal(svc: &Service, id: i64) -> Message {
    for _ in 0..400 {
        let message = svc.message(id).await.unwrap();
        if message.status.is_terminal() {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("message {id} never reached a terminal state");
}

async fn backdate(store: &QueueStore, id: i64, seconds: i64) {
    sqlx::query("UPDATE messages SET created_at = created_at - $1 WHERE id = $2")
        .bind(seconds)
        .bind(id)
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn claims_follow_enqueue_order_with_id_tiebreak() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let a = store.enqueue("111", "first", None).await.unwrap();
    let b = store.enqueue("222", "second", None).await.unwrap();
    let c = store.enqueue("333", "third", None).await.unwrap();

    // Make c the oldest; a and b share a timestamp and fall back to id order.
    backdate(&store, c, 100).await;

    let claimed: Vec<i64> = [
        store.claim_next_pending().await.unwrap().unwrap().id,
        store.claim_next_pending().await.unwrap().unwrap().id,
        store.claim_next_pending().await.unwrap().unwrap().id,
    ]
    .into();

    assert_eq!(claimed, vec![c, a, b]);
    assert!(store.claim_next_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn claim_moves_message_to_processing_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let id = store.enqueue("51999", "hello", None).await.unwrap();

    let claimed = store.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, MessageStatus::Processing);

    // The row is no longer claimable by a second caller.
    assert!(store.claim_next_pending().await.unwrap().is_none());
    assert_eq!(
        store.get(id).await.unwrap().status,
        MessageStatus::Processing
    );
}

#[tokio::test]
async fn terminal_states_are_final() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let id = store.enqueue("51999", "hello", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    store
        .mark_terminal(id, MessageStatus::Sent, None)
        .await
        .unwrap();

    let sent = store.get(id).await.unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);
    assert!(sent.processed_at.is_some());

    let err = store
        .mark_terminal(id, MessageStatus::Error, Some("late failure"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let after = store.get(id).await.unwrap();
    assert_eq!(after.status, MessageStatus::Sent);
    assert_eq!(after.processed_at, sent.processed_at);
}

#[tokio::test]
async fn mark_terminal_guards_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let err = store
        .mark_terminal(9999, MessageStatus::Sent, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MessageNotFound { id: 9999 }));

    let id = store.enqueue("51999", "hello", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    // Only terminal statuses are accepted.
    let err = store
        .mark_terminal(id, MessageStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn stale_processing_rows_are_requeued_with_a_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let id = store.enqueue("51999", "hello", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    let (requeued, abandoned) = store.recover_stale(3).await.unwrap();
    assert_eq!((requeued, abandoned), (1, 0));

    let recovered = store.get(id).await.unwrap();
    assert_eq!(recovered.status, MessageStatus::Pending);
    assert_eq!(recovered.requeues, 1);

    // A message that already burned its requeue budget goes to ERROR instead.
    store.claim_next_pending().await.unwrap().unwrap();
    sqlx::query("UPDATE messages SET requeues = 3 WHERE id = $1")
        .bind(id)
        .execute(store.pool())
        .await
        .unwrap();

    let (requeued, abandoned) = store.recover_stale(3).await.unwrap();
    assert_eq!((requeued, abandoned), (0, 1));

    let poisoned = store.get(id).await.unwrap();
    assert_eq!(poisoned.status, MessageStatus::Error);
    assert!(poisoned.error_detail.unwrap().contains("abandoned"));
}

#[tokio::test]
async fn duplicate_window_matches_inside_and_releases_outside() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let guard = DuplicateGuard::new(store.pool().clone(), Duration::from_secs(60));

    let a = store.enqueue("51999", "hi", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();
    store
        .mark_terminal(a, MessageStatus::Sent, None)
        .await
        .unwrap();
    backdate(&store, a, 30).await;

    let b = store.enqueue("51999", "hi", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    let reason = guard
        .check("51999", "hi", b)
        .await
        .unwrap()
        .expect("identical message 30s back must be suppressed");
    assert!(
        reason.contains("30s") || reason.contains("31s"),
        "unexpected reason: {reason}"
    );

    // Push the prior send outside the window.
    backdate(&store, a, 31).await;
    assert!(guard.check("51999", "hi", b).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_match_is_exact_after_trim() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let guard = DuplicateGuard::new(store.pool().clone(), Duration::from_secs(60));

    let a = store.enqueue("51999", "hi", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();
    store
        .mark_terminal(a, MessageStatus::Sent, None)
        .await
        .unwrap();

    // Trailing whitespace trims away and matches.
    assert!(guard.check("51999", "hi ", -1).await.unwrap().is_some());
    // Case differences do not match.
    assert!(guard.check("51999", "Hi", -1).await.unwrap().is_none());
    // Other recipients are never considered.
    assert!(guard.check("51998", "hi", -1).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_check_excludes_the_candidate_itself() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let guard = DuplicateGuard::new(store.pool().clone(), Duration::from_secs(60));

    let id = store.enqueue("51999", "hi", None).await.unwrap();
    store.claim_next_pending().await.unwrap().unwrap();

    // The message under evaluation is already PROCESSING in the table and
    // must not collide with itself.
    assert!(guard.check("51999", "hi", id).await.unwrap().is_none());
}

#[tokio::test]
async fn store_falls_back_to_next_candidate() {
    let dir = tempfile::tempdir().unwrap();

    // First candidate's parent is a plain file, so it can never be created.
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let candidates = vec![
        blocked.join("courier.db"),
        dir.path().join("fallback").join("courier.db"),
    ];

    let store = QueueStore::open_with_candidates(&candidates).await.unwrap();
    assert_eq!(store.resolved_path(), candidates[1]);

    // The adopted location is actually usable.
    store.enqueue("51999", "hello", None).await.unwrap();
}

#[tokio::test]
async fn store_unavailable_when_every_candidate_fails() {
    let dir = tempfile::tempdir().unwrap();

    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let candidates: Vec<PathBuf> = vec![blocked.join("courier.db")];

    let err = QueueStore::open_with_candidates(&candidates)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable { .. }));
}

#[tokio::test]
async fn failed_delivery_marks_error_and_loop_continues() {
    let driver = Arc::new(ScriptedDriver::with_responses([
        Err("channel not ready".to_owned()),
        Ok(()),
    ]));
    let service = setup_with(driver.clone()).await;

    let first = service.enqueue("111", "will fail", None).await.unwrap();
    let second = service.enqueue("222", "will pass", None).await.unwrap();

    let failed = wait_terminal(&service, first).await;
    assert_eq!(failed.status, MessageStatus::Error);
    assert!(failed.error_detail.unwrap().contains("channel not ready"));

    let delivered = wait_terminal(&service, second).await;
    assert_eq!(delivered.status, MessageStatus::Sent);
    assert!(delivered.processed_at.is_some());

    let sent = driver.sent.lock().await;
    assert_eq!(sent.as_slice(), [("222".to_owned(), "will pass".to_owned())]);

    service.close().await;
}

#[tokio::test]
async fn audit_write_failure_falls_back_to_secondary_file() {
    let dir = tempfile::tempdir().unwrap();

    // Primary path is a directory, so every append to it fails.
    let primary = dir.path().join("deliveries.csv");
    std::fs::create_dir(&primary).unwrap();

    let audit = AuditLog::new(&primary);
    audit.append("51999", "Hello", "success");

    let fallback = audit.fallback_path();
    let contents = std::fs::read_to_string(&fallback).unwrap();
    assert!(contents.starts_with("Timestamp,Recipient,Message,Status"));
    assert!(contents.contains("51999,Hello,success"));
}

#[tokio::test]
async fn end_to_end_delivery_leaves_sent_state_and_audit_row() {
    let service = setup_with(Arc::new(ScriptedDriver::always_ok())).await;

    let id = service.enqueue("51999", "Hello", None).await.unwrap();

    let message = wait_terminal(&service, id).await;
    assert_eq!(message.status, MessageStatus::Sent);
    assert!(message.processed_at.is_some());
    assert!(message.error_detail.is_none());

    let contents = std::fs::read_to_string(service.audit().path()).unwrap();
    let row = contents
        .lines()
        .find(|line| line.contains("51999"))
        .expect("audit row for the delivery");
    assert!(row.ends_with("51999,Hello,success"), "row: {row}");

    service.close().await;
}

#[tokio::test]
async fn identical_message_in_window_is_suppressed_by_the_loop() {
    let service = setup_with(Arc::new(ScriptedDriver::always_ok())).await;

    let first = service.enqueue("51999", "promo", None).await.unwrap();
    let second = service.enqueue("51999", "promo", None).await.unwrap();

    assert_eq!(
        wait_terminal(&service, first).await.status,
        MessageStatus::Sent
    );

    let suppressed = wait_terminal(&service, second).await;
    assert_eq!(suppressed.status, MessageStatus::Duplicate);
    assert!(suppressed.error_detail.unwrap().contains("duplicate"));

    // Only the delivered message reaches the ledger.
    let contents = std::fs::read_to_string(service.audit().path()).unwrap();
    assert_eq!(
        contents.lines().filter(|l| l.contains("promo")).count(),
        1
    );

    service.close().await;
}

#[tokio::test]
async fn zero_window_disables_duplicate_suppression() {
    let tmpdir = tempfile::tempdir().unwrap();
    let mut config = fast_config(tmpdir.path());
    config.duplicate_window_secs = 0;

    let service = Service::connect_with(config, Arc::new(ScriptedDriver::always_ok()))
        .await
        .unwrap();

    let first = service.enqueue("51999", "promo", None).await.unwrap();
    let second = service.enqueue("51999", "promo", None).await.unwrap();

    assert_eq!(
        wait_terminal(&service, first).await.status,
        MessageStatus::Sent
    );
    assert_eq!(
        wait_terminal(&service, second).await.status,
        MessageStatus::Sent
    );

    service.close().await;
}

#[tokio::test]
async fn session_monitor_classifies_both_probe_signals() {
    let driver = Arc::new(ScriptedDriver::always_ok());
    let monitor = SessionMonitor::new(
        driver.clone(),
        Duration::from_millis(10),
        Duration::from_millis(10),
    );

    assert_eq!(monitor.classify().await, ChannelState::Connected);

    driver.authenticated.store(false, Ordering::SeqCst);
    assert_eq!(monitor.classify().await, ChannelState::Loading);

    driver.challenge.store(true, Ordering::SeqCst);
    assert_eq!(
        monitor.classify().await,
        ChannelState::WaitingAuthentication
    );
}

#[tokio::test]
async fn detached_service_reports_uninitialized_and_queues_messages() {
    let service = setup_with(Arc::new(courier::driver::DetachedDriver)).await;

    assert_eq!(service.status(), ChannelState::Uninitialized);
    assert!(service.challenge_artifact().await.is_none());

    // Sends fail fast but the queue itself keeps accepting and recording.
    let id = service.enqueue("51999", "queued", None).await.unwrap();
    let message = wait_terminal(&service, id).await;
    assert_eq!(message.status, MessageStatus::Error);
    assert!(message
        .error_detail
        .unwrap()
        .contains("no delivery driver attached"));

    service.close().await;
}
