//! Session-state synchronization with the delivery channel.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::driver::{ChannelState, DeliveryDriver};

/// Polls the delivery channel's lifecycle and classifies it into a
/// [`ChannelState`].
///
/// Classification runs two independent, short-timeout probes: the
/// authenticated-session marker wins over the authentication-challenge
/// marker, and the absence of both within the probe timeout reads as
/// `Loading`. The result is published through a watch channel, which is also
/// the observable session-lifecycle stream for orchestrating layers.
///
/// The monitor never gates the dispatch loop: a send against a non-ready
/// channel fails fast inside the driver and lands as an ordinary error
/// outcome.
pub struct SessionMonitor {
    driver: Arc<dyn DeliveryDriver>,
    probe_timeout: Duration,
    poll_interval: Duration,
    tx: watch::Sender<ChannelState>,
}

impl SessionMonitor {
    pub fn new(
        driver: Arc<dyn DeliveryDriver>,
        probe_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(ChannelState::Uninitialized);

        Self {
            driver,
            probe_timeout,
            poll_interval,
            tx,
        }
    }

    /// Receiver for the published state; clones observe every transition.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.tx.subscribe()
    }

    pub async fn classify(&self) -> ChannelState {
        if !self.driver.is_initialized() {
            return ChannelState::Uninitialized;
        }

        if self.driver.probe_authenticated(self.probe_timeout).await {
            return ChannelState::Connected;
        }

        if self.driver.probe_challenge(self.probe_timeout).await {
            return ChannelState::WaitingAuthentication;
        }

        ChannelState::Loading
    }

    /// Poll loop; runs until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let state = self.classify().await;

            self.tx.send_if_modified(|current| {
                if *current == state {
                    return false;
                }

                info!(from = %current, to = %state, "session state changed");
                *current = state;
                true
            });

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
