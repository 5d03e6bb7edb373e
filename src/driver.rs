//! The delivery-channel boundary.
//!
//! The queue core never touches the messaging web client directly; it talks
//! to a [`DeliveryDriver`], whose internals (browser automation, DOM
//! selection, screenshots) live outside this crate.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Authentication/readiness phase of the external delivery channel.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    /// The driver has no live surface yet
    Uninitialized,
    /// The surface is up but neither readiness signal has appeared
    Loading,
    /// The channel is showing an authentication challenge to complete
    WaitingAuthentication,
    /// An authenticated session is active; sends may succeed
    Connected,
}

/// Failure reported by a delivery attempt.
///
/// The driver owns its per-operation timeout: every `send` resolves within
/// bounded time, reporting a hang as an ordinary failure.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait DeliveryDriver: Send + Sync {
    /// Delivers one message. Fails fast when the channel is not ready.
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError>;

    /// True once the driver has a surface worth probing at all.
    fn is_initialized(&self) -> bool;

    /// Probes for the authenticated-session marker.
    async fn probe_authenticated(&self, timeout: Duration) -> bool;

    /// Probes for the authentication-challenge marker.
    async fn probe_challenge(&self, timeout: Duration) -> bool;

    /// Image of the authentication challenge currently on screen, if any,
    /// for surfacing to a human.
    async fn challenge_artifact(&self) -> Option<Vec<u8>>;
}

/// Stand-in driver used when no automation bridge is attached.
///
/// The service keeps serving its HTTP surface in this mode (messages queue
/// up, status reports `uninitialized`), matching the degraded startup path
/// of a deployment whose browser layer failed to come up.
#[derive(Default)]
pub struct DetachedDriver;

#[async_trait]
impl DeliveryDriver for DetachedDriver {
    async fn send(
        &self,
        _recipient: &str,
        _body: &str,
        _attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::new("no delivery driver attached"))
    }

    fn is_initialized(&self) -> bool {
        false
    }

    async fn probe_authenticated(&self, _timeout: Duration) -> bool {
        false
    }

    async fn probe_challenge(&self, _timeout: Duration) -> bool {
        false
    }

    async fn challenge_artifact(&self) -> Option<Vec<u8>> {
        None
    }
}
