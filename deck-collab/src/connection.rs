//! Connection manager: the single logical link to the hub.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected ──► Reconnecting ──► Connected
//!                       │                            │
//!                       └───────── failure ──────────┴──► Disconnected (exhausted)
//! ```
//!
//! The manager owns the link and the retry bookkeeping. It never sleeps or
//! spawns: a failure yields a [`Retry`] decision and the client actor arms
//! the timer. The attempt counter resets only on a successful connect.

use std::time::Duration;

use futures_util::future;

use crate::protocol::HubRequest;
use crate::transport::{HubLink, LinkEvent, TransportError};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection status as presented to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Waiting `retry_in` before attempt number `attempt`
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Closed deliberately
    Disconnected,
    /// Retries exhausted; needs manual action
    Failed { attempts: u32 },
}

/// What to do after a failed connect or a lost link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    After(Duration),
    GiveUp,
}

pub struct ConnectionManager {
    state: ConnectionState,
    /// Consecutive failures since the last successful connect
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    link: Option<HubLink>,
    exhausted: bool,
    /// A link was up before, or a connect attempt failed: the next
    /// success may have missed hub changes
    had_link_or_failure: bool,
}

impl ConnectionManager {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            base_delay,
            link: None,
            exhausted: false,
            had_link_or_failure: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.link.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once retries ran out. Cleared by a successful connect.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Delay before the retry that follows failure number `failures`
    /// (0-based): `2^failures × base`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    // ─── Lifecycle ─────────────────────────────────────────────────

    /// Start a connect attempt. Returns `false` when already connected.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected if self.link.is_some() => false,
            ConnectionState::Reconnecting => true,
            _ => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// Install a freshly established link. Returns `true` if this is a
    /// reconnect: a previous link existed, or an earlier attempt failed.
    pub fn established(&mut self, link: HubLink) -> bool {
        let was_reconnect = self.had_link_or_failure;
        self.link = Some(link);
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.exhausted = false;
        self.had_link_or_failure = true;
        was_reconnect
    }

    /// Record a failed connect attempt or an unexpected close.
    pub fn on_failure(&mut self) -> Retry {
        self.link = None;
        self.had_link_or_failure = true;
        if self.attempts >= self.max_attempts {
            self.state = ConnectionState::Disconnected;
            self.exhausted = true;
            return Retry::GiveUp;
        }
        let delay = self.backoff_delay(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        Retry::After(delay)
    }

    /// Forget earlier failures, e.g. before a manual reconnect.
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Close the link deliberately. No reconnect follows.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.outbound.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting => ConnectionStatus::Reconnecting {
                attempt: self.attempts,
                retry_in: self.backoff_delay(self.attempts.saturating_sub(1)),
            },
            ConnectionState::Disconnected if self.exhausted => ConnectionStatus::Failed {
                attempts: self.attempts,
            },
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
        }
    }

    // ─── I/O ───────────────────────────────────────────────────────

    /// Send a request on the live link.
    pub async fn send(&mut self, request: &HubRequest) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::Closed);
        }
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;
        let frame = request.encode()?;
        link.outbound.send(frame).await
    }

    /// Next inbound event. Never resolves while there is no link.
    pub async fn next_event(&mut self) -> LinkEvent {
        match self.link.as_mut() {
            Some(link) => link
                .inbound
                .recv()
                .await
                .unwrap_or(LinkEvent::Closed(None)),
            None => future::pending().await,
        }
    }

    /// Inbound event that is already waiting, if any.
    pub fn try_next_event(&mut self) -> Option<LinkEvent> {
        let link = self.link.as_mut()?;
        match link.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => None,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => Some(LinkEvent::Closed(None)),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY)
    }
}
