//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration against a local hub.

use std::time::Duration;

use crate::connection::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY};
use crate::offline::DEFAULT_QUEUE_CAPACITY;
use crate::pending::DEFAULT_PENDING_WINDOW;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub endpoint.
    /// Env: `DECK_HUB_URL`
    /// Default: `ws://127.0.0.1:8080/presentationHub`
    pub hub_url: String,

    /// REST API base.
    /// Env: `DECK_API_URL`
    /// Default: `http://127.0.0.1:8080`
    pub api_base_url: String,

    /// Bearer token, sent as `access_token` on the hub URL.
    /// Env: `DECK_AUTH_TOKEN`
    pub auth_token: Option<String>,

    /// Env: `DECK_MAX_RECONNECT_ATTEMPTS`
    pub max_reconnect_attempts: u32,

    /// Env: `DECK_RECONNECT_BASE_MS`
    pub reconnect_base_delay: Duration,

    /// Echo-suppression window.
    /// Env: `DECK_PENDING_WINDOW_MS`
    pub pending_window: Duration,

    /// Coalescing window for content edits.
    /// Env: `DECK_DEBOUNCE_MS`
    pub debounce_window: Duration,

    /// Env: `DECK_OFFLINE_QUEUE_CAPACITY`
    pub offline_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:8080/presentationHub".to_string(),
            api_base_url: "http://127.0.0.1:8080".to_string(),
            auth_token: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            pending_window: DEFAULT_PENDING_WINDOW,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            offline_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DECK_HUB_URL") {
            config.hub_url = url;
        }

        if let Some(url) = lookup("DECK_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("DECK_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(n) = parse_var(&lookup, "DECK_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = n;
        }

        if let Some(ms) = parse_var(&lookup, "DECK_RECONNECT_BASE_MS") {
            config.reconnect_base_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&lookup, "DECK_PENDING_WINDOW_MS") {
            config.pending_window = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&lookup, "DECK_DEBOUNCE_MS") {
            config.debounce_window = Duration::from_millis(ms);
        }

        match parse_var::<usize>(&lookup, "DECK_OFFLINE_QUEUE_CAPACITY") {
            Some(0) => log::warn!("DECK_OFFLINE_QUEUE_CAPACITY must be positive, using default"),
            Some(n) => config.offline_queue_capacity = n,
            None => {}
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Invalid {key}={raw:?}, using default");
            None
        }
    }
}
