//! Connection lifecycle of a task subscription.
//!
//! The controller is a plain state machine (`Disabled -> Connecting ->
//! Enabled <-> Error`) advanced by discrete calls: [`start`], [`on_open`],
//! [`on_frame`], [`on_error`], [`on_close`], [`teardown`]. It never owns the
//! connection loop; the session driver feeds it what the transport reports
//! and acts on the [`CloseAction`] it returns, so every transition is
//! testable without a live connection.
//!
//! [`start`]: SubscriptionController::start
//! [`on_open`]: SubscriptionController::on_open
//! [`on_frame`]: SubscriptionController::on_frame
//! [`on_error`]: SubscriptionController::on_error
//! [`on_close`]: SubscriptionController::on_close
//! [`teardown`]: SubscriptionController::teardown

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tl_core::config::SubscriptionConfig;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::transport::ProxyTransport;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Credential used to open the subscription. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken {
    value: String,
    #[zeroize(skip)]
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where the controller gets its credential from.
///
/// `None` means the backend is not configured or unavailable. It is an
/// expected answer, not an error, and disables the subscription.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Option<AccessToken>;
}

/// A token source that always answers the same.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(pub Option<AccessToken>);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self) -> Option<AccessToken> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Disabled,
    Connecting,
    Enabled,
    /// A transient failure was reported; the subscription stays enabled.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Stream/socket level trouble the transport is expected to recover from.
    Transient,
    /// Credential rejected. Retrying with the same token cannot succeed.
    Auth,
    /// Matched no marker. Handled like [`ErrorClass::Transient`].
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
}

/// Substring-based error classification. Auth markers win over transient
/// ones, so `"socket closed: 401 unauthorized"` counts as an auth failure.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    transient: Vec<String>,
    auth: Vec<String>,
}

impl ErrorClassifier {
    pub fn from_config(cfg: &SubscriptionConfig) -> Self {
        let normalize = |markers: &[String]| {
            markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };
        Self {
            transient: normalize(&cfg.transient_error_markers),
            auth: normalize(&cfg.auth_error_markers),
        }
    }

    pub fn classify(&self, message: &str) -> ErrorClass {
        let lower = message.to_lowercase();
        if self.auth.iter().any(|m| lower.contains(m.as_str())) {
            ErrorClass::Auth
        } else if self.transient.iter().any(|m| lower.contains(m.as_str())) {
            ErrorClass::Transient
        } else {
            ErrorClass::Unknown
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&SubscriptionConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Doubling delay: `base`, `2 * base`, `4 * base`, ... capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &SubscriptionConfig) -> Self {
        Self {
            base: cfg.reconnect_delay(),
            max: cfg.max_reconnect_delay(),
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SubscriptionConfig::default())
    }
}

/// What the driver should do after the connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Clean close: wait, then reconnect once.
    Reconnect { attempt: u32, delay: Duration },
    /// Close after a transient error: wait, refresh the token, then reconnect.
    Recheck { attempt: u32, delay: Duration },
    /// Subscription is disabled; nothing to do.
    Stop,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct SubscriptionController<S> {
    task_id: String,
    source: S,
    state: SubscriptionState,
    token: Option<AccessToken>,
    last_error: Option<ClassifiedError>,
    attempt: u32,
    initialized: bool,
    mounted: bool,
    classifier: ErrorClassifier,
    policy: ReconnectPolicy,
}

impl<S: TokenSource> SubscriptionController<S> {
    pub fn new(task_id: impl Into<String>, source: S, cfg: &SubscriptionConfig) -> Self {
        Self {
            task_id: task_id.into(),
            source,
            state: SubscriptionState::Disabled,
            token: None,
            last_error: None,
            attempt: 0,
            initialized: false,
            mounted: true,
            classifier: ErrorClassifier::from_config(cfg),
            policy: ReconnectPolicy::from_config(cfg),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Enabled means "should be receiving": connecting, connected, or riding
    /// out a transient error.
    pub fn is_enabled(&self) -> bool {
        self.state != SubscriptionState::Disabled
    }

    pub fn is_connected(&self) -> bool {
        self.state == SubscriptionState::Enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.last_error.as_ref()
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempt
    }

    /// Obtain a token and move to `Connecting`, or stay `Disabled` when no
    /// valid token is available.
    pub async fn start(&mut self) -> SubscriptionState {
        if !self.mounted {
            return self.state;
        }
        self.initialized = true;
        self.state = SubscriptionState::Connecting;
        if self.refresh_token().await.is_some() {
            tracing::debug!(task_id = %self.task_id, "subscription connecting");
        }
        self.state
    }

    /// Fetch a fresh token on demand. `None` (or an already expired token)
    /// disables the subscription instead of retrying.
    pub async fn refresh_token(&mut self) -> Option<AccessToken> {
        if !self.mounted {
            return None;
        }
        let token = self
            .source
            .fetch_token()
            .await
            .filter(|t| !t.is_expired_at(Utc::now()));
        match token {
            Some(token) => {
                self.token = Some(token.clone());
                Some(token)
            }
            None => {
                self.token = None;
                self.disable("token unavailable");
                None
            }
        }
    }

    /// The transport reported an established connection.
    pub fn on_open(&mut self) {
        if self.state == SubscriptionState::Disabled {
            return;
        }
        self.state = SubscriptionState::Enabled;
        self.attempt = 0;
        self.last_error = None;
        tracing::info!(task_id = %self.task_id, "subscription enabled");
    }

    /// A frame arrived on the open connection. Leaves `Error` for `Enabled`
    /// and forgets the recorded error; returns `true` when it recovered.
    pub fn on_frame(&mut self) -> bool {
        if self.state != SubscriptionState::Error {
            return false;
        }
        self.state = SubscriptionState::Enabled;
        self.last_error = None;
        tracing::info!(task_id = %self.task_id, "subscription recovered");
        true
    }

    /// Record and classify a transport error.
    pub fn on_error(&mut self, message: &str) -> ErrorClass {
        let class = self.classifier.classify(message);
        self.last_error = Some(ClassifiedError {
            class,
            message: message.to_string(),
        });
        match class {
            ErrorClass::Auth => {
                tracing::warn!(task_id = %self.task_id, error = %message, "authentication failed");
                self.disable("authentication failed");
            }
            ErrorClass::Transient | ErrorClass::Unknown => {
                tracing::warn!(
                    task_id = %self.task_id,
                    error = %message,
                    class = ?class,
                    "subscription error, waiting for transport to recover"
                );
                if self.state != SubscriptionState::Disabled {
                    self.state = SubscriptionState::Error;
                }
            }
        }
        class
    }

    /// The connection closed. Schedules one reconnect per close while the
    /// subscription is enabled.
    pub fn on_close(&mut self) -> CloseAction {
        if !self.mounted || self.state == SubscriptionState::Disabled {
            tracing::debug!(task_id = %self.task_id, "closed while disabled");
            return CloseAction::Stop;
        }
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.state = SubscriptionState::Connecting;
        tracing::info!(
            task_id = %self.task_id,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "connection closed, scheduling reconnect"
        );
        if self.last_error.is_none() {
            CloseAction::Reconnect {
                attempt: self.attempt,
                delay,
            }
        } else {
            CloseAction::Recheck {
                attempt: self.attempt,
                delay,
            }
        }
    }

    /// Unmount: disable immediately, then close the transport. Disconnect
    /// failures are logged and swallowed.
    pub async fn teardown<T: ProxyTransport + ?Sized>(&mut self, transport: &mut T) {
        self.mounted = false;
        self.disable("teardown");
        self.token = None;
        if let Err(e) = transport.disconnect().await {
            tracing::warn!(task_id = %self.task_id, error = %e, "disconnect during teardown failed");
        }
    }

    fn disable(&mut self, reason: &str) {
        if self.state != SubscriptionState::Disabled {
            tracing::info!(task_id = %self.task_id, reason, "subscription disabled");
        }
        self.state = SubscriptionState::Disabled;
    }
}
