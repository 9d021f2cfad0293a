//! Long-lived streaming session with reconnect handling.
//!
//! A [`StreamSession`] owns one logical session (init payload, callbacks,
//! retry budget) across any number of physical [`Channel`]s. A background
//! worker holds the state machine and handles commands, channel events and
//! the backoff timer one at a time, so callbacks never overlap.
//!
//! Faults never escape the session: transport failures are reported as
//! `on_error("ws_error")`, protocol errors as `on_error(message)`, and
//! malformed frames are dropped.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::retry::{ReconnectPolicy, RetryState, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};
use crate::stream::channel::{
    Channel, ChannelEvent, ChannelEventKind, ChannelId, ChannelState, CLOSE_NORMAL,
};
use crate::stream::endpoint::{Origin, DEFAULT_ENDPOINT_PATH};
use crate::stream::heartbeat::{Heartbeat, DEFAULT_HEARTBEAT_INTERVAL};
use crate::stream::proto::ServerMessage;
use crate::stream::StreamError;

/// Error marker reported for transport-level faults.
pub const TRANSPORT_ERROR: &str = "ws_error";
/// Error marker used when an `error` frame carries no message.
pub const DEFAULT_PROTOCOL_ERROR: &str = "error";
/// Close reason sent when the caller stops the session.
pub const CLIENT_STOP_REASON: &str = "client_stop";

const REOPEN_REASON: &str = "reopen";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Callbacks invoked by a session, always from its worker task.
pub trait StreamHandler: Send + 'static {
    /// Called for every token frame, in arrival order.
    fn on_token(&mut self, token: &str);

    /// Called when a channel opens and when the server signals `start`.
    fn on_start(&mut self) {}

    /// Called when the server signals `end`.
    fn on_end(&mut self) {}

    /// Called with the server's error message or with [`TRANSPORT_ERROR`].
    fn on_error(&mut self, _message: &str) {}
}

impl<F> StreamHandler for F
where
    F: FnMut(&str) + Send + 'static,
{
    fn on_token(&mut self, token: &str) {
        self(token)
    }
}

/// Session configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionOptions {
    /// Path appended to the origin to form the socket URL.
    pub endpoint_path: String,
    /// Reconnects allowed after an unexpected closure before giving up.
    pub max_retries: u32,
    /// Keep-alive interval in milliseconds; `0` disables pings.
    pub heartbeat_ms: u64,
    /// Delay before the first reconnect in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for a single connect attempt in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            heartbeat_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SessionOptions {
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// No channel and no pending reconnect.
    Idle,
    Connecting,
    Open,
    /// Stopped by the caller, waiting for the channel to finish closing.
    Closing,
    /// Closed unexpectedly, waiting out the reconnect delay.
    Backoff,
}

/// Close status reported by the most recent channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Snapshot published to session observers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_close: Option<CloseInfo>,
}

#[derive(Debug)]
enum Command {
    Open,
    Stop,
}

/// Caller-facing handle for a streaming session.
///
/// Dropping the handle stops the session.
#[derive(Debug)]
pub struct StreamSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    url: String,
}

impl StreamSession {
    /// Creates an idle session targeting `origin`.
    ///
    /// Must be called from within a tokio runtime; the session worker is
    /// spawned immediately but does not connect until [`Self::open`].
    pub fn new<H>(
        origin: &Origin,
        init: Value,
        options: SessionOptions,
        handler: H,
    ) -> Result<Self, StreamError>
    where
        H: StreamHandler,
    {
        let url = origin.resolve(&options.endpoint_path)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: SessionState::Idle,
            last_close: None,
        });

        let core = SessionCore {
            url: url.clone(),
            init,
            policy: options.reconnect_policy(),
            heartbeat_interval: options.heartbeat_interval(),
            connect_timeout: options.connect_timeout(),
            handler,
            status: status_tx,
            retry: RetryState::default(),
            closed_by_client: false,
            channel: None,
            draining: None,
            next_channel_id: 0,
            heartbeat: Heartbeat::new(),
            events: events_tx,
            reconnect_at: None,
        };

        tokio::spawn(session_worker(core, commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            url,
        })
    }

    /// Opens a fresh channel, tearing down any existing one first.
    pub fn open(&self) {
        let _ = self.commands.send(Command::Open);
    }

    /// Ends the session. No reconnect or heartbeat happens afterwards.
    ///
    /// Safe to call in any state and any number of times.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Returns a receiver that observes state changes.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Socket URL derived from the origin and endpoint path.
    pub fn url(&self) -> &str {
        &self.url
    }
}

struct SessionCore<H> {
    url: String,
    init: Value,
    policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    connect_timeout: Duration,
    handler: H,
    status: watch::Sender<SessionStatus>,
    retry: RetryState,
    closed_by_client: bool,
    channel: Option<Channel>,
    draining: Option<ChannelId>,
    next_channel_id: ChannelId,
    heartbeat: Heartbeat,
    events: mpsc::UnboundedSender<ChannelEvent>,
    reconnect_at: Option<Instant>,
}

async fn session_worker<H>(
    mut core: SessionCore<H>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) where
    H: StreamHandler,
{
    loop {
        let reconnect_at = core.reconnect_at;
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Open) => core.open(),
                    Some(Command::Stop) => core.stop(),
                    None => {
                        core.stop();
                        break;
                    }
                }
            }
            Some(event) = events.recv() => core.dispatch(event),
            _ = wait_until(reconnect_at) => {
                core.reconnect_at = None;
                core.open();
            }
        }
    }
    debug!(event = "session_worker_stopped", url = %core.url);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<H> SessionCore<H>
where
    H: StreamHandler,
{
    fn open(&mut self) {
        self.reconnect_at = None;
        self.teardown_channel();
        self.closed_by_client = false;

        self.next_channel_id += 1;
        let id = self.next_channel_id;
        debug!(event = "channel_opening", channel = id, url = %self.url, attempt = self.retry.attempt());
        self.channel = Some(Channel::open(
            id,
            self.url.clone(),
            self.connect_timeout,
            self.events.clone(),
        ));
        self.set_state(SessionState::Connecting);
    }

    fn stop(&mut self) {
        self.closed_by_client = true;
        self.reconnect_at = None;
        self.heartbeat.stop();

        match self.channel.take() {
            Some(channel) if channel.state() != ChannelState::Closed => {
                channel.close(CLOSE_NORMAL, CLIENT_STOP_REASON);
                self.draining = Some(channel.id());
                self.set_state(SessionState::Closing);
            }
            _ if self.draining.is_some() => {}
            _ => self.set_state(SessionState::Idle),
        }
    }

    fn teardown_channel(&mut self) {
        self.heartbeat.stop();
        if let Some(channel) = self.channel.take() {
            debug!(event = "channel_superseded", channel = channel.id());
            channel.close(CLOSE_NORMAL, REOPEN_REASON);
        }
    }

    fn dispatch(&mut self, event: ChannelEvent) {
        let current = self.channel.as_ref().map(Channel::id);
        if current != Some(event.channel) {
            if self.draining == Some(event.channel) {
                if let ChannelEventKind::Closed { code, reason } = event.kind {
                    self.on_drained(code, reason);
                }
            } else {
                debug!(event = "stale_channel_event", channel = event.channel);
            }
            return;
        }

        match event.kind {
            ChannelEventKind::Opened => self.on_opened(),
            ChannelEventKind::Message(raw) => self.on_message(&raw),
            ChannelEventKind::Errored(detail) => self.on_transport_error(&detail),
            ChannelEventKind::Closed { code, reason } => self.on_closed(code, reason),
        }
    }

    fn on_opened(&mut self) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        self.retry.reset();
        self.closed_by_client = false;

        match serde_json::to_string(&self.init) {
            Ok(text) => {
                channel.send(text);
            }
            Err(err) => warn!(event = "init_payload_encode_failed", error = %err),
        }
        let handle = channel.handle();

        self.set_state(SessionState::Open);
        self.handler.on_start();
        self.heartbeat.start(handle, self.heartbeat_interval);
    }

    fn on_message(&mut self, raw: &str) {
        let message = match ServerMessage::from_text(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(event = "frame_discarded", error = %err);
                return;
            }
        };

        match message {
            ServerMessage::Token { data, .. } => {
                self.handler.on_token(data.as_deref().unwrap_or_default())
            }
            ServerMessage::Start { .. } => self.handler.on_start(),
            ServerMessage::End { .. } => self.handler.on_end(),
            ServerMessage::Error { data } => self
                .handler
                .on_error(data.as_deref().unwrap_or(DEFAULT_PROTOCOL_ERROR)),
            ServerMessage::Unknown => debug!(event = "frame_type_ignored"),
        }
    }

    fn on_transport_error(&mut self, detail: &str) {
        warn!(event = "transport_error", detail = %detail);
        self.handler.on_error(TRANSPORT_ERROR);
    }

    fn on_closed(&mut self, code: u16, reason: String) {
        self.heartbeat.stop();
        self.channel = None;
        self.record_close(code, reason);

        if self.closed_by_client {
            self.set_state(SessionState::Idle);
            return;
        }

        match self.retry.schedule(&self.policy) {
            Some(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_state(SessionState::Backoff);
            }
            None => self.set_state(SessionState::Idle),
        }
    }

    fn on_drained(&mut self, code: u16, reason: String) {
        self.draining = None;
        self.record_close(code, reason);
        if self.channel.is_none() && self.reconnect_at.is_none() {
            self.set_state(SessionState::Idle);
        }
    }

    fn record_close(&mut self, code: u16, reason: String) {
        debug!(event = "session_channel_closed", code, reason = %reason, by_client = self.closed_by_client);
        self.status.send_modify(|status| {
            status.last_close = Some(CloseInfo { code, reason });
        });
    }

    fn set_state(&mut self, state: SessionState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }
}
