//! Single physical websocket connection.
//!
//! A [`Channel`] is a dumb transport: it connects once, forwards raw text
//! frames, and reports lifecycle events. It never reconnects; the session
//! creates a fresh channel for every attempt.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::stream::proto::ClientMessage;
use crate::stream::StreamError;

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Status reported when a connection ends without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const CLOSED_BEFORE_OPEN: &str = "closed before open";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identifier of one channel instance within a session.
pub type ChannelId = u64;

/// Observable state of a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle or data event reported by a channel task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub kind: ChannelEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEventKind {
    Opened,
    Message(String),
    Errored(String),
    Closed { code: u16, reason: String },
}

pub(crate) enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Cloneable handle used to write to a channel.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    state: Arc<AtomicU8>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Close { code, .. } => f.debug_struct("Close").field("code", code).finish(),
        }
    }
}

impl ChannelHandle {
    pub(crate) fn new(initial: ChannelState) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            state: Arc::new(AtomicU8::new(initial as u8)),
            tx,
        };
        (handle, rx)
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queues a text frame if the channel is open.
    ///
    /// Returns whether the frame was queued. Sending on a channel that is
    /// connecting, closing or closed does nothing.
    pub fn send(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Serializes and queues a client message if the channel is open.
    pub fn send_message(&self, message: &ClientMessage) -> bool {
        match message.to_text() {
            Ok(text) => self.send(text),
            Err(err) => {
                warn!(event = "client_message_encode_failed", error = %err);
                false
            }
        }
    }

    /// Starts a graceful shutdown. Later calls are ignored.
    pub fn close(&self, code: u16, reason: &str) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            match ChannelState::from_u8(current) {
                ChannelState::Connecting | ChannelState::Open => {}
                ChannelState::Closing | ChannelState::Closed => return,
            }
            match self.state.compare_exchange(
                current,
                ChannelState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn set(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// One websocket connection owned by a session.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    handle: ChannelHandle,
}

impl Channel {
    /// Starts connecting to `url` in a background task.
    ///
    /// Every outcome, including a failed connect, ends with exactly one
    /// `Closed` event on `events`.
    pub fn open(
        id: ChannelId,
        url: String,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let (handle, outbound_rx) = ChannelHandle::new(ChannelState::Connecting);
        let worker_handle = handle.clone();
        tokio::spawn(async move {
            channel_worker(id, url, connect_timeout, worker_handle, outbound_rx, events).await;
        });
        Self { id, handle }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns a cloneable write handle sharing this channel's state.
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    pub fn send(&self, text: String) -> bool {
        self.handle.send(text)
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.handle.close(code, reason)
    }
}

async fn channel_worker(
    id: ChannelId,
    url: String,
    connect_timeout: Duration,
    handle: ChannelHandle,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let emit = |kind: ChannelEventKind| {
        let _ = events.send(ChannelEvent { channel: id, kind });
    };

    // Only a close can be queued while connecting; it abandons the handshake.
    let connected = tokio::select! {
        result = connect(&url, connect_timeout) => Some(result),
        _ = outbound_rx.recv() => None,
    };

    let (code, reason) = match connected {
        Some(Ok(socket)) => run_open_channel(id, socket, &handle, &mut outbound_rx, &emit).await,
        Some(Err(err)) => {
            warn!(event = "channel_connect_failed", channel = id, url = %url, error = %err);
            emit(ChannelEventKind::Errored(err.to_string()));
            (CLOSE_ABNORMAL, String::new())
        }
        None => {
            debug!(event = "channel_connect_abandoned", channel = id);
            (CLOSE_ABNORMAL, CLOSED_BEFORE_OPEN.to_string())
        }
    };

    handle.set(ChannelState::Closed);
    debug!(event = "channel_closed", channel = id, code, reason = %reason);
    emit(ChannelEventKind::Closed { code, reason });
}

async fn connect(url: &str, connect_timeout: Duration) -> Result<Socket, StreamError> {
    match tokio::time::timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(err)) => Err(StreamError::WebSocket(err)),
        Err(_) => Err(StreamError::ConnectTimeout(connect_timeout.as_millis() as u64)),
    }
}

async fn run_open_channel<F>(
    id: ChannelId,
    mut socket: Socket,
    handle: &ChannelHandle,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    emit: &F,
) -> (u16, String)
where
    F: Fn(ChannelEventKind),
{
    if !handle.transition(ChannelState::Connecting, ChannelState::Open) {
        // Closed by the owner before the handshake finished.
        let _ = socket.close(None).await;
        return (CLOSE_ABNORMAL, CLOSED_BEFORE_OPEN.to_string());
    }
    debug!(event = "channel_opened", channel = id);
    emit(ChannelEventKind::Opened);

    let mut peer_close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(Outbound::Text(text)) => {
                        if !handle.is_open() {
                            continue;
                        }
                        if let Err(err) = socket.send(Message::Text(text.into())).await {
                            emit(ChannelEventKind::Errored(err.to_string()));
                            return peer_close.unwrap_or((CLOSE_ABNORMAL, String::new()));
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        return close_gracefully(socket, code, reason).await;
                    }
                    None => {
                        handle.set(ChannelState::Closing);
                        return close_gracefully(socket, CLOSE_NORMAL, String::new()).await;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        emit(ChannelEventKind::Message(text.to_string()));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            emit(ChannelEventKind::Errored(err.to_string()));
                            return peer_close.unwrap_or((CLOSE_ABNORMAL, String::new()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        handle.transition(ChannelState::Open, ChannelState::Closing);
                        peer_close = Some(
                            frame
                                .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                                .unwrap_or((1005, String::new())),
                        );
                    }
                    Some(Ok(_)) => {
                        debug!(event = "channel_frame_ignored", channel = id);
                    }
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        return peer_close.unwrap_or((CLOSE_ABNORMAL, String::new()));
                    }
                    Some(Err(err)) => {
                        emit(ChannelEventKind::Errored(err.to_string()));
                        return peer_close.unwrap_or((CLOSE_ABNORMAL, String::new()));
                    }
                }
            }
        }
    }
}

async fn close_gracefully(mut socket: Socket, code: u16, reason: String) -> (u16, String) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.clone().into(),
    };
    if socket.close(Some(frame)).await.is_err() {
        return (code, reason);
    }
    // Drain until the peer acknowledges; frames arriving now are dropped.
    let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;
    (code, reason)
}
