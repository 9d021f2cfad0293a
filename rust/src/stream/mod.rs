//! Realtime stream modules.
//!
//! - `channel`: one physical websocket connection and its event feed.
//! - `endpoint`: socket URL derivation from an injected page origin.
//! - `heartbeat`: keep-alive pings while a channel is open.
//! - `proto`: protocol messages shared with the adaptation service.
//! - `session`: the long-lived session that survives reconnects.

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Single websocket connection and its command handle.
pub mod channel;
/// Endpoint resolution from the hosting page origin.
pub mod endpoint;
/// Keep-alive scheduler.
pub mod heartbeat;
/// Stream protocol messages.
pub mod proto;
/// Session state machine with reconnect handling.
pub mod session;

/// Errors produced while establishing or driving a stream transport.
///
/// These never reach session callbacks directly; the session reports them
/// as `ws_error` and relies on the close event for recovery.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint could not be derived from the supplied origin.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection attempt did not complete in time.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),
}
