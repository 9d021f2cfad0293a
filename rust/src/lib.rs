//! Rust client for the AdaptArticle token stream.
//!
//! The crate is organized by concern:
//! - `stream`: websocket channel, heartbeat, protocol and the reconnecting
//!   session that callers drive with `open`/`stop`.
//! - `retry`: reconnect policy and backoff bookkeeping.
//! - `render`: coalescing output sink that paints streamed tokens once per
//!   frame tick.

/// Coalescing output sink and render surfaces.
pub mod render;
/// Reconnect policy and retry state.
pub mod retry;
/// Realtime stream channel, protocol types, and session state machine.
pub mod stream;

pub use render::{OutputSink, RenderSurface, TerminalSurface};
pub use stream::endpoint::Origin;
pub use stream::proto::AdaptRequest;
pub use stream::session::{SessionOptions, SessionState, StreamHandler, StreamSession};
