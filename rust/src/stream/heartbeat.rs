//! Keep-alive pings for an open channel.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

use crate::stream::channel::ChannelHandle;
use crate::stream::proto::ClientMessage;

/// Default interval between keep-alive pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(20_000);

/// Emits `{"type":"ping"}` on a fixed interval while a channel is open.
///
/// At most one timer runs per scheduler; starting again replaces the
/// previous timer.
#[derive(Debug, Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts pinging `channel` every `interval`.
    ///
    /// Ticks that find the channel in any state other than open are skipped.
    pub fn start(&mut self, channel: ChannelHandle, interval: Duration) {
        self.stop();
        if interval.is_zero() {
            return;
        }

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if channel.is_open() {
                    channel.send_message(&ClientMessage::Ping);
                } else {
                    trace!(event = "heartbeat_skipped", state = ?channel.state());
                }
            }
        }));
    }

    /// Cancels the timer. Safe to call when not started or repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
