//! Throttled rendering of streamed tokens.
//!
//! Tokens can arrive far faster than anything is worth repainting.
//! [`OutputSink`] buffers fragments and flushes them in a single paint per
//! frame tick, so rendering cost does not grow with token rate.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::stream::session::StreamHandler;

/// Default frame tick, roughly one 60 Hz refresh.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Visible output target written by an [`OutputSink`].
pub trait RenderSurface: Send + 'static {
    /// Appends text after the existing output.
    fn append_text(&mut self, text: &str);

    /// Moves the viewport so the newest output is visible.
    fn scroll_to_bottom(&mut self);

    /// Removes all rendered output.
    fn clear(&mut self);
}

#[derive(Debug)]
struct SinkInner<S> {
    buffer: String,
    armed: bool,
    surface: S,
}

/// Coalescing writer in front of a [`RenderSurface`].
///
/// The surface is only touched by the scheduled flush and by
/// [`OutputSink::clear`]. Cloned sinks share the same buffer and surface.
#[derive(Debug)]
pub struct OutputSink<S> {
    inner: Arc<Mutex<SinkInner<S>>>,
    frame_interval: Duration,
}

impl<S> Clone for OutputSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            frame_interval: self.frame_interval,
        }
    }
}

impl<S> OutputSink<S>
where
    S: RenderSurface,
{
    pub fn new(surface: S) -> Self {
        Self::with_frame_interval(surface, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_frame_interval(surface: S, frame_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                buffer: String::new(),
                armed: false,
                surface,
            })),
            frame_interval,
        }
    }

    /// Buffers `fragment` and arms a flush for the next frame tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn append(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            warn!(event = "output_sink_poisoned");
            return;
        };
        inner.buffer.push_str(fragment);
        if inner.armed {
            return;
        }
        inner.armed = true;
        drop(inner);

        let shared = Arc::clone(&self.inner);
        let frame_interval = self.frame_interval;
        tokio::spawn(async move {
            tokio::time::sleep(frame_interval).await;
            flush(&shared);
        });
    }

    /// Empties the pending buffer and the rendered output immediately.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.buffer.clear();
            inner.surface.clear();
        }
    }

    /// Number of buffered bytes not yet painted.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.buffer.len())
            .unwrap_or(0)
    }

    /// Runs `inspect` against the surface.
    pub fn with_surface<R>(&self, inspect: impl FnOnce(&S) -> R) -> Option<R> {
        self.inner.lock().ok().map(|inner| inspect(&inner.surface))
    }
}

fn flush<S>(shared: &Mutex<SinkInner<S>>)
where
    S: RenderSurface,
{
    let Ok(mut inner) = shared.lock() else {
        return;
    };
    inner.armed = false;
    if inner.buffer.is_empty() {
        return;
    }
    let text = std::mem::take(&mut inner.buffer);
    inner.surface.append_text(&text);
    inner.surface.scroll_to_bottom();
}

impl<S> StreamHandler for OutputSink<S>
where
    S: RenderSurface,
{
    fn on_token(&mut self, token: &str) {
        self.append(token);
    }
}

/// Surface that renders into a byte stream such as a terminal.
///
/// Scrolling is a flush; clearing emits the ANSI clear-screen sequence.
#[derive(Debug)]
pub struct TerminalSurface<W> {
    out: W,
}

impl<W> TerminalSurface<W>
where
    W: Write + Send + 'static,
{
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TerminalSurface<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W> RenderSurface for TerminalSurface<W>
where
    W: Write + Send + 'static,
{
    fn append_text(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()) {
            warn!(event = "terminal_write_failed", error = %err);
        }
    }

    fn scroll_to_bottom(&mut self) {
        let _ = self.out.flush();
    }

    fn clear(&mut self) {
        let _ = self.out.write_all(b"\x1b[2J\x1b[H");
        let _ = self.out.flush();
    }
}
