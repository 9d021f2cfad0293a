//! Streams an adapted text to the terminal.
//!
//! This program opens a session against the adaptation service, sends a text
//! adaptation request as the init payload, and renders tokens to stdout as
//! they arrive.
//!
//! Configuration comes from the environment:
//! - `ADAPT_PAGE_URL`: URL of the hosting page (default
//!   `http://localhost:8000/webapp`); `https` selects a secure socket.
//! - `ADAPT_INIT_DATA`: signed identity credential, verified beforehand.
//! - `ADAPT_TEXT`: text to adapt.
//! - `ADAPT_LEVEL`: target proficiency level (default `B1`).
//! - `RUST_LOG`: log filter, e.g. `adapt_stream=debug`.

use std::error::Error;
use std::time::Duration;

use adapt_stream::render::{OutputSink, TerminalSurface};
use adapt_stream::stream::endpoint::Origin;
use adapt_stream::stream::proto::AdaptRequest;
use adapt_stream::stream::session::{SessionOptions, StreamHandler, StreamSession};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_PAGE_URL: &str = "http://localhost:8000/webapp";
const STREAM_DEADLINE: Duration = Duration::from_secs(120);

enum Finished {
    Completed,
    Failed(String),
}

struct TerminalHandler {
    sink: OutputSink<TerminalSurface<std::io::Stdout>>,
    done: mpsc::UnboundedSender<Finished>,
}

impl StreamHandler for TerminalHandler {
    fn on_token(&mut self, token: &str) {
        self.sink.append(token);
    }

    fn on_start(&mut self) {
        tracing::info!(event = "stream_started");
    }

    fn on_end(&mut self) {
        let _ = self.done.send(Finished::Completed);
    }

    fn on_error(&mut self, message: &str) {
        let _ = self.done.send(Finished::Failed(message.to_string()));
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let origin = Origin::from_page_url(&env_or("ADAPT_PAGE_URL", DEFAULT_PAGE_URL))?;
    let request = AdaptRequest::text(
        SecretString::new(env_or("ADAPT_INIT_DATA", "REPLACE_WITH_INIT_DATA")),
        env_or("ADAPT_TEXT", "The quick brown fox jumps over the lazy dog."),
    )
    .with_level(env_or("ADAPT_LEVEL", "B1"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(TerminalSurface::stdout());
        let handler = TerminalHandler {
            sink: sink.clone(),
            done: done_tx,
        };

        let session =
            StreamSession::new(&origin, request.into_init()?, SessionOptions::default(), handler)?;
        session.open();

        let mut last_error = None;
        let finished = tokio::time::timeout(STREAM_DEADLINE, async {
            while let Some(outcome) = done_rx.recv().await {
                match outcome {
                    Finished::Completed => return true,
                    Finished::Failed(message) => {
                        eprintln!("\nstream error: {message}");
                        last_error = Some(message);
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        session.stop();
        // Let the last frame tick paint before exiting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        println!();

        if !finished {
            eprintln!(
                "stream did not complete (last error: {})",
                last_error.as_deref().unwrap_or("none")
            );
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
