//! Terminal chat client
//!
//! Reads questions from stdin, one per line, and prints the assistant's
//! reply as it streams in.

use std::io::Write;
use std::sync::Arc;
use streamchat::channel::WebSocketConnector;
use streamchat::config::SessionConfig;
use streamchat::runtime::{self, SessionError, SessionSnapshot};
use streamchat::transcript::{Role, Transcript};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout belongs to the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamchat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = SessionConfig::from_env()?;
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(url = %config.url, session_id = %session_id, "Starting chat session");

    let connector = Arc::new(WebSocketConnector::new(config.url.clone()));
    let (session, task) = runtime::spawn(
        config.context(session_id),
        connector,
        Transcript::with_greeting(config.greeting.clone()),
    );

    let printer = tokio::spawn(print_transcript(session.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        session.wait_idle().await?;
        match session.submit(line).await {
            Ok(()) => {}
            Err(SessionError::Rejected(e)) => tracing::debug!(error = %e, "Input ignored"),
            Err(e) => return Err(e.into()),
        }
    }

    session.wait_idle().await?;
    session.shutdown();
    task.await?;
    printer.abort();
    Ok(())
}

async fn print_transcript(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut printer = TranscriptPrinter::default();
    let mut stdout = std::io::stdout();
    loop {
        let snapshot = (*snapshots.borrow_and_update()).clone();
        if printer.render(&snapshot, &mut stdout).is_err() {
            return;
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

/// Incrementally writes new transcript text to a terminal
#[derive(Debug, Default)]
struct TranscriptPrinter {
    /// Messages fully written so far
    finished: usize,
    /// Bytes of the current message already written
    written: usize,
}

impl TranscriptPrinter {
    fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> std::io::Result<()> {
        let count = snapshot.messages.len();
        for (index, message) in snapshot.messages.iter().enumerate().skip(self.finished) {
            // Users typed their own text; only echo assistant messages
            if message.role == Role::Assistant {
                let text = message.text.as_str();
                if text.len() < self.written {
                    // The reply restarted
                    writeln!(out)?;
                    self.written = 0;
                }
                let fresh = text.get(self.written..).unwrap_or_default();
                out.write_all(fresh.as_bytes())?;
                self.written = text.len();
            }

            let open = index + 1 == count && snapshot.reply_in_progress;
            if open {
                break;
            }
            if message.role == Role::Assistant {
                writeln!(out)?;
            }
            self.finished = index + 1;
            self.written = 0;
        }
        out.flush()
    }
}
