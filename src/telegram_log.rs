//! Operator notifications: forwards this crate's log events to a Telegram chat.
//!
//! WARN and ERROR go out immediately. INFO lines are batched and flushed
//! every few seconds. Every line is cut to a digest so a long database error
//! cannot flood the chat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::retry::DIGEST_CHARS;
use teloxide::utils::html::escape;

use crate::whisper::format::truncate_chars;
use crate::whisper::gateway::Gateway;

/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;
const FLUSH_EVERY: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 30;

#[derive(Debug, PartialEq)]
enum Notice {
    Urgent(String),
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<Notice>,
    /// Only events whose target starts with this are forwarded.
    target_prefix: &'static str,
}

impl TelegramLogLayer {
    /// Spawns the sender task; must be called inside a tokio runtime.
    pub fn new(gateway: Arc<dyn Gateway>, chat_id: i64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(gateway, chat_id, rx, FLUSH_EVERY));
        Self { tx, target_prefix: env!("CARGO_CRATE_NAME") }
    }
}

async fn run(gateway: Arc<dyn Gateway>, chat_id: i64, mut rx: mpsc::UnboundedReceiver<Notice>, every: Duration) {
    let mut batch: Vec<String> = Vec::new();
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            notice = rx.recv() => match notice {
                Some(Notice::Urgent(text)) => deliver(gateway.as_ref(), chat_id, &text).await,
                Some(Notice::Info(text)) => {
                    batch.push(text);
                    if batch.len() >= MAX_BATCH {
                        flush(gateway.as_ref(), chat_id, &mut batch).await;
                    }
                }
                None => {
                    flush(gateway.as_ref(), chat_id, &mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => flush(gateway.as_ref(), chat_id, &mut batch).await,
        }
    }
}

async fn flush(gateway: &dyn Gateway, chat_id: i64, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let text = batch.join("\n");
    batch.clear();
    deliver(gateway, chat_id, &text).await;
}

async fn deliver(gateway: &dyn Gateway, chat_id: i64, text: &str) {
    let text = truncate_chars(text, MAX_MESSAGE_CHARS);
    // Logging here would feed back into this layer
    if let Err(e) = gateway.send_text(chat_id, &text, None, None).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

fn render(level: Level, message: &str) -> Notice {
    let body = escape(&truncate_chars(message, DIGEST_CHARS));
    match level {
        Level::ERROR => Notice::Urgent(format!("❌ {body}")),
        Level::WARN => Notice::Urgent(format!("⚠️ {body}")),
        _ => Notice::Info(body),
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || !metadata.target().starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(render(level, &visitor.message)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
