//! Messaging gateway abstraction.
//!
//! The lifecycle talks to the chat platform only through [`Gateway`], so the
//! scenarios in `tests.rs` can run against a recording mock.

use async_trait::async_trait;

/// Inline keyboard attached to an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// Single URL button, e.g. a link to the bot's private chat.
    OpenChat { label: String, url: String },
    /// Single callback button carrying `read:<token>`.
    Reveal { label: String, token: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// The user blocked the bot or never started a private chat with it.
    #[error("recipient blocked the bot")]
    Blocked,
    /// Message or chat no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
    /// Missing rights in the chat (e.g. cannot post or delete).
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("network error: {0}")]
    Network(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send an HTML text message. Returns the new message id.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<i64>;

    /// Replace the text (and keyboard) of a message sent by the bot.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<()>;

    /// Delete a message. Deleting an already-gone message is `Ok`.
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> GatewayResult<()>;

    /// Answer a button press, optionally as a modal alert.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool) -> GatewayResult<()>;

    async fn forward_message(&self, to_chat_id: i64, from_chat_id: i64, message_id: i64) -> GatewayResult<i64>;
}
