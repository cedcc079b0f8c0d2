//! Telegram gateway using teloxide.

use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};
use tracing::debug;

use crate::whisper::gateway::{Gateway, GatewayError, GatewayResult, Keyboard};
use crate::whisper::token::read_payload;

/// Map a teloxide error onto the gateway's failure reasons.
fn classify(e: RequestError) -> GatewayError {
    match e {
        RequestError::Api(
            ApiError::BotBlocked | ApiError::CantInitiateConversation | ApiError::UserDeactivated,
        ) => GatewayError::Blocked,
        RequestError::Api(
            ApiError::MessageToDeleteNotFound | ApiError::MessageToEditNotFound | ApiError::ChatNotFound,
        ) => GatewayError::NotFound(e.to_string()),
        RequestError::Api(ApiError::MessageCantBeDeleted | ApiError::BotKicked) => {
            GatewayError::Forbidden(e.to_string())
        }
        RequestError::Network(_) | RequestError::Io(_) => GatewayError::Network(e.to_string()),
        other => GatewayError::Api(other.to_string()),
    }
}

fn to_markup(keyboard: Keyboard) -> GatewayResult<InlineKeyboardMarkup> {
    let button = match keyboard {
        Keyboard::OpenChat { label, url } => {
            let url = Url::parse(&url).map_err(|e| GatewayError::Api(format!("bad button url {url}: {e}")))?;
            InlineKeyboardButton::url(label, url)
        }
        Keyboard::Reveal { label, token } => InlineKeyboardButton::callback(label, read_payload(&token)),
    };
    Ok(InlineKeyboardMarkup::new(vec![vec![button]]))
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Gateway for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<i64> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard)?);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            debug!("send_message to {} failed: {}", chat_id, e);
            classify(e)
        })
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<()> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .parse_mode(ParseMode::Html);

        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard)?);
        }

        match request.await {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => {
                debug!("edit_message_text {} in {} failed: {}", message_id, chat_id, e);
                Err(classify(e))
            }
        }
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> GatewayResult<()> {
        debug!("🗑️ Deleting message {} in chat {}", message_id, chat_id);

        match self
            .bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool) -> GatewayResult<()> {
        let mut request = self
            .bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .show_alert(alert);

        if let Some(text) = text {
            request = request.text(text);
        }

        request.await.map(|_| ()).map_err(classify)
    }

    async fn forward_message(&self, to_chat_id: i64, from_chat_id: i64, message_id: i64) -> GatewayResult<i64> {
        self.bot
            .forward_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id as i32))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reveal_keyboard_carries_payload() {
        let markup = to_markup(Keyboard::Reveal { label: "Read".into(), token: "abc".into() }).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Read");
    }

    #[test]
    fn test_bad_url_is_rejected() {
        let result = to_markup(Keyboard::OpenChat { label: "Go".into(), url: "not a url".into() });
        assert!(matches!(result, Err(GatewayError::Api(_))));
    }

    #[test]
    fn test_blocked_classification() {
        assert_eq!(classify(RequestError::Api(ApiError::BotBlocked)), GatewayError::Blocked);
        assert!(matches!(
            classify(RequestError::Api(ApiError::MessageToDeleteNotFound)),
            GatewayError::NotFound(_)
        ));
    }
}
