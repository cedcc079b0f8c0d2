//! User-visible texts, rendered as Telegram HTML.
//!
//! Everything user-controlled (names, titles, whisper content) passes through
//! [`escape`] or [`user_mention`] before it is embedded.

use teloxide::types::UserId;
use teloxide::utils::html::{bold, code_inline, escape, user_mention};

use crate::whisper::store::Whisper;

/// First `max_chars` characters of `s`, the last one replaced by an ellipsis
/// if anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some(_) => {
            let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
            out.push('…');
            out
        }
    }
}

/// Clickable mention of a user by id.
pub fn mention(user_id: i64, name: &str) -> String {
    let name = if name.trim().is_empty() { "user" } else { name };
    user_mention(UserId(user_id as u64), name)
}

pub fn group_label(title: &str) -> String {
    if title.trim().is_empty() { "group".to_string() } else { escape(title) }
}

// ==================== GROUP ====================

pub fn helper_text(max_chars: usize, ttl_minutes: u64) -> String {
    format!(
        "Come to my private chat and send your whisper as {}.\n\
         Maximum length: {max_chars} characters. This request expires in {ttl_minutes} minutes.",
        bold("the first text message")
    )
}

pub const OPEN_CHAT_LABEL: &str = "✉️ Send whisper privately";

pub const NO_REPLY_HINT: &str = "Reply to the target user's message with the trigger word.";

pub const TARGET_IS_BOT: &str = "Reply to a message from a human, not a bot.";

pub fn disclosure_text(whisper: &Whisper) -> String {
    format!(
        "🔒 {} {}\n{} {}",
        bold("Whisper for"),
        mention(whisper.target_id, &whisper.target_name),
        bold("From:"),
        mention(whisper.sender_id, &whisper.sender_name)
    )
}

/// Placeholder text once the target has read the whisper.
pub fn disclosure_read_text(whisper: &Whisper) -> String {
    format!(
        "📭 {} {}\n{} {}",
        bold("Whisper read by"),
        mention(whisper.target_id, &whisper.target_name),
        bold("From:"),
        mention(whisper.sender_id, &whisper.sender_name)
    )
}

pub const READ_LABEL: &str = "📩 Read whisper";

pub const READ_AGAIN_LABEL: &str = "🔁 Show again";

// ==================== PRIVATE ====================

pub const NOTHING_PENDING: &str =
    "Nothing is pending. In a group, reply to someone's message with the trigger word, then send your text here.";

pub const SEND_TEXT_NOW: &str = "Send the text of your whisper now.";

pub const EMPTY_TEXT: &str = "⛔️ The text is empty. Send it again.";

pub fn too_long(len: usize, max: usize) -> String {
    format!("⚠️ The text is too long ({len} characters). The maximum is {max}. Send a shorter text.")
}

pub const STORED: &str = "Whisper saved ✅. The recipient sees it when they press the button in the group.";

pub const DELIVERY_FAILED: &str =
    "❗️ I could not post the whisper in the group. Make sure I am still a member and allowed to send messages there, then send your text again.";

pub const CANCELLED: &str = "Your pending whisper was cancelled.";

pub const INTERNAL_ERROR: &str = "❗️ Something went wrong. Please try again later.";

// ==================== REVEAL ====================

pub const NOT_FOUND: &str = "Not found or expired.";

pub const NOT_FOR_YOU: &str = "This whisper is not for you.";

pub fn revealed_private(sender_id: i64, content: &str) -> String {
    format!(
        "🔓 {}\n{} {}\n─────\n{}",
        bold("Whisper"),
        bold("From:"),
        mention(sender_id, "sender"),
        escape(content)
    )
}

pub const SENT_TO_PRIVATE: &str = "The whisper was sent to your private chat.";

// ==================== WATCHERS ====================

pub fn mirror_whisper(whisper: &Whisper) -> String {
    format!(
        "🕵️ <b>Whisper copy</b>\n<b>Group:</b> {} ({})\n<b>From:</b> {} → <b>To:</b> {}\n<b>Token:</b> {}\n─────\n{}",
        group_label(&whisper.conversation_title),
        whisper.conversation_id,
        mention(whisper.sender_id, &whisper.sender_name),
        mention(whisper.target_id, &whisper.target_name),
        code_inline(&whisper.token),
        escape(&whisper.content)
    )
}

pub fn mirror_read(whisper: &Whisper) -> String {
    format!(
        "👁 <b>Whisper read</b>\n<b>Group:</b> {} ({})\n<b>By:</b> {}\n<b>Token:</b> {}",
        group_label(&whisper.conversation_title),
        whisper.conversation_id,
        mention(whisper.target_id, &whisper.target_name),
        code_inline(&whisper.token)
    )
}
