//! Trigger word detection for group messages.
//!
//! A group message starts a whisper only when its normalized text equals one
//! of the configured trigger words. Normalization drops zero-width joiners,
//! case, mentions of the bot, punctuation and emoji, so `«Whisper!»` and
//! `@najva_bot نجوا 🤫` both match, while `whisper to me` does not.

use regex::Regex;
use std::collections::HashSet;

use crate::whisper::event::Author;

/// Zero-width non-joiner and zero-width joiner, common in Persian text.
const ZERO_WIDTH: [char; 2] = ['\u{200c}', '\u{200d}'];

/// How the reply target of a trigger message was judged.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyCheck {
    /// The trigger was not sent as a reply.
    NoReplyTarget,
    /// The reply target is this bot or another bot account.
    TargetIsBot,
    Accepted(Author),
}

pub struct TriggerMatcher {
    words: HashSet<String>,
    mention: Option<Regex>,
    non_word: Regex,
}

impl TriggerMatcher {
    pub fn new(words: &[String], bot_username: Option<&str>) -> Self {
        let non_word = Regex::new(r"[^\p{L}\p{M}\p{N}]+").expect("static regex");
        let mention = bot_username
            .filter(|u| !u.is_empty())
            .map(|u| Regex::new(&format!("@{}", regex::escape(&u.to_lowercase()))).expect("escaped regex"));

        let mut matcher = Self { words: HashSet::new(), mention, non_word };
        // Trigger words go through the same normalization as incoming text
        matcher.words = words
            .iter()
            .map(|w| matcher.normalize(w))
            .filter(|w| !w.is_empty())
            .collect();
        matcher
    }

    pub fn normalize(&self, text: &str) -> String {
        let text = text.replace(ZERO_WIDTH, " ").to_lowercase();
        let text = match &self.mention {
            Some(mention) => mention.replace_all(&text, "").into_owned(),
            None => text,
        };
        self.non_word.replace_all(&text, "").into_owned()
    }

    pub fn is_trigger(&self, text: &str) -> bool {
        let normalized = self.normalize(text);
        !normalized.is_empty() && self.words.contains(&normalized)
    }
}

/// Decide whether the replied-to author may receive a whisper.
pub fn classify_reply(reply_author: Option<&Author>, bot_user_id: i64) -> ReplyCheck {
    match reply_author {
        None => ReplyCheck::NoReplyTarget,
        Some(author) if author.is_bot || author.user_id == bot_user_id => ReplyCheck::TargetIsBot,
        Some(author) => ReplyCheck::Accepted(author.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_trigger_words;

    fn matcher() -> TriggerMatcher {
        TriggerMatcher::new(&default_trigger_words(), Some("Najva_Bot"))
    }

    #[test]
    fn test_exact_words_match() {
        let m = matcher();
        assert!(m.is_trigger("نجوا"));
        assert!(m.is_trigger("whisper"));
        assert!(m.is_trigger("نجواربات"));
    }

    #[test]
    fn test_case_and_punctuation_ignored() {
        let m = matcher();
        assert!(m.is_trigger("WHISPER"));
        assert!(m.is_trigger("  whisper!!! "));
        assert!(m.is_trigger("«نجوا»"));
        assert!(m.is_trigger("🤫 whisper 🤫"));
    }

    #[test]
    fn test_zero_width_joiner_ignored() {
        let m = matcher();
        assert!(m.is_trigger("نجوا\u{200c}ربات"));
        assert!(m.is_trigger("whis\u{200d}per"));
    }

    #[test]
    fn test_self_mention_stripped() {
        let m = matcher();
        assert!(m.is_trigger("@najva_bot whisper"));
        assert!(m.is_trigger("نجوا @Najva_Bot"));
    }

    #[test]
    fn test_other_mentions_not_stripped() {
        let m = matcher();
        assert!(!m.is_trigger("@someone whisper"));
    }

    #[test]
    fn test_no_substring_match() {
        let m = matcher();
        assert!(!m.is_trigger("whisper to me"));
        assert!(!m.is_trigger("whispers"));
        assert!(!m.is_trigger("این یک نجوا است"));
        assert!(!m.is_trigger(""));
        assert!(!m.is_trigger("!!!"));
    }

    #[test]
    fn test_without_bot_username() {
        let m = TriggerMatcher::new(&default_trigger_words(), None);
        assert!(m.is_trigger("whisper"));
        assert!(!m.is_trigger("@najva_bot whisper"));
    }

    #[test]
    fn test_custom_words_are_normalized() {
        let m = TriggerMatcher::new(&["Secret!".to_string()], None);
        assert!(m.is_trigger("secret"));
        assert!(m.is_trigger("SECRET"));
    }

    #[test]
    fn test_classify_reply() {
        let human = Author { user_id: 7, name: "Bob".into(), is_bot: false };
        let other_bot = Author { user_id: 8, name: "Helper".into(), is_bot: true };
        let myself = Author { user_id: 99, name: "Najva".into(), is_bot: false };

        assert_eq!(classify_reply(None, 99), ReplyCheck::NoReplyTarget);
        assert_eq!(classify_reply(Some(&other_bot), 99), ReplyCheck::TargetIsBot);
        assert_eq!(classify_reply(Some(&myself), 99), ReplyCheck::TargetIsBot);
        assert_eq!(classify_reply(Some(&human), 99), ReplyCheck::Accepted(human.clone()));
    }
}
