//! Whisper tokens and the disclosure button payload.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Random bytes per token (128 bits).
const TOKEN_BYTES: usize = 16;

/// Prefix of the callback data carried by the reveal button.
pub const READ_PREFIX: &str = "read:";

/// Generate a fresh URL-safe token.
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn read_payload(token: &str) -> String {
    format!("{READ_PREFIX}{token}")
}

/// Extract the token from reveal callback data, if it is one.
pub fn parse_read_payload(data: &str) -> Option<&str> {
    data.strip_prefix(READ_PREFIX).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_is_url_safe() {
        let token = new_token();
        // 16 bytes -> 22 base64 chars without padding
        assert_eq!(token.len(), 22);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| new_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_payload_format() {
        assert_eq!(read_payload("abc"), "read:abc");
        assert_eq!(parse_read_payload("read:abc"), Some("abc"));
    }

    #[test]
    fn test_parse_rejects_other_payloads() {
        assert_eq!(parse_read_payload("read:"), None);
        assert_eq!(parse_read_payload("open:abc"), None);
        assert_eq!(parse_read_payload("abc"), None);
    }

    #[test]
    fn test_payload_fits_callback_limit() {
        // Telegram limits callback data to 64 bytes
        assert!(read_payload(&new_token()).len() <= 64);
    }
}
