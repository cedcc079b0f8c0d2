use serde::Deserialize;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Bot username without '@'. Fetched via getMe when absent.
    bot_username: Option<String>,
    /// Administrator: may reveal any whisper and run admin commands.
    admin_id: Option<u64>,
    /// Chat receiving operator logs. Defaults to the admin's private chat.
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_database_file")]
    database_file: String,
    #[serde(default)]
    trigger_words: Vec<String>,
    #[serde(default = "default_pending_ttl_secs")]
    pending_ttl_secs: u64,
    #[serde(default = "default_max_whisper_chars")]
    max_whisper_chars: usize,
    /// Telegram caps callback alerts at 200 characters.
    #[serde(default = "default_max_alert_chars")]
    max_alert_chars: usize,
    #[serde(default = "default_trigger_delete_delay_secs")]
    trigger_delete_delay_secs: u64,
    /// Interval for the background expiry sweep (0 = lazy sweep only).
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
    /// Whispers older than this are purged by the background task.
    whisper_retention_days: Option<u32>,
}

fn default_database_file() -> String {
    "najva.db".to_string()
}

fn default_pending_ttl_secs() -> u64 {
    15 * 60
}

fn default_max_whisper_chars() -> usize {
    190
}

fn default_max_alert_chars() -> usize {
    200
}

fn default_trigger_delete_delay_secs() -> u64 {
    2
}

fn default_sweep_interval_secs() -> u64 {
    60
}

pub fn default_trigger_words() -> Vec<String> {
    vec!["نجوا".to_string(), "نجواربات".to_string(), "whisper".to_string()]
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub bot_username: Option<String>,
    pub admin_id: Option<UserId>,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub trigger_words: Vec<String>,
    pub pending_ttl_secs: u64,
    pub max_whisper_chars: usize,
    pub max_alert_chars: usize,
    pub trigger_delete_delay_secs: u64,
    pub sweep_interval_secs: u64,
    pub whisper_retention_days: Option<u32>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.pending_ttl_secs == 0 {
            return Err(ConfigError::Validation("pending_ttl_secs must be positive".into()));
        }
        if file.max_whisper_chars == 0 {
            return Err(ConfigError::Validation("max_whisper_chars must be positive".into()));
        }
        if file.max_alert_chars == 0 || file.max_alert_chars > 200 {
            return Err(ConfigError::Validation("max_alert_chars must be between 1 and 200".into()));
        }

        let trigger_words: Vec<String> = file.trigger_words
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        let trigger_words = if trigger_words.is_empty() { default_trigger_words() } else { trigger_words };

        let admin_id = file.admin_id.filter(|id| *id > 0).map(UserId);
        // Without an explicit log chat, operator logs go to the admin's DM
        let log_chat_id = file.log_chat_id
            .map(ChatId)
            .or_else(|| admin_id.map(|id| ChatId(id.0 as i64)));

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = data_dir.join(&file.database_file);

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            bot_username: file.bot_username
                .map(|u| u.trim_start_matches('@').to_string())
                .filter(|u| !u.is_empty()),
            admin_id,
            log_chat_id,
            data_dir,
            database_path,
            trigger_words,
            pending_ttl_secs: file.pending_ttl_secs,
            max_whisper_chars: file.max_whisper_chars,
            max_alert_chars: file.max_alert_chars,
            trigger_delete_delay_secs: file.trigger_delete_delay_secs,
            sweep_interval_secs: file.sweep_interval_secs,
            whisper_retention_days: file.whisper_retention_days.filter(|d| *d > 0),
        })
    }
}
