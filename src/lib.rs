pub mod config;
pub mod retry;
pub mod telegram_log;
pub mod whisper;
