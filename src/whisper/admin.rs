//! Operator commands, accepted only in the admin's private chat.

use std::sync::Arc;
use tracing::info;

use crate::whisper::format::group_label;
use crate::whisper::gateway::Gateway;
use crate::whisper::lifecycle::{HandlerError, best_effort};
use crate::whisper::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Watch { conversation_id: i64, watcher_id: i64 },
    Unwatch { conversation_id: i64, watcher_id: i64 },
    Watches { conversation_id: Option<i64> },
    Stats,
    /// Forward the replied-to message to every active group and known user.
    Broadcast,
    /// Recognized command with bad arguments; carries the usage line.
    Usage(&'static str),
}

const WATCH_USAGE: &str = "Usage: /watch <chat_id> <user_id>";
const UNWATCH_USAGE: &str = "Usage: /unwatch <chat_id> <user_id>";
const WATCHES_USAGE: &str = "Usage: /watches [chat_id]";

/// Parse an admin command. Returns `None` for anything that is not one.
pub fn parse(text: &str) -> Option<AdminCommand> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    // "/stats@najva_bot" addresses this bot explicitly
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    let args: Vec<&str> = parts.collect();

    let pair = |usage| match args.as_slice() {
        [chat, user] => match (chat.parse::<i64>(), user.parse::<i64>()) {
            (Ok(c), Ok(u)) => Ok((c, u)),
            _ => Err(AdminCommand::Usage(usage)),
        },
        _ => Err(AdminCommand::Usage(usage)),
    };

    let command = match name.as_str() {
        "watch" => match pair(WATCH_USAGE) {
            Ok((conversation_id, watcher_id)) => AdminCommand::Watch { conversation_id, watcher_id },
            Err(usage) => usage,
        },
        "unwatch" => match pair(UNWATCH_USAGE) {
            Ok((conversation_id, watcher_id)) => AdminCommand::Unwatch { conversation_id, watcher_id },
            Err(usage) => usage,
        },
        "watches" => match args.as_slice() {
            [] => AdminCommand::Watches { conversation_id: None },
            [chat] => match chat.parse() {
                Ok(id) => AdminCommand::Watches { conversation_id: Some(id) },
                Err(_) => AdminCommand::Usage(WATCHES_USAGE),
            },
            _ => AdminCommand::Usage(WATCHES_USAGE),
        },
        "stats" => AdminCommand::Stats,
        "broadcast" => AdminCommand::Broadcast,
        _ => return None,
    };
    Some(command)
}

/// Broadcast tally.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct Admin {
    store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
}

impl Admin {
    pub fn new(store: Arc<Store>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Run a command and reply in the admin's chat. Returns the reply text.
    pub async fn execute(
        &self,
        admin_id: i64,
        command: AdminCommand,
        reply_to_message_id: Option<i64>,
    ) -> Result<String, HandlerError> {
        let reply = match command {
            AdminCommand::Usage(usage) => usage.to_string(),
            AdminCommand::Watch { conversation_id, watcher_id } => {
                if self.store.add_watcher(conversation_id, watcher_id)? {
                    info!("👁 {} now watches {}", watcher_id, conversation_id);
                    format!("✅ {watcher_id} now receives copies from {conversation_id}.")
                } else {
                    format!("{watcher_id} already watches {conversation_id}.")
                }
            }
            AdminCommand::Unwatch { conversation_id, watcher_id } => {
                if self.store.remove_watcher(conversation_id, watcher_id)? {
                    info!("{} no longer watches {}", watcher_id, conversation_id);
                    format!("✅ {watcher_id} no longer receives copies from {conversation_id}.")
                } else {
                    format!("{watcher_id} was not watching {conversation_id}.")
                }
            }
            AdminCommand::Watches { conversation_id } => self.list_watches(conversation_id)?,
            AdminCommand::Stats => {
                let s = self.store.stats()?;
                format!(
                    "📊 <b>Stats</b>\nUsers: {}\nGroups: {} ({} active)\nWhispers: {} ({} read)\nPending: {}",
                    s.users, s.groups, s.active_groups, s.whispers, s.read_whispers, s.pending
                )
            }
            AdminCommand::Broadcast => match reply_to_message_id {
                None => "Reply to the message you want to broadcast with /broadcast.".to_string(),
                Some(message_id) => {
                    let report = self.broadcast(admin_id, message_id).await?;
                    format!("📣 Broadcast finished. Sent: {}, failed: {}.", report.sent, report.failed)
                }
            },
        };
        best_effort("admin reply", self.gateway.send_text(admin_id, &reply, None, None)).await;
        Ok(reply)
    }

    fn list_watches(&self, conversation_id: Option<i64>) -> Result<String, HandlerError> {
        let watches: Vec<_> = self
            .store
            .all_watches()?
            .into_iter()
            .filter(|w| conversation_id.is_none_or(|id| w.conversation_id == id))
            .collect();
        if watches.is_empty() {
            return Ok("No watchers.".to_string());
        }

        let mut lines = vec!["👁 <b>Watchers</b>".to_string()];
        for watch in watches {
            let title = match self.store.group(watch.conversation_id)? {
                Some(group) => group_label(&group.title),
                None => "unknown".to_string(),
            };
            lines.push(format!("{} ({}) → {}", title, watch.conversation_id, watch.watcher_id));
        }
        Ok(lines.join("\n"))
    }

    /// Forward one message from the admin's chat to all active groups and users.
    pub async fn broadcast(&self, admin_id: i64, message_id: i64) -> Result<BroadcastReport, HandlerError> {
        let mut targets = self.store.active_group_ids()?;
        targets.extend(self.store.user_ids()?.into_iter().filter(|&id| id != admin_id));

        let mut report = BroadcastReport::default();
        for target in targets {
            match best_effort("broadcast", self.gateway.forward_message(target, admin_id, message_id)).await {
                Some(_) => report.sent += 1,
                None => report.failed += 1,
            }
        }
        info!("📣 Broadcast: {} sent, {} failed", report.sent, report.failed);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch() {
        assert_eq!(
            parse("/watch -1001 42"),
            Some(AdminCommand::Watch { conversation_id: -1001, watcher_id: 42 })
        );
        assert_eq!(
            parse("/unwatch@najva_bot -1001 42"),
            Some(AdminCommand::Unwatch { conversation_id: -1001, watcher_id: 42 })
        );
    }

    #[test]
    fn test_parse_bad_arguments_gives_usage() {
        assert_eq!(parse("/watch -1001"), Some(AdminCommand::Usage(WATCH_USAGE)));
        assert_eq!(parse("/watch abc 42"), Some(AdminCommand::Usage(WATCH_USAGE)));
        assert_eq!(parse("/watches x"), Some(AdminCommand::Usage(WATCHES_USAGE)));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("/STATS"), Some(AdminCommand::Stats));
        assert_eq!(parse("/broadcast"), Some(AdminCommand::Broadcast));
        assert_eq!(parse("/watches"), Some(AdminCommand::Watches { conversation_id: None }));
        assert_eq!(parse("/watches -5"), Some(AdminCommand::Watches { conversation_id: Some(-5) }));
    }

    #[test]
    fn test_parse_ignores_other_text() {
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("/cancel"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("stats"), None);
    }
}
