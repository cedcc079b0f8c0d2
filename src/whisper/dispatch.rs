//! Routes incoming events to the lifecycle and admin handlers.

use std::sync::Arc;
use tracing::{debug, error};

use crate::whisper::admin::{self, Admin};
use crate::whisper::event::{Event, GroupText, PrivateText};
use crate::whisper::format;
use crate::whisper::gateway::Gateway;
use crate::whisper::lifecycle::{Clock, HandlerError, Lifecycle, LifecycleConfig, best_effort};
use crate::whisper::store::Store;
use crate::whisper::token::READ_PREFIX;
use crate::whisper::trigger::TriggerMatcher;

/// Shared state handed to every update handler.
pub struct App {
    pub store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
    matcher: TriggerMatcher,
    lifecycle: Lifecycle,
    admin: Admin,
    clock: Clock,
}

impl App {
    pub fn new(
        config: LifecycleConfig,
        trigger_words: &[String],
        store: Arc<Store>,
        gateway: Arc<dyn Gateway>,
        clock: Clock,
    ) -> Self {
        let matcher = TriggerMatcher::new(trigger_words, config.bot_username.as_deref());
        let lifecycle = Lifecycle::new(config, store.clone(), gateway.clone(), clock.clone());
        let admin = Admin::new(store.clone(), gateway.clone());
        Self { store, gateway, matcher, lifecycle, admin, clock }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Handle one event. Failures are logged and reported to the user, never
    /// propagated, so one bad update cannot stop the dispatcher.
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();
        let actor = event.actor().map(|a| a.user_id);

        if let Err(e) = self.route(&event).await {
            error!("❌ Failed to handle {} from {:?}: {}", kind, actor, e);
            let reply_chat = match &event {
                Event::GroupText(m) => Some(m.chat_id),
                Event::PrivateText(m) => Some(m.from.user_id),
                _ => None,
            };
            if let Event::DisclosureActivation(a) = &event {
                best_effort(
                    "report failure",
                    self.gateway.answer_callback(&a.callback_id, Some(format::INTERNAL_ERROR), true),
                )
                .await;
            }
            if let Some(chat_id) = reply_chat {
                best_effort("report failure", self.gateway.send_text(chat_id, format::INTERNAL_ERROR, None, None))
                    .await;
            }
        }
    }

    async fn route(&self, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::GroupText(msg) => self.on_group_text(msg).await,
            Event::PrivateText(msg) => self.on_private_text(msg).await,
            Event::DisclosureActivation(activation) => {
                if activation.data.starts_with(READ_PREFIX) {
                    let outcome = self.lifecycle.reveal(activation).await?;
                    debug!("Reveal by {}: {:?}", activation.from.user_id, outcome);
                } else {
                    debug!("Ignoring callback data {:?}", activation.data);
                    // Stop the client's loading indicator
                    best_effort("answer callback", self.gateway.answer_callback(&activation.callback_id, None, false))
                        .await;
                }
                Ok(())
            }
            Event::MembershipChange(change) => self.lifecycle.membership_changed(change),
        }
    }

    async fn on_group_text(&self, msg: &GroupText) -> Result<(), HandlerError> {
        if !self.matcher.is_trigger(&msg.text) {
            return Ok(());
        }
        let outcome = self.lifecycle.start(msg).await?;
        debug!("Trigger in {}: {:?}", msg.chat_id, outcome);
        Ok(())
    }

    async fn on_private_text(&self, msg: &PrivateText) -> Result<(), HandlerError> {
        let user = &msg.from;
        self.store.touch_user(user.user_id, &user.name, (self.clock)())?;

        let is_admin = self.lifecycle.config().admin_id == Some(user.user_id);
        if is_admin && let Some(command) = admin::parse(&msg.text) {
            self.admin.execute(user.user_id, command, msg.reply_to_message_id).await?;
            return Ok(());
        }

        match command_name(&msg.text).as_deref() {
            Some("cancel") => {
                self.lifecycle.cancel(user).await?;
            }
            Some("start") => {
                self.lifecycle.prompt(user).await?;
            }
            _ => {
                let outcome = self.lifecycle.collect(msg).await?;
                debug!("Private text from {}: {:?}", user.user_id, outcome);
            }
        }
        Ok(())
    }
}

/// `/cancel@bot args` → `cancel`. Only the first word counts.
fn command_name(text: &str) -> Option<String> {
    let head = text.split_whitespace().next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head);
    Some(name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("/cancel").as_deref(), Some("cancel"));
        assert_eq!(command_name("/Start@najva_bot payload").as_deref(), Some("start"));
        assert_eq!(command_name("cancel"), None);
        assert_eq!(command_name("  "), None);
    }
}
