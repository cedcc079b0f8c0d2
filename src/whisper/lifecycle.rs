//! Whisper lifecycle: start in a group, collect in private, reveal by button.
//!
//! ```text
//! NONE ──start──▶ PENDING ──collect──▶ COLLECTED ──reveal──▶ DELIVERED ──first read──▶ READ
//!                    │ ├──cancel──▶ CANCELLED
//!                    │ └──sweep───▶ EXPIRED
//! ```
//!
//! Pending state is keyed by initiator (one in flight per user, last write
//! wins). Whispers are keyed by the token issued at start. Side effects that
//! only tidy up or notify watchers go through [`best_effort`] and never fail
//! the transition.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::whisper::event::{Author, BotStatus, DisclosureActivation, GroupText, MembershipChange, PrivateText};
use crate::whisper::format;
use crate::whisper::gateway::{Gateway, GatewayError, GatewayResult, Keyboard};
use crate::whisper::store::{DeliveryChannel, PendingWhisper, Store, StoreError, Whisper};
use crate::whisper::token::{new_token, parse_read_payload};
use crate::whisper::trigger::{ReplyCheck, classify_reply};

/// Source of "now". Swappable so tests can move time forward.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Failure that aborts a handler. User mistakes are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
}

/// Lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub bot_user_id: i64,
    /// Used for the "open private chat" button.
    pub bot_username: Option<String>,
    pub admin_id: Option<i64>,
    pub pending_ttl: chrono::Duration,
    pub max_whisper_chars: usize,
    pub max_alert_chars: usize,
    pub trigger_delete_delay: Duration,
}

impl LifecycleConfig {
    /// `fetched_username` (from `get_me`) is used only when the config has none.
    pub fn from_config(config: &Config, bot_user_id: i64, fetched_username: Option<String>) -> Self {
        Self {
            bot_user_id,
            bot_username: config.bot_username.clone().or(fetched_username),
            admin_id: config.admin_id.map(|id| id.0 as i64),
            pending_ttl: chrono::Duration::seconds(config.pending_ttl_secs as i64),
            max_whisper_chars: config.max_whisper_chars,
            max_alert_chars: config.max_alert_chars,
            trigger_delete_delay: Duration::from_secs(config.trigger_delete_delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    NoReplyTarget,
    TargetIsBot,
    Started {
        token: String,
        /// Helper message in the group, if it could be posted.
        placeholder_message_id: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    NothingPending,
    Empty,
    TooLong { len: usize, max: usize },
    /// The disclosure message could not be posted; the pending state was restored.
    DeliveryFailed,
    Stored { token: String, message_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled,
    NothingPending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    NotFound,
    /// Failed authorization attempt.
    NotForYou,
    Shown {
        via: DeliveryChannel,
        /// True only for the target's first reveal.
        first_read: bool,
    },
    /// Neither the alert nor a private message reached the viewer.
    Undelivered,
}

/// Run a side effect whose failure must not affect the caller.
pub async fn best_effort<T>(what: &str, fut: impl Future<Output = GatewayResult<T>>) -> Option<T> {
    match fut.await {
        Ok(value) => Some(value),
        Err(e @ (GatewayError::Blocked | GatewayError::NotFound(_))) => {
            debug!("{what} skipped: {e}");
            None
        }
        Err(e) => {
            warn!("{what} failed: {e}");
            None
        }
    }
}

pub struct Lifecycle {
    config: LifecycleConfig,
    store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
    clock: Clock,
}

impl Lifecycle {
    pub fn new(config: LifecycleConfig, store: Arc<Store>, gateway: Arc<dyn Gateway>, clock: Clock) -> Self {
        Self { config, store, gateway, clock }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.config.admin_id == Some(user_id)
    }

    /// Delete expired pending whispers and their helper messages.
    pub async fn sweep(&self) -> Result<usize, HandlerError> {
        let expired = self.store.sweep_expired(self.now())?;
        for placeholder in &expired {
            best_effort(
                "delete expired helper",
                self.gateway.delete_message(placeholder.conversation_id, placeholder.message_id),
            )
            .await;
        }
        Ok(expired.len())
    }

    /// Periodic housekeeping: sweep, then drop whispers older than `retention`.
    pub async fn maintain(&self, retention: Option<chrono::Duration>) -> Result<(usize, usize), HandlerError> {
        let swept = self.sweep().await?;
        let purged = match retention {
            Some(keep) => self.store.purge_whispers_before(self.now() - keep)?,
            None => 0,
        };
        Ok((swept, purged))
    }

    /// Watchers of a conversation plus the admin, without duplicates.
    pub fn recipients(&self, conversation_id: i64) -> Result<Vec<i64>, HandlerError> {
        let mut recipients = self.store.watchers_of(conversation_id)?;
        if let Some(admin) = self.config.admin_id
            && !recipients.contains(&admin)
        {
            recipients.push(admin);
        }
        Ok(recipients)
    }

    /// Copy `text` to everyone watching the conversation.
    async fn mirror(&self, conversation_id: i64, text: &str) {
        let recipients = match self.recipients(conversation_id) {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!("Watcher lookup for {} failed: {}", conversation_id, e);
                return;
            }
        };
        for watcher in recipients {
            best_effort("mirror to watcher", self.gateway.send_text(watcher, text, None, None)).await;
        }
    }

    // ==================== START ====================

    /// Handle a group message that matched a trigger word.
    pub async fn start(&self, msg: &GroupText) -> Result<StartOutcome, HandlerError> {
        self.sweep().await?;
        let now = self.now();
        self.store.upsert_group(msg.chat_id, &msg.chat_title, true, now)?;

        let target = match classify_reply(msg.reply_to.as_ref(), self.config.bot_user_id) {
            ReplyCheck::NoReplyTarget => {
                best_effort(
                    "reply-target hint",
                    self.gateway.send_text(msg.chat_id, format::NO_REPLY_HINT, Some(msg.message_id), None),
                )
                .await;
                return Ok(StartOutcome::NoReplyTarget);
            }
            ReplyCheck::TargetIsBot => {
                best_effort(
                    "bot-target rejection",
                    self.gateway.send_text(msg.chat_id, format::TARGET_IS_BOT, Some(msg.message_id), None),
                )
                .await;
                return Ok(StartOutcome::TargetIsBot);
            }
            ReplyCheck::Accepted(target) => target,
        };

        let token = new_token();
        let pending = PendingWhisper {
            token: token.clone(),
            initiator_id: msg.from.user_id,
            target_id: target.user_id,
            target_name: target.name.clone(),
            conversation_id: msg.chat_id,
            conversation_title: msg.chat_title.clone(),
            placeholder_message_id: None,
            expires_at: now + self.config.pending_ttl,
        };
        // One whisper in flight per initiator: the older one is abandoned
        if let Some(replaced) = self.store.cancel_pending(msg.from.user_id)?
            && let Some(helper_id) = replaced.placeholder_message_id
        {
            best_effort(
                "delete replaced helper",
                self.gateway.delete_message(replaced.conversation_id, helper_id),
            )
            .await;
        }
        self.store.upsert_pending(&pending)?;
        info!(
            "✉️ Whisper started by {} for {} in {} ({})",
            msg.from.user_id, target.user_id, msg.chat_id, token
        );

        let keyboard = self.config.bot_username.as_ref().map(|username| Keyboard::OpenChat {
            label: format::OPEN_CHAT_LABEL.to_string(),
            url: format!("https://t.me/{username}"),
        });
        let helper = format::helper_text(
            self.config.max_whisper_chars,
            self.config.pending_ttl.num_minutes().max(1) as u64,
        );
        let placeholder_message_id = best_effort(
            "post helper message",
            self.gateway.send_text(msg.chat_id, &helper, Some(msg.message_id), keyboard),
        )
        .await;
        if let Some(helper_id) = placeholder_message_id {
            self.store.attach_placeholder(msg.from.user_id, &token, helper_id)?;
        }

        self.schedule_trigger_removal(msg.chat_id, msg.message_id);

        Ok(StartOutcome::Started { token, placeholder_message_id })
    }

    /// Remove the trigger message after a short delay, in the background.
    fn schedule_trigger_removal(&self, chat_id: i64, message_id: i64) {
        let gateway = self.gateway.clone();
        let delay = self.config.trigger_delete_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            best_effort("delete trigger message", gateway.delete_message(chat_id, message_id)).await;
        });
    }

    // ==================== COLLECT ====================

    /// Handle a private text from a user who may have a whisper pending.
    pub async fn collect(&self, msg: &PrivateText) -> Result<CollectOutcome, HandlerError> {
        self.sweep().await?;
        let sender = &msg.from;
        let chat_id = sender.user_id;

        let Some(pending) = self.store.pending_for(sender.user_id, self.now())? else {
            self.reply(chat_id, format::NOTHING_PENDING).await;
            return Ok(CollectOutcome::NothingPending);
        };

        let content = msg.text.as_str();
        if content.trim().is_empty() {
            self.reply(chat_id, format::EMPTY_TEXT).await;
            return Ok(CollectOutcome::Empty);
        }
        // Surrounding whitespace does not count toward the limit but is stored as sent
        let len = content.trim().chars().count();
        let max = self.config.max_whisper_chars;
        if len > max {
            self.reply(chat_id, &format::too_long(len, max)).await;
            return Ok(CollectOutcome::TooLong { len, max });
        }

        // Another handler may have collected or replaced it since the read above
        let Some(pending) = self.store.take_pending(sender.user_id, &pending.token)? else {
            self.reply(chat_id, format::NOTHING_PENDING).await;
            return Ok(CollectOutcome::NothingPending);
        };

        let mut whisper = Whisper {
            token: pending.token.clone(),
            sender_id: sender.user_id,
            sender_name: sender.name.clone(),
            target_id: pending.target_id,
            target_name: pending.target_name.clone(),
            conversation_id: pending.conversation_id,
            conversation_title: pending.conversation_title.clone(),
            content: content.to_string(),
            delivered: false,
            delivered_via: None,
            read_at: None,
            created_at: self.now(),
            message_id: None,
        };
        self.store.insert_whisper(&whisper)?;

        let keyboard = Keyboard::Reveal {
            label: format::READ_LABEL.to_string(),
            token: whisper.token.clone(),
        };
        let message_id = match self
            .gateway
            .send_text(whisper.conversation_id, &format::disclosure_text(&whisper), None, Some(keyboard))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Could not post whisper {} into {}: {}",
                    whisper.token, whisper.conversation_id, e
                );
                self.store.delete_whisper(&whisper.token)?;
                self.store.restore_pending(&pending)?;
                self.reply(chat_id, format::DELIVERY_FAILED).await;
                return Ok(CollectOutcome::DeliveryFailed);
            }
        };
        // The whisper is live from here on; a lost message id only costs the "read" edit
        if let Err(e) = self.store.attach_whisper_message(&whisper.token, message_id) {
            warn!("Could not record message {} for whisper {}: {}", message_id, whisper.token, e);
        }
        whisper.message_id = Some(message_id);
        info!(
            "🔒 Whisper {} posted in {} for {}",
            whisper.token, whisper.conversation_id, whisper.target_id
        );

        if let Some(helper_id) = pending.placeholder_message_id {
            best_effort(
                "delete helper message",
                self.gateway.delete_message(pending.conversation_id, helper_id),
            )
            .await;
        }

        self.mirror(whisper.conversation_id, &format::mirror_whisper(&whisper)).await;
        self.reply(chat_id, format::STORED).await;

        Ok(CollectOutcome::Stored { token: whisper.token, message_id })
    }

    /// Drop the user's pending whisper, whatever its state.
    pub async fn cancel(&self, user: &Author) -> Result<CancelOutcome, HandlerError> {
        match self.store.cancel_pending(user.user_id)? {
            Some(pending) => {
                if let Some(helper_id) = pending.placeholder_message_id {
                    best_effort(
                        "delete cancelled helper",
                        self.gateway.delete_message(pending.conversation_id, helper_id),
                    )
                    .await;
                }
                info!("Whisper {} cancelled by {}", pending.token, user.user_id);
                self.reply(user.user_id, format::CANCELLED).await;
                Ok(CancelOutcome::Cancelled)
            }
            None => {
                self.reply(user.user_id, format::NOTHING_PENDING).await;
                Ok(CancelOutcome::NothingPending)
            }
        }
    }

    /// Nudge a user who opened the private chat (e.g. via /start).
    pub async fn prompt(&self, user: &Author) -> Result<bool, HandlerError> {
        let pending = self.store.pending_for(user.user_id, self.now())?.is_some();
        let text = if pending { format::SEND_TEXT_NOW } else { format::NOTHING_PENDING };
        self.reply(user.user_id, text).await;
        Ok(pending)
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        best_effort("private reply", self.gateway.send_text(chat_id, text, None, None)).await;
    }

    // ==================== REVEAL ====================

    /// Handle a press of a `read:<token>` button.
    pub async fn reveal(&self, activation: &DisclosureActivation) -> Result<RevealOutcome, HandlerError> {
        let viewer = &activation.from;
        let whisper = match parse_read_payload(&activation.data) {
            Some(token) => self.store.whisper(token)?,
            None => None,
        };
        let Some(whisper) = whisper else {
            self.alert(&activation.callback_id, format::NOT_FOUND).await;
            return Ok(RevealOutcome::NotFound);
        };

        let is_target = viewer.user_id == whisper.target_id;
        if !is_target && !self.is_admin(viewer.user_id) {
            warn!(
                "🚫 Rejected reveal of whisper {} by {} (target {})",
                whisper.token, viewer.user_id, whisper.target_id
            );
            self.alert(&activation.callback_id, format::NOT_FOR_YOU).await;
            return Ok(RevealOutcome::NotForYou);
        }

        let display = format::truncate_chars(&whisper.content, self.config.max_alert_chars);
        let via = match self
            .gateway
            .answer_callback(&activation.callback_id, Some(&display), true)
            .await
        {
            Ok(()) => DeliveryChannel::Alert,
            Err(e) => {
                debug!("Alert for whisper {} failed ({}), sending privately", whisper.token, e);
                let text = format::revealed_private(whisper.sender_id, &whisper.content);
                match self.gateway.send_text(viewer.user_id, &text, None, None).await {
                    Ok(_) => {
                        best_effort(
                            "answer callback",
                            self.gateway
                                .answer_callback(&activation.callback_id, Some(format::SENT_TO_PRIVATE), false),
                        )
                        .await;
                        DeliveryChannel::Button
                    }
                    Err(e) => {
                        warn!("Could not show whisper {} to {}: {}", whisper.token, viewer.user_id, e);
                        return Ok(RevealOutcome::Undelivered);
                    }
                }
            }
        };

        // Admin peeks do not count as delivery to the target
        if !is_target {
            return Ok(RevealOutcome::Shown { via, first_read: false });
        }

        self.store.mark_delivered(&whisper.token, via)?;
        let first_read = self.store.mark_read(&whisper.token, self.now())?;
        if first_read {
            info!("📭 Whisper {} read by {}", whisper.token, viewer.user_id);
            if let Some(message_id) = whisper.message_id {
                let keyboard = Keyboard::Reveal {
                    label: format::READ_AGAIN_LABEL.to_string(),
                    token: whisper.token.clone(),
                };
                best_effort(
                    "mark placeholder read",
                    self.gateway.edit_text(
                        whisper.conversation_id,
                        message_id,
                        &format::disclosure_read_text(&whisper),
                        Some(keyboard),
                    ),
                )
                .await;
            }
            self.mirror(whisper.conversation_id, &format::mirror_read(&whisper)).await;
        }

        Ok(RevealOutcome::Shown { via, first_read })
    }

    async fn alert(&self, callback_id: &str, text: &str) {
        best_effort("answer callback", self.gateway.answer_callback(callback_id, Some(text), true)).await;
    }

    // ==================== REGISTRY ====================

    /// Keep the group registry in line with the bot's membership.
    pub fn membership_changed(&self, change: &MembershipChange) -> Result<(), HandlerError> {
        if !change.is_group {
            return Ok(());
        }
        let now = self.now();
        match change.status {
            BotStatus::Member | BotStatus::Administrator => {
                info!("➕ Active in group {} ({})", change.chat_title, change.chat_id);
                self.store.upsert_group(change.chat_id, &change.chat_title, true, now)?;
            }
            BotStatus::Restricted | BotStatus::Left | BotStatus::Banned => {
                info!("➖ Inactive in group {} ({:?})", change.chat_id, change.status);
                self.store.set_group_active(change.chat_id, false, now)?;
            }
        }
        Ok(())
    }
}
