//! Incoming events, decoupled from teloxide's update types.

/// Identity of a message author or button presser.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub user_id: i64,
    pub name: String,
    pub is_bot: bool,
}

/// Text message in a group or supergroup.
#[derive(Debug, Clone)]
pub struct GroupText {
    pub chat_id: i64,
    pub chat_title: String,
    pub message_id: i64,
    pub from: Author,
    pub text: String,
    /// Author of the replied-to message, if this is a reply.
    pub reply_to: Option<Author>,
}

/// Text message in the bot's private chat with a user.
#[derive(Debug, Clone)]
pub struct PrivateText {
    pub message_id: i64,
    pub from: Author,
    pub text: String,
    /// Id of the replied-to message in the same private chat.
    pub reply_to_message_id: Option<i64>,
}

/// A press of an inline button.
#[derive(Debug, Clone)]
pub struct DisclosureActivation {
    pub callback_id: String,
    pub from: Author,
    pub data: String,
}

/// The bot's own membership status in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Member,
    Administrator,
    Restricted,
    Left,
    Banned,
}

#[derive(Debug, Clone)]
pub struct MembershipChange {
    pub chat_id: i64,
    pub chat_title: String,
    /// Group or supergroup (channels and private chats are ignored).
    pub is_group: bool,
    pub status: BotStatus,
}

#[derive(Debug, Clone)]
pub enum Event {
    GroupText(GroupText),
    PrivateText(PrivateText),
    DisclosureActivation(DisclosureActivation),
    MembershipChange(MembershipChange),
}

impl Event {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::GroupText(_) => "group_text",
            Event::PrivateText(_) => "private_text",
            Event::DisclosureActivation(_) => "disclosure",
            Event::MembershipChange(_) => "membership",
        }
    }

    /// User who caused the event, if any.
    pub fn actor(&self) -> Option<&Author> {
        match self {
            Event::GroupText(m) => Some(&m.from),
            Event::PrivateText(m) => Some(&m.from),
            Event::DisclosureActivation(a) => Some(&a.from),
            Event::MembershipChange(_) => None,
        }
    }
}
