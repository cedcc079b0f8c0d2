//! Recording gateway for tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::gateway::{Gateway, GatewayError, GatewayResult, Keyboard};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat_id: i64,
        message_id: i64,
        text: String,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    },
    Edit {
        chat_id: i64,
        message_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Delete {
        chat_id: i64,
        message_id: i64,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
    Forward {
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    next_message_id: i64,
    /// Chats where sending or forwarding fails.
    unreachable: HashSet<i64>,
    fail_callbacks: bool,
}

/// Mock gateway that records every call.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.state.lock().unwrap().next_message_id = 1000;
        gateway
    }

    /// Make sends to `chat_id` fail as if the bot were removed or blocked.
    pub fn make_unreachable(&self, chat_id: i64) {
        self.state.lock().unwrap().unreachable.insert(chat_id);
    }

    pub fn make_reachable(&self, chat_id: i64) {
        self.state.lock().unwrap().unreachable.remove(&chat_id);
    }

    /// Make callback answers fail (e.g. the query went stale).
    pub fn fail_callbacks(&self, fail: bool) {
        self.state.lock().unwrap().fail_callbacks = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Texts sent to one chat, in order.
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { chat_id: c, text, .. } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<(i64, i64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { chat_id, message_id } => Some((chat_id, message_id)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| matches!(c, Call::Edit { .. })).collect()
    }

    pub fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Answer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<i64> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(&chat_id) {
            return Err(if chat_id > 0 {
                GatewayError::Blocked
            } else {
                GatewayError::Forbidden(format!("cannot post in {chat_id}"))
            });
        }
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        state.calls.push(Call::Send {
            chat_id,
            message_id,
            text: text.to_string(),
            reply_to,
            keyboard,
        });
        Ok(message_id)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> GatewayResult<()> {
        self.state.lock().unwrap().calls.push(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> GatewayResult<()> {
        self.state.lock().unwrap().calls.push(Call::Delete { chat_id, message_id });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_callbacks {
            return Err(GatewayError::Api("query is too old".to_string()));
        }
        state.calls.push(Call::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }

    async fn forward_message(&self, to_chat_id: i64, from_chat_id: i64, message_id: i64) -> GatewayResult<i64> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(&to_chat_id) {
            return Err(GatewayError::Blocked);
        }
        state.next_message_id += 1;
        state.calls.push(Call::Forward { to_chat_id, from_chat_id, message_id });
        Ok(state.next_message_id)
    }
}
