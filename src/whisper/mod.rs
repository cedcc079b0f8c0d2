//! Whisper bot - private messages for one group member, revealed by button.

pub mod admin;
pub mod dispatch;
pub mod event;
pub mod format;
pub mod gateway;
pub mod lifecycle;
pub mod store;
pub mod telegram;
pub mod token;
pub mod trigger;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatch::App;
pub use event::{Author, BotStatus, DisclosureActivation, Event, GroupText, MembershipChange, PrivateText};
pub use gateway::{Gateway, GatewayError, Keyboard};
pub use lifecycle::{Clock, HandlerError, Lifecycle, LifecycleConfig, system_clock};
pub use store::{Store, StoreError};
pub use telegram::TelegramClient;
