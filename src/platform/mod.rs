pub mod slack;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::error::SendError;
use crate::reply::ReplyBody;

/// A notification received from the chat platform's live event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The stream is up; carries the bot's own user id
    Connected { bot_id: String },
    TeamJoined { user_id: String },
    Message {
        channel: String,
        user: String,
        text: String,
    },
    ReactionRemoved { user_id: String, reaction: String },
    Error { message: String },
    InvalidAuth,
    /// Any other event kind, by name
    Other { kind: String },
}

impl InboundEvent {
    /// Short event kind name used in diagnostics
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::Connected { .. } => "connected",
            InboundEvent::TeamJoined { .. } => "team_join",
            InboundEvent::Message { .. } => "message",
            InboundEvent::ReactionRemoved { .. } => "reaction_removed",
            InboundEvent::Error { .. } => "error",
            InboundEvent::InvalidAuth => "invalid_auth",
            InboundEvent::Other { kind } => kind,
        }
    }
}

/// Lazy, non-restartable sequence of platform events
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Outbound side of the chat platform used by the reply publisher.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolve a channel id to the channel's name
    async fn channel_name(&self, channel_id: &str) -> Result<String>;

    /// Post a titled, formatted message to a channel.
    /// `as_bot` marks the message as authored by the bot user.
    async fn post_message(
        &self,
        channel: &str,
        title: &str,
        body: &ReplyBody,
        as_bot: bool,
    ) -> std::result::Result<(), SendError>;
}
