use tracing::debug;

use crate::platform::InboundEvent;

/// The bot's own identity, learned from the `connected` event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BotIdentity {
    #[default]
    Unknown,
    Known(String),
}

impl BotIdentity {
    /// The literal token that addresses the bot, e.g. `<@U123>`
    pub fn mention(&self) -> Option<String> {
        match self {
            BotIdentity::Unknown => None,
            BotIdentity::Known(id) => Some(format!("<@{}>", id)),
        }
    }
}

/// A bot-addressed message split into a command name and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub channel: String,
    pub user: String,
}

/// Turn an inbound event into a command if it is a message addressed to the bot.
///
/// The text must start with the exact mention token (no trimming). It is then
/// split on whitespace: the mention is token 0, the command name token 1 and the
/// arguments everything after.
pub fn classify(event: &InboundEvent, identity: &BotIdentity) -> Option<Command> {
    debug!("Received {} event", event.kind());

    let (channel, user, text) = match event {
        InboundEvent::Message {
            channel,
            user,
            text,
        } => (channel, user, text),
        _ => return None,
    };

    let mention = identity.mention()?;
    if !text.starts_with(&mention) {
        return None;
    }

    let mut tokens = text.split_whitespace().skip(1);
    let name = match tokens.next() {
        Some(name) => name.to_string(),
        None => {
            debug!("Mention without a command from {} in {}", user, channel);
            return None;
        }
    };

    Some(Command {
        name,
        args: tokens.map(str::to_string).collect(),
        channel: channel.clone(),
        user: user.clone(),
    })
}
