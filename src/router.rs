use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::command::Command;
use crate::config::BotConfig;
use crate::reply::{Field, Reply, ReplyBody};
use crate::shopping::{Item, ShoppingList};

/// What a registered command does when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Help,
    List,
    Complete,
    Add,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub description: String,
    pub action: Action,
}

/// Command name to handler mapping. Built once at startup; names are
/// case-sensitive and iterate in sorted order.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bot's standard command set
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("help", "See the available bot commands.", Action::Help);
        registry.register("list", "See the current shopping list", Action::List);
        registry.register(
            "complete",
            "Mark the current shopping list as done",
            Action::Complete,
        );
        registry.register(
            "add",
            "Add an item: add <quantity> <item name>",
            Action::Add,
        );
        registry
    }

    pub fn register(&mut self, name: &str, description: &str, action: Action) {
        debug!("Registered command: {}", name);
        self.commands.insert(
            name.to_string(),
            CommandSpec {
                description: description.to_string(),
                action,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// All commands, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandSpec)> {
        self.commands.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub const INVALID_COMMAND_TITLE: &str = "Invalid command";
pub const SERVICE_ERROR_TITLE: &str = "Shopping list unavailable";

/// Interprets commands and turns them into replies.
pub struct Router {
    registry: CommandRegistry,
    shopping: Arc<dyn ShoppingList>,
    bot: BotConfig,
}

impl Router {
    pub fn new(
        registry: CommandRegistry,
        shopping: Arc<dyn ShoppingList>,
        bot: BotConfig,
    ) -> Self {
        Self {
            registry,
            shopping,
            bot,
        }
    }

    /// Handle one command. Unregistered command names produce no reply.
    pub async fn route(&self, cmd: Command) -> Option<Reply> {
        debug!("Received command {:?} with args {:?}", cmd.name, cmd.args);

        let action = match self.registry.get(&cmd.name) {
            Some(spec) => spec.action,
            None => {
                debug!("Dropping unknown command {:?} from {}", cmd.name, cmd.user);
                return None;
            }
        };

        let reply = match action {
            Action::Help => self.help(&cmd.channel),
            Action::List => {
                info!("Listing shopping items");
                let result = self.shopping.retrieve_latest().await;
                self.service_reply(&cmd.channel, "Shopping list", result)
            }
            Action::Complete => {
                info!("Completing shopping list");
                let result = self.shopping.complete_list().await;
                self.service_reply(&cmd.channel, "Shopping list completed", result)
            }
            Action::Add => match parse_item(&cmd.args) {
                Some(item) => {
                    info!("Appending {} x {} to shopping list", item.quantity, item.name);
                    let result = self.shopping.append(item).await;
                    self.service_reply(&cmd.channel, "Added to shopping list", result)
                }
                None => {
                    Reply::notice(&cmd.channel, INVALID_COMMAND_TITLE, &self.bot.brand_color)
                }
            },
        };

        Some(reply)
    }

    fn help(&self, channel: &str) -> Reply {
        let fields = self
            .registry
            .iter()
            .map(|(name, spec)| {
                Field::new(format!("<bot> {}", name), spec.description.clone())
            })
            .collect();

        let body = ReplyBody {
            pretext: Some(self.bot.help_pretext.clone()),
            color: Some(self.bot.brand_color.clone()),
            fields,
        };
        Reply::new(channel, self.bot.tagline.clone(), body)
    }

    fn service_reply(&self, channel: &str, title: &str, result: Result<ReplyBody>) -> Reply {
        match result {
            Ok(body) => Reply::new(channel, title, body),
            Err(e) => {
                error!("Shopping list service call failed: {:#}", e);
                Reply::notice(channel, SERVICE_ERROR_TITLE, &self.bot.brand_color)
            }
        }
    }
}

/// `add` arguments: a base-10 quantity followed by one or more name words.
fn parse_item(args: &[String]) -> Option<Item> {
    if args.len() < 2 {
        return None;
    }
    let quantity = args[0].parse::<i64>().ok()?;
    Some(Item {
        quantity,
        name: args[1..].join(" "),
    })
}
